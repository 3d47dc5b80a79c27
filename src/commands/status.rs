use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::{info, warn};

use crate::cli::{DataLayout, StatusArgs};
use crate::commands::scrape::{
    CheckpointStore, FAILURE_LOG_FILE_NAME, JOURNAL_FILE_NAME, list_batches, load_work_items,
};
use crate::model::ScrapeRunManifest;
use crate::tabular::read_table;
use crate::util::sha256_file;

pub fn run(args: StatusArgs) -> Result<()> {
    let layout = DataLayout::new(&args.data_root);
    let ids_path = args.ids_path.unwrap_or_else(|| layout.ids_path());
    let save_dir = args.save_dir.unwrap_or_else(|| layout.save_dir());
    let checkpoint_path = args
        .checkpoint_path
        .unwrap_or_else(|| layout.checkpoint_path());
    let final_path = args.final_path.unwrap_or_else(|| layout.final_path());

    info!(data_root = %args.data_root.display(), "status requested");

    let checkpoint = CheckpointStore::new(&checkpoint_path);
    let next_index = checkpoint.load();
    match checkpoint.last_attempted() {
        Some(last) => info!(last_attempted = last, next_index, "loaded checkpoint"),
        None => warn!(path = %checkpoint_path.display(), "checkpoint missing; a run would start at 0"),
    }

    if ids_path.exists() {
        let items = load_work_items(&ids_path)?;
        info!(
            work_items = items.len(),
            remaining = items.len().saturating_sub(next_index),
            "work-item table status"
        );
    } else {
        warn!(path = %ids_path.display(), "work-item table missing");
    }

    let batches = list_batches(&save_dir)?;
    let mut batch_rows = 0_usize;
    for (_, path) in &batches {
        batch_rows += read_table(path)?.rows.len();
    }
    info!(
        save_dir = %save_dir.display(),
        batch_files = batches.len(),
        rows = batch_rows,
        last_batch = batches.last().map(|(number, _)| *number).unwrap_or_default(),
        "batch status"
    );

    let journal_rows = row_count(&save_dir.join(JOURNAL_FILE_NAME))?;
    if journal_rows > 0 {
        info!(rows = journal_rows, "pending batch journal carries unflushed records");
    }

    let failures = row_count(&save_dir.join(FAILURE_LOG_FILE_NAME))?;
    info!(failed_games = failures, "failure log status");

    if final_path.exists() {
        info!(
            path = %final_path.display(),
            rows = read_table(&final_path)?.rows.len(),
            sha256 = %sha256_file(&final_path)?,
            "final dataset status"
        );
    } else {
        warn!(path = %final_path.display(), "final dataset missing");
    }

    match latest_run_manifest(&layout.manifest_dir())? {
        Some((path, manifest)) => info!(
            path = %path.display(),
            run_id = %manifest.run_id,
            status = ?manifest.status,
            finished_at = %manifest.finished_at,
            succeeded = manifest.counts.succeeded,
            failed = manifest.counts.failed,
            "loaded latest scrape run manifest"
        ),
        None => warn!("no scrape run manifest found"),
    }

    Ok(())
}

fn row_count(path: &Path) -> Result<usize> {
    if !path.exists() {
        return Ok(0);
    }
    Ok(read_table(path)?.rows.len())
}

/// Newest `scrape_run_<timestamp>.json`; the compact UTC stamp sorts lexically.
fn latest_run_manifest(manifest_dir: &Path) -> Result<Option<(PathBuf, ScrapeRunManifest)>> {
    if !manifest_dir.exists() {
        return Ok(None);
    }

    let mut candidates = Vec::new();
    for entry in fs::read_dir(manifest_dir)
        .with_context(|| format!("failed to read {}", manifest_dir.display()))?
    {
        let path = entry
            .with_context(|| format!("failed to read entry in {}", manifest_dir.display()))?
            .path();
        let is_run_manifest = path
            .file_name()
            .and_then(|name| name.to_str())
            .is_some_and(|name| name.starts_with("scrape_run_") && name.ends_with(".json"));
        if is_run_manifest {
            candidates.push(path);
        }
    }

    let Some(path) = candidates.into_iter().max() else {
        return Ok(None);
    };
    let raw = fs::read(&path).with_context(|| format!("failed to read {}", path.display()))?;
    let manifest: ScrapeRunManifest = serde_json::from_slice(&raw)
        .with_context(|| format!("failed to parse {}", path.display()))?;

    Ok(Some((path, manifest)))
}
