use std::path::PathBuf;
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use tracing::{info, warn};

use crate::cli::{DataLayout, ScrapeArgs};
use crate::model::{RunCounts, RunPaths, RunStatus, ScrapeRunManifest};
use crate::util::{now_utc_string, utc_compact_string, write_json_pretty};

use super::driver::{CancelFlag, Pipeline, PipelineConfig, RunReport};
use super::http::HttpFetcher;
use super::source::load_work_items;

pub const FAILURE_LOG_FILE_NAME: &str = "failed_games.csv";

pub fn run(args: ScrapeArgs) -> Result<RunStatus> {
    let started_ts = Utc::now();
    let started_at = now_utc_string();
    let run_id = format!("scrape-{}", utc_compact_string(started_ts));

    let layout = DataLayout::new(&args.data_root);
    let ids_path = args.ids_path.clone().unwrap_or_else(|| layout.ids_path());
    let save_dir = args.save_dir.clone().unwrap_or_else(|| layout.save_dir());
    let config = PipelineConfig {
        batch_size: args.batch_size,
        item_delay: Duration::from_millis(args.item_delay_ms),
        batch_pause: Duration::from_millis(args.batch_pause_ms),
        failure_log_path: save_dir.join(FAILURE_LOG_FILE_NAME),
        checkpoint_path: args
            .checkpoint_path
            .clone()
            .unwrap_or_else(|| layout.checkpoint_path()),
        final_path: args.final_path.clone().unwrap_or_else(|| layout.final_path()),
        save_dir,
    };
    config.validate()?;

    info!(run_id = %run_id, ids_path = %ids_path.display(), save_dir = %config.save_dir.display(), "starting scrape run");

    let items = load_work_items(&ids_path)?;
    let fetcher = HttpFetcher::new(&args.http)?;

    let cancel = CancelFlag::default();
    install_signal_handler(cancel.clone())?;

    let report = Pipeline::new(&config, &fetcher, cancel).run(&items)?;
    log_summary(&report);

    let manifest = build_manifest(run_id, started_at, &ids_path, &config, &report);
    let manifest_path = layout
        .manifest_dir()
        .join(format!("scrape_run_{}.json", utc_compact_string(started_ts)));
    write_json_pretty(&manifest_path, &manifest)?;
    info!(path = %manifest_path.display(), "wrote scrape run manifest");

    Ok(report.status)
}

/// Sets `cancel` on SIGINT or SIGTERM. The pipeline notices between games.
fn install_signal_handler(cancel: CancelFlag) -> Result<()> {
    thread::Builder::new()
        .name("signal-listener".to_string())
        .spawn(move || {
            let runtime = match tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
            {
                Ok(runtime) => runtime,
                Err(err) => {
                    warn!(error = %err, "signal listener unavailable; Ctrl-C will stop immediately");
                    return;
                }
            };

            runtime.block_on(shutdown_signal());
            info!("shutdown signal received; finishing the current game");
            cancel.cancel();
        })
        .context("failed to spawn signal listener")?;
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!(error = %err, "failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {},
                    _ = sigterm.recv() => {},
                }
            }
            Err(err) => {
                warn!(error = %err, "failed to register SIGTERM handler");
                ctrl_c.await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        ctrl_c.await;
    }
}

fn log_summary(report: &RunReport) {
    let merged_rows = report.merge.as_ref().map_or(0, |merge| merge.rows);
    let success_rate = if report.total_items == 0 {
        0.0
    } else {
        merged_rows as f64 / report.total_items as f64 * 100.0
    };

    info!(
        status = ?report.status,
        attempted = report.attempted,
        succeeded = report.succeeded,
        failed = report.failures.len(),
        batches_written = report.batch_files.len(),
        last_checkpoint = ?report.last_checkpoint,
        "scrape run finished"
    );
    if report.merge.is_some() {
        info!(
            games_in_dataset = merged_rows,
            total_games = report.total_items,
            success_rate = %format!("{success_rate:.2}%"),
            "final statistics"
        );
    }
}

fn build_manifest(
    run_id: String,
    started_at: String,
    ids_path: &std::path::Path,
    config: &PipelineConfig,
    report: &RunReport,
) -> ScrapeRunManifest {
    let display = |path: &PathBuf| path.display().to_string();

    ScrapeRunManifest {
        manifest_version: 1,
        run_id,
        status: report.status,
        started_at,
        finished_at: now_utc_string(),
        last_checkpoint: report.last_checkpoint,
        batch_size: config.batch_size,
        paths: RunPaths {
            ids_path: ids_path.display().to_string(),
            save_dir: display(&config.save_dir),
            checkpoint_path: display(&config.checkpoint_path),
            failure_log_path: display(&config.failure_log_path),
            final_path: display(&config.final_path),
        },
        counts: RunCounts {
            work_items: report.total_items,
            start_index: report.start_index,
            attempted: report.attempted,
            succeeded: report.succeeded,
            failed: report.failures.len(),
            batches_written: report.batch_files.len(),
        },
        batch_files: report.batch_files.iter().map(display).collect(),
        merge: report.merge.clone(),
    }
}
