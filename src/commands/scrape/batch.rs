//! Bounded accumulation of extracted records and numbered batch files.
//!
//! The in-flight batch is journaled to `pending.csv` in the save directory as
//! records arrive, so a hard crash keeps every record whose item has already
//! been checkpointed. `pending.index` lists the work-item index of each
//! journaled row and is rewritten after the row is synced; a row it does not
//! list was never confirmed. Flushing renames the journal to
//! `batch_NNNN.csv`, so a batch file either exists complete or not at all.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use regex::Regex;
use tracing::warn;

use crate::tabular::{Table, append_rows, read_table, write_table};
use crate::util::write_atomic;

use super::extract::{ExtractedRecord, schema_headers};

pub const JOURNAL_FILE_NAME: &str = "pending.csv";
pub const JOURNAL_INDEX_FILE_NAME: &str = "pending.index";

pub fn batch_file_name(batch_number: u32) -> String {
    format!("batch_{batch_number:04}.csv")
}

pub fn batch_name_pattern() -> Result<Regex> {
    Regex::new(r"^batch_(\d{4,})\.csv$").context("failed to compile batch filename regex")
}

pub fn parse_batch_number(file_name: &str, pattern: &Regex) -> Option<u32> {
    pattern
        .captures(file_name)
        .and_then(|captures| captures.get(1))
        .and_then(|number| number.as_str().parse::<u32>().ok())
}

/// Batch files in `save_dir`, ordered by batch number.
pub fn list_batches(save_dir: &Path) -> Result<Vec<(u32, PathBuf)>> {
    if !save_dir.exists() {
        return Ok(Vec::new());
    }

    let pattern = batch_name_pattern()?;
    let mut batches = Vec::new();
    let entries = fs::read_dir(save_dir)
        .with_context(|| format!("failed to read {}", save_dir.display()))?;

    for entry in entries {
        let entry =
            entry.with_context(|| format!("failed to read entry in {}", save_dir.display()))?;
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        let number = path
            .file_name()
            .and_then(|name| name.to_str())
            .and_then(|name| parse_batch_number(name, &pattern));
        if let Some(number) = number {
            batches.push((number, path));
        }
    }

    batches.sort_by_key(|(number, _)| *number);
    Ok(batches)
}

/// One past the highest batch number already on disk.
pub fn next_batch_number(save_dir: &Path) -> Result<u32> {
    Ok(list_batches(save_dir)?
        .last()
        .map_or(1, |(number, _)| number + 1))
}

#[derive(Debug)]
pub struct BatchAccumulator {
    capacity: usize,
    save_dir: PathBuf,
    headers: Vec<String>,
    rows: Vec<Vec<String>>,
    indices: Vec<usize>,
}

impl BatchAccumulator {
    /// Opens the accumulator for `save_dir`, picking up any journaled records
    /// left behind by an earlier run.
    pub fn open(save_dir: &Path, capacity: usize) -> Result<Self> {
        if capacity == 0 {
            bail!("batch size must be at least 1");
        }

        let mut accumulator = Self {
            capacity,
            save_dir: save_dir.to_path_buf(),
            headers: schema_headers(),
            rows: Vec::new(),
            indices: Vec::new(),
        };

        let journal = accumulator.journal_path();
        let index_path = accumulator.index_path();
        if !journal.exists() {
            // Left over from a flush that renamed the journal.
            remove_if_present(&index_path)?;
            return Ok(accumulator);
        }

        let mut table = read_table(&journal)?;
        if !table.headers.is_empty() && table.headers != accumulator.headers {
            bail!(
                "journal {} does not match the record schema",
                journal.display()
            );
        }

        let width = accumulator.headers.len();
        let before = table.rows.len();
        table.rows.retain(|row| row.len() == width);
        let torn = before - table.rows.len();

        let mut indices = read_indices(&index_path)?;
        let unconfirmed = table.rows.len().saturating_sub(indices.len());
        table.rows.truncate(indices.len());
        indices.truncate(table.rows.len());

        accumulator.rows = table.rows;
        accumulator.indices = indices;

        if torn > 0 || unconfirmed > 0 || table.headers.is_empty() {
            warn!(
                path = %journal.display(),
                torn,
                unconfirmed,
                "repairing batch journal"
            );
            accumulator.rewrite_journal()?;
        }

        Ok(accumulator)
    }

    pub fn journal_path(&self) -> PathBuf {
        self.save_dir.join(JOURNAL_FILE_NAME)
    }

    fn index_path(&self) -> PathBuf {
        self.save_dir.join(JOURNAL_INDEX_FILE_NAME)
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.rows.len() >= self.capacity
    }

    /// Work-item index of the most recently appended record.
    pub fn last_index(&self) -> Option<usize> {
        self.indices.last().copied()
    }

    /// Journals `record` for work item `index`.
    pub fn append(&mut self, index: usize, record: &ExtractedRecord) -> Result<()> {
        if self.is_full() {
            bail!(
                "batch accumulator holds {} records; flush before appending",
                self.rows.len()
            );
        }

        let row = record.to_row();
        append_rows(&self.journal_path(), &self.headers, std::slice::from_ref(&row))?;
        self.rows.push(row);
        self.indices.push(index);
        self.write_indices()
    }

    /// Drops the newest record. Used when resuming after a crash that landed
    /// between journaling a record and checkpointing its item.
    pub fn discard_last(&mut self) -> Result<()> {
        if self.rows.pop().is_none() {
            return Ok(());
        }
        self.indices.pop();
        self.rewrite_journal()
    }

    fn write_indices(&self) -> Result<()> {
        let mut data = String::new();
        for index in &self.indices {
            data.push_str(&index.to_string());
            data.push('\n');
        }
        write_atomic(&self.index_path(), data.as_bytes())
    }

    fn rewrite_journal(&self) -> Result<()> {
        let journal = self.journal_path();
        if self.is_empty() {
            remove_if_present(&journal)?;
            remove_if_present(&self.index_path())
        } else {
            let table = Table {
                headers: self.headers.clone(),
                rows: self.rows.clone(),
            };
            write_table(&journal, &table)?;
            self.write_indices()
        }
    }

    /// Moves the current batch to `batch_{batch_number}.csv` and resets.
    /// Returns `None` without touching disk when nothing is pending.
    pub fn flush(&mut self, batch_number: u32) -> Result<Option<PathBuf>> {
        if self.is_empty() {
            return Ok(None);
        }

        let target = self.save_dir.join(batch_file_name(batch_number));
        if target.exists() {
            bail!(
                "batch {} already exists at {}; refusing to overwrite",
                batch_number,
                target.display()
            );
        }

        let journal = self.journal_path();
        fs::rename(&journal, &target).with_context(|| {
            format!(
                "failed to move {} to {}",
                journal.display(),
                target.display()
            )
        })?;
        remove_if_present(&self.index_path())?;

        self.rows.clear();
        self.indices.clear();
        Ok(Some(target))
    }
}

fn remove_if_present(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
        Err(err) => Err(err).with_context(|| format!("failed to remove {}", path.display())),
    }
}

/// Confirmed work-item indices, one per line. A torn or unparsable tail ends
/// the list.
fn read_indices(path: &Path) -> Result<Vec<usize>> {
    let raw = match fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(err) => {
            return Err(err).with_context(|| format!("failed to read {}", path.display()));
        }
    };

    Ok(raw
        .lines()
        .map_while(|line| line.trim().parse::<usize>().ok())
        .collect())
}
