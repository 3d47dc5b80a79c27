use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Result, bail};
use tracing::{debug, info, warn};

use crate::model::{FailureEntry, MergeSummary, RunStatus, WorkItem};
use crate::tabular::{append_rows, headers_of};
use crate::util::ensure_directory;

use super::batch::{BatchAccumulator, next_batch_number};
use super::checkpoint::CheckpointStore;
use super::documents::ResourceFetcher;
use super::extract::{ExtractedRecord, extract_record};
use super::merge::merge_batches;

const PAUSE_SLICE: Duration = Duration::from_millis(100);

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub batch_size: usize,
    pub item_delay: Duration,
    /// Longer pause taken right after a batch is flushed.
    pub batch_pause: Duration,
    pub save_dir: PathBuf,
    pub checkpoint_path: PathBuf,
    pub failure_log_path: PathBuf,
    pub final_path: PathBuf,
}

impl PipelineConfig {
    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            bail!("batch size must be at least 1");
        }
        if self.save_dir.exists() && !self.save_dir.is_dir() {
            bail!(
                "save directory is not a directory: {}",
                self.save_dir.display()
            );
        }
        Ok(())
    }
}

/// Cooperative stop request, checked between work items.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone)]
pub struct RunReport {
    pub status: RunStatus,
    pub total_items: usize,
    pub start_index: usize,
    pub attempted: usize,
    pub succeeded: usize,
    pub failures: Vec<FailureEntry>,
    pub batch_files: Vec<PathBuf>,
    pub last_checkpoint: Option<usize>,
    pub merge: Option<MergeSummary>,
}

pub struct Pipeline<'a, F: ResourceFetcher + ?Sized> {
    config: &'a PipelineConfig,
    fetcher: &'a F,
    cancel: CancelFlag,
}

impl<'a, F: ResourceFetcher + ?Sized> Pipeline<'a, F> {
    pub fn new(config: &'a PipelineConfig, fetcher: &'a F, cancel: CancelFlag) -> Self {
        Self {
            config,
            fetcher,
            cancel,
        }
    }

    /// Processes `items` from the checkpointed position to the end, or until
    /// cancelled. Per-item failures are logged and skipped; storage failures
    /// abort the run.
    pub fn run(&self, items: &[WorkItem]) -> Result<RunReport> {
        self.config.validate()?;
        ensure_directory(&self.config.save_dir)?;

        let checkpoint = CheckpointStore::new(&self.config.checkpoint_path);
        let start_index = checkpoint.load();
        let mut next_batch = next_batch_number(&self.config.save_dir)?;
        let mut accumulator = BatchAccumulator::open(&self.config.save_dir, self.config.batch_size)?;

        let mut report = RunReport {
            status: RunStatus::Completed,
            total_items: items.len(),
            start_index,
            attempted: 0,
            succeeded: 0,
            failures: Vec::new(),
            batch_files: Vec::new(),
            last_checkpoint: checkpoint.last_attempted(),
            merge: None,
        };

        // A record journaled for the item we are about to retry means the
        // previous run stopped before checkpointing it.
        if let Some(index) = accumulator.last_index() {
            if index >= start_index {
                warn!(
                    game_id = items.get(index).map(|item| item.id.as_str()).unwrap_or_default(),
                    index,
                    "dropping journaled record for an item that was never checkpointed"
                );
                accumulator.discard_last()?;
            }
        }

        if accumulator.is_full() {
            self.flush(&mut accumulator, &mut next_batch, &mut report.batch_files)?;
        }

        if start_index > items.len() {
            warn!(
                start_index,
                total = items.len(),
                "checkpoint is past the end of the work list"
            );
        }

        info!(
            total = items.len(),
            start_index,
            checkpoint = %checkpoint.path().display(),
            pending_records = accumulator.len(),
            next_batch,
            "starting scrape"
        );

        for index in start_index..items.len() {
            if self.cancel.is_cancelled() {
                info!(next_index = index, "cancellation requested; stopping before next game");
                report.status = RunStatus::Interrupted;
                break;
            }

            let item = &items[index];
            report.attempted += 1;
            info!(
                game_id = %item.id,
                date = %item.date,
                index,
                progress = %format!("{}/{}", index + 1, items.len()),
                "scraping game"
            );

            match self.process_item(item) {
                Ok(record) => {
                    debug!(
                        game_id = %item.id,
                        home = record.text("Home_Team").unwrap_or_default(),
                        away = record.text("Away_Team").unwrap_or_default(),
                        home_score = ?record.number("Home_Score_Final"),
                        away_score = ?record.number("Away_Score_Final"),
                        "extracted game"
                    );
                    accumulator.append(index, &record)?;
                    report.succeeded += 1;
                }
                Err(err) => {
                    let error = format!("{err:#}");
                    warn!(game_id = %item.id, index, error = %error, "failed to scrape game");
                    let entry = FailureEntry {
                        id: item.id.clone(),
                        error,
                    };
                    write_failure_log(&self.config.failure_log_path, std::slice::from_ref(&entry))?;
                    report.failures.push(entry);
                }
            }

            checkpoint.save(index)?;
            report.last_checkpoint = Some(index);

            let flushed = accumulator.is_full()
                && self.flush(&mut accumulator, &mut next_batch, &mut report.batch_files)?;

            if index + 1 < items.len() {
                self.pause(if flushed {
                    self.config.batch_pause
                } else {
                    self.config.item_delay
                });
            }
        }

        self.flush(&mut accumulator, &mut next_batch, &mut report.batch_files)?;

        if !report.failures.is_empty() {
            info!(
                path = %self.config.failure_log_path.display(),
                failures = report.failures.len(),
                "recorded failed games"
            );
        }

        match report.status {
            RunStatus::Interrupted => {
                if let Some(index) = report.last_checkpoint {
                    checkpoint.save(index)?;
                }
                info!(
                    last_checkpoint = ?report.last_checkpoint,
                    "scrape interrupted; progress saved, rerun to resume"
                );
            }
            RunStatus::Completed => {
                report.merge = merge_batches(&self.config.save_dir, &self.config.final_path)?;
            }
        }

        Ok(report)
    }

    fn process_item(&self, item: &WorkItem) -> Result<ExtractedRecord> {
        let documents = self.fetcher.fetch(item)?;
        Ok(extract_record(item, &documents))
    }

    fn flush(
        &self,
        accumulator: &mut BatchAccumulator,
        next_batch: &mut u32,
        written: &mut Vec<PathBuf>,
    ) -> Result<bool> {
        let records = accumulator.len();
        match accumulator.flush(*next_batch)? {
            Some(path) => {
                info!(batch = *next_batch, records, path = %path.display(), "saved batch");
                *next_batch += 1;
                written.push(path);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Blocking wait that gives up early once cancellation is requested.
    fn pause(&self, duration: Duration) {
        let deadline = Instant::now() + duration;
        while !self.cancel.is_cancelled() {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            thread::sleep(remaining.min(PAUSE_SLICE));
        }
    }
}

pub fn failure_log_headers() -> Vec<String> {
    headers_of(&["Game_ID", "Error"])
}

/// Appends failures; earlier entries, including other runs', are kept.
pub fn write_failure_log(path: &std::path::Path, failures: &[FailureEntry]) -> Result<()> {
    let rows: Vec<Vec<String>> = failures
        .iter()
        .map(|entry| vec![entry.id.clone(), entry.error.clone()])
        .collect();
    append_rows(path, &failure_log_headers(), &rows)
}
