use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use anyhow::{Result, bail};
use chrono::NaiveDate;

use super::batch::{BatchAccumulator, list_batches};
use super::checkpoint::CheckpointStore;
use super::documents::{RawDocumentSet, ResourceFetcher, SubResource};
use super::driver::{CancelFlag, Pipeline, PipelineConfig};
use super::extract::extract_record;
use crate::model::{RunStatus, WorkItem};
use crate::tabular::{Table, headers_of, read_table};

#[derive(Default)]
struct FakeFetcher {
    fail_ids: HashSet<String>,
    cancel_on: Option<(String, CancelFlag)>,
    /// Turns the file at this path into a directory when the id is fetched,
    /// so the next write to it fails.
    block_on: Option<(String, PathBuf)>,
    fetched: Mutex<Vec<String>>,
}

impl FakeFetcher {
    fn failing(ids: &[&str]) -> Self {
        Self {
            fail_ids: ids.iter().map(|id| id.to_string()).collect(),
            ..Self::default()
        }
    }

    fn cancelling_on(id: &str, flag: &CancelFlag) -> Self {
        Self {
            cancel_on: Some((id.to_string(), flag.clone())),
            ..Self::default()
        }
    }

    fn fetched(&self) -> Vec<String> {
        self.fetched.lock().unwrap().clone()
    }
}

impl ResourceFetcher for FakeFetcher {
    fn fetch(&self, item: &WorkItem) -> Result<RawDocumentSet> {
        self.fetched.lock().unwrap().push(item.id.clone());

        if let Some((id, flag)) = &self.cancel_on {
            if *id == item.id {
                flag.cancel();
            }
        }
        if let Some((id, path)) = &self.block_on {
            if *id == item.id {
                let _ = fs::remove_file(path);
                fs::create_dir_all(path).unwrap();
            }
        }
        if self.fail_ids.contains(&item.id) {
            bail!("503 Service Unavailable for contest {}", item.id);
        }

        Ok(documents_for(item))
    }
}

fn documents_for(item: &WorkItem) -> RawDocumentSet {
    let box_score = Table {
        headers: headers_of(&["Team", "1st", "2nd", "Total"]),
        rows: vec![
            vec![String::new(); 4],
            vec![format!("Home {}", item.id), "30".into(), "31".into(), "61".into()],
            vec![format!("Away {}", item.id), "28".into(), "25".into(), "53".into()],
        ],
    };
    RawDocumentSet::default().with(SubResource::BoxScore, vec![Table::default(), box_score])
}

fn work_items(count: usize) -> Vec<WorkItem> {
    let start = NaiveDate::from_ymd_opt(2024, 11, 4).unwrap();
    (0..count)
        .map(|idx| WorkItem {
            id: game_id(idx),
            date: start + chrono::Days::new((idx / 10) as u64),
        })
        .collect()
}

fn game_id(idx: usize) -> String {
    (5_800_000 + idx).to_string()
}

fn config(root: &Path, batch_size: usize) -> PipelineConfig {
    let save_dir = root.join("batches");
    PipelineConfig {
        batch_size,
        item_delay: Duration::ZERO,
        batch_pause: Duration::ZERO,
        failure_log_path: save_dir.join("failed_games.csv"),
        checkpoint_path: root.join("resume_state.txt"),
        final_path: root.join("games_complete.csv"),
        save_dir,
    }
}

fn batch_sizes(save_dir: &Path) -> Vec<(u32, usize)> {
    list_batches(save_dir)
        .unwrap()
        .into_iter()
        .map(|(number, path)| (number, read_table(&path).unwrap().rows.len()))
        .collect()
}

fn final_ids(config: &PipelineConfig) -> Vec<String> {
    read_table(&config.final_path)
        .unwrap()
        .rows
        .into_iter()
        .map(|row| row[0].clone())
        .collect()
}

#[test]
fn full_run_with_one_failed_game_batches_and_merges_the_rest() {
    let dir = tempfile::tempdir().unwrap();
    let config = config(dir.path(), 50);
    let items = work_items(120);
    let failed = game_id(77);
    let fetcher = FakeFetcher::failing(&[&failed]);

    let report = Pipeline::new(&config, &fetcher, CancelFlag::default())
        .run(&items)
        .unwrap();

    assert_eq!(report.status, RunStatus::Completed);
    assert_eq!(report.attempted, 120);
    assert_eq!(report.succeeded, 119);
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].id, failed);
    assert!(report.failures[0].error.contains("503"));
    assert_eq!(report.last_checkpoint, Some(119));
    assert_eq!(batch_sizes(&config.save_dir), vec![(1, 50), (2, 50), (3, 19)]);
    assert_eq!(fs::read_to_string(&config.checkpoint_path).unwrap().trim(), "119");

    let merge = report.merge.expect("completed run merges");
    assert_eq!(merge.rows, 119);
    let ids = final_ids(&config);
    assert_eq!(ids.len(), 119);
    assert!(!ids.contains(&failed));

    let failures = read_table(&config.failure_log_path).unwrap();
    assert_eq!(failures.headers, headers_of(&["Game_ID", "Error"]));
    assert_eq!(failures.rows.len(), 1);
    assert_eq!(failures.rows[0][0], failed);

    let record_table = read_table(&config.final_path).unwrap();
    let home_col = record_table.column_index("Home_Team").unwrap();
    assert_eq!(record_table.rows[0][home_col], format!("Home {}", game_id(0)));
}

#[test]
fn cancelled_run_flushes_and_resumes_after_last_attempted_game() {
    let dir = tempfile::tempdir().unwrap();
    let config = config(dir.path(), 50);
    let items = work_items(100);

    let cancel = CancelFlag::default();
    let first = FakeFetcher::cancelling_on(&game_id(45), &cancel);
    let report = Pipeline::new(&config, &first, cancel.clone())
        .run(&items)
        .unwrap();

    assert_eq!(report.status, RunStatus::Interrupted);
    assert_eq!(report.attempted, 46);
    assert_eq!(report.last_checkpoint, Some(45));
    assert!(report.merge.is_none());
    assert!(!config.final_path.exists());
    assert_eq!(batch_sizes(&config.save_dir), vec![(1, 46)]);
    assert_eq!(CheckpointStore::new(&config.checkpoint_path).load(), 46);

    let second = FakeFetcher::default();
    let report = Pipeline::new(&config, &second, CancelFlag::default())
        .run(&items)
        .unwrap();

    assert_eq!(report.status, RunStatus::Completed);
    assert_eq!(report.start_index, 46);
    assert_eq!(second.fetched().first(), Some(&game_id(46)));
    assert_eq!(second.fetched().len(), 54);
    assert_eq!(
        batch_sizes(&config.save_dir),
        vec![(1, 46), (2, 50), (3, 4)]
    );

    let ids = final_ids(&config);
    let expected: Vec<String> = (0..100).map(game_id).collect();
    assert_eq!(ids, expected);
}

#[test]
fn resumed_runs_produce_the_same_dataset_as_a_fresh_run() {
    let items = work_items(25);

    let fresh_dir = tempfile::tempdir().unwrap();
    let fresh = config(fresh_dir.path(), 6);
    Pipeline::new(&fresh, &FakeFetcher::failing(&[&game_id(9)]), CancelFlag::default())
        .run(&items)
        .unwrap();
    let fresh_rows = read_table(&fresh.final_path).unwrap();

    for stop_after in [0, 5, 6, 13, 23] {
        let dir = tempfile::tempdir().unwrap();
        let config = config(dir.path(), 6);

        let cancel = CancelFlag::default();
        let mut first = FakeFetcher::cancelling_on(&game_id(stop_after), &cancel);
        first.fail_ids.insert(game_id(9));
        Pipeline::new(&config, &first, cancel).run(&items).unwrap();

        let second = FakeFetcher::failing(&[&game_id(9)]);
        Pipeline::new(&config, &second, CancelFlag::default())
            .run(&items)
            .unwrap();

        assert_eq!(
            second.fetched().len(),
            items.len() - stop_after - 1,
            "stop after {stop_after}"
        );
        assert_eq!(
            read_table(&config.final_path).unwrap().rows,
            fresh_rows.rows,
            "stop after {stop_after}"
        );
    }
}

#[test]
fn crash_before_checkpoint_reprocesses_only_the_unfinished_game() {
    let dir = tempfile::tempdir().unwrap();
    let config = config(dir.path(), 50);
    let items = work_items(30);

    // State left by a run killed after journaling game 5 but before
    // checkpointing it.
    let mut accumulator = BatchAccumulator::open(&config.save_dir, 50).unwrap();
    for (index, item) in items[..=5].iter().enumerate() {
        accumulator
            .append(index, &extract_record(item, &documents_for(item)))
            .unwrap();
    }
    CheckpointStore::new(&config.checkpoint_path).save(4).unwrap();

    let fetcher = FakeFetcher::default();
    let report = Pipeline::new(&config, &fetcher, CancelFlag::default())
        .run(&items)
        .unwrap();

    assert_eq!(report.start_index, 5);
    assert_eq!(fetcher.fetched().first(), Some(&game_id(5)));

    let ids = final_ids(&config);
    let expected: Vec<String> = (0..30).map(game_id).collect();
    assert_eq!(ids, expected);
}

#[test]
fn checkpointed_record_survives_when_the_next_item_repeats_its_id() {
    let mut items = work_items(6);
    items[3].id = items[2].id.clone();

    let fresh_dir = tempfile::tempdir().unwrap();
    let fresh = config(fresh_dir.path(), 50);
    Pipeline::new(&fresh, &FakeFetcher::default(), CancelFlag::default())
        .run(&items)
        .unwrap();

    // State left by a run killed right after checkpointing item 2.
    let dir = tempfile::tempdir().unwrap();
    let config = config(dir.path(), 50);
    let mut accumulator = BatchAccumulator::open(&config.save_dir, 50).unwrap();
    for (index, item) in items[..=2].iter().enumerate() {
        accumulator
            .append(index, &extract_record(item, &documents_for(item)))
            .unwrap();
    }
    CheckpointStore::new(&config.checkpoint_path).save(2).unwrap();

    let fetcher = FakeFetcher::default();
    let report = Pipeline::new(&config, &fetcher, CancelFlag::default())
        .run(&items)
        .unwrap();

    assert_eq!(report.start_index, 3);
    assert_eq!(fetcher.fetched().len(), 3);
    let ids = final_ids(&config);
    assert_eq!(
        ids,
        vec![game_id(0), game_id(1), game_id(2), game_id(2), game_id(4), game_id(5)]
    );
    assert_eq!(
        read_table(&config.final_path).unwrap().rows,
        read_table(&fresh.final_path).unwrap().rows
    );
}

#[test]
fn full_journal_left_by_a_crash_is_flushed_before_resuming() {
    let dir = tempfile::tempdir().unwrap();
    let config = config(dir.path(), 4);
    let items = work_items(10);

    let mut accumulator = BatchAccumulator::open(&config.save_dir, 4).unwrap();
    for (index, item) in items[..4].iter().enumerate() {
        accumulator
            .append(index, &extract_record(item, &documents_for(item)))
            .unwrap();
    }
    CheckpointStore::new(&config.checkpoint_path).save(3).unwrap();

    let report = Pipeline::new(&config, &FakeFetcher::default(), CancelFlag::default())
        .run(&items)
        .unwrap();

    assert_eq!(report.start_index, 4);
    assert_eq!(batch_sizes(&config.save_dir), vec![(1, 4), (2, 4), (3, 2)]);
    assert_eq!(final_ids(&config).len(), 10);
}

#[test]
fn cancellation_before_the_first_game_touches_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let config = config(dir.path(), 5);
    let cancel = CancelFlag::default();
    cancel.cancel();

    let fetcher = FakeFetcher::default();
    let report = Pipeline::new(&config, &fetcher, cancel)
        .run(&work_items(3))
        .unwrap();

    assert_eq!(report.status, RunStatus::Interrupted);
    assert_eq!(report.attempted, 0);
    assert!(fetcher.fetched().is_empty());
    assert!(!config.checkpoint_path.exists());
    assert!(list_batches(&config.save_dir).unwrap().is_empty());
}

#[test]
fn rerun_after_completion_only_remerges() {
    let dir = tempfile::tempdir().unwrap();
    let config = config(dir.path(), 4);
    let items = work_items(9);

    let first = Pipeline::new(&config, &FakeFetcher::default(), CancelFlag::default())
        .run(&items)
        .unwrap();
    let bytes = fs::read(&config.final_path).unwrap();

    let fetcher = FakeFetcher::default();
    let second = Pipeline::new(&config, &fetcher, CancelFlag::default())
        .run(&items)
        .unwrap();

    assert!(fetcher.fetched().is_empty());
    assert_eq!(second.attempted, 0);
    assert_eq!(fs::read(&config.final_path).unwrap(), bytes);
    assert_eq!(
        first.merge.unwrap().sha256,
        second.merge.unwrap().sha256
    );
}

#[test]
fn failure_log_accumulates_across_runs() {
    let dir = tempfile::tempdir().unwrap();
    let config = config(dir.path(), 10);
    let items = work_items(6);

    let cancel = CancelFlag::default();
    let mut first = FakeFetcher::cancelling_on(&game_id(2), &cancel);
    first.fail_ids.insert(game_id(1));
    Pipeline::new(&config, &first, cancel).run(&items).unwrap();

    Pipeline::new(&config, &FakeFetcher::failing(&[&game_id(4)]), CancelFlag::default())
        .run(&items)
        .unwrap();

    let failed: Vec<String> = read_table(&config.failure_log_path)
        .unwrap()
        .rows
        .into_iter()
        .map(|row| row[0].clone())
        .collect();
    assert_eq!(failed, vec![game_id(1), game_id(4)]);
    assert_eq!(final_ids(&config).len(), 4);
}

#[test]
fn unwritable_checkpoint_aborts_the_run() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = config(dir.path(), 5);
    let blocker = dir.path().join("not-a-dir");
    fs::write(&blocker, "file").unwrap();
    config.checkpoint_path = blocker.join("resume_state.txt");

    let result = Pipeline::new(&config, &FakeFetcher::default(), CancelFlag::default())
        .run(&work_items(3));

    assert!(result.is_err());
}

#[test]
fn failure_is_logged_even_when_a_later_checkpoint_write_aborts_the_run() {
    let dir = tempfile::tempdir().unwrap();
    let config = config(dir.path(), 50);
    let items = work_items(5);

    let mut fetcher = FakeFetcher::failing(&[&game_id(1)]);
    fetcher.block_on = Some((game_id(3), config.checkpoint_path.clone()));

    let result = Pipeline::new(&config, &fetcher, CancelFlag::default()).run(&items);

    assert!(result.is_err());
    assert_eq!(fetcher.fetched().len(), 4);
    let failures = read_table(&config.failure_log_path).unwrap();
    assert_eq!(failures.rows.len(), 1);
    assert_eq!(failures.rows[0][0], game_id(1));
    assert!(failures.rows[0][1].contains("503"));
}

#[test]
fn zero_batch_size_is_rejected_before_any_fetch() {
    let dir = tempfile::tempdir().unwrap();
    let config = config(dir.path(), 0);
    let fetcher = FakeFetcher::default();

    assert!(
        Pipeline::new(&config, &fetcher, CancelFlag::default())
            .run(&work_items(3))
            .is_err()
    );
    assert!(fetcher.fetched().is_empty());
}
