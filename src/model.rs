use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// One unit of crawl work. Its position in the loaded list is its resume index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkItem {
    pub id: String,
    pub date: NaiveDate,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureEntry {
    pub id: String,
    pub error: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Completed,
    Interrupted,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunPaths {
    pub ids_path: String,
    pub save_dir: String,
    pub checkpoint_path: String,
    pub failure_log_path: String,
    pub final_path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunCounts {
    pub work_items: usize,
    pub start_index: usize,
    pub attempted: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub batches_written: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MergeSummary {
    pub batch_files: usize,
    pub rows: usize,
    pub sha256: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScrapeRunManifest {
    pub manifest_version: u32,
    pub run_id: String,
    pub status: RunStatus,
    pub started_at: String,
    pub finished_at: String,
    pub last_checkpoint: Option<usize>,
    pub batch_size: usize,
    pub paths: RunPaths,
    pub counts: RunCounts,
    pub batch_files: Vec<String>,
    pub merge: Option<MergeSummary>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdsManifest {
    pub manifest_version: u32,
    pub generated_at: String,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub days_scanned: usize,
    pub game_count: usize,
    pub ids_path: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TravelLeg {
    pub date: NaiveDate,
    pub from_venue: String,
    pub to_venue: String,
    pub distance: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RefereeTravel {
    pub referee: String,
    pub games_officiated: usize,
    pub total_travel_miles: f64,
    pub avg_miles_per_trip: f64,
    pub max_single_trip: f64,
    pub travel_legs: Vec<TravelLeg>,
}
