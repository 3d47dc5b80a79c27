use std::path::PathBuf;

use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand};

pub const DEFAULT_DATA_ROOT: &str = ".cache/hoopcrawl";
pub const DEFAULT_BASE_URL: &str = "https://stats.ncaa.org";
pub const DEFAULT_USER_AGENT: &str =
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/47.0.2526.80 Safari/537.36";

#[derive(Parser, Debug)]
#[command(
    name = "hoopcrawl",
    version,
    about = "Resumable crawler for per-game box scores, team stats and officials"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    Ids(IdsArgs),
    Scrape(ScrapeArgs),
    Merge(MergeArgs),
    Status(StatusArgs),
    Referees(RefereesArgs),
    Travel(TravelArgs),
}

#[derive(Args, Debug, Clone)]
pub struct HttpArgs {
    #[arg(long, default_value = DEFAULT_BASE_URL)]
    pub base_url: String,

    #[arg(long, default_value = DEFAULT_USER_AGENT)]
    pub user_agent: String,

    #[arg(long, default_value_t = 30)]
    pub timeout_secs: u64,

    #[arg(long, default_value_t = 1500)]
    pub request_delay_ms: u64,
}

#[derive(Args, Debug, Clone)]
pub struct IdsArgs {
    #[arg(long, default_value = DEFAULT_DATA_ROOT)]
    pub data_root: PathBuf,

    #[arg(long)]
    pub ids_path: Option<PathBuf>,

    /// First scoreboard date (inclusive).
    #[arg(long)]
    pub start: NaiveDate,

    /// Last scoreboard date (exclusive).
    #[arg(long)]
    pub end: NaiveDate,

    #[arg(long, default_value_t = 18403)]
    pub season_division_id: u32,

    #[command(flatten)]
    pub http: HttpArgs,
}

#[derive(Args, Debug, Clone)]
pub struct ScrapeArgs {
    #[arg(long, default_value = DEFAULT_DATA_ROOT)]
    pub data_root: PathBuf,

    #[arg(long)]
    pub ids_path: Option<PathBuf>,

    #[arg(long)]
    pub save_dir: Option<PathBuf>,

    #[arg(long)]
    pub checkpoint_path: Option<PathBuf>,

    #[arg(long)]
    pub final_path: Option<PathBuf>,

    #[arg(long, default_value_t = 50)]
    pub batch_size: usize,

    #[arg(long, default_value_t = 1500)]
    pub item_delay_ms: u64,

    #[arg(long, default_value_t = 5000)]
    pub batch_pause_ms: u64,

    #[command(flatten)]
    pub http: HttpArgs,
}

#[derive(Args, Debug, Clone)]
pub struct MergeArgs {
    #[arg(long, default_value = DEFAULT_DATA_ROOT)]
    pub data_root: PathBuf,

    #[arg(long)]
    pub save_dir: Option<PathBuf>,

    #[arg(long)]
    pub final_path: Option<PathBuf>,
}

#[derive(Args, Debug, Clone)]
pub struct StatusArgs {
    #[arg(long, default_value = DEFAULT_DATA_ROOT)]
    pub data_root: PathBuf,

    #[arg(long)]
    pub ids_path: Option<PathBuf>,

    #[arg(long)]
    pub save_dir: Option<PathBuf>,

    #[arg(long)]
    pub checkpoint_path: Option<PathBuf>,

    #[arg(long)]
    pub final_path: Option<PathBuf>,
}

#[derive(Args, Debug, Clone)]
pub struct RefereesArgs {
    #[arg(long, default_value = DEFAULT_DATA_ROOT)]
    pub data_root: PathBuf,

    #[arg(long)]
    pub final_path: Option<PathBuf>,

    #[arg(long)]
    pub output_path: Option<PathBuf>,

    #[arg(long, default_value_t = 10)]
    pub top: usize,
}

#[derive(Args, Debug, Clone)]
pub struct TravelArgs {
    #[arg(long, default_value = DEFAULT_DATA_ROOT)]
    pub data_root: PathBuf,

    #[arg(long)]
    pub final_path: Option<PathBuf>,

    #[arg(long)]
    pub cache_path: Option<PathBuf>,

    #[arg(long)]
    pub output_path: Option<PathBuf>,

    #[arg(long)]
    pub details_path: Option<PathBuf>,

    #[arg(long, default_value = "https://nominatim.openstreetmap.org")]
    pub geocoder_url: String,

    #[arg(long, default_value = "hoopcrawl-referee-travel")]
    pub geocoder_user_agent: String,

    #[arg(long, default_value_t = 1000)]
    pub geocode_delay_ms: u64,

    #[arg(long, default_value_t = 30)]
    pub timeout_secs: u64,
}

/// Default on-disk layout below `--data-root`.
pub struct DataLayout {
    root: PathBuf,
}

impl DataLayout {
    pub fn new(root: &std::path::Path) -> Self {
        Self {
            root: root.to_path_buf(),
        }
    }

    pub fn ids_path(&self) -> PathBuf {
        self.root.join("game_ids.csv")
    }

    pub fn save_dir(&self) -> PathBuf {
        self.root.join("batches")
    }

    pub fn checkpoint_path(&self) -> PathBuf {
        self.root.join("resume_state.txt")
    }

    pub fn final_path(&self) -> PathBuf {
        self.root.join("games_complete.csv")
    }

    pub fn manifest_dir(&self) -> PathBuf {
        self.root.join("manifests")
    }

    pub fn report_dir(&self) -> PathBuf {
        self.root.join("reports")
    }

    pub fn venue_cache_path(&self) -> PathBuf {
        self.root.join("venue_cache.sqlite")
    }
}
