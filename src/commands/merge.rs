use anyhow::Result;
use tracing::{info, warn};

use crate::cli::{DataLayout, MergeArgs};
use crate::commands::scrape::merge_batches;

pub fn run(args: MergeArgs) -> Result<()> {
    let layout = DataLayout::new(&args.data_root);
    let save_dir = args.save_dir.unwrap_or_else(|| layout.save_dir());
    let final_path = args.final_path.unwrap_or_else(|| layout.final_path());

    info!(save_dir = %save_dir.display(), "merge requested");

    match merge_batches(&save_dir, &final_path)? {
        Some(summary) => info!(
            batch_files = summary.batch_files,
            rows = summary.rows,
            sha256 = %summary.sha256,
            "final dataset ready"
        ),
        None => warn!(path = %final_path.display(), "nothing merged; final dataset not written"),
    }

    Ok(())
}
