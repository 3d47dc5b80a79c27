use std::path::Path;

use anyhow::{Result, bail};
use tracing::{debug, info};

use crate::model::MergeSummary;
use crate::tabular::{Table, read_table, write_table};
use crate::util::sha256_file;

use super::batch::list_batches;
use super::extract::schema_headers;

/// Concatenates every batch file in `save_dir`, in batch-number order, into
/// `final_path`. Only reads batch files, so re-running it over the same
/// batches reproduces the same bytes. Returns `None` when there are no batches.
pub fn merge_batches(save_dir: &Path, final_path: &Path) -> Result<Option<MergeSummary>> {
    let batches = list_batches(save_dir)?;
    if batches.is_empty() {
        info!(save_dir = %save_dir.display(), "no batch files to merge");
        return Ok(None);
    }

    let mut merged = Table::new(schema_headers());
    for (number, path) in &batches {
        let table = read_table(path)?;
        if table.headers != merged.headers {
            bail!(
                "batch {} at {} has an unexpected header",
                number,
                path.display()
            );
        }
        debug!(batch = number, rows = table.rows.len(), "merging batch");
        merged.rows.extend(table.rows);
    }

    write_table(final_path, &merged)?;
    let sha256 = sha256_file(final_path)?;

    info!(
        path = %final_path.display(),
        batch_files = batches.len(),
        rows = merged.rows.len(),
        sha256 = %sha256,
        "merged batches into final dataset"
    );

    Ok(Some(MergeSummary {
        batch_files: batches.len(),
        rows: merged.rows.len(),
        sha256,
    }))
}
