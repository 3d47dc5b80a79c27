mod batch;
mod checkpoint;
mod documents;
mod driver;
mod extract;
mod http;
mod merge;
mod run;
mod source;
#[cfg(test)]
mod tests;

pub use batch::{JOURNAL_FILE_NAME, list_batches};
pub use checkpoint::CheckpointStore;
pub use http::{build_client, fetch_html};
pub use merge::merge_batches;
pub use run::{FAILURE_LOG_FILE_NAME, run};
pub use source::{load_work_items, work_items_to_table};
