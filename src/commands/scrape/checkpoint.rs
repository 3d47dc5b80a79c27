use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use anyhow::Result;
use tracing::warn;

use crate::util::write_atomic;

/// Single-integer resume cursor. The file holds the index of the last work
/// item attempted; the next run starts one past it.
#[derive(Debug, Clone)]
pub struct CheckpointStore {
    path: PathBuf,
}

impl CheckpointStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Index of the last attempted item, or `None` when there is no usable
    /// checkpoint. A corrupt file is reported and treated as absent.
    pub fn last_attempted(&self) -> Option<usize> {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == ErrorKind::NotFound => return None,
            Err(err) => {
                warn!(path = %self.path.display(), error = %err, "checkpoint unreadable; starting from the beginning");
                return None;
            }
        };

        match raw.trim().parse::<usize>() {
            Ok(index) => Some(index),
            Err(err) => {
                warn!(
                    path = %self.path.display(),
                    contents = %raw.trim(),
                    error = %err,
                    "checkpoint corrupt; starting from the beginning"
                );
                None
            }
        }
    }

    /// Index of the next item to process.
    pub fn load(&self) -> usize {
        let Some(index) = self.last_attempted() else {
            return 0;
        };
        index.checked_add(1).unwrap_or_else(|| {
            warn!(path = %self.path.display(), index, "checkpoint out of range; starting from the beginning");
            0
        })
    }

    pub fn save(&self, index: usize) -> Result<()> {
        write_atomic(&self.path, format!("{index}\n").as_bytes())
    }
}
