use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tracing::info;

use crate::error::{CheckpointError, WriteError};
use crate::store::replace_file;

/// Number of rows already handled (processed, skipped or failed) from the
/// start of a dataset. Only ever moves forward.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord)]
pub struct ProgressCursor(usize);

impl ProgressCursor {
    pub const START: ProgressCursor = ProgressCursor(0);

    pub fn new(rows: usize) -> Self {
        ProgressCursor(rows)
    }

    pub fn get(self) -> usize {
        self.0
    }

    pub fn advance(self, rows: usize) -> Self {
        ProgressCursor(self.0.saturating_add(rows))
    }
}

impl fmt::Display for ProgressCursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Single-integer checkpoint file. Absent means nothing has been done yet.
#[derive(Debug, Clone)]
pub struct ProgressTracker {
    path: PathBuf,
}

impl ProgressTracker {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        ProgressTracker { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn load(&self) -> Result<ProgressCursor, CheckpointError> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(ProgressCursor::START),
            Err(e) if e.kind() == io::ErrorKind::InvalidData => {
                return Err(CheckpointError::Corrupt {
                    path: self.path.clone(),
                    content: String::from("<not UTF-8>"),
                })
            }
            Err(source) => {
                return Err(CheckpointError::Io {
                    path: self.path.clone(),
                    source,
                })
            }
        };

        let trimmed = content.trim();
        // `usize::from_str` would also take a leading '+'.
        if trimmed.is_empty() || !trimmed.bytes().all(|b| b.is_ascii_digit()) {
            return Err(self.corrupt(trimmed));
        }
        let rows = trimmed.parse::<usize>().map_err(|_| self.corrupt(trimmed))?;
        Ok(ProgressCursor::new(rows))
    }

    pub fn save(&self, cursor: ProgressCursor) -> Result<(), WriteError> {
        replace_file(&self.path, format!("{}\n", cursor).as_bytes()).map_err(|source| {
            WriteError::Io {
                path: self.path.clone(),
                source,
            }
        })?;
        info!("Progress saved at row {}", cursor);
        Ok(())
    }

    /// Forget all progress. Returns whether a checkpoint existed.
    pub fn clear(&self) -> Result<bool, WriteError> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(source) => Err(WriteError::Io {
                path: self.path.clone(),
                source,
            }),
        }
    }

    fn corrupt(&self, content: &str) -> CheckpointError {
        CheckpointError::Corrupt {
            path: self.path.clone(),
            content: content.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tracker() -> (tempfile::TempDir, ProgressTracker) {
        let dir = tempfile::tempdir().unwrap();
        let tracker = ProgressTracker::new(dir.path().join("progress.txt"));
        (dir, tracker)
    }

    #[test]
    fn absent_checkpoint_is_start() {
        let (_dir, tracker) = tracker();
        assert_eq!(tracker.load().unwrap(), ProgressCursor::START);
    }

    #[test]
    fn round_trip() {
        let (_dir, tracker) = tracker();
        for n in [0, 1, 20, 45, 1_000_000] {
            tracker.save(ProgressCursor::new(n)).unwrap();
            assert_eq!(tracker.load().unwrap().get(), n);
        }
    }

    #[test]
    fn file_is_one_decimal_line() {
        let (_dir, tracker) = tracker();
        tracker.save(ProgressCursor::new(40)).unwrap();
        assert_eq!(fs::read_to_string(tracker.path()).unwrap(), "40\n");
    }

    #[test]
    fn accepts_hand_written_checkpoint() {
        let (_dir, tracker) = tracker();
        fs::write(tracker.path(), "  60").unwrap();
        assert_eq!(tracker.load().unwrap().get(), 60);
    }

    #[test]
    fn corrupt_checkpoint() {
        let (_dir, tracker) = tracker();
        for bad in ["", "abc", "-3", "+3", "12 13", "4.5"] {
            fs::write(tracker.path(), bad).unwrap();
            assert!(
                matches!(tracker.load(), Err(CheckpointError::Corrupt { .. })),
                "{:?} should be rejected",
                bad
            );
        }
    }

    #[test]
    fn clear_removes_checkpoint() {
        let (_dir, tracker) = tracker();
        assert!(!tracker.clear().unwrap());
        tracker.save(ProgressCursor::new(5)).unwrap();
        assert!(tracker.clear().unwrap());
        assert_eq!(tracker.load().unwrap(), ProgressCursor::START);
    }

    #[test]
    fn advance_never_goes_back() {
        let c = ProgressCursor::new(20).advance(0).advance(5);
        assert_eq!(c.get(), 25);
        assert!(c >= ProgressCursor::new(20));
    }
}
