use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::info;

use crate::actions::RowAction;
use crate::batch::{BatchOutcome, BatchProcessor};
use crate::fetcher::PageFetcher;
use crate::progress::{ProgressCursor, ProgressTracker};
use crate::store::Dataset;

pub struct RunOptions {
    pub input: PathBuf,
    pub output: PathBuf,
    /// `None` keeps going until every row is handled.
    pub max_batches: Option<usize>,
    /// Slept between two batches of the same invocation.
    pub batch_pause: Duration,
}

#[derive(Debug, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub batches: usize,
    pub cursor: ProgressCursor,
    pub total_rows: usize,
    pub processed: usize,
    pub skipped: usize,
    pub failed: usize,
}

impl RunSummary {
    pub fn is_complete(&self) -> bool {
        self.cursor.get() >= self.total_rows
    }

    fn absorb(&mut self, outcome: &BatchOutcome) {
        self.batches += 1;
        self.cursor = outcome.cursor;
        self.processed += outcome.processed;
        self.skipped += outcome.skipped;
        self.failed += outcome.failed;
    }
}

/// Resume a flow from its checkpoint and run batches until done or until
/// `max_batches` have been committed.
///
/// At each boundary the dataset is written first and the cursor second, so a
/// crash in between only makes the next run redo that batch.
pub async fn run_flow<A, F>(
    opts: &RunOptions,
    tracker: &ProgressTracker,
    processor: &BatchProcessor,
    action: &A,
    fetcher: &mut F,
) -> Result<RunSummary>
where
    A: RowAction,
    F: PageFetcher,
{
    let mut cursor = tracker.load()?;
    let source = resume_source(opts, cursor);
    let mut dataset = Dataset::load(source)?;
    dataset.require_columns(source, &action.required_columns())?;

    let mut summary = RunSummary {
        cursor,
        total_rows: dataset.len(),
        ..Default::default()
    };
    if cursor.get() > 0 {
        info!("Resuming at row {} of {} from {:?}", cursor, dataset.len(), source);
    }

    loop {
        let outcome = processor.run(&mut dataset, cursor, action, fetcher).await;
        if outcome.counted() == 0 {
            break;
        }

        commit(&dataset, &opts.output, tracker, outcome.cursor)?;
        cursor = outcome.cursor;
        summary.absorb(&outcome);

        if summary.is_complete() {
            info!("All {} rows processed", summary.total_rows);
            break;
        }
        if opts.max_batches.is_some_and(|max| summary.batches >= max) {
            info!("Batch of {} completed. Pausing; run again to continue", processor.batch_size());
            break;
        }
        if !opts.batch_pause.is_zero() {
            tokio::time::sleep(opts.batch_pause).await;
        }
    }

    Ok(summary)
}

/// Persist the dataset, then the cursor that describes it.
pub fn commit(
    dataset: &Dataset,
    output: &Path,
    tracker: &ProgressTracker,
    cursor: ProgressCursor,
) -> Result<()> {
    dataset
        .save(output)
        .with_context(|| format!("Batch ending at row {} was not saved", cursor))?;
    info!("Saved {} rows to {:?}", dataset.len(), output);
    tracker.save(cursor)?;
    Ok(())
}

/// Earlier batches only live in the output file, so a resumed run reads it
/// back instead of the pristine input.
fn resume_source(opts: &RunOptions, cursor: ProgressCursor) -> &Path {
    if cursor.get() > 0 && opts.output.exists() {
        &opts.output
    } else {
        &opts.input
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;
    use crate::actions::OpenTrackPage;
    use crate::error::{CheckpointError, LoadError};
    use crate::fetcher::fake::FakeFetcher;

    struct Fixture {
        _dir: tempfile::TempDir,
        opts: RunOptions,
        tracker: ProgressTracker,
    }

    fn fixture(rows: usize, max_batches: Option<usize>) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("tracks.csv");
        let mut csv = String::from("Artist,Track\n");
        for i in 0..rows {
            csv.push_str(&format!("Artist {i},Track {i}\n"));
        }
        fs::write(&input, csv).unwrap();

        Fixture {
            opts: RunOptions {
                input,
                output: dir.path().join("tracks_out.csv"),
                max_batches,
                batch_pause: Duration::ZERO,
            },
            tracker: ProgressTracker::new(dir.path().join("progress.txt")),
            _dir: dir,
        }
    }

    fn action() -> OpenTrackPage {
        OpenTrackPage {
            host: "www.last.fm".into(),
            artist_column: "Artist".into(),
            track_column: "Track".into(),
            url_column: "LastFM URL".into(),
        }
    }

    async fn run(fx: &Fixture, fetcher: &mut FakeFetcher) -> Result<RunSummary> {
        let processor = BatchProcessor::new(20, Duration::ZERO);
        run_flow(&fx.opts, &fx.tracker, &processor, &action(), fetcher).await
    }

    #[tokio::test]
    async fn one_batch_per_invocation() {
        let fx = fixture(45, Some(1));
        let mut fetcher = FakeFetcher::default();

        let mut checkpoints = Vec::new();
        for _ in 0..3 {
            let summary = run(&fx, &mut fetcher).await.unwrap();
            assert_eq!(summary.batches, 1);
            checkpoints.push(fx.tracker.load().unwrap().get());
        }
        assert_eq!(checkpoints, [20, 40, 45]);

        let last = run(&fx, &mut fetcher).await.unwrap();
        assert_eq!(last.batches, 0);
        assert!(last.is_complete());
        assert_eq!(fetcher.requested.len(), 45);

        let out = Dataset::load(&fx.opts.output).unwrap();
        assert_eq!(out.headers(), ["Artist", "Track", "LastFM URL"]);
        assert!((0..45).all(|i| out.get(i, "LastFM URL").is_some()));
    }

    #[tokio::test]
    async fn run_to_completion() {
        let fx = fixture(45, None);
        let mut fetcher = FakeFetcher::default();

        let summary = run(&fx, &mut fetcher).await.unwrap();
        assert_eq!(summary.batches, 3);
        assert_eq!(summary.processed, 45);
        assert_eq!(fx.tracker.load().unwrap().get(), 45);
    }

    #[tokio::test]
    async fn crash_between_dataset_and_checkpoint() {
        let fx = fixture(45, Some(1));
        let mut fetcher = FakeFetcher::default();
        run(&fx, &mut fetcher).await.unwrap();

        // Second batch reaches the output file but the process dies before
        // the checkpoint is written.
        let mut ds = Dataset::load(&fx.opts.output).unwrap();
        let outcome = BatchProcessor::new(20, Duration::ZERO)
            .run(&mut ds, ProgressCursor::new(20), &action(), &mut fetcher)
            .await;
        ds.save(&fx.opts.output).unwrap();
        assert_eq!(outcome.cursor.get(), 40);

        // Both files are whole, and the pair still resumes cleanly.
        assert_eq!(fx.tracker.load().unwrap().get(), 20);
        assert_eq!(Dataset::load(&fx.opts.output).unwrap().len(), 45);

        fetcher.requested.clear();
        run(&fx, &mut fetcher).await.unwrap();
        assert_eq!(fx.tracker.load().unwrap().get(), 40);
        assert_eq!(fetcher.requested.len(), 20);
        assert!(fetcher.requested[0].contains("Artist+20"));
    }

    #[tokio::test]
    async fn corrupt_checkpoint_stops_before_work() {
        let fx = fixture(5, Some(1));
        fs::write(fx.tracker.path(), "twenty").unwrap();
        let mut fetcher = FakeFetcher::default();

        let err = run(&fx, &mut fetcher).await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<CheckpointError>(),
            Some(CheckpointError::Corrupt { .. })
        ));
        assert!(fetcher.requested.is_empty());
        assert!(!fx.opts.output.exists());
    }

    #[tokio::test]
    async fn missing_required_column() {
        let fx = fixture(0, Some(1));
        fs::write(&fx.opts.input, "Artist,Title\nA,B\n").unwrap();
        let mut fetcher = FakeFetcher::default();

        let err = run(&fx, &mut fetcher).await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<LoadError>(),
            Some(LoadError::MissingColumn { column, .. }) if column == "Track"
        ));
    }
}
