use std::time::Duration;

use indicatif::{ProgressBar, ProgressStyle};
use tracing::{error, info};

use crate::actions::RowAction;
use crate::error::FetchError;
use crate::fetcher::PageFetcher;
use crate::progress::ProgressCursor;
use crate::store::Dataset;

/// What happened to a single row.
#[derive(Debug)]
pub enum RowOutcome {
    Processed,
    /// A required column was missing or blank; the row was not touched.
    Skipped,
    /// The fetch failed; the output cell was emptied.
    Failed(FetchError),
}

/// Result of one `BatchProcessor::run`. Persisting it is up to the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchOutcome {
    pub start: ProgressCursor,
    pub cursor: ProgressCursor,
    pub processed: usize,
    pub skipped: usize,
    pub failed: usize,
}

impl BatchOutcome {
    fn empty(start: ProgressCursor) -> Self {
        BatchOutcome {
            start,
            cursor: start,
            processed: 0,
            skipped: 0,
            failed: 0,
        }
    }

    /// Rows the cursor moved past, whatever their outcome.
    pub fn counted(&self) -> usize {
        self.cursor.get() - self.start.get()
    }
}

pub struct BatchProcessor {
    batch_size: usize,
    pause: Duration,
}

impl BatchProcessor {
    /// `pause` is slept between consecutive fetches to go easy on the site.
    pub fn new(batch_size: usize, pause: Duration) -> Self {
        BatchProcessor {
            batch_size: batch_size.max(1),
            pause,
        }
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Handle up to `batch_size` rows from `start`, then stop.
    ///
    /// Every row counts toward the batch whether it was processed, skipped or
    /// failed. When `start` is already at or past the end nothing is counted
    /// and the dataset is left alone.
    pub async fn run<A, F>(
        &self,
        dataset: &mut Dataset,
        start: ProgressCursor,
        action: &A,
        fetcher: &mut F,
    ) -> BatchOutcome
    where
        A: RowAction,
        F: PageFetcher,
    {
        let mut outcome = BatchOutcome::empty(start);
        if start.get() >= dataset.len() {
            info!("All {} rows already handled", dataset.len());
            return outcome;
        }

        let end = start.get().saturating_add(self.batch_size).min(dataset.len());
        let output = dataset.ensure_column(action.output_column());
        info!("Processing rows {} to {} ({})", start, end - 1, action.label());

        let pb = ProgressBar::new((end - start.get()) as u64);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("[{elapsed_precise}] {bar:40} {pos}/{len} ({per_sec}, eta {eta})")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("=> "),
        );

        let mut fetched = 0usize;
        for index in start.get()..end {
            match self.process_row(dataset, index, output, action, fetcher, &mut fetched).await {
                RowOutcome::Processed => outcome.processed += 1,
                RowOutcome::Skipped => outcome.skipped += 1,
                RowOutcome::Failed(e) => {
                    error!("Row {}: {}; {:?} left empty", index, e, action.output_column());
                    outcome.failed += 1;
                }
            }
            outcome.cursor = outcome.cursor.advance(1);
            pb.inc(1);
        }
        pb.finish_and_clear();

        info!(
            "Batch {}..{} done: {} processed, {} skipped, {} failed",
            outcome.start, outcome.cursor, outcome.processed, outcome.skipped, outcome.failed
        );
        outcome
    }

    async fn process_row<A, F>(
        &self,
        dataset: &mut Dataset,
        index: usize,
        output: usize,
        action: &A,
        fetcher: &mut F,
        fetched: &mut usize,
    ) -> RowOutcome
    where
        A: RowAction,
        F: PageFetcher,
    {
        let Some(row) = dataset.row(index) else {
            return RowOutcome::Skipped;
        };
        if let Some(column) = action.required_columns().into_iter().find(|c| row.is_blank(c)) {
            info!("Row {}: empty {:?}, skipping", index, column);
            return RowOutcome::Skipped;
        }
        let url = action.target_url(&row);

        if *fetched > 0 && !self.pause.is_zero() {
            tokio::time::sleep(self.pause).await;
        }
        *fetched += 1;

        info!("Row {}: {}", index, url);
        match fetcher.fetch(&url).await {
            Ok(page) => {
                let value = action.interpret(&url, &page);
                dataset.set(index, output, value);
                RowOutcome::Processed
            }
            Err(e) => {
                dataset.set(index, output, None);
                RowOutcome::Failed(e)
            }
        }
    }
}
