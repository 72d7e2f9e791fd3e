mod actions;
mod batch;
mod cleaner;
mod config;
mod error;
mod fetcher;
mod pipeline;
mod progress;
mod store;

use std::fs::OpenOptions;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Instant;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};

use actions::{OpenTrackPage, RowAction, ScrapeTags};
use batch::BatchProcessor;
use cleaner::TagCleaner;
use config::{Config, FlowConfig};
use fetcher::{BrowserFetcher, HttpFetcher, PageFetcher};
use pipeline::{RunOptions, RunSummary};
use progress::ProgressTracker;
use store::Dataset;

#[derive(Parser)]
#[command(name = "tag_scraper", about = "Collect and clean Last.fm tags for a list of tracks")]
struct Cli {
    /// JSON settings file
    #[arg(long, global = true, env = "TAG_SCRAPER_CONFIG")]
    config: Option<PathBuf>,
    /// Append log lines to this file instead of stderr
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build each track's tag page URL, queue it and record it in the URL column
    Open {
        #[command(flatten)]
        run: RunArgs,
        /// Load pages over HTTP instead of opening browser tabs; unreachable
        /// pages leave the URL column empty
        #[arg(long)]
        verify: bool,
    },
    /// Read tags from each row's tag page into the tags column
    Scrape {
        #[command(flatten)]
        run: RunArgs,
    },
    /// Drop excluded and purely numeric tags from a tags column
    Clean {
        #[arg(short, long)]
        input: PathBuf,
        #[arg(short, long)]
        output: PathBuf,
        /// Column to clean (default from config: "LastFM Tags")
        #[arg(long)]
        column: Option<String>,
        /// Extra tag to drop, case-insensitive; repeatable
        #[arg(long)]
        exclude: Vec<String>,
    },
    /// Show how far a flow has got through a file
    Status {
        #[arg(short, long)]
        input: PathBuf,
        #[arg(long, value_enum, default_value_t = Flow::Open)]
        flow: Flow,
        #[arg(long)]
        checkpoint: Option<PathBuf>,
    },
    /// Delete a flow's checkpoint so the next run starts from the first row
    Reset {
        #[arg(long, value_enum, default_value_t = Flow::Open)]
        flow: Flow,
        #[arg(long)]
        checkpoint: Option<PathBuf>,
    },
}

#[derive(Args)]
struct RunArgs {
    #[arg(short, long)]
    input: PathBuf,
    /// Where to write results (default: update the input file in place)
    #[arg(short, long)]
    output: Option<PathBuf>,
    /// Progress file (default from config)
    #[arg(long)]
    checkpoint: Option<PathBuf>,
    /// Rows per batch, at least 1 (default from config)
    #[arg(short = 'b', long)]
    batch_size: Option<NonZeroUsize>,
    /// Batches to run before stopping
    #[arg(short = 'n', long, default_value = "1", conflicts_with = "all")]
    batches: usize,
    /// Keep going until every row is handled
    #[arg(long)]
    all: bool,
}

#[derive(Clone, Copy, ValueEnum)]
enum Flow {
    Open,
    Scrape,
}

impl Flow {
    fn config(self, config: &Config) -> &FlowConfig {
        match self {
            Flow::Open => &config.open,
            Flow::Scrape => &config.scrape,
        }
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_file.as_deref())?;
    let config = Config::load(cli.config.as_deref())?;

    let t0 = Instant::now();

    let result = match cli.command {
        Commands::Open { run, verify } => {
            let action = OpenTrackPage {
                host: config.host.clone(),
                artist_column: config.columns.artist.clone(),
                track_column: config.columns.track.clone(),
                url_column: config.columns.url.clone(),
            };
            if verify {
                let mut fetcher = HttpFetcher::open(&config.user_agent, config.timeout())?;
                let result = run_batches(&run, &config.open, &action, &mut fetcher).await;
                fetcher.close();
                result
            } else {
                let mut fetcher = BrowserFetcher::default();
                let result = run_batches(&run, &config.open, &action, &mut fetcher).await;
                fetcher.close();
                result
            }
        }
        Commands::Scrape { run } => {
            let action = ScrapeTags {
                url_column: config.columns.url.clone(),
                tags_column: config.columns.tags.clone(),
            };
            let mut fetcher = HttpFetcher::open(&config.user_agent, config.timeout())?;
            let result = run_batches(&run, &config.scrape, &action, &mut fetcher).await;
            fetcher.close();
            result
        }
        Commands::Clean { input, output, column, exclude } => {
            let column = column.unwrap_or_else(|| config.columns.cleaned.clone());
            let cleaner = TagCleaner::new(&config.exclusions).with_extra(&exclude);
            let dataset = Dataset::load(&input)?;
            let cleaned = cleaner.clean_dataset(&dataset, &column);
            cleaned.save(&output)?;
            println!("Cleaned {:?} in {} rows, saved to {:?}", column, cleaned.len(), output);
            Ok(())
        }
        Commands::Status { input, flow, checkpoint } => {
            let tracker = ProgressTracker::new(
                checkpoint.unwrap_or_else(|| flow.config(&config).checkpoint.clone()),
            );
            let cursor = tracker.load()?;
            let dataset = Dataset::load(&input)?;
            let total = dataset.len();
            let handled = cursor.get().min(total);
            let pct = if total == 0 { 100.0 } else { handled as f64 * 100.0 / total as f64 };
            println!("Checkpoint: {:?}", tracker.path());
            println!("Columns:    {}", dataset.headers().join(", "));
            println!("Total:      {}", total);
            println!("Handled:    {} ({:.1}%)", handled, pct);
            println!("Remaining:  {}", total - handled);
            Ok(())
        }
        Commands::Reset { flow, checkpoint } => {
            let tracker = ProgressTracker::new(
                checkpoint.unwrap_or_else(|| flow.config(&config).checkpoint.clone()),
            );
            if tracker.clear()? {
                println!("Removed {:?}; the next run starts at row 0.", tracker.path());
            } else {
                println!("No checkpoint at {:?}.", tracker.path());
            }
            Ok(())
        }
    };

    let elapsed = t0.elapsed();
    if elapsed.as_secs() >= 1 {
        println!("\nDone in {}", format_duration(elapsed));
    }

    result
}

async fn run_batches<A, F>(
    args: &RunArgs,
    flow: &FlowConfig,
    action: &A,
    fetcher: &mut F,
) -> Result<()>
where
    A: RowAction,
    F: PageFetcher,
{
    let tracker = ProgressTracker::new(args.checkpoint.clone().unwrap_or_else(|| flow.checkpoint.clone()));
    let processor = BatchProcessor::new(args.batch_size.map_or(flow.batch_size, NonZeroUsize::get), flow.pause());
    let opts = RunOptions {
        input: args.input.clone(),
        output: args.output.clone().unwrap_or_else(|| args.input.clone()),
        max_batches: (!args.all).then_some(args.batches.max(1)),
        batch_pause: flow.pause(),
    };

    let summary = pipeline::run_flow(&opts, &tracker, &processor, action, fetcher).await?;
    print_summary(&summary, &opts.output);
    Ok(())
}

fn print_summary(summary: &RunSummary, output: &Path) {
    if summary.batches == 0 {
        println!("Nothing to do: all {} rows already handled.", summary.total_rows);
        return;
    }
    println!(
        "Ran {} batch(es): {} processed, {} skipped, {} failed. Saved to {:?}.",
        summary.batches, summary.processed, summary.skipped, summary.failed, output
    );
    if summary.is_complete() {
        println!("All {} rows handled.", summary.total_rows);
    } else {
        println!(
            "Stopped at row {} of {}; run again to continue.",
            summary.cursor, summary.total_rows
        );
    }
}

fn init_tracing(log_file: Option<&Path>) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info".into());

    match log_file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open log file {:?}", path))?;
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_ansi(false)
                .with_writer(Mutex::new(file))
                .init();
        }
        None => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }
    Ok(())
}

fn format_duration(d: std::time::Duration) -> String {
    let secs = d.as_secs();
    if secs < 60 {
        format!("{:.1}s", d.as_secs_f64())
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m {}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn batch_size_must_be_positive() {
        assert!(Cli::try_parse_from(["tag_scraper", "open", "-i", "x.csv", "-b", "0"]).is_err());

        let cli = Cli::try_parse_from(["tag_scraper", "scrape", "-i", "x.csv", "--batch-size", "7"]).unwrap();
        match cli.command {
            Commands::Scrape { run } => assert_eq!(run.batch_size.map(NonZeroUsize::get), Some(7)),
            _ => panic!("expected scrape"),
        }
    }

    #[test]
    fn format_duration_units() {
        assert_eq!(format_duration(std::time::Duration::from_millis(1500)), "1.5s");
        assert_eq!(format_duration(std::time::Duration::from_secs(125)), "2m 5s");
        assert_eq!(format_duration(std::time::Duration::from_secs(3725)), "1h 2m 5s");
    }
}
