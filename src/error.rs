use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Input file could not be turned into a dataset. Fatal before any row runs.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("input file {0:?} was not found")]
    NotFound(PathBuf),
    #[error("failed to read {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("{path:?} is not well-formed delimited text: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },
    #[error("{path:?} line {line}: {found} fields, but the header has {expected}")]
    TooManyFields {
        path: PathBuf,
        line: u64,
        found: usize,
        expected: usize,
    },
    #[error("{path:?} has no {column:?} column")]
    MissingColumn { path: PathBuf, column: String },
}

#[derive(Debug, Error)]
pub enum CheckpointError {
    #[error("checkpoint {path:?} is corrupt (content {content:?}); fix or delete it with `reset`")]
    Corrupt { path: PathBuf, content: String },
    #[error("failed to read checkpoint {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Per-row failure. Recovered by the batch loop, never fatal.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request to {url} failed: {source}")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("{url} answered with status {status}")]
    Status {
        url: String,
        status: reqwest::StatusCode,
    },
    #[error("could not hand {url} to the system browser: {source}")]
    Browser {
        url: String,
        #[source]
        source: io::Error,
    },
}

/// Output or checkpoint file could not be replaced. The previous file is left as it was.
#[derive(Debug, Error)]
pub enum WriteError {
    #[error("failed to write {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to encode rows for {path:?}: {source}")]
    Encode {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },
}
