use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Deserializer};

use crate::cleaner::DEFAULT_EXCLUSIONS;

/// Settings file. Every field has a default, so an empty `{}` is valid.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub host: String,
    pub user_agent: String,
    pub timeout_secs: u64,
    #[serde(deserialize_with = "open_flow")]
    pub open: FlowConfig,
    #[serde(deserialize_with = "scrape_flow")]
    pub scrape: FlowConfig,
    pub columns: Columns,
    pub exclusions: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct FlowConfig {
    pub batch_size: usize,
    /// Pause between two page loads.
    pub pause_ms: u64,
    pub checkpoint: PathBuf,
}

/// A flow section as written in the file; absent fields keep the flow's default.
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct FlowOverrides {
    batch_size: Option<usize>,
    pause_ms: Option<u64>,
    checkpoint: Option<PathBuf>,
}

impl FlowOverrides {
    fn apply(self, base: FlowConfig) -> FlowConfig {
        FlowConfig {
            batch_size: self.batch_size.unwrap_or(base.batch_size),
            pause_ms: self.pause_ms.unwrap_or(base.pause_ms),
            checkpoint: self.checkpoint.unwrap_or(base.checkpoint),
        }
    }
}

fn open_flow<'de, D: Deserializer<'de>>(deserializer: D) -> Result<FlowConfig, D::Error> {
    Ok(FlowOverrides::deserialize(deserializer)?.apply(FlowConfig::open()))
}

fn scrape_flow<'de, D: Deserializer<'de>>(deserializer: D) -> Result<FlowConfig, D::Error> {
    Ok(FlowOverrides::deserialize(deserializer)?.apply(FlowConfig::scrape()))
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Columns {
    pub artist: String,
    pub track: String,
    pub url: String,
    /// Filled by `scrape`.
    pub tags: String,
    /// Filtered by `clean`.
    pub cleaned: String,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            host: "www.last.fm".into(),
            user_agent: concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")).into(),
            timeout_secs: 30,
            open: FlowConfig::open(),
            scrape: FlowConfig::scrape(),
            columns: Columns::default(),
            exclusions: DEFAULT_EXCLUSIONS.iter().map(|s| s.to_string()).collect(),
        }
    }
}

impl Default for Columns {
    fn default() -> Self {
        Columns {
            artist: "Artist".into(),
            track: "Track".into(),
            url: "LastFM URL".into(),
            tags: "Tags".into(),
            cleaned: "LastFM Tags".into(),
        }
    }
}

impl FlowConfig {
    fn open() -> Self {
        FlowConfig {
            batch_size: 20,
            pause_ms: 1000,
            checkpoint: "progress.txt".into(),
        }
    }

    fn scrape() -> Self {
        FlowConfig {
            batch_size: 50,
            pause_ms: 3000,
            checkpoint: "scrape_progress.txt".into(),
        }
    }

    pub fn pause(&self) -> Duration {
        Duration::from_millis(self.pause_ms)
    }
}

impl Config {
    /// Defaults when `path` is `None`, otherwise the JSON file at `path`.
    pub fn load(path: Option<&Path>) -> Result<Config> {
        let config = match path {
            None => Config::default(),
            Some(path) => {
                let text = fs::read_to_string(path)
                    .with_context(|| format!("Failed to read config {:?}", path))?;
                serde_json::from_str(&text)
                    .with_context(|| format!("Failed to parse config {:?}", path))?
            }
        };
        config.validate()?;
        Ok(config)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn validate(&self) -> Result<()> {
        if self.host.trim().is_empty() {
            bail!("host must not be empty");
        }
        for (name, flow) in [("open", &self.open), ("scrape", &self.scrape)] {
            if flow.batch_size == 0 {
                bail!("{}.batch_size must be at least 1", name);
            }
        }
        Ok(())
    }
}
