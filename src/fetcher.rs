use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{debug, info};

use crate::error::FetchError;

/// A page session: load a URL, hand back its text.
///
/// One session is opened per process and passed by `&mut` to whatever
/// drives the rows, then closed once at the end.
pub trait PageFetcher {
    async fn fetch(&mut self, url: &str) -> Result<String, FetchError>;

    fn close(self)
    where
        Self: Sized,
    {
    }
}

/// Plain HTTP session backed by one pooled `reqwest::Client`.
pub struct HttpFetcher {
    client: reqwest::Client,
    fetched: usize,
}

impl HttpFetcher {
    pub fn open(user_agent: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(user_agent)
            .timeout(timeout)
            .build()
            .context("Failed to build HTTP client")?;
        info!("HTTP session opened");
        Ok(HttpFetcher { client, fetched: 0 })
    }
}

impl PageFetcher for HttpFetcher {
    async fn fetch(&mut self, url: &str) -> Result<String, FetchError> {
        let request_err = |source| FetchError::Request {
            url: url.to_string(),
            source,
        };

        let response = self.client.get(url).send().await.map_err(request_err)?;
        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                url: url.to_string(),
                status,
            });
        }
        let body = response.text().await.map_err(request_err)?;
        self.fetched += 1;
        debug!("Fetched {} ({} bytes)", url, body.len());
        Ok(body)
    }

    fn close(self) {
        info!("HTTP session closed after {} pages", self.fetched);
    }
}

/// Queues each URL as a tab in the system browser for manual review.
/// There is no page text to read back, so `fetch` yields an empty string.
#[derive(Default)]
pub struct BrowserFetcher {
    opened: usize,
}

impl PageFetcher for BrowserFetcher {
    async fn fetch(&mut self, url: &str) -> Result<String, FetchError> {
        open::that(url).map_err(|source| FetchError::Browser {
            url: url.to_string(),
            source,
        })?;
        self.opened += 1;
        debug!("Opened {} in browser", url);
        Ok(String::new())
    }

    fn close(self) {
        info!("{} pages left open in the browser for manual review", self.opened);
    }
}

#[cfg(test)]
pub mod fake {
    use std::collections::{HashMap, HashSet};

    use super::*;

    /// Serves canned pages, fails on request, remembers every URL asked for.
    #[derive(Default)]
    pub struct FakeFetcher {
        pub pages: HashMap<String, String>,
        pub failing: HashSet<String>,
        pub requested: Vec<String>,
    }

    impl FakeFetcher {
        pub fn failing(urls: &[&str]) -> Self {
            FakeFetcher {
                failing: urls.iter().map(|u| u.to_string()).collect(),
                ..Default::default()
            }
        }
    }

    impl PageFetcher for FakeFetcher {
        async fn fetch(&mut self, url: &str) -> Result<String, FetchError> {
            self.requested.push(url.to_string());
            if self.failing.contains(url) {
                return Err(FetchError::Status {
                    url: url.to_string(),
                    status: reqwest::StatusCode::NOT_FOUND,
                });
            }
            Ok(self.pages.get(url).cloned().unwrap_or_default())
        }
    }
}
