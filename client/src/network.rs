//! HTTP client for a Memory Scramble server.

use log::debug;
use reqwest::Url;
use shared::{BoardView, ViewError};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("server refused request ({status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("unreadable board view: {0}")]
    View(#[from] ViewError),

    #[error("bad server address: {0}")]
    BadAddress(String),
}

impl ClientError {
    /// True when the server refused because of board state rather than a
    /// malformed request, so trying again later may succeed.
    pub fn is_conflict(&self) -> bool {
        matches!(self, ClientError::Rejected { status: 409, .. })
    }
}

/// Handle on one server. Cheap to clone; clones share a connection pool.
#[derive(Debug, Clone)]
pub struct Client {
    http: reqwest::Client,
    base: String,
}

impl Client {
    /// `server` is `host:port`, optionally prefixed with `http://`.
    pub fn new(server: &str) -> Self {
        let base = if server.starts_with("http://") || server.starts_with("https://") {
            server.trim_end_matches('/').to_string()
        } else {
            format!("http://{}", server.trim_end_matches('/'))
        };

        Self {
            http: reqwest::Client::new(),
            base,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base
    }

    /// The base URL with `segments` appended, each one percent-encoded.
    fn url(&self, segments: &[&str]) -> Result<Url, ClientError> {
        let mut url = Url::parse(&self.base)
            .map_err(|e| ClientError::BadAddress(format!("{}: {}", self.base, e)))?;
        url.path_segments_mut()
            .map_err(|_| ClientError::BadAddress(self.base.clone()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    pub async fn look(&self, player: &str) -> Result<BoardView, ClientError> {
        self.get(self.url(&["look", player])?).await
    }

    pub async fn flip(&self, player: &str, row: usize, col: usize) -> Result<BoardView, ClientError> {
        let pos = format!("{},{}", row, col);
        self.get(self.url(&["flip", player, &pos])?).await
    }

    pub async fn replace(&self, player: &str, from: &str, to: &str) -> Result<BoardView, ClientError> {
        self.get(self.url(&["replace", player, from, to])?).await
    }

    /// Waits for the next change, or for `timeout` (the server default when
    /// `None`), then returns the view at that point.
    pub async fn watch(
        &self,
        player: &str,
        timeout: Option<Duration>,
    ) -> Result<BoardView, ClientError> {
        let mut url = self.url(&["watch", player])?;
        if let Some(timeout) = timeout {
            url.query_pairs_mut()
                .append_pair("timeout_ms", &timeout.as_millis().to_string());
        }
        self.get(url).await
    }

    async fn get(&self, url: Url) -> Result<BoardView, ClientError> {
        debug!("GET {}", url);

        let response = self.http.get(url).send().await?;
        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            return Err(ClientError::Rejected {
                status: status.as_u16(),
                message: body.trim_end().to_string(),
            });
        }
        Ok(body.parse()?)
    }
}
