// =============================================================================
// Leaderboard Client — read-only HTTP query
// =============================================================================
//
// Fetched once per game over. A failed fetch is logged and treated as "no
// data"; it never takes the screen down.
// =============================================================================

use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{debug, instrument, warn};

use crate::types::LeaderboardEntry;

#[derive(Clone)]
pub struct LeaderboardClient {
    url: String,
    client: reqwest::Client,
}

impl LeaderboardClient {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build leaderboard HTTP client")?;
        Ok(Self {
            url: url.into(),
            client,
        })
    }

    /// GET the leaderboard, best score first as the server orders it.
    #[instrument(skip(self), name = "leaderboard::fetch")]
    pub async fn fetch(&self) -> Result<Vec<LeaderboardEntry>> {
        let resp = self
            .client
            .get(&self.url)
            .send()
            .await
            .with_context(|| format!("GET {} failed", self.url))?;

        let status = resp.status();
        if !status.is_success() {
            anyhow::bail!("leaderboard returned HTTP {status}");
        }

        let entries: Vec<LeaderboardEntry> = resp
            .json()
            .await
            .context("failed to decode leaderboard JSON")?;

        debug!(count = entries.len(), "leaderboard fetched");
        Ok(entries)
    }

    /// Like [`fetch`](Self::fetch) but failures become an empty list.
    pub async fn fetch_or_empty(&self) -> Vec<LeaderboardEntry> {
        match self.fetch().await {
            Ok(entries) => entries,
            Err(e) => {
                warn!(error = %e, "leaderboard unavailable — showing no data");
                Vec::new()
            }
        }
    }
}
