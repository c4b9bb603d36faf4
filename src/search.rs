use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{Error, Result};

/// One podcast as returned by `/api/search_podcasts`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SearchResult {
    pub title: Option<String>,
    pub author: Option<String>,
    pub cover: Option<String>,
    pub rss: Option<String>,
}

#[derive(Debug, Deserialize)]
struct DirectoryResponse {
    #[serde(default)]
    results: Vec<DirectoryEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DirectoryEntry {
    collection_name: Option<String>,
    artist_name: Option<String>,
    artwork_url100: Option<String>,
    feed_url: Option<String>,
}

impl From<DirectoryEntry> for SearchResult {
    fn from(entry: DirectoryEntry) -> Self {
        Self {
            title: entry.collection_name,
            author: entry.artist_name,
            cover: entry.artwork_url100,
            rss: entry.feed_url,
        }
    }
}

/// Proxy for an iTunes-compatible podcast directory.
pub struct SearchClient {
    client: Client,
    search_url: String,
}

impl SearchClient {
    pub fn new(client: Client, search_url: impl Into<String>) -> Self {
        Self {
            client,
            search_url: search_url.into(),
        }
    }

    pub async fn search(&self, query: &str) -> Result<Vec<SearchResult>> {
        let query = query.trim();
        if query.is_empty() {
            return Ok(Vec::new());
        }

        info!("Searching podcast directory for '{}'", query);

        let response = self
            .client
            .get(&self.search_url)
            .query(&[("term", query), ("media", "podcast")])
            .send()
            .await
            .map_err(|e| Error::Upstream(format!("Search request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::Upstream(format!(
                "Search backend returned HTTP {}",
                status.as_u16()
            )));
        }

        let body: DirectoryResponse = response
            .json()
            .await
            .map_err(|e| Error::Upstream(format!("Invalid search response: {}", e)))?;

        Ok(body.results.into_iter().map(SearchResult::from).collect())
    }
}
