use std::time::Duration;

use feed_rs::model::Entry;
use feed_rs::parser::{self, Parser};
use reqwest::Client;
use thiserror::Error;
use tracing::{debug, info};

use crate::config::Config;
use crate::db::NewFeed;

#[derive(Debug, Error)]
pub enum FetchError {
    /// Connection, TLS or timeout failure
    #[error("request failed: {0}")]
    Network(#[from] reqwest::Error),
    #[error("HTTP status {0}")]
    HttpStatus(u16),
    /// The body was not an RSS or Atom document
    #[error("parse error: {0}")]
    Parse(String),
}

/// A fetched feed, ready for subscription or normalization.
#[derive(Debug)]
pub struct ParsedFeed {
    pub title: String,
    pub author: String,
    pub cover_url: String,
    pub entries: Vec<Entry>,
}

impl ParsedFeed {
    pub fn to_new_feed(&self, rss_url: &str) -> NewFeed {
        NewFeed {
            rss_url: rss_url.to_string(),
            title: self.title.clone(),
            author: self.author.clone(),
            cover_url: self.cover_url.clone(),
        }
    }
}

/// Builds the HTTP client shared by the feed fetcher and the search proxy.
pub fn http_client(config: &Config) -> anyhow::Result<Client> {
    let client = Client::builder()
        .timeout(Duration::from_secs(config.fetch_timeout))
        .user_agent(config.user_agent.clone())
        .build()?;
    Ok(client)
}

/// Entries without a guid or Atom id keep an empty id instead of a
/// generated one, so episode identity can fall back to link and title.
fn feed_parser() -> Parser {
    parser::Builder::new()
        .id_generator(|_, _, _| String::new())
        .build()
}

pub struct Fetcher {
    client: Client,
}

impl Fetcher {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    pub async fn fetch(&self, url: &str) -> Result<ParsedFeed, FetchError> {
        info!("Fetching feed: {}", url);

        let response = self.client.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::HttpStatus(status.as_u16()));
        }
        let bytes = response.bytes().await?;

        let parsed = Self::parse(&bytes)?;
        debug!("Parsed {} entries from {}", parsed.entries.len(), url);
        Ok(parsed)
    }

    pub fn parse(bytes: &[u8]) -> Result<ParsedFeed, FetchError> {
        let feed = feed_parser()
            .parse(bytes)
            .map_err(|e| FetchError::Parse(e.to_string()))?;

        let title = feed
            .title
            .map(|t| t.content)
            .filter(|t| !t.is_empty())
            .unwrap_or_else(|| "Untitled".to_string());

        let author = feed
            .authors
            .into_iter()
            .map(|p| p.name)
            .find(|name| !name.is_empty())
            .unwrap_or_else(|| "Unknown".to_string());

        let cover_url = feed
            .logo
            .or(feed.icon)
            .map(|image| image.uri)
            .unwrap_or_default();

        Ok(ParsedFeed {
            title,
            author,
            cover_url,
            entries: feed.entries,
        })
    }
}
