//! Subscription management and the sync-on-read episode cache.
//!
//! Episode listings are served from the cache once a feed has been
//! populated. The first read of a feed fetches the whole document, stores
//! every playable episode and answers from the in-memory result.

use std::collections::HashMap;
use std::sync::{Arc, Mutex as SyncMutex};

use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::db::{CachedPage, Database, Episode, Feed};
use crate::error::{Error, Result};
use crate::fetcher::Fetcher;
use crate::normalize::normalize_feed;
use crate::opml::parse_opml;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImportSummary {
    pub imported: usize,
    pub total: usize,
}

pub struct Library {
    db: Arc<Database>,
    fetcher: Arc<Fetcher>,
    populating: SyncMutex<PopulationLocks>,
}

type PopulationLocks = HashMap<String, Arc<Mutex<()>>>;

/// A handle on one feed's population lock. Dropping it releases the map
/// entry once no other request holds the same lock, including when the
/// request is cancelled mid-fetch.
struct PopulationEntry<'a> {
    locks: &'a SyncMutex<PopulationLocks>,
    feed_id: &'a str,
    lock: Arc<Mutex<()>>,
}

impl Drop for PopulationEntry<'_> {
    fn drop(&mut self) {
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        let ours = locks
            .get(self.feed_id)
            .is_some_and(|lock| Arc::ptr_eq(lock, &self.lock));
        // The map and this handle; anything more is a waiter
        if ours && Arc::strong_count(&self.lock) == 2 {
            locks.remove(self.feed_id);
        }
    }
}

impl Library {
    pub fn new(db: Arc<Database>, fetcher: Arc<Fetcher>) -> Self {
        Self {
            db,
            fetcher,
            populating: SyncMutex::new(HashMap::new()),
        }
    }

    /// Registers a feed after checking that it parses into at least one entry.
    /// Subscribing to an already registered URL is a no-op.
    ///
    /// The URL is stored exactly as given and is the feed's identity.
    pub async fn subscribe(&self, rss_url: &str) -> Result<Feed> {
        if rss_url.trim().is_empty() {
            return Err(Error::MissingInput("rss_url"));
        }

        let parsed = self
            .fetcher
            .fetch(rss_url)
            .await
            .map_err(|e| Error::InvalidFeed(e.to_string()))?;
        if parsed.entries.is_empty() {
            return Err(Error::InvalidFeed("feed has no entries".to_string()));
        }

        if self.db.upsert_feed(&parsed.to_new_feed(rss_url)).await? {
            info!("Subscribed to '{}' ({})", parsed.title, rss_url);
        }

        self.db
            .get_feed(rss_url)
            .await?
            .ok_or(Error::NotFound)
    }

    pub async fn feeds(&self) -> Result<Vec<Feed>> {
        Ok(self.db.list_feeds().await?)
    }

    pub async fn unsubscribe(&self, feed_id: &str) -> Result<()> {
        if !self.db.delete_feed(feed_id).await? {
            return Err(Error::NotFound);
        }
        info!("Deleted podcast {}", feed_id);
        Ok(())
    }

    /// One page of a feed's episodes, newest first.
    pub async fn episodes(&self, feed_id: &str, offset: i64, limit: i64) -> Result<Vec<Episode>> {
        let offset = offset.max(0);

        if let CachedPage::Hit(episodes) = self.db.list_episodes(feed_id, offset, limit).await? {
            return Ok(episodes);
        }

        let feed = self.db.get_feed(feed_id).await?.ok_or(Error::NotFound)?;

        let entry = self.population_entry(feed_id);
        let _guard = entry.lock.lock().await;
        self.populate(&feed, offset, limit).await
    }

    /// Subscribes to every feed listed in an OPML document. Individual
    /// failures are logged and skipped.
    pub async fn import_opml(&self, document: &str) -> Result<ImportSummary> {
        let urls = parse_opml(document).map_err(|e| Error::Upstream(e.to_string()))?;

        let mut imported = 0;
        for url in &urls {
            match self.subscribe(url).await {
                Ok(_) => imported += 1,
                Err(e) => warn!("Skipping OPML feed {}: {}", url, e),
            }
        }

        info!("Imported {} of {} podcasts from OPML", imported, urls.len());
        Ok(ImportSummary {
            imported,
            total: urls.len(),
        })
    }

    fn population_entry<'a>(&'a self, feed_id: &'a str) -> PopulationEntry<'a> {
        let mut locks = self.populating.lock().unwrap_or_else(|e| e.into_inner());
        let lock = locks
            .entry(feed_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        PopulationEntry {
            locks: &self.populating,
            feed_id,
            lock,
        }
    }

    #[cfg(test)]
    fn pending_populations(&self) -> usize {
        self.populating.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    async fn populate(&self, feed: &Feed, offset: i64, limit: i64) -> Result<Vec<Episode>> {
        // Someone else may have populated the cache while we waited
        if let CachedPage::Hit(episodes) = self.db.list_episodes(&feed.id, offset, limit).await? {
            return Ok(episodes);
        }

        let parsed = self
            .fetcher
            .fetch(&feed.rss_url)
            .await
            .map_err(|e| Error::FeedUnavailable(e.to_string()))?;

        let episodes = normalize_feed(&parsed.entries);
        let inserted = self.db.populate_episodes(&feed.id, &episodes).await?;
        info!(
            "Cached {} episodes for '{}' ({} entries in feed)",
            inserted,
            feed.title,
            parsed.entries.len()
        );

        let page = episodes
            .into_iter()
            .skip(offset as usize)
            .take(limit.max(0) as usize)
            .map(|e| e.into_episode(&feed.id, &feed.cover_url))
            .collect();
        Ok(page)
    }
}
