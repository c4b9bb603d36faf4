use chrono::Utc;
use serde::Serialize;
use sqlx::{sqlite::SqlitePoolOptions, FromRow, Sqlite, SqlitePool};

/// A subscribed podcast feed. The RSS URL is its identity.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Feed {
    #[serde(rename = "podcast_id")]
    pub id: String,
    pub title: String,
    pub author: String,
    pub cover_url: String,
    pub rss_url: String,
    pub subscribed_at: String,
    /// Set once the episode cache has been populated
    #[serde(skip)]
    pub synced_at: Option<String>,
}

/// Feed metadata as parsed from the remote document, before it is stored.
#[derive(Debug, Clone, PartialEq)]
pub struct NewFeed {
    pub rss_url: String,
    pub title: String,
    pub author: String,
    pub cover_url: String,
}

#[derive(Debug, Clone, FromRow, Serialize, PartialEq)]
pub struct Episode {
    #[serde(rename = "podcast_id")]
    pub feed_id: String,
    pub episode_id: String,
    pub title: String,
    pub description: String,
    pub audio_url: String,
    pub pub_date: String,
    pub pub_timestamp: i64,
    pub duration: i64,
    pub cover: String,
}

/// A normalized feed entry that has not been persisted yet.
#[derive(Debug, Clone, PartialEq)]
pub struct NewEpisode {
    pub episode_id: String,
    pub title: String,
    pub description: String,
    pub audio_url: String,
    /// RFC 2822 rendering of the parsed publish time, always in UTC
    /// (`+0000`). The feed's own offset is not kept.
    pub pub_date: String,
    pub pub_timestamp: i64,
    pub duration: i64,
}

impl NewEpisode {
    pub fn into_episode(self, feed_id: &str, cover: &str) -> Episode {
        Episode {
            feed_id: feed_id.to_string(),
            episode_id: self.episode_id,
            title: self.title,
            description: self.description,
            audio_url: self.audio_url,
            pub_date: self.pub_date,
            pub_timestamp: self.pub_timestamp,
            duration: self.duration,
            cover: cover.to_string(),
        }
    }
}

/// Result of reading a page of episodes from the cache.
#[derive(Debug, PartialEq)]
pub enum CachedPage {
    /// The feed's episodes were populated; the page may still be empty.
    Hit(Vec<Episode>),
    /// Unknown feed, or its episode cache was never populated.
    Miss,
}

pub struct Database {
    pool: SqlitePool,
}

impl Database {
    pub async fn new(database_url: &str) -> anyhow::Result<Self> {
        // Every connection to `:memory:` is a separate database
        let max_connections = if database_url.contains(":memory:") { 1 } else { 5 };

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;

        Ok(Self { pool })
    }

    pub async fn initialize(&self) -> anyhow::Result<()> {
        // sqlx enables `foreign_keys` on every SQLite connection
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS feeds (
                id TEXT PRIMARY KEY,
                title TEXT NOT NULL,
                author TEXT NOT NULL,
                cover_url TEXT NOT NULL,
                rss_url TEXT NOT NULL,
                subscribed_at TEXT NOT NULL,
                synced_at TEXT
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS episodes (
                id INTEGER PRIMARY KEY,
                feed_id TEXT NOT NULL REFERENCES feeds(id) ON DELETE CASCADE,
                episode_id TEXT NOT NULL,
                title TEXT NOT NULL,
                description TEXT NOT NULL,
                audio_url TEXT NOT NULL,
                pub_date TEXT NOT NULL,
                pub_timestamp INTEGER NOT NULL,
                duration INTEGER NOT NULL DEFAULT 0,
                UNIQUE(feed_id, episode_id)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_episodes_feed_published
            ON episodes(feed_id, pub_timestamp DESC)
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Inserts the feed unless one with the same RSS URL already exists.
    /// Existing rows are never overwritten. Returns true if a row was added.
    pub async fn upsert_feed(&self, feed: &NewFeed) -> anyhow::Result<bool> {
        let now = Utc::now().to_rfc3339();
        let result = sqlx::query(
            r#"
            INSERT INTO feeds (id, title, author, cover_url, rss_url, subscribed_at)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO NOTHING
            "#,
        )
        .bind(&feed.rss_url)
        .bind(&feed.title)
        .bind(&feed.author)
        .bind(&feed.cover_url)
        .bind(&feed.rss_url)
        .bind(&now)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    pub async fn list_feeds(&self) -> anyhow::Result<Vec<Feed>> {
        let feeds =
            sqlx::query_as::<_, Feed>("SELECT * FROM feeds ORDER BY subscribed_at, id")
                .fetch_all(&self.pool)
                .await?;
        Ok(feeds)
    }

    pub async fn get_feed(&self, feed_id: &str) -> anyhow::Result<Option<Feed>> {
        let feed = sqlx::query_as::<_, Feed>("SELECT * FROM feeds WHERE id = ?")
            .bind(feed_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(feed)
    }

    pub async fn list_episodes(
        &self,
        feed_id: &str,
        offset: i64,
        limit: i64,
    ) -> anyhow::Result<CachedPage> {
        let synced: Option<(Option<String>,)> =
            sqlx::query_as("SELECT synced_at FROM feeds WHERE id = ?")
                .bind(feed_id)
                .fetch_optional(&self.pool)
                .await?;

        if !matches!(synced, Some((Some(_),))) {
            return Ok(CachedPage::Miss);
        }

        let episodes = sqlx::query_as::<_, Episode>(
            r#"
            SELECT e.feed_id, e.episode_id, e.title, e.description, e.audio_url,
                   e.pub_date, e.pub_timestamp, e.duration, f.cover_url AS cover
            FROM episodes e
            JOIN feeds f ON f.id = e.feed_id
            WHERE e.feed_id = ?
            ORDER BY e.pub_timestamp DESC, e.id ASC
            LIMIT ? OFFSET ?
            "#,
        )
        .bind(feed_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;

        Ok(CachedPage::Hit(episodes))
    }

    pub async fn episode_count(&self, feed_id: &str) -> anyhow::Result<i64> {
        let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM episodes WHERE feed_id = ?")
            .bind(feed_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(count.0)
    }

    /// Inserts one episode, ignoring it if `(feed_id, episode_id)` is taken.
    pub async fn insert_episode(
        &self,
        feed_id: &str,
        episode: &NewEpisode,
    ) -> anyhow::Result<bool> {
        insert_episode_with(&self.pool, feed_id, episode).await
    }

    /// Stores every episode of a freshly fetched feed and marks the feed as
    /// synced, all in one transaction. Returns the number of new rows.
    pub async fn populate_episodes(
        &self,
        feed_id: &str,
        episodes: &[NewEpisode],
    ) -> anyhow::Result<u64> {
        let mut tx = self.pool.begin().await?;

        let mut inserted = 0;
        for episode in episodes {
            if insert_episode_with(&mut *tx, feed_id, episode).await? {
                inserted += 1;
            }
        }

        sqlx::query("UPDATE feeds SET synced_at = ? WHERE id = ?")
            .bind(Utc::now().to_rfc3339())
            .bind(feed_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(inserted)
    }

    /// Removes the feed and all of its episodes. Returns false if the feed
    /// did not exist.
    pub async fn delete_feed(&self, feed_id: &str) -> anyhow::Result<bool> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM episodes WHERE feed_id = ?")
            .bind(feed_id)
            .execute(&mut *tx)
            .await?;

        let result = sqlx::query("DELETE FROM feeds WHERE id = ?")
            .bind(feed_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

async fn insert_episode_with<'e, E>(
    executor: E,
    feed_id: &str,
    episode: &NewEpisode,
) -> anyhow::Result<bool>
where
    E: sqlx::Executor<'e, Database = Sqlite>,
{
    let result = sqlx::query(
        r#"
        INSERT INTO episodes
            (feed_id, episode_id, title, description, audio_url, pub_date, pub_timestamp, duration)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(feed_id, episode_id) DO NOTHING
        "#,
    )
    .bind(feed_id)
    .bind(&episode.episode_id)
    .bind(&episode.title)
    .bind(&episode.description)
    .bind(&episode.audio_url)
    .bind(&episode.pub_date)
    .bind(episode.pub_timestamp)
    .bind(episode.duration)
    .execute(executor)
    .await?;

    Ok(result.rows_affected() > 0)
}
