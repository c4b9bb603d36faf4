use thiserror::Error;

/// Errors surfaced by the HTTP API.
///
/// Each variant maps to one status code; see the `IntoResponse` impl in
/// [`crate::routes`].
#[derive(Debug, Error)]
pub enum Error {
    /// A required request field was absent or blank
    #[error("Missing {0}")]
    MissingInput(&'static str),

    /// Subscribing failed because the URL could not be fetched or parsed
    #[error("Invalid RSS: {0}")]
    InvalidFeed(String),

    /// The feed was never registered
    #[error("Podcast not found")]
    NotFound,

    /// A registered feed could not be fetched while populating its cache
    #[error("Failed to fetch podcast feed: {0}")]
    FeedUnavailable(String),

    /// Search backend or OPML failure, passed through as-is
    #[error("{0}")]
    Upstream(String),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
