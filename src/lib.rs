//! podcache - a personal podcast subscription manager
//!
//! Subscribed RSS feeds are stored in SQLite and their episodes are cached
//! on first read. An HTTP API serves paginated episode listings and proxies
//! podcast directory search.

pub mod config;
pub mod db;
pub mod error;
pub mod fetcher;
pub mod library;
pub mod normalize;
pub mod opml;
pub mod routes;
pub mod search;
