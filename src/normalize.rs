//! Turns raw feed entries into episode records.
//!
//! An entry becomes an episode only if it carries at least one `http(s)`
//! enclosure; everything else in a feed is ignored.

use std::collections::HashSet;

use chrono::{DateTime, Local, TimeZone, Utc};
use feed_rs::model::Entry;

use crate::db::NewEpisode;

/// Maps one entry to an episode, or `None` if it has no playable audio.
pub fn normalize_entry(entry: &Entry) -> Option<NewEpisode> {
    let audio_url = enclosure_urls(entry).find(|href| is_playable(href))?;

    let title = entry
        .title
        .as_ref()
        .map(|t| t.content.clone())
        .unwrap_or_default();

    let link = entry.links.first().map(|l| l.href.as_str());
    let episode_id = episode_identity(&entry.id, link, &title).unwrap_or(audio_url.as_str());

    let description = entry
        .summary
        .as_ref()
        .map(|s| s.content.clone())
        .filter(|s| !s.is_empty())
        .or_else(|| entry.content.as_ref().and_then(|c| c.body.clone()))
        .unwrap_or_default();

    let pub_date = entry
        .published
        .map(|dt| dt.to_rfc2822())
        .unwrap_or_default();

    Some(NewEpisode {
        episode_id: episode_id.to_string(),
        title,
        description,
        audio_url: audio_url.clone(),
        pub_date,
        pub_timestamp: entry.published.map(local_timestamp).unwrap_or(0),
        duration: 0,
    })
}

/// Normalizes every entry of a feed, newest first.
///
/// Entries that repeat an identifier already seen are dropped so the result
/// matches what ends up in the cache.
pub fn normalize_feed(entries: &[Entry]) -> Vec<NewEpisode> {
    let mut episodes: Vec<NewEpisode> = entries.iter().filter_map(normalize_entry).collect();
    episodes.sort_by(|a, b| b.pub_timestamp.cmp(&a.pub_timestamp));

    let mut seen = HashSet::new();
    episodes.retain(|e| seen.insert(e.episode_id.clone()));
    episodes
}

/// First non-empty of id, link and title.
pub fn episode_identity<'a>(id: &'a str, link: Option<&'a str>, title: &'a str) -> Option<&'a str> {
    [Some(id), link, Some(title)]
        .into_iter()
        .flatten()
        .find(|candidate| !candidate.trim().is_empty())
}

/// Enclosure hrefs in document order: media content first, then Atom
/// `rel="enclosure"` links.
fn enclosure_urls(entry: &Entry) -> impl Iterator<Item = String> + '_ {
    let media = entry
        .media
        .iter()
        .flat_map(|m| m.content.iter())
        .filter_map(|c| c.url.as_ref().map(|u| u.to_string()));

    let links = entry
        .links
        .iter()
        .filter(|l| l.rel.as_deref() == Some("enclosure"))
        .map(|l| l.href.clone());

    media.chain(links)
}

fn is_playable(href: &str) -> bool {
    let lower = href.trim_start().to_ascii_lowercase();
    lower.starts_with("http://") || lower.starts_with("https://")
}

/// Epoch seconds of a publish time whose wall-clock value is read as local
/// time, as `mktime` does with the parser's UTC struct.
fn local_timestamp(published: DateTime<Utc>) -> i64 {
    wall_clock_timestamp(published, &Local)
}

fn wall_clock_timestamp<Tz: TimeZone>(published: DateTime<Utc>, zone: &Tz) -> i64 {
    zone.from_local_datetime(&published.naive_utc())
        .earliest()
        .map(|dt| dt.timestamp())
        .unwrap_or_else(|| published.timestamp())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetcher::Fetcher;
    use chrono::FixedOffset;
    use feed_rs::model::Link;

    fn parse_items(items: &str) -> Vec<Entry> {
        let xml = format!(
            r#"<?xml version="1.0" encoding="UTF-8"?>
            <rss version="2.0" xmlns:media="http://search.yahoo.com/mrss/">
                <channel>
                    <title>Test Cast</title>
                    <link>https://cast.example.com</link>
                    <description>Test</description>
                    {}
                </channel>
            </rss>"#,
            items
        );
        Fetcher::parse(xml.as_bytes()).unwrap().entries
    }

    fn create_link(href: &str, rel: Option<&str>) -> Link {
        Link {
            href: href.to_string(),
            rel: rel.map(|r| r.to_string()),
            media_type: None,
            href_lang: None,
            title: None,
            length: None,
        }
    }

    mod identity_tests {
        use super::*;

        #[test]
        fn test_id_wins() {
            let id = episode_identity("guid-1", Some("https://ex.com/1"), "Title");
            assert_eq!(id, Some("guid-1"));
        }

        #[test]
        fn test_link_when_id_empty() {
            let id = episode_identity("", Some("https://ex.com/1"), "Title");
            assert_eq!(id, Some("https://ex.com/1"));
        }

        #[test]
        fn test_title_when_id_and_link_empty() {
            assert_eq!(episode_identity("  ", None, "Title"), Some("Title"));
            assert_eq!(episode_identity("", Some(""), "Title"), Some("Title"));
        }

        #[test]
        fn test_nothing_usable() {
            assert_eq!(episode_identity("", None, ""), None);
        }

        #[test]
        fn test_guid_becomes_episode_id() {
            let entries = parse_items(
                r#"<item>
                    <title>One</title>
                    <guid>urn:episode:1</guid>
                    <link>https://cast.example.com/1</link>
                    <enclosure url="https://cdn.example.com/1.mp3" type="audio/mpeg" length="1"/>
                </item>"#,
            );

            let episode = normalize_entry(&entries[0]).unwrap();
            assert_eq!(episode.episode_id, "urn:episode:1");
        }

        #[test]
        fn test_link_without_guid_becomes_episode_id() {
            let item = r#"<item>
                    <title>No guid</title>
                    <link>https://cast.example.com/ep/1</link>
                    <enclosure url="https://cdn.example.com/1.mp3" type="audio/mpeg" length="1"/>
                </item>"#;

            let first = normalize_entry(&parse_items(item)[0]).unwrap();
            let second = normalize_entry(&parse_items(item)[0]).unwrap();

            assert_eq!(first.episode_id, "https://cast.example.com/ep/1");
            assert_eq!(first.episode_id, second.episode_id);
        }

        #[test]
        fn test_title_without_guid_or_link_becomes_episode_id() {
            let item = r#"<item>
                    <title>Only title</title>
                    <enclosure url="https://cdn.example.com/2.mp3" type="audio/mpeg" length="1"/>
                </item>"#;

            let first = normalize_entry(&parse_items(item)[0]).unwrap();
            let second = normalize_entry(&parse_items(item)[0]).unwrap();

            assert_eq!(first.episode_id, "Only title");
            assert_eq!(first.episode_id, second.episode_id);
        }

        #[test]
        fn test_guidless_repeats_are_deduped() {
            let entries = parse_items(
                r#"<item>
                    <title>Rerun</title>
                    <pubDate>Mon, 09 Dec 2024 12:00:00 GMT</pubDate>
                    <enclosure url="https://cdn.example.com/a.mp3" type="audio/mpeg" length="1"/>
                </item>
                <item>
                    <title>Rerun</title>
                    <pubDate>Mon, 02 Dec 2024 12:00:00 GMT</pubDate>
                    <enclosure url="https://cdn.example.com/b.mp3" type="audio/mpeg" length="1"/>
                </item>"#,
            );

            let episodes = normalize_feed(&entries);

            assert_eq!(episodes.len(), 1);
            assert_eq!(episodes[0].audio_url, "https://cdn.example.com/a.mp3");
        }

        #[test]
        fn test_audio_url_when_entry_has_no_identity() {
            let entry = Entry {
                id: String::new(),
                links: vec![create_link("https://cdn.example.com/a.mp3", Some("enclosure"))],
                ..Default::default()
            };

            let episode = normalize_entry(&entry).unwrap();
            assert_eq!(episode.episode_id, "https://cdn.example.com/a.mp3");
        }
    }

    mod audio_tests {
        use super::*;

        #[test]
        fn test_entry_without_enclosure_is_dropped() {
            let entries = parse_items(
                r#"<item>
                    <title>Blog post</title>
                    <guid>post-1</guid>
                    <link>https://cast.example.com/post</link>
                </item>"#,
            );

            assert!(normalize_entry(&entries[0]).is_none());
        }

        #[test]
        fn test_non_http_enclosure_is_dropped() {
            let entry = Entry {
                id: "ep".to_string(),
                links: vec![create_link("ftp://files.example.com/a.mp3", Some("enclosure"))],
                ..Default::default()
            };

            assert!(normalize_entry(&entry).is_none());
        }

        #[test]
        fn test_first_http_enclosure_wins() {
            let entry = Entry {
                id: "ep".to_string(),
                links: vec![
                    create_link("https://cast.example.com/page", None),
                    create_link("ftp://files.example.com/a.mp3", Some("enclosure")),
                    create_link("http://cdn.example.com/a.mp3", Some("enclosure")),
                    create_link("https://cdn.example.com/b.mp3", Some("enclosure")),
                ],
                ..Default::default()
            };

            let episode = normalize_entry(&entry).unwrap();
            assert_eq!(episode.audio_url, "http://cdn.example.com/a.mp3");
        }

        #[test]
        fn test_rss_enclosure() {
            let entries = parse_items(
                r#"<item>
                    <title>One</title>
                    <guid>1</guid>
                    <enclosure url="https://cdn.example.com/one.mp3" type="audio/mpeg" length="1"/>
                </item>"#,
            );

            let episode = normalize_entry(&entries[0]).unwrap();
            assert_eq!(episode.audio_url, "https://cdn.example.com/one.mp3");
            assert_eq!(episode.title, "One");
        }

        #[test]
        fn test_playable_prefixes() {
            assert!(is_playable("https://a.com/x.mp3"));
            assert!(is_playable("HTTP://a.com/x.mp3"));
            assert!(!is_playable("httpx://a.com/x.mp3"));
            assert!(!is_playable("/relative/x.mp3"));
        }
    }

    mod field_tests {
        use super::*;

        #[test]
        fn test_description_and_date() {
            let entries = parse_items(
                r#"<item>
                    <title>Dated</title>
                    <guid>d</guid>
                    <description>Show notes</description>
                    <pubDate>Mon, 09 Dec 2024 12:00:00 GMT</pubDate>
                    <enclosure url="https://cdn.example.com/d.mp3" type="audio/mpeg" length="1"/>
                </item>"#,
            );

            let episode = normalize_entry(&entries[0]).unwrap();
            assert_eq!(episode.description, "Show notes");
            assert!(episode.pub_date.starts_with("Mon,"));
            assert!(episode.pub_date.contains("Dec 2024 12:00:00"));
            assert!(episode.pub_timestamp > 0);
            assert_eq!(episode.duration, 0);
        }

        #[test]
        fn test_pub_date_is_rendered_in_utc() {
            let entries = parse_items(
                r#"<item>
                    <title>Offset</title>
                    <guid>o</guid>
                    <pubDate>Mon, 09 Dec 2024 14:00:00 +0200</pubDate>
                    <enclosure url="https://cdn.example.com/o.mp3" type="audio/mpeg" length="1"/>
                </item>"#,
            );

            let episode = normalize_entry(&entries[0]).unwrap();
            assert!(episode.pub_date.ends_with("Dec 2024 12:00:00 +0000"));
        }

        #[test]
        fn test_missing_date_gives_zero_timestamp() {
            let entries = parse_items(
                r#"<item>
                    <title>Undated</title>
                    <guid>u</guid>
                    <enclosure url="https://cdn.example.com/u.mp3" type="audio/mpeg" length="1"/>
                </item>"#,
            );

            let episode = normalize_entry(&entries[0]).unwrap();
            assert_eq!(episode.pub_timestamp, 0);
            assert_eq!(episode.pub_date, "");
            assert_eq!(episode.description, "");
        }

        #[test]
        fn test_wall_clock_read_in_zone() {
            // 2024-12-09 12:00:00 UTC
            let published = Utc.with_ymd_and_hms(2024, 12, 9, 12, 0, 0).unwrap();
            assert_eq!(published.timestamp(), 1_733_745_600);

            let utc = wall_clock_timestamp(published, &Utc);
            let east = wall_clock_timestamp(published, &FixedOffset::east_opt(3600).unwrap());
            let west = wall_clock_timestamp(published, &FixedOffset::west_opt(5 * 3600).unwrap());

            assert_eq!(utc, 1_733_745_600);
            assert_eq!(east, 1_733_742_000);
            assert_eq!(west, 1_733_763_600);
        }

        #[test]
        fn test_local_timestamp_keeps_wall_clock() {
            let published = Utc.with_ymd_and_hms(2024, 12, 9, 12, 0, 0).unwrap();
            let stamped = Local.timestamp_opt(local_timestamp(published), 0).unwrap();

            assert_eq!(stamped.naive_local(), published.naive_utc());
        }
    }

    mod feed_tests {
        use super::*;

        #[test]
        fn test_normalize_feed_sorts_filters_and_dedupes() {
            let entries = parse_items(
                r#"
                <item>
                    <title>Old</title>
                    <guid>old</guid>
                    <pubDate>Mon, 02 Dec 2024 12:00:00 GMT</pubDate>
                    <enclosure url="https://cdn.example.com/old.mp3" type="audio/mpeg" length="1"/>
                </item>
                <item>
                    <title>No audio</title>
                    <guid>text</guid>
                    <pubDate>Tue, 10 Dec 2024 12:00:00 GMT</pubDate>
                </item>
                <item>
                    <title>New</title>
                    <guid>new</guid>
                    <pubDate>Mon, 09 Dec 2024 12:00:00 GMT</pubDate>
                    <enclosure url="https://cdn.example.com/new.mp3" type="audio/mpeg" length="1"/>
                </item>
                <item>
                    <title>New again</title>
                    <guid>new</guid>
                    <pubDate>Mon, 09 Dec 2024 12:00:00 GMT</pubDate>
                    <enclosure url="https://cdn.example.com/new2.mp3" type="audio/mpeg" length="1"/>
                </item>
                <item>
                    <title>Undated</title>
                    <guid>undated</guid>
                    <enclosure url="https://cdn.example.com/undated.mp3" type="audio/mpeg" length="1"/>
                </item>
                "#,
            );

            let episodes = normalize_feed(&entries);
            let ids: Vec<&str> = episodes.iter().map(|e| e.episode_id.as_str()).collect();

            assert_eq!(ids, vec!["new", "old", "undated"]);
            assert_eq!(episodes[0].title, "New");
        }

        #[test]
        fn test_normalize_empty_feed() {
            assert!(normalize_feed(&[]).is_empty());
        }
    }
}
