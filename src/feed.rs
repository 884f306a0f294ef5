//! Feed discovery: given a site URL, locate its RSS/Atom feed and parse it.

use feed_rs::model::Feed as RawFeed;
use url::Url;

use crate::html::{fetch_document, find_link_in_document, FindLinkCriteria};
use crate::net::{self, FetchError};

/// A fetched and parsed feed, anchored to the absolute URL it was fetched
/// from (not the site URL that led to its discovery).
#[derive(Debug)]
pub struct Feed {
    pub absolute_url: Url,
    pub content: RawFeed,
}

#[derive(Debug, thiserror::Error)]
pub enum FeedDiscoveryError {
    #[error(transparent)]
    Fetch(#[from] FetchError),
}

/// `<link>` rel/type pairs to probe, in discovery-precedence order. RSS is
/// preferred over Atom.
const FEED_LINK_TYPES: &[(&str, &str)] = &[
    ("rss", "application/rss+xml"),
    ("atom", "application/atom+xml"),
];

/// Fetches `site_url`, looks for an RSS or Atom `<link rel="alternate">` in
/// its HTML, then fetches and parses whichever one resolves. Network or
/// parse failures at any step return `Ok(None)` — this function itself
/// never raises for a merely-absent feed; callers translate that into a
/// user-facing "no feed" error where appropriate.
#[tracing::instrument(name = "Scan site for feed", skip(client))]
pub async fn scan_site_for_feed(
    client: &reqwest::Client,
    site_url: &Url,
) -> Result<Option<Feed>, FeedDiscoveryError> {
    let document = match fetch_document(client, site_url).await {
        Ok(document) => document,
        Err(err) => {
            tracing::warn!(%err, url = %site_url, "failed to fetch site for feed discovery");
            return Ok(None);
        }
    };

    // The link element currently under evaluation is the one whose href we
    // resolve and fetch, never a link found in an earlier iteration.
    for (_, link_type) in FEED_LINK_TYPES {
        let types = [*link_type];
        let Some(feed_url) =
            find_link_in_document(site_url, &document, FindLinkCriteria::AnyType(&types))
        else {
            continue;
        };

        match fetch_and_parse_feed(client, &feed_url).await {
            Ok(Some(feed)) => return Ok(Some(feed)),
            Ok(None) => continue,
            Err(err) => {
                tracing::warn!(%err, url = %feed_url, "failed to fetch discovered feed");
                continue;
            }
        }
    }

    Ok(None)
}

/// Fetches and parses the feed directly at `feed_url`, skipping HTML
/// discovery.
#[tracing::instrument(name = "Fetch feed from URL", skip(client))]
pub async fn feed_from_url(
    client: &reqwest::Client,
    feed_url: &Url,
) -> Result<Option<Feed>, FeedDiscoveryError> {
    match fetch_and_parse_feed(client, feed_url).await {
        Ok(feed) => Ok(feed),
        Err(err) => {
            tracing::warn!(%err, url = %feed_url, "failed to fetch feed");
            Ok(None)
        }
    }
}

async fn fetch_and_parse_feed(
    client: &reqwest::Client,
    feed_url: &Url,
) -> Result<Option<Feed>, FetchError> {
    // Fetched as bytes, not text, so feed-rs can honor the declared
    // content-encoding rather than a possibly-wrong guess.
    let bytes = net::fetch_bytes(client, feed_url).await?;

    match feed_rs::parser::parse(&bytes[..]) {
        Ok(content) => Ok(Some(Feed {
            absolute_url: feed_url.clone(),
            content,
        })),
        Err(err) => {
            tracing::warn!(%err, url = %feed_url, "feed bytes failed to parse");
            Ok(None)
        }
    }
}

/// One entry yielded from a parsed feed: everything `link_generator_from_feed`
/// needs to upsert an `Article`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedEntry {
    pub title: String,
    pub absolute_url: Url,
    pub guid: Option<String>,
}

/// Yields one [`FeedEntry`] per feed item that has an absolute link. Items
/// with no link, or with a relative link, are skipped — this pipeline only
/// deals in absolute URLs downstream.
pub fn link_generator_from_feed(feed: &Feed) -> impl Iterator<Item = FeedEntry> + '_ {
    feed.content.entries.iter().filter_map(|entry| {
        let link = entry.links.first()?;
        let absolute_url = Url::parse(&link.href).ok()?;

        let title = entry
            .title
            .as_ref()
            .map(|t| t.content.clone())
            .unwrap_or_else(|| link.href.clone());

        let guid = (!entry.id.is_empty()).then(|| entry.id.clone());

        Some(FeedEntry {
            title,
            absolute_url,
            guid,
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_feed(xml: &[u8]) -> Feed {
        Feed {
            absolute_url: Url::parse("https://blog.example/feed.xml").unwrap(),
            content: feed_rs::parser::parse(xml).expect("valid feed fixture"),
        }
    }

    const RSS_FIXTURE: &[u8] = br#"<?xml version="1.0"?>
        <rss version="2.0">
          <channel>
            <title>Example</title>
            <item>
              <title>Post one</title>
              <link>https://blog.example/post-one</link>
              <guid>urn:uuid:abc</guid>
            </item>
            <item>
              <link>https://blog.example/post-two</link>
            </item>
          </channel>
        </rss>"#;

    #[test]
    fn link_generator_yields_entries_with_absolute_links() {
        let feed = sample_feed(RSS_FIXTURE);
        let entries: Vec<_> = link_generator_from_feed(&feed).collect();

        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].title, "Post one");
        assert_eq!(entries[0].absolute_url.as_str(), "https://blog.example/post-one");
    }

    #[test]
    fn link_generator_falls_back_to_link_as_title() {
        let feed = sample_feed(RSS_FIXTURE);
        let entries: Vec<_> = link_generator_from_feed(&feed).collect();

        assert_eq!(entries[1].title, "https://blog.example/post-two");
    }
}
