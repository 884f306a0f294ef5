//! The four orchestrator modes: `register`, `site`, `page`, and the
//! no-flag drain of every saved feed through the full pipeline.

use sqlx::SqlitePool;
use url::Url;

use crate::capability::{self, MentionCapabilities};
use crate::db::{ReadOnlySession, ReadWriteSession, StoreError};
use crate::feed::{self, FeedDiscoveryError};
use crate::links::{self, ArticleLinkError};
use crate::net;
use crate::pipeline::Pipeline;
use crate::sender::{self, MentionCandidate};

#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    #[error("no feed could be discovered for {0}")]
    NoFeed(Url),
    #[error(transparent)]
    FeedDiscovery(#[from] FeedDiscoveryError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

pub struct Orchestrator {
    pool: SqlitePool,
    client: reqwest::Client,
}

impl Orchestrator {
    pub fn new(pool: SqlitePool, client: reqwest::Client) -> Self {
        Self { pool, client }
    }

    /// `--register URL`: discovers `site_url`'s feed and persists a
    /// `DiscoveryFeed` plus its shared `FeedTask`, surfacing a discovery
    /// failure as [`OrchestratorError::NoFeed`].
    #[tracing::instrument(name = "Register feed", skip(self), fields(site_url = %site_url))]
    pub async fn register(&self, site_url: &Url) -> Result<(), OrchestratorError> {
        let feed =
            net::with_non_global_allowed(feed::scan_site_for_feed(&self.client, site_url)).await?;
        let Some(feed) = feed else {
            return Err(OrchestratorError::NoFeed(site_url.clone()));
        };

        let feed_type = format!("{:?}", feed.content.feed_type);

        let mut rw = ReadWriteSession::begin(&self.pool).await?;
        rw.insert_discovery_feed(site_url.as_str(), feed.absolute_url.as_str(), &feed_type)
            .await?;
        rw.upsert_feed_task(feed.absolute_url.as_str()).await?;
        rw.commit().await?;

        Ok(())
    }

    /// `--site URL`: ad-hoc scan, not persisted. Discovers the site's feed,
    /// then scans every entry's article page for outbound mention
    /// candidates.
    #[tracing::instrument(name = "Scan site", skip(self), fields(site_url = %site_url))]
    pub async fn scan_site(&self, site_url: &Url, dry_run: bool) -> Result<(), OrchestratorError> {
        let feed =
            net::with_non_global_allowed(feed::scan_site_for_feed(&self.client, site_url)).await?;
        let Some(feed) = feed else {
            return Err(OrchestratorError::NoFeed(site_url.clone()));
        };

        for entry in feed::link_generator_from_feed(&feed) {
            self.scan_article(&entry.absolute_url, dry_run).await;
        }

        Ok(())
    }

    /// `--page URL`: ad-hoc scan of a single page, treated as a synthetic
    /// one-entry feed (the page itself is the article).
    #[tracing::instrument(name = "Scan page", skip(self), fields(page_url = %page_url))]
    pub async fn scan_page(&self, page_url: &Url, dry_run: bool) {
        self.scan_article(page_url, dry_run).await;
    }

    async fn scan_article(&self, article_url: &Url, dry_run: bool) {
        let links = match links::parse_page_find_links(&self.client, article_url).await {
            Ok(links) => links,
            Err(ArticleLinkError::Fetch(err)) => {
                tracing::warn!(%err, article_url = %article_url, "failed to extract links");
                return;
            }
        };

        for link in links {
            match capability::fetch_page_check_mention_capabilities(&self.client, &link).await {
                Ok(Some(capabilities)) => {
                    if dry_run {
                        print_discovery(&link, &capabilities);
                        continue;
                    }

                    let candidate = MentionCandidate {
                        mentioner_url: article_url.to_string(),
                        mentioned_url: link.to_string(),
                        capabilities,
                    };

                    if let Err(err) = sender::send_mention(&self.client, &candidate).await {
                        tracing::warn!(%err, target = %link, "failed to send mention");
                    }
                }
                Ok(None) => {
                    if dry_run {
                        println!("😢 {link}");
                    }
                }
                Err(err) => {
                    tracing::warn!(%err, target = %link, "capability probe failed");
                    if dry_run {
                        println!("😢 {link}");
                    }
                }
            }
        }
    }

    /// No mode flag: drains every non-deactivated `FeedTask` through the
    /// full feed -> article -> notification pipeline, then shuts it down in
    /// dependency order.
    #[tracing::instrument(name = "Drain saved feeds", skip(self))]
    pub async fn drain(&self, dry_run: bool) -> Result<(), OrchestratorError> {
        let tasks = {
            let mut ro = ReadOnlySession::begin(&self.pool).await?;
            let tasks = ro.get_scheduled_feed_tasks().await?;
            ro.close().await?;
            tasks
        };

        tracing::info!(count = tasks.len(), "draining scheduled feed tasks");

        let pipeline = Pipeline::new(self.pool.clone(), self.client.clone(), dry_run);
        for task in tasks {
            pipeline.enqueue_feed_task(task);
        }
        pipeline.shutdown().await;

        Ok(())
    }
}

fn print_discovery(link: &Url, capabilities: &MentionCapabilities) {
    if capabilities.webmention_url.is_some() {
        println!("🥕 {link}");
    } else if capabilities.pingback_url.is_some() {
        println!("🥬 {link}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn test_pool() -> SqlitePool {
        use sqlx::sqlite::SqlitePoolOptions;
        let pool = SqlitePoolOptions::new()
            .connect("sqlite::memory:")
            .await
            .expect("in-memory pool");
        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .expect("migrations");
        pool
    }

    #[tokio::test]
    async fn register_fails_with_no_feed_error_when_discovery_finds_nothing() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html></html>"))
            .mount(&server)
            .await;

        let pool = test_pool().await;
        let client = reqwest::Client::new();
        let orchestrator = Orchestrator::new(pool, client);

        let site_url = Url::parse(&server.uri()).unwrap();
        let result = orchestrator.register(&site_url).await;

        assert!(matches!(result, Err(OrchestratorError::NoFeed(_))));
    }

    #[tokio::test]
    async fn register_persists_discovery_feed_and_feed_task() {
        let server = MockServer::start().await;
        let server_uri = server.uri();

        Mock::given(method("GET"))
            .and(path("/"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"<html><head><link rel="alternate" type="application/rss+xml" href="/feed.xml"></head></html>"#,
            ))
            .mount(&server)
            .await;

        Mock::given(method("GET"))
            .and(path("/feed.xml"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"<?xml version="1.0"?><rss version="2.0"><channel><title>T</title>
                    <item><title>Post</title><link>https://blog.example/post</link></item>
                </channel></rss>"#,
            ))
            .mount(&server)
            .await;

        let pool = test_pool().await;
        let client = reqwest::Client::new();
        let orchestrator = Orchestrator::new(pool.clone(), client);

        let site_url = Url::parse(&server_uri).unwrap();
        orchestrator.register(&site_url).await.unwrap();

        let mut ro = ReadOnlySession::begin(&pool).await.unwrap();
        let feed_url = format!("{server_uri}/feed.xml");
        let task = ro.get_feed_task_by_url(&feed_url).await.unwrap();
        assert!(task.is_some());
        assert!(task.unwrap().next_scan.is_some());
    }
}
