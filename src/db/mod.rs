//! Persistence: pool bootstrap plus the read-only/read-write session
//! discipline every component talks to the store through.

pub mod models;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Sqlite, SqlitePool, Transaction};
use std::str::FromStr;

use crate::configuration::DatabaseConfig;
use crate::domain::{ArticleId, FeedTaskId, OutboundNotificationId};
use models::{Article, DiscoveryFeed, FeedTask, NotificationWithArticle, OutboundNotification};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
    /// A read-only session refused an attempted mutation: its flush raises
    /// on any pending change rather than silently dropping it.
    #[error("attempted a mutation through a read-only session")]
    ReadOnlyViolation,
}

/// Opens the SQLite pool and runs pending migrations. WAL journal mode and
/// a busy timeout are set up front since this is a single-writer, several
/// concurrent-reader embedded database shared by three stage workers.
pub async fn init_pool(config: &DatabaseConfig) -> Result<SqlitePool, StoreError> {
    let options = SqliteConnectOptions::from_str(&config.connection_string())?
        .create_if_missing(true)
        .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
        .busy_timeout(std::time::Duration::from_secs(5));

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await?;

    sqlx::migrate!("./migrations").run(&pool).await?;

    Ok(pool)
}

/// A session whose flush-equivalent (every `insert_*`/`mark_*` method)
/// refuses to execute and returns [`StoreError::ReadOnlyViolation`]. Rows
/// read through it are plain owned structs, detached from the
/// transaction's lifetime, so nothing about the session itself can leak
/// past its own scope. Always rolled back (never committed) on close.
pub struct ReadOnlySession<'p> {
    tx: Transaction<'p, Sqlite>,
}

impl<'p> ReadOnlySession<'p> {
    pub async fn begin(pool: &'p SqlitePool) -> Result<Self, StoreError> {
        Ok(Self {
            tx: pool.begin().await?,
        })
    }

    pub async fn get_article(&mut self, id: &ArticleId) -> Result<Option<Article>, StoreError> {
        Ok(models::get_article(&mut *self.tx, id).await?)
    }

    pub async fn get_feed_task_by_url(
        &mut self,
        feed_url: &str,
    ) -> Result<Option<FeedTask>, StoreError> {
        Ok(models::get_feed_task_by_url(&mut *self.tx, feed_url).await?)
    }

    pub async fn get_scheduled_feed_tasks(&mut self) -> Result<Vec<FeedTask>, StoreError> {
        Ok(models::get_scheduled_feed_tasks(&mut *self.tx).await?)
    }

    pub async fn get_existing_article_urls(
        &mut self,
        urls: &[String],
    ) -> Result<Vec<String>, StoreError> {
        Ok(models::get_existing_article_urls(&mut *self.tx, urls).await?)
    }

    pub async fn get_notification_with_article(
        &mut self,
        id: &OutboundNotificationId,
    ) -> Result<Option<NotificationWithArticle>, StoreError> {
        Ok(models::get_notification_with_article(&mut *self.tx, id).await?)
    }

    /// Always refuses: a read-only session has no mutating entry point.
    pub async fn insert_article(
        &mut self,
        _feed_guid: Option<&str>,
        _url: &str,
    ) -> Result<Article, StoreError> {
        Err(StoreError::ReadOnlyViolation)
    }

    /// Rolls the underlying transaction back and drops it: nothing written
    /// through this session is ever persisted.
    pub async fn close(self) -> Result<(), StoreError> {
        self.tx.rollback().await?;
        Ok(())
    }
}

/// A session that commits everything written through it on
/// [`ReadWriteSession::commit`], and otherwise rolls back — on an explicit
/// [`ReadWriteSession::rollback`], or implicitly via `Drop` if neither is
/// called (sqlx's `Transaction` rolls back on drop).
pub struct ReadWriteSession<'p> {
    tx: Transaction<'p, Sqlite>,
}

impl<'p> ReadWriteSession<'p> {
    pub async fn begin(pool: &'p SqlitePool) -> Result<Self, StoreError> {
        Ok(Self {
            tx: pool.begin().await?,
        })
    }

    pub async fn get_article(&mut self, id: &ArticleId) -> Result<Option<Article>, StoreError> {
        Ok(models::get_article(&mut *self.tx, id).await?)
    }

    pub async fn get_feed_task_by_url(
        &mut self,
        feed_url: &str,
    ) -> Result<Option<FeedTask>, StoreError> {
        Ok(models::get_feed_task_by_url(&mut *self.tx, feed_url).await?)
    }

    pub async fn get_scheduled_feed_tasks(&mut self) -> Result<Vec<FeedTask>, StoreError> {
        Ok(models::get_scheduled_feed_tasks(&mut *self.tx).await?)
    }

    pub async fn get_existing_article_urls(
        &mut self,
        urls: &[String],
    ) -> Result<Vec<String>, StoreError> {
        Ok(models::get_existing_article_urls(&mut *self.tx, urls).await?)
    }

    pub async fn insert_discovery_feed(
        &mut self,
        submitted_url: &str,
        discovered_feed: &str,
        feed_type_when_discovered: &str,
    ) -> Result<DiscoveryFeed, StoreError> {
        Ok(models::insert_discovery_feed(
            &mut *self.tx,
            submitted_url,
            discovered_feed,
            feed_type_when_discovered,
        )
        .await?)
    }

    pub async fn upsert_feed_task(&mut self, feed_url: &str) -> Result<FeedTask, StoreError> {
        Ok(models::upsert_feed_task(&mut *self.tx, feed_url).await?)
    }

    pub async fn deactivate_feed_task(&mut self, id: &FeedTaskId) -> Result<(), StoreError> {
        Ok(models::deactivate_feed_task(&mut *self.tx, id).await?)
    }

    pub async fn mark_feed_scan_started(&mut self, id: &FeedTaskId) -> Result<(), StoreError> {
        Ok(models::mark_feed_scan_started(&mut *self.tx, id).await?)
    }

    pub async fn mark_feed_scan_completed(&mut self, id: &FeedTaskId) -> Result<(), StoreError> {
        Ok(models::mark_feed_scan_completed(&mut *self.tx, id).await?)
    }

    pub async fn insert_article(
        &mut self,
        feed_guid: Option<&str>,
        url: &str,
    ) -> Result<Article, StoreError> {
        Ok(models::insert_article(&mut *self.tx, feed_guid, url).await?)
    }

    pub async fn mark_article_page_scan_completed(
        &mut self,
        id: &ArticleId,
    ) -> Result<(), StoreError> {
        Ok(models::mark_article_page_scan_completed(&mut *self.tx, id).await?)
    }

    pub async fn insert_outbound_notification(
        &mut self,
        source_article_id: &ArticleId,
        target_url: &str,
        webmention_endpoint: Option<&str>,
        pingback_endpoint: Option<&str>,
    ) -> Result<OutboundNotification, StoreError> {
        Ok(models::insert_outbound_notification(
            &mut *self.tx,
            source_article_id,
            target_url,
            webmention_endpoint,
            pingback_endpoint,
        )
        .await?)
    }

    pub async fn get_notification_with_article(
        &mut self,
        id: &OutboundNotificationId,
    ) -> Result<Option<NotificationWithArticle>, StoreError> {
        Ok(models::get_notification_with_article(&mut *self.tx, id).await?)
    }

    pub async fn record_notification_attempt(
        &mut self,
        id: &OutboundNotificationId,
        succeeded: bool,
    ) -> Result<(), StoreError> {
        Ok(models::record_notification_attempt(&mut *self.tx, id, succeeded).await?)
    }

    pub async fn commit(self) -> Result<(), StoreError> {
        self.tx.commit().await?;
        Ok(())
    }

    pub async fn rollback(self) -> Result<(), StoreError> {
        self.tx.rollback().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn test_pool() -> SqlitePool {
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
    async fn read_only_session_refuses_insert_and_persists_nothing() {
        let pool = test_pool().await;

        let mut session = ReadOnlySession::begin(&pool).await.unwrap();
        let result = session.insert_article(None, "https://example.com/a").await;
        assert!(matches!(result, Err(StoreError::ReadOnlyViolation)));
        session.close().await.unwrap();

        let mut check = ReadOnlySession::begin(&pool).await.unwrap();
        let existing = check
            .get_existing_article_urls(&["https://example.com/a".to_string()])
            .await
            .unwrap();
        assert!(existing.is_empty());
    }

    #[tokio::test]
    async fn read_write_session_commits_on_success() {
        let pool = test_pool().await;

        let mut session = ReadWriteSession::begin(&pool).await.unwrap();
        session
            .insert_article(None, "https://example.com/b")
            .await
            .unwrap();
        session.commit().await.unwrap();

        let mut check = ReadOnlySession::begin(&pool).await.unwrap();
        let existing = check
            .get_existing_article_urls(&["https://example.com/b".to_string()])
            .await
            .unwrap();
        assert_eq!(existing, vec!["https://example.com/b".to_string()]);
    }

    #[tokio::test]
    async fn read_write_session_rolls_back_on_explicit_rollback() {
        let pool = test_pool().await;

        let mut session = ReadWriteSession::begin(&pool).await.unwrap();
        session
            .insert_article(None, "https://example.com/c")
            .await
            .unwrap();
        session.rollback().await.unwrap();

        let mut check = ReadOnlySession::begin(&pool).await.unwrap();
        let existing = check
            .get_existing_article_urls(&["https://example.com/c".to_string()])
            .await
            .unwrap();
        assert!(existing.is_empty());
    }
}
