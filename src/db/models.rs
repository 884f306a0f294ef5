//! Row types and queries for the four persisted entities.

use chrono::{NaiveDateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{FromRow, Row, Sqlite};

use crate::domain::{ArticleId, DiscoveryFeedId, FeedTaskId, OutboundNotificationId};

fn now() -> NaiveDateTime {
    Utc::now().naive_utc()
}

#[derive(Debug, Clone)]
pub struct DiscoveryFeed {
    pub id: DiscoveryFeedId,
    pub submitted_url: String,
    pub discovered_feed: String,
    pub feed_type_when_discovered: String,
    pub created: NaiveDateTime,
    pub updated: NaiveDateTime,
}

impl FromRow<'_, SqliteRow> for DiscoveryFeed {
    fn from_row(row: &SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: DiscoveryFeedId(row.try_get("id")?),
            submitted_url: row.try_get("submitted_url")?,
            discovered_feed: row.try_get("discovered_feed")?,
            feed_type_when_discovered: row.try_get("feed_type_when_discovered")?,
            created: row.try_get("created")?,
            updated: row.try_get("updated")?,
        })
    }
}

#[derive(Debug, Clone)]
pub struct FeedTask {
    pub id: FeedTaskId,
    pub feed_url: String,
    pub last_scan_started: Option<NaiveDateTime>,
    pub last_scan_completed: Option<NaiveDateTime>,
    pub last_reported_update_time: Option<NaiveDateTime>,
    pub next_scan: Option<NaiveDateTime>,
    pub created: NaiveDateTime,
    pub updated: NaiveDateTime,
}

impl FromRow<'_, SqliteRow> for FeedTask {
    fn from_row(row: &SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: FeedTaskId(row.try_get("id")?),
            feed_url: row.try_get("feed_url")?,
            last_scan_started: row.try_get("last_scan_started")?,
            last_scan_completed: row.try_get("last_scan_completed")?,
            last_reported_update_time: row.try_get("last_reported_update_time")?,
            next_scan: row.try_get("next_scan")?,
            created: row.try_get("created")?,
            updated: row.try_get("updated")?,
        })
    }
}

#[derive(Debug, Clone)]
pub struct Article {
    pub id: ArticleId,
    pub feed_guid: Option<String>,
    pub url: String,
    pub page_scan_completed_at: Option<NaiveDateTime>,
    pub notifications_completed_at: Option<NaiveDateTime>,
    pub created: NaiveDateTime,
    pub updated: NaiveDateTime,
}

impl FromRow<'_, SqliteRow> for Article {
    fn from_row(row: &SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: ArticleId(row.try_get("id")?),
            feed_guid: row.try_get("feed_guid")?,
            url: row.try_get("url")?,
            page_scan_completed_at: row.try_get("page_scan_completed_at")?,
            notifications_completed_at: row.try_get("notifications_completed_at")?,
            created: row.try_get("created")?,
            updated: row.try_get("updated")?,
        })
    }
}

#[derive(Debug, Clone)]
pub struct OutboundNotification {
    pub id: OutboundNotificationId,
    pub source_article_id: ArticleId,
    pub target_url: String,
    pub webmention_endpoint: Option<String>,
    pub pingback_endpoint: Option<String>,
    pub num_attempts: i64,
    pub last_attempted_at: Option<NaiveDateTime>,
    pub succeeded_at: Option<NaiveDateTime>,
    pub created: NaiveDateTime,
    pub updated: NaiveDateTime,
}

impl FromRow<'_, SqliteRow> for OutboundNotification {
    fn from_row(row: &SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: OutboundNotificationId(row.try_get("id")?),
            source_article_id: ArticleId(row.try_get("source_article_id")?),
            target_url: row.try_get("target_url")?,
            webmention_endpoint: row.try_get("webmention_endpoint")?,
            pingback_endpoint: row.try_get("pingback_endpoint")?,
            num_attempts: row.try_get("num_attempts")?,
            last_attempted_at: row.try_get("last_attempted_at")?,
            succeeded_at: row.try_get("succeeded_at")?,
            created: row.try_get("created")?,
            updated: row.try_get("updated")?,
        })
    }
}

/// A notification joined with its source article's URL, the shape the
/// notification-queue worker actually needs.
#[derive(Debug, Clone)]
pub struct NotificationWithArticle {
    pub notification: OutboundNotification,
    pub article_url: String,
}

// --- Queries -----------------------------------------------------------
//
// Free functions over `impl sqlx::SqliteExecutor` so both `ReadOnlySession`
// and `ReadWriteSession` can share the read paths.

pub async fn insert_discovery_feed<'e, E>(
    executor: E,
    submitted_url: &str,
    discovered_feed: &str,
    feed_type_when_discovered: &str,
) -> Result<DiscoveryFeed, sqlx::Error>
where
    E: sqlx::Executor<'e, Database = Sqlite>,
{
    let id = DiscoveryFeedId::default();
    let now = now();

    sqlx::query_as::<_, DiscoveryFeed>(
        r#"
        INSERT INTO discovery_feeds
            (id, submitted_url, discovered_feed, feed_type_when_discovered, created, updated)
        VALUES (?, ?, ?, ?, ?, ?)
        RETURNING *
        "#,
    )
    .bind(id.0)
    .bind(submitted_url)
    .bind(discovered_feed)
    .bind(feed_type_when_discovered)
    .bind(now)
    .bind(now)
    .fetch_one(executor)
    .await
}

pub async fn get_feed_task_by_url<'e, E>(
    executor: E,
    feed_url: &str,
) -> Result<Option<FeedTask>, sqlx::Error>
where
    E: sqlx::Executor<'e, Database = Sqlite>,
{
    sqlx::query_as::<_, FeedTask>(r#"SELECT * FROM feed_tasks WHERE feed_url = ?"#)
        .bind(feed_url)
        .fetch_optional(executor)
        .await
}

/// Creates the `FeedTask` for `feed_url` if absent, else refreshes
/// `next_scan = now()`, per the registration lifecycle.
pub async fn upsert_feed_task<'e, E>(executor: E, feed_url: &str) -> Result<FeedTask, sqlx::Error>
where
    E: sqlx::Executor<'e, Database = Sqlite>,
{
    let id = FeedTaskId::default();
    let now = now();

    sqlx::query_as::<_, FeedTask>(
        r#"
        INSERT INTO feed_tasks (id, feed_url, next_scan, created, updated)
        VALUES (?, ?, ?, ?, ?)
        ON CONFLICT(feed_url) DO UPDATE SET next_scan = excluded.next_scan, updated = excluded.updated
        RETURNING *
        "#,
    )
    .bind(id.0)
    .bind(feed_url)
    .bind(now)
    .bind(now)
    .bind(now)
    .fetch_one(executor)
    .await
}

/// Every `FeedTask` not deactivated (`next_scan IS NOT NULL`), the set the
/// drain mode feeds into the feed queue.
pub async fn get_scheduled_feed_tasks<'e, E>(executor: E) -> Result<Vec<FeedTask>, sqlx::Error>
where
    E: sqlx::Executor<'e, Database = Sqlite>,
{
    sqlx::query_as::<_, FeedTask>(
        r#"SELECT * FROM feed_tasks WHERE next_scan IS NOT NULL ORDER BY next_scan"#,
    )
    .fetch_all(executor)
    .await
}

/// Nulls `next_scan`: called when the feed queue worker dequeues a task,
/// since there is no in-core scheduler to requeue it.
pub async fn deactivate_feed_task<'e, E>(executor: E, id: &FeedTaskId) -> Result<(), sqlx::Error>
where
    E: sqlx::Executor<'e, Database = Sqlite>,
{
    sqlx::query(
        r#"UPDATE feed_tasks SET next_scan = NULL, updated = ? WHERE id = ?"#,
    )
    .bind(now())
    .bind(&id.0)
    .execute(executor)
    .await?;
    Ok(())
}

pub async fn mark_feed_scan_started<'e, E>(executor: E, id: &FeedTaskId) -> Result<(), sqlx::Error>
where
    E: sqlx::Executor<'e, Database = Sqlite>,
{
    sqlx::query(r#"UPDATE feed_tasks SET last_scan_started = ?, updated = ? WHERE id = ?"#)
        .bind(now())
        .bind(now())
        .bind(&id.0)
        .execute(executor)
        .await?;
    Ok(())
}

pub async fn mark_feed_scan_completed<'e, E>(
    executor: E,
    id: &FeedTaskId,
) -> Result<(), sqlx::Error>
where
    E: sqlx::Executor<'e, Database = Sqlite>,
{
    sqlx::query(r#"UPDATE feed_tasks SET last_scan_completed = ?, updated = ? WHERE id = ?"#)
        .bind(now())
        .bind(now())
        .bind(&id.0)
        .execute(executor)
        .await?;
    Ok(())
}

/// Single `WHERE url IN (...)` dedup query: returns the subset of `urls`
/// already present as `Article` rows.
pub async fn get_existing_article_urls<'e, E>(
    executor: E,
    urls: &[String],
) -> Result<Vec<String>, sqlx::Error>
where
    E: sqlx::Executor<'e, Database = Sqlite>,
{
    if urls.is_empty() {
        return Ok(vec![]);
    }

    let placeholders = urls.iter().map(|_| "?").collect::<Vec<_>>().join(", ");
    let query = format!("SELECT url FROM articles WHERE url IN ({placeholders})");

    let mut q = sqlx::query_scalar(&query);
    for url in urls {
        q = q.bind(url);
    }

    q.fetch_all(executor).await
}

pub async fn insert_article<'e, E>(
    executor: E,
    feed_guid: Option<&str>,
    url: &str,
) -> Result<Article, sqlx::Error>
where
    E: sqlx::Executor<'e, Database = Sqlite>,
{
    let id = ArticleId::default();
    let now = now();

    sqlx::query_as::<_, Article>(
        r#"
        INSERT INTO articles (id, feed_guid, url, created, updated)
        VALUES (?, ?, ?, ?, ?)
        RETURNING *
        "#,
    )
    .bind(id.0)
    .bind(feed_guid)
    .bind(url)
    .bind(now)
    .bind(now)
    .fetch_one(executor)
    .await
}

pub async fn get_article<'e, E>(
    executor: E,
    id: &ArticleId,
) -> Result<Option<Article>, sqlx::Error>
where
    E: sqlx::Executor<'e, Database = Sqlite>,
{
    sqlx::query_as::<_, Article>(r#"SELECT * FROM articles WHERE id = ?"#)
        .bind(&id.0)
        .fetch_optional(executor)
        .await
}

pub async fn mark_article_page_scan_completed<'e, E>(
    executor: E,
    id: &ArticleId,
) -> Result<(), sqlx::Error>
where
    E: sqlx::Executor<'e, Database = Sqlite>,
{
    sqlx::query(r#"UPDATE articles SET page_scan_completed_at = ?, updated = ? WHERE id = ?"#)
        .bind(now())
        .bind(now())
        .bind(&id.0)
        .execute(executor)
        .await?;
    Ok(())
}

pub async fn insert_outbound_notification<'e, E>(
    executor: E,
    source_article_id: &ArticleId,
    target_url: &str,
    webmention_endpoint: Option<&str>,
    pingback_endpoint: Option<&str>,
) -> Result<OutboundNotification, sqlx::Error>
where
    E: sqlx::Executor<'e, Database = Sqlite>,
{
    let id = OutboundNotificationId::default();
    let now = now();

    sqlx::query_as::<_, OutboundNotification>(
        r#"
        INSERT INTO outbound_notifications
            (id, source_article_id, target_url, webmention_endpoint, pingback_endpoint, created, updated)
        VALUES (?, ?, ?, ?, ?, ?, ?)
        RETURNING *
        "#,
    )
    .bind(id.0)
    .bind(&source_article_id.0)
    .bind(target_url)
    .bind(webmention_endpoint)
    .bind(pingback_endpoint)
    .bind(now)
    .bind(now)
    .fetch_one(executor)
    .await
}

pub async fn get_notification_with_article<'e, E>(
    executor: E,
    id: &OutboundNotificationId,
) -> Result<Option<NotificationWithArticle>, sqlx::Error>
where
    E: sqlx::Executor<'e, Database = Sqlite>,
{
    let row = sqlx::query(
        r#"
        SELECT n.*, a.url AS article_url
        FROM outbound_notifications n
        INNER JOIN articles a ON a.id = n.source_article_id
        WHERE n.id = ?
        "#,
    )
    .bind(&id.0)
    .fetch_optional(executor)
    .await?;

    let Some(row) = row else {
        return Ok(None);
    };

    Ok(Some(NotificationWithArticle {
        notification: OutboundNotification::from_row(&row)?,
        article_url: row.try_get("article_url")?,
    }))
}

/// A notification is terminal once it has succeeded; the core does not
/// implement a retry scheduler, so any non-null `succeeded_at` is terminal.
pub fn is_terminal(notification: &OutboundNotification) -> bool {
    notification.succeeded_at.is_some()
}

pub async fn record_notification_attempt<'e, E>(
    executor: E,
    id: &OutboundNotificationId,
    succeeded: bool,
) -> Result<(), sqlx::Error>
where
    E: sqlx::Executor<'e, Database = Sqlite>,
{
    let now = now();

    if succeeded {
        sqlx::query(
            r#"
            UPDATE outbound_notifications
            SET num_attempts = num_attempts + 1, last_attempted_at = ?, succeeded_at = ?, updated = ?
            WHERE id = ?
            "#,
        )
        .bind(now)
        .bind(now)
        .bind(now)
        .bind(&id.0)
        .execute(executor)
        .await?;
    } else {
        sqlx::query(
            r#"
            UPDATE outbound_notifications
            SET num_attempts = num_attempts + 1, last_attempted_at = ?, updated = ?
            WHERE id = ?
            "#,
        )
        .bind(now)
        .bind(now)
        .bind(&id.0)
        .execute(executor)
        .await?;
    }

    Ok(())
}
