//! The three persistent work queues: feed scan -> article scan -> outbound
//! notification. Each stage is a single-consumer FIFO; `close()` enqueues an
//! exit sentinel and waits for the worker to drain everything enqueued
//! before it, matching the ordered-shutdown contract the orchestrator's
//! drain mode relies on.

use std::future::Future;

use sqlx::SqlitePool;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use url::Url;

use crate::capability;
use crate::db::models::{self, FeedTask};
use crate::db::{ReadOnlySession, ReadWriteSession};
use crate::domain::{ArticleId, OutboundNotificationId};
use crate::feed;
use crate::links;
use crate::sender::{self, MentionCandidate};

/// A legitimate item or the exit sentinel. Modelled as an enum rather than a
/// sentinel *value* so there is no risk of a real item colliding with it.
enum Message<T> {
    Item(T),
    Shutdown,
}

/// A handle that can enqueue into a running [`Queue`]. Cloning it does not
/// clone the worker; every clone feeds the same single consumer.
#[derive(Clone)]
pub struct QueueHandle<T> {
    sender: mpsc::UnboundedSender<Message<T>>,
}

impl<T> QueueHandle<T> {
    /// Non-blocking insert.
    pub fn enqueue(&self, item: T) {
        // The only way `send` fails is if the worker already exited (it
        // observed its own shutdown sentinel); there is nothing left to do
        // with the item in that case.
        let _ = self.sender.send(Message::Item(item));
    }
}

/// A FIFO queue with exactly one worker consuming it.
pub struct Queue<T> {
    handle: QueueHandle<T>,
    worker: JoinHandle<()>,
}

impl<T: Send + 'static> Queue<T> {
    /// Spawns the worker task. `process` is invoked once per enqueued item,
    /// in enqueue order; any error it logs internally, since a failing item
    /// must not stop the queue from draining the rest.
    fn spawn<F, Fut>(mut process: F) -> Self
    where
        F: FnMut(T) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send,
    {
        let (sender, mut receiver) = mpsc::unbounded_channel::<Message<T>>();

        let worker = tokio::spawn(async move {
            while let Some(message) = receiver.recv().await {
                match message {
                    Message::Item(item) => process(item).await,
                    Message::Shutdown => break,
                }
            }
        });

        Self {
            handle: QueueHandle { sender },
            worker,
        }
    }

    pub fn handle(&self) -> QueueHandle<T> {
        self.handle.clone()
    }

    pub fn enqueue(&self, item: T) {
        self.handle.enqueue(item);
    }

    /// Enqueues the exit sentinel and waits for the worker to observe it.
    /// Items enqueued before this call are guaranteed processed first.
    pub async fn close(self) {
        let _ = self.handle.sender.send(Message::Shutdown);
        let _ = self.worker.await;
    }
}

/// The three-stage pipeline: feed scan -> article scan -> outbound
/// notification. `dry_run` governs what happens once a target's
/// capabilities are known: notifications are always discovered and
/// persisted exactly the same way, but in dry-run mode the article stage
/// prints a per-target discovery line (mirroring the ad-hoc orchestrator
/// modes) instead of the notification stage ever calling
/// [`sender::send_mention`].
pub struct Pipeline {
    feed_queue: Queue<FeedTask>,
    article_queue: QueueHandle<ArticleId>,
    notification_queue: QueueHandle<OutboundNotificationId>,
    article_worker: JoinHandle<()>,
    notification_worker: JoinHandle<()>,
}

impl Pipeline {
    pub fn new(pool: SqlitePool, client: reqwest::Client, dry_run: bool) -> Self {
        let (notification_sender, mut notification_receiver) =
            mpsc::unbounded_channel::<Message<OutboundNotificationId>>();
        let notification_worker = {
            let pool = pool.clone();
            let client = client.clone();
            tokio::spawn(async move {
                while let Some(message) = notification_receiver.recv().await {
                    match message {
                        Message::Item(id) => {
                            if dry_run {
                                process_notification_dry_run(id).await;
                            } else {
                                process_notification_live(&pool, &client, id).await;
                            }
                        }
                        Message::Shutdown => break,
                    }
                }
            })
        };
        let notification_queue = QueueHandle {
            sender: notification_sender,
        };

        let (article_sender, mut article_receiver) =
            mpsc::unbounded_channel::<Message<ArticleId>>();
        let article_worker = {
            let pool = pool.clone();
            let client = client.clone();
            let notification_queue = notification_queue.clone();
            tokio::spawn(async move {
                while let Some(message) = article_receiver.recv().await {
                    match message {
                        Message::Item(id) => {
                            process_article(&pool, &client, &notification_queue, id, dry_run).await
                        }
                        Message::Shutdown => break,
                    }
                }
            })
        };
        let article_queue = QueueHandle {
            sender: article_sender,
        };

        let feed_queue = {
            let pool = pool.clone();
            let article_queue = article_queue.clone();
            Queue::spawn(move |task: FeedTask| {
                let pool = pool.clone();
                let client = client.clone();
                let article_queue = article_queue.clone();
                async move { process_feed_task(&pool, &client, &article_queue, task).await }
            })
        };

        Self {
            feed_queue,
            article_queue,
            notification_queue,
            article_worker,
            notification_worker,
        }
    }

    pub fn enqueue_feed_task(&self, task: FeedTask) {
        self.feed_queue.enqueue(task);
    }

    /// Ordered drain: close the feed queue, then the article queue, then the
    /// notification queue. Each stage's enqueues into the next are flushed
    /// before that stage's own close completes.
    pub async fn shutdown(self) {
        self.feed_queue.close().await;

        let _ = self.article_queue.sender.send(Message::Shutdown);
        let _ = self.article_worker.await;

        let _ = self.notification_queue.sender.send(Message::Shutdown);
        let _ = self.notification_worker.await;
    }
}

fn print_discovery(link: &Url, capabilities: &capability::MentionCapabilities) {
    if capabilities.webmention_url.is_some() {
        println!("🥕 {link}");
    } else if capabilities.pingback_url.is_some() {
        println!("🥬 {link}");
    }
}

#[tracing::instrument(name = "Process feed task", skip(pool, client, article_queue, task), fields(feed_url = %task.feed_url))]
async fn process_feed_task(
    pool: &SqlitePool,
    client: &reqwest::Client,
    article_queue: &QueueHandle<ArticleId>,
    task: FeedTask,
) {
    let mut rw = match ReadWriteSession::begin(pool).await {
        Ok(session) => session,
        Err(err) => {
            tracing::error!(%err, "failed to begin session for feed task");
            return;
        }
    };

    if let Err(err) = rw.mark_feed_scan_started(&task.id).await {
        tracing::error!(%err, "failed to mark feed scan started");
    }

    // No in-core scheduler exists to requeue this task, so it is
    // deactivated as soon as it is dequeued.
    if let Err(err) = rw.deactivate_feed_task(&task.id).await {
        tracing::error!(%err, "failed to deactivate feed task");
    }

    let feed_url = match Url::parse(&task.feed_url) {
        Ok(url) => url,
        Err(err) => {
            tracing::error!(%err, "feed task has an unparsable url");
            let _ = rw.rollback().await;
            return;
        }
    };

    let fetched = match feed::feed_from_url(client, &feed_url).await {
        Ok(Some(feed)) => feed,
        Ok(None) => {
            tracing::warn!("feed fetch or parse failed, skipping this scan");
            let _ = rw.commit().await;
            return;
        }
        Err(err) => {
            tracing::error!(%err, "feed fetch error");
            let _ = rw.rollback().await;
            return;
        }
    };

    let entries: Vec<_> = feed::link_generator_from_feed(&fetched).collect();
    let urls: Vec<String> = entries.iter().map(|e| e.absolute_url.to_string()).collect();

    let existing = match rw.get_existing_article_urls(&urls).await {
        Ok(existing) => existing,
        Err(err) => {
            tracing::error!(%err, "dedup query failed");
            let _ = rw.rollback().await;
            return;
        }
    };
    let existing: std::collections::HashSet<String> = existing.into_iter().collect();

    for entry in entries {
        let url = entry.absolute_url.to_string();
        if existing.contains(&url) {
            continue;
        }

        match rw.insert_article(entry.guid.as_deref(), &url).await {
            Ok(article) => article_queue.enqueue(article.id),
            Err(err) => tracing::error!(%err, url, "failed to insert article"),
        }
    }

    if let Err(err) = rw.mark_feed_scan_completed(&task.id).await {
        tracing::error!(%err, "failed to mark feed scan completed");
    }

    if let Err(err) = rw.commit().await {
        tracing::error!(%err, "failed to commit feed task processing");
    }
}

#[tracing::instrument(name = "Process article", skip(pool, client, notification_queue, article_id), fields(article_id = %article_id))]
async fn process_article(
    pool: &SqlitePool,
    client: &reqwest::Client,
    notification_queue: &QueueHandle<OutboundNotificationId>,
    article_id: ArticleId,
    dry_run: bool,
) {
    let article = {
        let mut ro = match ReadOnlySession::begin(pool).await {
            Ok(session) => session,
            Err(err) => {
                tracing::error!(%err, "failed to begin read-only session for article");
                return;
            }
        };

        let article = match ro.get_article(&article_id).await {
            Ok(article) => article,
            Err(err) => {
                tracing::error!(%err, "failed to load article");
                let _ = ro.close().await;
                return;
            }
        };

        let _ = ro.close().await;

        match article {
            Some(article) => article,
            None => {
                tracing::warn!("article vanished before it could be scanned");
                return;
            }
        }
    };

    let article_url = match Url::parse(&article.url) {
        Ok(url) => url,
        Err(err) => {
            tracing::error!(%err, "article has an unparsable url");
            return;
        }
    };

    let links = match links::parse_page_find_links(client, &article_url).await {
        Ok(links) => links,
        Err(err) => {
            tracing::warn!(%err, "failed to extract links from article body");
            vec![]
        }
    };

    let mut rw = match ReadWriteSession::begin(pool).await {
        Ok(session) => session,
        Err(err) => {
            tracing::error!(%err, "failed to begin read-write session for article");
            return;
        }
    };

    for link in links {
        match capability::fetch_page_check_mention_capabilities(client, &link).await {
            Ok(Some(capabilities)) => {
                if dry_run {
                    print_discovery(&link, &capabilities);
                }

                match rw
                    .insert_outbound_notification(
                        &article.id,
                        link.as_str(),
                        capabilities.webmention_url.as_deref(),
                        capabilities.pingback_url.as_deref(),
                    )
                    .await
                {
                    Ok(notification) => notification_queue.enqueue(notification.id),
                    Err(err) => tracing::error!(%err, target = %link, "failed to insert outbound notification"),
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

    if let Err(err) = rw.mark_article_page_scan_completed(&article.id).await {
        tracing::error!(%err, "failed to mark article page scan completed");
    }

    if let Err(err) = rw.commit().await {
        tracing::error!(%err, "failed to commit article processing");
    }
}

#[tracing::instrument(name = "Send notification", skip(pool, client, id), fields(notification_id = %id))]
async fn process_notification_live(pool: &SqlitePool, client: &reqwest::Client, id: OutboundNotificationId) {
    let mut rw = match ReadWriteSession::begin(pool).await {
        Ok(session) => session,
        Err(err) => {
            tracing::error!(%err, "failed to begin session for notification");
            return;
        }
    };

    let with_article = match rw.get_notification_with_article(&id).await {
        Ok(Some(row)) => row,
        Ok(None) => {
            let _ = rw.rollback().await;
            return;
        }
        Err(err) => {
            tracing::error!(%err, "failed to load notification");
            let _ = rw.rollback().await;
            return;
        }
    };

    if models::is_terminal(&with_article.notification) {
        let _ = rw.rollback().await;
        return;
    }

    let candidate = MentionCandidate {
        mentioner_url: with_article.article_url.clone(),
        mentioned_url: with_article.notification.target_url.clone(),
        capabilities: capability::MentionCapabilities {
            webmention_url: with_article.notification.webmention_endpoint.clone(),
            pingback_url: with_article.notification.pingback_endpoint.clone(),
        },
    };

    let result = sender::send_mention(client, &candidate).await;
    if let Err(err) = &result {
        tracing::warn!(%err, target = %candidate.mentioned_url, "mention send failed");
    }

    if let Err(err) = rw.record_notification_attempt(&id, result.is_ok()).await {
        tracing::error!(%err, "failed to record notification attempt");
    }

    if let Err(err) = rw.commit().await {
        tracing::error!(%err, "failed to commit notification processing");
    }
}

/// The notification stage's dry-run substitute for [`process_notification_live`]:
/// a `NoopQueue` consumer. The discovery line for this target was already
/// printed by the article stage, which is also where the notification row
/// was inserted; there is nothing left to do with it in dry-run mode, and
/// `num_attempts`/`succeeded_at` are never touched.
async fn process_notification_dry_run(_id: OutboundNotificationId) {}
