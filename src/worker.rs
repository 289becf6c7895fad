//! The delivery worker: drains due schedule items and dispatches them
//! through the transport, one at a time.

use crate::config::Config;
use crate::events::{EventBus, QueueEvent};
use crate::media::{MediaStore, ResolvedMedia, categorize};
use crate::retry::is_retryable;
use crate::schema::{ScheduleItem, ScheduleStatus};
use crate::storage::ScheduleStore;
use crate::transport::{ErrorKind, MediaContent, OutboundPayload, Transport};
use chrono::Utc;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::time::sleep;
use tracing::{Instrument, debug, info, info_span, warn};

/// Counters for one worker run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    /// Items taken from the due scan.
    pub processed: usize,
    /// Items delivered.
    pub sent: usize,
    /// Items that reached terminal failure.
    pub failed: usize,
    /// Items left pending for another attempt.
    pub retried: usize,
}

/// Why a run did or did not process items.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// The run drained the due scan (possibly zero items).
    Completed(RunSummary),
    /// The transport has no live session; nothing was touched.
    NotConnected,
    /// Another run holds the single-flight guard; nothing was touched.
    AlreadyRunning,
    /// The due scan failed; nothing was touched.
    StoreUnavailable,
}

enum ItemOutcome {
    Sent { local_media: Option<PathBuf> },
    Failed(String),
    Retry(i32),
    ConnectionLost,
}

/// Single-flight dispatcher over a store, a transport, and a media store.
///
/// At most one run is active per worker instance; concurrent invocations
/// return [`RunOutcome::AlreadyRunning`] without touching the queue.
pub struct DeliveryWorker<S, T> {
    store: Arc<S>,
    transport: Arc<T>,
    media: MediaStore,
    events: EventBus,
    config: Config,
    run_guard: Mutex<()>,
}

impl<S: ScheduleStore, T: Transport> DeliveryWorker<S, T> {
    /// Build a worker. `events` is shared with the other schedulers.
    pub fn new(
        store: Arc<S>,
        transport: Arc<T>,
        media: MediaStore,
        events: EventBus,
        config: Config,
    ) -> Self {
        Self {
            store,
            transport,
            media,
            events,
            config,
            run_guard: Mutex::new(()),
        }
    }

    /// Execute one delivery run. Safe to call on-demand between ticks.
    pub async fn run_once(&self) -> RunOutcome {
        if !self.transport.connected() {
            debug!("Transport not connected, skipping delivery run");
            return RunOutcome::NotConnected;
        }

        // Guard drop releases the token on every exit path below.
        let Ok(_guard) = self.run_guard.try_lock() else {
            debug!("Delivery run already in progress, skipping");
            return RunOutcome::AlreadyRunning;
        };

        let due = match self.store.get_due_schedule_items().await {
            Ok(due) => due,
            Err(error) => {
                warn!(%error, "Failed to fetch due schedule items, aborting run");
                return RunOutcome::StoreUnavailable;
            }
        };

        let total = due.len();
        let mut summary = RunSummary::default();

        for (index, item) in due.into_iter().enumerate() {
            if !self.transport.connected() {
                warn!(
                    remaining = total - index,
                    "Transport connection lost, leaving remaining items pending"
                );
                break;
            }

            let span = info_span!("delivery", item.id = %item.id, item.recipient = %item.recipient);
            let outcome = self.process_item(&item).instrument(span).await;
            summary.processed += 1;

            match outcome {
                ItemOutcome::Sent { local_media } => {
                    summary.sent += 1;
                    self.events.emit(QueueEvent::Sent { id: item.id });
                    if let Some(path) = local_media {
                        self.media.delete_after_send(&path).await;
                    }
                    // Respect transport rate limits between sends.
                    if index + 1 < total && !self.config.per_message_delay.is_zero() {
                        sleep(self.config.per_message_delay).await;
                    }
                }
                ItemOutcome::Failed(error) => {
                    summary.failed += 1;
                    self.events.emit(QueueEvent::Failed { id: item.id, error });
                }
                ItemOutcome::Retry(attempt) => {
                    summary.retried += 1;
                    self.events.emit(QueueEvent::RetryPending { id: item.id, attempt });
                }
                ItemOutcome::ConnectionLost => {
                    summary.processed -= 1;
                    warn!(
                        remaining = total - index,
                        "Transport dropped mid-send, leaving remaining items pending"
                    );
                    break;
                }
            }
        }

        match self.store.pending_count().await {
            Ok(count) => self.events.emit(QueueEvent::PendingCount { count }),
            Err(error) => debug!(%error, "Failed to read pending count after run"),
        }

        if summary.processed > 0 {
            info!(
                processed = summary.processed,
                sent = summary.sent,
                failed = summary.failed,
                retried = summary.retried,
                "Delivery run finished"
            );
        }

        RunOutcome::Completed(summary)
    }

    /// Handle one item end to end. Terminal outcomes are written to the
    /// store before returning; `ConnectionLost` leaves the row untouched.
    async fn process_item(&self, item: &ScheduleItem) -> ItemOutcome {
        let recipient = match normalize_recipient(&item.recipient) {
            Ok(recipient) => recipient,
            Err(error) => return self.mark_failed(item.id, &error).await,
        };

        let (payload, local_media) = match self.build_payload(item).await {
            Ok(built) => built,
            Err(error) => return self.mark_failed(item.id, &error).await,
        };

        debug!("Dispatching schedule item");
        match self.transport.send(&recipient, payload).await {
            Ok(()) => {
                let sent_at = Utc::now();
                if let Err(error) = self
                    .store
                    .update_schedule_status(item.id, ScheduleStatus::Sent, None, Some(sent_at))
                    .await
                {
                    // The send went out; the worst case on restart is a
                    // duplicate, which at-least-once delivery permits.
                    warn!(%error, "Failed to record successful send");
                }
                ItemOutcome::Sent { local_media }
            }
            Err(error) if error.kind == ErrorKind::NotConnected => ItemOutcome::ConnectionLost,
            Err(error) if is_retryable(error.kind) => {
                match self
                    .store
                    .increment_retry_count(item.id, self.config.max_retries)
                    .await
                {
                    Ok(decision) if decision.should_retry => {
                        warn!(
                            %error,
                            attempt = decision.retry_count,
                            "Transient send failure, will retry on a later tick"
                        );
                        ItemOutcome::Retry(decision.retry_count)
                    }
                    Ok(_) => {
                        let message = format!("Max retries exceeded: {error}");
                        self.mark_failed(item.id, &message).await
                    }
                    Err(store_error) => {
                        warn!(%store_error, "Failed to increment retry count");
                        ItemOutcome::Retry(item.retry_count + 1)
                    }
                }
            }
            Err(error) => self.mark_failed(item.id, &error.to_string()).await,
        }
    }

    /// Resolve an item's content into an outbound payload. Returns the
    /// local media path alongside, for post-send deletion.
    async fn build_payload(
        &self,
        item: &ScheduleItem,
    ) -> Result<(OutboundPayload, Option<PathBuf>), String> {
        if item.has_media() {
            let resolved = self
                .media
                .resolve(item)
                .ok_or_else(|| "No message content".to_owned())?;

            let (content, local_path) = match resolved {
                ResolvedMedia::Remote(url) => (MediaContent::Url(url), None),
                ResolvedMedia::Local(path) => match self.media.load(&path).await {
                    Ok(bytes) => (MediaContent::Bytes(bytes), Some(path)),
                    // Load failures are terminal, never retried.
                    Err(error) => return Err(error.to_string()),
                },
            };

            let payload = OutboundPayload::Media {
                kind: categorize(item.media_type.as_deref()),
                content,
                caption: item.caption.clone().filter(|caption| !caption.is_empty()),
                mimetype: item.media_type.clone(),
                file_name: item
                    .media_url
                    .as_deref()
                    .and_then(|url| Path::new(url).file_name())
                    .map(|name| name.to_string_lossy().into_owned()),
            };
            return Ok((payload, local_path));
        }

        match item.caption.as_deref() {
            Some(body) if !body.is_empty() => {
                Ok((OutboundPayload::Text { body: body.to_owned() }, None))
            }
            _ => Err("No message content".to_owned()),
        }
    }

    async fn mark_failed(&self, id: i64, message: &str) -> ItemOutcome {
        if let Err(error) = self
            .store
            .update_schedule_status(id, ScheduleStatus::Failed, Some(message), None)
            .await
        {
            warn!(%error, "Failed to record terminal failure");
        }
        ItemOutcome::Failed(message.to_owned())
    }
}

/// Resolve the wire-level recipient identifier.
///
/// Group identifiers pass through verbatim. Phone-like recipients are
/// reduced to their digits (dropping `+` and separators) and rejected when
/// fewer than ten remain; an existing user-jid domain is re-attached.
pub fn normalize_recipient(recipient: &str) -> Result<String, String> {
    if recipient.ends_with("@g.us") {
        return Ok(recipient.to_owned());
    }

    let (user, domain) = match recipient.split_once('@') {
        Some((user, domain)) => (user, Some(domain)),
        None => (recipient, None),
    };

    let digits: String = user.chars().filter(char::is_ascii_digit).collect();
    if digits.len() < 10 {
        return Err("Invalid phone number: too short".to_owned());
    }

    Ok(match domain {
        Some(domain) => format!("{digits}@{domain}"),
        None => digits,
    })
}
