#![allow(dead_code)]

use chrono::{DateTime, Utc};
use sendq::{
    Config, EnqueueError, NewScheduleItem, OutboundPayload, RetryDecision, ScheduleItem,
    ScheduleStatus, ScheduleStore, Transport, TransportError,
};
use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Barrier;

/// In-memory [`ScheduleStore`] double.
#[derive(Default)]
pub struct MemoryStore {
    items: Mutex<Vec<ScheduleItem>>,
    next_id: AtomicI64,
    /// When set, due-item reads fail, simulating an unavailable store.
    pub fail_reads: AtomicBool,
    /// Mutating store calls (status updates and retry increments).
    pub writes: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a pre-built item, returning its id.
    pub fn insert(&self, mut item: ScheduleItem) -> i64 {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        item.id = id;
        self.items.lock().unwrap().push(item);
        id
    }

    pub fn get(&self, id: i64) -> Option<ScheduleItem> {
        self.items
            .lock()
            .unwrap()
            .iter()
            .find(|item| item.id == id)
            .cloned()
    }

    pub fn all(&self) -> Vec<ScheduleItem> {
        self.items.lock().unwrap().clone()
    }
}

impl ScheduleStore for MemoryStore {
    async fn add_schedule_items(
        &self,
        batch_id: &str,
        items: &[NewScheduleItem],
    ) -> Result<Vec<ScheduleItem>, EnqueueError> {
        if items.is_empty() {
            return Err(EnqueueError::EmptyBatch);
        }
        let mut inserted = Vec::with_capacity(items.len());
        for item in items {
            let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
            let row = ScheduleItem {
                id,
                batch_id: batch_id.to_owned(),
                recipient: item.recipient.clone(),
                caption: item.caption.clone(),
                media_url: item.media_url.clone(),
                media_type: item.media_type.clone(),
                send_at: item.send_at,
                status: ScheduleStatus::Pending,
                error: None,
                retry_count: 0,
                sent_at: None,
                created_at: Utc::now(),
            };
            self.items.lock().unwrap().push(row.clone());
            inserted.push(row);
        }
        Ok(inserted)
    }

    async fn get_pending_schedule(&self) -> Result<Vec<ScheduleItem>, sqlx::Error> {
        Ok(self
            .items
            .lock()
            .unwrap()
            .iter()
            .filter(|item| item.status == ScheduleStatus::Pending)
            .cloned()
            .collect())
    }

    async fn get_due_schedule_items(&self) -> Result<Vec<ScheduleItem>, sqlx::Error> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(sqlx::Error::PoolClosed);
        }
        let now = Utc::now();
        Ok(self
            .items
            .lock()
            .unwrap()
            .iter()
            .filter(|item| item.status == ScheduleStatus::Pending && item.send_at <= now)
            .cloned()
            .collect())
    }

    async fn update_schedule_status(
        &self,
        id: i64,
        status: ScheduleStatus,
        error: Option<&str>,
        sent_at: Option<DateTime<Utc>>,
    ) -> Result<(), sqlx::Error> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        let mut items = self.items.lock().unwrap();
        if let Some(item) = items.iter_mut().find(|item| item.id == id) {
            item.status = status;
            item.error = error.map(ToOwned::to_owned);
            item.sent_at = sent_at;
        }
        Ok(())
    }

    async fn increment_retry_count(
        &self,
        id: i64,
        max_retries: i32,
    ) -> Result<RetryDecision, sqlx::Error> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        let mut items = self.items.lock().unwrap();
        let item = items
            .iter_mut()
            .find(|item| item.id == id)
            .ok_or(sqlx::Error::RowNotFound)?;
        item.retry_count += 1;
        Ok(RetryDecision {
            should_retry: item.retry_count <= max_retries,
            retry_count: item.retry_count,
            next_retry_at: Utc::now(),
        })
    }

    async fn clear_finished_schedule(&self) -> Result<u64, sqlx::Error> {
        let mut items = self.items.lock().unwrap();
        let before = items.len();
        items.retain(|item| !item.status.is_terminal());
        Ok((before - items.len()) as u64)
    }

    async fn pending_count(&self) -> Result<i64, sqlx::Error> {
        let items = self.items.lock().unwrap();
        Ok(items
            .iter()
            .filter(|item| item.status == ScheduleStatus::Pending)
            .count() as i64)
    }
}

/// Scripted [`Transport`] double. Sends succeed unless a failure script is
/// queued; each send consumes one script entry.
#[derive(Default)]
pub struct MockTransport {
    connected: AtomicBool,
    script: Mutex<VecDeque<Result<(), TransportError>>>,
    pub sends: Mutex<Vec<(String, OutboundPayload)>>,
    /// Flip `connected` to false once this many sends have completed.
    pub drop_connection_after: AtomicUsize,
    /// When set, `send` rendezvouses on the first barrier and then blocks
    /// on the second, keeping a run in flight for as long as a test needs.
    pub gate: Mutex<Option<(Arc<Barrier>, Arc<Barrier>)>>,
}

impl MockTransport {
    pub fn new() -> Self {
        let transport = Self::default();
        transport.connected.store(true, Ordering::SeqCst);
        transport
            .drop_connection_after
            .store(usize::MAX, Ordering::SeqCst);
        transport
    }

    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    /// Queue failures for upcoming sends, oldest first.
    pub fn fail_next(&self, errors: impl IntoIterator<Item = TransportError>) {
        let mut script = self.script.lock().unwrap();
        script.extend(errors.into_iter().map(Err));
    }

    pub fn send_count(&self) -> usize {
        self.sends.lock().unwrap().len()
    }
}

impl Transport for MockTransport {
    fn connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn send(
        &self,
        recipient: &str,
        payload: OutboundPayload,
    ) -> Result<(), TransportError> {
        let gate = self.gate.lock().unwrap().clone();
        if let Some((entered, release)) = gate {
            entered.wait().await;
            release.wait().await;
        }

        let scripted = self.script.lock().unwrap().pop_front();
        if let Some(result) = scripted {
            result?;
        }

        let mut sends = self.sends.lock().unwrap();
        sends.push((recipient.to_owned(), payload));
        if sends.len() >= self.drop_connection_after.load(Ordering::SeqCst) {
            self.connected.store(false, Ordering::SeqCst);
        }
        Ok(())
    }
}

/// A pending item due `seconds_ago` seconds in the past.
pub fn due_item(recipient: &str, caption: Option<&str>, seconds_ago: i64) -> ScheduleItem {
    ScheduleItem {
        id: 0,
        batch_id: "test-batch".to_owned(),
        recipient: recipient.to_owned(),
        caption: caption.map(ToOwned::to_owned),
        media_url: None,
        media_type: None,
        send_at: Utc::now() - chrono::Duration::seconds(seconds_ago),
        status: ScheduleStatus::Pending,
        error: None,
        retry_count: 0,
        sent_at: None,
        created_at: Utc::now(),
    }
}

/// Test configuration: no inter-message delay, no jitter.
pub fn test_config(uploads_dir: &std::path::Path) -> Config {
    Config {
        per_message_delay: std::time::Duration::ZERO,
        jitter: std::time::Duration::ZERO,
        uploads_dir: uploads_dir.to_owned(),
        ..Config::default()
    }
}
