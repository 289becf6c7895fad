//! Wires the worker, media sweep, and birthday scheduler into long-lived
//! tasks sharing one transport handle.

use crate::birthday::{BirthdayScheduler, BirthdaySource, ComposeMessage, TemplateComposer};
use crate::config::Config;
use crate::errors::EnqueueError;
use crate::events::{EventBus, QueueEvent};
use crate::media::{MediaStore, active_basenames};
use crate::schema::{BirthdayEntry, NewScheduleItem, ScheduleItem};
use crate::storage::ScheduleStore;
use crate::transport::Transport;
use crate::worker::DeliveryWorker;
use chrono::Utc;
use futures_util::future::join_all;
use rand::Rng;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{Instrument, info, info_span, warn};

/// Placeholder birthday source for runners without a calendar.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoBirthdays;

impl BirthdaySource for NoBirthdays {
    async fn birthdays(&self) -> anyhow::Result<Vec<BirthdayEntry>> {
        Ok(Vec::new())
    }
}

/// Generate a correlation id for a batch of schedule items.
pub fn generate_batch_id(prefix: &str) -> String {
    let timestamp = Utc::now().timestamp_millis();
    let suffix: u32 = rand::thread_rng().gen_range(0..=0xFFFF);
    format!("{prefix}-{timestamp}-{suffix:04x}")
}

/// Insert a multi-recipient batch under one generated batch id and emit a
/// scheduling confirmation.
pub async fn schedule_batch<S: ScheduleStore>(
    store: &S,
    events: &EventBus,
    items: &[NewScheduleItem],
) -> Result<Vec<ScheduleItem>, EnqueueError> {
    let batch_id = generate_batch_id("batch");
    let rows = store.add_schedule_items(&batch_id, items).await?;
    events.emit(QueueEvent::Scheduled {
        batch_id,
        count: rows.len(),
    });
    Ok(rows)
}

/// Owns the pieces of the delivery system and starts their recurring tasks.
pub struct Runner<S, T, B = NoBirthdays, C = TemplateComposer> {
    store: Arc<S>,
    transport: Arc<T>,
    events: EventBus,
    config: Config,
    birthday_source: Option<Arc<B>>,
    composer: Arc<C>,
}

impl<S: ScheduleStore, T: Transport> Runner<S, T> {
    /// Create a runner with the default template composer and no birthday
    /// calendar.
    pub fn new(store: S, transport: T, config: Config) -> Self {
        Self {
            store: Arc::new(store),
            transport: Arc::new(transport),
            events: EventBus::new(),
            config,
            birthday_source: None,
            composer: Arc::new(TemplateComposer),
        }
    }
}

impl<S, T, B, C> Runner<S, T, B, C>
where
    S: ScheduleStore,
    T: Transport,
    B: BirthdaySource,
    C: ComposeMessage,
{
    /// Override the uploads directory from [`Config`].
    pub fn uploads_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.uploads_dir = dir.into();
        self
    }

    /// Attach a birthday calendar; its daily check is started by
    /// [`Runner::start`].
    pub fn birthdays<B2: BirthdaySource>(self, source: B2) -> Runner<S, T, B2, C> {
        Runner {
            store: self.store,
            transport: self.transport,
            events: self.events,
            config: self.config,
            birthday_source: Some(Arc::new(source)),
            composer: self.composer,
        }
    }

    /// Replace the template fallback with a richer composition capability.
    pub fn composer<C2: ComposeMessage>(self, composer: C2) -> Runner<S, T, B, C2> {
        Runner {
            store: self.store,
            transport: self.transport,
            events: self.events,
            config: self.config,
            birthday_source: self.birthday_source,
            composer: Arc::new(composer),
        }
    }

    /// The shared event bus; subscribe before `start` to observe startup
    /// activity.
    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// Schedule a batch through this runner's store and event bus.
    pub async fn schedule_batch(
        &self,
        items: &[NewScheduleItem],
    ) -> Result<Vec<ScheduleItem>, EnqueueError> {
        schedule_batch(self.store.as_ref(), &self.events, items).await
    }

    /// Start the delivery tick, the media sweep, and (when a calendar is
    /// attached) the birthday check. The tasks run until process exit.
    pub fn start(&self) -> RunHandle {
        let mut handles = Vec::new();

        let worker = Arc::new(DeliveryWorker::new(
            self.store.clone(),
            self.transport.clone(),
            MediaStore::new(self.config.uploads_dir.clone()),
            self.events.clone(),
            self.config.clone(),
        ));
        let poll_interval = self.config.poll_interval;
        let jitter = self.config.jitter;
        info!(?poll_interval, "Starting delivery worker…");
        let span = info_span!("delivery_worker");
        handles.push(tokio::spawn(
            async move {
                loop {
                    worker.run_once().await;
                    sleep(sleep_with_jitter(poll_interval, jitter)).await;
                }
            }
            .instrument(span),
        ));

        let store = self.store.clone();
        let media = MediaStore::new(self.config.uploads_dir.clone());
        let sweep_interval = self.config.sweep_interval;
        let sweep_max_age = self.config.sweep_max_age;
        info!(?sweep_interval, "Starting media sweep…");
        let span = info_span!("media_sweep");
        handles.push(tokio::spawn(
            async move {
                loop {
                    sweep_once(store.as_ref(), &media, sweep_max_age).await;
                    sleep(sweep_interval).await;
                }
            }
            .instrument(span),
        ));

        if let Some(source) = self.birthday_source.clone() {
            let scheduler = BirthdayScheduler::new(
                self.store.clone(),
                source,
                self.composer.clone(),
                self.events.clone(),
                self.config.clone(),
            );
            info!(fire_at = %self.config.birthday_fire_at, "Starting birthday scheduler…");
            let span = info_span!("birthday_scheduler");
            handles.push(tokio::spawn(
                async move { scheduler.run().await }.instrument(span),
            ));
        }

        RunHandle { handles }
    }
}

/// Reconcile the uploads directory against the pending schedule once.
async fn sweep_once<S: ScheduleStore>(store: &S, media: &MediaStore, max_age: Duration) {
    let active = match store.get_pending_schedule().await {
        Ok(pending) => active_basenames(pending.iter()),
        Err(error) => {
            // Without the pending set we cannot tell orphans apart.
            warn!(%error, "Skipping media sweep, pending schedule unavailable");
            return;
        }
    };

    match media.sweep(&active, max_age).await {
        Ok(0) => {}
        Ok(removed) => info!(removed, "Media sweep removed orphaned files"),
        Err(error) => warn!(%error, "Media sweep failed"),
    }
}

fn sleep_with_jitter(interval: Duration, jitter: Duration) -> Duration {
    if jitter.is_zero() {
        return interval;
    }
    let jitter_millis = u64::try_from(jitter.as_millis()).unwrap_or(u64::MAX);
    let random_jitter = rand::thread_rng().gen_range(0..=jitter_millis);
    interval + Duration::from_millis(random_jitter)
}

/// Handle to the running delivery system.
#[derive(Debug)]
pub struct RunHandle {
    handles: Vec<JoinHandle<()>>,
}

impl RunHandle {
    /// Wait for the recurring tasks to stop. They only stop at process
    /// teardown, so this effectively parks the caller.
    pub async fn wait_for_shutdown(self) {
        join_all(self.handles).await.into_iter().for_each(|result| {
            if let Err(error) = result {
                warn!(%error, "Background task panicked");
            }
        });
    }
}
