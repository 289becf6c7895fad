//! Daily birthday trigger: one day ahead of each matching calendar entry,
//! enqueue a greeting due at local midnight of the birthday itself.

use crate::config::Config;
use crate::errors::EnqueueError;
use crate::events::{EventBus, QueueEvent};
use crate::schema::{BirthdayEntry, NewScheduleItem, ScheduleItem};
use crate::storage::ScheduleStore;
use chrono::{DateTime, Datelike, Days, Local, NaiveDate, NaiveTime, TimeZone, Utc};
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Batch-id prefix shared by all items created from the birthday trigger.
const BIRTHDAY_BATCH_PREFIX: &str = "birthday";

/// Read-only source of birthday calendar entries.
pub trait BirthdaySource: Send + Sync + 'static {
    /// All known entries. Called once per daily check.
    fn birthdays(&self) -> impl Future<Output = anyhow::Result<Vec<BirthdayEntry>>> + Send;
}

/// Text-composition capability for greeting messages.
///
/// The default implementation is a deterministic template keyed on the
/// entry's relationship and gender; hosts can plug in richer generation.
pub trait ComposeMessage: Send + Sync + 'static {
    /// Produce the greeting body for one entry.
    fn compose(&self, entry: &BirthdayEntry) -> impl Future<Output = anyhow::Result<String>> + Send;
}

/// The built-in template fallback.
#[derive(Debug, Clone, Copy, Default)]
pub struct TemplateComposer;

impl ComposeMessage for TemplateComposer {
    async fn compose(&self, entry: &BirthdayEntry) -> anyhow::Result<String> {
        Ok(template_message(entry))
    }
}

/// Deterministic greeting keyed on relationship and gender.
pub fn template_message(entry: &BirthdayEntry) -> String {
    if let Some(custom) = entry.custom_message.as_deref().filter(|msg| !msg.is_empty()) {
        return custom.to_owned();
    }

    let relationship = entry
        .relationship
        .as_deref()
        .unwrap_or("")
        .to_lowercase();
    let gender = entry.gender.as_deref().unwrap_or("").to_lowercase();

    let opener = match relationship.as_str() {
        "family" => "Wishing you a wonderful birthday filled with love",
        "friend" => "Happy Birthday! Hope your day is amazing",
        "colleague" => "Happy Birthday! Wishing you a great year ahead",
        _ => "Happy Birthday! Wishing you all the best",
    };
    let closer = match gender.as_str() {
        "male" => "Have a great one, champ!",
        "female" => "Have a lovely day!",
        _ => "Enjoy your special day!",
    };

    format!("Happy Birthday, {}! {opener}. {closer}", entry.name)
}

/// Computes tomorrow's birthdays and enqueues greetings, skipping entries
/// that already have a matching pending item.
pub struct BirthdayScheduler<S, B, C> {
    store: Arc<S>,
    source: Arc<B>,
    composer: Arc<C>,
    events: EventBus,
    config: Config,
}

impl<S, B, C> BirthdayScheduler<S, B, C>
where
    S: ScheduleStore,
    B: BirthdaySource,
    C: ComposeMessage,
{
    /// Build a scheduler sharing the worker's store and event bus.
    pub fn new(
        store: Arc<S>,
        source: Arc<B>,
        composer: Arc<C>,
        events: EventBus,
        config: Config,
    ) -> Self {
        Self {
            store,
            source,
            composer,
            events,
            config,
        }
    }

    /// Run the daily check once: enqueue a greeting for every entry whose
    /// birthday is tomorrow and has no matching pending item yet.
    ///
    /// Returns the number of items enqueued. Idempotent: running twice
    /// before the items are consumed enqueues nothing the second time.
    pub async fn check_once(&self) -> anyhow::Result<usize> {
        let target_date = Local::now()
            .date_naive()
            .checked_add_days(Days::new(1))
            .ok_or_else(|| anyhow::anyhow!("calendar overflow computing tomorrow"))?;

        let entries = self.source.birthdays().await?;
        let matching: Vec<_> = entries
            .into_iter()
            .filter(|entry| {
                entry.date.month() == target_date.month() && entry.date.day() == target_date.day()
            })
            .collect();
        if matching.is_empty() {
            debug!(%target_date, "No birthdays tomorrow");
            return Ok(0);
        }

        let pending = self.store.get_pending_schedule().await?;
        let due_at = local_midnight(target_date);
        let mut enqueued = 0;

        for entry in matching {
            if self.already_scheduled(&pending, &entry.phone, target_date) {
                debug!(name = %entry.name, "Birthday greeting already queued");
                continue;
            }

            let body = match self.composer.compose(&entry).await {
                Ok(body) => body,
                Err(error) => {
                    warn!(name = %entry.name, %error, "Composer failed, using template fallback");
                    template_message(&entry)
                }
            };

            let item = NewScheduleItem::text(entry.phone.clone(), body, due_at);
            match self
                .store
                .add_schedule_items(
                    &crate::runner::generate_batch_id(BIRTHDAY_BATCH_PREFIX),
                    &[item],
                )
                .await
            {
                Ok(rows) => {
                    info!(name = %entry.name, %due_at, "Queued birthday greeting");
                    if let Some(row) = rows.first() {
                        self.events.emit(QueueEvent::Scheduled {
                            batch_id: row.batch_id.clone(),
                            count: rows.len(),
                        });
                    }
                    enqueued += 1;
                }
                Err(EnqueueError::EmptyBatch) => {}
                Err(error) => warn!(name = %entry.name, %error, "Failed to queue birthday greeting"),
            }
        }

        Ok(enqueued)
    }

    /// A pending item counts as a duplicate when it targets the same
    /// recipient, is due on the target date, and either came from a
    /// birthday batch or carries the birthday marker in its caption. The
    /// batch-id check covers custom messages whose wording omits the
    /// marker.
    fn already_scheduled(
        &self,
        pending: &[ScheduleItem],
        phone: &str,
        target_date: NaiveDate,
    ) -> bool {
        pending.iter().any(|item| {
            item.recipient == phone
                && item.send_at.with_timezone(&Local).date_naive() == target_date
                && (item.batch_id.starts_with(BIRTHDAY_BATCH_PREFIX)
                    || item
                        .caption
                        .as_deref()
                        .is_some_and(|caption| caption.contains(&self.config.birthday_marker)))
        })
    }

    /// Run the daily check forever, recomputing the next fire time on each
    /// wake. Restarting the process simply recomputes and re-arms; no timer
    /// state is persisted.
    pub async fn run(&self) {
        loop {
            let next = next_fire_time(Local::now(), self.config.birthday_fire_at);
            let wait = (next - Local::now())
                .to_std()
                .unwrap_or(std::time::Duration::ZERO);
            debug!(fire_at = %next, "Birthday check armed");
            tokio::time::sleep(wait).await;

            if let Err(error) = self.check_once().await {
                warn!(%error, "Birthday check failed");
            }
        }
    }
}

/// Midnight at the start of `date` in local time, expressed in UTC.
pub fn local_midnight(date: NaiveDate) -> DateTime<Utc> {
    let naive = date.and_time(NaiveTime::MIN);
    match Local.from_local_datetime(&naive) {
        chrono::LocalResult::Single(dt) | chrono::LocalResult::Ambiguous(dt, _) => {
            dt.with_timezone(&Utc)
        }
        // DST gap at midnight: fall back to interpreting the time as UTC.
        chrono::LocalResult::None => Utc.from_utc_datetime(&naive),
    }
}

/// The next occurrence of `fire_at` local time, adding a day when today's
/// occurrence has already passed.
pub fn next_fire_time(now: DateTime<Local>, fire_at: NaiveTime) -> DateTime<Local> {
    let today = now.date_naive().and_time(fire_at);
    let candidate = match Local.from_local_datetime(&today) {
        chrono::LocalResult::Single(dt) | chrono::LocalResult::Ambiguous(dt, _) => dt,
        chrono::LocalResult::None => now,
    };
    if candidate > now {
        candidate
    } else {
        candidate + chrono::Duration::days(1)
    }
}
