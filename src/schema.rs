//! Database schema definitions for SQLx.
//!
//! This module contains the row types for the scheduled-message queue.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Lifecycle state of a schedule item.
///
/// `Pending` items cycle back to `Pending` on retryable failures until the
/// retry cap is reached; `Sent` and `Failed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "TEXT", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum ScheduleStatus {
    /// Waiting to be delivered (or re-delivered).
    Pending,
    /// Delivered successfully.
    Sent,
    /// Terminally failed; `error` explains why.
    Failed,
}

impl ScheduleStatus {
    /// Whether the item will never transition again.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Sent | Self::Failed)
    }
}

/// One intended send, as persisted in the `schedule_items` table.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct ScheduleItem {
    /// Unique identifier, assigned at insertion.
    pub id: i64,
    /// Groups items created from one multi-recipient request. Not unique.
    pub batch_id: String,
    /// Phone-derived identifier or group identifier. Validated at dispatch,
    /// not at creation.
    pub recipient: String,
    /// Textual body, if any.
    pub caption: Option<String>,
    /// Local relative path or absolute remote URL of an attachment.
    pub media_url: Option<String>,
    /// MIME-like category string for the attachment.
    pub media_type: Option<String>,
    /// The item is due once `send_at <= now()`.
    pub send_at: DateTime<Utc>,
    /// Current lifecycle state.
    pub status: ScheduleStatus,
    /// Last failure description.
    pub error: Option<String>,
    /// Delivery attempts that have failed so far.
    pub retry_count: i32,
    /// Set exactly once, on terminal success.
    pub sent_at: Option<DateTime<Utc>>,
    /// Set at insertion.
    pub created_at: DateTime<Utc>,
}

impl ScheduleItem {
    /// Whether the item carries an attachment.
    pub fn has_media(&self) -> bool {
        self.media_url.as_deref().is_some_and(|url| !url.is_empty())
    }
}

/// Payload for inserting a new schedule item.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewScheduleItem {
    /// Destination identifier.
    pub recipient: String,
    /// Textual body, if any.
    pub caption: Option<String>,
    /// Local relative path or absolute remote URL of an attachment.
    pub media_url: Option<String>,
    /// MIME-like category string for the attachment.
    pub media_type: Option<String>,
    /// When the item becomes due.
    pub send_at: DateTime<Utc>,
}

impl NewScheduleItem {
    /// Plain text message due at `send_at`.
    pub fn text(
        recipient: impl Into<String>,
        caption: impl Into<String>,
        send_at: DateTime<Utc>,
    ) -> Self {
        Self {
            recipient: recipient.into(),
            caption: Some(caption.into()),
            media_url: None,
            media_type: None,
            send_at,
        }
    }
}

/// Outcome of an atomic retry-counter increment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryDecision {
    /// True if the new count is still within the configured cap.
    pub should_retry: bool,
    /// The counter value after the increment.
    pub retry_count: i32,
    /// When the item becomes eligible again. No backoff is applied beyond
    /// the worker's poll interval, so this is simply "now".
    pub next_retry_at: DateTime<Utc>,
}

/// A birthday calendar entry, consumed read-only to derive schedule items.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BirthdayEntry {
    /// Display name, used in composed messages.
    pub name: String,
    /// Phone-derived recipient identifier.
    pub phone: String,
    /// Date of birth; only month and day are matched.
    pub date: NaiveDate,
    /// Free-form gender label, feeds the template fallback.
    pub gender: Option<String>,
    /// Free-form relationship label, feeds the template fallback.
    pub relationship: Option<String>,
    /// Pre-written message that overrides composition entirely.
    pub custom_message: Option<String>,
}
