#![doc = include_str!("../README.md")]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

mod birthday;
mod config;
mod errors;
mod events;
/// Attachment lifecycle management.
pub mod media;
/// Transient-failure classification.
pub mod retry;
mod runner;
/// Database schema definitions.
pub mod schema;
mod storage;
mod transport;
mod worker;

pub use self::birthday::{
    BirthdayScheduler, BirthdaySource, ComposeMessage, TemplateComposer, local_midnight,
    next_fire_time, template_message,
};
pub use self::config::Config;
pub use self::errors::EnqueueError;
pub use self::events::{EventBus, QueueEvent};
pub use self::media::MediaStore;
pub use self::runner::{NoBirthdays, RunHandle, Runner, generate_batch_id, schedule_batch};
pub use self::schema::{
    BirthdayEntry, NewScheduleItem, RetryDecision, ScheduleItem, ScheduleStatus,
};
pub use self::storage::{PgStore, ScheduleStore, setup_database};
pub use self::transport::{
    ErrorKind, MediaContent, MediaKind, OutboundPayload, Transport, TransportError,
};
pub use self::worker::{DeliveryWorker, RunOutcome, RunSummary, normalize_recipient};
