//! Runtime configuration.
//!
//! One explicit object passed into the runner instead of module-level
//! mutable settings; everything here has a production default.

use chrono::NaiveTime;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Tunables for the delivery worker and the recurring schedulers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Retry cap for transient failures before an item turns `failed`.
    pub max_retries: i32,
    /// How often the worker scans for due items.
    pub poll_interval: Duration,
    /// Random extra delay added to each poll, to avoid lockstep ticks.
    pub jitter: Duration,
    /// Pause between consecutive sends within one run (transport rate
    /// limits); skipped after the last item.
    pub per_message_delay: Duration,
    /// How often the media sweep runs. It also runs once at startup.
    pub sweep_interval: Duration,
    /// Files older than this and not referenced by a pending item are
    /// removed by the sweep.
    pub sweep_max_age: Duration,
    /// Directory holding locally uploaded attachments.
    pub uploads_dir: PathBuf,
    /// Local wall-clock time at which the birthday check fires each day.
    pub birthday_fire_at: NaiveTime,
    /// Marker substring identifying birthday items in captions, used for
    /// duplicate suppression.
    pub birthday_marker: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_retries: 3,
            poll_interval: Duration::from_secs(10),
            jitter: Duration::from_millis(500),
            per_message_delay: Duration::from_millis(1000),
            sweep_interval: Duration::from_secs(24 * 60 * 60),
            sweep_max_age: Duration::from_secs(24 * 60 * 60),
            uploads_dir: PathBuf::from("uploads"),
            birthday_fire_at: NaiveTime::from_hms_opt(8, 0, 0)
                .unwrap_or(NaiveTime::MIN),
            birthday_marker: "Happy Birthday".to_owned(),
        }
    }
}
