//! Process-level values shown on the dashboard: version, start time and
//! uptime. Read-only; nothing here touches the store.

use std::time::Duration;

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;

static START_TIME: Lazy<DateTime<Utc>> = Lazy::new(Utc::now);

/// Time the process first asked for its start time. [`init`] pins it early.
pub fn start_time() -> DateTime<Utc> {
    *START_TIME
}

/// Pin the start time. Call once at the top of `main`.
pub fn init() {
    Lazy::force(&START_TIME);
}

pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

/// Version and start time handed to the dashboard renderer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessInfo {
    pub version: String,
    pub start_time: DateTime<Utc>,
}

impl ProcessInfo {
    /// Values for the running process.
    pub fn current() -> Self {
        Self {
            version: version().to_string(),
            start_time: start_time(),
        }
    }

    /// Uptime at `now`, truncated to milliseconds. Zero if `now` precedes the
    /// start time.
    pub fn uptime_at(&self, now: DateTime<Utc>) -> Duration {
        let ms = (now - self.start_time).num_milliseconds().max(0);
        Duration::from_millis(ms as u64)
    }
}

impl Default for ProcessInfo {
    fn default() -> Self {
        Self::current()
    }
}

/// `1h2m3.456s`-style rendering; days are folded into hours.
pub fn format_uptime(d: Duration) -> String {
    let total_ms = d.as_millis();
    let hours = total_ms / 3_600_000;
    let minutes = (total_ms / 60_000) % 60;
    let secs = (total_ms / 1_000) % 60;
    let ms = total_ms % 1_000;

    let mut out = String::new();
    if hours > 0 {
        out.push_str(&format!("{hours}h"));
    }
    if hours > 0 || minutes > 0 {
        out.push_str(&format!("{minutes}m"));
    }
    if ms > 0 {
        out.push_str(&format!("{secs}.{ms:03}s"));
    } else {
        out.push_str(&format!("{secs}s"));
    }
    out
}
