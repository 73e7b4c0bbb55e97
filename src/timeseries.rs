//! # Bucketed counter series
//!
//! A fixed-capacity circular buffer of cumulative `(total, success)`
//! snapshots for one (probe, target) pair, one slot per tick of
//! `resolution`.
//!
//! Because the counters are cumulative since probe start, the number of
//! attempts in a trailing window is the difference between the newest bucket
//! and the bucket `window / resolution` positions before it.
//!
//! ## Guarantees
//! - Bounded: at most `capacity` buckets, i.e. `capacity * resolution` of history.
//! - Last writer wins within a tick.
//! - Ticks with no data hold the previous counters (a flat interval).
//! - Data older than the current bucket is ignored.

use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::event::MetricValue;

// ---------------------------------------------------------------------------
// Datum
// ---------------------------------------------------------------------------

/// One snapshot of a probe's cumulative counters.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Datum {
    pub total: i64,
    pub success: i64,
    pub latency: Option<MetricValue>,
}

impl Datum {
    pub fn new(total: i64, success: i64) -> Self {
        Self {
            total,
            success,
            latency: None,
        }
    }

    /// Counters carried into a tick that saw no event.
    fn carried(&self) -> Datum {
        Datum::new(self.total, self.success)
    }
}

/// Result of [`Timeseries::add_datum`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddOutcome {
    Stored,
    /// The timestamp falls before the current bucket.
    Late,
}

// ---------------------------------------------------------------------------
// Timeseries
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct Timeseries {
    res: Duration,
    res_ms: i64,
    slots: Vec<Datum>,
    /// Index of the current bucket in `slots`.
    latest: usize,
    /// Slots written since the first datum, capped at capacity.
    filled: usize,
    /// Bucket number (`unix_millis / res_ms`) of the current bucket.
    current_bucket: Option<i64>,
}

impl Timeseries {
    /// Create an empty series. `capacity` must be > 0.
    pub fn new(resolution: Duration, capacity: usize) -> Self {
        assert!(capacity > 0, "Timeseries capacity must be > 0");
        let res_ms = i64::try_from(resolution.as_millis()).unwrap_or(i64::MAX).max(1);
        Self {
            res: resolution,
            res_ms,
            slots: vec![Datum::default(); capacity],
            latest: 0,
            filled: 0,
            current_bucket: None,
        }
    }

    pub fn resolution(&self) -> Duration {
        self.res
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Number of buckets holding data.
    pub fn len(&self) -> usize {
        self.filled
    }

    pub fn is_empty(&self) -> bool {
        self.filled == 0
    }

    /// Start of the current bucket, or `None` before the first datum.
    pub fn current_ts(&self) -> Option<DateTime<Utc>> {
        self.current_bucket.and_then(|b| self.bucket_start(b))
    }

    fn bucket_of(&self, ts: DateTime<Utc>) -> i64 {
        ts.timestamp_millis().div_euclid(self.res_ms)
    }

    fn bucket_start(&self, bucket: i64) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp_millis(bucket.checked_mul(self.res_ms)?)
    }

    /// Record a snapshot observed at `ts`.
    pub fn add_datum(&mut self, ts: DateTime<Utc>, datum: Datum) -> AddOutcome {
        let bucket = self.bucket_of(ts);
        let cap = self.slots.len();

        let Some(current) = self.current_bucket else {
            self.latest = 0;
            self.slots[0] = datum;
            self.filled = 1;
            self.current_bucket = Some(bucket);
            return AddOutcome::Stored;
        };

        if bucket < current {
            return AddOutcome::Late;
        }

        if bucket > current {
            let fill = self.slots[self.latest].carried();
            // Past `cap` steps every slot has been overwritten anyway.
            let steps = usize::try_from(bucket - current).unwrap_or(usize::MAX).min(cap);
            for _ in 0..steps {
                self.latest = (self.latest + 1) % cap;
                self.slots[self.latest] = fill.clone();
                self.filled = (self.filled + 1).min(cap);
            }
            self.current_bucket = Some(bucket);
        }

        self.slots[self.latest] = datum;
        AddOutcome::Stored
    }

    /// The most recent buckets covering up to `max_lookback`, oldest first.
    ///
    /// Length is `min(max_lookback / resolution, len())`.
    pub fn recent_data(&self, max_lookback: Duration) -> Vec<&Datum> {
        let cap = self.slots.len();
        let wanted = usize::try_from(max_lookback.as_millis() / self.res_ms as u128)
            .unwrap_or(usize::MAX);
        let n = wanted.min(self.filled);
        let start = (self.latest + cap + 1 - n) % cap;
        (0..n).map(|i| &self.slots[(start + i) % cap]).collect()
    }

    /// `(total, success)` deltas over the trailing `window` of `data`.
    ///
    /// `data` is a slice as returned by [`recent_data`](Self::recent_data).
    /// The older bucket is `window / resolution` positions before the newest
    /// one, clamped to the oldest bucket in `data`.
    pub fn compute_delta(&self, data: &[&Datum], window: Duration) -> (i64, i64) {
        let Some(last) = data.last() else {
            return (0, 0);
        };
        let offset = usize::try_from(window.as_millis() / self.res_ms as u128)
            .unwrap_or(usize::MAX);
        let older = data[(data.len() - 1).saturating_sub(offset)];
        (
            last.total.saturating_sub(older.total),
            last.success.saturating_sub(older.success),
        )
    }

    /// Start of the oldest of the `len` most recent buckets.
    pub fn oldest_timestamp(&self, len: usize) -> Option<DateTime<Utc>> {
        let current = self.current_bucket?;
        let back = i64::try_from(len.saturating_sub(1)).ok()?;
        self.bucket_start(current.checked_sub(back)?)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
