//! Series registry: probe name → target name → [`Timeseries`].
//!
//! Entries are created lazily on the first valid event for a (probe, target)
//! pair and are never removed. Probe and target lists keep first-seen order
//! so the dashboard layout is stable between renders.

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::warn;

use crate::timeseries::{AddOutcome, Datum, Timeseries};

/// What [`SeriesRegistry::record`] did with a datum.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordOutcome {
    /// Stored into an existing series.
    Stored,
    /// A new target series was created and the datum stored.
    NewTarget,
    /// As `NewTarget`, and this target leaves exactly one free slot for the
    /// probe. The capacity warning has been logged.
    NewTargetNearCapacity,
    /// The probe already tracks the maximum number of targets.
    TargetDropped,
    /// The datum is older than the series' current bucket.
    Late,
}

#[derive(Debug)]
pub struct SeriesRegistry {
    resolution: Duration,
    timeseries_size: usize,
    max_targets_per_probe: usize,
    series: HashMap<String, HashMap<String, Timeseries>>,
    probe_names: Vec<String>,
    probe_targets: HashMap<String, Vec<String>>,
}

impl SeriesRegistry {
    pub fn new(resolution: Duration, timeseries_size: usize, max_targets_per_probe: usize) -> Self {
        Self {
            resolution,
            timeseries_size,
            max_targets_per_probe,
            series: HashMap::new(),
            probe_names: Vec::new(),
            probe_targets: HashMap::new(),
        }
    }

    /// Route one datum to its series, creating probe/target entries on first
    /// sight.
    ///
    /// The capacity warning fires once per probe: when a new target arrives
    /// while the probe already tracks `max - 1` targets. That target is still
    /// accepted and takes the last slot. Every later new target is dropped
    /// silently.
    pub fn record(
        &mut self,
        probe: &str,
        target: &str,
        ts: DateTime<Utc>,
        datum: Datum,
    ) -> RecordOutcome {
        if !self.series.contains_key(probe) {
            self.series.insert(probe.to_string(), HashMap::new());
            self.probe_names.push(probe.to_string());
        }
        let Some(probe_series) = self.series.get_mut(probe) else {
            return RecordOutcome::TargetDropped;
        };

        if let Some(series) = probe_series.get_mut(target) {
            return match series.add_datum(ts, datum) {
                AddOutcome::Stored => RecordOutcome::Stored,
                AddOutcome::Late => RecordOutcome::Late,
            };
        }

        let tracked = probe_series.len();
        let near_capacity = self.max_targets_per_probe.checked_sub(1) == Some(tracked);
        if near_capacity {
            warn!(
                probe = %probe,
                target = %target,
                capacity = self.max_targets_per_probe,
                "Reached the per-probe timeseries capacity; all new targets will be silently dropped"
            );
        }
        if tracked >= self.max_targets_per_probe {
            return RecordOutcome::TargetDropped;
        }

        let mut series = Timeseries::new(self.resolution, self.timeseries_size);
        series.add_datum(ts, datum);
        probe_series.insert(target.to_string(), series);
        self.probe_targets
            .entry(probe.to_string())
            .or_default()
            .push(target.to_string());

        if near_capacity {
            RecordOutcome::NewTargetNearCapacity
        } else {
            RecordOutcome::NewTarget
        }
    }

    /// Probe names in first-seen order.
    pub fn probe_names(&self) -> &[String] {
        &self.probe_names
    }

    /// Target names of `probe` in first-seen order.
    pub fn targets(&self, probe: &str) -> &[String] {
        self.probe_targets
            .get(probe)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn series(&self, probe: &str, target: &str) -> Option<&Timeseries> {
        self.series.get(probe)?.get(target)
    }

    /// Total number of (probe, target) series.
    pub fn series_count(&self) -> usize {
        self.series.values().map(HashMap::len).sum()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
