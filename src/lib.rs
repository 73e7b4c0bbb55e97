//! In-memory probe status surfacer.
//!
//! Probe results arrive as [`EventMetrics`]. A single actor
//! ([`ProbeStatus`]) folds them into one bucketed counter series per
//! (probe, target) and serves an HTML dashboard of success ratios over a
//! ladder of trailing windows. Readers go through [`ProbeStatusHandle`];
//! nothing else touches the store.

pub mod cache;
pub mod cli;
pub mod config;
pub mod dashboard;
pub mod error;
pub mod event;
pub mod ingest;
pub mod registry;
pub mod server;
pub mod surfacer;
pub mod sysvars;
pub mod timeseries;

pub use config::SurfacerConfig;
pub use dashboard::{HtmlRenderer, Renderer};
pub use error::StatusError;
pub use event::{EventMetrics, MetricValue};
pub use surfacer::{ProbeStatus, ProbeStatusHandle, SurfacerStats};
pub use timeseries::{Datum, Timeseries};
