//! # Dashboard rendering
//!
//! Turns the registry into a page of windowed success ratios: one table per
//! probe, one row per target, one column per display window, plus a debug
//! block with the raw first/last buckets of every series.
//!
//! Building the page data ([`build_page`]) is a pure read of the registry.
//! Turning it into bytes is the job of a [`Renderer`], injected into the
//! actor so that rendering can be swapped or instrumented.

use std::fmt::Write;
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::error::StatusError;
use crate::registry::SeriesRegistry;
use crate::sysvars::{format_uptime, ProcessInfo};

const MINUTE: u64 = 60;
const HOUR: u64 = 60 * MINUTE;
const DAY: u64 = 24 * HOUR;

/// Human-friendly window sizes offered between one tick and the full span.
const WINDOW_LADDER_SECS: &[u64] = &[
    5 * MINUTE,
    10 * MINUTE,
    30 * MINUTE,
    HOUR,
    2 * HOUR,
    6 * HOUR,
    12 * HOUR,
    DAY,
    2 * DAY,
    3 * DAY,
    7 * DAY,
    14 * DAY,
    30 * DAY,
    90 * DAY,
    180 * DAY,
    365 * DAY,
];

// ---------------------------------------------------------------------------
// Windows
// ---------------------------------------------------------------------------

/// Display windows for a store with the given tick and retained span.
///
/// One tick, then every ladder entry above one tick and up to the span, then
/// the span itself if the ladder did not end on it. Strictly increasing and
/// never above `total_span`.
pub fn dashboard_durations(resolution: Duration, total_span: Duration) -> Vec<Duration> {
    let first = resolution.min(total_span);
    let mut out = vec![first];
    for &secs in WINDOW_LADDER_SECS {
        let d = Duration::from_secs(secs);
        if d > first && d <= total_span {
            out.push(d);
        }
    }
    if out.last().is_some_and(|last| total_span > *last) {
        out.push(total_span);
    }
    out
}

/// Short label for a window: the largest unit that divides it evenly.
pub fn short_dur(d: Duration) -> String {
    if d.subsec_millis() != 0 || d.as_secs() == 0 {
        return format!("{}ms", d.as_millis());
    }
    let secs = d.as_secs();
    match secs {
        s if s % DAY == 0 => format!("{}d", s / DAY),
        s if s % HOUR == 0 => format!("{}h", s / HOUR),
        s if s % MINUTE == 0 => format!("{}m", s / MINUTE),
        s => format!("{s}s"),
    }
}

pub fn short_durs(durations: &[Duration]) -> Vec<String> {
    durations.iter().copied().map(short_dur).collect()
}

// ---------------------------------------------------------------------------
// Page data
// ---------------------------------------------------------------------------

/// Rendered fragments for one probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeSection {
    pub name: String,
    /// `<tr>` rows of ratios, one per target.
    pub rows: String,
    /// Oldest timestamp and first/last raw buckets, one block per target.
    pub debug: String,
}

/// Everything a [`Renderer`] needs to produce the page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DashboardPage {
    pub version: String,
    pub start_time: DateTime<Utc>,
    pub uptime: Duration,
    /// Column headers, e.g. `["1m", "5m", "1h"]`.
    pub durations: Vec<String>,
    pub probes: Vec<ProbeSection>,
}

/// Ratio cells and debug lines for every target of `probe`.
pub fn probe_section(
    registry: &SeriesRegistry,
    probe: &str,
    durations: &[Duration],
    lookback: Duration,
) -> Result<ProbeSection, StatusError> {
    let mut rows = String::new();
    let mut debug = String::new();

    for target in registry.targets(probe) {
        let Some(ts) = registry.series(probe, target) else {
            continue;
        };
        let data = ts.recent_data(lookback);
        let target_html = escape_html(target);

        write!(rows, "<tr><td><b>{target_html}</b></td>")?;
        for &window in durations {
            let (total, success) = ts.compute_delta(&data, window);
            write!(rows, "<td>{:.4}</td>", success as f64 / total as f64)?;
        }
        rows.push_str("</tr>\n");

        let oldest = ts
            .oldest_timestamp(data.len())
            .map(|t| t.format("%Y-%m-%d %H:%M:%S UTC").to_string())
            .unwrap_or_else(|| "-".to_string());
        writeln!(debug, "Target: {target_html}, Oldest timestamp: {oldest}<br>")?;

        let last = data.len().saturating_sub(1);
        let indices = if last == 0 { vec![0] } else { vec![0, last] };
        for i in indices {
            let Some(d) = data.get(i) else { continue };
            let latency = d
                .latency
                .as_ref()
                .map(|l| escape_html(&l.to_string()))
                .unwrap_or_else(|| "-".to_string());
            writeln!(
                debug,
                "#{i} total={}, success={}, latency={latency} <br>",
                d.total, d.success
            )?;
        }
    }

    Ok(ProbeSection {
        name: probe.to_string(),
        rows,
        debug,
    })
}

/// Collect page data for every probe in first-seen order.
pub fn build_page(
    registry: &SeriesRegistry,
    durations: &[Duration],
    lookback: Duration,
    info: &ProcessInfo,
    now: DateTime<Utc>,
) -> Result<DashboardPage, StatusError> {
    let probes = registry
        .probe_names()
        .iter()
        .map(|probe| probe_section(registry, probe, durations, lookback))
        .collect::<Result<Vec<_>, _>>()?;

    Ok(DashboardPage {
        version: info.version.clone(),
        start_time: info.start_time,
        uptime: info.uptime_at(now),
        durations: short_durs(durations),
        probes,
    })
}

// ---------------------------------------------------------------------------
// Renderer
// ---------------------------------------------------------------------------

/// Turns page data into the response body.
pub trait Renderer: Send + 'static {
    fn render(&self, page: &DashboardPage) -> Result<String, StatusError>;
}

/// Default renderer: a self-contained HTML page.
#[derive(Debug, Clone, Copy, Default)]
pub struct HtmlRenderer;

const PAGE_HEAD: &str = r##"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="utf-8">
<title>Probe Status</title>
<style>
body{font-family:-apple-system,'Segoe UI',Roboto,sans-serif;margin:24px;color:#24292f}
header{border-bottom:1px solid #d0d7de;margin-bottom:16px;padding-bottom:8px;font-size:.9rem}
table.status-list{border-collapse:collapse;margin-bottom:8px}
table.status-list th,table.status-list td{border:1px solid #d0d7de;padding:4px 10px;text-align:right}
table.status-list td:first-child{text-align:left}
details{font-family:monospace;font-size:.8rem;color:#57606a;margin-bottom:24px}
</style>
</head>
<body>
"##;

impl Renderer for HtmlRenderer {
    fn render(&self, page: &DashboardPage) -> Result<String, StatusError> {
        let mut out = String::with_capacity(PAGE_HEAD.len() + 4096);
        out.push_str(PAGE_HEAD);

        writeln!(
            out,
            "<header><b>Version:</b> {} &nbsp; <b>Started:</b> {} &nbsp; <b>Uptime:</b> {}</header>",
            escape_html(&page.version),
            page.start_time.format("%Y-%m-%d %H:%M:%S%.3f UTC"),
            format_uptime(page.uptime),
        )?;

        out.push_str("<h3>Probes:");
        for (i, probe) in page.probes.iter().enumerate() {
            let name = escape_html(&probe.name);
            let sep = if i == 0 { " " } else { ", " };
            write!(out, "{sep}<a href=\"#probe-{name}\">{name}</a>")?;
        }
        out.push_str("</h3>\n");

        for probe in &page.probes {
            let name = escape_html(&probe.name);
            writeln!(out, "<h3 id=\"probe-{name}\">Probe: {name}</h3>")?;
            out.push_str("<table class=\"status-list\">\n<tr><th>Target</th>");
            for d in &page.durations {
                write!(out, "<th>{d}</th>")?;
            }
            out.push_str("</tr>\n");
            out.push_str(&probe.rows);
            out.push_str("</table>\n");
            writeln!(
                out,
                "<details><summary>Debug info</summary><p>\n{}</p></details>",
                probe.debug
            )?;
        }

        out.push_str("</body>\n</html>\n");
        Ok(out)
    }
}

/// Escape text for inclusion in HTML element content or a quoted attribute.
pub fn escape_html(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
