//! Line-delimited JSON feed into the surfacer.
//!
//! Each non-blank line is one [`EventMetrics`] object. Lines that fail to
//! decode are logged and skipped; the feed keeps going.

use tokio::io::AsyncBufRead;
use tokio_stream::wrappers::LinesStream;
use tokio_stream::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::StatusError;
use crate::event::EventMetrics;
use crate::surfacer::ProbeStatusHandle;

/// What a feed run did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestSummary {
    /// Non-blank lines read.
    pub lines: u64,
    /// Events handed to [`ProbeStatusHandle::write`].
    pub forwarded: u64,
    /// Lines that were not a valid event.
    pub malformed: u64,
    /// 1-based input line number of the first malformed line, blank lines
    /// included.
    pub first_malformed: Option<u64>,
}

/// Decode one line. `Ok(None)` for blank lines.
pub fn parse_line(line: &str) -> Result<Option<EventMetrics>, serde_json::Error> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }
    serde_json::from_str(line).map(Some)
}

/// Read events from `reader` until EOF or cancellation and write each one
/// to `handle`.
///
/// # Errors
/// Only read errors end the feed early.
pub async fn feed<R>(
    reader: R,
    handle: &ProbeStatusHandle,
    cancel: CancellationToken,
) -> Result<IngestSummary, StatusError>
where
    R: AsyncBufRead + Unpin,
{
    use tokio::io::AsyncBufReadExt;

    let mut lines = LinesStream::new(reader.lines());
    let mut summary = IngestSummary::default();
    let mut line_no: u64 = 0;

    loop {
        let next = tokio::select! {
            _ = cancel.cancelled() => {
                info!(?summary, "ingest cancelled");
                return Ok(summary);
            }
            next = lines.next() => next,
        };
        let Some(line) = next else { break };
        let line = line?;
        line_no += 1;

        match parse_line(&line) {
            Ok(None) => {}
            Ok(Some(em)) => {
                summary.lines += 1;
                summary.forwarded += 1;
                handle.write(em);
            }
            Err(e) => {
                summary.lines += 1;
                summary.malformed += 1;
                summary.first_malformed.get_or_insert(line_no);
                warn!(line = line_no, error = %e, "skipping malformed event line");
            }
        }
    }

    debug!(?summary, "ingest reached end of input");
    Ok(summary)
}
