//! Translates a requested time window into segment indices.
//!
//! All arithmetic happens relative to the manifest response time:
//!
//! ```text
//!  segment 0                                   latest        live edge
//!  │                                           │             │
//!  ├──────┬──────┬──────┬── ... ──┬──────┬─────┼──────┐
//!  │      │      │      │         │      │     │      │
//!  └──────┴──────┴──────┴── ... ──┴──────┴─────┴──────┘
//!  ▲ earliest_available()                    response_timestamp
//! ```
//!
//! Segment boundaries are rounded half away from zero, so a start that falls
//! exactly between two segments moves to the earlier segment.

mod parse;

pub use parse::{parse_datetime, parse_duration};

use chrono::{DateTime, Utc};

use crate::{manifest::ManifestTimingInfo, DvrError, DvrResult};

/// Half-open interval `[start_index, end_index_exclusive)` of segment indices.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentRange {
    pub start_index: u64,
    pub end_index_exclusive: u64,
}

impl SegmentRange {
    pub fn len(&self) -> u64 {
        self.end_index_exclusive - self.start_index
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn iter(&self) -> std::ops::Range<u64> {
        self.start_index..self.end_index_exclusive
    }
}

impl std::fmt::Display for SegmentRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}, {})", self.start_index, self.end_index_exclusive)
    }
}

/// A window as the user typed it.
///
/// `end` and `duration` are mutually exclusive. When both are absent the window
/// runs up to the live edge.
#[derive(Debug, Clone, Default)]
pub struct WindowRequest {
    pub start: Option<String>,
    pub end: Option<String>,
    pub duration: Option<String>,
    /// Read naive times as UTC instead of local time.
    pub utc: bool,
}

pub fn resolve(timing: &ManifestTimingInfo, request: &WindowRequest) -> DvrResult<SegmentRange> {
    let start = match &request.start {
        Some(start) => parse_datetime(start, request.utc)?,
        None => timing.earliest_available(),
    };
    let end = request
        .end
        .as_deref()
        .map(|end| parse_datetime(end, request.utc))
        .transpose()?;

    let duration_seconds = match (&request.duration, end) {
        (Some(duration), _) => Some(parse_duration(duration)? as f64),
        (None, Some(end)) => {
            let seconds = (end - start).num_milliseconds() as f64 / 1000.;
            if seconds <= 0. {
                return Err(DvrError::DurationParse(format!(
                    "end {end} is not after start {start}"
                )));
            }
            Some(seconds)
        }
        (None, None) => None,
    };

    resolve_window(timing, start, duration_seconds)
}

/// Resolves an already parsed window. `duration_seconds` of `None` means "up to
/// the live edge".
pub fn resolve_window(
    timing: &ManifestTimingInfo,
    start: DateTime<Utc>,
    duration_seconds: Option<f64>,
) -> DvrResult<SegmentRange> {
    let latest = timing.latest_available_segment_index;
    let available = latest.saturating_add(1);
    let segment_seconds = timing.segment_duration_seconds as f64;

    let behind_edge = ((timing.response_timestamp - start).num_milliseconds() as f64 / 1000.
        / segment_seconds)
        .round();
    // earlier than the oldest available segment collapses to segment 0
    let start_index = if behind_edge >= 0. {
        latest.saturating_sub(behind_edge as u64)
    } else {
        latest.saturating_add(-behind_edge as u64)
    };

    let end_index_exclusive = match duration_seconds {
        Some(duration) => {
            let segments = ((duration / segment_seconds).round() as u64).max(1);
            start_index.saturating_add(segments)
        }
        None => available.max(start_index.saturating_add(1)),
    };

    if end_index_exclusive > available {
        return Err(DvrError::RangeNotYetAvailable {
            requested: end_index_exclusive,
            available,
        });
    }

    let range = SegmentRange {
        start_index,
        end_index_exclusive,
    };
    tracing::debug!(%range, %start, "Resolved segment range");
    Ok(range)
}
