use thiserror::Error;

use crate::MediaKind;

#[derive(Error, Debug)]
pub enum DvrError {
    #[error("Couldn't find a manifest reference on the page")]
    ManifestUnavailable,

    #[error("Invalid manifest: {0}")]
    ManifestParse(String),

    #[error("Couldn't parse date: {0}")]
    TimeParse(String),

    #[error("Couldn't parse duration or end date: {0}")]
    DurationParse(String),

    #[error("Requested segments up to {requested} but only {available} are available yet")]
    RangeNotYetAvailable { requested: u64, available: u64 },

    #[error("No playable {0} packets left after dropping packets without timestamps")]
    EmptyStream(MediaKind),

    #[error("Segment {index} failed after {attempts} attempt(s): {reason}")]
    SegmentFetch {
        index: u64,
        attempts: u32,
        reason: String,
    },

    #[error("No {kind} stream with index {index}, {available} available")]
    NoSuchStream {
        kind: MediaKind,
        index: usize,
        available: usize,
    },

    #[error("Unsupported output file format: {0}")]
    UnsupportedOutput(std::path::PathBuf),

    #[error("HTTP error: {0}")]
    HttpError(reqwest::StatusCode),

    #[error(transparent)]
    RequestError(#[from] reqwest::Error),

    #[error(transparent)]
    IOError(#[from] std::io::Error),

    #[error(transparent)]
    UrlParseError(#[from] url::ParseError),

    #[error(transparent)]
    XmlError(#[from] quick_xml::Error),

    #[error(transparent)]
    JoinError(#[from] tokio::task::JoinError),

    #[error(transparent)]
    NulError(#[from] std::ffi::NulError),

    #[cfg(feature = "ffmpeg")]
    #[error(transparent)]
    FFmpegError(#[from] rsmpeg::error::RsmpegError),
}

pub type DvrResult<T> = Result<T, DvrError>;
