//! Downloads a time window of a live DASH broadcast into one file.
//!
//! ```text
//! ┌──────────────┐   timing    ┌──────────────────┐  SegmentRange
//! │   Manifest   ├────────────►│   range::resolve ├──────────┐
//! └──────┬───────┘             └──────────────────┘          │
//!        │ descriptors                                       │
//!        │         ┌─────────────────────────┐               │
//!        ├────────►│ SegmentFetcher (audio)  │◄──────────────┤
//!        │         └────────────┬────────────┘               │
//!        │         ┌─────────────────────────┐               │
//!        └────────►│ SegmentFetcher (video)  │◄──────────────┘
//!                  └────────────┬────────────┘
//!                               │ two SegmentBlobs
//!                  ┌────────────▼────────────┐
//!                  │       StreamMuxer       │──► output container
//!                  └─────────────────────────┘
//! ```

pub mod error;
pub mod fetch;
pub mod locator;
pub mod manifest;
pub mod mux;
pub mod pipeline;
pub mod range;
pub mod retry;
pub mod util;

pub use error::{DvrError, DvrResult};
pub use util::http::HttpClient;

/// Elementary stream kind of a representation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MediaKind {
    Audio,
    Video,
}

impl MediaKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Audio => "audio",
            Self::Video => "video",
        }
    }

    /// Media kind from a `mimeType` such as `video/mp4`.
    pub fn from_mime_type(mime_type: &str) -> Option<Self> {
        match mime_type.split('/').next()? {
            "audio" => Some(Self::Audio),
            "video" => Some(Self::Video),
            _ => None,
        }
    }
}

impl std::fmt::Display for MediaKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
