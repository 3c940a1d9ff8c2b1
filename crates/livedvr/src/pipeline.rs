use crate::{
    fetch::{SegmentBlob, SegmentFetcher},
    manifest::{Manifest, StreamDescriptor},
    range::{self, SegmentRange, WindowRequest},
    DvrError, DvrResult, MediaKind,
};

/// Indices into the bitrate-sorted descriptor lists. `0` is the best quality.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StreamSelection {
    pub audio: usize,
    pub video: usize,
}

/// Everything needed to start downloading, decided before any segment is
/// requested.
#[derive(Debug, Clone)]
pub struct DownloadPlan {
    pub audio: StreamDescriptor,
    pub video: StreamDescriptor,
    pub range: SegmentRange,
}

impl DownloadPlan {
    pub fn new(
        manifest: &Manifest,
        selection: StreamSelection,
        request: &WindowRequest,
    ) -> DvrResult<Self> {
        let audio = select(manifest, MediaKind::Audio, selection.audio)?;
        let video = select(manifest, MediaKind::Video, selection.video)?;
        let range = range::resolve(&manifest.timing, request)?;

        tracing::info!(
            "Selected video {video}, audio {audio}, segments {range} ({}s).",
            range.len() * manifest.timing.segment_duration_seconds
        );
        Ok(Self { audio, video, range })
    }
}

fn select(manifest: &Manifest, kind: MediaKind, index: usize) -> DvrResult<StreamDescriptor> {
    let descriptors = manifest.descriptors(kind);
    descriptors
        .get(index)
        .cloned()
        .ok_or(DvrError::NoSuchStream {
            kind,
            index,
            available: descriptors.len(),
        })
}

pub struct Pipeline {
    fetcher: SegmentFetcher,
}

impl Pipeline {
    pub fn new(fetcher: SegmentFetcher) -> Self {
        Self { fetcher }
    }

    /// Downloads audio and video of `plan` at the same time.
    ///
    /// Returns `(audio, video)`.
    pub async fn fetch(&self, plan: &DownloadPlan) -> DvrResult<(SegmentBlob, SegmentBlob)> {
        let (audio, video) = tokio::try_join!(
            self.fetcher.fetch(&plan.audio, plan.range),
            self.fetcher.fetch(&plan.video, plan.range),
        )?;
        tracing::info!(
            "Downloaded {} bytes of audio and {} bytes of video.",
            audio.len(),
            video.len()
        );
        Ok((audio, video))
    }

    /// Downloads `plan` and hands both blobs to `mux` on a blocking thread.
    pub async fn run<F, R>(&self, plan: &DownloadPlan, mux: F) -> DvrResult<R>
    where
        F: FnOnce(SegmentBlob, SegmentBlob) -> DvrResult<R> + Send + 'static,
        R: Send + 'static,
    {
        let (audio, video) = self.fetch(plan).await?;
        tokio::task::spawn_blocking(move || mux(audio, video)).await?
    }

    /// Downloads `plan` and writes it to `output` with FFmpeg.
    #[cfg(feature = "ffmpeg")]
    pub async fn download(
        &self,
        plan: &DownloadPlan,
        output: &crate::util::path::OutputPath,
    ) -> DvrResult<crate::mux::MuxSummary> {
        let (audio, video) = self.fetch(plan).await?;
        crate::mux::ffmpeg::mux_to_file(output.path().to_path_buf(), audio, video).await
    }
}
