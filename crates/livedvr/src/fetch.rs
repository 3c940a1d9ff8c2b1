use std::{
    future::Future,
    num::NonZeroU32,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
};

use bytes::{Bytes, BytesMut};

use crate::{
    manifest::StreamDescriptor, range::SegmentRange, retry::RetryPolicy, util::pool::WorkerPool,
    DvrResult, HttpClient, MediaKind,
};

/// Where segment payloads come from.
pub trait SegmentSource {
    /// Fetches the payload of segment `index` once. Retrying is up to the caller.
    fn fetch_segment(&self, index: u64) -> impl Future<Output = DvrResult<Bytes>> + Send;
}

/// Segments addressed as `{segment_base_url}{index}`.
pub struct HttpSegmentSource {
    client: HttpClient,
    descriptor: StreamDescriptor,
}

impl HttpSegmentSource {
    pub fn new(client: HttpClient, descriptor: &StreamDescriptor) -> Self {
        Self {
            client,
            descriptor: descriptor.clone(),
        }
    }
}

impl SegmentSource for HttpSegmentSource {
    fn fetch_segment(&self, index: u64) -> impl Future<Output = DvrResult<Bytes>> + Send {
        let url = self.descriptor.segment_url(index);
        let client = self.client.clone();
        async move { client.get_bytes(url).await }
    }
}

/// Segment payloads of one stream, concatenated in ascending index order.
#[derive(Debug, Clone)]
pub struct SegmentBlob {
    media_kind: MediaKind,
    range: SegmentRange,
    data: Bytes,
}

impl SegmentBlob {
    pub fn new(media_kind: MediaKind, range: SegmentRange, data: Bytes) -> Self {
        Self {
            media_kind,
            range,
            data,
        }
    }

    pub fn media_kind(&self) -> MediaKind {
        self.media_kind
    }

    pub fn range(&self) -> SegmentRange {
        self.range
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Completed and queued segment counts, shared by every fetch of a fetcher.
#[derive(Debug, Clone, Default)]
pub struct FetchProgress {
    completed: Arc<AtomicUsize>,
    total: Arc<AtomicUsize>,
}

impl FetchProgress {
    pub fn completed(&self) -> usize {
        self.completed.load(Ordering::Relaxed)
    }

    pub fn total(&self) -> usize {
        self.total.load(Ordering::Relaxed)
    }

    fn queue(&self, count: usize) {
        self.total.fetch_add(count, Ordering::Relaxed);
    }

    fn complete(&self) -> (usize, usize) {
        let completed = self.completed.fetch_add(1, Ordering::Relaxed) + 1;
        (completed, self.total())
    }
}

pub struct SegmentFetcher {
    client: HttpClient,
    concurrency: NonZeroU32,
    retry: RetryPolicy,
    progress: FetchProgress,
}

impl SegmentFetcher {
    /// Upper bound for parallel requests.
    pub const MAX_CONCURRENCY: NonZeroU32 = match NonZeroU32::new(4) {
        Some(n) => n,
        None => unreachable!(),
    };

    pub fn new(client: HttpClient) -> Self {
        Self {
            client,
            concurrency: Self::MAX_CONCURRENCY,
            retry: RetryPolicy::default(),
            progress: FetchProgress::default(),
        }
    }

    /// Sets the number of parallel requests, clamped to [Self::MAX_CONCURRENCY].
    pub fn concurrency(mut self, concurrency: NonZeroU32) -> Self {
        if concurrency > Self::MAX_CONCURRENCY {
            tracing::warn!(
                "{concurrency} download threads requested, using {} instead.",
                Self::MAX_CONCURRENCY
            );
        }
        self.concurrency = concurrency.min(Self::MAX_CONCURRENCY);
        self
    }

    pub fn retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn get_concurrency(&self) -> NonZeroU32 {
        self.concurrency
    }

    pub fn progress(&self) -> FetchProgress {
        self.progress.clone()
    }

    /// Downloads every segment of `range` for `descriptor` over HTTP.
    pub async fn fetch(
        &self,
        descriptor: &StreamDescriptor,
        range: SegmentRange,
    ) -> DvrResult<SegmentBlob> {
        let source = HttpSegmentSource::new(self.client.clone(), descriptor);
        self.fetch_from(source, descriptor.media_kind, range).await
    }

    /// Downloads every segment of `range` from `source`.
    pub async fn fetch_from<S>(
        &self,
        source: S,
        media_kind: MediaKind,
        range: SegmentRange,
    ) -> DvrResult<SegmentBlob>
    where
        S: SegmentSource + Send + Sync + 'static,
    {
        tracing::info!(
            "Start downloading {} {media_kind} segments {range} with {} thread(s).",
            range.len(),
            self.concurrency
        );

        let source = Arc::new(source);
        let pool = WorkerPool::new(self.concurrency);
        self.progress.queue(range.len() as usize);

        let payloads = pool
            .run(range.iter().collect(), |index| {
                let source = source.clone();
                let retry = self.retry;
                let progress = self.progress.clone();
                async move {
                    let (payload, attempts) =
                        retry.run(index, || source.fetch_segment(index)).await?;

                    let (downloaded, total) = progress.complete();
                    let percentage = if total == 0 {
                        0.
                    } else {
                        downloaded as f32 / total as f32 * 100.
                    };
                    tracing::info!(
                        attempts,
                        "Processing {media_kind} segment {index} finished. ({downloaded} / {total} or {percentage:.2}%)"
                    );
                    Ok(payload)
                }
            })
            .await?;

        let mut data = BytesMut::with_capacity(payloads.iter().map(Bytes::len).sum());
        for payload in payloads {
            data.extend_from_slice(&payload);
        }

        Ok(SegmentBlob::new(media_kind, range, data.freeze()))
    }
}
