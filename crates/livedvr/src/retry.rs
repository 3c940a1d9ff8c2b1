use std::{future::Future, num::NonZeroU32, time::Duration};

use crate::{DvrError, DvrResult};

/// How a single segment request is repeated until it succeeds. The default
/// never gives up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// `None` retries forever.
    pub max_attempts: Option<NonZeroU32>,
    /// Constant delay between two attempts.
    pub delay: Duration,
}

impl RetryPolicy {
    pub const DEFAULT_DELAY: Duration = Duration::from_secs(1);

    pub fn indefinite(delay: Duration) -> Self {
        Self {
            max_attempts: None,
            delay,
        }
    }

    pub fn bounded(max_attempts: NonZeroU32, delay: Duration) -> Self {
        Self {
            max_attempts: Some(max_attempts),
            delay,
        }
    }

    /// Runs `operation` until it succeeds or the attempt limit is reached.
    ///
    /// Returns the value together with the number of attempts it took.
    pub async fn run<T, F, Fut>(&self, index: u64, mut operation: F) -> DvrResult<(T, u32)>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = DvrResult<T>>,
    {
        let mut attempts = 0u32;
        loop {
            attempts = attempts.saturating_add(1);
            match operation().await {
                Ok(value) => return Ok((value, attempts)),
                Err(e) => {
                    if self.max_attempts.is_some_and(|max| attempts >= max.get()) {
                        tracing::error!("Segment {index} failed, max retries exceed, drop. {e}");
                        return Err(DvrError::SegmentFetch {
                            index,
                            attempts,
                            reason: e.to_string(),
                        });
                    }
                    tracing::warn!("Segment {index} failed, retry later. {e}");
                    tokio::time::sleep(self.delay).await;
                }
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::indefinite(Self::DEFAULT_DELAY)
    }
}
