use std::{future::Future, num::NonZeroU32, sync::Arc};

use tokio::{sync::Semaphore, task::JoinSet};

use crate::DvrResult;

/// Bounded pool for indexed work.
///
/// At most `concurrency` tasks run at the same time. Results are stored in the
/// slot of the item that produced them, so [WorkerPool::run] always returns them
/// in submission order no matter which task finished first.
#[derive(Debug, Clone)]
pub struct WorkerPool {
    permits: Arc<Semaphore>,
}

impl WorkerPool {
    pub fn new(concurrency: NonZeroU32) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(concurrency.get() as usize)),
        }
    }

    /// Runs `task` once per item and waits for all of them.
    ///
    /// The first error aborts every task that is still running.
    pub async fn run<I, T, F, Fut>(&self, items: Vec<I>, task: F) -> DvrResult<Vec<T>>
    where
        I: Send + 'static,
        T: Send + 'static,
        F: Fn(I) -> Fut,
        Fut: Future<Output = DvrResult<T>> + Send + 'static,
    {
        let mut slots: Vec<Option<T>> = std::iter::repeat_with(|| None).take(items.len()).collect();
        let mut tasks = JoinSet::new();

        for (position, item) in items.into_iter().enumerate() {
            // only fails when the semaphore is closed, which never happens
            let Ok(permit) = self.permits.clone().acquire_owned().await else {
                break;
            };
            let future = task(item);
            tasks.spawn(async move {
                let result = future.await;
                // release the slot as soon as the work is done
                drop(permit);
                (position, result)
            });

            // collect whatever already finished so a failure stops submission early
            while let Some(joined) = tasks.try_join_next() {
                let (position, result) = joined?;
                slots[position] = Some(result?);
            }
        }

        while let Some(joined) = tasks.join_next().await {
            let (position, result) = joined?;
            slots[position] = Some(result?);
        }

        Ok(slots.into_iter().flatten().collect())
    }
}
