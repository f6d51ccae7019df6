use crate::{
    accumulator::AccumulatedDocument,
    constants::STORE_BATCH_LIMIT,
    retry::RetryPolicy,
    store::documents::{DocumentStore, Mutation},
};

/// Outcome of one flush. Sub-batches fail independently; a failed one never
/// undoes the ones committed before it.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct BatchResult {
    pub committed_batches: usize,
    pub failed_batches: usize,
    pub mutations_written: usize,
    pub mutations_failed: usize,
    pub errors: Vec<String>,
}

impl BatchResult {
    pub fn is_success(&self) -> bool {
        self.failed_batches == 0
    }
}

/// Issues merge writes in sub-batches no larger than `batch_size`.
pub struct UpsertDispatcher<'a, S: DocumentStore> {
    store: &'a S,
    batch_size: usize,
    retry: RetryPolicy,
}

impl<'a, S: DocumentStore> UpsertDispatcher<'a, S> {
    pub fn new(store: &'a S, batch_size: usize) -> Self {
        Self {
            store,
            batch_size: batch_size.clamp(1, STORE_BATCH_LIMIT),
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    pub async fn flush(&self, document: &AccumulatedDocument) -> BatchResult {
        self.dispatch(&document.to_mutations()).await
    }

    pub async fn dispatch(&self, mutations: &[Mutation]) -> BatchResult {
        let mut result = BatchResult::default();
        let total = mutations.len().div_ceil(self.batch_size);

        for (idx, chunk) in mutations.chunks(self.batch_size).enumerate() {
            let label = format!("sub-batch {}/{}", idx + 1, total);
            let outcome = self
                .retry
                .run(&label, || async move { self.store.commit(chunk) })
                .await;
            match outcome {
                Ok(()) => {
                    log::debug!("{label}: committed {} mutations", chunk.len());
                    result.committed_batches += 1;
                    result.mutations_written += chunk.len();
                }
                Err(err) => {
                    log::error!("{label}: giving up on {} mutations: {err}", chunk.len());
                    result.failed_batches += 1;
                    result.mutations_failed += chunk.len();
                    result.errors.push(format!("{label}: {err}"));
                }
            }
        }
        result
    }
}
