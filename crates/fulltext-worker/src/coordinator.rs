//! Task identity, dispatch, and status resolution (§4.5).

use chrono::Utc;
use fulltext_core::{Bucket, Error, Extraction, Format, PdfSource, Result, Store, TaskQueue, TaskState};
use serde_json::json;
use std::sync::Arc;

/// The two PDF source adapters, one per bucket. `arxiv` uses the canonical
/// announced-e-print fetcher; `submission` uses the preview fetcher.
pub struct Sources {
    pub canonical: Arc<dyn PdfSource>,
    pub preview: Arc<dyn PdfSource>,
}

impl Sources {
    pub fn for_bucket(&self, bucket: Bucket) -> &Arc<dyn PdfSource> {
        match bucket {
            Bucket::Arxiv => &self.canonical,
            Bucket::Submission => &self.preview,
        }
    }
}

/// Depends on `Store`, both `PdfSource` adapters, and a `TaskQueue`
/// implementation. Does not depend on the extractor directly: extraction
/// runs in the worker tier, not the request tier (§5).
pub struct Coordinator {
    store: Arc<dyn Store>,
    sources: Sources,
    queue: Arc<dyn TaskQueue>,
    extractor_version: String,
}

impl Coordinator {
    pub fn new(
        store: Arc<dyn Store>,
        sources: Sources,
        queue: Arc<dyn TaskQueue>,
        extractor_version: String,
    ) -> Self {
        Self {
            store,
            sources,
            queue,
            extractor_version,
        }
    }

    pub fn extractor_version(&self) -> &str {
        &self.extractor_version
    }

    pub fn sources(&self) -> &Sources {
        &self.sources
    }

    /// Writes the pre-emptive `in_progress` record, then enqueues. The
    /// store write happens strictly before the enqueue so a reader never
    /// observes a task on the queue with nothing in the store (§5).
    pub async fn create_task(
        &self,
        identifier: &str,
        bucket: Bucket,
        owner: Option<String>,
        token: Option<String>,
    ) -> Result<String> {
        let version = self.extractor_version.clone();
        let extraction = Extraction::new_in_progress(
            identifier.to_string(),
            bucket,
            version.clone(),
            owner.clone(),
            Utc::now(),
        );
        let task_id = extraction.task_id.clone();

        self.store.store(&extraction, None).await?;

        let args = json!({
            "identifier": identifier,
            "bucket": bucket.as_str(),
            "version": version,
            "owner": owner,
            "token": token,
        });
        self.queue
            .publish(&task_id, "extract", args)
            .await
            .map_err(|e| Error::TaskCreationFailed(e.to_string()))?;

        Ok(task_id)
    }

    /// Looks up the backend state by the same task-id formula used at
    /// creation, then reads the authoritative record back from the store
    /// (the worker persists terminal status there too). `PENDING`/no record
    /// on the backend raises `no-such-task`.
    pub async fn get_task(
        &self,
        identifier: &str,
        bucket: Bucket,
        version: &str,
    ) -> Result<Extraction> {
        let task_id = Extraction::task_id(bucket, identifier, version);
        match self.queue.lookup(&task_id).await? {
            TaskState::NoSuchTask => Err(Error::NoSuchTask(task_id)),
            TaskState::InProgress | TaskState::Failed { .. } | TaskState::Succeeded { .. } => {
                self.store
                    .retrieve(identifier, bucket, Some(version), Format::Plain, true)
                    .await
            }
        }
    }

    /// Whether a metadata record already exists for this identifier under
    /// the current extractor version, used by the `force=false` idempotence
    /// check in §4.7's `start_extraction`.
    pub async fn existing_task(&self, identifier: &str, bucket: Bucket) -> Option<Extraction> {
        self.store
            .retrieve(
                identifier,
                bucket,
                Some(&self.extractor_version),
                Format::Plain,
                true,
            )
            .await
            .ok()
    }

    /// Health probe: publish a no-op task; optionally block for its result.
    pub async fn is_available(&self, await_result: bool) -> bool {
        self.queue.is_available(await_result).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::InMemoryTaskQueue;
    use async_trait::async_trait;
    use fulltext_core::{Extraction as CoreExtraction, PdfBytes};
    use std::collections::HashMap;
    use tokio::sync::Mutex;

    struct NullSource;

    #[async_trait]
    impl PdfSource for NullSource {
        async fn exists(&self, _identifier: &str, _token: Option<&str>) -> Result<bool> {
            Ok(true)
        }
        async fn get_owner(
            &self,
            _identifier: &str,
            _token: Option<&str>,
        ) -> Result<Option<String>> {
            Ok(None)
        }
        async fn retrieve(&self, _identifier: &str, _token: Option<&str>) -> Result<PdfBytes> {
            Ok(PdfBytes {
                bytes: vec![],
                owner: None,
            })
        }
        async fn is_available(&self) -> bool {
            true
        }
    }

    struct MemStore(Mutex<HashMap<String, CoreExtraction>>);

    fn key(identifier: &str, bucket: Bucket, version: &str) -> String {
        format!("{}/{}/{}", bucket.as_str(), identifier, version)
    }

    #[async_trait]
    impl Store for MemStore {
        async fn store(&self, extraction: &CoreExtraction, _format: Option<Format>) -> Result<()> {
            let k = key(&extraction.identifier, extraction.bucket, &extraction.version);
            self.0.lock().await.insert(k, extraction.clone());
            Ok(())
        }

        async fn retrieve(
            &self,
            identifier: &str,
            bucket: Bucket,
            version: Option<&str>,
            _format: Format,
            _meta_only: bool,
        ) -> Result<CoreExtraction> {
            let v = version.ok_or_else(|| Error::DoesNotExist(identifier.to_string()))?;
            let k = key(identifier, bucket, v);
            self.0
                .lock()
                .await
                .get(&k)
                .cloned()
                .ok_or_else(|| Error::DoesNotExist(identifier.to_string()))
        }

        async fn is_available(&self) -> bool {
            true
        }
    }

    fn coordinator() -> Coordinator {
        let (queue, _rx) = InMemoryTaskQueue::new(4);
        Coordinator::new(
            Arc::new(MemStore(Mutex::new(HashMap::new()))),
            Sources {
                canonical: Arc::new(NullSource),
                preview: Arc::new(NullSource),
            },
            Arc::new(queue),
            "1.0".to_string(),
        )
    }

    #[tokio::test]
    async fn create_task_writes_in_progress_record_before_returning() {
        let c = coordinator();
        c.create_task("1801.00123", Bucket::Arxiv, None, None)
            .await
            .unwrap();
        let extraction = c
            .get_task("1801.00123", Bucket::Arxiv, "1.0")
            .await
            .unwrap();
        assert_eq!(extraction.status, fulltext_core::Status::InProgress);
    }

    #[tokio::test]
    async fn unknown_task_is_no_such_task() {
        let c = coordinator();
        let err = c.get_task("nope", Bucket::Arxiv, "1.0").await.unwrap_err();
        assert!(matches!(err, Error::NoSuchTask(_)));
    }

    #[tokio::test]
    async fn existing_task_is_visible_for_idempotence_check() {
        let c = coordinator();
        assert!(c.existing_task("1801.00123", Bucket::Arxiv).await.is_none());
        c.create_task("1801.00123", Bucket::Arxiv, None, None)
            .await
            .unwrap();
        assert!(c.existing_task("1801.00123", Bucket::Arxiv).await.is_some());
    }
}
