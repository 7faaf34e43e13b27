//! The worker task: `extract()` (§4.6). Runs in the worker tier, never the
//! request tier. Every step after loading metadata must leave a terminal
//! record in the store on failure, then propagate the error so the queue
//! records `FAILURE`.

use crate::coordinator::Sources;
use chrono::Utc;
use fulltext_core::{Bucket, Error, Extraction, Extractor, Format, Result, Store, TaskQueue, TaskState};
use fulltext_local::normalize::normalize_text_psv;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::fs;

/// Collaborators a worker needs to run one extraction. Holds no per-task
/// state; `extract` is free-standing over this context so many tasks can
/// run concurrently against one `WorkerContext` (bounded by the worker
/// pool's own concurrency limit, not by this type).
pub struct WorkerContext {
    pub store: Arc<dyn Store>,
    pub sources: Sources,
    pub extractor: Arc<dyn Extractor>,
    pub queue: Arc<dyn TaskQueue>,
    pub workdir: PathBuf,
}

/// The queue-result payload (§4.6 step 6): deliberately excludes `content`
/// so the backend's stored result stays small.
#[derive(Debug, Serialize)]
pub struct ExtractOutcome {
    pub identifier: String,
    pub bucket: String,
    pub version: String,
    pub status: String,
    pub owner: Option<String>,
    pub task_id: String,
}

fn stub_name(task_id: &str) -> String {
    task_id.replace("::", "_").replace('/', "-")
}

/// Writes the terminal failure record and reports it to the queue, then
/// returns the original error so the caller can propagate it.
async fn fail(
    ctx: &WorkerContext,
    meta: &Extraction,
    task_id: &str,
    err: Error,
) -> Error {
    let failed = meta.failed(Utc::now(), err.to_string());
    if let Err(store_err) = ctx.store.store(&failed, None).await {
        tracing::error!(%task_id, error = %store_err, "failed to persist failure record");
    }
    if let Err(report_err) = ctx
        .queue
        .report(
            task_id,
            TaskState::Failed {
                reason: err.to_string(),
            },
        )
        .await
    {
        tracing::error!(%task_id, error = %report_err, "failed to report failure to queue");
    }
    err
}

/// Runs the full extraction pipeline for one already-published task.
pub async fn extract(
    ctx: &WorkerContext,
    identifier: &str,
    bucket: Bucket,
    version: &str,
    token: Option<&str>,
) -> Result<ExtractOutcome> {
    let task_id = Extraction::task_id(bucket, identifier, version);

    // Step 1: the coordinator must have already written this record.
    let meta = ctx
        .store
        .retrieve(identifier, bucket, Some(version), Format::Plain, true)
        .await
        .map_err(|_| Error::NoSuchTask(task_id.clone()))?;

    tracing::info!(%task_id, "worker picked up task");

    // Step 2: retrieve the PDF from the bucket's adapter.
    let source = ctx.sources.for_bucket(bucket);
    let pdf = match source.retrieve(identifier, token).await {
        Ok(pdf) => pdf,
        Err(e) => return Err(fail(ctx, &meta, &task_id, e).await),
    };

    // Step 3: copy into workdir, run the sandbox, always clean up the PDF.
    let pdf_path = ctx.workdir.join(format!("{}.pdf", stub_name(&task_id)));
    if let Err(e) = fs::write(&pdf_path, &pdf.bytes).await {
        let err = Error::ContainerError(e.to_string());
        return Err(fail(ctx, &meta, &task_id, err).await);
    }

    let extraction_result = ctx.extractor.do_extraction(&pdf_path).await;
    let _ = fs::remove_file(&pdf_path).await;

    let text = match extraction_result {
        Ok(text) => text,
        Err(e) => return Err(fail(ctx, &meta, &task_id, e).await),
    };

    // Step 4: persist the plain text; this is the success boundary.
    let owner = pdf.owner.or_else(|| meta.owner.clone());
    let succeeded = meta.succeeded(Utc::now(), text.clone());
    let succeeded = Extraction { owner, ..succeeded };
    ctx.store.store(&succeeded, Some(Format::Plain)).await?;

    tracing::info!(%task_id, "plain text stored, extraction considered succeeded");

    // Step 5: PSV is best-effort; failures are logged, never reverse step 4.
    let psv = normalize_text_psv(&text);
    let psv_record = Extraction {
        content: Some(psv),
        ..succeeded.clone()
    };
    if let Err(e) = ctx.store.store(&psv_record, Some(Format::Psv)).await {
        tracing::warn!(%task_id, error = %e, "psv normalisation store failed, plain text stands");
    }

    ctx.queue
        .report(
            &task_id,
            TaskState::Succeeded {
                owner: succeeded.owner.clone(),
            },
        )
        .await?;

    // Step 6: content-stripped result.
    Ok(ExtractOutcome {
        identifier: succeeded.identifier.clone(),
        bucket: succeeded.bucket.as_str().to_string(),
        version: succeeded.version.clone(),
        status: succeeded.status.as_str().to_string(),
        owner: succeeded.owner.clone(),
        task_id,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coordinator::Sources;
    use crate::queue::InMemoryTaskQueue;
    use async_trait::async_trait;
    use fulltext_core::{Bucket, PdfBytes, Status};
    use std::collections::HashMap;
    use std::path::Path;
    use tokio::sync::Mutex;

    struct StubSource {
        bytes: Vec<u8>,
    }

    #[async_trait]
    impl fulltext_core::PdfSource for StubSource {
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
                bytes: self.bytes.clone(),
                owner: None,
            })
        }
        async fn is_available(&self) -> bool {
            true
        }
    }

    struct StubExtractor {
        text: &'static str,
    }

    #[async_trait]
    impl Extractor for StubExtractor {
        async fn do_extraction(&self, _pdf_path: &Path) -> Result<String> {
            Ok(self.text.to_string())
        }
        async fn is_available(&self) -> bool {
            true
        }
    }

    struct FailingExtractor;

    #[async_trait]
    impl Extractor for FailingExtractor {
        async fn do_extraction(&self, _pdf_path: &Path) -> Result<String> {
            Err(Error::NoContent("empty output".to_string()))
        }
        async fn is_available(&self) -> bool {
            true
        }
    }

    struct MemStore(Mutex<HashMap<String, Extraction>>);

    fn key(identifier: &str, bucket: Bucket, version: &str) -> String {
        format!("{}/{}/{}", bucket.as_str(), identifier, version)
    }

    #[async_trait]
    impl Store for MemStore {
        async fn store(&self, extraction: &Extraction, _format: Option<Format>) -> Result<()> {
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
        ) -> Result<Extraction> {
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

    async fn seeded_context(extractor: Arc<dyn Extractor>, workdir: PathBuf) -> (WorkerContext, String) {
        let store = Arc::new(MemStore(Mutex::new(HashMap::new())));
        let meta = Extraction::new_in_progress(
            "1801.00123".to_string(),
            Bucket::Arxiv,
            "1.0".to_string(),
            None,
            Utc::now(),
        );
        let task_id = meta.task_id.clone();
        store.store(&meta, None).await.unwrap();
        let (queue, _rx) = InMemoryTaskQueue::new(4);
        queue
            .publish(&task_id, "extract", serde_json::json!({}))
            .await
            .unwrap();
        let ctx = WorkerContext {
            store,
            sources: Sources {
                canonical: Arc::new(StubSource {
                    bytes: b"%PDF-1.4 stub".to_vec(),
                }),
                preview: Arc::new(StubSource {
                    bytes: b"%PDF-1.4 stub".to_vec(),
                }),
            },
            extractor,
            queue: Arc::new(queue),
            workdir,
        };
        (ctx, task_id)
    }

    #[tokio::test]
    async fn happy_path_stores_plain_and_psv_and_reports_success() {
        let dir = tempfile::tempdir().unwrap();
        let (ctx, task_id) = seeded_context(
            Arc::new(StubExtractor {
                text: "This is a sentence. References\nSmith, 2020.",
            }),
            dir.path().to_path_buf(),
        )
        .await;

        let outcome = extract(&ctx, "1801.00123", Bucket::Arxiv, "1.0", None)
            .await
            .unwrap();
        assert_eq!(outcome.status, "succeeded");
        assert_eq!(outcome.task_id, task_id);

        let stored = ctx
            .store
            .retrieve("1801.00123", Bucket::Arxiv, Some("1.0"), Format::Plain, true)
            .await
            .unwrap();
        assert_eq!(stored.status, Status::Succeeded);
    }

    #[tokio::test]
    async fn sandbox_failure_writes_failed_record_and_propagates() {
        let dir = tempfile::tempdir().unwrap();
        let (ctx, _task_id) = seeded_context(Arc::new(FailingExtractor), dir.path().to_path_buf()).await;

        let err = extract(&ctx, "1801.00123", Bucket::Arxiv, "1.0", None)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NoContent(_)));

        let stored = ctx
            .store
            .retrieve("1801.00123", Bucket::Arxiv, Some("1.0"), Format::Plain, true)
            .await
            .unwrap();
        assert_eq!(stored.status, Status::Failed);
    }

    #[tokio::test]
    async fn unknown_task_id_fails_fast_with_no_such_task() {
        let dir = tempfile::tempdir().unwrap();
        let store: Arc<dyn Store> = Arc::new(MemStore(Mutex::new(HashMap::new())));
        let (queue, _rx) = InMemoryTaskQueue::new(4);
        let ctx = WorkerContext {
            store,
            sources: Sources {
                canonical: Arc::new(StubSource { bytes: vec![] }),
                preview: Arc::new(StubSource { bytes: vec![] }),
            },
            extractor: Arc::new(StubExtractor { text: "x" }),
            queue: Arc::new(queue),
            workdir: dir.path().to_path_buf(),
        };
        let err = extract(&ctx, "missing", Bucket::Arxiv, "1.0", None)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NoSuchTask(_)));
    }
}
