//! C7: the three request handlers (§4.7), framework-agnostic and
//! unit-testable without an HTTP server. `http.rs` is the thin axum layer
//! that extracts path/query parameters and calls straight into these.

use fulltext_core::{Bucket, Error, Extraction, Format, Result, Status, Store};
use fulltext_worker::Coordinator;
use std::sync::Arc;

/// Resolves a claimed identity against an extraction's owner. Authorization
/// failure is reported as `NotFound`, never a distinct "forbidden" status,
/// to avoid disclosing existence (§4.7).
pub type Authorizer = Arc<dyn Fn(&str, Option<&str>) -> bool + Send + Sync>;

/// No identity provider is implemented (§1); the bundled service runs with
/// an authorizer that approves every request.
pub fn allow_all() -> Authorizer {
    Arc::new(|_identifier, _owner| true)
}

#[derive(Debug, PartialEq, Eq)]
pub enum StartOutcome {
    Accepted { status_location: String },
    SeeOther { location: String },
    NotFound,
}

#[derive(Debug)]
pub enum RetrieveOutcome {
    Found(Extraction),
    SeeOther { location: String },
    NotFound,
}

/// Health aggregate: `store.is_available()` AND
/// `coordinator.is_available(await_result=true)`.
pub async fn service_status(store: &dyn Store, coordinator: &Coordinator) -> bool {
    store.is_available().await && coordinator.is_available(true).await
}

/// Pre-flight: reject unsupported bucket, verify upstream existence,
/// resolve owner, authorize. Without `force`, an existing metadata record
/// redirects instead of re-creating a task.
pub async fn start_extraction(
    coordinator: &Coordinator,
    bucket: &str,
    identifier: &str,
    token: Option<&str>,
    force: bool,
    authorizer: &Authorizer,
) -> Result<StartOutcome> {
    let Some(bucket) = Bucket::from_str(bucket) else {
        return Ok(StartOutcome::NotFound);
    };

    let source = coordinator.sources().for_bucket(bucket);
    if !source.exists(identifier, token).await? {
        return Ok(StartOutcome::NotFound);
    }
    let owner = source.get_owner(identifier, token).await?;

    if !authorizer(identifier, owner.as_deref()) {
        return Ok(StartOutcome::NotFound);
    }

    if !force {
        if let Some(existing) = coordinator.existing_task(identifier, bucket).await {
            let location = if existing.completed() {
                format!(
                    "/{}/{}/version/{}",
                    bucket.as_str(),
                    identifier,
                    existing.version
                )
            } else {
                format!(
                    "/{}/{}/version/{}/status",
                    bucket.as_str(),
                    identifier,
                    existing.version
                )
            };
            return Ok(StartOutcome::SeeOther { location });
        }
    }

    coordinator
        .create_task(identifier, bucket, owner, token.map(str::to_string))
        .await?;
    Ok(StartOutcome::Accepted {
        status_location: format!("/{}/{}/status", bucket.as_str(), identifier),
    })
}

/// Retrieves content or metadata. If the record is present but content is
/// absent and status is `in_progress`, redirects to the status endpoint
/// rather than returning a partial body.
pub async fn retrieve(
    store: &dyn Store,
    identifier: &str,
    bucket: &str,
    version: Option<&str>,
    format: &str,
    authorizer: &Authorizer,
) -> Result<RetrieveOutcome> {
    let Some(bucket) = Bucket::from_str(bucket) else {
        return Ok(RetrieveOutcome::NotFound);
    };
    let Some(format) = Format::from_str(format) else {
        return Ok(RetrieveOutcome::NotFound);
    };

    let extraction = match store.retrieve(identifier, bucket, version, format, false).await {
        Ok(extraction) => extraction,
        Err(Error::DoesNotExist(_)) => return Ok(RetrieveOutcome::NotFound),
        Err(e) => return Err(e),
    };

    if !authorizer(identifier, extraction.owner.as_deref()) {
        return Ok(RetrieveOutcome::NotFound);
    }

    if extraction.content.is_none() && !extraction.completed() {
        return Ok(RetrieveOutcome::SeeOther {
            location: format!(
                "/{}/{}/version/{}/status",
                bucket.as_str(),
                identifier,
                extraction.version
            ),
        });
    }

    Ok(RetrieveOutcome::Found(extraction))
}

#[derive(Debug, PartialEq, Eq)]
pub enum StatusOutcome {
    InProgress,
    Failed { reason: Option<String> },
    SeeOther { location: String },
    NotFound,
}

/// Distinct status endpoint (§4.7, §6.1 row 4): `in_progress`/`failed` are
/// reported in place as a 200 payload, `succeeded` redirects to the content
/// URL instead of re-serving it here.
pub async fn task_status(
    coordinator: &Coordinator,
    bucket: &str,
    identifier: &str,
    version: Option<&str>,
    authorizer: &Authorizer,
) -> Result<StatusOutcome> {
    let Some(bucket) = Bucket::from_str(bucket) else {
        return Ok(StatusOutcome::NotFound);
    };
    let version = version.unwrap_or_else(|| coordinator.extractor_version());

    let extraction = match coordinator.get_task(identifier, bucket, version).await {
        Ok(extraction) => extraction,
        Err(Error::NoSuchTask(_)) | Err(Error::DoesNotExist(_)) => {
            return Ok(StatusOutcome::NotFound)
        }
        Err(e) => return Err(e),
    };

    if !authorizer(identifier, extraction.owner.as_deref()) {
        return Ok(StatusOutcome::NotFound);
    }

    Ok(match extraction.status {
        Status::InProgress => StatusOutcome::InProgress,
        Status::Failed => StatusOutcome::Failed {
            reason: extraction.exception,
        },
        Status::Succeeded => StatusOutcome::SeeOther {
            location: format!(
                "/{}/{}/version/{}",
                bucket.as_str(),
                identifier,
                extraction.version
            ),
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use fulltext_core::{Extraction as CoreExtraction, PdfBytes, PdfSource, TaskQueue};
    use fulltext_worker::{queue::InMemoryTaskQueue, Sources};
    use std::collections::HashMap;
    use tokio::sync::Mutex;

    struct FixedSource {
        exists: bool,
        owner: Option<String>,
    }

    #[async_trait]
    impl PdfSource for FixedSource {
        async fn exists(&self, _identifier: &str, _token: Option<&str>) -> Result<bool> {
            Ok(self.exists)
        }
        async fn get_owner(
            &self,
            _identifier: &str,
            _token: Option<&str>,
        ) -> Result<Option<String>> {
            Ok(self.owner.clone())
        }
        async fn retrieve(&self, _identifier: &str, _token: Option<&str>) -> Result<PdfBytes> {
            Ok(PdfBytes {
                bytes: vec![],
                owner: self.owner.clone(),
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
            self.0
                .lock()
                .await
                .get(&key(identifier, bucket, v))
                .cloned()
                .ok_or_else(|| Error::DoesNotExist(identifier.to_string()))
        }
        async fn is_available(&self) -> bool {
            true
        }
    }

    fn coordinator(store: Arc<dyn Store>, exists: bool, owner: Option<String>) -> Coordinator {
        let (queue, _rx) = InMemoryTaskQueue::new(4);
        Coordinator::new(
            store,
            Sources {
                canonical: Arc::new(FixedSource {
                    exists,
                    owner: owner.clone(),
                }),
                preview: Arc::new(FixedSource { exists, owner }),
            },
            Arc::new(queue),
            "1.0".to_string(),
        )
    }

    #[tokio::test]
    async fn unsupported_bucket_is_not_found() {
        let c = coordinator(Arc::new(MemStore(Mutex::new(HashMap::new()))), true, None);
        let outcome = start_extraction(&c, "submissions", "x", None, false, &allow_all())
            .await
            .unwrap();
        assert_eq!(outcome, StartOutcome::NotFound);
    }

    #[tokio::test]
    async fn missing_upstream_resource_is_not_found() {
        let c = coordinator(Arc::new(MemStore(Mutex::new(HashMap::new()))), false, None);
        let outcome = start_extraction(&c, "arxiv", "x", None, false, &allow_all())
            .await
            .unwrap();
        assert_eq!(outcome, StartOutcome::NotFound);
    }

    #[tokio::test]
    async fn first_submit_is_accepted_second_redirects() {
        let c = coordinator(Arc::new(MemStore(Mutex::new(HashMap::new()))), true, None);
        let first = start_extraction(&c, "arxiv", "1801.00123", None, false, &allow_all())
            .await
            .unwrap();
        assert!(matches!(first, StartOutcome::Accepted { .. }));

        let second = start_extraction(&c, "arxiv", "1801.00123", None, false, &allow_all())
            .await
            .unwrap();
        assert!(matches!(second, StartOutcome::SeeOther { .. }));
    }

    #[tokio::test]
    async fn retrieve_in_progress_redirects_to_status() {
        let store: Arc<dyn Store> = Arc::new(MemStore(Mutex::new(HashMap::new())));
        let c = coordinator(store.clone(), true, None);
        start_extraction(&c, "arxiv", "1801.00123", None, false, &allow_all())
            .await
            .unwrap();

        let outcome = retrieve(&*store, "1801.00123", "arxiv", Some("1.0"), "plain", &allow_all())
            .await
            .unwrap();
        assert!(matches!(outcome, RetrieveOutcome::SeeOther { .. }));
    }

    #[tokio::test]
    async fn retrieve_unknown_identifier_is_not_found() {
        let store: Arc<dyn Store> = Arc::new(MemStore(Mutex::new(HashMap::new())));
        let outcome = retrieve(&*store, "nope", "arxiv", Some("1.0"), "plain", &allow_all())
            .await
            .unwrap();
        assert!(matches!(outcome, RetrieveOutcome::NotFound));
    }

    #[tokio::test]
    async fn status_in_progress_is_reported_directly_not_redirected() {
        let store: Arc<dyn Store> = Arc::new(MemStore(Mutex::new(HashMap::new())));
        let c = coordinator(store, true, None);
        start_extraction(&c, "arxiv", "1801.00123", None, false, &allow_all())
            .await
            .unwrap();

        let outcome = task_status(&c, "arxiv", "1801.00123", None, &allow_all())
            .await
            .unwrap();
        assert_eq!(outcome, StatusOutcome::InProgress);
    }

    #[tokio::test]
    async fn status_succeeded_redirects_to_content() {
        let store: Arc<dyn Store> = Arc::new(MemStore(Mutex::new(HashMap::new())));
        let (queue, _rx) = InMemoryTaskQueue::new(4);
        let queue = Arc::new(queue);
        let c = Coordinator::new(
            store.clone(),
            Sources {
                canonical: Arc::new(FixedSource {
                    exists: true,
                    owner: None,
                }),
                preview: Arc::new(FixedSource {
                    exists: true,
                    owner: None,
                }),
            },
            queue.clone(),
            "1.0".to_string(),
        );
        start_extraction(&c, "arxiv", "1801.00123", None, false, &allow_all())
            .await
            .unwrap();

        let task_id = CoreExtraction::task_id(Bucket::Arxiv, "1801.00123", "1.0");
        queue
            .report(&task_id, fulltext_core::TaskState::Succeeded { owner: None })
            .await
            .unwrap();
        let existing = store
            .retrieve("1801.00123", Bucket::Arxiv, Some("1.0"), Format::Plain, true)
            .await
            .unwrap();
        store
            .store(&existing.succeeded(chrono::Utc::now(), "full text".to_string()), None)
            .await
            .unwrap();

        let outcome = task_status(&c, "arxiv", "1801.00123", None, &allow_all())
            .await
            .unwrap();
        assert_eq!(
            outcome,
            StatusOutcome::SeeOther {
                location: "/arxiv/1801.00123/version/1.0".to_string()
            }
        );
    }

    #[tokio::test]
    async fn status_unknown_task_is_not_found() {
        let store: Arc<dyn Store> = Arc::new(MemStore(Mutex::new(HashMap::new())));
        let c = coordinator(store, true, None);
        let outcome = task_status(&c, "arxiv", "nope", None, &allow_all())
            .await
            .unwrap();
        assert_eq!(outcome, StatusOutcome::NotFound);
    }
}
