//! Filesystem-backed metadata + content persistence (component C2).
//!
//! Grounded on the authoritative `Storage` class in the source: path layout,
//! the two-file-per-extraction scheme, and float-parse-with-0.0-fallback
//! latest-version resolution are all carried over exactly, since §8.4 pins
//! the externally observable ordering.

use async_trait::async_trait;
use fulltext_core::{Bucket, Error, Extraction, Format, Result, Status, Store};
use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

fn old_style_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^([a-zA-Z][a-zA-Z.-]*)/(\d{7})$").expect("static pattern"))
}

fn new_style_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(\d{4})\.(\d{4,5})(v\d+)?$").expect("static pattern"))
}

/// The directory holding every version of one identifier, before the
/// version segment is appended. Mirrors `Storage._paper_path`.
fn paper_path(volume: &Path, bucket: Bucket, identifier: &str) -> PathBuf {
    let base = volume.join(bucket.as_str());
    if let Some(caps) = old_style_re().captures(identifier) {
        let prefix = &caps[1];
        let number = &caps[2];
        let yymm = &number[0..4];
        base.join(prefix).join(yymm).join(number)
    } else if let Some(caps) = new_style_re().captures(identifier) {
        let yymm = &caps[1];
        base.join(yymm).join(identifier)
    } else {
        base.join(identifier)
    }
}

fn try_float(s: &str) -> f64 {
    s.parse::<f64>().unwrap_or(0.0)
}

/// §4.1.1: enumerate direct subdirectories (ignoring dotfiles), sort
/// ascending by float-parse-or-0.0, take the last. A literal non-numeric
/// name such as `classic` sorts as 0.0, so it only wins when it is the sole
/// entry.
fn latest_version(dir: &Path) -> Result<String> {
    let entries = std::fs::read_dir(dir)
        .map_err(|_| Error::DoesNotExist(dir.display().to_string()))?;
    let mut names: Vec<String> = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| Error::StorageFailed(e.to_string()))?;
        let name = entry.file_name().to_string_lossy().to_string();
        if name.starts_with('.') {
            continue;
        }
        if entry.path().is_dir() {
            names.push(name);
        }
    }
    if names.is_empty() {
        return Err(Error::DoesNotExist(dir.display().to_string()));
    }
    names.sort_by(|a, b| try_float(a).partial_cmp(&try_float(b)).unwrap());
    Ok(names.pop().expect("checked non-empty above"))
}

fn meta_path(version_dir: &Path) -> PathBuf {
    version_dir.join("meta.json")
}

fn content_path(version_dir: &Path, format: Format) -> PathBuf {
    version_dir.join(format.as_str())
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
struct StoredMeta {
    identifier: String,
    bucket: Bucket,
    version: String,
    status: Status,
    started: chrono::DateTime<chrono::Utc>,
    ended: Option<chrono::DateTime<chrono::Utc>>,
    owner: Option<String>,
    task_id: String,
    exception: Option<String>,
}

impl From<&Extraction> for StoredMeta {
    fn from(e: &Extraction) -> Self {
        Self {
            identifier: e.identifier.clone(),
            bucket: e.bucket,
            version: e.version.clone(),
            status: e.status,
            started: e.started,
            ended: e.ended,
            owner: e.owner.clone(),
            task_id: e.task_id.clone(),
            exception: e.exception.clone(),
        }
    }
}

impl StoredMeta {
    fn into_extraction(self, content: Option<String>) -> Extraction {
        Extraction {
            identifier: self.identifier,
            bucket: self.bucket,
            version: self.version,
            status: self.status,
            started: self.started,
            ended: self.ended,
            owner: self.owner,
            task_id: self.task_id,
            exception: self.exception,
            content,
        }
    }
}

/// Filesystem-rooted `Store` implementation. One `FsStore` per configured
/// `STORAGE_VOLUME`.
pub struct FsStore {
    volume: PathBuf,
}

impl FsStore {
    /// Creates the volume directory if missing. Fails with
    /// `ConfigurationError` if it cannot be created or is not writable.
    pub fn new(volume: PathBuf) -> Result<Self> {
        std::fs::create_dir_all(&volume)
            .map_err(|e| Error::ConfigurationError(format!("{}: {e}", volume.display())))?;
        let probe = volume.join(".fulltext-store-probe");
        std::fs::write(&probe, b"ok")
            .map_err(|e| Error::ConfigurationError(format!("{}: {e}", volume.display())))?;
        let _ = std::fs::remove_file(&probe);
        Ok(Self { volume })
    }

    fn version_dir(&self, bucket: Bucket, identifier: &str, version: &str) -> PathBuf {
        paper_path(&self.volume, bucket, identifier).join(version)
    }
}

#[async_trait]
impl Store for FsStore {
    async fn store(&self, extraction: &Extraction, format: Option<Format>) -> Result<()> {
        let dir = self.version_dir(extraction.bucket, &extraction.identifier, &extraction.version);
        std::fs::create_dir_all(&dir).map_err(|e| Error::StorageFailed(e.to_string()))?;

        let meta = StoredMeta::from(extraction);
        let meta_json =
            serde_json::to_vec_pretty(&meta).map_err(|e| Error::StorageFailed(e.to_string()))?;
        std::fs::write(meta_path(&dir), meta_json).map_err(|e| Error::StorageFailed(e.to_string()))?;

        if let (Some(format), Some(content)) = (format, extraction.content.as_ref()) {
            std::fs::write(content_path(&dir, format), content.as_bytes())
                .map_err(|e| Error::StorageFailed(e.to_string()))?;
        }
        Ok(())
    }

    async fn retrieve(
        &self,
        identifier: &str,
        bucket: Bucket,
        version: Option<&str>,
        format: Format,
        meta_only: bool,
    ) -> Result<Extraction> {
        let identifier_dir = paper_path(&self.volume, bucket, identifier);
        let version = match version {
            Some(v) => v.to_string(),
            None => latest_version(&identifier_dir)?,
        };
        let dir = identifier_dir.join(&version);

        let meta_bytes = std::fs::read(meta_path(&dir))
            .map_err(|_| Error::DoesNotExist(format!("{identifier}@{version}")))?;
        let meta: StoredMeta =
            serde_json::from_slice(&meta_bytes).map_err(|e| Error::StorageFailed(e.to_string()))?;
        if meta.bucket != bucket {
            return Err(Error::StorageFailed(format!(
                "bucket mismatch for {identifier}@{version}: stored {}, expected {}",
                meta.bucket, bucket
            )));
        }

        let content = if meta_only {
            None
        } else {
            // Missing content blob is non-fatal: it is how "in progress" and
            // "failed" are observable to a reader (§4.1).
            std::fs::read_to_string(content_path(&dir, format)).ok()
        };

        Ok(meta.into_extraction(content))
    }

    async fn is_available(&self) -> bool {
        let probe = self.volume.join(".fulltext-store-probe");
        if std::fs::write(&probe, b"ok").is_err() {
            return false;
        }
        std::fs::remove_file(&probe).is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn extraction(bucket: Bucket, identifier: &str, version: &str) -> Extraction {
        Extraction::new_in_progress(
            identifier.to_string(),
            bucket,
            version.to_string(),
            Some("1234".to_string()),
            Utc::now(),
        )
    }

    #[test]
    fn old_style_identifier_path_layout() {
        let volume = PathBuf::from("/vol");
        let p = paper_path(&volume, Bucket::Arxiv, "alg-geom/9204001");
        assert_eq!(p, PathBuf::from("/vol/arxiv/alg-geom/9204/9204001"));
    }

    #[test]
    fn new_style_identifier_path_layout() {
        let volume = PathBuf::from("/vol");
        let p = paper_path(&volume, Bucket::Arxiv, "1801.00123");
        assert_eq!(p, PathBuf::from("/vol/arxiv/1801/1801.00123"));
    }

    #[test]
    fn fallback_identifier_path_layout() {
        let volume = PathBuf::from("/vol");
        let p = paper_path(&volume, Bucket::Submission, "12345/abc==");
        assert_eq!(p, PathBuf::from("/vol/submission/12345/abc=="));
    }

    #[tokio::test]
    async fn store_then_retrieve_round_trips_metadata() {
        let tmp = tempfile::tempdir().unwrap();
        let store = FsStore::new(tmp.path().to_path_buf()).unwrap();
        let e = extraction(Bucket::Arxiv, "1801.00123", "1.0");
        store.store(&e, None).await.unwrap();

        let got = store
            .retrieve("1801.00123", Bucket::Arxiv, Some("1.0"), Format::Plain, true)
            .await
            .unwrap();
        assert_eq!(got.task_id, e.task_id);
        assert_eq!(got.status, Status::InProgress);
        assert!(got.content.is_none());
    }

    #[tokio::test]
    async fn retrieve_latest_returns_numerically_largest_version() {
        let tmp = tempfile::tempdir().unwrap();
        let store = FsStore::new(tmp.path().to_path_buf()).unwrap();
        for v in ["0.1", "0.5", "1.3", "2.1", "classic"] {
            let e = extraction(Bucket::Arxiv, "1801.00123", v);
            store.store(&e, None).await.unwrap();
        }
        let got = store
            .retrieve("1801.00123", Bucket::Arxiv, None, Format::Plain, true)
            .await
            .unwrap();
        assert_eq!(got.version, "2.1");
    }

    #[tokio::test]
    async fn retrieve_latest_falls_back_to_non_numeric_when_alone() {
        let tmp = tempfile::tempdir().unwrap();
        let store = FsStore::new(tmp.path().to_path_buf()).unwrap();
        let e = extraction(Bucket::Arxiv, "1801.00123", "classic");
        store.store(&e, None).await.unwrap();

        let got = store
            .retrieve("1801.00123", Bucket::Arxiv, None, Format::Plain, true)
            .await
            .unwrap();
        assert_eq!(got.version, "classic");
    }

    #[tokio::test]
    async fn retrieve_missing_identifier_is_does_not_exist() {
        let tmp = tempfile::tempdir().unwrap();
        let store = FsStore::new(tmp.path().to_path_buf()).unwrap();
        let err = store
            .retrieve("1801.00123", Bucket::Arxiv, None, Format::Plain, true)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::DoesNotExist(_)));
    }

    #[tokio::test]
    async fn content_blob_absence_is_non_fatal_when_meta_exists() {
        let tmp = tempfile::tempdir().unwrap();
        let store = FsStore::new(tmp.path().to_path_buf()).unwrap();
        let e = extraction(Bucket::Arxiv, "1801.00123", "1.0");
        store.store(&e, None).await.unwrap();

        let got = store
            .retrieve("1801.00123", Bucket::Arxiv, Some("1.0"), Format::Plain, false)
            .await
            .unwrap();
        assert!(got.content.is_none());
    }

    #[tokio::test]
    async fn store_writes_content_blob_only_when_format_and_content_given() {
        let tmp = tempfile::tempdir().unwrap();
        let store = FsStore::new(tmp.path().to_path_buf()).unwrap();
        let e = extraction(Bucket::Arxiv, "1801.00123", "1.0").succeeded(Utc::now(), "hello".to_string());
        store.store(&e, Some(Format::Plain)).await.unwrap();

        let got = store
            .retrieve("1801.00123", Bucket::Arxiv, Some("1.0"), Format::Plain, false)
            .await
            .unwrap();
        assert_eq!(got.content.as_deref(), Some("hello"));

        let missing_psv = store
            .retrieve("1801.00123", Bucket::Arxiv, Some("1.0"), Format::Psv, false)
            .await
            .unwrap();
        assert!(missing_psv.content.is_none());
    }

    #[tokio::test]
    async fn is_available_true_for_writable_volume() {
        let tmp = tempfile::tempdir().unwrap();
        let store = FsStore::new(tmp.path().to_path_buf()).unwrap();
        assert!(store.is_available().await);
    }
}
