use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("does not exist: {0}")]
    DoesNotExist(String),
    #[error("no such task: {0}")]
    NoSuchTask(String),
    #[error("task creation failed: {0}")]
    TaskCreationFailed(String),
    #[error("storage failed: {0}")]
    StorageFailed(String),
    #[error("configuration error: {0}")]
    ConfigurationError(String),
    #[error("container error: {0}")]
    ContainerError(String),
    #[error("no content: {0}")]
    NoContent(String),
    #[error("io error: {0}")]
    IoError(String),
    #[error("invalid url: {0}")]
    InvalidUrl(String),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Top-level namespace selecting identifier interpretation and PDF source adapter.
///
/// Closed set; any other value surfaced by a client is treated as not-found at
/// the controller boundary rather than rejected with a parse error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Bucket {
    Arxiv,
    Submission,
}

impl Bucket {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Arxiv => "arxiv",
            Self::Submission => "submission",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "arxiv" => Some(Self::Arxiv),
            "submission" => Some(Self::Submission),
            _ => None,
        }
    }
}

impl fmt::Display for Bucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Content format a blob is stored/retrieved under. Closed set; anything else
/// is not-found, never a 400, at the controller boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Format {
    Plain,
    Psv,
}

impl Format {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Plain => "plain",
            Self::Psv => "psv",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "plain" => Some(Self::Plain),
            "psv" => Some(Self::Psv),
            _ => None,
        }
    }
}

impl fmt::Display for Format {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle status of an `Extraction`. `InProgress` is the only non-terminal
/// state; once `Succeeded` or `Failed`, fields other than `content` must not
/// be mutated again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    InProgress,
    Succeeded,
    Failed,
}

impl Status {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InProgress => "in_progress",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
        }
    }

    pub fn completed(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The central record: the result of (or handle to) one extraction.
///
/// `task_id` is always `{bucket}::{identifier}::{version}` (§3.2 invariant 4).
/// `owner` is `None` iff `bucket == Bucket::Arxiv` (invariant 5).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Extraction {
    pub identifier: String,
    pub bucket: Bucket,
    pub version: String,
    pub status: Status,
    pub started: DateTime<Utc>,
    pub ended: Option<DateTime<Utc>>,
    pub owner: Option<String>,
    pub task_id: String,
    pub exception: Option<String>,
    pub content: Option<String>,
}

impl Extraction {
    pub fn task_id(bucket: Bucket, identifier: &str, version: &str) -> String {
        format!("{}::{}::{}", bucket.as_str(), identifier, version)
    }

    /// The pre-emptive record written by the coordinator before a task is
    /// enqueued: non-terminal, no content, no exception.
    pub fn new_in_progress(
        identifier: String,
        bucket: Bucket,
        version: String,
        owner: Option<String>,
        started: DateTime<Utc>,
    ) -> Self {
        let task_id = Self::task_id(bucket, &identifier, &version);
        let owner = if matches!(bucket, Bucket::Arxiv) {
            None
        } else {
            owner
        };
        Self {
            identifier,
            bucket,
            version,
            status: Status::InProgress,
            started,
            ended: None,
            owner,
            task_id,
            exception: None,
            content: None,
        }
    }

    /// A copy with the fields the worker is allowed to mutate on terminal
    /// success replaced. Mirrors `Extraction.copy(**kwargs)` in the source:
    /// every other field is carried over unchanged.
    pub fn succeeded(&self, ended: DateTime<Utc>, content: String) -> Self {
        Self {
            status: Status::Succeeded,
            ended: Some(ended),
            content: Some(content),
            exception: None,
            ..self.clone()
        }
    }

    /// A copy with the fields the worker is allowed to mutate on terminal
    /// failure replaced.
    pub fn failed(&self, ended: DateTime<Utc>, exception: String) -> Self {
        Self {
            status: Status::Failed,
            ended: Some(ended),
            exception: Some(exception),
            content: None,
            ..self.clone()
        }
    }

    /// `true` once `status` is `Succeeded` or `Failed`.
    pub fn completed(&self) -> bool {
        self.status.completed()
    }
}

/// Content/metadata persistence. Implementations must uphold §3.2: metadata
/// may exist without content, content may never exist without metadata.
#[async_trait]
pub trait Store: Send + Sync {
    /// Always writes `meta.json`. If `format` is given and `extraction.content`
    /// is `Some`, also writes the named content blob.
    async fn store(&self, extraction: &Extraction, format: Option<Format>) -> Result<()>;

    /// Resolves `version = None` to the latest version (§4.1.1). Missing
    /// metadata is `Error::DoesNotExist`. A missing content blob when
    /// `meta_only` is `false` is non-fatal: `content` comes back `None`.
    async fn retrieve(
        &self,
        identifier: &str,
        bucket: Bucket,
        version: Option<&str>,
        format: Format,
        meta_only: bool,
    ) -> Result<Extraction>;

    async fn is_available(&self) -> bool;
}

/// A readable PDF byte stream plus the resolved owner, if any.
pub struct PdfBytes {
    pub bytes: Vec<u8>,
    pub owner: Option<String>,
}

/// PDF acquisition from an upstream provider. One implementation per bucket
/// (§4.2): the canonical announced-e-print fetcher and the submission
/// preview fetcher.
#[async_trait]
pub trait PdfSource: Send + Sync {
    async fn exists(&self, identifier: &str, token: Option<&str>) -> Result<bool>;
    async fn get_owner(&self, identifier: &str, token: Option<&str>) -> Result<Option<String>>;
    async fn retrieve(&self, identifier: &str, token: Option<&str>) -> Result<PdfBytes>;
    async fn is_available(&self) -> bool;
}

/// Isolated execution of an external extractor image against a PDF (§4.3).
#[async_trait]
pub trait Extractor: Send + Sync {
    async fn do_extraction(&self, pdf_path: &std::path::Path) -> Result<String>;
    async fn is_available(&self) -> bool;
}

/// `TaskState` is the sum type that replaces the source's queue-result
/// polymorphism (§9): a dict on success, a string on failure, nothing on
/// pending all become one enum.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskState {
    NoSuchTask,
    InProgress,
    Failed { reason: String },
    Succeeded { owner: Option<String> },
}

/// The task backend contract (§6.2): durable, at-least-once, named-id
/// submission with per-id result lookup. `TaskQueue` implementations live in
/// `fulltext-worker`; this trait is the seam `Coordinator` depends on.
#[async_trait]
pub trait TaskQueue: Send + Sync {
    /// Publish a task under `task_id`, setting backend state to `SENT`
    /// immediately so `lookup` can distinguish "enqueued" from "unknown".
    async fn publish(&self, task_id: &str, task_name: &str, args: serde_json::Value)
        -> Result<()>;

    async fn lookup(&self, task_id: &str) -> Result<TaskState>;

    /// Records a terminal result against `task_id`. Called by the
    /// worker-tier, never by the front-tier. Not part of the abstract
    /// upstream contract in §6.2, but required to realise "per-id result
    /// lookup" end to end: something must write the result `lookup` reads.
    async fn report(&self, task_id: &str, state: TaskState) -> Result<()>;

    /// Health check: publish a no-op task; optionally block for its result.
    async fn is_available(&self, await_result: bool) -> bool;
}
