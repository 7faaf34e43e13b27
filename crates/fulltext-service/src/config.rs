//! Immutable, env-var-sourced configuration (§6.4, §10.3). Built once in
//! `main`, then passed by reference into every collaborator's constructor.
//! No collaborator reads `std::env` after construction.

use clap::Args;
use std::path::PathBuf;

#[derive(Args, Debug, Clone)]
pub struct Config {
    /// Root of the content-addressable store.
    #[arg(long, env = "STORAGE_VOLUME")]
    pub storage_volume: PathBuf,

    /// Extractor sandbox image name.
    #[arg(long, env = "EXTRACTOR_IMAGE", default_value = "fulltext-extractor")]
    pub extractor_image: String,

    /// Extractor sandbox image version. Also the version segment of every
    /// task id and store path minted by this process.
    #[arg(long, env = "EXTRACTOR_VERSION", default_value = "1.0")]
    pub extractor_version: String,

    /// Where this process stages PDFs for the sandbox.
    #[arg(long, env = "WORKDIR", default_value = "/tmp/fulltext-work")]
    pub workdir: PathBuf,

    /// What the sandbox sees as the mount of `workdir`.
    #[arg(long, env = "MOUNTDIR", default_value = "/tmp/fulltext-work")]
    pub mountdir: PathBuf,

    /// Docker daemon endpoint, if not the local default socket.
    #[arg(long, env = "DOCKER_HOST")]
    pub docker_host: Option<String>,

    /// Sandbox invocation timeout, seconds.
    #[arg(long, env = "EXTRACTOR_TIMEOUT_S", default_value_t = 120)]
    pub extractor_timeout_s: u64,

    /// Base URL of the canonical announced-e-print PDF provider.
    #[arg(
        long,
        env = "CANONICAL_ENDPOINT",
        default_value = "https://arxiv.org"
    )]
    pub canonical_endpoint: String,

    /// Base URL of the submission preview PDF provider.
    #[arg(
        long,
        env = "PREVIEW_ENDPOINT",
        default_value = "https://submit.arxiv.org"
    )]
    pub preview_endpoint: String,

    /// Seconds to sleep between canonical-adapter render-retry attempts.
    #[arg(long, env = "CANONICAL_RENDER_WAIT_S", default_value_t = 2)]
    pub canonical_render_wait_s: u64,

    /// Task queue backend connection string. Ignored unless the
    /// `redis-backend` feature is compiled in; with the in-memory backend
    /// this is unused but still accepted so deployments can flip features
    /// without also editing their environment.
    #[arg(long, env = "BROKER_URL")]
    pub broker_url: Option<String>,

    /// Present for parity with §6.4; the in-memory and Redis backends both
    /// use `BROKER_URL` as their single connection string, so this crate
    /// has no separate result-backend knob to wire up.
    #[arg(long, env = "RESULT_BACKEND")]
    pub result_backend: Option<String>,

    /// If set, `doctor`/`serve` block at startup until collaborators report
    /// available, instead of starting optimistically.
    #[arg(long, env = "WAIT_FOR_SERVICES", default_value_t = false)]
    pub wait_for_services: bool,

    /// HTTP listen address for the bundled server.
    #[arg(long, env = "BIND_ADDR", default_value = "0.0.0.0:8080")]
    pub bind_addr: String,

    /// Bounded channel capacity between `publish` and the worker pool
    /// (in-memory backend only).
    #[arg(long, env = "WORKER_QUEUE_CAPACITY", default_value_t = 256)]
    pub worker_queue_capacity: usize,
}
