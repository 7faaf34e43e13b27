mod config;
mod controllers;
mod http;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use config::Config;
use fulltext_core::Bucket;
use fulltext_local::{sandbox::DockerExtractor, store::FsStore, CanonicalPdfSource, PreviewPdfSource};
use fulltext_worker::queue::InMemoryTaskQueue;
use fulltext_worker::{extract, Coordinator, Sources, WorkerContext};
use std::sync::Arc;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(name = "fulltext-service")]
#[command(about = "HTTP surface, worker loop, and health check for the fulltext extraction service", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the HTTP server and the in-process worker loop together.
    Serve(Config),
    /// Run only the worker loop (no HTTP surface). With the in-memory queue
    /// backend this is equivalent to `serve` without the listener, since
    /// the queue and its receiver live in one process; with `redis-backend`
    /// this lets the worker tier scale independently of the front tier.
    Worker(Config),
    /// Health aggregate from the command line (§4.7 `service_status`).
    Doctor(Config),
}

fn collaborators(
    cfg: &Config,
) -> Result<(
    Arc<dyn fulltext_core::Store>,
    Sources,
    Arc<dyn fulltext_core::Extractor>,
)> {
    let store = Arc::new(FsStore::new(cfg.storage_volume.clone())?);
    let canonical = Arc::new(CanonicalPdfSource::new(
        cfg.canonical_endpoint.clone(),
        Duration::from_secs(30),
        Duration::from_secs(cfg.canonical_render_wait_s),
    )?);
    let preview = Arc::new(PreviewPdfSource::new(
        cfg.preview_endpoint.clone(),
        Duration::from_secs(30),
    )?);
    let extractor = Arc::new(DockerExtractor::new(
        cfg.extractor_image.clone(),
        cfg.extractor_version.clone(),
        cfg.workdir.clone(),
        cfg.mountdir.clone(),
        Duration::from_secs(cfg.extractor_timeout_s),
        cfg.docker_host.clone(),
    ));
    Ok((
        store,
        Sources {
            canonical,
            preview,
        },
        extractor,
    ))
}

async fn dispatch_envelope(envelope: fulltext_worker::queue::TaskEnvelope, ctx: Arc<WorkerContext>) {
    let Some(identifier) = envelope.args.get("identifier").and_then(|v| v.as_str()) else {
        tracing::error!(task_id = %envelope.task_id, "malformed task envelope, missing identifier");
        return;
    };
    let Some(bucket_str) = envelope.args.get("bucket").and_then(|v| v.as_str()) else {
        tracing::error!(task_id = %envelope.task_id, "malformed task envelope, missing bucket");
        return;
    };
    let Some(bucket) = Bucket::from_str(bucket_str) else {
        tracing::error!(task_id = %envelope.task_id, bucket = bucket_str, "unknown bucket in task envelope");
        return;
    };
    let Some(version) = envelope.args.get("version").and_then(|v| v.as_str()) else {
        tracing::error!(task_id = %envelope.task_id, "malformed task envelope, missing version");
        return;
    };
    let token = envelope
        .args
        .get("token")
        .and_then(|v| v.as_str())
        .map(str::to_string);

    match extract(&ctx, identifier, bucket, version, token.as_deref()).await {
        Ok(outcome) => {
            tracing::info!(task_id = %outcome.task_id, status = %outcome.status, "extraction finished");
        }
        Err(e) => {
            tracing::warn!(task_id = %envelope.task_id, error = %e, "extraction failed");
        }
    }
}

async fn run_worker_loop(
    mut receiver: tokio::sync::mpsc::Receiver<fulltext_worker::queue::TaskEnvelope>,
    ctx: Arc<WorkerContext>,
) {
    // prefetch = 1: each worker task processes to completion before the next
    // recv; acks_late is implicit because the channel item is only consumed
    // once, win or lose, and a crashed process simply drops unconsumed items
    // (the in-memory backend provides no redelivery, unlike the Redis one).
    while let Some(envelope) = receiver.recv().await {
        let ctx = ctx.clone();
        tokio::spawn(dispatch_envelope(envelope, ctx));
    }
}

#[cfg(feature = "redis-backend")]
async fn run_redis_worker_loop(queue: Arc<fulltext_worker::RedisTaskQueue>, ctx: Arc<WorkerContext>) {
    const POLL_TIMEOUT_S: f64 = 5.0;
    loop {
        match queue.pop(POLL_TIMEOUT_S).await {
            Ok(Some(envelope)) => {
                tokio::spawn(dispatch_envelope(envelope, ctx.clone()));
            }
            Ok(None) => {}
            Err(e) => {
                tracing::error!(error = %e, "redis worker loop pop failed, retrying");
            }
        }
    }
}

async fn serve(cfg: Config) -> Result<()> {
    let (store, sources, extractor) = collaborators(&cfg)?;
    let (queue, receiver) = InMemoryTaskQueue::new(cfg.worker_queue_capacity);
    let queue = Arc::new(queue);

    let coordinator = Arc::new(Coordinator::new(
        store.clone(),
        Sources {
            canonical: sources.canonical.clone(),
            preview: sources.preview.clone(),
        },
        queue.clone(),
        cfg.extractor_version.clone(),
    ));

    let worker_ctx = Arc::new(WorkerContext {
        store: store.clone(),
        sources,
        extractor,
        queue: queue.clone(),
        workdir: cfg.workdir.clone(),
    });
    tokio::spawn(run_worker_loop(receiver, worker_ctx));

    let state = Arc::new(http::AppState {
        store,
        coordinator,
        authorizer: controllers::allow_all(),
    });
    let app = http::router(state);

    let listener = tokio::net::TcpListener::bind(&cfg.bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", cfg.bind_addr))?;
    tracing::info!(addr = %cfg.bind_addr, "fulltext-service listening");
    axum::serve(listener, app).await?;
    Ok(())
}

#[cfg(feature = "redis-backend")]
async fn worker_only(cfg: Config) -> Result<()> {
    let (store, sources, extractor) = collaborators(&cfg)?;
    let broker_url = cfg
        .broker_url
        .clone()
        .context("--broker-url (or BROKER_URL) is required for the redis-backend worker")?;
    let queue = Arc::new(fulltext_worker::RedisTaskQueue::connect(&broker_url).await?);
    let ctx = Arc::new(WorkerContext {
        store,
        sources,
        extractor,
        queue: queue.clone(),
        workdir: cfg.workdir.clone(),
    });
    tracing::info!(broker = %broker_url, "fulltext-service worker tier polling redis");
    run_redis_worker_loop(queue, ctx).await;
    Ok(())
}

#[cfg(not(feature = "redis-backend"))]
async fn worker_only(cfg: Config) -> Result<()> {
    let (store, sources, extractor) = collaborators(&cfg)?;
    let (queue, receiver) = InMemoryTaskQueue::new(cfg.worker_queue_capacity);
    let ctx = Arc::new(WorkerContext {
        store,
        sources,
        extractor,
        queue: Arc::new(queue),
        workdir: cfg.workdir.clone(),
    });
    tracing::warn!(
        "worker subcommand with the in-memory queue backend has no publisher in this process; \
         build with --features redis-backend for a standalone worker tier"
    );
    run_worker_loop(receiver, ctx).await;
    Ok(())
}

async fn doctor(cfg: Config) -> Result<()> {
    let (store, sources, _extractor) = collaborators(&cfg)?;
    let (queue, _receiver) = InMemoryTaskQueue::new(1);
    let coordinator = Coordinator::new(store.clone(), sources, Arc::new(queue), cfg.extractor_version);
    let ok = controllers::service_status(&*store, &coordinator).await;
    let report = serde_json::json!({ "ok": ok });
    println!("{}", serde_json::to_string_pretty(&report)?);
    if ok {
        Ok(())
    } else {
        anyhow::bail!("service_status reported unavailable");
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_env("RUST_LOG")
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Serve(cfg) => serve(cfg).await,
        Commands::Worker(cfg) => worker_only(cfg).await,
        Commands::Doctor(cfg) => doctor(cfg).await,
    }
}
