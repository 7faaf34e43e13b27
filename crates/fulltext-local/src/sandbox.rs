//! Extractor sandbox (component C4): invokes an external, versioned
//! extractor image against a PDF via `docker run`.
//!
//! The subprocess + bounded-timeout + cleanup-on-every-exit-path idiom is
//! carried over from `webpipe-local`'s `shellout.rs`; the concrete `docker
//! run` invocation shape (user id, volume mount, rm-on-exit) is grounded on
//! the source's `run_docker()`.

use fulltext_core::{Error, Extractor, Result};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};

fn env(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

pub fn which(bin: &str) -> Option<PathBuf> {
    let path = std::env::var_os("PATH")?;
    for dir in std::env::split_paths(&path) {
        let cand = dir.join(bin);
        if cand.is_file() {
            return Some(cand);
        }
    }
    None
}

fn unique_stub() -> String {
    use sha2::{Digest, Sha256};
    let now = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default();
    let mut h = Sha256::new();
    h.update(now.as_nanos().to_le_bytes());
    h.update(std::process::id().to_le_bytes());
    format!("fulltext-{}", hex::encode(&h.finalize()[..8]))
}

/// Runs a prepared `docker run` command, capturing both streams, enforcing
/// `timeout`. Does not stream; sandboxed extractors are short single-shot
/// invocations.
fn run_bounded(mut cmd: Command, timeout: Duration) -> Result<()> {
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    let mut child = cmd
        .spawn()
        .map_err(|e| Error::ContainerError(format!("spawn failed: {e}")))?;

    let start = Instant::now();
    loop {
        match child.try_wait() {
            Ok(Some(status)) => {
                if status.success() {
                    return Ok(());
                }
                return Err(Error::ContainerError(format!(
                    "extractor exited with {status}"
                )));
            }
            Ok(None) => {}
            Err(e) => return Err(Error::ContainerError(format!("wait failed: {e}"))),
        }
        if start.elapsed() > timeout {
            let _ = child.kill();
            return Err(Error::ContainerError("extractor timed out".to_string()));
        }
        std::thread::sleep(Duration::from_millis(50));
    }
}

/// Docker-backed `Extractor`. `workdir` is the path this process writes
/// PDFs to; `mountdir` is the same volume as seen inside the sandbox
/// (usually identical unless the host and the docker daemon disagree on
/// path namespaces, e.g. docker-in-docker).
pub struct DockerExtractor {
    image: String,
    version: String,
    workdir: PathBuf,
    mountdir: PathBuf,
    timeout: Duration,
    docker_host: Option<String>,
}

impl DockerExtractor {
    pub fn new(
        image: String,
        version: String,
        workdir: PathBuf,
        mountdir: PathBuf,
        timeout: Duration,
        docker_host: Option<String>,
    ) -> Self {
        Self {
            image,
            version,
            workdir,
            mountdir,
            timeout,
            docker_host,
        }
    }

    fn docker_command(&self) -> Command {
        let mut cmd = Command::new("docker");
        if let Some(host) = &self.docker_host {
            cmd.env("DOCKER_HOST", host);
        }
        cmd
    }

    fn image_ref(&self) -> String {
        format!("{}:{}", self.image, self.version)
    }
}

#[async_trait::async_trait]
impl Extractor for DockerExtractor {
    async fn do_extraction(&self, pdf_path: &Path) -> Result<String> {
        let stub = unique_stub();
        let host_pdf = self.workdir.join(format!("{stub}.pdf"));
        let host_txt = self.workdir.join(format!("{stub}.txt"));
        let host_intermediate = self.workdir.join(format!("{stub}.pdf2txt"));

        std::fs::copy(pdf_path, &host_pdf)
            .map_err(|e| Error::ContainerError(format!("copy into workdir failed: {e}")))?;

        let uid = current_uid();
        let mount_arg = format!("{}:/pdfs", self.mountdir.display());
        let sandbox_pdf = format!("/pdfs/{stub}.pdf");

        let mut cmd = self.docker_command();
        cmd.arg("run")
            .arg("--rm")
            .arg("-u")
            .arg(uid.to_string())
            .arg("-v")
            .arg(&mount_arg)
            .arg(self.image_ref())
            .arg("/scripts/extract.sh")
            .arg(&sandbox_pdf);

        tracing::info!(image = %self.image_ref(), stub = %stub, "launching extractor sandbox");
        let run_result = run_bounded(cmd, self.timeout);
        if let Err(e) = &run_result {
            tracing::warn!(stub = %stub, error = %e, "extractor sandbox invocation failed");
        }

        // Cleanup happens on every exit path, success or failure.
        let read_result = run_result.and_then(|_| {
            let metadata = std::fs::metadata(&host_txt)
                .map_err(|_| Error::NoContent(format!("no output for {stub}")))?;
            if metadata.len() == 0 {
                return Err(Error::NoContent(format!("empty output for {stub}")));
            }
            std::fs::read_to_string(&host_txt)
                .map_err(|e| Error::NoContent(format!("output not utf-8: {e}")))
        });

        let _ = std::fs::remove_file(&host_pdf);
        let _ = std::fs::remove_file(&host_txt);
        let _ = std::fs::remove_file(&host_intermediate);

        read_result
    }

    async fn is_available(&self) -> bool {
        if which("docker").is_none() {
            return false;
        }
        let mut cmd = self.docker_command();
        cmd.arg("info").arg("--format").arg("{{.ServerVersion}}");
        run_bounded(cmd, Duration::from_secs(2)).is_ok()
    }
}

#[cfg(unix)]
fn current_uid() -> u32 {
    // SAFETY: getuid() has no preconditions and cannot fail.
    unsafe { libc::getuid() }
}

#[cfg(not(unix))]
fn current_uid() -> u32 {
    0
}

pub fn timeout_from_env_ms(key: &str, default_ms: u64) -> Duration {
    let ms = env(key)
        .and_then(|s| s.parse::<u64>().ok())
        .unwrap_or(default_ms)
        .clamp(1_000, 600_000);
    Duration::from_millis(ms)
}
