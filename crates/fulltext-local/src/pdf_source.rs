//! PDF acquisition adapters (component C3).
//!
//! Two adapters sharing the `PdfSource` trait shape: the canonical
//! announced-e-print fetcher (with a render-wait retry loop) and the
//! submission-preview fetcher (owner-tagged). Grounded on the reqwest
//! client usage in `webpipe-local`'s `arxiv.rs`/`lib.rs`.

use async_trait::async_trait;
use fulltext_core::{Error, PdfBytes, PdfSource, Result};
use std::time::Duration;

const MAX_RENDER_RETRIES: u32 = 5;

fn header_str<'a>(headers: &'a reqwest::header::HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

/// `HEAD|GET /pdf/{identifier}` against the canonical PDF endpoint (§4.2.1).
pub struct CanonicalPdfSource {
    client: reqwest::Client,
    base_url: String,
    render_wait: Duration,
}

impl CanonicalPdfSource {
    pub fn new(base_url: String, timeout: Duration, render_wait: Duration) -> Result<Self> {
        url::Url::parse(&base_url).map_err(|e| Error::InvalidUrl(format!("{base_url}: {e}")))?;
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::ConfigurationError(e.to_string()))?;
        Ok(Self {
            client,
            base_url,
            render_wait,
        })
    }

    fn pdf_url(&self, identifier: &str) -> String {
        format!("{}/pdf/{}", self.base_url.trim_end_matches('/'), identifier)
    }
}

#[async_trait]
impl PdfSource for CanonicalPdfSource {
    async fn exists(&self, identifier: &str, _token: Option<&str>) -> Result<bool> {
        let resp = self
            .client
            .head(self.pdf_url(identifier))
            .send()
            .await
            .map_err(|e| Error::IoError(e.to_string()))?;
        match resp.status().as_u16() {
            200 => Ok(true),
            404 => Ok(false),
            status => Err(Error::IoError(format!("unexpected status {status}"))),
        }
    }

    async fn get_owner(&self, _identifier: &str, _token: Option<&str>) -> Result<Option<String>> {
        // The canonical bucket never carries an owner (§3.2 invariant 5).
        Ok(None)
    }

    async fn retrieve(&self, identifier: &str, _token: Option<&str>) -> Result<PdfBytes> {
        let url = self.pdf_url(identifier);
        let mut attempts = 0;
        loop {
            let resp = self
                .client
                .get(&url)
                .send()
                .await
                .map_err(|e| Error::IoError(e.to_string()))?;
            let status = resp.status();
            if status.as_u16() == 404 {
                return Err(Error::DoesNotExist(identifier.to_string()));
            }
            if !status.is_success() {
                return Err(Error::IoError(format!("unexpected status {status}")));
            }
            let content_type = header_str(resp.headers(), "content-type")
                .unwrap_or("")
                .to_ascii_lowercase();
            if content_type.starts_with("application/pdf") {
                let bytes = resp
                    .bytes()
                    .await
                    .map_err(|e| Error::IoError(e.to_string()))?;
                return Ok(PdfBytes {
                    bytes: bytes.to_vec(),
                    owner: None,
                });
            }
            // HTML content-type means the PDF is still being rendered
            // server-side; sleep and retry a bounded number of times.
            attempts += 1;
            if attempts >= MAX_RENDER_RETRIES {
                return Err(Error::IoError(
                    "could not retrieve PDF; giving up".to_string(),
                ));
            }
            tokio::time::sleep(self.render_wait).await;
        }
    }

    async fn is_available(&self) -> bool {
        let url = self.base_url.trim_end_matches('/').to_string();
        match self
            .client
            .head(&url)
            .timeout(Duration::from_millis(200))
            .send()
            .await
        {
            Ok(resp) => resp.status().is_success() || resp.status().is_redirection(),
            Err(_) => false,
        }
    }
}

/// `HEAD|GET /{source_id}/{checksum}[/content]` against the submission
/// preview endpoint (§4.2.2). `ARXIV-OWNER` and `ETag` headers carry owner
/// and content checksum respectively.
pub struct PreviewPdfSource {
    client: reqwest::Client,
    base_url: String,
}

impl PreviewPdfSource {
    pub fn new(base_url: String, timeout: Duration) -> Result<Self> {
        url::Url::parse(&base_url).map_err(|e| Error::InvalidUrl(format!("{base_url}: {e}")))?;
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::ConfigurationError(e.to_string()))?;
        Ok(Self { client, base_url })
    }

    fn resource_url(&self, identifier: &str) -> String {
        format!("{}/{}", self.base_url.trim_end_matches('/'), identifier)
    }

    fn content_url(&self, identifier: &str) -> String {
        format!("{}/content", self.resource_url(identifier))
    }

    fn with_token(
        &self,
        builder: reqwest::RequestBuilder,
        token: Option<&str>,
    ) -> reqwest::RequestBuilder {
        match token {
            Some(t) => builder.bearer_auth(t),
            None => builder,
        }
    }
}

#[async_trait]
impl PdfSource for PreviewPdfSource {
    async fn exists(&self, identifier: &str, token: Option<&str>) -> Result<bool> {
        let req = self.with_token(self.client.head(self.content_url(identifier)), token);
        let resp = req.send().await.map_err(|e| Error::IoError(e.to_string()))?;
        Ok(resp.status().is_success())
    }

    async fn get_owner(&self, identifier: &str, token: Option<&str>) -> Result<Option<String>> {
        let req = self.with_token(self.client.head(self.resource_url(identifier)), token);
        let resp = req.send().await.map_err(|e| Error::IoError(e.to_string()))?;
        Ok(header_str(resp.headers(), "arxiv-owner").map(|s| s.to_string()))
    }

    async fn retrieve(&self, identifier: &str, token: Option<&str>) -> Result<PdfBytes> {
        let req = self.with_token(self.client.get(self.content_url(identifier)), token);
        let resp = req.send().await.map_err(|e| Error::IoError(e.to_string()))?;
        let status = resp.status();
        if status.as_u16() == 404 {
            return Err(Error::DoesNotExist(identifier.to_string()));
        }
        if !status.is_success() {
            return Err(Error::IoError(format!("unexpected status {status}")));
        }
        let owner = header_str(resp.headers(), "arxiv-owner").map(|s| s.to_string());
        let bytes = resp
            .bytes()
            .await
            .map_err(|e| Error::IoError(e.to_string()))?;
        Ok(PdfBytes {
            bytes: bytes.to_vec(),
            owner,
        })
    }

    async fn is_available(&self) -> bool {
        let url = format!("{}/status", self.base_url.trim_end_matches('/'));
        match self
            .client
            .head(&url)
            .timeout(Duration::from_millis(200))
            .send()
            .await
        {
            Ok(resp) => resp.status().is_success(),
            Err(_) => false,
        }
    }
}
