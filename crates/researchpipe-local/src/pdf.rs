//! PDF document loader: fetch bytes, extract a text layer.
//!
//! Pure-Rust `pdf-extract` is the primary engine. When it fails (image-only
//! or exotic PDFs) and `pdftotext` is installed, a shellout fallback runs,
//! controlled by `RESEARCHPIPE_PDF_SHELLOUT=off|auto`.

use researchpipe_core::{DocumentLoader, Error, Result};
use std::process::Command;
use std::time::Duration;
use tracing::debug;

const MAX_PDF_BYTES: usize = 20 * 1024 * 1024;

fn env(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

/// Best-effort sniff for PDF bytes (magic header).
pub fn bytes_look_like_pdf(bytes: &[u8]) -> bool {
    bytes.starts_with(b"%PDF-")
}

fn pdf_to_text_shellout(bytes: &[u8]) -> Result<String> {
    let mode = env("RESEARCHPIPE_PDF_SHELLOUT").unwrap_or_else(|| "auto".to_string());
    if mode == "off" {
        return Err(Error::Fetch("pdf shellout disabled".to_string()));
    }

    let mut tmp = tempfile::Builder::new()
        .prefix("researchpipe-")
        .suffix(".pdf")
        .tempfile()
        .map_err(|e| Error::Fetch(format!("pdf tempfile: {e}")))?;
    use std::io::Write;
    tmp.write_all(bytes)
        .map_err(|e| Error::Fetch(format!("pdf tempfile write: {e}")))?;
    let path = tmp.path().to_string_lossy().to_string();

    let out = Command::new("pdftotext")
        .args(["-layout", "-nopgbrk", "-enc", "UTF-8", &path, "-"])
        .output();
    match out {
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            Err(Error::NotConfigured("pdftotext not installed".to_string()))
        }
        Err(e) => Err(Error::Fetch(format!("pdftotext spawn: {e}"))),
        Ok(o) => {
            if !o.status.success() {
                return Err(Error::Fetch(format!("pdftotext exit {}", o.status)));
            }
            let s = String::from_utf8_lossy(&o.stdout).to_string();
            if s.chars().all(char::is_whitespace) {
                return Err(Error::Fetch("pdftotext produced no text".to_string()));
            }
            Ok(s)
        }
    }
}

#[derive(Debug, Clone)]
pub struct HttpDocumentLoader {
    client: reqwest::Client,
}

impl HttpDocumentLoader {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }

    async fn fetch_bytes(&self, url: &str, timeout: Duration) -> Result<Vec<u8>> {
        let resp = self
            .client
            .get(url)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| Error::Fetch(e.to_string()))?;
        let status = resp.status();
        if !status.is_success() {
            return Err(Error::Fetch(format!("GET {url} HTTP {status}")));
        }
        let bytes = resp.bytes().await.map_err(|e| Error::Fetch(e.to_string()))?;
        if bytes.len() > MAX_PDF_BYTES {
            return Err(Error::Fetch(format!(
                "pdf too large: {} bytes from {url}",
                bytes.len()
            )));
        }
        Ok(bytes.to_vec())
    }
}

#[async_trait::async_trait]
impl DocumentLoader for HttpDocumentLoader {
    async fn load(&self, url: &str, timeout: Duration) -> Result<String> {
        url::Url::parse(url).map_err(|e| Error::InvalidUrl(format!("{url}: {e}")))?;
        let bytes = self.fetch_bytes(url, timeout).await?;
        if !bytes_look_like_pdf(&bytes) {
            return Err(Error::Fetch(format!("{url} did not return a pdf body")));
        }

        // Extraction is CPU-bound and can be slow on large documents.
        let text = tokio::task::spawn_blocking(move || {
            match pdf_extract::extract_text_from_mem(&bytes) {
                Ok(s) if !s.chars().all(char::is_whitespace) => Ok(s),
                primary => {
                    debug!("pdf-extract failed or was empty, trying shellout");
                    pdf_to_text_shellout(&bytes).or(match primary {
                        Ok(s) => Ok(s),
                        Err(e) => Err(Error::Fetch(format!("pdf extraction: {e}"))),
                    })
                }
            }
        })
        .await
        .map_err(|e| Error::Fetch(format!("pdf extraction task: {e}")))??;
        Ok(text)
    }
}
