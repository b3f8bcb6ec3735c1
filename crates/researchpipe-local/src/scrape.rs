//! HTML page scraper: fetch with reqwest, convert to readable text.

use futures_util::StreamExt;
use researchpipe_core::{Error, PageScraper, Result, ScrapedPage};
use std::io::Cursor;
use std::time::Duration;
use tracing::debug;

/// Upper bound on a fetched body. Pages larger than this are truncated,
/// not rejected.
const MAX_BODY_BYTES: usize = 5 * 1024 * 1024;

const TEXT_WIDTH: usize = 100;

/// Convert HTML to readable plain text. Intentionally "good enough" and
/// deterministic, not a full readability engine.
pub fn html_to_text(html: &str, width: usize) -> String {
    html2text::from_read(Cursor::new(html.as_bytes()), width).unwrap_or_else(|_| html.to_string())
}

/// First `<title>` contents, if any.
pub fn html_title(html: &str) -> Option<String> {
    let lower = html.to_ascii_lowercase();
    let open = lower.find("<title")?;
    let open_end = lower[open..].find('>')? + open + 1;
    let close = lower[open_end..].find("</title")? + open_end;
    let title = html[open_end..close].split_whitespace().collect::<Vec<_>>().join(" ");
    if title.is_empty() {
        None
    } else {
        Some(title)
    }
}

#[derive(Debug, Clone)]
pub struct HttpPageScraper {
    client: reqwest::Client,
}

impl HttpPageScraper {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }

    async fn fetch_body(&self, url: &str, timeout: Duration) -> Result<String> {
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

        let mut bytes: Vec<u8> = Vec::new();
        let mut stream = resp.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| Error::Fetch(e.to_string()))?;
            if bytes.len().saturating_add(chunk.len()) > MAX_BODY_BYTES {
                let can_take = MAX_BODY_BYTES.saturating_sub(bytes.len());
                bytes.extend_from_slice(&chunk[..can_take]);
                debug!(url, "body truncated at byte cap");
                break;
            }
            bytes.extend_from_slice(&chunk);
        }
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }
}

#[async_trait::async_trait]
impl PageScraper for HttpPageScraper {
    async fn scrape(&self, url: &str, timeout: Duration) -> Result<ScrapedPage> {
        url::Url::parse(url).map_err(|e| Error::InvalidUrl(format!("{url}: {e}")))?;
        let html = self.fetch_body(url, timeout).await?;
        let title = html_title(&html);
        let text = html_to_text(&html, TEXT_WIDTH);
        Ok(ScrapedPage {
            url: url.to_string(),
            title,
            text,
        })
    }
}
