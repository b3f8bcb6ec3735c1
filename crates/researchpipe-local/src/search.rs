//! Search providers: Serper (hosted Google results) and SearXNG
//! (self-hosted metasearch).

use researchpipe_core::{Error, Result, SearchProvider, SearchResult};
use serde::Deserialize;
use std::time::Duration;

const SEARCH_TIMEOUT: Duration = Duration::from_secs(20);

fn env(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

fn serper_api_key_from_env() -> Option<String> {
    env("RESEARCHPIPE_SERPER_API_KEY").or_else(|| env("SERPER_API_KEY"))
}

fn serper_endpoint_from_env() -> Option<String> {
    env("RESEARCHPIPE_SERPER_ENDPOINT")
}

pub fn searxng_endpoints_from_env() -> Vec<String> {
    let mut out: Vec<String> = Vec::new();

    // Comma/whitespace-separated list for simple load spreading.
    if let Ok(v) = std::env::var("RESEARCHPIPE_SEARXNG_ENDPOINTS") {
        for raw in v.split(|c: char| c == ',' || c.is_whitespace()) {
            let s = raw.trim();
            if s.is_empty() {
                continue;
            }
            let s = s.to_string();
            if !out.contains(&s) {
                out.push(s);
            }
        }
    }
    if let Ok(v) = std::env::var("RESEARCHPIPE_SEARXNG_ENDPOINT") {
        let s = v.trim().to_string();
        if !s.is_empty() && !out.contains(&s) {
            out.push(s);
        }
    }
    out
}

#[derive(Debug, Clone)]
pub struct SerperSearchProvider {
    client: reqwest::Client,
    api_key: String,
    endpoint: String,
}

impl SerperSearchProvider {
    pub fn from_env(client: reqwest::Client) -> Result<Self> {
        let api_key = serper_api_key_from_env().ok_or_else(|| {
            Error::NotConfigured("missing RESEARCHPIPE_SERPER_API_KEY (or SERPER_API_KEY)".to_string())
        })?;
        let endpoint = serper_endpoint_from_env()
            .unwrap_or_else(|| "https://google.serper.dev/search".to_string());
        Ok(Self {
            client,
            api_key,
            endpoint,
        })
    }

    pub fn new(client: reqwest::Client, api_key: impl Into<String>, endpoint: impl Into<String>) -> Self {
        Self {
            client,
            api_key: api_key.into(),
            endpoint: endpoint.into(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct SerperResponse {
    #[serde(default)]
    organic: Vec<SerperOrganic>,
}

#[derive(Debug, Deserialize)]
struct SerperOrganic {
    link: Option<String>,
    title: Option<String>,
    snippet: Option<String>,
}

#[async_trait::async_trait]
impl SearchProvider for SerperSearchProvider {
    fn name(&self) -> &'static str {
        "serper"
    }

    async fn search(&self, query: &str, max_results: usize) -> Result<Vec<SearchResult>> {
        let max_results = max_results.clamp(1, 20);
        let body = serde_json::json!({
            "q": query,
            "num": max_results,
        });

        let resp = self
            .client
            .post(&self.endpoint)
            .header("X-API-KEY", &self.api_key)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .json(&body)
            .timeout(SEARCH_TIMEOUT)
            .send()
            .await
            .map_err(|e| Error::Search(e.to_string()))?;
        let status = resp.status();
        if status.as_u16() == 429 {
            return Err(Error::RateLimited("serper HTTP 429".to_string()));
        }
        if !status.is_success() {
            return Err(Error::Search(format!("serper search HTTP {status}")));
        }

        let parsed: SerperResponse = resp.json().await.map_err(|e| Error::Search(e.to_string()))?;
        let mut out = Vec::new();
        for r in parsed.organic.into_iter().take(max_results) {
            let Some(url) = r.link else { continue };
            out.push(SearchResult {
                url,
                title: r.title,
                snippet: r.snippet,
                source: "serper".to_string(),
            });
        }
        Ok(out)
    }
}

#[derive(Debug, Clone)]
pub struct SearxngSearchProvider {
    client: reqwest::Client,
    endpoints: Vec<String>,
}

impl SearxngSearchProvider {
    pub fn from_env(client: reqwest::Client) -> Result<Self> {
        let endpoints = searxng_endpoints_from_env();
        if endpoints.is_empty() {
            return Err(Error::NotConfigured(
                "missing RESEARCHPIPE_SEARXNG_ENDPOINT (or RESEARCHPIPE_SEARXNG_ENDPOINTS)"
                    .to_string(),
            ));
        }
        Ok(Self { client, endpoints })
    }

    pub fn new(client: reqwest::Client, endpoints: Vec<String>) -> Self {
        Self { client, endpoints }
    }

    fn endpoint_search_for(base_endpoint: &str) -> String {
        // Accept either a base URL or a full /search endpoint.
        let mut base = base_endpoint.trim().trim_end_matches('/').to_string();
        if !base.ends_with("/search") {
            base.push_str("/search");
        }
        base
    }

    fn stable_hash64(query: &str) -> u64 {
        // FNV-1a; stable across runs, unlike HashMap's RandomState.
        let mut h: u64 = 1469598103934665603;
        for b in query.as_bytes() {
            h ^= *b as u64;
            h = h.wrapping_mul(1099511628211);
        }
        h
    }

    fn pick_endpoint(&self, query: &str) -> &str {
        let i = (Self::stable_hash64(query) as usize) % self.endpoints.len();
        &self.endpoints[i]
    }
}

#[derive(Debug, Deserialize)]
struct SearxngResponse {
    results: Option<Vec<SearxngResult>>,
}

#[derive(Debug, Deserialize)]
struct SearxngResult {
    url: Option<String>,
    title: Option<String>,
    content: Option<String>,
}

#[async_trait::async_trait]
impl SearchProvider for SearxngSearchProvider {
    fn name(&self) -> &'static str {
        "searxng"
    }

    async fn search(&self, query: &str, max_results: usize) -> Result<Vec<SearchResult>> {
        let max_results = max_results.clamp(1, 20);
        let endpoint = Self::endpoint_search_for(self.pick_endpoint(query));

        let resp = self
            .client
            .get(endpoint)
            .query(&[("q", query), ("format", "json")])
            .timeout(SEARCH_TIMEOUT)
            .send()
            .await
            .map_err(|e| Error::Search(e.to_string()))?;
        let status = resp.status();
        if !status.is_success() {
            return Err(Error::Search(format!("searxng search HTTP {status}")));
        }

        let parsed: SearxngResponse = resp.json().await.map_err(|e| Error::Search(e.to_string()))?;
        let mut out = Vec::new();
        if let Some(rs) = parsed.results {
            for r in rs.into_iter().take(max_results) {
                let Some(url) = r.url else { continue };
                out.push(SearchResult {
                    url,
                    title: r.title,
                    snippet: r.content,
                    source: "searxng".to_string(),
                });
            }
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        routing::{get, post},
        Json, Router,
    };
    use std::net::SocketAddr;

    async fn serve(app: Router) -> SocketAddr {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        addr
    }

    #[tokio::test]
    async fn serper_parses_organic_results() {
        let app = Router::new().route(
            "/search",
            post(
                |headers: axum::http::HeaderMap, Json(body): Json<serde_json::Value>| async move {
                    assert_eq!(headers.get("X-API-KEY").unwrap(), "test-key");
                    assert_eq!(body["q"], "rust");
                    Json(serde_json::json!({
                        "organic": [
                            {"link": "https://a.example", "title": "A", "snippet": "about a"},
                            {"title": "no link, dropped"},
                            {"link": "https://b.example", "snippet": "about b"}
                        ]
                    }))
                },
            ),
        );
        let addr = serve(app).await;

        let p = SerperSearchProvider::new(
            reqwest::Client::new(),
            "test-key",
            format!("http://{addr}/search"),
        );
        let out = p.search("rust", 10).await.unwrap();
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].url, "https://a.example");
        assert_eq!(out[0].source, "serper");
        assert_eq!(out[1].title, None);
    }

    #[tokio::test]
    async fn searxng_appends_search_path_and_parses() {
        let app = Router::new().route(
            "/search",
            get(|| async {
                Json(serde_json::json!({
                    "results": [
                        {"url": "https://x.example", "title": "X", "content": "snippet x"}
                    ]
                }))
            }),
        );
        let addr = serve(app).await;

        let p = SearxngSearchProvider::new(reqwest::Client::new(), vec![format!("http://{addr}")]);
        let out = p.search("anything", 5).await.unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].snippet.as_deref(), Some("snippet x"));
        assert_eq!(out[0].source, "searxng");
    }

    #[tokio::test]
    async fn http_failure_is_a_search_error() {
        let app = Router::new().route(
            "/search",
            get(|| async { axum::http::StatusCode::INTERNAL_SERVER_ERROR }),
        );
        let addr = serve(app).await;

        let p = SearxngSearchProvider::new(reqwest::Client::new(), vec![format!("http://{addr}")]);
        let err = p.search("q", 5).await.unwrap_err();
        assert!(matches!(err, Error::Search(_)));
    }
}
