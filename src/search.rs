//! Search index client with shared rate limiting and scroll pagination.
//!
//! Every request goes through the process-wide [`RateLimiter`] first. There is
//! no retry: a transport failure or a non-2xx status fails the call, and the
//! harvester surfaces it as a failure of the wallet being processed.

use crate::config::{HarvesterConfig, HttpConfig, ScrollConfig, MAX_TOTAL_HITS};
use crate::rate_limit::RateLimiter;
use crate::schemas::{Hit, Query, SearchResponse};
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Error, Debug)]
pub enum SearchError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("HTTP status {status} from {url}")]
    Status { status: u16, url: String },

    #[error("Malformed response: {0}")]
    Malformed(String),
}

/// Collections of the index the harvester reads from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchIndex {
    Transactions,
    ScResults,
    Logs,
}

impl SearchIndex {
    pub fn name(&self) -> &'static str {
        match self {
            SearchIndex::Transactions => "transactions",
            SearchIndex::ScResults => "scresults",
            SearchIndex::Logs => "logs",
        }
    }
}

impl std::fmt::Display for SearchIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// One POST of a JSON body, returning the decoded JSON response.
#[async_trait]
pub trait SearchTransport: Send + Sync {
    async fn post_json(&self, url: &str, body: &Value) -> Result<Value, SearchError>;
}

/// `reqwest`-backed transport
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new(config: &HttpConfig) -> Result<Self, SearchError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .pool_max_idle_per_host(config.pool_max_idle_per_host)
            .tcp_keepalive(Duration::from_secs(30))
            .build()?;

        Ok(Self { client })
    }
}

#[async_trait]
impl SearchTransport for HttpTransport {
    async fn post_json(&self, url: &str, body: &Value) -> Result<Value, SearchError> {
        let response = self.client.post(url).json(body).send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(SearchError::Status {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }

        let bytes = response.bytes().await?;
        serde_json::from_slice(&bytes)
            .map_err(|e| SearchError::Malformed(format!("{} from {}", e, url)))
    }
}

/// Result of driving a scroll to exhaustion
#[derive(Debug, Clone, PartialEq)]
pub enum ScrollOutcome {
    /// All hits, in the order the server returned them
    Complete(Vec<Hit>),
    /// The query matched more than [`MAX_TOTAL_HITS`] documents and was abandoned
    Skipped { total: u64 },
}

#[cfg(test)]
impl ScrollOutcome {
    pub fn into_hits(self) -> Option<Vec<Hit>> {
        match self {
            ScrollOutcome::Complete(hits) => Some(hits),
            ScrollOutcome::Skipped { .. } => None,
        }
    }
}

/// Rate-limited search client
pub struct SearchClient {
    transport: Arc<dyn SearchTransport>,
    limiter: Arc<RateLimiter>,
    base_url: String,
    scroll: ScrollConfig,
}

impl SearchClient {
    pub fn new(
        transport: Arc<dyn SearchTransport>,
        limiter: Arc<RateLimiter>,
        base_url: impl Into<String>,
        scroll: ScrollConfig,
    ) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self {
            transport,
            limiter,
            base_url,
            scroll,
        }
    }

    /// Client over HTTP with a fresh limiter built from `config`
    pub fn from_config(config: &HarvesterConfig) -> Result<Self, SearchError> {
        let transport = Arc::new(HttpTransport::new(&config.http)?);
        let limiter = Arc::new(RateLimiter::from_config(&config.rate_limits));
        Ok(Self::new(
            transport,
            limiter,
            config.index_base_url.clone(),
            config.scroll.clone(),
        ))
    }

    /// URL opening a scroll session on `index`
    pub fn search_url(&self, index: SearchIndex) -> String {
        format!(
            "{}/{}/_search?scroll={}&size={}",
            self.base_url, index, self.scroll.keep_alive, self.scroll.page_size
        )
    }

    fn scroll_url(&self) -> String {
        format!("{}/_search/scroll", self.base_url)
    }

    /// Issue one request and decode the response envelope.
    pub async fn fetch_page(&self, url: &str, query: &Query) -> Result<SearchResponse, SearchError> {
        self.limiter.acquire().await;

        let raw = self.transport.post_json(url, query.as_json()).await?;
        serde_json::from_value(raw)
            .map_err(|e| SearchError::Malformed(format!("{} from {}", e, url)))
    }

    /// Fetch every hit of `query`, following the scroll cursor until the
    /// accumulated count reaches the reported total.
    pub async fn scroll_all(&self, url: &str, query: &Query) -> Result<ScrollOutcome, SearchError> {
        let first = self.fetch_page(url, query).await?;
        let total = first
            .total_hits()
            .ok_or_else(|| SearchError::Malformed(format!("missing hits.total.value from {}", url)))?;

        if total > MAX_TOTAL_HITS {
            warn!(
                "Query on {} matched {} hits (ceiling {}), skipping",
                url, total, MAX_TOTAL_HITS
            );
            return Ok(ScrollOutcome::Skipped { total });
        }

        let mut scroll_id = first.scroll_id;
        let mut all_hits = first.hits.hits;
        let scroll_url = self.scroll_url();
        let mut page: u32 = 1;

        while (all_hits.len() as u64) < total {
            let cursor = scroll_id.take().ok_or_else(|| {
                SearchError::Malformed(format!(
                    "missing _scroll_id after {} of {} hits",
                    all_hits.len(),
                    total
                ))
            })?;

            let continuation = Query::scroll_continuation(&self.scroll.keep_alive, &cursor);
            let next = self.fetch_page(&scroll_url, &continuation).await?;

            if next.hits.hits.is_empty() {
                return Err(SearchError::Malformed(format!(
                    "scroll ended after {} of {} hits",
                    all_hits.len(),
                    total
                )));
            }

            page += 1;
            scroll_id = next.scroll_id;
            all_hits.extend(next.hits.hits);

            debug!(
                "Scroll page {}: {} of {} hits",
                page,
                all_hits.len(),
                total
            );
        }

        Ok(ScrollOutcome::Complete(all_hits))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{page, ScriptedTransport};
    use serde_json::json;

    fn client(transport: Arc<ScriptedTransport>) -> SearchClient {
        SearchClient::new(
            transport,
            Arc::new(RateLimiter::new(1000, Duration::from_millis(10))),
            "http://index.test/",
            ScrollConfig::default(),
        )
    }

    #[test]
    fn test_search_url() {
        let client = client(Arc::new(ScriptedTransport::new(|_, _| Ok(json!({})))));
        assert_eq!(
            client.search_url(SearchIndex::Transactions),
            "http://index.test/transactions/_search?scroll=1m&size=10000"
        );
        assert_eq!(
            client.search_url(SearchIndex::ScResults),
            "http://index.test/scresults/_search?scroll=1m&size=10000"
        );
    }

    #[tokio::test]
    async fn test_scroll_follows_cursor_until_total() {
        let transport = Arc::new(ScriptedTransport::new(|url, body| {
            if url.ends_with("/_search/scroll") {
                match body["scroll_id"].as_str() {
                    Some("c1") => Ok(page(5, Some("c2"), &["t3", "t4"])),
                    Some("c2") => Ok(page(5, Some("c3"), &["t5"])),
                    other => panic!("unexpected cursor {:?}", other),
                }
            } else {
                Ok(page(5, Some("c1"), &["t1", "t2"]))
            }
        }));
        let client = client(transport.clone());

        let url = client.search_url(SearchIndex::Transactions);
        let outcome = client
            .scroll_all(&url, &Query::wallet_transactions("erd1a"))
            .await
            .unwrap();

        let ids: Vec<String> = outcome.into_hits().unwrap().into_iter().map(|h| h.id).collect();
        assert_eq!(ids, vec!["t1", "t2", "t3", "t4", "t5"]);

        let calls = transport.calls();
        assert_eq!(calls.len(), 3);
        assert_eq!(calls[1].1, json!({"scroll": "1m", "scroll_id": "c1"}));
    }

    #[tokio::test]
    async fn test_single_page_needs_no_cursor() {
        let transport = Arc::new(ScriptedTransport::new(|_, _| Ok(page(2, None, &["t1", "t2"]))));
        let client = client(transport.clone());

        let outcome = client
            .scroll_all("http://index.test/logs/_search", &Query::terms("f", &["x".into()]))
            .await
            .unwrap();

        assert_eq!(outcome.into_hits().unwrap().len(), 2);
        assert_eq!(transport.call_count(), 1);
    }

    #[tokio::test]
    async fn test_over_ceiling_is_skipped_after_first_page() {
        let transport = Arc::new(ScriptedTransport::new(|_, _| {
            Ok(page(150_000, Some("c1"), &["t1"]))
        }));
        let client = client(transport.clone());

        let outcome = client
            .scroll_all("http://index.test/transactions/_search", &Query::wallet_transactions("w"))
            .await
            .unwrap();

        assert_eq!(outcome, ScrollOutcome::Skipped { total: 150_000 });
        assert_eq!(transport.call_count(), 1);
    }

    #[tokio::test]
    async fn test_missing_total_is_malformed() {
        let transport = Arc::new(ScriptedTransport::new(|_, _| Ok(json!({"hits": {"hits": []}}))));
        let client = client(transport);

        let err = client
            .scroll_all("http://index.test/transactions/_search", &Query::wallet_transactions("w"))
            .await
            .unwrap_err();
        assert!(matches!(err, SearchError::Malformed(_)));
    }

    #[tokio::test]
    async fn test_short_scroll_is_malformed_not_endless() {
        let transport = Arc::new(ScriptedTransport::new(|url, _| {
            if url.ends_with("/_search/scroll") {
                Ok(page(3, Some("c2"), &[]))
            } else {
                Ok(page(3, Some("c1"), &["t1"]))
            }
        }));
        let client = client(transport.clone());

        let err = client
            .scroll_all("http://index.test/transactions/_search", &Query::wallet_transactions("w"))
            .await
            .unwrap_err();
        assert!(matches!(err, SearchError::Malformed(_)));
        assert_eq!(transport.call_count(), 2);
    }

    #[tokio::test]
    async fn test_transport_error_is_not_retried() {
        let transport = Arc::new(ScriptedTransport::new(|url, _| {
            Err(SearchError::Status {
                status: 503,
                url: url.to_string(),
            })
        }));
        let client = client(transport.clone());

        let err = client
            .fetch_page("http://index.test/logs/_search", &Query::terms("f", &["x".into()]))
            .await
            .unwrap_err();
        assert!(matches!(err, SearchError::Status { status: 503, .. }));
        assert_eq!(transport.call_count(), 1);
    }

    /// Answer a single HTTP request on a local port with `status_line` and `body`.
    async fn serve_once(status_line: &'static str, body: &'static str) -> String {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();

            // Drain the whole request so closing the socket does not reset it.
            let mut request = Vec::new();
            let mut buf = [0u8; 4096];
            loop {
                let n = socket.read(&mut buf).await.unwrap();
                if n == 0 {
                    break;
                }
                request.extend_from_slice(&buf[..n]);

                let text = String::from_utf8_lossy(&request).to_string();
                if let Some(header_end) = text.find("\r\n\r\n") {
                    let content_length = text[..header_end]
                        .lines()
                        .filter_map(|line| line.split_once(':'))
                        .find(|(name, _)| name.trim().eq_ignore_ascii_case("content-length"))
                        .and_then(|(_, value)| value.trim().parse::<usize>().ok())
                        .unwrap_or(0);
                    if request.len() >= header_end + 4 + content_length {
                        break;
                    }
                }
            }

            let response = format!(
                "HTTP/1.1 {}\r\nContent-Type: text/html\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                status_line,
                body.len(),
                body
            );
            socket.write_all(response.as_bytes()).await.unwrap();
            socket.shutdown().await.unwrap();
        });

        format!("http://{}/transactions/_search", addr)
    }

    #[tokio::test]
    async fn test_non_json_success_body_is_malformed() {
        let url = serve_once("200 OK", "<html>gateway</html>").await;
        let transport = HttpTransport::new(&HttpConfig::default()).unwrap();

        let err = transport
            .post_json(&url, &json!({"query": {"match_all": {}}}))
            .await
            .unwrap_err();
        assert!(matches!(err, SearchError::Malformed(_)), "got {:?}", err);
    }

    #[tokio::test]
    async fn test_error_status_from_server() {
        let url = serve_once("502 Bad Gateway", "<html>gateway</html>").await;
        let transport = HttpTransport::new(&HttpConfig::default()).unwrap();

        let err = transport
            .post_json(&url, &json!({"query": {"match_all": {}}}))
            .await
            .unwrap_err();
        assert!(matches!(err, SearchError::Status { status: 502, .. }), "got {:?}", err);
    }
}
