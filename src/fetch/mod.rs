//! Remote dataset download.

mod basic;
mod client;

pub use basic::BasicClient;
pub use client::HttpClient;

use crate::error::{Error, Result};
use tracing::{debug, warn};

/// True when `source` is an http(s) URL rather than a local path.
pub fn is_http_url(source: &str) -> bool {
    reqwest::Url::parse(source).is_ok_and(|url| matches!(url.scheme(), "http" | "https"))
}

/// GETs `url` and returns the body, mapping transport failures and non-2xx
/// statuses to [`Error::UpstreamUnavailable`].
#[tracing::instrument(skip(client))]
pub async fn fetch_bytes<C: HttpClient + ?Sized>(client: &C, url: &str) -> Result<Vec<u8>> {
    let parsed = url
        .parse::<reqwest::Url>()
        .map_err(|e| Error::invalid(format!("invalid url '{url}': {e}")))?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(Error::invalid(format!("unsupported url scheme '{}'", parsed.scheme())));
    }

    let req = reqwest::Request::new(reqwest::Method::GET, parsed);
    let resp = client.execute(req).await.map_err(|e| {
        warn!(error = %e, "Dataset fetch failed");
        Error::UpstreamUnavailable(e.to_string())
    })?;

    let status = resp.status();
    if !status.is_success() {
        return Err(Error::UpstreamUnavailable(format!(
            "{url} returned status {status}"
        )));
    }

    let bytes = resp
        .bytes()
        .await
        .map_err(|e| Error::UpstreamUnavailable(e.to_string()))?;
    debug!(bytes = bytes.len(), "Dataset downloaded");
    Ok(bytes.to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    struct Unreachable;

    #[async_trait]
    impl HttpClient for Unreachable {
        async fn execute(&self, _req: reqwest::Request) -> reqwest::Result<reqwest::Response> {
            // Port 9 (discard) on an unroutable TEST-NET address never answers.
            reqwest::Client::builder()
                .timeout(std::time::Duration::from_millis(50))
                .build()?
                .get("http://192.0.2.1:9/")
                .send()
                .await
        }
    }

    struct Status(u16);

    #[async_trait]
    impl HttpClient for Status {
        async fn execute(&self, _req: reqwest::Request) -> reqwest::Result<reqwest::Response> {
            let resp = axum::http::Response::builder()
                .status(self.0)
                .body("nope")
                .unwrap();
            Ok(reqwest::Response::from(resp))
        }
    }

    #[test]
    fn test_is_http_url() {
        assert!(is_http_url("https://example.com/hour.csv"));
        assert!(is_http_url("http://example.com/hour.csv"));
        assert!(!is_http_url("http_data.csv"));
        assert!(!is_http_url("data/hour.csv"));
        assert!(!is_http_url("ftp://example.com/hour.csv"));
    }

    #[tokio::test]
    async fn test_rejects_non_http_scheme() {
        let err = fetch_bytes(&Status(200), "ftp://example.com/hour.csv")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }

    #[tokio::test]
    async fn test_non_success_status_is_upstream_error() {
        let err = fetch_bytes(&Status(404), "http://example.com/hour.csv")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::UpstreamUnavailable(_)));
    }

    #[tokio::test]
    async fn test_transport_failure_is_upstream_error() {
        let err = fetch_bytes(&Unreachable, "http://example.com/hour.csv")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::UpstreamUnavailable(_)));
    }

    #[tokio::test]
    async fn test_success_returns_body() {
        let bytes = fetch_bytes(&Status(200), "http://example.com/hour.csv")
            .await
            .unwrap();
        assert_eq!(bytes, b"nope");
    }
}
