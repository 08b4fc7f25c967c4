//! CoinCap REST API source.
//!
//! Issues one blocking GET per resource and hands back the parsed JSON body.
//! No retries: a failed request aborts the run.

use super::provider::{FetchError, MarketSource};
use crate::config::SourceConfig;
use crate::record::RecordKind;
use serde_json::Value;
use tracing::{debug, info};

/// CoinCap HTTP client.
pub struct CoinCapClient {
    client: reqwest::blocking::Client,
    base_url: String,
    api_key: Option<String>,
}

impl CoinCapClient {
    pub fn new(config: &SourceConfig) -> Result<Self, FetchError> {
        let client = reqwest::blocking::Client::builder()
            .user_agent(config.user_agent.as_str())
            .build()
            .map_err(|e| FetchError::Client(e.to_string()))?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
        })
    }

    /// Full URL of the resource backing a record kind.
    pub fn resource_url(&self, kind: RecordKind) -> String {
        format!("{}/{}", self.base_url, kind.resource())
    }
}

impl MarketSource for CoinCapClient {
    fn name(&self) -> &str {
        "coincap"
    }

    fn fetch(&self, kind: RecordKind) -> Result<Value, FetchError> {
        let resource = kind.resource();
        let url = self.resource_url(kind);
        debug!(%url, "requesting resource");

        let mut request = self.client.get(&url);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let resp = request.send().map_err(|e| FetchError::Network {
            resource,
            message: e.to_string(),
        })?;

        let status = resp.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                resource,
                status: status.as_u16(),
            });
        }

        let body: Value = resp.json().map_err(|e| FetchError::InvalidJson {
            resource,
            message: e.to_string(),
        })?;

        let rows = body
            .get("data")
            .and_then(Value::as_array)
            .map(Vec::len)
            .unwrap_or(0);
        info!(resource, rows, "fetched resource");

        Ok(body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{BufRead, BufReader, Write};
    use std::net::TcpListener;

    /// Serve one canned HTTP response on an ephemeral port; returns the base URL.
    fn serve_once(
        status_line: &'static str,
        content_type: &'static str,
        body: &'static str,
    ) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        std::thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            let mut reader = BufReader::new(stream);
            let mut line = String::new();
            while reader.read_line(&mut line).unwrap() > 0 && line != "\r\n" {
                line.clear();
            }
            let response = format!(
                "HTTP/1.1 {status_line}\r\nContent-Type: {content_type}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                body.len()
            );
            reader.get_mut().write_all(response.as_bytes()).unwrap();
        });
        format!("http://{addr}/v2")
    }

    fn client(base_url: &str) -> CoinCapClient {
        CoinCapClient::new(&SourceConfig {
            base_url: base_url.to_string(),
            ..SourceConfig::default()
        })
        .unwrap()
    }

    #[test]
    fn resource_urls_follow_record_kinds() {
        let c = client("https://api.coincap.io/v2");
        assert_eq!(c.resource_url(RecordKind::Asset), "https://api.coincap.io/v2/assets");
        assert_eq!(c.resource_url(RecordKind::Rate), "https://api.coincap.io/v2/rates");
        assert_eq!(
            c.resource_url(RecordKind::Exchange),
            "https://api.coincap.io/v2/exchanges"
        );
        assert_eq!(c.resource_url(RecordKind::Market), "https://api.coincap.io/v2/markets");
    }

    #[test]
    fn trailing_slash_in_base_url_is_ignored() {
        let c = client("http://localhost:8080/v2/");
        assert_eq!(c.resource_url(RecordKind::Market), "http://localhost:8080/v2/markets");
    }

    #[test]
    fn unreachable_host_is_a_network_error() {
        // Port 9 (discard) on loopback is closed in test environments.
        let c = client("http://127.0.0.1:9");
        let err = c.get_assets().unwrap_err();
        assert!(matches!(err, FetchError::Network { resource: "assets", .. }));
    }

    #[test]
    fn html_body_is_invalid_json() {
        let base = serve_once("200 OK", "text/html", "<html><body>maintenance</body></html>");
        let err = client(&base).get_assets().unwrap_err();
        assert!(matches!(err, FetchError::InvalidJson { resource: "assets", .. }));
    }

    #[test]
    fn non_success_status_is_fatal_even_with_json_body() {
        let base = serve_once(
            "429 Too Many Requests",
            "application/json",
            r#"{"error":"rate limited"}"#,
        );
        let err = client(&base).get_rates().unwrap_err();
        assert!(matches!(err, FetchError::Status { resource: "rates", status: 429 }));
    }

    #[test]
    fn success_returns_parsed_body() {
        let base = serve_once(
            "200 OK",
            "application/json",
            r#"{"data":[{"id":"bitcoin","rank":"1"}],"timestamp":1}"#,
        );
        let body = client(&base).get_assets().unwrap();
        assert_eq!(body["data"][0]["id"], "bitcoin");
    }
}
