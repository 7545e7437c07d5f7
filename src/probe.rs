//! Best-effort instance metadata probe.
//!
//! Before or alongside a connection, the server can be asked to describe
//! itself with a plain HTTP `GET` on the same host and port as the target at
//! [`METADATA_PATH`]. The body is newline-separated `key: value` lines. Keys
//! are matched case-insensitively.
//!
//! A failed probe never affects the connection; [`MetadataProbe::fetch_or_warn`]
//! reports it as a warning and moves on.
//!
//! ```
//! use tether_client::probe::{metadata_url, parse_metadata};
//!
//! let url = metadata_url("wss://feed.example.org:8443/live?x=1").unwrap();
//! assert_eq!(url.as_str(), "https://feed.example.org:8443/info");
//!
//! let meta = parse_metadata("Version: 2.4\nregion: eu-west\n");
//! assert_eq!(meta.get("version"), Some("2.4"));
//! assert_eq!(meta.get("REGION"), Some("eu-west"));
//! ```

use std::collections::BTreeMap;
use std::time::Duration;

use reqwest::Client;
use tracing::{debug, warn};
use url::Url;

use crate::error::LinkError;
use crate::event::ConnectionObserver;

/// Path the metadata document is served from.
pub const METADATA_PATH: &str = "/info";

/// Default request timeout for a probe.
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Derive the metadata URL for a connection target.
///
/// `wss` becomes `https` and `ws` becomes `http`; `http` and `https` are kept.
/// Host and port are preserved, path is [`METADATA_PATH`], and any query or
/// fragment is dropped.
///
/// # Errors
///
/// Returns [`LinkError::Configuration`] if `target` is not a URL or uses
/// another scheme.
pub fn metadata_url(target: &str) -> Result<Url, LinkError> {
    let mut url = Url::parse(target.trim())
        .map_err(|e| LinkError::Configuration(format!("invalid target `{target}`: {e}")))?;
    let scheme = match url.scheme() {
        "wss" | "https" => "https",
        "ws" | "http" => "http",
        other => {
            return Err(LinkError::Configuration(format!(
                "cannot probe metadata for scheme `{other}`"
            )))
        }
    };
    url.set_scheme(scheme)
        .map_err(|()| LinkError::Configuration(format!("cannot switch `{target}` to {scheme}")))?;
    url.set_path(METADATA_PATH);
    url.set_query(None);
    url.set_fragment(None);
    Ok(url)
}

/// Parse a metadata body.
///
/// Lines without a colon are skipped. Keys and values are trimmed and keys are
/// lowercased; a repeated key keeps its last value.
pub fn parse_metadata(body: &str) -> InstanceMetadata {
    let entries = body
        .lines()
        .filter_map(|line| line.split_once(':'))
        .map(|(key, value)| (key.trim().to_ascii_lowercase(), value.trim().to_string()))
        .filter(|(key, _)| !key.is_empty())
        .collect();
    InstanceMetadata { entries }
}

/// Key/value metadata describing a server instance.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InstanceMetadata {
    entries: BTreeMap<String, String>,
}

impl InstanceMetadata {
    /// Look up `key`, ignoring ASCII case.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .get(&key.to_ascii_lowercase())
            .map(String::as_str)
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if the document had no usable lines.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries in key order. Keys are lowercase.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

/// HTTP client for the metadata endpoint.
#[derive(Debug, Clone)]
pub struct MetadataProbe {
    http: Client,
}

impl MetadataProbe {
    /// Build a probe whose requests give up after `timeout`.
    ///
    /// # Errors
    ///
    /// Returns [`LinkError::Probe`] if the HTTP client cannot be built.
    pub fn new(timeout: Duration) -> Result<Self, LinkError> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| LinkError::Probe(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { http })
    }

    /// Use an existing client, including its timeout and TLS setup.
    pub fn with_client(http: Client) -> Self {
        Self { http }
    }

    /// Fetch and parse the metadata for `target`.
    ///
    /// # Errors
    ///
    /// Returns [`LinkError::Configuration`] for targets [`metadata_url`]
    /// rejects and [`LinkError::Probe`] for request failures and non-success
    /// statuses.
    pub async fn fetch(&self, target: &str) -> Result<InstanceMetadata, LinkError> {
        let url = metadata_url(target)?;
        debug!(url = %url, "probing instance metadata");

        let response = self
            .http
            .get(url.clone())
            .send()
            .await
            .map_err(|e| LinkError::Probe(format!("request to {url} failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(LinkError::Probe(format!("{url} returned {status}")));
        }

        let body = response
            .text()
            .await
            .map_err(|e| LinkError::Probe(format!("failed to read {url}: {e}")))?;
        let metadata = parse_metadata(&body);
        debug!(url = %url, entries = metadata.len(), "instance metadata received");
        Ok(metadata)
    }

    /// Like [`fetch`](Self::fetch), but failures become a warning on `observer`.
    pub async fn fetch_or_warn<O>(&self, target: &str, observer: &O) -> Option<InstanceMetadata>
    where
        O: ConnectionObserver + ?Sized,
    {
        match self.fetch(target).await {
            Ok(metadata) => Some(metadata),
            Err(e) => {
                warn!(target = %target, "metadata probe failed: {e}");
                observer.on_warning(&format!("metadata probe failed: {e}"));
                None
            }
        }
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::indexing_slicing
)]
mod tests {
    use super::*;
    use crate::event::{ChannelObserver, ConnectionEvent};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    #[test]
    fn websocket_schemes_map_to_http() {
        assert_eq!(
            metadata_url("ws://10.0.0.5:9000/feed").unwrap().as_str(),
            "http://10.0.0.5:9000/info"
        );
        assert_eq!(
            metadata_url("wss://host/a/b#frag").unwrap().as_str(),
            "https://host/info"
        );
        assert_eq!(
            metadata_url("https://host:3000/socket.io/?EIO=4").unwrap().as_str(),
            "https://host:3000/info"
        );
        assert_eq!(
            metadata_url("http://host").unwrap().as_str(),
            "http://host/info"
        );
    }

    #[test]
    fn unsupported_targets_are_rejected() {
        assert!(matches!(
            metadata_url("ftp://host/"),
            Err(LinkError::Configuration(_))
        ));
        assert!(matches!(
            metadata_url("not a url"),
            Err(LinkError::Configuration(_))
        ));
    }

    #[test]
    fn parse_skips_junk_and_keeps_colons_in_values() {
        let meta = parse_metadata("Name: relay-1\r\n\njunk line\n : empty key\nurl: http://x:1\nname: relay-2\n");
        assert_eq!(meta.len(), 2);
        assert_eq!(meta.get("NAME"), Some("relay-2"));
        assert_eq!(meta.get("url"), Some("http://x:1"));
        assert_eq!(meta.get("missing"), None);
        assert_eq!(
            meta.iter().collect::<Vec<_>>(),
            vec![("name", "relay-2"), ("url", "http://x:1")]
        );
    }

    #[test]
    fn empty_body_is_empty_metadata() {
        assert!(parse_metadata("").is_empty());
    }

    /// Serve one HTTP response and return the base `ws://` target.
    async fn start_http_server(status: &'static str, body: &'static str) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut tcp, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; 4096];
            let mut seen = Vec::new();
            while !seen.windows(4).any(|w| w == b"\r\n\r\n") {
                let n = tcp.read(&mut buf).await.unwrap();
                if n == 0 {
                    return;
                }
                seen.extend_from_slice(&buf[..n]);
            }
            let request = String::from_utf8_lossy(&seen);
            assert!(request.starts_with("GET /info HTTP/1.1"), "{request}");
            let response = format!(
                "HTTP/1.1 {status}\r\nContent-Type: text/plain\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                body.len()
            );
            tcp.write_all(response.as_bytes()).await.unwrap();
            tcp.shutdown().await.unwrap();
        });
        format!("ws://{addr}/feed")
    }

    #[tokio::test]
    async fn fetch_parses_served_metadata() {
        let target = start_http_server("200 OK", "Version: 3.1\nMotd: hello: world\n").await;
        let probe = MetadataProbe::new(Duration::from_secs(5)).unwrap();
        let meta = probe.fetch(&target).await.unwrap();
        assert_eq!(meta.get("version"), Some("3.1"));
        assert_eq!(meta.get("motd"), Some("hello: world"));
    }

    #[tokio::test]
    async fn non_success_status_is_a_probe_error() {
        let target = start_http_server("404 Not Found", "nope").await;
        let probe = MetadataProbe::new(Duration::from_secs(5)).unwrap();
        let err = probe.fetch(&target).await.unwrap_err();
        assert!(matches!(err, LinkError::Probe(ref m) if m.contains("404")), "{err}");
    }

    #[tokio::test]
    async fn failures_become_warnings() {
        let (observer, mut events) = ChannelObserver::channel(8);
        let probe = MetadataProbe::new(Duration::from_millis(500)).unwrap();

        assert!(probe.fetch_or_warn("ws://127.0.0.1:1/feed", &observer).await.is_none());
        match events.try_recv().unwrap() {
            ConnectionEvent::Warning { detail } => assert!(detail.contains("metadata probe failed")),
            other => panic!("expected warning, got {other:?}"),
        }
    }
}
