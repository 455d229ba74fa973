use http_body_util::Empty;
use hyper::body::Bytes;
use hyper::{Method, Request, Uri};
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use tinyrpc_common::{Result, RpcError};

use crate::registry::SERVERS_HEADER;

/// HTTP client for one registry URL, e.g. `http://127.0.0.1:9999/_tinyrpc_/registry`.
#[derive(Clone)]
pub struct RegistryClient {
    http: Client<HttpConnector, Empty<Bytes>>,
    url: Uri,
}

impl RegistryClient {
    pub fn new(url: &str) -> Result<Self> {
        let url: Uri = url
            .parse()
            .map_err(|e| RpcError::Registry(format!("invalid registry url '{}': {}", url, e)))?;
        let http = Client::builder(TokioExecutor::new()).build_http();
        Ok(Self { http, url })
    }

    pub fn url(&self) -> &Uri {
        &self.url
    }

    /// Announces `addr` as alive.
    pub async fn send_heartbeat(&self, addr: &str) -> Result<()> {
        let request = Request::builder()
            .method(Method::POST)
            .uri(self.url.clone())
            .header(SERVERS_HEADER, addr)
            .body(Empty::new())
            .map_err(|e| RpcError::Registry(format!("Failed to build request: {}", e)))?;

        let response = self
            .http
            .request(request)
            .await
            .map_err(|e| RpcError::Registry(format!("heartbeat to {} failed: {}", self.url, e)))?;

        if !response.status().is_success() {
            return Err(RpcError::Registry(format!(
                "heartbeat to {} rejected: {}",
                self.url,
                response.status()
            )));
        }
        Ok(())
    }

    /// Fetches the live server list.
    pub async fn servers(&self) -> Result<Vec<String>> {
        let request = Request::builder()
            .method(Method::GET)
            .uri(self.url.clone())
            .body(Empty::new())
            .map_err(|e| RpcError::Registry(format!("Failed to build request: {}", e)))?;

        let response = self
            .http
            .request(request)
            .await
            .map_err(|e| RpcError::Registry(format!("refresh from {} failed: {}", self.url, e)))?;

        if !response.status().is_success() {
            return Err(RpcError::Registry(format!(
                "refresh from {} rejected: {}",
                self.url,
                response.status()
            )));
        }

        let servers = response
            .headers()
            .get(SERVERS_HEADER)
            .and_then(|value| value.to_str().ok())
            .unwrap_or_default();
        Ok(parse_servers(servers))
    }
}

/// Splits a comma-joined address list, dropping blanks.
pub fn parse_servers(header: &str) -> Vec<String> {
    header
        .split(',')
        .map(str::trim)
        .filter(|addr| !addr.is_empty())
        .map(String::from)
        .collect()
}
