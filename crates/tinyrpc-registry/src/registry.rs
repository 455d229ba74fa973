//! Registry service
//!
//! An in-memory directory of server addresses kept alive by heartbeats.
//!
//! - `GET <path>`: 200, live addresses in the `X-Tinyrpc-Servers` header,
//!   sorted and comma-joined
//! - `POST <path>` with the address in the same header: 200, or 500 when the
//!   header is missing

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::routing::get;
use parking_lot::Mutex;
use tinyrpc_common::{Result, RpcError};
use tokio::net::TcpListener;
use tokio::time::Instant;
use tracing::{debug, info};

/// Default HTTP path of the registry.
pub const DEFAULT_PATH: &str = "/_tinyrpc_/registry";

/// Header carrying server addresses in both directions.
pub const SERVERS_HEADER: &str = "X-Tinyrpc-Servers";

/// How long a heartbeat keeps a server listed.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5 * 60);

/// Registry configuration.
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    pub path: String,
    /// Zero keeps servers listed forever.
    pub timeout: Duration,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            path: DEFAULT_PATH.to_string(),
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

/// A server and the time of its last heartbeat.
#[derive(Debug, Clone)]
pub struct ServerItem {
    pub addr: String,
    pub start: Instant,
}

/// Heartbeat-driven server directory.
pub struct Registry {
    config: RegistryConfig,
    servers: Mutex<HashMap<String, ServerItem>>,
}

impl Registry {
    pub fn new(config: RegistryConfig) -> Self {
        Self {
            config,
            servers: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        Self::new(RegistryConfig {
            timeout,
            ..Default::default()
        })
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    /// Inserts `addr` or refreshes its heartbeat time.
    pub fn put_server(&self, addr: &str) {
        let now = Instant::now();
        let mut servers = self.servers.lock();
        servers
            .entry(addr.to_string())
            .and_modify(|item| item.start = now)
            .or_insert_with(|| ServerItem {
                addr: addr.to_string(),
                start: now,
            });
    }

    /// Lists live servers in sorted order, evicting expired ones on the way.
    pub fn alive_servers(&self) -> Vec<String> {
        let now = Instant::now();
        let timeout = self.config.timeout;
        let mut servers = self.servers.lock();

        servers.retain(|addr, item| {
            let alive = timeout.is_zero()
                || item
                    .start
                    .checked_add(timeout)
                    .map_or(true, |deadline| deadline > now);
            if !alive {
                debug!("rpc registry: evicting {}", addr);
            }
            alive
        });

        let mut alive: Vec<String> = servers.keys().cloned().collect();
        alive.sort();
        alive
    }

    /// HTTP surface of the registry, mounted at the configured path.
    pub fn router(self: Arc<Self>) -> axum::Router {
        let path = self.config.path.clone();
        axum::Router::new()
            .route(&path, get(list_servers).post(heartbeat))
            .with_state(self)
    }

    /// Serves the registry on `listener` until the server fails.
    pub async fn serve(self: Arc<Self>, listener: TcpListener) -> Result<()> {
        info!(
            "rpc registry: listening on {}{}",
            listener.local_addr()?,
            self.config.path
        );
        axum::serve(listener, self.router())
            .await
            .map_err(|e| RpcError::Registry(format!("Server error: {}", e)))
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new(RegistryConfig::default())
    }
}

async fn list_servers(State(registry): State<Arc<Registry>>) -> impl IntoResponse {
    let servers = registry.alive_servers().join(",");
    (StatusCode::OK, [(SERVERS_HEADER, servers)])
}

async fn heartbeat(State(registry): State<Arc<Registry>>, headers: HeaderMap) -> StatusCode {
    let addr = headers
        .get(SERVERS_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|addr| !addr.is_empty());

    match addr {
        Some(addr) => {
            debug!("rpc registry: heartbeat from {}", addr);
            registry.put_server(addr);
            StatusCode::OK
        }
        None => StatusCode::INTERNAL_SERVER_ERROR,
    }
}
