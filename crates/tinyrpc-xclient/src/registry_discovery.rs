use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;
use tinyrpc_common::Result;
use tinyrpc_registry::RegistryClient;
use tracing::debug;

use crate::discovery::{Discovery, MultiServersDiscovery, SelectMode};

/// How long a fetched server list is trusted.
pub const DEFAULT_UPDATE_TIMEOUT: Duration = Duration::from_secs(10);

/// Discovery backed by a registry, refetched once the cached list goes stale.
pub struct RegistryDiscovery {
    servers: MultiServersDiscovery,
    registry: RegistryClient,
    timeout: Duration,
    last_update: Mutex<Option<Instant>>,
}

impl RegistryDiscovery {
    /// `registry_url` is the full URL, path included. `timeout` defaults to
    /// [`DEFAULT_UPDATE_TIMEOUT`].
    pub fn new(registry_url: &str, timeout: Option<Duration>) -> Result<Self> {
        Ok(Self {
            servers: MultiServersDiscovery::new(Vec::new()),
            registry: RegistryClient::new(registry_url)?,
            timeout: timeout.unwrap_or(DEFAULT_UPDATE_TIMEOUT),
            last_update: Mutex::new(None),
        })
    }

    fn is_fresh(&self) -> bool {
        self.last_update
            .lock()
            .is_some_and(|at| at.elapsed() < self.timeout)
    }

    fn touch(&self) {
        *self.last_update.lock() = Some(Instant::now());
    }
}

#[async_trait]
impl Discovery for RegistryDiscovery {
    async fn refresh(&self) -> Result<()> {
        if self.is_fresh() {
            return Ok(());
        }
        debug!("rpc registry: refresh servers from {}", self.registry.url());
        let servers = self.registry.servers().await?;
        self.servers.set_servers(servers);
        self.touch();
        Ok(())
    }

    async fn update(&self, servers: Vec<String>) -> Result<()> {
        self.servers.set_servers(servers);
        self.touch();
        Ok(())
    }

    async fn get(&self, mode: SelectMode) -> Result<String> {
        self.refresh().await?;
        self.servers.select(mode)
    }

    async fn get_all(&self) -> Result<Vec<String>> {
        self.refresh().await?;
        Ok(self.servers.servers())
    }
}
