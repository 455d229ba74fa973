use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures::stream::{FuturesUnordered, StreamExt};
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tinyrpc_client::{xdial, Client};
use tinyrpc_common::{Options, Result, RpcError};
use tracing::debug;

use crate::discovery::{Discovery, SelectMode};

/// Client over a set of discovered servers.
///
/// Keeps one [`Client`] per server address, dialed on first use and replaced
/// once it reports itself unavailable.
///
/// # Example
///
/// ```no_run
/// use tinyrpc_common::Options;
/// use tinyrpc_xclient::{MultiServersDiscovery, SelectMode, XClient};
///
/// # async fn run() -> tinyrpc_common::Result<()> {
/// let discovery = MultiServersDiscovery::new(vec![
///     "tcp@127.0.0.1:9001".to_string(),
///     "tcp@127.0.0.1:9002".to_string(),
/// ]);
/// let xc = XClient::new(discovery, SelectMode::RoundRobin, Options::default());
///
/// let sum: i64 = xc.call("Foo.Sum", &(1i64, 2i64)).await?;
/// let any: i64 = xc.broadcast("Foo.Sum", &(1i64, 2i64)).await?;
/// xc.close().await
/// # }
/// ```
pub struct XClient<D> {
    discovery: D,
    mode: SelectMode,
    opt: Options,
    clients: Mutex<HashMap<String, Arc<Client>>>,
}

impl<D: Discovery> XClient<D> {
    pub fn new(discovery: D, mode: SelectMode, opt: Options) -> Self {
        Self {
            discovery,
            mode,
            opt,
            clients: Mutex::new(HashMap::new()),
        }
    }

    pub fn discovery(&self) -> &D {
        &self.discovery
    }

    /// Calls one server chosen by the select mode.
    pub async fn call<A, R>(&self, service_method: &str, args: &A) -> Result<R>
    where
        A: Serialize + ?Sized,
        R: DeserializeOwned + Send + 'static,
    {
        self.call_with(None, service_method, args).await
    }

    pub async fn call_timeout<A, R>(&self, timeout: Duration, service_method: &str, args: &A) -> Result<R>
    where
        A: Serialize + ?Sized,
        R: DeserializeOwned + Send + 'static,
    {
        self.call_with(Some(timeout), service_method, args).await
    }

    /// Calls every server concurrently.
    ///
    /// Waits for all of them. Returns the first error seen, otherwise the
    /// first reply to arrive.
    pub async fn broadcast<A, R>(&self, service_method: &str, args: &A) -> Result<R>
    where
        A: Serialize + ?Sized,
        R: DeserializeOwned + Send + 'static,
    {
        self.broadcast_with(None, service_method, args).await
    }

    /// [`broadcast`](Self::broadcast) with a deadline applied to each member.
    pub async fn broadcast_timeout<A, R>(&self, timeout: Duration, service_method: &str, args: &A) -> Result<R>
    where
        A: Serialize + ?Sized,
        R: DeserializeOwned + Send + 'static,
    {
        self.broadcast_with(Some(timeout), service_method, args).await
    }

    /// Closes and forgets every pooled client.
    pub async fn close(&self) -> Result<()> {
        let clients: Vec<(String, Arc<Client>)> = self.clients.lock().drain().collect();
        for (addr, client) in clients {
            if let Err(e) = client.close().await {
                debug!("rpc xclient: closing {}: {}", addr, e);
            }
        }
        Ok(())
    }

    async fn call_with<A, R>(&self, timeout: Option<Duration>, service_method: &str, args: &A) -> Result<R>
    where
        A: Serialize + ?Sized,
        R: DeserializeOwned + Send + 'static,
    {
        let rpc_addr = self.discovery.get(self.mode).await?;
        self.call_addr(&rpc_addr, timeout, service_method, args).await
    }

    async fn broadcast_with<A, R>(&self, timeout: Option<Duration>, service_method: &str, args: &A) -> Result<R>
    where
        A: Serialize + ?Sized,
        R: DeserializeOwned + Send + 'static,
    {
        let servers = self.discovery.get_all().await?;
        if servers.is_empty() {
            return Err(RpcError::NoAvailableServer);
        }

        let mut calls: FuturesUnordered<_> = servers
            .iter()
            .map(|rpc_addr| self.call_addr::<A, R>(rpc_addr, timeout, service_method, args))
            .collect();

        let mut reply = None;
        let mut first_error = None;
        while let Some(result) = calls.next().await {
            match result {
                Ok(r) if reply.is_none() => reply = Some(r),
                Ok(_) => {}
                Err(e) if first_error.is_none() => first_error = Some(e),
                Err(e) => debug!("rpc xclient: broadcast {}: {}", service_method, e),
            }
        }

        match (first_error, reply) {
            (Some(e), _) => Err(e),
            (None, Some(reply)) => Ok(reply),
            (None, None) => Err(RpcError::NoAvailableServer),
        }
    }

    async fn call_addr<A, R>(
        &self,
        rpc_addr: &str,
        timeout: Option<Duration>,
        service_method: &str,
        args: &A,
    ) -> Result<R>
    where
        A: Serialize + ?Sized,
        R: DeserializeOwned + Send + 'static,
    {
        let client = self.dial(rpc_addr).await?;
        match timeout {
            Some(timeout) => client.call_timeout(timeout, service_method, args).await,
            None => client.call(service_method, args).await,
        }
    }

    /// Returns the pooled client for `rpc_addr`, redialing a dead one.
    ///
    /// The pool lock is never held across network I/O, so one slow server
    /// does not stall calls to the others.
    async fn dial(&self, rpc_addr: &str) -> Result<Arc<Client>> {
        let stale = {
            let mut clients = self.clients.lock();
            match clients.get(rpc_addr) {
                Some(client) if client.is_available() => return Ok(Arc::clone(client)),
                Some(_) => {
                    debug!("rpc xclient: evicting unavailable client for {}", rpc_addr);
                    clients.remove(rpc_addr)
                }
                None => None,
            }
        };
        if let Some(stale) = stale {
            let _ = stale.close().await;
        }

        let dialed = Arc::new(xdial(rpc_addr, self.opt.clone()).await?);

        // a concurrent dial to the same address may have won the race
        let raced = {
            let mut clients = self.clients.lock();
            match clients.get(rpc_addr) {
                Some(client) if client.is_available() => Some(Arc::clone(client)),
                _ => {
                    clients.insert(rpc_addr.to_string(), Arc::clone(&dialed));
                    None
                }
            }
        };
        match raced {
            Some(client) => {
                let _ = dialed.close().await;
                Ok(client)
            }
            None => Ok(dialed),
        }
    }

    #[cfg(test)]
    fn pooled(&self) -> usize {
        self.clients.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discovery::MultiServersDiscovery;

    #[tokio::test]
    async fn test_call_without_servers() {
        let xc = XClient::new(MultiServersDiscovery::new(vec![]), SelectMode::Random, Options::default());
        let err = xc.call::<_, i64>("Foo.Sum", &(1i64, 2i64)).await.unwrap_err();
        assert!(matches!(err, RpcError::NoAvailableServer));
    }

    #[tokio::test]
    async fn test_broadcast_without_servers() {
        let xc = XClient::new(MultiServersDiscovery::new(vec![]), SelectMode::Random, Options::default());
        let err = xc.broadcast::<_, i64>("Foo.Sum", &(1i64, 2i64)).await.unwrap_err();
        assert!(matches!(err, RpcError::NoAvailableServer));
    }

    #[tokio::test]
    async fn test_malformed_address() {
        let discovery = MultiServersDiscovery::new(vec!["127.0.0.1:9001".to_string()]);
        let xc = XClient::new(discovery, SelectMode::RoundRobin, Options::default());
        let err = xc.call::<_, i64>("Foo.Sum", &(1i64, 2i64)).await.unwrap_err();
        assert!(matches!(err, RpcError::InvalidAddress(_)));
        assert_eq!(xc.pooled(), 0);
    }

    #[tokio::test]
    async fn test_close_empty_pool() {
        let xc = XClient::new(MultiServersDiscovery::new(vec![]), SelectMode::Random, Options::default());
        xc.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_slow_dial_does_not_block_other_servers() {
        use tinyrpc_server::{Server, Service};
        use tokio::net::TcpListener;

        struct Echo;

        impl Echo {
            fn get(&self, n: i64, reply: &mut i64) -> std::result::Result<(), String> {
                *reply = n;
                Ok(())
            }
        }

        let server = Arc::new(Server::new());
        server
            .register(Service::builder("Echo", Echo).method("Get", Echo::get).build())
            .unwrap();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let healthy = format!("tcp@{}", listener.local_addr().unwrap());
        tokio::spawn(server.accept(listener));

        // accepts, then never answers the CONNECT
        let silent = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let stuck = format!("http@{}", silent.local_addr().unwrap());
        tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((conn, _)) = silent.accept().await {
                held.push(conn);
            }
        });

        let opt = Options::default().with_connect_timeout(Duration::from_secs(5));
        let xc = Arc::new(XClient::new(MultiServersDiscovery::new(vec![]), SelectMode::Random, opt));

        let hung = {
            let xc = Arc::clone(&xc);
            tokio::spawn(async move { xc.call_addr::<_, i64>(&stuck, None, "Echo.Get", &1i64).await })
        };
        tokio::time::sleep(Duration::from_millis(100)).await;

        let reply = tokio::time::timeout(
            Duration::from_secs(1),
            xc.call_addr::<_, i64>(&healthy, None, "Echo.Get", &7i64),
        )
        .await
        .expect("healthy server waited on a stuck dial");
        assert_eq!(reply.unwrap(), 7);
        assert_eq!(xc.pooled(), 1);

        hung.abort();
    }
}
