//! XClient integration tests
//!
//! Several tinyrpc servers on loopback, found either from a fixed list or
//! through a live registry kept current by heartbeats.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tinyrpc_common::{Options, RpcError};
use tinyrpc_registry::{heartbeat, Registry};
use tinyrpc_server::{Server, Service};
use tinyrpc_xclient::{Discovery, MultiServersDiscovery, RegistryDiscovery, SelectMode, XClient};
use tokio::net::TcpListener;

#[derive(Debug, Default, Serialize, Deserialize)]
struct Args {
    num1: i64,
    num2: i64,
}

struct Foo {
    id: u32,
}

impl Foo {
    fn sum(&self, args: Args, reply: &mut i64) -> Result<(), String> {
        *reply = args.num1 + args.num2;
        Ok(())
    }

    fn id(&self, _args: Args, reply: &mut u32) -> Result<(), String> {
        *reply = self.id;
        Ok(())
    }

    /// Fails on the server whose id equals `num1`.
    fn fail_on(&self, args: Args, reply: &mut u32) -> Result<(), String> {
        if args.num1 == self.id as i64 {
            return Err(format!("server {} refused", self.id));
        }
        *reply = self.id;
        Ok(())
    }

    /// Sleeps `num1` milliseconds.
    fn sleep(&self, args: Args, reply: &mut u32) -> Result<(), String> {
        std::thread::sleep(Duration::from_millis(args.num1 as u64));
        *reply = self.id;
        Ok(())
    }
}

async fn start_server(id: u32) -> String {
    let server = Arc::new(Server::new());
    let foo = Service::builder("Foo", Foo { id })
        .method("Sum", Foo::sum)
        .method("Id", Foo::id)
        .method("FailOn", Foo::fail_on)
        .method("Sleep", Foo::sleep)
        .build();
    server.register(foo).unwrap();

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = format!("tcp@{}", listener.local_addr().unwrap());
    tokio::spawn(server.accept(listener));
    addr
}

async fn start_servers(n: u32) -> Vec<String> {
    let mut addrs = Vec::new();
    for id in 1..=n {
        addrs.push(start_server(id).await);
    }
    addrs
}

async fn start_registry() -> String {
    let registry = Arc::new(Registry::with_timeout(Duration::from_secs(60)));
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("http://{}{}", listener.local_addr().unwrap(), registry.config().path);
    tokio::spawn(registry.serve(listener));
    url
}

fn args(num1: i64, num2: i64) -> Args {
    Args { num1, num2 }
}

// ============================================================================
// Call
// ============================================================================

#[tokio::test]
async fn test_call_random() {
    let addrs = start_servers(2).await;
    let xc = XClient::new(MultiServersDiscovery::new(addrs), SelectMode::Random, Options::default());

    for i in 0..5i64 {
        let sum: i64 = xc.call("Foo.Sum", &args(i, i * i)).await.unwrap();
        assert_eq!(sum, i + i * i);
    }
    xc.close().await.unwrap();
}

#[tokio::test]
async fn test_call_round_robin_visits_every_server() {
    let addrs = start_servers(3).await;
    let xc = XClient::new(MultiServersDiscovery::new(addrs), SelectMode::RoundRobin, Options::default());

    let mut first_pass = Vec::new();
    for _ in 0..3 {
        let id: u32 = xc.call("Foo.Id", &args(0, 0)).await.unwrap();
        first_pass.push(id);
    }
    let seen: HashSet<u32> = first_pass.iter().copied().collect();
    assert_eq!(seen, HashSet::from([1, 2, 3]));

    // The rotation repeats in the same order.
    for expected in first_pass {
        let id: u32 = xc.call("Foo.Id", &args(0, 0)).await.unwrap();
        assert_eq!(id, expected);
    }
}

#[tokio::test]
async fn test_call_timeout() {
    let addrs = start_servers(1).await;
    let xc = XClient::new(MultiServersDiscovery::new(addrs), SelectMode::Random, Options::default());

    let err = xc
        .call_timeout::<_, u32>(Duration::from_millis(50), "Foo.Sleep", &args(500, 0))
        .await
        .unwrap_err();
    assert!(matches!(err, RpcError::CallTimeout(_)));

    let id: u32 = xc
        .call_timeout(Duration::from_secs(2), "Foo.Sleep", &args(10, 0))
        .await
        .unwrap();
    assert_eq!(id, 1);
}

#[tokio::test]
async fn test_remote_error() {
    let addrs = start_servers(1).await;
    let xc = XClient::new(MultiServersDiscovery::new(addrs), SelectMode::Random, Options::default());

    let err = xc.call::<_, u32>("Foo.FailOn", &args(1, 0)).await.unwrap_err();
    match err {
        RpcError::Remote(msg) => assert_eq!(msg, "server 1 refused"),
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn test_dial_failure() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = format!("tcp@{}", listener.local_addr().unwrap());
    drop(listener);

    let xc = XClient::new(MultiServersDiscovery::new(vec![addr]), SelectMode::Random, Options::default());
    assert!(xc.call::<_, i64>("Foo.Sum", &args(1, 2)).await.is_err());
}

#[tokio::test]
async fn test_close_then_call_redials() {
    let addrs = start_servers(1).await;
    let xc = XClient::new(MultiServersDiscovery::new(addrs), SelectMode::Random, Options::default());

    let sum: i64 = xc.call("Foo.Sum", &args(1, 2)).await.unwrap();
    assert_eq!(sum, 3);

    xc.close().await.unwrap();

    let sum: i64 = xc.call("Foo.Sum", &args(3, 4)).await.unwrap();
    assert_eq!(sum, 7);
}

// ============================================================================
// Broadcast
// ============================================================================

#[tokio::test]
async fn test_broadcast_success() {
    let addrs = start_servers(3).await;
    let xc = XClient::new(MultiServersDiscovery::new(addrs), SelectMode::Random, Options::default());

    let id: u32 = xc.broadcast("Foo.Id", &args(0, 0)).await.unwrap();
    assert!((1..=3).contains(&id));

    let sum: i64 = xc.broadcast("Foo.Sum", &args(2, 3)).await.unwrap();
    assert_eq!(sum, 5);
}

#[tokio::test]
async fn test_broadcast_reports_error() {
    let addrs = start_servers(3).await;
    let xc = XClient::new(MultiServersDiscovery::new(addrs), SelectMode::Random, Options::default());

    let err = xc.broadcast::<_, u32>("Foo.FailOn", &args(2, 0)).await.unwrap_err();
    match err {
        RpcError::Remote(msg) => assert_eq!(msg, "server 2 refused"),
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn test_broadcast_timeout() {
    let addrs = start_servers(2).await;
    let xc = XClient::new(MultiServersDiscovery::new(addrs), SelectMode::Random, Options::default());

    let err = xc
        .broadcast_timeout::<_, u32>(Duration::from_millis(50), "Foo.Sleep", &args(500, 0))
        .await
        .unwrap_err();
    assert!(matches!(err, RpcError::CallTimeout(_)));
}

// ============================================================================
// Registry
// ============================================================================

#[tokio::test]
async fn test_registry_discovery_end_to_end() {
    let registry_url = start_registry().await;
    let addrs = start_servers(2).await;
    let mut beats = Vec::new();
    for addr in &addrs {
        beats.push(heartbeat(&registry_url, addr, None).await.unwrap());
    }

    let discovery = RegistryDiscovery::new(&registry_url, None).unwrap();
    let mut listed = discovery.get_all().await.unwrap();
    listed.sort();
    let mut expected = addrs.clone();
    expected.sort();
    assert_eq!(listed, expected);

    let xc = XClient::new(discovery, SelectMode::RoundRobin, Options::default());
    let mut seen = HashSet::new();
    for _ in 0..2 {
        let id: u32 = xc.call("Foo.Id", &args(0, 0)).await.unwrap();
        seen.insert(id);
    }
    assert_eq!(seen, HashSet::from([1, 2]));

    let sum: i64 = xc.broadcast("Foo.Sum", &args(20, 22)).await.unwrap();
    assert_eq!(sum, 42);

    for beat in beats {
        beat.abort();
    }
}

#[tokio::test]
async fn test_registry_discovery_empty() {
    let registry_url = start_registry().await;
    let discovery = RegistryDiscovery::new(&registry_url, None).unwrap();
    let xc = XClient::new(discovery, SelectMode::Random, Options::default());

    let err = xc.call::<_, i64>("Foo.Sum", &args(1, 2)).await.unwrap_err();
    assert!(matches!(err, RpcError::NoAvailableServer));
}
