//! CLI Integration Tests
//!
//! Runs the `tinyrpc` binary against an in-process registry and server.

use std::process::{Command, Output};
use std::sync::Arc;
use std::time::Duration;

use tinyrpc_cli::demo::foo_service;
use tinyrpc_registry::{heartbeat, Registry};
use tinyrpc_server::Server;
use tokio::net::TcpListener;

// ============================================================================
// Test Helpers
// ============================================================================

async fn run_tinyrpc(args: &[&str]) -> Output {
    let args: Vec<String> = args.iter().map(|s| s.to_string()).collect();
    tokio::task::spawn_blocking(move || {
        Command::new(env!("CARGO_BIN_EXE_tinyrpc"))
            .args(&args)
            .output()
            .expect("failed to run tinyrpc")
    })
    .await
    .unwrap()
}

async fn start_registry() -> String {
    let registry = Arc::new(Registry::with_timeout(Duration::from_secs(60)));
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("http://{}{}", listener.local_addr().unwrap(), registry.config().path);
    tokio::spawn(registry.serve(listener));
    url
}

async fn start_server(registry_url: &str, http: bool) {
    let server = Arc::new(Server::new());
    server.register(foo_service()).unwrap();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    if http {
        heartbeat(registry_url, &format!("http@{}", addr), None).await.unwrap();
        tokio::spawn(server.serve_http(listener));
    } else {
        heartbeat(registry_url, &format!("tcp@{}", addr), None).await.unwrap();
        tokio::spawn(server.accept(listener));
    }
}

// ============================================================================
// Call
// ============================================================================

#[tokio::test(flavor = "multi_thread")]
async fn test_call_prints_json_reply() {
    let registry = start_registry().await;
    start_server(&registry, false).await;
    start_server(&registry, true).await;

    let output = run_tinyrpc(&["call", &registry, "Foo.Sum", "--num1", "3", "--num2", "4", "--mode", "round-robin"]).await;
    assert!(output.status.success(), "stderr: {}", String::from_utf8_lossy(&output.stderr));
    assert_eq!(String::from_utf8_lossy(&output.stdout).trim(), "7");
}

#[tokio::test(flavor = "multi_thread")]
async fn test_call_broadcast_json_codec() {
    let registry = start_registry().await;
    start_server(&registry, false).await;
    start_server(&registry, false).await;

    let output = run_tinyrpc(&["call", &registry, "Foo.Sum", "--num1", "20", "--num2", "22", "--broadcast", "--codec", "json"]).await;
    assert!(output.status.success(), "stderr: {}", String::from_utf8_lossy(&output.stderr));
    assert_eq!(String::from_utf8_lossy(&output.stdout).trim(), "42");
}

#[tokio::test(flavor = "multi_thread")]
async fn test_call_with_handle_timeout() {
    let registry = start_registry().await;
    start_server(&registry, false).await;

    let output = run_tinyrpc(&["call", &registry, "Foo.Sleep", "--num1", "2", "--handle-timeout-ms", "100"]).await;
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("request handle timeout"));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_call_without_servers() {
    let registry = start_registry().await;

    let output = run_tinyrpc(&["call", &registry, "Foo.Sum"]).await;
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("no available server"));
}

// ============================================================================
// Argument validation
// ============================================================================

#[tokio::test]
async fn test_call_rejects_url_without_scheme() {
    let output = run_tinyrpc(&["call", "127.0.0.1:9999", "Foo.Sum"]).await;
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("must start with http://"));
}

#[tokio::test]
async fn test_unknown_subcommand() {
    let output = run_tinyrpc(&["orchestrate"]).await;
    assert!(!output.status.success());
}
