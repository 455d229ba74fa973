//! # tinyrpc CLI Entry Point
//!
//! ## Usage
//!
//! ```bash
//! # Start a registry
//! tinyrpc registry -b 127.0.0.1:9999
//!
//! # Start two servers that heartbeat into it
//! tinyrpc server -b 127.0.0.1:9001 --registry http://127.0.0.1:9999/_tinyrpc_/registry
//! tinyrpc server -b 127.0.0.1:9002 --registry http://127.0.0.1:9999/_tinyrpc_/registry --http
//!
//! # Call through discovery (prints the reply as JSON)
//! tinyrpc call http://127.0.0.1:9999/_tinyrpc_/registry Foo.Sum --num1 1 --num2 2 --mode round-robin
//! tinyrpc call http://127.0.0.1:9999/_tinyrpc_/registry Foo.Sleep --num1 1 --broadcast --timeout-ms 2000
//! ```

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use argh::FromArgs;
use tinyrpc_cli::demo::{foo_service, Args};
use tinyrpc_common::{CodecType, Options};
use tinyrpc_registry::{heartbeat, Registry, RegistryConfig, DEFAULT_TIMEOUT};
use tinyrpc_server::Server;
use tinyrpc_xclient::{RegistryDiscovery, SelectMode, XClient};
use tokio::net::TcpListener;

/// Validates that a registry URL starts with http://
fn validate_registry_url(url: &str) -> Result<()> {
    if url.starts_with("http://") {
        Ok(())
    } else {
        Err(anyhow::anyhow!("Invalid registry URL: '{}' must start with http://", url))
    }
}

fn parse_codec(value: &str) -> std::result::Result<CodecType, String> {
    match value {
        "json" => Ok(CodecType::Json),
        "postcard" => Ok(CodecType::Postcard),
        other => other.parse().map_err(|e: tinyrpc_common::RpcError| e.to_string()),
    }
}

#[derive(FromArgs)]
/// tinyrpc - a small RPC framework with discovery and load balancing
struct Cli {
    #[argh(subcommand)]
    command: Commands,
}

#[derive(FromArgs)]
#[argh(subcommand)]
enum Commands {
    Registry(RegistryArgs),
    Server(ServerArgs),
    Call(CallArgs),
}

#[derive(FromArgs)]
#[argh(subcommand, name = "registry")]
/// start a registry
struct RegistryArgs {
    /// address to bind the registry's HTTP server to
    #[argh(option, short = 'b', default = "\"127.0.0.1:9999\".into()")]
    bind: String,

    /// seconds a server stays listed after its last heartbeat (0 disables expiry)
    #[argh(option, long = "timeout-secs", default = "DEFAULT_TIMEOUT.as_secs()")]
    timeout_secs: u64,
}

#[derive(FromArgs)]
#[argh(subcommand, name = "server")]
/// start an RPC server exposing the Foo service
struct ServerArgs {
    /// address to bind the server to
    ///
    /// Defaults to "127.0.0.1:0" which assigns a random available port.
    /// The actual bound address is logged at startup.
    #[argh(option, short = 'b', default = "\"127.0.0.1:0\".into()")]
    bind: String,

    /// registry URL to heartbeat into, path included
    #[argh(option, long = "registry")]
    registry: Option<String>,

    /// serve behind the HTTP CONNECT tunnel instead of raw TCP
    #[argh(switch)]
    http: bool,
}

#[derive(FromArgs)]
#[argh(subcommand, name = "call")]
/// call a method on a server found through a registry
struct CallArgs {
    /// registry URL, path included
    #[argh(positional)]
    registry: String,

    /// method to call, as Service.Method
    #[argh(positional)]
    service_method: String,

    /// first argument
    #[argh(option, default = "0")]
    num1: i64,

    /// second argument
    #[argh(option, default = "0")]
    num2: i64,

    /// server selection: random or round-robin
    #[argh(option, default = "SelectMode::Random")]
    mode: SelectMode,

    /// call every server and report the first reply or error
    #[argh(switch)]
    broadcast: bool,

    /// client-side deadline in milliseconds (0 waits forever)
    #[argh(option, long = "timeout-ms", default = "0")]
    timeout_ms: u64,

    /// server-side handling budget in milliseconds (0 is unbounded)
    #[argh(option, long = "handle-timeout-ms", default = "0")]
    handle_timeout_ms: u64,

    /// wire codec: json or postcard
    #[argh(option, default = "CodecType::Postcard", from_str_fn(parse_codec))]
    codec: CodecType,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli: Cli = argh::from_env();

    // call keeps stdout clean for piping
    if !matches!(cli.command, Commands::Call(_)) {
        let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
        tracing_subscriber::fmt().with_env_filter(env_filter).init();
    }

    match cli.command {
        Commands::Registry(args) => run_registry(args).await,
        Commands::Server(args) => run_server(args).await,
        Commands::Call(args) => run_call(args).await,
    }
}

async fn run_registry(args: RegistryArgs) -> Result<()> {
    let config = RegistryConfig {
        timeout: Duration::from_secs(args.timeout_secs),
        ..RegistryConfig::default()
    };
    let listener = TcpListener::bind(&args.bind)
        .await
        .with_context(|| format!("binding registry to {}", args.bind))?;
    let addr = listener.local_addr()?;

    tracing::info!("Registry listening on http://{}{}", addr, config.path);
    if config.timeout.is_zero() {
        tracing::info!("Server expiry disabled");
    } else {
        tracing::info!("Servers expire {:?} after their last heartbeat", config.timeout);
    }

    Arc::new(Registry::new(config)).serve(listener).await?;
    Ok(())
}

async fn run_server(args: ServerArgs) -> Result<()> {
    if let Some(registry) = &args.registry {
        validate_registry_url(registry)?;
    }

    let server = Arc::new(Server::new());
    server.register(foo_service())?;

    let listener = TcpListener::bind(&args.bind)
        .await
        .with_context(|| format!("binding server to {}", args.bind))?;
    let addr: SocketAddr = listener.local_addr()?;
    let rpc_addr = if args.http {
        format!("http@{}", addr)
    } else {
        format!("tcp@{}", addr)
    };
    tracing::info!("Server listening as {}", rpc_addr);

    let _heartbeat = match &args.registry {
        Some(registry) => {
            let handle = heartbeat(registry, &rpc_addr, None).await?;
            tracing::info!("Registered {} with {}", rpc_addr, registry);
            Some(handle)
        }
        None => None,
    };

    if args.http {
        server.serve_http(listener).await?;
    } else {
        server.accept(listener).await?;
    }
    Ok(())
}

/// Makes one call (or broadcast) through registry discovery and prints the
/// reply as JSON on stdout.
async fn run_call(args: CallArgs) -> Result<()> {
    validate_registry_url(&args.registry)?;

    let mut opt = Options::new(args.codec);
    if args.handle_timeout_ms > 0 {
        opt = opt.with_handle_timeout(Duration::from_millis(args.handle_timeout_ms));
    }

    let discovery = RegistryDiscovery::new(&args.registry, None)?;
    let xc = XClient::new(discovery, args.mode, opt);
    let call_args = Args {
        num1: args.num1,
        num2: args.num2,
    };
    let timeout = (args.timeout_ms > 0).then(|| Duration::from_millis(args.timeout_ms));

    let reply: Result<i64, _> = match (args.broadcast, timeout) {
        (false, None) => xc.call(&args.service_method, &call_args).await,
        (false, Some(t)) => xc.call_timeout(t, &args.service_method, &call_args).await,
        (true, None) => xc.broadcast(&args.service_method, &call_args).await,
        (true, Some(t)) => xc.broadcast_timeout(t, &args.service_method, &call_args).await,
    };
    let _ = xc.close().await;

    println!("{}", serde_json::to_string(&reply?)?);
    Ok(())
}
