use std::future::Future;

use tinyrpc_common::{Options, Result, RpcError};
use tokio::net::TcpStream;
use tracing::debug;

use crate::client::Client;
use crate::http::new_http_client;

/// Connects over TCP and performs the handshake.
///
/// The connect timeout in `opt` bounds both steps together.
pub async fn dial(addr: &str, opt: Options) -> Result<Client> {
    let opt = opt.normalized();
    with_connect_timeout(&opt, async {
        let stream = connect_tcp(addr).await?;
        Client::new(stream, opt.clone()).await
    })
    .await
}

/// Connects over TCP, opens a CONNECT tunnel, then performs the handshake.
pub async fn dial_http(addr: &str, opt: Options) -> Result<Client> {
    let opt = opt.normalized();
    with_connect_timeout(&opt, async {
        let stream = connect_tcp(addr).await?;
        new_http_client(stream, opt.clone()).await
    })
    .await
}

/// Connects to a Unix-domain socket and performs the handshake.
#[cfg(unix)]
pub async fn dial_unix(path: &str, opt: Options) -> Result<Client> {
    let opt = opt.normalized();
    with_connect_timeout(&opt, async {
        let stream = tokio::net::UnixStream::connect(path)
            .await
            .map_err(|e| RpcError::Connection(format!("Failed to connect to {}: {}", path, e)))?;
        Client::new(stream, opt.clone()).await
    })
    .await
}

/// Dials an address of the form `protocol@address`.
///
/// - `http@host:port` goes through a CONNECT tunnel
/// - `tcp@host:port` dials directly
/// - `unix@/path/to/socket` dials a Unix-domain socket
pub async fn xdial(rpc_addr: &str, opt: Options) -> Result<Client> {
    let (protocol, addr) = parse_rpc_addr(rpc_addr)?;
    debug!("rpc client: dialing {} over {}", addr, protocol);
    match protocol {
        "http" => dial_http(addr, opt).await,
        "tcp" | "tcp4" | "tcp6" => dial(addr, opt).await,
        #[cfg(unix)]
        "unix" => dial_unix(addr, opt).await,
        other => Err(RpcError::UnsupportedProtocol(other.to_string())),
    }
}

/// Splits `protocol@address`.
pub fn parse_rpc_addr(rpc_addr: &str) -> Result<(&str, &str)> {
    match rpc_addr.split_once('@') {
        Some((protocol, addr)) if !protocol.is_empty() && !addr.is_empty() => Ok((protocol, addr)),
        _ => Err(RpcError::InvalidAddress(rpc_addr.to_string())),
    }
}

async fn connect_tcp(addr: &str) -> Result<TcpStream> {
    let stream = TcpStream::connect(addr)
        .await
        .map_err(|e| RpcError::Connection(format!("Failed to connect to {}: {}", addr, e)))?;
    stream.set_nodelay(true)?;
    Ok(stream)
}

async fn with_connect_timeout<F>(opt: &Options, connect: F) -> Result<Client>
where
    F: Future<Output = Result<Client>>,
{
    match opt.connect_timeout() {
        Some(timeout) => tokio::time::timeout(timeout, connect)
            .await
            .map_err(|_| RpcError::ConnectTimeout(timeout))?,
        None => connect.await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::net::TcpListener;

    #[test]
    fn test_parse_rpc_addr() {
        assert_eq!(parse_rpc_addr("tcp@127.0.0.1:9999").unwrap(), ("tcp", "127.0.0.1:9999"));
        assert_eq!(parse_rpc_addr("unix@/tmp/a@b.sock").unwrap(), ("unix", "/tmp/a@b.sock"));
        assert!(matches!(parse_rpc_addr("127.0.0.1:9999"), Err(RpcError::InvalidAddress(_))));
        assert!(matches!(parse_rpc_addr("@127.0.0.1:9999"), Err(RpcError::InvalidAddress(_))));
        assert!(matches!(parse_rpc_addr("tcp@"), Err(RpcError::InvalidAddress(_))));
    }

    #[tokio::test]
    async fn test_xdial_unsupported_protocol() {
        let err = xdial("quic@127.0.0.1:1", Options::default()).await.unwrap_err();
        assert!(matches!(err, RpcError::UnsupportedProtocol(p) if p == "quic"));
    }

    #[tokio::test]
    async fn test_dial_refused() {
        // bind then drop to find a port nobody listens on
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        drop(listener);

        let err = dial(&addr, Options::default()).await.unwrap_err();
        assert!(matches!(err, RpcError::Connection(_)));
    }

    #[tokio::test]
    async fn test_dial_http_connect_timeout() {
        // accepts but never answers the CONNECT
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let holder = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(5)).await;
            drop(stream);
        });

        let opt = Options::default().with_connect_timeout(Duration::from_millis(100));
        let err = dial_http(&addr, opt).await.unwrap_err();
        assert!(err.to_string().contains("connect timeout"));
        match err {
            RpcError::ConnectTimeout(d) => assert_eq!(d, Duration::from_millis(100)),
            other => panic!("Expected ConnectTimeout, got {:?}", other),
        }
        holder.abort();
    }
}
