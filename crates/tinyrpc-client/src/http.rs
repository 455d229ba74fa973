//! Client side of the HTTP CONNECT tunnel.
//!
//! The CONNECT exchange runs through hyper's HTTP/1 client connection. Once
//! the server answers `200 Connected to tinyrpc`, hyper hands back the
//! upgraded stream and the RPC handshake continues on it.

use http_body_util::Empty;
use hyper::body::Bytes;
use hyper::client::conn::http1;
use hyper::ext::ReasonPhrase;
use hyper::{Method, Request, StatusCode, Version};
use hyper_util::rt::TokioIo;
use tinyrpc_common::transport::{CONNECTED, DEFAULT_RPC_PATH};
use tinyrpc_common::{Options, Result, RpcError};
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::debug;

use crate::client::Client;

/// Opens a CONNECT tunnel on `stream`, then runs the normal handshake through it.
pub async fn new_http_client<S>(stream: S, opt: Options) -> Result<Client>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (mut sender, conn) = http1::handshake::<_, Empty<Bytes>>(TokioIo::new(stream))
        .await
        .map_err(|e| RpcError::Connection(format!("http handshake: {}", e)))?;
    tokio::spawn(async move {
        if let Err(e) = conn.with_upgrades().await {
            debug!("rpc client: CONNECT connection ended: {}", e);
        }
    });

    let request = Request::builder()
        .method(Method::CONNECT)
        .uri(DEFAULT_RPC_PATH)
        .version(Version::HTTP_10)
        .body(Empty::new())
        .map_err(|e| RpcError::Connection(format!("building CONNECT request: {}", e)))?;
    let response = sender
        .send_request(request)
        .await
        .map_err(|e| RpcError::UnexpectedHttpResponse(format!("reading response: {}", e)))?;

    let status = response.status();
    let reason = match response.extensions().get::<ReasonPhrase>() {
        Some(reason) => String::from_utf8_lossy(reason.as_bytes()).into_owned(),
        None => status.canonical_reason().unwrap_or_default().to_string(),
    };
    if status != StatusCode::OK || reason != CONNECTED {
        return Err(RpcError::UnexpectedHttpResponse(format!("{} {}", status.as_u16(), reason)));
    }

    let upgraded = hyper::upgrade::on(response)
        .await
        .map_err(|e| RpcError::Connection(format!("CONNECT upgrade: {}", e)))?;
    Client::new(TokioIo::new(upgraded), opt).await
}
