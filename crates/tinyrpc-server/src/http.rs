//! HTTP CONNECT endpoint
//!
//! A `CONNECT` on [`DEFAULT_RPC_PATH`] is answered with
//! `200 Connected to tinyrpc`, after which the connection leaves the HTTP
//! layer and carries the RPC protocol.

use std::convert::Infallible;
use std::sync::Arc;

use http_body_util::Full;
use hyper::body::{Bytes, Incoming};
use hyper::ext::ReasonPhrase;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{header, Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use tinyrpc_common::transport::{CONNECTED, DEFAULT_RPC_PATH};
use tinyrpc_common::{Result, RpcError};
use tokio::net::TcpListener;
use tracing::{debug, info, warn};

use crate::server::Server;

impl Server {
    /// Serves CONNECT tunnels on `listener`.
    pub async fn serve_http(self: Arc<Self>, listener: TcpListener) -> Result<()> {
        info!(
            "rpc server: accepting CONNECT on {}{}",
            listener.local_addr()?,
            DEFAULT_RPC_PATH
        );

        loop {
            let (stream, peer) = listener.accept().await.map_err(|e| {
                warn!("rpc server: accept error: {}", e);
                RpcError::Io(e)
            })?;
            let io = TokioIo::new(stream);
            let server = Arc::clone(&self);

            tokio::task::spawn(async move {
                let service = service_fn(move |req| {
                    let server = Arc::clone(&server);
                    async move { Ok::<_, Infallible>(handle_connect(server, req)) }
                });

                if let Err(err) = http1::Builder::new()
                    .serve_connection(io, service)
                    .with_upgrades()
                    .await
                {
                    debug!("rpc server: http connection from {} ended: {}", peer, err);
                }
            });
        }
    }
}

fn handle_connect(server: Arc<Server>, req: Request<Incoming>) -> Response<Full<Bytes>> {
    if req.uri().path() != DEFAULT_RPC_PATH {
        return plain_response(StatusCode::NOT_FOUND, "404 page not found\n");
    }
    if req.method() != Method::CONNECT {
        return plain_response(StatusCode::METHOD_NOT_ALLOWED, "405 must CONNECT\n");
    }

    tokio::task::spawn(async move {
        match hyper::upgrade::on(req).await {
            Ok(upgraded) => server.serve_conn(TokioIo::new(upgraded)).await,
            Err(e) => warn!("rpc server: CONNECT upgrade failed: {}", e),
        }
    });

    let mut response = Response::new(Full::new(Bytes::new()));
    response
        .extensions_mut()
        .insert(ReasonPhrase::from_static(CONNECTED.as_bytes()));
    response
}

fn plain_response(status: StatusCode, body: &'static str) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::from_static(body.as_bytes())));
    *response.status_mut() = status;
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        header::HeaderValue::from_static("text/plain; charset=utf-8"),
    );
    response
}
