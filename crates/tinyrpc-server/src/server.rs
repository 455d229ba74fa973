use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tinyrpc_common::transport::{read_options, Codec, CodecReader, CodecWriter};
use tinyrpc_common::{Header, Result, RpcError};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio::sync::Mutex;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::service::{is_exported, Argv, MethodType, Service};

/// Serializes response writes on one connection.
type Sending<W> = Arc<Mutex<CodecWriter<W>>>;

/// A request that resolved to a method and decoded cleanly.
struct Request {
    header: Header,
    argv: Argv,
    service: Arc<Service>,
    mtype: Arc<MethodType>,
}

enum ReadError {
    /// The stream is unusable; stop reading.
    Fatal(RpcError),
    /// Only this request is bad; answer it and keep going.
    Request(Header, RpcError),
}

/// RPC server: a registry of services plus the per-connection dispatch loop.
///
/// Each connection is read sequentially, but every request runs in its own
/// task, so responses may leave in a different order than requests arrived.
///
/// # Example
///
/// ```no_run
/// use std::sync::Arc;
/// use tinyrpc_server::{Server, Service};
///
/// struct Foo;
///
/// impl Foo {
///     fn sum(&self, args: (i64, i64), reply: &mut i64) -> Result<(), String> {
///         *reply = args.0 + args.1;
///         Ok(())
///     }
/// }
///
/// # async fn run() -> tinyrpc_common::Result<()> {
/// let server = Arc::new(Server::new());
/// server.register(Service::builder("Foo", Foo).method("Sum", Foo::sum).build())?;
///
/// let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
/// server.accept(listener).await
/// # }
/// ```
#[derive(Default)]
pub struct Server {
    service_map: RwLock<HashMap<String, Arc<Service>>>,
}

impl Server {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publishes a service. Names must be exported and unique.
    pub fn register(&self, service: Service) -> Result<()> {
        let name = service.name().to_string();
        if !is_exported(&name) {
            return Err(RpcError::InvalidServiceName(name));
        }

        let mut services = self.service_map.write();
        if services.contains_key(&name) {
            return Err(RpcError::DuplicateService(name));
        }
        info!("rpc server: registered service {} ({} methods)", name, service.method_names().len());
        services.insert(name, Arc::new(service));
        Ok(())
    }

    /// Resolves `"Service.Method"`.
    pub fn find_service(&self, service_method: &str) -> Result<(Arc<Service>, Arc<MethodType>)> {
        let mut parts = service_method.split('.');
        let (service_name, method_name) = match (parts.next(), parts.next(), parts.next()) {
            (Some(s), Some(m), None) if !s.is_empty() && !m.is_empty() => (s, m),
            _ => return Err(RpcError::IllFormedServiceMethod(service_method.to_string())),
        };

        let service = self
            .service_map
            .read()
            .get(service_name)
            .cloned()
            .ok_or_else(|| RpcError::ServiceNotFound(service_name.to_string()))?;
        let mtype = service
            .method(method_name)
            .ok_or_else(|| RpcError::MethodNotFound(method_name.to_string()))?;
        Ok((service, mtype))
    }

    /// Serves every connection accepted on `listener`.
    ///
    /// Returns only when accepting fails.
    pub async fn accept(self: Arc<Self>, listener: TcpListener) -> Result<()> {
        info!("rpc server: listening on {}", listener.local_addr()?);
        loop {
            let (stream, peer) = listener.accept().await.map_err(|e| {
                warn!("rpc server: accept error: {}", e);
                RpcError::Io(e)
            })?;
            debug!("rpc server: connection from {}", peer);
            let server = Arc::clone(&self);
            tokio::spawn(server.serve_conn(stream));
        }
    }

    /// Unix-socket variant of [`accept`](Self::accept).
    #[cfg(unix)]
    pub async fn accept_unix(self: Arc<Self>, listener: tokio::net::UnixListener) -> Result<()> {
        loop {
            let (stream, _) = listener.accept().await.map_err(|e| {
                warn!("rpc server: accept error: {}", e);
                RpcError::Io(e)
            })?;
            let server = Arc::clone(&self);
            tokio::spawn(server.serve_conn(stream));
        }
    }

    /// Runs the handshake on `stream`, then serves requests until it closes.
    pub async fn serve_conn<S>(self: Arc<Self>, mut stream: S)
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let opt = match read_options(&mut stream).await {
            Ok(opt) => opt,
            Err(e) => {
                warn!("rpc server: options error: {}", e);
                return;
            }
        };
        let codec = match opt.validate() {
            Ok(codec_type) => Codec::from(codec_type),
            Err(e) => {
                warn!("rpc server: rejecting connection: {}", e);
                return;
            }
        };

        let (read_half, write_half) = tokio::io::split(stream);
        self.serve_codec(
            CodecReader::new(read_half, codec),
            CodecWriter::new(write_half, codec),
            opt.handle_timeout(),
        )
        .await;
    }

    async fn serve_codec<R, W>(
        &self,
        mut reader: CodecReader<R>,
        writer: CodecWriter<W>,
        handle_timeout: Option<Duration>,
    ) where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let sending: Sending<W> = Arc::new(Mutex::new(writer));
        let mut in_flight = JoinSet::new();

        loop {
            match self.read_request(&mut reader).await {
                Ok(req) => {
                    in_flight.spawn(handle_request(req, reader.codec(), Arc::clone(&sending), handle_timeout));
                }
                Err(ReadError::Request(header, e)) => {
                    debug!("rpc server: bad request {}: {}", header.service_method, e);
                    let body = reader.codec().encode(&());
                    send_response(&sending, header.with_error(e.to_string()), body).await;
                }
                Err(ReadError::Fatal(RpcError::ConnectionClosed)) => break,
                Err(ReadError::Fatal(e)) => {
                    warn!("rpc server: read error: {}", e);
                    break;
                }
            }
            while in_flight.try_join_next().is_some() {}
        }

        // no response may be written after the codec is closed
        while in_flight.join_next().await.is_some() {}
        let _ = sending.lock().await.close().await;
    }

    async fn read_request<R: AsyncRead + Unpin>(
        &self,
        reader: &mut CodecReader<R>,
    ) -> std::result::Result<Request, ReadError> {
        let header = reader.read_header().await.map_err(ReadError::Fatal)?;
        // the body is consumed before resolving so the stream stays in step
        let body = reader.read_body_bytes().await.map_err(ReadError::Fatal)?;

        let (service, mtype) = match self.find_service(&header.service_method) {
            Ok(found) => found,
            Err(e) => return Err(ReadError::Request(header, e)),
        };
        let argv = match mtype.new_argv(reader.codec(), &body) {
            Ok(argv) => argv,
            Err(e) => {
                let e = RpcError::InvalidRequest(format!("read body err: {}", e));
                return Err(ReadError::Request(header, e));
            }
        };

        Ok(Request {
            header,
            argv,
            service,
            mtype,
        })
    }
}

/// Runs one request and writes exactly one response for it.
///
/// The method runs on the blocking pool. With a budget set, the first of
/// "method finished" and "budget elapsed" decides the response; a result that
/// arrives after the timeout response is dropped with its join handle.
/// The send lock is only taken to write the response, so a client that stops
/// reading delays replies but never the invocation or its budget.
async fn handle_request<W>(req: Request, codec: Codec, sending: Sending<W>, handle_timeout: Option<Duration>)
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    let Request {
        header,
        argv,
        service,
        mtype,
    } = req;

    let method = Arc::clone(&mtype);
    let invocation = tokio::task::spawn_blocking(move || {
        let mut replyv = method.new_replyv();
        let result = service.call(&method, argv, &mut replyv);
        (result, replyv)
    });

    let joined = match handle_timeout {
        Some(budget) => match tokio::time::timeout(budget, invocation).await {
            Ok(joined) => joined,
            Err(_) => {
                warn!("rpc server: {} exceeded {:?}", header.service_method, budget);
                let error = RpcError::handle_timeout_message(budget);
                send_response(&sending, header.with_error(error), codec.encode(&())).await;
                return;
            }
        },
        None => invocation.await,
    };

    match joined {
        Ok((Ok(()), replyv)) => {
            let body = mtype.encode_replyv(codec, &replyv);
            send_response(&sending, header, body).await;
        }
        Ok((Err(error), _)) => {
            send_response(&sending, header.with_error(error), codec.encode(&())).await;
        }
        Err(join_error) => {
            let error = format!("rpc server: {} panicked: {}", header.service_method, join_error);
            send_response(&sending, header.with_error(error), codec.encode(&())).await;
        }
    }
}

async fn send_response<W>(sending: &Sending<W>, header: Header, body: Result<Vec<u8>>)
where
    W: AsyncWrite + Unpin,
{
    let mut writer = sending.lock().await;
    if let Err(e) = writer.write_encoded(&header, body).await {
        warn!("rpc server: write response error: {}", e);
    }
}
