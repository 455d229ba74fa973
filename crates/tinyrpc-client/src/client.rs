use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tinyrpc_common::transport::{write_options, Codec, CodecReader, CodecWriter};
use tinyrpc_common::{Header, Options, Result, RpcError};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tracing::debug;

use crate::call::{Call, PendingReply, ReplySlot};

type BoxedRead = Box<dyn AsyncRead + Send + Unpin>;
type BoxedWrite = Box<dyn AsyncWrite + Send + Unpin>;

struct PendingCall {
    service_method: String,
    reply: Box<dyn PendingReply>,
}

struct State {
    seq: u64,
    pending: HashMap<u64, PendingCall>,
    /// Closed by the user.
    closing: bool,
    /// Stopped by an error.
    shutdown: bool,
}

struct Shared {
    codec: Codec,
    /// The send lock. Held for exactly one header/body pair.
    sending: tokio::sync::Mutex<CodecWriter<BoxedWrite>>,
    state: Mutex<State>,
    /// Flips to true once the client is closed or its connection failed.
    stop: watch::Sender<bool>,
}

impl Shared {
    /// Assigns the next sequence number and records the call.
    ///
    /// Hands the reply back when the client no longer accepts calls.
    fn register_call(
        &self,
        service_method: &str,
        reply: Box<dyn PendingReply>,
    ) -> std::result::Result<u64, Box<dyn PendingReply>> {
        let mut state = self.state.lock();
        if state.closing || state.shutdown {
            return Err(reply);
        }
        let seq = state.seq;
        state.pending.insert(
            seq,
            PendingCall {
                service_method: service_method.to_string(),
                reply,
            },
        );
        state.seq += 1;
        Ok(seq)
    }

    fn remove_call(&self, seq: u64) -> Option<PendingCall> {
        self.state.lock().pending.remove(&seq)
    }

    /// Writes one request. Gives up, releasing the send lock, once the
    /// client stops, even if the peer has stopped reading.
    async fn send(&self, header: Header, body: Result<Vec<u8>>) {
        let stop = self.stop.subscribe();
        let result = tokio::select! {
            biased;
            _ = stopped(stop) => Err(RpcError::Shutdown),
            result = async {
                let mut writer = self.sending.lock().await;
                writer.write_encoded(&header, body).await
            } => result,
        };
        if let Err(e) = result {
            // the receive loop may already have claimed it
            if let Some(call) = self.remove_call(header.seq) {
                call.reply.fail(e);
            }
        }
    }

    /// Fails every pending call with `error` and refuses new ones.
    fn terminate_calls(&self, error: RpcError) {
        self.stop.send_replace(true);
        let pending = {
            let mut state = self.state.lock();
            state.shutdown = true;
            std::mem::take(&mut state.pending)
        };
        for (seq, call) in pending {
            debug!("rpc client: failing call {} ({}): {}", seq, call.service_method, error);
            call.reply.fail(error.for_pending_call());
        }
    }
}

/// Removes a pending entry when a waiting caller goes away.
struct PendingGuard<'a> {
    shared: &'a Shared,
    seq: u64,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.shared.remove_call(self.seq);
    }
}

/// One connection to a tinyrpc server, shared by any number of concurrent calls.
///
/// Calls are matched to responses by sequence number, so replies may arrive
/// in any order. A background task reads responses for the lifetime of the
/// connection; when it stops, every pending call fails with its error.
///
/// # Example
///
/// ```no_run
/// use tinyrpc_client::dial;
/// use tinyrpc_common::Options;
///
/// # async fn run() -> tinyrpc_common::Result<()> {
/// let client = dial("127.0.0.1:9999", Options::default()).await?;
/// let sum: i64 = client.call("Foo.Sum", &(3i64, 4i64)).await?;
/// assert_eq!(sum, 7);
/// client.close().await
/// # }
/// ```
pub struct Client {
    shared: Arc<Shared>,
    receiver: JoinHandle<()>,
}

impl Client {
    /// Performs the handshake on `stream` and starts the receive loop.
    pub async fn new<S>(mut stream: S, opt: Options) -> Result<Self>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let opt = opt.normalized();
        let codec = Codec::from(opt.validate()?);
        write_options(&mut stream, &opt).await?;

        let (read_half, write_half) = tokio::io::split(stream);
        let read_half: BoxedRead = Box::new(read_half);
        let write_half: BoxedWrite = Box::new(write_half);

        let shared = Arc::new(Shared {
            codec,
            sending: tokio::sync::Mutex::new(CodecWriter::new(write_half, codec)),
            state: Mutex::new(State {
                seq: 1,
                pending: HashMap::new(),
                closing: false,
                shutdown: false,
            }),
            stop: watch::Sender::new(false),
        });
        let receiver = tokio::spawn(receive(Arc::clone(&shared), CodecReader::new(read_half, codec)));

        Ok(Self { shared, receiver })
    }

    pub fn codec(&self) -> Codec {
        self.shared.codec
    }

    /// Starts a call and returns without waiting for the reply.
    ///
    /// The request is written by a background task under the send lock. If
    /// the client is closed the returned call fails with
    /// [`RpcError::Shutdown`].
    pub fn go<A, R>(&self, service_method: &str, args: &A) -> Call<R>
    where
        A: Serialize + ?Sized,
        R: DeserializeOwned + Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let reply: Box<dyn PendingReply> = Box::new(ReplySlot::new(tx));

        let seq = match self.shared.register_call(service_method, reply) {
            Ok(seq) => seq,
            Err(reply) => {
                reply.fail(RpcError::Shutdown);
                return Call::new(0, service_method, rx);
            }
        };

        let header = Header::new(service_method, seq);
        let body = self.shared.codec.encode(args);
        let shared = Arc::clone(&self.shared);
        tokio::spawn(async move { shared.send(header, body).await });

        Call::new(seq, service_method, rx)
    }

    /// Calls `service_method` and waits for the reply.
    ///
    /// Dropping the returned future forgets the call locally; the server is not
    /// told and finishes the work anyway.
    pub async fn call<A, R>(&self, service_method: &str, args: &A) -> Result<R>
    where
        A: Serialize + ?Sized,
        R: DeserializeOwned + Send + 'static,
    {
        let call = self.go(service_method, args);
        let _guard = PendingGuard {
            shared: &self.shared,
            seq: call.seq(),
        };
        call.await
    }

    /// [`call`](Self::call) with a deadline.
    pub async fn call_timeout<A, R>(&self, timeout: Duration, service_method: &str, args: &A) -> Result<R>
    where
        A: Serialize + ?Sized,
        R: DeserializeOwned + Send + 'static,
    {
        tokio::time::timeout(timeout, self.call(service_method, args))
            .await
            .map_err(|_| RpcError::CallTimeout(timeout))?
    }

    /// Closes the connection. A second close returns [`RpcError::Shutdown`].
    pub async fn close(&self) -> Result<()> {
        {
            let mut state = self.shared.state.lock();
            if state.closing {
                return Err(RpcError::Shutdown);
            }
            state.closing = true;
        }
        // aborts a send stuck on a peer that stopped reading
        self.shared.stop.send_replace(true);
        self.shared.sending.lock().await.close().await
    }

    /// True while the client is neither closed nor shut down.
    pub fn is_available(&self) -> bool {
        let state = self.shared.state.lock();
        !state.closing && !state.shutdown
    }

    #[cfg(test)]
    fn pending_calls(&self) -> usize {
        self.shared.state.lock().pending.len()
    }
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("codec", &self.shared.codec.codec_type())
            .field("available", &self.is_available())
            .finish_non_exhaustive()
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        self.receiver.abort();
    }
}

async fn receive(shared: Arc<Shared>, mut reader: CodecReader<BoxedRead>) {
    let codec = reader.codec();
    let error = loop {
        let header = tokio::select! {
            header = reader.read_header() => header,
            _ = stopped(shared.stop.subscribe()) => Err(RpcError::Shutdown),
        };
        let header = match header {
            Ok(header) => header,
            Err(e) => break e,
        };

        let outcome = match shared.remove_call(header.seq) {
            // never sent in full, or abandoned by its caller
            None => reader.discard_body().await,
            Some(call) if header.is_error() => {
                let drained = reader.discard_body().await;
                call.reply.fail(RpcError::Remote(header.error));
                drained
            }
            Some(call) => match reader.read_body_bytes().await {
                Ok(body) => {
                    call.reply.complete(codec, &body);
                    Ok(())
                }
                Err(e) => {
                    call.reply.fail(RpcError::InvalidResponse(format!("reading body: {}", e)));
                    Err(e)
                }
            },
        };
        if let Err(e) = outcome {
            break e;
        }
    };

    debug!("rpc client: receive loop stopped: {}", error);
    shared.terminate_calls(error);
}

/// Resolves once the stop flag is raised.
async fn stopped(mut stop: watch::Receiver<bool>) {
    let _ = stop.wait_for(|stopped| *stopped).await;
}
