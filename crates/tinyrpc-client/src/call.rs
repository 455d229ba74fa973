use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use serde::de::DeserializeOwned;
use tinyrpc_common::transport::Codec;
use tinyrpc_common::{Result, RpcError};
use tokio::sync::oneshot;

/// An outstanding call. Resolves exactly once to the reply or an error.
///
/// Dropping a `Call` abandons the reply; a late response is discarded by the
/// receive loop.
#[derive(Debug)]
pub struct Call<R> {
    seq: u64,
    service_method: String,
    done: oneshot::Receiver<Result<R>>,
}

impl<R> Call<R> {
    pub(crate) fn new(seq: u64, service_method: &str, done: oneshot::Receiver<Result<R>>) -> Self {
        Self {
            seq,
            service_method: service_method.to_string(),
            done,
        }
    }

    /// Sequence number on the wire; 0 if the call was never sent.
    pub fn seq(&self) -> u64 {
        self.seq
    }

    pub fn service_method(&self) -> &str {
        &self.service_method
    }
}

impl<R> Future for Call<R> {
    type Output = Result<R>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        // a dropped sender means the client went away with the call pending
        Pin::new(&mut self.done)
            .poll(cx)
            .map(|done| done.unwrap_or_else(|_| Err(RpcError::Shutdown)))
    }
}

/// Type-erased completion side of a [`Call`], kept in the pending table.
pub(crate) trait PendingReply: Send {
    /// Decodes `body` into the reply and completes the call.
    fn complete(self: Box<Self>, codec: Codec, body: &[u8]);

    fn fail(self: Box<Self>, error: RpcError);
}

pub(crate) struct ReplySlot<R> {
    tx: oneshot::Sender<Result<R>>,
}

impl<R> ReplySlot<R> {
    pub(crate) fn new(tx: oneshot::Sender<Result<R>>) -> Self {
        Self { tx }
    }
}

impl<R: DeserializeOwned + Send + 'static> PendingReply for ReplySlot<R> {
    fn complete(self: Box<Self>, codec: Codec, body: &[u8]) {
        let reply = codec
            .decode(body)
            .map_err(|e| RpcError::InvalidResponse(format!("reading body: {}", e)));
        let _ = self.tx.send(reply);
    }

    fn fail(self: Box<Self>, error: RpcError) {
        let _ = self.tx.send(Err(error));
    }
}
