use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufWriter};

use crate::protocol::error::{Result, RpcError};
use crate::protocol::{Header, Options};
use crate::transport::codec::Codec;

/// Frames larger than this are refused before any allocation.
pub const MAX_MESSAGE_SIZE: usize = 100 * 1024 * 1024; // 100 MB

/// Writes one frame: `[4-byte length as u32 big-endian] + [data]`.
///
/// Does not flush; callers flush once per logical message.
pub async fn send_message<W: AsyncWrite + Unpin>(stream: &mut W, data: &[u8]) -> Result<()> {
    if data.len() > MAX_MESSAGE_SIZE {
        return Err(RpcError::MessageTooLarge(data.len(), MAX_MESSAGE_SIZE));
    }
    let len = data.len() as u32;

    stream
        .write_all(&len.to_be_bytes())
        .await
        .map_err(|e| map_io_error(e, "writing length prefix"))?;
    stream
        .write_all(data)
        .await
        .map_err(|e| map_io_error(e, "writing data"))?;

    Ok(())
}

/// Reads one frame.
///
/// A stream that ends cleanly before the length prefix yields
/// [`RpcError::ConnectionClosed`]; a stream cut mid-frame is a connection error.
pub async fn receive_message<R: AsyncRead + Unpin>(stream: &mut R) -> Result<Vec<u8>> {
    let mut len_buf = [0u8; 4];
    if let Err(e) = stream.read_exact(&mut len_buf).await {
        if e.kind() == std::io::ErrorKind::UnexpectedEof {
            return Err(RpcError::ConnectionClosed);
        }
        return Err(map_io_error(e, "reading length prefix"));
    }

    let len = u32::from_be_bytes(len_buf) as usize;
    if len > MAX_MESSAGE_SIZE {
        return Err(RpcError::MessageTooLarge(len, MAX_MESSAGE_SIZE));
    }

    let mut buf = vec![0u8; len];
    stream
        .read_exact(&mut buf)
        .await
        .map_err(|e| map_io_error(e, "reading data"))?;

    Ok(buf)
}

fn map_io_error(e: std::io::Error, context: &str) -> RpcError {
    use std::io::ErrorKind;
    match e.kind() {
        ErrorKind::ConnectionReset
        | ErrorKind::ConnectionAborted
        | ErrorKind::BrokenPipe
        | ErrorKind::NotConnected
        | ErrorKind::UnexpectedEof => RpcError::Connection(format!("{}: {}", context, e)),
        _ => RpcError::Io(e),
    }
}

/// Writes the handshake record. JSON regardless of the negotiated codec.
pub async fn write_options<W: AsyncWrite + Unpin>(stream: &mut W, opt: &Options) -> Result<()> {
    let encoded = serde_json::to_vec(opt)?;
    send_message(stream, &encoded).await?;
    stream
        .flush()
        .await
        .map_err(|e| map_io_error(e, "flushing options"))?;
    Ok(())
}

/// Reads the handshake record without validating it.
pub async fn read_options<R: AsyncRead + Unpin>(stream: &mut R) -> Result<Options> {
    let data = receive_message(stream).await?;
    Ok(serde_json::from_slice(&data)?)
}

/// Read half of a codec-wrapped connection.
///
/// Every header is followed by exactly one body frame, so a body can be
/// skipped without knowing its type.
pub struct CodecReader<R> {
    inner: R,
    codec: Codec,
}

impl<R: AsyncRead + Unpin> CodecReader<R> {
    pub fn new(inner: R, codec: Codec) -> Self {
        Self { inner, codec }
    }

    pub fn codec(&self) -> Codec {
        self.codec
    }

    pub async fn read_header(&mut self) -> Result<Header> {
        let data = receive_message(&mut self.inner).await?;
        self.codec.decode(&data)
    }

    pub async fn read_body<T: DeserializeOwned>(&mut self) -> Result<T> {
        let data = self.read_body_bytes().await?;
        self.codec.decode(&data)
    }

    /// Reads the next body frame, leaving decoding to the caller.
    pub async fn read_body_bytes(&mut self) -> Result<Vec<u8>> {
        match receive_message(&mut self.inner).await {
            // a header was read, so the body is owed
            Err(RpcError::ConnectionClosed) => {
                Err(RpcError::Connection("stream ended before body".to_string()))
            }
            other => other,
        }
    }

    /// Drains one body whose owner is gone.
    pub async fn discard_body(&mut self) -> Result<()> {
        self.read_body_bytes().await.map(|_| ())
    }
}

/// Write half of a codec-wrapped connection.
///
/// Not synchronized: callers hold an exclusive lock around [`write`](Self::write)
/// so a header and its body are never interleaved with another pair. After any
/// failed write the stream is shut down and further writes are refused.
pub struct CodecWriter<W: AsyncWrite + Unpin> {
    inner: BufWriter<W>,
    codec: Codec,
    closed: bool,
}

impl<W: AsyncWrite + Unpin> CodecWriter<W> {
    pub fn new(inner: W, codec: Codec) -> Self {
        Self {
            inner: BufWriter::new(inner),
            codec,
            closed: false,
        }
    }

    pub fn codec(&self) -> Codec {
        self.codec
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Encodes and writes a header and its body, then flushes.
    pub async fn write<T: Serialize + ?Sized>(&mut self, header: &Header, body: &T) -> Result<()> {
        let body = self.codec.encode(body);
        self.write_encoded(header, body).await
    }

    /// Writes a header with a body the caller already encoded.
    ///
    /// An `Err` body counts as an encode failure and poisons the stream.
    pub async fn write_encoded(&mut self, header: &Header, body: Result<Vec<u8>>) -> Result<()> {
        if self.closed {
            return Err(RpcError::Shutdown);
        }

        let result = match (self.codec.encode(header), body) {
            (Ok(header), Ok(body)) => self.write_frames(&header, &body).await,
            (Err(e), _) | (_, Err(e)) => Err(e),
        };

        if let Err(e) = &result {
            tracing::warn!("rpc codec: write failed, closing stream: {}", e);
            let _ = self.close().await;
        }
        result
    }

    async fn write_frames(&mut self, header: &[u8], body: &[u8]) -> Result<()> {
        send_message(&mut self.inner, header).await?;
        send_message(&mut self.inner, body).await?;
        self.inner
            .flush()
            .await
            .map_err(|e| map_io_error(e, "flushing stream"))
    }

    /// Shuts the write side down. A second call is a no-op.
    ///
    /// Bytes left buffered by an interrupted write are dropped rather than
    /// flushed, so closing never waits on a peer that stopped reading.
    pub async fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.inner.get_mut().shutdown().await.map_err(RpcError::Io)
    }
}
