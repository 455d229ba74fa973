use std::time::Duration;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum RpcError {
    #[error("Serialization error: {0}")]
    Serialization(#[from] postcard::Error),

    #[error("JSON serialization error: {0}")]
    JsonSerialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Connection error: {0}")]
    Connection(String),

    /// The peer closed the stream between two frames.
    #[error("connection closed by peer")]
    ConnectionClosed,

    #[error("connection is shut down")]
    Shutdown,

    #[error("rpc: invalid magic number {0:#x}")]
    InvalidMagicNumber(u32),

    #[error("rpc: invalid codec type {0}")]
    InvalidCodecType(String),

    #[error("Message too large: {0} bytes (max {1} bytes)")]
    MessageTooLarge(usize, usize),

    #[error("rpc server: service/method request ill-formed: {0}")]
    IllFormedServiceMethod(String),

    #[error("rpc server: can't find service {0}")]
    ServiceNotFound(String),

    #[error("rpc server: can't find method {0}")]
    MethodNotFound(String),

    #[error("rpc server: service already defined: {0}")]
    DuplicateService(String),

    #[error("rpc server: {0} is not a valid service name")]
    InvalidServiceName(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    /// Error string reported by the server in a response header.
    #[error("{0}")]
    Remote(String),

    /// The caller's deadline elapsed before a reply arrived.
    #[error("rpc client: call failed: deadline exceeded after {0:?}")]
    CallTimeout(Duration),

    #[error("rpc client: connect timeout: expect within {0:?}")]
    ConnectTimeout(Duration),

    #[error("unexpected HTTP response: {0}")]
    UnexpectedHttpResponse(String),

    #[error("rpc client: wrong format '{0}', expect protocol@addr")]
    InvalidAddress(String),

    #[error("rpc client: unsupported protocol {0}")]
    UnsupportedProtocol(String),

    #[error("rpc discovery: no available server")]
    NoAvailableServer,

    #[error("Registry error: {0}")]
    Registry(String),
}

impl RpcError {
    /// Message sent back to a caller when a method exceeds its budget.
    pub fn handle_timeout_message(timeout: Duration) -> String {
        format!("rpc server: request handle timeout: expect within {:?}", timeout)
    }

    /// Builds the error delivered to every pending call when a connection dies.
    ///
    /// `RpcError` is not `Clone`, so each pending call gets its own copy that
    /// preserves the shutdown case and flattens the rest to a message.
    pub fn for_pending_call(&self) -> RpcError {
        match self {
            RpcError::Shutdown => RpcError::Shutdown,
            RpcError::ConnectionClosed => RpcError::ConnectionClosed,
            other => RpcError::Connection(other.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, RpcError>;
