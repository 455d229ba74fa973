use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::protocol::error::RpcError;

/// Identifies a tinyrpc connection. Sent as the first field of the handshake.
pub const MAGIC_NUMBER: u32 = 0x3bef5c;

/// Default bound on connect plus handshake.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Wire encoding negotiated during the handshake.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum CodecType {
    Json,
    #[default]
    Postcard,
}

impl CodecType {
    pub fn as_str(&self) -> &'static str {
        match self {
            CodecType::Json => "application/json",
            CodecType::Postcard => "application/postcard",
        }
    }
}

impl fmt::Display for CodecType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CodecType {
    type Err = RpcError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "application/json" => Ok(CodecType::Json),
            "application/postcard" => Ok(CodecType::Postcard),
            other => Err(RpcError::InvalidCodecType(other.to_string())),
        }
    }
}

/// Handshake record, written once per connection before any header.
///
/// The codec type travels as its string tag so a peer can reject encodings
/// it does not know instead of failing to parse the record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Options {
    pub magic_number: u32,
    pub codec_type: String,
    /// Zero disables the bound.
    #[serde(default)]
    pub connect_timeout_ms: u64,
    /// Per-request budget on the server. Zero means unbounded.
    #[serde(default)]
    pub handle_timeout_ms: u64,
}

impl Options {
    pub fn new(codec_type: CodecType) -> Self {
        Self {
            codec_type: codec_type.as_str().to_string(),
            ..Default::default()
        }
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout_ms = ceil_millis(timeout);
        self
    }

    pub fn with_handle_timeout(mut self, timeout: Duration) -> Self {
        self.handle_timeout_ms = ceil_millis(timeout);
        self
    }

    pub fn codec(&self) -> Result<CodecType, RpcError> {
        self.codec_type.parse()
    }

    pub fn connect_timeout(&self) -> Option<Duration> {
        (self.connect_timeout_ms > 0).then(|| Duration::from_millis(self.connect_timeout_ms))
    }

    pub fn handle_timeout(&self) -> Option<Duration> {
        (self.handle_timeout_ms > 0).then(|| Duration::from_millis(self.handle_timeout_ms))
    }

    /// Forces the protocol magic number and fills in a missing codec.
    pub fn normalized(mut self) -> Self {
        self.magic_number = MAGIC_NUMBER;
        if self.codec_type.is_empty() {
            self.codec_type = CodecType::default().as_str().to_string();
        }
        self
    }

    pub fn validate(&self) -> Result<CodecType, RpcError> {
        if self.magic_number != MAGIC_NUMBER {
            return Err(RpcError::InvalidMagicNumber(self.magic_number));
        }
        self.codec()
    }
}

/// Whole milliseconds, rounded up so a non-zero duration never becomes
/// the "unbounded" zero.
fn ceil_millis(d: Duration) -> u64 {
    let mut millis = d.as_millis();
    if d.subsec_nanos() % 1_000_000 != 0 {
        millis += 1;
    }
    u64::try_from(millis).unwrap_or(u64::MAX)
}

impl Default for Options {
    fn default() -> Self {
        Self {
            magic_number: MAGIC_NUMBER,
            codec_type: CodecType::default().as_str().to_string(),
            connect_timeout_ms: DEFAULT_CONNECT_TIMEOUT.as_millis() as u64,
            handle_timeout_ms: 0,
        }
    }
}
