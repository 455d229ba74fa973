use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::protocol::error::Result;
use crate::protocol::options::CodecType;

/// Codec for encoding/decoding headers and bodies.
///
/// Selected once per connection from the handshake's codec tag. The enum
/// keeps dispatch static; adding an encoding means adding a variant here and
/// a tag in [`CodecType`].
///
/// # Example
///
/// ```
/// use tinyrpc_common::transport::Codec;
/// use tinyrpc_common::protocol::{CodecType, Header};
///
/// let codec = Codec::from(CodecType::Json);
/// let header = Header::new("Foo.Sum", 1);
///
/// let encoded = codec.encode(&header).unwrap();
/// let decoded: Header = codec.decode(&encoded).unwrap();
/// assert_eq!(header, decoded);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Codec {
    /// Self-describing text encoding
    Json(JsonCodec),
    /// Compact binary encoding, the default
    Postcard(PostcardCodec),
}

impl Codec {
    pub fn new() -> Self {
        Codec::from(CodecType::default())
    }

    pub fn codec_type(&self) -> CodecType {
        match self {
            Codec::Json(_) => CodecType::Json,
            Codec::Postcard(_) => CodecType::Postcard,
        }
    }

    /// Encode a value to bytes
    pub fn encode<T: Serialize + ?Sized>(&self, value: &T) -> Result<Vec<u8>> {
        match self {
            Codec::Json(_) => JsonCodec::encode(value),
            Codec::Postcard(_) => PostcardCodec::encode(value),
        }
    }

    /// Decode a value from bytes
    pub fn decode<T: DeserializeOwned>(&self, data: &[u8]) -> Result<T> {
        match self {
            Codec::Json(_) => JsonCodec::decode(data),
            Codec::Postcard(_) => PostcardCodec::decode(data),
        }
    }
}

impl From<CodecType> for Codec {
    fn from(codec_type: CodecType) -> Self {
        match codec_type {
            CodecType::Json => Codec::Json(JsonCodec),
            CodecType::Postcard => Codec::Postcard(PostcardCodec),
        }
    }
}

impl Default for Codec {
    fn default() -> Self {
        Self::new()
    }
}

/// JSON codec backed by `serde_json`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JsonCodec;

impl JsonCodec {
    pub fn encode<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(value)?)
    }

    pub fn decode<T: DeserializeOwned>(data: &[u8]) -> Result<T> {
        Ok(serde_json::from_slice(data)?)
    }
}

/// Binary codec backed by `postcard`.
///
/// Not self-describing: both sides must agree on the exact Rust types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PostcardCodec;

impl PostcardCodec {
    pub fn encode<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>> {
        Ok(postcard::to_allocvec(value)?)
    }

    pub fn decode<T: DeserializeOwned>(data: &[u8]) -> Result<T> {
        Ok(postcard::from_bytes(data)?)
    }
}
