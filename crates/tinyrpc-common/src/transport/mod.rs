//! tinyrpc transport layer
//!
//! Frames, codecs and handshakes shared by both ends of a connection.
//!
//! # Wire Format
//!
//! ```text
//! [len][Options as JSON]            once, written by the dialer
//! [len][Header][len][Body]          repeated, both directions
//! ```
//!
//! `len` is a 4-byte big-endian u32. Frames above 100 MB are rejected.

pub mod codec;
pub mod framed;
pub mod tunnel;

pub use codec::{Codec, JsonCodec, PostcardCodec};
pub use framed::{
    read_options, receive_message, send_message, write_options, CodecReader, CodecWriter,
    MAX_MESSAGE_SIZE,
};
pub use tunnel::{CONNECTED, DEFAULT_RPC_PATH};

#[cfg(test)]
mod tests;
