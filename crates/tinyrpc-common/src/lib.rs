//! tinyrpc common types and transport
//!
//! Protocol definitions and framing shared by every tinyrpc crate.
//!
//! - [`protocol`]: error taxonomy, the [`Header`] that precedes every body,
//!   and the [`Options`] handshake record
//! - [`transport`]: codecs, length-prefixed framing, codec-wrapped read and
//!   write halves, and the HTTP CONNECT handshake
//!
//! # Example
//!
//! ```
//! use tinyrpc_common::{CodecType, Header, Options};
//!
//! let opt = Options::new(CodecType::Json);
//! assert!(opt.validate().is_ok());
//!
//! let header = Header::new("Foo.Sum", 1);
//! assert!(!header.is_error());
//! ```

pub mod protocol;
pub mod transport;

pub use protocol::*;
