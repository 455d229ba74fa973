pub mod error;
pub mod header;
pub mod options;


pub use error::{Result, RpcError};
pub use header::Header;
pub use options::{CodecType, Options, DEFAULT_CONNECT_TIMEOUT, MAGIC_NUMBER};
