//! tinyrpc client
//!
//! [`Client`] multiplexes concurrent calls over one connection. Use the
//! dialers to open one:
//!
//! - [`dial`]: plain TCP
//! - [`dial_http`]: TCP through an HTTP CONNECT tunnel
//! - [`xdial`]: `protocol@address` strings such as `tcp@127.0.0.1:9999`

pub mod call;
pub mod client;
pub mod dial;
pub mod http;

pub use call::Call;
pub use client::Client;
#[cfg(unix)]
pub use dial::dial_unix;
pub use dial::{dial, dial_http, parse_rpc_addr, xdial};
pub use http::new_http_client;
