//! tinyrpc server
//!
//! - [`Service`] / [`ServiceBuilder`]: bind a receiver's methods under names
//! - [`Server`]: accept connections (TCP, Unix, or HTTP CONNECT), run the
//!   handshake, and dispatch each request concurrently with an optional
//!   per-request time budget taken from the client's handshake

pub mod http;
pub mod server;
pub mod service;

pub use server::Server;
pub use service::{is_exported, Argv, MethodType, Replyv, Service, ServiceBuilder};
