//! tinyrpc registry
//!
//! - [`Registry`]: HTTP directory of live servers with lazy expiry
//! - [`heartbeat`]: keeps a server listed
//! - [`RegistryClient`]: the HTTP calls both of the above and discovery use

pub mod client;
pub mod heartbeat;
pub mod registry;

pub use client::{parse_servers, RegistryClient};
pub use heartbeat::{default_interval, heartbeat};
pub use registry::{Registry, RegistryConfig, ServerItem, DEFAULT_PATH, DEFAULT_TIMEOUT, SERVERS_HEADER};
