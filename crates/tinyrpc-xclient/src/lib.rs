//! tinyrpc discovery and load balancing
//!
//! - [`Discovery`]: where server addresses come from
//! - [`MultiServersDiscovery`]: a fixed list with random or round-robin picks
//! - [`RegistryDiscovery`]: a list pulled from a registry and cached
//! - [`XClient`]: pools one client per server and routes or broadcasts calls

pub mod discovery;
pub mod registry_discovery;
pub mod xclient;

pub use discovery::{Discovery, MultiServersDiscovery, SelectMode};
pub use registry_discovery::{RegistryDiscovery, DEFAULT_UPDATE_TIMEOUT};
pub use xclient::XClient;
