//! Names shared by both ends of the HTTP CONNECT tunnel.
//!
//! A dialer sends `CONNECT /_tinyrpc_ HTTP/1.0`; the server answers
//! `200 Connected to tinyrpc` and the connection then carries the RPC
//! protocol unchanged.

/// Path on which servers accept CONNECT tunnels.
pub const DEFAULT_RPC_PATH: &str = "/_tinyrpc_";

/// Reason phrase of a successful tunnel response.
pub const CONNECTED: &str = "Connected to tinyrpc";
