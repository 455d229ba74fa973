use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tinyrpc_common::{Result, RpcError};

/// How [`Discovery::get`] picks a server.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SelectMode {
    /// Uniform pick on every call
    #[default]
    Random,
    /// Rotate through the list
    RoundRobin,
}

impl FromStr for SelectMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "random" => Ok(SelectMode::Random),
            "round-robin" | "roundrobin" => Ok(SelectMode::RoundRobin),
            other => Err(format!("unknown select mode '{}', expected random or round-robin", other)),
        }
    }
}

impl fmt::Display for SelectMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SelectMode::Random => f.write_str("random"),
            SelectMode::RoundRobin => f.write_str("round-robin"),
        }
    }
}

/// Source of server addresses for the [`XClient`](crate::XClient).
#[async_trait]
pub trait Discovery: Send + Sync {
    /// Pulls the list from its origin, if it has one.
    async fn refresh(&self) -> Result<()>;

    /// Replaces the list.
    async fn update(&self, servers: Vec<String>) -> Result<()>;

    /// Picks one address.
    async fn get(&self, mode: SelectMode) -> Result<String>;

    /// Every known address.
    async fn get_all(&self) -> Result<Vec<String>>;
}

struct State {
    servers: Vec<String>,
    /// Next round-robin position; taken modulo the current length.
    index: usize,
    rng: StdRng,
}

/// Discovery over a list supplied by the caller.
pub struct MultiServersDiscovery {
    state: Mutex<State>,
}

impl MultiServersDiscovery {
    /// The round-robin position starts at a random offset so that many
    /// clients do not all hit the first server first.
    pub fn new(servers: Vec<String>) -> Self {
        let mut rng = StdRng::from_entropy();
        let index = rng.gen_range(0..i32::MAX as usize);
        Self {
            state: Mutex::new(State { servers, index, rng }),
        }
    }

    pub fn select(&self, mode: SelectMode) -> Result<String> {
        let mut state = self.state.lock();
        let n = state.servers.len();
        if n == 0 {
            return Err(RpcError::NoAvailableServer);
        }

        match mode {
            SelectMode::Random => {
                let i = state.rng.gen_range(0..n);
                Ok(state.servers[i].clone())
            }
            SelectMode::RoundRobin => {
                let server = state.servers[state.index % n].clone();
                state.index = (state.index + 1) % n;
                Ok(server)
            }
        }
    }

    pub fn servers(&self) -> Vec<String> {
        self.state.lock().servers.clone()
    }

    pub fn set_servers(&self, servers: Vec<String>) {
        self.state.lock().servers = servers;
    }
}

#[async_trait]
impl Discovery for MultiServersDiscovery {
    async fn refresh(&self) -> Result<()> {
        Ok(())
    }

    async fn update(&self, servers: Vec<String>) -> Result<()> {
        self.set_servers(servers);
        Ok(())
    }

    async fn get(&self, mode: SelectMode) -> Result<String> {
        self.select(mode)
    }

    async fn get_all(&self) -> Result<Vec<String>> {
        Ok(self.servers())
    }
}
