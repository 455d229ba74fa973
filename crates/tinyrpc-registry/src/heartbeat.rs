use std::time::Duration;

use tinyrpc_common::Result;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant};
use tracing::{debug, warn};

use crate::client::RegistryClient;
use crate::registry::DEFAULT_TIMEOUT;

/// Heartbeat period for a registry with the given `timeout`.
///
/// `timeout - 1 minute` when that is positive, otherwise half the timeout, so
/// the period always stays below the timeout. A zero timeout never expires and
/// gets one minute.
pub fn default_interval(timeout: Duration) -> Duration {
    const MINUTE: Duration = Duration::from_secs(60);

    if timeout.is_zero() {
        return MINUTE;
    }
    match timeout.checked_sub(MINUTE) {
        Some(interval) if !interval.is_zero() => interval,
        _ => (timeout / 2).max(Duration::from_nanos(1)),
    }
}

/// Registers `addr` with the registry at `registry_url` and keeps it listed.
///
/// The first heartbeat is sent before returning and its failure is returned.
/// The background task then repeats every `interval` (default
/// [`default_interval`] of [`DEFAULT_TIMEOUT`]) and stops at the first failure.
pub async fn heartbeat(
    registry_url: &str,
    addr: &str,
    interval: Option<Duration>,
) -> Result<JoinHandle<()>> {
    let interval = interval
        .filter(|d| !d.is_zero())
        .unwrap_or_else(|| default_interval(DEFAULT_TIMEOUT));
    let client = RegistryClient::new(registry_url)?;

    client.send_heartbeat(addr).await?;
    debug!("rpc registry: {} registered with {}", addr, registry_url);

    let addr = addr.to_string();
    Ok(tokio::spawn(async move {
        let mut ticker = interval_at(Instant::now() + interval, interval);
        loop {
            ticker.tick().await;
            if let Err(e) = client.send_heartbeat(&addr).await {
                warn!("rpc server: heartbeat for {} stopped: {}", addr, e);
                break;
            }
        }
    }))
}
