use std::sync::Arc;

use tokio::sync::Semaphore;
use tracing::debug;

use crate::dialer::Connector;
use crate::types::ProbeResult;

/// Default number of probes allowed in flight at once.
pub const DEFAULT_CONCURRENCY: usize = 100;
/// Hard ceiling on the limiter size, to stay well below typical fd limits.
pub const MAX_CONCURRENCY: usize = 5_000;

/// Runs single probes under a shared concurrency limiter.
///
/// Clones share the same limiter, so the bound holds across every task spawned
/// from one executor.
#[derive(Clone)]
pub struct ProbeExecutor {
    limiter: Arc<Semaphore>,
    connector: Arc<dyn Connector>,
    limit: usize,
}

impl ProbeExecutor {
    pub fn new(connector: Arc<dyn Connector>, concurrency: usize) -> Self {
        let limit = concurrency.clamp(1, MAX_CONCURRENCY);
        Self {
            limiter: Arc::new(Semaphore::new(limit)),
            connector,
            limit,
        }
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Probes currently holding a permit.
    pub fn in_flight(&self) -> usize {
        self.limit - self.limiter.available_permits()
    }

    /// Probe one pair. Never fails: refusal, timeout and errors all yield `reachable: false`.
    pub async fn probe(&self, address: &str, port: u16) -> ProbeResult {
        let reachable = match self.limiter.clone().acquire_owned().await {
            Ok(_permit) => self.connector.connect(address, port).await,
            // only if the semaphore were closed, which this type never does
            Err(_) => false,
        };
        debug!(address, port, reachable, "probe finished");
        ProbeResult {
            address: address.to_string(),
            port,
            reachable,
        }
    }
}
