use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{info, warn};

use crate::dialer::{Connector, TcpDialer};
use crate::error::Result;
use crate::probe::{ProbeExecutor, DEFAULT_CONCURRENCY};
use crate::proxy::ProxyConfig;
use crate::types::{EngineEvent, ScanFindings, Target};

/// Knobs for one scan coordinator. Supplied per invocation, never retained globally.
#[derive(Debug, Clone)]
pub struct ScanOptions {
    pub concurrency: usize,
    pub timeout: Duration,
    pub proxy: Option<ProxyConfig>,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_CONCURRENCY,
            timeout: Duration::from_millis(1000),
            proxy: None,
        }
    }
}

/// Expands targets x ports into probes and aggregates the results.
///
/// Probes run as spawned tasks gated by the executor's limiter; only the
/// coordinating task touches the [`ScanFindings`] being built.
pub struct ScanCoordinator {
    executor: ProbeExecutor,
}

impl ScanCoordinator {
    /// Coordinator backed by a real TCP dialer. Fails on invalid options (zero timeout).
    pub fn new(options: &ScanOptions) -> Result<Self> {
        let dialer = TcpDialer::new(options.timeout, options.proxy.clone())?;
        Ok(Self::with_connector(Arc::new(dialer), options.concurrency))
    }

    pub fn with_connector(connector: Arc<dyn Connector>, concurrency: usize) -> Self {
        Self {
            executor: ProbeExecutor::new(connector, concurrency),
        }
    }

    pub fn executor(&self) -> &ProbeExecutor {
        &self.executor
    }

    /// Probe every target against every port in `ports`.
    ///
    /// `on_discovery` runs inline, in completion order, once per reachable
    /// probe; keep it short. Every target appears in the returned findings,
    /// with an empty port list if nothing answered. Each pair is attempted
    /// exactly once and the scan always runs to completion.
    pub async fn scan<F>(&self, targets: &[Target], ports: &[u16], mut on_discovery: F) -> ScanFindings
    where
        F: FnMut(&str, u16),
    {
        let started = Instant::now();
        let mut findings = ScanFindings::new();
        let mut set = JoinSet::new();

        for target in targets {
            findings.register(target.address());
            for &port in ports {
                let executor = self.executor.clone();
                let address = target.address().to_string();
                set.spawn(async move { executor.probe(&address, port).await });
            }
        }

        while let Some(joined) = set.join_next().await {
            match joined {
                Ok(result) if result.reachable => {
                    info!(address = %result.address, port = result.port, "open port discovered");
                    findings.record_open(&result.address, result.port);
                    on_discovery(&result.address, result.port);
                }
                Ok(_) => {}
                Err(e) => warn!(error = %e, "probe task did not complete"),
            }
        }

        info!(
            targets = targets.len(),
            ports = ports.len(),
            open = findings.open_count(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "scan complete"
        );
        findings
    }

    /// Like [`scan`](Self::scan), forwarding each discovery onto an event channel.
    pub async fn scan_with_events(
        &self,
        targets: &[Target],
        ports: &[u16],
        events: &UnboundedSender<EngineEvent>,
    ) -> ScanFindings {
        self.scan(targets, ports, |address, port| {
            // a dropped receiver only means nobody is listening
            let _ = events.send(EngineEvent::Discovery {
                address: address.to_string(),
                port,
            });
        })
        .await
    }
}
