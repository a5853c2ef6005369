//! Autonomous recon loop: pick a topic, harvest addresses, scan them through
//! the proxy, sleep, repeat.
//!
//! Stopping is cooperative. A stop request never interrupts a wave in flight;
//! the loop notices it once the current wave's scan has finished (or during
//! the inter-wave sleep) and exits without starting another harvest.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc::UnboundedSender;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::dialer::Connector;
use crate::error::{Error, Result};
use crate::harvest::{pick_topic, TargetSource, TOPICS};
use crate::ports::default_recon_ports;
use crate::proxy::{ProxyConfig, DEFAULT_TOR_PROXY};
use crate::scanner::{ScanCoordinator, ScanOptions};
use crate::types::{EngineEvent, ReconPhase, ReconSnapshot, Target};

#[derive(Debug, Clone)]
pub struct ReconSettings {
    /// Pause between the end of one wave and the start of the next.
    pub interval: Duration,
    pub ports: Vec<u16>,
    /// Concurrency and timeout for wave scans. Its `proxy` is ignored.
    pub scan: ScanOptions,
    /// Every wave is routed through this proxy.
    pub proxy: ProxyConfig,
    pub topics: Vec<String>,
    /// Stop on its own after this many waves.
    pub max_waves: Option<u64>,
}

impl Default for ReconSettings {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(10),
            ports: default_recon_ports(),
            scan: ScanOptions {
                timeout: Duration::from_millis(2000),
                ..ScanOptions::default()
            },
            proxy: DEFAULT_TOR_PROXY
                .parse()
                .unwrap_or_else(|_| ProxyConfig::socks5("127.0.0.1", 9050)),
            topics: TOPICS.iter().map(|t| t.to_string()).collect(),
            max_waves: None,
        }
    }
}

/// Totals for a finished loop.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconReport {
    pub waves: u64,
    pub failed_waves: u64,
    pub open_ports: usize,
}

pub struct ReconLoop {
    settings: ReconSettings,
    source: Arc<dyn TargetSource>,
    connector: Option<Arc<dyn Connector>>,
    events: UnboundedSender<EngineEvent>,
    state: watch::Sender<ReconSnapshot>,
}

impl ReconLoop {
    pub fn new(
        settings: ReconSettings,
        source: Arc<dyn TargetSource>,
        events: UnboundedSender<EngineEvent>,
    ) -> Result<Self> {
        if settings.topics.is_empty() {
            return Err(Error::Configuration("recon topic catalog is empty".into()));
        }
        let (state, _) = watch::channel(ReconSnapshot::default());
        Ok(Self {
            settings,
            source,
            connector: None,
            events,
            state,
        })
    }

    /// Probe through `connector` instead of dialing over the configured proxy.
    pub fn with_connector(mut self, connector: Arc<dyn Connector>) -> Self {
        self.connector = Some(connector);
        self
    }

    /// Read-only view of the loop state.
    pub fn subscribe(&self) -> watch::Receiver<ReconSnapshot> {
        self.state.subscribe()
    }

    /// Run the loop on its own task.
    pub fn spawn(self) -> ReconHandle {
        let cancel = CancellationToken::new();
        let state = self.subscribe();
        let task = tokio::spawn(self.run(cancel.clone()));
        ReconHandle {
            cancel,
            state,
            task,
        }
    }

    /// Run waves until `cancel` fires or `max_waves` is reached. At least one wave always runs.
    pub async fn run(self, cancel: CancellationToken) -> ReconReport {
        let mut report = ReconReport::default();
        self.state.send_modify(|s| s.phase = ReconPhase::Running);
        info!(interval_secs = self.settings.interval.as_secs(), proxy = %self.settings.proxy, "recon loop started");

        loop {
            let wave = report.waves + 1;
            let topic = self.pick_topic();
            self.state.send_modify(|s| {
                s.wave = wave;
                s.topic = Some(topic.clone());
            });
            info!(wave, topic = %topic, "wave started");
            self.emit(EngineEvent::WaveStarted {
                wave,
                topic: topic.clone(),
            });

            match self.run_wave(wave, &topic).await {
                Ok((hosts, open_ports)) => {
                    report.open_ports += open_ports;
                    info!(wave, hosts, open_ports, "wave finished");
                    self.emit(EngineEvent::WaveFinished { wave, hosts, open_ports });
                }
                Err(e) => {
                    report.failed_waves += 1;
                    warn!(wave, error = %e, "wave failed");
                    self.emit(EngineEvent::WaveFailed {
                        wave,
                        reason: e.to_string(),
                    });
                }
            }
            report.waves = wave;

            if cancel.is_cancelled() || self.settings.max_waves.is_some_and(|max| wave >= max) {
                break;
            }
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(self.settings.interval) => {}
            }
        }

        self.state.send_modify(|s| s.phase = ReconPhase::Idle);
        info!(waves = report.waves, failed = report.failed_waves, "recon loop halted");
        self.emit(EngineEvent::ReconHalted { waves: report.waves });
        report
    }

    /// Options for a wave scan: the configured scan knobs with proxy routing forced on.
    pub fn wave_options(&self) -> ScanOptions {
        ScanOptions {
            proxy: Some(self.settings.proxy.clone()),
            ..self.settings.scan.clone()
        }
    }

    /// One harvest + scan. Returns (hosts scanned, open ports found).
    async fn run_wave(&self, wave: u64, topic: &str) -> Result<(usize, usize)> {
        let addresses = match self.source.harvest(topic).await {
            Ok(addresses) => addresses,
            Err(e) => {
                warn!(wave, topic, error = %e, "harvest failed, no targets this wave");
                Vec::new()
            }
        };
        info!(wave, count = addresses.len(), "targets acquired");
        self.emit(EngineEvent::TargetsAcquired {
            wave,
            count: addresses.len(),
        });
        if addresses.is_empty() {
            return Ok((0, 0));
        }

        let coordinator = match &self.connector {
            Some(c) => ScanCoordinator::with_connector(c.clone(), self.settings.scan.concurrency),
            None => ScanCoordinator::new(&self.wave_options())?,
        };
        let targets: Vec<Target> = addresses.into_iter().map(Target::from).collect();
        let findings = coordinator
            .scan_with_events(&targets, &self.settings.ports, &self.events)
            .await;
        Ok((findings.len(), findings.open_count()))
    }

    fn pick_topic(&self) -> String {
        let names: Vec<&str> = self.settings.topics.iter().map(String::as_str).collect();
        let mut rng = rand::thread_rng();
        pick_topic(&names, &mut rng)
            .unwrap_or(TOPICS[0])
            .to_string()
    }

    fn emit(&self, event: EngineEvent) {
        let _ = self.events.send(event);
    }
}

/// Control handle for a spawned [`ReconLoop`].
pub struct ReconHandle {
    cancel: CancellationToken,
    state: watch::Receiver<ReconSnapshot>,
    task: JoinHandle<ReconReport>,
}

impl ReconHandle {
    /// Ask the loop to stop after the wave in flight.
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    pub fn is_stopping(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    pub fn snapshot(&self) -> ReconSnapshot {
        self.state.borrow().clone()
    }

    /// Wait for the loop to exit.
    pub async fn join(self) -> ReconReport {
        match self.task.await {
            Ok(report) => report,
            Err(e) => {
                warn!(error = %e, "recon task ended abnormally");
                ReconReport::default()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    struct OpenOn(u16);

    #[async_trait]
    impl Connector for OpenOn {
        async fn connect(&self, _address: &str, port: u16) -> bool {
            port == self.0
        }
    }

    #[test]
    fn wave_options_force_proxy() {
        let (tx, _rx) = tokio::sync::mpsc::unbounded_channel();
        let settings = ReconSettings::default();
        assert!(settings.scan.proxy.is_none());
        let recon = ReconLoop::new(
            settings,
            Arc::new(crate::harvest::StaticSource::default()),
            tx,
        )
        .unwrap();
        let opts = recon.wave_options();
        assert_eq!(opts.proxy, Some(ProxyConfig::socks5("127.0.0.1", 9050)));
    }

    #[test]
    fn empty_topic_catalog_rejected() {
        let (tx, _rx) = tokio::sync::mpsc::unbounded_channel();
        let settings = ReconSettings {
            topics: Vec::new(),
            ..ReconSettings::default()
        };
        let source = Arc::new(crate::harvest::StaticSource::default());
        assert!(ReconLoop::new(settings, source, tx).is_err());
    }

    #[tokio::test]
    async fn max_waves_bounds_the_loop() {
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let settings = ReconSettings {
            interval: Duration::from_millis(5),
            ports: vec![80, 443],
            max_waves: Some(3),
            ..ReconSettings::default()
        };
        let source = Arc::new(crate::harvest::StaticSource {
            addresses: vec!["192.0.2.10".into()],
        });
        let recon = ReconLoop::new(settings, source, tx)
            .unwrap()
            .with_connector(Arc::new(OpenOn(443)));
        let report = recon.run(CancellationToken::new()).await;

        assert_eq!(report, ReconReport { waves: 3, failed_waves: 0, open_ports: 3 });
        let mut discoveries = 0;
        while let Ok(ev) = rx.try_recv() {
            if matches!(ev, EngineEvent::Discovery { port: 443, .. }) {
                discoveries += 1;
            }
        }
        assert_eq!(discoveries, 3);
    }
}
