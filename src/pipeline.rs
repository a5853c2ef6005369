use std::sync::Arc;

use tokio::sync::mpsc::UnboundedReceiver;
use tracing::{debug, info};

use crate::intel::IntelResolver;
use crate::store::DeviceStore;
use crate::types::{DeviceRecord, EngineEvent, IntelRecord, ScanFindings};

/// Consumer side of the engine: persists discoveries and enriches live hosts.
#[derive(Clone)]
pub struct Pipeline {
    store: Arc<dyn DeviceStore>,
    resolver: Arc<IntelResolver>,
}

impl Pipeline {
    pub fn new(store: Arc<dyn DeviceStore>, resolver: Arc<IntelResolver>) -> Self {
        Self { store, resolver }
    }

    pub fn store(&self) -> &Arc<dyn DeviceStore> {
        &self.store
    }

    pub async fn record_discovery(&self, address: &str, port: u16, source: &str) {
        self.store
            .upsert_device(DeviceRecord::new(address, vec![port], source))
            .await;
    }

    /// Cached intel if the store has it, otherwise resolve and cache.
    pub async fn enrich(&self, address: &str) -> IntelRecord {
        if let Some(cached) = self.store.cached_intel(address).await {
            debug!(address, provenance = cached.provenance.as_str(), "intel cache hit");
            return cached;
        }
        let record = self.resolver.resolve(address).await;
        self.store.upsert_intel(record.clone()).await;
        record
    }

    /// Enrich and persist every host that had an open port. Returns the records, in findings order.
    pub async fn ingest(&self, findings: &ScanFindings, source: &str) -> Vec<IntelRecord> {
        let mut out = Vec::new();
        for host in findings.live_hosts() {
            let intel = self.enrich(&host.address).await;
            let mut device = DeviceRecord::new(&host.address, host.open_ports.clone(), source);
            device.services = intel.services.clone();
            device.location = intel.location.clone();
            self.store.upsert_device(device).await;
            out.push(intel);
        }
        info!(hosts = out.len(), source, "findings ingested");
        out
    }

    /// Record every discovery event until the channel closes.
    pub async fn drain(&self, mut events: UnboundedReceiver<EngineEvent>, source: &str) {
        while let Some(event) = events.recv().await {
            if let EngineEvent::Discovery { address, port } = event {
                self.record_discovery(&address, port, source).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::intel::{mock_record, IntelSettings};
    use crate::store::MemoryStore;
    use crate::types::Provenance;

    fn offline_pipeline() -> Pipeline {
        let resolver = IntelResolver::new(&IntelSettings::default()).unwrap();
        Pipeline::new(Arc::new(MemoryStore::new()), Arc::new(resolver))
    }

    #[tokio::test]
    async fn cache_hit_skips_resolver() {
        let pipeline = offline_pipeline();
        let mut cached = mock_record("9.9.9.9");
        cached.provenance = Provenance::Live;
        cached.location = "Zurich, Switzerland".into();
        pipeline.store().upsert_intel(cached.clone()).await;

        let got = pipeline.enrich("9.9.9.9").await;
        assert_eq!(got, cached);
    }

    #[tokio::test]
    async fn miss_resolves_and_caches() {
        let pipeline = offline_pipeline();
        let got = pipeline.enrich("1.1.1.1").await;
        assert_eq!(got.provenance, Provenance::Mock);
        assert_eq!(pipeline.store().cached_intel("1.1.1.1").await, Some(got));
    }

    #[tokio::test]
    async fn ingest_skips_closed_hosts() {
        let pipeline = offline_pipeline();
        let mut findings = ScanFindings::new();
        findings.register("10.0.0.1");
        findings.record_open("10.0.0.2", 22);

        let intel = pipeline.ingest(&findings, "scanner").await;
        assert_eq!(intel.len(), 1);
        let devices = pipeline.store().devices(10).await;
        assert_eq!(devices.len(), 1);
        assert_eq!(devices[0].address, "10.0.0.2");
        assert_eq!(devices[0].location, crate::intel::MOCK_LOCATION);
        assert_eq!(devices[0].services, vec!["HTTP".to_string(), "SSH".to_string()]);
    }

    #[tokio::test]
    async fn drain_records_discoveries() {
        let pipeline = offline_pipeline();
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        tx.send(EngineEvent::WaveStarted { wave: 1, topic: "x".into() }).unwrap();
        tx.send(EngineEvent::Discovery { address: "h".into(), port: 80 }).unwrap();
        tx.send(EngineEvent::Discovery { address: "h".into(), port: 443 }).unwrap();
        drop(tx);
        pipeline.drain(rx, "recon").await;
        let devices = pipeline.store().devices(10).await;
        assert_eq!(devices.len(), 1);
        assert_eq!(devices[0].ports, vec![80, 443]);
        assert_eq!(devices[0].source, "recon");
    }
}
