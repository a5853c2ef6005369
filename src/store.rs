//! Persistence seam. The engine only produces records; what stores them is up to the host.

use std::collections::hash_map::Entry;
use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::types::{now_rfc3339, DeviceRecord, IntelRecord};

/// Upserts keyed by address for devices and cached intelligence.
#[async_trait]
pub trait DeviceStore: Send + Sync {
    /// Insert or merge a device. Ports are unioned; other fields are refreshed
    /// when the incoming record carries a value.
    async fn upsert_device(&self, device: DeviceRecord);
    async fn upsert_intel(&self, record: IntelRecord);
    async fn cached_intel(&self, address: &str) -> Option<IntelRecord>;
    /// Most recently seen first.
    async fn devices(&self, limit: usize) -> Vec<DeviceRecord>;
    async fn device_count(&self) -> usize;
}

#[derive(Debug, Default)]
struct Tables {
    devices: HashMap<String, (u64, DeviceRecord)>,
    intel: HashMap<String, IntelRecord>,
    seq: u64,
}

/// In-process [`DeviceStore`].
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: RwLock<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DeviceStore for MemoryStore {
    async fn upsert_device(&self, device: DeviceRecord) {
        let mut t = self.inner.write().await;
        t.seq += 1;
        let seq = t.seq;
        match t.devices.entry(device.address.clone()) {
            Entry::Occupied(mut slot) => {
                let (order, existing) = slot.get_mut();
                *order = seq;
                for p in device.ports {
                    if !existing.ports.contains(&p) {
                        existing.ports.push(p);
                    }
                }
                if !device.services.is_empty() {
                    existing.services = device.services;
                }
                if device.location != "Unknown" {
                    existing.location = device.location;
                }
                existing.source = device.source;
                existing.last_seen = now_rfc3339();
            }
            Entry::Vacant(slot) => {
                slot.insert((seq, device));
            }
        }
    }

    async fn upsert_intel(&self, record: IntelRecord) {
        let mut t = self.inner.write().await;
        t.intel.insert(record.address.clone(), record);
    }

    async fn cached_intel(&self, address: &str) -> Option<IntelRecord> {
        self.inner.read().await.intel.get(address).cloned()
    }

    async fn devices(&self, limit: usize) -> Vec<DeviceRecord> {
        let t = self.inner.read().await;
        let mut rows: Vec<&(u64, DeviceRecord)> = t.devices.values().collect();
        rows.sort_by(|a, b| b.0.cmp(&a.0));
        rows.into_iter().take(limit).map(|(_, d)| d.clone()).collect()
    }

    async fn device_count(&self) -> usize {
        self.inner.read().await.devices.len()
    }
}
