use std::collections::HashMap;
use std::fmt;

use ::time::{format_description::well_known, OffsetDateTime};
use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};

/// An address to probe: an IP literal or a resolvable host name.
///
/// Scans apply one shared port list to every target, so a target carries only
/// its address. Duplicate targets are probed twice.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Target(pub String);

impl Target {
    pub fn new(address: impl Into<String>) -> Self {
        Target(address.into())
    }

    pub fn address(&self) -> &str {
        &self.0
    }
}

impl From<&str> for Target {
    fn from(s: &str) -> Self {
        Target(s.to_string())
    }
}

impl From<String> for Target {
    fn from(s: String) -> Self {
        Target(s)
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Outcome of one probe. Produced exactly once per (address, port) pair per scan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProbeResult {
    pub address: String,
    pub port: u16,
    pub reachable: bool,
}

/// Open ports recorded for one scanned address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HostFindings {
    pub address: String,
    /// Completion order, not input order.
    pub open_ports: Vec<u16>,
}

/// Per-address scan results.
///
/// Every scanned address has an entry, even when nothing answered, so callers
/// can tell "scanned, nothing found" from "not scanned". Addresses keep the
/// order of their first appearance in the target list.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanFindings {
    hosts: Vec<HostFindings>,
    index: HashMap<String, usize>,
}

impl ScanFindings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `address` was scanned. No-op if it already has an entry.
    pub(crate) fn register(&mut self, address: &str) {
        if self.index.contains_key(address) {
            return;
        }
        self.index.insert(address.to_string(), self.hosts.len());
        self.hosts.push(HostFindings {
            address: address.to_string(),
            open_ports: Vec::new(),
        });
    }

    /// Append an open port; returns false if it was already recorded.
    pub(crate) fn record_open(&mut self, address: &str, port: u16) -> bool {
        self.register(address);
        let host = &mut self.hosts[self.index[address]];
        if host.open_ports.contains(&port) {
            return false;
        }
        host.open_ports.push(port);
        true
    }

    /// Open ports for `address`, or `None` if it was not part of the scan.
    pub fn get(&self, address: &str) -> Option<&[u16]> {
        self.index
            .get(address)
            .map(|&i| self.hosts[i].open_ports.as_slice())
    }

    pub fn contains(&self, address: &str) -> bool {
        self.index.contains_key(address)
    }

    pub fn addresses(&self) -> impl Iterator<Item = &str> {
        self.hosts.iter().map(|h| h.address.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = &HostFindings> {
        self.hosts.iter()
    }

    /// Hosts with at least one open port.
    pub fn live_hosts(&self) -> impl Iterator<Item = &HostFindings> {
        self.hosts.iter().filter(|h| !h.open_ports.is_empty())
    }

    pub fn len(&self) -> usize {
        self.hosts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hosts.is_empty()
    }

    pub fn open_count(&self) -> usize {
        self.hosts.iter().map(|h| h.open_ports.len()).sum()
    }
}

impl Serialize for ScanFindings {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.hosts.len()))?;
        for host in &self.hosts {
            map.serialize_entry(&host.address, &host.open_ports)?;
        }
        map.end()
    }
}

/// Where an intelligence record came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provenance {
    Live,
    Mock,
}

impl Provenance {
    pub fn as_str(&self) -> &'static str {
        match self {
            Provenance::Live => "live",
            Provenance::Mock => "mock",
        }
    }
}

/// Enrichment data for one address. Live and mock records share this shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntelRecord {
    pub address: String,
    pub services: Vec<String>,
    pub location: String,
    pub os: String,
    pub vulnerabilities: Vec<String>,
    pub provenance: Provenance,
    pub fetched_at: String,
}

/// A device as handed to the persistent store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceRecord {
    pub address: String,
    pub ports: Vec<u16>,
    pub services: Vec<String>,
    pub location: String,
    /// "scanner", "recon" or "api".
    pub source: String,
    pub last_seen: String,
}

impl DeviceRecord {
    pub fn new(address: impl Into<String>, ports: Vec<u16>, source: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            ports,
            services: Vec::new(),
            location: String::from("Unknown"),
            source: source.into(),
            last_seen: now_rfc3339(),
        }
    }
}

/// Recon loop phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReconPhase {
    #[default]
    Idle,
    Running,
}

/// Read-only view of the recon loop for observers.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconSnapshot {
    pub phase: ReconPhase,
    pub wave: u64,
    pub topic: Option<String>,
}

/// Everything the engine reports to its observers, in order of occurrence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum EngineEvent {
    /// A probe found an open port.
    Discovery { address: String, port: u16 },
    WaveStarted { wave: u64, topic: String },
    TargetsAcquired { wave: u64, count: usize },
    WaveFinished { wave: u64, hosts: usize, open_ports: usize },
    WaveFailed { wave: u64, reason: String },
    ReconHalted { waves: u64 },
}

/// Current UTC time as RFC 3339.
pub fn now_rfc3339() -> String {
    OffsetDateTime::now_utc()
        .format(&well_known::Rfc3339)
        .unwrap_or_else(|_| String::from("1970-01-01T00:00:00Z"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn findings_keep_first_appearance_order() {
        let mut f = ScanFindings::new();
        f.register("10.0.0.2");
        f.register("10.0.0.1");
        f.register("10.0.0.2");
        assert!(f.record_open("10.0.0.1", 443));
        assert!(f.record_open("10.0.0.1", 22));
        assert!(!f.record_open("10.0.0.1", 443));

        assert_eq!(f.addresses().collect::<Vec<_>>(), vec!["10.0.0.2", "10.0.0.1"]);
        assert_eq!(f.get("10.0.0.1"), Some(&[443, 22][..]));
        assert_eq!(f.get("10.0.0.2"), Some(&[][..]));
        assert_eq!(f.get("10.0.0.3"), None);
        assert_eq!(f.open_count(), 2);
        assert_eq!(f.live_hosts().count(), 1);
    }

    #[test]
    fn findings_serialize_as_ordered_map() {
        let mut f = ScanFindings::new();
        f.register("b");
        f.record_open("a", 80);
        let json = serde_json::to_string(&f).unwrap();
        assert_eq!(json, r#"{"b":[],"a":[80]}"#);
    }

    #[test]
    fn events_are_tagged() {
        let ev = EngineEvent::Discovery { address: "1.2.3.4".into(), port: 22 };
        let json = serde_json::to_value(&ev).unwrap();
        assert_eq!(json["event"], "discovery");
        assert_eq!(json["port"], 22);
    }

    #[test]
    fn provenance_tags() {
        assert_eq!(Provenance::Mock.as_str(), "mock");
        assert_eq!(serde_json::to_string(&Provenance::Live).unwrap(), "\"live\"");
    }
}
