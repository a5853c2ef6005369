//! Host intelligence lookups with a deterministic offline fallback.
//!
//! The resolver is stateless; callers that want caching go through
//! [`Pipeline::enrich`](crate::pipeline::Pipeline::enrich).

use std::time::Duration;

use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::http::build_client;
use crate::proxy::ProxyConfig;
use crate::types::{now_rfc3339, IntelRecord, Provenance};

pub const DEFAULT_INTEL_BASE_URL: &str = "https://api.shodan.io";
/// Location reported by every mock record.
pub const MOCK_LOCATION: &str = "Simulated City, World";

#[derive(Debug, Clone)]
pub struct IntelSettings {
    /// Enrichment credential. `None` (or empty) selects offline mode.
    pub api_key: Option<String>,
    pub base_url: String,
    pub timeout: Duration,
    pub proxy: Option<ProxyConfig>,
}

impl Default for IntelSettings {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: DEFAULT_INTEL_BASE_URL.to_string(),
            timeout: Duration::from_secs(10),
            proxy: None,
        }
    }
}

pub struct IntelResolver {
    client: Client,
    api_key: Option<String>,
    base_url: String,
}

impl IntelResolver {
    pub fn new(settings: &IntelSettings) -> Result<Self> {
        let client = build_client(settings.proxy.as_ref(), settings.timeout)?;
        let api_key = settings
            .api_key
            .as_deref()
            .map(str::trim)
            .filter(|k| !k.is_empty())
            .map(str::to_string);
        Ok(Self {
            client,
            api_key,
            base_url: settings.base_url.trim_end_matches('/').to_string(),
        })
    }

    /// True when a credential is configured and live lookups will be attempted.
    pub fn is_live(&self) -> bool {
        self.api_key.is_some()
    }

    /// Resolve intelligence for `address`. Never fails; falls back to [`mock_record`].
    pub async fn resolve(&self, address: &str) -> IntelRecord {
        let Some(key) = self.api_key.as_deref() else {
            debug!(address, "no enrichment credential, using simulated intel");
            return mock_record(address);
        };

        match self.fetch(address, key).await {
            Ok(Some(record)) => {
                info!(address, services = record.services.len(), "live intel fetched");
                record
            }
            Ok(None) => mock_record(address),
            Err(e) => {
                warn!(address, error = %e.without_url(), "intel lookup failed, using simulated intel");
                mock_record(address)
            }
        }
    }

    /// `Ok(None)` means the service answered but not with usable data.
    async fn fetch(&self, address: &str, key: &str) -> reqwest::Result<Option<IntelRecord>> {
        let url = format!("{}/shodan/host/{}", self.base_url, address);
        let resp = self.client.get(&url).query(&[("key", key)]).send().await?;

        let status = resp.status();
        if !status.is_success() {
            warn!(address, status = status.as_u16(), "intel service returned non-success status");
            return Ok(None);
        }

        let bytes = resp.bytes().await?;
        match serde_json::from_slice::<HostReport>(&bytes) {
            Ok(report) => Ok(Some(report.into_record(address))),
            Err(e) => {
                warn!(address, error = %e, "intel response did not parse");
                Ok(None)
            }
        }
    }
}

/// The simulated record used offline and on every lookup failure.
///
/// Identical for every call except for the address and timestamp.
pub fn mock_record(address: &str) -> IntelRecord {
    IntelRecord {
        address: address.to_string(),
        services: vec!["HTTP".into(), "SSH".into()],
        location: MOCK_LOCATION.to_string(),
        os: "Linux 4.x/5.x".to_string(),
        vulnerabilities: vec!["None Detected (Simulated)".into()],
        provenance: Provenance::Mock,
        fetched_at: now_rfc3339(),
    }
}

// Host report as returned by the enrichment service.
#[derive(Debug, Default, Deserialize)]
struct HostReport {
    #[serde(default)]
    os: Option<String>,
    #[serde(default)]
    city: Option<String>,
    #[serde(default)]
    country_name: Option<String>,
    #[serde(default)]
    ports: Vec<u16>,
    #[serde(default)]
    data: Vec<ServiceBanner>,
    #[serde(default)]
    vulns: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ServiceBanner {
    #[serde(default)]
    port: Option<u16>,
    #[serde(default)]
    product: Option<String>,
    #[serde(default, rename = "_shodan")]
    meta: Option<BannerMeta>,
}

#[derive(Debug, Default, Deserialize)]
struct BannerMeta {
    #[serde(default)]
    module: Option<String>,
}

impl HostReport {
    fn into_record(self, address: &str) -> IntelRecord {
        let mut services: Vec<String> = Vec::new();
        for banner in &self.data {
            let name = banner
                .product
                .clone()
                .or_else(|| banner.meta.as_ref().and_then(|m| m.module.as_ref()).map(|m| m.to_uppercase()))
                .or_else(|| banner.port.map(|p| format!("tcp/{p}")));
            if let Some(name) = name {
                if !services.contains(&name) {
                    services.push(name);
                }
            }
        }
        if services.is_empty() {
            services = self.ports.iter().map(|p| format!("tcp/{p}")).collect();
        }

        let location = match (self.city, self.country_name) {
            (Some(city), Some(country)) => format!("{city}, {country}"),
            (Some(one), None) | (None, Some(one)) => one,
            (None, None) => "Unknown".to_string(),
        };

        IntelRecord {
            address: address.to_string(),
            services,
            location,
            os: self.os.unwrap_or_else(|| "Unknown".to_string()),
            vulnerabilities: self.vulns,
            provenance: Provenance::Live,
            fetched_at: now_rfc3339(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn no_key_yields_mock() {
        let resolver = IntelResolver::new(&IntelSettings {
            api_key: Some("   ".into()),
            ..IntelSettings::default()
        })
        .unwrap();
        assert!(!resolver.is_live());
        let rec = resolver.resolve("8.8.8.8").await;
        assert_eq!(rec.provenance, Provenance::Mock);
        assert_eq!(rec.location, MOCK_LOCATION);
        assert_eq!(rec.address, "8.8.8.8");
    }

    #[test]
    fn mock_is_deterministic() {
        let a = mock_record("1.1.1.1");
        let b = mock_record("1.1.1.1");
        assert_eq!(a.services, b.services);
        assert_eq!(a.location, b.location);
        assert_eq!(a.os, b.os);
        assert_eq!(a.vulnerabilities, b.vulnerabilities);
    }

    #[test]
    fn host_report_maps_fields() {
        let json = r#"{
            "ip_str": "93.184.216.34",
            "os": null,
            "city": "Norwell",
            "country_name": "United States",
            "ports": [80, 443],
            "data": [
                {"port": 80, "product": "nginx", "_shodan": {"module": "http"}},
                {"port": 443, "_shodan": {"module": "https"}},
                {"port": 8080, "product": "nginx"}
            ],
            "vulns": ["CVE-2021-23017"]
        }"#;
        let report: HostReport = serde_json::from_str(json).unwrap();
        let rec = report.into_record("93.184.216.34");
        assert_eq!(rec.services, vec!["nginx".to_string(), "HTTPS".to_string()]);
        assert_eq!(rec.location, "Norwell, United States");
        assert_eq!(rec.os, "Unknown");
        assert_eq!(rec.vulnerabilities, vec!["CVE-2021-23017".to_string()]);
        assert_eq!(rec.provenance, Provenance::Live);
    }

    #[test]
    fn sparse_report_falls_back_to_ports() {
        let report: HostReport = serde_json::from_str(r#"{"ports": [22]}"#).unwrap();
        let rec = report.into_record("h");
        assert_eq!(rec.services, vec!["tcp/22".to_string()]);
        assert_eq!(rec.location, "Unknown");
    }
}
