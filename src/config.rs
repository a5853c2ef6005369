//! Engine configuration: defaults, optional TOML file, environment overlay.

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::error::{Error, Result};
use crate::geo::DEFAULT_GEO_BASE_URL;
use crate::harvest::{SimulatedSource, TOPICS};
use crate::identity::DEFAULT_IDENTITY_URL;
use crate::intel::{IntelSettings, DEFAULT_INTEL_BASE_URL};
use crate::logging::{LogConfig, LogFormat};
use crate::ports::{default_recon_ports, default_scan_ports, format_ports, parse_ports_str};
use crate::probe::DEFAULT_CONCURRENCY;
use crate::proxy::{ProxyConfig, DEFAULT_TOR_PROXY};
use crate::recon::ReconSettings;
use crate::scanner::ScanOptions;

/// File looked up in the working directory when no `--config` is given.
pub const DEFAULT_CONFIG_FILE: &str = "ghostscan.toml";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub scan: ScanSection,
    pub proxy: ProxySection,
    pub intel: IntelSection,
    pub recon: ReconSection,
    pub logging: LogConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ScanSection {
    pub concurrency: usize,
    pub timeout_ms: u64,
    /// Probe timeout used whenever traffic goes through the proxy.
    pub proxied_timeout_ms: u64,
    pub ports: String,
}

impl Default for ScanSection {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_CONCURRENCY,
            timeout_ms: 1000,
            proxied_timeout_ms: 2000,
            ports: format_ports(&default_scan_ports()),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ProxySection {
    /// e.g. `socks5://127.0.0.1:9050`. Unset means direct connections.
    pub endpoint: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct IntelSection {
    pub api_key: Option<String>,
    pub base_url: String,
    pub timeout_ms: u64,
    pub geo_base_url: String,
    pub identity_url: String,
}

impl Default for IntelSection {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: DEFAULT_INTEL_BASE_URL.to_string(),
            timeout_ms: 10_000,
            geo_base_url: DEFAULT_GEO_BASE_URL.to_string(),
            identity_url: DEFAULT_IDENTITY_URL.to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ReconSection {
    pub interval_secs: u64,
    pub ports: String,
    pub batch_size: usize,
    pub harvest_delay_ms: u64,
    /// Proxy every wave is forced through.
    pub proxy_endpoint: String,
    pub topics: Vec<String>,
}

impl Default for ReconSection {
    fn default() -> Self {
        Self {
            interval_secs: 10,
            ports: format_ports(&default_recon_ports()),
            batch_size: 5,
            harvest_delay_ms: 2000,
            proxy_endpoint: DEFAULT_TOR_PROXY.to_string(),
            topics: TOPICS.iter().map(|t| t.to_string()).collect(),
        }
    }
}

impl EngineConfig {
    /// Load from a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Configuration(format!("failed to read config file {}: {e}", path.display()))
        })?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// `path` if given, else `ghostscan.toml` if present, else defaults. Then the environment.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let base = match path {
            Some(p) => Self::from_file(p)?,
            None if Path::new(DEFAULT_CONFIG_FILE).exists() => Self::from_file(DEFAULT_CONFIG_FILE)?,
            None => Self::default(),
        };
        base.merge_env()
    }

    /// Overlay `GHOSTSCAN_*` variables and `SHODAN_API_KEY` from the process environment.
    pub fn merge_env(self) -> Result<Self> {
        self.merge_env_from(|key| std::env::var(key).ok())
    }

    pub fn merge_env_from<F>(mut self, get: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(val) = get("GHOSTSCAN_PROXY") {
            self.proxy.endpoint = Some(val);
        }
        if let Some(val) = get("GHOSTSCAN_CONCURRENCY") {
            self.scan.concurrency = parse_env("GHOSTSCAN_CONCURRENCY", &val)?;
        }
        if let Some(val) = get("GHOSTSCAN_TIMEOUT_MS") {
            self.scan.timeout_ms = parse_env("GHOSTSCAN_TIMEOUT_MS", &val)?;
        }
        if let Some(val) = get("GHOSTSCAN_RECON_INTERVAL_SECS") {
            self.recon.interval_secs = parse_env("GHOSTSCAN_RECON_INTERVAL_SECS", &val)?;
        }
        if let Some(val) = get("SHODAN_API_KEY") {
            self.intel.api_key = Some(val);
        }
        if let Some(val) = get("GHOSTSCAN_LOG_LEVEL") {
            self.logging.level = val;
        }
        if let Some(val) = get("GHOSTSCAN_LOG_FORMAT") {
            self.logging.format = val.parse::<LogFormat>().map_err(Error::Configuration)?;
        }
        Ok(self)
    }

    /// Check every value the engine will parse later, so bad config fails at startup.
    pub fn validate(&self) -> Result<()> {
        if self.scan.concurrency == 0 {
            return Err(Error::Configuration("scan.concurrency must be > 0".into()));
        }
        if self.scan.timeout_ms == 0 || self.scan.proxied_timeout_ms == 0 {
            return Err(Error::Configuration("scan timeouts must be > 0".into()));
        }
        if self.intel.timeout_ms == 0 {
            return Err(Error::Configuration("intel.timeout_ms must be > 0".into()));
        }
        if self.recon.topics.is_empty() {
            return Err(Error::Configuration("recon.topics must not be empty".into()));
        }
        self.proxy()?;
        self.recon_proxy()?;
        parse_ports_str(&self.scan.ports)?;
        parse_ports_str(&self.recon.ports)?;
        Ok(())
    }

    pub fn proxy(&self) -> Result<Option<ProxyConfig>> {
        ProxyConfig::parse_optional(self.proxy.endpoint.as_deref())
    }

    pub fn recon_proxy(&self) -> Result<ProxyConfig> {
        self.recon.proxy_endpoint.parse()
    }

    pub fn scan_ports(&self) -> Result<Vec<u16>> {
        parse_ports_str(&self.scan.ports)
    }

    /// Scan options for a manual scan through `proxy` (or direct).
    pub fn scan_options(&self, proxy: Option<ProxyConfig>) -> ScanOptions {
        let timeout_ms = if proxy.is_some() {
            self.scan.proxied_timeout_ms
        } else {
            self.scan.timeout_ms
        };
        ScanOptions {
            concurrency: self.scan.concurrency,
            timeout: Duration::from_millis(timeout_ms),
            proxy,
        }
    }

    pub fn intel_settings(&self) -> Result<IntelSettings> {
        Ok(IntelSettings {
            api_key: self.intel.api_key.clone(),
            base_url: self.intel.base_url.clone(),
            timeout: self.intel_timeout(),
            proxy: self.proxy()?,
        })
    }

    pub fn intel_timeout(&self) -> Duration {
        Duration::from_millis(self.intel.timeout_ms)
    }

    pub fn recon_settings(&self) -> Result<ReconSettings> {
        let proxy = self.recon_proxy()?;
        Ok(ReconSettings {
            interval: Duration::from_secs(self.recon.interval_secs),
            ports: parse_ports_str(&self.recon.ports)?,
            scan: self.scan_options(Some(proxy.clone())),
            proxy,
            topics: self.recon.topics.clone(),
            max_waves: None,
        })
    }

    pub fn harvest_source(&self) -> SimulatedSource {
        SimulatedSource {
            batch_size: self.recon.batch_size,
            delay: Duration::from_millis(self.recon.harvest_delay_ms),
        }
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, val: &str) -> Result<T> {
    val.trim()
        .parse()
        .map_err(|_| Error::Configuration(format!("invalid value for {key}: {val}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn defaults_validate() {
        let cfg = EngineConfig::default();
        cfg.validate().unwrap();
        assert_eq!(cfg.proxy().unwrap(), None);
        assert_eq!(cfg.scan_ports().unwrap(), default_scan_ports());
        let recon = cfg.recon_settings().unwrap();
        assert_eq!(recon.ports, default_recon_ports());
        assert_eq!(recon.interval, Duration::from_secs(10));
        assert_eq!(recon.scan.timeout, Duration::from_millis(2000));
    }

    #[test]
    fn toml_overrides_defaults() {
        let cfg = EngineConfig::from_toml(
            r#"
            [scan]
            concurrency = 250
            ports = "80,443"

            [proxy]
            endpoint = "socks5://10.0.0.5:1080"

            [logging]
            format = "json"
            "#,
        )
        .unwrap();
        assert_eq!(cfg.scan.concurrency, 250);
        assert_eq!(cfg.scan.timeout_ms, 1000);
        assert_eq!(cfg.scan_ports().unwrap(), vec![80, 443]);
        assert_eq!(cfg.proxy().unwrap(), Some(ProxyConfig::socks5("10.0.0.5", 1080)));
        assert_eq!(cfg.logging.format, LogFormat::Json);
        let opts = cfg.scan_options(cfg.proxy().unwrap());
        assert_eq!(opts.timeout, Duration::from_millis(2000));
    }

    #[test]
    fn env_overlay() {
        let env: HashMap<&str, &str> = HashMap::from([
            ("GHOSTSCAN_CONCURRENCY", "42"),
            ("SHODAN_API_KEY", "k"),
            ("GHOSTSCAN_PROXY", "socks5://127.0.0.1:9150"),
        ]);
        let cfg = EngineConfig::default()
            .merge_env_from(|k| env.get(k).map(|v| v.to_string()))
            .unwrap();
        assert_eq!(cfg.scan.concurrency, 42);
        assert_eq!(cfg.intel.api_key.as_deref(), Some("k"));
        assert_eq!(cfg.proxy().unwrap().unwrap().port, 9150);
    }

    #[test]
    fn bad_env_value_is_error() {
        let err = EngineConfig::default()
            .merge_env_from(|k| (k == "GHOSTSCAN_TIMEOUT_MS").then(|| "soon".to_string()))
            .unwrap_err();
        assert!(err.is_configuration());
    }

    #[test]
    fn validated_ipv6_proxy_builds_http_clients() {
        let mut cfg = EngineConfig::default();
        cfg.proxy.endpoint = Some("socks5://[::1]:9050".into());
        cfg.validate().unwrap();
        let settings = cfg.intel_settings().unwrap();
        assert!(crate::intel::IntelResolver::new(&settings).is_ok());
    }

    #[test]
    fn malformed_values_fail_validation() {
        let mut cfg = EngineConfig::default();
        cfg.proxy.endpoint = Some("tor".into());
        assert!(cfg.validate().is_err());

        let mut cfg = EngineConfig::default();
        cfg.recon.ports = "0".into();
        assert!(cfg.validate().is_err());

        let mut cfg = EngineConfig::default();
        cfg.scan.concurrency = 0;
        assert!(cfg.validate().is_err());
    }
}
