//! Target resolution: host name to IP, then IP to an approximate location.

use std::net::IpAddr;
use std::time::Duration;

use reqwest::Client;
use serde::{Deserialize, Serialize};
use tokio::net::lookup_host;
use tracing::{info, warn};

use crate::error::{Error, Result};
use crate::http::build_client;
use crate::proxy::ProxyConfig;

pub const DEFAULT_GEO_BASE_URL: &str = "http://ip-api.com";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GeoInfo {
    pub city: String,
    pub country: String,
    pub isp: String,
}

/// What `resolve_target` learned about a host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TargetReport {
    pub target: String,
    pub ip: IpAddr,
    pub geo: Option<GeoInfo>,
}

#[derive(Debug, Deserialize)]
struct GeoResponse {
    #[serde(default)]
    status: String,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    city: String,
    #[serde(default)]
    country: String,
    #[serde(default)]
    isp: String,
}

pub struct GeoLocator {
    client: Client,
    base_url: String,
}

impl GeoLocator {
    pub fn new(base_url: &str, proxy: Option<&ProxyConfig>, timeout: Duration) -> Result<Self> {
        Ok(Self {
            client: build_client(proxy, timeout)?,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    /// Look up `ip`. Any failure is logged and yields `None`.
    pub async fn locate(&self, ip: IpAddr) -> Option<GeoInfo> {
        let url = format!("{}/json/{}", self.base_url, ip);
        let resp = match self.client.get(&url).send().await {
            Ok(resp) => resp,
            Err(e) => {
                warn!(%ip, error = %e, "geolocation request failed");
                return None;
            }
        };
        if !resp.status().is_success() {
            warn!(%ip, status = resp.status().as_u16(), "geolocation service returned non-success status");
            return None;
        }
        match resp.json::<GeoResponse>().await {
            Ok(body) if body.status == "success" => Some(GeoInfo {
                city: body.city,
                country: body.country,
                isp: body.isp,
            }),
            Ok(body) => {
                warn!(%ip, message = body.message.as_deref().unwrap_or("-"), "geo data unavailable");
                None
            }
            Err(e) => {
                warn!(%ip, error = %e, "geolocation response did not parse");
                None
            }
        }
    }
}

/// Resolve `host` to an address, preferring IPv4. IP literals skip DNS.
pub async fn resolve_host(host: &str) -> Result<IpAddr> {
    let host = host.trim();
    if let Ok(ip) = host.parse::<IpAddr>() {
        return Ok(ip);
    }
    if host.is_empty() {
        return Err(Error::InvalidTarget("empty host".into()));
    }
    let addrs: Vec<IpAddr> = lookup_host((host, 0u16))
        .await
        .map_err(|_| Error::Resolution { host: host.to_string() })?
        .map(|sa| sa.ip())
        .collect();
    addrs
        .iter()
        .find(|ip| ip.is_ipv4())
        .or_else(|| addrs.first())
        .copied()
        .ok_or_else(|| Error::Resolution { host: host.to_string() })
}

/// Resolve `target`, then geolocate it. Only resolution failure is an error.
pub async fn resolve_target(locator: &GeoLocator, target: &str) -> Result<TargetReport> {
    let ip = resolve_host(target).await?;
    info!(target, %ip, "target resolved");
    let geo = locator.locate(ip).await;
    Ok(TargetReport {
        target: target.trim().to_string(),
        ip,
        geo,
    })
}
