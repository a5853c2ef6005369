use std::time::Duration;

use reqwest::Client;
use serde::Deserialize;
use tracing::info;

use crate::error::{Error, Result};
use crate::http::build_client;
use crate::proxy::ProxyConfig;

pub const DEFAULT_IDENTITY_URL: &str = "https://api.ipify.org?format=json";

#[derive(Debug, Deserialize)]
struct IdentityResponse {
    ip: Option<String>,
}

/// Reports the public address remote hosts see, i.e. whether the proxy is in effect.
pub struct IdentityChecker {
    client: Client,
    url: String,
}

impl IdentityChecker {
    pub fn new(url: &str, proxy: Option<&ProxyConfig>, timeout: Duration) -> Result<Self> {
        Ok(Self {
            client: build_client(proxy, timeout)?,
            url: url.to_string(),
        })
    }

    pub async fn current_ip(&self) -> Result<String> {
        let resp = self.client.get(&self.url).send().await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(Error::Status {
                url: self.url.clone(),
                status: status.as_u16(),
            });
        }
        let body: IdentityResponse = resp.json().await?;
        let ip = body.ip.filter(|ip| !ip.is_empty()).ok_or_else(|| Error::MalformedResponse {
            url: self.url.clone(),
            reason: "missing 'ip' field".into(),
        })?;
        info!(%ip, "current outgoing identity");
        Ok(ip)
    }
}
