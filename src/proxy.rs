use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Endpoint used when autonomous recon forces proxy routing and nothing else is configured.
pub const DEFAULT_TOR_PROXY: &str = "socks5://127.0.0.1:9050";

/// Proxy protocols the dialer can delegate to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProxyKind {
    Socks5,
}

/// A parsed and validated proxy endpoint.
///
/// Built once when configuration is loaded; the dialer and HTTP clients only
/// ever see this structured form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProxyConfig {
    pub kind: ProxyKind,
    pub host: String,
    pub port: u16,
}

impl ProxyConfig {
    pub fn socks5(host: impl Into<String>, port: u16) -> Self {
        Self {
            kind: ProxyKind::Socks5,
            host: host.into(),
            port,
        }
    }

    /// Parse an optional endpoint string; `None` or a blank string means direct dialing.
    pub fn parse_optional(endpoint: Option<&str>) -> Result<Option<Self>> {
        match endpoint.map(str::trim) {
            None | Some("") => Ok(None),
            Some(s) => s.parse().map(Some),
        }
    }

    /// `host:port`, with IPv6 hosts bracketed.
    pub fn authority(&self) -> String {
        if self.host.contains(':') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }

    /// URL form for HTTP clients. `socks5h` makes the proxy resolve host names.
    pub fn url(&self) -> String {
        match self.kind {
            ProxyKind::Socks5 => format!("socks5h://{}", self.authority()),
        }
    }
}

impl fmt::Display for ProxyConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            ProxyKind::Socks5 => write!(f, "socks5://{}", self.authority()),
        }
    }
}

impl FromStr for ProxyConfig {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let (scheme, rest) = s
            .split_once("://")
            .ok_or_else(|| Error::invalid_proxy(s, "expected scheme://host:port"))?;

        let kind = match scheme.to_ascii_lowercase().as_str() {
            "socks5" | "socks5h" => ProxyKind::Socks5,
            other => {
                return Err(Error::invalid_proxy(
                    s,
                    format!("unsupported scheme '{other}'"),
                ))
            }
        };

        let rest = rest.trim_end_matches('/');
        let (host, port) = rest
            .rsplit_once(':')
            .ok_or_else(|| Error::invalid_proxy(s, "missing port"))?;
        let host = host.trim_start_matches('[').trim_end_matches(']');
        if host.is_empty() {
            return Err(Error::invalid_proxy(s, "missing host"));
        }
        if host.contains(['@', '/']) {
            return Err(Error::invalid_proxy(s, "credentials and paths are not supported"));
        }
        let port: u16 = port
            .parse()
            .map_err(|_| Error::invalid_proxy(s, format!("invalid port '{port}'")))?;
        if port == 0 {
            return Err(Error::invalid_proxy(s, "port must be in 1-65535"));
        }

        Ok(Self {
            kind,
            host: host.to_string(),
            port,
        })
    }
}
