use std::time::Duration;

use reqwest::{Client, Proxy};

use crate::error::{Error, Result};
use crate::proxy::ProxyConfig;

const USER_AGENT: &str = concat!("ghostscan/", env!("CARGO_PKG_VERSION"));

/// Build the HTTP client shared by the enrichment, geolocation and identity lookups.
///
/// When a proxy is given every request goes through it, host name resolution
/// included. Without one, proxy environment variables are ignored.
pub fn build_client(proxy: Option<&ProxyConfig>, timeout: Duration) -> Result<Client> {
    if timeout.is_zero() {
        return Err(Error::Configuration("HTTP timeout must be > 0".into()));
    }
    let mut builder = Client::builder()
        .timeout(timeout)
        .connect_timeout(timeout)
        .user_agent(USER_AGENT);
    if let Some(p) = proxy {
        let proxy = Proxy::all(p.url())
            .map_err(|e| Error::invalid_proxy(p.to_string(), e.to_string()))?;
        builder = builder.proxy(proxy);
    } else {
        builder = builder.no_proxy();
    }
    Ok(builder.build()?)
}
