use std::net::{IpAddr, Ipv4Addr};

use ipnet::{IpNet, Ipv4Net};

use crate::error::{Error, Result};
use crate::types::Target;

/// Largest CIDR (in host addresses) accepted in a target list.
pub const MAX_CIDR_HOSTS: usize = 65_536;

/// Parse a target list such as `"127.0.0.1, example.com 10.0.0.0/30"`.
///
/// Entries are separated by commas or whitespace. CIDRs expand to their host
/// addresses; anything else is kept as given (IP literal or host name).
/// Duplicates are kept.
pub fn parse_targets(list: &str) -> Result<Vec<Target>> {
    let mut out = Vec::new();
    for item in list
        .split(|c: char| c == ',' || c.is_whitespace())
        .filter(|s| !s.is_empty())
    {
        if item.contains('/') {
            let net: IpNet = item
                .parse()
                .map_err(|e| Error::InvalidTarget(format!("invalid CIDR {item}: {e}")))?;
            let hosts = expand_cidr_to_ips(net)?;
            out.extend(hosts.into_iter().map(|ip| Target::new(ip.to_string())));
        } else {
            out.push(Target::new(item));
        }
    }
    Ok(out)
}

/// Expand a CIDR into individual host addresses.
///
/// For IPv4, excludes the network and broadcast addresses of networks larger
/// than /31. IPv6 networks are rejected.
pub fn expand_cidr_to_ips(cidr: IpNet) -> Result<Vec<IpAddr>> {
    match cidr {
        IpNet::V4(n4) => {
            if n4.prefix_len() < 16 {
                return Err(Error::InvalidTarget(format!(
                    "{cidr} is larger than {MAX_CIDR_HOSTS} addresses"
                )));
            }
            Ok(expand_ipv4net_hosts(n4).into_iter().map(IpAddr::V4).collect())
        }
        IpNet::V6(_) => Err(Error::InvalidTarget(format!(
            "{cidr}: IPv6 ranges are not expanded"
        ))),
    }
}

fn expand_ipv4net_hosts(net: Ipv4Net) -> Vec<Ipv4Addr> {
    let start = u32::from(net.network());
    let end = u32::from(net.broadcast());
    if net.prefix_len() >= 31 {
        return (start..=end).map(Ipv4Addr::from).collect();
    }
    (start + 1..end).map(Ipv4Addr::from).collect()
}
