use std::collections::HashSet;
use std::fs;
use std::path::Path;

use crate::error::{Error, Result};

/// Parse a port list into a deduplicated list of TCP ports (1..=65535).
///
/// Entries are separated by commas and/or newlines:
/// - single port number: `80`
/// - inclusive range: `8000-8010`
/// - comments: everything after `#` on a line is ignored
///
/// Order of first appearance is preserved.
pub fn parse_ports_str(s: &str) -> Result<Vec<u16>> {
    let mut out: Vec<u16> = Vec::new();
    let mut seen = HashSet::new();

    for (idx, raw_line) in s.lines().enumerate() {
        let line_no = idx + 1;
        let line = raw_line.split('#').next().unwrap_or("");

        for item in line.split(',').map(str::trim).filter(|i| !i.is_empty()) {
            if let Some((a, b)) = item.split_once('-') {
                let start = parse_port(a.trim(), line_no)?;
                let end = parse_port(b.trim(), line_no)?;
                if start > end {
                    return Err(Error::InvalidPort(format!(
                        "line {line_no}: invalid range {start}-{end} (start > end)"
                    )));
                }
                for p in start..=end {
                    if seen.insert(p) {
                        out.push(p);
                    }
                }
                continue;
            }

            let p = parse_port(item, line_no)?;
            if seen.insert(p) {
                out.push(p);
            }
        }
    }

    Ok(out)
}

/// Load a port list from a file path. Errors if the file cannot be read or parsed.
pub fn load_ports_from_path(path: impl AsRef<Path>) -> Result<Vec<u16>> {
    let content = fs::read_to_string(path.as_ref())?;
    parse_ports_str(&content)
}

/// Ports probed by a manual scan when the caller gives none.
pub fn default_scan_ports() -> Vec<u16> {
    vec![22, 80, 443, 3389, 8000, 8080, 8443]
}

/// Ports probed on every harvested address during autonomous recon.
pub fn default_recon_ports() -> Vec<u16> {
    vec![80, 443, 22, 8080]
}

/// Render a port list back into the comma form accepted by [`parse_ports_str`].
pub fn format_ports(ports: &[u16]) -> String {
    ports
        .iter()
        .map(u16::to_string)
        .collect::<Vec<_>>()
        .join(",")
}

fn parse_port(s: &str, line_no: usize) -> Result<u16> {
    let val: u32 = s
        .parse()
        .map_err(|_| Error::InvalidPort(format!("line {line_no}: invalid port value: {s}")))?;
    if val == 0 || val > 65535 {
        return Err(Error::InvalidPort(format!(
            "line {line_no}: port out of range: {val}"
        )));
    }
    Ok(val as u16)
}
