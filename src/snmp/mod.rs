// SNMP fetch primitive: shells out to an external `snmpbulkwalk`-compatible
// binary per OID and normalizes its output lines into typed values. This
// engine never speaks SNMP on the wire itself; the subprocess does, which
// keeps MIB/version quirks out of the engine and lets operators swap in
// whatever walker their environment already trusts.

use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;
use tokio::time::timeout;

use crate::error::{EngineError, Result};

/// dot1dTpFdbTable: vlan-qualified, bridgePort-indexed MAC forwarding table.
pub const OID_FDB_PORT: &str = "1.3.6.1.2.1.17.4.3.1.2";
pub const OID_FDB_STATUS: &str = "1.3.6.1.2.1.17.4.3.1.3";
/// dot1dStpPortTable: spanning-tree port -> base bridge port.
pub const OID_STP_PORT: &str = "1.3.6.1.2.1.17.2.15.1.3";
/// dot1dBasePortIfIndex: bridge port -> ifIndex.
pub const OID_BASE_PORT_IFINDEX: &str = "1.3.6.1.2.1.17.1.4.1.2";
/// ifDescr.
pub const OID_IF_DESCR: &str = "1.3.6.1.2.1.2.2.1.2";
/// ipNetToMediaPhysAddress (ARP table).
pub const OID_ARP_TABLE: &str = "1.3.6.1.2.1.4.22.1.2";
/// sysDescr, used as the switch's description when no config override exists.
pub const OID_SYS_DESCR: &str = "1.3.6.1.2.1.1.1.0";

const ARP_TIMEOUT: Duration = Duration::from_secs(2);
const SWITCH_TIMEOUT: Duration = Duration::from_secs(4);

/// A single normalized result row: the trailing numeric index component
/// of the walked OID, paired with its normalized value.
#[derive(Debug, Clone, PartialEq)]
pub struct WalkRow {
    pub index: String,
    pub value: NormalizedValue,
}

#[derive(Debug, Clone, PartialEq)]
pub enum NormalizedValue {
    Integer(i64),
    Text(String),
    /// Canonical `aa-bb-cc-dd-ee-ff` form, recognized from a Hex-STRING or
    /// raw-octet STRING reply that looks MAC-shaped.
    Mac(String),
}

impl NormalizedValue {
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            NormalizedValue::Integer(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_text(&self) -> String {
        match self {
            NormalizedValue::Integer(n) => n.to_string(),
            NormalizedValue::Text(s) => s.clone(),
            NormalizedValue::Mac(m) => m.clone(),
        }
    }
}

/// Invokes `snmpbulkwalk` for one OID against one host, with one retry on
/// timeout or non-zero exit before the caller treats the device as
/// unreachable. `community_timeout` selects the ARP vs. switch-poll
/// budget; both are independent of tokio's cooperative scheduling, so a
/// wedged subprocess cannot stall the rest of the cycle indefinitely.
pub async fn bulk_walk(host: &str, community: &str, oid: &str, is_arp: bool) -> Result<Vec<WalkRow>> {
    let budget = if is_arp { ARP_TIMEOUT } else { SWITCH_TIMEOUT };

    match run_walk_once(host, community, oid, budget).await {
        Ok(rows) => Ok(rows),
        Err(_) => run_walk_once(host, community, oid, budget).await,
    }
}

async fn run_walk_once(host: &str, community: &str, oid: &str, budget: Duration) -> Result<Vec<WalkRow>> {
    let spawn = Command::new("snmpbulkwalk")
        .args(["-v2c", "-c", community, "-O", "qn", "-t", "1", "-r", "1", host, oid])
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .output();

    let output = timeout(budget, spawn)
        .await
        .map_err(|_| EngineError::SnmpWalkFailed {
            host: host.to_string(),
            oid: oid.to_string(),
            reason: "timed out".to_string(),
        })?
        .map_err(|e| EngineError::SnmpProcessFailed {
            host: host.to_string(),
            reason: e.to_string(),
        })?;

    if !output.status.success() {
        return Err(EngineError::SnmpProcessFailed {
            host: host.to_string(),
            reason: format!("snmpbulkwalk exited with {}", output.status),
        });
    }

    let text = String::from_utf8_lossy(&output.stdout);
    Ok(parse_walk_output(oid, &text))
}

/// Parses `snmpbulkwalk -O qn` output: lines of `<oid><index-suffix>
/// <value>`, where `<value>` carries an optional `Hex-STRING:`/`STRING:`/
/// `INTEGER:` tag. `index` is everything after `base_oid.`, which may be
/// several dot-separated components (e.g. the ARP table's
/// `ifIndex.ip1.ip2.ip3.ip4`) — callers that need a single trailing
/// component split it themselves. Falls back to the last component alone
/// if a reply's OID doesn't carry `base_oid` as a prefix.
pub fn parse_walk_output(base_oid: &str, text: &str) -> Vec<WalkRow> {
    let prefix = format!("{}.", base_oid.trim_start_matches('.'));
    text.lines()
        .filter_map(|line| {
            let line = line.trim();
            if line.is_empty() {
                return None;
            }
            let mut parts = line.splitn(2, char::is_whitespace);
            let oid = parts.next()?.trim_start_matches('.');
            let rest = parts.next().unwrap_or("").trim();
            let index = oid
                .strip_prefix(prefix.as_str())
                .map(|s| s.to_string())
                .or_else(|| oid.rsplit('.').next().map(|s| s.to_string()))?;
            Some(WalkRow {
                index,
                value: normalize_value(rest),
            })
        })
        .collect()
}

/// Normalizes one raw reply value. Recognizes explicit type tags first,
/// then falls back to shape-sniffing: six colon- or space-separated hex
/// octets is a MAC regardless of tag.
fn normalize_value(raw: &str) -> NormalizedValue {
    let raw = raw.trim();

    if let Some(rest) = raw.strip_prefix("INTEGER:") {
        if let Ok(n) = rest.trim().parse::<i64>() {
            return NormalizedValue::Integer(n);
        }
    }
    if let Ok(n) = raw.parse::<i64>() {
        return NormalizedValue::Integer(n);
    }

    let stripped = raw
        .strip_prefix("Hex-STRING:")
        .or_else(|| raw.strip_prefix("STRING:"))
        .unwrap_or(raw)
        .trim();

    if let Some(mac) = mac_from_hex_octets(stripped) {
        return NormalizedValue::Mac(mac);
    }

    NormalizedValue::Text(stripped.trim_matches('"').to_string())
}

fn mac_from_hex_octets(s: &str) -> Option<String> {
    let octets: Vec<&str> = s.split_whitespace().collect();
    if octets.len() != 6 {
        return None;
    }
    let mut groups = Vec::with_capacity(6);
    for o in octets {
        if o.len() > 2 || !o.chars().all(|c| c.is_ascii_hexdigit()) {
            return None;
        }
        groups.push(format!("{:0>2}", o.to_lowercase()));
    }
    Some(groups.join("-"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_integer_row() {
        let rows = parse_walk_output(OID_IF_DESCR, ".1.3.6.1.2.1.2.2.1.2.10 INTEGER: 24\n");
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].index, "10");
        assert_eq!(rows[0].value, NormalizedValue::Integer(24));
    }

    #[test]
    fn test_parse_hex_string_mac_row() {
        let rows = parse_walk_output(OID_FDB_STATUS, ".1.3.6.1.2.1.17.4.3.1.3.100 Hex-STRING: AA BB CC DD EE FF \n");
        assert_eq!(rows[0].value, NormalizedValue::Mac("aa-bb-cc-dd-ee-ff".to_string()));
    }

    #[test]
    fn test_parse_plain_string_row() {
        let rows = parse_walk_output(OID_IF_DESCR, ".1.3.6.1.2.1.2.2.1.2.5 STRING: \"Gi0/5\"\n");
        assert_eq!(rows[0].value, NormalizedValue::Text("Gi0/5".to_string()));
    }

    #[test]
    fn test_parse_skips_blank_lines() {
        let rows = parse_walk_output(OID_IF_DESCR, "\n\n.1.3.6.1.2.1.2.2.1.2.5 STRING: \"x\"\n\n");
        assert_eq!(rows.len(), 1);
    }

    #[test]
    fn test_parse_keeps_full_multi_component_index_for_arp_table() {
        let rows = parse_walk_output(
            OID_ARP_TABLE,
            ".1.3.6.1.2.1.4.22.1.2.5.10.0.0.42 Hex-STRING: AA BB CC DD EE FF\n",
        );
        assert_eq!(rows[0].index, "5.10.0.0.42");
    }

    #[test]
    fn test_normalize_bare_integer_without_tag() {
        match normalize_value("42") {
            NormalizedValue::Integer(42) => {}
            other => panic!("expected Integer(42), got {other:?}"),
        }
    }
}
