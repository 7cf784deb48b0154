// Read-only query API over the store. Every function here is a pure
// lookup: none of them write.

use std::collections::{HashMap, VecDeque};
use std::net::Ipv4Addr;

use rusqlite::{params, OptionalExtension};
use serde::Serialize;

use crate::error::{EngineError, Result};
use crate::mac::{canonicalize_mac, canonicalize_partial, is_partial_mac};
use crate::store::{FlowRow, Store};

const MINUTES_MIN: f64 = 0.33;
const MINUTES_MAX: f64 = 5.0;
const SERVICE_LABEL_CACHE_CAPACITY: usize = 32;

#[derive(Debug, Clone, Serialize)]
pub struct SwitchStatus {
    pub switch_ip: String,
    pub switch_desc: String,
    pub online: bool,
    pub trunk_count: usize,
    pub access_count: usize,
    pub switch_mac: Option<String>,
    pub vendor: Option<String>,
    pub stamp: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct PortInfo {
    pub port_num: i64,
    pub port_desc: String,
    pub port_type: String,
    pub is_root: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct MacHistoryEntry {
    pub stamp: f64,
    pub mac: String,
    pub vlan: i64,
    pub ip: Option<String>,
    pub vendor: Option<String>,
    pub hostname: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct MacSearchHit {
    pub stamp: f64,
    pub switch_ip: String,
    pub port: i64,
    pub mac: String,
    pub vlan: i64,
    pub ip: Option<String>,
    pub vendor: Option<String>,
    pub hostname: Option<String>,
    pub switch_desc: String,
    pub switch_mac: Option<String>,
    pub access_point_name: Option<String>,
}

/// One hop of a `topology(switchIP)` walk from the given switch up to
/// the root. `parent_port` is the port on `parent_ip` the hop attaches
/// through; the spec's third tuple element (its "rootPort") has no
/// separate per-switch concept in this store beyond that parent-side
/// port, so it is carried here as the parent switch's own IP — see
/// DESIGN.md's Open Question note.
#[derive(Debug, Clone, Serialize)]
pub struct TopologyHop {
    pub parent_port: i64,
    pub switch_ip: String,
    pub parent_ip: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct AccessHostEntry {
    pub mac: String,
    pub vlan: i64,
    pub ip: Option<String>,
    pub vendor: Option<String>,
    pub hostname: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PortReportEntry {
    pub port_num: i64,
    pub port_desc: String,
    pub port_type: String,
    pub is_root: bool,
    pub access_hosts: Vec<AccessHostEntry>,
    /// (parent switch IP, parent-side port) when this is the ROOT port.
    pub parent_link: Option<(String, i64)>,
    /// The child switch attached through this port, if any.
    pub child_switch: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RemoteEndpoint {
    pub ip: String,
    pub port: i64,
    pub proto: String,
    pub bytes: i64,
    pub formatted: String,
    pub service_label: Option<String>,
}

#[derive(Debug, Clone, Serialize, Default)]
pub struct NetflowStats {
    pub rows: usize,
    pub total_bytes: i64,
    pub total_packets: i64,
    pub avg_speed: String,
    pub top_remote: Vec<RemoteEndpoint>,
}

pub fn status(store: &Store, switch_ip: Option<&str>) -> Result<Vec<SwitchStatus>> {
    let conn = store.conn();
    let mut stmt = conn.prepare(
        "SELECT switchIP, switchDesc, switchStatus, switchMAC, stamp FROM switch
         WHERE (?1 IS NULL OR switchIP = ?1) ORDER BY switchIP",
    )?;
    let rows = stmt.query_map(params![switch_ip], |r| {
        Ok((
            r.get::<_, String>(0)?,
            r.get::<_, String>(1)?,
            r.get::<_, String>(2)?,
            r.get::<_, Option<String>>(3)?,
            r.get::<_, f64>(4)?,
        ))
    })?;

    let mut out = Vec::new();
    for row in rows {
        let (switch_ip, switch_desc, status, switch_mac, stamp) = row?;
        let online = status.starts_with("ONLINE");
        let trunk_count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM switchport WHERE switchIP = ?1 AND portType = 'TRUNK'",
            params![switch_ip],
            |r| r.get(0),
        )?;
        let access_count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM switchport WHERE switchIP = ?1 AND portType = 'ACCESS'",
            params![switch_ip],
            |r| r.get(0),
        )?;
        let vendor = match &switch_mac {
            Some(mac) => store.vendor_for_mac(mac)?,
            None => None,
        };
        out.push(SwitchStatus {
            switch_ip,
            switch_desc,
            online,
            trunk_count: trunk_count as usize,
            access_count: access_count as usize,
            switch_mac,
            vendor,
            stamp,
        });
    }
    Ok(out)
}

pub fn switchport(store: &Store, switch_ip: &str, port_num: i64) -> Result<(PortInfo, Vec<MacHistoryEntry>)> {
    let conn = store.conn();
    let info = conn
        .query_row(
            "SELECT portNum, portDesc, portType, isRoot FROM switchport WHERE switchIP = ?1 AND portNum = ?2",
            params![switch_ip, port_num],
            |r| {
                Ok(PortInfo {
                    port_num: r.get(0)?,
                    port_desc: r.get(1)?,
                    port_type: r.get(2)?,
                    is_root: r.get::<_, Option<String>>(3)?.as_deref() == Some("ROOT"),
                })
            },
        )
        .optional()?
        .ok_or_else(|| EngineError::Query(format!("switch {switch_ip} has no port {port_num}")))?;

    let mut stmt = conn.prepare(
        "SELECT stamp, mac, vlan FROM macaddress WHERE switchIP = ?1 AND port = ?2 ORDER BY stamp DESC",
    )?;
    let rows = stmt.query_map(params![switch_ip, port_num], |r| {
        Ok((r.get::<_, f64>(0)?, r.get::<_, String>(1)?, r.get::<_, i64>(2)?))
    })?;

    let mut history = Vec::new();
    for row in rows {
        let (stamp, mac, vlan) = row?;
        let ip = store.arp_ip_for_mac(&mac)?;
        let vendor = store.vendor_for_mac(&mac)?;
        let hostname = match &ip {
            Some(ip) => store.hostname_for(ip)?,
            None => None,
        };
        history.push(MacHistoryEntry { stamp, mac, vlan, ip, vendor, hostname });
    }

    Ok((info, history))
}

/// Shared enrichment for `ipSearch`/`macSearch`/`macSearchPartial`:
/// matches `mac {mac_clause}` (always one of `= ?1` or `LIKE ?1`,
/// chosen by the caller, never user-controlled text) against ACCESS
/// ports only, then enriches each hit with ARP/vendor/hostname/AP data.
fn build_hits(store: &Store, mac_clause: &str, mac_param: &str) -> Result<Vec<MacSearchHit>> {
    let conn = store.conn();
    let sql = format!(
        "SELECT m.stamp, m.switchIP, m.port, m.mac, m.vlan, s.switchDesc, s.switchMAC
         FROM macaddress m
         JOIN switchport sp ON sp.switchIP = m.switchIP AND sp.portNum = m.port
         JOIN switch s ON s.switchIP = m.switchIP
         WHERE sp.portType = 'ACCESS' AND m.mac {mac_clause}
         ORDER BY m.stamp DESC"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params![mac_param], |r| {
        Ok((
            r.get::<_, f64>(0)?,
            r.get::<_, String>(1)?,
            r.get::<_, i64>(2)?,
            r.get::<_, String>(3)?,
            r.get::<_, i64>(4)?,
            r.get::<_, String>(5)?,
            r.get::<_, Option<String>>(6)?,
        ))
    })?;

    let mut out = Vec::new();
    for row in rows {
        let (stamp, switch_ip, port, mac, vlan, switch_desc, switch_mac) = row?;
        let ip = store.arp_ip_for_mac(&mac)?;
        let vendor = store.vendor_for_mac(&mac)?;
        let hostname = match &ip {
            Some(ip) => store.hostname_for(ip)?,
            None => None,
        };
        let access_point_name = store.access_point_name(&mac)?;
        out.push(MacSearchHit {
            stamp,
            switch_ip,
            port,
            mac,
            vlan,
            ip,
            vendor,
            hostname,
            switch_desc,
            switch_mac,
            access_point_name,
        });
    }
    Ok(out)
}

/// Resolves `ip` to a MAC via the ARP table, then finds every ACCESS
/// port that MAC was last seen on.
pub fn ip_search(store: &Store, ip: &str) -> Result<Vec<MacSearchHit>> {
    match store.arp_mac_for_ip(ip)? {
        Some(mac) => build_hits(store, "= ?1", &mac),
        None => Ok(Vec::new()),
    }
}

/// Exact match on a canonicalized MAC.
pub fn mac_search(store: &Store, mac: &str) -> Result<Vec<MacSearchHit>> {
    let canonical = canonicalize_mac(mac).unwrap_or_else(|_| mac.to_lowercase());
    build_hits(store, "= ?1", &canonical)
}

/// Partial MAC search: any substring of the canonical form.
pub fn mac_search_partial(store: &Store, partial: &str) -> Result<Vec<MacSearchHit>> {
    if !is_partial_mac(partial) {
        return Ok(Vec::new());
    }
    let needle = canonicalize_partial(partial);
    let pattern = format!("%{needle}%");
    build_hits(store, "LIKE ?1", &pattern)
}

/// Walks `SwitchParent` from `switch_ip` up to the root, one hop per
/// entry, stopping either when a switch has no recorded parent or after
/// the same depth bound topology inference itself enforces.
pub fn topology(store: &Store, switch_ip: &str) -> Result<Vec<TopologyHop>> {
    const MAX_DEPTH: u32 = 30;

    let mut hops = Vec::new();
    let mut current = switch_ip.to_string();
    for _ in 0..MAX_DEPTH {
        let Some((parent_ip, parent_port)) = store.parent_of(&current)? else {
            break;
        };
        hops.push(TopologyHop { parent_port, switch_ip: current.clone(), parent_ip: parent_ip.clone() });
        current = parent_ip;
    }
    Ok(hops)
}

/// Per-port (numeric order) aggregated ACCESS-host view for one switch,
/// with the parent link annotated on its ROOT port and any child switch
/// annotated on the port it hangs off of.
pub fn report(store: &Store, switch_ip: &str) -> Result<Vec<PortReportEntry>> {
    let conn = store.conn();
    let mut stmt = conn.prepare(
        "SELECT portNum, portDesc, portType, isRoot FROM switchport WHERE switchIP = ?1 ORDER BY portNum",
    )?;
    let ports: Vec<(i64, String, String, Option<String>)> = stmt
        .query_map(params![switch_ip], |r| {
            Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?))
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    let mut out = Vec::new();
    for (port_num, port_desc, port_type, is_root_raw) in ports {
        let is_root = is_root_raw.as_deref() == Some("ROOT");

        let access_hosts = if port_type == "ACCESS" {
            let mut hstmt = conn.prepare(
                "SELECT DISTINCT mac, vlan FROM macaddress WHERE switchIP = ?1 AND port = ?2",
            )?;
            let hrows: Vec<(String, i64)> = hstmt
                .query_map(params![switch_ip, port_num], |r| Ok((r.get(0)?, r.get(1)?)))?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            let mut hosts = Vec::with_capacity(hrows.len());
            for (mac, vlan) in hrows {
                let ip = store.arp_ip_for_mac(&mac)?;
                let vendor = store.vendor_for_mac(&mac)?;
                let hostname = match &ip {
                    Some(ip) => store.hostname_for(ip)?,
                    None => None,
                };
                hosts.push(AccessHostEntry { mac, vlan, ip, vendor, hostname });
            }
            hosts
        } else {
            Vec::new()
        };

        let parent_link = if is_root { store.parent_of(switch_ip)? } else { None };
        let child_switch = conn
            .query_row(
                "SELECT switchHijo FROM switchparent WHERE switchPadre = ?1 AND portPadre = ?2",
                params![switch_ip, port_num],
                |r| r.get(0),
            )
            .optional()?;

        out.push(PortReportEntry {
            port_num,
            port_desc,
            port_type,
            is_root,
            access_hosts,
            parent_link,
            child_switch,
        });
    }
    Ok(out)
}

pub fn count_switches_online(store: &Store) -> Result<usize> {
    store.count_online_switches()
}

pub fn is_online(store: &Store, switch_ip: &str) -> Result<bool> {
    Ok(store
        .conn()
        .query_row(
            "SELECT switchStatus FROM switch WHERE switchIP = ?1",
            params![switch_ip],
            |r| r.get::<_, String>(0),
        )
        .optional()?
        .map(|s| s.starts_with("ONLINE"))
        .unwrap_or(false))
}

pub fn is_switch(store: &Store, ip: &str) -> Result<bool> {
    Ok(store
        .conn()
        .query_row("SELECT 1 FROM switch WHERE switchIP = ?1", params![ip], |_| Ok(()))
        .optional()?
        .is_some())
}

pub fn is_access_point(store: &Store, mac: &str) -> Result<bool> {
    let canonical = canonicalize_mac(mac).unwrap_or_else(|_| mac.to_lowercase());
    Ok(store.access_point_name(&canonical)?.is_some())
}

/// Bounded LRU for service-label lookups: a given `(ip, port)` pair's
/// label is cached for the life of one netflow-stats call, the same
/// `functools.lru_cache` role the original Python played over IP
/// lookups, implemented here with a `HashMap` plus eviction queue rather
/// than a new crate dependency.
struct ServiceLabelCache {
    capacity: usize,
    order: VecDeque<(String, i64)>,
    map: HashMap<(String, i64), Option<String>>,
}

impl ServiceLabelCache {
    fn new(capacity: usize) -> Self {
        ServiceLabelCache { capacity, order: VecDeque::new(), map: HashMap::new() }
    }

    fn get_or_lookup(&mut self, store: &Store, ip: &str, port: i64) -> Result<Option<String>> {
        let key = (ip.to_string(), port);
        if let Some(label) = self.map.get(&key) {
            return Ok(label.clone());
        }
        let label = store.service_label(ip)?;
        if self.map.len() >= self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.map.remove(&oldest);
            }
        }
        self.order.push_back(key.clone());
        self.map.insert(key, label.clone());
        Ok(label)
    }
}

fn format_binary_unit(value: f64, units: &[&str]) -> String {
    let mut value = value;
    let mut unit = 0;
    while value >= 1024.0 && unit < units.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    format!("{:.2} {}", value, units[unit])
}

fn format_bytes(bytes: i64) -> String {
    format_binary_unit(bytes as f64, &["B", "KiB", "MiB", "GiB", "TiB"])
}

fn format_bitrate(bits_per_sec: f64) -> String {
    format_binary_unit(bits_per_sec, &["bps", "Kbps", "Mbps", "Gbps", "Tbps"])
}

fn remote_endpoint(row: &FlowRow, host_ip: Option<&str>, network: Ipv4Addr, maskbits: u8) -> (String, i64) {
    if let Some(host) = host_ip {
        return if row.src_ip == host {
            (row.dst_ip.clone(), row.dst_port)
        } else {
            (row.src_ip.clone(), row.src_port)
        };
    }
    let src_local = row
        .src_ip
        .parse::<Ipv4Addr>()
        .map(|a| crate::flows::is_local_network(a, network, maskbits))
        .unwrap_or(false);
    if src_local {
        (row.dst_ip.clone(), row.dst_port)
    } else {
        (row.src_ip.clone(), row.src_port)
    }
}

fn compute_netflow_stats(store: &Store, minutes: f64, host_ip: Option<&str>) -> Result<NetflowStats> {
    let minutes = minutes.clamp(MINUTES_MIN, MINUTES_MAX);
    let seconds = minutes * 60.0;
    let since = (store.max_curated_stamp()? - seconds).max(0.0);

    let network: Ipv4Addr = store
        .get_param("NETWORK")?
        .and_then(|s| s.parse().ok())
        .unwrap_or(Ipv4Addr::UNSPECIFIED);
    let maskbits: u8 = store.get_param("MASKBITS")?.and_then(|s| s.parse().ok()).unwrap_or(0);

    let mut stats = NetflowStats::default();
    let mut remote_totals: HashMap<(String, i64, String), i64> = HashMap::new();

    for table in ["publicus", "privateus", "publicds", "privateds"] {
        for row in store.curated_flows_since(table, since)? {
            if let Some(host) = host_ip {
                if row.src_ip != host && row.dst_ip != host {
                    continue;
                }
            }
            stats.rows += 1;
            stats.total_bytes += row.bytes;
            stats.total_packets += row.packets;

            let (ip, port) = remote_endpoint(&row, host_ip, network, maskbits);
            *remote_totals.entry((ip, port, row.protocol.clone())).or_insert(0) += row.bytes;
        }
    }

    let bits_per_sec = if seconds > 0.0 { (stats.total_bytes as f64 * 8.0) / seconds } else { 0.0 };
    stats.avg_speed = format_bitrate(bits_per_sec);

    let mut ranked: Vec<((String, i64, String), i64)> = remote_totals.into_iter().collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1));
    ranked.truncate(5);

    let mut cache = ServiceLabelCache::new(SERVICE_LABEL_CACHE_CAPACITY);
    for ((ip, port, proto), bytes) in ranked {
        let service_label = cache.get_or_lookup(store, &ip, port)?;
        stats.top_remote.push(RemoteEndpoint { ip, port, proto, bytes, formatted: format_bytes(bytes), service_label });
    }

    Ok(stats)
}

/// `minutes` is clamped to `[0.33, 5.0]` before the lookback window is
/// computed against the true max stamp across all four curated tables.
pub fn netflow_global_stats(store: &Store, minutes: f64) -> Result<NetflowStats> {
    compute_netflow_stats(store, minutes, None)
}

pub fn netflow_host_stats(store: &Store, host_ip: &str, minutes: f64) -> Result<NetflowStats> {
    compute_netflow_stats(store, minutes, Some(host_ip))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MacRow, PortRow};

    fn seeded_store() -> Store {
        let mut store = Store::open_in_memory().unwrap();
        store
            .replace_switch_cycle(
                "10.0.0.1",
                Some("aa-bb-cc-dd-ee-01"),
                "Core",
                1.0,
                true,
                1,
                &[PortRow { port_num: 1, port_desc: "Gi0/1".into(), port_type: "ACCESS".into(), is_root: String::new() }],
                &[MacRow { vlan: 1, mac: "aa-bb-cc-dd-ee-ff".into(), port: 1 }],
            )
            .unwrap();
        store
    }

    #[test]
    fn test_status_reports_online_with_port_counts() {
        let store = seeded_store();
        let statuses = status(&store, None).unwrap();
        assert_eq!(statuses.len(), 1);
        assert!(statuses[0].online);
        assert_eq!(statuses[0].access_count, 1);
        assert_eq!(statuses[0].trunk_count, 0);
    }

    #[test]
    fn test_status_filters_by_switch_ip() {
        let store = seeded_store();
        let statuses = status(&store, Some("10.0.0.1")).unwrap();
        assert_eq!(statuses.len(), 1);
        assert!(status(&store, Some("10.0.0.99")).unwrap().is_empty());
    }

    #[test]
    fn test_switchport_returns_port_info_and_mac_history() {
        let store = seeded_store();
        let (info, history) = switchport(&store, "10.0.0.1", 1).unwrap();
        assert_eq!(info.port_type, "ACCESS");
        assert!(!info.is_root);
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].mac, "aa-bb-cc-dd-ee-ff");
    }

    #[test]
    fn test_switchport_unknown_port_errors() {
        let store = seeded_store();
        assert!(switchport(&store, "10.0.0.1", 99).is_err());
    }

    #[test]
    fn test_mac_search_exact_match() {
        let store = seeded_store();
        let hits = mac_search(&store, "AA:BB:CC:DD:EE:FF").unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].switch_ip, "10.0.0.1");
    }

    #[test]
    fn test_mac_search_partial_match() {
        let store = seeded_store();
        let hits = mac_search_partial(&store, "ee-ff").unwrap();
        assert_eq!(hits.len(), 1);
    }

    #[test]
    fn test_mac_search_excludes_trunk_ports() {
        let mut store = Store::open_in_memory().unwrap();
        store
            .replace_switch_cycle(
                "10.0.0.2",
                None,
                "Floor",
                1.0,
                true,
                1,
                &[PortRow { port_num: 1, port_desc: "Gi0/1".into(), port_type: "TRUNK".into(), is_root: String::new() }],
                &[MacRow { vlan: 1, mac: "aa-bb-cc-dd-ee-ff".into(), port: 1 }],
            )
            .unwrap();
        assert!(mac_search(&store, "aa-bb-cc-dd-ee-ff").unwrap().is_empty());
    }

    #[test]
    fn test_is_switch_and_is_online() {
        let store = seeded_store();
        assert!(is_switch(&store, "10.0.0.1").unwrap());
        assert!(is_online(&store, "10.0.0.1").unwrap());
        assert!(!is_switch(&store, "10.0.0.99").unwrap());
    }

    #[test]
    fn test_topology_walks_up_to_root() {
        let mut store = seeded_store();
        store.replace_switch_cycle("10.0.0.2", None, "Root", 1.0, true, 0, &[], &[]).unwrap();
        store.replace_topology(&[("10.0.0.1".to_string(), "10.0.0.2".to_string(), 24)], 1.0).unwrap();

        let hops = topology(&store, "10.0.0.1").unwrap();
        assert_eq!(hops.len(), 1);
        assert_eq!(hops[0].parent_ip, "10.0.0.2");
        assert_eq!(hops[0].parent_port, 24);
    }

    #[test]
    fn test_report_lists_access_hosts_on_access_port() {
        let store = seeded_store();
        let entries = report(&store, "10.0.0.1").unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].access_hosts.len(), 1);
        assert_eq!(entries[0].access_hosts[0].mac, "aa-bb-cc-dd-ee-ff");
    }

    #[test]
    fn test_netflow_global_stats_clamps_minutes_and_totals_bytes() {
        let mut store = Store::open_in_memory().unwrap();
        store.set_param("NETWORK", "10.0.0.0").unwrap();
        store.set_param("MASKBITS", "24").unwrap();
        store
            .insert_raw_flow(&FlowRow {
                stamp: "100".into(),
                src_ip: "10.0.0.50".into(),
                dst_ip: "8.8.8.8".into(),
                src_port: 5000,
                dst_port: 443,
                protocol: "TCP".into(),
                packets: 5,
                bytes: 500,
            })
            .unwrap();
        let config = crate::config::Config::parse(
            "NETWORK=10.0.0.0\nMASKBITS=24\ngateway=10.0.0.1\n",
        )
        .unwrap();
        crate::flows::curate_tick(&mut store, &config, 100.0).unwrap();

        let stats = netflow_global_stats(&store, 100.0).unwrap();
        assert_eq!(stats.rows, 1);
        assert_eq!(stats.total_bytes, 500);
        assert_eq!(stats.top_remote.len(), 1);
        assert_eq!(stats.top_remote[0].ip, "8.8.8.8");
        assert_eq!(stats.top_remote[0].service_label.as_deref(), Some("Google DNS"));
    }
}
