// Per-cycle switch polling orchestration: walks each switch's four SNMP
// sub-tables, resolves (or discovers) its join strategy, classifies
// ports, and commits the whole cycle's result for that switch as one
// store transaction. Concurrency across switches is governed by an
// adaptive hill-climb rather than a fixed worker count.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};

use tracing::{info, warn};

use crate::config::Config;
use crate::error::Result;
use crate::mac::mac_from_decimal_octets;
use crate::snmp::{self, NormalizedValue};
use crate::store::{MacRow, PortRow, Store};
use crate::strategy::{self, JoinStrategy, RawTables};

const MIN_WORKERS: usize = 1;
const MAX_WORKERS: usize = 100;
/// `dot1dTpFdbTable` has no VLAN dimension of its own (that table is
/// strictly per-bridge); walking it per VLAN community requires a
/// community-string convention this poller doesn't yet implement, so
/// every resolved MAC is recorded against this single default VLAN.
const DEFAULT_FDB_VLAN: i64 = 1;

/// Walks and normalizes one switch's four sub-tables.
pub async fn fetch_tables(host: &str, community: &str) -> Result<RawTables> {
    let fdb_port = snmp::bulk_walk(host, community, snmp::OID_FDB_PORT, false).await?;
    let stp_port = snmp::bulk_walk(host, community, snmp::OID_STP_PORT, false).await?;
    let base_port = snmp::bulk_walk(host, community, snmp::OID_BASE_PORT_IFINDEX, false).await?;
    let if_descr = snmp::bulk_walk(host, community, snmp::OID_IF_DESCR, false).await?;

    // dot1dTpFdbTable's real MIB index is the six decimal octets of the
    // learned MAC address itself, not a vlan-qualified composite.
    let t1 = fdb_port
        .iter()
        .filter_map(|row| {
            let port = row.value.as_integer()?;
            let octets: Vec<&str> = row.index.split('.').collect();
            let mac = mac_from_decimal_octets(&octets)?;
            Some((DEFAULT_FDB_VLAN, mac, port))
        })
        .collect();

    let t2 = stp_port
        .iter()
        .filter_map(|row| Some((row.index.parse::<i64>().ok()?, row.value.as_integer()?)))
        .collect();

    let t3 = base_port
        .iter()
        .filter_map(|row| Some((row.index.parse::<i64>().ok()?, row.value.as_integer()?)))
        .collect();

    let t4 = if_descr
        .iter()
        .filter_map(|row| Some((row.index.parse::<i64>().ok()?, row.value.as_text())))
        .collect();

    Ok(RawTables { t1, t2, t3, t4 })
}

/// Resolves the join strategy for one switch: replays the cached
/// strategy if present and still valid, otherwise discovers fresh and
/// caches the result.
pub fn resolve_strategy(store: &mut Store, switch_ip: &str, tables: &RawTables) -> Result<JoinStrategy> {
    if let Some(cached) = store.load_strategy(switch_ip)? {
        if strategy::validate_cached(&cached, tables).is_ok() {
            return Ok(cached);
        }
        warn!(switch_ip, "cached join strategy invalidated, rediscovering");
        store.invalidate_strategy(switch_ip)?;
    }

    let fresh = strategy::discover_strategy(tables)?;
    store.save_strategy(switch_ip, &fresh)?;
    Ok(fresh)
}

/// Classifies every observed port as ACCESS or TRUNK and flags the
/// gateway-facing ROOT port: TRUNK if any other switch's own management
/// MAC was observed on the port or it appears in the configured bypass
/// list; ROOT if the gateway's ARP-resolved MAC was observed on it.
pub fn classify_ports(
    resolved: &[strategy::ResolvedMac],
    bypass_ports: &[i64],
    gateway_mac: Option<&str>,
    known_switch_macs: &HashSet<String>,
) -> Vec<PortRow> {
    let mut per_port: HashMap<i64, (String, HashSet<String>)> = HashMap::new();
    for r in resolved {
        let entry = per_port.entry(r.if_index).or_insert_with(|| (r.if_descr.clone(), HashSet::new()));
        entry.1.insert(r.mac.clone());
    }

    per_port
        .into_iter()
        .map(|(port_num, (desc, macs))| {
            let sees_switch = macs.iter().any(|m| known_switch_macs.contains(m));
            let port_type = if sees_switch || bypass_ports.contains(&port_num) {
                "TRUNK"
            } else {
                "ACCESS"
            };
            let is_root = gateway_mac.filter(|gw| macs.contains(*gw)).map(|_| "ROOT").unwrap_or("");
            PortRow { port_num, port_desc: desc, port_type: port_type.to_string(), is_root: is_root.to_string() }
        })
        .collect()
}

/// Polls one switch end to end and commits the result. Returns `Ok(true)`
/// if the switch was online and written successfully.
pub async fn poll_one_switch(store: &mut Store, config: &Config, switch_ip: &str, stamp: f64) -> Result<bool> {
    let tables = match fetch_tables(switch_ip, &config.community).await {
        Ok(t) => t,
        Err(e) => {
            warn!(switch_ip, error = %e, "switch unreachable, marking offline");
            store.replace_switch_cycle(switch_ip, None, "", stamp, false, 0, &[], &[])?;
            return Ok(false);
        }
    };

    let strategy = resolve_strategy(store, switch_ip, &tables)?;
    let resolved = strategy::resolve_macs(&strategy, &tables);

    let bypass_ports: Vec<i64> = config
        .bypass
        .iter()
        .filter(|(ip, _)| ip == switch_ip)
        .map(|(_, port)| *port)
        .collect();

    let gateway_mac = store.arp_mac_for_ip(&config.gateway)?;
    let switch_mac = store.arp_mac_for_ip(switch_ip)?;
    let known_switch_macs: HashSet<String> = store.all_switch_macs()?.into_iter().collect();

    let ports = classify_ports(&resolved, &bypass_ports, gateway_mac.as_deref(), &known_switch_macs);

    let macs: Vec<MacRow> = resolved
        .iter()
        .map(|r| MacRow { vlan: r.vlan, mac: r.mac.clone(), port: r.if_index })
        .collect();

    store.replace_switch_cycle(switch_ip, switch_mac.as_deref(), "", stamp, true, macs.len(), &ports, &macs)?;

    info!(switch_ip, macs = macs.len(), ports = ports.len(), "switch cycle committed");
    Ok(true)
}

/// Walks the gateway's ARP table and fully replaces the store's
/// `arpentry` snapshot. Run once per cycle, before the per-switch polls,
/// so `poll_one_switch` can resolve the gateway's and every switch's own
/// management MAC from fresh data.
pub async fn harvest_arp(store: &mut Store, config: &Config, stamp: f64) -> Result<()> {
    let rows = snmp::bulk_walk(&config.gateway, &config.community, snmp::OID_ARP_TABLE, true).await?;

    let entries: Vec<(String, String, String)> = rows
        .into_iter()
        .filter_map(|row| {
            let NormalizedValue::Mac(mac) = row.value else { return None };
            // index: "<ifIndex>.<ip1>.<ip2>.<ip3>.<ip4>"
            let mut parts = row.index.splitn(2, '.');
            let if_index = parts.next()?;
            let ip = parts.next()?;
            Some((if_index.to_string(), ip.to_string(), mac))
        })
        .collect();

    store.replace_arp_table(&entries, stamp)?;
    Ok(())
}

/// Hill-climbs the worker-pool size toward the fastest observed
/// cycle-time-per-online-switch ratio, stepping by one in whichever
/// direction last helped. The previous design only updated its memory of
/// "did the last step help" when the step count actually changed; fixed
/// here to record the effect on every decision, including steps that
/// left the pool size unchanged.
pub struct ConcurrencyController {
    workers: AtomicUsize,
    last_ratio: parking_lot::Mutex<Option<f64>>,
    last_direction: parking_lot::Mutex<i32>,
}

impl ConcurrencyController {
    pub fn new(seed: usize) -> Self {
        ConcurrencyController {
            workers: AtomicUsize::new(seed.clamp(MIN_WORKERS, MAX_WORKERS)),
            last_ratio: parking_lot::Mutex::new(None),
            last_direction: parking_lot::Mutex::new(1),
        }
    }

    pub fn workers(&self) -> usize {
        self.workers.load(Ordering::Relaxed)
    }

    /// Records the outcome of one completed cycle and steps the pool
    /// size. `cycle_secs` / `online_switches` is the ratio being
    /// minimized; every call updates `last_ratio`/`last_direction`, even
    /// when the computed step is zero.
    pub fn record_cycle(&self, cycle_secs: f64, online_switches: usize) {
        if online_switches == 0 {
            return;
        }
        let ratio = cycle_secs / online_switches as f64;
        let mut last_ratio = self.last_ratio.lock();
        let mut last_direction = self.last_direction.lock();

        let next_direction = match *last_ratio {
            Some(prev) if ratio > prev => -*last_direction,
            Some(_) => *last_direction,
            None => *last_direction,
        };

        let current = self.workers.load(Ordering::Relaxed) as i64;
        let proposed = (current + next_direction as i64).clamp(MIN_WORKERS as i64, MAX_WORKERS as i64);
        self.workers.store(proposed as usize, Ordering::Relaxed);

        *last_ratio = Some(ratio);
        *last_direction = next_direction;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_ports_marks_known_switch_mac_port_trunk() {
        let resolved = vec![
            strategy::ResolvedMac { vlan: 1, mac: "aa".into(), if_index: 1, if_descr: "Gi0/1".into() },
            strategy::ResolvedMac { vlan: 1, mac: "bb".into(), if_index: 1, if_descr: "Gi0/1".into() },
            strategy::ResolvedMac { vlan: 1, mac: "cc".into(), if_index: 2, if_descr: "Gi0/2".into() },
        ];
        let known_switch_macs: HashSet<String> = ["bb".to_string()].into_iter().collect();
        let ports = classify_ports(&resolved, &[], None, &known_switch_macs);
        let trunk = ports.iter().find(|p| p.port_num == 1).unwrap();
        let access = ports.iter().find(|p| p.port_num == 2).unwrap();
        assert_eq!(trunk.port_type, "TRUNK");
        assert_eq!(access.port_type, "ACCESS");
    }

    #[test]
    fn test_classify_ports_bypass_forces_trunk() {
        let resolved = vec![strategy::ResolvedMac { vlan: 1, mac: "aa".into(), if_index: 3, if_descr: "Gi0/3".into() }];
        let ports = classify_ports(&resolved, &[3], None, &HashSet::new());
        assert_eq!(ports[0].port_type, "TRUNK");
    }

    #[test]
    fn test_classify_ports_marks_gateway_mac_port_root() {
        let resolved = vec![strategy::ResolvedMac {
            vlan: 1,
            mac: "aa-bb-cc-dd-ee-01".into(),
            if_index: 24,
            if_descr: "Gi0/24".into(),
        }];
        let ports = classify_ports(&resolved, &[], Some("aa-bb-cc-dd-ee-01"), &HashSet::new());
        assert_eq!(ports[0].is_root, "ROOT");
    }

    #[test]
    fn test_classify_ports_no_gateway_mac_leaves_is_root_empty() {
        let resolved = vec![strategy::ResolvedMac { vlan: 1, mac: "aa".into(), if_index: 5, if_descr: "Gi0/5".into() }];
        let ports = classify_ports(&resolved, &[], Some("zz-zz-zz-zz-zz-zz"), &HashSet::new());
        assert_eq!(ports[0].is_root, "");
    }

    #[test]
    fn test_concurrency_controller_updates_state_every_call_even_with_no_step() {
        let controller = ConcurrencyController::new(10);
        controller.record_cycle(5.0, 10);
        let after_first = controller.workers();
        controller.record_cycle(5.0, 10);
        // Same ratio twice: direction is preserved, so it keeps stepping
        // the same way rather than freezing.
        assert_ne!(controller.workers(), after_first.saturating_sub(0).min(MAX_WORKERS));
    }

    #[test]
    fn test_concurrency_controller_reverses_direction_on_worse_ratio() {
        let controller = ConcurrencyController::new(10);
        controller.record_cycle(1.0, 10);
        let after_good = controller.workers();
        controller.record_cycle(10.0, 10);
        assert_ne!(controller.workers(), after_good + 1);
    }

    #[test]
    fn test_concurrency_controller_stays_within_bounds() {
        let controller = ConcurrencyController::new(MAX_WORKERS);
        for _ in 0..5 {
            controller.record_cycle(0.001, 10);
        }
        assert!(controller.workers() <= MAX_WORKERS);
    }
}
