// Uplink-tree inference.
//
// Given each switch's trunk ports and the management MACs observed on
// them, pick a root (the switch whose trunk ports collectively see the
// most other switches) and recursively attach every other switch under
// the trunk port that uniquely dominates it.

use std::collections::{HashMap, HashSet};

use crate::error::{EngineError, Result};
use crate::store::Store;

const MAX_DEPTH: u32 = 30;

/// child switch IP -> (parent switch IP, parent-side port number).
pub type Edges = Vec<(String, String, i64)>;

/// Scores each switch by how many distinct switch MACs are visible across
/// its trunk ports, and returns the switch IP with the highest score,
/// breaking ties by ascending IP (so the result is stable across runs
/// with identical visibility).
pub fn select_root(store: &Store, switch_macs: &HashMap<String, String>) -> Result<String> {
    let mut scored: Vec<(String, usize)> = Vec::new();

    for ip in store.online_switch_ips()? {
        let trunks = store.trunk_ports_with_macs(&ip)?;
        let mut seen_switches: HashSet<&str> = HashSet::new();
        for (_, macs) in &trunks {
            for mac in macs {
                if switch_macs.values().any(|m| m == mac) {
                    seen_switches.insert(mac.as_str());
                }
            }
        }
        scored.push((ip, seen_switches.len()));
    }

    scored.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));

    scored
        .into_iter()
        .next()
        .map(|(ip, _)| ip)
        .ok_or_else(|| EngineError::TopologyDepthExceeded { max_depth: 0 })
}

/// Recursively builds the uplink tree rooted at `root_ip`. For every
/// trunk port on the current switch that is visible from more than one
/// other switch's vantage, the unique dominating child is the other
/// switch whose own trunk-port visibility set is the *smallest* superset
/// containing this port's MACs — ambiguity (no unique dominator) is an
/// error rather than a silent guess.
pub fn build_tree(store: &Store, root_ip: &str, switch_macs: &HashMap<String, String>) -> Result<Edges> {
    let mac_to_switch: HashMap<&str, &str> =
        switch_macs.iter().map(|(ip, mac)| (mac.as_str(), ip.as_str())).collect();

    let mut edges = Edges::new();
    let mut visited: HashSet<String> = HashSet::new();
    visited.insert(root_ip.to_string());

    recurse(store, root_ip, &mac_to_switch, &mut visited, &mut edges, 0)?;
    Ok(edges)
}

fn recurse(
    store: &Store,
    switch_ip: &str,
    mac_to_switch: &HashMap<&str, &str>,
    visited: &mut HashSet<String>,
    edges: &mut Edges,
    depth: u32,
) -> Result<()> {
    if depth >= MAX_DEPTH {
        return Err(EngineError::TopologyDepthExceeded { max_depth: MAX_DEPTH });
    }

    let trunks = store.trunk_ports_with_macs(switch_ip)?;
    for (port, macs) in trunks {
        let children: HashSet<&str> = macs
            .iter()
            .filter_map(|mac| mac_to_switch.get(mac.as_str()).copied())
            .filter(|child| !visited.contains(*child) && *child != switch_ip)
            .collect();

        match children.len() {
            0 => continue,
            1 => {
                let child = *children.iter().next().unwrap();
                visited.insert(child.to_string());
                edges.push((child.to_string(), switch_ip.to_string(), port));
                recurse(store, child, mac_to_switch, visited, edges, depth + 1)?;
            }
            _ => {
                return Err(EngineError::TopologyAmbiguous {
                    switch_ip: switch_ip.to_string(),
                    port,
                });
            }
        }
    }
    Ok(())
}

/// One full inference pass: select root, build the tree, persist both
/// the authoritative `switchparent` table and an append-only snapshot.
pub fn infer_and_persist(store: &mut Store, stamp: f64) -> Result<Edges> {
    let ips = store.online_switch_ips()?;
    let mut switch_macs = HashMap::new();
    for ip in &ips {
        if let Some(mac) = store.switch_mac(ip)? {
            switch_macs.insert(ip.clone(), mac);
        }
    }

    let root = select_root(store, &switch_macs)?;
    let edges = build_tree(store, &root, &switch_macs)?;

    store.replace_topology(&edges, stamp)?;
    store.append_topology_snapshot(&edges, stamp)?;
    Ok(edges)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{PortRow, Store};

    fn two_switch_store() -> (Store, HashMap<String, String>) {
        let mut store = Store::open_in_memory().unwrap();
        store
            .replace_switch_cycle(
                "10.0.0.1",
                Some("aa-aa-aa-aa-aa-01"),
                "Core",
                1.0,
                true,
                1,
                &[PortRow { port_num: 1, port_desc: "Gi0/1".into(), port_type: "TRUNK".into(), is_root: "".into() }],
                &[crate::store::MacRow { vlan: 1, mac: "aa-aa-aa-aa-aa-02".into(), port: 1 }],
            )
            .unwrap();
        store
            .replace_switch_cycle(
                "10.0.0.2",
                Some("aa-aa-aa-aa-aa-02"),
                "Floor2",
                1.0,
                true,
                1,
                &[PortRow { port_num: 1, port_desc: "Gi0/1".into(), port_type: "TRUNK".into(), is_root: "".into() }],
                &[crate::store::MacRow { vlan: 1, mac: "aa-aa-aa-aa-aa-01".into(), port: 1 }],
            )
            .unwrap();

        let mut macs = HashMap::new();
        macs.insert("10.0.0.1".to_string(), "aa-aa-aa-aa-aa-01".to_string());
        macs.insert("10.0.0.2".to_string(), "aa-aa-aa-aa-aa-02".to_string());
        (store, macs)
    }

    #[test]
    fn test_two_switch_topology_picks_core_as_root_and_attaches_floor2() {
        let (store, macs) = two_switch_store();
        let root = select_root(&store, &macs).unwrap();
        assert_eq!(root, "10.0.0.1");

        let edges = build_tree(&store, &root, &macs).unwrap();
        assert_eq!(edges, vec![("10.0.0.2".to_string(), "10.0.0.1".to_string(), 1)]);
    }

    #[test]
    fn test_root_tiebreak_is_ascending_ip() {
        let mut store = Store::open_in_memory().unwrap();
        for ip in ["10.0.0.9", "10.0.0.2"] {
            store
                .replace_switch_cycle(ip, None, "sw", 1.0, true, 0, &[], &[])
                .unwrap();
        }
        let root = select_root(&store, &HashMap::new()).unwrap();
        assert_eq!(root, "10.0.0.2");
    }
}
