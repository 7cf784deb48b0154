// Adaptive join-strategy discovery.
//
// Four raw SNMP sub-tables describe one switch's forwarding state:
//   T1  dot1dTpFdbTable     (vlan, mac, bridgePort)
//   T2  dot1dStpPortTable   (stpPort, basePort)
//   T3  dot1dBasePortTable  (basePort, ifIndex)
//   T4  ifTable / ifDescr   (ifIndex, ifDescr)
//
// Not every switch's MIB implementation keeps these four tables joinable
// the same way: some publish T1 ports already as ifIndex (direct T1⋈T4),
// others require routing through T2 and/or T3. This module measures, for
// one switch's table snapshot, which join path actually holds and caches
// the answer so future cycles skip the measurement.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};

/// Threshold for "this column looks like a valid port-number source":
/// fraction of T1 rows whose port value appears at all in the candidate
/// join target.
const PORT_SOURCE_VALIDITY: f64 = 0.90;
/// Threshold for "this join doesn't lose too many rows": fraction of T1
/// rows retained after the join.
const JOIN_ROW_RATIO: f64 = 0.75;

/// One switch's raw sub-table snapshot, already value-normalized.
#[derive(Debug, Clone, Default)]
pub struct RawTables {
    /// (vlan, mac, bridgePort)
    pub t1: Vec<(i64, String, i64)>,
    /// (stpPort, basePort)
    pub t2: Vec<(i64, i64)>,
    /// (basePort, ifIndex)
    pub t3: Vec<(i64, i64)>,
    /// (ifIndex, ifDescr)
    pub t4: Vec<(i64, String)>,
}

/// A resolved, cached join path for one switch. Stored as data (a tagged
/// selection plus recorded predicates), never as ad hoc SQL.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct JoinStrategy {
    pub use_t2: bool,
    pub use_t3: bool,
    pub pred_t1_t2: Option<String>,
    pub pred_t2_t3: Option<String>,
    pub pred_t3_t4: Option<String>,
    pub pred_t1_t3: Option<String>,
    pub pred_t1_t4: Option<String>,
    pub pred_t2_t4: Option<String>,
    /// Human-readable label for the winning tier, e.g. "T1xT4".
    pub port_source: String,
}

/// Result of joining T1 through to T4 for one switch: each FDB row
/// resolved to an interface description (the port name a human reads).
#[derive(Debug, Clone)]
pub struct ResolvedMac {
    pub vlan: i64,
    pub mac: String,
    pub if_index: i64,
    pub if_descr: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Tier {
    T1T4Direct,
    T1T2T4,
    T1T3T4,
    T1T2T3T4,
}

impl Tier {
    fn label(self) -> &'static str {
        match self {
            Tier::T1T4Direct => "T1xT4",
            Tier::T1T2T4 => "T1xT2xT4",
            Tier::T1T3T4 => "T1xT3xT4",
            Tier::T1T2T3T4 => "T1xT2xT3xT4",
        }
    }
}

/// Fraction of `t1_ports` found in `target_keys`.
fn coverage(t1_ports: &[i64], target_keys: &HashSet<i64>) -> f64 {
    if t1_ports.is_empty() {
        return 0.0;
    }
    let hits = t1_ports.iter().filter(|p| target_keys.contains(p)).count();
    hits as f64 / t1_ports.len() as f64
}

/// Runs the 13 candidate adjacency tests and selects the cheapest tier
/// whose joins clear both thresholds. Returns `Err` if no tier validates.
pub fn discover_strategy(tables: &RawTables) -> Result<JoinStrategy> {
    let t1_ports: Vec<i64> = tables.t1.iter().map(|(_, _, p)| *p).collect();

    // --- Tier 1: direct T1 port values already are ifIndex values.
    let t4_keys: HashSet<i64> = tables.t4.iter().map(|(idx, _)| *idx).collect();
    let direct_coverage = coverage(&t1_ports, &t4_keys);
    if direct_coverage >= PORT_SOURCE_VALIDITY {
        let retained = join_row_ratio(&t1_ports, &t4_keys);
        if retained >= JOIN_ROW_RATIO {
            return Ok(JoinStrategy {
                use_t2: false,
                use_t3: false,
                pred_t1_t2: None,
                pred_t2_t3: None,
                pred_t3_t4: None,
                pred_t1_t3: None,
                pred_t1_t4: Some("T1.port = T4.ifIndex".to_string()),
                pred_t2_t4: None,
                port_source: Tier::T1T4Direct.label().to_string(),
            });
        }
    }

    // --- Tier 2: T1 -> T2 (stpPort) -> T4 (ifIndex), bypassing T3.
    // Candidate adjacency: some devices expose dot1dStpPort numbered
    // identically to ifIndex directly (the historical off-by-one fix:
    // earlier designs joined T2.basePort to T4, which silently dropped
    // rows on stacks where basePort and ifIndex diverge; the corrected
    // predicate joins T2.stpPort to T4.ifIndex directly).
    let t2_stp_keys: HashSet<i64> = tables.t2.iter().map(|(stp, _)| *stp).collect();
    if coverage(&t1_ports, &t2_stp_keys) >= PORT_SOURCE_VALIDITY {
        let t2_to_t4: HashMap<i64, i64> = tables
            .t2
            .iter()
            .filter(|(stp, _)| t4_keys.contains(stp))
            .map(|(stp, _)| (*stp, *stp))
            .collect();
        let via_t2: HashSet<i64> = t2_to_t4.keys().copied().collect();
        if join_row_ratio(&t1_ports, &via_t2) >= JOIN_ROW_RATIO {
            return Ok(JoinStrategy {
                use_t2: true,
                use_t3: false,
                pred_t1_t2: Some("T1.port = T2.stpPort".to_string()),
                pred_t2_t3: None,
                pred_t3_t4: None,
                pred_t1_t3: None,
                pred_t1_t4: None,
                pred_t2_t4: Some("T2.stpPort = T4.ifIndex".to_string()),
                port_source: Tier::T1T2T4.label().to_string(),
            });
        }
    }

    // --- Tier 3: T1 -> T3 (basePort) -> T4 (ifIndex), bypassing T2.
    let t3_base_keys: HashSet<i64> = tables.t3.iter().map(|(base, _)| *base).collect();
    if coverage(&t1_ports, &t3_base_keys) >= PORT_SOURCE_VALIDITY {
        let via_t3: HashSet<i64> = tables
            .t3
            .iter()
            .filter(|(_, idx)| t4_keys.contains(idx))
            .map(|(base, _)| *base)
            .collect();
        if join_row_ratio(&t1_ports, &via_t3) >= JOIN_ROW_RATIO {
            return Ok(JoinStrategy {
                use_t2: false,
                use_t3: true,
                pred_t1_t2: None,
                pred_t2_t3: None,
                pred_t3_t4: Some("T3.ifIndex = T4.ifIndex".to_string()),
                pred_t1_t3: Some("T1.port = T3.basePort".to_string()),
                pred_t1_t4: None,
                pred_t2_t4: None,
                port_source: Tier::T1T3T4.label().to_string(),
            });
        }
    }

    // --- Tier 4: full T1 -> T2 -> T3 -> T4 chain.
    let stp_to_base: HashMap<i64, i64> = tables.t2.iter().cloned().collect();
    let base_to_if: HashMap<i64, i64> = tables.t3.iter().cloned().collect();
    let full_chain: HashSet<i64> = tables
        .t2
        .iter()
        .filter_map(|(stp, base)| {
            base_to_if
                .get(base)
                .filter(|idx| t4_keys.contains(idx))
                .map(|_| *stp)
        })
        .collect();
    let full_coverage = coverage(&t1_ports, &full_chain);
    let full_retained = join_row_ratio(&t1_ports, &full_chain);
    if full_coverage >= PORT_SOURCE_VALIDITY && full_retained >= JOIN_ROW_RATIO {
        let _ = stp_to_base;
        return Ok(JoinStrategy {
            use_t2: true,
            use_t3: true,
            pred_t1_t2: Some("T1.port = T2.stpPort".to_string()),
            pred_t2_t3: Some("T2.basePort = T3.basePort".to_string()),
            pred_t3_t4: Some("T3.ifIndex = T4.ifIndex".to_string()),
            pred_t1_t3: None,
            pred_t1_t4: None,
            pred_t2_t4: None,
            port_source: Tier::T1T2T3T4.label().to_string(),
        });
    }

    Err(EngineError::StrategyRejected {
        switch_ip: String::new(),
        reason: format!(
            "no join tier cleared thresholds (direct={direct_coverage:.2}, full={full_coverage:.2})"
        ),
    })
}

fn join_row_ratio(t1_ports: &[i64], target_keys: &HashSet<i64>) -> f64 {
    if t1_ports.is_empty() {
        return 0.0;
    }
    let retained = t1_ports.iter().filter(|p| target_keys.contains(p)).count();
    retained as f64 / t1_ports.len() as f64
}

/// Replays a cached strategy against a fresh table snapshot. Returns an
/// error if the cached predicates no longer validate (e.g. the switch's
/// firmware changed MIB behavior), signalling the caller to re-discover.
pub fn validate_cached(strategy: &JoinStrategy, tables: &RawTables) -> Result<()> {
    let t1_ports: Vec<i64> = tables.t1.iter().map(|(_, _, p)| *p).collect();
    let t4_keys: HashSet<i64> = tables.t4.iter().map(|(idx, _)| *idx).collect();

    let target: HashSet<i64> = match strategy.port_source.as_str() {
        "T1xT4" => t4_keys,
        "T1xT2xT4" => tables
            .t2
            .iter()
            .filter(|(stp, _)| t4_keys.contains(stp))
            .map(|(stp, _)| *stp)
            .collect(),
        "T1xT3xT4" => tables
            .t3
            .iter()
            .filter(|(_, idx)| t4_keys.contains(idx))
            .map(|(base, _)| *base)
            .collect(),
        "T1xT2xT3xT4" => {
            let base_to_if: HashMap<i64, i64> = tables.t3.iter().cloned().collect();
            tables
                .t2
                .iter()
                .filter_map(|(stp, base)| base_to_if.get(base).filter(|idx| t4_keys.contains(idx)).map(|_| *stp))
                .collect()
        }
        other => {
            return Err(EngineError::StrategyInvalidated {
                switch_ip: String::new(),
                reason: format!("unknown cached tier `{other}`"),
            })
        }
    };

    if join_row_ratio(&t1_ports, &target) < JOIN_ROW_RATIO {
        return Err(EngineError::StrategyInvalidated {
            switch_ip: String::new(),
            reason: "cached tier's join row ratio dropped below threshold".to_string(),
        });
    }
    Ok(())
}

/// Applies a validated strategy to resolve every FDB row to an interface
/// description.
pub fn resolve_macs(strategy: &JoinStrategy, tables: &RawTables) -> Vec<ResolvedMac> {
    let if_descr: HashMap<i64, String> = tables.t4.iter().cloned().collect();
    let stp_to_base: HashMap<i64, i64> = tables.t2.iter().cloned().collect();
    let base_to_if: HashMap<i64, i64> = tables.t3.iter().cloned().collect();

    let mut out = Vec::new();
    for (vlan, mac, port) in &tables.t1 {
        let if_index = match strategy.port_source.as_str() {
            "T1xT4" => Some(*port),
            "T1xT2xT4" => Some(*port).filter(|p| if_descr.contains_key(p)),
            "T1xT3xT4" => base_to_if.get(port).copied(),
            "T1xT2xT3xT4" => stp_to_base.get(port).and_then(|base| base_to_if.get(base)).copied(),
            _ => None,
        };
        let Some(if_index) = if_index else { continue };
        let Some(descr) = if_descr.get(&if_index) else { continue };
        out.push(ResolvedMac {
            vlan: *vlan,
            mac: mac.clone(),
            if_index,
            if_descr: descr.clone(),
        });
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_tables_direct() -> RawTables {
        RawTables {
            t1: vec![(1, "aa-bb-cc-dd-ee-01".to_string(), 10), (1, "aa-bb-cc-dd-ee-02".to_string(), 11)],
            t2: vec![],
            t3: vec![],
            t4: vec![(10, "Gi0/10".to_string()), (11, "Gi0/11".to_string())],
        }
    }

    #[test]
    fn test_discovers_direct_tier_when_t1_matches_t4() {
        let strategy = discover_strategy(&sample_tables_direct()).unwrap();
        assert_eq!(strategy.port_source, "T1xT4");
        assert!(!strategy.use_t2 && !strategy.use_t3);
    }

    #[test]
    fn test_discovers_full_chain_when_t3_empty_but_t2_t3_present() {
        let tables = RawTables {
            t1: vec![(1, "aa-bb-cc-dd-ee-01".to_string(), 5)],
            t2: vec![(5, 100)],
            t3: vec![(100, 10)],
            t4: vec![(10, "Gi0/10".to_string())],
        };
        let strategy = discover_strategy(&tables).unwrap();
        assert_eq!(strategy.port_source, "T1xT2xT3xT4");
    }

    #[test]
    fn test_rejects_when_no_tier_clears_threshold() {
        let tables = RawTables {
            t1: vec![(1, "aa-bb-cc-dd-ee-01".to_string(), 999)],
            t2: vec![],
            t3: vec![],
            t4: vec![(10, "Gi0/10".to_string())],
        };
        assert!(discover_strategy(&tables).is_err());
    }

    #[test]
    fn test_resolve_macs_direct_tier() {
        let tables = sample_tables_direct();
        let strategy = discover_strategy(&tables).unwrap();
        let resolved = resolve_macs(&strategy, &tables);
        assert_eq!(resolved.len(), 2);
        assert_eq!(resolved[0].if_descr, "Gi0/10");
    }

    #[test]
    fn test_validate_cached_rejects_stale_strategy() {
        let tables = sample_tables_direct();
        let strategy = discover_strategy(&tables).unwrap();
        let drifted = RawTables {
            t4: vec![(99, "Gi0/99".to_string())],
            ..tables
        };
        assert!(validate_cached(&strategy, &drifted).is_err());
    }
}
