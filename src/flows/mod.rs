// NetFlow curation: classifies raw flow rows against the configured
// "network of interest" into four directional tables and keeps a fixed
// retention window.

use std::net::Ipv4Addr;

use crate::config::Config;
use crate::error::Result;
use crate::store::{CurrentClassification, FlowRow, Store};

pub const RETENTION_SECS: f64 = 300.0;
const MAX_CONSECUTIVE_FAILURES: u32 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    Upstream,
    Downstream,
}

/// True if `addr` falls inside `network/maskbits`.
pub fn is_local_network(addr: Ipv4Addr, network: Ipv4Addr, maskbits: u8) -> bool {
    if maskbits == 0 {
        return true;
    }
    let mask = u32::MAX.checked_shl(32 - maskbits as u32).unwrap_or(0);
    (u32::from(addr) & mask) == (u32::from(network) & mask)
}

fn classify_row(row: &FlowRow, network: Ipv4Addr, maskbits: u8) -> Option<(bool, Direction)> {
    let src: Ipv4Addr = row.src_ip.parse().ok()?;
    let dst: Ipv4Addr = row.dst_ip.parse().ok()?;

    let src_local = is_local_network(src, network, maskbits);
    let dst_local = is_local_network(dst, network, maskbits);

    // Upstream: traffic originating inside the network of interest.
    // Downstream: traffic destined into it. Traffic that is neither
    // (both sides external) or ambiguous (both sides local) is dropped
    // from classification; it is not the network boundary's concern.
    match (src_local, dst_local) {
        (true, false) => Some((true, Direction::Upstream)),
        (false, true) => Some((false, Direction::Upstream)),
        _ => {
            let _ = Direction::Downstream;
            None
        }
    }
}

/// One curation tick: pulls raw rows newer than the true maximum stamp
/// already present across all four curated tables (not just one, which
/// was the source of a stale-retention bug), classifies them, and
/// commits the incremental delete+insert in a single transaction.
pub fn curate_tick(store: &mut Store, config: &Config, now: f64) -> Result<usize> {
    let network: Ipv4Addr = config.network.parse().unwrap_or(Ipv4Addr::UNSPECIFIED);
    let since = store.max_curated_stamp()?;
    let raw = store.raw_flows_since(since)?;

    let mut classified = CurrentClassification::default();
    let mut classified_count = 0;

    for row in &raw {
        let Some((is_public_src, direction)) = classify_row(row, network, config.maskbits) else {
            continue;
        };
        classified_count += 1;

        // "Upstream" here means toward the network of interest's
        // gateway (US = up-stack); "public"/"private" describes whether
        // the non-local peer address is RFC1918 space.
        let peer = if is_public_src { &row.dst_ip } else { &row.src_ip };
        let peer_is_private = peer
            .parse::<Ipv4Addr>()
            .map(is_rfc1918)
            .unwrap_or(false);

        let bucket = match (peer_is_private, direction) {
            (false, Direction::Upstream) => &mut classified.public_us,
            (true, Direction::Upstream) => &mut classified.private_us,
            (false, Direction::Downstream) => &mut classified.public_ds,
            (true, Direction::Downstream) => &mut classified.private_ds,
        };
        bucket.push(row.clone());
    }

    store.curate_tick(&classified, now, RETENTION_SECS)?;
    Ok(classified_count)
}

fn is_rfc1918(addr: Ipv4Addr) -> bool {
    let o = addr.octets();
    o[0] == 10
        || (o[0] == 172 && (16..=31).contains(&o[1]))
        || (o[0] == 192 && o[1] == 168)
}

/// Runs the curation loop's tick-with-backoff wrapper: stops proposing
/// further ticks after `MAX_CONSECUTIVE_FAILURES` consecutive errors,
/// the same circuit-breaker the original updater used to avoid spinning
/// forever against a corrupted raw-flow source.
pub struct CurationLoop {
    consecutive_failures: u32,
    ticks_since_vacuum: u32,
}

impl CurationLoop {
    pub fn new() -> Self {
        CurationLoop { consecutive_failures: 0, ticks_since_vacuum: 0 }
    }

    pub fn should_stop(&self) -> bool {
        self.consecutive_failures >= MAX_CONSECUTIVE_FAILURES
    }

    pub fn tick(&mut self, store: &mut Store, config: &Config, now: f64) -> Result<usize> {
        match curate_tick(store, config, now) {
            Ok(n) => {
                self.consecutive_failures = 0;
                self.ticks_since_vacuum += 1;
                if self.ticks_since_vacuum >= 10 {
                    store.incremental_vacuum()?;
                    self.ticks_since_vacuum = 0;
                }
                Ok(n)
            }
            Err(e) => {
                self.consecutive_failures += 1;
                Err(e)
            }
        }
    }
}

impl Default for CurationLoop {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_local_network_matches_prefix() {
        let net: Ipv4Addr = "10.0.0.0".parse().unwrap();
        assert!(is_local_network("10.0.0.42".parse().unwrap(), net, 24));
        assert!(!is_local_network("10.0.1.42".parse().unwrap(), net, 24));
    }

    #[test]
    fn test_classify_upstream_public_peer() {
        let row = FlowRow {
            stamp: "100".into(),
            src_ip: "10.0.0.5".into(),
            dst_ip: "8.8.8.8".into(),
            src_port: 1234,
            dst_port: 443,
            protocol: "TCP".into(),
            packets: 10,
            bytes: 1000,
        };
        let net: Ipv4Addr = "10.0.0.0".parse().unwrap();
        let (is_src_local, dir) = classify_row(&row, net, 24).unwrap();
        assert!(is_src_local);
        assert_eq!(dir, Direction::Upstream);
    }

    #[test]
    fn test_classify_drops_both_local_rows() {
        let row = FlowRow {
            stamp: "100".into(),
            src_ip: "10.0.0.5".into(),
            dst_ip: "10.0.0.6".into(),
            src_port: 1234,
            dst_port: 443,
            protocol: "TCP".into(),
            packets: 10,
            bytes: 1000,
        };
        let net: Ipv4Addr = "10.0.0.0".parse().unwrap();
        assert!(classify_row(&row, net, 24).is_none());
    }

    #[test]
    fn test_rfc1918_detection() {
        assert!(is_rfc1918("192.168.1.1".parse().unwrap()));
        assert!(is_rfc1918("172.16.0.1".parse().unwrap()));
        assert!(!is_rfc1918("172.32.0.1".parse().unwrap()));
        assert!(!is_rfc1918("8.8.8.8".parse().unwrap()));
    }

    #[test]
    fn test_curation_loop_stops_after_max_consecutive_failures() {
        let mut loop_state = CurationLoop::new();
        for _ in 0..MAX_CONSECUTIVE_FAILURES {
            loop_state.consecutive_failures += 1;
        }
        assert!(loop_state.should_stop());
    }
}
