// Domain error types for the discovery/topology/netflow engine.
// Mirrors the three error classes the engine distinguishes: transient
// per-device failures, data-shape failures in the join-strategy, and
// structural failures in topology inference.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    /// SNMP walk against a device failed or timed out.
    #[error("SNMP walk failed for {host} ({oid}): {reason}")]
    SnmpWalkFailed {
        host: String,
        oid: String,
        reason: String,
    },

    /// The external walker process exited non-zero or could not be spawned.
    #[error("SNMP walker process failed for {host}: {reason}")]
    SnmpProcessFailed { host: String, reason: String },

    /// No join-strategy could be accepted for a switch after discovery.
    #[error("no valid join strategy for {switch_ip}: {reason}")]
    StrategyRejected { switch_ip: String, reason: String },

    /// A previously cached strategy failed structural validation on replay.
    #[error("cached strategy invalid for {switch_ip}: {reason}")]
    StrategyInvalidated { switch_ip: String, reason: String },

    /// Topology inference could not resolve a unique dominating child.
    #[error("topology inference ambiguous at switch {switch_ip}, port {port}")]
    TopologyAmbiguous { switch_ip: String, port: i64 },

    /// Topology recursion exceeded the maximum depth.
    #[error("topology inference exceeded max depth ({max_depth})")]
    TopologyDepthExceeded { max_depth: u32 },

    /// The store (SQLite) returned an error.
    #[error("store error during {operation}: {source}")]
    Store {
        operation: String,
        #[source]
        source: rusqlite::Error,
    },

    /// Configuration file could not be parsed.
    #[error("invalid configuration at {location}: {reason}")]
    Config { location: String, reason: String },

    /// A query-layer lookup failed in a way the caller should see as text.
    #[error("query failed: {0}")]
    Query(String),

    /// Flow row could not be classified (address parse failure); caller
    /// should skip the row, not fail the whole tick.
    #[error("flow row skipped: {0}")]
    FlowRowSkipped(String),

    /// I/O failure (sentinel files, subprocess spawn, config read).
    #[error("I/O error during {operation}: {source}")]
    Io {
        operation: String,
        #[source]
        source: std::io::Error,
    },
}

pub type Result<T> = std::result::Result<T, EngineError>;

/// Enriches low-level `Result`s with engine-specific context, the way a
/// bare `io::Error` becomes an actionable `EngineError` at the call site.
pub trait ErrorContext<T> {
    fn with_snmp_context(self, host: &str, oid: &str) -> Result<T>;
    fn with_config_context(self, location: &str) -> Result<T>;
}

impl<T, E: std::fmt::Display> ErrorContext<T> for std::result::Result<T, E> {
    fn with_snmp_context(self, host: &str, oid: &str) -> Result<T> {
        self.map_err(|e| EngineError::SnmpWalkFailed {
            host: host.to_string(),
            oid: oid.to_string(),
            reason: e.to_string(),
        })
    }

    fn with_config_context(self, location: &str) -> Result<T> {
        self.map_err(|e| EngineError::Config {
            location: location.to_string(),
            reason: e.to_string(),
        })
    }
}

impl From<rusqlite::Error> for EngineError {
    fn from(source: rusqlite::Error) -> Self {
        EngineError::Store {
            operation: "query".to_string(),
            source,
        }
    }
}

impl From<std::io::Error> for EngineError {
    fn from(source: std::io::Error) -> Self {
        EngineError::Io {
            operation: "io".to_string(),
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = EngineError::TopologyAmbiguous {
            switch_ip: "10.0.0.1".to_string(),
            port: 24,
        };
        let msg = err.to_string();
        assert!(msg.contains("10.0.0.1"));
        assert!(msg.contains("24"));
    }

    #[test]
    fn test_error_context() {
        let result: std::result::Result<(), &str> = Err("timed out");
        let enriched = result.with_snmp_context("10.0.0.1", "1.3.6.1.2.1.17.4.3.1.1");
        assert!(enriched.is_err());
        let msg = enriched.unwrap_err().to_string();
        assert!(msg.contains("10.0.0.1"));
    }
}
