// Hostname resolution: invokes an external resolver subprocess (rather
// than a DNS crate) so operators can point it at whatever resolution
// mechanism their network actually uses, consistent with the SNMP fetch
// primitive's subprocess-first design.

use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;
use tokio::time::timeout;

use crate::error::{EngineError, Result};

const RESOLVE_TIMEOUT: Duration = Duration::from_secs(3);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    pub ip: String,
    pub hostname: String,
}

/// Runs `resolver_bin` with one IP per line on stdin and expects
/// `<ip> <hostname>` lines back on stdout, one per resolved address.
/// Addresses the resolver could not name are simply absent from the
/// output rather than erroring the whole batch.
pub async fn resolve_batch(resolver_bin: &str, ips: &[String]) -> Result<Vec<Resolution>> {
    use tokio::io::AsyncWriteExt;

    let mut child = Command::new(resolver_bin)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .map_err(|e| EngineError::Io {
            operation: format!("spawn resolver `{resolver_bin}`"),
            source: e,
        })?;

    if let Some(mut stdin) = child.stdin.take() {
        let input = ips.join("\n");
        stdin.write_all(input.as_bytes()).await.ok();
    }

    let output = timeout(RESOLVE_TIMEOUT, child.wait_with_output())
        .await
        .map_err(|_| EngineError::Io {
            operation: "resolver timeout".to_string(),
            source: std::io::Error::new(std::io::ErrorKind::TimedOut, "resolver timed out"),
        })?
        .map_err(|e| EngineError::Io { operation: "resolver wait".to_string(), source: e })?;

    let text = String::from_utf8_lossy(&output.stdout);
    Ok(parse_resolutions(&text))
}

fn parse_resolutions(text: &str) -> Vec<Resolution> {
    text.lines()
        .filter_map(|line| {
            let mut parts = line.split_whitespace();
            let ip = parts.next()?;
            let hostname = parts.next()?;
            Some(Resolution { ip: ip.to_string(), hostname: hostname.to_string() })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_resolutions_skips_unresolved() {
        let out = parse_resolutions("10.0.0.1 core-switch\n10.0.0.2\n10.0.0.3 floor2-switch\n");
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].hostname, "core-switch");
        assert_eq!(out[1].ip, "10.0.0.3");
    }

    #[test]
    fn test_parse_resolutions_empty_input() {
        assert!(parse_resolutions("").is_empty());
    }
}
