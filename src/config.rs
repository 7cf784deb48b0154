// Line-oriented `key=value` configuration loader.
//
// Lines starting with `#` are comments. Outside a `START_SWITCHES` /
// `END_SWITCHES` fence, recognized keys configure site parameters; inside
// the fence, each line is `ipaddr=description` for one managed switch.
// An `AP=mac=name` line (outside the fence) appends an access point.

use std::collections::HashMap;
use std::path::Path;

use crate::error::{EngineError, Result};
use crate::mac::canonicalize_mac;

#[derive(Debug, Clone)]
pub struct SwitchConfig {
    pub ip: String,
    pub description: String,
}

#[derive(Debug, Clone)]
pub struct AccessPointConfig {
    pub mac: String,
    pub name: String,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub network: String,
    pub maskbits: u8,
    pub gateway: String,
    pub community: String,
    pub threads_seed: usize,
    /// (switchIP, portNum) forced to TRUNK regardless of observed MACs.
    pub bypass: Vec<(String, i64)>,
    pub switches: Vec<SwitchConfig>,
    pub access_points: Vec<AccessPointConfig>,
}

impl Config {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| EngineError::Config {
            location: path.display().to_string(),
            reason: e.to_string(),
        })?;
        Self::parse(&text)
    }

    pub fn parse(text: &str) -> Result<Self> {
        let mut params: HashMap<String, String> = HashMap::new();
        let mut bypass = Vec::new();
        let mut switches = Vec::new();
        let mut access_points = Vec::new();
        let mut in_switches = false;

        for line in text.lines() {
            let trimmed = line.trim();
            if trimmed.len() <= 1 {
                continue;
            }
            if trimmed.starts_with('#') {
                continue;
            }
            if trimmed.contains("START_SWITCHES") {
                in_switches = true;
                continue;
            }
            if trimmed.contains("END_SWITCHES") {
                in_switches = false;
                continue;
            }

            let Some((key, value)) = trimmed.split_once('=') else {
                continue;
            };

            if in_switches {
                switches.push(SwitchConfig {
                    ip: key.trim().to_string(),
                    description: value.trim().to_string(),
                });
                continue;
            }

            match key.trim() {
                "AP" => {
                    let Some((mac, name)) = value.split_once('=') else {
                        continue;
                    };
                    access_points.push(AccessPointConfig {
                        mac: canonicalize_mac(mac.trim()).unwrap_or_else(|_| mac.trim().to_lowercase()),
                        name: name.trim().to_string(),
                    });
                }
                "bypass" => {
                    let Some((ip, port)) = value.split_once('=') else {
                        continue;
                    };
                    if let Ok(port_num) = port.trim().parse::<i64>() {
                        bypass.push((ip.trim().to_string(), port_num));
                    }
                }
                other => {
                    params.insert(other.to_string(), value.trim().to_string());
                }
            }
        }

        let get = |k: &str| -> Result<String> {
            params
                .get(k)
                .cloned()
                .ok_or_else(|| EngineError::Config {
                    location: "config file".to_string(),
                    reason: format!("missing required key `{k}`"),
                })
        };

        Ok(Config {
            network: get("NETWORK")?,
            maskbits: get("MASKBITS")?.parse().map_err(|_| EngineError::Config {
                location: "MASKBITS".to_string(),
                reason: "not a valid integer".to_string(),
            })?,
            gateway: get("gateway")?,
            community: params.get("community").cloned().unwrap_or_else(|| "public".to_string()),
            threads_seed: params
                .get("THREADS")
                .and_then(|v| v.parse().ok())
                .unwrap_or(10),
            bypass,
            switches,
            access_points,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
# sample config
NETWORK=10.0.0.0
MASKBITS=24
gateway=10.0.0.1
community=public
THREADS=10
bypass=10.0.0.5=24
AP=aa:bb:cc:dd:ee:ff=Lobby-AP
START_SWITCHES
10.0.0.5=Core-Switch
10.0.0.6=Floor2-Switch
END_SWITCHES
"#;

    #[test]
    fn test_parse_full_config() {
        let cfg = Config::parse(SAMPLE).unwrap();
        assert_eq!(cfg.network, "10.0.0.0");
        assert_eq!(cfg.maskbits, 24);
        assert_eq!(cfg.gateway, "10.0.0.1");
        assert_eq!(cfg.switches.len(), 2);
        assert_eq!(cfg.switches[0].ip, "10.0.0.5");
        assert_eq!(cfg.access_points.len(), 1);
        assert_eq!(cfg.access_points[0].name, "Lobby-AP");
        assert_eq!(cfg.bypass, vec![("10.0.0.5".to_string(), 24)]);
    }

    #[test]
    fn test_missing_required_key() {
        let err = Config::parse("gateway=10.0.0.1\n").unwrap_err();
        assert!(err.to_string().contains("NETWORK"));
    }

    #[test]
    fn test_comments_ignored() {
        let cfg = Config::parse("# NETWORK=ignored\nNETWORK=10.0.0.0\nMASKBITS=24\ngateway=10.0.0.1\n").unwrap();
        assert_eq!(cfg.network, "10.0.0.0");
    }
}
