// MAC address canonicalization and partial-match support.
//
// Canonical form: lowercase, hyphen-separated six groups, e.g. `aa-bb-cc-dd-ee-ff`.
// Accepted inputs: `:`- or `-`-separated, three-group (`aabb-ccdd-eeff`) or
// six-group, any case. A partial MAC is any substring whose non-separator
// characters are hex and whose hyphen mask is a prefix of the canonical
// pattern — separators are only valid immediately after a completed
// two-hex-digit group (position 2, 4, 6, 8 or 10), never mid-group.

#[derive(Debug, thiserror::Error)]
#[error("not a recognizable MAC address: {0}")]
pub struct MacParseError(pub String);

/// Normalizes any accepted MAC representation to canonical form.
pub fn canonicalize_mac(input: &str) -> Result<String, MacParseError> {
    let hex_only: String = input
        .chars()
        .filter(|c| c.is_ascii_hexdigit())
        .collect::<String>()
        .to_lowercase();

    if hex_only.len() != 12 {
        return Err(MacParseError(input.to_string()));
    }

    let groups: Vec<String> = hex_only
        .as_bytes()
        .chunks(2)
        .map(|pair| std::str::from_utf8(pair).unwrap().to_string())
        .collect();

    Ok(groups.join("-"))
}

/// True if `candidate` is a prefix-consistent partial MAC: every
/// non-separator character is hex, and a separator only ever appears
/// immediately after a completed two-hex-digit group — the same
/// position a separator would fall on in the canonical six-group form.
pub fn is_partial_mac(candidate: &str) -> bool {
    let normalized = candidate.replace(':', "-");
    let mut hex_count = 0usize;
    let mut last_was_sep = true; // leading separator is never valid

    for c in normalized.chars() {
        if c == '-' {
            if last_was_sep || hex_count == 0 || hex_count % 2 != 0 || hex_count >= 12 {
                return false;
            }
            last_was_sep = true;
        } else if c.is_ascii_hexdigit() {
            hex_count += 1;
            if hex_count > 12 {
                return false;
            }
            last_was_sep = false;
        } else {
            return false;
        }
    }

    hex_count >= 1
}

/// Canonicalizes a partial MAC substring for use in a `LIKE`-style search:
/// lowercases hex, normalizes any `:` to `-`, leaves length as given.
pub fn canonicalize_partial(candidate: &str) -> String {
    candidate.to_lowercase().replace(':', "-")
}

/// Builds a canonical MAC from six decimal-string octets, the shape a
/// walked `dot1dTpFdbTable` index row carries its MAC address in
/// (`<vlan>.<mac-octet-1>.<mac-octet-2>...<mac-octet-6>` once the vlan
/// component is split off by the caller). Returns `None` if there
/// aren't exactly six parts or any part isn't a valid `u8`.
pub fn mac_from_decimal_octets(parts: &[&str]) -> Option<String> {
    if parts.len() != 6 {
        return None;
    }
    let mut groups = Vec::with_capacity(6);
    for p in parts {
        let octet: u8 = p.parse().ok()?;
        groups.push(format!("{octet:02x}"));
    }
    Some(groups.join("-"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_canonicalize_colon_six_group() {
        assert_eq!(canonicalize_mac("aa:bb:cc:dd:ee:ff").unwrap(), "aa-bb-cc-dd-ee-ff");
    }

    #[test]
    fn test_canonicalize_dot_three_group() {
        assert_eq!(canonicalize_mac("AABB.CCDD.EEFF").unwrap(), "aa-bb-cc-dd-ee-ff");
    }

    #[test]
    fn test_canonicalize_hyphen_three_group() {
        assert_eq!(canonicalize_mac("aabb-ccdd-eeff").unwrap(), "aa-bb-cc-dd-ee-ff");
    }

    #[test]
    fn test_canonicalize_is_idempotent() {
        let once = canonicalize_mac("AA:BB:CC:DD:EE:FF").unwrap();
        let twice = canonicalize_mac(&once).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn test_rejects_short_input() {
        assert!(canonicalize_mac("aabbcc").is_err());
    }

    #[test]
    fn test_partial_mac_accepts_prefix() {
        assert!(is_partial_mac("aa-bb-cc"));
        assert!(is_partial_mac("aabbcc"));
        assert!(!is_partial_mac("zz-bb"));
    }

    #[test]
    fn test_partial_mac_rejects_separator_mid_group() {
        assert!(!is_partial_mac("a-abbcc"));
        assert!(!is_partial_mac("aabbc-c"));
    }

    #[test]
    fn test_mac_from_decimal_octets_builds_canonical_mac() {
        let parts = ["170", "187", "204", "221", "238", "255"];
        assert_eq!(mac_from_decimal_octets(&parts).unwrap(), "aa-bb-cc-dd-ee-ff");
    }

    #[test]
    fn test_mac_from_decimal_octets_rejects_wrong_length() {
        assert!(mac_from_decimal_octets(&["1", "2", "3"]).is_none());
    }
}
