//! Country code → bidding zone registry.
//!
//! The price API addresses market areas by EIC zone codes rather than plain
//! country codes. Unknown inputs pass through unchanged so a caller can hand
//! in a raw zone id directly.

/// Country code and EIC zone id for every zone the registry knows about.
const ZONES: &[(&str, &str)] = &[
    ("CY", "10YCY-TSO------Q"),
    ("GR", "10YGR-HTSO------"),
    ("DE", "10Y1001A1001A83F"),
    ("FR", "10YFR-RTE------C"),
    ("IT", "10YIT-GRTN-----B"),
    ("ES", "10YES-REE------0"),
    ("NL", "10YNL----------L"),
    ("BE", "10YBE----------2"),
];

/// Resolve a country code to its zone id.
///
/// Matching is case-insensitive. Anything not in the registry is returned
/// as given.
pub fn resolve(country_code: &str) -> String {
    ZONES
        .iter()
        .find(|(code, _)| code.eq_ignore_ascii_case(country_code.trim()))
        .map(|(_, zone)| zone.to_string())
        .unwrap_or_else(|| country_code.to_string())
}

/// All registry entries as `(country_code, zone_id)`, in registry order.
pub fn entries() -> &'static [(&'static str, &'static str)] {
    ZONES
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_code_resolves() {
        assert_eq!(resolve("CY"), "10YCY-TSO------Q");
        assert_eq!(resolve("DE"), "10Y1001A1001A83F");
    }

    #[test]
    fn lookup_ignores_case() {
        assert_eq!(resolve("fr"), "10YFR-RTE------C");
    }

    #[test]
    fn unknown_code_passes_through() {
        assert_eq!(resolve("10YAT-APG------L"), "10YAT-APG------L");
        assert_eq!(resolve("XX"), "XX");
    }

    #[test]
    fn registry_has_no_duplicate_codes() {
        let mut codes: Vec<&str> = entries().iter().map(|(c, _)| *c).collect();
        codes.sort_unstable();
        codes.dedup();
        assert_eq!(codes.len(), entries().len());
    }
}
