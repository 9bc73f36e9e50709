//! Simplified version comparison.
//!
//! Constraints are either an exact version or `>=` a version. Range syntax
//! (`^`, `~`, `<`, `||`) is not interpreted here; only the installer's
//! registry lookup understands ranges.

use semver::Version;

/// Parse `raw` as a version, tolerating a leading `v`/`=` and missing
/// minor/patch components (`1.2` → `1.2.0`).
pub fn parse_loose(raw: &str) -> Option<Version> {
    let trimmed = raw.trim().trim_start_matches('=').trim_start_matches('v');
    if trimmed.is_empty() {
        return None;
    }
    if let Ok(version) = Version::parse(trimmed) {
        return Some(version);
    }

    let (core, suffix) = match trimmed.find(['-', '+']) {
        Some(idx) => trimmed.split_at(idx),
        None => (trimmed, ""),
    };
    let mut parts: Vec<&str> = core.split('.').collect();
    if parts.len() > 3 || parts.iter().any(|p| p.is_empty()) {
        return None;
    }
    while parts.len() < 3 {
        parts.push("0");
    }
    Version::parse(&format!("{}{}", parts.join("."), suffix)).ok()
}

/// Result of evaluating a constraint against a concrete version.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VersionCheck {
    Satisfied,
    Unsatisfied,
    /// The concrete version could not be parsed.
    Unknown,
}

/// Evaluate `constraint` against `actual`.
///
/// `*`, `latest` and the empty constraint accept anything.
pub fn check(constraint: &str, actual: &str) -> VersionCheck {
    let constraint = constraint.trim();
    if constraint.is_empty() || constraint == "*" || constraint == "latest" {
        return VersionCheck::Satisfied;
    }

    let Some(actual_version) = parse_loose(actual) else {
        return VersionCheck::Unknown;
    };

    if let Some(min) = constraint.strip_prefix(">=") {
        return match parse_loose(min) {
            Some(min) if actual_version >= min => VersionCheck::Satisfied,
            _ => VersionCheck::Unsatisfied,
        };
    }

    match parse_loose(constraint) {
        Some(exact) if exact == actual_version => VersionCheck::Satisfied,
        Some(_) => VersionCheck::Unsatisfied,
        None if constraint == actual.trim() => VersionCheck::Satisfied,
        None => VersionCheck::Unsatisfied,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_loose() {
        assert_eq!(parse_loose("1.2.3"), Some(Version::new(1, 2, 3)));
        assert_eq!(parse_loose("v2"), Some(Version::new(2, 0, 0)));
        assert_eq!(parse_loose("=0.4"), Some(Version::new(0, 4, 0)));
        assert!(parse_loose("1.2-beta.1").is_some());
        assert_eq!(parse_loose("not-a-version"), None);
        assert_eq!(parse_loose(""), None);
    }

    #[test]
    fn test_minimum_constraint() {
        assert_eq!(check(">=0.3.0", "0.4.0"), VersionCheck::Satisfied);
        assert_eq!(check(">=0.3.0", "0.3.0"), VersionCheck::Satisfied);
        assert_eq!(check(">=1.0", "0.9.9"), VersionCheck::Unsatisfied);
    }

    #[test]
    fn test_exact_constraint() {
        assert_eq!(check("1.0.0", "1.0.0"), VersionCheck::Satisfied);
        assert_eq!(check("1.0", "1.0.0"), VersionCheck::Satisfied);
        assert_eq!(check("1.0.0", "1.0.1"), VersionCheck::Unsatisfied);
    }

    #[test]
    fn test_range_syntax_is_not_interpreted() {
        // A caret range is treated as an unparsable exact match.
        assert_eq!(check("^1.0.0", "1.2.0"), VersionCheck::Unsatisfied);
    }

    #[test]
    fn test_unknown_actual_version() {
        assert_eq!(check(">=1.0.0", "dev-build"), VersionCheck::Unknown);
        assert_eq!(check("*", "dev-build"), VersionCheck::Satisfied);
    }
}
