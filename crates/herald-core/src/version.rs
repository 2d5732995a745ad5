//! Dotted-numeric release versions.
//!
//! Versions are one to four non-negative integers separated by dots
//! (`1`, `1.2`, `1.2.3`, `1.2.3.4`). Missing components compare as zero, so
//! `1.2` and `1.2.0` are equal. Anything else does not parse.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

/// Maximum number of dotted components.
const MAX_PARTS: usize = 4;

/// Equality and ordering look only at the zero-padded numeric tuple.
#[derive(Debug, Clone, Copy)]
pub struct ReleaseVersion {
    parts: [u32; MAX_PARTS],
    len: usize,
}

impl PartialEq for ReleaseVersion {
    fn eq(&self, other: &Self) -> bool {
        self.parts == other.parts
    }
}

impl Eq for ReleaseVersion {}

impl PartialOrd for ReleaseVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ReleaseVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        self.parts.cmp(&other.parts)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid release version {0:?}: expected 1-4 dot-separated non-negative integers")]
pub struct ParseVersionError(String);

impl ReleaseVersion {
    /// The numeric components as written.
    pub fn components(&self) -> &[u32] {
        &self.parts[..self.len]
    }
}

impl FromStr for ReleaseVersion {
    type Err = ParseVersionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let segments: Vec<&str> = trimmed.split('.').filter(|p| !p.is_empty()).collect();
        if segments.is_empty() || segments.len() > MAX_PARTS {
            return Err(ParseVersionError(s.to_string()));
        }

        let mut parts = [0u32; MAX_PARTS];
        for (slot, segment) in parts.iter_mut().zip(&segments) {
            *slot = segment
                .parse()
                .map_err(|_| ParseVersionError(s.to_string()))?;
        }

        Ok(Self {
            parts,
            len: segments.len(),
        })
    }
}

impl fmt::Display for ReleaseVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for part in self.components() {
            if !first {
                f.write_str(".")?;
            }
            write!(f, "{part}")?;
            first = false;
        }
        Ok(())
    }
}

/// Compare two version strings numerically.
///
/// Returns `None` when either side does not parse.
pub fn compare(current: &str, latest: &str) -> Option<Ordering> {
    let current: ReleaseVersion = current.parse().ok()?;
    let latest: ReleaseVersion = latest.parse().ok()?;
    Some(current.cmp(&latest))
}

/// Whether a client on `current` should move to `latest`.
///
/// Falls back to ordinal string comparison when either side is not numeric.
pub fn needs_upgrade(current: &str, latest: &str) -> bool {
    compare(current, latest).map_or_else(
        || current.trim() < latest.trim(),
        |ordering| ordering == Ordering::Less,
    )
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn parses_one_to_four_parts() {
        assert_eq!("1".parse::<ReleaseVersion>().unwrap().components(), &[1]);
        assert_eq!(
            "1.2.3.4".parse::<ReleaseVersion>().unwrap().components(),
            &[1, 2, 3, 4]
        );
        assert!("1.2.3.4.5".parse::<ReleaseVersion>().is_err());
        assert!("".parse::<ReleaseVersion>().is_err());
        assert!("1.x".parse::<ReleaseVersion>().is_err());
        assert!("-1.0".parse::<ReleaseVersion>().is_err());
    }

    #[test]
    fn numeric_not_lexical_ordering() {
        assert_eq!(compare("1.9.0", "1.10.0"), Some(Ordering::Less));
        assert_eq!(compare("2.0", "1.99.99"), Some(Ordering::Greater));
    }

    #[test]
    fn missing_components_are_zero() {
        assert_eq!(compare("1.2", "1.2.0"), Some(Ordering::Equal));
        assert!(!needs_upgrade("1.2", "1.2.0.0"));
    }

    #[test]
    fn unparseable_falls_back_to_ordinal() {
        assert_eq!(compare("beta", "1.0"), None);
        assert!(needs_upgrade("1.0-alpha", "1.0-beta"));
        assert!(!needs_upgrade("b", "a"));
    }

    #[test]
    fn display_round_trips_written_form() {
        let v: ReleaseVersion = " 3.0.12 ".parse().unwrap();
        assert_eq!(v.to_string(), "3.0.12");
    }
}
