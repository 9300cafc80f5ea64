use crate::errors::{ManageError, ManageResult};
use std::cmp::Ordering;

/// Package-style version: dot-separated numeric components with an
/// optional pre-release suffix after `-`. The suffix never participates
/// in ordering; `"5.17.0-rc.1"` orders as `[5, 17, 0]`. Missing
/// components compare as zero, so `"5.17"` equals `"5.17.0"`.
#[derive(Debug, Clone)]
pub struct PackageVersion {
    parts: Vec<u64>,
    raw: String,
}

impl PackageVersion {
    pub fn parse(raw: &str) -> ManageResult<Self> {
        let base = raw.split('-').next().unwrap_or_default();
        if base.is_empty() {
            return Err(invalid(raw));
        }
        let parts = base
            .split('.')
            .map(|part| part.parse::<u64>())
            .collect::<Result<Vec<_>, _>>()
            .map_err(|_| invalid(raw))?;
        Ok(Self {
            parts,
            raw: raw.to_string(),
        })
    }

    pub fn raw(&self) -> &str {
        &self.raw
    }

    fn cmp_parts(&self, other: &Self) -> Ordering {
        let len = self.parts.len().max(other.parts.len());
        for index in 0..len {
            let left = self.parts.get(index).copied().unwrap_or(0);
            let right = other.parts.get(index).copied().unwrap_or(0);
            match left.cmp(&right) {
                Ordering::Equal => {}
                unequal => return unequal,
            }
        }
        Ordering::Equal
    }
}

impl PartialEq for PackageVersion {
    fn eq(&self, other: &Self) -> bool {
        self.cmp_parts(other) == Ordering::Equal
    }
}

impl Eq for PackageVersion {}

impl PartialOrd for PackageVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for PackageVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        self.cmp_parts(other)
    }
}

/// Ordering with the operator-facing warning: versions that compare equal
/// but were written differently (build or pre-release suffix) are flagged.
pub fn compare(left: &PackageVersion, right: &PackageVersion) -> Ordering {
    let ordering = left.cmp(right);
    if ordering == Ordering::Equal && left.raw() != right.raw() {
        tracing::warn!(
            left = left.raw(),
            right = right.raw(),
            "versions differ only in their suffix, treating as equal"
        );
    }
    ordering
}

fn invalid(raw: &str) -> ManageError {
    ManageError::InvalidArgument(format!("invalid version: {raw:?}"))
}

#[cfg(test)]
mod tests {
    use super::{compare, PackageVersion};
    use std::cmp::Ordering;

    fn version(raw: &str) -> PackageVersion {
        PackageVersion::parse(raw).expect("parse")
    }

    #[test]
    fn ordering_table() {
        let cases = [
            ("5.17.0", "5.18.0", Ordering::Less),
            ("5.18.0", "5.17.9", Ordering::Greater),
            ("5.17.0", "5.17.0", Ordering::Equal),
            ("5.17", "5.17.0", Ordering::Equal),
            ("5.17.0-rc.1", "5.17.0", Ordering::Equal),
            ("5.17.0-rc.1", "5.17.1", Ordering::Less),
            ("5.2.0", "5.10.0", Ordering::Less),
            ("6", "5.99.99", Ordering::Greater),
            ("0.9", "1.0.0", Ordering::Less),
        ];
        for (left, right, expected) in cases {
            assert_eq!(
                compare(&version(left), &version(right)),
                expected,
                "{left} vs {right}"
            );
        }
    }

    #[test]
    fn pre_release_suffix_is_stripped() {
        let parsed = version("5.17.0-rc.1");
        assert_eq!(parsed.raw(), "5.17.0-rc.1");
        assert_eq!(parsed, version("5.17.0"));
    }

    #[test]
    fn rejects_non_numeric_components() {
        for raw in ["", "-rc.1", "abc", "5.x.0", "5..0"] {
            let err = PackageVersion::parse(raw).unwrap_err();
            assert_eq!(err.code(), "InvalidArgument", "{raw}");
        }
    }

    #[test]
    fn sorts_ascending() {
        let mut versions = vec![
            version("5.10.0"),
            version("5.2.0"),
            version("5.17.0"),
            version("5.2.1"),
        ];
        versions.sort();
        let raws: Vec<&str> = versions.iter().map(|item| item.raw()).collect();
        assert_eq!(raws, vec!["5.2.0", "5.2.1", "5.10.0", "5.17.0"]);
    }
}
