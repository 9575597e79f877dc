//! Loose semantic version comparison for engine binaries
//!
//! Engine `--version` output varies ("ollama version is 0.5.7",
//! "v2024.5.0"); comparison works on the numeric fields only.

use std::cmp::Ordering;

/// Compare two version strings by their numeric components.
pub fn compare_versions(left: &str, right: &str) -> Ordering {
    let left = numeric_fields(left);
    let right = numeric_fields(right);
    let len = left.len().max(right.len());
    for index in 0..len {
        let a = left.get(index).copied().unwrap_or(0);
        let b = right.get(index).copied().unwrap_or(0);
        match a.cmp(&b) {
            Ordering::Equal => continue,
            other => return other,
        }
    }
    Ordering::Equal
}

/// Extract the first dotted numeric run from arbitrary version output.
fn numeric_fields(text: &str) -> Vec<u64> {
    text.split(|c: char| !c.is_ascii_digit() && c != '.')
        .filter(|segment| segment.chars().any(|c| c.is_ascii_digit()))
        .map(|segment| {
            segment
                .split('.')
                .filter_map(|part| part.parse::<u64>().ok())
                .collect::<Vec<_>>()
        })
        .find(|fields| !fields.is_empty())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numeric_comparison_ignores_prefixes() {
        assert_eq!(compare_versions("v0.5.7", "0.5.7"), Ordering::Equal);
        assert_eq!(
            compare_versions("ollama version is 0.5.7", "0.6.0"),
            Ordering::Less
        );
        assert_eq!(compare_versions("2024.5.0", "2024.4.9"), Ordering::Greater);
    }

    #[test]
    fn missing_fields_count_as_zero() {
        assert_eq!(compare_versions("1.2", "1.2.0"), Ordering::Equal);
        assert_eq!(compare_versions("1.2", "1.2.1"), Ordering::Less);
    }
}
