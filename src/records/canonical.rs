//! Canonical identifiers for deduplicating leads.
//!
//! Two scrapes of the same property rarely agree on punctuation or
//! abbreviations ("12 Oak St." vs "12 oak street"), so identity is decided on
//! a normalized form of the address.

use std::collections::HashSet;

const ABBREVIATIONS: &[(&str, &str)] = &[
    ("st", "street"),
    ("ave", "avenue"),
    ("av", "avenue"),
    ("rd", "road"),
    ("dr", "drive"),
    ("ln", "lane"),
    ("blvd", "boulevard"),
    ("ct", "court"),
    ("pl", "place"),
    ("hwy", "highway"),
    ("pkwy", "parkway"),
    ("cir", "circle"),
    ("ter", "terrace"),
    ("apt", "unit"),
    ("ste", "suite"),
    ("n", "north"),
    ("s", "south"),
    ("e", "east"),
    ("w", "west"),
];

/// Normalizes an address into its canonical identifier.
///
/// Lowercases, strips punctuation, collapses whitespace, and expands common
/// street abbreviations.
pub fn canonical_identifier(address: &str) -> String {
    address
        .to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect::<String>()
        .split_whitespace()
        .map(|token| {
            ABBREVIATIONS
                .iter()
                .find(|(short, _)| *short == token)
                .map(|(_, long)| *long)
                .unwrap_or(token)
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Splits a canonical identifier into its token set.
pub fn tokens(canonical: &str) -> HashSet<&str> {
    canonical.split_whitespace().collect()
}

/// Jaccard similarity between two token sets.
pub fn jaccard<'a>(a: &HashSet<&'a str>, b: &HashSet<&'a str>) -> f64 {
    if a.is_empty() && b.is_empty() {
        return 1.0;
    }
    let intersection = a.intersection(b).count();
    let union = a.union(b).count();
    if union == 0 {
        0.0
    } else {
        intersection as f64 / union as f64
    }
}

/// Bucket key used to narrow fuzzy comparisons: the leading house number,
/// or the first token when the address has no number.
pub fn bucket_key(canonical: &str) -> &str {
    canonical.split_whitespace().next().unwrap_or("")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_canonical_identifier_normalizes() {
        assert_eq!(canonical_identifier("12 Oak St."), "12 oak street");
        assert_eq!(canonical_identifier("12  OAK   street"), "12 oak street");
        assert_eq!(
            canonical_identifier("400 N. Main Blvd, Apt 3"),
            "400 north main boulevard unit 3"
        );
    }

    #[test]
    fn test_canonical_identifier_empty() {
        assert_eq!(canonical_identifier("  ,. "), "");
    }

    #[test]
    fn test_jaccard() {
        let a = tokens("12 oak street tampa");
        let b = tokens("12 oak street");
        assert!((jaccard(&a, &b) - 0.75).abs() < 1e-9);
        assert!((jaccard(&a, &a) - 1.0).abs() < 1e-9);
        assert_eq!(jaccard(&tokens("1 a"), &tokens("2 b")), 0.0);
    }

    #[test]
    fn test_bucket_key() {
        assert_eq!(bucket_key("12 oak street"), "12");
        assert_eq!(bucket_key(""), "");
    }
}
