// 🔤 Normalizer - comparable keys for addresses, names, and localities
// Simple token substitution only; no address parsing

/// Whole-token street abbreviations
const ABBREVIATIONS: &[(&str, &str)] = &[
    ("street", "st"),
    ("avenue", "ave"),
    ("boulevard", "blvd"),
    ("drive", "dr"),
    ("road", "rd"),
    ("lane", "ln"),
    ("court", "ct"),
    ("place", "pl"),
    ("square", "sq"),
    ("parkway", "pkwy"),
    ("highway", "hwy"),
    ("terrace", "ter"),
    ("suite", "ste"),
    ("north", "n"),
    ("south", "s"),
    ("east", "e"),
    ("west", "w"),
];

/// Locale variants rewritten anywhere in the string (German compounds like "hauptstraße")
const LOCALE_VARIANTS: &[(&str, &str)] = &[("straße", "strasse")];

fn abbreviate(token: &str) -> &str {
    ABBREVIATIONS
        .iter()
        .find(|(long, _)| *long == token)
        .map(|(_, short)| *short)
        .unwrap_or(token)
}

/// Canonical comparison key for a free-text postal address.
/// Empty or unusable input yields an empty string, which is never groupable.
pub fn normalize_address(raw: &str) -> String {
    let mut lower = raw.to_lowercase().replace([',', '.'], "");

    for (variant, replacement) in LOCALE_VARIANTS {
        lower = lower.replace(variant, replacement);
    }

    lower
        .split_whitespace()
        .map(abbreviate)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Lowercase, punctuation (except `#`) to spaces, whitespace collapsed
pub fn normalize_name(raw: &str) -> String {
    raw.to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() || c == '#' { c } else { ' ' })
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

pub fn normalize_locality(raw: &str) -> String {
    raw.to_lowercase()
        .replace([',', '.'], "")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Whether an address carries street-level specificity: non-empty, not just
/// the city name, at least `min_len` characters once normalized, and containing a digit.
pub fn has_street_content(address: Option<&str>, city: &str, min_len: usize) -> bool {
    let normalized = match address {
        Some(raw) => normalize_address(raw),
        None => return false,
    };

    !normalized.is_empty()
        && normalized != normalize_address(city)
        && normalized.chars().count() >= min_len
        && normalized.chars().any(|c| c.is_ascii_digit())
}
