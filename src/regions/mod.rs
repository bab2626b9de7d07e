//! Region label normalization.
//!
//! Provider recommendation APIs return human readable region labels
//! ("US East (N. Virginia)") while offering and purchase APIs want region
//! codes ("us-east-1"). Everything downstream of ingestion works with codes
//! only.

/// Known label to code mappings
const REGION_TABLE: &[(&str, &str)] = &[
    ("US East (N. Virginia)", "us-east-1"),
    ("US East (Ohio)", "us-east-2"),
    ("US West (N. California)", "us-west-1"),
    ("US West (Oregon)", "us-west-2"),
    ("Canada (Central)", "ca-central-1"),
    ("South America (São Paulo)", "sa-east-1"),
    ("EU (Ireland)", "eu-west-1"),
    ("Europe (Ireland)", "eu-west-1"),
    ("EU (London)", "eu-west-2"),
    ("Europe (London)", "eu-west-2"),
    ("EU (Paris)", "eu-west-3"),
    ("Europe (Paris)", "eu-west-3"),
    ("EU (Frankfurt)", "eu-central-1"),
    ("Europe (Frankfurt)", "eu-central-1"),
    ("EU (Stockholm)", "eu-north-1"),
    ("Europe (Stockholm)", "eu-north-1"),
    ("Europe (Milan)", "eu-south-1"),
    ("Asia Pacific (Tokyo)", "ap-northeast-1"),
    ("Asia Pacific (Seoul)", "ap-northeast-2"),
    ("Asia Pacific (Osaka)", "ap-northeast-3"),
    ("Asia Pacific (Singapore)", "ap-southeast-1"),
    ("Asia Pacific (Sydney)", "ap-southeast-2"),
    ("Asia Pacific (Mumbai)", "ap-south-1"),
    ("Africa (Cape Town)", "af-south-1"),
    ("Middle East (Bahrain)", "me-south-1"),
];

/// City keyword fallbacks for labels that drifted from the canonical form
const CITY_FALLBACK: &[(&str, &str)] = &[
    ("virginia", "us-east-1"),
    ("ohio", "us-east-2"),
    ("oregon", "us-west-2"),
    ("california", "us-west-1"),
    ("ireland", "eu-west-1"),
    ("frankfurt", "eu-central-1"),
    ("london", "eu-west-2"),
    ("paris", "eu-west-3"),
    ("tokyo", "ap-northeast-1"),
    ("singapore", "ap-southeast-1"),
    ("sydney", "ap-southeast-2"),
    ("mumbai", "ap-south-1"),
    ("seoul", "ap-northeast-2"),
];

/// Whether the input already looks like a region code: hyphenated, all
/// lowercase, no whitespace, no parentheses.
pub fn is_region_code(value: &str) -> bool {
    !value.is_empty()
        && value.contains('-')
        && !value.contains(char::is_whitespace)
        && !value.contains('(')
        && !value.contains(')')
        && !value.chars().any(|c| c.is_uppercase())
}

/// Normalize a region label to a region code.
///
/// Lookup order: exact table match, case-insensitive table match, region-code
/// passthrough, city keyword fallback. Unknown input is returned unchanged so
/// callers can log it with context; empty input stays empty.
pub fn normalize_region(input: &str) -> String {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return String::new();
    }

    for (label, code) in REGION_TABLE {
        if *label == trimmed {
            return (*code).to_string();
        }
    }

    for (label, code) in REGION_TABLE {
        if label.eq_ignore_ascii_case(trimmed) {
            return (*code).to_string();
        }
    }

    if is_region_code(trimmed) {
        return trimmed.to_string();
    }

    let lower = trimmed.to_lowercase();
    for (keyword, code) in CITY_FALLBACK {
        if lower.contains(keyword) {
            return (*code).to_string();
        }
    }

    trimmed.to_string()
}

/// Reverse lookup: display label for a region code, when one is known
pub fn region_label(code: &str) -> Option<&'static str> {
    REGION_TABLE
        .iter()
        .find(|(_, c)| *c == code)
        .map(|(label, _)| *label)
}
