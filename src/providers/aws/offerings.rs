//! Shared offering-resolution helpers for the AWS reservation clients.
//!
//! Resolution is a joint match on (resource type, engine or platform, AZ
//! configuration, duration, payment option). The first offering in API order
//! that matches every field wins.

use crate::error::Error;
use crate::model::{Recommendation, Term};

/// Seconds in one commitment month, used for fuzzy duration matching
pub const MONTH_SECONDS: u64 = 2_628_000;

/// Canonical engine names accepted by the RDS offering catalog
const KNOWN_ENGINES: &[&str] = &[
    "aurora-mysql",
    "aurora-postgresql",
    "mysql",
    "postgresql",
    "mariadb",
    "oracle-se2",
    "sqlserver-se",
];

/// Normalize an engine name to its catalog form. Label variants such as
/// "Aurora MySQL" or "postgres" fold onto the canonical hyphenated name;
/// unrecognized engines pass through lowercased so the joint match can still
/// report them.
pub fn normalize_engine(raw: &str) -> String {
    let folded = raw.trim().to_ascii_lowercase().replace([' ', '_'], "-");
    match folded.as_str() {
        "aurora" => return "aurora-mysql".to_string(),
        "postgres" => return "postgresql".to_string(),
        "sqlserver-standard" => return "sqlserver-se".to_string(),
        "oracle-standard-two" => return "oracle-se2".to_string(),
        _ => {}
    }
    for known in KNOWN_ENGINES {
        if folded == *known {
            return folded;
        }
    }
    folded
}

/// Exact duration match against the requested term
pub fn duration_matches(offering_seconds: u64, term: Term) -> bool {
    offering_seconds == term.seconds()
}

/// Fuzzy duration match within one month of the requested term, for catalogs
/// whose reported durations drift from exact year boundaries
pub fn duration_matches_fuzzy(offering_seconds: u64, term: Term) -> bool {
    let target = term.seconds();
    offering_seconds.abs_diff(target) <= MONTH_SECONDS
}

/// Catalog-miss error naming the attempted match tuple
pub fn no_offering_error(recommendation: &Recommendation) -> Error {
    let az = recommendation
        .az_config()
        .map(|a| a.as_str().to_string())
        .unwrap_or_else(|| "any-az".to_string());
    Error::catalog_miss(format!(
        "no offerings found for ({}, {}, {}, {}, {})",
        recommendation.resource_type,
        if recommendation.engine().is_empty() {
            "any-engine"
        } else {
            recommendation.engine()
        },
        az,
        recommendation.term.label(),
        recommendation.payment_option.as_str(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{
        AzConfig, CloudProvider, CommitmentType, DatabaseDetails, PaymentOption, Recommendation,
        ServiceDetails, ServiceType,
    };
    use chrono::Utc;

    #[test]
    fn test_engine_normalization() {
        assert_eq!(normalize_engine("Aurora MySQL"), "aurora-mysql");
        assert_eq!(normalize_engine("aurora"), "aurora-mysql");
        assert_eq!(normalize_engine("postgres"), "postgresql");
        assert_eq!(normalize_engine("PostgreSQL"), "postgresql");
        assert_eq!(normalize_engine("oracle_se2"), "oracle-se2");
        assert_eq!(normalize_engine("sqlserver-se"), "sqlserver-se");
        assert_eq!(normalize_engine("cockroach"), "cockroach");
    }

    #[test]
    fn test_engine_normalization_idempotent() {
        for raw in ["Aurora MySQL", "postgres", "mariadb", "unknown engine"] {
            let once = normalize_engine(raw);
            assert_eq!(normalize_engine(&once), once);
        }
    }

    #[test]
    fn test_exact_duration() {
        assert!(duration_matches(31_536_000, Term::OneYear));
        assert!(duration_matches(94_608_000, Term::ThreeYear));
        assert!(!duration_matches(94_608_000, Term::OneYear));
    }

    #[test]
    fn test_fuzzy_duration_within_one_month() {
        assert!(duration_matches_fuzzy(31_536_000, Term::OneYear));
        assert!(duration_matches_fuzzy(31_536_000 - MONTH_SECONDS, Term::OneYear));
        assert!(duration_matches_fuzzy(31_536_000 + MONTH_SECONDS, Term::OneYear));
        assert!(!duration_matches_fuzzy(
            31_536_000 + MONTH_SECONDS * 2,
            Term::OneYear
        ));
        assert!(!duration_matches_fuzzy(94_608_000, Term::OneYear));
    }

    #[test]
    fn test_no_offering_error_names_tuple() {
        let recommendation = Recommendation {
            provider: CloudProvider::Aws,
            service: ServiceType::RelationalDb,
            account: String::new(),
            region: "us-east-1".to_string(),
            resource_type: "db.r6g.xlarge".to_string(),
            count: 1,
            payment_option: PaymentOption::PartialUpfront,
            term: Term::ThreeYear,
            commitment_type: CommitmentType::ReservedInstance,
            estimated_savings: 0.0,
            savings_percentage: 0.0,
            commitment_cost: 0.0,
            on_demand_cost: 0.0,
            recurring_monthly_cost: 0.0,
            estimated_monthly_on_demand: 0.0,
            timestamp: Utc::now(),
            description: String::new(),
            coverage: 100.0,
            details: ServiceDetails::Database(DatabaseDetails {
                engine: "aurora-mysql".to_string(),
                az_config: AzConfig::MultiAz,
            }),
        };

        let message = no_offering_error(&recommendation).to_string();
        assert!(message.contains("no offerings found"));
        assert!(message.contains("db.r6g.xlarge"));
        assert!(message.contains("aurora-mysql"));
        assert!(message.contains("multi-az"));
        assert!(message.contains("3yr"));
        assert!(message.contains("partial-upfront"));
    }
}
