//! Purchase execution: reservation ID synthesis, identifier sanitization,
//! the standard tag set, and the sequential batch runner.
//!
//! Provider clients submit the actual purchase calls; everything here is the
//! shared machinery around them. Purchase errors never escape as errors, they
//! ride inside `PurchaseResult`.

use crate::error::Error;
use crate::model::{PurchaseResult, Recommendation, ServiceType};
use crate::providers::{Provider, ServiceClient};
use chrono::Utc;
use tokio_util::sync::CancellationToken;

/// Fallback prefix when sanitization empties an identifier
pub const DEFAULT_ID_PREFIX: &str = "commitment";

/// Tag value identifying purchases made by this tool
pub const TOOL_TAG: &str = "cloudcommit";

/// Message used when the provider returns an empty purchase response
pub const EMPTY_RESPONSE_MESSAGE: &str = "purchase response was empty";

/// Sanitize an identifier to the strictest provider grammar (RDS):
/// alphanumerics and single hyphens only, no leading or trailing hyphen.
/// Dots map to hyphens so instance classes stay readable. An identifier that
/// sanitizes to nothing becomes the default prefix.
pub fn sanitize_identifier(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        if c.is_ascii_alphanumeric() {
            out.push(c);
        } else if (c == '.' || c == '-') && !out.is_empty() && !out.ends_with('-') {
            out.push('-');
        }
    }
    let trimmed = out.trim_end_matches('-');
    if trimmed.is_empty() {
        DEFAULT_ID_PREFIX.to_string()
    } else {
        trimmed.to_string()
    }
}

/// Synthesize a reservation identifier, deterministic in its prefix and
/// uniquified by the Unix timestamp
pub fn reservation_id(service: ServiceType, resource_type: &str, unix_seconds: i64) -> String {
    sanitize_identifier(&format!(
        "{}-{}-{}",
        service.slug(),
        resource_type,
        unix_seconds
    ))
}

/// Check an identifier against the strictest provider grammar: leading
/// alphanumeric, no doubled hyphens, no trailing hyphen
pub fn is_valid_identifier(id: &str) -> bool {
    regex::Regex::new("^[A-Za-z0-9](-?[A-Za-z0-9])*$")
        .map(|grammar| grammar.is_match(id))
        .unwrap_or(false)
}

/// Standard tag set attached to every purchase
pub fn standard_tags(recommendation: &Recommendation) -> Vec<(String, String)> {
    vec![
        ("Purpose".to_string(), "cost-optimization".to_string()),
        (
            "ResourceType".to_string(),
            recommendation.resource_type.clone(),
        ),
        ("Region".to_string(), recommendation.region.clone()),
        (
            "PurchaseDate".to_string(),
            Utc::now().format("%Y-%m-%d").to_string(),
        ),
        ("Tool".to_string(), TOOL_TAG.to_string()),
    ]
}

/// Render tags as repeated `Key=...,Value=...` arguments (RDS style CLIs)
pub fn tags_as_key_value_args(tags: &[(String, String)]) -> Vec<String> {
    tags.iter()
        .map(|(key, value)| format!("Key={},Value={}", key, value))
        .collect()
}

/// Render tags as one `k=v,k=v` shorthand argument (Savings Plans style CLIs)
pub fn tags_as_shorthand(tags: &[(String, String)]) -> String {
    tags.iter()
        .map(|(key, value)| format!("{}={}", key, value))
        .collect::<Vec<_>>()
        .join(",")
}

/// Outcome of one purchase batch. A cancelled batch keeps the results
/// already produced and carries the cancellation alongside them.
#[derive(Debug)]
pub struct BatchOutcome {
    /// Results in submission order
    pub results: Vec<PurchaseResult>,
    /// Set when the batch stopped early
    pub interrupted: Option<Error>,
}

impl BatchOutcome {
    pub fn succeeded_count(&self) -> usize {
        self.results.iter().filter(|r| r.success).count()
    }

    pub fn failed_count(&self) -> usize {
        self.results.len() - self.succeeded_count()
    }
}

/// Sequential purchase executor
pub struct PurchaseRunner {
    dry_run: bool,
}

impl PurchaseRunner {
    pub fn new(dry_run: bool) -> Self {
        Self { dry_run }
    }

    /// Process recommendations in caller order, one purchase at a time.
    /// Cancellation is honored between purchases only; a submitted purchase
    /// is never abandoned.
    pub async fn run(
        &self,
        provider: &dyn Provider,
        recommendations: &[Recommendation],
        cancel: &CancellationToken,
    ) -> BatchOutcome {
        let mut results = Vec::with_capacity(recommendations.len());

        for recommendation in recommendations {
            if cancel.is_cancelled() {
                return BatchOutcome {
                    results,
                    interrupted: Some(Error::cancelled("purchase batch cancelled")),
                };
            }

            if let Err(err) = recommendation.validate() {
                results.push(PurchaseResult::failed(
                    recommendation.clone(),
                    uuid::Uuid::new_v4().to_string(),
                    &err,
                ));
                continue;
            }

            let client =
                match provider.service_client(recommendation.service, &recommendation.region) {
                    Ok(client) => client,
                    Err(err) => {
                        results.push(PurchaseResult::failed(
                            recommendation.clone(),
                            uuid::Uuid::new_v4().to_string(),
                            &err,
                        ));
                        continue;
                    }
                };

            let result = if self.dry_run {
                self.dry_run_result(recommendation, client.as_ref(), cancel)
                    .await
            } else {
                client.purchase_commitment(recommendation, cancel).await
            };

            log_result(&result);
            results.push(result);
        }

        BatchOutcome {
            results,
            interrupted: None,
        }
    }

    /// Resolve and validate without submitting
    async fn dry_run_result(
        &self,
        recommendation: &Recommendation,
        client: &dyn ServiceClient,
        cancel: &CancellationToken,
    ) -> PurchaseResult {
        let purchase_id = uuid::Uuid::new_v4().to_string();
        match client.get_offering_details(recommendation, cancel).await {
            Ok(offering) => {
                let reservation = reservation_id(
                    recommendation.service,
                    &recommendation.resource_type,
                    Utc::now().timestamp(),
                );
                PurchaseResult::succeeded(
                    recommendation.clone(),
                    reservation,
                    purchase_id,
                    offering.fixed_price,
                    format!(
                        "dry run: would purchase offering {} x{}",
                        offering.offering_id, recommendation.count
                    ),
                )
            }
            Err(err) => PurchaseResult::failed(recommendation.clone(), purchase_id, &err),
        }
    }
}

fn log_result(result: &PurchaseResult) {
    if result.success {
        log::info!(
            "purchased {} x{} in {} as {}",
            result.recommendation.resource_type,
            result.recommendation.count,
            result.recommendation.region,
            result.commitment_id
        );
    } else {
        log::warn!(
            "purchase failed for {} x{} in {}: {}",
            result.recommendation.resource_type,
            result.recommendation.count,
            result.recommendation.region,
            result.error.as_deref().unwrap_or("unknown error")
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_maps_dots_to_hyphens() {
        assert_eq!(
            sanitize_identifier("rds-db.t3.micro-1700000000"),
            "rds-db-t3-micro-1700000000"
        );
    }

    #[test]
    fn test_sanitize_collapses_and_trims_hyphens() {
        assert_eq!(sanitize_identifier("--a..b--"), "a-b");
        assert_eq!(sanitize_identifier("a---b"), "a-b");
        assert_eq!(sanitize_identifier("-abc-"), "abc");
    }

    #[test]
    fn test_sanitize_empty_gets_default_prefix() {
        let id = sanitize_identifier("--..--");
        assert_eq!(id, DEFAULT_ID_PREFIX);
        assert!(is_valid_identifier(&id));
    }

    #[test]
    fn test_sanitize_drops_illegal_characters() {
        assert_eq!(sanitize_identifier("cache_node (r6g)!"), "cachenoder6g");
    }

    #[test]
    fn test_sanitize_is_idempotent() {
        for raw in ["rds-db.t3.micro-1700000000", "--..--", "a__b..c", "ABC"] {
            let once = sanitize_identifier(raw);
            assert_eq!(sanitize_identifier(&once), once);
        }
    }

    #[test]
    fn test_reservation_id_grammar() {
        let id = reservation_id(ServiceType::RelationalDb, "db.r6g.xlarge", 1_700_000_000);
        assert_eq!(id, "rds-db-r6g-xlarge-1700000000");
        assert!(is_valid_identifier(&id));

        let odd = reservation_id(ServiceType::Cache, "cache.r6g..large", 1_700_000_000);
        assert!(is_valid_identifier(&odd));
    }

    #[test]
    fn test_identifier_grammar_rejects_bad_shapes() {
        assert!(is_valid_identifier("abc-123"));
        assert!(!is_valid_identifier(""));
        assert!(!is_valid_identifier("-abc"));
        assert!(!is_valid_identifier("abc-"));
        assert!(!is_valid_identifier("a--b"));
        assert!(!is_valid_identifier("a.b"));
    }

    #[test]
    fn test_standard_tags_cover_required_keys() {
        let rec = crate::model::tests::sample_database_recommendation();
        let tags = standard_tags(&rec);
        let keys: Vec<&str> = tags.iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(
            keys,
            vec!["Purpose", "ResourceType", "Region", "PurchaseDate", "Tool"]
        );
        assert!(tags.iter().any(|(_, v)| v == "db.r6g.xlarge"));
    }

    #[test]
    fn test_tag_rendering() {
        let tags = vec![
            ("Purpose".to_string(), "cost-optimization".to_string()),
            ("Tool".to_string(), TOOL_TAG.to_string()),
        ];
        assert_eq!(
            tags_as_key_value_args(&tags),
            vec![
                "Key=Purpose,Value=cost-optimization",
                "Key=Tool,Value=cloudcommit"
            ]
        );
        assert_eq!(
            tags_as_shorthand(&tags),
            "Purpose=cost-optimization,Tool=cloudcommit"
        );
    }
}
