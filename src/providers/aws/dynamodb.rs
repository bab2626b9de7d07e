//! Reserved capacity client for DynamoDB.
//!
//! DynamoDB reserves capacity units rather than instances: the resource type
//! is a capacity mode label and the count is in hundreds of capacity units.
//! There is no centralized recommendation path for it.

use crate::error::{Error, Result};
use crate::model::{
    Commitment, CommitmentState, CommitmentType, NoSqlDetails, OfferingDetails, PurchaseResult,
    Recommendation, ServiceDetails, ServiceType,
};
use crate::providers::aws::offerings::{duration_matches, no_offering_error};
use crate::providers::aws::AwsContext;
use crate::providers::{json_f64, json_str, json_u64, RecommendationQuery, ServiceClient};
use crate::purchase::EMPTY_RESPONSE_MESSAGE;
use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

pub struct DynamoDbClient {
    ctx: AwsContext,
}

impl DynamoDbClient {
    pub(crate) fn new(ctx: AwsContext) -> Self {
        Self { ctx }
    }

    fn capacity_mode(recommendation: &Recommendation) -> String {
        match &recommendation.details {
            ServiceDetails::NoSql(NoSqlDetails { capacity_mode, .. }) => capacity_mode.clone(),
            _ => "throughput".to_string(),
        }
    }

    async fn find_offering(
        &self,
        recommendation: &Recommendation,
        cancel: &CancellationToken,
    ) -> Result<OfferingDetails> {
        let capacity_mode = Self::capacity_mode(recommendation);
        let pages = self
            .ctx
            .call_paged(
                cancel,
                &["dynamodb", "describe-reserved-capacity-offerings"],
                "--next-token",
                "NextToken",
            )
            .await?;

        for page in &pages {
            let offerings = match page
                .get("ReservedCapacityOfferings")
                .and_then(|v| v.as_array())
            {
                Some(offerings) => offerings,
                None => continue,
            };
            for offering in offerings {
                if !json_str(offering, "CapacityMode").eq_ignore_ascii_case(&capacity_mode) {
                    continue;
                }
                if !duration_matches(json_u64(offering, "Duration"), recommendation.term) {
                    continue;
                }
                if json_str(offering, "OfferingType")
                    != recommendation.payment_option.catalog_label()
                {
                    continue;
                }
                return Ok(OfferingDetails {
                    offering_id: json_str(offering, "ReservedCapacityOfferingId").to_string(),
                    resource_type: recommendation.resource_type.clone(),
                    duration_seconds: json_u64(offering, "Duration"),
                    payment_option: recommendation.payment_option,
                    fixed_price: json_f64(offering, "FixedPrice"),
                    usage_price: json_f64(offering, "UsagePrice"),
                    currency: json_str(offering, "CurrencyCode").to_string(),
                });
            }
        }
        Err(no_offering_error(recommendation))
    }
}

#[async_trait]
impl ServiceClient for DynamoDbClient {
    fn service_type(&self) -> ServiceType {
        ServiceType::NoSqlDb
    }

    fn region(&self) -> &str {
        self.ctx.region()
    }

    /// DynamoDB has no recommendation endpoint; the listing is always empty
    async fn get_recommendations(
        &self,
        _query: &RecommendationQuery,
        _cancel: &CancellationToken,
    ) -> Result<Vec<Recommendation>> {
        Ok(Vec::new())
    }

    async fn get_existing_commitments(
        &self,
        cancel: &CancellationToken,
    ) -> Result<Vec<Commitment>> {
        let pages = self
            .ctx
            .call_paged(
                cancel,
                &["dynamodb", "describe-reserved-capacity"],
                "--next-token",
                "NextToken",
            )
            .await?;

        let mut commitments = Vec::new();
        for page in &pages {
            let reserved = match page.get("ReservedCapacity").and_then(|v| v.as_array()) {
                Some(reserved) => reserved,
                None => continue,
            };
            for capacity in reserved {
                let start_date = json_str(capacity, "StartTime").parse::<DateTime<Utc>>().ok();
                let end_date = start_date.map(|start| {
                    start + ChronoDuration::seconds(json_u64(capacity, "Duration") as i64)
                });
                commitments.push(Commitment {
                    commitment_id: json_str(capacity, "ReservedCapacityId").to_string(),
                    commitment_type: CommitmentType::ReservedInstance,
                    service: ServiceType::NoSqlDb,
                    region: self.ctx.region().to_string(),
                    resource_type: json_str(capacity, "CapacityMode").to_string(),
                    count: json_u64(capacity, "CapacityUnits") as u32,
                    state: CommitmentState::parse(json_str(capacity, "State")),
                    start_date,
                    end_date,
                });
            }
        }
        Ok(commitments)
    }

    async fn purchase_commitment(
        &self,
        recommendation: &Recommendation,
        cancel: &CancellationToken,
    ) -> PurchaseResult {
        let purchase_id = uuid::Uuid::new_v4().to_string();

        let offering = match self.find_offering(recommendation, cancel).await {
            Ok(offering) => offering,
            Err(err) => return PurchaseResult::failed(recommendation.clone(), purchase_id, &err),
        };

        let args = vec![
            "dynamodb".to_string(),
            "purchase-reserved-capacity-offerings".to_string(),
            "--reserved-capacity-offering-id".to_string(),
            offering.offering_id.clone(),
        ];
        let arg_refs: Vec<&str> = args.iter().map(|s| s.as_str()).collect();

        match self.ctx.call(&arg_refs).await {
            Ok(response) => {
                let reserved = response.get("ReservedCapacity").unwrap_or(&Value::Null);
                let commitment_id = json_str(reserved, "ReservedCapacityId");
                if commitment_id.is_empty() {
                    let err = Error::api(EMPTY_RESPONSE_MESSAGE);
                    PurchaseResult::failed(recommendation.clone(), purchase_id, &err)
                } else {
                    PurchaseResult::succeeded(
                        recommendation.clone(),
                        commitment_id,
                        purchase_id,
                        json_f64(reserved, "FixedPrice"),
                        format!(
                            "purchased reserved capacity for {}",
                            recommendation.resource_type
                        ),
                    )
                }
            }
            Err(err) => {
                let wrapped = Error::api(format!("reserved capacity purchase failed: {}", err));
                PurchaseResult::failed(recommendation.clone(), purchase_id, &wrapped)
            }
        }
    }

    async fn validate_offering(
        &self,
        recommendation: &Recommendation,
        cancel: &CancellationToken,
    ) -> Result<()> {
        self.find_offering(recommendation, cancel).await.map(|_| ())
    }

    async fn get_offering_details(
        &self,
        recommendation: &Recommendation,
        cancel: &CancellationToken,
    ) -> Result<OfferingDetails> {
        self.find_offering(recommendation, cancel).await
    }

    async fn get_valid_resource_types(&self, cancel: &CancellationToken) -> Result<Vec<String>> {
        let pages = self
            .ctx
            .call_paged(
                cancel,
                &["dynamodb", "describe-reserved-capacity-offerings"],
                "--next-token",
                "NextToken",
            )
            .await?;

        let mut types = Vec::new();
        for page in &pages {
            if let Some(offerings) = page
                .get("ReservedCapacityOfferings")
                .and_then(|v| v.as_array())
            {
                for offering in offerings {
                    let mode = json_str(offering, "CapacityMode");
                    if !mode.is_empty() {
                        types.push(mode.to_ascii_lowercase());
                    }
                }
            }
        }
        types.sort();
        types.dedup();
        Ok(types)
    }
}
