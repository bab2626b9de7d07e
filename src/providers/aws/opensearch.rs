//! Reserved instance client for the OpenSearch service.
//!
//! The offering catalog has no server-side filters worth using and its
//! reported durations drift around exact year boundaries, so matching is
//! fully client-side with a one-month tolerance on duration.

use crate::error::{Error, Result};
use crate::model::{
    Commitment, CommitmentState, CommitmentType, OfferingDetails, PurchaseResult, Recommendation,
    ServiceType,
};
use crate::providers::aws::offerings::{duration_matches_fuzzy, no_offering_error};
use crate::providers::aws::AwsContext;
use crate::providers::{json_f64, json_str, json_u64, RecommendationQuery, ServiceClient};
use crate::purchase::{reservation_id, EMPTY_RESPONSE_MESSAGE};
use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use tokio_util::sync::CancellationToken;

pub struct OpenSearchClient {
    ctx: AwsContext,
}

impl OpenSearchClient {
    pub(crate) fn new(ctx: AwsContext) -> Self {
        Self { ctx }
    }

    async fn find_offering(
        &self,
        recommendation: &Recommendation,
        cancel: &CancellationToken,
    ) -> Result<OfferingDetails> {
        let payment_label = recommendation.payment_option.api_label();
        let pages = self
            .ctx
            .call_paged(
                cancel,
                &["opensearch", "describe-reserved-instance-offerings"],
                "--next-token",
                "NextToken",
            )
            .await?;

        for page in &pages {
            let offerings = match page
                .get("ReservedInstanceOfferings")
                .and_then(|v| v.as_array())
            {
                Some(offerings) => offerings,
                None => continue,
            };
            for offering in offerings {
                if json_str(offering, "InstanceType") != recommendation.resource_type {
                    continue;
                }
                if !duration_matches_fuzzy(json_u64(offering, "Duration"), recommendation.term) {
                    continue;
                }
                if json_str(offering, "PaymentOption") != payment_label {
                    continue;
                }
                return Ok(OfferingDetails {
                    offering_id: json_str(offering, "ReservedInstanceOfferingId").to_string(),
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
impl ServiceClient for OpenSearchClient {
    fn service_type(&self) -> ServiceType {
        ServiceType::Search
    }

    fn region(&self) -> &str {
        self.ctx.region()
    }

    /// Search recommendations are served by the centralized Cost Explorer path
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
                &["opensearch", "describe-reserved-instances"],
                "--next-token",
                "NextToken",
            )
            .await?;

        let mut commitments = Vec::new();
        for page in &pages {
            let reserved = match page.get("ReservedInstances").and_then(|v| v.as_array()) {
                Some(reserved) => reserved,
                None => continue,
            };
            for instance in reserved {
                let start_date = json_str(instance, "StartTime").parse::<DateTime<Utc>>().ok();
                let end_date = start_date.map(|start| {
                    start + ChronoDuration::seconds(json_u64(instance, "Duration") as i64)
                });
                commitments.push(Commitment {
                    commitment_id: json_str(instance, "ReservedInstanceId").to_string(),
                    commitment_type: CommitmentType::ReservedInstance,
                    service: ServiceType::Search,
                    region: self.ctx.region().to_string(),
                    resource_type: json_str(instance, "InstanceType").to_string(),
                    count: json_u64(instance, "InstanceCount") as u32,
                    state: CommitmentState::parse(json_str(instance, "State")),
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

        let reservation_name = reservation_id(
            ServiceType::Search,
            &recommendation.resource_type,
            Utc::now().timestamp(),
        );
        let count = recommendation.count.to_string();
        let args = vec![
            "opensearch".to_string(),
            "purchase-reserved-instance-offering".to_string(),
            "--reserved-instance-offering-id".to_string(),
            offering.offering_id.clone(),
            "--reservation-name".to_string(),
            reservation_name,
            "--instance-count".to_string(),
            count,
        ];
        let arg_refs: Vec<&str> = args.iter().map(|s| s.as_str()).collect();

        match self.ctx.call(&arg_refs).await {
            Ok(response) => {
                let reservation = json_str(&response, "ReservedInstanceId");
                if reservation.is_empty() {
                    let err = Error::api(EMPTY_RESPONSE_MESSAGE);
                    PurchaseResult::failed(recommendation.clone(), purchase_id, &err)
                } else {
                    PurchaseResult::succeeded(
                        recommendation.clone(),
                        reservation,
                        purchase_id,
                        offering.fixed_price * recommendation.count as f64,
                        format!(
                            "purchased {} reserved search instances of {}",
                            recommendation.count, recommendation.resource_type
                        ),
                    )
                }
            }
            Err(err) => {
                let wrapped = Error::api(format!("reserved instance purchase failed: {}", err));
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
                &["opensearch", "describe-reserved-instance-offerings"],
                "--next-token",
                "NextToken",
            )
            .await?;

        let mut types = Vec::new();
        for page in &pages {
            if let Some(offerings) = page
                .get("ReservedInstanceOfferings")
                .and_then(|v| v.as_array())
            {
                for offering in offerings {
                    let instance_type = json_str(offering, "InstanceType");
                    if !instance_type.is_empty() {
                        types.push(instance_type.to_string());
                    }
                }
            }
        }
        types.sort();
        types.dedup();
        Ok(types)
    }
}
