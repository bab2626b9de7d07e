//! Reserved instance client for EC2 compute.

use crate::error::{Error, Result};
use crate::model::{
    Commitment, CommitmentState, CommitmentType, ComputeDetails, OfferingDetails, PurchaseResult,
    Recommendation, ServiceDetails, ServiceType,
};
use crate::providers::aws::offerings::{duration_matches, no_offering_error};
use crate::providers::aws::AwsContext;
use crate::providers::{json_f64, json_str, json_u64, RecommendationQuery, ServiceClient};
use crate::purchase::{standard_tags, tags_as_key_value_args, EMPTY_RESPONSE_MESSAGE};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;

const DEFAULT_PLATFORM: &str = "Linux/UNIX";
const DEFAULT_TENANCY: &str = "default";

pub struct Ec2Client {
    ctx: AwsContext,
}

impl Ec2Client {
    pub(crate) fn new(ctx: AwsContext) -> Self {
        Self { ctx }
    }

    fn compute_details(recommendation: &Recommendation) -> ComputeDetails {
        match &recommendation.details {
            ServiceDetails::Compute(details) => ComputeDetails {
                platform: if details.platform.is_empty() {
                    DEFAULT_PLATFORM.to_string()
                } else {
                    details.platform.clone()
                },
                tenancy: if details.tenancy.is_empty() {
                    DEFAULT_TENANCY.to_string()
                } else {
                    details.tenancy.clone()
                },
                scope: details.scope.clone(),
            },
            _ => ComputeDetails {
                platform: DEFAULT_PLATFORM.to_string(),
                tenancy: DEFAULT_TENANCY.to_string(),
                scope: "Region".to_string(),
            },
        }
    }

    async fn find_offering(
        &self,
        recommendation: &Recommendation,
        cancel: &CancellationToken,
    ) -> Result<OfferingDetails> {
        let details = Self::compute_details(recommendation);
        let payment_label = recommendation.payment_option.catalog_label();

        let args = vec![
            "ec2".to_string(),
            "describe-reserved-instances-offerings".to_string(),
            "--instance-type".to_string(),
            recommendation.resource_type.clone(),
            "--product-description".to_string(),
            details.platform.clone(),
            "--instance-tenancy".to_string(),
            details.tenancy.clone(),
            "--offering-type".to_string(),
            payment_label.to_string(),
            "--offering-class".to_string(),
            "standard".to_string(),
        ];
        let arg_refs: Vec<&str> = args.iter().map(|s| s.as_str()).collect();
        let pages = self
            .ctx
            .call_paged(cancel, &arg_refs, "--next-token", "NextToken")
            .await?;

        for page in &pages {
            let offerings = match page
                .get("ReservedInstancesOfferings")
                .and_then(|v| v.as_array())
            {
                Some(offerings) => offerings,
                None => continue,
            };
            for offering in offerings {
                if json_str(offering, "InstanceType") != recommendation.resource_type {
                    continue;
                }
                if json_str(offering, "ProductDescription") != details.platform {
                    continue;
                }
                if json_str(offering, "InstanceTenancy") != details.tenancy {
                    continue;
                }
                if !duration_matches(json_u64(offering, "Duration"), recommendation.term) {
                    continue;
                }
                if json_str(offering, "OfferingType") != payment_label {
                    continue;
                }
                return Ok(OfferingDetails {
                    offering_id: json_str(offering, "ReservedInstancesOfferingId").to_string(),
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

    /// Reserved instance purchases take no tags, so they are attached with a
    /// follow-up call. Tagging failure is logged and never fails the purchase.
    async fn tag_reservation(&self, reservation_id: &str, recommendation: &Recommendation) {
        let mut args = vec![
            "ec2".to_string(),
            "create-tags".to_string(),
            "--resources".to_string(),
            reservation_id.to_string(),
            "--tags".to_string(),
        ];
        args.extend(tags_as_key_value_args(&standard_tags(recommendation)));
        let arg_refs: Vec<&str> = args.iter().map(|s| s.as_str()).collect();
        if let Err(err) = self.ctx.call(&arg_refs).await {
            log::warn!("failed to tag reservation {}: {}", reservation_id, err);
        }
    }
}

#[async_trait]
impl ServiceClient for Ec2Client {
    fn service_type(&self) -> ServiceType {
        ServiceType::Compute
    }

    fn region(&self) -> &str {
        self.ctx.region()
    }

    /// EC2 recommendations are served by the centralized Cost Explorer path
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
                &["ec2", "describe-reserved-instances"],
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
                commitments.push(Commitment {
                    commitment_id: json_str(instance, "ReservedInstancesId").to_string(),
                    commitment_type: CommitmentType::ReservedInstance,
                    service: ServiceType::Compute,
                    region: self.ctx.region().to_string(),
                    resource_type: json_str(instance, "InstanceType").to_string(),
                    count: json_u64(instance, "InstanceCount") as u32,
                    state: CommitmentState::parse(json_str(instance, "State")),
                    start_date: json_str(instance, "Start").parse::<DateTime<Utc>>().ok(),
                    end_date: json_str(instance, "End").parse::<DateTime<Utc>>().ok(),
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

        let count = recommendation.count.to_string();
        let args = vec![
            "ec2".to_string(),
            "purchase-reserved-instances-offering".to_string(),
            "--reserved-instances-offering-id".to_string(),
            offering.offering_id.clone(),
            "--instance-count".to_string(),
            count,
        ];
        let arg_refs: Vec<&str> = args.iter().map(|s| s.as_str()).collect();

        match self.ctx.call(&arg_refs).await {
            Ok(response) => {
                let reservation_id = json_str(&response, "ReservedInstancesId");
                if reservation_id.is_empty() {
                    let err = Error::api(EMPTY_RESPONSE_MESSAGE);
                    PurchaseResult::failed(recommendation.clone(), purchase_id, &err)
                } else {
                    self.tag_reservation(reservation_id, recommendation).await;
                    PurchaseResult::succeeded(
                        recommendation.clone(),
                        reservation_id,
                        purchase_id,
                        offering.fixed_price * recommendation.count as f64,
                        format!(
                            "purchased {} reserved instances of {}",
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
                &[
                    "ec2",
                    "describe-instance-type-offerings",
                    "--location-type",
                    "region",
                ],
                "--next-token",
                "NextToken",
            )
            .await?;

        let mut types = Vec::new();
        for page in &pages {
            if let Some(offerings) = page.get("InstanceTypeOfferings").and_then(|v| v.as_array())
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{CloudProvider, PaymentOption, Term};
    use crate::providers::mock::ScriptedCli;
    use std::sync::Arc;

    fn compute_recommendation() -> Recommendation {
        Recommendation {
            provider: CloudProvider::Aws,
            service: ServiceType::Compute,
            account: "123456789012".to_string(),
            region: "us-east-1".to_string(),
            resource_type: "m5.2xlarge".to_string(),
            count: 3,
            payment_option: PaymentOption::NoUpfront,
            term: Term::OneYear,
            commitment_type: CommitmentType::ReservedInstance,
            estimated_savings: 250.0,
            savings_percentage: 30.0,
            commitment_cost: 0.0,
            on_demand_cost: 830.0,
            recurring_monthly_cost: 580.0,
            estimated_monthly_on_demand: 830.0,
            timestamp: Utc::now(),
            description: "test".to_string(),
            coverage: 100.0,
            details: ServiceDetails::Compute(ComputeDetails {
                platform: "Linux/UNIX".to_string(),
                tenancy: "default".to_string(),
                scope: "Region".to_string(),
            }),
        }
    }

    const OFFERING: &str = r#"{"ReservedInstancesOfferings": [{
        "ReservedInstancesOfferingId": "ec2-offer-9",
        "InstanceType": "m5.2xlarge",
        "ProductDescription": "Linux/UNIX",
        "InstanceTenancy": "default",
        "Duration": 31536000,
        "OfferingType": "No Upfront",
        "FixedPrice": 0.0,
        "UsagePrice": 0.21,
        "CurrencyCode": "USD"
    }]}"#;

    #[tokio::test]
    async fn test_offering_match_and_purchase_with_tagging() {
        let cli = Arc::new(ScriptedCli::new());
        cli.respond("describe-reserved-instances-offerings", OFFERING);
        cli.respond(
            "purchase-reserved-instances-offering",
            r#"{"ReservedInstancesId": "ri-0f1e2d3c"}"#,
        );
        cli.respond("create-tags", "{}");
        let client = Ec2Client::new(AwsContext::new(cli.clone(), "us-east-1", None));
        let cancel = CancellationToken::new();

        let result = client
            .purchase_commitment(&compute_recommendation(), &cancel)
            .await;
        assert!(result.success);
        assert_eq!(result.commitment_id, "ri-0f1e2d3c");
        assert_eq!(cli.call_count("create-tags"), 1);
    }

    #[tokio::test]
    async fn test_tenancy_mismatch_is_catalog_miss() {
        let body = OFFERING.replace("\"InstanceTenancy\": \"default\"", "\"InstanceTenancy\": \"dedicated\"");
        let cli = Arc::new(ScriptedCli::new());
        cli.respond("describe-reserved-instances-offerings", &body);
        let client = Ec2Client::new(AwsContext::new(cli, "us-east-1", None));
        let cancel = CancellationToken::new();

        let err = client
            .validate_offering(&compute_recommendation(), &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::CatalogMiss(_)));
    }

    #[tokio::test]
    async fn test_tagging_failure_does_not_fail_purchase() {
        let cli = Arc::new(ScriptedCli::new());
        cli.respond("describe-reserved-instances-offerings", OFFERING);
        cli.respond(
            "purchase-reserved-instances-offering",
            r#"{"ReservedInstancesId": "ri-0f1e2d3c"}"#,
        );
        cli.fail("create-tags", Error::api("tagging unavailable"));
        let client = Ec2Client::new(AwsContext::new(cli, "us-east-1", None));
        let cancel = CancellationToken::new();

        let result = client
            .purchase_commitment(&compute_recommendation(), &cancel)
            .await;
        assert!(result.success);
    }

    #[tokio::test]
    async fn test_existing_commitments() {
        let cli = Arc::new(ScriptedCli::new());
        cli.respond(
            "describe-reserved-instances",
            r#"{"ReservedInstances": [{
                "ReservedInstancesId": "ri-1",
                "InstanceType": "m5.2xlarge",
                "InstanceCount": 3,
                "State": "active",
                "Start": "2025-06-01T00:00:00Z",
                "End": "2026-06-01T00:00:00Z"
            }]}"#,
        );
        let client = Ec2Client::new(AwsContext::new(cli, "us-east-1", None));
        let cancel = CancellationToken::new();

        let commitments = client.get_existing_commitments(&cancel).await.unwrap();
        assert_eq!(commitments.len(), 1);
        assert_eq!(commitments[0].state, CommitmentState::Active);
        assert!(commitments[0].end_date.is_some());
    }
}
