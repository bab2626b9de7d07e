//! Reserved node client for the Redshift data warehouse service.

use crate::error::{Error, Result};
use crate::model::{
    Commitment, CommitmentState, CommitmentType, OfferingDetails, PurchaseResult, Recommendation,
    ServiceType,
};
use crate::providers::aws::offerings::{duration_matches, no_offering_error};
use crate::providers::aws::AwsContext;
use crate::providers::{json_f64, json_str, json_u64, RecommendationQuery, ServiceClient};
use crate::purchase::EMPTY_RESPONSE_MESSAGE;
use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

pub struct RedshiftClient {
    ctx: AwsContext,
}

impl RedshiftClient {
    pub(crate) fn new(ctx: AwsContext) -> Self {
        Self { ctx }
    }

    async fn find_offering(
        &self,
        recommendation: &Recommendation,
        cancel: &CancellationToken,
    ) -> Result<OfferingDetails> {
        let payment_label = recommendation.payment_option.catalog_label();
        let pages = self
            .ctx
            .call_paged(
                cancel,
                &["redshift", "describe-reserved-node-offerings"],
                "--marker",
                "Marker",
            )
            .await?;

        for page in &pages {
            let offerings = match page.get("ReservedNodeOfferings").and_then(|v| v.as_array()) {
                Some(offerings) => offerings,
                None => continue,
            };
            for offering in offerings {
                if json_str(offering, "NodeType") != recommendation.resource_type {
                    continue;
                }
                if !duration_matches(json_u64(offering, "Duration"), recommendation.term) {
                    continue;
                }
                if json_str(offering, "OfferingType") != payment_label {
                    continue;
                }
                return Ok(OfferingDetails {
                    offering_id: json_str(offering, "ReservedNodeOfferingId").to_string(),
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
impl ServiceClient for RedshiftClient {
    fn service_type(&self) -> ServiceType {
        ServiceType::DataWarehouse
    }

    fn region(&self) -> &str {
        self.ctx.region()
    }

    /// Redshift recommendations are served by the centralized Cost Explorer path
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
                &["redshift", "describe-reserved-nodes"],
                "--marker",
                "Marker",
            )
            .await?;

        let mut commitments = Vec::new();
        for page in &pages {
            let reserved = match page.get("ReservedNodes").and_then(|v| v.as_array()) {
                Some(reserved) => reserved,
                None => continue,
            };
            for node in reserved {
                let start_date = json_str(node, "StartTime").parse::<DateTime<Utc>>().ok();
                let end_date = start_date
                    .map(|start| start + ChronoDuration::seconds(json_u64(node, "Duration") as i64));
                commitments.push(Commitment {
                    commitment_id: json_str(node, "ReservedNodeId").to_string(),
                    commitment_type: CommitmentType::ReservedInstance,
                    service: ServiceType::DataWarehouse,
                    region: self.ctx.region().to_string(),
                    resource_type: json_str(node, "NodeType").to_string(),
                    count: json_u64(node, "NodeCount") as u32,
                    state: CommitmentState::parse(json_str(node, "State")),
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

        let count = recommendation.count.to_string();
        let args = vec![
            "redshift".to_string(),
            "purchase-reserved-node-offering".to_string(),
            "--reserved-node-offering-id".to_string(),
            offering.offering_id.clone(),
            "--node-count".to_string(),
            count,
        ];
        let arg_refs: Vec<&str> = args.iter().map(|s| s.as_str()).collect();

        match self.ctx.call(&arg_refs).await {
            Ok(response) => {
                let reserved = response.get("ReservedNode").unwrap_or(&Value::Null);
                let commitment_id = json_str(reserved, "ReservedNodeId");
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
                            "purchased {} reserved nodes of {}",
                            recommendation.count, recommendation.resource_type
                        ),
                    )
                }
            }
            Err(err) => {
                let wrapped = Error::api(format!("reserved node purchase failed: {}", err));
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
                &["redshift", "describe-reserved-node-offerings"],
                "--marker",
                "Marker",
            )
            .await?;

        let mut types = Vec::new();
        for page in &pages {
            if let Some(offerings) = page.get("ReservedNodeOfferings").and_then(|v| v.as_array())
            {
                for offering in offerings {
                    let node_type = json_str(offering, "NodeType");
                    if !node_type.is_empty() {
                        types.push(node_type.to_string());
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
    use crate::model::{
        CloudProvider, DataWarehouseDetails, PaymentOption, ServiceDetails, Term,
    };
    use crate::providers::mock::ScriptedCli;
    use std::sync::Arc;

    fn warehouse_recommendation() -> Recommendation {
        Recommendation {
            provider: CloudProvider::Aws,
            service: ServiceType::DataWarehouse,
            account: "123456789012".to_string(),
            region: "us-east-1".to_string(),
            resource_type: "ra3.xlplus".to_string(),
            count: 2,
            payment_option: PaymentOption::PartialUpfront,
            term: Term::ThreeYear,
            commitment_type: CommitmentType::ReservedInstance,
            estimated_savings: 400.0,
            savings_percentage: 45.0,
            commitment_cost: 8000.0,
            on_demand_cost: 890.0,
            recurring_monthly_cost: 490.0,
            estimated_monthly_on_demand: 890.0,
            timestamp: Utc::now(),
            description: "test".to_string(),
            coverage: 100.0,
            details: ServiceDetails::DataWarehouse(DataWarehouseDetails {
                node_type: "ra3.xlplus".to_string(),
                node_count: 2,
                cluster_type: "multi-node".to_string(),
            }),
        }
    }

    #[tokio::test]
    async fn test_offering_match_and_purchase() {
        let cli = Arc::new(ScriptedCli::new());
        cli.respond(
            "describe-reserved-node-offerings",
            r#"{"ReservedNodeOfferings": [{
                "ReservedNodeOfferingId": "rs-offer-1",
                "NodeType": "ra3.xlplus",
                "Duration": 94608000,
                "OfferingType": "Partial Upfront",
                "FixedPrice": 4000.0,
                "UsagePrice": 0.3,
                "CurrencyCode": "USD"
            }]}"#,
        );
        cli.respond(
            "purchase-reserved-node-offering",
            r#"{"ReservedNode": {"ReservedNodeId": "rn-77", "FixedPrice": 4000.0}}"#,
        );
        let client = RedshiftClient::new(AwsContext::new(cli, "us-east-1", None));
        let cancel = CancellationToken::new();

        let result = client
            .purchase_commitment(&warehouse_recommendation(), &cancel)
            .await;
        assert!(result.success);
        assert_eq!(result.commitment_id, "rn-77");
        assert_eq!(result.actual_cost, 4000.0);
    }

    #[tokio::test]
    async fn test_empty_purchase_response() {
        let cli = Arc::new(ScriptedCli::new());
        cli.respond(
            "describe-reserved-node-offerings",
            r#"{"ReservedNodeOfferings": [{
                "ReservedNodeOfferingId": "rs-offer-1",
                "NodeType": "ra3.xlplus",
                "Duration": 94608000,
                "OfferingType": "Partial Upfront",
                "FixedPrice": 4000.0,
                "UsagePrice": 0.3,
                "CurrencyCode": "USD"
            }]}"#,
        );
        cli.respond("purchase-reserved-node-offering", "null");
        let client = RedshiftClient::new(AwsContext::new(cli, "us-east-1", None));
        let cancel = CancellationToken::new();

        let result = client
            .purchase_commitment(&warehouse_recommendation(), &cancel)
            .await;
        assert!(!result.success);
        assert!(result
            .error
            .as_deref()
            .unwrap()
            .contains(EMPTY_RESPONSE_MESSAGE));
    }
}
