//! Reserved cache node client for ElastiCache.

use crate::error::{Error, Result};
use crate::model::{
    Commitment, CommitmentState, CommitmentType, OfferingDetails, PurchaseResult, Recommendation,
    ServiceType,
};
use crate::providers::aws::offerings::{duration_matches, no_offering_error};
use crate::providers::aws::AwsContext;
use crate::providers::{json_f64, json_str, json_u64, RecommendationQuery, ServiceClient};
use crate::purchase::{
    reservation_id, standard_tags, tags_as_key_value_args, EMPTY_RESPONSE_MESSAGE,
};
use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

pub struct ElastiCacheClient {
    ctx: AwsContext,
}

impl ElastiCacheClient {
    pub(crate) fn new(ctx: AwsContext) -> Self {
        Self { ctx }
    }

    async fn find_offering(
        &self,
        recommendation: &Recommendation,
        cancel: &CancellationToken,
    ) -> Result<OfferingDetails> {
        let engine = recommendation.engine().to_ascii_lowercase();
        let payment_label = recommendation.payment_option.catalog_label();
        let duration = recommendation.term.seconds().to_string();

        let args = vec![
            "elasticache".to_string(),
            "describe-reserved-cache-nodes-offerings".to_string(),
            "--cache-node-type".to_string(),
            recommendation.resource_type.clone(),
            "--product-description".to_string(),
            engine.clone(),
            "--duration".to_string(),
            duration,
            "--offering-type".to_string(),
            payment_label.to_string(),
        ];
        let arg_refs: Vec<&str> = args.iter().map(|s| s.as_str()).collect();
        let pages = self
            .ctx
            .call_paged(cancel, &arg_refs, "--marker", "Marker")
            .await?;

        for page in &pages {
            let offerings = match page
                .get("ReservedCacheNodesOfferings")
                .and_then(|v| v.as_array())
            {
                Some(offerings) => offerings,
                None => continue,
            };
            for offering in offerings {
                if json_str(offering, "CacheNodeType") != recommendation.resource_type {
                    continue;
                }
                if !json_str(offering, "ProductDescription").eq_ignore_ascii_case(&engine) {
                    continue;
                }
                if !duration_matches(json_u64(offering, "Duration"), recommendation.term) {
                    continue;
                }
                if json_str(offering, "OfferingType") != payment_label {
                    continue;
                }
                return Ok(OfferingDetails {
                    offering_id: json_str(offering, "ReservedCacheNodesOfferingId").to_string(),
                    resource_type: recommendation.resource_type.clone(),
                    duration_seconds: json_u64(offering, "Duration"),
                    payment_option: recommendation.payment_option,
                    fixed_price: json_f64(offering, "FixedPrice"),
                    usage_price: recurring_or_usage(offering),
                    currency: json_str(offering, "CurrencyCode").to_string(),
                });
            }
        }
        Err(no_offering_error(recommendation))
    }
}

fn recurring_or_usage(offering: &Value) -> f64 {
    if let Some(charges) = offering.get("RecurringCharges").and_then(|v| v.as_array()) {
        if let Some(first) = charges.first() {
            let amount = json_f64(first, "RecurringChargeAmount");
            if amount > 0.0 {
                return amount;
            }
        }
    }
    json_f64(offering, "UsagePrice")
}

#[async_trait]
impl ServiceClient for ElastiCacheClient {
    fn service_type(&self) -> ServiceType {
        ServiceType::Cache
    }

    fn region(&self) -> &str {
        self.ctx.region()
    }

    /// Cache recommendations are served by the centralized Cost Explorer path
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
                &["elasticache", "describe-reserved-cache-nodes"],
                "--marker",
                "Marker",
            )
            .await?;

        let mut commitments = Vec::new();
        for page in &pages {
            let reserved = match page.get("ReservedCacheNodes").and_then(|v| v.as_array()) {
                Some(reserved) => reserved,
                None => continue,
            };
            for node in reserved {
                let start_date = json_str(node, "StartTime").parse::<DateTime<Utc>>().ok();
                let end_date = start_date
                    .map(|start| start + ChronoDuration::seconds(json_u64(node, "Duration") as i64));
                commitments.push(Commitment {
                    commitment_id: json_str(node, "ReservedCacheNodeId").to_string(),
                    commitment_type: CommitmentType::ReservedInstance,
                    service: ServiceType::Cache,
                    region: self.ctx.region().to_string(),
                    resource_type: json_str(node, "CacheNodeType").to_string(),
                    count: json_u64(node, "CacheNodeCount") as u32,
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

        let node_id = reservation_id(
            ServiceType::Cache,
            &recommendation.resource_type,
            Utc::now().timestamp(),
        );
        let count = recommendation.count.to_string();
        let mut args = vec![
            "elasticache".to_string(),
            "purchase-reserved-cache-nodes-offering".to_string(),
            "--reserved-cache-nodes-offering-id".to_string(),
            offering.offering_id.clone(),
            "--reserved-cache-node-id".to_string(),
            node_id,
            "--cache-node-count".to_string(),
            count,
            "--tags".to_string(),
        ];
        args.extend(tags_as_key_value_args(&standard_tags(recommendation)));
        let arg_refs: Vec<&str> = args.iter().map(|s| s.as_str()).collect();

        match self.ctx.call(&arg_refs).await {
            Ok(response) => {
                let reserved = response.get("ReservedCacheNode").unwrap_or(&Value::Null);
                let commitment_id = json_str(reserved, "ReservedCacheNodeId");
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
                            "purchased {} reserved cache nodes of {}",
                            recommendation.count, recommendation.resource_type
                        ),
                    )
                }
            }
            Err(err) => {
                let wrapped = Error::api(format!("reserved cache node purchase failed: {}", err));
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
                &["elasticache", "describe-reserved-cache-nodes-offerings"],
                "--marker",
                "Marker",
            )
            .await?;

        let mut types = Vec::new();
        for page in &pages {
            if let Some(offerings) = page
                .get("ReservedCacheNodesOfferings")
                .and_then(|v| v.as_array())
            {
                for offering in offerings {
                    let node_type = json_str(offering, "CacheNodeType");
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
