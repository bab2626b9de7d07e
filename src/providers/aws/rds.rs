//! Reserved DB instance client for the relational database service.
//!
//! Recommendations come from the centralized Cost Explorer path, so this
//! client's recommendation listing is intentionally empty. Offering
//! resolution pre-filters server-side as tightly as the API allows and then
//! joint-matches client-side in API order.

use crate::error::{Error, Result};
use crate::model::{
    AzConfig, Commitment, CommitmentState, CommitmentType, OfferingDetails, PurchaseResult,
    Recommendation, ServiceType,
};
use crate::providers::aws::offerings::{duration_matches, no_offering_error, normalize_engine};
use crate::providers::aws::AwsContext;
use crate::providers::{json_bool, json_f64, json_str, json_u64, RecommendationQuery, ServiceClient};
use crate::purchase::{
    reservation_id, standard_tags, tags_as_key_value_args, EMPTY_RESPONSE_MESSAGE,
};
use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

pub struct RdsClient {
    ctx: AwsContext,
}

impl RdsClient {
    pub(crate) fn new(ctx: AwsContext) -> Self {
        Self { ctx }
    }

    async fn find_offering(
        &self,
        recommendation: &Recommendation,
        cancel: &CancellationToken,
    ) -> Result<OfferingDetails> {
        let engine = normalize_engine(recommendation.engine());
        let multi_az = recommendation
            .az_config()
            .map(|az_config| az_config.is_multi_az())
            .unwrap_or(false);
        let duration = recommendation.term.seconds().to_string();
        let payment_label = recommendation.payment_option.catalog_label();

        let args = vec![
            "rds".to_string(),
            "describe-reserved-db-instances-offerings".to_string(),
            "--db-instance-class".to_string(),
            recommendation.resource_type.clone(),
            "--product-description".to_string(),
            engine.clone(),
            "--duration".to_string(),
            duration,
            "--offering-type".to_string(),
            payment_label.to_string(),
            if multi_az {
                "--multi-az".to_string()
            } else {
                "--no-multi-az".to_string()
            },
        ];
        let arg_refs: Vec<&str> = args.iter().map(|s| s.as_str()).collect();
        let pages = self
            .ctx
            .call_paged(cancel, &arg_refs, "--marker", "Marker")
            .await?;

        for page in &pages {
            let offerings = match page
                .get("ReservedDBInstancesOfferings")
                .and_then(|v| v.as_array())
            {
                Some(offerings) => offerings,
                None => continue,
            };
            for offering in offerings {
                if json_str(offering, "DBInstanceClass") != recommendation.resource_type {
                    continue;
                }
                if normalize_engine(json_str(offering, "ProductDescription")) != engine {
                    continue;
                }
                if json_bool(offering, "MultiAZ") != multi_az {
                    continue;
                }
                if !duration_matches(json_u64(offering, "Duration"), recommendation.term) {
                    continue;
                }
                if json_str(offering, "OfferingType") != payment_label {
                    continue;
                }
                return Ok(OfferingDetails {
                    offering_id: json_str(offering, "ReservedDBInstancesOfferingId").to_string(),
                    resource_type: recommendation.resource_type.clone(),
                    duration_seconds: json_u64(offering, "Duration"),
                    payment_option: recommendation.payment_option,
                    fixed_price: json_f64(offering, "FixedPrice"),
                    usage_price: usage_price_of(offering),
                    currency: json_str(offering, "CurrencyCode").to_string(),
                });
            }
        }
        Err(no_offering_error(recommendation))
    }
}

/// Recurring hourly charge, preferring the explicit recurring charge list
fn usage_price_of(offering: &Value) -> f64 {
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
impl ServiceClient for RdsClient {
    fn service_type(&self) -> ServiceType {
        ServiceType::RelationalDb
    }

    fn region(&self) -> &str {
        self.ctx.region()
    }

    /// RDS recommendations are served by the centralized Cost Explorer
    /// endpoint; the per-service listing is empty by contract.
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
                &["rds", "describe-reserved-db-instances"],
                "--marker",
                "Marker",
            )
            .await?;

        let mut commitments = Vec::new();
        for page in &pages {
            let reserved = match page.get("ReservedDBInstances").and_then(|v| v.as_array()) {
                Some(reserved) => reserved,
                None => continue,
            };
            for instance in reserved {
                let start_date = json_str(instance, "StartTime")
                    .parse::<DateTime<Utc>>()
                    .ok();
                let duration_seconds = json_u64(instance, "Duration") as i64;
                let end_date =
                    start_date.map(|start| start + ChronoDuration::seconds(duration_seconds));
                commitments.push(Commitment {
                    commitment_id: json_str(instance, "ReservedDBInstanceId").to_string(),
                    commitment_type: CommitmentType::ReservedInstance,
                    service: ServiceType::RelationalDb,
                    region: self.ctx.region().to_string(),
                    resource_type: json_str(instance, "DBInstanceClass").to_string(),
                    count: json_u64(instance, "DBInstanceCount") as u32,
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

        let db_instance_id = reservation_id(
            ServiceType::RelationalDb,
            &recommendation.resource_type,
            Utc::now().timestamp(),
        );
        let count = recommendation.count.to_string();
        let mut args = vec![
            "rds".to_string(),
            "purchase-reserved-db-instances-offering".to_string(),
            "--reserved-db-instances-offering-id".to_string(),
            offering.offering_id.clone(),
            "--reserved-db-instance-id".to_string(),
            db_instance_id,
            "--db-instance-count".to_string(),
            count,
            "--tags".to_string(),
        ];
        args.extend(tags_as_key_value_args(&standard_tags(recommendation)));
        let arg_refs: Vec<&str> = args.iter().map(|s| s.as_str()).collect();

        match self.ctx.call(&arg_refs).await {
            Ok(response) => {
                let reserved = response.get("ReservedDBInstance").unwrap_or(&Value::Null);
                let commitment_id = json_str(reserved, "ReservedDBInstanceId");
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
                &["rds", "describe-reserved-db-instances-offerings"],
                "--marker",
                "Marker",
            )
            .await?;

        let mut types = Vec::new();
        for page in &pages {
            if let Some(offerings) = page
                .get("ReservedDBInstancesOfferings")
                .and_then(|v| v.as_array())
            {
                for offering in offerings {
                    let class = json_str(offering, "DBInstanceClass");
                    if !class.is_empty() {
                        types.push(class.to_string());
                    }
                }
            }
        }
        types.sort();
        types.dedup();
        Ok(types)
    }
}
