//! Centralized AWS recommendation ingestion through Cost Explorer.
//!
//! One paginated listing per (service, payment option, term, lookback). Every
//! recommendation detail is parsed independently: a detail that fails to
//! parse is skipped with a warning and never aborts the batch, and details
//! outside the target region are filtered out.

use crate::error::{Error, Result};
use crate::model::{
    AzConfig, CacheDetails, CloudProvider, CommitmentType, ComputeDetails, DataWarehouseDetails,
    DatabaseDetails, MemoryDbDetails, PaymentOption, Recommendation, SearchDetails,
    ServiceDetails, ServiceType,
};
use crate::providers::aws::offerings::normalize_engine;
use crate::providers::aws::{savings_plans, AwsContext};
use crate::providers::{
    json_str, parse_money, parse_quantity, CloudCli, RecommendationQuery, RecommendationsClient,
};
use crate::regions::normalize_region;
use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Cost Explorer is served out of us-east-1 regardless of the target region
const COST_EXPLORER_REGION: &str = "us-east-1";

/// Resource type used when MemoryDB details come back unstructured
pub const DEFAULT_MEMORYDB_NODE_TYPE: &str = "db.r6g.large";

/// Services Cost Explorer produces reservation recommendations for
const COST_EXPLORER_SERVICES: &[ServiceType] = &[
    ServiceType::RelationalDb,
    ServiceType::Cache,
    ServiceType::Compute,
    ServiceType::Search,
    ServiceType::DataWarehouse,
    ServiceType::MemoryDb,
];

/// Centralized recommendations client for AWS
pub struct AwsRecommendationsClient {
    ce: AwsContext,
    target_region: String,
}

impl AwsRecommendationsClient {
    pub fn new(cli: Arc<dyn CloudCli>, target_region: &str, profile: Option<String>) -> Self {
        Self {
            ce: AwsContext::new(cli, COST_EXPLORER_REGION, profile),
            target_region: target_region.to_string(),
        }
    }

    fn lookback_label(days: u32) -> &'static str {
        match days {
            7 => "SEVEN_DAYS",
            30 => "THIRTY_DAYS",
            _ => "SIXTY_DAYS",
        }
    }

    async fn reservation_recommendations(
        &self,
        service: ServiceType,
        query: &RecommendationQuery,
        cancel: &CancellationToken,
    ) -> Result<Vec<Recommendation>> {
        let lookback = Self::lookback_label(query.lookback_days);
        let mut args = vec![
            "ce",
            "get-reservation-purchase-recommendation",
            "--service",
            service.catalog_label(),
            "--lookback-period-in-days",
            lookback,
            "--term-in-years",
            query.term.api_label(),
            "--payment-option",
            query.payment_option.api_label(),
        ];
        if let Some(ref account) = query.account {
            args.push("--account-id");
            args.push(account);
        }

        let pages = self
            .ce
            .call_paged(cancel, &args, "--next-page-token", "NextPageToken")
            .await?;

        let mut recommendations = Vec::new();
        for page in &pages {
            let outer = match page.get("Recommendations").and_then(|v| v.as_array()) {
                Some(entries) => entries,
                None => continue,
            };
            for entry in outer {
                let account = json_str(entry, "AccountId").to_string();
                let details = match entry.get("RecommendationDetails").and_then(|v| v.as_array())
                {
                    Some(details) => details,
                    None => continue,
                };
                // Walk every detail entry, not just the first.
                for detail in details {
                    if let Some(recommendation) =
                        self.parse_detail(service, query, &account, detail)
                    {
                        recommendations.push(recommendation);
                    }
                }
            }
        }
        Ok(recommendations)
    }

    /// Parse one recommendation detail. Returns None when the detail is out
    /// of region, unparseable, or rounds to a zero quantity.
    fn parse_detail(
        &self,
        service: ServiceType,
        query: &RecommendationQuery,
        outer_account: &str,
        detail: &Value,
    ) -> Option<Recommendation> {
        let (resource_type, region_raw, payload) = match extract_instance_details(service, detail)
        {
            Ok(extracted) => extracted,
            Err(err) => {
                log::warn!("skipping {} recommendation detail: {}", service, err);
                return None;
            }
        };

        let region = if region_raw.is_empty() {
            self.target_region.clone()
        } else {
            normalize_region(&region_raw)
        };
        if region != self.target_region {
            log::debug!(
                "skipping {} detail in {}, target region is {}",
                service,
                region,
                self.target_region
            );
            return None;
        }

        let quantity_raw = json_str(detail, "RecommendedNumberOfInstancesToPurchase");
        let count = match parse_quantity(quantity_raw) {
            Some(count) => count,
            None => {
                log::warn!(
                    "skipping {} detail for {}: unparseable quantity {:?}",
                    service,
                    resource_type,
                    quantity_raw
                );
                return None;
            }
        };
        if count == 0 {
            log::debug!(
                "skipping {} detail for {}: zero recommended quantity",
                service,
                resource_type
            );
            return None;
        }

        let estimated_savings = parse_money(json_str(detail, "EstimatedMonthlySavingsAmount"));
        let savings_percentage =
            parse_money(json_str(detail, "EstimatedMonthlySavingsPercentage")).clamp(0.0, 100.0);
        let commitment_cost = parse_money(json_str(detail, "UpfrontCost"));
        let on_demand_cost = parse_money(json_str(detail, "CurrentMonthlyOnDemandCost"));

        let mut estimated_monthly_on_demand =
            parse_money(json_str(detail, "EstimatedMonthlyOnDemandCost"));
        if estimated_monthly_on_demand == 0.0 && savings_percentage > 0.0 {
            estimated_monthly_on_demand = estimated_savings / (savings_percentage / 100.0);
        }

        let mut recurring_monthly_cost =
            parse_money(json_str(detail, "RecurringStandardMonthlyCost"));
        if query.payment_option == PaymentOption::AllUpfront {
            recurring_monthly_cost = 0.0;
        } else if recurring_monthly_cost == 0.0 {
            recurring_monthly_cost = (estimated_monthly_on_demand - estimated_savings).max(0.0);
        }

        let account = {
            let detail_account = json_str(detail, "AccountId");
            if detail_account.is_empty() {
                outer_account.to_string()
            } else {
                detail_account.to_string()
            }
        };

        let description = match payload.engine() {
            Some(engine) if !engine.is_empty() => format!(
                "{} reservation recommendation ({})",
                service.display_name(),
                engine
            ),
            _ => format!("{} reservation recommendation", service.display_name()),
        };

        Some(Recommendation {
            provider: CloudProvider::Aws,
            service,
            account,
            region,
            resource_type,
            count,
            payment_option: query.payment_option,
            term: query.term,
            commitment_type: CommitmentType::ReservedInstance,
            estimated_savings,
            savings_percentage,
            commitment_cost,
            on_demand_cost,
            recurring_monthly_cost,
            estimated_monthly_on_demand,
            timestamp: Utc::now(),
            description,
            coverage: 100.0,
            details: payload,
        })
    }
}

/// Pull the service-specific payload out of a detail's InstanceDetails.
/// Returns (resource type, raw region label, payload).
fn extract_instance_details(
    service: ServiceType,
    detail: &Value,
) -> Result<(String, String, ServiceDetails)> {
    let instance_details = detail.get("InstanceDetails").unwrap_or(&Value::Null);

    match service {
        ServiceType::RelationalDb => {
            let rds = instance_details
                .get("RDSInstanceDetails")
                .ok_or_else(|| Error::parsing("missing RDSInstanceDetails"))?;
            let resource_type = json_str(rds, "InstanceType").to_string();
            if resource_type.is_empty() {
                return Err(Error::parsing("RDS detail has no instance type"));
            }
            let engine = normalize_engine(json_str(rds, "DatabaseEngine"));
            if engine.is_empty() {
                return Err(Error::parsing("RDS detail has no database engine"));
            }
            let az_config = if json_str(rds, "DeploymentOption").eq_ignore_ascii_case("Multi-AZ")
            {
                AzConfig::MultiAz
            } else {
                AzConfig::SingleAz
            };
            Ok((
                resource_type,
                json_str(rds, "Region").to_string(),
                ServiceDetails::Database(DatabaseDetails { engine, az_config }),
            ))
        }
        ServiceType::Cache => {
            let cache = instance_details
                .get("ElastiCacheInstanceDetails")
                .ok_or_else(|| Error::parsing("missing ElastiCacheInstanceDetails"))?;
            let node_type = json_str(cache, "NodeType").to_string();
            if node_type.is_empty() {
                return Err(Error::parsing("ElastiCache detail has no node type"));
            }
            let engine = json_str(cache, "ProductDescription").to_ascii_lowercase();
            if engine.is_empty() {
                return Err(Error::parsing("ElastiCache detail has no product description"));
            }
            Ok((
                node_type.clone(),
                json_str(cache, "Region").to_string(),
                ServiceDetails::Cache(CacheDetails { engine, node_type }),
            ))
        }
        ServiceType::Compute => {
            let ec2 = instance_details
                .get("EC2InstanceDetails")
                .ok_or_else(|| Error::parsing("missing EC2InstanceDetails"))?;
            let instance_type = json_str(ec2, "InstanceType").to_string();
            if instance_type.is_empty() {
                return Err(Error::parsing("EC2 detail has no instance type"));
            }
            let availability_zone = json_str(ec2, "AvailabilityZone");
            let scope = if availability_zone.is_empty() {
                "Region".to_string()
            } else {
                "Availability Zone".to_string()
            };
            Ok((
                instance_type,
                json_str(ec2, "Region").to_string(),
                ServiceDetails::Compute(ComputeDetails {
                    platform: json_str(ec2, "Platform").to_string(),
                    tenancy: json_str(ec2, "Tenancy").to_string(),
                    scope,
                }),
            ))
        }
        ServiceType::Search => {
            let es = instance_details
                .get("ESInstanceDetails")
                .ok_or_else(|| Error::parsing("missing ESInstanceDetails"))?;
            let class = json_str(es, "InstanceClass");
            let size = json_str(es, "InstanceSize");
            if class.is_empty() {
                return Err(Error::parsing("OpenSearch detail has no instance class"));
            }
            let instance_type = if class.ends_with(".search") {
                class.to_string()
            } else if size.is_empty() {
                format!("{}.search", class)
            } else {
                format!("{}.{}.search", class, size)
            };
            Ok((
                instance_type.clone(),
                json_str(es, "Region").to_string(),
                ServiceDetails::Search(SearchDetails {
                    instance_type,
                    master_enabled: false,
                    master_type: None,
                    master_count: 0,
                }),
            ))
        }
        ServiceType::DataWarehouse => {
            let redshift = instance_details
                .get("RedshiftInstanceDetails")
                .ok_or_else(|| Error::parsing("missing RedshiftInstanceDetails"))?;
            let node_type = json_str(redshift, "NodeType").to_string();
            if node_type.is_empty() {
                return Err(Error::parsing("Redshift detail has no node type"));
            }
            let node_count = parse_quantity(json_str(
                detail,
                "RecommendedNumberOfInstancesToPurchase",
            ))
            .unwrap_or(1)
            .max(1);
            let cluster_type = if node_count > 1 {
                "multi-node".to_string()
            } else {
                "single-node".to_string()
            };
            Ok((
                node_type.clone(),
                json_str(redshift, "Region").to_string(),
                ServiceDetails::DataWarehouse(DataWarehouseDetails {
                    node_type,
                    node_count,
                    cluster_type,
                }),
            ))
        }
        // MemoryDB recommendations come back without structured instance
        // details, so the resource type falls back to a default node class.
        ServiceType::MemoryDb => Ok((
            DEFAULT_MEMORYDB_NODE_TYPE.to_string(),
            String::new(),
            ServiceDetails::MemoryDb(MemoryDbDetails {
                engine: "redis".to_string(),
                node_type: DEFAULT_MEMORYDB_NODE_TYPE.to_string(),
            }),
        )),
        ServiceType::NoSqlDb | ServiceType::SavingsPlans => Err(Error::unsupported(format!(
            "{} recommendations are not served by Cost Explorer reservation listings",
            service
        ))),
    }
}

#[async_trait]
impl RecommendationsClient for AwsRecommendationsClient {
    async fn get_recommendations(
        &self,
        query: &RecommendationQuery,
        cancel: &CancellationToken,
    ) -> Result<Vec<Recommendation>> {
        let services: Vec<ServiceType> = if query.services.is_empty() {
            COST_EXPLORER_SERVICES.to_vec()
        } else {
            query.services.clone()
        };

        let mut all = Vec::new();
        for service in services {
            if cancel.is_cancelled() {
                return Err(Error::cancelled("recommendation ingestion cancelled"));
            }
            match service {
                ServiceType::SavingsPlans => {
                    let plans = savings_plans::savings_plans_recommendations(
                        &self.ce,
                        &self.target_region,
                        query,
                        cancel,
                    )
                    .await?;
                    all.extend(plans);
                }
                ServiceType::NoSqlDb => {
                    log::debug!("NoSQL reservations have no Cost Explorer recommendation path");
                }
                _ => {
                    let recommendations = self
                        .reservation_recommendations(service, query, cancel)
                        .await?;
                    all.extend(recommendations);
                }
            }
        }
        Ok(all)
    }
}
