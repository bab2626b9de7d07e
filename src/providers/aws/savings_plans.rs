//! Savings Plans: per-plan-type recommendation queries and plan purchase.
//!
//! Each plan type is queried independently through one shared retry gate; a
//! failing plan type is logged and never aborts the others.

use crate::error::{Error, Result};
use crate::model::{
    CloudProvider, Commitment, CommitmentState, CommitmentType, OfferingDetails, PaymentOption,
    PurchaseResult, Recommendation, SavingsPlanDetails, ServiceDetails, ServiceType,
};
use crate::providers::aws::AwsContext;
use crate::providers::{json_str, json_u64, parse_money, RecommendationQuery, ServiceClient};
use crate::purchase::{standard_tags, tags_as_shorthand, EMPTY_RESPONSE_MESSAGE};
use crate::retry::RetryPolicy;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;

/// Plan types queried by the recommendation sweep: (slug, API label)
pub const PLAN_TYPES: &[(&str, &str)] = &[
    ("compute", "COMPUTE_SP"),
    ("ec2-instance", "EC2_INSTANCE_SP"),
    ("sagemaker", "SAGEMAKER_SP"),
    ("database", "DATABASE_SP"),
];

/// Hours used to turn an hourly commitment into a monthly recurring cost
const HOURS_PER_MONTH: f64 = 730.0;

fn lookback_label(days: u32) -> &'static str {
    match days {
        7 => "SEVEN_DAYS",
        30 => "THIRTY_DAYS",
        _ => "SIXTY_DAYS",
    }
}

/// Fetch Savings Plans recommendations for every selected plan type. One
/// retry gate covers the whole sweep; a plan type that fails is skipped with
/// a warning so the remaining types still report.
pub(crate) async fn savings_plans_recommendations(
    ctx: &AwsContext,
    target_region: &str,
    query: &RecommendationQuery,
    cancel: &CancellationToken,
) -> Result<Vec<Recommendation>> {
    let mut policy = RetryPolicy::default();
    let mut recommendations = Vec::new();

    for (slug, api_label) in PLAN_TYPES {
        if !query.plan_type_selected(slug) {
            log::debug!("plan type {} filtered out", slug);
            continue;
        }
        if cancel.is_cancelled() {
            return Err(Error::cancelled("savings plans sweep cancelled"));
        }

        match fetch_plan_type(ctx, &mut policy, target_region, slug, api_label, query, cancel)
            .await
        {
            Ok(mut batch) => recommendations.append(&mut batch),
            Err(err) if err.is_cancelled() => return Err(err),
            Err(err) => {
                log::warn!("savings plans query for {} failed: {}", slug, err);
            }
        }
    }
    Ok(recommendations)
}

async fn fetch_plan_type(
    ctx: &AwsContext,
    policy: &mut RetryPolicy,
    target_region: &str,
    slug: &str,
    api_label: &str,
    query: &RecommendationQuery,
    cancel: &CancellationToken,
) -> Result<Vec<Recommendation>> {
    let mut recommendations = Vec::new();
    let mut token: Option<String> = None;

    loop {
        let mut args = vec![
            "ce".to_string(),
            "get-savings-plans-purchase-recommendation".to_string(),
            "--savings-plans-type".to_string(),
            api_label.to_string(),
            "--term-in-years".to_string(),
            query.term.api_label().to_string(),
            "--payment-option".to_string(),
            query.payment_option.api_label().to_string(),
            "--lookback-period-in-days".to_string(),
            lookback_label(query.lookback_days).to_string(),
        ];
        if let Some(ref t) = token {
            args.push("--next-page-token".to_string());
            args.push(t.clone());
        }
        let arg_refs: Vec<&str> = args.iter().map(|s| s.as_str()).collect();
        let page = ctx.call_retry(policy, cancel, &arg_refs).await?;

        let recommendation = page
            .get("SavingsPlansPurchaseRecommendation")
            .unwrap_or(&serde_json::Value::Null);
        if let Some(details) = recommendation
            .get("SavingsPlansPurchaseRecommendationDetails")
            .and_then(|v| v.as_array())
        {
            for detail in details {
                if let Some(rec) = parse_plan_detail(target_region, slug, query, detail) {
                    recommendations.push(rec);
                }
            }
        }

        token = page
            .get("NextPageToken")
            .and_then(|v| v.as_str())
            .filter(|t| !t.is_empty())
            .map(|t| t.to_string());
        if token.is_none() {
            return Ok(recommendations);
        }
    }
}

fn parse_plan_detail(
    target_region: &str,
    slug: &str,
    query: &RecommendationQuery,
    detail: &serde_json::Value,
) -> Option<Recommendation> {
    let plan = detail
        .get("SavingsPlansDetails")
        .unwrap_or(&serde_json::Value::Null);
    let region = crate::regions::normalize_region(json_str(plan, "Region"));
    if !region.is_empty() && region != target_region {
        log::debug!("skipping {} plan detail in {}", slug, region);
        return None;
    }

    let hourly_commitment = parse_money(json_str(detail, "HourlyCommitmentToPurchase"));
    if hourly_commitment <= 0.0 {
        log::warn!(
            "skipping {} plan detail: no hourly commitment to purchase",
            slug
        );
        return None;
    }

    let estimated_savings = parse_money(json_str(detail, "EstimatedMonthlySavingsAmount"));
    let savings_percentage =
        parse_money(json_str(detail, "EstimatedSavingsPercentage")).clamp(0.0, 100.0);
    let commitment_cost = parse_money(json_str(detail, "UpfrontCost"));
    let coverage = parse_money(json_str(detail, "EstimatedAverageUtilization"));

    let mut estimated_monthly_on_demand = parse_money(json_str(detail, "EstimatedOnDemandCost"));
    if estimated_monthly_on_demand == 0.0 && savings_percentage > 0.0 {
        estimated_monthly_on_demand = estimated_savings / (savings_percentage / 100.0);
    }
    let recurring_monthly_cost = if query.payment_option == PaymentOption::AllUpfront {
        0.0
    } else {
        hourly_commitment * HOURS_PER_MONTH
    };

    let instance_family = json_str(plan, "InstanceFamily");
    let resource_type = if instance_family.is_empty() {
        slug.to_string()
    } else {
        instance_family.to_string()
    };

    Some(Recommendation {
        provider: CloudProvider::Aws,
        service: ServiceType::SavingsPlans,
        account: json_str(detail, "AccountId").to_string(),
        region: if region.is_empty() {
            target_region.to_string()
        } else {
            region
        },
        resource_type,
        count: 1,
        payment_option: query.payment_option,
        term: query.term,
        commitment_type: CommitmentType::SavingsPlan,
        estimated_savings,
        savings_percentage,
        commitment_cost,
        on_demand_cost: parse_money(json_str(detail, "CurrentOnDemandSpend")),
        recurring_monthly_cost,
        estimated_monthly_on_demand,
        timestamp: Utc::now(),
        description: format!("Savings Plans recommendation ({})", slug),
        coverage: 100.0,
        details: ServiceDetails::SavingsPlan(SavingsPlanDetails {
            plan_type: slug.to_string(),
            hourly_commitment,
            coverage,
        }),
    })
}

/// Savings Plans service client
pub struct SavingsPlansClient {
    ctx: AwsContext,
}

impl SavingsPlansClient {
    pub(crate) fn new(ctx: AwsContext) -> Self {
        Self { ctx }
    }

    fn plan_type_of(recommendation: &Recommendation) -> String {
        match &recommendation.details {
            ServiceDetails::SavingsPlan(details) => details.plan_type.clone(),
            _ => "compute".to_string(),
        }
    }

    fn hourly_commitment_of(recommendation: &Recommendation) -> f64 {
        match &recommendation.details {
            ServiceDetails::SavingsPlan(details) => details.hourly_commitment,
            _ => 0.0,
        }
    }

    async fn find_offering(
        &self,
        recommendation: &Recommendation,
        cancel: &CancellationToken,
    ) -> Result<OfferingDetails> {
        let plan_type = Self::plan_type_of(recommendation);
        let duration = recommendation.term.seconds().to_string();
        let payment_label = recommendation.payment_option.catalog_label();

        let args = vec![
            "savingsplans".to_string(),
            "describe-savings-plans-offerings".to_string(),
            "--plan-types".to_string(),
            plan_type.clone(),
            "--durations".to_string(),
            duration,
            "--payment-options".to_string(),
            payment_label.to_string(),
            "--currencies".to_string(),
            "USD".to_string(),
        ];
        let arg_refs: Vec<&str> = args.iter().map(|s| s.as_str()).collect();
        let pages = self
            .ctx
            .call_paged(cancel, &arg_refs, "--next-token", "nextToken")
            .await?;

        for page in &pages {
            let offerings = match page.get("searchResults").and_then(|v| v.as_array()) {
                Some(offerings) => offerings,
                None => continue,
            };
            for offering in offerings {
                if !json_str(offering, "planType").eq_ignore_ascii_case(&plan_type) {
                    continue;
                }
                if json_u64(offering, "durationSeconds") != recommendation.term.seconds() {
                    continue;
                }
                if json_str(offering, "paymentOption") != payment_label {
                    continue;
                }
                return Ok(OfferingDetails {
                    offering_id: json_str(offering, "offeringId").to_string(),
                    resource_type: recommendation.resource_type.clone(),
                    duration_seconds: json_u64(offering, "durationSeconds"),
                    payment_option: recommendation.payment_option,
                    fixed_price: recommendation.commitment_cost,
                    usage_price: Self::hourly_commitment_of(recommendation),
                    currency: json_str(offering, "currency").to_string(),
                });
            }
        }
        Err(Error::catalog_miss(format!(
            "no offerings found for ({}, {}, {})",
            plan_type,
            recommendation.term.label(),
            recommendation.payment_option.as_str()
        )))
    }
}

#[async_trait]
impl ServiceClient for SavingsPlansClient {
    fn service_type(&self) -> ServiceType {
        ServiceType::SavingsPlans
    }

    fn region(&self) -> &str {
        self.ctx.region()
    }

    /// Savings Plans recommendations come from the centralized sweep
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
                &["savingsplans", "describe-savings-plans"],
                "--next-token",
                "nextToken",
            )
            .await?;

        let mut commitments = Vec::new();
        for page in &pages {
            let plans = match page.get("savingsPlans").and_then(|v| v.as_array()) {
                Some(plans) => plans,
                None => continue,
            };
            for plan in plans {
                commitments.push(Commitment {
                    commitment_id: json_str(plan, "savingsPlanId").to_string(),
                    commitment_type: CommitmentType::SavingsPlan,
                    service: ServiceType::SavingsPlans,
                    region: json_str(plan, "region").to_string(),
                    resource_type: json_str(plan, "savingsPlanType").to_string(),
                    count: 1,
                    state: CommitmentState::parse(json_str(plan, "state")),
                    start_date: json_str(plan, "start").parse::<DateTime<Utc>>().ok(),
                    end_date: json_str(plan, "end").parse::<DateTime<Utc>>().ok(),
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

        let commitment = format!("{:.4}", Self::hourly_commitment_of(recommendation));
        let tags = tags_as_shorthand(&standard_tags(recommendation));
        let args = vec![
            "savingsplans".to_string(),
            "create-savings-plan".to_string(),
            "--savings-plan-offering-id".to_string(),
            offering.offering_id.clone(),
            "--commitment".to_string(),
            commitment,
            "--client-token".to_string(),
            purchase_id.clone(),
            "--tags".to_string(),
            tags,
        ];
        let arg_refs: Vec<&str> = args.iter().map(|s| s.as_str()).collect();

        match self.ctx.call(&arg_refs).await {
            Ok(response) => {
                let plan_id = json_str(&response, "savingsPlanId");
                if plan_id.is_empty() {
                    let err = Error::api(EMPTY_RESPONSE_MESSAGE);
                    PurchaseResult::failed(recommendation.clone(), purchase_id, &err)
                } else {
                    PurchaseResult::succeeded(
                        recommendation.clone(),
                        plan_id,
                        purchase_id,
                        recommendation.commitment_cost,
                        format!(
                            "created {} savings plan at {:.4} USD/hour",
                            Self::plan_type_of(recommendation),
                            Self::hourly_commitment_of(recommendation)
                        ),
                    )
                }
            }
            Err(err) => {
                let wrapped = Error::api(format!("savings plan purchase failed: {}", err));
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
                &["savingsplans", "describe-savings-plans-offerings"],
                "--next-token",
                "nextToken",
            )
            .await?;

        let mut types = Vec::new();
        for page in &pages {
            if let Some(offerings) = page.get("searchResults").and_then(|v| v.as_array()) {
                for offering in offerings {
                    let plan_type = json_str(offering, "planType");
                    if !plan_type.is_empty() {
                        types.push(plan_type.to_ascii_lowercase());
                    }
                }
            }
        }
        types.sort();
        types.dedup();
        Ok(types)
    }
}
