//! GCP provider: committed use discount recommendations from the Recommender
//! API and commitment purchases, both via the `gcloud` CLI.

use crate::error::{Error, Result};
use crate::model::{
    CloudProvider, Commitment, CommitmentState, CommitmentType, ComputeDetails, OfferingDetails,
    PaymentOption, PurchaseResult, Recommendation, ServiceDetails, ServiceType, Term,
};
use crate::providers::{
    json_str, Account, CloudCli, ProcessRunner, Provider, ProviderCredentials, ProviderSettings,
    RecommendationQuery, RecommendationsClient, ServiceClient,
};
use crate::purchase::{reservation_id, EMPTY_RESPONSE_MESSAGE};
use crate::retry::RetryPolicy;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

const CUD_RECOMMENDER: &str = "google.compute.commitment.UsageCommitmentRecommender";

/// Shared `gcloud` invocation context
#[derive(Clone)]
pub(crate) struct GcloudContext {
    cli: Arc<dyn CloudCli>,
    project: Option<String>,
}

impl GcloudContext {
    fn build_args(&self, args: &[&str]) -> Vec<String> {
        let mut full: Vec<String> = args.iter().map(|s| s.to_string()).collect();
        if let Some(ref project) = self.project {
            full.push("--project".to_string());
            full.push(project.clone());
        }
        full.push("--format=json".to_string());
        full
    }

    pub(crate) async fn call(&self, args: &[&str]) -> Result<Value> {
        let stdout = self.cli.run("gcloud", &self.build_args(args)).await?;
        if stdout.trim().is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(&stdout)
            .map_err(|e| Error::parsing(format!("gcloud {} output: {}", args.join(" "), e)))
    }

    pub(crate) async fn call_retry(
        &self,
        policy: &mut RetryPolicy,
        cancel: &CancellationToken,
        args: &[&str],
    ) -> Result<Value> {
        policy.run(cancel, || self.call(args)).await
    }
}

/// Money in Recommender responses is split into units and nanos
fn cost_value(cost: &Value) -> f64 {
    let units = json_str(cost, "units")
        .parse::<f64>()
        .unwrap_or_else(|_| cost.get("units").and_then(|v| v.as_f64()).unwrap_or(0.0));
    let nanos = cost.get("nanos").and_then(|v| v.as_f64()).unwrap_or(0.0);
    units + nanos / 1e9
}

fn term_from_plan(plan: &str) -> Option<Term> {
    match plan.to_ascii_uppercase().as_str() {
        "TWELVE_MONTH" | "12-MONTH" => Some(Term::OneYear),
        "THIRTY_SIX_MONTH" | "36-MONTH" => Some(Term::ThreeYear),
        _ => None,
    }
}

fn plan_label(term: Term) -> &'static str {
    match term {
        Term::OneYear => "12-month",
        Term::ThreeYear => "36-month",
    }
}

/// GCP provider handle
pub struct GcpProvider {
    settings: ProviderSettings,
    cli: Arc<dyn CloudCli>,
}

impl GcpProvider {
    pub fn new(settings: ProviderSettings) -> Self {
        Self::with_cli(settings, Arc::new(ProcessRunner))
    }

    pub fn with_cli(settings: ProviderSettings, cli: Arc<dyn CloudCli>) -> Self {
        Self { settings, cli }
    }

    pub(crate) fn context(&self) -> GcloudContext {
        GcloudContext {
            cli: self.cli.clone(),
            project: self.settings.project.clone(),
        }
    }
}

#[async_trait]
impl Provider for GcpProvider {
    fn name(&self) -> &'static str {
        "gcp"
    }

    fn display_name(&self) -> &'static str {
        "Google Cloud Platform"
    }

    fn default_region(&self) -> String {
        self.settings
            .region
            .clone()
            .unwrap_or_else(|| "us-central1".to_string())
    }

    fn supported_services(&self) -> Vec<ServiceType> {
        vec![ServiceType::Compute]
    }

    async fn is_configured(&self) -> bool {
        self.get_credentials().await.is_ok()
    }

    async fn validate_credentials(&self) -> Result<()> {
        self.get_credentials().await.map(|_| ())
    }

    async fn get_credentials(&self) -> Result<ProviderCredentials> {
        let auth = self
            .context()
            .call(&["auth", "list", "--filter=status:ACTIVE"])
            .await
            .map_err(|e| Error::credentials(format!("auth probe failed: {}", e)))?;
        let identity = auth
            .as_array()
            .and_then(|entries| entries.first())
            .map(|entry| json_str(entry, "account").to_string())
            .unwrap_or_default();
        if identity.is_empty() {
            return Err(Error::credentials("no active gcloud account"));
        }

        let project = match self.settings.project.clone() {
            Some(project) => project,
            None => {
                let value = self
                    .context()
                    .call(&["config", "get-value", "project"])
                    .await
                    .map_err(|e| Error::credentials(format!("project probe failed: {}", e)))?;
                value.as_str().unwrap_or_default().to_string()
            }
        };
        Ok(ProviderCredentials {
            provider: CloudProvider::Gcp,
            identity,
            account: project,
        })
    }

    async fn get_accounts(&self) -> Result<Vec<Account>> {
        let projects = self.context().call(&["projects", "list"]).await?;
        let mut accounts = Vec::new();
        if let Some(entries) = projects.as_array() {
            for entry in entries {
                accounts.push(Account {
                    id: json_str(entry, "projectId").to_string(),
                    name: json_str(entry, "name").to_string(),
                });
            }
        }
        Ok(accounts)
    }

    async fn get_regions(&self) -> Result<Vec<String>> {
        let regions = self.context().call(&["compute", "regions", "list"]).await?;
        let mut names: Vec<String> = regions
            .as_array()
            .map(|entries| {
                entries
                    .iter()
                    .map(|r| json_str(r, "name").to_string())
                    .filter(|r| !r.is_empty())
                    .collect()
            })
            .unwrap_or_default();
        names.sort();
        Ok(names)
    }

    fn service_client(&self, service: ServiceType, region: &str) -> Result<Box<dyn ServiceClient>> {
        if service != ServiceType::Compute {
            return Err(Error::unsupported(format!(
                "GCP committed use discounts cover compute only, not {}",
                service
            )));
        }
        Ok(Box::new(GcpComputeClient {
            ctx: self.context(),
            region: region.to_string(),
        }))
    }

    fn recommendations_client(&self, region: &str) -> Result<Box<dyn RecommendationsClient>> {
        Ok(Box::new(GcpRecommendationsClient {
            ctx: self.context(),
            region: region.to_string(),
        }))
    }
}

/// Recommender API listing for commitment recommendations
pub struct GcpRecommendationsClient {
    ctx: GcloudContext,
    region: String,
}

impl GcpRecommendationsClient {
    fn parse_entry(&self, query: &RecommendationQuery, entry: &Value) -> Option<Recommendation> {
        let overview = entry
            .get("content")
            .and_then(|c| c.get("overview"))
            .unwrap_or(&Value::Null);

        let region = json_str(overview, "region");
        if !region.is_empty() && region != self.region {
            log::debug!("skipping GCP recommendation in {}", region);
            return None;
        }

        let term = term_from_plan(json_str(overview, "plan"))?;
        if term != query.term {
            return None;
        }

        let machine_family = json_str(overview, "machineFamily");
        if machine_family.is_empty() {
            log::warn!("skipping GCP recommendation without a machine family");
            return None;
        }

        let vcpus = overview
            .get("resources")
            .and_then(|v| v.as_array())
            .and_then(|resources| {
                resources
                    .iter()
                    .find(|r| json_str(r, "type").eq_ignore_ascii_case("VCPU"))
            })
            .map(|r| {
                json_str(r, "amount")
                    .parse::<f64>()
                    .unwrap_or_else(|_| r.get("amount").and_then(|v| v.as_f64()).unwrap_or(0.0))
            })
            .unwrap_or(0.0);
        if vcpus < 1.0 {
            log::debug!("skipping GCP recommendation for {}: no vCPUs", machine_family);
            return None;
        }

        // costProjection is the projected change over its duration; negative
        // units mean savings.
        let projection = entry
            .get("primaryImpact")
            .and_then(|impact| impact.get("costProjection"))
            .unwrap_or(&Value::Null);
        let projected = cost_value(projection.get("cost").unwrap_or(&Value::Null));
        let duration_seconds = json_str(projection, "duration")
            .trim_end_matches('s')
            .parse::<f64>()
            .unwrap_or(2_592_000.0);
        let monthly_savings = (-projected).max(0.0) * (2_592_000.0 / duration_seconds);

        Some(Recommendation {
            provider: CloudProvider::Gcp,
            service: ServiceType::Compute,
            account: json_str(overview, "project").to_string(),
            region: self.region.clone(),
            resource_type: machine_family.to_ascii_lowercase(),
            count: vcpus.trunc() as u32,
            payment_option: PaymentOption::Monthly,
            term,
            commitment_type: CommitmentType::Cud,
            estimated_savings: monthly_savings,
            savings_percentage: 0.0,
            commitment_cost: 0.0,
            on_demand_cost: 0.0,
            recurring_monthly_cost: 0.0,
            estimated_monthly_on_demand: 0.0,
            timestamp: Utc::now(),
            description: json_str(entry, "description").to_string(),
            coverage: 100.0,
            details: ServiceDetails::Compute(ComputeDetails {
                platform: "Linux".to_string(),
                tenancy: "default".to_string(),
                scope: "Region".to_string(),
            }),
        })
    }
}

#[async_trait]
impl RecommendationsClient for GcpRecommendationsClient {
    async fn get_recommendations(
        &self,
        query: &RecommendationQuery,
        cancel: &CancellationToken,
    ) -> Result<Vec<Recommendation>> {
        let recommender_flag = format!("--recommender={}", CUD_RECOMMENDER);
        let location_flag = format!("--location={}", self.region);
        let args = vec![
            "recommender".to_string(),
            "recommendations".to_string(),
            "list".to_string(),
            recommender_flag,
            location_flag,
        ];
        let arg_refs: Vec<&str> = args.iter().map(|s| s.as_str()).collect();

        let mut policy = RetryPolicy::default();
        let response = self.ctx.call_retry(&mut policy, cancel, &arg_refs).await?;

        let mut recommendations = Vec::new();
        if let Some(entries) = response.as_array() {
            for entry in entries {
                if let Some(rec) = self.parse_entry(query, entry) {
                    recommendations.push(rec);
                }
            }
        }
        Ok(recommendations)
    }
}

/// Commitment client for GCP compute
pub struct GcpComputeClient {
    ctx: GcloudContext,
    region: String,
}

impl GcpComputeClient {
    /// CUD purchases have no offering SKU; the closest catalog check is that
    /// the machine family exists in the region.
    async fn check_family_available(
        &self,
        recommendation: &Recommendation,
        cancel: &CancellationToken,
    ) -> Result<OfferingDetails> {
        let filter = format!("--filter=zone:{}-*", self.region);
        let args = vec![
            "compute".to_string(),
            "machine-types".to_string(),
            "list".to_string(),
            filter,
        ];
        let arg_refs: Vec<&str> = args.iter().map(|s| s.as_str()).collect();

        let mut policy = RetryPolicy::default();
        let response = self.ctx.call_retry(&mut policy, cancel, &arg_refs).await?;

        let family = recommendation.resource_type.to_ascii_lowercase();
        let available = response
            .as_array()
            .map(|entries| {
                entries.iter().any(|entry| {
                    json_str(entry, "name")
                        .to_ascii_lowercase()
                        .starts_with(&family)
                })
            })
            .unwrap_or(false);
        if !available {
            return Err(Error::catalog_miss(format!(
                "no offerings found for ({}, {}, {})",
                recommendation.resource_type,
                self.region,
                recommendation.term.label(),
            )));
        }
        Ok(OfferingDetails {
            offering_id: format!(
                "{}/{}/{}",
                self.region,
                family,
                plan_label(recommendation.term)
            ),
            resource_type: recommendation.resource_type.clone(),
            duration_seconds: recommendation.term.seconds(),
            payment_option: PaymentOption::Monthly,
            fixed_price: 0.0,
            usage_price: 0.0,
            currency: "USD".to_string(),
        })
    }
}

#[async_trait]
impl ServiceClient for GcpComputeClient {
    fn service_type(&self) -> ServiceType {
        ServiceType::Compute
    }

    fn region(&self) -> &str {
        &self.region
    }

    /// CUD recommendations come from the centralized Recommender listing
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
        let mut policy = RetryPolicy::default();
        let response = self
            .ctx
            .call_retry(&mut policy, cancel, &["compute", "commitments", "list"])
            .await?;

        let mut commitments = Vec::new();
        if let Some(entries) = response.as_array() {
            for entry in entries {
                let region = json_str(entry, "region")
                    .rsplit('/')
                    .next()
                    .unwrap_or("")
                    .to_string();
                if region != self.region {
                    continue;
                }
                let vcpus = entry
                    .get("resources")
                    .and_then(|v| v.as_array())
                    .and_then(|resources| {
                        resources
                            .iter()
                            .find(|r| json_str(r, "type").eq_ignore_ascii_case("VCPU"))
                    })
                    .and_then(|r| json_str(r, "amount").parse::<u32>().ok())
                    .unwrap_or(0);
                let state = match json_str(entry, "status") {
                    "ACTIVE" => CommitmentState::Active,
                    "CREATING" | "NOT_YET_ACTIVE" => CommitmentState::PaymentPending,
                    "EXPIRED" | "CANCELLED" => CommitmentState::Retired,
                    other => CommitmentState::parse(other),
                };
                commitments.push(Commitment {
                    commitment_id: json_str(entry, "name").to_string(),
                    commitment_type: CommitmentType::Cud,
                    service: ServiceType::Compute,
                    region,
                    resource_type: json_str(entry, "category").to_ascii_lowercase(),
                    count: vcpus,
                    state,
                    start_date: json_str(entry, "startTimestamp")
                        .parse::<DateTime<Utc>>()
                        .ok(),
                    end_date: json_str(entry, "endTimestamp").parse::<DateTime<Utc>>().ok(),
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

        if let Err(err) = self.check_family_available(recommendation, cancel).await {
            return PurchaseResult::failed(recommendation.clone(), purchase_id, &err);
        }

        let commitment_name = reservation_id(
            ServiceType::Compute,
            &recommendation.resource_type,
            Utc::now().timestamp(),
        );
        let region_flag = format!("--region={}", self.region);
        let plan_flag = format!("--plan={}", plan_label(recommendation.term));
        // General purpose default ratio of 4GB memory per vCPU.
        let resources_flag = format!(
            "--resources=vcpu={},memory={}GB",
            recommendation.count,
            recommendation.count * 4
        );
        let args = vec![
            "compute".to_string(),
            "commitments".to_string(),
            "create".to_string(),
            commitment_name.clone(),
            region_flag,
            plan_flag,
            resources_flag,
        ];
        let arg_refs: Vec<&str> = args.iter().map(|s| s.as_str()).collect();

        match self.ctx.call(&arg_refs).await {
            Ok(response) => {
                let name = json_str(&response, "name");
                if name.is_empty() {
                    let err = Error::api(EMPTY_RESPONSE_MESSAGE);
                    PurchaseResult::failed(recommendation.clone(), purchase_id, &err)
                } else {
                    PurchaseResult::succeeded(
                        recommendation.clone(),
                        name,
                        purchase_id,
                        0.0,
                        format!(
                            "created {} commitment for {} vCPUs of {}",
                            plan_label(recommendation.term),
                            recommendation.count,
                            recommendation.resource_type
                        ),
                    )
                }
            }
            Err(err) => {
                let wrapped = Error::api(format!("commitment creation failed: {}", err));
                PurchaseResult::failed(recommendation.clone(), purchase_id, &wrapped)
            }
        }
    }

    async fn validate_offering(
        &self,
        recommendation: &Recommendation,
        cancel: &CancellationToken,
    ) -> Result<()> {
        self.check_family_available(recommendation, cancel)
            .await
            .map(|_| ())
    }

    async fn get_offering_details(
        &self,
        recommendation: &Recommendation,
        cancel: &CancellationToken,
    ) -> Result<OfferingDetails> {
        self.check_family_available(recommendation, cancel).await
    }

    async fn get_valid_resource_types(&self, cancel: &CancellationToken) -> Result<Vec<String>> {
        let filter = format!("--filter=zone:{}-*", self.region);
        let args = vec![
            "compute".to_string(),
            "machine-types".to_string(),
            "list".to_string(),
            filter,
        ];
        let arg_refs: Vec<&str> = args.iter().map(|s| s.as_str()).collect();

        let mut policy = RetryPolicy::default();
        let response = self.ctx.call_retry(&mut policy, cancel, &arg_refs).await?;

        let mut types = Vec::new();
        if let Some(entries) = response.as_array() {
            for entry in entries {
                let name = json_str(entry, "name");
                if !name.is_empty() {
                    types.push(name.to_string());
                }
            }
        }
        types.sort();
        types.dedup();
        Ok(types)
    }
}
