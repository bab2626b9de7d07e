//! Azure provider: reservation recommendations from the Consumption API and
//! purchases through reservation orders, both via the `az` CLI.

use crate::error::{Error, Result};
use crate::model::{
    CacheDetails, CloudProvider, Commitment, CommitmentState, CommitmentType, ComputeDetails,
    DatabaseDetails, NoSqlDetails, OfferingDetails, PaymentOption, PurchaseResult, Recommendation,
    ServiceDetails, ServiceType, Term,
};
use crate::providers::{
    json_f64, json_str, json_u64, Account, CloudCli, ProcessRunner, Provider, ProviderCredentials,
    ProviderSettings, RecommendationQuery, RecommendationsClient, ServiceClient,
};
use crate::purchase::{reservation_id, EMPTY_RESPONSE_MESSAGE};
use crate::retry::RetryPolicy;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Shared `az` invocation context
#[derive(Clone)]
pub(crate) struct AzContext {
    cli: Arc<dyn CloudCli>,
    subscription: Option<String>,
}

impl AzContext {
    fn build_args(&self, args: &[&str]) -> Vec<String> {
        let mut full: Vec<String> = args.iter().map(|s| s.to_string()).collect();
        if let Some(ref subscription) = self.subscription {
            full.push("--subscription".to_string());
            full.push(subscription.clone());
        }
        full.push("--output".to_string());
        full.push("json".to_string());
        full
    }

    pub(crate) async fn call(&self, args: &[&str]) -> Result<Value> {
        let stdout = self.cli.run("az", &self.build_args(args)).await?;
        if stdout.trim().is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(&stdout)
            .map_err(|e| Error::parsing(format!("az {} output: {}", args.join(" "), e)))
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

/// Reservation resource type labels per service
fn reserved_resource_type(service: ServiceType) -> Result<&'static str> {
    match service {
        ServiceType::Compute => Ok("VirtualMachines"),
        ServiceType::RelationalDb => Ok("SqlDatabases"),
        ServiceType::Cache => Ok("RedisCache"),
        ServiceType::NoSqlDb => Ok("CosmosDb"),
        other => Err(Error::unsupported(format!(
            "Azure reservations do not cover {}",
            other
        ))),
    }
}

fn service_for_resource_type(resource_type: &str) -> Option<ServiceType> {
    match resource_type.to_ascii_lowercase().as_str() {
        "virtualmachines" => Some(ServiceType::Compute),
        "sqldatabases" => Some(ServiceType::RelationalDb),
        "rediscache" => Some(ServiceType::Cache),
        "cosmosdb" => Some(ServiceType::NoSqlDb),
        _ => None,
    }
}

fn details_for_service(service: ServiceType, sku: &str, scope: &str) -> ServiceDetails {
    match service {
        ServiceType::RelationalDb => ServiceDetails::Database(DatabaseDetails {
            engine: "sqlserver-se".to_string(),
            az_config: crate::model::AzConfig::SingleAz,
        }),
        ServiceType::Cache => ServiceDetails::Cache(CacheDetails {
            engine: "redis".to_string(),
            node_type: sku.to_string(),
        }),
        ServiceType::NoSqlDb => ServiceDetails::NoSql(NoSqlDetails {
            table_class: "cosmos".to_string(),
            capacity_mode: "ru".to_string(),
        }),
        _ => ServiceDetails::Compute(ComputeDetails {
            platform: "Azure".to_string(),
            tenancy: "default".to_string(),
            scope: scope.to_string(),
        }),
    }
}

/// Azure provider handle
pub struct AzureProvider {
    settings: ProviderSettings,
    cli: Arc<dyn CloudCli>,
}

impl AzureProvider {
    pub fn new(settings: ProviderSettings) -> Self {
        Self::with_cli(settings, Arc::new(ProcessRunner))
    }

    pub fn with_cli(settings: ProviderSettings, cli: Arc<dyn CloudCli>) -> Self {
        Self { settings, cli }
    }

    pub(crate) fn context(&self) -> AzContext {
        AzContext {
            cli: self.cli.clone(),
            subscription: self.settings.subscription.clone(),
        }
    }
}

#[async_trait]
impl Provider for AzureProvider {
    fn name(&self) -> &'static str {
        "azure"
    }

    fn display_name(&self) -> &'static str {
        "Microsoft Azure"
    }

    fn default_region(&self) -> String {
        self.settings
            .region
            .clone()
            .unwrap_or_else(|| "eastus".to_string())
    }

    fn supported_services(&self) -> Vec<ServiceType> {
        vec![
            ServiceType::Compute,
            ServiceType::RelationalDb,
            ServiceType::Cache,
            ServiceType::NoSqlDb,
        ]
    }

    async fn is_configured(&self) -> bool {
        self.get_credentials().await.is_ok()
    }

    async fn validate_credentials(&self) -> Result<()> {
        self.get_credentials().await.map(|_| ())
    }

    async fn get_credentials(&self) -> Result<ProviderCredentials> {
        let account = self
            .context()
            .call(&["account", "show"])
            .await
            .map_err(|e| Error::credentials(format!("account probe failed: {}", e)))?;
        let user = account.get("user").unwrap_or(&Value::Null);
        Ok(ProviderCredentials {
            provider: CloudProvider::Azure,
            identity: json_str(user, "name").to_string(),
            account: json_str(&account, "id").to_string(),
        })
    }

    async fn get_accounts(&self) -> Result<Vec<Account>> {
        let subscriptions = self.context().call(&["account", "list"]).await?;
        let mut accounts = Vec::new();
        if let Some(entries) = subscriptions.as_array() {
            for entry in entries {
                accounts.push(Account {
                    id: json_str(entry, "id").to_string(),
                    name: json_str(entry, "name").to_string(),
                });
            }
        }
        Ok(accounts)
    }

    async fn get_regions(&self) -> Result<Vec<String>> {
        let locations = self.context().call(&["account", "list-locations"]).await?;
        let mut regions: Vec<String> = locations
            .as_array()
            .map(|entries| {
                entries
                    .iter()
                    .map(|l| json_str(l, "name").to_string())
                    .filter(|l| !l.is_empty())
                    .collect()
            })
            .unwrap_or_default();
        regions.sort();
        Ok(regions)
    }

    fn service_client(&self, service: ServiceType, region: &str) -> Result<Box<dyn ServiceClient>> {
        reserved_resource_type(service)?;
        Ok(Box::new(AzureReservationClient {
            ctx: self.context(),
            region: region.to_string(),
            service,
        }))
    }

    fn recommendations_client(&self, region: &str) -> Result<Box<dyn RecommendationsClient>> {
        Ok(Box::new(AzureRecommendationsClient {
            ctx: self.context(),
            region: region.to_string(),
        }))
    }
}

/// Consumption reservation recommendation listing
pub struct AzureRecommendationsClient {
    ctx: AzContext,
    region: String,
}

impl AzureRecommendationsClient {
    fn parse_entry(&self, query: &RecommendationQuery, entry: &Value) -> Option<Recommendation> {
        let location = json_str(entry, "location");
        if !location.eq_ignore_ascii_case(&self.region) {
            log::debug!("skipping Azure recommendation in {}", location);
            return None;
        }

        let term = Term::parse(json_str(entry, "term")).ok()?;
        if term != query.term {
            return None;
        }

        let service =
            service_for_resource_type(json_str(entry, "resourceType")).or(Some(ServiceType::Compute))?;
        let sku = json_str(entry, "sku").to_string();
        if sku.is_empty() {
            log::warn!("skipping Azure recommendation without a sku");
            return None;
        }

        let quantity = json_f64(entry, "recommendedQuantity");
        if !quantity.is_finite() || quantity < 1.0 {
            log::debug!("skipping Azure recommendation for {}: zero quantity", sku);
            return None;
        }

        let months = term.months() as f64;
        // Consumption reports costs over the whole term.
        let net_savings = json_f64(entry, "netSavings") / months;
        let on_demand = json_f64(entry, "costWithNoReservedInstances") / months;
        let with_reservation = json_f64(entry, "totalCostWithReservedInstances") / months;
        let savings_percentage = if on_demand > 0.0 {
            (net_savings / on_demand * 100.0).clamp(0.0, 100.0)
        } else {
            0.0
        };

        Some(Recommendation {
            provider: CloudProvider::Azure,
            service,
            account: json_str(entry, "subscriptionId").to_string(),
            region: location.to_ascii_lowercase(),
            resource_type: sku.clone(),
            count: quantity.trunc() as u32,
            payment_option: PaymentOption::Monthly,
            term,
            commitment_type: CommitmentType::ReservedInstance,
            estimated_savings: net_savings,
            savings_percentage,
            commitment_cost: 0.0,
            on_demand_cost: on_demand,
            recurring_monthly_cost: with_reservation,
            estimated_monthly_on_demand: on_demand,
            timestamp: Utc::now(),
            description: format!(
                "Azure reservation recommendation ({})",
                json_str(entry, "resourceType")
            ),
            coverage: 100.0,
            details: details_for_service(service, &sku, json_str(entry, "scope")),
        })
    }
}

#[async_trait]
impl RecommendationsClient for AzureRecommendationsClient {
    async fn get_recommendations(
        &self,
        query: &RecommendationQuery,
        cancel: &CancellationToken,
    ) -> Result<Vec<Recommendation>> {
        let mut policy = RetryPolicy::default();
        let response = self
            .ctx
            .call_retry(
                &mut policy,
                cancel,
                &["consumption", "reservation", "recommendation", "list"],
            )
            .await?;

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

/// Reservation order client covering every reservable Azure service
pub struct AzureReservationClient {
    ctx: AzContext,
    region: String,
    service: ServiceType,
}

impl AzureReservationClient {
    fn term_label(term: Term) -> &'static str {
        match term {
            Term::OneYear => "P1Y",
            Term::ThreeYear => "P3Y",
        }
    }

    fn billing_plan(payment: PaymentOption) -> &'static str {
        match payment {
            PaymentOption::Monthly => "Monthly",
            _ => "Upfront",
        }
    }

    async fn calculate_order(
        &self,
        recommendation: &Recommendation,
        cancel: &CancellationToken,
    ) -> Result<OfferingDetails> {
        let resource_type = reserved_resource_type(self.service)?;
        let quantity = recommendation.count.to_string();
        let args = vec![
            "reservations".to_string(),
            "reservation-order".to_string(),
            "calculate".to_string(),
            "--sku".to_string(),
            recommendation.resource_type.clone(),
            "--location".to_string(),
            self.region.clone(),
            "--reserved-resource-type".to_string(),
            resource_type.to_string(),
            "--term".to_string(),
            Self::term_label(recommendation.term).to_string(),
            "--quantity".to_string(),
            quantity,
            "--billing-plan".to_string(),
            Self::billing_plan(recommendation.payment_option).to_string(),
            "--applied-scope-type".to_string(),
            "Shared".to_string(),
        ];
        let arg_refs: Vec<&str> = args.iter().map(|s| s.as_str()).collect();

        let mut policy = RetryPolicy::default();
        let response = self.ctx.call_retry(&mut policy, cancel, &arg_refs).await?;

        let properties = response.get("properties").unwrap_or(&Value::Null);
        let order_id = json_str(properties, "reservationOrderId");
        if order_id.is_empty() {
            return Err(Error::catalog_miss(format!(
                "no offerings found for ({}, {}, {}, {})",
                recommendation.resource_type,
                self.region,
                recommendation.term.label(),
                recommendation.payment_option.as_str(),
            )));
        }
        let total = properties
            .get("billingCurrencyTotal")
            .unwrap_or(&Value::Null);
        Ok(OfferingDetails {
            offering_id: order_id.to_string(),
            resource_type: recommendation.resource_type.clone(),
            duration_seconds: recommendation.term.seconds(),
            payment_option: recommendation.payment_option,
            fixed_price: json_f64(total, "amount"),
            usage_price: 0.0,
            currency: json_str(total, "currencyCode").to_string(),
        })
    }
}

#[async_trait]
impl ServiceClient for AzureReservationClient {
    fn service_type(&self) -> ServiceType {
        self.service
    }

    fn region(&self) -> &str {
        &self.region
    }

    /// Azure recommendations come from the centralized Consumption listing
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
            .call_retry(
                &mut policy,
                cancel,
                &["reservations", "reservation-order", "list"],
            )
            .await?;

        let wanted = reserved_resource_type(self.service)?;
        let mut commitments = Vec::new();
        if let Some(entries) = response.as_array() {
            for entry in entries {
                if !json_str(entry, "reservedResourceType").eq_ignore_ascii_case(wanted) {
                    continue;
                }
                let state = match json_str(entry, "provisioningState") {
                    "Succeeded" => CommitmentState::Active,
                    "PendingBilling" | "Creating" => CommitmentState::PaymentPending,
                    "Cancelled" | "Expired" => CommitmentState::Retired,
                    other => CommitmentState::parse(other),
                };
                commitments.push(Commitment {
                    commitment_id: json_str(entry, "name").to_string(),
                    commitment_type: CommitmentType::ReservedInstance,
                    service: self.service,
                    region: self.region.clone(),
                    resource_type: json_str(entry, "sku").to_string(),
                    count: json_u64(entry, "quantity") as u32,
                    state,
                    start_date: json_str(entry, "effectiveDateTime")
                        .parse::<DateTime<Utc>>()
                        .ok(),
                    end_date: json_str(entry, "expiryDate").parse::<DateTime<Utc>>().ok(),
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

        let offering = match self.calculate_order(recommendation, cancel).await {
            Ok(offering) => offering,
            Err(err) => return PurchaseResult::failed(recommendation.clone(), purchase_id, &err),
        };

        let display_name = reservation_id(
            self.service,
            &recommendation.resource_type,
            Utc::now().timestamp(),
        );
        let resource_type = match reserved_resource_type(self.service) {
            Ok(resource_type) => resource_type,
            Err(err) => return PurchaseResult::failed(recommendation.clone(), purchase_id, &err),
        };
        let quantity = recommendation.count.to_string();
        let args = vec![
            "reservations".to_string(),
            "reservation-order".to_string(),
            "purchase".to_string(),
            "--reservation-order-id".to_string(),
            offering.offering_id.clone(),
            "--sku".to_string(),
            recommendation.resource_type.clone(),
            "--location".to_string(),
            self.region.clone(),
            "--reserved-resource-type".to_string(),
            resource_type.to_string(),
            "--term".to_string(),
            Self::term_label(recommendation.term).to_string(),
            "--quantity".to_string(),
            quantity,
            "--billing-plan".to_string(),
            Self::billing_plan(recommendation.payment_option).to_string(),
            "--applied-scope-type".to_string(),
            "Shared".to_string(),
            "--display-name".to_string(),
            display_name,
        ];
        let arg_refs: Vec<&str> = args.iter().map(|s| s.as_str()).collect();

        match self.ctx.call(&arg_refs).await {
            Ok(response) => {
                let order_id = {
                    let name = json_str(&response, "name");
                    if name.is_empty() {
                        json_str(&response, "id")
                    } else {
                        name
                    }
                };
                if order_id.is_empty() {
                    let err = Error::api(EMPTY_RESPONSE_MESSAGE);
                    PurchaseResult::failed(recommendation.clone(), purchase_id, &err)
                } else {
                    PurchaseResult::succeeded(
                        recommendation.clone(),
                        order_id,
                        purchase_id,
                        offering.fixed_price,
                        format!(
                            "purchased reservation order for {} x{}",
                            recommendation.resource_type, recommendation.count
                        ),
                    )
                }
            }
            Err(err) => {
                let wrapped = Error::api(format!("reservation purchase failed: {}", err));
                PurchaseResult::failed(recommendation.clone(), purchase_id, &wrapped)
            }
        }
    }

    async fn validate_offering(
        &self,
        recommendation: &Recommendation,
        cancel: &CancellationToken,
    ) -> Result<()> {
        self.calculate_order(recommendation, cancel)
            .await
            .map(|_| ())
    }

    async fn get_offering_details(
        &self,
        recommendation: &Recommendation,
        cancel: &CancellationToken,
    ) -> Result<OfferingDetails> {
        self.calculate_order(recommendation, cancel).await
    }

    async fn get_valid_resource_types(&self, cancel: &CancellationToken) -> Result<Vec<String>> {
        let resource_type = reserved_resource_type(self.service)?;
        let args = vec![
            "reservations".to_string(),
            "catalog".to_string(),
            "show".to_string(),
            "--reserved-resource-type".to_string(),
            resource_type.to_string(),
            "--location".to_string(),
            self.region.clone(),
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::mock::ScriptedCli;

    fn provider_with(cli: Arc<ScriptedCli>) -> AzureProvider {
        AzureProvider::with_cli(
            ProviderSettings {
                region: Some("eastus".to_string()),
                subscription: Some("sub-1".to_string()),
                ..Default::default()
            },
            cli,
        )
    }

    const RECOMMENDATION_LIST: &str = r#"[
        {
            "location": "eastus",
            "sku": "Standard_D2s_v3",
            "term": "P3Y",
            "resourceType": "VirtualMachines",
            "recommendedQuantity": 3.0,
            "netSavings": 3600.0,
            "costWithNoReservedInstances": 10800.0,
            "totalCostWithReservedInstances": 7200.0,
            "subscriptionId": "sub-1",
            "scope": "Single"
        },
        {
            "location": "westus",
            "sku": "Standard_D4s_v3",
            "term": "P3Y",
            "resourceType": "VirtualMachines",
            "recommendedQuantity": 1.0,
            "netSavings": 900.0,
            "costWithNoReservedInstances": 2700.0,
            "totalCostWithReservedInstances": 1800.0,
            "subscriptionId": "sub-1",
            "scope": "Single"
        }
    ]"#;

    #[tokio::test]
    async fn test_recommendations_filtered_to_region_and_term() {
        let cli = Arc::new(ScriptedCli::new());
        cli.respond("consumption reservation recommendation list", RECOMMENDATION_LIST);
        let provider = provider_with(cli);
        let client = provider.recommendations_client("eastus").unwrap();
        let cancel = CancellationToken::new();

        let query = RecommendationQuery {
            term: Term::ThreeYear,
            ..Default::default()
        };
        let recommendations = client.get_recommendations(&query, &cancel).await.unwrap();
        assert_eq!(recommendations.len(), 1);

        let rec = &recommendations[0];
        assert_eq!(rec.provider, CloudProvider::Azure);
        assert_eq!(rec.resource_type, "Standard_D2s_v3");
        assert_eq!(rec.count, 3);
        assert_eq!(rec.payment_option, PaymentOption::Monthly);
        // Term totals divide down to monthly figures.
        assert!((rec.estimated_savings - 100.0).abs() < 1e-6);
        assert!((rec.on_demand_cost - 300.0).abs() < 1e-6);
        assert!((rec.savings_percentage - 33.333).abs() < 0.01);
    }

    #[tokio::test]
    async fn test_purchase_flow_calculates_then_purchases() {
        let cli = Arc::new(ScriptedCli::new());
        cli.respond("consumption reservation recommendation list", RECOMMENDATION_LIST);
        cli.respond(
            "reservation-order calculate",
            r#"{"properties": {"reservationOrderId": "order-42", "billingCurrencyTotal": {"amount": 7200.0, "currencyCode": "USD"}}}"#,
        );
        cli.respond(
            "reservation-order purchase",
            r#"{"name": "order-42", "provisioningState": "Creating"}"#,
        );
        let provider = provider_with(cli.clone());
        let recommendations_client = provider.recommendations_client("eastus").unwrap();
        let cancel = CancellationToken::new();
        let query = RecommendationQuery {
            term: Term::ThreeYear,
            ..Default::default()
        };
        let recommendation = recommendations_client
            .get_recommendations(&query, &cancel)
            .await
            .unwrap()
            .remove(0);

        let client = provider
            .service_client(ServiceType::Compute, "eastus")
            .unwrap();
        let result = client.purchase_commitment(&recommendation, &cancel).await;
        assert!(result.success);
        assert_eq!(result.commitment_id, "order-42");
        assert_eq!(result.actual_cost, 7200.0);

        let purchase_call = cli
            .calls()
            .into_iter()
            .find(|line| line.contains("reservation-order purchase"))
            .unwrap();
        assert!(purchase_call.contains("--display-name ec2-StandardD2sv3-"));
        assert!(purchase_call.contains("--subscription sub-1"));
    }

    #[tokio::test]
    async fn test_calculate_without_order_id_is_catalog_miss() {
        let cli = Arc::new(ScriptedCli::new());
        cli.respond("reservation-order calculate", r#"{"properties": {}}"#);
        let provider = provider_with(cli);
        let client = provider
            .service_client(ServiceType::Compute, "eastus")
            .unwrap();
        let cancel = CancellationToken::new();

        let mut rec = crate::model::tests::sample_database_recommendation();
        rec.service = ServiceType::Compute;
        rec.details = ServiceDetails::Compute(ComputeDetails {
            platform: "Azure".to_string(),
            tenancy: "default".to_string(),
            scope: "Single".to_string(),
        });
        let err = client.validate_offering(&rec, &cancel).await.unwrap_err();
        assert!(err.to_string().contains("no offerings found"));
    }

    #[tokio::test]
    async fn test_unsupported_service_rejected_at_client_construction() {
        let provider = provider_with(Arc::new(ScriptedCli::new()));
        assert!(provider
            .service_client(ServiceType::Search, "eastus")
            .is_err());
    }

    #[tokio::test]
    async fn test_existing_commitments_filtered_by_resource_type() {
        let cli = Arc::new(ScriptedCli::new());
        cli.respond(
            "reservation-order list",
            r#"[
                {"name": "order-1", "reservedResourceType": "VirtualMachines", "sku": "Standard_D2s_v3", "quantity": 3, "provisioningState": "Succeeded", "effectiveDateTime": "2025-02-01T00:00:00Z", "expiryDate": "2028-02-01T00:00:00Z"},
                {"name": "order-2", "reservedResourceType": "RedisCache", "sku": "P1", "quantity": 1, "provisioningState": "Succeeded"}
            ]"#,
        );
        let provider = provider_with(cli);
        let client = provider
            .service_client(ServiceType::Compute, "eastus")
            .unwrap();
        let cancel = CancellationToken::new();

        let commitments = client.get_existing_commitments(&cancel).await.unwrap();
        assert_eq!(commitments.len(), 1);
        assert_eq!(commitments[0].commitment_id, "order-1");
        assert_eq!(commitments[0].state, CommitmentState::Active);
    }
}
