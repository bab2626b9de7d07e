//! AWS provider: per-service reservation clients plus the centralized Cost
//! Explorer recommendation path.
//!
//! All traffic goes through the `aws` CLI with `--output json`, wrapped by
//! the retry gate for list-style calls. Purchases are submitted exactly once.

use crate::error::{Error, Result};
use crate::model::ServiceType;
use crate::providers::{
    Account, CloudCli, ProcessRunner, Provider, ProviderCredentials, ProviderSettings,
    RecommendationsClient, ServiceClient,
};
use crate::retry::RetryPolicy;
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

pub mod cost_explorer;
pub mod dynamodb;
pub mod ec2;
pub mod elasticache;
pub mod memorydb;
pub mod offerings;
pub mod opensearch;
pub mod rds;
pub mod redshift;
pub mod savings_plans;

/// Shared invocation context for one (region, profile) pair
#[derive(Clone)]
pub(crate) struct AwsContext {
    cli: Arc<dyn CloudCli>,
    region: String,
    profile: Option<String>,
}

impl AwsContext {
    pub(crate) fn new(cli: Arc<dyn CloudCli>, region: &str, profile: Option<String>) -> Self {
        Self {
            cli,
            region: region.to_string(),
            profile,
        }
    }

    pub(crate) fn region(&self) -> &str {
        &self.region
    }

    fn build_args(&self, args: &[&str]) -> Vec<String> {
        let mut full: Vec<String> = args.iter().map(|s| s.to_string()).collect();
        full.push("--region".to_string());
        full.push(self.region.clone());
        if let Some(ref profile) = self.profile {
            full.push("--profile".to_string());
            full.push(profile.clone());
        }
        full.push("--output".to_string());
        full.push("json".to_string());
        full
    }

    /// Single-shot call, used for purchases and cheap probes
    pub(crate) async fn call(&self, args: &[&str]) -> Result<Value> {
        let stdout = self.cli.run("aws", &self.build_args(args)).await?;
        if stdout.trim().is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(&stdout)
            .map_err(|e| Error::parsing(format!("aws {} output: {}", args.join(" "), e)))
    }

    /// Call through an existing retry gate
    pub(crate) async fn call_retry(
        &self,
        policy: &mut RetryPolicy,
        cancel: &CancellationToken,
        args: &[&str],
    ) -> Result<Value> {
        policy.run(cancel, || self.call(args)).await
    }

    /// Exhaust a paginated listing. One retry gate covers the whole page
    /// sequence; the token flag and response key vary by API family.
    pub(crate) async fn call_paged(
        &self,
        cancel: &CancellationToken,
        args: &[&str],
        token_flag: &str,
        token_key: &str,
    ) -> Result<Vec<Value>> {
        let mut policy = RetryPolicy::default();
        let mut pages = Vec::new();
        let mut token: Option<String> = None;

        loop {
            let page = match token {
                Some(ref t) => {
                    let mut with_token: Vec<&str> = args.to_vec();
                    with_token.push(token_flag);
                    with_token.push(t);
                    self.call_retry(&mut policy, cancel, &with_token).await?
                }
                None => self.call_retry(&mut policy, cancel, args).await?,
            };

            token = page
                .get(token_key)
                .and_then(|v| v.as_str())
                .filter(|t| !t.is_empty())
                .map(|t| t.to_string());
            pages.push(page);

            if token.is_none() {
                return Ok(pages);
            }
        }
    }
}

/// AWS provider handle
pub struct AwsProvider {
    settings: ProviderSettings,
    cli: Arc<dyn CloudCli>,
}

impl AwsProvider {
    pub fn new(settings: ProviderSettings) -> Self {
        Self::with_cli(settings, Arc::new(ProcessRunner))
    }

    /// Construct with an injected CLI runner, used by tests
    pub fn with_cli(settings: ProviderSettings, cli: Arc<dyn CloudCli>) -> Self {
        Self { settings, cli }
    }

    pub(crate) fn context(&self, region: &str) -> AwsContext {
        AwsContext::new(self.cli.clone(), region, self.settings.profile.clone())
    }
}

#[async_trait]
impl Provider for AwsProvider {
    fn name(&self) -> &'static str {
        "aws"
    }

    fn display_name(&self) -> &'static str {
        "Amazon Web Services"
    }

    fn default_region(&self) -> String {
        if let Some(ref region) = self.settings.region {
            return region.clone();
        }
        std::env::var("AWS_REGION")
            .or_else(|_| std::env::var("AWS_DEFAULT_REGION"))
            .unwrap_or_else(|_| "us-east-1".to_string())
    }

    fn supported_services(&self) -> Vec<ServiceType> {
        ServiceType::all().to_vec()
    }

    async fn is_configured(&self) -> bool {
        self.get_credentials().await.is_ok()
    }

    async fn validate_credentials(&self) -> Result<()> {
        self.get_credentials().await.map(|_| ())
    }

    async fn get_credentials(&self) -> Result<ProviderCredentials> {
        let ctx = self.context(&self.default_region());
        let identity = ctx
            .call(&["sts", "get-caller-identity"])
            .await
            .map_err(|e| Error::credentials(format!("caller identity probe failed: {}", e)))?;
        Ok(ProviderCredentials {
            provider: crate::model::CloudProvider::Aws,
            identity: crate::providers::json_str(&identity, "Arn").to_string(),
            account: crate::providers::json_str(&identity, "Account").to_string(),
        })
    }

    async fn get_accounts(&self) -> Result<Vec<Account>> {
        let ctx = self.context(&self.default_region());
        let cancel = CancellationToken::new();

        // Management accounts can enumerate the whole organization; everyone
        // else falls back to the caller's own account.
        match ctx
            .call_paged(
                &cancel,
                &["organizations", "list-accounts"],
                "--starting-token",
                "NextToken",
            )
            .await
        {
            Ok(pages) => {
                let mut accounts = Vec::new();
                for page in pages {
                    if let Some(entries) = page.get("Accounts").and_then(|v| v.as_array()) {
                        for entry in entries {
                            accounts.push(Account {
                                id: crate::providers::json_str(entry, "Id").to_string(),
                                name: crate::providers::json_str(entry, "Name").to_string(),
                            });
                        }
                    }
                }
                Ok(accounts)
            }
            Err(err) => {
                log::debug!("organization listing unavailable, using caller account: {}", err);
                let credentials = self.get_credentials().await?;
                Ok(vec![Account {
                    id: credentials.account,
                    name: "caller".to_string(),
                }])
            }
        }
    }

    async fn get_regions(&self) -> Result<Vec<String>> {
        let ctx = self.context(&self.default_region());
        let response = ctx.call(&["ec2", "describe-regions"]).await?;
        let mut regions: Vec<String> = response
            .get("Regions")
            .and_then(|v| v.as_array())
            .map(|entries| {
                entries
                    .iter()
                    .map(|r| crate::providers::json_str(r, "RegionName").to_string())
                    .filter(|r| !r.is_empty())
                    .collect()
            })
            .unwrap_or_default();
        regions.sort();
        Ok(regions)
    }

    fn service_client(&self, service: ServiceType, region: &str) -> Result<Box<dyn ServiceClient>> {
        let ctx = self.context(region);
        let client: Box<dyn ServiceClient> = match service {
            ServiceType::RelationalDb => Box::new(rds::RdsClient::new(ctx)),
            ServiceType::Cache => Box::new(elasticache::ElastiCacheClient::new(ctx)),
            ServiceType::Compute => Box::new(ec2::Ec2Client::new(ctx)),
            ServiceType::Search => Box::new(opensearch::OpenSearchClient::new(ctx)),
            ServiceType::DataWarehouse => Box::new(redshift::RedshiftClient::new(ctx)),
            ServiceType::MemoryDb => Box::new(memorydb::MemoryDbClient::new(ctx)),
            ServiceType::NoSqlDb => Box::new(dynamodb::DynamoDbClient::new(ctx)),
            ServiceType::SavingsPlans => Box::new(savings_plans::SavingsPlansClient::new(ctx)),
        };
        Ok(client)
    }

    fn recommendations_client(&self, region: &str) -> Result<Box<dyn RecommendationsClient>> {
        Ok(Box::new(cost_explorer::AwsRecommendationsClient::new(
            self.cli.clone(),
            region,
            self.settings.profile.clone(),
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::mock::ScriptedCli;

    #[tokio::test]
    async fn test_credentials_probe() {
        let cli = Arc::new(ScriptedCli::new());
        cli.respond(
            "sts get-caller-identity",
            r#"{"UserId": "AIDA123", "Account": "123456789012", "Arn": "arn:aws:iam::123456789012:user/ops"}"#,
        );
        let provider = AwsProvider::with_cli(ProviderSettings::default(), cli);

        let credentials = provider.get_credentials().await.unwrap();
        assert_eq!(credentials.account, "123456789012");
        assert!(provider.is_configured().await);
    }

    #[tokio::test]
    async fn test_is_configured_swallows_errors() {
        let cli = Arc::new(ScriptedCli::new());
        cli.fail(
            "sts get-caller-identity",
            Error::credentials("Unable to locate credentials"),
        );
        let provider = AwsProvider::with_cli(ProviderSettings::default(), cli);

        assert!(!provider.is_configured().await);
        assert!(provider.validate_credentials().await.is_err());
    }

    #[tokio::test]
    async fn test_region_enumeration_sorted() {
        let cli = Arc::new(ScriptedCli::new());
        cli.respond(
            "ec2 describe-regions",
            r#"{"Regions": [{"RegionName": "us-west-2"}, {"RegionName": "eu-west-1"}, {"RegionName": "us-east-1"}]}"#,
        );
        let provider = AwsProvider::with_cli(ProviderSettings::default(), cli);

        let regions = provider.get_regions().await.unwrap();
        assert_eq!(regions, vec!["eu-west-1", "us-east-1", "us-west-2"]);
    }

    #[tokio::test]
    async fn test_accounts_fallback_to_caller() {
        let cli = Arc::new(ScriptedCli::new());
        cli.fail(
            "organizations list-accounts",
            Error::credentials("AccessDenied"),
        );
        cli.respond(
            "sts get-caller-identity",
            r#"{"Account": "123456789012", "Arn": "arn:aws:iam::123456789012:user/ops"}"#,
        );
        let provider = AwsProvider::with_cli(ProviderSettings::default(), cli);

        let accounts = provider.get_accounts().await.unwrap();
        assert_eq!(accounts.len(), 1);
        assert_eq!(accounts[0].id, "123456789012");
    }

    #[tokio::test]
    async fn test_paged_call_follows_tokens() {
        let cli = Arc::new(ScriptedCli::new());
        cli.respond(
            "describe-reserved-db-instances-offerings --marker page2",
            r#"{"ReservedDBInstancesOfferings": [{"ReservedDBInstancesOfferingId": "b"}]}"#,
        );
        cli.respond(
            "describe-reserved-db-instances-offerings",
            r#"{"ReservedDBInstancesOfferings": [{"ReservedDBInstancesOfferingId": "a"}], "Marker": "page2"}"#,
        );
        let ctx = AwsContext::new(cli.clone(), "us-east-1", None);
        let cancel = CancellationToken::new();
        let pages = ctx
            .call_paged(
                &cancel,
                &["rds", "describe-reserved-db-instances-offerings"],
                "--marker",
                "Marker",
            )
            .await
            .unwrap();
        assert_eq!(pages.len(), 2);
        assert_eq!(cli.call_count("describe-reserved-db-instances-offerings"), 2);
    }

    #[test]
    fn test_default_region_prefers_settings() {
        let provider = AwsProvider::with_cli(
            ProviderSettings {
                region: Some("eu-central-1".to_string()),
                ..Default::default()
            },
            Arc::new(ScriptedCli::new()),
        );
        assert_eq!(provider.default_region(), "eu-central-1");
    }
}
