//! Provider abstraction: a registry of named constructors, a uniform
//! service-client contract, and the narrow CLI adapter every provider call
//! goes through.
//!
//! Concrete providers shell out to their vendor CLI (`aws`, `az`, `gcloud`)
//! with JSON output. The `CloudCli` trait is the seam: production code uses
//! `ProcessRunner`, tests inject a `ScriptedCli` with canned responses.

use crate::error::{Error, Result};
use crate::model::{
    CloudProvider, Commitment, OfferingDetails, PaymentOption, PurchaseResult, Recommendation,
    ServiceType, Term,
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

pub mod aws;
pub mod azure;
pub mod gcp;
pub mod mock;

/// Filters for a recommendation fetch
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecommendationQuery {
    /// Services to fetch recommendations for
    pub services: Vec<ServiceType>,
    /// Payment option to request
    pub payment_option: PaymentOption,
    /// Commitment term to request
    pub term: Term,
    /// Usage lookback window in days (7, 30 or 60)
    pub lookback_days: u32,
    /// Restrict to a single account / subscription / project
    pub account: Option<String>,
    /// Savings Plans plan types to include, case-insensitive; empty means all
    pub include_plan_types: Vec<String>,
    /// Savings Plans plan types to exclude, case-insensitive; wins over include
    pub exclude_plan_types: Vec<String>,
}

impl Default for RecommendationQuery {
    fn default() -> Self {
        Self {
            services: Vec::new(),
            payment_option: PaymentOption::PartialUpfront,
            term: Term::ThreeYear,
            lookback_days: 60,
            account: None,
            include_plan_types: Vec::new(),
            exclude_plan_types: Vec::new(),
        }
    }
}

impl RecommendationQuery {
    /// Whether a Savings Plans plan type passes the include/exclude filter.
    /// Exclusion wins over inclusion; both lists compare case-insensitively.
    pub fn plan_type_selected(&self, plan_type: &str) -> bool {
        let needle = plan_type.to_ascii_lowercase();
        if self
            .exclude_plan_types
            .iter()
            .any(|p| p.to_ascii_lowercase() == needle)
        {
            return false;
        }
        if self.include_plan_types.is_empty() {
            return true;
        }
        self.include_plan_types
            .iter()
            .any(|p| p.to_ascii_lowercase() == needle)
    }
}

/// One account / subscription / project visible to the provider
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Account {
    /// Provider-native account identifier
    pub id: String,
    /// Display name when the provider exposes one
    pub name: String,
}

/// Discovered ambient credentials
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProviderCredentials {
    /// Provider the credentials belong to
    pub provider: CloudProvider,
    /// Authenticated principal (ARN, user name, service account)
    pub identity: String,
    /// Account / subscription / project the principal resolves to
    pub account: String,
}

/// Construction-time settings for one provider
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProviderSettings {
    /// Default region
    pub region: Option<String>,
    /// AWS named profile
    pub profile: Option<String>,
    /// Azure subscription ID
    pub subscription: Option<String>,
    /// GCP project ID
    pub project: Option<String>,
    /// Explicit access key, when not relying on ambient credentials
    pub access_key_id: Option<String>,
    /// Explicit secret key
    pub secret_access_key: Option<String>,
}

/// Uniform operation set every (provider, service) pair implements
#[async_trait]
pub trait ServiceClient: Send + Sync {
    /// Service this client covers
    fn service_type(&self) -> ServiceType;

    /// Region code the client is bound to
    fn region(&self) -> &str;

    /// Fetch recommendations for this service. Clients whose provider only
    /// exposes recommendations through a centralized endpoint return an empty
    /// list; that is a contract choice, not an error.
    async fn get_recommendations(
        &self,
        query: &RecommendationQuery,
        cancel: &CancellationToken,
    ) -> Result<Vec<Recommendation>>;

    /// List existing commitments, exhausting pagination
    async fn get_existing_commitments(
        &self,
        cancel: &CancellationToken,
    ) -> Result<Vec<Commitment>>;

    /// Purchase the commitment a recommendation describes. Never fails at the
    /// call level: errors ride inside the returned result.
    async fn purchase_commitment(
        &self,
        recommendation: &Recommendation,
        cancel: &CancellationToken,
    ) -> PurchaseResult;

    /// Check a matching catalog offering exists for the recommendation
    async fn validate_offering(
        &self,
        recommendation: &Recommendation,
        cancel: &CancellationToken,
    ) -> Result<()>;

    /// Resolve the recommendation to its concrete catalog offering
    async fn get_offering_details(
        &self,
        recommendation: &Recommendation,
        cancel: &CancellationToken,
    ) -> Result<OfferingDetails>;

    /// Resource types purchasable in this region, sorted and deduplicated
    async fn get_valid_resource_types(&self, cancel: &CancellationToken) -> Result<Vec<String>>;
}

/// Centralized recommendation endpoint for providers that expose one
#[async_trait]
pub trait RecommendationsClient: Send + Sync {
    async fn get_recommendations(
        &self,
        query: &RecommendationQuery,
        cancel: &CancellationToken,
    ) -> Result<Vec<Recommendation>>;
}

/// A configured cloud provider handle
#[async_trait]
pub trait Provider: Send + Sync {
    /// Registry key (aws, azure, gcp)
    fn name(&self) -> &'static str;

    /// Human readable provider name
    fn display_name(&self) -> &'static str;

    /// Region used when the caller specifies none
    fn default_region(&self) -> String;

    /// Services this provider supports
    fn supported_services(&self) -> Vec<ServiceType>;

    /// Cheap credential probe. Never propagates an error.
    async fn is_configured(&self) -> bool;

    /// Same probe as `is_configured` with a structured error on failure
    async fn validate_credentials(&self) -> Result<()>;

    /// Discover the ambient credentials in use
    async fn get_credentials(&self) -> Result<ProviderCredentials>;

    /// Enumerate accounts / subscriptions / projects
    async fn get_accounts(&self) -> Result<Vec<Account>>;

    /// Enumerate regions available to the account
    async fn get_regions(&self) -> Result<Vec<String>>;

    /// Build a service client bound to a region. Callers that fan out build
    /// one client per task; clients are not required to be safe for
    /// concurrent use on the same instance.
    fn service_client(&self, service: ServiceType, region: &str) -> Result<Box<dyn ServiceClient>>;

    /// Build the centralized recommendations client
    fn recommendations_client(&self, region: &str) -> Result<Box<dyn RecommendationsClient>>;
}

/// Constructor closure stored in the registry
pub type ProviderConstructor =
    Box<dyn Fn(&ProviderSettings) -> Result<Arc<dyn Provider>> + Send + Sync>;

/// Process-wide table mapping provider names to constructors.
///
/// Registration happens once at startup through `register_all`; lookups after
/// that are read-only.
pub struct ProviderRegistry {
    constructors: HashMap<String, ProviderConstructor>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self {
            constructors: HashMap::new(),
        }
    }

    /// Register a provider constructor under a name
    pub fn register(&mut self, name: &str, constructor: ProviderConstructor) {
        self.constructors.insert(name.to_string(), constructor);
    }

    /// Construct a provider by name
    pub fn create(&self, name: &str, settings: &ProviderSettings) -> Result<Arc<dyn Provider>> {
        match self.constructors.get(&name.to_ascii_lowercase()) {
            Some(constructor) => constructor(settings),
            None => Err(Error::unsupported(format!(
                "no provider registered under '{}'",
                name
            ))),
        }
    }

    /// Registered provider names, sorted
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.constructors.keys().cloned().collect();
        names.sort();
        names
    }
}

impl Default for ProviderRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Register every built-in provider. Called explicitly at program entry
/// rather than through module-load side effects.
pub fn register_all(registry: &mut ProviderRegistry) {
    registry.register(
        "aws",
        Box::new(|settings| {
            Ok(Arc::new(aws::AwsProvider::new(settings.clone())) as Arc<dyn Provider>)
        }),
    );
    registry.register(
        "azure",
        Box::new(|settings| {
            Ok(Arc::new(azure::AzureProvider::new(settings.clone())) as Arc<dyn Provider>)
        }),
    );
    registry.register(
        "gcp",
        Box::new(|settings| {
            Ok(Arc::new(gcp::GcpProvider::new(settings.clone())) as Arc<dyn Provider>)
        }),
    );
}

/// A fully populated registry
pub fn default_registry() -> ProviderRegistry {
    let mut registry = ProviderRegistry::new();
    register_all(&mut registry);
    registry
}

/// Narrow interface in front of vendor CLI execution
#[async_trait]
pub trait CloudCli: Send + Sync {
    /// Run the program with arguments and return stdout on success
    async fn run(&self, program: &str, args: &[String]) -> Result<String>;
}

/// Production runner executing the real vendor CLI
pub struct ProcessRunner;

#[async_trait]
impl CloudCli for ProcessRunner {
    async fn run(&self, program: &str, args: &[String]) -> Result<String> {
        let output = tokio::process::Command::new(program)
            .args(args)
            .output()
            .await
            .map_err(|e| Error::internal(format!("failed to execute {}: {}", program, e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(classify_cli_error(program, &stderr));
        }

        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }
}

/// Map CLI stderr to an error kind so the retry loop knows what to retry
pub fn classify_cli_error(program: &str, stderr: &str) -> Error {
    let lowered = stderr.to_ascii_lowercase();
    if lowered.contains("throttling")
        || lowered.contains("toomanyrequests")
        || lowered.contains("rate exceeded")
        || lowered.contains("requestlimitexceeded")
        || lowered.contains("resource_exhausted")
    {
        Error::rate_limit(format!("{}: {}", program, stderr.trim()))
    } else if lowered.contains("expiredtoken")
        || lowered.contains("invalidclienttokenid")
        || lowered.contains("accessdenied")
        || lowered.contains("authfailure")
        || lowered.contains("unauthenticated")
        || lowered.contains("credential")
        || lowered.contains("please run 'az login'")
        || lowered.contains("unable to locate")
    {
        Error::credentials(format!("{}: {}", program, stderr.trim()))
    } else {
        Error::api(format!("{} command failed: {}", program, stderr.trim()))
    }
}

/// Best-effort monetary string parse. Providers emit plain decimals but
/// occasionally drift into currency symbols, thousands separators or
/// scientific notation; unparseable optional fields become zero and never
/// fail the row.
pub fn parse_money(raw: &str) -> f64 {
    let cleaned: String = raw
        .trim()
        .chars()
        .filter(|c| c.is_ascii_digit() || matches!(c, '.' | '-' | '+' | 'e' | 'E'))
        .collect();
    cleaned.parse::<f64>().unwrap_or(0.0)
}

/// Parse a possibly fractional quantity string, truncating to an integer.
/// Returns None when the string is not numeric; callers skip the row and log.
pub fn parse_quantity(raw: &str) -> Option<u32> {
    let value = raw.trim().parse::<f64>().ok()?;
    if !value.is_finite() || value < 0.0 {
        return None;
    }
    Some(value.trunc() as u32)
}

/// Field access helpers for `serde_json::Value` trees returned by the CLIs
pub(crate) fn json_str<'a>(value: &'a serde_json::Value, key: &str) -> &'a str {
    value.get(key).and_then(|v| v.as_str()).unwrap_or("")
}

pub(crate) fn json_f64(value: &serde_json::Value, key: &str) -> f64 {
    match value.get(key) {
        Some(v) if v.is_f64() || v.is_i64() || v.is_u64() => v.as_f64().unwrap_or(0.0),
        Some(v) => v.as_str().map(parse_money).unwrap_or(0.0),
        None => 0.0,
    }
}

pub(crate) fn json_u64(value: &serde_json::Value, key: &str) -> u64 {
    match value.get(key) {
        Some(v) if v.is_u64() || v.is_i64() => v.as_u64().unwrap_or(0),
        Some(v) => v
            .as_str()
            .and_then(|s| s.trim().parse::<u64>().ok())
            .unwrap_or(0),
        None => 0,
    }
}

pub(crate) fn json_bool(value: &serde_json::Value, key: &str) -> bool {
    value.get(key).and_then(|v| v.as_bool()).unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_lookup() {
        let registry = default_registry();
        assert_eq!(registry.names(), vec!["aws", "azure", "gcp"]);

        let provider = registry
            .create("aws", &ProviderSettings::default())
            .expect("aws constructor");
        assert_eq!(provider.name(), "aws");

        assert!(registry.create("oracle", &ProviderSettings::default()).is_err());
    }

    #[test]
    fn test_registry_name_is_case_insensitive() {
        let registry = default_registry();
        assert!(registry.create("AWS", &ProviderSettings::default()).is_ok());
    }

    #[test]
    fn test_plan_type_filter_exclude_wins() {
        let query = RecommendationQuery {
            include_plan_types: vec!["Compute".to_string(), "sagemaker".to_string()],
            exclude_plan_types: vec!["COMPUTE".to_string()],
            ..Default::default()
        };
        assert!(!query.plan_type_selected("compute"));
        assert!(query.plan_type_selected("SageMaker"));
        assert!(!query.plan_type_selected("ec2-instance"));
    }

    #[test]
    fn test_plan_type_filter_empty_include_selects_all() {
        let query = RecommendationQuery::default();
        assert!(query.plan_type_selected("compute"));
        assert!(query.plan_type_selected("database"));
    }

    #[test]
    fn test_parse_money_permissive() {
        assert_eq!(parse_money("1500.75"), 1500.75);
        assert_eq!(parse_money("$1,500.75"), 1500.75);
        assert_eq!(parse_money("1.5e3"), 1500.0);
        assert_eq!(parse_money("-12.5"), -12.5);
        assert_eq!(parse_money("not a number"), 0.0);
        assert_eq!(parse_money(""), 0.0);
    }

    #[test]
    fn test_parse_quantity_truncates() {
        assert_eq!(parse_quantity("2.0"), Some(2));
        assert_eq!(parse_quantity("2.9"), Some(2));
        assert_eq!(parse_quantity("0.4"), Some(0));
        assert_eq!(parse_quantity("-1"), None);
        assert_eq!(parse_quantity("three"), None);
    }

    #[test]
    fn test_classify_cli_error() {
        assert!(matches!(
            classify_cli_error("aws", "An error occurred (ThrottlingException)"),
            Error::RateLimit(_)
        ));
        assert!(matches!(
            classify_cli_error("aws", "Unable to locate credentials"),
            Error::Credentials(_)
        ));
        assert!(matches!(
            classify_cli_error("aws", "An error occurred (InternalFailure)"),
            Error::Api(_)
        ));
    }
}
