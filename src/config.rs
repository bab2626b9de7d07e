use crate::error::{Error, Result};
use crate::model::{PaymentOption, Term};
use crate::providers::ProviderSettings;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// AWS configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AwsSettings {
    /// Default region
    pub region: Option<String>,
    /// Named credentials profile
    pub profile: Option<String>,
    /// Explicit access key, when not using ambient credentials
    pub access_key_id: Option<String>,
    /// Explicit secret key
    pub secret_access_key: Option<String>,
}

/// Azure configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AzureSettings {
    /// Default region
    pub region: Option<String>,
    /// Subscription ID
    pub subscription_id: Option<String>,
    /// Tenant ID for service principal auth
    pub tenant_id: Option<String>,
    /// Client ID for service principal auth
    pub client_id: Option<String>,
}

/// GCP configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct GcpSettings {
    /// Default region
    pub region: Option<String>,
    /// Project ID
    pub project_id: Option<String>,
    /// Billing account for commitment purchases
    pub billing_account: Option<String>,
}

/// Purchase defaults applied when the CLI does not override them
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PurchaseSettings {
    /// Commitment term label (1yr or 3yr)
    pub term: String,
    /// Payment option label
    pub payment_option: String,
    /// Coverage percentage applied to recommended quantities
    pub coverage: f64,
    /// Usage lookback window in days
    pub lookback_days: u32,
    /// Resolve and validate without submitting purchases
    pub dry_run: bool,
}

impl Default for PurchaseSettings {
    fn default() -> Self {
        Self {
            term: "3yr".to_string(),
            payment_option: "partial-upfront".to_string(),
            coverage: 100.0,
            lookback_days: 60,
            dry_run: false,
        }
    }
}

impl PurchaseSettings {
    pub fn term(&self) -> Result<Term> {
        Term::parse(&self.term)
    }

    pub fn payment_option(&self) -> Result<PaymentOption> {
        PaymentOption::parse(&self.payment_option)
    }

    pub fn validate(&self) -> Result<()> {
        self.term()?;
        self.payment_option()?;
        if !self.coverage.is_finite() || self.coverage <= 0.0 || self.coverage > 100.0 {
            return Err(Error::validation(format!(
                "coverage must be in (0, 100], got {}",
                self.coverage
            )));
        }
        if !matches!(self.lookback_days, 7 | 30 | 60) {
            return Err(Error::validation(format!(
                "lookback must be 7, 30 or 60 days, got {}",
                self.lookback_days
            )));
        }
        Ok(())
    }
}

/// Output configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputSettings {
    /// Directory for generated CSV files
    pub directory: Option<String>,
    /// File name prefix for generated CSV files
    pub prefix: String,
}

impl Default for OutputSettings {
    fn default() -> Self {
        Self {
            directory: None,
            prefix: "recommendations".to_string(),
        }
    }
}

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    pub aws: Option<AwsSettings>,
    pub azure: Option<AzureSettings>,
    pub gcp: Option<GcpSettings>,
    pub purchase: Option<PurchaseSettings>,
    pub output: Option<OutputSettings>,
}

impl Config {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load configuration from a JSON file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = std::fs::read_to_string(path.as_ref())
            .map_err(|e| Error::config(format!("failed to read config file: {}", e)))?;
        Self::from_str(&contents)
    }

    /// Parse configuration from a JSON string
    pub fn from_str(contents: &str) -> Result<Self> {
        let config = serde_json::from_str::<Self>(contents)
            .map_err(|e| Error::config(format!("failed to parse config: {}", e)))?;
        config.validate().map(|_| config)
    }

    /// Validate every section, reporting all problems at once
    pub fn validate(&self) -> Result<()> {
        let mut validation_errors = Vec::new();
        if let Some(ref purchase) = self.purchase {
            if let Err(e) = purchase.validate() {
                validation_errors.push(format!("purchase: {}", e));
            }
        }
        if validation_errors.is_empty() {
            Ok(())
        } else {
            Err(Error::validation(validation_errors.join("; ")))
        }
    }

    /// Merge another configuration over this one, section by section
    pub fn merge(&mut self, other: Config) {
        macro_rules! merge_option {
            ($field:ident) => {
                if other.$field.is_some() {
                    self.$field = other.$field;
                }
            };
        }
        merge_option!(aws);
        merge_option!(azure);
        merge_option!(gcp);
        merge_option!(purchase);
        merge_option!(output);
    }

    /// Purchase settings, defaulted when absent
    pub fn purchase_settings(&self) -> PurchaseSettings {
        self.purchase.clone().unwrap_or_default()
    }

    /// Output settings, defaulted when absent
    pub fn output_settings(&self) -> OutputSettings {
        self.output.clone().unwrap_or_default()
    }

    /// Constructor settings for a named provider
    pub fn provider_settings(&self, provider: &str) -> ProviderSettings {
        match provider.to_ascii_lowercase().as_str() {
            "aws" => {
                let aws = self.aws.clone().unwrap_or_default();
                ProviderSettings {
                    region: aws.region,
                    profile: aws.profile,
                    access_key_id: aws.access_key_id,
                    secret_access_key: aws.secret_access_key,
                    ..Default::default()
                }
            }
            "azure" => {
                let azure = self.azure.clone().unwrap_or_default();
                ProviderSettings {
                    region: azure.region,
                    subscription: azure.subscription_id,
                    ..Default::default()
                }
            }
            "gcp" => {
                let gcp = self.gcp.clone().unwrap_or_default();
                ProviderSettings {
                    region: gcp.region,
                    project: gcp.project_id,
                    ..Default::default()
                }
            }
            _ => ProviderSettings::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_str_and_sections() {
        let config = Config::from_str(
            r#"{
                "aws": {"region": "eu-west-1", "profile": "prod"},
                "purchase": {"term": "1yr", "payment_option": "no-upfront", "coverage": 80.0, "lookback_days": 30, "dry_run": true}
            }"#,
        )
        .unwrap();

        let settings = config.provider_settings("aws");
        assert_eq!(settings.region.as_deref(), Some("eu-west-1"));
        assert_eq!(settings.profile.as_deref(), Some("prod"));

        let purchase = config.purchase_settings();
        assert_eq!(purchase.term().unwrap(), Term::OneYear);
        assert_eq!(
            purchase.payment_option().unwrap(),
            PaymentOption::NoUpfront
        );
        assert!(purchase.dry_run);
    }

    #[test]
    fn test_invalid_purchase_section_rejected() {
        let result = Config::from_str(
            r#"{"purchase": {"term": "2yr", "payment_option": "partial-upfront", "coverage": 80.0, "lookback_days": 60, "dry_run": false}}"#,
        );
        assert!(result.is_err());

        let result = Config::from_str(
            r#"{"purchase": {"term": "1yr", "payment_option": "partial-upfront", "coverage": 0.0, "lookback_days": 60, "dry_run": false}}"#,
        );
        assert!(result.is_err());

        let result = Config::from_str(
            r#"{"purchase": {"term": "1yr", "payment_option": "partial-upfront", "coverage": 50.0, "lookback_days": 45, "dry_run": false}}"#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_merge_overrides_sections() {
        let mut base = Config::from_str(r#"{"aws": {"region": "us-east-1"}}"#).unwrap();
        let overlay = Config::from_str(r#"{"aws": {"region": "us-west-2"}}"#).unwrap();
        base.merge(overlay);
        assert_eq!(
            base.provider_settings("aws").region.as_deref(),
            Some("us-west-2")
        );
    }

    #[test]
    fn test_defaults() {
        let config = Config::default();
        let purchase = config.purchase_settings();
        assert_eq!(purchase.term().unwrap(), Term::ThreeYear);
        assert_eq!(purchase.coverage, 100.0);
        assert_eq!(config.output_settings().prefix, "recommendations");
    }
}
