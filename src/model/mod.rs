//! Normalized data model shared by every provider and transform.
//!
//! One `Recommendation` type is the currency of the whole pipeline: ingestion
//! produces it, transforms reshape it, the offering resolver and purchase
//! executor consume it. All external projections (CSV rows, reports) derive
//! from these types.

use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Cloud provider enumeration
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum CloudProvider {
    Aws,
    Azure,
    Gcp,
}

impl CloudProvider {
    /// Registry key for the provider
    pub fn as_str(&self) -> &'static str {
        match self {
            CloudProvider::Aws => "aws",
            CloudProvider::Azure => "azure",
            CloudProvider::Gcp => "gcp",
        }
    }

    /// Human readable provider name
    pub fn display_name(&self) -> &'static str {
        match self {
            CloudProvider::Aws => "Amazon Web Services",
            CloudProvider::Azure => "Microsoft Azure",
            CloudProvider::Gcp => "Google Cloud Platform",
        }
    }

    pub fn parse(value: &str) -> Result<Self> {
        match value.to_ascii_lowercase().as_str() {
            "aws" => Ok(CloudProvider::Aws),
            "azure" => Ok(CloudProvider::Azure),
            "gcp" | "google" => Ok(CloudProvider::Gcp),
            other => Err(Error::unsupported(format!("unknown provider: {}", other))),
        }
    }
}

impl std::fmt::Display for CloudProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Closed set of services the tool can recommend and purchase for
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum ServiceType {
    RelationalDb,
    Cache,
    Compute,
    Search,
    DataWarehouse,
    MemoryDb,
    NoSqlDb,
    SavingsPlans,
}

impl ServiceType {
    /// All service types, in dispatch order
    pub fn all() -> &'static [ServiceType] {
        &[
            ServiceType::RelationalDb,
            ServiceType::Cache,
            ServiceType::Compute,
            ServiceType::Search,
            ServiceType::DataWarehouse,
            ServiceType::MemoryDb,
            ServiceType::NoSqlDb,
            ServiceType::SavingsPlans,
        ]
    }

    /// Human readable service name
    pub fn display_name(&self) -> &'static str {
        match self {
            ServiceType::RelationalDb => "Relational Database",
            ServiceType::Cache => "Cache",
            ServiceType::Compute => "Compute",
            ServiceType::Search => "Search",
            ServiceType::DataWarehouse => "Data Warehouse",
            ServiceType::MemoryDb => "MemoryDB",
            ServiceType::NoSqlDb => "NoSQL Database",
            ServiceType::SavingsPlans => "Savings Plans",
        }
    }

    /// Provider catalog label used by centralized recommendation APIs
    pub fn catalog_label(&self) -> &'static str {
        match self {
            ServiceType::RelationalDb => "Amazon Relational Database Service",
            ServiceType::Cache => "Amazon ElastiCache",
            ServiceType::Compute => "Amazon Elastic Compute Cloud - Compute",
            ServiceType::Search => "Amazon OpenSearch Service",
            ServiceType::DataWarehouse => "Amazon Redshift",
            ServiceType::MemoryDb => "Amazon MemoryDB",
            ServiceType::NoSqlDb => "Amazon DynamoDB",
            ServiceType::SavingsPlans => "Savings Plans",
        }
    }

    /// Short identifier used in reservation IDs and CLI flags
    pub fn slug(&self) -> &'static str {
        match self {
            ServiceType::RelationalDb => "rds",
            ServiceType::Cache => "elasticache",
            ServiceType::Compute => "ec2",
            ServiceType::Search => "opensearch",
            ServiceType::DataWarehouse => "redshift",
            ServiceType::MemoryDb => "memorydb",
            ServiceType::NoSqlDb => "dynamodb",
            ServiceType::SavingsPlans => "savingsplans",
        }
    }

    pub fn parse(value: &str) -> Result<Self> {
        match value.to_ascii_lowercase().as_str() {
            "rds" | "relational_db" | "database" => Ok(ServiceType::RelationalDb),
            "elasticache" | "cache" => Ok(ServiceType::Cache),
            "ec2" | "compute" => Ok(ServiceType::Compute),
            "opensearch" | "elasticsearch" | "search" => Ok(ServiceType::Search),
            "redshift" | "data_warehouse" => Ok(ServiceType::DataWarehouse),
            "memorydb" => Ok(ServiceType::MemoryDb),
            "dynamodb" | "nosql" | "nosql_db" => Ok(ServiceType::NoSqlDb),
            "savingsplans" | "savings_plans" | "sp" => Ok(ServiceType::SavingsPlans),
            other => Err(Error::unsupported(format!("unknown service: {}", other))),
        }
    }
}

impl std::fmt::Display for ServiceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.slug())
    }
}

/// Kind of purchased discount
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum CommitmentType {
    ReservedInstance,
    Cud,
    SavingsPlan,
}

impl CommitmentType {
    pub fn display_name(&self) -> &'static str {
        match self {
            CommitmentType::ReservedInstance => "Reserved Instance",
            CommitmentType::Cud => "Committed Use Discount",
            CommitmentType::SavingsPlan => "Savings Plan",
        }
    }
}

/// Payment option for a commitment
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "kebab-case")]
pub enum PaymentOption {
    AllUpfront,
    PartialUpfront,
    NoUpfront,
    /// Monthly billing, used by GCP and Azure commitments
    Monthly,
}

impl PaymentOption {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentOption::AllUpfront => "all-upfront",
            PaymentOption::PartialUpfront => "partial-upfront",
            PaymentOption::NoUpfront => "no-upfront",
            PaymentOption::Monthly => "monthly",
        }
    }

    /// Capitalized label used by provider offering catalogs
    pub fn catalog_label(&self) -> &'static str {
        match self {
            PaymentOption::AllUpfront => "All Upfront",
            PaymentOption::PartialUpfront => "Partial Upfront",
            PaymentOption::NoUpfront => "No Upfront",
            PaymentOption::Monthly => "Monthly",
        }
    }

    /// Upper snake label used by centralized recommendation APIs
    pub fn api_label(&self) -> &'static str {
        match self {
            PaymentOption::AllUpfront => "ALL_UPFRONT",
            PaymentOption::PartialUpfront => "PARTIAL_UPFRONT",
            PaymentOption::NoUpfront => "NO_UPFRONT",
            PaymentOption::Monthly => "MONTHLY",
        }
    }

    pub fn parse(value: &str) -> Result<Self> {
        let normalized = value.trim().to_ascii_lowercase().replace([' ', '_'], "-");
        match normalized.as_str() {
            "all-upfront" => Ok(PaymentOption::AllUpfront),
            "partial-upfront" => Ok(PaymentOption::PartialUpfront),
            "no-upfront" => Ok(PaymentOption::NoUpfront),
            "monthly" => Ok(PaymentOption::Monthly),
            other => Err(Error::validation(format!(
                "invalid payment option: {}",
                other
            ))),
        }
    }
}

impl std::fmt::Display for PaymentOption {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Commitment duration
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Term {
    #[serde(rename = "1yr")]
    OneYear,
    #[serde(rename = "3yr")]
    ThreeYear,
}

impl Term {
    pub fn label(&self) -> &'static str {
        match self {
            Term::OneYear => "1yr",
            Term::ThreeYear => "3yr",
        }
    }

    pub fn months(&self) -> u32 {
        match self {
            Term::OneYear => 12,
            Term::ThreeYear => 36,
        }
    }

    /// Duration in provider catalog seconds
    pub fn seconds(&self) -> u64 {
        match self {
            Term::OneYear => 31_536_000,
            Term::ThreeYear => 94_608_000,
        }
    }

    /// Label used by centralized recommendation APIs
    pub fn api_label(&self) -> &'static str {
        match self {
            Term::OneYear => "ONE_YEAR",
            Term::ThreeYear => "THREE_YEARS",
        }
    }

    pub fn parse(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "1yr" | "1y" | "12" | "p1y" | "one_year" => Ok(Term::OneYear),
            "3yr" | "3y" | "36" | "p3y" | "three_years" => Ok(Term::ThreeYear),
            other => Err(Error::validation(format!("invalid term: {}", other))),
        }
    }

    /// Parse a term expressed in months, as CSV rows carry it
    pub fn from_months(months: u32) -> Result<Self> {
        match months {
            12 => Ok(Term::OneYear),
            36 => Ok(Term::ThreeYear),
            other => Err(Error::validation(format!(
                "invalid term months: {}",
                other
            ))),
        }
    }
}

impl std::fmt::Display for Term {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// Availability zone configuration for relational databases
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum AzConfig {
    SingleAz,
    MultiAz,
}

impl AzConfig {
    pub fn as_str(&self) -> &'static str {
        match self {
            AzConfig::SingleAz => "single-az",
            AzConfig::MultiAz => "multi-az",
        }
    }

    pub fn is_multi_az(&self) -> bool {
        matches!(self, AzConfig::MultiAz)
    }

    pub fn parse(value: &str) -> Result<Self> {
        let normalized = value.trim().to_ascii_lowercase().replace([' ', '_'], "-");
        match normalized.as_str() {
            "single-az" | "single" => Ok(AzConfig::SingleAz),
            "multi-az" | "multi" => Ok(AzConfig::MultiAz),
            other => Err(Error::validation(format!("invalid AZ config: {}", other))),
        }
    }
}

impl std::fmt::Display for AzConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Relational database payload
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DatabaseDetails {
    /// Database engine, normalized (aurora-mysql, postgresql, ...)
    pub engine: String,
    /// Deployment AZ configuration
    pub az_config: AzConfig,
}

/// Cache payload
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CacheDetails {
    /// Cache engine (redis, memcached)
    pub engine: String,
    /// Cache node type
    pub node_type: String,
}

/// Compute payload
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ComputeDetails {
    /// Platform description (Linux/UNIX, Windows, ...)
    pub platform: String,
    /// Instance tenancy (default, dedicated)
    pub tenancy: String,
    /// Reservation scope (Region or Availability Zone)
    pub scope: String,
}

/// Search cluster payload
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SearchDetails {
    /// Data node instance type
    pub instance_type: String,
    /// Whether dedicated master nodes are enabled
    pub master_enabled: bool,
    /// Dedicated master instance type
    pub master_type: Option<String>,
    /// Dedicated master node count
    pub master_count: u32,
}

/// Data warehouse payload
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DataWarehouseDetails {
    /// Cluster node type
    pub node_type: String,
    /// Number of nodes in the cluster
    pub node_count: u32,
    /// Cluster type (single-node, multi-node)
    pub cluster_type: String,
}

/// MemoryDB payload
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MemoryDbDetails {
    /// Engine (redis)
    pub engine: String,
    /// Node type
    pub node_type: String,
}

/// NoSQL database payload
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NoSqlDetails {
    /// Table class (standard, standard-ia)
    pub table_class: String,
    /// Capacity mode the reservation covers (read, write)
    pub capacity_mode: String,
}

/// Savings plan payload
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SavingsPlanDetails {
    /// Plan type (compute, ec2-instance, sagemaker, database)
    pub plan_type: String,
    /// Recommended hourly commitment in USD per hour
    pub hourly_commitment: f64,
    /// Estimated coverage percentage at the recommended commitment
    pub coverage: f64,
}

/// Service-specific recommendation payload, one variant per service
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ServiceDetails {
    Database(DatabaseDetails),
    Cache(CacheDetails),
    Compute(ComputeDetails),
    Search(SearchDetails),
    DataWarehouse(DataWarehouseDetails),
    MemoryDb(MemoryDbDetails),
    NoSql(NoSqlDetails),
    SavingsPlan(SavingsPlanDetails),
}

impl ServiceDetails {
    /// Service tag the payload belongs to. Invariant: equals the
    /// recommendation's `service` field.
    pub fn service_type(&self) -> ServiceType {
        match self {
            ServiceDetails::Database(_) => ServiceType::RelationalDb,
            ServiceDetails::Cache(_) => ServiceType::Cache,
            ServiceDetails::Compute(_) => ServiceType::Compute,
            ServiceDetails::Search(_) => ServiceType::Search,
            ServiceDetails::DataWarehouse(_) => ServiceType::DataWarehouse,
            ServiceDetails::MemoryDb(_) => ServiceType::MemoryDb,
            ServiceDetails::NoSql(_) => ServiceType::NoSqlDb,
            ServiceDetails::SavingsPlan(_) => ServiceType::SavingsPlans,
        }
    }

    /// Engine name when the payload carries one
    pub fn engine(&self) -> Option<&str> {
        match self {
            ServiceDetails::Database(d) => Some(&d.engine),
            ServiceDetails::Cache(d) => Some(&d.engine),
            ServiceDetails::MemoryDb(d) => Some(&d.engine),
            _ => None,
        }
    }

    /// AZ configuration when the payload carries one
    pub fn az_config(&self) -> Option<AzConfig> {
        match self {
            ServiceDetails::Database(d) => Some(d.az_config),
            _ => None,
        }
    }
}

/// A normalized purchase recommendation
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Recommendation {
    /// Source provider
    pub provider: CloudProvider,
    /// Service the commitment covers
    pub service: ServiceType,
    /// Account / subscription / project the recommendation applies to
    pub account: String,
    /// Region code, normalized (us-east-1 style, never a display name)
    pub region: String,
    /// Machine / instance / node class
    pub resource_type: String,
    /// Recommended quantity to purchase
    pub count: u32,
    /// Payment option
    pub payment_option: PaymentOption,
    /// Commitment duration
    pub term: Term,
    /// Kind of commitment
    pub commitment_type: CommitmentType,
    /// Estimated monthly savings in USD
    pub estimated_savings: f64,
    /// Savings percentage over on-demand, 0 to 100
    pub savings_percentage: f64,
    /// Upfront cost of the commitment in USD
    pub commitment_cost: f64,
    /// Current monthly on-demand cost in USD
    pub on_demand_cost: f64,
    /// Recurring monthly cost of the commitment in USD
    pub recurring_monthly_cost: f64,
    /// Estimated monthly on-demand equivalent cost in USD
    pub estimated_monthly_on_demand: f64,
    /// When the recommendation was produced
    pub timestamp: DateTime<Utc>,
    /// Free-form description
    pub description: String,
    /// Coverage fraction applied by scaling, 100 when untouched
    pub coverage: f64,
    /// Service-specific payload
    pub details: ServiceDetails,
}

impl Recommendation {
    /// Engine name, empty when the service has none
    pub fn engine(&self) -> &str {
        self.details.engine().unwrap_or("")
    }

    /// AZ configuration for relational database recommendations
    pub fn az_config(&self) -> Option<AzConfig> {
        self.details.az_config()
    }

    /// Check the recommendation is well formed enough to purchase.
    /// Callers must run this before submitting to the executor.
    pub fn validate(&self) -> Result<()> {
        if self.region.trim().is_empty() {
            return Err(Error::validation("recommendation has no region"));
        }
        if self.resource_type.trim().is_empty() {
            return Err(Error::validation("recommendation has no resource type"));
        }
        if self.count == 0 {
            return Err(Error::validation("recommendation count must be at least 1"));
        }
        if !(0.0..=100.0).contains(&self.savings_percentage) {
            return Err(Error::validation(format!(
                "savings percentage {} out of range",
                self.savings_percentage
            )));
        }
        if self.details.service_type() != self.service {
            return Err(Error::validation(format!(
                "details payload is for {} but recommendation is for {}",
                self.details.service_type(),
                self.service
            )));
        }
        if self.service == ServiceType::RelationalDb && self.engine().is_empty() {
            return Err(Error::validation("database recommendation has no engine"));
        }
        Ok(())
    }
}

/// A concrete purchasable catalog entry resolved for one recommendation
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OfferingDetails {
    /// Provider offering / SKU identifier
    pub offering_id: String,
    /// Resource type the offering covers
    pub resource_type: String,
    /// Duration in provider-native seconds
    pub duration_seconds: u64,
    /// Payment option
    pub payment_option: PaymentOption,
    /// Fixed upfront cost in the offering currency
    pub fixed_price: f64,
    /// Recurring usage cost per hour in the offering currency
    pub usage_price: f64,
    /// Offering currency code
    pub currency: String,
}

/// Lifecycle state of an existing commitment
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum CommitmentState {
    Active,
    PaymentPending,
    Retired,
    #[serde(untagged)]
    Other(String),
}

impl CommitmentState {
    pub fn parse(value: &str) -> Self {
        let normalized = value.trim().to_ascii_lowercase().replace([' ', '_'], "-");
        match normalized.as_str() {
            "active" => CommitmentState::Active,
            "payment-pending" => CommitmentState::PaymentPending,
            "retired" => CommitmentState::Retired,
            _ => CommitmentState::Other(normalized),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            CommitmentState::Active => "active",
            CommitmentState::PaymentPending => "payment-pending",
            CommitmentState::Retired => "retired",
            CommitmentState::Other(s) => s,
        }
    }
}

/// An existing reservation already owned by the account
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Commitment {
    /// Provider-assigned commitment identifier
    pub commitment_id: String,
    /// Kind of commitment
    pub commitment_type: CommitmentType,
    /// Service the commitment covers
    pub service: ServiceType,
    /// Region code
    pub region: String,
    /// Resource type
    pub resource_type: String,
    /// Quantity committed
    pub count: u32,
    /// Lifecycle state
    pub state: CommitmentState,
    /// When the commitment started
    pub start_date: Option<DateTime<Utc>>,
    /// When the commitment ends
    pub end_date: Option<DateTime<Utc>>,
}

/// Outcome of one purchase attempt. Immutable once produced.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PurchaseResult {
    /// The recommendation that drove the purchase
    pub recommendation: Recommendation,
    /// Whether the provider confirmed the purchase
    pub success: bool,
    /// Provider-assigned commitment identifier, empty on failure
    pub commitment_id: String,
    /// Client-side purchase attempt identifier
    pub purchase_id: String,
    /// Human readable outcome message
    pub message: String,
    /// Error text on failure
    pub error: Option<String>,
    /// Actual upfront cost reported by the provider
    pub actual_cost: f64,
    /// When the attempt completed
    pub timestamp: DateTime<Utc>,
}

impl PurchaseResult {
    /// Build a confirmed purchase result
    pub fn succeeded(
        recommendation: Recommendation,
        commitment_id: impl Into<String>,
        purchase_id: impl Into<String>,
        actual_cost: f64,
        message: impl Into<String>,
    ) -> Self {
        Self {
            recommendation,
            success: true,
            commitment_id: commitment_id.into(),
            purchase_id: purchase_id.into(),
            message: message.into(),
            error: None,
            actual_cost,
            timestamp: Utc::now(),
        }
    }

    /// Build a failed purchase result carrying the error
    pub fn failed(
        recommendation: Recommendation,
        purchase_id: impl Into<String>,
        error: &Error,
    ) -> Self {
        Self {
            recommendation,
            success: false,
            commitment_id: String::new(),
            purchase_id: purchase_id.into(),
            message: String::new(),
            error: Some(error.to_string()),
            actual_cost: 0.0,
            timestamp: Utc::now(),
        }
    }
}
