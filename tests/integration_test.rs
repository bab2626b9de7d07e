use cloudcommit::config::Config;
use cloudcommit::error::Error;
use cloudcommit::model::{PaymentOption, ServiceType, Term};
use cloudcommit::providers::aws::AwsProvider;
use cloudcommit::providers::mock::ScriptedCli;
use cloudcommit::providers::{
    default_registry, Provider, ProviderSettings, RecommendationQuery, RecommendationsClient,
    ServiceClient,
};
use cloudcommit::purchase::{sanitize_identifier, PurchaseRunner};
use cloudcommit::{recommendations, regions, reports, retry, stats};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

fn rds_detail(region: &str, quantity: &str, savings: &str) -> String {
    format!(
        r#"{{
            "AccountId": "123456789012",
            "InstanceDetails": {{
                "RDSInstanceDetails": {{
                    "InstanceType": "db.r6g.xlarge",
                    "DatabaseEngine": "aurora-mysql",
                    "DeploymentOption": "Multi-AZ",
                    "Region": "{}"
                }}
            }},
            "RecommendedNumberOfInstancesToPurchase": "{}",
            "EstimatedMonthlySavingsAmount": "{}",
            "EstimatedMonthlySavingsPercentage": "50",
            "UpfrontCost": "1000",
            "RecurringStandardMonthlyCost": "50",
            "EstimatedMonthlyOnDemandCost": "200"
        }}"#,
        region, quantity, savings
    )
}

const RDS_OFFERING: &str = r#"{"ReservedDBInstancesOfferings": [{
    "ReservedDBInstancesOfferingId": "offer-648fd",
    "DBInstanceClass": "db.r6g.xlarge",
    "ProductDescription": "aurora-mysql",
    "MultiAZ": true,
    "Duration": 94608000,
    "OfferingType": "Partial Upfront",
    "FixedPrice": 1000.0,
    "UsagePrice": 0.0,
    "CurrencyCode": "USD"
}]}"#;

fn scripted_aws() -> (Arc<ScriptedCli>, AwsProvider) {
    let cli = Arc::new(ScriptedCli::new());
    let provider = AwsProvider::with_cli(
        ProviderSettings {
            region: Some("us-east-1".to_string()),
            ..Default::default()
        },
        cli.clone(),
    );
    (cli, provider)
}

#[tokio::test]
async fn test_recommend_to_purchase_pipeline() {
    let (cli, provider) = scripted_aws();
    // Five details in the centralized response, two in the target region.
    let details = [
        rds_detail("US East (N. Virginia)", "10", "500"),
        rds_detail("US West (Oregon)", "3", "100"),
        rds_detail("us-east-1", "5", "250"),
        rds_detail("EU (Ireland)", "2", "80"),
        rds_detail("Asia Pacific (Tokyo)", "1", "40"),
    ]
    .join(",");
    cli.respond(
        "get-reservation-purchase-recommendation",
        &format!(
            r#"{{"Recommendations": [{{"AccountId": "123456789012", "RecommendationDetails": [{}]}}]}}"#,
            details
        ),
    );
    cli.respond("describe-reserved-db-instances-offerings", RDS_OFFERING);
    cli.respond(
        "purchase-reserved-db-instances-offering",
        r#"{"ReservedDBInstance": {"ReservedDBInstanceId": "rds-db-r6g-xlarge-1700000000", "FixedPrice": 1000.0}}"#,
    );

    let cancel = CancellationToken::new();
    let query = RecommendationQuery {
        services: vec![ServiceType::RelationalDb],
        payment_option: PaymentOption::PartialUpfront,
        term: Term::ThreeYear,
        lookback_days: 60,
        ..Default::default()
    };

    // Ingest: only the two target-region details survive.
    let client = provider.recommendations_client("us-east-1").unwrap();
    let fetched = client.get_recommendations(&query, &cancel).await.unwrap();
    assert_eq!(fetched.len(), 2);
    assert!(fetched.iter().all(|r| r.region == "us-east-1"));
    assert!(fetched.iter().all(|r| r.count >= 1));

    // Scale to 50% coverage: 10 -> 5, 5 -> 2.
    let scaled = recommendations::apply_coverage(fetched, 50.0).unwrap();
    let counts: Vec<u32> = scaled.iter().map(|r| r.count).collect();
    assert_eq!(counts, vec![5, 2]);

    let mut sorted = scaled;
    recommendations::sort(&mut sorted, "savings", false);
    assert!(sorted[0].estimated_savings >= sorted[1].estimated_savings);

    // Purchase sequentially.
    let runner = PurchaseRunner::new(false);
    let outcome = runner.run(&provider, &sorted, &cancel).await;
    assert!(outcome.interrupted.is_none());
    assert_eq!(outcome.results.len(), 2);
    for result in &outcome.results {
        // Exactly one of success-with-id or failure-with-error.
        assert!(result.success);
        assert!(!result.commitment_id.is_empty());
        assert!(result.error.is_none());
    }

    let aggregated = stats::aggregate(&outcome.results);
    assert_eq!(aggregated.overall.succeeded, 2);
    assert_eq!(aggregated.overall.instances, 7);
    assert_eq!(aggregated.by_engine["aurora-mysql"].attempts, 2);

    // Results survive the CSV projection.
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("purchases.csv");
    reports::write_purchase_results(&path, &outcome.results).unwrap();
    let content = std::fs::read_to_string(&path).unwrap();
    assert!(content.contains("rds-db-r6g-xlarge-1700000000"));
    assert!(content.contains("success"));
}

#[tokio::test]
async fn test_purchase_batch_isolates_catalog_misses() {
    let (cli, provider) = scripted_aws();
    cli.respond(
        "describe-reserved-db-instances-offerings --db-instance-class db.r6g.xlarge",
        RDS_OFFERING,
    );
    // The t3 offering listing comes back empty, so that purchase must fail
    // while its sibling proceeds.
    cli.respond(
        "describe-reserved-db-instances-offerings --db-instance-class db.t3.medium",
        r#"{"ReservedDBInstancesOfferings": []}"#,
    );
    cli.respond(
        "purchase-reserved-db-instances-offering",
        r#"{"ReservedDBInstance": {"ReservedDBInstanceId": "rds-ri-1", "FixedPrice": 1000.0}}"#,
    );

    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("input.csv");
    std::fs::write(
        &input,
        "Region,Engine,Instance Type,AZ Config,Payment Option,Term (months),Instance Count\n\
         us-east-1,aurora-mysql,db.r6g.xlarge,multi-az,partial-upfront,36,2\n\
         us-east-1,aurora-mysql,db.t3.medium,multi-az,partial-upfront,36,1\n",
    )
    .unwrap();
    let batch = reports::read_recommendations(&input).unwrap();
    assert_eq!(batch.len(), 2);

    let cancel = CancellationToken::new();
    let outcome = PurchaseRunner::new(false)
        .run(&provider, &batch, &cancel)
        .await;

    assert_eq!(outcome.results.len(), 2);
    assert!(outcome.results[0].success);
    assert!(!outcome.results[1].success);
    assert!(outcome.results[1]
        .error
        .as_deref()
        .unwrap()
        .contains("no offerings found"));
}

#[tokio::test]
async fn test_cancelled_batch_keeps_partial_results() {
    let (cli, provider) = scripted_aws();
    cli.respond("describe-reserved-db-instances-offerings", RDS_OFFERING);
    cli.respond(
        "purchase-reserved-db-instances-offering",
        r#"{"ReservedDBInstance": {"ReservedDBInstanceId": "rds-ri-1", "FixedPrice": 1000.0}}"#,
    );

    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("input.csv");
    std::fs::write(
        &input,
        "Region,Engine,Instance Type,AZ Config,Payment Option,Term (months),Instance Count\n\
         us-east-1,aurora-mysql,db.r6g.xlarge,multi-az,partial-upfront,36,2\n",
    )
    .unwrap();
    let batch = reports::read_recommendations(&input).unwrap();

    let cancel = CancellationToken::new();
    cancel.cancel();
    let outcome = PurchaseRunner::new(false)
        .run(&provider, &batch, &cancel)
        .await;

    assert!(outcome.results.is_empty());
    assert!(matches!(outcome.interrupted, Some(Error::Cancelled(_))));
}

#[test]
fn test_region_normalization_scenarios() {
    assert_eq!(regions::normalize_region("US East (N. Virginia)"), "us-east-1");
    assert_eq!(regions::normalize_region("us-east-1"), "us-east-1");
    assert_eq!(regions::normalize_region("virginia"), "us-east-1");
    assert_eq!(
        regions::normalize_region("Mars (Red Planet)"),
        "Mars (Red Planet)"
    );
}

#[test]
fn test_sanitization_scenarios() {
    assert_eq!(
        sanitize_identifier("rds-db.t3.micro-1700000000"),
        "rds-db-t3-micro-1700000000"
    );
    let fallback = sanitize_identifier("--..--");
    assert!(!fallback.is_empty());
    assert!(fallback
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-'));
    assert!(!fallback.starts_with('-') && !fallback.ends_with('-'));
}

#[tokio::test]
async fn test_rate_limiter_cancellation_mid_backoff() {
    let mut policy = retry::RetryPolicy::new(
        Duration::from_secs(10),
        Duration::from_secs(30),
        5,
    );
    let cancel = CancellationToken::new();

    // Drive the policy into backoff territory, then cancel during the sleep.
    policy.record_failure();
    policy.record_failure();
    let sleeper = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        sleeper.cancel();
    });

    let started = std::time::Instant::now();
    let result = policy.wait(&cancel).await;
    assert!(matches!(result, Err(Error::Cancelled(_))));
    assert!(started.elapsed() < Duration::from_secs(2));
    assert_eq!(policy.attempts(), 2);
}

#[test]
fn test_registry_is_explicitly_populated() {
    let registry = default_registry();
    assert_eq!(registry.names(), vec!["aws", "azure", "gcp"]);

    let config = Config::default();
    for name in registry.names() {
        let provider = registry
            .create(&name, &config.provider_settings(&name))
            .unwrap();
        assert!(!provider.supported_services().is_empty());
        assert!(!provider.default_region().is_empty());
    }
}

#[tokio::test]
async fn test_per_service_clients_share_contract() {
    let (_cli, provider) = scripted_aws();
    for service in ServiceType::all() {
        let client = provider.service_client(*service, "us-east-1").unwrap();
        assert_eq!(client.service_type(), *service);
        assert_eq!(client.region(), "us-east-1");
    }
}

#[tokio::test]
async fn test_recommendation_csv_round_trip_totals() {
    let (cli, provider) = scripted_aws();
    cli.respond(
        "get-reservation-purchase-recommendation",
        &format!(
            r#"{{"Recommendations": [{{"RecommendationDetails": [{}, {}]}}]}}"#,
            rds_detail("us-east-1", "4", "320"),
            rds_detail("us-east-1", "2", "160")
        ),
    );

    let cancel = CancellationToken::new();
    let query = RecommendationQuery {
        services: vec![ServiceType::RelationalDb],
        ..Default::default()
    };
    let client = provider.recommendations_client("us-east-1").unwrap();
    let fetched = client.get_recommendations(&query, &cancel).await.unwrap();

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("round-trip.csv");
    reports::write_recommendations(&path, &fetched).unwrap();
    let read_back = reports::read_recommendations(&path).unwrap();

    assert_eq!(read_back.len(), fetched.len());
    let total_before: f64 = fetched.iter().map(|r| r.estimated_savings).sum();
    let total_after: f64 = read_back.iter().map(|r| r.estimated_savings).sum();
    assert!((total_before - total_after).abs() < 1e-6);
    let count_before: u32 = fetched.iter().map(|r| r.count).sum();
    let count_after: u32 = read_back.iter().map(|r| r.count).sum();
    assert_eq!(count_before, count_after);

    // Filtering the round-tripped set behaves identically.
    let criteria = recommendations::FilterCriteria {
        engines: vec!["aurora-mysql".to_string()],
        ..Default::default()
    };
    assert_eq!(
        recommendations::filter(&fetched, &criteria).len(),
        recommendations::filter(&read_back, &criteria).len()
    );
}
