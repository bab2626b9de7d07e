use clap::{Parser, Subcommand};
use cloudcommit::config::Config;
use cloudcommit::error::{Error, Result};
use cloudcommit::model::{PaymentOption, ServiceType, Term};
use cloudcommit::providers::{
    default_registry, Provider, RecommendationQuery, RecommendationsClient, ServiceClient,
};
use cloudcommit::purchase::PurchaseRunner;
use cloudcommit::{recommendations, reports, stats};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "cloudcommit",
    version,
    about = "Recommend and purchase cloud commitment discounts"
)]
struct Cli {
    /// Path to a JSON configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Cloud provider (aws, azure, gcp)
    #[arg(long, global = true, default_value = "aws")]
    provider: String,

    /// Region code, defaulting to the provider's configured region
    #[arg(long, global = true)]
    region: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Fetch recommendations, apply transforms and export them
    Recommend {
        /// Services to fetch, comma separated (rds, elasticache, ec2, ...)
        #[arg(long, value_delimiter = ',', default_value = "rds")]
        services: Vec<String>,
        /// Commitment term (1yr or 3yr)
        #[arg(long)]
        term: Option<String>,
        /// Payment option
        #[arg(long)]
        payment: Option<String>,
        /// Usage lookback in days (7, 30 or 60)
        #[arg(long)]
        lookback: Option<u32>,
        /// Coverage percentage applied to recommended counts
        #[arg(long)]
        coverage: Option<f64>,
        /// Keep only these engines, comma separated
        #[arg(long, value_delimiter = ',')]
        engines: Vec<String>,
        /// Keep only these instance types, comma separated
        #[arg(long, value_delimiter = ',')]
        instance_types: Vec<String>,
        /// Minimum savings percentage
        #[arg(long)]
        min_savings_percent: Option<f64>,
        /// Sort selector (savings, cost, instances, engine, instance_type, region)
        #[arg(long, default_value = "savings")]
        sort: String,
        /// Flip the sort direction
        #[arg(long)]
        reverse: bool,
        /// Output CSV path; a timestamped name is generated when omitted
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Purchase commitments from a recommendation CSV
    Purchase {
        /// Recommendation CSV to purchase from
        #[arg(long)]
        input: PathBuf,
        /// Coverage percentage applied before purchasing
        #[arg(long)]
        coverage: Option<f64>,
        /// Resolve and validate offerings without submitting
        #[arg(long)]
        dry_run: bool,
        /// Purchase result CSV path; a timestamped name is generated when omitted
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// List existing commitments
    Commitments {
        /// Restrict to one service
        #[arg(long)]
        service: Option<String>,
    },
    /// List purchasable resource types for a service
    ResourceTypes {
        /// Service to list resource types for
        #[arg(long)]
        service: String,
    },
    /// Show registered providers and credential status
    Providers,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("cloudcommit=info")),
        )
        .init();

    if let Err(err) = run(Cli::parse()).await {
        eprintln!("error: {}", err);
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let mut config = Config::default();
    if let Some(ref path) = cli.config {
        config.merge(Config::from_file(path)?);
    }

    let cancel = CancellationToken::new();
    let guard = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupt received, cancelling");
            guard.cancel();
        }
    });

    let registry = default_registry();
    let provider = registry.create(&cli.provider, &config.provider_settings(&cli.provider))?;
    let region = cli
        .region
        .clone()
        .unwrap_or_else(|| provider.default_region());

    match cli.command {
        Command::Recommend {
            services,
            term,
            payment,
            lookback,
            coverage,
            engines,
            instance_types,
            min_savings_percent,
            sort,
            reverse,
            output,
        } => {
            let purchase_defaults = config.purchase_settings();
            let query = RecommendationQuery {
                services: parse_services(&services)?,
                payment_option: match payment {
                    Some(ref value) => PaymentOption::parse(value)?,
                    None => purchase_defaults.payment_option()?,
                },
                term: match term {
                    Some(ref value) => Term::parse(value)?,
                    None => purchase_defaults.term()?,
                },
                lookback_days: lookback.unwrap_or(purchase_defaults.lookback_days),
                ..Default::default()
            };

            let client = provider.recommendations_client(&region)?;
            let fetched = client.get_recommendations(&query, &cancel).await?;
            tracing::info!("fetched {} recommendations", fetched.len());

            let criteria = recommendations::FilterCriteria {
                engines,
                instance_types,
                min_savings_percentage: min_savings_percent,
                ..Default::default()
            };
            let mut kept = recommendations::filter(&fetched, &criteria);
            kept = recommendations::apply_coverage(
                kept,
                coverage.unwrap_or(purchase_defaults.coverage),
            )?;
            recommendations::sort(&mut kept, &sort, reverse);

            print_recommendations(&kept);

            let path = output_path(&config, output, "recommendations");
            reports::validate_output_path(&path)?;
            reports::write_recommendations(&path, &kept)?;
            println!("wrote {} recommendations to {}", kept.len(), path.display());
        }
        Command::Purchase {
            input,
            coverage,
            dry_run,
            output,
        } => {
            let purchase_defaults = config.purchase_settings();
            let mut batch = reports::read_recommendations(&input)?;
            batch = recommendations::apply_coverage(
                batch,
                coverage.unwrap_or(purchase_defaults.coverage),
            )?;
            tracing::info!("purchasing {} recommendations", batch.len());

            let runner = PurchaseRunner::new(dry_run || purchase_defaults.dry_run);
            let outcome = runner.run(provider.as_ref(), &batch, &cancel).await;

            let aggregated = stats::aggregate(&outcome.results);
            println!("{}", aggregated);

            let path = output_path(&config, output, "purchases");
            reports::validate_output_path(&path)?;
            reports::write_purchase_results(&path, &outcome.results)?;
            let stats_path = path.with_extension("stats.txt");
            std::fs::write(&stats_path, aggregated.to_string())?;
            println!(
                "wrote {} purchase results to {} (stats in {})",
                outcome.results.len(),
                path.display(),
                stats_path.display()
            );

            if let Some(interrupted) = outcome.interrupted {
                return Err(interrupted);
            }
        }
        Command::Commitments { service } => {
            let services = match service {
                Some(ref value) => vec![ServiceType::parse(value)?],
                None => provider.supported_services(),
            };
            for service in services {
                let client = provider.service_client(service, &region)?;
                match client.get_existing_commitments(&cancel).await {
                    Ok(commitments) => {
                        for commitment in commitments {
                            println!(
                                "{:<14} {:<28} {:<18} x{:<4} {:<16} ends {}",
                                service.slug(),
                                commitment.commitment_id,
                                commitment.resource_type,
                                commitment.count,
                                commitment.state.as_str(),
                                commitment
                                    .end_date
                                    .map(|d| d.format("%Y-%m-%d").to_string())
                                    .unwrap_or_else(|| "unknown".to_string())
                            );
                        }
                    }
                    Err(err) => tracing::warn!("{}: {}", service.slug(), err),
                }
            }
        }
        Command::ResourceTypes { service } => {
            let service = ServiceType::parse(&service)?;
            let client = provider.service_client(service, &region)?;
            for resource_type in client.get_valid_resource_types(&cancel).await? {
                println!("{}", resource_type);
            }
        }
        Command::Providers => {
            // Credential probes shell out to the vendor CLIs, so run them
            // concurrently across providers.
            let probes = registry.names().into_iter().map(|name| {
                let provider = registry.create(&name, &config.provider_settings(&name));
                async move {
                    match provider {
                        Ok(provider) => provider_status_line(provider).await,
                        Err(err) => format!("{:<8} unavailable: {}", name, err),
                    }
                }
            });
            for line in futures::future::join_all(probes).await {
                println!("{}", line);
            }
        }
    }
    Ok(())
}

fn parse_services(services: &[String]) -> Result<Vec<ServiceType>> {
    services
        .iter()
        .map(|value| ServiceType::parse(value))
        .collect()
}

fn output_path(config: &Config, explicit: Option<PathBuf>, prefix: &str) -> PathBuf {
    if let Some(path) = explicit {
        return path;
    }
    let output = config.output_settings();
    let name = reports::timestamped_filename(
        if prefix == "recommendations" {
            output.prefix.as_str()
        } else {
            prefix
        },
        chrono::Utc::now(),
    );
    match output.directory {
        Some(directory) => PathBuf::from(directory).join(name),
        None => PathBuf::from(name),
    }
}

fn print_recommendations(recommendations: &[cloudcommit::Recommendation]) {
    for rec in recommendations {
        println!(
            "{:<12} {:<20} {:<12} x{:<4} {:<16} {:>10.2} USD/mo savings ({:.0}%)",
            rec.service.slug(),
            rec.resource_type,
            rec.region,
            rec.count,
            rec.payment_option.as_str(),
            rec.estimated_savings,
            rec.savings_percentage
        );
    }
}

async fn provider_status_line(provider: Arc<dyn Provider>) -> String {
    let configured = provider.is_configured().await;
    let status = if configured {
        match provider.get_credentials().await {
            Ok(credentials) => format!("configured as {}", credentials.identity),
            Err(_) => "configured".to_string(),
        }
    } else {
        match provider.validate_credentials().await {
            Err(Error::Credentials(message)) => format!("not configured: {}", message),
            Err(err) => format!("not configured: {}", err),
            Ok(()) => "configured".to_string(),
        }
    };
    format!(
        "{:<8} {:<26} {}",
        provider.name(),
        provider.display_name(),
        status
    )
}
