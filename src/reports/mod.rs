//! CSV exchange format: recommendation files, purchase result files, the
//! derived per-instance cost columns, and output path validation.
//!
//! The row schema is a projection of the data model; reading rebuilds
//! relational database recommendations, which is what operators exchange in
//! practice. Monetary columns are formatted with two decimals and hourly
//! columns with four.

use crate::error::{Error, Result};
use crate::model::{
    AzConfig, CloudProvider, CommitmentType, DatabaseDetails, PaymentOption, Recommendation,
    PurchaseResult, ServiceDetails, ServiceType, Term,
};
use crate::providers::parse_money;
use crate::regions::normalize_region;
use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use std::collections::HashMap;
use std::path::Path;

/// Hours per month used by every hourly derivation
pub const HOURS_PER_MONTH: f64 = 730.0;

/// Timestamp layout used in CSV files, UTC
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Recommendation file columns, in order
pub const RECOMMENDATION_COLUMNS: &[&str] = &[
    "Timestamp",
    "Region",
    "Engine",
    "Instance Type",
    "AZ Config",
    "Payment Option",
    "Term (months)",
    "Instance Count",
    "Estimated Monthly Savings",
    "Savings Percent",
    "Estimated Annual Savings",
    "Estimated Term Savings",
    "Description",
];

/// Columns a recommendation file must carry to be readable
pub const REQUIRED_COLUMNS: &[&str] = &[
    "Region",
    "Engine",
    "Instance Type",
    "Payment Option",
    "Term (months)",
    "Instance Count",
];

/// Extra columns in purchase result files
pub const RESULT_COLUMNS: &[&str] = &[
    "Status",
    "Purchase ID",
    "Reservation ID",
    "Actual Cost",
    "RI Monthly Cost",
    "On-Demand Hourly (per instance)",
    "RI Hourly (per instance)",
    "Upfront Cost (per instance)",
    "Total Upfront (all instances)",
    "Amortized Hourly (per instance)",
    "Message",
];

fn fmt_money(value: f64) -> String {
    format!("{:.2}", value)
}

fn fmt_hourly(value: f64) -> String {
    format!("{:.4}", value)
}

/// Per-instance cost derivations for one recommendation
#[derive(Debug, Clone, PartialEq)]
pub struct CostBreakdown {
    /// Monthly cost with the reservation in place
    pub ri_monthly: f64,
    /// On-demand hourly cost per instance
    pub on_demand_hourly: f64,
    /// Recurring hourly cost per instance, zero for all-upfront
    pub ri_hourly: f64,
    /// Upfront cost per instance
    pub upfront_per_instance: f64,
    /// Upfront cost across all instances
    pub total_upfront: f64,
    /// Upfront amortized over the term plus the recurring hourly cost
    pub amortized_hourly: f64,
}

/// Derive the §6 cost columns from a recommendation
pub fn derive_costs(recommendation: &Recommendation) -> CostBreakdown {
    let count = recommendation.count.max(1) as f64;
    let months = recommendation.term.months() as f64;
    let on_demand = recommendation.estimated_monthly_on_demand;

    let monthly_savings = if recommendation.estimated_savings > 0.0 {
        recommendation.estimated_savings
    } else {
        on_demand * recommendation.savings_percentage / 100.0
    };
    let ri_monthly = (on_demand - monthly_savings).max(0.0);

    let on_demand_hourly = on_demand / HOURS_PER_MONTH / count;
    let ri_hourly = if recommendation.payment_option == PaymentOption::AllUpfront {
        0.0
    } else {
        recommendation.recurring_monthly_cost / HOURS_PER_MONTH / count
    };
    let total_upfront = recommendation.commitment_cost;
    let upfront_per_instance = total_upfront / count;
    let amortized_hourly = upfront_per_instance / (months * HOURS_PER_MONTH) + ri_hourly;

    CostBreakdown {
        ri_monthly,
        on_demand_hourly,
        ri_hourly,
        upfront_per_instance,
        total_upfront,
        amortized_hourly,
    }
}

fn recommendation_record(recommendation: &Recommendation) -> Vec<String> {
    let monthly = recommendation.estimated_savings;
    vec![
        recommendation.timestamp.format(TIMESTAMP_FORMAT).to_string(),
        recommendation.region.clone(),
        recommendation.engine().to_string(),
        recommendation.resource_type.clone(),
        recommendation
            .az_config()
            .map(|az| az.as_str().to_string())
            .unwrap_or_default(),
        recommendation.payment_option.as_str().to_string(),
        recommendation.term.months().to_string(),
        recommendation.count.to_string(),
        fmt_money(monthly),
        fmt_money(recommendation.savings_percentage),
        fmt_money(monthly * 12.0),
        fmt_money(monthly * recommendation.term.months() as f64),
        recommendation.description.clone(),
    ]
}

/// Write recommendations to a CSV file with the standard header
pub fn write_recommendations<P: AsRef<Path>>(
    path: P,
    recommendations: &[Recommendation],
) -> Result<()> {
    let mut writer = csv::Writer::from_path(path.as_ref())?;
    writer.write_record(RECOMMENDATION_COLUMNS)?;
    for recommendation in recommendations {
        writer.write_record(recommendation_record(recommendation))?;
    }
    writer.flush()?;
    Ok(())
}

struct HeaderIndex {
    positions: HashMap<String, usize>,
}

impl HeaderIndex {
    fn new(headers: &csv::StringRecord) -> Result<Self> {
        let positions: HashMap<String, usize> = headers
            .iter()
            .enumerate()
            .map(|(i, name)| (name.trim().to_string(), i))
            .collect();
        for required in REQUIRED_COLUMNS {
            if !positions.contains_key(*required) {
                return Err(Error::validation(format!(
                    "missing required column: {}",
                    required
                )));
            }
        }
        Ok(Self { positions })
    }

    fn get<'a>(&self, record: &'a csv::StringRecord, column: &str) -> &'a str {
        self.positions
            .get(column)
            .and_then(|&i| record.get(i))
            .unwrap_or("")
            .trim()
    }
}

/// Read recommendations from a CSV file. Rows with unparseable mandatory
/// fields are skipped with a warning; optional monetary fields default to
/// zero and missing derived values are imputed.
pub fn read_recommendations<P: AsRef<Path>>(path: P) -> Result<Vec<Recommendation>> {
    let mut reader = csv::Reader::from_path(path.as_ref())?;
    let index = HeaderIndex::new(reader.headers()?)?;

    let mut recommendations = Vec::new();
    for (row_number, record) in reader.records().enumerate() {
        let record = record?;
        match parse_row(&index, &record) {
            Ok(recommendation) => recommendations.push(recommendation),
            Err(err) => {
                log::warn!("skipping row {}: {}", row_number + 2, err);
            }
        }
    }
    Ok(recommendations)
}

fn parse_row(index: &HeaderIndex, record: &csv::StringRecord) -> Result<Recommendation> {
    let region = normalize_region(index.get(record, "Region"));
    if region.is_empty() {
        return Err(Error::validation("row has no region"));
    }
    let engine = index.get(record, "Engine").to_string();
    if engine.is_empty() {
        return Err(Error::validation("row has no engine"));
    }
    let resource_type = index.get(record, "Instance Type").to_string();
    if resource_type.is_empty() {
        return Err(Error::validation("row has no instance type"));
    }
    let count = index
        .get(record, "Instance Count")
        .parse::<f64>()
        .ok()
        .filter(|c| c.is_finite() && *c >= 1.0)
        .map(|c| c.trunc() as u32)
        .ok_or_else(|| Error::validation("row has no usable instance count"))?;
    let payment_option = PaymentOption::parse(index.get(record, "Payment Option"))?;
    let term_months = index
        .get(record, "Term (months)")
        .parse::<u32>()
        .map_err(|_| Error::validation("row has no usable term"))?;
    let term = Term::from_months(term_months)?;

    let az_config = match index.get(record, "AZ Config") {
        "" => AzConfig::SingleAz,
        value => AzConfig::parse(value)?,
    };

    let estimated_savings = parse_money(index.get(record, "Estimated Monthly Savings"));
    let savings_percentage =
        parse_money(index.get(record, "Savings Percent")).clamp(0.0, 100.0);
    let estimated_monthly_on_demand = if savings_percentage > 0.0 {
        estimated_savings / (savings_percentage / 100.0)
    } else {
        0.0
    };
    let recurring_monthly_cost = if payment_option == PaymentOption::AllUpfront {
        0.0
    } else {
        (estimated_monthly_on_demand - estimated_savings).max(0.0)
    };

    let timestamp = NaiveDateTime::parse_from_str(index.get(record, "Timestamp"), TIMESTAMP_FORMAT)
        .map(|naive| Utc.from_utc_datetime(&naive))
        .unwrap_or_else(|_| Utc::now());

    Ok(Recommendation {
        provider: CloudProvider::Aws,
        service: ServiceType::RelationalDb,
        account: String::new(),
        region,
        resource_type,
        count,
        payment_option,
        term,
        commitment_type: CommitmentType::ReservedInstance,
        estimated_savings,
        savings_percentage,
        commitment_cost: 0.0,
        on_demand_cost: estimated_monthly_on_demand,
        recurring_monthly_cost,
        estimated_monthly_on_demand,
        timestamp,
        description: index.get(record, "Description").to_string(),
        coverage: 100.0,
        details: ServiceDetails::Database(DatabaseDetails { engine, az_config }),
    })
}

/// Write purchase results with the recommendation columns plus outcome and
/// derived cost columns
pub fn write_purchase_results<P: AsRef<Path>>(
    path: P,
    results: &[PurchaseResult],
) -> Result<()> {
    let mut writer = csv::Writer::from_path(path.as_ref())?;
    let header: Vec<&str> = RECOMMENDATION_COLUMNS
        .iter()
        .chain(RESULT_COLUMNS.iter())
        .copied()
        .collect();
    writer.write_record(&header)?;

    for result in results {
        let costs = derive_costs(&result.recommendation);
        let mut record = recommendation_record(&result.recommendation);
        record.extend([
            if result.success {
                "success".to_string()
            } else {
                "failed".to_string()
            },
            result.purchase_id.clone(),
            result.commitment_id.clone(),
            fmt_money(result.actual_cost),
            fmt_money(costs.ri_monthly),
            fmt_hourly(costs.on_demand_hourly),
            fmt_hourly(costs.ri_hourly),
            fmt_money(costs.upfront_per_instance),
            fmt_money(costs.total_upfront),
            fmt_hourly(costs.amortized_hourly),
            if result.success {
                result.message.clone()
            } else {
                result.error.clone().unwrap_or_default()
            },
        ]);
        writer.write_record(&record)?;
    }
    writer.flush()?;
    Ok(())
}

/// Generate a timestamped CSV file name
pub fn timestamped_filename(prefix: &str, now: DateTime<Utc>) -> String {
    format!("{}_{}.csv", prefix, now.format("%Y%m%d-%H%M%S"))
}

/// Validate an output path: non-empty, .csv suffix, and writable parent
/// directory proven by a create-and-delete probe.
pub fn validate_output_path<P: AsRef<Path>>(path: P) -> Result<()> {
    let path = path.as_ref();
    if path.as_os_str().is_empty() {
        return Err(Error::validation("output path is empty"));
    }
    let is_csv = path
        .extension()
        .map(|ext| ext.eq_ignore_ascii_case("csv"))
        .unwrap_or(false);
    if !is_csv {
        return Err(Error::validation(format!(
            "output path must end in .csv: {}",
            path.display()
        )));
    }

    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => std::path::PathBuf::from("."),
    };
    let probe = parent.join(format!(".cloudcommit-probe-{}", uuid::Uuid::new_v4()));
    std::fs::write(&probe, b"probe")
        .map_err(|e| Error::io(format!("output directory is not writable: {}", e)))?;
    std::fs::remove_file(&probe)
        .map_err(|e| Error::io(format!("failed to remove probe file: {}", e)))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::tests::sample_database_recommendation;

    #[test]
    fn test_partial_upfront_derivations() {
        let mut rec = sample_database_recommendation();
        rec.estimated_monthly_on_demand = 200.0;
        rec.count = 2;
        rec.term = Term::ThreeYear;
        rec.commitment_cost = 1000.0;
        rec.recurring_monthly_cost = 50.0;
        rec.savings_percentage = 50.0;
        rec.estimated_savings = 0.0;
        rec.payment_option = PaymentOption::PartialUpfront;

        let costs = derive_costs(&rec);
        assert_eq!(fmt_money(costs.ri_monthly), "100.00");
        assert_eq!(fmt_hourly(costs.on_demand_hourly), "0.1370");
        assert_eq!(fmt_hourly(costs.ri_hourly), "0.0342");
        assert_eq!(fmt_money(costs.upfront_per_instance), "500.00");
        assert_eq!(fmt_money(costs.total_upfront), "1000.00");
        // upfront/(36*730) + riHourly = 0.0190 + 0.0342.
        assert_eq!(fmt_hourly(costs.amortized_hourly), "0.0533");
    }

    #[test]
    fn test_all_upfront_derivations() {
        let mut rec = sample_database_recommendation();
        rec.estimated_monthly_on_demand = 500.0;
        rec.count = 1;
        rec.term = Term::ThreeYear;
        rec.commitment_cost = 5000.0;
        rec.recurring_monthly_cost = 0.0;
        rec.savings_percentage = 40.0;
        rec.estimated_savings = 0.0;
        rec.payment_option = PaymentOption::AllUpfront;

        let costs = derive_costs(&rec);
        assert_eq!(fmt_hourly(costs.ri_hourly), "0.0000");
        assert_eq!(fmt_hourly(costs.amortized_hourly), "0.1903");
    }

    #[test]
    fn test_round_trip_preserves_fields() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("recs.csv");

        let mut first = sample_database_recommendation();
        first.estimated_savings = 120.5;
        first.savings_percentage = 40.0;
        let mut second = sample_database_recommendation();
        second.resource_type = "db.t3.medium".to_string();
        second.count = 5;
        second.payment_option = PaymentOption::NoUpfront;
        second.term = Term::OneYear;

        write_recommendations(&path, &[first.clone(), second.clone()]).unwrap();
        let read_back = read_recommendations(&path).unwrap();

        assert_eq!(read_back.len(), 2);
        assert_eq!(read_back[0].region, first.region);
        assert_eq!(read_back[0].engine(), first.engine());
        assert_eq!(read_back[0].resource_type, first.resource_type);
        assert_eq!(read_back[0].count, first.count);
        assert_eq!(read_back[0].payment_option, first.payment_option);
        assert_eq!(read_back[0].term, first.term);
        assert!((read_back[0].estimated_savings - 120.5).abs() < 1e-6);
        assert_eq!(read_back[1].count, 5);
        assert_eq!(read_back[1].term, Term::OneYear);
    }

    #[test]
    fn test_missing_required_column() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.csv");
        std::fs::write(
            &path,
            "Timestamp,Region,Instance Type,Payment Option,Term (months),Instance Count\n\
             2026-01-01 00:00:00,us-east-1,db.t3.medium,partial-upfront,36,2\n",
        )
        .unwrap();

        let err = read_recommendations(&path).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Validation error: missing required column: Engine"
        );
    }

    #[test]
    fn test_bad_rows_skipped_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mixed.csv");
        std::fs::write(
            &path,
            "Region,Engine,Instance Type,Payment Option,Term (months),Instance Count\n\
             us-east-1,mysql,db.t3.medium,partial-upfront,36,2\n\
             us-east-1,mysql,db.t3.medium,partial-upfront,36,zero\n\
             us-east-1,mysql,db.t3.medium,quarterly,36,2\n\
             US East (N. Virginia),postgres,db.r6g.large,all-upfront,12,3\n",
        )
        .unwrap();

        let recommendations = read_recommendations(&path).unwrap();
        assert_eq!(recommendations.len(), 2);
        assert_eq!(recommendations[1].region, "us-east-1");
        assert_eq!(recommendations[1].recurring_monthly_cost, 0.0);
    }

    #[test]
    fn test_imputation_on_read() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("impute.csv");
        std::fs::write(
            &path,
            "Region,Engine,Instance Type,Payment Option,Term (months),Instance Count,Estimated Monthly Savings,Savings Percent\n\
             us-east-1,mysql,db.t3.medium,partial-upfront,36,2,50,25\n",
        )
        .unwrap();

        let recommendations = read_recommendations(&path).unwrap();
        let rec = &recommendations[0];
        assert!((rec.estimated_monthly_on_demand - 200.0).abs() < 1e-6);
        assert!((rec.recurring_monthly_cost - 150.0).abs() < 1e-6);
    }

    #[test]
    fn test_purchase_result_file_columns() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("results.csv");

        let mut rec = sample_database_recommendation();
        rec.estimated_monthly_on_demand = 200.0;
        rec.estimated_savings = 100.0;
        let results = vec![
            PurchaseResult::succeeded(rec.clone(), "ri-abc", "p-1", 1000.0, "done"),
            PurchaseResult::failed(rec, "p-2", &Error::catalog_miss("no offerings found")),
        ];
        write_purchase_results(&path, &results).unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        let header = content.lines().next().unwrap();
        assert!(header.contains("Reservation ID"));
        assert!(header.contains("Amortized Hourly (per instance)"));
        assert!(content.contains("success"));
        assert!(content.contains("failed"));
        assert!(content.contains("ri-abc"));
        assert!(content.contains("no offerings found"));
        // Money with two decimals, hourly with four.
        assert!(content.contains("1000.00"));
        assert!(content.contains("0.1370"));
    }

    #[test]
    fn test_timestamped_filename() {
        let now = Utc.with_ymd_and_hms(2026, 8, 1, 9, 30, 5).unwrap();
        assert_eq!(
            timestamped_filename("recommendations", now),
            "recommendations_20260801-093005.csv"
        );
    }

    #[test]
    fn test_path_validation() {
        assert!(validate_output_path("").is_err());
        assert!(validate_output_path("out.txt").is_err());

        let dir = tempfile::tempdir().unwrap();
        let good = dir.path().join("out.csv");
        assert!(validate_output_path(&good).is_ok());
        // The probe is cleaned up.
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }
}
