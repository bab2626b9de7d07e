//! Purchase outcome statistics grouped by engine, region, payment option and
//! instance type.

use crate::model::PurchaseResult;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Counters for one group of purchase results
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct GroupStats {
    /// Total purchase attempts
    pub attempts: usize,
    /// Confirmed purchases
    pub succeeded: usize,
    /// Failed purchases
    pub failed: usize,
    /// Total instances confirmed
    pub instances: u32,
    /// Total actual upfront cost of confirmed purchases
    pub actual_cost: f64,
}

impl GroupStats {
    fn record(&mut self, result: &PurchaseResult) {
        self.attempts += 1;
        if result.success {
            self.succeeded += 1;
            self.instances += result.recommendation.count;
            self.actual_cost += result.actual_cost;
        } else {
            self.failed += 1;
        }
    }

    /// Success rate in percent
    pub fn success_rate(&self) -> f64 {
        if self.attempts == 0 {
            0.0
        } else {
            self.succeeded as f64 / self.attempts as f64 * 100.0
        }
    }
}

/// Aggregated purchase statistics
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PurchaseStats {
    pub overall: GroupStats,
    pub by_engine: BTreeMap<String, GroupStats>,
    pub by_region: BTreeMap<String, GroupStats>,
    pub by_payment_option: BTreeMap<String, GroupStats>,
    pub by_instance_type: BTreeMap<String, GroupStats>,
}

/// Group purchase results along every reporting dimension
pub fn aggregate(results: &[PurchaseResult]) -> PurchaseStats {
    let mut stats = PurchaseStats::default();
    for result in results {
        let recommendation = &result.recommendation;
        stats.overall.record(result);

        let engine = if recommendation.engine().is_empty() {
            "none".to_string()
        } else {
            recommendation.engine().to_string()
        };
        stats.by_engine.entry(engine).or_default().record(result);
        stats
            .by_region
            .entry(recommendation.region.clone())
            .or_default()
            .record(result);
        stats
            .by_payment_option
            .entry(recommendation.payment_option.as_str().to_string())
            .or_default()
            .record(result);
        stats
            .by_instance_type
            .entry(recommendation.resource_type.clone())
            .or_default()
            .record(result);
    }
    stats
}

fn write_group(
    f: &mut fmt::Formatter<'_>,
    title: &str,
    groups: &BTreeMap<String, GroupStats>,
) -> fmt::Result {
    writeln!(f, "{}:", title)?;
    for (key, group) in groups {
        writeln!(
            f,
            "  {:<24} {:>3}/{:<3} succeeded ({:.0}%), {} instances, {:.2} USD upfront",
            key,
            group.succeeded,
            group.attempts,
            group.success_rate(),
            group.instances,
            group.actual_cost
        )?;
    }
    Ok(())
}

impl fmt::Display for PurchaseStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Purchases: {}/{} succeeded ({:.0}%), {} instances, {:.2} USD upfront",
            self.overall.succeeded,
            self.overall.attempts,
            self.overall.success_rate(),
            self.overall.instances,
            self.overall.actual_cost
        )?;
        write_group(f, "By engine", &self.by_engine)?;
        write_group(f, "By region", &self.by_region)?;
        write_group(f, "By payment option", &self.by_payment_option)?;
        write_group(f, "By instance type", &self.by_instance_type)
    }
}
