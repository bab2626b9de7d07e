//! Recommendation transforms: filter, sort, coverage scaling, summaries.
//!
//! Filtering never mutates its input, sorting is stable, and coverage scaling
//! is the only transform that rewrites counts.

use crate::error::{Error, Result};
use crate::model::{AzConfig, Recommendation};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Optional criteria combined as a conjunction
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FilterCriteria {
    /// Keep only these region codes; empty means any
    pub regions: Vec<String>,
    /// Keep only these engines, case-insensitive; empty means any
    pub engines: Vec<String>,
    /// Keep only these instance types; empty means any
    pub instance_types: Vec<String>,
    /// Minimum savings percentage
    pub min_savings_percentage: Option<f64>,
    /// Minimum instance count
    pub min_instance_count: Option<u32>,
    /// Maximum instance count
    pub max_instance_count: Option<u32>,
    /// Keep only multi-AZ database recommendations
    pub multi_az_only: bool,
    /// Keep only single-AZ database recommendations
    pub single_az_only: bool,
}

impl FilterCriteria {
    fn matches(&self, recommendation: &Recommendation) -> bool {
        if !self.regions.is_empty()
            && !self
                .regions
                .iter()
                .any(|r| r.eq_ignore_ascii_case(&recommendation.region))
        {
            return false;
        }
        if !self.engines.is_empty()
            && !self
                .engines
                .iter()
                .any(|e| e.eq_ignore_ascii_case(recommendation.engine()))
        {
            return false;
        }
        if !self.instance_types.is_empty()
            && !self
                .instance_types
                .iter()
                .any(|t| t.eq_ignore_ascii_case(&recommendation.resource_type))
        {
            return false;
        }
        if let Some(min) = self.min_savings_percentage {
            if recommendation.savings_percentage < min {
                return false;
            }
        }
        if let Some(min) = self.min_instance_count {
            if recommendation.count < min {
                return false;
            }
        }
        if let Some(max) = self.max_instance_count {
            if recommendation.count > max {
                return false;
            }
        }
        // The AZ flags are mutually exclusive; both set matches nothing.
        if self.multi_az_only && recommendation.az_config() != Some(AzConfig::MultiAz) {
            return false;
        }
        if self.single_az_only && recommendation.az_config() != Some(AzConfig::SingleAz) {
            return false;
        }
        true
    }
}

/// Filter without mutating the input
pub fn filter(recommendations: &[Recommendation], criteria: &FilterCriteria) -> Vec<Recommendation> {
    recommendations
        .iter()
        .filter(|rec| criteria.matches(rec))
        .cloned()
        .collect()
}

/// Sort selector keys
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortKey {
    Savings,
    Cost,
    Instances,
    Engine,
    InstanceType,
    Region,
}

impl SortKey {
    /// Unknown selectors fall back to savings, which sorts descending
    pub fn parse(selector: &str) -> SortKey {
        match selector.to_ascii_lowercase().as_str() {
            "savings" => SortKey::Savings,
            "cost" => SortKey::Cost,
            "instances" => SortKey::Instances,
            "engine" => SortKey::Engine,
            "instance_type" => SortKey::InstanceType,
            "region" => SortKey::Region,
            _ => SortKey::Savings,
        }
    }
}

/// Stable sort in place. Numeric keys order descending by default, name keys
/// ascending; the descending flag flips whichever direction the key has.
pub fn sort(recommendations: &mut [Recommendation], selector: &str, flip: bool) {
    let key = SortKey::parse(selector);
    recommendations.sort_by(|a, b| {
        let ordering = match key {
            SortKey::Savings => b
                .estimated_savings
                .partial_cmp(&a.estimated_savings)
                .unwrap_or(std::cmp::Ordering::Equal),
            SortKey::Cost => b
                .commitment_cost
                .partial_cmp(&a.commitment_cost)
                .unwrap_or(std::cmp::Ordering::Equal),
            SortKey::Instances => b.count.cmp(&a.count),
            SortKey::Engine => a.engine().cmp(b.engine()),
            SortKey::InstanceType => a.resource_type.cmp(&b.resource_type),
            SortKey::Region => a.region.cmp(&b.region),
        };
        if flip {
            ordering.reverse()
        } else {
            ordering
        }
    });
}

/// Scale every count by a coverage percentage in (0, 100]. Counts floor to
/// integers and zero-count rows are dropped. Coverage at or above 100 returns
/// the input unchanged.
pub fn apply_coverage(
    recommendations: Vec<Recommendation>,
    coverage: f64,
) -> Result<Vec<Recommendation>> {
    if !coverage.is_finite() || coverage <= 0.0 {
        return Err(Error::validation(format!(
            "coverage must be in (0, 100], got {}",
            coverage
        )));
    }
    if coverage >= 100.0 {
        return Ok(recommendations);
    }

    let mut scaled = Vec::with_capacity(recommendations.len());
    for mut recommendation in recommendations {
        let new_count = (recommendation.count as f64 * coverage / 100.0).floor() as u32;
        if new_count == 0 {
            log::debug!(
                "dropping {} x{}: coverage {}% scales to zero",
                recommendation.resource_type,
                recommendation.count,
                coverage
            );
            continue;
        }
        recommendation.count = new_count;
        recommendation.coverage = coverage;
        scaled.push(recommendation);
    }
    Ok(scaled)
}

/// Totals for one summary group
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct GroupTotals {
    /// Number of recommendations in the group
    pub recommendations: usize,
    /// Total recommended instances
    pub instances: u32,
    /// Total upfront commitment cost
    pub upfront_cost: f64,
    /// Total estimated monthly savings
    pub monthly_savings: f64,
    /// Mean savings percentage across the group
    pub mean_savings_percentage: f64,
}

/// Grouped totals over a recommendation set
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Summary {
    pub by_engine: BTreeMap<String, GroupTotals>,
    pub by_instance_type: BTreeMap<String, GroupTotals>,
    pub by_region: BTreeMap<String, GroupTotals>,
}

fn accumulate(group: &mut GroupTotals, recommendation: &Recommendation) {
    let n = group.recommendations as f64;
    group.mean_savings_percentage =
        (group.mean_savings_percentage * n + recommendation.savings_percentage) / (n + 1.0);
    group.recommendations += 1;
    group.instances += recommendation.count;
    group.upfront_cost += recommendation.commitment_cost;
    group.monthly_savings += recommendation.estimated_savings;
}

/// Summarize recommendations by engine, instance type and region
pub fn summarize(recommendations: &[Recommendation]) -> Summary {
    let mut summary = Summary::default();
    for recommendation in recommendations {
        let engine = if recommendation.engine().is_empty() {
            "none".to_string()
        } else {
            recommendation.engine().to_string()
        };
        accumulate(summary.by_engine.entry(engine).or_default(), recommendation);
        accumulate(
            summary
                .by_instance_type
                .entry(recommendation.resource_type.clone())
                .or_default(),
            recommendation,
        );
        accumulate(
            summary
                .by_region
                .entry(recommendation.region.clone())
                .or_default(),
            recommendation,
        );
    }
    summary
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{
        AzConfig, DatabaseDetails, PaymentOption, Recommendation, ServiceDetails, Term,
    };

    fn rec(region: &str, engine: &str, instance: &str, count: u32, savings: f64) -> Recommendation {
        let mut base = crate::model::tests::sample_database_recommendation();
        base.region = region.to_string();
        base.resource_type = instance.to_string();
        base.count = count;
        base.estimated_savings = savings;
        base.details = ServiceDetails::Database(DatabaseDetails {
            engine: engine.to_string(),
            az_config: AzConfig::MultiAz,
        });
        base
    }

    #[test]
    fn test_filter_is_conjunctive_and_pure() {
        let input = vec![
            rec("us-east-1", "aurora-mysql", "db.r6g.xlarge", 4, 100.0),
            rec("us-east-1", "postgresql", "db.r6g.xlarge", 2, 60.0),
            rec("eu-west-1", "aurora-mysql", "db.t3.medium", 1, 20.0),
        ];
        let criteria = FilterCriteria {
            regions: vec!["us-east-1".to_string()],
            engines: vec!["Aurora-MySQL".to_string()],
            ..Default::default()
        };

        let kept = filter(&input, &criteria);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].count, 4);
        // Input untouched.
        assert_eq!(input.len(), 3);
    }

    #[test]
    fn test_filter_count_bounds() {
        let input = vec![
            rec("us-east-1", "mysql", "db.t3.small", 1, 5.0),
            rec("us-east-1", "mysql", "db.t3.small", 5, 25.0),
            rec("us-east-1", "mysql", "db.t3.small", 50, 250.0),
        ];
        let criteria = FilterCriteria {
            min_instance_count: Some(2),
            max_instance_count: Some(10),
            ..Default::default()
        };
        let kept = filter(&input, &criteria);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].count, 5);
    }

    #[test]
    fn test_both_az_flags_match_nothing() {
        let input = vec![rec("us-east-1", "mysql", "db.t3.small", 1, 5.0)];
        let criteria = FilterCriteria {
            multi_az_only: true,
            single_az_only: true,
            ..Default::default()
        };
        assert!(filter(&input, &criteria).is_empty());
    }

    #[test]
    fn test_az_filter_excludes_non_database_services() {
        let mut sp = rec("us-east-1", "mysql", "db.t3.small", 1, 5.0);
        sp.service = crate::model::ServiceType::SavingsPlans;
        sp.details = ServiceDetails::SavingsPlan(crate::model::SavingsPlanDetails {
            plan_type: "compute".to_string(),
            hourly_commitment: 1.0,
            coverage: 90.0,
        });
        let criteria = FilterCriteria {
            multi_az_only: true,
            ..Default::default()
        };
        // A savings plan has no AZ config, so multi-AZ-only drops it.
        assert!(filter(&[sp], &criteria).is_empty());
    }

    #[test]
    fn test_sort_savings_descending_by_default() {
        let mut input = vec![
            rec("us-east-1", "mysql", "a", 1, 50.0),
            rec("us-east-1", "mysql", "b", 1, 150.0),
            rec("us-east-1", "mysql", "c", 1, 100.0),
        ];
        sort(&mut input, "savings", false);
        let order: Vec<f64> = input.iter().map(|r| r.estimated_savings).collect();
        assert_eq!(order, vec![150.0, 100.0, 50.0]);
    }

    #[test]
    fn test_sort_direction_flip_and_stability() {
        let mut input = vec![
            rec("us-east-1", "mysql", "first", 2, 10.0),
            rec("us-east-1", "mysql", "second", 2, 10.0),
            rec("us-east-1", "mysql", "third", 1, 10.0),
        ];
        sort(&mut input, "instances", true);
        // Ascending after flip; ties keep input order.
        assert_eq!(input[0].resource_type, "third");
        assert_eq!(input[1].resource_type, "first");
        assert_eq!(input[2].resource_type, "second");
    }

    #[test]
    fn test_sort_unknown_selector_defaults_to_savings() {
        let mut input = vec![
            rec("us-east-1", "mysql", "a", 1, 10.0),
            rec("us-east-1", "mysql", "b", 1, 90.0),
        ];
        sort(&mut input, "popularity", false);
        assert_eq!(input[0].estimated_savings, 90.0);
    }

    #[test]
    fn test_sort_is_idempotent() {
        let mut once = vec![
            rec("us-east-1", "mysql", "c", 3, 10.0),
            rec("us-east-1", "mysql", "a", 1, 30.0),
            rec("us-east-1", "mysql", "b", 2, 20.0),
        ];
        sort(&mut once, "region", false);
        let mut twice = once.clone();
        sort(&mut twice, "region", false);
        assert_eq!(once, twice);
    }

    #[test]
    fn test_coverage_scales_and_drops_zero_rows() {
        let input = vec![
            rec("us-east-1", "mysql", "a", 10, 1.0),
            rec("us-east-1", "mysql", "b", 5, 1.0),
            rec("us-east-1", "mysql", "c", 2, 1.0),
        ];
        let scaled = apply_coverage(input, 20.0).unwrap();
        let counts: Vec<u32> = scaled.iter().map(|r| r.count).collect();
        // floor(2 * 0.20) = 0 drops the third row.
        assert_eq!(counts, vec![2, 1]);
        assert!(scaled.iter().all(|r| (r.coverage - 20.0).abs() < 1e-9));
    }

    #[test]
    fn test_coverage_full_returns_input_unchanged() {
        let input = vec![rec("us-east-1", "mysql", "a", 7, 1.0)];
        let out = apply_coverage(input.clone(), 100.0).unwrap();
        assert_eq!(out, input);
        let out = apply_coverage(input.clone(), 150.0).unwrap();
        assert_eq!(out, input);
    }

    #[test]
    fn test_coverage_rejects_non_positive() {
        assert!(apply_coverage(Vec::new(), 0.0).is_err());
        assert!(apply_coverage(Vec::new(), -5.0).is_err());
        assert!(apply_coverage(Vec::new(), f64::NAN).is_err());
    }

    #[test]
    fn test_summarize_groups_and_means() {
        let mut a = rec("us-east-1", "mysql", "db.t3.small", 2, 40.0);
        a.savings_percentage = 20.0;
        a.commitment_cost = 100.0;
        let mut b = rec("us-east-1", "mysql", "db.t3.large", 3, 60.0);
        b.savings_percentage = 40.0;
        b.commitment_cost = 300.0;
        let mut c = rec("eu-west-1", "postgresql", "db.t3.small", 1, 10.0);
        c.savings_percentage = 30.0;
        c.commitment_cost = 50.0;

        let summary = summarize(&[a, b, c]);

        let mysql = &summary.by_engine["mysql"];
        assert_eq!(mysql.recommendations, 2);
        assert_eq!(mysql.instances, 5);
        assert!((mysql.monthly_savings - 100.0).abs() < 1e-9);
        assert!((mysql.upfront_cost - 400.0).abs() < 1e-9);
        assert!((mysql.mean_savings_percentage - 30.0).abs() < 1e-9);

        assert_eq!(summary.by_region.len(), 2);
        assert_eq!(summary.by_instance_type["db.t3.small"].recommendations, 2);
    }
}
