// SPDX-License-Identifier: MIT OR Apache-2.0
//! C9: pure aggregation over [`TierUsageLog`] rows
//!
//! Append-only log ingestion lives in `xpn-db`; everything here is a
//! pure function over a slice of rows already fetched for a range, so
//! it is trivially unit-testable against literal numbers.

#![deny(unsafe_code)]
#![warn(missing_docs)]

use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use std::ops::Range;
use xpn_core::{OperationType, Tier, TierUsageLog};

/// Per-call cost estimates, mirroring `EngineConfig::tier2_cost_usd` /
/// `tier3_cost_usd`. Kept as a free-standing struct rather than a
/// dependency on `xpn-config`, the same way `xpn-tier-router` and
/// `xpn-matching` take their thresholds as constructor arguments.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct UnitCosts {
    /// Estimated cost in USD of one tier-2 invocation.
    pub tier2_cost_usd: f64,
    /// Estimated cost in USD of one tier-3 invocation.
    pub tier3_cost_usd: f64,
}

impl Default for UnitCosts {
    /// The literal default unit costs.
    fn default() -> Self {
        Self {
            tier2_cost_usd: 0.00002,
            tier3_cost_usd: 0.0004,
        }
    }
}

/// Tier counts and the cost they imply, shared by the overall summary
/// and each operation's breakdown.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TierCounts {
    /// Number of calls each tier answered, keyed by [`Tier`].
    pub counts: BTreeMap<Tier, u64>,
}

impl TierCounts {
    fn record(&mut self, tier: Tier) {
        *self.counts.entry(tier).or_insert(0) += 1;
    }

    /// Total calls across every tier.
    pub fn total(&self) -> u64 {
        self.counts.values().sum()
    }

    /// Fraction of calls each tier answered, in `[0, 1]`. Empty if
    /// `total() == 0`.
    pub fn rates(&self) -> BTreeMap<Tier, f64> {
        let total = self.total();
        if total == 0 {
            return BTreeMap::new();
        }
        self.counts
            .iter()
            .map(|(tier, count)| (*tier, *count as f64 / total as f64))
            .collect()
    }

    /// Estimated cost in USD: tier 1 is free, tier 2 and tier 3 cost
    /// `unit_costs` per call.
    pub fn estimated_cost_usd(&self, unit_costs: &UnitCosts) -> f64 {
        let tier2 = *self.counts.get(&Tier::Two).unwrap_or(&0) as f64;
        let tier3 = *self.counts.get(&Tier::Three).unwrap_or(&0) as f64;
        tier2 * unit_costs.tier2_cost_usd + tier3 * unit_costs.tier3_cost_usd
    }
}

/// Per-operation slice of a [`TierUsageSummary`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OperationBreakdown {
    /// Tier counts restricted to this operation.
    pub tiers: TierCounts,
}

/// What [`aggregate`] returns ("Aggregations").
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TierUsageSummary {
    /// Total calls in the range (and operation filter, if any).
    pub total: u64,
    /// Tier counts across every matching row.
    pub tiers: TierCounts,
    /// Fraction of calls each tier answered.
    pub tier_rates: BTreeMap<Tier, f64>,
    /// Breakdown restricted to each operation type seen.
    pub per_operation: HashMap<OperationType, OperationBreakdown>,
    /// Estimated cost in USD over the range.
    pub estimated_cost_usd: f64,
}

/// Aggregates `logs` over `range` (by `created_at`), optionally
/// restricted to a single `operation` ("Aggregations": total,
/// per-tier counts, per-tier rate, per-operation breakdown, estimated
/// cost).
pub fn aggregate(
    logs: &[TierUsageLog],
    range: Range<DateTime<Utc>>,
    operation: Option<OperationType>,
    unit_costs: &UnitCosts,
) -> TierUsageSummary {
    let mut tiers = TierCounts::default();
    let mut per_operation: HashMap<OperationType, OperationBreakdown> = HashMap::new();

    for log in logs {
        if !range.contains(&log.created_at) {
            continue;
        }
        if let Some(filter) = operation {
            if log.operation_type != filter {
                continue;
            }
        }
        tiers.record(log.tier);
        per_operation.entry(log.operation_type).or_default().tiers.record(log.tier);
    }

    let tier_rates = tiers.rates();
    let estimated_cost_usd = tiers.estimated_cost_usd(unit_costs);

    TierUsageSummary {
        total: tiers.total(),
        tiers,
        tier_rates,
        per_operation,
        estimated_cost_usd,
    }
}

/// One description's usage within the window `vendor_candidates`
/// considers. `TierUsageLog` carries no description text of its own —
/// `xpn-db` joins the log against its originating transaction before
/// calling this function, since resolving that join is I/O.
#[derive(Debug, Clone, PartialEq)]
pub struct DescriptionUsage {
    /// The normalized transaction description this log entry was for.
    pub description: String,
    /// The underlying log row.
    pub log: TierUsageLog,
}

/// Priority bucket for a [`PromotionCandidate`] ("priority
/// buckets at ≥ 10 (high), ≥ 5 (medium), else (low)").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromotionPriority {
    /// Tier-3 count in the window is at least the high threshold.
    High,
    /// Tier-3 count in the window is at least the medium threshold.
    Medium,
    /// Tier-3 count in the window is below the medium threshold.
    Low,
}

/// A description whose tier-3 usage suggests it should be promoted to a
/// vendor alias ("Vendor candidate report").
#[derive(Debug, Clone, PartialEq)]
pub struct PromotionCandidate {
    /// The description repeatedly falling through to tier 3.
    pub description: String,
    /// Tier-3 invocations for this description within the window.
    pub tier3_count: u64,
    /// Priority bucket derived from `tier3_count`.
    pub priority: PromotionPriority,
}

/// Surfaces descriptions whose tier-3 count within `window` exceeds
/// `threshold_medium`, bucketed by priority Sorted by
/// descending `tier3_count`.
pub fn vendor_candidates(
    samples: &[DescriptionUsage],
    window: Range<DateTime<Utc>>,
    threshold_high: u64,
    threshold_medium: u64,
) -> Vec<PromotionCandidate> {
    let mut counts: BTreeMap<&str, u64> = BTreeMap::new();
    for sample in samples {
        if sample.log.tier != Tier::Three {
            continue;
        }
        if !window.contains(&sample.log.created_at) {
            continue;
        }
        *counts.entry(sample.description.as_str()).or_insert(0) += 1;
    }

    let mut candidates: Vec<PromotionCandidate> = counts
        .into_iter()
        .filter(|(_, count)| *count >= threshold_medium)
        .map(|(description, tier3_count)| {
            let priority = if tier3_count >= threshold_high {
                PromotionPriority::High
            } else {
                PromotionPriority::Medium
            };
            PromotionCandidate {
                description: description.to_string(),
                tier3_count,
                priority,
            }
        })
        .collect();

    candidates.sort_by(|a, b| b.tier3_count.cmp(&a.tier3_count));
    candidates
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use uuid::Uuid;

    fn at(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, hour, 0, 0).unwrap()
    }

    fn log(operation: OperationType, tier: Tier, hour: u32) -> TierUsageLog {
        TierUsageLog {
            user_id: Uuid::new_v4(),
            transaction_id: None,
            operation_type: operation,
            tier,
            confidence: Some(0.9),
            response_time_ms: 10,
            cache_hit: tier.is_cache_hit(),
            created_at: at(hour),
        }
    }

    #[test]
    fn aggregate_counts_and_rates_per_tier() {
        let logs = vec![
            log(OperationType::Normalization, Tier::One, 1),
            log(OperationType::Normalization, Tier::One, 2),
            log(OperationType::Normalization, Tier::Two, 3),
            log(OperationType::Normalization, Tier::Three, 4),
        ];
        let summary = aggregate(&logs, at(0)..at(10), None, &UnitCosts::default());

        assert_eq!(summary.total, 4);
        assert_eq!(summary.tiers.counts.get(&Tier::One), Some(&2));
        assert_eq!(summary.tiers.counts.get(&Tier::Two), Some(&1));
        assert_eq!(summary.tiers.counts.get(&Tier::Three), Some(&1));
        assert_eq!(summary.tier_rates.get(&Tier::One), Some(&0.5));
    }

    #[test]
    fn aggregate_estimates_cost_using_unit_costs() {
        let logs = vec![
            log(OperationType::Normalization, Tier::Two, 1),
            log(OperationType::Normalization, Tier::Two, 2),
            log(OperationType::Normalization, Tier::Three, 3),
        ];
        let summary = aggregate(&logs, at(0)..at(10), None, &UnitCosts::default());

        let expected = 2.0 * 0.00002 + 1.0 * 0.0004;
        assert!((summary.estimated_cost_usd - expected).abs() < 1e-12);
    }

    #[test]
    fn aggregate_respects_operation_filter_and_range() {
        let logs = vec![
            log(OperationType::Normalization, Tier::One, 1),
            log(OperationType::CategorizeGl, Tier::Three, 2),
            log(OperationType::Normalization, Tier::One, 20),
        ];
        // Window excludes hour 20; filter excludes CategorizeGl.
        let summary = aggregate(
            &logs,
            at(0)..at(10),
            Some(OperationType::Normalization),
            &UnitCosts::default(),
        );
        assert_eq!(summary.total, 1);
        assert_eq!(summary.per_operation.len(), 1);
        assert!(summary.per_operation.contains_key(&OperationType::Normalization));
    }

    #[test]
    fn vendor_candidates_buckets_by_tier3_count() {
        let mut samples = Vec::new();
        for hour in 1..=10 {
            samples.push(DescriptionUsage {
                description: "WIDGETCO UNKNOWN VENDOR".to_string(),
                log: log(OperationType::Normalization, Tier::Three, hour),
            });
        }
        for hour in 1..=6 {
            samples.push(DescriptionUsage {
                description: "MID FREQUENCY VENDOR".to_string(),
                log: log(OperationType::Normalization, Tier::Three, hour),
            });
        }
        for hour in 1..=2 {
            samples.push(DescriptionUsage {
                description: "RARE VENDOR".to_string(),
                log: log(OperationType::Normalization, Tier::Three, hour),
            });
        }

        let candidates = vendor_candidates(&samples, at(0)..at(23), 10, 5);

        assert_eq!(candidates.len(), 2);
        assert_eq!(candidates[0].description, "WIDGETCO UNKNOWN VENDOR");
        assert_eq!(candidates[0].tier3_count, 10);
        assert_eq!(candidates[0].priority, PromotionPriority::High);
        assert_eq!(candidates[1].description, "MID FREQUENCY VENDOR");
        assert_eq!(candidates[1].tier3_count, 6);
        assert_eq!(candidates[1].priority, PromotionPriority::Medium);
    }

    #[test]
    fn vendor_candidates_ignores_non_tier3_hits() {
        let samples = vec![DescriptionUsage {
            description: "ALWAYS CACHED".to_string(),
            log: log(OperationType::Normalization, Tier::One, 1),
        }];
        let candidates = vendor_candidates(&samples, at(0)..at(23), 10, 5);
        assert!(candidates.is_empty());
    }

    proptest::proptest! {
        #[test]
        fn tier_rates_always_sum_to_one_when_nonempty(
            ones in 0u32..20, twos in 0u32..20, threes in 0u32..20,
        ) {
            let mut logs = Vec::new();
            for _ in 0..ones { logs.push(log(OperationType::Normalization, Tier::One, 1)); }
            for _ in 0..twos { logs.push(log(OperationType::Normalization, Tier::Two, 1)); }
            for _ in 0..threes { logs.push(log(OperationType::Normalization, Tier::Three, 1)); }

            let summary = aggregate(&logs, at(0)..at(10), None, &UnitCosts::default());
            if summary.total > 0 {
                let sum: f64 = summary.tier_rates.values().sum();
                prop_assert!((sum - 1.0).abs() < 1e-9);
            }
        }
    }
}
