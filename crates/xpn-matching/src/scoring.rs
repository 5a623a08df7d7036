//! Scoring axes for one receipt/candidate pairing

use crate::candidate::Candidate;
use rust_decimal::Decimal;
use uuid::Uuid;
use xpn_core::CalendarDate;
use xpn_error::ExpenseError;
use xpn_fuzzy::{extract_group_vendor_pattern, extract_vendor_pattern, normalized_similarity};
use xpn_vendor_registry::VendorAliasStore;

/// Tunable thresholds for scoring and the decision step, mirroring the
/// `EngineConfig` fields of the same name. Kept as a free-standing struct
/// (rather than a dependency on `xpn-config`) so this crate stays
/// testable with literal values, the same way `xpn-tier-router` takes
/// its confidence knobs as constructor arguments instead of pulling in
/// the config crate.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MatchingThresholds {
    /// Minimum total score for a candidate to survive into the decision
    /// step (`MIN_CONFIDENCE`).
    pub min_confidence: f64,
    /// Maximum best/runner-up gap before a receipt is ambiguous instead
    /// of proposed (`AMBIGUOUS_GAP`).
    pub ambiguous_gap: f64,
    /// Amount difference within which the amount axis scores the
    /// maximum (`AMOUNT_EXACT`).
    pub amount_exact: Decimal,
    /// Amount difference within which a candidate is admitted to the
    /// pool at all and still scores partially (`AMOUNT_NEAR`).
    pub amount_near: Decimal,
    /// Half-width, in days, of the candidate pool's date window
    /// (`DATE_WINDOW`).
    pub date_window_days: i64,
    /// Minimum normalized similarity for a fuzzy vendor match
    /// (`FUZZY_THRESHOLD`).
    pub fuzzy_threshold: f64,
}

impl Default for MatchingThresholds {
    /// The literal default thresholds.
    fn default() -> Self {
        Self {
            min_confidence: 70.0,
            ambiguous_gap: 5.0,
            amount_exact: Decimal::new(10, 2),
            amount_near: Decimal::new(100, 2),
            date_window_days: 7,
            fuzzy_threshold: 0.70,
        }
    }
}

/// The three component scores plus their sum for one receipt/candidate
/// pairing ("Scoring").
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoreBreakdown {
    /// `[0, 40]`.
    pub amount_score: f64,
    /// `[0, 35]`.
    pub date_score: f64,
    /// `[0, 25]`.
    pub vendor_score: f64,
    /// Sum of the three axes, `[0, 100]`.
    pub total: f64,
    /// The alias that contributed the vendor-axis score, if the 25-point
    /// alias-hit path fired.
    pub matched_vendor_alias_id: Option<Uuid>,
}

/// Amount axis: `|amount_r − |amount_c|| ≤ amount_exact` → 40; `≤
/// amount_near` → 20; else 0.
pub fn score_amount(amount_r: Decimal, amount_c: Decimal, thresholds: &MatchingThresholds) -> f64 {
    let diff = (amount_r - amount_c.abs()).abs();
    if diff <= thresholds.amount_exact {
        40.0
    } else if diff <= thresholds.amount_near {
        20.0
    } else {
        0.0
    }
}

/// Date axis on `d = |date_r − date_c|` in whole days: 0 → 35; 1 → 30;
/// 2–3 → 25; 4–7 → 10; else 0.
pub fn score_date(date_r: CalendarDate, date_c: CalendarDate) -> f64 {
    let d = date_r.signed_duration_since(date_c).num_days().unsigned_abs();
    match d {
        0 => 35.0,
        1 => 30.0,
        2..=3 => 25.0,
        4..=7 => 10.0,
        _ => 0.0,
    }
}

/// Vendor axis: an alias hit whose canonical name has normalized
/// similarity ≥ `fuzzy_threshold` to `vendor_r` scores 25; otherwise a
/// fuzzy match between `vendor_r` and the candidate's extracted vendor
/// pattern scoring ≥ `fuzzy_threshold` scores 15; otherwise 0. An empty
/// `vendor_r` always scores 0.
///
/// Deliberately reads the alias catalog with a plain linear scan rather
/// than going through [`xpn_vendor_registry::VendorRegistry::find`]:
/// that method's hit bumps `match_count`/`last_matched_at` as a side
/// effect, which is correct for categorization lookups but wrong here —
/// every surviving candidate in a receipt's pool gets scored, and only
/// the eventual winner (if any) should ever touch the alias's counters,
/// which happens later via the learning loop on confirmation.
///
/// # Errors
///
/// Propagates the alias store's error.
pub async fn score_vendor<V: VendorAliasStore>(
    vendor_r: &str,
    candidate: &Candidate,
    alias_store: &V,
    thresholds: &MatchingThresholds,
) -> Result<(f64, Option<Uuid>), ExpenseError> {
    if vendor_r.trim().is_empty() {
        return Ok((0.0, None));
    }

    let description = candidate.description_or_name();
    let haystack = description.to_lowercase();
    let aliases = alias_store.all().await?;

    let best_alias = aliases
        .iter()
        .filter(|a| haystack.contains(a.alias_pattern.to_lowercase().as_str()))
        .max_by(|a, b| {
            a.confidence
                .partial_cmp(&b.confidence)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.match_count.cmp(&b.match_count))
                .then(a.alias_pattern.len().cmp(&b.alias_pattern.len()))
        });

    if let Some(alias) = best_alias {
        if normalized_similarity(&alias.canonical_name, vendor_r) >= thresholds.fuzzy_threshold {
            return Ok((25.0, Some(alias.id)));
        }
    }

    let extracted = if candidate.is_group() {
        extract_group_vendor_pattern(description)
    } else {
        extract_vendor_pattern(description)
    };
    if normalized_similarity(&extracted, vendor_r) >= thresholds.fuzzy_threshold {
        return Ok((15.0, None));
    }

    Ok((0.0, None))
}

/// Scores one receipt/candidate pairing on all three axes.
///
/// # Errors
///
/// Propagates the alias store's error.
pub async fn score_candidate<V: VendorAliasStore>(
    amount_r: Decimal,
    date_r: CalendarDate,
    vendor_r: &str,
    candidate: &Candidate,
    alias_store: &V,
    thresholds: &MatchingThresholds,
) -> Result<ScoreBreakdown, ExpenseError> {
    let amount_score = score_amount(amount_r, candidate.amount(), thresholds);
    let date_score = score_date(date_r, candidate.date());
    let (vendor_score, matched_vendor_alias_id) =
        score_vendor(vendor_r, candidate, alias_store, thresholds).await?;

    Ok(ScoreBreakdown {
        amount_score,
        date_score,
        vendor_score,
        total: amount_score + date_score + vendor_score,
        matched_vendor_alias_id,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use rust_decimal_macros::dec;
    use uuid::Uuid;
    use xpn_core::{MatchStatus, Transaction, TransactionGroup, VendorAlias, VendorCategory};
    use xpn_vendor_registry::mem::InMemoryVendorAliasStore;

    fn date(y: i32, m: u32, d: u32) -> CalendarDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn transaction(description: &str, amount: Decimal, on: CalendarDate) -> Candidate {
        Candidate::Transaction(Transaction {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            description: description.to_string(),
            original_description: description.to_string(),
            transaction_date: on,
            amount: amount.into(),
            match_status: MatchStatus::Unmatched,
            group_id: None,
            matched_receipt_id: None,
        })
    }

    fn group(name: &str, combined_amount: Decimal, on: CalendarDate) -> Candidate {
        Candidate::Group(TransactionGroup {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            name: name.to_string(),
            combined_amount: combined_amount.into(),
            display_date: on,
            transaction_count: 3,
            match_status: MatchStatus::Unmatched,
            matched_receipt_id: None,
        })
    }

    async fn store_with_alias(canonical_name: &str, pattern: &str) -> InMemoryVendorAliasStore {
        let store = InMemoryVendorAliasStore::default();
        store
            .upsert(VendorAlias {
                id: Uuid::new_v4(),
                canonical_name: canonical_name.to_string(),
                alias_pattern: pattern.to_string(),
                display_name: canonical_name.to_string(),
                category: VendorCategory::Generic,
                default_gl_code: None,
                default_department: None,
                gl_confirm_count: 0,
                dept_confirm_count: 0,
                match_count: 0,
                last_matched_at: None,
                confidence: 0.9,
            })
            .await
            .unwrap();
        store
    }

    #[test]
    fn amount_score_steps() {
        let t = MatchingThresholds::default();
        assert_eq!(score_amount(dec!(42.17), dec!(-42.17), &t), 40.0);
        assert_eq!(score_amount(dec!(42.50), dec!(-42.17), &t), 20.0);
        assert_eq!(score_amount(dec!(50.00), dec!(-42.17), &t), 0.0);
    }

    #[test]
    fn date_score_buckets() {
        let d0 = date(2024, 5, 10);
        assert_eq!(score_date(d0, date(2024, 5, 10)), 35.0);
        assert_eq!(score_date(d0, date(2024, 5, 11)), 30.0);
        assert_eq!(score_date(d0, date(2024, 5, 12)), 25.0);
        assert_eq!(score_date(d0, date(2024, 5, 13)), 25.0);
        assert_eq!(score_date(d0, date(2024, 5, 17)), 10.0);
        assert_eq!(score_date(d0, date(2024, 5, 20)), 0.0);
    }

    #[tokio::test]
    async fn exact_amount_date_and_alias_hit_scores_100() {
        // receipt (42.17, 2024-05-10, "Acme Coffee") vs
        // transaction (-42.17, 2024-05-10, "ACME COFFEE #0123") -> 100.
        let store = store_with_alias("ACME COFFEE", "ACME COFFEE").await;
        let thresholds = MatchingThresholds::default();
        let candidate = transaction("ACME COFFEE #0123", dec!(-42.17), date(2024, 5, 10));

        let breakdown = score_candidate(
            dec!(42.17),
            date(2024, 5, 10),
            "Acme Coffee",
            &candidate,
            &store,
            &thresholds,
        )
        .await
        .unwrap();

        assert_eq!(breakdown.amount_score, 40.0);
        assert_eq!(breakdown.date_score, 35.0);
        assert_eq!(breakdown.vendor_score, 25.0);
        assert_eq!(breakdown.total, 100.0);
        assert!(breakdown.matched_vendor_alias_id.is_some());
    }

    #[tokio::test]
    async fn near_amount_one_day_gap_fuzzy_vendor_scores_below_threshold() {
        // receipt (42.50, 2024-05-10, "Acme Cofee") vs
        // transaction (-42.17, 2024-05-11, "ACME COFFEE #0123") -> 65.
        let store = InMemoryVendorAliasStore::default();
        let thresholds = MatchingThresholds::default();
        let candidate = transaction("ACME COFFEE #0123", dec!(-42.17), date(2024, 5, 11));

        let breakdown = score_candidate(
            dec!(42.50),
            date(2024, 5, 10),
            "Acme Cofee",
            &candidate,
            &store,
            &thresholds,
        )
        .await
        .unwrap();

        assert_eq!(breakdown.amount_score, 20.0);
        assert_eq!(breakdown.date_score, 30.0);
        assert_eq!(breakdown.vendor_score, 15.0);
        assert_eq!(breakdown.total, 65.0);
        assert!(breakdown.total < thresholds.min_confidence);
    }

    #[tokio::test]
    async fn group_match_scores_90() {
        // group "TWILIO (3 charges)" combined 150.00 on
        // 2024-06-02 against receipt (150.00, 2024-06-02, "Twilio Inc")
        // -> 40 + 35 + 15 = 90.
        let store = InMemoryVendorAliasStore::default();
        let thresholds = MatchingThresholds::default();
        let candidate = group("TWILIO (3 charges)", dec!(150.00), date(2024, 6, 2));

        let breakdown = score_candidate(
            dec!(150.00),
            date(2024, 6, 2),
            "Twilio Inc",
            &candidate,
            &store,
            &thresholds,
        )
        .await
        .unwrap();

        assert_eq!(breakdown.amount_score, 40.0);
        assert_eq!(breakdown.date_score, 35.0);
        assert_eq!(breakdown.vendor_score, 15.0);
        assert_eq!(breakdown.total, 90.0);
    }

    #[tokio::test]
    async fn empty_vendor_r_scores_zero_on_vendor_axis() {
        let store = store_with_alias("ACME COFFEE", "ACME COFFEE").await;
        let thresholds = MatchingThresholds::default();
        let candidate = transaction("ACME COFFEE #0123", dec!(-42.17), date(2024, 5, 10));

        let (score, alias_id) = score_vendor("", &candidate, &store, &thresholds).await.unwrap();
        assert_eq!(score, 0.0);
        assert!(alias_id.is_none());
    }

    proptest::proptest! {
        #[test]
        fn amount_score_is_always_within_bounds(r in -10000.0f64..10000.0, c in -10000.0f64..10000.0) {
            let thresholds = MatchingThresholds::default();
            let amount_r = Decimal::try_from(r).unwrap_or_default();
            let amount_c = Decimal::try_from(c).unwrap_or_default();
            let score = score_amount(amount_r, amount_c, &thresholds);
            prop_assert!(score == 0.0 || score == 20.0 || score == 40.0);
        }
    }
}
