// SPDX-License-Identifier: MIT OR Apache-2.0
//! C10: vendor pattern extraction and fuzzy string similarity.
//!
//! Pure functions, no I/O. Used by the vendor alias registry (C5) to
//! compare a candidate description against stored alias patterns, and by
//! the matching engine (C8) to score the vendor axis.

#![deny(unsafe_code)]
#![warn(missing_docs)]

/// Extracts the canonical vendor pattern from a transaction description
/// ("Vendor extraction").
///
/// Rules, in order:
/// - `"AMAZON.COM*..."` → `"AMAZON"`.
/// - `"SQ *<merchant>"` → `"SQ " + first two uppercase words of the
///   merchant remainder`.
/// - `"PAYPAL *<merchant>"` → `"PAYPAL " + first two uppercase words`.
/// - Otherwise: strip a trailing run matching `\s*[\d#][\dA-Z]*$`, take
///   the first three whitespace-separated tokens, uppercase.
///
/// # Examples
///
/// ```
/// use xpn_fuzzy::extract_vendor_pattern;
///
/// assert_eq!(extract_vendor_pattern("ACME COFFEE #0123"), "ACME COFFEE");
/// assert_eq!(extract_vendor_pattern("AMAZON.COM*AB12CD34E"), "AMAZON");
/// assert_eq!(extract_vendor_pattern("SQ *BLUE BOTTLE COFFEE"), "SQ BLUE BOTTLE");
/// ```
pub fn extract_vendor_pattern(description: &str) -> String {
    let upper = description.trim().to_uppercase();

    if upper.starts_with("AMAZON.COM*") {
        return "AMAZON".to_string();
    }
    if let Some(rest) = upper.strip_prefix("SQ *") {
        return format!("SQ {}", first_n_tokens(rest, 2));
    }
    if let Some(rest) = upper.strip_prefix("PAYPAL *") {
        return format!("PAYPAL {}", first_n_tokens(rest, 2));
    }

    let stripped = strip_trailing_code(&upper);
    first_n_tokens(stripped.trim(), 3)
}

/// Extracts the vendor pattern from a transaction-group display name
///: `"<VENDOR> (N charges)"` → `VENDOR`; otherwise the
/// trimmed name.
///
/// # Examples
///
/// ```
/// use xpn_fuzzy::extract_group_vendor_pattern;
///
/// assert_eq!(extract_group_vendor_pattern("TWILIO (3 charges)"), "TWILIO");
/// assert_eq!(extract_group_vendor_pattern("Office Supplies"), "Office Supplies");
/// ```
pub fn extract_group_vendor_pattern(group_name: &str) -> String {
    let trimmed = group_name.trim();
    if let (Some(open), Some(close)) = (trimmed.rfind('('), trimmed.rfind(')')) {
        if open < close && close == trimmed.len() - 1 {
            let inner = &trimmed[open + 1..close];
            let parts: Vec<&str> = inner.split_whitespace().collect();
            let is_charge_count = parts.len() == 2
                && !parts[0].is_empty()
                && parts[0].chars().all(|c| c.is_ascii_digit())
                && (parts[1] == "charges" || parts[1] == "charge");
            if is_charge_count {
                let vendor = trimmed[..open].trim();
                if !vendor.is_empty() {
                    return vendor.to_string();
                }
            }
        }
    }
    trimmed.to_string()
}

/// Normalized similarity between two strings in `[0, 1]`, `1.0` meaning
/// identical (case-insensitive). Backed by `strsim::normalized_levenshtein`.
///
/// # Examples
///
/// ```
/// use xpn_fuzzy::normalized_similarity;
///
/// assert!(normalized_similarity("Acme Cofee", "ACME COFFEE") >= 0.70);
/// assert!(normalized_similarity("Twilio Inc", "Delta Airlines") < 0.70);
/// ```
pub fn normalized_similarity(a: &str, b: &str) -> f64 {
    strsim::normalized_levenshtein(&a.to_uppercase(), &b.to_uppercase())
}

fn first_n_tokens(s: &str, n: usize) -> String {
    s.split_whitespace().take(n).collect::<Vec<_>>().join(" ")
}

/// Strips a trailing run matching `\s*[\d#][\dA-Z]*$`.
fn strip_trailing_code(s: &str) -> String {
    let chars: Vec<char> = s.chars().collect();
    let n = chars.len();

    let mut run_start = n;
    while run_start > 0
        && (chars[run_start - 1].is_ascii_digit() || chars[run_start - 1].is_ascii_uppercase())
    {
        run_start -= 1;
    }
    if run_start == n {
        // No trailing digit/uppercase run at all.
        return s.to_string();
    }

    let mut start = run_start;
    if start > 0 && chars[start - 1] == '#' {
        start -= 1;
    } else if !chars[run_start].is_ascii_digit() {
        // Run begins with an uppercase letter and there's no leading
        // '#': the class's first character must be a digit or '#'.
        return s.to_string();
    }

    while start > 0 && chars[start - 1].is_whitespace() {
        start -= 1;
    }

    chars[..start].iter().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn amazon_prefix_collapses_to_amazon() {
        assert_eq!(extract_vendor_pattern("AMAZON.COM*AB1234"), "AMAZON");
        assert_eq!(extract_vendor_pattern("amazon.com*q93jf02"), "AMAZON");
    }

    #[test]
    fn square_prefix_takes_two_words_of_remainder() {
        assert_eq!(
            extract_vendor_pattern("SQ *BLUE BOTTLE COFFEE SHOP"),
            "SQ BLUE BOTTLE"
        );
    }

    #[test]
    fn paypal_prefix_takes_two_words_of_remainder() {
        assert_eq!(
            extract_vendor_pattern("PAYPAL *ACME WIDGETS CO"),
            "PAYPAL ACME WIDGETS"
        );
    }

    #[test]
    fn generic_description_strips_trailing_reference_code() {
        assert_eq!(extract_vendor_pattern("ACME COFFEE #0123"), "ACME COFFEE");
        assert_eq!(
            extract_vendor_pattern("UNITED AIRLINES 0162345678901"),
            "UNITED AIRLINES"
        );
    }

    #[test]
    fn generic_description_without_trailing_code_keeps_first_three_tokens() {
        assert_eq!(
            extract_vendor_pattern("Whole Foods Market Downtown"),
            "WHOLE FOODS MARKET"
        );
    }

    #[test]
    fn generic_description_with_only_letters_is_unchanged_by_stripping() {
        // No digit/# anchored run: nothing is stripped.
        assert_eq!(extract_vendor_pattern("Delta Air Lines"), "DELTA AIR LINES");
    }

    #[test]
    fn group_name_with_charge_count_extracts_vendor() {
        assert_eq!(extract_group_vendor_pattern("TWILIO (3 charges)"), "TWILIO");
        assert_eq!(
            extract_group_vendor_pattern("Adobe Creative Cloud (1 charge)"),
            "Adobe Creative Cloud"
        );
    }

    #[test]
    fn group_name_without_charge_count_is_trimmed_verbatim() {
        assert_eq!(
            extract_group_vendor_pattern("  Office Supplies  "),
            "Office Supplies"
        );
    }

    #[test]
    fn similarity_of_identical_strings_is_one() {
        assert_eq!(normalized_similarity("Acme", "ACME"), 1.0);
    }

    #[test]
    fn similarity_of_unrelated_strings_is_low() {
        assert!(normalized_similarity("Twilio Inc", "Delta Airlines") < 0.5);
    }

    #[test]
    fn similarity_meets_near_amount_scenario_threshold() {
        // near-amount, one-day gap, fuzzy vendor scenario.
        let sim = normalized_similarity("Acme Cofee", "ACME COFFEE");
        assert!(sim >= 0.70, "similarity was {sim}");
    }
}
