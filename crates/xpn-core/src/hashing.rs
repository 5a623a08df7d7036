//! Content-addressing primitives shared by the hash index (C1) and the
//! statement fingerprint resolver (C7).

use sha2::{Digest, Sha256};

/// Lowercases and trims `text`, then returns the lowercase-hex SHA-256 digest.
///
/// This is the identity function for [`crate::NormalizedTextCache`]: two
/// raw strings that are equal after `lower(trim(_))` always hash to the
/// same value.
///
/// # Examples
///
/// ```
/// use xpn_core::hash_text;
///
/// assert_eq!(hash_text("  Starbucks #123  "), hash_text("STARBUCKS #123"));
/// ```
pub fn hash_text(raw_text: &str) -> String {
    hash_normalized(raw_text.trim().to_lowercase().as_str())
}

/// Computes the header hash for a statement fingerprint: headers are
/// lowercased, trimmed, sorted, joined with `,`, then SHA-256 hashed.
///
/// Invariant under permutation and case of the input headers.
///
/// # Examples
///
/// ```
/// use xpn_core::header_hash;
///
/// let a = header_hash(&["Date", "Description", "Amount"]);
/// let b = header_hash(&["description", "DATE", "amount"]);
/// assert_eq!(a, b);
/// ```
pub fn header_hash<S: AsRef<str>>(headers: &[S]) -> String {
    let mut normalized: Vec<String> = headers
        .iter()
        .map(|h| h.as_ref().trim().to_lowercase())
        .collect();
    normalized.sort();
    hash_normalized(&normalized.join(","))
}

fn hash_normalized(s: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(s.as_bytes());
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn hash_is_64_hex_chars() {
        let h = hash_text("Amazon.com*AB1234");
        assert_eq!(h.len(), 64);
        assert!(h.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn hash_ignores_case_and_whitespace() {
        assert_eq!(hash_text("Acme Coffee"), hash_text("  acme coffee  "));
        assert_eq!(hash_text("ACME COFFEE"), hash_text("acme coffee"));
    }

    #[test]
    fn hash_distinguishes_different_text() {
        assert_ne!(hash_text("Acme Coffee"), hash_text("Acme Cofee"));
    }

    #[test]
    fn header_hash_ignores_order_and_case() {
        let a = header_hash(&["Date", "Description", "Amount"]);
        let b = header_hash(&["amount", "date", "DESCRIPTION"]);
        let c = header_hash(&["  Amount ", " Date", "Description "]);
        assert_eq!(a, b);
        assert_eq!(b, c);
    }

    #[test]
    fn header_hash_distinguishes_different_headers() {
        let a = header_hash(&["Date", "Amount"]);
        let b = header_hash(&["Date", "Amount", "Memo"]);
        assert_ne!(a, b);
    }

    proptest! {
        #[test]
        fn hash_idempotent_under_case_and_trim(s in "[ -~]{0,64}", pad in 0..4usize) {
            let padded = format!("{}{}{}", " ".repeat(pad), s, " ".repeat(pad));
            prop_assert_eq!(hash_text(&s), hash_text(&padded));
            prop_assert_eq!(hash_text(&s.to_lowercase()), hash_text(&s.to_uppercase()));
        }
    }
}
