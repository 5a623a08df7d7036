//! Filename sanitization: the allowlist variant is adopted as authoritative.

/// Sanitizes `original_filename` to `^[A-Za-z0-9._-]{1,100}$`, collapsing
/// runs of underscores introduced by replacing disallowed characters, and
/// preserving the original extension when present.
///
/// # Examples
///
/// ```
/// use xpn_core::sanitize_filename;
///
/// assert_eq!(sanitize_filename("My Receipt (2024)!.pdf"), "My_Receipt_2024.pdf");
/// ```
pub fn sanitize_filename(original_filename: &str) -> String {
    let (stem, ext) = split_extension(original_filename);

    let mut out = String::with_capacity(stem.len());
    let mut last_was_underscore = false;
    for c in stem.chars() {
        if c.is_ascii_alphanumeric() || c == '.' || c == '-' {
            out.push(c);
            last_was_underscore = false;
        } else if !last_was_underscore {
            out.push('_');
            last_was_underscore = true;
        }
    }
    let mut cleaned = out.trim_matches('_').to_string();
    if cleaned.is_empty() || !cleaned.chars().any(|c| c.is_ascii_alphanumeric()) {
        cleaned = "file".to_string();
    }

    let max_stem_len = 100usize.saturating_sub(ext.len());
    if cleaned.len() > max_stem_len {
        cleaned.truncate(max_stem_len);
        cleaned = cleaned.trim_end_matches(['_', '.', '-']).to_string();
    }

    format!("{cleaned}{ext}")
}

/// Splits `name` into `(stem, ".ext")`, where `.ext` is empty if there is
/// no extension. The extension itself is sanitized to the same allowlist.
fn split_extension(name: &str) -> (&str, String) {
    match name.rfind('.') {
        Some(idx) if idx > 0 && idx < name.len() - 1 => {
            let stem = &name[..idx];
            let raw_ext: String = name[idx + 1..]
                .chars()
                .filter(|c| c.is_ascii_alphanumeric())
                .collect();
            if raw_ext.is_empty() {
                (name, String::new())
            } else {
                (stem, format!(".{}", raw_ext.to_lowercase()))
            }
        }
        _ => (name, String::new()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn replaces_invalid_characters() {
        assert_eq!(
            sanitize_filename("My Receipt (2024)!.pdf"),
            "My_Receipt_2024.pdf"
        );
    }

    #[test]
    fn collapses_consecutive_underscores() {
        assert_eq!(sanitize_filename("a   b///c.png"), "a_b_c.png");
    }

    #[test]
    fn preserves_extension_case_lowered() {
        assert_eq!(sanitize_filename("invoice.PDF"), "invoice.pdf");
    }

    #[test]
    fn truncates_to_100_chars_preserving_extension() {
        let long_name = format!("{}.jpg", "a".repeat(200));
        let sanitized = sanitize_filename(&long_name);
        assert!(sanitized.len() <= 100);
        assert!(sanitized.ends_with(".jpg"));
    }

    #[test]
    fn no_extension_is_handled() {
        let sanitized = sanitize_filename("README");
        assert_eq!(sanitized, "README");
    }

    #[test]
    fn empty_stem_falls_back() {
        assert_eq!(sanitize_filename("....pdf"), "file.pdf");
    }

    proptest! {
        #[test]
        fn always_matches_allowlist(s in ".{0,150}") {
            let sanitized = sanitize_filename(&s);
            prop_assert!(!sanitized.is_empty());
            prop_assert!(sanitized.len() <= 100);
            prop_assert!(sanitized.chars().all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '-' || c == '_'));
        }
    }
}
