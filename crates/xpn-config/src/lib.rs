// SPDX-License-Identifier: MIT OR Apache-2.0
//! Configuration loading, validation, and merging for the expense
//! engine

#![deny(unsafe_code)]
#![warn(missing_docs)]

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Errors that can occur while loading or validating configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The requested configuration file was not found.
    #[error("config file not found: {path}")]
    FileNotFound {
        /// Path that was requested.
        path: String,
    },

    /// The file could not be parsed as valid TOML.
    #[error("failed to parse config: {reason}")]
    ParseError {
        /// Human-readable parse error detail.
        reason: String,
    },

    /// Semantic validation failed.
    #[error("config validation failed: {reasons:?}")]
    ValidationError {
        /// Individual validation failure messages.
        reasons: Vec<String>,
    },
}

/// Advisory-level configuration issues that do not prevent startup.
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigWarning {
    /// `ambiguous_gap` is zero, which means any tie at all is decisive —
    /// almost certainly not intended.
    AmbiguousGapIsZero,
    /// `vendor_confirm_threshold` is `1`, so a single confirmation
    /// promotes an alias default immediately.
    VendorConfirmThresholdTooLow {
        /// The configured value.
        value: u32,
    },
    /// `min_confidence` is below 50, which will propose matches on very
    /// weak evidence.
    MinConfidenceVeryLow {
        /// The configured value.
        value: u32,
    },
}

impl std::fmt::Display for ConfigWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigWarning::AmbiguousGapIsZero => {
                write!(f, "ambiguous_gap is 0: ties will never be flagged ambiguous")
            }
            ConfigWarning::VendorConfirmThresholdTooLow { value } => {
                write!(f, "vendor_confirm_threshold is {value}: aliases promote on first confirmation")
            }
            ConfigWarning::MinConfidenceVeryLow { value } => {
                write!(f, "min_confidence is {value}: matches will be proposed on weak evidence")
            }
        }
    }
}

/// Top-level runtime configuration for the expense engine.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EngineConfig {
    /// Minimum cosine similarity for a tier-2 vector hit to count.
    pub embed_similarity_threshold: f64,
    /// Confirmations required before an alias default is promoted.
    pub vendor_confirm_threshold: u32,
    /// Minimum total score for a match candidate to be proposed.
    pub min_confidence: u32,
    /// Maximum gap between best and runner-up score before a receipt is
    /// marked ambiguous instead of proposed.
    pub ambiguous_gap: u32,
    /// Amount difference within which the amount score is the maximum
    /// (40 points).
    #[serde(with = "rust_decimal::serde::str")]
    pub amount_exact: Decimal,
    /// Amount difference within which a candidate is still considered
    /// (20 points, or admitted to the pool at all).
    #[serde(with = "rust_decimal::serde::str")]
    pub amount_near: Decimal,
    /// Half-width, in days, of the date window used both for candidate
    /// pool assembly and date scoring.
    pub date_window_days: i64,
    /// Minimum normalized-similarity for a fuzzy vendor match.
    pub fuzzy_threshold: f64,
    /// Retention window, in months, for unverified embeddings.
    pub embed_retention_months: i64,
    /// Estimated cost in USD of one tier-2 invocation.
    pub tier2_cost_usd: f64,
    /// Estimated cost in USD of one tier-3 invocation.
    pub tier3_cost_usd: f64,
    /// Maximum character length passed to the embedder; longer text is
    /// silently truncated.
    pub normalization_max_chars: usize,
    /// Soft timeout for a single AI adapter invocation.
    pub ai_timeout: Duration,
    /// Fixed embedding dimension for this deployment.
    pub embedding_dimension: usize,
    /// Postgres connection string.
    pub database_url: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            embed_similarity_threshold: 0.92,
            vendor_confirm_threshold: 3,
            min_confidence: 70,
            ambiguous_gap: 5,
            amount_exact: dec!(0.10),
            amount_near: dec!(1.00),
            date_window_days: 7,
            fuzzy_threshold: 0.70,
            embed_retention_months: 6,
            tier2_cost_usd: 0.00002,
            tier3_cost_usd: 0.0004,
            normalization_max_chars: 500,
            ai_timeout: Duration::from_secs(10),
            embedding_dimension: 1536,
            database_url: "postgres://localhost/expense_engine".to_string(),
        }
    }
}

impl EngineConfig {
    /// Loads configuration from a TOML file, falling back to
    /// [`EngineConfig::default`] for any field the file omits.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::FileNotFound`] if `path` does not exist, or
    /// [`ConfigError::ParseError`] if the contents are not valid TOML.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|_| ConfigError::FileNotFound {
            path: path.display().to_string(),
        })?;
        Self::from_toml_str(&contents)
    }

    /// Parses configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::ParseError`] if the contents are not valid
    /// TOML, or [`ConfigError::ValidationError`] if semantic validation
    /// fails.
    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        let config: EngineConfig = toml::from_str(contents).map_err(|e| ConfigError::ParseError {
            reason: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Validates hard invariants; returns `Err` with every violation
    /// found (not just the first).
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::ValidationError`] listing every violated
    /// constraint.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut reasons = Vec::new();

        if !(0.0..=1.0).contains(&self.embed_similarity_threshold) {
            reasons.push("embed_similarity_threshold must be in [0, 1]".to_string());
        }
        if !(0.0..=1.0).contains(&self.fuzzy_threshold) {
            reasons.push("fuzzy_threshold must be in [0, 1]".to_string());
        }
        if self.min_confidence > 100 {
            reasons.push("min_confidence must be <= 100".to_string());
        }
        if self.amount_exact.is_sign_negative() {
            reasons.push("amount_exact must be non-negative".to_string());
        }
        if self.amount_near < self.amount_exact {
            reasons.push("amount_near must be >= amount_exact".to_string());
        }
        if self.date_window_days < 0 {
            reasons.push("date_window_days must be non-negative".to_string());
        }
        if self.normalization_max_chars == 0 {
            reasons.push("normalization_max_chars must be > 0".to_string());
        }
        if self.database_url.trim().is_empty() {
            reasons.push("database_url must not be empty".to_string());
        }

        if reasons.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::ValidationError { reasons })
        }
    }

    /// Advisory warnings for values that are valid but unusual.
    pub fn warnings(&self) -> Vec<ConfigWarning> {
        let mut warnings = Vec::new();
        if self.ambiguous_gap == 0 {
            warnings.push(ConfigWarning::AmbiguousGapIsZero);
        }
        if self.vendor_confirm_threshold <= 1 {
            warnings.push(ConfigWarning::VendorConfirmThresholdTooLow {
                value: self.vendor_confirm_threshold,
            });
        }
        if self.min_confidence < 50 {
            warnings.push(ConfigWarning::MinConfidenceVeryLow {
                value: self.min_confidence,
            });
        }
        warnings
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec_section_6() {
        let c = EngineConfig::default();
        assert_eq!(c.embed_similarity_threshold, 0.92);
        assert_eq!(c.vendor_confirm_threshold, 3);
        assert_eq!(c.min_confidence, 70);
        assert_eq!(c.ambiguous_gap, 5);
        assert_eq!(c.amount_exact, dec!(0.10));
        assert_eq!(c.amount_near, dec!(1.00));
        assert_eq!(c.date_window_days, 7);
        assert_eq!(c.fuzzy_threshold, 0.70);
        assert_eq!(c.embed_retention_months, 6);
        assert_eq!(c.tier2_cost_usd, 0.00002);
        assert_eq!(c.tier3_cost_usd, 0.0004);
        assert_eq!(c.normalization_max_chars, 500);
    }

    #[test]
    fn defaults_are_valid() {
        assert!(EngineConfig::default().validate().is_ok());
    }

    #[test]
    fn partial_toml_falls_back_to_defaults() {
        let c = EngineConfig::from_toml_str("min_confidence = 80\n").unwrap();
        assert_eq!(c.min_confidence, 80);
        assert_eq!(c.ambiguous_gap, 5);
    }

    #[test]
    fn invalid_toml_is_parse_error() {
        let err = EngineConfig::from_toml_str("not valid [[[ toml").unwrap_err();
        assert!(matches!(err, ConfigError::ParseError { .. }));
    }

    #[test]
    fn out_of_range_threshold_fails_validation() {
        let mut c = EngineConfig::default();
        c.embed_similarity_threshold = 1.5;
        let err = c.validate().unwrap_err();
        match err {
            ConfigError::ValidationError { reasons } => assert_eq!(reasons.len(), 1),
            _ => panic!("expected ValidationError"),
        }
    }

    #[test]
    fn amount_near_below_exact_fails_validation() {
        let mut c = EngineConfig::default();
        c.amount_near = dec!(0.01);
        c.amount_exact = dec!(0.10);
        assert!(c.validate().is_err());
    }

    #[test]
    fn warnings_flag_degenerate_ambiguous_gap() {
        let mut c = EngineConfig::default();
        c.ambiguous_gap = 0;
        assert!(c.warnings().contains(&ConfigWarning::AmbiguousGapIsZero));
    }

    #[test]
    fn missing_file_is_file_not_found() {
        let err = EngineConfig::load(Path::new("/nonexistent/path.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::FileNotFound { .. }));
    }

    #[test]
    fn load_from_temp_file_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("engine.toml");
        std::fs::write(&path, "vendor_confirm_threshold = 5\n").unwrap();
        let c = EngineConfig::load(&path).unwrap();
        assert_eq!(c.vendor_confirm_threshold, 5);
    }
}
