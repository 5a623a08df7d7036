// SPDX-License-Identifier: MIT OR Apache-2.0
//! C7: statement fingerprint resolver Maps a statement's
//! column headers to a canonical field layout, preferring a
//! user-specific fingerprint over a system-wide one, and falling back
//! to C3 for an unseen header shape.

#![deny(unsafe_code)]
#![warn(missing_docs)]

use async_trait::async_trait;
use chrono::Utc;
use std::collections::BTreeMap;
use uuid::Uuid;
use xpn_ai_adapter::{AiAdapter, Chat};
use xpn_core::{header_hash, AmountSign, CancellationToken, StatementFingerprint};
use xpn_error::ExpenseError;

/// Header fields the AI is allowed to map a column onto
const ALLOWED_FIELDS: &[&str] = &[
    "date",
    "post_date",
    "description",
    "amount",
    "category",
    "memo",
    "reference",
    "ignore",
];

/// Fields a mapping must cover to be trusted without confirmation.
const REQUIRED_FIELDS: &[&str] = &["date", "amount", "description"];

/// At most this many sample rows are sent to C3 alongside the header.
pub const MAX_SAMPLE_ROWS: usize = 3;

/// Persistence seam for statement fingerprints.
#[async_trait]
pub trait FingerprintStore: Send + Sync {
    /// Looks up a fingerprint by header hash, scoped to `user_id` when
    /// `Some` or the system-wide row when `None`.
    async fn find(
        &self,
        header_hash: &str,
        user_id: Option<Uuid>,
    ) -> Result<Option<StatementFingerprint>, ExpenseError>;

    /// Inserts a new fingerprint or replaces the row with the same id.
    async fn upsert(
        &self,
        fingerprint: StatementFingerprint,
    ) -> Result<StatementFingerprint, ExpenseError>;

    /// Increments `hit_count` and stamps `last_used_at` on reuse.
    async fn record_hit(&self, id: Uuid) -> Result<StatementFingerprint, ExpenseError>;
}

/// A mapping C3 inferred that is missing a required field and so was
/// not persisted automatically (`resolve_statement`'s
/// "`mapping_or_request_for_user_confirmation`").
#[derive(Debug, Clone, PartialEq)]
pub struct InferredMapping {
    /// Header hash this mapping was inferred for.
    pub header_hash: String,
    /// Original header text mapped to its canonical field.
    pub column_mapping: BTreeMap<String, String>,
    /// `strftime`-style date format the AI inferred.
    pub date_format: String,
    /// Charge sign convention the AI inferred.
    pub amount_sign: AmountSign,
    /// Clamped to `<= 0.5` because a required field is unmapped.
    pub confidence: f64,
}

/// What [`FingerprintResolver::resolve`] returned.
#[derive(Debug, Clone, PartialEq)]
pub enum FingerprintOutcome {
    /// A fingerprint was found or confidently inferred and persisted.
    Resolved(StatementFingerprint),
    /// C3 inferred a mapping missing `date`, `amount`, or
    /// `description`; the caller must complete it and call
    /// [`FingerprintResolver::confirm`] before it is trusted.
    NeedsConfirmation(InferredMapping),
}

/// C7's public operation, parameterized over the fingerprint store and
/// the chat collaborator it falls back to.
pub struct FingerprintResolver<S: FingerprintStore, C: Chat> {
    store: S,
    ai: AiAdapter<C>,
}

impl<S: FingerprintStore, C: Chat> FingerprintResolver<S, C> {
    /// Wires C7 to its store and AI adapter.
    pub fn new(store: S, ai: AiAdapter<C>) -> Self {
        Self { store, ai }
    }

    /// Resolves `headers` to a column mapping, consulting the
    /// user-specific fingerprint first, then the system-wide one, then
    /// C3
    ///
    /// # Errors
    ///
    /// Propagates the store's error, or a [`ExpenseError::ParseError`]
    /// if C3's response cannot be interpreted.
    pub async fn resolve(
        &self,
        headers: &[String],
        sample_rows: &[Vec<String>],
        source_name: &str,
        user_id: Uuid,
        cancel: &CancellationToken,
    ) -> Result<FingerprintOutcome, ExpenseError> {
        let hash = header_hash(headers);

        if let Some(fingerprint) = self.store.find(&hash, Some(user_id)).await? {
            let updated = self.store.record_hit(fingerprint.id).await?;
            return Ok(FingerprintOutcome::Resolved(updated));
        }
        if let Some(fingerprint) = self.store.find(&hash, None).await? {
            let updated = self.store.record_hit(fingerprint.id).await?;
            return Ok(FingerprintOutcome::Resolved(updated));
        }

        let system_prompt = "Infer the column layout of this bank or card statement export. \
            Respond with JSON: {\"columnMapping\": {<header>: <field>, ...}, \"dateFormat\": \"...\", \
            \"amountSign\": \"negative_charges\"|\"positive_charges\", \"confidence\": 0.0-1.0}. \
            Each header must map to one of: date, post_date, description, amount, category, memo, \
            reference, ignore.";
        let user_prompt = build_sample_prompt(headers, sample_rows);

        let raw_json = self
            .ai
            .invoke(system_prompt, &user_prompt, 400, 0.1, cancel)
            .await?;
        let inferred = parse_fingerprint_response(&raw_json, headers, &hash)?;

        let required_met = REQUIRED_FIELDS
            .iter()
            .all(|field| inferred.column_mapping.values().any(|v| v == field));

        if !required_met {
            return Ok(FingerprintOutcome::NeedsConfirmation(InferredMapping {
                confidence: inferred.confidence.min(0.5),
                ..inferred
            }));
        }

        let persisted = self
            .store
            .upsert(StatementFingerprint {
                id: Uuid::new_v4(),
                user_id: Some(user_id),
                header_hash: hash,
                source_name: source_name.to_string(),
                column_mapping: inferred.column_mapping,
                date_format: inferred.date_format,
                amount_sign: inferred.amount_sign,
                hit_count: 1,
                last_used_at: Utc::now(),
            })
            .await?;

        Ok(FingerprintOutcome::Resolved(persisted))
    }

    /// Persists a caller-completed mapping for a header shape that
    /// previously came back [`FingerprintOutcome::NeedsConfirmation`].
    ///
    /// # Errors
    ///
    /// Propagates the store's error.
    pub async fn confirm(
        &self,
        header_hash: String,
        column_mapping: BTreeMap<String, String>,
        date_format: String,
        amount_sign: AmountSign,
        source_name: &str,
        user_id: Uuid,
    ) -> Result<StatementFingerprint, ExpenseError> {
        self.store
            .upsert(StatementFingerprint {
                id: Uuid::new_v4(),
                user_id: Some(user_id),
                header_hash,
                source_name: source_name.to_string(),
                column_mapping,
                date_format,
                amount_sign,
                hit_count: 1,
                last_used_at: Utc::now(),
            })
            .await
    }
}

fn build_sample_prompt(headers: &[String], sample_rows: &[Vec<String>]) -> String {
    let mut prompt = format!("Headers: {}", headers.join(", "));
    for (i, row) in sample_rows.iter().take(MAX_SAMPLE_ROWS).enumerate() {
        prompt.push_str(&format!("\nRow {}: {}", i + 1, row.join(", ")));
    }
    prompt
}

/// Parses C3's fingerprint-inference response, matching each mapped
/// header case-insensitively back to its original casing in `headers`
/// and dropping any field name outside [`ALLOWED_FIELDS`].
fn parse_fingerprint_response(
    raw_json: &str,
    headers: &[String],
    header_hash: &str,
) -> Result<InferredMapping, ExpenseError> {
    let value: serde_json::Value = serde_json::from_str(raw_json).map_err(|e| ExpenseError::ParseError {
        message: format!("fingerprint response was not valid JSON: {e}"),
    })?;

    let raw_mapping = value
        .get("columnMapping")
        .and_then(serde_json::Value::as_object)
        .ok_or_else(|| ExpenseError::ParseError {
            message: "fingerprint response missing columnMapping object".to_string(),
        })?;

    let mut column_mapping = BTreeMap::new();
    for (ai_header, field_value) in raw_mapping {
        let Some(field) = field_value.as_str() else {
            continue;
        };
        let field = field.to_lowercase();
        if !ALLOWED_FIELDS.contains(&field.as_str()) {
            continue;
        }
        let Some(original_header) = headers
            .iter()
            .find(|h| h.eq_ignore_ascii_case(ai_header))
        else {
            continue;
        };
        column_mapping.insert(original_header.clone(), field);
    }

    let date_format = value
        .get("dateFormat")
        .and_then(serde_json::Value::as_str)
        .ok_or_else(|| ExpenseError::ParseError {
            message: "fingerprint response missing dateFormat".to_string(),
        })?
        .to_string();

    let amount_sign = match value.get("amountSign").and_then(serde_json::Value::as_str) {
        Some("negative_charges") => AmountSign::NegativeCharges,
        Some("positive_charges") => AmountSign::PositiveCharges,
        _ => {
            return Err(ExpenseError::ParseError {
                message: "fingerprint response had an unrecognized amountSign".to_string(),
            })
        }
    };

    let confidence = value
        .get("confidence")
        .and_then(serde_json::Value::as_f64)
        .ok_or_else(|| ExpenseError::ParseError {
            message: "fingerprint response missing confidence".to_string(),
        })?
        .clamp(0.0, 1.0);

    Ok(InferredMapping {
        header_hash: header_hash.to_string(),
        column_mapping,
        date_format,
        amount_sign,
        confidence,
    })
}

/// An in-memory [`FingerprintStore`] for tests and local demos.
pub mod mem {
    use super::*;
    use std::sync::Mutex;

    /// Stores fingerprints in a `Vec` behind a `Mutex`.
    #[derive(Default)]
    pub struct InMemoryFingerprintStore {
        rows: Mutex<Vec<StatementFingerprint>>,
    }

    #[async_trait]
    impl FingerprintStore for InMemoryFingerprintStore {
        async fn find(
            &self,
            header_hash: &str,
            user_id: Option<Uuid>,
        ) -> Result<Option<StatementFingerprint>, ExpenseError> {
            let rows = self.rows.lock().unwrap();
            Ok(rows
                .iter()
                .find(|r| r.header_hash == header_hash && r.user_id == user_id)
                .cloned())
        }

        async fn upsert(
            &self,
            fingerprint: StatementFingerprint,
        ) -> Result<StatementFingerprint, ExpenseError> {
            let mut rows = self.rows.lock().unwrap();
            if let Some(existing) = rows.iter_mut().find(|r| {
                r.header_hash == fingerprint.header_hash && r.user_id == fingerprint.user_id
            }) {
                let id = existing.id;
                *existing = fingerprint.clone();
                existing.id = id;
                return Ok(existing.clone());
            }
            rows.push(fingerprint.clone());
            Ok(fingerprint)
        }

        async fn record_hit(&self, id: Uuid) -> Result<StatementFingerprint, ExpenseError> {
            let mut rows = self.rows.lock().unwrap();
            let row = rows
                .iter_mut()
                .find(|r| r.id == id)
                .ok_or_else(|| ExpenseError::NotFound {
                    entity: "statement_fingerprint",
                    id: id.to_string(),
                })?;
            row.hit_count += 1;
            row.last_used_at = Utc::now();
            Ok(row.clone())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mem::InMemoryFingerprintStore;
    use xpn_ai_adapter::ChatMessage;

    struct ScriptedChat {
        response: String,
    }

    #[async_trait]
    impl Chat for ScriptedChat {
        async fn complete(
            &self,
            _messages: &[ChatMessage],
            _max_tokens: u32,
            _temperature: f32,
        ) -> Result<String, ExpenseError> {
            Ok(self.response.clone())
        }
    }

    fn headers() -> Vec<String> {
        vec![
            "Date".to_string(),
            "Description".to_string(),
            "Amount".to_string(),
            "Memo".to_string(),
        ]
    }

    fn resolver(response: &str) -> FingerprintResolver<InMemoryFingerprintStore, ScriptedChat> {
        FingerprintResolver::new(
            InMemoryFingerprintStore::default(),
            AiAdapter::new(ScriptedChat {
                response: response.to_string(),
            }),
        )
    }

    #[tokio::test]
    async fn resolves_from_user_specific_store_first() {
        let r = resolver("{}");
        let user_id = Uuid::new_v4();
        let hash = header_hash(&headers());

        let mut mapping = BTreeMap::new();
        mapping.insert("Date".to_string(), "date".to_string());
        mapping.insert("Description".to_string(), "description".to_string());
        mapping.insert("Amount".to_string(), "amount".to_string());

        r.store
            .upsert(StatementFingerprint {
                id: Uuid::new_v4(),
                user_id: Some(user_id),
                header_hash: hash.clone(),
                source_name: "Chase".to_string(),
                column_mapping: mapping,
                date_format: "%m/%d/%Y".to_string(),
                amount_sign: AmountSign::NegativeCharges,
                hit_count: 1,
                last_used_at: Utc::now(),
            })
            .await
            .unwrap();

        let outcome = r
            .resolve(&headers(), &[], "Chase", user_id, &CancellationToken::new())
            .await
            .unwrap();

        match outcome {
            FingerprintOutcome::Resolved(fp) => {
                assert_eq!(fp.hit_count, 2);
                assert_eq!(fp.header_hash, hash);
            }
            other => panic!("expected Resolved, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn falls_back_to_system_wide_fingerprint() {
        let r = resolver("{}");
        let hash = header_hash(&headers());
        let mut mapping = BTreeMap::new();
        mapping.insert("Date".to_string(), "date".to_string());
        mapping.insert("Description".to_string(), "description".to_string());
        mapping.insert("Amount".to_string(), "amount".to_string());

        r.store
            .upsert(StatementFingerprint {
                id: Uuid::new_v4(),
                user_id: None,
                header_hash: hash,
                source_name: "Generic Bank".to_string(),
                column_mapping: mapping,
                date_format: "%Y-%m-%d".to_string(),
                amount_sign: AmountSign::PositiveCharges,
                hit_count: 10,
                last_used_at: Utc::now(),
            })
            .await
            .unwrap();

        let outcome = r
            .resolve(
                &headers(),
                &[],
                "Generic Bank",
                Uuid::new_v4(),
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        match outcome {
            FingerprintOutcome::Resolved(fp) => assert_eq!(fp.hit_count, 11),
            other => panic!("expected Resolved, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn infers_and_persists_when_all_required_fields_present() {
        let r = resolver(
            r#"{"columnMapping": {"date": "date", "description": "description", "amount": "amount", "memo": "memo"},
                "dateFormat": "%m/%d/%Y", "amountSign": "negative_charges", "confidence": 0.9}"#,
        );
        let outcome = r
            .resolve(
                &headers(),
                &[vec![
                    "01/02/2024".to_string(),
                    "ACME COFFEE".to_string(),
                    "-4.50".to_string(),
                    "".to_string(),
                ]],
                "New Bank",
                Uuid::new_v4(),
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        match outcome {
            FingerprintOutcome::Resolved(fp) => {
                assert_eq!(fp.column_mapping.get("Date"), Some(&"date".to_string()));
                assert_eq!(fp.column_mapping.get("Memo"), Some(&"memo".to_string()));
                assert_eq!(fp.hit_count, 1);
            }
            other => panic!("expected Resolved, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn clamps_confidence_and_requests_confirmation_when_description_unmapped() {
        let r = resolver(
            r#"{"columnMapping": {"date": "date", "amount": "amount"},
                "dateFormat": "%m/%d/%Y", "amountSign": "negative_charges", "confidence": 0.95}"#,
        );
        let outcome = r
            .resolve(&headers(), &[], "New Bank", Uuid::new_v4(), &CancellationToken::new())
            .await
            .unwrap();

        match outcome {
            FingerprintOutcome::NeedsConfirmation(inferred) => {
                assert!(inferred.confidence <= 0.5);
                assert!(!inferred.column_mapping.values().any(|v| v == "description"));
            }
            other => panic!("expected NeedsConfirmation, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn drops_unrecognized_field_types_and_unmatched_headers() {
        let r = resolver(
            r#"{"columnMapping": {"date": "date", "description": "description", "amount": "amount",
                "memo": "not_a_real_field", "nonexistent column": "category"},
                "dateFormat": "%m/%d/%Y", "amountSign": "negative_charges", "confidence": 0.8}"#,
        );
        let outcome = r
            .resolve(&headers(), &[], "New Bank", Uuid::new_v4(), &CancellationToken::new())
            .await
            .unwrap();

        match outcome {
            FingerprintOutcome::Resolved(fp) => {
                assert!(!fp.column_mapping.contains_key("Memo"));
                assert_eq!(fp.column_mapping.len(), 3);
            }
            other => panic!("expected Resolved, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn header_matching_is_case_insensitive_and_preserves_original_casing() {
        let r = resolver(
            r#"{"columnMapping": {"DATE": "date", "description": "description", "AMOUNT": "amount"},
                "dateFormat": "%m/%d/%Y", "amountSign": "negative_charges", "confidence": 0.8}"#,
        );
        let outcome = r
            .resolve(&headers(), &[], "New Bank", Uuid::new_v4(), &CancellationToken::new())
            .await
            .unwrap();

        match outcome {
            FingerprintOutcome::Resolved(fp) => {
                assert!(fp.column_mapping.contains_key("Date"));
                assert!(fp.column_mapping.contains_key("Amount"));
                assert!(!fp.column_mapping.contains_key("DATE"));
            }
            other => panic!("expected Resolved, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn confirm_persists_a_caller_completed_mapping() {
        let r = resolver("{}");
        let hash = header_hash(&headers());
        let mut mapping = BTreeMap::new();
        mapping.insert("Date".to_string(), "date".to_string());
        mapping.insert("Description".to_string(), "description".to_string());
        mapping.insert("Amount".to_string(), "amount".to_string());

        let persisted = r
            .confirm(
                hash.clone(),
                mapping,
                "%m/%d/%Y".to_string(),
                AmountSign::NegativeCharges,
                "New Bank",
                Uuid::new_v4(),
            )
            .await
            .unwrap();

        assert_eq!(persisted.header_hash, hash);
        assert_eq!(persisted.hit_count, 1);
    }
}
