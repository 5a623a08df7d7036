// SPDX-License-Identifier: MIT OR Apache-2.0
//! Shared domain vocabulary for the expense engine's tiered inference and
//! receipt-matching subsystems.
//!
//! This crate has no I/O: it is plain records, enums, and the SHA-256
//! hashing primitives that the hash index (C1) and statement fingerprint
//! resolver (C7) both need to stay in agreement on. Everything here is
//! `Send + Sync + 'static` and cheaply `Clone`-able so it can cross async
//! task boundaries without friction.

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod cancel;
mod entities;
mod enums;
mod filename;
mod hashing;
mod money;

pub use cancel::CancellationToken;
pub use entities::{
    CalendarDate, ExpenseEmbedding, NormalizedTextCache, Receipt, ReceiptTransactionMatch,
    StatementFingerprint, Transaction, TransactionGroup, TierUsageLog, VendorAlias,
};
pub use enums::{AmountSign, MatchRecordStatus, MatchStatus, OperationType, Tier, VendorCategory};
pub use filename::sanitize_filename;
pub use hashing::{hash_text, header_hash};
pub use money::Money;
