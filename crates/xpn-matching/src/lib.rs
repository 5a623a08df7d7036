// SPDX-License-Identifier: MIT OR Apache-2.0
//! C8: deterministic, ambiguity-aware receipt-to-transaction matching
//! engine
//!
//! Scores every surviving candidate in a receipt's pool on three
//! independent axes (amount, date, vendor), proposes the winner only
//! when it clears both a minimum confidence and a minimum gap over the
//! runner-up, and carries the confirm/reject/manual-match/batch-approve
//! lifecycle once a proposal exists. Candidate fetch and match
//! persistence are both behind trait seams so `xpn-db` can supply the
//! Postgres-backed implementations used in production.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod candidate;
mod engine;
pub mod mem;
mod scoring;
mod store;

pub use candidate::{assemble_pool, Candidate, CandidateSource};
pub use engine::{
    AutoMatchResult, BatchApproveResult, ConfirmedMatch, MatchingEngine, ScoredCandidate,
    MAX_LIST_CANDIDATES,
};
pub use scoring::{score_amount, score_candidate, score_date, score_vendor, MatchingThresholds, ScoreBreakdown};
pub use store::{BatchSelector, ManualMatchTarget, MatchStore};
