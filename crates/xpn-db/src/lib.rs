// SPDX-License-Identifier: MIT OR Apache-2.0
//! Postgres-backed persistence for every storage seam the component
//! crates define (ambient — not a spec component on its own, but
//! required by "all entities are owned by the database layer").
//!
//! [`DbSession`] wraps one `sqlx::PgConnection`. It is cheap to clone
//! (an `Arc` internally) but is not a connection pool: a handler
//! acquires one session for the life of a request and does not hand it
//! to another concurrently-running task. Transient failures (dropped
//! connections, serialization failures) are retried with
//! [`session::retry_transient`], grounded on the sidecar retry loop
//! used elsewhere in this codebase.

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fingerprint;
pub mod hash_index;
pub mod matching;
pub mod session;
pub mod usage_log;
pub mod vector_index;
pub mod vendor_registry;

pub use fingerprint::PgFingerprintStore;
pub use hash_index::PgHashIndexStore;
pub use matching::PgMatchRepository;
pub use session::{retry_transient, DbSession, RetryConfig};
pub use usage_log::TierUsageLogRepo;
pub use vector_index::PgEmbeddingStore;
pub use vendor_registry::PgVendorAliasStore;
