//! Connection wrapper and transient-fault retry loop.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use sqlx::{Connection, PgConnection};
use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, warn};
use xpn_error::{ExpenseError, MAX_TRANSIENT_RETRIES};

/// One live Postgres connection. Not safe to share across two
/// concurrently-running tasks: a handler acquires its own `DbSession`
/// for the duration of a request and drops it when done. The inner
/// mutex exists only so the type can implement every repository trait
/// (all of which take `&self`) over one connection, not to make
/// concurrent use safe — two tasks racing on the same session will
/// serialize on the lock and may see each other's uncommitted writes
/// if either is mid-transaction.
#[derive(Clone)]
pub struct DbSession {
    conn: Arc<Mutex<PgConnection>>,
}

impl DbSession {
    /// Opens a new connection to `database_url`.
    ///
    /// # Errors
    ///
    /// [`ExpenseError::ServiceUnavailable`] if the connection cannot be
    /// established.
    pub async fn connect(database_url: &str) -> Result<Self, ExpenseError> {
        let conn = PgConnection::connect(database_url)
            .await
            .map_err(|e| ExpenseError::ServiceUnavailable {
                service: "postgres",
                message: e.to_string(),
            })?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Acquires exclusive access to the underlying connection for the
    /// lifetime of the guard. Repository methods hold this only for the
    /// span of one query.
    pub(crate) async fn lock(&self) -> MutexGuard<'_, PgConnection> {
        self.conn.lock().await
    }
}

/// Configuration for the retry loop wrapping database calls.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of retry attempts after the initial attempt.
    pub max_retries: u32,
    /// Base delay for exponential backoff.
    pub base_delay: Duration,
    /// Maximum delay cap for exponential backoff.
    pub max_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: MAX_TRANSIENT_RETRIES - 1,
            base_delay: Duration::from_millis(50),
            max_delay: Duration::from_secs(2),
        }
    }
}

/// Exponential backoff, no jitter: `base_delay * 2^attempt`, capped at
/// `max_delay`.
pub fn compute_delay(config: &RetryConfig, attempt: u32) -> Duration {
    let exp = 2u64.saturating_pow(attempt);
    let delay_ms = (config.base_delay.as_millis() as u64).saturating_mul(exp);
    Duration::from_millis(delay_ms.min(config.max_delay.as_millis() as u64))
}

/// Retries `op` while it returns a retryable [`ExpenseError`], up to
/// `config.max_retries` additional attempts with exponential backoff.
/// Non-retryable errors (anything but a retryable `TransientFault`) are
/// returned immediately.
pub async fn retry_transient<T, F, Fut>(config: &RetryConfig, mut op: F) -> Result<T, ExpenseError>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, ExpenseError>>,
{
    let max_attempts = config.max_retries + 1;
    for attempt in 1..=max_attempts {
        match op(attempt).await {
            Ok(value) => return Ok(value),
            Err(err) => {
                let is_last = attempt >= max_attempts;
                if !err.is_retryable() || is_last {
                    if is_last && err.is_retryable() {
                        warn!(target: "xpn.db.retry", attempt, "max retries exhausted");
                    }
                    return Err(err);
                }
                let delay = compute_delay(config, attempt - 1);
                debug!(target: "xpn.db.retry", attempt, delay_ms = delay.as_millis() as u64, error = %err, "retrying transient database error");
                tokio::time::sleep(delay).await;
            }
        }
    }
    unreachable!("loop always returns within max_attempts iterations")
}

/// Maps a raw `sqlx::Error` onto the engine's error taxonomy.
///
/// Connection drops, pool timeouts, and Postgres-reported deadlocks are
/// `TransientFault`s eligible for [`retry_transient`]; everything else
/// (constraint violations, malformed rows) is a hard `ServiceUnavailable`
/// since the caller has no way to repair it.
pub fn map_sqlx_err(err: sqlx::Error) -> ExpenseError {
    match &err {
        sqlx::Error::Io(_) | sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed => {
            ExpenseError::TransientFault {
                message: err.to_string(),
                attempt: 1,
                max_attempts: MAX_TRANSIENT_RETRIES,
            }
        }
        sqlx::Error::Database(db_err) if db_err.code().as_deref() == Some("40P01") => {
            // serialization_failure / deadlock_detected
            ExpenseError::TransientFault {
                message: err.to_string(),
                attempt: 1,
                max_attempts: MAX_TRANSIENT_RETRIES,
            }
        }
        _ => ExpenseError::ServiceUnavailable {
            service: "postgres",
            message: err.to_string(),
        },
    }
}

/// Converts a `sqlx::Error::RowNotFound` into the caller's
/// [`ExpenseError::NotFound`], leaving every other error mapped by
/// [`map_sqlx_err`].
pub fn map_sqlx_not_found(err: sqlx::Error, entity: &'static str, id: impl ToString) -> ExpenseError {
    match err {
        sqlx::Error::RowNotFound => ExpenseError::NotFound {
            entity,
            id: id.to_string(),
        },
        other => map_sqlx_err(other),
    }
}
