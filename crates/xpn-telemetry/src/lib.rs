// SPDX-License-Identifier: MIT OR Apache-2.0
//! Structured logging initialization and operation timing.
//!
//! Separate from `xpn-metering`: this crate is the ambient "how do I
//! log/time things" layer; `xpn-metering` is the business aggregation
//! over recorded `TierUsageLog` rows.

#![deny(unsafe_code)]
#![warn(missing_docs)]

use std::time::Instant;
use tracing_subscriber::EnvFilter;

/// Initializes the global `tracing` subscriber.
///
/// `debug` widens the default filter to every crate's debug-level
/// spans; otherwise the engine logs at `info` and above.
pub fn init_tracing(debug: bool) {
    let filter = if debug {
        EnvFilter::new("xpn=debug,xpn_service=debug,xpn_matching=debug")
    } else {
        EnvFilter::new("xpn=info")
    };
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

/// Wraps a monotonic clock around one tier-router `resolve` call.
/// Latency is observed with a monotonic clock around the entire
/// resolve call and includes all tier attempts actually executed.
#[derive(Debug)]
pub struct OperationTimer {
    started: Instant,
}

impl Default for OperationTimer {
    fn default() -> Self {
        Self::start()
    }
}

impl OperationTimer {
    /// Starts a new timer.
    pub fn start() -> Self {
        Self {
            started: Instant::now(),
        }
    }

    /// Elapsed time in whole milliseconds since [`OperationTimer::start`].
    pub fn elapsed_ms(&self) -> u64 {
        self.started.elapsed().as_millis() as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread::sleep;
    use std::time::Duration;

    #[test]
    fn elapsed_ms_is_monotonically_increasing() {
        let timer = OperationTimer::start();
        let first = timer.elapsed_ms();
        sleep(Duration::from_millis(5));
        let second = timer.elapsed_ms();
        assert!(second >= first);
    }

    #[test]
    fn init_tracing_does_not_panic_when_called_twice() {
        init_tracing(false);
        init_tracing(true);
    }
}
