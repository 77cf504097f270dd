// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Cancellable sleeps and retry-forever loops.
//!
//! The agent runs unattended, so transient failures are retried without a
//! cap. Every pause goes through [`Pacer::sleep`], which returns
//! [`AgentError::Cancelled`] as soon as the shutdown token fires.

use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{error, warn};

use crate::error::AgentError;

/// Consecutive decode failures tolerated before a retry loop gives up.
pub const DEFAULT_MAX_DECODE_ERRORS: u32 = 5;

#[derive(Debug, Clone)]
pub struct Pacer {
    shutdown: CancellationToken,
    max_decode_errors: u32,
}

impl Pacer {
    pub fn new(shutdown: CancellationToken) -> Self {
        Self {
            shutdown,
            max_decode_errors: DEFAULT_MAX_DECODE_ERRORS,
        }
    }

    pub fn with_max_decode_errors(mut self, max: u32) -> Self {
        self.max_decode_errors = max.max(1);
        self
    }

    pub fn max_decode_errors(&self) -> u32 {
        self.max_decode_errors
    }

    pub fn is_cancelled(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    pub fn check(&self) -> Result<(), AgentError> {
        if self.shutdown.is_cancelled() {
            return Err(AgentError::Cancelled);
        }
        Ok(())
    }

    /// Sleep for `duration` unless shutdown is requested first.
    pub async fn sleep(&self, duration: Duration) -> Result<(), AgentError> {
        tokio::select! {
            _ = tokio::time::sleep(duration) => Ok(()),
            _ = self.shutdown.cancelled() => Err(AgentError::Cancelled),
        }
    }

    /// Run `op` until it succeeds.
    ///
    /// Retryable errors are logged and retried after `interval`. Decode
    /// errors surface once they occur `max_decode_errors` times in a row;
    /// any other failure in between restarts the count.
    /// Any other error is returned immediately.
    pub async fn retry_forever<T, F, Fut>(
        &self,
        what: &str,
        interval: Duration,
        mut op: F,
    ) -> Result<T, AgentError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, AgentError>>,
    {
        let mut decode_failures = 0u32;
        let mut attempt = 0u64;

        loop {
            self.check()?;
            attempt += 1;

            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_decode() => {
                    decode_failures += 1;
                    if decode_failures >= self.max_decode_errors {
                        error!(what, attempt, error = %e, "Giving up after repeated malformed responses");
                        return Err(e);
                    }
                    warn!(what, attempt, decode_failures, error = %e, "Malformed response, retrying");
                }
                Err(e) if e.is_retryable() => {
                    decode_failures = 0;
                    warn!(what, attempt, error = %e, "Transient failure, retrying");
                }
                Err(e) => return Err(e),
            }

            self.sleep(interval).await?;
        }
    }
}
