use std::future::Future;
use std::time::{Duration, Instant};

use crate::error::{ChannelError, Result, TimeoutPhase};

/// A fixed deadline that composed operations draw their budgets from.
#[derive(Debug, Clone, Copy)]
pub struct TimeoutHelper {
    original: Duration,
    deadline: Option<Instant>,
}

impl TimeoutHelper {
    /// Start the clock. A timeout too large to represent never expires.
    pub fn new(timeout: Duration) -> Self {
        Self {
            original: timeout,
            deadline: Instant::now().checked_add(timeout),
        }
    }

    /// Build from a signed millisecond count; negative values are rejected.
    pub fn from_millis(millis: i64) -> Result<Self> {
        let millis = u64::try_from(millis).map_err(|_| {
            ChannelError::argument("timeout", format!("must be non-negative, got {millis}ms"))
        })?;
        Ok(Self::new(Duration::from_millis(millis)))
    }

    pub fn original_timeout(&self) -> Duration {
        self.original
    }

    /// Time left before the deadline, zero once it has passed.
    pub fn remaining(&self) -> Duration {
        match self.deadline {
            Some(deadline) => deadline.saturating_duration_since(Instant::now()),
            None => Duration::MAX,
        }
    }

    pub fn is_expired(&self) -> bool {
        self.remaining().is_zero()
    }

    /// Run `operation` within the remaining budget; expiry is reported as a
    /// timeout of `phase` carrying the original timeout.
    pub async fn run<T, F>(&self, phase: TimeoutPhase, operation: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        match tokio::time::timeout(self.remaining(), operation).await {
            Ok(result) => result,
            Err(_) => {
                tracing::debug!(%phase, timeout = ?self.original, "operation timed out");
                Err(ChannelError::timeout(phase, self.original))
            }
        }
    }
}
