//! Retry timing for failed steps
//!
//! The number of retries is a property of each step; this policy only
//! decides how long to wait before the next attempt is dispatched.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Wait between a failed attempt and its retry
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Backoff {
    /// Retry in the very next round
    #[default]
    None,
    Fixed { delay_ms: u64 },
    /// `initial_ms * 2^(retry - 1)`, capped at `max_ms`
    Exponential { initial_ms: u64, max_ms: u64 },
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    #[serde(default)]
    pub backoff: Backoff,
}

impl RetryPolicy {
    pub fn fixed(delay: Duration) -> Self {
        Self {
            backoff: Backoff::Fixed {
                delay_ms: duration_ms(delay),
            },
        }
    }

    pub fn exponential(initial: Duration, max: Duration) -> Self {
        Self {
            backoff: Backoff::Exponential {
                initial_ms: duration_ms(initial),
                max_ms: duration_ms(max),
            },
        }
    }

    /// Delay before retry number `retry` (1 for the first retry)
    pub fn delay_for(&self, retry: u32) -> Duration {
        if retry == 0 {
            return Duration::ZERO;
        }
        let ms = match self.backoff {
            Backoff::None => 0,
            Backoff::Fixed { delay_ms } => delay_ms,
            Backoff::Exponential { initial_ms, max_ms } => {
                let factor = 1u64.checked_shl(retry - 1).unwrap_or(u64::MAX);
                initial_ms.saturating_mul(factor).min(max_ms)
            }
        };
        Duration::from_millis(ms)
    }
}

fn duration_ms(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}
