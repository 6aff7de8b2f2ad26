//! Resend timing.
//!
//! BattlEye has no acknowledgement of its own beyond the reply to a request,
//! so every cached request is re-sent until a reply arrives or the retry
//! budget runs out.  A periodic sweep (every [`ResendConfig::sweep_interval`])
//! asks [`ResendConfig::decide`] what to do with each pending request.
//!
//! The schedule is linear and measured from the *original* send time:
//!
//! ```text
//!   t = 0        send
//!   t = 1 × I    resend #1
//!   t = 2 × I    resend #2
//!   ...
//!   t = N × I    resend #N           (N = max_resends)
//!   t = (N+1) I  give up → disconnect
//! ```

use std::time::Duration;

use thiserror::Error;

/// Adjustable resend parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResendConfig {
    /// Spacing of the resend schedule.
    pub resend_interval: Duration,
    /// Period of the sweep that checks pending requests.
    pub sweep_interval: Duration,
    /// Retransmissions attempted before the connection is declared lost.
    pub max_resends: u32,
}

impl Default for ResendConfig {
    fn default() -> Self {
        Self {
            resend_interval: Duration::from_millis(2000),
            sweep_interval: Duration::from_millis(100),
            max_resends: 4,
        }
    }
}

/// A [`ResendConfig`] the client cannot run with.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigError {
    #[error("resend interval must be non-zero")]
    ZeroResendInterval,
    #[error("sweep interval must be non-zero")]
    ZeroSweepInterval,
}

/// Outcome of checking one pending request during a sweep.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResendAction {
    /// Not due yet.
    Wait,
    /// Due: retransmit and bump the resend count.
    Resend,
    /// Due, but the budget is spent.
    GiveUp,
}

impl ResendConfig {
    /// Reject settings the event loop cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.resend_interval.is_zero() {
            return Err(ConfigError::ZeroResendInterval);
        }
        if self.sweep_interval.is_zero() {
            return Err(ConfigError::ZeroSweepInterval);
        }
        Ok(())
    }

    /// Deadline of the next action for a request resent `resend_count` times.
    /// Saturates at `Duration::MAX`.
    pub fn deadline(&self, resend_count: u32) -> Duration {
        self.resend_interval
            .saturating_mul(resend_count.saturating_add(1))
    }

    /// Decide what to do with a request that has been pending for `elapsed`.
    pub fn decide(&self, elapsed: Duration, resend_count: u32) -> ResendAction {
        if elapsed < self.deadline(resend_count) {
            ResendAction::Wait
        } else if resend_count >= self.max_resends {
            ResendAction::GiveUp
        } else {
            ResendAction::Resend
        }
    }

    /// Total time from first send until a silent request is abandoned.
    pub fn give_up_after(&self) -> Duration {
        self.deadline(self.max_resends)
    }
}
