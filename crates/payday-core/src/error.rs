//! Error types for the rewards engine
//!
//! Only [`Rejection`] is meant to reach the UI: it carries a stable reason
//! string. Remote and cache failures are logged and degraded by the engine.

use thiserror::Error;

use crate::models::{Activity, Amount};

pub type Result<T> = std::result::Result<T, EngineError>;

/// A user action refused by validation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    #[error("No signed-in user")]
    NotSignedIn,

    #[error("Daily limit reached for {activity}")]
    QuotaExhausted { activity: Activity },

    #[error("{activity} is on cooldown until {until}")]
    OnCooldown { activity: Activity, until: u64 },

    #[error("Withdrawals unlock after earning {required} (earned {earned})")]
    BelowMinimumEarned { earned: Amount, required: Amount },

    #[error("Requested {requested} but only {available} is available")]
    InsufficientBalance { requested: Amount, available: Amount },

    #[error("Amount must be positive")]
    InvalidAmount,
}

impl Rejection {
    /// Machine-readable reason for UI layers.
    pub fn reason(&self) -> &'static str {
        match self {
            Self::NotSignedIn => "not_signed_in",
            Self::QuotaExhausted { .. } => "quota_exhausted",
            Self::OnCooldown { .. } => "on_cooldown",
            Self::BelowMinimumEarned { .. } => "below_minimum_earned",
            Self::InsufficientBalance { .. } => "insufficient_balance",
            Self::InvalidAmount => "invalid_amount",
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RemoteError {
    #[error("Remote store unavailable: {0}")]
    Unavailable(String),

    #[error("Remote request timed out")]
    Timeout,

    #[error("Remote store rejected the request: {0}")]
    Rejected(String),
}

#[derive(Error, Debug)]
pub enum CacheError {
    #[error("Cache I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Cache serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[derive(Error, Debug)]
pub enum EngineError {
    #[error(transparent)]
    Rejected(#[from] Rejection),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl EngineError {
    pub fn rejection(&self) -> Option<&Rejection> {
        match self {
            Self::Rejected(r) => Some(r),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejection_reasons_are_stable() {
        assert_eq!(Rejection::NotSignedIn.reason(), "not_signed_in");
        let r = Rejection::OnCooldown {
            activity: Activity::Wheel,
            until: 42,
        };
        assert_eq!(r.reason(), "on_cooldown");
        assert_eq!(r.to_string(), "wheel is on cooldown until 42");
    }

    #[test]
    fn test_engine_error_exposes_rejection() {
        let err: EngineError = Rejection::InvalidAmount.into();
        assert_eq!(err.rejection(), Some(&Rejection::InvalidAmount));
        let err = EngineError::Config("bad".into());
        assert!(err.rejection().is_none());
    }
}
