//! Generated asset lifecycle.
//!
//! ```text
//! waiting ─► scheduled ─► processing ─┬─► complete
//!                                     ├─► failed:<code>
//!                                     └─► delegated ─► complete
//! ```
//!
//! Statuses only move forward. The persisted form is the lowercase name,
//! with failures written as `failed:<code>`.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::ErrorCode;

const FAILED_PREFIX: &str = "failed:";

/// Status of a generated asset.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum AssetStatus {
    /// Persisted and eligible for the sweep.
    Waiting,
    /// Admitted against a kind's budget and queued for a worker.
    Scheduled,
    /// A worker has picked it up.
    Processing,
    /// Rendered and uploaded.
    Complete,
    /// Rendering failed with the attached code.
    Failed(ErrorCode),
    /// Handed to an external service that completes it out of band.
    Delegated,
}

impl AssetStatus {
    /// Shorthand for `Failed(code.into())`.
    pub fn failed(code: impl Into<ErrorCode>) -> Self {
        Self::Failed(code.into())
    }

    /// Returns true for statuses that release scheduler capacity.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete | Self::Failed(_))
    }

    /// Returns true while the asset holds a slot in its kind's active set.
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Scheduled | Self::Processing)
    }

    /// Returns the failure code, if any.
    pub fn error_code(&self) -> Option<&ErrorCode> {
        match self {
            Self::Failed(code) => Some(code),
            _ => None,
        }
    }

    /// Checks whether moving from `self` to `next` follows a forward edge.
    ///
    /// Re-asserting the current status is allowed so that writers may
    /// persist attribute changes without moving the state machine.
    pub fn can_transition_to(&self, next: &AssetStatus) -> bool {
        if self == next {
            return true;
        }
        match (self, next) {
            (Self::Waiting, Self::Scheduled) => true,
            (Self::Scheduled, Self::Processing) => true,
            (Self::Processing, Self::Complete | Self::Failed(_) | Self::Delegated) => true,
            (Self::Delegated, Self::Complete | Self::Failed(_)) => true,
            _ => false,
        }
    }

    /// Label used for metrics; failures collapse to `failed`.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Waiting => "waiting",
            Self::Scheduled => "scheduled",
            Self::Processing => "processing",
            Self::Complete => "complete",
            Self::Failed(_) => "failed",
            Self::Delegated => "delegated",
        }
    }
}

impl Default for AssetStatus {
    fn default() -> Self {
        Self::Waiting
    }
}

impl fmt::Display for AssetStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Failed(code) => write!(f, "{}{}", FAILED_PREFIX, code),
            other => f.write_str(other.label()),
        }
    }
}

/// Error returned when a persisted status string is not recognised.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unknown asset status '{0}'")]
pub struct ParseStatusError(pub String);

impl FromStr for AssetStatus {
    type Err = ParseStatusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "waiting" => Ok(Self::Waiting),
            "scheduled" => Ok(Self::Scheduled),
            "processing" => Ok(Self::Processing),
            "complete" => Ok(Self::Complete),
            "delegated" => Ok(Self::Delegated),
            other => match other.strip_prefix(FAILED_PREFIX) {
                Some(code) if !code.is_empty() => Ok(Self::Failed(ErrorCode::from(code))),
                _ => Err(ParseStatusError(other.to_string())),
            },
        }
    }
}

impl Serialize for AssetStatus {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for AssetStatus {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}
