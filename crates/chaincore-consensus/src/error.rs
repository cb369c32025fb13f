//! Consensus error taxonomy: kind plus a ban score, matching the
//! propagation policy where failures are classified once and carried to the
//! caller rather than inspected ad hoc at each call site.

use thiserror::Error;

/// Ban-score-bearing verification failure. `score` of 100 means the peer
/// that sent the offending block should be banned outright; lower scores
/// accumulate. Non-consensus faults (`Io`, `Corruption`) carry no score and
/// are not peer-attributable.
#[derive(Debug, Error)]
pub enum VerifyError {
    #[error("invalid: {reason}")]
    Invalid { reason: String, score: u8 },

    #[error("checkpoint mismatch at height {height}")]
    Checkpoint { height: u32 },

    #[error("obsolete: {reason}")]
    Obsolete { reason: String },

    #[error("duplicate (malicious={malicious})")]
    Duplicate { malicious: bool },

    #[error("malformed: {reason}")]
    Malformed { reason: String },

    #[error("io error: {0}")]
    Io(String),

    #[error("corruption: {0}")]
    Corruption(String),
}

impl VerifyError {
    pub fn invalid(reason: impl Into<String>) -> Self {
        VerifyError::Invalid {
            reason: reason.into(),
            score: 100,
        }
    }

    pub fn invalid_scored(reason: impl Into<String>, score: u8) -> Self {
        VerifyError::Invalid {
            reason: reason.into(),
            score,
        }
    }

    pub fn malformed(reason: impl Into<String>) -> Self {
        VerifyError::Malformed {
            reason: reason.into(),
        }
    }

    pub fn obsolete(reason: impl Into<String>) -> Self {
        VerifyError::Obsolete {
            reason: reason.into(),
        }
    }

    pub fn duplicate(malicious: bool) -> Self {
        VerifyError::Duplicate { malicious }
    }

    /// Ban score for this failure, or `None` for non-consensus faults that
    /// are not attributable to a peer.
    pub fn score(&self) -> Option<u8> {
        match self {
            VerifyError::Invalid { score, .. } => Some(*score),
            VerifyError::Checkpoint { .. } => Some(100),
            VerifyError::Obsolete { .. } => Some(0),
            VerifyError::Duplicate { malicious } => Some(if *malicious { 100 } else { 0 }),
            VerifyError::Malformed { .. } => Some(10),
            VerifyError::Io(_) | VerifyError::Corruption(_) => None,
        }
    }

    /// Whether this failure should mark the offending hash permanently
    /// invalid. Malleated wire-parse failures do not: they may simply be a
    /// corrupted copy of an otherwise valid block.
    pub fn marks_invalid(&self) -> bool {
        !matches!(self, VerifyError::Malformed { .. } | VerifyError::Io(_) | VerifyError::Corruption(_))
    }
}

pub type VerifyResult<T> = Result<T, VerifyError>;
