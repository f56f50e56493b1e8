//! 💀 The ways a write can go wrong, typed so callers can tell them apart.
//!
//! Two flavors of sadness: we never reached the cluster ([`WriteError::Connection`]),
//! or we reached it and the bulk request did not fully land ([`WriteError::Submission`]).
//! A NaN sample is not on this list. A NaN sample is a skip, not a tragedy.

use thiserror::Error;

/// 💀 The error a `write` call hands back to its caller.
#[derive(Debug, Error)]
pub enum WriteError {
    /// 📡 No session could be opened. Nothing was written.
    #[error("💀 could not open a session to '{endpoint}': {reason}")]
    Connection { endpoint: String, reason: String },

    /// 📦 The bulk request failed, came back empty, ran out of time, or left actions behind.
    #[error("💀 bulk write of {documents} documents into index '{index}' failed: {cause}")]
    Submission {
        index: String,
        documents: usize,
        cause: SubmissionCause,
    },
}

/// 🔍 Why a bulk submission is considered failed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SubmissionCause {
    /// The transport failed or the cluster answered with a non-2xx status.
    #[error("the cluster rejected the bulk request: {0}")]
    Rejected(String),

    #[error("the bulk request came back without a usable response")]
    NoResponse,

    #[error("the deadline passed before the cluster answered")]
    DeadlineExceeded,

    /// Fewer actions were acknowledged than were submitted.
    #[error(
        "{pending} bulk actions were left unacknowledged (first failure: {})",
        .first_failure.as_deref().unwrap_or("none reported")
    )]
    Unacknowledged {
        pending: usize,
        first_failure: Option<String>,
    },
}
