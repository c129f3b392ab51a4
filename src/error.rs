//! Error kinds surfaced by the lifecycle operations.
//!
//! Operations return `anyhow::Result`; these kinds travel inside it so the
//! caller can downcast when it needs to tell them apart. Anything else in an
//! `anyhow` chain is a raw failure from the AWS API boundary.

use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// Nothing (or nothing unambiguous) matched the selection criteria
    #[error("no {kind} matching {criteria}")]
    NotFound { kind: &'static str, criteria: String },

    /// Resource exists but is not in a state that allows the operation
    #[error("{resource} {reason}")]
    PreconditionFailed { resource: String, reason: String },

    /// A wait exceeded its budget
    #[error("timed out after {timeout:?} waiting for {resource} to become {desired}")]
    Timeout {
        resource: String,
        desired: String,
        timeout: Duration,
    },
}

impl Error {
    pub fn not_found(kind: &'static str, criteria: impl Into<String>) -> Self {
        Error::NotFound {
            kind,
            criteria: criteria.into(),
        }
    }

    pub fn precondition(resource: impl Into<String>, reason: impl Into<String>) -> Self {
        Error::PreconditionFailed {
            resource: resource.into(),
            reason: reason.into(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound { .. })
    }
}

/// Look for one of our error kinds in an `anyhow` chain.
pub fn kind_of(error: &anyhow::Error) -> Option<&Error> {
    error.chain().find_map(|cause| cause.downcast_ref::<Error>())
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context;

    #[test]
    fn test_kind_survives_context() {
        let err: anyhow::Result<()> =
            Err(Error::not_found("instance", "environment=prod purpose=app").into());
        let err = err.context("locating instance").unwrap_err();
        assert!(kind_of(&err).unwrap().is_not_found());
    }

    #[test]
    fn test_provider_failure_has_no_kind() {
        let err = anyhow::anyhow!("InvalidInstanceID.NotFound");
        assert!(kind_of(&err).is_none());
    }
}
