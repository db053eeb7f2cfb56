//! Error types for identifier reservation.
//!
//! This module defines the central [`Error`] enum shared by every identifier
//! source, the cache tier and the façade. Variants fall into two families:
//!
//! - **Service errors**: the authority rejected or failed a call, a bulk job
//!   timed out, or a cache could not be locked in time. The operation that
//!   asked for identifiers must abort, but a later attempt may succeed.
//! - **Contract violations**: the caller asked for something that can never
//!   succeed (draining more identifiers than were reserved, a malformed
//!   partition). These are never retried; the caller has to be fixed.
//!
//! Use [`Error::is_contract_violation`] to tell the two apart.

use crate::{CacheKey, ComponentType, Namespace};
use core::fmt;
use core::time::Duration;

pub type Result<T, E = Error> = core::result::Result<T, E>;

/// Unified error type for identifier reservation and registration.
#[derive(Clone, thiserror::Error, Debug)]
#[non_exhaustive]
pub enum Error {
    /// The drain lock of a cache could not be acquired within the configured
    /// wait limit.
    #[error("Lock wait limit of {waited:?} exceeded on identifier cache {cache}")]
    LockTimeout { cache: CacheKey, waited: Duration },

    /// The identifier authority refused the request or answered with a non
    /// success HTTP status.
    #[error("Identifier authority error during {operation}: {reason}")]
    Authority { operation: String, reason: String },

    /// A bulk job reached the terminal failure status. `log` is the
    /// authority's log text, verbatim.
    #[error("Failed to {operation}. JobID:{job_id} due to {log}")]
    JobFailed {
        operation: String,
        job_id: String,
        log: String,
    },

    /// A bulk job did not reach a terminal status before the hard deadline.
    #[error("Timeout waiting for identifier service - {operation}. JobID:{job_id}")]
    JobTimeout { operation: String, job_id: String },

    /// The authority could not be reached (connect, TLS or I/O failure).
    #[error("Transport error during {operation}: {reason}")]
    Transport { operation: String, reason: String },

    /// The authority answered, but the body could not be understood.
    #[error("Malformed response during {operation}: {reason}")]
    MalformedResponse { operation: String, reason: String },

    /// Registration refused because some identifiers are not in an acceptable
    /// pre-state. The whole batch is rejected.
    #[error(
        "Can not register the following identifiers because they do not have status 'Available', 'Reserved' or 'Assigned': {}",
        DisplayOffenders(offenders)
    )]
    UnacceptableStatus { offenders: Vec<(String, String)> },

    /// Populating a reserved block failed; wraps the underlying cause.
    #[error("Unable to obtain SCTIDs for namespace {namespace}: {source}")]
    Reservation {
        namespace: Namespace,
        #[source]
        source: Box<Error>,
    },

    /// One or more component types failed to register. Every type was still
    /// attempted; all failures are listed.
    #[error("Failed to register assigned identifiers: {}", DisplayFailures(failures))]
    Registration {
        failures: Vec<(ComponentType, Error)>,
    },

    /// `get_id` was called on a reserved block with nothing left for the
    /// component type. Signals a mismatch between predicted and actual
    /// consumption inside one commit.
    #[error("No reserved {component_type} identifiers remain in block for namespace {namespace}")]
    BlockExhausted {
        component_type: ComponentType,
        namespace: Namespace,
    },

    /// The partition digits are not one of `00`, `01`, `02`, `10`, `11`, `12`.
    #[error("Invalid partition: {0:?}")]
    InvalidPartition(String),

    /// The value is not a well formed SCTID.
    #[error("Invalid SCTID {sctid:?}: {reason}")]
    InvalidSctid { sctid: String, reason: String },

    /// A configuration value is out of range.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl Error {
    /// Returns `true` for errors that indicate a bug in the caller and must
    /// never be retried.
    pub fn is_contract_violation(&self) -> bool {
        match self {
            Self::BlockExhausted { .. }
            | Self::InvalidPartition(_)
            | Self::InvalidSctid { .. }
            | Self::InvalidConfig(_) => true,
            Self::Reservation { source, .. } => source.is_contract_violation(),
            _ => false,
        }
    }
}

struct DisplayOffenders<'a>(&'a [(String, String)]);

impl fmt::Display for DisplayOffenders<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[")?;
        for (i, (sctid, status)) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{sctid} ({status})")?;
        }
        f.write_str("]")
    }
}

struct DisplayFailures<'a>(&'a [(ComponentType, Error)]);

impl fmt::Display for DisplayFailures<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, (component_type, err)) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str("; ")?;
            }
            write!(f, "{component_type}: {err}")?;
        }
        Ok(())
    }
}
