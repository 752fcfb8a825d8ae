//! Error types.
//!
//! Construction problems surface while clauses, schemas and queries are being
//! built. Evaluation problems surface from the lazy solution stream. Running
//! out of solutions is never an error.

use thiserror::Error;

use crate::clause::Var;
use crate::schema::Attr;

/// Result type using the crate-level [`Error`].
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Malformed combinator, schema or query usage, detected before evaluation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConstructionError {
    /// A type constraint was requested without any sample values.
    #[error("type constraint on {var} needs at least one sample value")]
    NoTypeSamples {
        /// The constrained variable
        var: Var,
    },

    /// An attribute name is not declared in the schema.
    #[error("unknown attribute {name:?} in schema {schema:?}")]
    UnknownAttribute {
        /// Schema that was searched
        schema: String,
        /// Requested attribute name
        name: String,
    },

    /// An attribute name was declared twice.
    #[error("attribute {name:?} declared twice in schema {schema:?}")]
    DuplicateAttribute {
        /// Schema being built
        schema: String,
        /// Offending attribute name
        name: String,
    },

    /// A projected variable is not mentioned by any clause of the query.
    #[error("variable {0} is not mentioned by the query")]
    UnknownVariable(Var),
}

/// Failure while pulling solutions from a running evaluation.
#[derive(Debug, Error)]
pub enum EvaluationError {
    /// A filter predicate returned an error.
    #[error("filter {name:?} failed")]
    Filter {
        /// Diagnostic name given to the filter
        name: String,
        /// Error raised by the predicate
        #[source]
        source: anyhow::Error,
    },
}

/// Rejected fact store mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum StoreError {
    /// The attribute was not issued by the store's schema.
    #[error("attribute {0} does not belong to this store's schema")]
    ForeignAttribute(Attr),
}

/// Rejected span configuration read or update.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AccessorError {
    /// A span whose start key is not strictly before its end key.
    #[error("invalid span {0}: start key must sort before end key")]
    InvalidSpan(String),

    /// A span scheduled for deletion does not exist in the store.
    #[error("expected to delete span {0}, found nothing stored there")]
    MissingSpan(String),

    /// Two entries would overlap after the update.
    #[error("overlapping spans {0} and {1}")]
    OverlappingSpans(String, String),

    /// Text form could not be parsed.
    #[error("malformed {kind} {input:?}")]
    Parse {
        /// What was being parsed
        kind: &'static str,
        /// Offending input
        input: String,
    },
}

/// Any error produced by this crate.
#[derive(Debug, Error)]
pub enum Error {
    /// See [`ConstructionError`].
    #[error(transparent)]
    Construction(#[from] ConstructionError),

    /// See [`EvaluationError`].
    #[error(transparent)]
    Evaluation(#[from] EvaluationError),

    /// See [`StoreError`].
    #[error(transparent)]
    Store(#[from] StoreError),

    /// See [`AccessorError`].
    #[error(transparent)]
    Accessor(#[from] AccessorError),
}
