//! Store error taxonomy
//!
//! Separates transport failures, which the controller retries on the next
//! tick or watch reconnect, from store verdicts about a specific resource
//! (missing, already existing, rejected write, undecodable payload), so
//! callers can branch on the verdict instead of string-matching messages.

use thiserror::Error;

/// Result type alias for store operations
pub type Result<T> = std::result::Result<T, StoreError>;

/// Errors returned by resource store implementations
#[derive(Debug, Error)]
pub enum StoreError {
    /// The store could not be reached or dropped the connection
    #[error("Store request failed: {0}")]
    Transport(#[from] reqwest::Error),

    /// The store rejected a request addressing the given resource
    #[error("Store replied {status} for {resource}: {message}")]
    Rejected {
        /// HTTP status code reported by the store
        status: u16,
        /// The resource the request addressed, e.g. `workflows in jx`
        resource: String,
        /// Error body returned by the store
        message: String,
    },

    /// No resource of this kind and name exists
    #[error("{kind} {name} not found")]
    NotFound { kind: &'static str, name: String },

    /// A create raced another writer; the resource is already there
    #[error("{kind} {name} already exists")]
    AlreadyExists { kind: &'static str, name: String },

    /// A response body or watch event did not decode as the expected
    /// resource shape
    #[error("Failed to decode {what}: {reason}")]
    Decode { what: String, reason: String },
}

impl StoreError {
    /// A rejected request, from the store's status code and error body
    pub fn rejected(status: u16, resource: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Rejected {
            status,
            resource: resource.into(),
            message: message.into(),
        }
    }

    /// A missing resource, reported by kind and name
    pub fn not_found(kind: &'static str, name: impl Into<String>) -> Self {
        Self::NotFound {
            kind,
            name: name.into(),
        }
    }

    /// A resource that already exists, reported by kind and name
    pub fn already_exists(kind: &'static str, name: impl Into<String>) -> Self {
        Self::AlreadyExists {
            kind,
            name: name.into(),
        }
    }

    /// An undecodable payload
    pub fn decode(what: impl Into<String>, reason: impl ToString) -> Self {
        Self::Decode {
            what: what.into(),
            reason: reason.to_string(),
        }
    }

    /// Whether the store reported the resource as missing
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
            || matches!(self, Self::Rejected { status: 404, .. })
    }

    /// Whether the store reported the resource as already existing
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::AlreadyExists { .. })
            || matches!(self, Self::Rejected { status: 409, .. })
    }
}
