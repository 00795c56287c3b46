//! Error types for the Tofan operator
//!
//! Errors carry structured context (resource names, paths, operations) so a
//! failed reconcile can be diagnosed from a single log line. The variants map
//! one-to-one onto the ways a test case can fail:
//!
//! - `NotFound`: a referenced template or resource is absent (retried next cycle)
//! - `Decode`: a manifest or override value is not valid structured data (pair skipped)
//! - `PathNotFound`: an override path cannot be walked (pair skipped)
//! - `StoreWrite`: create/update/delete against the API server failed (sync aborted)
//! - `Conflict`: a resourceVersion mismatch on write (retried transparently)

use thiserror::Error;

/// Default context value when no specific context is available
pub const UNKNOWN_CONTEXT: &str = "unknown";

/// Main error type for Tofan operations
#[derive(Debug, Error)]
pub enum Error {
    /// Kubernetes API error that has not been classified further
    #[error("kubernetes error: {source}")]
    Kube {
        /// The underlying kube-rs error
        #[from]
        source: kube::Error,
    },

    /// A referenced object does not exist
    #[error("{kind} '{name}' not found")]
    NotFound {
        /// Kind of the missing object (e.g. "ObjectTemplate")
        kind: String,
        /// Namespaced name of the missing object
        name: String,
    },

    /// Bytes could not be decoded into structured data
    #[error("decode error [{context}]: {message}")]
    Decode {
        /// What was being decoded (e.g. "template", "value")
        context: String,
        /// Description of the decode failure
        message: String,
    },

    /// An override path could not be applied to a template
    #[error("path not found: {path}")]
    PathNotFound {
        /// The dot-delimited path that failed
        path: String,
    },

    /// A write against the store failed
    #[error("store {operation} failed for {resource}: {message}")]
    StoreWrite {
        /// Operation that failed (create, replace, delete-collection, patch)
        operation: String,
        /// Resource identity (kind/namespace/name or selector)
        resource: String,
        /// Underlying failure
        message: String,
    },

    /// A write was rejected because the object changed underneath it
    #[error("conflict writing {resource}: {message}")]
    Conflict {
        /// Resource identity
        resource: String,
        /// Message returned by the API server
        message: String,
    },

    /// A spec or template is structurally invalid
    #[error("validation error for {resource}: {message}")]
    Validation {
        /// Resource with invalid configuration
        resource: String,
        /// Description of what's invalid
        message: String,
    },

    /// Internal/operational error
    #[error("internal error [{context}]: {message}")]
    Internal {
        /// Description of what failed
        message: String,
        /// Where the error occurred (e.g. "reconciler", "watcher")
        context: String,
    },
}

impl Error {
    /// Create a not-found error for the given kind and name
    pub fn not_found(kind: impl Into<String>, name: impl Into<String>) -> Self {
        Self::NotFound {
            kind: kind.into(),
            name: name.into(),
        }
    }

    /// Create a decode error with the given context
    pub fn decode(context: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Decode {
            context: context.into(),
            message: msg.into(),
        }
    }

    /// Create a path error for an override path
    pub fn path_not_found(path: impl Into<String>) -> Self {
        Self::PathNotFound { path: path.into() }
    }

    /// Create a validation error without resource context
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            resource: UNKNOWN_CONTEXT.to_string(),
            message: msg.into(),
        }
    }

    /// Create a validation error for a specific resource
    pub fn validation_for(resource: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Validation {
            resource: resource.into(),
            message: msg.into(),
        }
    }

    /// Create an internal error without specific context
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal {
            message: msg.into(),
            context: UNKNOWN_CONTEXT.to_string(),
        }
    }

    /// Create an internal error with context
    pub fn internal_with_context(context: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Internal {
            message: msg.into(),
            context: context.into(),
        }
    }

    /// Classify a failed write.
    ///
    /// A 409 becomes `Conflict` so callers can retry with a fresh read; anything
    /// else becomes `StoreWrite`.
    pub fn store_write(
        operation: impl Into<String>,
        resource: impl Into<String>,
        source: kube::Error,
    ) -> Self {
        match source {
            kube::Error::Api(ae) if ae.code == 409 => Self::Conflict {
                resource: resource.into(),
                message: ae.message,
            },
            other => Self::StoreWrite {
                operation: operation.into(),
                resource: resource.into(),
                message: other.to_string(),
            },
        }
    }

    /// True for resourceVersion conflicts
    pub fn is_conflict(&self) -> bool {
        match self {
            Error::Conflict { .. } => true,
            Error::Kube {
                source: kube::Error::Api(ae),
            } => ae.code == 409,
            _ => false,
        }
    }

    /// True when the referenced object does not exist
    pub fn is_not_found(&self) -> bool {
        match self {
            Error::NotFound { .. } => true,
            Error::Kube {
                source: kube::Error::Api(ae),
            } => ae.code == 404,
            _ => false,
        }
    }

    /// Check if this error is retryable
    ///
    /// Decode, path, and validation errors need a spec change and are not
    /// retryable. Missing objects, store failures, and conflicts may resolve
    /// on their own.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Kube { source } => !matches!(
                source,
                kube::Error::Api(ae) if (400..500).contains(&ae.code) && ae.code != 404 && ae.code != 409
            ),
            Error::NotFound { .. } => true,
            Error::Decode { .. } => false,
            Error::PathNotFound { .. } => false,
            Error::StoreWrite { .. } => true,
            Error::Conflict { .. } => true,
            Error::Validation { .. } => false,
            Error::Internal { .. } => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn api_error(code: u16, message: &str) -> kube::Error {
        kube::Error::Api(kube::error::ErrorResponse {
            status: "Failure".to_string(),
            message: message.to_string(),
            reason: "Test".to_string(),
            code,
        })
    }

    /// Story: a missing template is reported with its kind and name and is
    /// retried on the next cycle
    #[test]
    fn story_missing_template_is_retryable() {
        let err = Error::not_found("ObjectTemplate", "default/web");
        assert_eq!(err.to_string(), "ObjectTemplate 'default/web' not found");
        assert!(err.is_not_found());
        assert!(err.is_retryable());
    }

    /// Story: malformed override values are skipped, never retried
    #[test]
    fn story_decode_errors_are_permanent() {
        let err = Error::decode("value", "expected value at line 1 column 1");
        assert!(err.to_string().contains("[value]"));
        assert!(!err.is_retryable());

        let err = Error::path_not_found("spec..replicas");
        assert!(err.to_string().contains("spec..replicas"));
        assert!(!err.is_retryable());
    }

    /// Story: a 409 on write becomes a conflict, other failures become store errors
    #[test]
    fn story_write_failures_are_classified() {
        let err = Error::store_write("replace", "TestCase default/tc", api_error(409, "stale"));
        assert!(err.is_conflict());
        assert!(matches!(err, Error::Conflict { ref message, .. } if message == "stale"));

        let err = Error::store_write("create", "Deployment default/web", api_error(500, "boom"));
        assert!(!err.is_conflict());
        match &err {
            Error::StoreWrite {
                operation,
                resource,
                ..
            } => {
                assert_eq!(operation, "create");
                assert_eq!(resource, "Deployment default/web");
            }
            _ => panic!("Expected StoreWrite variant"),
        }
        assert!(err.is_retryable());
    }

    #[test]
    fn raw_kube_errors_classify_by_status_code() {
        assert!(Error::from(api_error(404, "gone")).is_not_found());
        assert!(Error::from(api_error(409, "stale")).is_conflict());
        assert!(Error::from(api_error(409, "stale")).is_retryable());
        assert!(!Error::from(api_error(422, "invalid")).is_retryable());
        assert!(Error::from(api_error(503, "unavailable")).is_retryable());
    }

    #[test]
    fn validation_and_internal_use_default_context() {
        match Error::validation("bad") {
            Error::Validation { resource, .. } => assert_eq!(resource, UNKNOWN_CONTEXT),
            _ => panic!("Expected Validation variant"),
        }
        let err = Error::internal_with_context("watcher", "task panicked");
        assert!(err.to_string().contains("[watcher]"));
        assert!(err.is_retryable());
        assert!(!Error::validation_for("tc", "no kind").is_retryable());
    }
}
