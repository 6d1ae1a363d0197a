//! Mapper error types
//!
//! Error definitions with transient/permanent classification.

use thiserror::Error;

/// LDAP result code: noSuchAttribute.
pub const RC_NO_SUCH_ATTRIBUTE: u32 = 16;
/// LDAP result code: attributeOrValueExists.
pub const RC_ATTRIBUTE_OR_VALUE_EXISTS: u32 = 20;
/// LDAP result code: noSuchObject.
pub const RC_NO_SUCH_OBJECT: u32 = 32;
/// LDAP result code: busy.
pub const RC_BUSY: u32 = 51;
/// LDAP result code: unavailable.
pub const RC_UNAVAILABLE: u32 = 52;
/// LDAP result code: unwillingToPerform.
pub const RC_UNWILLING_TO_PERFORM: u32 = 53;
/// LDAP result code: entryAlreadyExists.
pub const RC_ENTRY_ALREADY_EXISTS: u32 = 68;

/// Error that can occur while mapping entities or talking to the directory.
#[derive(Debug, Error)]
pub enum OrmError {
    // Connection errors
    /// Failed to open the transport or to bind after all retries.
    #[error("connection failed: {message}")]
    ConnectionFailed {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// StartTLS negotiation failed. Never retried.
    #[error("TLS negotiation failed: {message}")]
    TlsNegotiationFailed {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Session configuration is invalid.
    #[error("invalid configuration: {message}")]
    InvalidConfiguration { message: String },

    // Local precondition failures
    /// Filter expression is not a structured tree.
    #[error("invalid filter: {message}")]
    InvalidFilter { message: String },

    /// A MUST field is unset.
    #[error("missing MUST attribute '{field}' on {object_class}")]
    MissingMustAttribute { object_class: String, field: String },

    /// No unique identifier declared, or its value is empty.
    #[error("missing unique identifier on {object_class}: {message}")]
    MissingUniqueIdentifier {
        object_class: String,
        message: String,
    },

    /// Entity metadata declaration is inconsistent.
    #[error("invalid metadata for {object_class}: {message}")]
    InvalidMetadata {
        object_class: String,
        message: String,
    },

    /// Field name is not declared on the entity type.
    #[error("unknown field '{field}' on {object_class}")]
    UnknownField { object_class: String, field: String },

    /// A value could not be converted to the field's type.
    #[error("invalid value for field '{field}': {message}")]
    InvalidValue { field: String, message: String },

    /// Timestamp string could not be decoded.
    #[error("invalid timestamp '{value}': {message}")]
    InvalidTimestamp { value: String, message: String },

    /// Template rendering failed.
    #[error("template error: {message}")]
    Template { message: String },

    // Directory-side failures
    /// Add, modify, delete or search failed on the server.
    #[error("{operation} failed on '{dn}' (code {code}): {message}")]
    DirectoryOperation {
        operation: &'static str,
        dn: String,
        code: u32,
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Rename (modify DN) failed.
    #[error("rename of '{dn}' failed: {message}")]
    Rename { dn: String, message: String },

    /// Existence check matched more than one entry.
    #[error("{count} entries found for unique identifier {attribute}={value}")]
    MultipleEntitiesFound {
        attribute: String,
        value: String,
        count: usize,
    },

    /// Sequence entry is missing or malformed.
    #[error("invalid sequence entry '{dn}': {message}")]
    InvalidSequence { dn: String, message: String },
}

impl OrmError {
    /// Check if this error is transient and the call may succeed later.
    ///
    /// `ConnectionFailed` is raised once connect retries are exhausted and
    /// counts as permanent.
    pub fn is_transient(&self) -> bool {
        matches!(self.result_code(), Some(RC_BUSY | RC_UNAVAILABLE))
    }

    /// Check if this error is permanent and retry won't help.
    pub fn is_permanent(&self) -> bool {
        !self.is_transient()
    }

    /// Directory result code carried by this error, if any.
    pub fn result_code(&self) -> Option<u32> {
        match self {
            OrmError::DirectoryOperation { code, .. } => Some(*code),
            _ => None,
        }
    }

    /// Whether the server reported that the attribute (or value) is absent.
    pub fn is_no_such_attribute(&self) -> bool {
        self.result_code() == Some(RC_NO_SUCH_ATTRIBUTE)
    }

    /// Get an error code for classification.
    pub fn error_code(&self) -> &'static str {
        match self {
            OrmError::ConnectionFailed { .. } => "CONNECTION_FAILED",
            OrmError::TlsNegotiationFailed { .. } => "TLS_FAILED",
            OrmError::InvalidConfiguration { .. } => "INVALID_CONFIG",
            OrmError::InvalidFilter { .. } => "INVALID_FILTER",
            OrmError::MissingMustAttribute { .. } => "MISSING_MUST_ATTRIBUTE",
            OrmError::MissingUniqueIdentifier { .. } => "MISSING_UNIQUE_IDENTIFIER",
            OrmError::InvalidMetadata { .. } => "INVALID_METADATA",
            OrmError::UnknownField { .. } => "UNKNOWN_FIELD",
            OrmError::InvalidValue { .. } => "INVALID_VALUE",
            OrmError::InvalidTimestamp { .. } => "INVALID_TIMESTAMP",
            OrmError::Template { .. } => "TEMPLATE_ERROR",
            OrmError::DirectoryOperation { .. } => "DIRECTORY_OPERATION_FAILED",
            OrmError::Rename { .. } => "RENAME_FAILED",
            OrmError::MultipleEntitiesFound { .. } => "MULTIPLE_ENTITIES_FOUND",
            OrmError::InvalidSequence { .. } => "INVALID_SEQUENCE",
        }
    }

    // Convenience constructors

    /// Create a connection failed error.
    pub fn connection_failed(message: impl Into<String>) -> Self {
        OrmError::ConnectionFailed {
            message: message.into(),
            source: None,
        }
    }

    /// Create a connection failed error with source.
    pub fn connection_failed_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        OrmError::ConnectionFailed {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create a TLS negotiation error with source.
    pub fn tls_failed_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        OrmError::TlsNegotiationFailed {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create an invalid filter error.
    pub fn invalid_filter(message: impl Into<String>) -> Self {
        OrmError::InvalidFilter {
            message: message.into(),
        }
    }

    /// Create a directory operation error from a server result.
    pub fn directory(
        operation: &'static str,
        dn: impl Into<String>,
        code: u32,
        message: impl Into<String>,
    ) -> Self {
        OrmError::DirectoryOperation {
            operation,
            dn: dn.into(),
            code,
            message: message.into(),
            source: None,
        }
    }

    /// Create a directory operation error for a transport-level failure.
    pub fn directory_with_source(
        operation: &'static str,
        dn: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        OrmError::DirectoryOperation {
            operation,
            dn: dn.into(),
            code: 0,
            message: source.to_string(),
            source: Some(Box::new(source)),
        }
    }

    /// Create an invalid value error.
    pub fn invalid_value(field: impl Into<String>, message: impl Into<String>) -> Self {
        OrmError::InvalidValue {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// Result type for mapper operations.
pub type OrmResult<T> = Result<T, OrmError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_errors() {
        let err = OrmError::directory("search", "dc=example,dc=com", RC_BUSY, "busy");
        assert!(err.is_transient());
        assert!(!err.is_permanent());
        let err = OrmError::directory("modify", "dc=example,dc=com", RC_UNAVAILABLE, "unavailable");
        assert!(err.is_transient());
    }

    #[test]
    fn test_exhausted_connection_is_permanent() {
        let err = OrmError::connection_failed("bind exhausted");
        assert!(!err.is_transient());
        assert!(err.is_permanent());
    }

    #[test]
    fn test_permanent_errors() {
        let permanent_errors = vec![
            OrmError::invalid_filter("not a tree"),
            OrmError::MissingMustAttribute {
                object_class: "person".to_string(),
                field: "sn".to_string(),
            },
            OrmError::directory("add", "cn=x,dc=example,dc=com", RC_ENTRY_ALREADY_EXISTS, "exists"),
            OrmError::MultipleEntitiesFound {
                attribute: "uid".to_string(),
                value: "jdoe".to_string(),
                count: 2,
            },
        ];

        for err in permanent_errors {
            assert!(
                err.is_permanent(),
                "Expected {} to be permanent",
                err.error_code()
            );
        }
    }

    #[test]
    fn test_missing_must_attribute_message() {
        let err = OrmError::MissingMustAttribute {
            object_class: "person".to_string(),
            field: "sn".to_string(),
        };
        assert_eq!(err.to_string(), "missing MUST attribute 'sn' on person");
        assert_eq!(err.error_code(), "MISSING_MUST_ATTRIBUTE");
    }

    #[test]
    fn test_result_code_helpers() {
        let err = OrmError::directory("modify", "cn=x", RC_NO_SUCH_ATTRIBUTE, "no such attribute");
        assert_eq!(err.result_code(), Some(16));
        assert!(err.is_no_such_attribute());

        let err = OrmError::invalid_filter("x");
        assert_eq!(err.result_code(), None);
        assert!(!err.is_no_such_attribute());
    }

    #[test]
    fn test_error_with_source() {
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused");
        let err = OrmError::connection_failed_with_source("connect to ldap://localhost", io);
        assert!(std::error::Error::source(&err).is_some());
        assert!(err.to_string().contains("ldap://localhost"));
    }
}
