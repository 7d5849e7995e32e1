use std::path::PathBuf;

use thiserror::Error;

/// Main application error type that encompasses all fatal failure modes
///
/// Schematron findings are not errors: they are returned as
/// [`Diagnostic`](crate::diagnostic::Diagnostic) values from a successful call.
/// Every variant here means "validation could not be completed".
#[derive(Error, Debug)]
pub enum ValidationError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Resource not found: {reference}")]
    ResourceNotFound { reference: String },

    #[error("Expression error in `{expression}`: {details}")]
    Expression { expression: String, details: String },

    #[error("Malformed XML document: {document} - {details}")]
    MalformedDocument { document: String, details: String },

    #[error("Invalid Schematron schema: {details}")]
    InvalidSchema { details: String },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("LibXML2 internal error: {details}")]
    LibXml2Internal { details: String },

    #[error("File system traversal error: {path} - {reason}")]
    FileSystemTraversal { path: PathBuf, reason: String },

    #[error("Concurrent operation error: {details}")]
    Concurrency { details: String },
}

impl ValidationError {
    /// Shorthand for an expression failure
    pub fn expression(expression: impl Into<String>, details: impl Into<String>) -> Self {
        ValidationError::Expression {
            expression: expression.into(),
            details: details.into(),
        }
    }

    /// Shorthand for a schema structure failure
    pub fn invalid_schema(details: impl Into<String>) -> Self {
        ValidationError::InvalidSchema {
            details: details.into(),
        }
    }
}

/// LibXML2-specific error types
#[derive(Error, Debug)]
pub enum LibXml2Error {
    #[error("XPath context creation failed")]
    XPathContextCreationFailed,

    #[error("Memory allocation failed in libxml2")]
    MemoryAllocation,

    #[error("String contains an interior NUL byte: {details}")]
    InteriorNul { details: String },

    #[error("Document is too large for libxml2: {size} bytes")]
    DocumentTooLarge { size: usize },

    #[error("Registration of {what} `{name}` failed")]
    RegistrationFailed { what: &'static str, name: String },
}

impl From<LibXml2Error> for ValidationError {
    fn from(err: LibXml2Error) -> Self {
        ValidationError::LibXml2Internal {
            details: err.to_string(),
        }
    }
}

/// Result type alias for convenience
pub type Result<T> = std::result::Result<T, ValidationError>;

/// LibXML2 result type alias
pub type LibXml2Result<T> = std::result::Result<T, LibXml2Error>;
