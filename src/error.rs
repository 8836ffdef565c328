//! Error types for the signing engine.
//!
//! Every failure carries a numeric [`ErrorCode`], an [`ErrorCategory`] derived from
//! the code range, and a human-readable message. The rendered message always
//! contains `Code: <n>` so hosts that only see strings can still route errors.

use serde::Serialize;

/// Result type alias for signing engine operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Stable numeric error codes, grouped by category range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[repr(u16)]
pub enum ErrorCode {
    // Input validation (1000s)
    /// Buffer is not a parseable PDF
    MalformedDocument = 1001,
    /// Certificate could not be decoded
    InvalidCertificate = 1002,
    /// Private key could not be decoded
    InvalidPrivateKey = 1003,
    /// Password did not unlock the key material
    InvalidPassword = 1004,
    /// Caller-supplied argument is unusable
    InvalidInput = 1005,

    // Cryptographic (2000s)
    /// Signature generation failed
    SignatureCreation = 2001,
    /// Signature could not be checked
    SignatureValidation = 2002,
    /// Digest computation failed
    HashCalculation = 2003,
    /// Algorithm is not supported
    UnsupportedAlgorithm = 2004,
    /// Key type does not match the requested algorithm
    AlgorithmKeyMismatch = 2005,
    /// PKCS#7 container could not be assembled
    ContainerConstruction = 2006,

    // PDF processing (3000s)
    /// Object-level parse failure
    PdfParsing = 3001,
    /// Incremental update could not be produced
    DocumentModification = 3003,
    /// Object serialization failed
    Serialization = 3004,
    /// Original bytes would not be preserved
    ContentPreservation = 3005,
    /// Field name already present
    DuplicateFieldName = 3006,
    /// Named field does not exist
    FieldNotFound = 3007,
    /// Field already carries a signature
    FieldAlreadySigned = 3008,

    // System (4000s)
    /// Resource limit or allocation failure
    Resource = 4001,
    /// I/O failure
    Io = 4002,
    /// Invalid configuration
    Configuration = 4004,
    /// Task or lock failure
    Concurrency = 4005,

    // Certificate validation (5000s)
    /// Chain does not resolve to a trusted root
    CertificateChainValidation = 5001,
    /// Outside the validity window
    CertificateExpired = 5002,
    /// Listed as revoked
    CertificateRevoked = 5003,

    // Timestamp (7000s)
    /// Timestamp authority request failed
    TimestampRequest = 7001,
}

impl ErrorCode {
    /// Numeric value of the code.
    pub fn as_u16(self) -> u16 {
        self as u16
    }

    /// Category implied by the code range.
    pub fn category(self) -> ErrorCategory {
        match self.as_u16() / 1000 {
            1 => ErrorCategory::InputValidation,
            2 => ErrorCategory::Cryptographic,
            3 => ErrorCategory::PdfProcessing,
            4 => ErrorCategory::System,
            5 => ErrorCategory::CertificateValidation,
            _ => ErrorCategory::Timestamp,
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_u16())
    }
}

/// Broad classification of an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ErrorCategory {
    /// Bad input bytes or credentials
    InputValidation,
    /// Hashing and signature primitives
    Cryptographic,
    /// PDF structure and mutation
    PdfProcessing,
    /// Runtime environment
    System,
    /// Certificate trust decisions
    CertificateValidation,
    /// Timestamp authority interaction
    Timestamp,
}

impl ErrorCategory {
    /// Human-readable category name.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCategory::InputValidation => "Input Validation",
            ErrorCategory::Cryptographic => "Cryptographic",
            ErrorCategory::PdfProcessing => "PDF Processing",
            ErrorCategory::System => "System",
            ErrorCategory::CertificateValidation => "Certificate Validation",
            ErrorCategory::Timestamp => "Timestamp",
        }
    }
}

/// Error types that can occur while parsing, signing or validating.
#[derive(Debug, thiserror::Error)]
#[allow(clippy::enum_variant_names)]
pub enum Error {
    /// Buffer too short, missing `%PDF-` header, unsupported version, or unreadable structure
    #[error("Malformed PDF document (Code: {code}): {0}", code = ErrorCode::MalformedDocument)]
    MalformedDocument(String),

    /// Certificate PEM/DER could not be decoded
    #[error("Invalid certificate (Code: {code}): {0}", code = ErrorCode::InvalidCertificate)]
    InvalidCertificate(String),

    /// Private key PEM/DER could not be decoded
    #[error("Invalid private key (Code: {code}): {0}", code = ErrorCode::InvalidPrivateKey)]
    InvalidPrivateKey(String),

    /// Password missing or wrong for protected key material
    #[error("Invalid password for protected key material (Code: {code}): {0}", code = ErrorCode::InvalidPassword)]
    InvalidPassword(String),

    /// Caller-supplied argument is unusable
    #[error("Invalid input (Code: {code}): {0}", code = ErrorCode::InvalidInput)]
    InvalidInput(String),

    /// Signature generation failed
    #[error("Signature creation failed (Code: {code}): {0}", code = ErrorCode::SignatureCreation)]
    SignatureCreation(String),

    /// Signature could not be checked
    #[error("Signature validation failed (Code: {code}): {0}", code = ErrorCode::SignatureValidation)]
    SignatureValidation(String),

    /// Digest computation failed
    #[error("Hash calculation failed (Code: {code}): {0}", code = ErrorCode::HashCalculation)]
    HashCalculation(String),

    /// Algorithm not supported
    #[error("Unsupported algorithm (Code: {code}): {0}", code = ErrorCode::UnsupportedAlgorithm)]
    UnsupportedAlgorithm(String),

    /// Key family or curve does not match the requested signature algorithm
    #[error("Algorithm/key mismatch (Code: {code}): {algorithm} cannot be used with a {key} key", code = ErrorCode::AlgorithmKeyMismatch)]
    AlgorithmKeyMismatch {
        /// Requested signature algorithm
        algorithm: String,
        /// Key algorithm actually supplied
        key: String,
    },

    /// PKCS#7 container could not be assembled
    #[error("PKCS#7 container construction failed (Code: {code}): {0}", code = ErrorCode::ContainerConstruction)]
    ContainerConstruction(String),

    /// Parse error at specific byte offset
    #[error("PDF parsing failed at byte {offset} (Code: {code}): {reason}", code = ErrorCode::PdfParsing)]
    ParseError {
        /// Byte offset where error occurred
        offset: usize,
        /// Reason for parse failure
        reason: String,
    },

    /// Referenced object not found in cross-reference table
    #[error("Object not found (Code: {code}): {0} {1} R", code = ErrorCode::PdfParsing)]
    ObjectNotFound(u32, u16),

    /// Object has wrong type
    #[error("Invalid object type (Code: {code}): expected {expected}, found {found}", code = ErrorCode::PdfParsing)]
    InvalidObjectType {
        /// Expected object type
        expected: String,
        /// Actual object type found
        found: String,
    },

    /// Circular reference detected in object graph
    #[error("Circular reference detected (Code: {code}): object {0}", code = ErrorCode::PdfParsing)]
    CircularReference(crate::object::ObjectRef),

    /// Stream filter could not be decoded
    #[error("Stream decode failed (Code: {code}): {0}", code = ErrorCode::PdfParsing)]
    StreamDecode(String),

    /// Unsupported PDF feature
    #[error("Unsupported feature (Code: {code}): {0}", code = ErrorCode::PdfParsing)]
    Unsupported(String),

    /// Incremental update could not be produced
    #[error("Document modification failed (Code: {code}): {0}", code = ErrorCode::DocumentModification)]
    DocumentModification(String),

    /// Object could not be serialized
    #[error("Document serialization failed (Code: {code}): {0}", code = ErrorCode::Serialization)]
    Serialization(String),

    /// Output would not start with the untouched original bytes
    #[error("Content preservation failed (Code: {code}): {0}", code = ErrorCode::ContentPreservation)]
    ContentPreservation(String),

    /// A field with this name already exists
    #[error("Duplicate field name (Code: {code}): {0}", code = ErrorCode::DuplicateFieldName)]
    DuplicateFieldName(String),

    /// No field with this name exists
    #[error("Signature field not found (Code: {code}): {0}", code = ErrorCode::FieldNotFound)]
    FieldNotFound(String),

    /// Field was already signed
    #[error("Signature field already signed (Code: {code}): {0}", code = ErrorCode::FieldAlreadySigned)]
    FieldAlreadySigned(String),

    /// Resource limit reached
    #[error("Resource limit reached (Code: {code}): {0}", code = ErrorCode::Resource)]
    Resource(String),

    /// IO error
    #[error("I/O operation failed (Code: {code}): {0}", code = ErrorCode::Io)]
    Io(#[from] std::io::Error),

    /// Invalid configuration
    #[error("Configuration error (Code: {code}): {0}", code = ErrorCode::Configuration)]
    Configuration(String),

    /// Lock poisoning or task join failure
    #[error("Concurrency error (Code: {code}): {0}", code = ErrorCode::Concurrency)]
    Concurrency(String),

    /// Chain does not lead to a trusted root
    #[error("Certificate chain validation failed (Code: {code}): {0}", code = ErrorCode::CertificateChainValidation)]
    CertificateChainValidation(String),

    /// Certificate outside its validity window
    #[error("Certificate expired or not yet valid (Code: {code}): {0}", code = ErrorCode::CertificateExpired)]
    CertificateExpired(String),

    /// Certificate listed as revoked
    #[error("Certificate revoked (Code: {code}): {0}", code = ErrorCode::CertificateRevoked)]
    CertificateRevoked(String),

    /// Timestamp authority request failed and a timestamp was required
    #[error("Timestamp request failed (Code: {code}): {0}", code = ErrorCode::TimestampRequest)]
    TimestampRequest(String),
}

impl Error {
    /// Numeric code of this error.
    pub fn code(&self) -> ErrorCode {
        match self {
            Error::MalformedDocument(_) => ErrorCode::MalformedDocument,
            Error::InvalidCertificate(_) => ErrorCode::InvalidCertificate,
            Error::InvalidPrivateKey(_) => ErrorCode::InvalidPrivateKey,
            Error::InvalidPassword(_) => ErrorCode::InvalidPassword,
            Error::InvalidInput(_) => ErrorCode::InvalidInput,
            Error::SignatureCreation(_) => ErrorCode::SignatureCreation,
            Error::SignatureValidation(_) => ErrorCode::SignatureValidation,
            Error::HashCalculation(_) => ErrorCode::HashCalculation,
            Error::UnsupportedAlgorithm(_) => ErrorCode::UnsupportedAlgorithm,
            Error::AlgorithmKeyMismatch { .. } => ErrorCode::AlgorithmKeyMismatch,
            Error::ContainerConstruction(_) => ErrorCode::ContainerConstruction,
            Error::ParseError { .. }
            | Error::ObjectNotFound(..)
            | Error::InvalidObjectType { .. }
            | Error::CircularReference(_)
            | Error::StreamDecode(_)
            | Error::Unsupported(_) => ErrorCode::PdfParsing,
            Error::DocumentModification(_) => ErrorCode::DocumentModification,
            Error::Serialization(_) => ErrorCode::Serialization,
            Error::ContentPreservation(_) => ErrorCode::ContentPreservation,
            Error::DuplicateFieldName(_) => ErrorCode::DuplicateFieldName,
            Error::FieldNotFound(_) => ErrorCode::FieldNotFound,
            Error::FieldAlreadySigned(_) => ErrorCode::FieldAlreadySigned,
            Error::Resource(_) => ErrorCode::Resource,
            Error::Io(_) => ErrorCode::Io,
            Error::Configuration(_) => ErrorCode::Configuration,
            Error::Concurrency(_) => ErrorCode::Concurrency,
            Error::CertificateChainValidation(_) => ErrorCode::CertificateChainValidation,
            Error::CertificateExpired(_) => ErrorCode::CertificateExpired,
            Error::CertificateRevoked(_) => ErrorCode::CertificateRevoked,
            Error::TimestampRequest(_) => ErrorCode::TimestampRequest,
        }
    }

    /// Category of this error.
    pub fn category(&self) -> ErrorCategory {
        self.code().category()
    }

    /// Flatten into the `{code, category, message}` triple exposed to hosts.
    pub fn report(&self) -> ErrorReport {
        ErrorReport {
            code: self.code().as_u16(),
            category: self.category().as_str().to_string(),
            message: self.to_string(),
        }
    }
}

/// Serializable view of an error for host bindings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorReport {
    /// Numeric error code
    pub code: u16,
    /// Category name
    pub category: String,
    /// Rendered message (always contains `Code: <code>`)
    pub message: String,
}

/// How serious a reported (non-fatal) finding is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, serde::Deserialize)]
pub enum ErrorSeverity {
    /// Informational only
    Info,
    /// Worth surfacing but does not invalidate the result
    Warning,
    /// Invalidates the result
    Error,
    /// The object could not be evaluated at all
    Critical,
}

/// A finding attached to a validation result rather than returned as `Err`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, serde::Deserialize)]
pub struct ValidationError {
    /// Numeric code, same space as [`ErrorCode`]
    pub code: u16,
    /// Rendered message
    pub message: String,
    /// Severity
    pub severity: ErrorSeverity,
}

impl ValidationError {
    /// Record `error` with the given severity.
    pub fn from_error(error: &Error, severity: ErrorSeverity) -> Self {
        Self {
            code: error.code().as_u16(),
            message: error.to_string(),
            severity,
        }
    }
}
