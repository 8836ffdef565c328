//! PDF digital signatures.
//!
//! Creation, extraction and validation of signatures following
//! ISO 32000-1:2008 Section 12.8 with `adbe.pkcs7.detached` CMS containers
//! (RFC 5652).
//!
//! ## Signing
//!
//! 1. An incremental update adds the signature dictionary with fixed-width
//!    `/ByteRange` and `/Contents` placeholders.
//! 2. The bytes around `/Contents` are hashed.
//! 3. A CMS SignedData is built over that digest, optionally timestamped
//!    (RFC 3161) through a host-supplied [`TimestampClient`].
//! 4. The DER container is hex-encoded into the placeholder in place.
//!
//! ## Example
//!
//! ```ignore
//! use pdf_seal::certificate::CertificateManager;
//! use pdf_seal::document::PdfDocument;
//! use pdf_seal::signatures::{PdfSigner, SignatureValidator, SigningOptions};
//!
//! let credentials = CertificateManager::new().load_from_pkcs12(&p12, "secret")?;
//! let document = PdfDocument::parse(&pdf)?;
//! let signed = PdfSigner::default().sign(&document, &credentials, &SigningOptions::default())?;
//!
//! let results = SignatureValidator::default().validate_signatures(&PdfDocument::parse(&signed)?);
//! assert!(results[0].is_valid);
//! ```

pub mod byterange;
mod compliance;
mod extractor;
pub mod pkcs7;
mod signer;
pub mod timestamp;
mod types;
mod validator;

pub use byterange::{ByteRange, ByteRangeCalculator};
pub use compliance::{
    ComplianceChecker, ComplianceLevel, CompliancePolicy, ComplianceReport, ComplianceRule,
    ComplianceViolation, ViolationSeverity,
};
pub use extractor::SignatureExtractor;
pub use pkcs7::Pkcs7Builder;
pub use signer::PdfSigner;
pub use timestamp::{TimestampClient, TimestampToken};
pub use types::{
    CertificateInfo, Color, DigitalSignature, DocumentIntegrityStatus, ExtractedSignature,
    ModificationInfo, ModificationType, Pkcs7Info, SignatureAlgorithmInfo, SignatureAppearance,
    SignatureDetails, SignatureSubFilter, SigningOptions, TamperingDetectionResult,
    ValidationResult,
};
pub use validator::SignatureValidator;
