//! Byte-in, byte-out entry points.
//!
//! [`SigningEngine`] wires the parser, crypto engine, certificate manager,
//! signer and validator together from one [`EngineConfig`]. Every call
//! takes the document as bytes and returns new bytes; nothing is kept
//! between calls apart from the shared context pool.
//!
//! ```ignore
//! use pdf_seal::api::SigningEngine;
//! use pdf_seal::config::EngineConfig;
//!
//! let engine = SigningEngine::new(EngineConfig::default())?;
//! let credentials = engine.certificates().load_from_pem(&cert_pem, &key_pem, None)?;
//! let signed = engine.sign_document(&pdf, &credentials, &engine.signing_options().with_reason("Approved"))?;
//! for result in engine.validate_signatures(&signed)? {
//!     println!("{}: {}", result.field_name, result.is_valid);
//! }
//! ```
//!
//! [`batch`] runs the same operations over many documents at once and
//! [`tasks`] offers them on the tokio blocking pool.

pub mod batch;
pub mod tasks;

pub use batch::BatchOutcome;

use crate::certificate::{CertificateManager, SigningCredentials, X509Certificate};
use crate::config::EngineConfig;
use crate::crypto::{ContextPool, CryptoEngine, HashAlgorithm, PoolStatistics, SignatureAlgorithm};
use crate::document::{PdfDocument, SignatureFieldDefinition, SUPPORTED_VERSIONS};
use crate::error::Result;
use crate::signatures::{
    ComplianceChecker, ComplianceReport, ExtractedSignature, PdfSigner, SignatureExtractor,
    SignatureValidator, SigningOptions,
    TamperingDetectionResult, TimestampClient, ValidationResult,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Configured signing and validation facade.
#[derive(Debug, Clone)]
pub struct SigningEngine {
    config: EngineConfig,
    engine: CryptoEngine,
    certificates: Arc<CertificateManager>,
    signer: PdfSigner,
    trusted_roots: Vec<X509Certificate>,
}

impl SigningEngine {
    /// Build from a validated configuration.
    pub fn new(config: EngineConfig) -> Result<Self> {
        Self::with_certificate_manager(config, CertificateManager::new())
    }

    /// Build with a specific certificate manager, e.g. one with a CRL checker.
    pub fn with_certificate_manager(config: EngineConfig, certificates: CertificateManager) -> Result<Self> {
        config.validate()?;
        let engine = CryptoEngine::with_pool(Arc::new(ContextPool::new(config.context_pool.clone())));
        let mut signer = PdfSigner::new(engine.clone()).with_reserved_bytes(config.signature_reservation);
        if let Some(timestamp) = &config.timestamp {
            signer = signer.with_timestamp_config(timestamp.clone());
        }
        Ok(Self {
            config,
            engine,
            certificates: Arc::new(certificates),
            signer,
            trusted_roots: Vec::new(),
        })
    }

    /// Attach the client used for the configured timestamp authority.
    ///
    /// Without a configured [`TimestampConfig`](crate::config::TimestampConfig)
    /// the client is never called.
    pub fn with_timestamp_client(mut self, client: Arc<dyn TimestampClient>) -> Self {
        if let Some(timestamp) = &self.config.timestamp {
            self.signer = self.signer.with_timestamp(timestamp.clone(), client);
        }
        self
    }

    /// Roots used when the validation policy requires a trusted chain.
    pub fn with_trusted_roots(mut self, roots: Vec<X509Certificate>) -> Self {
        self.trusted_roots = roots;
        self
    }

    /// The configuration in use.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Credential loading and certificate validation.
    pub fn certificates(&self) -> &CertificateManager {
        &self.certificates
    }

    /// Context pool counters.
    pub fn statistics(&self) -> Result<PoolStatistics> {
        self.engine.statistics()
    }

    /// Default options carrying the configured hash algorithm.
    pub fn signing_options(&self) -> SigningOptions {
        SigningOptions::default().with_hash_algorithm(self.config.default_hash_algorithm)
    }

    /// Parse a document.
    pub fn parse_document(&self, pdf: &[u8]) -> Result<PdfDocument> {
        PdfDocument::parse(pdf)
    }

    /// Sign `pdf` and return the updated bytes.
    pub fn sign_document(
        &self,
        pdf: &[u8],
        credentials: &SigningCredentials,
        options: &SigningOptions,
    ) -> Result<Vec<u8>> {
        let document = PdfDocument::parse(pdf)?;
        self.signer.sign(&document, credentials, options)
    }

    /// Append an empty signature field.
    pub fn add_signature_field(&self, pdf: &[u8], definition: SignatureFieldDefinition) -> Result<Vec<u8>> {
        let document = PdfDocument::parse(pdf)?;
        self.signer.add_signature_field(&document, definition)
    }

    /// Validate every signature.
    ///
    /// Fails only when `pdf` cannot be parsed; signature problems are
    /// reported in the results.
    pub fn validate_signatures(&self, pdf: &[u8]) -> Result<Vec<ValidationResult>> {
        let document = PdfDocument::parse(pdf)?;
        Ok(self.validator().validate_signatures(&document))
    }

    /// Tampering report per signature.
    pub fn detect_tampering(&self, pdf: &[u8]) -> Result<Vec<TamperingDetectionResult>> {
        let document = PdfDocument::parse(pdf)?;
        Ok(self.validator().detect_tampering(&document))
    }

    /// Extract every signature.
    pub fn extract_signatures(&self, pdf: &[u8]) -> Result<Vec<ExtractedSignature>> {
        let document = PdfDocument::parse(pdf)?;
        Ok(SignatureExtractor::new().extract_signatures(&document))
    }

    /// Compliance report per signature under the configured policy.
    pub fn check_compliance(&self, pdf: &[u8]) -> Result<Vec<ComplianceReport>> {
        let document = PdfDocument::parse(pdf)?;
        Ok(ComplianceChecker::new(self.config.compliance.clone()).check_document(&document))
    }

    fn validator(&self) -> SignatureValidator {
        SignatureValidator::new(self.engine.clone())
            .with_certificate_manager(Arc::clone(&self.certificates))
            .with_trusted_roots(self.trusted_roots.clone())
            .with_policy(self.config.validation)
    }
}

/// What this build can do.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capabilities {
    /// Crate version
    pub version: String,
    /// Digest names
    pub hash_algorithms: Vec<String>,
    /// Signature scheme names
    pub signature_algorithms: Vec<String>,
    /// Accepted `%PDF-` header versions
    pub pdf_versions: Vec<String>,
    /// `/SubFilter` written when signing
    pub sub_filters: Vec<String>,
}

/// Report supported algorithms and PDF versions.
pub fn capabilities() -> Capabilities {
    Capabilities {
        version: env!("CARGO_PKG_VERSION").to_string(),
        hash_algorithms: HashAlgorithm::ALL.iter().map(|h| h.name().to_string()).collect(),
        signature_algorithms: SignatureAlgorithm::ALL.iter().map(|s| s.name().to_string()).collect(),
        pdf_versions: SUPPORTED_VERSIONS.iter().map(|v| v.to_string()).collect(),
        sub_filters: vec!["adbe.pkcs7.detached".to_string()],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &[u8] = include_bytes!("../../tests/fixtures/minimal.pdf");

    fn engine() -> SigningEngine {
        SigningEngine::new(EngineConfig::default()).unwrap()
    }

    fn credentials(engine: &SigningEngine) -> SigningCredentials {
        engine
            .certificates()
            .load_from_pkcs12(include_bytes!("../../tests/fixtures/signer_rsa.p12"), "secret")
            .unwrap()
    }

    #[test]
    fn test_sign_and_validate_bytes() {
        let engine = engine();
        let creds = credentials(&engine);
        let signed = engine
            .sign_document(MINIMAL, &creds, &engine.signing_options())
            .unwrap();
        let results = engine.validate_signatures(&signed).unwrap();
        assert_eq!(results.len(), 1);
        assert!(results[0].is_valid);
        assert_eq!(engine.extract_signatures(&signed).unwrap().len(), 1);
        assert!(!engine.detect_tampering(&signed).unwrap()[0].is_tampered());
        assert!(engine.statistics().unwrap().total_contexts_created >= 1);
    }

    #[test]
    fn test_configured_hash_is_default() {
        let engine = SigningEngine::new(EngineConfig::default().with_hash_algorithm(HashAlgorithm::Sha512)).unwrap();
        let creds = credentials(&engine);
        let signed = engine.sign_document(MINIMAL, &creds, &engine.signing_options()).unwrap();
        let extracted = engine.extract_signatures(&signed).unwrap();
        assert_eq!(extracted[0].algorithm.hash_algorithm, Some(HashAlgorithm::Sha512));
    }

    #[test]
    fn test_invalid_config_rejected() {
        let err = SigningEngine::new(EngineConfig::default().with_signature_reservation(10)).unwrap_err();
        assert_eq!(err.code().as_u16(), 4004);
    }

    #[test]
    fn test_garbage_input() {
        let err = engine().validate_signatures(b"not a pdf").unwrap_err();
        assert_eq!(err.code().as_u16(), 1001);
    }

    #[test]
    fn test_capabilities() {
        let caps = capabilities();
        assert_eq!(caps.hash_algorithms.len(), 3);
        assert_eq!(caps.signature_algorithms.len(), 7);
        assert!(caps.pdf_versions.contains(&"2.0".to_string()));
        let json = serde_json::to_string(&caps).unwrap();
        assert!(json.contains("ECDSA-P256-SHA256"));
    }
}
