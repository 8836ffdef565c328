//! Signature validation and tampering detection.
//!
//! Each signature is checked against its own `/ByteRange`, i.e. the bytes
//! of the revision it signed. Revisions appended later do not affect that
//! check; they are reported separately.

use super::pkcs7::parse_container;
use super::types::{
    DigitalSignature, Pkcs7Info, DocumentIntegrityStatus, ModificationInfo, ModificationType,
    TamperingDetectionResult, ValidationResult,
};
use crate::certificate::{CertificateManager, X509Certificate};
use crate::config::ValidationPolicy;
use crate::crypto::CryptoEngine;
use crate::document::PdfDocument;
use crate::error::{Error, ErrorSeverity, Result};
use std::collections::HashSet;
use std::sync::Arc;

/// Validates the signatures of a document.
///
/// Validation never fails as a whole: every problem ends up in the
/// per-signature [`ValidationResult`].
#[derive(Debug, Clone)]
pub struct SignatureValidator {
    engine: CryptoEngine,
    manager: Arc<CertificateManager>,
    trusted_roots: Vec<X509Certificate>,
    policy: ValidationPolicy,
}

impl Default for SignatureValidator {
    fn default() -> Self {
        Self::new(CryptoEngine::new())
    }
}

impl SignatureValidator {
    /// Validator checking signatures and validity windows only.
    pub fn new(engine: CryptoEngine) -> Self {
        Self {
            engine,
            manager: Arc::new(CertificateManager::new()),
            trusted_roots: Vec::new(),
            policy: ValidationPolicy::default(),
        }
    }

    /// Use `manager` for chain and revocation checks.
    pub fn with_certificate_manager(mut self, manager: Arc<CertificateManager>) -> Self {
        self.manager = manager;
        self
    }

    /// Roots that signer chains may end at.
    pub fn with_trusted_roots(mut self, roots: Vec<X509Certificate>) -> Self {
        self.trusted_roots = roots;
        self
    }

    /// Set which certificate checks count.
    pub fn with_policy(mut self, policy: ValidationPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// One result per signature, in field order.
    pub fn validate_signatures(&self, document: &PdfDocument) -> Vec<ValidationResult> {
        document
            .existing_signatures()
            .iter()
            .map(|signature| self.validate_signature(document.data(), signature))
            .collect()
    }

    /// Validate `signature` against the file bytes `data`.
    pub fn validate_signature(&self, data: &[u8], signature: &DigitalSignature) -> ValidationResult {
        let mut result = ValidationResult::new(signature);

        let range = signature.byte_range;
        if let Err(e) = check_byte_range(data, signature) {
            result.error(e);
            return result;
        }
        result.covers_whole_document = range.end() == data.len();
        if !result.covers_whole_document {
            result.warnings.push(format!(
                "signature covers {} of {} bytes; later revisions were appended",
                range.end(),
                data.len()
            ));
        }

        let info = match parse_container(signature.container_bytes()) {
            Ok(info) => info,
            Err(e) => {
                result.error(e);
                return result;
            },
        };
        let Some(hash) = info.digest_algorithm else {
            result.error(Error::UnsupportedAlgorithm(format!(
                "digest algorithm {}",
                info.digest_algorithm_oid
            )));
            return result;
        };
        let Some(signer) = info.signer_certificate.as_ref() else {
            result.error(Error::InvalidCertificate(
                "container does not carry the signer certificate".to_string(),
            ));
            return result;
        };

        let digest = match range.digest(data, hash) {
            Ok(digest) => digest,
            Err(e) => {
                result.error(e);
                return result;
            },
        };
        let signed_hash = match &info.signed_attributes {
            Some(attributes) => {
                result.document_intact = info.message_digest.as_deref() == Some(digest.as_slice());
                if !result.document_intact {
                    result.error(Error::SignatureValidation(
                        "signed bytes no longer match the messageDigest attribute".to_string(),
                    ));
                }
                hash.digest(attributes)
            },
            None => {
                // Without signed attributes the signature covers the digest directly
                result.document_intact = true;
                digest
            },
        };

        result.signature_valid = self.engine.verify_signature_with(
            &info.signature_value,
            &signed_hash,
            signer,
            info.signature_algorithm,
        );
        if !result.signature_valid {
            result.error(Error::SignatureValidation(format!(
                "signature value does not verify with the key of {}",
                signer.subject
            )));
            if info.signed_attributes.is_none() {
                result.document_intact = false;
            }
        }

        let at = info.signing_time.unwrap_or(signature.signing_time);
        result.certificate_valid = self.check_certificate(&info, signer, at, &mut result);
        result.is_valid = result.signature_valid && result.document_intact;

        log::debug!(
            "Field {:?}: signature_valid={} intact={} certificate_valid={}",
            result.field_name,
            result.signature_valid,
            result.document_intact,
            result.certificate_valid
        );
        result
    }

    fn check_certificate(
        &self,
        info: &Pkcs7Info,
        signer: &X509Certificate,
        at: chrono::DateTime<chrono::Utc>,
        result: &mut ValidationResult,
    ) -> bool {
        let mut valid = true;
        if !signer.is_valid_at(at) {
            valid = false;
            result.error(Error::CertificateExpired(format!(
                "{} was not valid at signing time {}",
                signer.subject, at
            )));
        }
        if !(self.policy.require_trusted_chain || self.policy.check_revocation) {
            return valid;
        }

        let report = match self
            .manager
            .validate_certificate_chain_at(&info.certificates, &self.trusted_roots, at)
        {
            Ok(report) => report,
            Err(e) => {
                result.error(e);
                return false;
            },
        };
        result.warnings.extend(report.warnings.iter().cloned());

        let mut counted = Vec::new();
        if self.policy.require_trusted_chain && !(report.chain_valid && report.trusted) {
            valid = false;
            counted.push(Error::CertificateChainValidation(String::new()).code().as_u16());
        }
        if self.policy.check_revocation && !report.not_revoked {
            valid = false;
            counted.push(Error::CertificateRevoked(String::new()).code().as_u16());
        }
        result
            .errors
            .extend(report.errors.into_iter().filter(|e| counted.contains(&e.code)));
        valid
    }

    /// One tampering report per signature, in field order.
    pub fn detect_tampering(&self, document: &PdfDocument) -> Vec<TamperingDetectionResult> {
        let current: HashSet<&str> = document
            .signature_fields()
            .iter()
            .map(|f| f.name.as_str())
            .collect();
        document
            .existing_signatures()
            .iter()
            .map(|signature| self.inspect(document.data(), signature, &current))
            .collect()
    }

    fn inspect(
        &self,
        data: &[u8],
        signature: &DigitalSignature,
        current_fields: &HashSet<&str>,
    ) -> TamperingDetectionResult {
        let mut report = TamperingDetectionResult {
            field_name: signature.field_name.clone(),
            status: DocumentIntegrityStatus::Intact,
            modifications: Vec::new(),
        };
        let range = signature.byte_range;

        if let Err(e) = check_byte_range(data, signature) {
            report.status = DocumentIntegrityStatus::Corrupted;
            report.modifications.push(ModificationInfo {
                modification_type: ModificationType::ByteRangeInvalid,
                description: e.to_string(),
                byte_offset: None,
                severity: ErrorSeverity::Critical,
            });
            return report;
        }

        let info = match parse_container(signature.container_bytes()) {
            Ok(info) => info,
            Err(e) => {
                log::warn!("Field {:?}: {}", signature.field_name, e);
                report.status = DocumentIntegrityStatus::Corrupted;
                return report;
            },
        };
        let changed = match (info.digest_algorithm, &info.message_digest) {
            (Some(hash), Some(expected)) => range
                .digest(data, hash)
                .map(|digest| &digest != expected)
                .unwrap_or(true),
            _ => false,
        };
        if changed {
            report.status = DocumentIntegrityStatus::Modified;
            report.modifications.push(ModificationInfo {
                modification_type: ModificationType::ContentChanged,
                description: "signed bytes no longer hash to the signed digest".to_string(),
                byte_offset: None,
                severity: ErrorSeverity::Error,
            });
        }

        if range.end() < data.len() {
            report.modifications.push(ModificationInfo {
                modification_type: ModificationType::IncrementalUpdateAppended,
                description: format!("{} bytes appended after signing", data.len() - range.end()),
                byte_offset: Some(range.end()),
                severity: ErrorSeverity::Info,
            });
            match PdfDocument::parse(&data[..range.end()]) {
                Ok(signed_revision) => {
                    for field in signed_revision.signature_fields() {
                        if !current_fields.contains(field.name.as_str()) {
                            report.status = DocumentIntegrityStatus::Modified;
                            report.modifications.push(ModificationInfo {
                                modification_type: ModificationType::SignatureFieldRemoved,
                                description: format!("signature field {:?} was removed", field.name),
                                byte_offset: Some(range.end()),
                                severity: ErrorSeverity::Error,
                            });
                        }
                    }
                },
                Err(e) => log::debug!(
                    "Revision signed by {:?} does not parse on its own: {}",
                    signature.field_name,
                    e
                ),
            }
        }
        report
    }
}

/// The range must fit the file and its gap must be exactly the `<...>` token.
fn check_byte_range(data: &[u8], signature: &DigitalSignature) -> Result<()> {
    let range = signature.byte_range;
    range.validate(data.len())?;
    match range.contents_token(data) {
        Some([b'<', .., b'>']) => Ok(()),
        _ => Err(Error::SignatureValidation(format!(
            "/ByteRange gap {:?} is not the /Contents string",
            range.contents_gap()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::certificate::SigningCredentials;
    use crate::signatures::{PdfSigner, SigningOptions};

    const MINIMAL: &[u8] = include_bytes!("../../tests/fixtures/minimal.pdf");

    fn credentials(cert: &str, key: &str) -> SigningCredentials {
        CertificateManager::new().load_from_pem(cert, key, None).unwrap()
    }

    fn rsa() -> SigningCredentials {
        credentials(
            include_str!("../../tests/fixtures/signer_rsa_chain.pem"),
            include_str!("../../tests/fixtures/signer_rsa_key.pem"),
        )
    }

    fn sign(data: &[u8], creds: &SigningCredentials) -> Vec<u8> {
        let doc = PdfDocument::parse(data).unwrap();
        PdfSigner::default().sign(&doc, creds, &SigningOptions::default()).unwrap()
    }

    fn root_ca() -> X509Certificate {
        let pem = include_str!("../../tests/fixtures/root_ca.pem");
        CertificateManager::new().load_certificates_pem(pem).unwrap().remove(0)
    }

    #[test]
    fn test_valid_signature() {
        let signed = sign(MINIMAL, &rsa());
        let doc = PdfDocument::parse(&signed).unwrap();
        let results = SignatureValidator::default().validate_signatures(&doc);
        assert_eq!(results.len(), 1);
        let r = &results[0];
        assert!(r.is_valid, "{:?}", r.errors);
        assert!(r.signature_valid && r.document_intact && r.certificate_valid);
        assert!(r.covers_whole_document);
        assert!(r.errors.is_empty() && r.warnings.is_empty());
    }

    #[test]
    fn test_ecdsa_signature_validates() {
        let creds = credentials(
            include_str!("../../tests/fixtures/signer_p521.pem"),
            include_str!("../../tests/fixtures/signer_p521_key.pem"),
        );
        let doc = PdfDocument::parse(MINIMAL).unwrap();
        let options = SigningOptions::default().with_hash_algorithm(crate::crypto::HashAlgorithm::Sha512);
        let signed = PdfSigner::default().sign(&doc, &creds, &options).unwrap();
        let results = SignatureValidator::default().validate_signatures(&PdfDocument::parse(&signed).unwrap());
        assert!(results[0].is_valid, "{:?}", results[0].errors);
    }

    #[test]
    fn test_modified_content_detected() {
        let mut signed = sign(MINIMAL, &rsa());
        let at = signed.windows(9).position(|w| w == b"Quarterly").unwrap();
        signed[at] = b'q';

        let doc = PdfDocument::parse(&signed).unwrap();
        let validator = SignatureValidator::default();
        let r = &validator.validate_signatures(&doc)[0];
        assert!(!r.is_valid);
        assert!(!r.document_intact);
        assert!(r.signature_valid);

        let t = &validator.detect_tampering(&doc)[0];
        assert_eq!(t.status, DocumentIntegrityStatus::Modified);
        assert_eq!(t.modifications[0].modification_type, ModificationType::ContentChanged);
        assert!(t.is_tampered());
    }

    #[test]
    fn test_appended_revision_is_not_tampering() {
        let once = sign(MINIMAL, &rsa());
        let twice = sign(&once, &rsa());
        let doc = PdfDocument::parse(&twice).unwrap();
        let validator = SignatureValidator::default();

        let results = validator.validate_signatures(&doc);
        assert_eq!(results.len(), 2);
        assert!(results.iter().all(|r| r.is_valid));
        assert!(!results[0].covers_whole_document);
        assert_eq!(results[0].warnings.len(), 1);
        assert!(results[1].covers_whole_document);

        let reports = validator.detect_tampering(&doc);
        assert_eq!(reports[0].status, DocumentIntegrityStatus::Intact);
        assert_eq!(
            reports[0].modifications[0].modification_type,
            ModificationType::IncrementalUpdateAppended
        );
        assert_eq!(reports[0].modifications[0].byte_offset, Some(once.len()));
        assert!(reports[1].modifications.is_empty());
    }

    #[test]
    fn test_removed_field_detected() {
        let twice = sign(&sign(MINIMAL, &rsa()), &rsa());
        let doc = PdfDocument::parse(&twice).unwrap();
        let structure = doc.structure();
        let catalog = doc.store().load_dict(structure.root).unwrap();
        let acroform = catalog.get("AcroForm").and_then(|o| o.as_reference()).unwrap();
        let keep = structure.field_locations["Signature2"].field;

        let mut data = twice.clone();
        let offset = data.len();
        data.extend_from_slice(
            format!("{} 0 obj\n<< /Fields [{}] /SigFlags 3 >>\nendobj\n", acroform.id, keep).as_bytes(),
        );
        let xref = data.len();
        data.extend_from_slice(
            format!(
                "xref\n{} 1\n{:010} 00000 n \ntrailer\n<< /Size {} /Root {} /Prev {} >>\nstartxref\n{}\n%%EOF\n",
                acroform.id, offset, structure.size, structure.root, structure.startxref, xref
            )
            .as_bytes(),
        );

        let tampered = PdfDocument::parse(&data).unwrap();
        assert!(tampered.signature_field("Signature1").is_none());
        let reports = SignatureValidator::default().detect_tampering(&tampered);
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].field_name, "Signature2");
        assert_eq!(reports[0].status, DocumentIntegrityStatus::Modified);
        assert!(reports[0]
            .modifications
            .iter()
            .any(|m| m.modification_type == ModificationType::SignatureFieldRemoved));
    }

    #[test]
    fn test_corrupted_byte_range() {
        let signed = sign(MINIMAL, &rsa());
        let doc = PdfDocument::parse(&signed).unwrap();
        let mut signature = doc.existing_signatures()[0].clone();
        signature.byte_range.0[1] += 1;

        let validator = SignatureValidator::default();
        let r = validator.validate_signature(&signed, &signature);
        assert!(!r.is_valid);
        assert_eq!(r.errors[0].code, 2002);

        let t = validator.inspect(&signed, &signature, &HashSet::new());
        assert_eq!(t.status, DocumentIntegrityStatus::Corrupted);
        assert_eq!(t.modifications[0].severity, ErrorSeverity::Critical);
    }

    #[test]
    fn test_trusted_chain_policy() {
        let signed = sign(MINIMAL, &rsa());
        let doc = PdfDocument::parse(&signed).unwrap();
        let policy = ValidationPolicy {
            require_trusted_chain: true,
            ..ValidationPolicy::default()
        };

        let untrusted = SignatureValidator::default().with_policy(policy);
        let r = &untrusted.validate_signatures(&doc)[0];
        assert!(r.is_valid);
        assert!(!r.certificate_valid);
        assert!(r.errors.iter().any(|e| e.code == 5001));

        let trusted = untrusted.with_trusted_roots(vec![root_ca()]);
        let r = &trusted.validate_signatures(&doc)[0];
        assert!(r.certificate_valid, "{:?}", r.errors);
    }

    #[test]
    fn test_expired_signer_certificate() {
        let creds = credentials(
            include_str!("../../tests/fixtures/expired_rsa.pem"),
            include_str!("../../tests/fixtures/signer_rsa_key.pem"),
        );
        let signed = sign(MINIMAL, &creds);
        let r = &SignatureValidator::default().validate_signatures(&PdfDocument::parse(&signed).unwrap())[0];
        assert!(r.is_valid);
        assert!(!r.certificate_valid);
        assert!(r.errors.iter().any(|e| e.code == 5002));
    }
}
