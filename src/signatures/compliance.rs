//! Signature policy checks.
//!
//! [`ComplianceChecker`] inspects an [`ExtractedSignature`] against a
//! [`CompliancePolicy`]: digest strength, RSA key size, the `/SubFilter`,
//! the CMS content type, signer key usage (RFC 5280 §4.2.1.3, §4.2.1.12),
//! the `signingCertificateV2` attribute (RFC 5035) and the RFC 3161 token.
//! It does not verify the signature itself; that is the validator's job.

use super::timestamp::verify_token;
use super::types::{ExtractedSignature, Pkcs7Info, SignatureSubFilter};
use super::SignatureExtractor;
use crate::certificate::{KeyAlgorithm, X509Certificate};
use crate::crypto::algorithms::oids;
use crate::crypto::HashAlgorithm;
use crate::document::PdfDocument;
use der::asn1::SetOfVec;
use der::Decode;
use serde::{Deserialize, Serialize};
use std::fmt;
use x509_cert::attr::Attribute;

/// Extended key usages that permit document signing.
const SIGNING_USAGES: &[&str] = &[
    "anyExtendedKeyUsage",
    "emailProtection",
    "clientAuth",
    "codeSigning",
    // id-kp-documentSigning (RFC 9336)
    "1.3.6.1.5.5.7.3.36",
    // Adobe Authentic Documents Trust
    "1.2.840.113583.1.1.5",
];

/// What a policy demands of each signature.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompliancePolicy {
    /// Weakest acceptable digest
    pub minimum_hash: HashAlgorithm,
    /// Smallest acceptable RSA modulus
    pub minimum_rsa_bits: u32,
    /// A verified RFC 3161 token must be attached
    pub require_timestamp: bool,
    /// The `signingCertificateV2` signed attribute must be present
    pub require_signing_certificate_attribute: bool,
    /// Acceptable `/SubFilter` values
    pub allowed_sub_filters: Vec<SignatureSubFilter>,
}

impl Default for CompliancePolicy {
    fn default() -> Self {
        Self {
            minimum_hash: HashAlgorithm::Sha256,
            minimum_rsa_bits: 2048,
            require_timestamp: false,
            require_signing_certificate_attribute: false,
            allowed_sub_filters: vec![SignatureSubFilter::Pkcs7Detached, SignatureSubFilter::CadesDetached],
        }
    }
}

impl CompliancePolicy {
    /// PAdES baseline B-T (ETSI EN 319 142-1): CAdES sub-filter, signing
    /// certificate attribute and a signature timestamp.
    pub fn pades_baseline_t() -> Self {
        Self {
            require_timestamp: true,
            require_signing_certificate_attribute: true,
            allowed_sub_filters: vec![SignatureSubFilter::CadesDetached],
            ..Self::default()
        }
    }
}

/// Which check produced a finding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ComplianceRule {
    /// A decodable CMS container with a signer certificate
    Container,
    /// Digest algorithm strength
    HashAlgorithm,
    /// Signature scheme is recognized
    SignatureAlgorithm,
    /// RSA modulus size
    KeySize,
    /// `/SubFilter` value
    SubFilter,
    /// `eContentType` is id-data
    ContentType,
    /// keyUsage permits signing
    KeyUsage,
    /// extKeyUsage permits signing
    ExtendedKeyUsage,
    /// `signingCertificateV2` attribute
    SigningCertificateAttribute,
    /// RFC 3161 signature timestamp
    Timestamp,
}

impl fmt::Display for ComplianceRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Severity of a violation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ViolationSeverity {
    Low,
    Medium,
    High,
    Critical,
}

/// One failed check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComplianceViolation {
    pub rule: ComplianceRule,
    pub severity: ViolationSeverity,
    pub description: String,
}

/// Overall verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ComplianceLevel {
    /// No violations and no warnings
    Full,
    /// Warnings only
    Conditional,
    /// At least one violation
    NonCompliant,
}

/// Findings for one signature.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComplianceReport {
    /// Owning field
    pub field_name: String,
    /// Verdict
    pub level: ComplianceLevel,
    /// Failed checks
    pub violations: Vec<ComplianceViolation>,
    /// Findings the policy tolerates
    pub warnings: Vec<String>,
}

impl ComplianceReport {
    /// No violations.
    pub fn is_compliant(&self) -> bool {
        self.violations.is_empty()
    }

    /// Whether `rule` produced a violation.
    pub fn violates(&self, rule: ComplianceRule) -> bool {
        self.violations.iter().any(|v| v.rule == rule)
    }

    /// Highest severity among the violations.
    pub fn worst_severity(&self) -> Option<ViolationSeverity> {
        self.violations.iter().map(|v| v.severity).max()
    }
}

struct Findings {
    violations: Vec<ComplianceViolation>,
    warnings: Vec<String>,
}

impl Findings {
    fn violation(&mut self, rule: ComplianceRule, severity: ViolationSeverity, description: impl Into<String>) {
        self.violations.push(ComplianceViolation {
            rule,
            severity,
            description: description.into(),
        });
    }

    fn warn(&mut self, warning: impl Into<String>) {
        self.warnings.push(warning.into());
    }
}

/// Checks signatures against a [`CompliancePolicy`].
#[derive(Debug, Clone, Default)]
pub struct ComplianceChecker {
    policy: CompliancePolicy,
}

impl ComplianceChecker {
    /// Checker for `policy`.
    pub fn new(policy: CompliancePolicy) -> Self {
        Self { policy }
    }

    /// The policy in use.
    pub fn policy(&self) -> &CompliancePolicy {
        &self.policy
    }

    /// One report per signed field, in field order.
    pub fn check_document(&self, document: &PdfDocument) -> Vec<ComplianceReport> {
        SignatureExtractor::new()
            .extract_signatures(document)
            .iter()
            .map(|signature| self.check(signature))
            .collect()
    }

    /// Report for one signature.
    pub fn check(&self, signature: &ExtractedSignature) -> ComplianceReport {
        let mut findings = Findings {
            violations: Vec::new(),
            warnings: Vec::new(),
        };

        self.check_sub_filter(signature.algorithm.sub_filter.as_deref(), &mut findings);
        match &signature.pkcs7 {
            Some(info) => self.check_container(info, &mut findings),
            None => findings.violation(
                ComplianceRule::Container,
                ViolationSeverity::Critical,
                "/Contents is not a CMS SignedData container",
            ),
        }

        let level = if !findings.violations.is_empty() {
            ComplianceLevel::NonCompliant
        } else if !findings.warnings.is_empty() {
            ComplianceLevel::Conditional
        } else {
            ComplianceLevel::Full
        };
        log::debug!(
            "Compliance of {:?}: {:?}, {} violations, {} warnings",
            signature.field_name,
            level,
            findings.violations.len(),
            findings.warnings.len()
        );
        ComplianceReport {
            field_name: signature.field_name.clone(),
            level,
            violations: findings.violations,
            warnings: findings.warnings,
        }
    }

    fn check_sub_filter(&self, sub_filter: Option<&str>, findings: &mut Findings) {
        let Some(name) = sub_filter else {
            findings.violation(ComplianceRule::SubFilter, ViolationSeverity::Medium, "/SubFilter is missing");
            return;
        };
        match SignatureSubFilter::from_pdf_name(name) {
            Some(SignatureSubFilter::Pkcs7Sha1) => findings.violation(
                ComplianceRule::SubFilter,
                ViolationSeverity::High,
                "adbe.pkcs7.sha1 signs a SHA-1 digest",
            ),
            Some(kind) if self.policy.allowed_sub_filters.contains(&kind) => {},
            _ => findings.violation(
                ComplianceRule::SubFilter,
                ViolationSeverity::Medium,
                format!("/SubFilter {} is not permitted", name),
            ),
        }
    }

    fn check_container(&self, info: &Pkcs7Info, findings: &mut Findings) {
        match info.digest_algorithm {
            Some(hash) if hash.digest_len() < self.policy.minimum_hash.digest_len() => findings.violation(
                ComplianceRule::HashAlgorithm,
                ViolationSeverity::High,
                format!("{} is weaker than {}", hash, self.policy.minimum_hash),
            ),
            Some(_) => {},
            None => findings.violation(
                ComplianceRule::HashAlgorithm,
                ViolationSeverity::High,
                format!("digest {} is not permitted", info.digest_algorithm_oid),
            ),
        }
        if info.signature_algorithm.is_none() {
            findings.violation(
                ComplianceRule::SignatureAlgorithm,
                ViolationSeverity::High,
                format!("signature algorithm {} is not recognized", info.signature_algorithm_oid),
            );
        }
        // ISO 32000-1 §12.8.3.3.1
        if info.content_type != oids::ID_DATA.to_string() {
            findings.violation(
                ComplianceRule::ContentType,
                ViolationSeverity::High,
                format!("content type {} is not id-data", info.content_type),
            );
        }

        match &info.signer_certificate {
            Some(signer) => self.check_signer(signer, findings),
            None => findings.violation(
                ComplianceRule::Container,
                ViolationSeverity::Critical,
                "signer certificate is not embedded",
            ),
        }

        if !has_signed_attribute(info, &oids::SIGNING_CERTIFICATE_V2) {
            if self.policy.require_signing_certificate_attribute {
                findings.violation(
                    ComplianceRule::SigningCertificateAttribute,
                    ViolationSeverity::High,
                    "signingCertificateV2 attribute is missing",
                );
            } else {
                findings.warn("signingCertificateV2 attribute is missing");
            }
        }

        self.check_timestamp(info, findings);
    }

    fn check_signer(&self, signer: &X509Certificate, findings: &mut Findings) {
        if let Ok(key) = signer.public_key() {
            if key.key_algorithm() == KeyAlgorithm::Rsa && key.key_bits() < self.policy.minimum_rsa_bits {
                findings.violation(
                    ComplianceRule::KeySize,
                    ViolationSeverity::High,
                    format!(
                        "RSA key of {} bits is below {}",
                        key.key_bits(),
                        self.policy.minimum_rsa_bits
                    ),
                );
            }
        }

        // no keyUsage extension means no restriction
        let usage = &signer.key_usage;
        if !usage.is_empty() && !usage.iter().any(|u| u == "digitalSignature" || u == "nonRepudiation") {
            findings.violation(
                ComplianceRule::KeyUsage,
                ViolationSeverity::High,
                format!("keyUsage {} does not permit signing", usage.join(", ")),
            );
        }

        if let Some(usages) = signer.extended_key_usage() {
            if !usages.iter().any(|u| SIGNING_USAGES.contains(&u.as_str())) {
                findings.violation(
                    ComplianceRule::ExtendedKeyUsage,
                    ViolationSeverity::Medium,
                    format!("extKeyUsage {} does not permit document signing", usages.join(", ")),
                );
            }
        }
    }

    fn check_timestamp(&self, info: &Pkcs7Info, findings: &mut Findings) {
        match &info.timestamp_token {
            Some(token) => {
                if let Err(e) = verify_token(token, &info.signature_value, None) {
                    findings.violation(ComplianceRule::Timestamp, ViolationSeverity::High, e.to_string());
                }
            },
            None if self.policy.require_timestamp => findings.violation(
                ComplianceRule::Timestamp,
                ViolationSeverity::Medium,
                "no signature timestamp",
            ),
            None => findings.warn("no signature timestamp"),
        }
    }
}

fn has_signed_attribute(info: &Pkcs7Info, oid: &der::asn1::ObjectIdentifier) -> bool {
    info.signed_attributes
        .as_deref()
        .and_then(|der| SetOfVec::<Attribute>::from_der(der).ok())
        .is_some_and(|attrs| attrs.iter().any(|a| &a.oid == oid))
}
