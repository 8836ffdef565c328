//! X.509 certificates, private keys and credential management.
//!
//! Credentials are loaded from PEM or PKCS#12 buffers supplied by the caller;
//! nothing here touches the filesystem or logs key material.
//!
//! ```ignore
//! use pdf_seal::certificate::CertificateManager;
//!
//! let manager = CertificateManager::new();
//! let credentials = manager.load_from_pem(&cert_pem, &key_pem, None)?;
//! let report = manager.validate_certificate(&credentials.certificate, &roots)?;
//! assert!(report.is_valid);
//! ```

mod loader;
mod validation;

pub use loader::{parse_pem_blocks, parse_private_key_der, PemBlock};
pub(crate) use loader::{key_matches, order_chain};
pub use validation::{
    CrlRevocationChecker, NoRevocationCheck, RevocationChecker, RevocationStatus, TtlCache,
};

use crate::crypto::algorithms::{oids, EcdsaCurve};
use crate::error::{Error, ErrorSeverity, Result, ValidationError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Mutex;
use std::time::Duration;
use x509_parser::prelude::*;

/// Default lifetime of memoized revocation answers.
const REVOCATION_CACHE_TTL: Duration = Duration::from_secs(3600);

/// Private key family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum KeyAlgorithm {
    /// RSA (any modulus size)
    Rsa,
    /// ECDSA over P-256
    EcdsaP256,
    /// ECDSA over P-384
    EcdsaP384,
    /// ECDSA over P-521
    EcdsaP521,
}

impl KeyAlgorithm {
    /// Curve for EC keys, `None` for RSA.
    pub fn curve(self) -> Option<EcdsaCurve> {
        match self {
            KeyAlgorithm::Rsa => None,
            KeyAlgorithm::EcdsaP256 => Some(EcdsaCurve::P256),
            KeyAlgorithm::EcdsaP384 => Some(EcdsaCurve::P384),
            KeyAlgorithm::EcdsaP521 => Some(EcdsaCurve::P521),
        }
    }

    /// EC key family for a curve.
    pub fn from_curve(curve: EcdsaCurve) -> Self {
        match curve {
            EcdsaCurve::P256 => KeyAlgorithm::EcdsaP256,
            EcdsaCurve::P384 => KeyAlgorithm::EcdsaP384,
            EcdsaCurve::P521 => KeyAlgorithm::EcdsaP521,
        }
    }

    /// Display name.
    pub fn name(self) -> &'static str {
        match self {
            KeyAlgorithm::Rsa => "RSA",
            KeyAlgorithm::EcdsaP256 => "ECDSA-P256",
            KeyAlgorithm::EcdsaP384 => "ECDSA-P384",
            KeyAlgorithm::EcdsaP521 => "ECDSA-P521",
        }
    }
}

impl std::fmt::Display for KeyAlgorithm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Public key extracted from a certificate's SubjectPublicKeyInfo.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PublicKeyInfo {
    /// RSA public key
    Rsa {
        /// Full SubjectPublicKeyInfo DER
        spki_der: Vec<u8>,
        /// Big-endian modulus without leading zeros
        modulus: Vec<u8>,
        /// Modulus size in bits
        bits: u32,
    },
    /// EC public key on a named curve
    Ec {
        /// Named curve
        curve: EcdsaCurve,
        /// SEC1-encoded point
        point: Vec<u8>,
    },
}

impl PublicKeyInfo {
    /// Key family this public key belongs to.
    pub fn key_algorithm(&self) -> KeyAlgorithm {
        match self {
            PublicKeyInfo::Rsa { .. } => KeyAlgorithm::Rsa,
            PublicKeyInfo::Ec { curve, .. } => KeyAlgorithm::from_curve(*curve),
        }
    }

    /// Key size in bits.
    pub fn key_bits(&self) -> u32 {
        match self {
            PublicKeyInfo::Rsa { bits, .. } => *bits,
            PublicKeyInfo::Ec { curve, .. } => curve.key_bits(),
        }
    }
}

/// A decoded X.509 certificate.
///
/// The DER bytes are authoritative; the other fields are a convenience view
/// extracted once at load time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct X509Certificate {
    /// DER encoding
    pub der_data: Vec<u8>,
    /// Subject distinguished name (RFC 4514 style)
    pub subject: String,
    /// Issuer distinguished name
    pub issuer: String,
    /// Serial number as lowercase hex of the raw INTEGER bytes
    pub serial_number: String,
    /// Start of the validity window
    pub not_before: DateTime<Utc>,
    /// End of the validity window
    pub not_after: DateTime<Utc>,
    /// Public key algorithm name (`RSA`, `ECDSA-P256`, ...)
    pub public_key_algorithm: String,
    /// Key usage bits that are set, by RFC 5280 name
    pub key_usage: Vec<String>,
}

impl X509Certificate {
    /// Decode a DER certificate.
    pub fn from_der(der: &[u8]) -> Result<Self> {
        let (_, cert) = parse_x509_certificate(der)
            .map_err(|e| Error::InvalidCertificate(format!("X.509 decoding failed: {}", e)))?;

        let not_before = asn1_to_utc(&cert.validity().not_before)?;
        let not_after = asn1_to_utc(&cert.validity().not_after)?;
        let public_key_algorithm = public_key_info(&cert)
            .map(|info| info.key_algorithm().name().to_string())
            .unwrap_or_else(|_| cert.public_key().algorithm.algorithm.to_id_string());

        let key_usage = match cert.key_usage() {
            Ok(Some(ext)) => key_usage_names(ext.value),
            Ok(None) => Vec::new(),
            Err(e) => {
                return Err(Error::InvalidCertificate(format!("invalid keyUsage extension: {}", e)))
            },
        };

        Ok(Self {
            der_data: der.to_vec(),
            subject: cert.subject().to_string(),
            issuer: cert.issuer().to_string(),
            serial_number: to_hex(cert.raw_serial()),
            not_before,
            not_after,
            public_key_algorithm,
            key_usage,
        })
    }

    /// Subject common name, if present.
    pub fn common_name(&self) -> Option<String> {
        let (_, cert) = parse_x509_certificate(&self.der_data).ok()?;
        let cn = cert.subject().iter_common_name().next()?.as_str().ok()?.to_string();
        Some(cn)
    }

    /// Public key of this certificate.
    pub fn public_key(&self) -> Result<PublicKeyInfo> {
        let (_, cert) = parse_x509_certificate(&self.der_data)
            .map_err(|e| Error::InvalidCertificate(format!("X.509 decoding failed: {}", e)))?;
        public_key_info(&cert)
    }

    /// Whether `at` falls inside `[not_before, not_after]`.
    pub fn is_valid_at(&self, at: DateTime<Utc>) -> bool {
        self.not_before <= at && at <= self.not_after
    }

    /// Whether subject and issuer are the same name.
    pub fn is_self_issued(&self) -> bool {
        self.subject == self.issuer
    }

    /// Value of the subjectKeyIdentifier extension (RFC 5280 §4.2.1.2).
    pub fn subject_key_identifier(&self) -> Option<Vec<u8>> {
        let (_, cert) = parse_x509_certificate(&self.der_data).ok()?;
        cert.extensions().iter().find_map(|ext| match ext.parsed_extension() {
            ParsedExtension::SubjectKeyIdentifier(id) => Some(id.0.to_vec()),
            _ => None,
        })
    }

    /// Extended key usage purposes, `None` when the extension is absent.
    ///
    /// Known purposes use their RFC 5280 names; others appear as dotted OIDs.
    pub fn extended_key_usage(&self) -> Option<Vec<String>> {
        let (_, cert) = parse_x509_certificate(&self.der_data).ok()?;
        let eku = cert.extended_key_usage().ok()??.value;
        let mut purposes: Vec<String> = [
            (eku.any, "anyExtendedKeyUsage"),
            (eku.server_auth, "serverAuth"),
            (eku.client_auth, "clientAuth"),
            (eku.code_signing, "codeSigning"),
            (eku.email_protection, "emailProtection"),
            (eku.time_stamping, "timeStamping"),
            (eku.ocsp_signing, "OCSPSigning"),
        ]
        .into_iter()
        .filter(|(set, _)| *set)
        .map(|(_, name)| name.to_string())
        .collect();
        purposes.extend(eku.other.iter().map(|oid| oid.to_id_string()));
        Some(purposes)
    }

    /// `(tbsCertificate DER, signature algorithm OID, signature bytes)`.
    pub(crate) fn signed_parts(&self) -> Result<(Vec<u8>, String, Vec<u8>)> {
        let (_, cert) = parse_x509_certificate(&self.der_data)
            .map_err(|e| Error::InvalidCertificate(format!("X.509 decoding failed: {}", e)))?;
        let signature: &[u8] = &cert.signature_value.data;
        Ok((
            cert.tbs_certificate.as_ref().to_vec(),
            cert.signature_algorithm.algorithm.to_id_string(),
            signature.to_vec(),
        ))
    }
}

fn asn1_to_utc(time: &ASN1Time) -> Result<DateTime<Utc>> {
    DateTime::<Utc>::from_timestamp(time.timestamp(), 0)
        .ok_or_else(|| Error::InvalidCertificate(format!("validity time out of range: {}", time)))
}

fn key_usage_names(usage: &KeyUsage) -> Vec<String> {
    [
        (usage.digital_signature(), "digitalSignature"),
        (usage.non_repudiation(), "nonRepudiation"),
        (usage.key_encipherment(), "keyEncipherment"),
        (usage.data_encipherment(), "dataEncipherment"),
        (usage.key_agreement(), "keyAgreement"),
        (usage.key_cert_sign(), "keyCertSign"),
        (usage.crl_sign(), "cRLSign"),
        (usage.encipher_only(), "encipherOnly"),
        (usage.decipher_only(), "decipherOnly"),
    ]
    .into_iter()
    .filter(|(set, _)| *set)
    .map(|(_, name)| name.to_string())
    .collect()
}

fn public_key_info(cert: &x509_parser::certificate::X509Certificate<'_>) -> Result<PublicKeyInfo> {
    let spki = cert.public_key();
    let algorithm = spki.algorithm.algorithm.to_id_string();

    if algorithm == oids::RSA_ENCRYPTION.to_string() {
        match spki.parsed() {
            Ok(x509_parser::public_key::PublicKey::RSA(rsa)) => {
                let modulus = strip_leading_zeros(rsa.modulus).to_vec();
                Ok(PublicKeyInfo::Rsa {
                    spki_der: spki.raw.to_vec(),
                    bits: (modulus.len() * 8) as u32,
                    modulus,
                })
            },
            _ => Err(Error::InvalidCertificate("malformed RSA public key".to_string())),
        }
    } else if algorithm == oids::EC_PUBLIC_KEY.to_string() {
        let curve_oid = spki
            .algorithm
            .parameters
            .as_ref()
            .and_then(|p| p.as_oid().ok())
            .map(|oid| oid.to_id_string())
            .ok_or_else(|| Error::InvalidCertificate("EC key without named curve".to_string()))?;
        let curve = [EcdsaCurve::P256, EcdsaCurve::P384, EcdsaCurve::P521]
            .into_iter()
            .find(|c| c.oid().to_string() == curve_oid)
            .ok_or_else(|| Error::UnsupportedAlgorithm(format!("EC curve {}", curve_oid)))?;
        let point: &[u8] = &spki.subject_public_key.data;
        Ok(PublicKeyInfo::Ec {
            curve,
            point: point.to_vec(),
        })
    } else {
        Err(Error::UnsupportedAlgorithm(format!("public key algorithm {}", algorithm)))
    }
}

pub(crate) fn strip_leading_zeros(bytes: &[u8]) -> &[u8] {
    let start = bytes.iter().position(|b| *b != 0).unwrap_or(bytes.len());
    &bytes[start..]
}

pub(crate) fn to_hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

/// Private key material, normalized to PKCS#8 DER.
#[derive(Clone, PartialEq, Eq)]
pub struct PrivateKey {
    /// Key family
    pub algorithm: KeyAlgorithm,
    /// Key size in bits
    pub key_size: u32,
    /// PKCS#8 `PrivateKeyInfo` DER
    pub der_data: Vec<u8>,
}

impl std::fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PrivateKey")
            .field("algorithm", &self.algorithm)
            .field("key_size", &self.key_size)
            .field("der_data", &"[REDACTED]")
            .finish()
    }
}

/// Certificate, key and chain for one signing call.
#[derive(Clone)]
pub struct SigningCredentials {
    /// Signer (leaf) certificate
    pub certificate: X509Certificate,
    /// Signer's private key
    pub private_key: PrivateKey,
    /// Chain ordered leaf to root; the leaf is always first
    pub certificate_chain: Vec<X509Certificate>,
}

impl SigningCredentials {
    /// Credentials with a single-certificate chain.
    pub fn new(certificate: X509Certificate, private_key: PrivateKey) -> Self {
        Self {
            certificate_chain: vec![certificate.clone()],
            certificate,
            private_key,
        }
    }

    /// Replace the chain; the leaf is prepended if missing.
    pub fn with_chain(mut self, chain: Vec<X509Certificate>) -> Self {
        let mut full = Vec::with_capacity(chain.len() + 1);
        if chain.first() != Some(&self.certificate) {
            full.push(self.certificate.clone());
        }
        full.extend(chain);
        self.certificate_chain = full;
        self
    }
}

impl std::fmt::Debug for SigningCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SigningCredentials")
            .field("certificate", &self.certificate.subject)
            .field("private_key", &"[REDACTED]")
            .field("chain", &format!("{} certificates", self.certificate_chain.len()))
            .finish()
    }
}

/// Outcome of certificate or chain validation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CertificateValidationResult {
    /// All checks passed
    pub is_valid: bool,
    /// Every link is signed by the next certificate
    pub chain_valid: bool,
    /// Every certificate is inside its validity window
    pub not_expired: bool,
    /// No certificate is known to be revoked
    pub not_revoked: bool,
    /// The chain ends at a trusted root
    pub trusted: bool,
    /// Failures, with 5000-range codes
    pub errors: Vec<ValidationError>,
    /// Non-fatal notes
    pub warnings: Vec<String>,
}

impl CertificateValidationResult {
    fn new() -> Self {
        Self {
            is_valid: false,
            chain_valid: true,
            not_expired: true,
            not_revoked: true,
            trusted: false,
            errors: Vec::new(),
            warnings: Vec::new(),
        }
    }

    fn fail(&mut self, error: Error) {
        self.errors.push(ValidationError::from_error(&error, ErrorSeverity::Error));
    }

    fn finish(mut self) -> Self {
        self.is_valid = self.chain_valid && self.not_expired && self.not_revoked && self.trusted;
        self
    }

    /// Turn a failed result into the matching error.
    ///
    /// Expiry is reported before revocation, revocation before trust.
    pub fn into_result(self) -> Result<Self> {
        if self.is_valid {
            return Ok(self);
        }
        let detail = |code: u16| {
            self.errors
                .iter()
                .find(|e| e.code == code)
                .map(|e| e.message.clone())
                .unwrap_or_default()
        };
        if !self.not_expired {
            Err(Error::CertificateExpired(detail(5002)))
        } else if !self.not_revoked {
            Err(Error::CertificateRevoked(detail(5003)))
        } else {
            Err(Error::CertificateChainValidation(detail(5001)))
        }
    }
}

/// Loads credentials and validates certificates.
///
/// Owns the revocation checker and the TTL cache its answers are memoized in.
pub struct CertificateManager {
    revocation: Box<dyn RevocationChecker>,
    cache: Mutex<TtlCache<String, RevocationStatus>>,
}

impl Default for CertificateManager {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for CertificateManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CertificateManager").finish_non_exhaustive()
    }
}

impl CertificateManager {
    /// Manager without revocation checking.
    pub fn new() -> Self {
        Self::with_revocation_checker(Box::new(NoRevocationCheck), REVOCATION_CACHE_TTL)
    }

    /// Manager consulting `checker`, caching answers for `ttl`.
    pub fn with_revocation_checker(checker: Box<dyn RevocationChecker>, ttl: Duration) -> Self {
        Self {
            revocation: checker,
            cache: Mutex::new(TtlCache::new(ttl)),
        }
    }

    /// Load credentials from a certificate PEM and a private key PEM.
    ///
    /// Extra certificates after the first form the chain. Encrypted PKCS#8
    /// keys need `password`.
    pub fn load_from_pem(
        &self,
        cert_pem: &str,
        key_pem: &str,
        password: Option<&str>,
    ) -> Result<SigningCredentials> {
        loader::load_from_pem(cert_pem, key_pem, password)
    }

    /// Parse every certificate in a PEM bundle, e.g. a set of trusted roots.
    pub fn load_certificates_pem(&self, pem: &str) -> Result<Vec<X509Certificate>> {
        loader::load_certificates_pem(pem)
    }

    /// Load credentials from a PKCS#12 container.
    pub fn load_from_pkcs12(&self, data: &[u8], password: &str) -> Result<SigningCredentials> {
        loader::load_from_pkcs12(data, password)
    }

    /// Validate one certificate at the current time.
    ///
    /// The certificate is either itself a trusted root or must be issued by one.
    pub fn validate_certificate(
        &self,
        certificate: &X509Certificate,
        trusted_roots: &[X509Certificate],
    ) -> Result<CertificateValidationResult> {
        self.validate_certificate_chain_at(
            std::slice::from_ref(certificate),
            trusted_roots,
            Utc::now(),
        )
    }

    /// Validate one certificate at `at`.
    pub fn validate_certificate_at(
        &self,
        certificate: &X509Certificate,
        trusted_roots: &[X509Certificate],
        at: DateTime<Utc>,
    ) -> Result<CertificateValidationResult> {
        self.validate_certificate_chain_at(std::slice::from_ref(certificate), trusted_roots, at)
    }

    /// Validate a leaf-first chain at the current time.
    pub fn validate_certificate_chain(
        &self,
        chain: &[X509Certificate],
        trusted_roots: &[X509Certificate],
    ) -> Result<CertificateValidationResult> {
        self.validate_certificate_chain_at(chain, trusted_roots, Utc::now())
    }

    /// Validate a leaf-first chain at `at`.
    pub fn validate_certificate_chain_at(
        &self,
        chain: &[X509Certificate],
        trusted_roots: &[X509Certificate],
        at: DateTime<Utc>,
    ) -> Result<CertificateValidationResult> {
        if chain.is_empty() {
            return Err(Error::InvalidInput("certificate chain is empty".to_string()));
        }

        let mut report = CertificateValidationResult::new();

        for cert in chain {
            if !cert.is_valid_at(at) {
                report.not_expired = false;
                report.fail(Error::CertificateExpired(format!(
                    "{} is valid from {} to {}",
                    cert.subject, cert.not_before, cert.not_after
                )));
            }
        }

        for pair in chain.windows(2) {
            let (child, parent) = (&pair[0], &pair[1]);
            if !validation::issued_by(child, parent) {
                report.chain_valid = false;
                report.fail(Error::CertificateChainValidation(format!(
                    "{} is not signed by {}",
                    child.subject, parent.subject
                )));
            }
        }

        let last = &chain[chain.len() - 1];
        let anchor = if trusted_roots.iter().any(|root| root.der_data == last.der_data) {
            Some(last)
        } else {
            trusted_roots.iter().find(|root| validation::issued_by(last, root))
        };

        match anchor {
            Some(root) => {
                report.trusted = true;
                if !root.is_valid_at(at) && !chain.contains(root) {
                    report.not_expired = false;
                    report.fail(Error::CertificateExpired(format!(
                        "trusted root {} is outside its validity window",
                        root.subject
                    )));
                }
            },
            None => {
                if trusted_roots.is_empty() {
                    report.warnings.push("no trusted roots supplied".to_string());
                }
                report.fail(Error::CertificateChainValidation(format!(
                    "{} does not chain to a trusted root",
                    last.subject
                )));
            },
        }

        for (i, cert) in chain.iter().enumerate() {
            let issuer = chain.get(i + 1).or(anchor);
            match self.revocation_status(cert, issuer)? {
                RevocationStatus::Revoked { revoked_at } => {
                    report.not_revoked = false;
                    let when = revoked_at.map(|t| format!(" on {}", t)).unwrap_or_default();
                    report.fail(Error::CertificateRevoked(format!(
                        "{} (serial {}) was revoked{}",
                        cert.subject, cert.serial_number, when
                    )));
                },
                RevocationStatus::Unknown => {
                    report
                        .warnings
                        .push(format!("revocation status of {} is unknown", cert.subject));
                },
                RevocationStatus::Good => {},
            }
        }

        let report = report.finish();
        log::debug!(
            "Validated chain of {} for {}: valid={}",
            chain.len(),
            chain[0].subject,
            report.is_valid
        );
        Ok(report)
    }

    fn revocation_status(
        &self,
        cert: &X509Certificate,
        issuer: Option<&X509Certificate>,
    ) -> Result<RevocationStatus> {
        let key = format!("{}#{}", cert.issuer, cert.serial_number);
        {
            let mut cache = self
                .cache
                .lock()
                .map_err(|_| Error::Concurrency("revocation cache lock poisoned".to_string()))?;
            if let Some(status) = cache.get(&key) {
                return Ok(status);
            }
        }

        let status = self.revocation.check(cert, issuer)?;
        self.cache
            .lock()
            .map_err(|_| Error::Concurrency("revocation cache lock poisoned".to_string()))?
            .insert(key, status.clone());
        Ok(status)
    }
}
