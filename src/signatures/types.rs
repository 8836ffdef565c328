//! Digital signature types and data structures.

use super::byterange::ByteRange;
use crate::certificate::X509Certificate;
use crate::crypto::algorithms::{HashAlgorithm, SignatureAlgorithm};
use crate::error::{ErrorSeverity, ValidationError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Signature sub-filter type (signature format).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SignatureSubFilter {
    /// adbe.pkcs7.detached - PKCS#7 detached signature
    #[default]
    Pkcs7Detached,
    /// adbe.pkcs7.sha1 - PKCS#7 with SHA-1 digest
    Pkcs7Sha1,
    /// ETSI.CAdES.detached - PAdES CAdES signature
    CadesDetached,
    /// ETSI.RFC3161 - Timestamp token
    Rfc3161,
}

impl SignatureSubFilter {
    /// Get the PDF name for this sub-filter.
    pub fn as_pdf_name(&self) -> &'static str {
        match self {
            SignatureSubFilter::Pkcs7Detached => "adbe.pkcs7.detached",
            SignatureSubFilter::Pkcs7Sha1 => "adbe.pkcs7.sha1",
            SignatureSubFilter::CadesDetached => "ETSI.CAdES.detached",
            SignatureSubFilter::Rfc3161 => "ETSI.RFC3161",
        }
    }

    /// Parse a PDF name into a sub-filter type.
    pub fn from_pdf_name(name: &str) -> Option<Self> {
        match name {
            "adbe.pkcs7.detached" => Some(SignatureSubFilter::Pkcs7Detached),
            "adbe.pkcs7.sha1" => Some(SignatureSubFilter::Pkcs7Sha1),
            "ETSI.CAdES.detached" => Some(SignatureSubFilter::CadesDetached),
            "ETSI.RFC3161" => Some(SignatureSubFilter::Rfc3161),
            _ => None,
        }
    }
}

/// RGB color with components in `0.0..=1.0`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Color {
    /// Red
    pub r: f32,
    /// Green
    pub g: f32,
    /// Blue
    pub b: f32,
}

impl Color {
    /// Black.
    pub const BLACK: Color = Color::rgb(0.0, 0.0, 0.0);
    /// White.
    pub const WHITE: Color = Color::rgb(1.0, 1.0, 1.0);

    /// Color from components; values are clamped when rendered.
    pub const fn rgb(r: f32, g: f32, b: f32) -> Self {
        Self { r, g, b }
    }

    /// Operands for `rg`/`RG`, e.g. `0.5 0 1`.
    pub fn to_operands(&self) -> String {
        [self.r, self.g, self.b]
            .iter()
            .map(|c| crate::writer::format_number(c.clamp(0.0, 1.0) as f64))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Visible signature appearance configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SignatureAppearance {
    /// Whether anything is drawn; invisible signatures get a zero rectangle
    pub visible: bool,
    /// Text to draw instead of the generated signer/date/reason lines
    pub text: Option<String>,
    /// Fill color behind the text
    pub background_color: Option<Color>,
    /// Border stroke color
    pub border_color: Option<Color>,
    /// Border width in points
    pub border_width: f32,
    /// Font size in points; `None` sizes the text to the rectangle
    pub font_size: Option<f32>,
    /// Text color
    pub text_color: Color,
    /// Whether to show signer name
    pub show_name: bool,
    /// Whether to show signing date
    pub show_date: bool,
    /// Whether to show signing reason
    pub show_reason: bool,
    /// Whether to show signing location
    pub show_location: bool,
}

impl Default for SignatureAppearance {
    fn default() -> Self {
        Self {
            visible: true,
            text: None,
            background_color: None,
            border_color: Some(Color::BLACK),
            border_width: 1.0,
            font_size: None,
            text_color: Color::BLACK,
            show_name: true,
            show_date: true,
            show_reason: true,
            show_location: true,
        }
    }
}

impl SignatureAppearance {
    /// An appearance that draws nothing.
    pub fn invisible() -> Self {
        Self {
            visible: false,
            ..Self::default()
        }
    }

    /// Replace the generated lines with fixed text.
    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }

    /// Set the background fill.
    pub fn with_background(mut self, color: Color) -> Self {
        self.background_color = Some(color);
        self
    }

    /// Set a fixed font size.
    pub fn with_font_size(mut self, size: f32) -> Self {
        self.font_size = Some(size);
        self
    }
}

/// Subject, issuer and validity of a signer certificate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CertificateInfo {
    /// Subject distinguished name
    pub subject: String,
    /// Issuer distinguished name
    pub issuer: String,
    /// Serial number, lowercase hex
    pub serial_number: String,
    /// Start of validity
    pub not_before: DateTime<Utc>,
    /// End of validity
    pub not_after: DateTime<Utc>,
    /// Subject common name
    pub common_name: Option<String>,
}

impl From<&X509Certificate> for CertificateInfo {
    fn from(cert: &X509Certificate) -> Self {
        Self {
            subject: cert.subject.clone(),
            issuer: cert.issuer.clone(),
            serial_number: cert.serial_number.clone(),
            not_before: cert.not_before,
            not_after: cert.not_after,
            common_name: cert.common_name(),
        }
    }
}

/// A signature embedded in the document.
///
/// Read back from the signature dictionary; never edited after signing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DigitalSignature {
    /// Fully-qualified name of the owning field
    pub field_name: String,
    /// `/Contents` bytes (the DER container, possibly zero-padded)
    pub signature_data: Vec<u8>,
    /// `/M`, falling back to the container's signing time
    pub signing_time: DateTime<Utc>,
    /// `/Name`, falling back to the signer certificate's common name
    pub signer_name: String,
    /// `/Reason`
    pub reason: Option<String>,
    /// `/Location`
    pub location: Option<String>,
    /// `/ContactInfo`
    pub contact_info: Option<String>,
    /// Signer certificate summary, when the container decodes
    pub certificate_info: Option<CertificateInfo>,
    /// Bytes covered by the signature
    pub byte_range: ByteRange,
    /// `/SubFilter` name
    pub sub_filter: Option<String>,
}

impl DigitalSignature {
    /// `/Contents` with the zero padding after the DER container removed.
    pub fn container_bytes(&self) -> &[u8] {
        super::pkcs7::trim_der_padding(&self.signature_data)
    }
}

/// Signer-visible values written into the signature dictionary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignatureDetails {
    /// `/Name`
    pub signer_name: String,
    /// `/M`
    pub signing_time: DateTime<Utc>,
    /// `/Reason`
    pub reason: Option<String>,
    /// `/Location`
    pub location: Option<String>,
    /// `/ContactInfo`
    pub contact_info: Option<String>,
}

/// Options for signing a PDF.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SigningOptions {
    /// Reason for signing
    pub reason: Option<String>,
    /// Location where the document was signed
    pub location: Option<String>,
    /// Contact information
    pub contact_info: Option<String>,
    /// Digest over the byte range
    pub hash_algorithm: HashAlgorithm,
    /// Signature scheme; derived from the key and hash when unset
    pub signature_algorithm: Option<SignatureAlgorithm>,
    /// Visible appearance
    pub appearance: Option<SignatureAppearance>,
    /// Existing unsigned field to sign; a new field is created when unset
    pub target_field: Option<String>,
    /// Name of the signer (if different from certificate CN)
    pub signer_name: Option<String>,
    /// Signing time; the current time when unset
    pub signing_time: Option<DateTime<Utc>>,
}

impl Default for SigningOptions {
    fn default() -> Self {
        Self {
            reason: None,
            location: None,
            contact_info: None,
            hash_algorithm: HashAlgorithm::Sha256,
            signature_algorithm: None,
            appearance: None,
            target_field: None,
            signer_name: None,
            signing_time: None,
        }
    }
}

impl SigningOptions {
    /// Set the reason for signing.
    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    /// Set the signing location.
    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        self.location = Some(location.into());
        self
    }

    /// Set contact information.
    pub fn with_contact_info(mut self, contact: impl Into<String>) -> Self {
        self.contact_info = Some(contact.into());
        self
    }

    /// Set the digest algorithm.
    pub fn with_hash_algorithm(mut self, hash: HashAlgorithm) -> Self {
        self.hash_algorithm = hash;
        self
    }

    /// Pin the signature scheme.
    pub fn with_signature_algorithm(mut self, algorithm: SignatureAlgorithm) -> Self {
        self.signature_algorithm = Some(algorithm);
        self
    }

    /// Draw a visible appearance.
    pub fn with_appearance(mut self, appearance: SignatureAppearance) -> Self {
        self.appearance = Some(appearance);
        self
    }

    /// Sign an existing field.
    pub fn with_target_field(mut self, name: impl Into<String>) -> Self {
        self.target_field = Some(name.into());
        self
    }

    /// Fix the signing time.
    pub fn with_signing_time(mut self, time: DateTime<Utc>) -> Self {
        self.signing_time = Some(time);
        self
    }
}

/// Algorithms recovered from a signature.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignatureAlgorithmInfo {
    /// Digest, when recognized
    pub hash_algorithm: Option<HashAlgorithm>,
    /// Scheme, when recognized
    pub signature_algorithm: Option<SignatureAlgorithm>,
    /// Digest algorithm OID as found
    pub hash_oid: String,
    /// Signature algorithm OID as found
    pub signature_oid: String,
    /// `/SubFilter`
    pub sub_filter: Option<String>,
}

/// Decoded view of a CMS SignedData container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pkcs7Info {
    /// `eContentType` OID
    pub content_type: String,
    /// Certificate named by the SignerInfo's `sid`
    pub signer_certificate: Option<X509Certificate>,
    /// Signer first, then the chain in issuer order, then anything unlinked
    pub certificates: Vec<X509Certificate>,
    /// `digestAlgorithm` OID
    pub digest_algorithm_oid: String,
    /// `signatureAlgorithm` OID
    pub signature_algorithm_oid: String,
    /// Recognized digest
    pub digest_algorithm: Option<HashAlgorithm>,
    /// Recognized scheme
    pub signature_algorithm: Option<SignatureAlgorithm>,
    /// `signingTime` attribute
    pub signing_time: Option<DateTime<Utc>>,
    /// `messageDigest` attribute
    pub message_digest: Option<Vec<u8>>,
    /// The signature value
    pub signature_value: Vec<u8>,
    /// DER `SET OF Attribute` that the signature covers
    pub signed_attributes: Option<Vec<u8>>,
    /// An RFC 3161 token is attached
    pub has_timestamp: bool,
    /// The attached `TimeStampToken` DER
    pub timestamp_token: Option<Vec<u8>>,
    /// `eContent` octets; `None` for detached containers
    pub encapsulated_content: Option<Vec<u8>>,
}

/// One signature as reported by extraction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractedSignature {
    /// Owning field
    pub field_name: String,
    /// The signature and its dictionary values
    pub signature: DigitalSignature,
    /// Signer certificate first
    pub certificate_chain: Vec<X509Certificate>,
    /// Algorithm identifiers
    pub algorithm: SignatureAlgorithmInfo,
    /// Decoded container; `None` when `/Contents` is not CMS
    pub pkcs7: Option<Pkcs7Info>,
}

/// Outcome of validating one signature.
///
/// A failed check is recorded here rather than returned as an error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationResult {
    /// Owning field
    pub field_name: String,
    /// Signer name as recorded
    pub signer_name: String,
    /// Signing time as recorded
    pub signing_time: DateTime<Utc>,
    /// Signature and integrity checks both passed
    pub is_valid: bool,
    /// The signature value verifies over the signed attributes or digest
    pub signature_valid: bool,
    /// The covered bytes still hash to the signed digest
    pub document_intact: bool,
    /// Signer certificate is within its validity window at signing time
    pub certificate_valid: bool,
    /// Byte range reaches the end of the file
    pub covers_whole_document: bool,
    /// Failures
    pub errors: Vec<ValidationError>,
    /// Non-fatal findings
    pub warnings: Vec<String>,
}

impl ValidationResult {
    pub(crate) fn new(signature: &DigitalSignature) -> Self {
        Self {
            field_name: signature.field_name.clone(),
            signer_name: signature.signer_name.clone(),
            signing_time: signature.signing_time,
            is_valid: false,
            signature_valid: false,
            document_intact: false,
            certificate_valid: false,
            covers_whole_document: false,
            errors: Vec::new(),
            warnings: Vec::new(),
        }
    }

    pub(crate) fn error(&mut self, error: crate::error::Error) {
        self.errors.push(ValidationError::from_error(&error, ErrorSeverity::Error));
    }
}

/// How the document relates to what a signature covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DocumentIntegrityStatus {
    /// Covered bytes unchanged
    Intact,
    /// Covered bytes changed since signing
    Modified,
    /// The signature cannot be evaluated
    Corrupted,
}

/// Kind of change found after a signature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ModificationType {
    /// Covered bytes no longer hash to the signed digest
    ContentChanged,
    /// The signed field is gone from the form
    SignatureFieldRemoved,
    /// Later revisions were appended after signing
    IncrementalUpdateAppended,
    /// `/ByteRange` is inconsistent with the file
    ByteRangeInvalid,
}

/// One finding of tampering detection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModificationInfo {
    /// What changed
    pub modification_type: ModificationType,
    /// Human-readable detail
    pub description: String,
    /// Where the change starts, when known
    pub byte_offset: Option<usize>,
    /// How serious the change is
    pub severity: ErrorSeverity,
}

/// Tampering report for one signature.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TamperingDetectionResult {
    /// Owning field
    pub field_name: String,
    /// Overall status
    pub status: DocumentIntegrityStatus,
    /// Individual findings
    pub modifications: Vec<ModificationInfo>,
}

impl TamperingDetectionResult {
    /// Whether anything other than appended revisions was found.
    pub fn is_tampered(&self) -> bool {
        self.status != DocumentIntegrityStatus::Intact
    }
}
