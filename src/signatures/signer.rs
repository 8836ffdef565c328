//! PDF signature creation.
//!
//! Signing appends one incremental update holding the signature dictionary
//! (and, when needed, a new field). The update is first written with a
//! zero-filled `/Contents`; the bytes around it are hashed, the CMS
//! container is built over that digest, and the container is written into
//! the placeholder without moving any other byte.

use super::byterange::ByteRangeCalculator;
use super::pkcs7::Pkcs7Builder;
use super::timestamp::{obtain_token, TimestampClient};
use super::types::{SignatureAppearance, SignatureDetails, SigningOptions};
use crate::certificate::{key_matches, SigningCredentials, X509Certificate};
use crate::config::TimestampConfig;
use crate::crypto::{CryptoEngine, SignatureAlgorithm};
use crate::document::{PdfDocument, Rectangle, SignatureFieldDefinition};
use crate::editor::{IncrementalUpdateGenerator, PdfModification};
use crate::error::{Error, Result};
use chrono::{DateTime, TimeZone, Utc};
use std::sync::Arc;

/// Default widget placement for new visible signatures.
const DEFAULT_WIDGET: Rectangle = Rectangle {
    x: 50.0,
    y: 50.0,
    width: 200.0,
    height: 50.0,
};

/// Vertical step when the default placement is taken.
const WIDGET_STEP: f64 = 60.0;

/// PDF signer.
#[derive(Clone)]
pub struct PdfSigner {
    engine: CryptoEngine,
    generator: IncrementalUpdateGenerator,
    timestamp: Option<TimestampConfig>,
    timestamp_client: Option<Arc<dyn TimestampClient>>,
}

impl std::fmt::Debug for PdfSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PdfSigner")
            .field("reserved_bytes", &self.generator.calculator().capacity())
            .field("timestamp", &self.timestamp)
            .field("has_timestamp_client", &self.timestamp_client.is_some())
            .finish()
    }
}

impl Default for PdfSigner {
    fn default() -> Self {
        Self::new(CryptoEngine::new())
    }
}

impl PdfSigner {
    /// Signer using `engine` and the default `/Contents` reservation.
    pub fn new(engine: CryptoEngine) -> Self {
        Self {
            engine,
            generator: IncrementalUpdateGenerator::new(),
            timestamp: None,
            timestamp_client: None,
        }
    }

    /// Reserve `bytes` for the DER container.
    pub fn with_reserved_bytes(mut self, bytes: usize) -> Self {
        self.generator = IncrementalUpdateGenerator::with_calculator(ByteRangeCalculator::new(bytes));
        self
    }

    /// Request timestamp tokens through `client`.
    pub fn with_timestamp(mut self, config: TimestampConfig, client: Arc<dyn TimestampClient>) -> Self {
        self.timestamp = Some(config);
        self.timestamp_client = Some(client);
        self
    }

    /// Timestamp settings without a client; signing then degrades (or
    /// fails, when required) as if the authority were unreachable.
    pub fn with_timestamp_config(mut self, config: TimestampConfig) -> Self {
        self.timestamp = Some(config);
        self
    }

    /// The crypto engine.
    pub fn engine(&self) -> &CryptoEngine {
        &self.engine
    }

    /// Sign `document` and return the updated bytes.
    ///
    /// With `options.target_field` set, that unsigned field is signed;
    /// otherwise a new field named `SignatureN` is created on the first
    /// page. The returned bytes start with the unchanged input.
    pub fn sign(
        &self,
        document: &PdfDocument,
        credentials: &SigningCredentials,
        options: &SigningOptions,
    ) -> Result<Vec<u8>> {
        let hash = options.hash_algorithm;
        let key = &credentials.private_key;
        let algorithm = match options.signature_algorithm {
            Some(algorithm) => algorithm,
            None => SignatureAlgorithm::default_for(key.algorithm, hash)?,
        };
        if !algorithm.accepts_key(key.algorithm) {
            return Err(Error::AlgorithmKeyMismatch {
                algorithm: algorithm.name().to_string(),
                key: key.algorithm.name().to_string(),
            });
        }
        algorithm.check_hash(hash)?;

        let certificate = &credentials.certificate;
        if !key_matches(key, &certificate.public_key()?) {
            return Err(Error::InvalidPrivateKey(format!(
                "private key does not belong to {}",
                certificate.subject
            )));
        }

        let details = signature_details(certificate, options);
        let (field_name, mut changes) = match &options.target_field {
            Some(name) => (name.clone(), Vec::new()),
            None => {
                let name = next_field_name(document);
                let definition = new_field_definition(document, &name, options.appearance.as_ref());
                (name, vec![PdfModification::AddSignatureField(definition)])
            },
        };
        changes.push(PdfModification::EmbedSignature {
            field_name: field_name.clone(),
            signature_data: Vec::new(),
            appearance: options.appearance.clone(),
            details: details.clone(),
        });

        let prepared = self.generator.prepare_update(document, &changes)?;
        let placeholder = prepared.placeholder(&field_name).ok_or_else(|| {
            Error::DocumentModification(format!("no signature placeholder written for {:?}", field_name))
        })?;
        let message_digest = placeholder.byte_range.digest(&prepared.data, hash)?;

        let builder = Pkcs7Builder::new(hash, algorithm)
            .with_certificate(certificate.clone())
            .with_chain(&credentials.certificate_chain)
            .with_signing_time(details.signing_time)
            .with_message_digest(message_digest);
        let attributes_digest = self.engine.compute_hash(&builder.signed_attributes_der()?, hash)?;
        let signature = self.engine.create_signature(&attributes_digest, key, algorithm)?;

        let mut builder = builder.with_signature(signature);
        let token = obtain_token(
            self.timestamp_client.as_ref(),
            self.timestamp.as_ref(),
            &builder.encoded_signature()?,
            hash,
        )?;
        if let Some(token) = token {
            builder = builder.with_timestamp_token(token.der);
        }
        let container = builder.build()?;

        let contents_offset = placeholder.contents_offset;
        let mut data = prepared.data;
        self.generator
            .calculator()
            .insert_signature(&mut data, contents_offset, &container)?;

        log::info!(
            "Signed field {:?} with {} / {}: {} byte container, document {} -> {} bytes",
            field_name,
            algorithm,
            hash,
            container.len(),
            document.len(),
            data.len()
        );
        Ok(data)
    }

    /// Append a new, unsigned signature field.
    pub fn add_signature_field(
        &self,
        document: &PdfDocument,
        definition: SignatureFieldDefinition,
    ) -> Result<Vec<u8>> {
        self.generator
            .create_incremental_update(document, &[PdfModification::AddSignatureField(definition)])
    }
}

/// Dictionary values: options first, then the certificate.
fn signature_details(certificate: &X509Certificate, options: &SigningOptions) -> SignatureDetails {
    let signer_name = options
        .signer_name
        .clone()
        .or_else(|| certificate.common_name())
        .unwrap_or_else(|| certificate.subject.clone());
    SignatureDetails {
        signer_name,
        signing_time: whole_seconds(options.signing_time.unwrap_or_else(Utc::now)),
        reason: options.reason.clone(),
        location: options.location.clone(),
        contact_info: options.contact_info.clone(),
    }
}

/// `/M` and `signingTime` both carry whole seconds.
fn whole_seconds(time: DateTime<Utc>) -> DateTime<Utc> {
    Utc.timestamp_opt(time.timestamp(), 0).single().unwrap_or(time)
}

/// First free `SignatureN` name.
fn next_field_name(document: &PdfDocument) -> String {
    (1..)
        .map(|n| format!("Signature{}", n))
        .find(|name| document.signature_field(name).is_none())
        .unwrap_or_else(|| "Signature".to_string())
}

/// Field for a new signature: a zero rectangle when invisible, otherwise
/// the lowest free default slot on the first page.
fn new_field_definition(
    document: &PdfDocument,
    name: &str,
    appearance: Option<&SignatureAppearance>,
) -> SignatureFieldDefinition {
    let visible = appearance.is_some_and(|a| a.visible);
    let bounds = if visible {
        let mut slot = DEFAULT_WIDGET;
        while document
            .signature_fields()
            .iter()
            .any(|f| f.page == 0 && f.bounds.intersects(&slot))
        {
            slot.y += WIDGET_STEP;
        }
        slot
    } else {
        Rectangle::zero()
    };
    let definition = SignatureFieldDefinition::new(name, 0, bounds);
    match appearance {
        Some(a) => definition.with_appearance(a.clone()),
        None => definition,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::certificate::CertificateManager;
    use crate::crypto::HashAlgorithm;
    use crate::signatures::pkcs7::parse_container;

    const MINIMAL: &[u8] = include_bytes!("../../tests/fixtures/minimal.pdf");
    const TWO_FIELDS: &[u8] = include_bytes!("../../tests/fixtures/two_signature_fields.pdf");

    fn rsa_credentials() -> SigningCredentials {
        CertificateManager::new()
            .load_from_pem(
                include_str!("../../tests/fixtures/signer_rsa.pem"),
                include_str!("../../tests/fixtures/signer_rsa_key.pem"),
                None,
            )
            .unwrap()
    }

    #[test]
    fn test_sign_creates_invisible_field() {
        let doc = PdfDocument::parse(MINIMAL).unwrap();
        let signed = PdfSigner::default()
            .sign(&doc, &rsa_credentials(), &SigningOptions::default().with_reason("Approved"))
            .unwrap();
        assert_eq!(&signed[..MINIMAL.len()], MINIMAL);

        let signed_doc = PdfDocument::parse(&signed).unwrap();
        let field = signed_doc.signature_field("Signature1").unwrap();
        assert!(field.is_signed);
        assert!(field.bounds.is_empty());

        let sig = &signed_doc.existing_signatures()[0];
        assert_eq!(sig.signer_name, "Seal Test Signer RSA");
        assert_eq!(sig.reason.as_deref(), Some("Approved"));
        let info = parse_container(sig.container_bytes()).unwrap();
        assert_eq!(info.signature_value.len(), 256);
        assert_eq!(info.digest_algorithm, Some(HashAlgorithm::Sha256));
        assert_eq!(
            info.message_digest.unwrap(),
            sig.byte_range.digest(&signed, HashAlgorithm::Sha256).unwrap()
        );
    }

    #[test]
    fn test_sign_target_field() {
        let doc = PdfDocument::parse(TWO_FIELDS).unwrap();
        let options = SigningOptions::default()
            .with_target_field("Witness")
            .with_appearance(SignatureAppearance::default());
        let signed = PdfSigner::default().sign(&doc, &rsa_credentials(), &options).unwrap();
        let signed_doc = PdfDocument::parse(&signed).unwrap();
        assert!(signed_doc.signature_field("Witness").unwrap().is_signed);
        assert!(!signed_doc.signature_field("Approver").unwrap().is_signed);
        assert_eq!(signed_doc.signature_fields().len(), 2);
    }

    #[test]
    fn test_missing_target_field() {
        let doc = PdfDocument::parse(MINIMAL).unwrap();
        let options = SigningOptions::default().with_target_field("Nope");
        let err = PdfSigner::default().sign(&doc, &rsa_credentials(), &options).unwrap_err();
        assert_eq!(err.code().as_u16(), 3007);
    }

    #[test]
    fn test_algorithm_key_mismatch() {
        let doc = PdfDocument::parse(MINIMAL).unwrap();
        let options =
            SigningOptions::default().with_signature_algorithm(SignatureAlgorithm::EcdsaP256Sha256);
        let err = PdfSigner::default().sign(&doc, &rsa_credentials(), &options).unwrap_err();
        assert_eq!(err.code().as_u16(), 2005);
    }

    #[test]
    fn test_reservation_too_small() {
        let doc = PdfDocument::parse(MINIMAL).unwrap();
        let err = PdfSigner::default()
            .with_reserved_bytes(64)
            .sign(&doc, &rsa_credentials(), &SigningOptions::default())
            .unwrap_err();
        assert_eq!(err.code().as_u16(), 3003);
    }

    #[test]
    fn test_required_timestamp_without_client_fails() {
        let doc = PdfDocument::parse(MINIMAL).unwrap();
        let signer = PdfSigner::default()
            .with_timestamp_config(TimestampConfig::new("https://tsa.example/").required());
        let err = signer
            .sign(&doc, &rsa_credentials(), &SigningOptions::default())
            .unwrap_err();
        assert_eq!(err.code().as_u16(), 7001);
    }

    #[test]
    fn test_field_names_and_slots() {
        let doc = PdfDocument::parse(TWO_FIELDS).unwrap();
        assert_eq!(next_field_name(&doc), "Signature1");

        let visible = SignatureAppearance::default();
        let def = new_field_definition(&doc, "Signature1", Some(&visible));
        // Approver occupies [50, 100] x [50, 100] on page 0
        assert_eq!(def.bounds.y, 110.0);
        let def = new_field_definition(&doc, "Signature1", None);
        assert!(def.bounds.is_empty());
    }

    #[test]
    fn test_whole_seconds() {
        let t = Utc.timestamp_opt(1_700_000_000, 123_456_789).unwrap();
        assert_eq!(whole_seconds(t).timestamp_subsec_nanos(), 0);
    }
}
