//! CMS SignedData containers for `adbe.pkcs7.detached` signatures.
//!
//! The container is detached: `eContent` is absent and the signed
//! attributes carry the digest of the document byte range (RFC 5652,
//! Section 5; ISO 32000-1:2008, Section 12.8.3.3).
//!
//! Signing is two-phase. [`Pkcs7Builder::signed_attributes_der`] yields the
//! DER `SET OF Attribute` that the private key signs; the resulting
//! signature value is then handed back with [`Pkcs7Builder::with_signature`]
//! before [`Pkcs7Builder::build`].

use super::types::Pkcs7Info;
use crate::certificate::{order_chain, X509Certificate};
use crate::crypto::algorithms::{oids, EcdsaCurve, HashAlgorithm, SignatureAlgorithm};
use crate::crypto::ecdsa_raw_to_der;
use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use cms::cert::{CertificateChoices, IssuerAndSerialNumber};
use cms::content_info::{CmsVersion, ContentInfo};
use cms::signed_data::{
    CertificateSet, EncapsulatedContentInfo, SignedAttributes, SignedData, SignerIdentifier,
    SignerInfo, SignerInfos,
};
use der::asn1::{GeneralizedTime, ObjectIdentifier, OctetString, SetOfVec, UtcTime};
use der::{Any, AnyRef, Decode, Encode, Sequence};
use spki::{AlgorithmIdentifier, AlgorithmIdentifierOwned, AlgorithmIdentifierRef};
use std::time::Duration;
use x509_cert::attr::Attribute;
use x509_cert::ext::pkix::SubjectKeyIdentifier;
use x509_cert::time::Time;
use x509_cert::Certificate;

/// `ESSCertIDv2` with the default SHA-256 hash algorithm (RFC 5035).
#[derive(Clone, Debug, Eq, PartialEq, Sequence)]
struct EssCertIdV2 {
    cert_hash: OctetString,
}

/// `SigningCertificateV2` without policies (RFC 5035).
#[derive(Clone, Debug, Eq, PartialEq, Sequence)]
struct SigningCertificateV2 {
    certs: Vec<EssCertIdV2>,
}

fn container_error(e: impl std::fmt::Display) -> Error {
    Error::ContainerConstruction(e.to_string())
}

/// How the SignerInfo names its certificate (RFC 5652 §5.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SignerIdentifierKind {
    /// `issuerAndSerialNumber`, CMS version 1
    #[default]
    IssuerAndSerialNumber,
    /// `subjectKeyIdentifier`, CMS version 3
    SubjectKeyIdentifier,
}

/// Assembles a CMS SignedData container, detached unless content is set.
#[derive(Debug, Clone)]
pub struct Pkcs7Builder {
    hash_algorithm: HashAlgorithm,
    signature_algorithm: SignatureAlgorithm,
    signer_identifier: SignerIdentifierKind,
    content_type: ObjectIdentifier,
    content: Option<Vec<u8>>,
    certificate: Option<X509Certificate>,
    chain: Vec<X509Certificate>,
    signing_time: DateTime<Utc>,
    message_digest: Option<Vec<u8>>,
    signature: Option<Vec<u8>>,
    timestamp_token: Option<Vec<u8>>,
}

impl Pkcs7Builder {
    /// Builder for the given digest and signature scheme, timestamped now.
    pub fn new(hash_algorithm: HashAlgorithm, signature_algorithm: SignatureAlgorithm) -> Self {
        Self {
            hash_algorithm,
            signature_algorithm,
            signer_identifier: SignerIdentifierKind::default(),
            content_type: oids::ID_DATA,
            content: None,
            certificate: None,
            chain: Vec::new(),
            signing_time: Utc::now(),
            message_digest: None,
            signature: None,
            timestamp_token: None,
        }
    }

    /// Set the signer certificate.
    pub fn with_certificate(mut self, certificate: X509Certificate) -> Self {
        self.certificate = Some(certificate);
        self
    }

    /// Add chain certificates; duplicates of the signer are dropped.
    pub fn with_chain(mut self, chain: &[X509Certificate]) -> Self {
        self.chain.extend(chain.iter().cloned());
        self
    }

    /// Choose how the signer certificate is identified.
    pub fn with_signer_identifier(mut self, kind: SignerIdentifierKind) -> Self {
        self.signer_identifier = kind;
        self
    }

    /// Encapsulate `content` of type `content_type` instead of signing
    /// detached; the message digest is taken over `content`.
    pub fn with_encapsulated_content(mut self, content_type: ObjectIdentifier, content: Vec<u8>) -> Self {
        self.message_digest = Some(self.hash_algorithm.digest(&content));
        self.content_type = content_type;
        self.content = Some(content);
        self
    }

    /// Set the `signingTime` attribute.
    pub fn with_signing_time(mut self, time: DateTime<Utc>) -> Self {
        self.signing_time = time;
        self
    }

    /// Set the `messageDigest` attribute (the byte-range digest).
    pub fn with_message_digest(mut self, digest: Vec<u8>) -> Self {
        self.message_digest = Some(digest);
        self
    }

    /// Set the signature over [`Pkcs7Builder::signed_attributes_der`].
    ///
    /// ECDSA signatures may be raw `r || s`; they are DER-encoded on build.
    pub fn with_signature(mut self, signature: Vec<u8>) -> Self {
        self.signature = Some(signature);
        self
    }

    /// Attach an RFC 3161 `TimeStampToken` as an unsigned attribute.
    pub fn with_timestamp_token(mut self, token: Vec<u8>) -> Self {
        self.timestamp_token = Some(token);
        self
    }

    /// DER `SET OF Attribute` to be signed.
    pub fn signed_attributes_der(&self) -> Result<Vec<u8>> {
        self.signed_attributes()?.to_der().map_err(container_error)
    }

    fn signer(&self) -> Result<&X509Certificate> {
        self.certificate
            .as_ref()
            .ok_or_else(|| Error::ContainerConstruction("signer certificate is missing".to_string()))
    }

    fn signed_attributes(&self) -> Result<SignedAttributes> {
        let signer = self.signer()?;
        let digest = self
            .message_digest
            .as_ref()
            .ok_or_else(|| Error::ContainerConstruction("message digest is missing".to_string()))?;
        if digest.len() != self.hash_algorithm.digest_len() {
            return Err(Error::ContainerConstruction(format!(
                "message digest is {} bytes, {} produces {}",
                digest.len(),
                self.hash_algorithm,
                self.hash_algorithm.digest_len()
            )));
        }

        let ess = SigningCertificateV2 {
            certs: vec![EssCertIdV2 {
                cert_hash: OctetString::new(HashAlgorithm::Sha256.digest(&signer.der_data))
                    .map_err(container_error)?,
            }],
        };

        let attributes = vec![
            attribute(oids::CONTENT_TYPE, Any::encode_from(&self.content_type).map_err(container_error)?)?,
            attribute(
                oids::SIGNING_TIME,
                Any::encode_from(&encode_time(self.signing_time)?).map_err(container_error)?,
            )?,
            attribute(
                oids::MESSAGE_DIGEST,
                Any::encode_from(&OctetString::new(digest.clone()).map_err(container_error)?)
                    .map_err(container_error)?,
            )?,
            attribute(oids::SIGNING_CERTIFICATE_V2, Any::encode_from(&ess).map_err(container_error)?)?,
        ];
        SetOfVec::try_from(attributes).map_err(container_error)
    }

    /// The signature value as it will appear in the SignerInfo.
    ///
    /// Raw ECDSA `r || s` is DER-encoded; this is what an RFC 3161 message
    /// imprint must cover.
    pub fn encoded_signature(&self) -> Result<Vec<u8>> {
        let raw_signature = self
            .signature
            .as_ref()
            .filter(|s| !s.is_empty())
            .ok_or_else(|| Error::ContainerConstruction("signature value is missing".to_string()))?;
        match self.signature_algorithm.curve() {
            Some(curve) if raw_signature.len() == curve.signature_len() => {
                ecdsa_raw_to_der(curve, raw_signature)
            },
            _ => Ok(raw_signature.clone()),
        }
    }

    fn signer_identifier(&self, cert: &Certificate, signer: &X509Certificate) -> Result<SignerIdentifier> {
        match self.signer_identifier {
            SignerIdentifierKind::IssuerAndSerialNumber => {
                Ok(SignerIdentifier::IssuerAndSerialNumber(IssuerAndSerialNumber {
                    issuer: cert.tbs_certificate.issuer.clone(),
                    serial_number: cert.tbs_certificate.serial_number.clone(),
                }))
            },
            SignerIdentifierKind::SubjectKeyIdentifier => {
                let id = signer.subject_key_identifier().ok_or_else(|| {
                    Error::ContainerConstruction(format!(
                        "{} has no subjectKeyIdentifier extension",
                        signer.subject
                    ))
                })?;
                Ok(SignerIdentifier::SubjectKeyIdentifier(SubjectKeyIdentifier(
                    OctetString::new(id).map_err(container_error)?,
                )))
            },
        }
    }

    /// Encode the ContentInfo.
    pub fn build(&self) -> Result<Vec<u8>> {
        let signer = self.signer()?;
        let signature = self.encoded_signature()?;
        self.signature_algorithm
            .check_hash(self.hash_algorithm)
            .map_err(container_error)?;

        let signer_cert = Certificate::from_der(&signer.der_data).map_err(container_error)?;
        let mut certificates = vec![CertificateChoices::Certificate(signer_cert.clone())];
        for cert in self.chain.iter().filter(|c| c.der_data != signer.der_data) {
            let decoded = Certificate::from_der(&cert.der_data).map_err(container_error)?;
            let choice = CertificateChoices::Certificate(decoded);
            if !certificates.contains(&choice) {
                certificates.push(choice);
            }
        }

        let digest_alg = AlgorithmIdentifierOwned {
            oid: self.hash_algorithm.oid(),
            parameters: None,
        };

        let unsigned_attrs = match &self.timestamp_token {
            Some(token) => {
                let value = Any::from_der(token).map_err(container_error)?;
                let attrs = vec![attribute(oids::TIMESTAMP_TOKEN, value)?];
                Some(SetOfVec::try_from(attrs).map_err(container_error)?)
            },
            None => None,
        };

        let version = match self.signer_identifier {
            SignerIdentifierKind::IssuerAndSerialNumber => CmsVersion::V1,
            SignerIdentifierKind::SubjectKeyIdentifier => CmsVersion::V3,
        };
        let econtent = match &self.content {
            Some(content) => Some(
                Any::encode_from(&OctetString::new(content.clone()).map_err(container_error)?)
                    .map_err(container_error)?,
            ),
            None => None,
        };

        let signer_info = SignerInfo {
            version,
            sid: self.signer_identifier(&signer_cert, signer)?,
            digest_alg: digest_alg.clone(),
            signed_attrs: Some(self.signed_attributes()?),
            signature_algorithm: signature_algorithm_identifier(
                self.signature_algorithm,
                self.hash_algorithm,
            )?,
            signature: OctetString::new(signature).map_err(container_error)?,
            unsigned_attrs,
        };

        let signed_data = SignedData {
            version,
            digest_algorithms: SetOfVec::try_from(vec![digest_alg]).map_err(container_error)?,
            encap_content_info: EncapsulatedContentInfo {
                econtent_type: self.content_type,
                econtent,
            },
            certificates: Some(CertificateSet(
                SetOfVec::try_from(certificates).map_err(container_error)?,
            )),
            crls: None,
            signer_infos: SignerInfos(SetOfVec::try_from(vec![signer_info]).map_err(container_error)?),
        };

        let content_info = ContentInfo {
            content_type: oids::ID_SIGNED_DATA,
            content: Any::encode_from(&signed_data).map_err(container_error)?,
        };
        let der = content_info.to_der().map_err(container_error)?;
        log::debug!(
            "Built CMS container: {} bytes, {} certificates",
            der.len(),
            signed_data.certificates.as_ref().map_or(0, |c| c.0.len())
        );
        Ok(der)
    }
}

fn attribute(oid: ObjectIdentifier, value: Any) -> Result<Attribute> {
    Ok(Attribute {
        oid,
        values: SetOfVec::try_from(vec![value]).map_err(container_error)?,
    })
}

/// UTCTime through 2049, GeneralizedTime after (RFC 5652, Section 11.3).
fn encode_time(time: DateTime<Utc>) -> Result<Time> {
    let secs = u64::try_from(time.timestamp())
        .map_err(|_| Error::ContainerConstruction(format!("signing time {} precedes 1970", time)))?;
    let dt = der::DateTime::from_unix_duration(Duration::from_secs(secs)).map_err(container_error)?;
    if dt.year() < 2050 {
        Ok(Time::UtcTime(UtcTime::from_date_time(dt).map_err(container_error)?))
    } else {
        Ok(Time::GeneralTime(GeneralizedTime::from_date_time(dt)))
    }
}

fn decode_time(time: &Time) -> Option<DateTime<Utc>> {
    let since_epoch = match time {
        Time::UtcTime(t) => t.to_unix_duration(),
        Time::GeneralTime(t) => t.to_unix_duration(),
    };
    DateTime::<Utc>::from_timestamp(i64::try_from(since_epoch.as_secs()).ok()?, 0)
}

fn signature_algorithm_identifier(
    algorithm: SignatureAlgorithm,
    hash: HashAlgorithm,
) -> Result<AlgorithmIdentifierOwned> {
    let parameters = match algorithm {
        SignatureAlgorithm::RsaPss => {
            let hash_id: AlgorithmIdentifierRef<'_> = AlgorithmIdentifier {
                oid: hash.oid(),
                parameters: Some(AnyRef::NULL),
            };
            let params = pkcs1::RsaPssParams {
                hash: hash_id,
                mask_gen: AlgorithmIdentifier {
                    oid: oids::MGF1,
                    parameters: Some(hash_id.clone()),
                },
                salt_len: hash.digest_len() as u8,
                trailer_field: pkcs1::TrailerField::BC,
            };
            Some(Any::encode_from(&params).map_err(container_error)?)
        },
        a if a.is_rsa() => Some(Any::from(AnyRef::NULL)),
        _ => None,
    };
    Ok(AlgorithmIdentifierOwned {
        oid: algorithm.signer_info_oid(hash),
        parameters,
    })
}

/// Length of the DER value at the start of `data`, zero padding excluded.
///
/// Returns `data` unchanged when no complete DER header is found.
pub fn trim_der_padding(data: &[u8]) -> &[u8] {
    let total = match data {
        [0x30, len @ 0..=0x7F, ..] => Some(2 + *len as usize),
        [0x30, marker @ 0x81..=0x84, rest @ ..] => {
            let count = (*marker & 0x7F) as usize;
            rest.get(..count).and_then(|bytes| {
                let len = bytes
                    .iter()
                    .try_fold(0usize, |acc, b| acc.checked_mul(256)?.checked_add(*b as usize))?;
                len.checked_add(2 + count)
            })
        },
        _ => None,
    };
    match total {
        Some(end) if end <= data.len() => &data[..end],
        _ => data,
    }
}

/// Decode a CMS SignedData container.
///
/// Trailing zero padding is ignored. Fails with `SignatureValidation` when
/// the bytes are not a SignedData with at least one SignerInfo.
pub fn parse_container(data: &[u8]) -> Result<Pkcs7Info> {
    let invalid = |e: der::Error| Error::SignatureValidation(format!("CMS decoding failed: {}", e));

    let content_info = ContentInfo::from_der(trim_der_padding(data)).map_err(invalid)?;
    if content_info.content_type != oids::ID_SIGNED_DATA {
        return Err(Error::SignatureValidation(format!(
            "content type {} is not signedData",
            content_info.content_type
        )));
    }
    let signed_data: SignedData = content_info.content.decode_as().map_err(invalid)?;
    let signer_info = signed_data
        .signer_infos
        .0
        .iter()
        .next()
        .ok_or_else(|| Error::SignatureValidation("SignedData has no SignerInfo".to_string()))?;

    let mut decoded: Vec<(Certificate, X509Certificate)> = Vec::new();
    if let Some(set) = &signed_data.certificates {
        for choice in set.0.iter() {
            if let CertificateChoices::Certificate(cert) = choice {
                let der = cert.to_der().map_err(invalid)?;
                match X509Certificate::from_der(&der) {
                    Ok(parsed) => decoded.push((cert.clone(), parsed)),
                    Err(e) => log::warn!("Skipping undecodable certificate in container: {}", e),
                }
            }
        }
    }

    let signer_index = match &signer_info.sid {
        SignerIdentifier::IssuerAndSerialNumber(id) => decoded.iter().position(|(cert, _)| {
            cert.tbs_certificate.issuer == id.issuer
                && cert.tbs_certificate.serial_number == id.serial_number
        }),
        SignerIdentifier::SubjectKeyIdentifier(id) => decoded.iter().position(|(_, cert)| {
            cert.subject_key_identifier().as_deref() == Some(id.0.as_bytes())
        }),
    };
    let mut certificates: Vec<X509Certificate> = decoded.into_iter().map(|(_, c)| c).collect();
    let signer_certificate = signer_index.map(|i| certificates.remove(i));
    if let Some(signer) = &signer_certificate {
        certificates = order_chain(signer.clone(), certificates);
    }

    let digest_oid = signer_info.digest_alg.oid;
    let signature_oid = signer_info.signature_algorithm.oid;
    let digest_algorithm = HashAlgorithm::from_oid(&digest_oid);
    let curve: Option<EcdsaCurve> = signer_certificate
        .as_ref()
        .and_then(|c| c.public_key().ok())
        .and_then(|pk| pk.key_algorithm().curve());
    let signature_algorithm = digest_algorithm
        .and_then(|hash| SignatureAlgorithm::from_signer_info(&signature_oid, hash, curve));

    let mut signing_time = None;
    let mut message_digest = None;
    let mut signed_attributes = None;
    if let Some(attrs) = &signer_info.signed_attrs {
        signed_attributes = Some(attrs.to_der().map_err(invalid)?);
        for attr in attrs.iter() {
            let Some(value) = attr.values.iter().next() else {
                continue;
            };
            if attr.oid == oids::SIGNING_TIME {
                signing_time = value
                    .to_der()
                    .ok()
                    .and_then(|der| Time::from_der(&der).ok())
                    .as_ref()
                    .and_then(decode_time);
            } else if attr.oid == oids::MESSAGE_DIGEST {
                message_digest = value.decode_as::<OctetString>().ok().map(|o| o.as_bytes().to_vec());
            }
        }
    }
    let timestamp_token = signer_info
        .unsigned_attrs
        .as_ref()
        .and_then(|attrs| attrs.iter().find(|a| a.oid == oids::TIMESTAMP_TOKEN))
        .and_then(|attr| attr.values.iter().next())
        .and_then(|value| value.to_der().ok());
    let encapsulated_content = match &signed_data.encap_content_info.econtent {
        Some(econtent) => Some(econtent.decode_as::<OctetString>().map_err(invalid)?.as_bytes().to_vec()),
        None => None,
    };

    Ok(Pkcs7Info {
        content_type: signed_data.encap_content_info.econtent_type.to_string(),
        signer_certificate,
        certificates,
        digest_algorithm_oid: digest_oid.to_string(),
        signature_algorithm_oid: signature_oid.to_string(),
        digest_algorithm,
        signature_algorithm,
        signing_time,
        message_digest,
        signature_value: signer_info.signature.as_bytes().to_vec(),
        signed_attributes,
        has_timestamp: timestamp_token.is_some(),
        timestamp_token,
        encapsulated_content,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::certificate::{CertificateManager, SigningCredentials};
    use crate::crypto::CryptoEngine;
    use chrono::TimeZone;

    fn creds(cert: &str, key: &str) -> SigningCredentials {
        CertificateManager::new().load_from_pem(cert, key, None).unwrap()
    }

    fn rsa_chain() -> SigningCredentials {
        creds(
            include_str!("../../tests/fixtures/signer_rsa_chain.pem"),
            include_str!("../../tests/fixtures/signer_rsa_key.pem"),
        )
    }

    fn p256() -> SigningCredentials {
        creds(
            include_str!("../../tests/fixtures/signer_p256.pem"),
            include_str!("../../tests/fixtures/signer_p256_key.pem"),
        )
    }

    fn signed_container(
        creds: &SigningCredentials,
        hash: HashAlgorithm,
        algorithm: SignatureAlgorithm,
    ) -> Vec<u8> {
        let engine = CryptoEngine::new();
        let builder = Pkcs7Builder::new(hash, algorithm)
            .with_certificate(creds.certificate.clone())
            .with_chain(&creds.certificate_chain)
            .with_signing_time(Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap())
            .with_message_digest(hash.digest(b"document bytes"));
        let to_sign = hash.digest(&builder.signed_attributes_der().unwrap());
        let signature = engine
            .create_signature(&to_sign, &creds.private_key, algorithm)
            .unwrap();
        builder.with_signature(signature).build().unwrap()
    }

    #[test]
    fn test_rsa_container_round_trip() {
        let creds = rsa_chain();
        let der = signed_container(&creds, HashAlgorithm::Sha256, SignatureAlgorithm::RsaPkcs1Sha256);
        let info = parse_container(&der).unwrap();

        assert_eq!(info.content_type, oids::ID_DATA.to_string());
        assert_eq!(info.signer_certificate.as_ref(), Some(&creds.certificate));
        assert_eq!(info.certificates[0], creds.certificate);
        assert_eq!(info.certificates.len(), creds.certificate_chain.len());
        assert_eq!(info.digest_algorithm, Some(HashAlgorithm::Sha256));
        assert_eq!(info.signature_algorithm, Some(SignatureAlgorithm::RsaPkcs1Sha256));
        assert_eq!(info.message_digest, Some(HashAlgorithm::Sha256.digest(b"document bytes")));
        assert_eq!(
            info.signing_time,
            Some(Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap())
        );
        assert_eq!(info.signature_value.len(), 256);
        assert!(!info.has_timestamp);
    }

    #[test]
    fn test_signature_covers_signed_attributes() {
        let creds = rsa_chain();
        let der = signed_container(&creds, HashAlgorithm::Sha384, SignatureAlgorithm::RsaPkcs1Sha384);
        let info = parse_container(&der).unwrap();
        let attrs_digest = HashAlgorithm::Sha384.digest(info.signed_attributes.as_ref().unwrap());
        assert!(CryptoEngine::new().verify_signature(
            &info.signature_value,
            &attrs_digest,
            &creds.certificate
        ));
    }

    #[test]
    fn test_ecdsa_signature_is_der_encoded() {
        let creds = p256();
        let der = signed_container(&creds, HashAlgorithm::Sha256, SignatureAlgorithm::EcdsaP256Sha256);
        let info = parse_container(&der).unwrap();
        assert_eq!(info.signature_value[0], 0x30);
        assert_eq!(info.signature_algorithm_oid, oids::ECDSA_WITH_SHA256.to_string());
        assert_eq!(info.signature_algorithm, Some(SignatureAlgorithm::EcdsaP256Sha256));
    }

    #[test]
    fn test_pss_identifier_carries_parameters() {
        let creds = rsa_chain();
        let der = signed_container(&creds, HashAlgorithm::Sha256, SignatureAlgorithm::RsaPss);
        let info = parse_container(&der).unwrap();
        assert_eq!(info.signature_algorithm_oid, oids::RSASSA_PSS.to_string());
        assert_eq!(info.signature_algorithm, Some(SignatureAlgorithm::RsaPss));

        let id = signature_algorithm_identifier(SignatureAlgorithm::RsaPss, HashAlgorithm::Sha512).unwrap();
        assert!(id.parameters.is_some());
    }

    #[test]
    fn test_missing_parts_fail_with_container_error() {
        let creds = rsa_chain();
        let no_cert = Pkcs7Builder::new(HashAlgorithm::Sha256, SignatureAlgorithm::RsaPkcs1Sha256)
            .with_message_digest(vec![0; 32])
            .with_signature(vec![1; 256]);
        assert_eq!(no_cert.build().unwrap_err().code().as_u16(), 2006);

        let no_signature = Pkcs7Builder::new(HashAlgorithm::Sha256, SignatureAlgorithm::RsaPkcs1Sha256)
            .with_certificate(creds.certificate.clone())
            .with_message_digest(vec![0; 32]);
        assert_eq!(no_signature.build().unwrap_err().code().as_u16(), 2006);

        let wrong_digest = Pkcs7Builder::new(HashAlgorithm::Sha256, SignatureAlgorithm::RsaPkcs1Sha256)
            .with_certificate(creds.certificate)
            .with_message_digest(vec![0; 20]);
        assert_eq!(wrong_digest.signed_attributes_der().unwrap_err().code().as_u16(), 2006);
    }

    #[test]
    fn test_timestamp_token_is_unsigned_attribute() {
        let creds = rsa_chain();
        let builder = Pkcs7Builder::new(HashAlgorithm::Sha256, SignatureAlgorithm::RsaPkcs1Sha256)
            .with_certificate(creds.certificate.clone())
            .with_message_digest(vec![7; 32])
            .with_signature(vec![1; 256]);
        let before = builder.signed_attributes_der().unwrap();
        let der = builder
            .with_timestamp_token(vec![0x30, 0x03, 0x02, 0x01, 0x05])
            .build()
            .unwrap();
        let info = parse_container(&der).unwrap();
        assert!(info.has_timestamp);
        assert_eq!(info.timestamp_token.as_deref(), Some(&[0x30, 0x03, 0x02, 0x01, 0x05][..]));
        assert_eq!(info.signed_attributes.unwrap(), before);
    }

    #[test]
    fn test_subject_key_identifier_sid() {
        let creds = rsa_chain();
        let engine = CryptoEngine::new();
        let builder = Pkcs7Builder::new(HashAlgorithm::Sha256, SignatureAlgorithm::RsaPkcs1Sha256)
            .with_signer_identifier(SignerIdentifierKind::SubjectKeyIdentifier)
            .with_certificate(creds.certificate.clone())
            .with_chain(&creds.certificate_chain)
            .with_message_digest(HashAlgorithm::Sha256.digest(b"document bytes"));
        let to_sign = HashAlgorithm::Sha256.digest(&builder.signed_attributes_der().unwrap());
        let signature = engine
            .create_signature(&to_sign, &creds.private_key, SignatureAlgorithm::RsaPkcs1Sha256)
            .unwrap();
        let der = builder.with_signature(signature.clone()).build().unwrap();

        let content_info = ContentInfo::from_der(&der).unwrap();
        let signed_data = content_info.content.decode_as::<SignedData>().unwrap();
        assert_eq!(signed_data.version, CmsVersion::V3);
        let signer_info = signed_data.signer_infos.0.iter().next().unwrap();
        assert!(matches!(signer_info.sid, SignerIdentifier::SubjectKeyIdentifier(_)));

        let info = parse_container(&der).unwrap();
        assert_eq!(info.certificates.len(), 2);
        assert_eq!(info.signer_certificate.as_ref(), Some(&creds.certificate));
        let signer = info.signer_certificate.unwrap();
        assert!(engine.verify_signature(&info.signature_value, &to_sign, &signer));
    }

    #[test]
    fn test_encapsulated_content() {
        let creds = p256();
        let engine = CryptoEngine::new();
        let content = b"encapsulated payload".to_vec();
        let content_type = oids::ID_CT_TST_INFO;
        let builder = Pkcs7Builder::new(HashAlgorithm::Sha256, SignatureAlgorithm::EcdsaP256Sha256)
            .with_certificate(creds.certificate.clone())
            .with_encapsulated_content(content_type, content.clone());
        let to_sign = HashAlgorithm::Sha256.digest(&builder.signed_attributes_der().unwrap());
        let raw = engine
            .create_signature(&to_sign, &creds.private_key, SignatureAlgorithm::EcdsaP256Sha256)
            .unwrap();
        let builder = builder.with_signature(raw);
        let encoded = builder.encoded_signature().unwrap();
        assert_eq!(encoded[0], 0x30);
        let info = parse_container(&builder.build().unwrap()).unwrap();

        assert_eq!(info.content_type, content_type.to_string());
        assert_eq!(info.encapsulated_content.as_deref(), Some(content.as_slice()));
        assert_eq!(info.message_digest, Some(HashAlgorithm::Sha256.digest(&content)));
        assert_eq!(info.signature_value, encoded);
    }

    #[test]
    fn test_trim_der_padding() {
        assert_eq!(trim_der_padding(&[0x30, 0x02, 0x05, 0x00, 0, 0, 0]), &[0x30, 0x02, 0x05, 0x00]);
        let mut long = vec![0x30, 0x81, 0x80];
        long.extend(std::iter::repeat(1).take(0x80));
        long.extend([0, 0]);
        assert_eq!(trim_der_padding(&long).len(), 3 + 0x80);
        assert_eq!(trim_der_padding(&[0, 0, 0]), &[0, 0, 0]);
        assert_eq!(trim_der_padding(&[0x30, 0x05, 1]), &[0x30, 0x05, 1]);
    }

    #[test]
    fn test_trim_der_padding_huge_length() {
        let huge = [0x30, 0x84, 0xFF, 0xFF, 0xFF, 0xFF, 0x02, 0x01, 0x00];
        assert_eq!(trim_der_padding(&huge), &huge[..]);
        let truncated = [0x30, 0x84, 0xFF, 0xFF];
        assert_eq!(trim_der_padding(&truncated), &truncated[..]);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert_eq!(parse_container(b"not der").unwrap_err().code().as_u16(), 2002);
        assert!(parse_container(&[0u8; 64]).is_err());
    }
}
