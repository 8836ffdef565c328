//! PEM and PKCS#12 credential loading.

use super::{KeyAlgorithm, PrivateKey, PublicKeyInfo, SigningCredentials, X509Certificate};
use crate::certificate::strip_leading_zeros;
use crate::crypto::algorithms::{oids, EcdsaCurve};
use crate::error::{Error, Result};
use base64::Engine;
use lazy_static::lazy_static;
use pkcs8::{DecodePrivateKey, EncodePrivateKey};
use regex::Regex;
use rsa::pkcs1::DecodeRsaPrivateKey;
use rsa::traits::PublicKeyParts;

lazy_static! {
    static ref RE_PEM_BLOCK: Regex =
        Regex::new(r"(?s)-----BEGIN ([A-Z0-9 ]+)-----(.*?)-----END ([A-Z0-9 ]+)-----").unwrap();
}

/// One `-----BEGIN <label>-----` block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PemBlock {
    /// Label, e.g. `CERTIFICATE` or `PRIVATE KEY`
    pub label: String,
    /// Decoded body
    pub der: Vec<u8>,
}

/// Decode every PEM block in `pem`, in order.
///
/// Blocks whose END label differs from the BEGIN label are skipped. A body
/// that is not valid base64 (or carries legacy `Proc-Type` headers) fails.
pub fn parse_pem_blocks(pem: &str) -> Result<Vec<PemBlock>> {
    let mut blocks = Vec::new();
    for caps in RE_PEM_BLOCK.captures_iter(pem) {
        let (label, body, end) = (&caps[1], &caps[2], &caps[3]);
        if label != end {
            log::warn!("Skipping PEM block with mismatched labels {} / {}", label, end);
            continue;
        }
        if body.contains(':') {
            return Err(Error::InvalidInput(format!(
                "PEM block {} uses legacy headers, which are not supported",
                label
            )));
        }
        let cleaned: String = body.chars().filter(|c| !c.is_whitespace()).collect();
        let der = base64::engine::general_purpose::STANDARD
            .decode(cleaned.as_bytes())
            .map_err(|e| Error::InvalidInput(format!("PEM block {} is not base64: {}", label, e)))?;
        blocks.push(PemBlock {
            label: label.to_string(),
            der,
        });
    }
    Ok(blocks)
}

/// All certificates in a PEM bundle, in file order.
pub(crate) fn load_certificates_pem(pem: &str) -> Result<Vec<X509Certificate>> {
    let blocks = parse_pem_blocks(pem).map_err(|e| Error::InvalidCertificate(e.to_string()))?;
    let certs = blocks
        .iter()
        .filter(|b| b.label == "CERTIFICATE")
        .map(|b| X509Certificate::from_der(&b.der))
        .collect::<Result<Vec<_>>>()?;
    if certs.is_empty() {
        return Err(Error::InvalidCertificate(
            "no -----BEGIN CERTIFICATE----- block found".to_string(),
        ));
    }
    Ok(certs)
}

/// The first private key in a PEM buffer.
pub(crate) fn load_private_key_pem(pem: &str, password: Option<&str>) -> Result<PrivateKey> {
    let blocks = parse_pem_blocks(pem).map_err(|e| Error::InvalidPrivateKey(e.to_string()))?;
    let block = blocks
        .into_iter()
        .find(|b| b.label.ends_with("PRIVATE KEY"))
        .ok_or_else(|| {
            Error::InvalidPrivateKey("no -----BEGIN ... PRIVATE KEY----- block found".to_string())
        })?;

    match block.label.as_str() {
        "PRIVATE KEY" => parse_private_key_der(&block.der),
        "ENCRYPTED PRIVATE KEY" => {
            let password = password.ok_or_else(|| {
                Error::InvalidPassword("encrypted private key requires a password".to_string())
            })?;
            let encrypted = pkcs8::EncryptedPrivateKeyInfo::try_from(block.der.as_slice())
                .map_err(|e| Error::InvalidPrivateKey(format!("encrypted PKCS#8: {}", e)))?;
            let decrypted = encrypted.decrypt(password).map_err(|_| {
                Error::InvalidPassword("password does not decrypt the private key".to_string())
            })?;
            parse_private_key_der(decrypted.as_bytes())
        },
        "RSA PRIVATE KEY" => {
            let key = rsa::RsaPrivateKey::from_pkcs1_der(&block.der)
                .map_err(|e| Error::InvalidPrivateKey(format!("PKCS#1 RSA key: {}", e)))?;
            let pkcs8 = key
                .to_pkcs8_der()
                .map_err(|e| Error::InvalidPrivateKey(format!("PKCS#8 re-encoding: {}", e)))?;
            Ok(PrivateKey {
                algorithm: KeyAlgorithm::Rsa,
                key_size: (key.size() * 8) as u32,
                der_data: pkcs8.as_bytes().to_vec(),
            })
        },
        "EC PRIVATE KEY" => sec1_to_private_key(&block.der),
        other => Err(Error::InvalidPrivateKey(format!("unsupported key block {}", other))),
    }
}

/// Classify and validate a PKCS#8 `PrivateKeyInfo`.
pub fn parse_private_key_der(der: &[u8]) -> Result<PrivateKey> {
    let info = pkcs8::PrivateKeyInfo::try_from(der)
        .map_err(|e| Error::InvalidPrivateKey(format!("PKCS#8 decoding failed: {}", e)))?;

    if info.algorithm.oid == oids::RSA_ENCRYPTION {
        let key = rsa::RsaPrivateKey::from_pkcs8_der(der)
            .map_err(|e| Error::InvalidPrivateKey(format!("RSA key: {}", e)))?;
        return Ok(PrivateKey {
            algorithm: KeyAlgorithm::Rsa,
            key_size: (key.size() * 8) as u32,
            der_data: der.to_vec(),
        });
    }

    if info.algorithm.oid == oids::EC_PUBLIC_KEY {
        let curve_oid = info
            .algorithm
            .parameters_oid()
            .map_err(|_| Error::InvalidPrivateKey("EC key without named curve".to_string()))?;
        let curve = EcdsaCurve::from_oid(&curve_oid)
            .ok_or_else(|| Error::UnsupportedAlgorithm(format!("EC curve {}", curve_oid)))?;
        let decoded = match curve {
            EcdsaCurve::P256 => p256::SecretKey::from_pkcs8_der(der).map(|_| ()),
            EcdsaCurve::P384 => p384::SecretKey::from_pkcs8_der(der).map(|_| ()),
            EcdsaCurve::P521 => p521::SecretKey::from_pkcs8_der(der).map(|_| ()),
        };
        decoded.map_err(|e| Error::InvalidPrivateKey(format!("EC key: {}", e)))?;
        return Ok(PrivateKey {
            algorithm: KeyAlgorithm::from_curve(curve),
            key_size: curve.key_bits(),
            der_data: der.to_vec(),
        });
    }

    Err(Error::UnsupportedAlgorithm(format!(
        "private key algorithm {}",
        info.algorithm.oid
    )))
}

/// SEC1 `ECPrivateKey`, tried against each supported curve.
fn sec1_to_private_key(der: &[u8]) -> Result<PrivateKey> {
    let pkcs8 = if let Ok(key) = p256::SecretKey::from_sec1_der(der) {
        key.to_pkcs8_der()
    } else if let Ok(key) = p384::SecretKey::from_sec1_der(der) {
        key.to_pkcs8_der()
    } else if let Ok(key) = p521::SecretKey::from_sec1_der(der) {
        key.to_pkcs8_der()
    } else {
        return Err(Error::InvalidPrivateKey(
            "SEC1 key is not on P-256, P-384 or P-521".to_string(),
        ));
    };
    let pkcs8 =
        pkcs8.map_err(|e| Error::InvalidPrivateKey(format!("PKCS#8 re-encoding: {}", e)))?;
    parse_private_key_der(pkcs8.as_bytes())
}

/// Whether `key` is the private half of `public`.
pub(crate) fn key_matches(key: &PrivateKey, public: &PublicKeyInfo) -> bool {
    match (key.algorithm.curve(), public) {
        (None, PublicKeyInfo::Rsa { modulus, .. }) => rsa::RsaPrivateKey::from_pkcs8_der(&key.der_data)
            .map(|k| strip_leading_zeros(&k.n().to_bytes_be()) == modulus.as_slice())
            .unwrap_or(false),
        (Some(curve), PublicKeyInfo::Ec { curve: cert_curve, point }) if curve == *cert_curve => {
            use p256::elliptic_curve::sec1::ToEncodedPoint;
            let derived = match curve {
                EcdsaCurve::P256 => p256::SecretKey::from_pkcs8_der(&key.der_data)
                    .map(|k| k.public_key().to_encoded_point(false).as_bytes().to_vec()),
                EcdsaCurve::P384 => p384::SecretKey::from_pkcs8_der(&key.der_data)
                    .map(|k| k.public_key().to_encoded_point(false).as_bytes().to_vec()),
                EcdsaCurve::P521 => p521::SecretKey::from_pkcs8_der(&key.der_data)
                    .map(|k| k.public_key().to_encoded_point(false).as_bytes().to_vec()),
            };
            derived.map(|d| d == *point).unwrap_or(false)
        },
        _ => false,
    }
}

pub(crate) fn load_from_pem(
    cert_pem: &str,
    key_pem: &str,
    password: Option<&str>,
) -> Result<SigningCredentials> {
    let chain = load_certificates_pem(cert_pem)?;
    let private_key = load_private_key_pem(key_pem, password)?;
    let leaf = chain[0].clone();

    if !key_matches(&private_key, &leaf.public_key()?) {
        return Err(Error::InvalidPrivateKey(format!(
            "private key does not belong to {}",
            leaf.subject
        )));
    }

    log::debug!("Loaded PEM credentials for {} ({} in chain)", leaf.subject, chain.len());
    Ok(SigningCredentials {
        certificate: leaf,
        private_key,
        certificate_chain: chain,
    })
}

pub(crate) fn load_from_pkcs12(data: &[u8], password: &str) -> Result<SigningCredentials> {
    let pfx = p12::PFX::parse(data)
        .map_err(|e| Error::InvalidCertificate(format!("PKCS#12 decoding failed: {:?}", e)))?;

    if !pfx.verify_mac(password) {
        return Err(Error::InvalidPassword(
            "PKCS#12 MAC verification failed".to_string(),
        ));
    }

    let key_der = pfx
        .key_bags(password)
        .map_err(|e| Error::InvalidCertificate(format!("PKCS#12 key bag: {:?}", e)))?
        .into_iter()
        .next()
        .ok_or_else(|| Error::InvalidPrivateKey("PKCS#12 container has no key".to_string()))?;
    let private_key = parse_private_key_der(&key_der)?;

    let certs = pfx
        .cert_x509_bags(password)
        .map_err(|e| Error::InvalidCertificate(format!("PKCS#12 certificate bag: {:?}", e)))?
        .iter()
        .map(|der| X509Certificate::from_der(der))
        .collect::<Result<Vec<_>>>()?;

    let leaf_index = certs
        .iter()
        .position(|c| c.public_key().map(|pk| key_matches(&private_key, &pk)).unwrap_or(false))
        .ok_or_else(|| {
            Error::InvalidCertificate("no certificate in PKCS#12 matches the key".to_string())
        })?;

    let mut remaining = certs;
    let leaf = remaining.remove(leaf_index);
    let chain = order_chain(leaf.clone(), remaining);

    log::debug!("Loaded PKCS#12 credentials for {} ({} in chain)", leaf.subject, chain.len());
    Ok(SigningCredentials {
        certificate: leaf,
        private_key,
        certificate_chain: chain,
    })
}

/// Order `rest` after `leaf` by following issuer names; unlinked certs go last.
pub(crate) fn order_chain(leaf: X509Certificate, mut rest: Vec<X509Certificate>) -> Vec<X509Certificate> {
    let mut chain = vec![leaf];
    loop {
        let Some(current) = chain.last() else { break };
        if current.is_self_issued() {
            break;
        }
        let issuer = current.issuer.clone();
        match rest.iter().position(|c| c.subject == issuer) {
            Some(i) => chain.push(rest.remove(i)),
            None => break,
        }
    }
    chain.extend(rest);
    chain
}
