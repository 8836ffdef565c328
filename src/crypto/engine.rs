//! Hashing, signing and verification primitives.

use super::algorithms::{EcdsaCurve, HashAlgorithm, SignatureAlgorithm};
use super::context_pool::{ContextPool, PoolStatistics};
use crate::certificate::{PrivateKey, PublicKeyInfo, X509Certificate};
use crate::document::PdfDocument;
use crate::error::{Error, Result};
use crate::signatures::byterange::digest_excluding;
use pkcs8::{DecodePrivateKey, DecodePublicKey};
use rsa::{Pkcs1v15Sign, Pss, RsaPrivateKey, RsaPublicKey};
use sha2::{Sha256, Sha384, Sha512};
use signature::hazmat::{PrehashSigner, PrehashVerifier};
use std::borrow::Cow;
use std::sync::Arc;

/// RSA signature padding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RsaPadding {
    /// RSASSA-PKCS1-v1_5
    Pkcs1v15,
    /// RSASSA-PSS, salt length equal to the digest length
    Pss,
}

/// Cryptographic engine shared by signing and validation.
///
/// Cheap to clone; clones share the context pool.
#[derive(Debug, Clone, Default)]
pub struct CryptoEngine {
    pool: Arc<ContextPool>,
}

impl CryptoEngine {
    /// Engine with a default pool.
    pub fn new() -> Self {
        Self::default()
    }

    /// Engine using an existing pool.
    pub fn with_pool(pool: Arc<ContextPool>) -> Self {
        Self { pool }
    }

    /// The context pool.
    pub fn pool(&self) -> &Arc<ContextPool> {
        &self.pool
    }

    /// Pool counters.
    pub fn statistics(&self) -> Result<PoolStatistics> {
        self.pool.statistics()
    }

    /// Digest of `data`.
    pub fn compute_hash(&self, data: &[u8], algorithm: HashAlgorithm) -> Result<Vec<u8>> {
        Ok(algorithm.digest(data))
    }

    /// Digest of the whole document with every existing signature's
    /// `/Contents` token left out.
    pub fn compute_document_hash(
        &self,
        document: &PdfDocument,
        algorithm: HashAlgorithm,
    ) -> Result<Vec<u8>> {
        let gaps: Vec<(usize, usize)> = document
            .existing_signatures()
            .iter()
            .map(|sig| sig.byte_range.contents_gap())
            .collect();
        log::debug!(
            "Hashing {} bytes with {} with {} signature gaps excluded",
            document.data().len(),
            algorithm,
            gaps.len()
        );
        Ok(digest_excluding(document.data(), &gaps, algorithm))
    }

    /// Sign a precomputed digest.
    ///
    /// The digest length selects the hash; it must agree with the PKCS#1 v1.5
    /// schemes that fix their hash. ECDSA accepts any SHA-2 digest. RSA output is `key_size / 8` bytes; ECDSA output is raw
    /// `r || s` (64/96/132 bytes).
    pub fn create_signature(
        &self,
        hash: &[u8],
        private_key: &PrivateKey,
        algorithm: SignatureAlgorithm,
    ) -> Result<Vec<u8>> {
        if !algorithm.accepts_key(private_key.algorithm) {
            return Err(Error::AlgorithmKeyMismatch {
                algorithm: algorithm.name().to_string(),
                key: private_key.algorithm.name().to_string(),
            });
        }
        let hash_algorithm = HashAlgorithm::from_digest_len(hash.len()).ok_or_else(|| {
            Error::InvalidInput(format!("{} bytes is not a SHA-2 digest length", hash.len()))
        })?;
        algorithm.check_hash(hash_algorithm)?;

        let lease = self.pool.get_context(hash_algorithm, algorithm)?;
        log::debug!(
            "Signing with {} / {} (context {})",
            algorithm,
            hash_algorithm,
            lease.context().id
        );
        sign_prehashed(private_key, algorithm, hash_algorithm, hash)
    }

    /// Check `signature` over `hash` with the certificate's public key.
    ///
    /// Never fails: malformed input yields `false`. All-zero signatures and
    /// empty hashes are rejected. For RSA keys both paddings are tried.
    pub fn verify_signature(&self, signature: &[u8], hash: &[u8], certificate: &X509Certificate) -> bool {
        self.verify_signature_with(signature, hash, certificate, None)
    }

    /// Like [`CryptoEngine::verify_signature`] with a known scheme.
    pub fn verify_signature_with(
        &self,
        signature: &[u8],
        hash: &[u8],
        certificate: &X509Certificate,
        algorithm: Option<SignatureAlgorithm>,
    ) -> bool {
        if hash.is_empty() || signature.is_empty() || signature.iter().all(|b| *b == 0) {
            return false;
        }
        let Some(hash_algorithm) = HashAlgorithm::from_digest_len(hash.len()) else {
            return false;
        };
        let Ok(key) = certificate.public_key() else {
            return false;
        };
        if let Some(algorithm) = algorithm {
            if !algorithm.accepts_key(key.key_algorithm()) {
                return false;
            }
        }

        match (&key, algorithm) {
            (PublicKeyInfo::Rsa { .. }, Some(SignatureAlgorithm::RsaPss)) => {
                verify_prehashed(&key, hash_algorithm, RsaPadding::Pss, hash, signature)
            },
            (PublicKeyInfo::Rsa { .. }, Some(_)) => {
                verify_prehashed(&key, hash_algorithm, RsaPadding::Pkcs1v15, hash, signature)
            },
            (PublicKeyInfo::Rsa { .. }, None) => {
                verify_prehashed(&key, hash_algorithm, RsaPadding::Pkcs1v15, hash, signature)
                    || verify_prehashed(&key, hash_algorithm, RsaPadding::Pss, hash, signature)
            },
            (PublicKeyInfo::Ec { .. }, _) => {
                verify_prehashed(&key, hash_algorithm, RsaPadding::Pkcs1v15, hash, signature)
            },
        }
    }
}

fn creation_error(e: impl std::fmt::Display) -> Error {
    Error::SignatureCreation(e.to_string())
}

fn sign_prehashed(
    key: &PrivateKey,
    algorithm: SignatureAlgorithm,
    hash_algorithm: HashAlgorithm,
    hash: &[u8],
) -> Result<Vec<u8>> {
    match algorithm.curve() {
        None => {
            let sk = RsaPrivateKey::from_pkcs8_der(&key.der_data)
                .map_err(|e| Error::InvalidPrivateKey(format!("RSA key: {}", e)))?;
            let signature = if algorithm == SignatureAlgorithm::RsaPss {
                let mut rng = rand::rngs::OsRng;
                match hash_algorithm {
                    HashAlgorithm::Sha256 => sk.sign_with_rng(&mut rng, Pss::new::<Sha256>(), hash),
                    HashAlgorithm::Sha384 => sk.sign_with_rng(&mut rng, Pss::new::<Sha384>(), hash),
                    HashAlgorithm::Sha512 => sk.sign_with_rng(&mut rng, Pss::new::<Sha512>(), hash),
                }
            } else {
                sk.sign(pkcs1v15_for(hash_algorithm), hash)
            };
            signature.map_err(creation_error)
        },
        Some(EcdsaCurve::P256) => {
            let secret = p256::SecretKey::from_pkcs8_der(&key.der_data)
                .map_err(|e| Error::InvalidPrivateKey(format!("P-256 key: {}", e)))?;
            let signer = p256::ecdsa::SigningKey::from(&secret);
            let signature: ecdsa::Signature<p256::NistP256> = signer
                .sign_prehash(&ecdsa_prehash(EcdsaCurve::P256, hash))
                .map_err(creation_error)?;
            Ok(signature.to_bytes().to_vec())
        },
        Some(EcdsaCurve::P384) => {
            let secret = p384::SecretKey::from_pkcs8_der(&key.der_data)
                .map_err(|e| Error::InvalidPrivateKey(format!("P-384 key: {}", e)))?;
            let signer = p384::ecdsa::SigningKey::from(&secret);
            let signature: ecdsa::Signature<p384::NistP384> = signer
                .sign_prehash(&ecdsa_prehash(EcdsaCurve::P384, hash))
                .map_err(creation_error)?;
            Ok(signature.to_bytes().to_vec())
        },
        Some(EcdsaCurve::P521) => {
            let secret = p521::SecretKey::from_pkcs8_der(&key.der_data)
                .map_err(|e| Error::InvalidPrivateKey(format!("P-521 key: {}", e)))?;
            let signer =
                p521::ecdsa::SigningKey::from_bytes(&secret.to_bytes()).map_err(creation_error)?;
            let signature: ecdsa::Signature<p521::NistP521> = signer
                .sign_prehash(&ecdsa_prehash(EcdsaCurve::P521, hash))
                .map_err(creation_error)?;
            Ok(signature.to_bytes().to_vec())
        },
    }
}

/// Digest as handed to the curve arithmetic.
///
/// SEC 1 §4.1.3 reads a digest shorter than the group order as an integer, so
/// leading zeros do not change it. The ECDSA backend refuses inputs shorter
/// than half the scalar, which only bites for SHA-256 on P-521.
fn ecdsa_prehash(curve: EcdsaCurve, digest: &[u8]) -> Cow<'_, [u8]> {
    let field = curve.field_bytes();
    if digest.len() >= field / 2 {
        return Cow::Borrowed(digest);
    }
    let mut padded = vec![0u8; field - digest.len()];
    padded.extend_from_slice(digest);
    Cow::Owned(padded)
}

fn pkcs1v15_for(hash: HashAlgorithm) -> Pkcs1v15Sign {
    match hash {
        HashAlgorithm::Sha256 => Pkcs1v15Sign::new::<Sha256>(),
        HashAlgorithm::Sha384 => Pkcs1v15Sign::new::<Sha384>(),
        HashAlgorithm::Sha512 => Pkcs1v15Sign::new::<Sha512>(),
    }
}

/// Verify a signature over a digest with a public key.
///
/// ECDSA signatures may be raw `r || s` or DER; `padding` is ignored for EC keys.
pub(crate) fn verify_prehashed(
    key: &PublicKeyInfo,
    hash: HashAlgorithm,
    padding: RsaPadding,
    digest: &[u8],
    signature: &[u8],
) -> bool {
    match key {
        PublicKeyInfo::Rsa { spki_der, .. } => {
            let Ok(pk) = RsaPublicKey::from_public_key_der(spki_der) else {
                return false;
            };
            let outcome = match padding {
                RsaPadding::Pkcs1v15 => pk.verify(pkcs1v15_for(hash), digest, signature),
                RsaPadding::Pss => match hash {
                    HashAlgorithm::Sha256 => pk.verify(Pss::new::<Sha256>(), digest, signature),
                    HashAlgorithm::Sha384 => pk.verify(Pss::new::<Sha384>(), digest, signature),
                    HashAlgorithm::Sha512 => pk.verify(Pss::new::<Sha512>(), digest, signature),
                },
            };
            outcome.is_ok()
        },
        PublicKeyInfo::Ec { curve, point } => {
            let raw = signature.len() == curve.signature_len();
            let prehash = ecdsa_prehash(*curve, digest);
            match curve {
                EcdsaCurve::P256 => {
                    let Ok(vk) = p256::ecdsa::VerifyingKey::from_sec1_bytes(point) else {
                        return false;
                    };
                    let sig = if raw {
                        ecdsa::Signature::<p256::NistP256>::from_slice(signature)
                    } else {
                        ecdsa::Signature::<p256::NistP256>::from_der(signature)
                    };
                    sig.map(|s| vk.verify_prehash(&prehash, &s).is_ok()).unwrap_or(false)
                },
                EcdsaCurve::P384 => {
                    let Ok(vk) = p384::ecdsa::VerifyingKey::from_sec1_bytes(point) else {
                        return false;
                    };
                    let sig = if raw {
                        ecdsa::Signature::<p384::NistP384>::from_slice(signature)
                    } else {
                        ecdsa::Signature::<p384::NistP384>::from_der(signature)
                    };
                    sig.map(|s| vk.verify_prehash(&prehash, &s).is_ok()).unwrap_or(false)
                },
                EcdsaCurve::P521 => {
                    let Ok(vk) = p521::ecdsa::VerifyingKey::from_sec1_bytes(point) else {
                        return false;
                    };
                    let sig = if raw {
                        ecdsa::Signature::<p521::NistP521>::from_slice(signature)
                    } else {
                        ecdsa::Signature::<p521::NistP521>::from_der(signature)
                    };
                    sig.map(|s| vk.verify_prehash(&prehash, &s).is_ok()).unwrap_or(false)
                },
            }
        },
    }
}

/// Re-encode a raw `r || s` ECDSA signature as a DER `Ecdsa-Sig-Value`.
pub fn ecdsa_raw_to_der(curve: EcdsaCurve, raw: &[u8]) -> Result<Vec<u8>> {
    let der = match curve {
        EcdsaCurve::P256 => ecdsa::Signature::<p256::NistP256>::from_slice(raw)
            .map(|s| s.to_der().as_bytes().to_vec()),
        EcdsaCurve::P384 => ecdsa::Signature::<p384::NistP384>::from_slice(raw)
            .map(|s| s.to_der().as_bytes().to_vec()),
        EcdsaCurve::P521 => ecdsa::Signature::<p521::NistP521>::from_slice(raw)
            .map(|s| s.to_der().as_bytes().to_vec()),
    };
    der.map_err(|e| Error::ContainerConstruction(format!("ECDSA signature encoding: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::certificate::{CertificateManager, SigningCredentials};

    fn creds(cert: &str, key: &str) -> SigningCredentials {
        CertificateManager::new().load_from_pem(cert, key, None).unwrap()
    }

    fn rsa() -> SigningCredentials {
        creds(
            include_str!("../../tests/fixtures/signer_rsa.pem"),
            include_str!("../../tests/fixtures/signer_rsa_key.pem"),
        )
    }

    fn p256() -> SigningCredentials {
        creds(
            include_str!("../../tests/fixtures/signer_p256.pem"),
            include_str!("../../tests/fixtures/signer_p256_key.pem"),
        )
    }

    fn p384() -> SigningCredentials {
        creds(
            include_str!("../../tests/fixtures/signer_p384.pem"),
            include_str!("../../tests/fixtures/signer_p384_key.pem"),
        )
    }

    fn p521() -> SigningCredentials {
        creds(
            include_str!("../../tests/fixtures/signer_p521.pem"),
            include_str!("../../tests/fixtures/signer_p521_key.pem"),
        )
    }

    #[test]
    fn test_hash_lengths() {
        let engine = CryptoEngine::new();
        for (alg, len) in [
            (HashAlgorithm::Sha256, 32),
            (HashAlgorithm::Sha384, 48),
            (HashAlgorithm::Sha512, 64),
        ] {
            assert_eq!(engine.compute_hash(b"data", alg).unwrap().len(), len);
        }
    }

    #[test]
    fn test_rsa_pkcs1_sign_verify() {
        let engine = CryptoEngine::new();
        let c = rsa();
        let hash = HashAlgorithm::Sha256.digest(b"document");
        let sig = engine
            .create_signature(&hash, &c.private_key, SignatureAlgorithm::RsaPkcs1Sha256)
            .unwrap();
        assert_eq!(sig.len(), 256);
        assert!(engine.verify_signature(&sig, &hash, &c.certificate));
        let other = HashAlgorithm::Sha256.digest(b"tampered");
        assert!(!engine.verify_signature(&sig, &other, &c.certificate));
    }

    #[test]
    fn test_rsa_pss_sign_verify() {
        let engine = CryptoEngine::new();
        let c = rsa();
        let hash = HashAlgorithm::Sha384.digest(b"document");
        let sig = engine
            .create_signature(&hash, &c.private_key, SignatureAlgorithm::RsaPss)
            .unwrap();
        assert_eq!(sig.len(), 256);
        assert!(engine.verify_signature_with(
            &sig,
            &hash,
            &c.certificate,
            Some(SignatureAlgorithm::RsaPss)
        ));
        assert!(engine.verify_signature(&sig, &hash, &c.certificate));
    }

    #[test]
    fn test_ecdsa_lengths_and_verify() {
        let engine = CryptoEngine::new();
        for (c, alg, hash_alg, len) in [
            (p256(), SignatureAlgorithm::EcdsaP256Sha256, HashAlgorithm::Sha256, 64),
            (p384(), SignatureAlgorithm::EcdsaP384Sha384, HashAlgorithm::Sha384, 96),
            (p521(), SignatureAlgorithm::EcdsaP521Sha512, HashAlgorithm::Sha512, 132),
        ] {
            let hash = hash_alg.digest(b"document");
            let sig = engine.create_signature(&hash, &c.private_key, alg).unwrap();
            assert_eq!(sig.len(), len, "{}", alg);
            assert!(engine.verify_signature(&sig, &hash, &c.certificate), "{}", alg);

            let der = ecdsa_raw_to_der(alg.curve().unwrap(), &sig).unwrap();
            assert!(engine.verify_signature(&der, &hash, &c.certificate), "{} DER", alg);
        }
    }

    #[test]
    fn test_ecdsa_with_other_digests() {
        let engine = CryptoEngine::new();
        for (c, alg) in [
            (p384(), SignatureAlgorithm::EcdsaP384Sha384),
            (p521(), SignatureAlgorithm::EcdsaP521Sha512),
        ] {
            for hash_alg in HashAlgorithm::ALL {
                let hash = hash_alg.digest(b"document");
                let sig = engine.create_signature(&hash, &c.private_key, alg).unwrap();
                assert!(engine.verify_signature(&sig, &hash, &c.certificate), "{} / {}", alg, hash_alg);
                let other = hash_alg.digest(b"other");
                assert!(!engine.verify_signature(&sig, &other, &c.certificate));
            }
        }
    }

    #[test]
    fn test_short_digest_padding() {
        let digest = [7u8; 32];
        assert_eq!(ecdsa_prehash(EcdsaCurve::P256, &digest).len(), 32);
        assert_eq!(ecdsa_prehash(EcdsaCurve::P384, &digest).len(), 32);
        let padded = ecdsa_prehash(EcdsaCurve::P521, &digest);
        assert_eq!(padded.len(), 66);
        assert!(padded[..34].iter().all(|b| *b == 0));
        assert_eq!(&padded[34..], &digest);
    }

    #[test]
    fn test_key_mismatch() {
        let engine = CryptoEngine::new();
        let hash = HashAlgorithm::Sha256.digest(b"x");
        let err = engine
            .create_signature(&hash, &rsa().private_key, SignatureAlgorithm::EcdsaP256Sha256)
            .unwrap_err();
        assert_eq!(err.code().as_u16(), 2005);
        let err = engine
            .create_signature(&hash, &p384().private_key, SignatureAlgorithm::EcdsaP256Sha256)
            .unwrap_err();
        assert_eq!(err.code().as_u16(), 2005);
        let err = engine
            .create_signature(&hash, &p256().private_key, SignatureAlgorithm::RsaPkcs1Sha256)
            .unwrap_err();
        assert_eq!(err.code().as_u16(), 2005);
    }

    #[test]
    fn test_hash_algorithm_mismatch() {
        let engine = CryptoEngine::new();
        let hash = HashAlgorithm::Sha512.digest(b"x");
        let err = engine
            .create_signature(&hash, &rsa().private_key, SignatureAlgorithm::RsaPkcs1Sha256)
            .unwrap_err();
        assert_eq!(err.code().as_u16(), 2004);
    }

    #[test]
    fn test_verify_rejects_degenerate_input() {
        let engine = CryptoEngine::new();
        let c = rsa();
        let hash = HashAlgorithm::Sha256.digest(b"x");
        assert!(!engine.verify_signature(&[0u8; 256], &hash, &c.certificate));
        assert!(!engine.verify_signature(&[1u8; 256], &[], &c.certificate));
        assert!(!engine.verify_signature(b"garbage", &hash, &c.certificate));
        assert!(!engine.verify_signature(&[], &hash, &c.certificate));
    }

    #[test]
    fn test_signing_goes_through_pool() {
        let engine = CryptoEngine::new();
        let c = p256();
        let hash = HashAlgorithm::Sha256.digest(b"x");
        for _ in 0..3 {
            engine
                .create_signature(&hash, &c.private_key, SignatureAlgorithm::EcdsaP256Sha256)
                .unwrap();
        }
        let stats = engine.statistics().unwrap();
        assert_eq!(stats.total_contexts_created, 1);
        assert_eq!(stats.total_contexts_reused, 2);
        assert_eq!(stats.in_use, 0);
    }
}
