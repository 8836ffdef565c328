//! Hash and signature algorithm identifiers.

use crate::certificate::KeyAlgorithm;
use crate::error::{Error, Result};
use der::oid::ObjectIdentifier;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256, Sha384, Sha512};

/// Object identifiers used in CMS containers and X.509 keys.
pub mod oids {
    use der::oid::ObjectIdentifier;

    /// id-data
    pub const ID_DATA: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.113549.1.7.1");
    /// id-signedData
    pub const ID_SIGNED_DATA: ObjectIdentifier =
        ObjectIdentifier::new_unwrap("1.2.840.113549.1.7.2");
    /// id-contentType
    pub const CONTENT_TYPE: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.113549.1.9.3");
    /// id-messageDigest
    pub const MESSAGE_DIGEST: ObjectIdentifier =
        ObjectIdentifier::new_unwrap("1.2.840.113549.1.9.4");
    /// id-signingTime
    pub const SIGNING_TIME: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.113549.1.9.5");
    /// id-aa-signingCertificateV2 (RFC 5035)
    pub const SIGNING_CERTIFICATE_V2: ObjectIdentifier =
        ObjectIdentifier::new_unwrap("1.2.840.113549.1.9.16.2.47");
    /// id-aa-timeStampToken (RFC 3161)
    pub const TIMESTAMP_TOKEN: ObjectIdentifier =
        ObjectIdentifier::new_unwrap("1.2.840.113549.1.9.16.2.14");
    /// id-ct-TSTInfo (RFC 3161)
    pub const ID_CT_TST_INFO: ObjectIdentifier =
        ObjectIdentifier::new_unwrap("1.2.840.113549.1.9.16.1.4");

    /// id-sha256
    pub const SHA256: ObjectIdentifier = ObjectIdentifier::new_unwrap("2.16.840.1.101.3.4.2.1");
    /// id-sha384
    pub const SHA384: ObjectIdentifier = ObjectIdentifier::new_unwrap("2.16.840.1.101.3.4.2.2");
    /// id-sha512
    pub const SHA512: ObjectIdentifier = ObjectIdentifier::new_unwrap("2.16.840.1.101.3.4.2.3");

    /// rsaEncryption
    pub const RSA_ENCRYPTION: ObjectIdentifier =
        ObjectIdentifier::new_unwrap("1.2.840.113549.1.1.1");
    /// sha256WithRSAEncryption
    pub const SHA256_WITH_RSA: ObjectIdentifier =
        ObjectIdentifier::new_unwrap("1.2.840.113549.1.1.11");
    /// sha384WithRSAEncryption
    pub const SHA384_WITH_RSA: ObjectIdentifier =
        ObjectIdentifier::new_unwrap("1.2.840.113549.1.1.12");
    /// sha512WithRSAEncryption
    pub const SHA512_WITH_RSA: ObjectIdentifier =
        ObjectIdentifier::new_unwrap("1.2.840.113549.1.1.13");
    /// id-RSASSA-PSS
    pub const RSASSA_PSS: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.113549.1.1.10");
    /// id-mgf1
    pub const MGF1: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.113549.1.1.8");

    /// id-ecPublicKey
    pub const EC_PUBLIC_KEY: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.10045.2.1");
    /// ecdsa-with-SHA256
    pub const ECDSA_WITH_SHA256: ObjectIdentifier =
        ObjectIdentifier::new_unwrap("1.2.840.10045.4.3.2");
    /// ecdsa-with-SHA384
    pub const ECDSA_WITH_SHA384: ObjectIdentifier =
        ObjectIdentifier::new_unwrap("1.2.840.10045.4.3.3");
    /// ecdsa-with-SHA512
    pub const ECDSA_WITH_SHA512: ObjectIdentifier =
        ObjectIdentifier::new_unwrap("1.2.840.10045.4.3.4");

    /// secp256r1
    pub const SECP256R1: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.10045.3.1.7");
    /// secp384r1
    pub const SECP384R1: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.3.132.0.34");
    /// secp521r1
    pub const SECP521R1: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.3.132.0.35");
}

/// Digest algorithm used for document hashing and CMS message digests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum HashAlgorithm {
    /// SHA-256 (32-byte digest)
    #[default]
    Sha256,
    /// SHA-384 (48-byte digest)
    Sha384,
    /// SHA-512 (64-byte digest)
    Sha512,
}

impl HashAlgorithm {
    /// All supported digests.
    pub const ALL: [HashAlgorithm; 3] =
        [HashAlgorithm::Sha256, HashAlgorithm::Sha384, HashAlgorithm::Sha512];

    /// Output length in bytes.
    pub fn digest_len(self) -> usize {
        match self {
            HashAlgorithm::Sha256 => 32,
            HashAlgorithm::Sha384 => 48,
            HashAlgorithm::Sha512 => 64,
        }
    }

    /// Display name, e.g. `SHA-256`.
    pub fn name(self) -> &'static str {
        match self {
            HashAlgorithm::Sha256 => "SHA-256",
            HashAlgorithm::Sha384 => "SHA-384",
            HashAlgorithm::Sha512 => "SHA-512",
        }
    }

    /// Algorithm identifier OID.
    pub fn oid(self) -> ObjectIdentifier {
        match self {
            HashAlgorithm::Sha256 => oids::SHA256,
            HashAlgorithm::Sha384 => oids::SHA384,
            HashAlgorithm::Sha512 => oids::SHA512,
        }
    }

    /// Reverse lookup from an OID.
    pub fn from_oid(oid: &ObjectIdentifier) -> Option<Self> {
        Self::ALL.into_iter().find(|h| h.oid() == *oid)
    }

    /// The digest producing `len`-byte outputs.
    pub fn from_digest_len(len: usize) -> Option<Self> {
        Self::ALL.into_iter().find(|h| h.digest_len() == len)
    }

    /// One-shot digest.
    pub fn digest(self, data: &[u8]) -> Vec<u8> {
        let mut hasher = DocumentHasher::new(self);
        hasher.update(data);
        hasher.finalize()
    }
}

impl std::fmt::Display for HashAlgorithm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

impl std::str::FromStr for HashAlgorithm {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_uppercase().replace(['-', '_'], "").as_str() {
            "SHA256" => Ok(HashAlgorithm::Sha256),
            "SHA384" => Ok(HashAlgorithm::Sha384),
            "SHA512" => Ok(HashAlgorithm::Sha512),
            _ => Err(Error::UnsupportedAlgorithm(format!("hash algorithm {:?}", s))),
        }
    }
}

/// Incremental hasher over any supported digest.
#[derive(Clone)]
pub enum DocumentHasher {
    /// SHA-256 state
    Sha256(Sha256),
    /// SHA-384 state
    Sha384(Sha384),
    /// SHA-512 state
    Sha512(Sha512),
}

impl DocumentHasher {
    /// Fresh hasher for `algorithm`.
    pub fn new(algorithm: HashAlgorithm) -> Self {
        match algorithm {
            HashAlgorithm::Sha256 => DocumentHasher::Sha256(Sha256::new()),
            HashAlgorithm::Sha384 => DocumentHasher::Sha384(Sha384::new()),
            HashAlgorithm::Sha512 => DocumentHasher::Sha512(Sha512::new()),
        }
    }

    /// Feed more bytes.
    pub fn update(&mut self, data: &[u8]) {
        match self {
            DocumentHasher::Sha256(h) => h.update(data),
            DocumentHasher::Sha384(h) => h.update(data),
            DocumentHasher::Sha512(h) => h.update(data),
        }
    }

    /// Consume the hasher and return the digest.
    pub fn finalize(self) -> Vec<u8> {
        match self {
            DocumentHasher::Sha256(h) => h.finalize().to_vec(),
            DocumentHasher::Sha384(h) => h.finalize().to_vec(),
            DocumentHasher::Sha512(h) => h.finalize().to_vec(),
        }
    }
}

/// NIST curves accepted for ECDSA keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EcdsaCurve {
    /// secp256r1
    P256,
    /// secp384r1
    P384,
    /// secp521r1
    P521,
}

impl EcdsaCurve {
    /// Raw `r || s` signature length.
    pub fn signature_len(self) -> usize {
        self.field_bytes() * 2
    }

    /// Scalar size in bytes.
    pub fn field_bytes(self) -> usize {
        match self {
            EcdsaCurve::P256 => 32,
            EcdsaCurve::P384 => 48,
            EcdsaCurve::P521 => 66,
        }
    }

    /// Key size in bits.
    pub fn key_bits(self) -> u32 {
        match self {
            EcdsaCurve::P256 => 256,
            EcdsaCurve::P384 => 384,
            EcdsaCurve::P521 => 521,
        }
    }

    /// Named-curve OID.
    pub fn oid(self) -> ObjectIdentifier {
        match self {
            EcdsaCurve::P256 => oids::SECP256R1,
            EcdsaCurve::P384 => oids::SECP384R1,
            EcdsaCurve::P521 => oids::SECP521R1,
        }
    }

    /// Reverse lookup from a named-curve OID.
    pub fn from_oid(oid: &ObjectIdentifier) -> Option<Self> {
        [EcdsaCurve::P256, EcdsaCurve::P384, EcdsaCurve::P521]
            .into_iter()
            .find(|c| c.oid() == *oid)
    }

    /// Signature algorithm bound to this curve.
    pub fn signature_algorithm(self) -> SignatureAlgorithm {
        match self {
            EcdsaCurve::P256 => SignatureAlgorithm::EcdsaP256Sha256,
            EcdsaCurve::P384 => SignatureAlgorithm::EcdsaP384Sha384,
            EcdsaCurve::P521 => SignatureAlgorithm::EcdsaP521Sha512,
        }
    }
}

/// Signature scheme applied to the signed-attributes digest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SignatureAlgorithm {
    /// RSASSA-PKCS1-v1_5 with SHA-256
    RsaPkcs1Sha256,
    /// RSASSA-PKCS1-v1_5 with SHA-384
    RsaPkcs1Sha384,
    /// RSASSA-PKCS1-v1_5 with SHA-512
    RsaPkcs1Sha512,
    /// RSASSA-PSS; digest and MGF1 follow the requested hash algorithm
    RsaPss,
    /// ECDSA over P-256 (SHA-256 customary, any SHA-2 digest accepted)
    EcdsaP256Sha256,
    /// ECDSA over P-384 (SHA-384 customary, any SHA-2 digest accepted)
    EcdsaP384Sha384,
    /// ECDSA over P-521 (SHA-512 customary, any SHA-2 digest accepted)
    EcdsaP521Sha512,
}

impl SignatureAlgorithm {
    /// Every supported scheme.
    pub const ALL: [SignatureAlgorithm; 7] = [
        SignatureAlgorithm::RsaPkcs1Sha256,
        SignatureAlgorithm::RsaPkcs1Sha384,
        SignatureAlgorithm::RsaPkcs1Sha512,
        SignatureAlgorithm::RsaPss,
        SignatureAlgorithm::EcdsaP256Sha256,
        SignatureAlgorithm::EcdsaP384Sha384,
        SignatureAlgorithm::EcdsaP521Sha512,
    ];

    /// Display name.
    pub fn name(self) -> &'static str {
        match self {
            SignatureAlgorithm::RsaPkcs1Sha256 => "RSA-PKCS1-SHA256",
            SignatureAlgorithm::RsaPkcs1Sha384 => "RSA-PKCS1-SHA384",
            SignatureAlgorithm::RsaPkcs1Sha512 => "RSA-PKCS1-SHA512",
            SignatureAlgorithm::RsaPss => "RSA-PSS",
            SignatureAlgorithm::EcdsaP256Sha256 => "ECDSA-P256-SHA256",
            SignatureAlgorithm::EcdsaP384Sha384 => "ECDSA-P384-SHA384",
            SignatureAlgorithm::EcdsaP521Sha512 => "ECDSA-P521-SHA512",
        }
    }

    /// Digest the scheme is bound to, if any.
    ///
    /// Only the PKCS#1 v1.5 variants fix their digest. ECDSA schemes are named
    /// after their curve's customary hash but sign any SHA-2 digest; the
    /// `SignerInfo` OID then follows the digest (RFC 5758 §3.2).
    pub fn fixed_hash(self) -> Option<HashAlgorithm> {
        match self {
            SignatureAlgorithm::RsaPkcs1Sha256 => Some(HashAlgorithm::Sha256),
            SignatureAlgorithm::RsaPkcs1Sha384 => Some(HashAlgorithm::Sha384),
            SignatureAlgorithm::RsaPkcs1Sha512 => Some(HashAlgorithm::Sha512),
            _ => None,
        }
    }

    /// Curve for ECDSA schemes.
    pub fn curve(self) -> Option<EcdsaCurve> {
        match self {
            SignatureAlgorithm::EcdsaP256Sha256 => Some(EcdsaCurve::P256),
            SignatureAlgorithm::EcdsaP384Sha384 => Some(EcdsaCurve::P384),
            SignatureAlgorithm::EcdsaP521Sha512 => Some(EcdsaCurve::P521),
            _ => None,
        }
    }

    /// Whether this is an RSA scheme.
    pub fn is_rsa(self) -> bool {
        self.curve().is_none()
    }

    /// Whether a key of `key` type may produce this signature.
    pub fn accepts_key(self, key: KeyAlgorithm) -> bool {
        match (self.curve(), key.curve()) {
            (None, None) => true,
            (Some(wanted), Some(have)) => wanted == have,
            _ => false,
        }
    }

    /// Scheme to use when the caller names none.
    ///
    /// RSA keys get PKCS#1 v1.5 with the requested digest; EC keys get their
    /// curve's scheme, which signs whatever digest was requested.
    pub fn default_for(key: KeyAlgorithm, hash: HashAlgorithm) -> Result<Self> {
        let algorithm = match key.curve() {
            Some(curve) => curve.signature_algorithm(),
            None => match hash {
                HashAlgorithm::Sha256 => SignatureAlgorithm::RsaPkcs1Sha256,
                HashAlgorithm::Sha384 => SignatureAlgorithm::RsaPkcs1Sha384,
                HashAlgorithm::Sha512 => SignatureAlgorithm::RsaPkcs1Sha512,
            },
        };
        algorithm.check_hash(hash)?;
        Ok(algorithm)
    }

    /// Fail unless `hash` is usable with this scheme.
    pub fn check_hash(self, hash: HashAlgorithm) -> Result<()> {
        match self.fixed_hash() {
            Some(fixed) if fixed != hash => Err(Error::UnsupportedAlgorithm(format!(
                "{} requires {}, but {} was requested",
                self.name(),
                fixed.name(),
                hash.name()
            ))),
            _ => Ok(()),
        }
    }

    /// OID placed in `SignerInfo.signatureAlgorithm`.
    pub fn signer_info_oid(self, hash: HashAlgorithm) -> ObjectIdentifier {
        match self {
            SignatureAlgorithm::RsaPss => oids::RSASSA_PSS,
            SignatureAlgorithm::EcdsaP256Sha256
            | SignatureAlgorithm::EcdsaP384Sha384
            | SignatureAlgorithm::EcdsaP521Sha512 => match hash {
                HashAlgorithm::Sha256 => oids::ECDSA_WITH_SHA256,
                HashAlgorithm::Sha384 => oids::ECDSA_WITH_SHA384,
                HashAlgorithm::Sha512 => oids::ECDSA_WITH_SHA512,
            },
            _ => oids::RSA_ENCRYPTION,
        }
    }

    /// Recover a scheme from a `SignerInfo` OID, the digest, and the key curve.
    pub fn from_signer_info(
        oid: &ObjectIdentifier,
        hash: HashAlgorithm,
        curve: Option<EcdsaCurve>,
    ) -> Option<Self> {
        let rsa_for = |h: HashAlgorithm| match h {
            HashAlgorithm::Sha256 => SignatureAlgorithm::RsaPkcs1Sha256,
            HashAlgorithm::Sha384 => SignatureAlgorithm::RsaPkcs1Sha384,
            HashAlgorithm::Sha512 => SignatureAlgorithm::RsaPkcs1Sha512,
        };

        if *oid == oids::RSASSA_PSS {
            Some(SignatureAlgorithm::RsaPss)
        } else if *oid == oids::RSA_ENCRYPTION {
            Some(rsa_for(hash))
        } else if *oid == oids::SHA256_WITH_RSA {
            Some(rsa_for(HashAlgorithm::Sha256))
        } else if *oid == oids::SHA384_WITH_RSA {
            Some(rsa_for(HashAlgorithm::Sha384))
        } else if *oid == oids::SHA512_WITH_RSA {
            Some(rsa_for(HashAlgorithm::Sha512))
        } else if [oids::ECDSA_WITH_SHA256, oids::ECDSA_WITH_SHA384, oids::ECDSA_WITH_SHA512]
            .contains(oid)
        {
            curve.map(EcdsaCurve::signature_algorithm)
        } else {
            None
        }
    }
}

impl std::fmt::Display for SignatureAlgorithm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

impl std::str::FromStr for SignatureAlgorithm {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let wanted = s.to_ascii_uppercase().replace('_', "-");
        Self::ALL
            .into_iter()
            .find(|a| a.name() == wanted)
            .ok_or_else(|| Error::UnsupportedAlgorithm(format!("signature algorithm {:?}", s)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_digest_lengths() {
        for alg in HashAlgorithm::ALL {
            assert_eq!(alg.digest(b"abc").len(), alg.digest_len());
        }
    }

    #[test]
    fn test_sha256_known_vector() {
        let digest = HashAlgorithm::Sha256.digest(b"abc");
        assert_eq!(
            digest[..4],
            [0xba, 0x78, 0x16, 0xbf],
            "SHA-256(\"abc\") starts with ba7816bf"
        );
    }

    #[test]
    fn test_incremental_matches_one_shot() {
        let mut hasher = DocumentHasher::new(HashAlgorithm::Sha384);
        hasher.update(b"%PDF-1.7\n");
        hasher.update(b"rest of file");
        assert_eq!(
            hasher.finalize(),
            HashAlgorithm::Sha384.digest(b"%PDF-1.7\nrest of file")
        );
    }

    #[test]
    fn test_hash_from_str() {
        assert_eq!("sha-384".parse::<HashAlgorithm>().unwrap(), HashAlgorithm::Sha384);
        assert_eq!("SHA512".parse::<HashAlgorithm>().unwrap(), HashAlgorithm::Sha512);
        let err = "MD5".parse::<HashAlgorithm>().unwrap_err();
        assert_eq!(err.code().as_u16(), 2004);
    }

    #[test]
    fn test_oid_round_trip_lookup() {
        assert_eq!(HashAlgorithm::from_oid(&oids::SHA512), Some(HashAlgorithm::Sha512));
        assert_eq!(EcdsaCurve::from_oid(&oids::SECP384R1), Some(EcdsaCurve::P384));
        assert_eq!(HashAlgorithm::from_oid(&oids::RSA_ENCRYPTION), None);
    }

    #[test]
    fn test_accepts_key() {
        assert!(SignatureAlgorithm::RsaPss.accepts_key(KeyAlgorithm::Rsa));
        assert!(SignatureAlgorithm::EcdsaP256Sha256.accepts_key(KeyAlgorithm::EcdsaP256));
        assert!(!SignatureAlgorithm::EcdsaP256Sha256.accepts_key(KeyAlgorithm::EcdsaP384));
        assert!(!SignatureAlgorithm::RsaPkcs1Sha256.accepts_key(KeyAlgorithm::EcdsaP521));
    }

    #[test]
    fn test_default_for() {
        assert_eq!(
            SignatureAlgorithm::default_for(KeyAlgorithm::Rsa, HashAlgorithm::Sha384).unwrap(),
            SignatureAlgorithm::RsaPkcs1Sha384
        );
        assert_eq!(
            SignatureAlgorithm::default_for(KeyAlgorithm::EcdsaP521, HashAlgorithm::Sha512).unwrap(),
            SignatureAlgorithm::EcdsaP521Sha512
        );
        assert_eq!(
            SignatureAlgorithm::default_for(KeyAlgorithm::EcdsaP384, HashAlgorithm::Sha256).unwrap(),
            SignatureAlgorithm::EcdsaP384Sha384
        );
        assert_eq!(
            SignatureAlgorithm::default_for(KeyAlgorithm::EcdsaP256, HashAlgorithm::Sha512).unwrap(),
            SignatureAlgorithm::EcdsaP256Sha256
        );
    }

    #[test]
    fn test_ecdsa_accepts_any_sha2_digest() {
        for alg in [
            SignatureAlgorithm::EcdsaP256Sha256,
            SignatureAlgorithm::EcdsaP384Sha384,
            SignatureAlgorithm::EcdsaP521Sha512,
        ] {
            for hash in HashAlgorithm::ALL {
                assert!(alg.check_hash(hash).is_ok(), "{} / {}", alg, hash);
            }
        }
        assert_eq!(
            SignatureAlgorithm::EcdsaP521Sha512.signer_info_oid(HashAlgorithm::Sha256),
            oids::ECDSA_WITH_SHA256
        );
        assert!(SignatureAlgorithm::RsaPkcs1Sha256.check_hash(HashAlgorithm::Sha384).is_err());
    }

    #[test]
    fn test_from_signer_info() {
        assert_eq!(
            SignatureAlgorithm::from_signer_info(&oids::RSA_ENCRYPTION, HashAlgorithm::Sha512, None),
            Some(SignatureAlgorithm::RsaPkcs1Sha512)
        );
        assert_eq!(
            SignatureAlgorithm::from_signer_info(
                &oids::ECDSA_WITH_SHA384,
                HashAlgorithm::Sha384,
                Some(EcdsaCurve::P384)
            ),
            Some(SignatureAlgorithm::EcdsaP384Sha384)
        );
    }

    #[test]
    fn test_signature_algorithm_from_str() {
        assert_eq!(
            "ecdsa_p256_sha256".parse::<SignatureAlgorithm>().unwrap(),
            SignatureAlgorithm::EcdsaP256Sha256
        );
        assert!("DSA".parse::<SignatureAlgorithm>().is_err());
    }
}
