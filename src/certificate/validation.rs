//! Chain links, revocation checking and the revocation TTL cache.

use super::X509Certificate;
use crate::certificate::to_hex;
use crate::crypto::algorithms::{oids, HashAlgorithm};
use crate::crypto::{verify_prehashed, RsaPadding};
use crate::error::Result;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::hash::Hash;
use std::time::{Duration, Instant};
use x509_parser::prelude::*;

/// Map with per-entry expiry.
///
/// Expired entries are dropped lazily on lookup or eagerly via
/// [`TtlCache::evict_expired`].
#[derive(Debug, Clone)]
pub struct TtlCache<K, V> {
    entries: HashMap<K, CacheEntry<V>>,
    ttl: Duration,
}

#[derive(Debug, Clone)]
struct CacheEntry<V> {
    value: V,
    expires_at: Instant,
}

impl<K: Eq + Hash, V: Clone> TtlCache<K, V> {
    /// Empty cache whose entries live for `ttl`.
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: HashMap::new(),
            ttl,
        }
    }

    /// Entry lifetime.
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Live value for `key`; an expired entry is removed and `None` returned.
    pub fn get(&mut self, key: &K) -> Option<V> {
        let now = Instant::now();
        match self.entries.get(key) {
            Some(entry) if entry.expires_at > now => Some(entry.value.clone()),
            Some(_) => {
                self.entries.remove(key);
                None
            },
            None => None,
        }
    }

    /// Insert or replace, restarting the entry's TTL.
    pub fn insert(&mut self, key: K, value: V) {
        let expires_at = Instant::now() + self.ttl;
        self.entries.insert(key, CacheEntry { value, expires_at });
    }

    /// Drop every expired entry, returning how many were removed.
    pub fn evict_expired(&mut self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, entry| entry.expires_at > now);
        before - self.entries.len()
    }

    /// Entries currently stored, including not-yet-evicted expired ones.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing is stored.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Revocation answer for one certificate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RevocationStatus {
    /// Not listed by an authoritative source
    Good,
    /// Listed as revoked
    Revoked {
        /// Revocation date, if the source gives one
        revoked_at: Option<DateTime<Utc>>,
    },
    /// No source covers this certificate
    Unknown,
}

/// Source of revocation information.
///
/// Implementations receive the issuer when the chain provides one.
pub trait RevocationChecker: Send + Sync {
    /// Look up `cert`.
    fn check(
        &self,
        cert: &X509Certificate,
        issuer: Option<&X509Certificate>,
    ) -> Result<RevocationStatus>;
}

/// Treats every certificate as not revoked.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoRevocationCheck;

impl RevocationChecker for NoRevocationCheck {
    fn check(&self, _: &X509Certificate, _: Option<&X509Certificate>) -> Result<RevocationStatus> {
        Ok(RevocationStatus::Good)
    }
}

/// Checks certificates against caller-supplied DER CRLs.
#[derive(Debug, Clone, Default)]
pub struct CrlRevocationChecker {
    crls: Vec<Vec<u8>>,
}

impl CrlRevocationChecker {
    /// Checker over the given DER-encoded CRLs.
    pub fn new(crls: Vec<Vec<u8>>) -> Self {
        Self { crls }
    }

    /// Add another CRL.
    pub fn add_crl(&mut self, der: Vec<u8>) {
        self.crls.push(der);
    }
}

impl RevocationChecker for CrlRevocationChecker {
    fn check(
        &self,
        cert: &X509Certificate,
        _issuer: Option<&X509Certificate>,
    ) -> Result<RevocationStatus> {
        let mut covered = false;

        for der in &self.crls {
            let crl = match parse_x509_crl(der) {
                Ok((_, crl)) => crl,
                Err(e) => {
                    log::warn!("Ignoring undecodable CRL: {}", e);
                    continue;
                },
            };
            if crl.issuer().to_string() != cert.issuer {
                continue;
            }
            covered = true;

            for revoked in crl.iter_revoked_certificates() {
                if to_hex(revoked.raw_serial()) == cert.serial_number {
                    let revoked_at =
                        DateTime::<Utc>::from_timestamp(revoked.revocation_date.timestamp(), 0);
                    return Ok(RevocationStatus::Revoked { revoked_at });
                }
            }
        }

        Ok(if covered {
            RevocationStatus::Good
        } else {
            RevocationStatus::Unknown
        })
    }
}

/// Whether `child` names `parent` as issuer and carries a valid signature by it.
pub(crate) fn issued_by(child: &X509Certificate, parent: &X509Certificate) -> bool {
    if child.issuer != parent.subject {
        return false;
    }
    let (Ok((tbs, algorithm, signature)), Ok(key)) = (child.signed_parts(), parent.public_key())
    else {
        return false;
    };

    let scheme = [
        (oids::SHA256_WITH_RSA, HashAlgorithm::Sha256),
        (oids::SHA384_WITH_RSA, HashAlgorithm::Sha384),
        (oids::SHA512_WITH_RSA, HashAlgorithm::Sha512),
        (oids::ECDSA_WITH_SHA256, HashAlgorithm::Sha256),
        (oids::ECDSA_WITH_SHA384, HashAlgorithm::Sha384),
        (oids::ECDSA_WITH_SHA512, HashAlgorithm::Sha512),
    ]
    .into_iter()
    .find(|(oid, _)| oid.to_string() == algorithm);

    match scheme {
        Some((_, hash)) => {
            let digest = hash.digest(&tbs);
            verify_prehashed(&key, hash, RsaPadding::Pkcs1v15, &digest, &signature)
        },
        None => {
            log::debug!("Certificate signature algorithm {} not supported", algorithm);
            false
        },
    }
}
