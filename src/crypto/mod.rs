//! Cryptographic primitives for signing and verification.
//!
//! - [`algorithms`]: digest and signature scheme identifiers and their OIDs
//! - [`context_pool`]: bounded pool of reusable signing contexts
//! - [`CryptoEngine`]: document hashing, raw signing and verification

pub mod algorithms;
pub mod context_pool;
mod engine;

pub use algorithms::{DocumentHasher, EcdsaCurve, HashAlgorithm, SignatureAlgorithm};
pub use context_pool::{ContextLease, ContextPool, ContextPoolConfig, CryptoContext, PoolStatistics};
pub use engine::{ecdsa_raw_to_der, CryptoEngine, RsaPadding};

pub(crate) use engine::verify_prehashed;
