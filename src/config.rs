//! Engine configuration.
//!
//! Everything is set explicitly by the host, in code or from JSON; nothing
//! is read from the environment.
//!
//! ```ignore
//! let config = EngineConfig::from_json(r#"{
//!     "default_hash_algorithm": "Sha384",
//!     "signature_reservation": 16384,
//!     "timestamp": { "url": "https://tsa.example/", "timeout_ms": 5000 }
//! }"#)?;
//! ```

use crate::crypto::{ContextPoolConfig, HashAlgorithm};
use crate::signatures::CompliancePolicy;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default space reserved for the DER container in `/Contents`.
pub const DEFAULT_SIGNATURE_RESERVATION: usize = 8192;

/// Smallest accepted reservation.
pub const MIN_SIGNATURE_RESERVATION: usize = 1024;

/// Default timestamp request timeout.
const DEFAULT_TIMESTAMP_TIMEOUT_MS: u64 = 10_000;

fn default_timeout_ms() -> u64 {
    DEFAULT_TIMESTAMP_TIMEOUT_MS
}

/// Timestamp authority settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimestampConfig {
    /// Authority URL handed to the [`TimestampClient`](crate::signatures::TimestampClient)
    pub url: String,
    /// Upper bound on one request
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// Fail signing instead of signing without a token
    #[serde(default)]
    pub required: bool,
}

impl TimestampConfig {
    /// Optional timestamping against `url` with the default timeout.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            timeout_ms: DEFAULT_TIMESTAMP_TIMEOUT_MS,
            required: false,
        }
    }

    /// Set the request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Make a token mandatory.
    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    /// The request timeout.
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// What certificate validation demands beyond the validity window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidationPolicy {
    /// Consult the revocation checker
    pub check_revocation: bool,
    /// Require the chain to end at a caller-supplied root
    pub require_trusted_chain: bool,
}

/// How [`SigningEngine`](crate::api::SigningEngine) runs multi-document calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    /// Worker threads per batch
    pub max_parallel: usize,
    /// Keep going after a document fails; otherwise the rest is skipped
    pub continue_on_error: bool,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            max_parallel: std::thread::available_parallelism().map_or(1, |n| n.get()),
            continue_on_error: true,
        }
    }
}

/// Engine-wide settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Crypto context pool limits
    pub context_pool: ContextPoolConfig,
    /// Digest used when signing options do not name one
    pub default_hash_algorithm: HashAlgorithm,
    /// Bytes reserved for the DER container in `/Contents`
    pub signature_reservation: usize,
    /// Timestamp authority, if any
    pub timestamp: Option<TimestampConfig>,
    /// Certificate validation policy
    pub validation: ValidationPolicy,
    /// Policy for compliance reports
    pub compliance: CompliancePolicy,
    /// Multi-document calls
    pub batch: BatchConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            context_pool: ContextPoolConfig::default(),
            default_hash_algorithm: HashAlgorithm::Sha256,
            signature_reservation: DEFAULT_SIGNATURE_RESERVATION,
            timestamp: None,
            validation: ValidationPolicy::default(),
            compliance: CompliancePolicy::default(),
            batch: BatchConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse and validate a JSON document; missing keys take their defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| Error::Configuration(format!("invalid engine configuration: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Render as pretty-printed JSON.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| Error::Configuration(e.to_string()))
    }

    /// Reject settings that cannot work together.
    pub fn validate(&self) -> Result<()> {
        if self.context_pool.max_pool_size == 0 {
            return Err(Error::Configuration("context_pool.max_pool_size must be positive".to_string()));
        }
        if self.signature_reservation < MIN_SIGNATURE_RESERVATION {
            return Err(Error::Configuration(format!(
                "signature_reservation {} is below the minimum of {} bytes",
                self.signature_reservation, MIN_SIGNATURE_RESERVATION
            )));
        }
        if self.batch.max_parallel == 0 {
            return Err(Error::Configuration("batch.max_parallel must be positive".to_string()));
        }
        if let Some(ts) = &self.timestamp {
            if ts.url.trim().is_empty() {
                return Err(Error::Configuration("timestamp.url is empty".to_string()));
            }
            if ts.timeout_ms == 0 {
                return Err(Error::Configuration("timestamp.timeout_ms must be positive".to_string()));
            }
        }
        Ok(())
    }

    /// Set the context pool limits.
    pub fn with_pool_config(mut self, pool: ContextPoolConfig) -> Self {
        self.context_pool = pool;
        self
    }

    /// Set the default digest.
    pub fn with_hash_algorithm(mut self, hash: HashAlgorithm) -> Self {
        self.default_hash_algorithm = hash;
        self
    }

    /// Set the `/Contents` reservation.
    pub fn with_signature_reservation(mut self, bytes: usize) -> Self {
        self.signature_reservation = bytes;
        self
    }

    /// Enable timestamping.
    pub fn with_timestamp(mut self, timestamp: TimestampConfig) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    /// Set the compliance policy.
    pub fn with_compliance_policy(mut self, policy: CompliancePolicy) -> Self {
        self.compliance = policy;
        self
    }

    /// Set the batch settings.
    pub fn with_batch_config(mut self, batch: BatchConfig) -> Self {
        self.batch = batch;
        self
    }

    /// Set the certificate validation policy.
    pub fn with_validation_policy(mut self, policy: ValidationPolicy) -> Self {
        self.validation = policy;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = EngineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.signature_reservation, 8192);
        assert_eq!(config.context_pool.max_pool_size, 50);
        assert!(config.timestamp.is_none());
    }

    #[test]
    fn test_from_json_partial() {
        let config = EngineConfig::from_json(
            r#"{
                "default_hash_algorithm": "Sha384",
                "timestamp": { "url": "https://tsa.example/" },
                "validation": { "check_revocation": true }
            }"#,
        )
        .unwrap();
        assert_eq!(config.default_hash_algorithm, HashAlgorithm::Sha384);
        let ts = config.timestamp.unwrap();
        assert_eq!(ts.timeout(), Duration::from_secs(10));
        assert!(!ts.required);
        assert!(config.validation.check_revocation);
        assert!(!config.validation.require_trusted_chain);
    }

    #[test]
    fn test_compliance_and_batch_sections() {
        let config = EngineConfig::from_json(
            r#"{
                "compliance": { "minimum_hash": "Sha384", "require_timestamp": true },
                "batch": { "max_parallel": 2, "continue_on_error": false }
            }"#,
        )
        .unwrap();
        assert_eq!(config.compliance.minimum_hash, HashAlgorithm::Sha384);
        assert!(config.compliance.require_timestamp);
        assert_eq!(config.compliance.minimum_rsa_bits, 2048);
        assert_eq!(config.batch.max_parallel, 2);
        assert!(!config.batch.continue_on_error);
        assert!(EngineConfig::default().batch.max_parallel >= 1);
    }

    #[test]
    fn test_json_round_trip() {
        let config = EngineConfig::default()
            .with_signature_reservation(16384)
            .with_timestamp(TimestampConfig::new("https://tsa.example/").required());
        let parsed = EngineConfig::from_json(&config.to_json().unwrap()).unwrap();
        assert_eq!(parsed, config);
    }

    #[test]
    fn test_rejects_inconsistent_values() {
        let cases = [
            EngineConfig::default().with_signature_reservation(100),
            EngineConfig::default().with_pool_config(ContextPoolConfig {
                max_pool_size: 0,
                ..ContextPoolConfig::default()
            }),
            EngineConfig::default().with_timestamp(TimestampConfig::new(" ")),
            EngineConfig::default().with_batch_config(BatchConfig {
                max_parallel: 0,
                continue_on_error: true,
            }),
        ];
        for config in cases {
            assert_eq!(config.validate().unwrap_err().code().as_u16(), 4004);
        }
        let err = EngineConfig::from_json("{ not json").unwrap_err();
        assert_eq!(err.code().as_u16(), 4004);
    }
}
