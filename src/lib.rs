// Allow some clippy lints that are too pedantic for this project
#![allow(clippy::type_complexity)]
#![allow(clippy::too_many_arguments)]
#![allow(clippy::enum_variant_names)]
#![allow(clippy::wrong_self_convention)]
#![allow(clippy::should_implement_trait)]
#![allow(clippy::redundant_guards)]
#![allow(clippy::match_like_matches_macro)]
// Allow unused for tests
#![cfg_attr(test, allow(dead_code))]
#![cfg_attr(test, allow(unused_variables))]

//! # PDF Seal
//!
//! PDF digital-signature engine: parse existing documents, add signature
//! fields, sign with CMS/PKCS#7 over RSA or ECDSA keys through append-only
//! incremental updates, and extract and validate the signatures a document
//! already carries.
//!
//! ## Core Features
//!
//! ### Reading
//! - **Lenient parsing**: classic and stream cross-reference sections, `/Prev` chains,
//!   object streams, and table reconstruction for damaged files (ISO 32000-1:2008 §7.5)
//! - **Form discovery**: hierarchical signature fields with inherited `/FT` (§12.7)
//! - **Metadata**: `/Info` with PDFDocEncoding and UTF-16BE text strings
//!
//! ### Signing
//! - **Incremental updates**: original bytes are never rewritten, so earlier
//!   signatures keep verifying
//! - **Algorithms**: RSA PKCS#1 v1.5 and PSS, ECDSA P-256/P-384/P-521 with SHA-256/384/512
//! - **Containers**: `adbe.pkcs7.detached` SignedData with signed attributes (RFC 5652),
//!   RFC 3161 timestamp tokens verified against the signature value
//! - **Appearances**: visible widgets rendered as Form XObjects
//!
//! ### Validation
//! - **Per-signature results**: signature value, covered-bytes integrity, certificate window
//! - **Certificates**: PEM, encrypted PKCS#8 and PKCS#12 loading, chain and CRL checks
//! - **Tampering detection**: changed content, removed fields, appended revisions
//! - **Compliance reports**: digest, key usage, `/SubFilter` and timestamp policy checks
//! - **Batches**: many documents signed or validated on parallel workers
//!
//! ## Quick Start
//!
//! ```ignore
//! use pdf_seal::api::SigningEngine;
//! use pdf_seal::config::EngineConfig;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let engine = SigningEngine::new(EngineConfig::default())?;
//! let credentials = engine.certificates().load_from_pkcs12(&std::fs::read("signer.p12")?, "secret")?;
//!
//! let pdf = std::fs::read("contract.pdf")?;
//! let signed = engine.sign_document(&pdf, &credentials, &engine.signing_options().with_reason("Approved"))?;
//!
//! for result in engine.validate_signatures(&signed)? {
//!     println!("{} signed by {}: valid={}", result.field_name, result.signer_name, result.is_valid);
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## License
//!
//! Licensed under either of:
//!
//! * Apache License, Version 2.0 ([LICENSE-APACHE](LICENSE-APACHE) or <http://www.apache.org/licenses/LICENSE-2.0>)
//! * MIT license ([LICENSE-MIT](LICENSE-MIT) or <http://opensource.org/licenses/MIT>)
//!
//! at your option.

#![warn(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

// Error handling
pub mod error;

// Core PDF parsing
pub mod document;
pub mod lexer;
pub mod object;
pub mod objstm;
pub mod parser;
pub mod xref;
pub mod xref_reconstruction;

// Stream decoders
pub mod decoders;

// Keys, certificates and primitives
pub mod certificate;
pub mod crypto;

// Digital signatures
pub mod signatures;

// Incremental updates
pub mod editor;

// Object and appearance serialization
pub mod writer;

// Configuration
pub mod config;

// High-level API
pub mod api;

// Re-exports
pub use api::{capabilities, SigningEngine};
pub use certificate::{CertificateManager, SigningCredentials, X509Certificate};
pub use config::EngineConfig;
pub use crypto::{CryptoEngine, HashAlgorithm, SignatureAlgorithm};
pub use document::{PdfDocument, Rectangle, SignatureField, SignatureFieldDefinition};
pub use error::{Error, Result};
pub use signatures::{
    PdfSigner, SignatureAppearance, SignatureExtractor, SignatureValidator, SigningOptions,
    ValidationResult,
};

// Version info
/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
