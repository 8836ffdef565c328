//! Signature extraction.

use super::pkcs7::parse_container;
use super::types::{ExtractedSignature, SignatureAlgorithmInfo};
use crate::document::PdfDocument;

/// Reads the signatures already present in a document.
#[derive(Debug, Clone, Copy, Default)]
pub struct SignatureExtractor;

impl SignatureExtractor {
    /// Create an extractor.
    pub fn new() -> Self {
        Self
    }

    /// One entry per signed field, in field order.
    ///
    /// A `/Contents` that is not a CMS container still yields an entry,
    /// with `pkcs7` unset and no certificates.
    pub fn extract_signatures(&self, document: &PdfDocument) -> Vec<ExtractedSignature> {
        document
            .existing_signatures()
            .iter()
            .map(|signature| {
                let pkcs7 = match parse_container(signature.container_bytes()) {
                    Ok(info) => Some(info),
                    Err(e) => {
                        log::debug!("Field {:?}: {}", signature.field_name, e);
                        None
                    },
                };
                let algorithm = match &pkcs7 {
                    Some(info) => SignatureAlgorithmInfo {
                        hash_algorithm: info.digest_algorithm,
                        signature_algorithm: info.signature_algorithm,
                        hash_oid: info.digest_algorithm_oid.clone(),
                        signature_oid: info.signature_algorithm_oid.clone(),
                        sub_filter: signature.sub_filter.clone(),
                    },
                    None => SignatureAlgorithmInfo {
                        hash_algorithm: None,
                        signature_algorithm: None,
                        hash_oid: String::new(),
                        signature_oid: String::new(),
                        sub_filter: signature.sub_filter.clone(),
                    },
                };
                ExtractedSignature {
                    field_name: signature.field_name.clone(),
                    signature: signature.clone(),
                    certificate_chain: pkcs7.as_ref().map(|p| p.certificates.clone()).unwrap_or_default(),
                    algorithm,
                    pkcs7,
                }
            })
            .collect()
    }
}
