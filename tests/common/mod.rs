//! Shared fixtures for the integration tests.

#![allow(dead_code)]

use cms::content_info::ContentInfo;
use der::asn1::{Int, ObjectIdentifier};
use der::{Any, Decode, Encode, Tag};
use pdf_seal::certificate::{CertificateManager, SigningCredentials, X509Certificate};
use pdf_seal::crypto::algorithms::oids;
use pdf_seal::crypto::{CryptoEngine, HashAlgorithm, SignatureAlgorithm};
use pdf_seal::signatures::timestamp::{PkiStatusInfo, TimeStampReq, TimeStampResp, TstInfo};
use pdf_seal::signatures::{Pkcs7Builder, TimestampClient};
use std::path::PathBuf;
use std::time::Duration;

/// Route `log` output through the test harness.
pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub fn fixture_path(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tests").join("fixtures").join(name)
}

pub fn fixture(name: &str) -> Vec<u8> {
    std::fs::read(fixture_path(name)).unwrap_or_else(|e| panic!("fixture {}: {}", name, e))
}

pub fn fixture_str(name: &str) -> String {
    String::from_utf8(fixture(name)).unwrap()
}

pub fn minimal_pdf() -> Vec<u8> {
    fixture("minimal.pdf")
}

pub fn two_fields_pdf() -> Vec<u8> {
    fixture("two_signature_fields.pdf")
}

pub fn xref_stream_pdf() -> Vec<u8> {
    fixture("xref_stream.pdf")
}

/// Credentials from `<label>.pem` and `<label>_key.pem`.
pub fn credentials(label: &str) -> SigningCredentials {
    CertificateManager::new()
        .load_from_pem(
            &fixture_str(&format!("{}.pem", label)),
            &fixture_str(&format!("{}_key.pem", label)),
            None,
        )
        .unwrap()
}

pub fn rsa_credentials() -> SigningCredentials {
    credentials("signer_rsa")
}

pub fn certificate(name: &str) -> X509Certificate {
    CertificateManager::new()
        .load_certificates_pem(&fixture_str(name))
        .unwrap()
        .remove(0)
}

pub fn root_ca() -> X509Certificate {
    certificate("root_ca.pem")
}

/// Time-stamp authority answering in-process with the test TSA certificate.
pub struct LocalTsa {
    credentials: SigningCredentials,
}

impl LocalTsa {
    pub fn new() -> Self {
        Self {
            credentials: credentials("tsa_rsa"),
        }
    }
}

impl TimestampClient for LocalTsa {
    fn send_request(&self, _url: &str, request: &[u8], _timeout: Duration) -> pdf_seal::Result<Vec<u8>> {
        let req = TimeStampReq::from_der(request).unwrap();
        let tst = TstInfo {
            version: 1,
            policy: ObjectIdentifier::new_unwrap("1.2.3.4.1"),
            message_imprint: req.message_imprint,
            serial_number: Int::new(&[0x01]).unwrap(),
            gen_time: Any::new(Tag::GeneralizedTime, b"20240601080000Z".to_vec()).unwrap(),
            accuracy: None,
            ordering: false,
            nonce: req.nonce.map(|n| Int::from_der(&n.to_der().unwrap()).unwrap()),
            tsa: None,
            extensions: None,
        };
        let builder = Pkcs7Builder::new(HashAlgorithm::Sha256, SignatureAlgorithm::RsaPkcs1Sha256)
            .with_certificate(self.credentials.certificate.clone())
            .with_encapsulated_content(oids::ID_CT_TST_INFO, tst.to_der().unwrap());
        let to_sign = HashAlgorithm::Sha256.digest(&builder.signed_attributes_der().unwrap());
        let signature = CryptoEngine::new()
            .create_signature(&to_sign, &self.credentials.private_key, SignatureAlgorithm::RsaPkcs1Sha256)
            .unwrap();
        let token = ContentInfo::from_der(&builder.with_signature(signature).build().unwrap()).unwrap();
        let response = TimeStampResp {
            status: PkiStatusInfo {
                status: 0,
                status_string: None,
                fail_info: None,
            },
            time_stamp_token: Some(token),
        };
        Ok(response.to_der().unwrap())
    }
}
