//! RFC 3161 time-stamp protocol.
//!
//! The engine performs no network I/O. Hosts implement [`TimestampClient`]
//! to carry a DER `TimeStampReq` to an authority and return its
//! `TimeStampResp`. Building the request, checking the response status and
//! verifying the returned token all happen here.

use super::pkcs7::{parse_container, trim_der_padding};
use crate::certificate::X509Certificate;
use crate::config::TimestampConfig;
use crate::crypto::algorithms::oids;
use crate::crypto::{CryptoEngine, HashAlgorithm};
use crate::error::{Error, Result};
use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use cms::content_info::ContentInfo;
use der::asn1::{BitString, Int, ObjectIdentifier, OctetString};
use der::{Any, Decode, Encode, Sequence, Tag, Tagged};
use rand::RngCore;
use spki::AlgorithmIdentifierOwned;
use std::sync::{mpsc, Arc};
use std::time::Duration;
use x509_cert::ext::pkix::name::GeneralName;
use x509_cert::ext::Extensions;

/// Carries encoded requests to a time-stamp authority.
pub trait TimestampClient: Send + Sync {
    /// Deliver `request`, a DER `TimeStampReq`, to `url` and return the DER
    /// `TimeStampResp` (RFC 3161 §3.4, `application/timestamp-query`).
    ///
    /// The caller stops waiting after `timeout` and drops a late answer.
    fn send_request(&self, url: &str, request: &[u8], timeout: Duration) -> Result<Vec<u8>>;
}

/// `MessageImprint` (RFC 3161 §2.4.1).
#[derive(Clone, Debug, Eq, PartialEq, Sequence)]
pub struct MessageImprint {
    pub hash_algorithm: AlgorithmIdentifierOwned,
    pub hashed_message: OctetString,
}

impl MessageImprint {
    /// Imprint of `data` under `hash`.
    pub fn of(data: &[u8], hash: HashAlgorithm) -> Result<Self> {
        Ok(Self {
            hash_algorithm: AlgorithmIdentifierOwned {
                oid: hash.oid(),
                parameters: None,
            },
            hashed_message: OctetString::new(hash.digest(data)).map_err(request_error)?,
        })
    }
}

/// `TimeStampReq` without extensions (RFC 3161 §2.4.1).
#[derive(Clone, Debug, Eq, PartialEq, Sequence)]
pub struct TimeStampReq {
    pub version: u8,
    pub message_imprint: MessageImprint,
    #[asn1(optional = "true")]
    pub req_policy: Option<ObjectIdentifier>,
    #[asn1(optional = "true")]
    pub nonce: Option<u64>,
    #[asn1(default = "Default::default")]
    pub cert_req: bool,
}

/// `PKIStatusInfo` (RFC 3161 §2.4.2).
#[derive(Clone, Debug, Eq, PartialEq, Sequence)]
pub struct PkiStatusInfo {
    pub status: u32,
    #[asn1(optional = "true")]
    pub status_string: Option<Vec<String>>,
    #[asn1(optional = "true")]
    pub fail_info: Option<BitString>,
}

/// `TimeStampResp` (RFC 3161 §2.4.2).
#[derive(Clone, Debug, Eq, PartialEq, Sequence)]
pub struct TimeStampResp {
    pub status: PkiStatusInfo,
    #[asn1(optional = "true")]
    pub time_stamp_token: Option<ContentInfo>,
}

/// `Accuracy` (RFC 3161 §2.4.2).
#[derive(Clone, Debug, Eq, PartialEq, Sequence)]
pub struct Accuracy {
    #[asn1(optional = "true")]
    pub seconds: Option<u32>,
    #[asn1(context_specific = "0", tag_mode = "IMPLICIT", optional = "true")]
    pub millis: Option<u16>,
    #[asn1(context_specific = "1", tag_mode = "IMPLICIT", optional = "true")]
    pub micros: Option<u16>,
}

/// `TSTInfo`, the content a token signs (RFC 3161 §2.4.2).
///
/// `genTime` stays raw: authorities may send fractional seconds, which
/// `der::asn1::GeneralizedTime` refuses.
#[derive(Clone, Debug, Eq, PartialEq, Sequence)]
pub struct TstInfo {
    pub version: u8,
    pub policy: ObjectIdentifier,
    pub message_imprint: MessageImprint,
    pub serial_number: Int,
    pub gen_time: Any,
    #[asn1(optional = "true")]
    pub accuracy: Option<Accuracy>,
    #[asn1(default = "Default::default")]
    pub ordering: bool,
    #[asn1(optional = "true")]
    pub nonce: Option<Int>,
    #[asn1(context_specific = "0", tag_mode = "EXPLICIT", optional = "true")]
    pub tsa: Option<GeneralName>,
    #[asn1(context_specific = "1", tag_mode = "IMPLICIT", optional = "true")]
    pub extensions: Option<Extensions>,
}

/// A verified `TimeStampToken`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimestampToken {
    /// ContentInfo DER, ready to embed as an unsigned attribute
    pub der: Vec<u8>,
    /// `genTime`
    pub gen_time: DateTime<Utc>,
    /// TSA policy OID
    pub policy: String,
    /// Serial number, hex
    pub serial_number: String,
    /// Digest of the message imprint
    pub hash_algorithm: HashAlgorithm,
    /// Certificate that signed the token
    pub tsa_certificate: Option<X509Certificate>,
}

/// Encode a version 1 request for `data` that asks for the TSA certificate.
pub fn build_request(data: &[u8], hash: HashAlgorithm, nonce: u64) -> Result<Vec<u8>> {
    TimeStampReq {
        version: 1,
        message_imprint: MessageImprint::of(data, hash)?,
        req_policy: None,
        nonce: Some(nonce),
        cert_req: true,
    }
    .to_der()
    .map_err(request_error)
}

/// Check that `token` timestamps `signature` and is signed by a time-stamp
/// authority.
///
/// When `nonce` is given the token must echo it.
pub fn verify_token(token: &[u8], signature: &[u8], nonce: Option<u64>) -> Result<TimestampToken> {
    let info = parse_container(token)
        .map_err(|e| Error::TimestampRequest(format!("token is not a CMS container: {}", e)))?;
    if info.content_type != oids::ID_CT_TST_INFO.to_string() {
        return Err(Error::TimestampRequest(format!(
            "token content type {} is not id-ct-TSTInfo",
            info.content_type
        )));
    }
    let content = info
        .encapsulated_content
        .as_deref()
        .ok_or_else(|| Error::TimestampRequest("token carries no TSTInfo".to_string()))?;
    let tst = TstInfo::from_der(content).map_err(request_error)?;

    let imprint = &tst.message_imprint;
    let hash = HashAlgorithm::from_oid(&imprint.hash_algorithm.oid).ok_or_else(|| {
        Error::TimestampRequest(format!("unsupported imprint digest {}", imprint.hash_algorithm.oid))
    })?;
    if imprint.hashed_message.as_bytes() != hash.digest(signature).as_slice() {
        return Err(Error::TimestampRequest(
            "message imprint does not match the signature value".to_string(),
        ));
    }

    if let Some(expected) = nonce {
        let echoed = tst.nonce.as_ref().map(Encode::to_der).transpose().map_err(request_error)?;
        if echoed != Some(expected.to_der().map_err(request_error)?) {
            return Err(Error::TimestampRequest("nonce was not echoed".to_string()));
        }
    }

    let digest = info
        .digest_algorithm
        .ok_or_else(|| Error::TimestampRequest(format!("unknown token digest {}", info.digest_algorithm_oid)))?;
    if info.message_digest.as_deref() != Some(digest.digest(content).as_slice()) {
        return Err(Error::TimestampRequest("token messageDigest does not cover TSTInfo".to_string()));
    }
    let signer = info
        .signer_certificate
        .as_ref()
        .ok_or_else(|| Error::TimestampRequest("token does not include the TSA certificate".to_string()))?;
    // RFC 3161 §2.3
    if !signer
        .extended_key_usage()
        .is_some_and(|usages| usages.iter().any(|u| u == "timeStamping"))
    {
        return Err(Error::TimestampRequest(format!(
            "{} is not authorized for time stamping",
            signer.subject
        )));
    }
    let attributes = info
        .signed_attributes
        .as_deref()
        .ok_or_else(|| Error::TimestampRequest("token has no signed attributes".to_string()))?;
    if !CryptoEngine::new().verify_signature_with(
        &info.signature_value,
        &digest.digest(attributes),
        signer,
        info.signature_algorithm,
    ) {
        return Err(Error::TimestampRequest("token signature does not verify".to_string()));
    }

    Ok(TimestampToken {
        der: trim_der_padding(token).to_vec(),
        gen_time: generalized_time(&tst.gen_time)?,
        policy: tst.policy.to_string(),
        serial_number: hex(tst.serial_number.as_bytes()),
        hash_algorithm: hash,
        tsa_certificate: info.signer_certificate.clone(),
    })
}

/// Fetch a token over `signature`, degrading to `None` unless the
/// configuration requires one.
///
/// `signature` must be the value as stored in the SignerInfo.
pub(crate) fn obtain_token(
    client: Option<&Arc<dyn TimestampClient>>,
    config: Option<&TimestampConfig>,
    signature: &[u8],
    hash: HashAlgorithm,
) -> Result<Option<TimestampToken>> {
    let Some(config) = config else {
        return Ok(None);
    };

    let outcome = match client {
        Some(client) => request(client, config, signature, hash),
        None => Err(Error::TimestampRequest("no timestamp client is configured".to_string())),
    };

    match outcome {
        Ok(token) => {
            log::debug!(
                "Timestamp from {}: {} bytes, genTime {}, serial {}",
                config.url,
                token.der.len(),
                token.gen_time,
                token.serial_number
            );
            Ok(Some(token))
        },
        Err(e) if config.required => Err(e),
        Err(e) => {
            log::warn!("Signing without timestamp: {}", e);
            Ok(None)
        },
    }
}

fn request(
    client: &Arc<dyn TimestampClient>,
    config: &TimestampConfig,
    signature: &[u8],
    hash: HashAlgorithm,
) -> Result<TimestampToken> {
    let nonce = rand::rngs::OsRng.next_u64();
    let request = build_request(signature, hash, nonce)?;
    let answer = exchange(Arc::clone(client), config, request)?;

    let response = TimeStampResp::from_der(&answer).map_err(|e| {
        Error::TimestampRequest(format!("{} returned an undecodable response: {}", config.url, e))
    })?;
    // granted, grantedWithMods
    if response.status.status > 1 {
        return Err(Error::TimestampRequest(format!(
            "{} answered {}",
            config.url,
            describe_status(&response.status)
        )));
    }
    let token = response
        .time_stamp_token
        .ok_or_else(|| Error::TimestampRequest(format!("{} granted without a token", config.url)))?
        .to_der()
        .map_err(request_error)?;
    verify_token(&token, signature, Some(nonce))
}

/// Run the client on its own thread and give up after the configured timeout.
fn exchange(client: Arc<dyn TimestampClient>, config: &TimestampConfig, request: Vec<u8>) -> Result<Vec<u8>> {
    let timeout = config.timeout();
    let url = config.url.clone();
    let (tx, rx) = mpsc::channel();
    std::thread::Builder::new()
        .name("tsa-request".to_string())
        .spawn(move || {
            let _ = tx.send(client.send_request(&url, &request, timeout));
        })
        .map_err(Error::Io)?;

    match rx.recv_timeout(timeout) {
        Ok(answer) => answer.map_err(|e| match e {
            Error::TimestampRequest(_) => e,
            other => Error::TimestampRequest(other.to_string()),
        }),
        Err(mpsc::RecvTimeoutError::Timeout) => Err(Error::TimestampRequest(format!(
            "{} did not answer within {} ms",
            config.url, config.timeout_ms
        ))),
        Err(mpsc::RecvTimeoutError::Disconnected) => Err(Error::TimestampRequest(format!(
            "client for {} stopped without an answer",
            config.url
        ))),
    }
}

fn describe_status(info: &PkiStatusInfo) -> String {
    let name = match info.status {
        0 => "granted",
        1 => "grantedWithMods",
        2 => "rejection",
        3 => "waiting",
        4 => "revocationWarning",
        5 => "revocationNotification",
        _ => "unknown status",
    };
    let mut text = format!("{} ({})", name, info.status);
    if let Some(strings) = &info.status_string {
        text.push_str(": ");
        text.push_str(&strings.join("; "));
    }
    if let Some(bits) = info.fail_info.as_ref().and_then(BitString::as_bytes) {
        text.push_str(&format!(" [failInfo {}]", hex(bits)));
    }
    text
}

/// `YYYYMMDDHHMMSS[.f]Z`
fn generalized_time(value: &Any) -> Result<DateTime<Utc>> {
    if value.tag() != Tag::GeneralizedTime {
        return Err(Error::TimestampRequest(format!("genTime has tag {}", value.tag())));
    }
    let text = std::str::from_utf8(value.value())
        .map_err(|_| Error::TimestampRequest("genTime is not ASCII".to_string()))?;
    NaiveDateTime::parse_from_str(text, "%Y%m%d%H%M%S%.fZ")
        .map(|naive| Utc.from_utc_datetime(&naive))
        .map_err(|e| Error::TimestampRequest(format!("genTime {:?}: {}", text, e)))
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

fn request_error(e: der::Error) -> Error {
    Error::TimestampRequest(format!("RFC 3161 encoding: {}", e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::certificate::{CertificateManager, SigningCredentials};
    use crate::crypto::SignatureAlgorithm;
    use crate::signatures::pkcs7::Pkcs7Builder;
    use chrono::Timelike;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Instant;

    #[derive(Clone, Copy)]
    enum Behaviour {
        Honest,
        WrongImprint,
        WrongNonce,
        Rejected,
        Garbage,
        Hang(Duration),
    }

    /// In-process authority signing with the test TSA certificate.
    struct LocalAuthority {
        credentials: SigningCredentials,
        behaviour: Behaviour,
        calls: AtomicUsize,
    }

    fn authority(behaviour: Behaviour) -> Arc<LocalAuthority> {
        let credentials = CertificateManager::new()
            .load_from_pem(
                include_str!("../../tests/fixtures/tsa_rsa.pem"),
                include_str!("../../tests/fixtures/tsa_rsa_key.pem"),
                None,
            )
            .unwrap();
        Arc::new(LocalAuthority {
            credentials,
            behaviour,
            calls: AtomicUsize::new(0),
        })
    }

    impl LocalAuthority {
        fn token(&self, imprint: MessageImprint, nonce: Option<u64>) -> ContentInfo {
            let tst = TstInfo {
                version: 1,
                policy: ObjectIdentifier::new_unwrap("1.2.3.4.1"),
                message_imprint: imprint,
                serial_number: Int::new(&[0x30, 0x39]).unwrap(),
                gen_time: Any::new(Tag::GeneralizedTime, b"20240301120000.25Z".to_vec()).unwrap(),
                accuracy: Some(Accuracy {
                    seconds: Some(1),
                    millis: None,
                    micros: None,
                }),
                ordering: false,
                nonce: nonce.map(|n| Int::from_der(&n.to_der().unwrap()).unwrap()),
                tsa: None,
                extensions: None,
            };
            let hash = HashAlgorithm::Sha256;
            let algorithm = SignatureAlgorithm::RsaPkcs1Sha256;
            let builder = Pkcs7Builder::new(hash, algorithm)
                .with_certificate(self.credentials.certificate.clone())
                .with_encapsulated_content(oids::ID_CT_TST_INFO, tst.to_der().unwrap());
            let to_sign = hash.digest(&builder.signed_attributes_der().unwrap());
            let signature = CryptoEngine::new()
                .create_signature(&to_sign, &self.credentials.private_key, algorithm)
                .unwrap();
            ContentInfo::from_der(&builder.with_signature(signature).build().unwrap()).unwrap()
        }
    }

    impl TimestampClient for LocalAuthority {
        fn send_request(&self, _url: &str, request: &[u8], _timeout: Duration) -> Result<Vec<u8>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let req = TimeStampReq::from_der(request).unwrap();
            let granted = PkiStatusInfo {
                status: 0,
                status_string: None,
                fail_info: None,
            };
            let response = match self.behaviour {
                Behaviour::Honest => TimeStampResp {
                    status: granted,
                    time_stamp_token: Some(self.token(req.message_imprint, req.nonce)),
                },
                Behaviour::WrongImprint => TimeStampResp {
                    status: granted,
                    time_stamp_token: Some(
                        self.token(MessageImprint::of(b"other", HashAlgorithm::Sha256)?, req.nonce),
                    ),
                },
                Behaviour::WrongNonce => TimeStampResp {
                    status: granted,
                    time_stamp_token: Some(
                        self.token(req.message_imprint, req.nonce.map(|n| n.wrapping_add(1))),
                    ),
                },
                Behaviour::Rejected => TimeStampResp {
                    status: PkiStatusInfo {
                        status: 2,
                        status_string: Some(vec!["unsupported policy".to_string()]),
                        fail_info: Some(BitString::from_bytes(&[0x01, 0x00]).unwrap()),
                    },
                    time_stamp_token: None,
                },
                Behaviour::Garbage => return Ok(b"HTTP/1.1 500".to_vec()),
                Behaviour::Hang(delay) => {
                    std::thread::sleep(delay);
                    return Ok(Vec::new());
                },
            };
            Ok(response.to_der().unwrap())
        }
    }

    fn obtain(
        authority: &Arc<LocalAuthority>,
        config: &TimestampConfig,
        signature: &[u8],
    ) -> Result<Option<TimestampToken>> {
        let client: Arc<dyn TimestampClient> = authority.clone();
        obtain_token(Some(&client), Some(config), signature, HashAlgorithm::Sha256)
    }

    fn required() -> TimestampConfig {
        TimestampConfig::new("https://tsa.example/").required()
    }

    #[test]
    fn test_request_encoding() {
        let der = build_request(b"signature value", HashAlgorithm::Sha384, 42).unwrap();
        let req = TimeStampReq::from_der(&der).unwrap();
        assert_eq!(req.version, 1);
        assert!(req.cert_req);
        assert_eq!(req.nonce, Some(42));
        assert_eq!(req.message_imprint.hash_algorithm.oid, oids::SHA384);
        assert_eq!(
            req.message_imprint.hashed_message.as_bytes(),
            HashAlgorithm::Sha384.digest(b"signature value").as_slice()
        );
    }

    #[test]
    fn test_token_verified() {
        let tsa = authority(Behaviour::Honest);
        let token = obtain(&tsa, &required(), b"signature value").unwrap().unwrap();

        let expected = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
        assert_eq!(token.gen_time.with_nanosecond(0), Some(expected));
        assert_eq!(token.gen_time.timestamp_subsec_millis(), 250);
        assert_eq!(token.policy, "1.2.3.4.1");
        assert_eq!(token.serial_number, "3039");
        assert_eq!(token.hash_algorithm, HashAlgorithm::Sha256);
        assert!(token.tsa_certificate.unwrap().subject.contains("Seal Test TSA"));
        assert!(verify_token(&token.der, b"signature value", None).is_ok());
        assert!(verify_token(&token.der, b"another signature", None).is_err());
    }

    #[test]
    fn test_no_config_means_no_request() {
        let tsa = authority(Behaviour::Honest);
        let client: Arc<dyn TimestampClient> = tsa.clone();
        let token = obtain_token(Some(&client), None, b"sig", HashAlgorithm::Sha256).unwrap();
        assert!(token.is_none());
        assert_eq!(tsa.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_mismatched_imprint() {
        let tsa = authority(Behaviour::WrongImprint);
        let err = obtain(&tsa, &required(), b"sig").unwrap_err();
        assert_eq!(err.code().as_u16(), 7001);
        assert!(err.to_string().contains("imprint"));

        let optional = TimestampConfig::new("https://tsa.example/");
        assert!(obtain(&tsa, &optional, b"sig").unwrap().is_none());
    }

    #[test]
    fn test_rejected_status() {
        let tsa = authority(Behaviour::Rejected);
        let err = obtain(&tsa, &required(), b"sig").unwrap_err();
        assert_eq!(err.code().as_u16(), 7001);
        assert!(err.to_string().contains("rejection (2): unsupported policy"));
    }

    #[test]
    fn test_nonce_must_be_echoed() {
        let tsa = authority(Behaviour::WrongNonce);
        let err = obtain(&tsa, &required(), b"sig").unwrap_err();
        assert!(err.to_string().contains("nonce"));
    }

    #[test]
    fn test_undecodable_response() {
        let tsa = authority(Behaviour::Garbage);
        assert_eq!(obtain(&tsa, &required(), b"sig").unwrap_err().code().as_u16(), 7001);
    }

    #[test]
    fn test_timeout_is_enforced() {
        let tsa = authority(Behaviour::Hang(Duration::from_secs(2)));
        let config = required().with_timeout(Duration::from_millis(50));
        let started = Instant::now();
        let err = obtain(&tsa, &config, b"sig").unwrap_err();
        assert!(started.elapsed() < Duration::from_secs(1));
        assert!(err.to_string().contains("within 50 ms"));
    }

    #[test]
    fn test_missing_client() {
        let optional = TimestampConfig::new("https://tsa.example/");
        assert!(obtain_token(None, Some(&optional), b"sig", HashAlgorithm::Sha256).unwrap().is_none());
        let err = obtain_token(None, Some(&required()), b"sig", HashAlgorithm::Sha256).unwrap_err();
        assert_eq!(err.code().as_u16(), 7001);
    }

    #[test]
    fn test_non_tsa_signer_rejected() {
        let mut tsa = authority(Behaviour::Honest);
        Arc::get_mut(&mut tsa).unwrap().credentials = CertificateManager::new()
            .load_from_pem(
                include_str!("../../tests/fixtures/signer_rsa.pem"),
                include_str!("../../tests/fixtures/signer_rsa_key.pem"),
                None,
            )
            .unwrap();
        let err = obtain(&tsa, &required(), b"sig").unwrap_err();
        assert!(err.to_string().contains("not authorized for time stamping"));
    }
}
