use criterion::{black_box, criterion_group, criterion_main, Criterion};
use pdf_seal::certificate::{CertificateManager, SigningCredentials};
use pdf_seal::crypto::{CryptoEngine, HashAlgorithm};
use pdf_seal::document::PdfDocument;
use pdf_seal::signatures::{PdfSigner, SignatureValidator, SigningOptions};

const MINIMAL: &[u8] = include_bytes!("../tests/fixtures/minimal.pdf");

fn load(cert: &str, key: &str) -> SigningCredentials {
    CertificateManager::new()
        .load_from_pem(cert, key, None)
        .expect("fixture credentials")
}

fn bench_hashing(c: &mut Criterion) {
    let data = vec![0x5Au8; 1 << 20];
    let engine = CryptoEngine::new();

    let mut group = c.benchmark_group("hash/1MiB");
    for hash in HashAlgorithm::ALL {
        group.bench_function(hash.name(), |b| {
            b.iter(|| engine.compute_hash(black_box(&data), hash))
        });
    }
    group.finish();
}

fn bench_signing(c: &mut Criterion) {
    let doc = PdfDocument::parse(MINIMAL).expect("fixture document");
    let signer = PdfSigner::default();
    let options = SigningOptions::default();
    let rsa = load(
        include_str!("../tests/fixtures/signer_rsa.pem"),
        include_str!("../tests/fixtures/signer_rsa_key.pem"),
    );
    let p256 = load(
        include_str!("../tests/fixtures/signer_p256.pem"),
        include_str!("../tests/fixtures/signer_p256_key.pem"),
    );

    let mut group = c.benchmark_group("sign/minimal");
    group.bench_function("rsa2048", |b| {
        b.iter(|| signer.sign(black_box(&doc), &rsa, &options))
    });
    group.bench_function("p256", |b| {
        b.iter(|| signer.sign(black_box(&doc), &p256, &options))
    });
    group.finish();
}

fn bench_validation(c: &mut Criterion) {
    let rsa = load(
        include_str!("../tests/fixtures/signer_rsa.pem"),
        include_str!("../tests/fixtures/signer_rsa_key.pem"),
    );
    let doc = PdfDocument::parse(MINIMAL).expect("fixture document");
    let signed = PdfSigner::default()
        .sign(&doc, &rsa, &SigningOptions::default())
        .expect("signing");
    let validator = SignatureValidator::default();

    c.bench_function("validate/rsa2048", |b| {
        b.iter(|| {
            let doc = PdfDocument::parse(black_box(&signed)).expect("signed document");
            validator.validate_signatures(&doc)
        })
    });
}

criterion_group!(benches, bench_hashing, bench_signing, bench_validation);
criterion_main!(benches);
