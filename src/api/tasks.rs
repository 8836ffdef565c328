//! Async wrappers over [`SigningEngine`].
//!
//! Each call runs on `tokio::task::spawn_blocking`, one task per call, so
//! parsing and RSA arithmetic never block the async executor.

use super::{BatchOutcome, SigningEngine};
use crate::certificate::SigningCredentials;
use crate::error::{Error, Result};
use crate::signatures::{ExtractedSignature, SigningOptions, ValidationResult};
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

async fn run_blocking<T, F>(work: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| Error::Concurrency(format!("blocking task failed: {}", e)))?
}

/// Sign `pdf` on the blocking pool.
pub async fn sign_document_task(
    engine: Arc<SigningEngine>,
    pdf: Vec<u8>,
    credentials: Arc<SigningCredentials>,
    options: SigningOptions,
) -> Result<Vec<u8>> {
    run_blocking(move || engine.sign_document(&pdf, &credentials, &options)).await
}

/// Validate `pdf` on the blocking pool.
pub async fn validate_signatures_task(
    engine: Arc<SigningEngine>,
    pdf: Vec<u8>,
) -> Result<Vec<ValidationResult>> {
    run_blocking(move || engine.validate_signatures(&pdf)).await
}

/// Extract signatures from `pdf` on the blocking pool.
pub async fn extract_signatures_task(
    engine: Arc<SigningEngine>,
    pdf: Vec<u8>,
) -> Result<Vec<ExtractedSignature>> {
    run_blocking(move || engine.extract_signatures(&pdf)).await
}

/// Sign a batch on the blocking pool; see [`SigningEngine::sign_documents`].
pub async fn sign_documents_task(
    engine: Arc<SigningEngine>,
    documents: Vec<Vec<u8>>,
    credentials: Arc<SigningCredentials>,
    options: SigningOptions,
) -> Result<BatchOutcome<Vec<u8>>> {
    run_blocking(move || Ok(engine.sign_documents(&documents, &credentials, &options))).await
}

/// Validate a batch on the blocking pool.
pub async fn validate_documents_task(
    engine: Arc<SigningEngine>,
    documents: Vec<Vec<u8>>,
) -> Result<BatchOutcome<Vec<ValidationResult>>> {
    run_blocking(move || Ok(engine.validate_documents(&documents))).await
}

/// A document buffer that several tasks may sign.
///
/// Signing holds the lock for the whole operation, so concurrent signers
/// are serialized and each appends its revision after the previous one.
#[derive(Debug, Clone)]
pub struct DocumentHandle {
    id: Uuid,
    engine: Arc<SigningEngine>,
    data: Arc<Mutex<Vec<u8>>>,
}

impl DocumentHandle {
    /// Wrap `pdf`.
    pub fn new(engine: Arc<SigningEngine>, pdf: Vec<u8>) -> Self {
        Self {
            id: Uuid::new_v4(),
            engine,
            data: Arc::new(Mutex::new(pdf)),
        }
    }

    /// Identifier for logging.
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Copy of the current bytes.
    pub async fn bytes(&self) -> Vec<u8> {
        self.data.lock().await.clone()
    }

    /// Sign the current bytes and replace them with the result.
    ///
    /// On failure the buffer is left unchanged.
    pub async fn sign(
        &self,
        credentials: Arc<SigningCredentials>,
        options: SigningOptions,
    ) -> Result<()> {
        let mut data = self.data.lock().await;
        let pdf = data.clone();
        let engine = Arc::clone(&self.engine);
        let signed = run_blocking(move || engine.sign_document(&pdf, &credentials, &options)).await?;
        log::debug!("Document {}: {} -> {} bytes", self.id, data.len(), signed.len());
        *data = signed;
        Ok(())
    }

    /// Validate the current bytes.
    pub async fn validate(&self) -> Result<Vec<ValidationResult>> {
        let pdf = self.bytes().await;
        validate_signatures_task(Arc::clone(&self.engine), pdf).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;

    fn setup() -> (Arc<SigningEngine>, Arc<SigningCredentials>) {
        let engine = SigningEngine::new(EngineConfig::default()).unwrap();
        let creds = engine
            .certificates()
            .load_from_pem(
                include_str!("../../tests/fixtures/signer_p256.pem"),
                include_str!("../../tests/fixtures/signer_p256_key.pem"),
                None,
            )
            .unwrap();
        (Arc::new(engine), Arc::new(creds))
    }

    #[tokio::test]
    async fn test_sign_task() {
        let (engine, creds) = setup();
        let pdf = include_bytes!("../../tests/fixtures/minimal.pdf").to_vec();
        let signed = sign_document_task(engine.clone(), pdf, creds, SigningOptions::default())
            .await
            .unwrap();
        let results = validate_signatures_task(engine.clone(), signed.clone()).await.unwrap();
        assert!(results[0].is_valid);
        assert_eq!(extract_signatures_task(engine, signed).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_batch_tasks() {
        let (engine, creds) = setup();
        let pdf = include_bytes!("../../tests/fixtures/minimal.pdf").to_vec();
        let signed = sign_documents_task(engine.clone(), vec![pdf.clone(), pdf], creds, SigningOptions::default())
            .await
            .unwrap();
        assert_eq!(signed.succeeded, 2);

        let documents = signed.results.into_iter().map(|r| r.unwrap()).collect();
        let validated = validate_documents_task(engine, documents).await.unwrap();
        assert!(validated.all_succeeded());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_signers_append_in_turn() {
        let (engine, creds) = setup();
        let handle = DocumentHandle::new(engine, include_bytes!("../../tests/fixtures/minimal.pdf").to_vec());

        let tasks: Vec<_> = (0..3)
            .map(|_| {
                let handle = handle.clone();
                let creds = Arc::clone(&creds);
                tokio::spawn(async move { handle.sign(creds, SigningOptions::default()).await })
            })
            .collect();
        for task in tasks {
            task.await.unwrap().unwrap();
        }

        let results = handle.validate().await.unwrap();
        assert_eq!(results.len(), 3);
        assert!(results.iter().all(|r| r.is_valid));
        assert_eq!(results.iter().filter(|r| r.covers_whole_document).count(), 1);
    }

    #[tokio::test]
    async fn test_failed_sign_leaves_buffer() {
        let (engine, creds) = setup();
        let handle = DocumentHandle::new(engine, b"%PDF-1.7\nnot really".to_vec());
        let before = handle.bytes().await;
        assert!(handle.sign(creds, SigningOptions::default()).await.is_err());
        assert_eq!(handle.bytes().await, before);
    }
}
