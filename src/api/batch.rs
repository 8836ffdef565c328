//! Multi-document calls.
//!
//! A batch runs on scoped worker threads, at most
//! [`BatchConfig::max_parallel`] at a time, all sharing the engine's context
//! pool. Results come back in input order whatever order they finish in.

use super::SigningEngine;
use crate::certificate::SigningCredentials;
use crate::config::BatchConfig;
use crate::error::{Error, Result};
use crate::signatures::{ComplianceReport, SigningOptions, ValidationResult};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

/// Per-document results of one batch.
#[derive(Debug)]
pub struct BatchOutcome<T> {
    /// One entry per input document, in input order
    pub results: Vec<Result<T>>,
    /// Documents processed successfully
    pub succeeded: usize,
    /// Documents that failed
    pub failed: usize,
    /// Documents not attempted after a failure stopped the batch
    pub skipped: usize,
    /// Wall time of the whole batch
    pub elapsed: Duration,
}

impl<T> BatchOutcome<T> {
    /// Every document succeeded.
    pub fn all_succeeded(&self) -> bool {
        self.failed == 0 && self.skipped == 0
    }
}

impl SigningEngine {
    /// Sign each document with the same credentials and options.
    pub fn sign_documents(
        &self,
        documents: &[Vec<u8>],
        credentials: &SigningCredentials,
        options: &SigningOptions,
    ) -> BatchOutcome<Vec<u8>> {
        run_batch(self.config().batch, documents, |pdf| self.sign_document(pdf, credentials, options))
    }

    /// Validate every signature of each document.
    pub fn validate_documents(&self, documents: &[Vec<u8>]) -> BatchOutcome<Vec<ValidationResult>> {
        run_batch(self.config().batch, documents, |pdf| self.validate_signatures(pdf))
    }

    /// Compliance reports for each document.
    pub fn check_compliance_documents(&self, documents: &[Vec<u8>]) -> BatchOutcome<Vec<ComplianceReport>> {
        run_batch(self.config().batch, documents, |pdf| self.check_compliance(pdf))
    }
}

fn run_batch<I, T, F>(config: BatchConfig, items: &[I], work: F) -> BatchOutcome<T>
where
    I: Sync,
    T: Send,
    F: Fn(&I) -> Result<T> + Sync,
{
    let started = Instant::now();
    let next = AtomicUsize::new(0);
    let stop = AtomicBool::new(false);
    let workers = config.max_parallel.clamp(1, items.len().max(1));
    let mut slots: Vec<Option<Result<T>>> = std::iter::repeat_with(|| None).take(items.len()).collect();

    let (next, stop, work) = (&next, &stop, &work);
    std::thread::scope(|scope| {
        let handles: Vec<_> = (0..workers)
            .map(|_| {
                scope.spawn(move || {
                    let mut done = Vec::new();
                    while !stop.load(Ordering::SeqCst) {
                        let index = next.fetch_add(1, Ordering::SeqCst);
                        let Some(item) = items.get(index) else {
                            break;
                        };
                        let result = work(item);
                        if let Err(e) = &result {
                            log::debug!("Batch item {} failed: {}", index, e);
                            if !config.continue_on_error {
                                stop.store(true, Ordering::SeqCst);
                            }
                        }
                        done.push((index, result));
                    }
                    done
                })
            })
            .collect();
        for handle in handles {
            match handle.join() {
                Ok(done) => {
                    for (index, result) in done {
                        slots[index] = Some(result);
                    }
                },
                Err(_) => log::error!("Batch worker panicked; its documents are reported as skipped"),
            }
        }
    });

    let mut outcome = BatchOutcome {
        results: Vec::with_capacity(items.len()),
        succeeded: 0,
        failed: 0,
        skipped: 0,
        elapsed: Duration::ZERO,
    };
    for slot in slots {
        let result = match slot {
            Some(Ok(value)) => {
                outcome.succeeded += 1;
                Ok(value)
            },
            Some(Err(e)) => {
                outcome.failed += 1;
                Err(e)
            },
            None => {
                outcome.skipped += 1;
                Err(Error::Concurrency("document skipped after an earlier failure".to_string()))
            },
        };
        outcome.results.push(result);
    }
    outcome.elapsed = started.elapsed();
    log::info!(
        "Batch of {} on {} workers: {} succeeded, {} failed, {} skipped in {:?}",
        items.len(),
        workers,
        outcome.succeeded,
        outcome.failed,
        outcome.skipped,
        outcome.elapsed
    );
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;

    fn engine(max_parallel: usize, continue_on_error: bool) -> SigningEngine {
        SigningEngine::new(EngineConfig::default().with_batch_config(BatchConfig {
            max_parallel,
            continue_on_error,
        }))
        .unwrap()
    }

    fn credentials(engine: &SigningEngine) -> SigningCredentials {
        engine
            .certificates()
            .load_from_pem(
                include_str!("../../tests/fixtures/signer_p256.pem"),
                include_str!("../../tests/fixtures/signer_p256_key.pem"),
                None,
            )
            .unwrap()
    }

    fn minimal() -> Vec<u8> {
        include_bytes!("../../tests/fixtures/minimal.pdf").to_vec()
    }

    #[test]
    fn test_results_keep_input_order() {
        let config = BatchConfig {
            max_parallel: 4,
            continue_on_error: true,
        };
        let items: Vec<u64> = (0..20).collect();
        let outcome = run_batch(config, &items, |n| {
            std::thread::sleep(Duration::from_millis(20 - n));
            Ok(n * 2)
        });
        let values: Vec<u64> = outcome.results.into_iter().map(|r| r.unwrap()).collect();
        assert_eq!(values, (0..20).map(|n| n * 2).collect::<Vec<_>>());
        assert_eq!(outcome.succeeded, 20);
    }

    #[test]
    fn test_sign_and_validate_batch() {
        let engine = engine(3, true);
        let creds = credentials(&engine);
        let documents = vec![minimal(), b"%PDF-1.7\nbroken".to_vec(), minimal()];

        let signed = engine.sign_documents(&documents, &creds, &engine.signing_options());
        assert_eq!((signed.succeeded, signed.failed, signed.skipped), (2, 1, 0));
        assert!(!signed.all_succeeded());
        assert!(signed.results[1].is_err());

        let outputs: Vec<Vec<u8>> = signed.results.into_iter().filter_map(Result::ok).collect();
        let validated = engine.validate_documents(&outputs);
        assert!(validated.all_succeeded());
        for results in validated.results {
            assert!(results.unwrap()[0].is_valid);
        }

        let compliance = engine.check_compliance_documents(&outputs);
        assert!(compliance.results.iter().all(|r| r.as_ref().unwrap()[0].is_compliant()));
    }

    #[test]
    fn test_stop_on_first_failure() {
        let config = BatchConfig {
            max_parallel: 1,
            continue_on_error: false,
        };
        let items = [1, 0, 2, 3];
        let outcome = run_batch(config, &items, |n| {
            if *n == 0 {
                Err(Error::Concurrency("zero".to_string()))
            } else {
                Ok(*n)
            }
        });
        assert_eq!((outcome.succeeded, outcome.failed, outcome.skipped), (1, 1, 2));
        assert_eq!(outcome.results[3].as_ref().unwrap_err().code().as_u16(), 4005);
    }

    #[test]
    fn test_empty_batch() {
        let engine = engine(2, true);
        let outcome = engine.validate_documents(&[]);
        assert!(outcome.results.is_empty());
        assert!(outcome.all_succeeded());
    }
}
