//! Backend session: fallback selection and timed inference
//!
//! A [`Session`] owns exactly one initialized backend. It is created once by
//! walking an ordered list of backend kinds, and every later call goes to the
//! backend that won that selection.

use crate::{
    config::{BackendKind, SegmentationConfig},
    error::{LesionSegError, Result},
    inference::{BackendFactory, InferenceBackend},
    models::ModelContract,
    types::InferenceOutput,
    utils::TensorValidator,
};
use instant::{Duration, Instant};
use ndarray::Array4;
use std::sync::{Arc, Mutex};
use tracing::{debug, info, instrument, warn};

type SharedBackend = Arc<Mutex<Box<dyn InferenceBackend>>>;

/// One failed attempt of the fallback chain
#[derive(Debug)]
struct BackendAttempt {
    kind: BackendKind,
    reason: String,
}

impl std::fmt::Display for BackendAttempt {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.kind, self.reason)
    }
}

/// An initialized backend plus the contract it was loaded with
pub struct Session {
    backend: SharedBackend,
    kind: BackendKind,
    contract: ModelContract,
    warmup: bool,
    timeout: Option<Duration>,
    timeout_retries: u32,
    load_time: Duration,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("kind", &self.kind)
            .field("contract", &self.contract)
            .field("warmup", &self.warmup)
            .field("timeout", &self.timeout)
            .field("timeout_retries", &self.timeout_retries)
            .finish_non_exhaustive()
    }
}

impl Session {
    /// Try each backend kind in order; the first to construct and initialize wins
    ///
    /// # Errors
    /// - `BackendUnavailable` listing every attempt when no kind succeeds,
    ///   including when `kinds` is empty
    #[instrument(skip(factory, model, contract, config), fields(model_bytes = model.len()))]
    pub fn initialize_first_available(
        factory: &dyn BackendFactory,
        kinds: &[BackendKind],
        model: &[u8],
        contract: &ModelContract,
        config: &SegmentationConfig,
    ) -> Result<Self> {
        let mut attempts: Vec<BackendAttempt> = Vec::with_capacity(kinds.len());

        for &kind in kinds {
            debug!(backend = %kind, "Trying backend");
            let result = factory.create_backend(kind).and_then(|mut backend| {
                let load_time = backend.initialize(model, contract, config)?;
                Ok((backend, load_time))
            });

            match result {
                Ok((backend, load_time)) => {
                    info!(
                        backend = %kind,
                        load_ms = load_time.as_millis() as u64,
                        skipped = attempts.len(),
                        "Backend selected"
                    );
                    return Ok(Self {
                        backend: Arc::new(Mutex::new(backend)),
                        kind,
                        contract: contract.clone(),
                        warmup: config.warmup,
                        timeout: config.inference_timeout,
                        timeout_retries: config.timeout_retries,
                        load_time,
                    });
                },
                Err(e) => {
                    warn!(backend = %kind, error = %e, "Backend unavailable, trying next");
                    attempts.push(BackendAttempt {
                        kind,
                        reason: e.to_string(),
                    });
                },
            }
        }

        if attempts.is_empty() {
            return Err(LesionSegError::backend_unavailable(
                "no backends were requested",
            ));
        }

        let summary = attempts
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join("; ");
        Err(LesionSegError::backend_unavailable(summary))
    }

    /// Backend that won the selection
    #[must_use]
    pub fn kind(&self) -> BackendKind {
        self.kind
    }

    #[must_use]
    pub fn contract(&self) -> &ModelContract {
        &self.contract
    }

    /// Time the winning backend spent loading the model
    #[must_use]
    pub fn load_time(&self) -> Duration {
        self.load_time
    }

    /// Run one inference cycle: optional warm-up call, then the timed call
    ///
    /// The input must match the contract's input shape. The logits are
    /// validated to the contract's output shape before they are returned.
    ///
    /// # Errors
    /// - `InferenceFailure` for shape mismatches or backend errors
    /// - `InferenceTimeout` when every attempt exceeded the configured timeout
    #[instrument(skip(self, input), fields(backend = %self.kind))]
    pub async fn run(&self, input: &Array4<f32>) -> Result<InferenceOutput> {
        TensorValidator::validate_tensor_shape(input, self.contract.input_shape)?;
        let input = Arc::new(input.clone());

        let warmup_latency = if self.warmup {
            let start = Instant::now();
            self.call_backend(Arc::clone(&input)).await?;
            let elapsed = start.elapsed();
            debug!(warmup_ms = elapsed.as_millis() as u64, "Warm-up run complete");
            Some(elapsed)
        } else {
            None
        };

        let start = Instant::now();
        let logits = self.call_backend(input).await?;
        let latency = start.elapsed();

        TensorValidator::validate_tensor_shape(&logits, self.contract.output_shape)?;
        info!(latency_ms = latency.as_millis() as u64, "Inference complete");

        Ok(InferenceOutput {
            logits,
            latency,
            warmup_latency,
        })
    }

    /// One backend call on a blocking worker, bounded by the timeout if one is set
    async fn call_backend(&self, input: Arc<Array4<f32>>) -> Result<Array4<f32>> {
        let Some(limit) = self.timeout else {
            return Self::join(self.spawn_call(input).await);
        };

        let attempts = self.timeout_retries.saturating_add(1);
        for attempt in 1..=attempts {
            match tokio::time::timeout(limit, self.spawn_call(Arc::clone(&input))).await {
                Ok(joined) => return Self::join(joined),
                Err(_) => {
                    warn!(
                        attempt,
                        attempts,
                        timeout_ms = limit.as_millis() as u64,
                        "Inference call timed out"
                    );
                },
            }
        }

        Err(LesionSegError::timeout(limit, attempts))
    }

    fn spawn_call(
        &self,
        input: Arc<Array4<f32>>,
    ) -> tokio::task::JoinHandle<Result<Array4<f32>>> {
        let backend = Arc::clone(&self.backend);
        tokio::task::spawn_blocking(move || {
            let mut guard = backend
                .lock()
                .map_err(|_| LesionSegError::internal("Backend lock poisoned"))?;
            guard.infer(&input)
        })
    }

    fn join(
        joined: std::result::Result<Result<Array4<f32>>, tokio::task::JoinError>,
    ) -> Result<Array4<f32>> {
        joined.map_err(|e| LesionSegError::inference(format!("Inference task failed: {e}")))?
    }
}
