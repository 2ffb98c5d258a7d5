use std::sync::Arc;
use std::thread::sleep;
use std::time::Duration;
use tracing::{error, info, warn};

use super::llm_client::ModelClient;
use super::progress::ProgressSink;
use super::prompt::render_request;
use super::response::extract_prediction;
use crate::domain::{
    AttemptError, BatchLine, OutputRecord, ParsedPrediction, PredictionError, PredictionOutcome,
    PredictionRequest, PromptMessages,
};
use crate::output::{OutputMode, ResultWriter};

/// Drives one request through render → call → parse, retrying unusable
/// replies, and hands the result to a [`ResultWriter`].
#[derive(Clone)]
pub struct Predictor {
    client: Option<Arc<dyn ModelClient>>,
    retry_delay: Duration,
}

impl Predictor {
    pub fn new(client: Arc<dyn ModelClient>) -> Self {
        Self {
            client: Some(client),
            retry_delay: Duration::ZERO,
        }
    }

    /// A predictor that can only queue batch lines; synchronous requests fail
    /// with a configuration error.
    pub fn batch_only() -> Self {
        Self {
            client: None,
            retry_delay: Duration::ZERO,
        }
    }

    /// Base of the exponential pause between attempts. Zero retries immediately.
    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    pub fn predict(
        &self,
        request: &PredictionRequest,
        writer: &ResultWriter,
        progress: &dyn ProgressSink,
    ) -> Result<PredictionOutcome, PredictionError> {
        let outcome = self.run(request, writer, progress);
        progress.finished(&request.binomial_name, outcome.is_ok());
        outcome
    }

    fn run(
        &self,
        request: &PredictionRequest,
        writer: &ResultWriter,
        progress: &dyn ProgressSink,
    ) -> Result<PredictionOutcome, PredictionError> {
        request.validate()?;
        progress.processing(&request.binomial_name);

        let messages = render_request(request);

        if writer.mode() == OutputMode::Batch {
            let line = BatchLine::new(request, &messages);
            writer
                .append_batch_line(&line)
                .map_err(|source| PredictionError::Output {
                    path: writer.path().to_path_buf(),
                    source,
                })?;
            return Ok(PredictionOutcome::Queued(line));
        }

        let client = self.client.as_ref().ok_or_else(|| {
            PredictionError::Configuration("aucun client de modèle configuré".to_string())
        })?;
        if client.host() != request.host {
            return Err(PredictionError::Configuration(format!(
                "le client est configuré pour {} mais la requête cible {}",
                client.host(),
                request.host
            )));
        }

        let max_attempts = request.max_retries;
        let mut attempt = 0u32;
        let last = loop {
            attempt += 1;
            match attempt_once(client.as_ref(), request, &messages) {
                Ok(prediction) => {
                    let record = OutputRecord::new(prediction, &request.model_id, &request.template_path);
                    writer
                        .append_record(&record)
                        .map_err(|source| PredictionError::Output {
                            path: writer.path().to_path_buf(),
                            source,
                        })?;
                    info!(
                        binomial_name = %request.binomial_name,
                        model = %request.model_id,
                        attempt,
                        "message" = "prédiction enregistrée"
                    );
                    return Ok(PredictionOutcome::Recorded(record));
                }
                Err(err) => {
                    warn!(
                        binomial_name = %request.binomial_name,
                        attempt,
                        max_attempts,
                        "erreur" = %err,
                        "message" = "réponse inexploitable"
                    );
                    if attempt >= max_attempts {
                        break err;
                    }
                    progress.retry(&request.binomial_name, attempt, max_attempts);
                    if !self.retry_delay.is_zero() {
                        sleep(backoff(self.retry_delay, attempt));
                    }
                }
            }
        };

        error!(
            binomial_name = %request.binomial_name,
            attempts = attempt,
            "message" = "abandon après épuisement des tentatives"
        );
        Err(PredictionError::RetryExhausted {
            name: request.binomial_name.clone(),
            attempts: attempt,
            last,
        })
    }
}

fn attempt_once(
    client: &dyn ModelClient,
    request: &PredictionRequest,
    messages: &PromptMessages,
) -> Result<ParsedPrediction, AttemptError> {
    let raw = client.complete(messages, &request.model_id, request.temperature)?;
    let decoded = extract_prediction(&raw).ok_or(AttemptError::Parse)?;
    Ok(ParsedPrediction::new(&request.binomial_name, request.num_genes(), decoded))
}

fn backoff(base: Duration, attempt: u32) -> Duration {
    let step = 1u32 << attempt.saturating_sub(1).min(16);
    base.saturating_mul(step)
}
