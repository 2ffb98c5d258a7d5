use anyhow::{Context, Result};
use rayon::prelude::*;
use rayon::ThreadPoolBuilder;
use tracing::error;

use super::pipeline::Predictor;
use super::progress::ProgressSink;
use crate::domain::PredictionRequest;
use crate::output::ResultWriter;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub succeeded: usize,
    pub failed: usize,
}

impl RunSummary {
    pub fn total(&self) -> usize {
        self.succeeded + self.failed
    }
}

/// Runs every request on a pool of `threads` workers. A failed request is
/// logged and counted; it never stops the others.
pub fn run_requests(
    predictor: &Predictor,
    requests: &[PredictionRequest],
    writer: &ResultWriter,
    threads: usize,
    progress: &dyn ProgressSink,
) -> Result<RunSummary> {
    let pool = ThreadPoolBuilder::new()
        .num_threads(threads.max(1))
        .build()
        .context("impossible de créer le pool de threads")?;

    let results: Vec<bool> = pool.install(|| {
        requests
            .par_iter()
            .map(|request| match predictor.predict(request, writer, progress) {
                Ok(_) => true,
                Err(err) => {
                    error!(
                        binomial_name = %request.binomial_name,
                        model = %request.model_id,
                        "erreur" = %err,
                        "message" = "prédiction échouée"
                    );
                    false
                }
            })
            .collect()
    });

    let succeeded = results.iter().filter(|ok| **ok).count();
    Ok(RunSummary {
        succeeded,
        failed: results.len() - succeeded,
    })
}
