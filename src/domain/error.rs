use std::path::PathBuf;
use thiserror::Error;

use super::request::ModelHost;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("appel HTTP vers {host} impossible: {source}")]
    Request {
        host: ModelHost,
        #[source]
        source: reqwest::Error,
    },
    #[error("{host} a renvoyé le statut {status}: {body}")]
    Status {
        host: ModelHost,
        status: u16,
        body: String,
    },
    #[error("réponse de {host} illisible: {reason}")]
    Malformed { host: ModelHost, reason: String },
    #[error("{host} n'a renvoyé aucun contenu")]
    EmptyCompletion { host: ModelHost },
}

/// Why a single call/parse attempt did not yield a prediction. Both are retried.
#[derive(Debug, Error)]
pub enum AttemptError {
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("aucun objet JSON valide dans la réponse du modèle")]
    Parse,
}

#[derive(Debug, Error)]
pub enum PredictionError {
    #[error("requête invalide pour {name:?}: {reason}")]
    Validation { name: String, reason: String },
    #[error("configuration invalide: {0}")]
    Configuration(String),
    #[error("échec pour {name} après {attempts} tentative(s): {last}")]
    RetryExhausted {
        name: String,
        attempts: u32,
        #[source]
        last: AttemptError,
    },
    #[error("impossible d'écrire le résultat dans {path:?}: {source}")]
    Output {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl PredictionError {
    pub fn is_validation(&self) -> bool {
        matches!(self, PredictionError::Validation { .. })
    }
}
