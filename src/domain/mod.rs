mod error;
mod record;
mod request;
mod summary;

pub use error::{AttemptError, PredictionError, TransportError};
pub use record::{
    BatchBody, BatchLine, OutputRecord, ParsedPrediction, PredictionOutcome, BINOMIAL_NAME_FIELD,
    DATE_COLUMN, METADATA_COLUMNS, MODEL_USED_COLUMN, NUM_GENES_FIELD, QUERY_TEMPLATE_COLUMN, TIMESTAMP_FORMAT,
};
pub use request::{
    openai_model_name, ChatMessage, ModelHost, PredictionRequest, PromptMessages, Role,
    DEFAULT_MAX_RETRIES, DEFAULT_MODEL,
};
pub use summary::{summarize, PredictionSummary, Vote};
