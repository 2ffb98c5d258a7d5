use chrono::Local;
use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};
use serde_json::{Map, Value};

use super::request::{openai_model_name, ChatMessage, ModelHost, PredictionRequest, PromptMessages};
use crate::utils::batch_custom_id;

pub const BINOMIAL_NAME_FIELD: &str = "Binomial name";
pub const NUM_GENES_FIELD: &str = "num_genes";
pub const MODEL_USED_COLUMN: &str = "Model Used";
pub const QUERY_TEMPLATE_COLUMN: &str = "Query Template";
pub const DATE_COLUMN: &str = "Date";
pub const METADATA_COLUMNS: [&str; 3] = [MODEL_USED_COLUMN, QUERY_TEMPLATE_COLUMN, DATE_COLUMN];
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

const BATCH_METHOD: &str = "POST";
const BATCH_URL: &str = "/v1/chat/completions";

/// Decoded model output with the injected `Binomial name` and `num_genes` fields
/// in front. Field order is insertion order.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedPrediction {
    fields: Map<String, Value>,
}

impl ParsedPrediction {
    pub fn new(binomial_name: &str, num_genes: usize, decoded: Map<String, Value>) -> Self {
        let mut fields = Map::new();
        fields.insert(BINOMIAL_NAME_FIELD.to_string(), Value::from(binomial_name));
        fields.insert(NUM_GENES_FIELD.to_string(), Value::from(num_genes));
        // a decoded key that collides with an injected one overwrites it in place
        for (key, value) in decoded {
            fields.insert(key, value);
        }
        Self { fields }
    }

    pub fn fields(&self) -> &Map<String, Value> {
        &self.fields
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.fields.keys().map(String::as_str)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct OutputRecord {
    pub prediction: ParsedPrediction,
    pub model_used: String,
    pub template_path: String,
    pub timestamp: String,
}

impl OutputRecord {
    pub fn new(
        prediction: ParsedPrediction,
        model_used: impl Into<String>,
        template_path: impl Into<String>,
    ) -> Self {
        Self {
            prediction,
            model_used: model_used.into(),
            template_path: template_path.into(),
            timestamp: Local::now().format(TIMESTAMP_FORMAT).to_string(),
        }
    }

    pub fn with_timestamp(mut self, timestamp: impl Into<String>) -> Self {
        self.timestamp = timestamp.into();
        self
    }

    /// Prediction fields followed by the three metadata columns.
    pub fn columns(&self) -> Vec<String> {
        self.prediction
            .keys()
            .map(str::to_string)
            .chain(METADATA_COLUMNS.map(String::from))
            .collect()
    }

    /// Values of the metadata columns, in column order.
    pub fn metadata_values(&self) -> [&str; 3] {
        [self.model_used.as_str(), self.template_path.as_str(), self.timestamp.as_str()]
    }
}

impl Serialize for OutputRecord {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let fields = self.prediction.fields();
        let mut map = serializer.serialize_map(Some(fields.len() + 3))?;
        for (key, value) in fields {
            map.serialize_entry(key, value)?;
        }
        map.serialize_entry(MODEL_USED_COLUMN, &self.model_used)?;
        map.serialize_entry(QUERY_TEMPLATE_COLUMN, &self.template_path)?;
        map.serialize_entry(DATE_COLUMN, &self.timestamp)?;
        map.end()
    }
}

/// One request line of an OpenAI batch submission file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchLine {
    pub custom_id: String,
    pub method: String,
    pub url: String,
    pub body: BatchBody,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchBody {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub temperature: f32,
    pub max_tokens: u32,
}

impl BatchLine {
    pub fn new(request: &PredictionRequest, messages: &PromptMessages) -> Self {
        Self {
            custom_id: batch_custom_id(&request.binomial_name),
            method: BATCH_METHOD.to_string(),
            url: BATCH_URL.to_string(),
            body: BatchBody {
                model: openai_model_name(&request.model_id).to_string(),
                messages: messages.to_vec(),
                temperature: request.temperature,
                max_tokens: ModelHost::OpenAi.max_tokens(),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum PredictionOutcome {
    Recorded(OutputRecord),
    Queued(BatchLine),
}

impl PredictionOutcome {
    pub fn record(&self) -> Option<&OutputRecord> {
        match self {
            PredictionOutcome::Recorded(record) => Some(record),
            PredictionOutcome::Queued(_) => None,
        }
    }
}
