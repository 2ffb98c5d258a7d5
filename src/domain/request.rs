use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::error::PredictionError;

pub const DEFAULT_MAX_RETRIES: u32 = 4;
pub const DEFAULT_MODEL: &str = "openai/chatgpt-4o-latest";

const OPENAI_MODEL_PREFIX: &str = "openai/";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelHost {
    OpenRouter,
    OpenAi,
}

impl ModelHost {
    pub const ALL: [ModelHost; 2] = [ModelHost::OpenRouter, ModelHost::OpenAi];

    pub fn as_str(&self) -> &'static str {
        match self {
            ModelHost::OpenRouter => "openrouter",
            ModelHost::OpenAi => "openai",
        }
    }

    /// Completion token ceiling sent with every request to this host.
    pub fn max_tokens(&self) -> u32 {
        match self {
            ModelHost::OpenRouter => 2048,
            ModelHost::OpenAi => 1024,
        }
    }
}

impl fmt::Display for ModelHost {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ModelHost {
    type Err = PredictionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "openrouter" => Ok(ModelHost::OpenRouter),
            "openai" => Ok(ModelHost::OpenAi),
            other => Err(PredictionError::Configuration(format!(
                "hôte de modèle inconnu: {other} (attendu: openrouter, openai)"
            ))),
        }
    }
}

/// Model identifier as the OpenAI API expects it, without the routing prefix.
pub fn openai_model_name(model_id: &str) -> &str {
    model_id.strip_prefix(OPENAI_MODEL_PREFIX).unwrap_or(model_id)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }
}

/// The system message followed by the user message.
pub type PromptMessages = [ChatMessage; 2];

/// One species/model/template combination to predict.
#[derive(Debug, Clone, PartialEq)]
pub struct PredictionRequest {
    pub binomial_name: String,
    pub model_id: String,
    pub system_prompt: String,
    pub user_prompt_template: String,
    pub gene_list: Option<Vec<String>>,
    pub host: ModelHost,
    pub temperature: f32,
    pub max_retries: u32,
    /// Recorded in the output as `Query Template`; never read.
    pub template_path: String,
}

impl PredictionRequest {
    pub fn new(
        binomial_name: impl Into<String>,
        model_id: impl Into<String>,
        system_prompt: impl Into<String>,
        user_prompt_template: impl Into<String>,
    ) -> Self {
        Self {
            binomial_name: binomial_name.into(),
            model_id: model_id.into(),
            system_prompt: system_prompt.into(),
            user_prompt_template: user_prompt_template.into(),
            gene_list: None,
            host: ModelHost::OpenRouter,
            temperature: 0.0,
            max_retries: DEFAULT_MAX_RETRIES,
            template_path: String::new(),
        }
    }

    pub fn with_gene_list(mut self, genes: Vec<String>) -> Self {
        self.gene_list = Some(genes);
        self
    }

    pub fn with_host(mut self, host: ModelHost) -> Self {
        self.host = host;
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_template_path(mut self, path: impl Into<String>) -> Self {
        self.template_path = path.into();
        self
    }

    pub fn num_genes(&self) -> usize {
        self.gene_list.as_ref().map_or(0, Vec::len)
    }

    pub fn validate(&self) -> Result<(), PredictionError> {
        let tokens = self.binomial_name.split_whitespace().count();
        if tokens != 2 {
            return Err(PredictionError::Validation {
                name: self.binomial_name.clone(),
                reason: format!("{tokens} mot(s) au lieu de genre + espèce"),
            });
        }
        if self.max_retries == 0 {
            return Err(PredictionError::Validation {
                name: self.binomial_name.clone(),
                reason: "au moins une tentative est requise".to_string(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(name: &str) -> PredictionRequest {
        PredictionRequest::new(name, DEFAULT_MODEL, "sys", "user {binomial_name}")
    }

    #[test]
    fn binomial_names_need_exactly_two_tokens() {
        assert!(request("Escherichia coli").validate().is_ok());
        assert!(request("  Bacillus   subtilis ").validate().is_ok());
        for name in ["", "Escherichia", "Escherichia coli K12", "   "] {
            let err = request(name).validate().unwrap_err();
            assert!(matches!(err, PredictionError::Validation { .. }), "{name:?}");
        }
    }

    #[test]
    fn zero_retries_is_rejected() {
        let err = request("Escherichia coli")
            .with_max_retries(0)
            .validate()
            .unwrap_err();
        assert!(matches!(err, PredictionError::Validation { .. }));
    }

    #[test]
    fn num_genes_follows_gene_list() {
        assert_eq!(request("Escherichia coli").num_genes(), 0);
        let genes = vec!["recA".to_string(), "gyrB".to_string()];
        assert_eq!(request("Escherichia coli").with_gene_list(genes).num_genes(), 2);
        assert_eq!(request("Escherichia coli").with_gene_list(Vec::new()).num_genes(), 0);
    }

    #[test]
    fn host_parsing() {
        assert_eq!("openrouter".parse::<ModelHost>().unwrap(), ModelHost::OpenRouter);
        assert_eq!(" OpenAI ".parse::<ModelHost>().unwrap(), ModelHost::OpenAi);
        let err = "anthropic".parse::<ModelHost>().unwrap_err();
        assert!(matches!(err, PredictionError::Configuration(_)));
    }

    #[test]
    fn openai_prefix_is_stripped_once() {
        assert_eq!(openai_model_name("openai/gpt-4o"), "gpt-4o");
        assert_eq!(openai_model_name("gpt-4o"), "gpt-4o");
        assert_eq!(openai_model_name("meta/llama"), "meta/llama");
    }
}
