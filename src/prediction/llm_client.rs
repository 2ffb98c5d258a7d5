use parking_lot::Mutex;
use reqwest::blocking::Client as HttpClient;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::env;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use super::response::RawModelResponse;
use crate::domain::{openai_model_name, ChatMessage, ModelHost, PredictionError, Role, TransportError};

pub const OPENROUTER_BASE_URL: &str = "https://openrouter.ai/api/v1";
pub const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
pub const OPENROUTER_API_KEY_VAR: &str = "OPENROUTER_API_KEY";
pub const OPENAI_API_KEY_VAR: &str = "OPENAI_API_KEY";
pub const OPENAI_ORG_ID_VAR: &str = "OPENAI_ORG_ID";

const APP_SITE: &str = "microbe.cards";
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(120);
const ERROR_BODY_LIMIT: usize = 512;

pub trait ModelClient: Send + Sync {
    fn host(&self) -> ModelHost;

    fn complete(
        &self,
        messages: &[ChatMessage; 2],
        model_id: &str,
        temperature: f32,
    ) -> Result<RawModelResponse, TransportError>;
}

#[derive(Clone)]
pub struct OpenRouterConfig {
    pub api_key: String,
    pub base_url: String,
    pub referer: String,
    pub title: String,
    pub timeout: Duration,
}

impl OpenRouterConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: OPENROUTER_BASE_URL.to_string(),
            referer: APP_SITE.to_string(),
            title: APP_SITE.to_string(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn from_env() -> Result<Self, PredictionError> {
        Ok(Self::new(required_env(OPENROUTER_API_KEY_VAR)?))
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

impl fmt::Debug for OpenRouterConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OpenRouterConfig")
            .field("base_url", &self.base_url)
            .field("referer", &self.referer)
            .field("title", &self.title)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

#[derive(Clone)]
pub struct OpenAiConfig {
    pub api_key: String,
    pub organization: Option<String>,
    pub base_url: String,
    pub timeout: Duration,
}

impl OpenAiConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            organization: None,
            base_url: OPENAI_BASE_URL.to_string(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn from_env() -> Result<Self, PredictionError> {
        let mut config = Self::new(required_env(OPENAI_API_KEY_VAR)?);
        config.organization = env::var(OPENAI_ORG_ID_VAR).ok().filter(|v| !v.trim().is_empty());
        Ok(config)
    }

    pub fn with_organization(mut self, organization: impl Into<String>) -> Self {
        self.organization = Some(organization.into());
        self
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

impl fmt::Debug for OpenAiConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OpenAiConfig")
            .field("organization", &self.organization)
            .field("base_url", &self.base_url)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

/// Credentials and endpoint for one host, resolved once at startup.
#[derive(Debug, Clone)]
pub enum HostConfig {
    OpenRouter(OpenRouterConfig),
    OpenAi(OpenAiConfig),
}

impl HostConfig {
    pub fn from_env(host: ModelHost) -> Result<Self, PredictionError> {
        match host {
            ModelHost::OpenRouter => OpenRouterConfig::from_env().map(HostConfig::OpenRouter),
            ModelHost::OpenAi => OpenAiConfig::from_env().map(HostConfig::OpenAi),
        }
    }

    pub fn host(&self) -> ModelHost {
        match self {
            HostConfig::OpenRouter(_) => ModelHost::OpenRouter,
            HostConfig::OpenAi(_) => ModelHost::OpenAi,
        }
    }

    pub fn connect(self) -> Result<Arc<dyn ModelClient>, PredictionError> {
        Ok(match self {
            HostConfig::OpenRouter(config) => Arc::new(OpenRouterClient::new(config)?),
            HostConfig::OpenAi(config) => Arc::new(OpenAiClient::new(config)?),
        })
    }
}

fn required_env(var: &str) -> Result<String, PredictionError> {
    env::var(var)
        .ok()
        .filter(|value| !value.trim().is_empty())
        .ok_or_else(|| PredictionError::Configuration(format!("variable d'environnement {var} absente")))
}

fn header_value(value: &str, what: &str) -> Result<HeaderValue, PredictionError> {
    HeaderValue::from_str(value)
        .map_err(|_| PredictionError::Configuration(format!("valeur d'en-tête invalide pour {what}")))
}

fn build_http(headers: HeaderMap, timeout: Duration, host: ModelHost) -> Result<HttpClient, PredictionError> {
    HttpClient::builder()
        .default_headers(headers)
        .timeout(timeout)
        .build()
        .map_err(|err| PredictionError::Configuration(format!("impossible d'initialiser le client HTTP pour {host}: {err}")))
}

fn completions_endpoint(base_url: &str) -> String {
    format!("{}/chat/completions", base_url.trim_end_matches('/'))
}

pub struct OpenRouterClient {
    endpoint: String,
    http: HttpClient,
}

impl OpenRouterClient {
    pub fn new(config: OpenRouterConfig) -> Result<Self, PredictionError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            AUTHORIZATION,
            header_value(&format!("Bearer {}", config.api_key), OPENROUTER_API_KEY_VAR)?,
        );
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(
            HeaderName::from_static("http-referer"),
            header_value(&config.referer, "HTTP-Referer")?,
        );
        headers.insert(HeaderName::from_static("x-title"), header_value(&config.title, "X-Title")?);

        Ok(Self {
            endpoint: completions_endpoint(&config.base_url),
            http: build_http(headers, config.timeout, ModelHost::OpenRouter)?,
        })
    }
}

impl ModelClient for OpenRouterClient {
    fn host(&self) -> ModelHost {
        ModelHost::OpenRouter
    }

    fn complete(
        &self,
        messages: &[ChatMessage; 2],
        model_id: &str,
        temperature: f32,
    ) -> Result<RawModelResponse, TransportError> {
        let payload = OpenRouterChatRequest {
            model: model_id,
            messages,
            temperature,
            max_tokens: ModelHost::OpenRouter.max_tokens(),
            top_p: 0.0,
        };
        post_chat(&self.http, &self.endpoint, &payload, ModelHost::OpenRouter)
    }
}

pub struct OpenAiClient {
    endpoint: String,
    http: HttpClient,
}

impl OpenAiClient {
    pub fn new(config: OpenAiConfig) -> Result<Self, PredictionError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            AUTHORIZATION,
            header_value(&format!("Bearer {}", config.api_key), OPENAI_API_KEY_VAR)?,
        );
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        if let Some(organization) = &config.organization {
            headers.insert(
                HeaderName::from_static("openai-organization"),
                header_value(organization, OPENAI_ORG_ID_VAR)?,
            );
        }

        Ok(Self {
            endpoint: completions_endpoint(&config.base_url),
            http: build_http(headers, config.timeout, ModelHost::OpenAi)?,
        })
    }
}

impl ModelClient for OpenAiClient {
    fn host(&self) -> ModelHost {
        ModelHost::OpenAi
    }

    fn complete(
        &self,
        messages: &[ChatMessage; 2],
        model_id: &str,
        temperature: f32,
    ) -> Result<RawModelResponse, TransportError> {
        let payload = OpenAiChatRequest {
            model: openai_model_name(model_id),
            messages: messages
                .iter()
                .map(|message| OpenAiMessage {
                    role: message.role,
                    content: [ContentBlock {
                        kind: "text",
                        text: &message.content,
                    }],
                })
                .collect(),
            temperature,
            max_tokens: ModelHost::OpenAi.max_tokens(),
            top_p: 0.0,
            frequency_penalty: 0.0,
            presence_penalty: 0.0,
        };
        post_chat(&self.http, &self.endpoint, &payload, ModelHost::OpenAi)
    }
}

fn post_chat<T: Serialize>(
    http: &HttpClient,
    endpoint: &str,
    payload: &T,
    host: ModelHost,
) -> Result<RawModelResponse, TransportError> {
    let response = http
        .post(endpoint)
        .json(payload)
        .send()
        .map_err(|source| TransportError::Request { host, source })?;

    let status = response.status();
    if !status.is_success() {
        let mut body = response.text().unwrap_or_default();
        if body.len() > ERROR_BODY_LIMIT {
            let mut cut = ERROR_BODY_LIMIT;
            while !body.is_char_boundary(cut) {
                cut -= 1;
            }
            body.truncate(cut);
        }
        return Err(TransportError::Status {
            host,
            status: status.as_u16(),
            body,
        });
    }

    let completion: ChatCompletionResponse = response.json().map_err(|err| TransportError::Malformed {
        host,
        reason: err.to_string(),
    })?;

    completion
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.message.content)
        .map(RawModelResponse::Text)
        .ok_or(TransportError::EmptyCompletion { host })
}

#[derive(Debug, Serialize)]
struct OpenRouterChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    temperature: f32,
    max_tokens: u32,
    top_p: f32,
}

#[derive(Debug, Serialize)]
struct OpenAiChatRequest<'a> {
    model: &'a str,
    messages: Vec<OpenAiMessage<'a>>,
    temperature: f32,
    max_tokens: u32,
    top_p: f32,
    frequency_penalty: f32,
    presence_penalty: f32,
}

#[derive(Debug, Serialize)]
struct OpenAiMessage<'a> {
    role: Role,
    content: [ContentBlock<'a>; 1],
}

#[derive(Debug, Serialize)]
struct ContentBlock<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    text: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Clone)]
pub enum MockReply {
    Text(String),
    Failure(String),
    /// Answers with the text after blocking the caller.
    Delayed(Duration, String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct MockCall {
    pub messages: Vec<ChatMessage>,
    pub model_id: String,
    pub temperature: f32,
}

/// Scripted client: replays queued replies, then repeats the fallback reply
/// (or fails) once the queue is empty. Every call is recorded.
#[derive(Clone)]
pub struct MockModelClient {
    host: ModelHost,
    replies: Arc<Mutex<VecDeque<MockReply>>>,
    fallback: Option<MockReply>,
    calls: Arc<Mutex<Vec<MockCall>>>,
}

impl MockModelClient {
    pub fn new(host: ModelHost) -> Self {
        Self {
            host,
            replies: Arc::default(),
            fallback: None,
            calls: Arc::default(),
        }
    }

    pub fn always(host: ModelHost, reply: MockReply) -> Self {
        let mut client = Self::new(host);
        client.fallback = Some(reply);
        client
    }

    pub fn push_reply(&self, reply: MockReply) {
        self.replies.lock().push_back(reply);
    }

    pub fn push_text(&self, text: impl Into<String>) {
        self.push_reply(MockReply::Text(text.into()));
    }

    pub fn calls(&self) -> Vec<MockCall> {
        self.calls.lock().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }
}

impl ModelClient for MockModelClient {
    fn host(&self) -> ModelHost {
        self.host
    }

    fn complete(
        &self,
        messages: &[ChatMessage; 2],
        model_id: &str,
        temperature: f32,
    ) -> Result<RawModelResponse, TransportError> {
        self.calls.lock().push(MockCall {
            messages: messages.to_vec(),
            model_id: model_id.to_string(),
            temperature,
        });
        let reply = self.replies.lock().pop_front().or_else(|| self.fallback.clone());
        match reply {
            Some(MockReply::Text(text)) => Ok(RawModelResponse::Text(text)),
            Some(MockReply::Delayed(delay, text)) => {
                std::thread::sleep(delay);
                Ok(RawModelResponse::Text(text))
            }
            Some(MockReply::Failure(reason)) => Err(TransportError::Malformed {
                host: self.host,
                reason,
            }),
            None => Err(TransportError::EmptyCompletion { host: self.host }),
        }
    }
}
