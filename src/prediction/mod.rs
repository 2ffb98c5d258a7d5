mod llm_client;
mod pipeline;
mod progress;
mod prompt;
mod response;
mod run;

pub use llm_client::{
    HostConfig, MockCall, MockModelClient, MockReply, ModelClient, OpenAiClient, OpenAiConfig,
    OpenRouterClient, OpenRouterConfig, OPENAI_API_KEY_VAR, OPENAI_BASE_URL, OPENAI_ORG_ID_VAR,
    OPENROUTER_API_KEY_VAR, OPENROUTER_BASE_URL,
};
pub use pipeline::Predictor;
pub use progress::{NoProgress, ProgressSink, TracingProgress};
pub use prompt::{
    render_request, render_user_prompt, PromptTemplate, BINOMIAL_NAME_PLACEHOLDER,
    GENE_LIST_PLACEHOLDER,
};
pub use response::{extract_prediction, RawModelResponse};
pub use run::{run_requests, RunSummary};
