use anyhow::{Context, Result};
use axum::extract::{FromRequest, Request, State};
use axum::http::{header::CONTENT_TYPE, StatusCode};
use axum::response::{Html, IntoResponse, Response};
use axum::routing::get;
use axum::{Form, Json, Router};
use serde::Deserialize;
use serde_json::json;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

use crate::domain::{ModelHost, PredictionError, PredictionOutcome, PredictionRequest, DEFAULT_MAX_RETRIES, DEFAULT_MODEL};
use crate::input::read_template;
use crate::output::ResultWriter;
use crate::prediction::{HostConfig, ModelClient, NoProgress, Predictor};

const DEFAULT_TEMPLATE_ROOT: &str = "templates";
const DEFAULT_SYSTEM_TEMPLATE: &str = "templates/system/template1.txt";
const DEFAULT_USER_TEMPLATE: &str = "templates/user/template1.txt";
const PREDICTION_TIMEOUT: Duration = Duration::from_secs(60);

const INDEX_HTML: &str = r#"<!doctype html>
<html lang="fr">
<head><meta charset="utf-8"><title>MicrobeLLM</title></head>
<body>
  <h1>MicrobeLLM</h1>
  <form method="post" action="/">
    <label>Nom binomial <input name="binomial_name" placeholder="Escherichia coli" required></label>
    <label>Modèle <input name="model" value="openai/chatgpt-4o-latest"></label>
    <label>Hôte
      <select name="model_host">
        <option value="openrouter">openrouter</option>
        <option value="openai">openai</option>
      </select>
    </label>
    <button type="submit">Prédire</button>
  </form>
</body>
</html>
"#;

#[derive(Debug, Clone)]
pub struct WebConfig {
    pub host: String,
    pub port: u16,
    pub output: PathBuf,
    pub templates: PathBuf,
    pub retry_delay: Duration,
}

#[derive(Clone)]
pub struct AppState {
    clients: Arc<HashMap<ModelHost, Arc<dyn ModelClient>>>,
    writer: ResultWriter,
    template_root: PathBuf,
    retry_delay: Duration,
    timeout: Duration,
}

impl AppState {
    pub fn new(clients: HashMap<ModelHost, Arc<dyn ModelClient>>, writer: ResultWriter) -> Self {
        Self {
            clients: Arc::new(clients),
            writer,
            template_root: PathBuf::from(DEFAULT_TEMPLATE_ROOT),
            retry_delay: Duration::ZERO,
            timeout: PREDICTION_TIMEOUT,
        }
    }

    /// Connects every host whose credentials are present in the environment.
    pub fn from_env(writer: ResultWriter) -> Self {
        let mut clients = HashMap::new();
        for host in ModelHost::ALL {
            match HostConfig::from_env(host).and_then(HostConfig::connect) {
                Ok(client) => {
                    clients.insert(host, client);
                }
                Err(err) => {
                    warn!(%host, "erreur" = %err, "message" = "hôte indisponible pour le formulaire web");
                }
            }
        }
        Self::new(clients, writer)
    }

    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    /// Templates named by a form must resolve inside this directory.
    pub fn with_template_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.template_root = root.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[derive(Debug, Deserialize)]
struct PredictForm {
    binomial_name: Option<String>,
    #[serde(default = "default_model")]
    model: String,
    #[serde(default = "default_host")]
    model_host: String,
    #[serde(default = "default_system_template")]
    system_template: String,
    #[serde(default = "default_user_template")]
    user_template: String,
}

fn default_model() -> String {
    DEFAULT_MODEL.to_string()
}

fn default_host() -> String {
    ModelHost::OpenRouter.to_string()
}

fn default_system_template() -> String {
    DEFAULT_SYSTEM_TEMPLATE.to_string()
}

fn default_user_template() -> String {
    DEFAULT_USER_TEMPLATE.to_string()
}

pub fn router(state: AppState) -> Router {
    Router::new().route("/", get(index).post(submit)).with_state(state)
}

pub async fn serve(config: WebConfig) -> Result<()> {
    let writer = ResultWriter::rows(&config.output);
    let state = AppState::from_env(writer)
        .with_retry_delay(config.retry_delay)
        .with_template_root(&config.templates);
    let address = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&address)
        .await
        .with_context(|| format!("impossible d'écouter sur {address}"))?;
    info!(
        %address,
        output = %config.output.display(),
        templates = %config.templates.display(),
        "message" = "formulaire web démarré");
    axum::serve(listener, router(state))
        .await
        .context("arrêt inattendu du serveur web")
}

async fn index() -> Html<&'static str> {
    Html(INDEX_HTML)
}

async fn submit(State(state): State<AppState>, request: Request) -> Response {
    let is_json = request
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .map_or(false, |value| value.starts_with("application/json"));

    let form = if is_json {
        match Json::<PredictForm>::from_request(request, &state).await {
            Ok(Json(form)) => form,
            Err(rejection) => return rejection.into_response(),
        }
    } else {
        match Form::<PredictForm>::from_request(request, &state).await {
            Ok(Form(form)) => form,
            Err(rejection) => return rejection.into_response(),
        }
    };

    match predict_form(&state, form).await {
        Ok(response) => response,
        Err((status, message)) => {
            error!(status = status.as_u16(), "erreur" = %message, "message" = "requête web rejetée");
            (status, Json(json!({ "error": message }))).into_response()
        }
    }
}

async fn predict_form(state: &AppState, form: PredictForm) -> Result<Response, (StatusCode, String)> {
    let binomial_name = form
        .binomial_name
        .filter(|name| !name.trim().is_empty())
        .ok_or((StatusCode::BAD_REQUEST, "binomial_name est requis".to_string()))?;
    info!(%binomial_name, model = %form.model, host = %form.model_host, "message" = "prédiction demandée");

    let host = ModelHost::from_str(&form.model_host).map_err(|err| (StatusCode::BAD_REQUEST, err.to_string()))?;
    let client = state.clients.get(&host).cloned().ok_or_else(|| {
        (
            StatusCode::BAD_REQUEST,
            format!("aucun identifiant configuré pour l'hôte {host}"),
        )
    })?;

    let system = read_template(&resolve_template(&state.template_root, &form.system_template)?).map_err(internal)?;
    let user = read_template(&resolve_template(&state.template_root, &form.user_template)?).map_err(internal)?;
    let request = PredictionRequest::new(binomial_name, form.model, system, user)
        .with_host(host)
        .with_max_retries(DEFAULT_MAX_RETRIES)
        .with_template_path(form.system_template);

    let predictor = Predictor::new(client).with_retry_delay(state.retry_delay);
    let writer = state.writer.clone();
    let task = tokio::task::spawn_blocking(move || predictor.predict(&request, &writer, &NoProgress));

    let joined = tokio::time::timeout(state.timeout, task)
        .await
        .map_err(|_| (StatusCode::REQUEST_TIMEOUT, "délai de prédiction dépassé".to_string()))?;
    let outcome = joined.map_err(|err| (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()))?;

    match outcome {
        Ok(PredictionOutcome::Recorded(record)) => Ok(Json(record).into_response()),
        Ok(PredictionOutcome::Queued(line)) => Ok(Json(line).into_response()),
        Err(err @ PredictionError::Output { .. }) => Err((StatusCode::INTERNAL_SERVER_ERROR, err.to_string())),
        Err(err) => Err((StatusCode::BAD_REQUEST, err.to_string())),
    }
}

fn resolve_template(root: &Path, requested: &str) -> Result<PathBuf, (StatusCode, String)> {
    let root = root.canonicalize().map_err(|err| {
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("répertoire de templates {:?} inaccessible: {err}", root),
        )
    })?;
    let path = Path::new(requested)
        .canonicalize()
        .map_err(|err| (StatusCode::BAD_REQUEST, format!("template {requested:?} introuvable: {err}")))?;
    if !path.starts_with(&root) {
        return Err((
            StatusCode::FORBIDDEN,
            format!("template {requested:?} hors du répertoire autorisé"),
        ));
    }
    Ok(path)
}

fn internal(err: anyhow::Error) -> (StatusCode, String) {
    (StatusCode::INTERNAL_SERVER_ERROR, format!("{err:#}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prediction::{MockModelClient, MockReply};
    use axum::body::{to_bytes, Body};
    use axum::http::Request as HttpRequest;
    use serde_json::Value;
    use std::fs;
    use tower::ServiceExt;

    struct Fixture {
        dir: PathBuf,
        system: PathBuf,
        user: PathBuf,
        output: PathBuf,
    }

    impl Fixture {
        fn new() -> Self {
            let dir = std::env::temp_dir().join(format!("microbellm-web-{}", uuid::Uuid::new_v4()));
            fs::create_dir_all(&dir).unwrap();
            let system = dir.join("system.txt");
            let user = dir.join("user.txt");
            fs::write(&system, "You are an expert.").unwrap();
            fs::write(&user, "Describe {binomial_name}.").unwrap();
            let output = dir.join("predictions.csv");
            Self { dir, system, user, output }
        }

        fn state(&self, mock: &MockModelClient) -> AppState {
            let mut clients: HashMap<ModelHost, Arc<dyn ModelClient>> = HashMap::new();
            clients.insert(mock.host(), Arc::new(mock.clone()));
            AppState::new(clients, ResultWriter::rows(&self.output)).with_template_root(&self.dir)
        }

        async fn post_json(&self, state: AppState, body: Value) -> Response {
            let request = HttpRequest::post("/")
                .header(CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap();
            router(state).oneshot(request).await.unwrap()
        }

        fn json_body(&self, name: &str) -> String {
            json!({
                "binomial_name": name,
                "system_template": self.system,
                "user_template": self.user,
            })
            .to_string()
        }
    }

    impl Drop for Fixture {
        fn drop(&mut self) {
            let _ = fs::remove_dir_all(&self.dir);
        }
    }

    async fn read_json(response: Response) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn json_post_returns_the_record() {
        let fixture = Fixture::new();
        let mock = MockModelClient::always(
            ModelHost::OpenRouter,
            MockReply::Text(r#"Sure! {"gram_staining": "positive", "motility": "motile"}"#.into()),
        );
        let request = HttpRequest::post("/")
            .header(CONTENT_TYPE, "application/json")
            .body(Body::from(fixture.json_body("Bacillus subtilis")))
            .unwrap();

        let response = router(fixture.state(&mock)).oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = read_json(response).await;
        assert_eq!(body["Binomial name"], json!("Bacillus subtilis"));
        assert_eq!(body["gram_staining"], json!("positive"));
        assert_eq!(body["Model Used"], json!(DEFAULT_MODEL));
        assert_eq!(mock.calls()[0].messages[1].content, "Describe Bacillus subtilis.");
        assert!(fixture.output.exists());
    }

    #[tokio::test]
    async fn form_post_is_accepted() {
        let fixture = Fixture::new();
        let mock = MockModelClient::always(ModelHost::OpenAi, MockReply::Text(r#"{"cell_shape": "rod"}"#.into()));
        let body = format!(
            "binomial_name=Escherichia+coli&model_host=openai&system_template={}&user_template={}",
            fixture.system.display(),
            fixture.user.display()
        );
        let request = HttpRequest::post("/")
            .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(Body::from(body))
            .unwrap();

        let response = router(fixture.state(&mock)).oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(read_json(response).await["cell_shape"], json!("rod"));
    }

    #[tokio::test]
    async fn invalid_name_is_a_bad_request() {
        let fixture = Fixture::new();
        let mock = MockModelClient::always(ModelHost::OpenRouter, MockReply::Text("{}".into()));
        let request = HttpRequest::post("/")
            .header(CONTENT_TYPE, "application/json")
            .body(Body::from(fixture.json_body("Escherichia")))
            .unwrap();

        let response = router(fixture.state(&mock)).oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(read_json(response).await["error"].is_string());
        assert_eq!(mock.call_count(), 0);
    }

    #[tokio::test]
    async fn unconfigured_host_is_a_bad_request() {
        let fixture = Fixture::new();
        let mock = MockModelClient::always(ModelHost::OpenRouter, MockReply::Text("{}".into()));
        let body = json!({
            "binomial_name": "Escherichia coli",
            "model_host": "openai",
            "system_template": fixture.system,
            "user_template": fixture.user,
        });
        let request = HttpRequest::post("/")
            .header(CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap();

        let response = router(fixture.state(&mock)).oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn slow_prediction_times_out() {
        let fixture = Fixture::new();
        let mock = MockModelClient::always(
            ModelHost::OpenRouter,
            MockReply::Delayed(Duration::from_millis(500), r#"{"motility": "motile"}"#.into()),
        );
        let state = fixture.state(&mock).with_timeout(Duration::from_millis(20));
        let body: Value = serde_json::from_str(&fixture.json_body("Bacillus subtilis")).unwrap();

        let response = fixture.post_json(state, body).await;
        assert_eq!(response.status(), StatusCode::REQUEST_TIMEOUT);
        assert!(read_json(response).await["error"].is_string());
    }

    #[tokio::test]
    async fn unwritable_output_is_a_server_error() {
        let fixture = Fixture::new();
        let mock = MockModelClient::always(ModelHost::OpenRouter, MockReply::Text(r#"{"motility": "motile"}"#.into()));
        let mut clients: HashMap<ModelHost, Arc<dyn ModelClient>> = HashMap::new();
        clients.insert(mock.host(), Arc::new(mock.clone()));
        // the output path is a directory
        let state = AppState::new(clients, ResultWriter::rows(&fixture.dir)).with_template_root(&fixture.dir);
        let body: Value = serde_json::from_str(&fixture.json_body("Bacillus subtilis")).unwrap();

        let response = fixture.post_json(state, body).await;
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(mock.call_count(), 1);
    }

    #[tokio::test]
    async fn templates_outside_the_root_are_forbidden() {
        let fixture = Fixture::new();
        let outside = std::env::temp_dir().join(format!("microbellm-secret-{}.txt", uuid::Uuid::new_v4()));
        fs::write(&outside, "do not send").unwrap();
        let mock = MockModelClient::always(ModelHost::OpenRouter, MockReply::Text("{}".into()));
        let body = json!({
            "binomial_name": "Escherichia coli",
            "system_template": outside,
            "user_template": fixture.user,
        });

        let response = fixture.post_json(fixture.state(&mock), body).await;
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        assert_eq!(mock.call_count(), 0);

        let escaping = json!({
            "binomial_name": "Escherichia coli",
            "system_template": fixture.dir.join("..").join(outside.file_name().unwrap()),
            "user_template": fixture.user,
        });
        let response = fixture.post_json(fixture.state(&mock), escaping).await;
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        fs::remove_file(&outside).unwrap();
    }

    #[tokio::test]
    async fn missing_template_is_a_bad_request() {
        let fixture = Fixture::new();
        let mock = MockModelClient::always(ModelHost::OpenRouter, MockReply::Text("{}".into()));
        let body = json!({
            "binomial_name": "Escherichia coli",
            "system_template": fixture.dir.join("absent.txt"),
            "user_template": fixture.user,
        });

        let response = fixture.post_json(fixture.state(&mock), body).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn index_serves_the_form() {
        let fixture = Fixture::new();
        let mock = MockModelClient::new(ModelHost::OpenRouter);
        let request = HttpRequest::get("/").body(Body::empty()).unwrap();
        let response = router(fixture.state(&mock)).oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let html = String::from_utf8_lossy(&bytes);
        assert!(html.contains("binomial_name"));
        assert!(html.contains("Nom binomial"));
    }
}
