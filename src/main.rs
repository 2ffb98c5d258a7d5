use anyhow::Context;
use clap::{Parser, Subcommand};
use microbellm::domain::{summarize, ModelHost, PredictionRequest, DEFAULT_MAX_RETRIES, DEFAULT_MODEL};
use microbellm::input::{
    ensure_templates_exist, load_names, pair_templates, plan_requests, read_template, PlanOptions,
    TemplatePair, DEFAULT_GENE_COLUMN, DEFAULT_NAME_COLUMN,
};
use microbellm::output::ResultWriter;
use microbellm::prediction::{run_requests, HostConfig, Predictor, TracingProgress};
use microbellm::web::{self, WebConfig};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "microbellm", version, about = "Prédiction de phénotypes microbiens par LLM", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
    /// Filtre de journalisation (syntaxe EnvFilter)
    #[arg(long, default_value = "info", global = true)]
    log_level: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Prédit chaque nom binomial d'un fichier d'entrée délimité par des points-virgules
    #[command(name = "by_list")]
    ByList {
        #[arg(long, num_args = 1.., default_values_t = [DEFAULT_MODEL.to_string()])]
        model: Vec<String>,
        #[arg(long, default_value = "openrouter")]
        model_host: ModelHost,
        #[arg(long, num_args = 1.., required = true)]
        system_template: Vec<PathBuf>,
        #[arg(long, num_args = 1.., required = true)]
        user_template: Vec<PathBuf>,
        #[arg(long)]
        input_file: PathBuf,
        #[arg(long)]
        output: PathBuf,
        #[arg(long, default_value = DEFAULT_NAME_COLUMN)]
        column_name: String,
        #[arg(long, default_value_t = 1)]
        threads: usize,
        #[arg(long, default_value_t = 0.0)]
        temperature: f32,
        #[arg(long)]
        use_genes: bool,
        #[arg(long, default_value = DEFAULT_GENE_COLUMN)]
        gene_column: String,
        /// Écrit des requêtes batch OpenAI au lieu d'appeler l'API
        #[arg(long)]
        batch_output: bool,
        #[arg(long, default_value_t = DEFAULT_MAX_RETRIES)]
        max_retries: u32,
        #[arg(long, default_value_t = 0)]
        retry_delay_ms: u64,
    },
    /// Prédit un seul nom binomial, avec un consensus entre modèles
    #[command(name = "by_name")]
    ByName {
        #[arg(long)]
        binomial_name: String,
        #[arg(long, num_args = 1.., default_values_t = [DEFAULT_MODEL.to_string()])]
        model: Vec<String>,
        #[arg(long, default_value = "openrouter")]
        model_host: ModelHost,
        #[arg(long)]
        system_template: PathBuf,
        #[arg(long)]
        user_template: PathBuf,
        #[arg(long)]
        output: PathBuf,
        #[arg(long)]
        batch_output: bool,
        #[arg(long, default_value_t = DEFAULT_MAX_RETRIES)]
        max_retries: u32,
        #[arg(long, default_value_t = 0)]
        retry_delay_ms: u64,
    },
    /// Sert le formulaire web de prédiction
    Web {
        #[arg(long, default_value = "127.0.0.1")]
        host: String,
        #[arg(long, default_value_t = 5000)]
        port: u16,
        #[arg(long, default_value = "web_predictions.csv")]
        output: PathBuf,
        /// Seuls les templates de ce répertoire sont acceptés
        #[arg(long, default_value = "templates")]
        templates_dir: PathBuf,
        #[arg(long, default_value_t = 0)]
        retry_delay_ms: u64,
    },
}

fn init_tracing(level: &str) {
    let filter = EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn build_predictor(host: ModelHost, batch_output: bool, retry_delay_ms: u64) -> anyhow::Result<Predictor> {
    if batch_output {
        return Ok(Predictor::batch_only());
    }
    let client = HostConfig::from_env(host)?.connect()?;
    Ok(Predictor::new(client).with_retry_delay(Duration::from_millis(retry_delay_ms)))
}

fn build_writer(output: &Path, batch_output: bool) -> ResultWriter {
    if output.exists() {
        warn!(
            "output" = %output.display(),
            "message" = "le fichier de sortie existe déjà, les résultats y seront ajoutés"
        );
    }
    if batch_output {
        ResultWriter::batch(output)
    } else {
        ResultWriter::rows(output)
    }
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(&cli.log_level);

    match cli.command {
        Commands::ByList {
            model,
            model_host,
            system_template,
            user_template,
            input_file,
            output,
            column_name,
            threads,
            temperature,
            use_genes,
            gene_column,
            batch_output,
            max_retries,
            retry_delay_ms,
        } => {
            let mut pairs = pair_templates(&system_template, &user_template)?;
            if use_genes {
                pairs = pairs.iter().map(TemplatePair::with_genes).collect();
            }
            ensure_templates_exist(pairs.iter().flat_map(|pair| pair.paths()))?;
            let templates = pairs
                .iter()
                .map(TemplatePair::load)
                .collect::<anyhow::Result<Vec<_>>>()?;

            let names = load_names(&input_file, &column_name, use_genes.then_some(gene_column.as_str()))?;
            let options = PlanOptions {
                host: model_host,
                temperature,
                max_retries,
                use_genes,
            };
            let requests = plan_requests(&names, &model, &templates, &options)?;
            info!(
                names = names.len(),
                models = model.len(),
                templates = templates.len(),
                requests = requests.len(),
                "message" = "prédictions planifiées"
            );

            let predictor = build_predictor(model_host, batch_output, retry_delay_ms)?;
            let writer = build_writer(&output, batch_output);
            let progress = TracingProgress::new(requests.len());
            let summary = run_requests(&predictor, &requests, &writer, threads, &progress)?;
            info!(
                succeeded = summary.succeeded,
                failed = summary.failed,
                "output" = %output.display(),
                "message" = "traitement terminé"
            );
            if batch_output {
                info!("output" = %output.display(), "message" = "fichier batch prêt pour l'API OpenAI");
            }
        }
        Commands::ByName {
            binomial_name,
            model,
            model_host,
            system_template,
            user_template,
            output,
            batch_output,
            max_retries,
            retry_delay_ms,
        } => {
            ensure_templates_exist([system_template.as_path(), user_template.as_path()])?;
            let system = read_template(&system_template)?;
            let user = read_template(&user_template)?;

            let predictor = build_predictor(model_host, batch_output, retry_delay_ms)?;
            let writer = build_writer(&output, batch_output);
            let progress = TracingProgress::new(model.len());
            let mut records = Vec::new();
            for model_id in &model {
                let request = PredictionRequest::new(binomial_name.as_str(), model_id.as_str(), system.as_str(), user.as_str())
                    .with_host(model_host)
                    .with_max_retries(max_retries)
                    .with_template_path(system_template.to_string_lossy());
                match predictor.predict(&request, &writer, &progress) {
                    Ok(outcome) => {
                        if let Some(record) = outcome.record() {
                            println!("{}", serde_json::to_string_pretty(record)?);
                            records.push(record.clone());
                        }
                    }
                    Err(err) => error!(model = %model_id, "erreur" = %err, "message" = "prédiction échouée"),
                }
            }

            if records.len() > 1 {
                let summary = summarize(&records);
                if !summary.is_unanimous() {
                    warn!(
                        fields = ?summary.disagreements.keys().collect::<Vec<_>>(),
                        "message" = "les modèles ne sont pas unanimes"
                    );
                }
                println!("{}", serde_json::to_string_pretty(&summary)?);
            }
        }
        Commands::Web {
            host,
            port,
            output,
            templates_dir,
            retry_delay_ms,
        } => {
            let config = WebConfig {
                host,
                port,
                output,
                templates: templates_dir,
                retry_delay: Duration::from_millis(retry_delay_ms),
            };
            tokio::runtime::Builder::new_multi_thread()
                .enable_all()
                .build()
                .context("impossible de démarrer le runtime tokio")?
                .block_on(web::serve(config))?;
        }
    }

    Ok(())
}
