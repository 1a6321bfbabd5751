mod ui;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Args, Parser, Subcommand, ValueEnum};
use sitesmith_auth::CredentialStore;
use sitesmith_core::{
    GenerationClient, GenerationConfig, LocalSandbox, Sandbox, Session, SyncConfig, Synchronizer,
    budget_for, classify,
};
use sitesmith_llm::LanguageModel;
use tokio::io::{AsyncBufReadExt, BufReader};

#[derive(Parser)]
#[command(name = "sitesmith", about = "Generate a website from a prompt and preview it locally.")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print the complexity tier and budget a prompt would get.
    Classify { prompt: String },
    /// Generate a site from one prompt and serve the preview.
    Generate {
        prompt: String,
        #[command(flatten)]
        run: RunArgs,
        /// Exit once the preview is ready instead of serving until Ctrl-C.
        #[arg(long)]
        no_wait: bool,
    },
    /// Build a site over several turns, one instruction per line on stdin.
    Chat {
        #[command(flatten)]
        run: RunArgs,
    },
    /// Add a user to the credential store.
    Register(CredentialArgs),
    /// Check a username and password against the credential store.
    Login(CredentialArgs),
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Backend {
    /// Chat-completions service (DeepSeek or OpenAI compatible).
    Openai,
    /// Local Ollama server.
    Ollama,
}

#[derive(Args)]
struct RunArgs {
    #[arg(long, env = "SITESMITH_BACKEND", value_enum, default_value_t = Backend::Openai)]
    backend: Backend,

    /// Falls back to DEEPSEEK_API_KEY.
    #[arg(long, env = "SITESMITH_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    #[arg(long, env = "SITESMITH_BASE_URL", default_value = sitesmith_llm_openai::DEFAULT_BASE_URL)]
    base_url: String,

    #[arg(long, env = "SITESMITH_OLLAMA_URL", default_value = sitesmith_llm_ollama::DEFAULT_BASE_URL)]
    ollama_url: String,

    /// Defaults to the backend's default model.
    #[arg(long, env = "SITESMITH_MODEL")]
    model: Option<String>,

    /// Project directory the preview is served from.
    #[arg(long)]
    dir: Option<PathBuf>,

    /// Total generation attempts per turn.
    #[arg(long, default_value_t = 2)]
    attempts: u32,

    /// Stop waiting for a turn after this many seconds.
    #[arg(long, value_name = "SECS")]
    timeout: Option<u64>,

    /// Give up on the preview server after this many seconds.
    #[arg(long, value_name = "SECS")]
    ready_timeout: Option<u64>,
}

#[derive(Args)]
struct CredentialArgs {
    #[arg(long)]
    user: String,
    #[arg(long)]
    password: String,
    /// Defaults to the app data directory.
    #[arg(long)]
    users_file: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Command::Classify { prompt } => {
            let budget = budget_for(&prompt);
            println!(
                "{} (max_tokens={}, timeout={}s)",
                classify(&prompt),
                budget.max_tokens,
                budget.timeout.as_secs()
            );
            Ok(())
        }
        Command::Generate {
            prompt,
            run,
            no_wait,
        } => generate(prompt, run, no_wait).await,
        Command::Chat { run } => chat(run).await,
        Command::Register(args) => {
            let store = open_store(args.users_file)?;
            let reply = store.register(&args.user, &args.password)?;
            println!("{}", serde_json::to_string(&reply)?);
            Ok(())
        }
        Command::Login(args) => {
            let store = open_store(args.users_file)?;
            let reply = store.login(&args.user, &args.password)?;
            println!("{}", serde_json::to_string(&reply)?);
            Ok(())
        }
    }
}

fn open_store(path: Option<PathBuf>) -> Result<CredentialStore, Box<dyn std::error::Error>> {
    let path = match path {
        Some(path) => path,
        None => sitesmith_app::users_file_path()?,
    };
    Ok(CredentialStore::open(path)?)
}

fn build_model(run: &RunArgs) -> LanguageModel {
    match run.backend {
        Backend::Openai => {
            let api_key = run
                .api_key
                .clone()
                .or_else(|| std::env::var("DEEPSEEK_API_KEY").ok())
                .unwrap_or_default();
            tracing::info!(
                base_url = %run.base_url,
                api_key_set = !api_key.is_empty(),
                "using chat-completions backend"
            );
            let model_id = run
                .model
                .as_deref()
                .unwrap_or(sitesmith_llm_openai::DEFAULT_MODEL_ID);
            sitesmith_llm_openai::provider(sitesmith_llm_openai::OpenAIConfig {
                api_key,
                base_url: run.base_url.clone(),
            })
            .model(model_id)
        }
        Backend::Ollama => {
            tracing::info!(base_url = %run.ollama_url, "using local backend");
            let model_id = run
                .model
                .as_deref()
                .unwrap_or(sitesmith_llm_ollama::DEFAULT_MODEL_ID);
            sitesmith_llm_ollama::provider(sitesmith_llm_ollama::OllamaConfig {
                base_url: run.ollama_url.clone(),
            })
            .model(model_id)
        }
    }
}

async fn build_session(run: &RunArgs) -> Result<Session, Box<dyn std::error::Error>> {
    let dir = match &run.dir {
        Some(dir) => dir.clone(),
        None => sitesmith_app::sandbox_dir()?,
    };
    tracing::info!(dir = %dir.display(), "preview directory");

    let sandbox: Arc<dyn Sandbox> = Arc::new(LocalSandbox::create(dir).await?);
    let sync = Synchronizer::new(
        Some(sandbox),
        SyncConfig {
            ready_timeout: run.ready_timeout.map(Duration::from_secs),
            ..Default::default()
        },
    );
    let client = GenerationClient::new(
        build_model(run),
        GenerationConfig {
            max_attempts: run.attempts,
            ..Default::default()
        },
    );
    Ok(Session::new(client, sync)?)
}

async fn generate(
    prompt: String,
    run: RunArgs,
    no_wait: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let session = build_session(&run).await?;
    let outcome = ui::drive(session.submit(prompt)?, run.timeout).await?;

    match outcome.endpoint {
        Some(endpoint) => println!("{}", endpoint.url),
        None => {
            let cause = outcome.sync_error.unwrap_or_default();
            return Err(format!("preview failed: {cause}").into());
        }
    }

    if !no_wait {
        eprintln!("Serving preview. Press Ctrl-C to stop.");
        tokio::signal::ctrl_c().await?;
    }
    Ok(())
}

async fn chat(run: RunArgs) -> Result<(), Box<dyn std::error::Error>> {
    let session = build_session(&run).await?;
    eprintln!("Describe the website, then send follow-up changes. `/quit` to exit.");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if line == "/quit" {
            break;
        }
        if line == "/files" {
            for path in session.tree().files() {
                println!("{path}");
            }
            continue;
        }

        let stream = match session.submit(line) {
            Ok(stream) => stream,
            Err(e) => {
                eprintln!("error: {e}");
                continue;
            }
        };
        match ui::drive(stream, run.timeout).await {
            Ok(outcome) => {
                if let Some(endpoint) = outcome.endpoint {
                    println!("{}", endpoint.url);
                }
            }
            Err(e) => eprintln!("error: {e}"),
        }
    }
    Ok(())
}
