mod batch;
mod config;
mod error;
mod export;
mod heuristics;
mod image;
mod llm_extract;
mod repl;
mod retry;
mod schema;
mod session;

use clap::Parser;
use config::{Config, CredentialSource};
use llm_extract::LlmClient;
use session::Session;
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Extract structured invoice data from images with a vision LLM.
#[derive(Parser, Debug)]
#[command(name = "invoice_parser", version)]
struct Args {
    /// TOML config file.
    #[arg(long, default_value = "invoice_parser.toml")]
    config: PathBuf,

    /// Where the API key is read from.
    #[arg(long, value_enum, default_value_t = CredentialSource::Cloud)]
    environment: CredentialSource,

    /// Invoice language hint (overrides the config file).
    #[arg(long)]
    language: Option<String>,

    /// Images (paths or URLs) to extract before entering the prompt.
    images: Vec<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // init tracing
    tracing_subscriber::fmt()
        .with_target(true)
        .with_level(true)
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    let mut cfg = Config::load_or_default(&args.config)?;
    if let Some(language) = args.language {
        cfg.session.language = language;
    }

    let api_key = cfg.resolve_api_key(args.environment)?;
    let client = LlmClient::new(&cfg.llm, api_key)?;
    info!(
        environment = ?args.environment,
        language = %cfg.session.language,
        max_retries = cfg.llm.max_retries,
        "Session started"
    );

    let mut session = Session::new();
    let mut shell = repl::Shell::new(&client, &cfg);
    for source in &args.images {
        shell.queue(source).await;
    }
    if !args.images.is_empty() {
        shell.process(&mut session).await;
    }

    shell.run(&mut session).await?;
    Ok(())
}
