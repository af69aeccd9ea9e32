use std::path::PathBuf;
use std::sync::Arc;

use clap::{command, Parser};
use kitei::source::FileMetadataSource;
use kitei::{EngineConfig, Error, FormEngine, Value};
use tracing::{debug, info};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "config.json")]
    config: PathBuf,

    /// Directory holding `<table>.<context>.json` metadata files
    #[arg(short, long, default_value = "metadata")]
    metadata: PathBuf,

    /// Table to open a form session for
    #[arg(short, long)]
    table: String,

    /// Form context (defaults to the configured one)
    #[arg(long)]
    context: Option<String>,

    /// Field assignments applied in order, as field=value
    #[arg(short, long)]
    set: Vec<String>,

    /// Attempt a submit after the assignments
    #[arg(long)]
    submit: bool,

    /// Enable debug mode
    #[arg(short, long)]
    verbose: bool,
}

async fn run(cli: &Cli) -> Result<(), Error> {
    let config = if cli.config.exists() {
        EngineConfig::from_file(&cli.config)?
    } else {
        EngineConfig::default()
    };

    info!("config loaded.");
    debug!("config: {:?}", config);

    let source = Arc::new(FileMetadataSource::new(&cli.metadata));
    let engine = FormEngine::new(config, source);

    let session = engine
        .open_session(&cli.table, cli.context.as_deref())
        .await?;

    for assignment in &cli.set {
        let (field, value) = assignment.split_once('=').ok_or_else(|| {
            Error::internal(format!("invalid assignment (expected field=value): {}", assignment))
        })?;
        session
            .set_field_value(field, Value::String(value.to_string()))
            .await;
    }

    println!(
        "record: {}",
        serde_json::to_string_pretty(&session.record().await)
            .map_err(|e| Error::internal(e.to_string()))?
    );
    println!(
        "field states: {}",
        serde_json::to_string_pretty(&session.field_states().await)
            .map_err(|e| Error::internal(e.to_string()))?
    );

    if cli.submit {
        let outcome = session.submit().await?;
        if outcome.allowed {
            println!("submit allowed.");
        } else {
            println!("submit blocked by field errors.");
        }
    }

    Ok(())
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt().init();

    let cli = Cli::parse();

    if let Err(e) = run(&cli).await {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}
