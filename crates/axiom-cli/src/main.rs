//! `axiom`: streaming chat in the terminal.

mod config;
mod repl;

use axiom_chat::{ChatOrchestrator, HttpChatBackend, Notifier, TracingNotifier};
use axiom_session::{FileKeyValueStore, SessionRegistry};
use clap::{Parser, Subcommand};
use config::AxiomConfig;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "axiom", about = "Axiom: streaming chat in the terminal")]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "axiom.toml")]
    config: PathBuf,

    /// Emit logs as JSON
    #[arg(long)]
    log_json: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Clone, Copy)]
enum Commands {
    /// Start an interactive chat (default)
    Chat,
    /// List stored sessions, most recently updated first
    Sessions,
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// JSON log mode keeps notifications in the structured log stream.
fn notifier(log_json: bool) -> Arc<dyn Notifier> {
    if log_json {
        Arc::new(TracingNotifier)
    } else {
        Arc::new(repl::ConsoleNotifier)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    dotenvy::dotenv().ok();
    init_tracing(cli.log_json);

    let config = AxiomConfig::load(&cli.config).await?;

    let store = Arc::new(FileKeyValueStore::new(config.sessions_dir()).await?);
    let registry = SessionRegistry::open(store).await;

    match cli.command.unwrap_or(Commands::Chat) {
        Commands::Sessions => repl::print_sessions(&registry, None),
        Commands::Chat => {
            config.endpoint.validate()?;
            info!(
                endpoint = %config.endpoint.url,
                sessions = registry.len(),
                "Starting chat"
            );

            let backend = Arc::new(HttpChatBackend::new(config.endpoint.clone())?);
            let chat = ChatOrchestrator::new(backend, registry, notifier(cli.log_json))
                .with_decoder_config(config.decoder.clone());
            repl::run(chat).await?;
        }
    }

    Ok(())
}
