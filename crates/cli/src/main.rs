//! local-llm CLI: the main entry point.
//!
//! Commands:
//! - `chat`   : Run one conversation turn against the configured server
//! - `proxy`  : Start the forwarding proxy
//! - `health` : Check that the configured server answers
//! - `config` : Show, locate, or initialize the config file

use std::path::PathBuf;

use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(
    name = "local-llm",
    about = "Chat with tool calling against a local OpenAI-compatible LLM server",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Send one message and stream the answer
    Chat {
        /// The user message
        #[arg(short, long)]
        message: String,

        /// Image or PDF to attach (repeatable)
        #[arg(short, long = "attach")]
        attachments: Vec<PathBuf>,

        /// System prompt placed before the message
        #[arg(short, long)]
        system: Option<String>,

        /// JSON schema file the answer must follow
        #[arg(long)]
        schema: Option<PathBuf>,

        /// Name sent with the schema
        #[arg(long, default_value = "response", requires = "schema")]
        schema_name: String,

        /// Give up after this many seconds
        #[arg(long)]
        deadline_secs: Option<u64>,
    },

    /// Start the forwarding proxy
    Proxy {
        /// Override the port
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Check that the configured server is reachable
    Health,

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Print the effective configuration
    Show,

    /// Print the config file path
    Path,

    /// Write a default config file if none exists
    Init,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Chat {
            message,
            attachments,
            system,
            schema,
            schema_name,
            deadline_secs,
        } => {
            commands::chat::run(commands::chat::ChatArgs {
                message,
                attachments,
                system,
                schema,
                schema_name,
                deadline_secs,
            })
            .await?
        }
        Commands::Proxy { port } => commands::proxy::run(port).await?,
        Commands::Health => commands::health::run().await?,
        Commands::Config { action } => match action {
            ConfigAction::Show => commands::config_cmd::show().await?,
            ConfigAction::Path => commands::config_cmd::path().await?,
            ConfigAction::Init => commands::config_cmd::init().await?,
        },
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chat_arguments_parse() {
        let cli = Cli::try_parse_from([
            "local-llm",
            "chat",
            "-m",
            "What is in this picture?",
            "--attach",
            "a.png",
            "--attach",
            "b.pdf",
            "--schema",
            "answer.json",
        ])
        .unwrap();

        match cli.command {
            Commands::Chat {
                message,
                attachments,
                schema,
                schema_name,
                ..
            } => {
                assert_eq!(message, "What is in this picture?");
                assert_eq!(attachments, vec![PathBuf::from("a.png"), PathBuf::from("b.pdf")]);
                assert_eq!(schema, Some(PathBuf::from("answer.json")));
                assert_eq!(schema_name, "response");
            }
            _ => panic!("expected chat command"),
        }
    }

    #[test]
    fn schema_name_requires_schema() {
        let result = Cli::try_parse_from(["local-llm", "chat", "-m", "hi", "--schema-name", "x"]);
        assert!(result.is_err());
    }

    #[test]
    fn verbose_is_global() {
        let cli = Cli::try_parse_from(["local-llm", "proxy", "--port", "9000", "-v"]).unwrap();
        assert!(cli.verbose);
        assert!(matches!(cli.command, Commands::Proxy { port: Some(9000) }));
    }
}
