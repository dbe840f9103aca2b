use clap::{Parser, Subcommand};
use docintel::Result;
use docintel::commands::{
    ask, clear_conversation, ingest_pdf, serve_mcp, show_history, show_status,
};
use docintel::config::{Config, run_interactive_config, show_config};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "docintel")]
#[command(about = "Grounded question answering over your PDF documents, with an MCP server")]
#[command(version)]
struct Cli {
    /// Configuration directory (default: $DOCINTEL_HOME or ~/.docintel)
    #[arg(long, global = true, value_name = "DIR")]
    config_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Configure models, embeddings and evaluation
    Config {
        /// Show current configuration
        #[arg(long)]
        show: bool,
    },
    /// Ask a question about the ingested documents
    Ask {
        /// The question to answer
        question: String,
        /// Continue an existing conversation
        #[arg(long, short = 'c', value_name = "ID")]
        conversation: Option<String>,
    },
    /// Show a conversation, or list conversations when no id is given
    History {
        /// Conversation id
        conversation: Option<String>,
    },
    /// Forget a conversation
    Clear {
        /// Conversation id
        conversation: String,
    },
    /// Extract a PDF page by page and index it
    Ingest {
        /// Path to the PDF
        path: PathBuf,
        /// Name recorded as the source of each page (defaults to the file name)
        #[arg(long)]
        name: Option<String>,
        /// Print the raw extraction JSON to stdout
        #[arg(long)]
        json: bool,
    },
    /// Start MCP server on stdio
    Serve,
    /// Show configuration paths, model health and index size
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config_dir = match cli.config_dir {
        Some(dir) => dir,
        None => Config::config_dir()?,
    };

    match cli.command {
        Commands::Config { show } => {
            if show {
                show_config(&config_dir)?;
            } else {
                run_interactive_config(&config_dir)?;
            }
        }
        Commands::Ask {
            question,
            conversation,
        } => {
            let config = Config::load(&config_dir)?;
            ask(&config, &question, conversation.as_deref()).await?;
        }
        Commands::History { conversation } => {
            let config = Config::load(&config_dir)?;
            show_history(&config, conversation.as_deref()).await?;
        }
        Commands::Clear { conversation } => {
            let config = Config::load(&config_dir)?;
            clear_conversation(&config, &conversation).await?;
        }
        Commands::Ingest { path, name, json } => {
            let config = Config::load(&config_dir)?;
            ingest_pdf(&config, &path, name.as_deref(), json).await?;
        }
        Commands::Serve => {
            let config = Config::load(&config_dir)?;
            serve_mcp(&config).await?;
        }
        Commands::Status => {
            let config = Config::load(&config_dir)?;
            show_status(&config).await?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::error::ErrorKind;

    #[test]
    fn ask_with_question() {
        let cli = Cli::try_parse_from(["docintel", "ask", "What is the refund window?"])
            .expect("should parse");

        let Commands::Ask {
            question,
            conversation,
        } = cli.command
        else {
            panic!("expected ask");
        };
        assert_eq!(question, "What is the refund window?");
        assert_eq!(conversation, None);
    }

    #[test]
    fn ask_continues_a_conversation() {
        let cli = Cli::try_parse_from(["docintel", "ask", "-c", "a1b2c3d4", "And exchanges?"])
            .expect("should parse");

        let Commands::Ask { conversation, .. } = cli.command else {
            panic!("expected ask");
        };
        assert_eq!(conversation.as_deref(), Some("a1b2c3d4"));
    }

    #[test]
    fn history_id_is_optional() {
        let cli = Cli::try_parse_from(["docintel", "history"]).expect("should parse");
        assert!(matches!(
            cli.command,
            Commands::History { conversation: None }
        ));
    }

    #[test]
    fn clear_needs_an_id() {
        let err = Cli::try_parse_from(["docintel", "clear"])
            .err()
            .expect("should fail without an id");
        assert_eq!(err.kind(), ErrorKind::MissingRequiredArgument);
    }

    #[test]
    fn ingest_with_name_and_json() {
        let cli = Cli::try_parse_from([
            "docintel",
            "ingest",
            "docs/policy.pdf",
            "--name",
            "Refund Policy",
            "--json",
        ])
        .expect("should parse");

        let Commands::Ingest { path, name, json } = cli.command else {
            panic!("expected ingest");
        };
        assert_eq!(path, PathBuf::from("docs/policy.pdf"));
        assert_eq!(name.as_deref(), Some("Refund Policy"));
        assert!(json);
    }

    #[test]
    fn config_dir_is_global() {
        let cli = Cli::try_parse_from(["docintel", "serve", "--config-dir", "/tmp/docintel"])
            .expect("should parse");

        assert!(matches!(cli.command, Commands::Serve));
        assert_eq!(cli.config_dir, Some(PathBuf::from("/tmp/docintel")));
    }

    #[test]
    fn config_show_flag() {
        let cli = Cli::try_parse_from(["docintel", "config", "--show"]).expect("should parse");
        assert!(matches!(cli.command, Commands::Config { show: true }));
    }

    #[test]
    fn invalid_command() {
        let err = Cli::try_parse_from(["docintel", "add", "https://example.com"])
            .err()
            .expect("should reject unknown subcommands");
        assert_eq!(err.kind(), ErrorKind::InvalidSubcommand);
    }
}
