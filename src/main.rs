use std::io::{IsTerminal, Read};
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use ragchat::answer::{NO_QUERY_MESSAGE, RagRequest, RagResponse};
use ragchat::commands::{ask, build, parse_query_input, search, serve_http, show_status};
use ragchat::config::{Config, init_config, show_config};
use ragchat::retrieval::DEFAULT_TOP_K;
use tracing::error;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "ragchat")]
#[command(about = "Retrieval-augmented chat backend over saved chats and knowledge notes")]
#[command(version)]
struct Cli {
    /// Directory holding ragchat.toml; relative paths resolve against it
    #[arg(long, global = true, default_value = ".")]
    dir: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show or initialise the configuration
    Config {
        /// Write the default configuration if none exists
        #[arg(long)]
        init: bool,
    },
    /// Embed saved chats and knowledge files into a fresh index
    Build,
    /// Answer a question and print the JSON response
    Ask {
        /// Question text; read from stdin when omitted
        query: Vec<String>,
        /// Saved chat session whose messages are listed in the response
        #[arg(long)]
        chat: Option<String>,
    },
    /// Show the passages nearest to a query
    Search {
        query: String,
        /// Number of passages to return
        #[arg(long, short, default_value_t = DEFAULT_TOP_K)]
        k: usize,
    },
    /// Serve the HTTP API
    Serve {
        #[arg(long)]
        host: Option<String>,
        #[arg(long)]
        port: Option<u16>,
    },
    /// Show corpus, index and provider status
    Status,
}

fn read_stdin_query() -> Option<String> {
    let mut stdin = std::io::stdin();
    if stdin.is_terminal() {
        return None;
    }

    let mut input = String::new();
    match stdin.read_to_string(&mut input) {
        Ok(_) => parse_query_input(&input),
        Err(e) => {
            error!("Failed to read query: {}", e);
            None
        }
    }
}

fn print_json(response: &RagResponse) -> Result<()> {
    println!(
        "{}",
        serde_json::to_string(response).context("Failed to serialize response")?
    );
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let mut config = Config::load(&cli.dir)?;

    match cli.command {
        Commands::Config { init } => {
            if init {
                init_config(&config)?;
            } else {
                show_config(&config)?;
            }
        }
        Commands::Build => {
            build(&config).await?;
        }
        Commands::Ask { query, chat } => {
            let query = Some(query.join(" ").trim().to_string())
                .filter(|query| !query.is_empty())
                .or_else(read_stdin_query);

            let Some(query) = query else {
                error!("{}", NO_QUERY_MESSAGE);
                print_json(&RagResponse::error(NO_QUERY_MESSAGE))?;
                std::process::exit(1);
            };

            let request = RagRequest {
                query,
                chat_filename: chat,
            };
            print_json(&ask(&config, &request).await?)?;
        }
        Commands::Search { query, k } => {
            search(&config, &query, k).await?;
        }
        Commands::Serve { host, port } => {
            if let Some(host) = host {
                config.server.host = host;
            }
            if let Some(port) = port {
                config.server.port = port;
            }
            serve_http(&config).await?;
        }
        Commands::Status => {
            show_status(&config).await?;
        }
    }

    Ok(())
}
