// gwctl: operator CLI for the gitwatch API

mod client;
mod output;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use client::ApiClient;
use common::auth::{generate_token, SecretToken, DEFAULT_TOKEN_BYTES};

#[derive(Parser)]
#[command(name = "gwctl")]
#[command(about = "Inspect a running gitwatch deployment", long_about = None)]
#[command(version = env!("CARGO_PKG_VERSION"))]
struct Cli {
    /// Base URL of the API server
    #[arg(long, env = "GWCTL_URL", default_value = "http://127.0.0.1:8080", global = true)]
    url: String,

    /// API bearer token
    #[arg(long, env = "GWCTL_TOKEN", hide_env_values = true, global = true)]
    token: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check that the API is up and the token is accepted
    Status,

    /// Execution history
    #[command(subcommand)]
    Executions(ExecutionCommands),

    /// API token helpers
    #[command(subcommand)]
    Token(TokenCommands),
}

#[derive(Subcommand)]
enum ExecutionCommands {
    /// List executed actions, newest first
    List {
        /// Show at most this many rows
        #[arg(short, long)]
        limit: Option<u32>,
    },
}

#[derive(Subcommand)]
enum TokenCommands {
    /// Print a new random token for `server.api_token`
    Generate {
        /// Random bytes before hex encoding
        #[arg(long, default_value_t = DEFAULT_TOKEN_BYTES)]
        bytes: usize,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Token(TokenCommands::Generate { bytes }) => {
            anyhow::ensure!(bytes > 0, "--bytes must be greater than zero");
            println!("{}", generate_token(bytes));
        }
        Commands::Status => {
            let client = api_client(&cli.url, cli.token)?;
            println!("{}", client.status().await?);
        }
        Commands::Executions(ExecutionCommands::List { limit }) => {
            let client = api_client(&cli.url, cli.token)?;
            let executions = client.list_executions(limit).await?;
            print!("{}", output::executions_table(&executions));
        }
    }

    Ok(())
}

fn api_client(url: &str, token: Option<String>) -> Result<ApiClient> {
    let token = token
        .map(SecretToken::new)
        .filter(|token| !token.is_empty())
        .context("an API token is required (--token or GWCTL_TOKEN)")?;
    ApiClient::new(url, token)
}
