//! Deck CLI - operator tool for FlashDeck auth.
//!
//! Commands:
//! - `deck config` - Show, validate or initialize the auth configuration
//! - `deck gen-secret` - Generate a token signing secret
//! - `deck hash-password` - Hash a password for an unlock grant
//! - `deck token` - Inspect, verify or issue tokens
//! - `deck selftest` - Run the session lifecycle against an in-memory store

mod commands;
mod context;
mod output;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use commands::{ConfigArgs, GenSecretArgs, HashPasswordArgs, TokenArgs};

/// Deck CLI - manage FlashDeck auth configuration, secrets and tokens
#[derive(Parser)]
#[command(name = "deck")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Enable verbose output (-vv for trace logs)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Use JSON output format
    #[arg(long, global = true)]
    json: bool,

    /// Config file path
    #[arg(short, long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage configuration
    Config(ConfigArgs),

    /// Generate a token signing secret
    GenSecret(GenSecretArgs),

    /// Hash a password for an unlock grant
    HashPassword(HashPasswordArgs),

    /// Inspect, verify or issue tokens
    Token(TokenArgs),

    /// Run the session lifecycle against an in-memory store
    Selftest,
}

fn init_tracing(verbose: u8) {
    let default = match verbose {
        0 => "warn",
        1 => "info,deck_auth=debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    // Setup output formatting
    let output = output::Output::new(cli.verbose > 0, cli.json);

    // Load config
    let ctx = match context::Context::load(cli.config.as_deref(), output.clone()) {
        Ok(ctx) => ctx,
        Err(e) => {
            output.error(&format!("{:#}", e));
            std::process::exit(1);
        }
    };

    // Execute command
    let result = match cli.command {
        Commands::Config(args) => commands::config::run(args, &ctx).await,
        Commands::GenSecret(args) => commands::secret::gen_secret(args, &ctx).await,
        Commands::HashPassword(args) => commands::secret::hash_password(args, &ctx).await,
        Commands::Token(args) => commands::token::run(args, &ctx).await,
        Commands::Selftest => commands::selftest::run(&ctx).await,
    };

    if let Err(e) = result {
        ctx.output.error(&format!("{:#}", e));
        std::process::exit(1);
    }

    Ok(())
}
