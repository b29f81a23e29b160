//! CLI command implementations.

pub mod config;
pub mod secret;
pub mod selftest;
pub mod token;

use clap::{Args, Subcommand};

/// Arguments for the config command.
#[derive(Args)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommand,
}

#[derive(Subcommand)]
pub enum ConfigCommand {
    /// Show the effective configuration (secret redacted).
    Show,
    /// Validate the configuration.
    Validate,
    /// Write a starter config file with a fresh secret.
    Init {
        /// Force overwrite existing config.
        #[arg(short, long)]
        force: bool,
    },
}

/// Arguments for the gen-secret command.
#[derive(Args)]
pub struct GenSecretArgs {
    /// Random bytes before encoding.
    #[arg(short, long, default_value = "48")]
    pub bytes: usize,
}

/// Arguments for the hash-password command.
#[derive(Args)]
pub struct HashPasswordArgs {
    /// Password to hash. Prompted for when omitted.
    #[arg(long)]
    pub password: Option<String>,

    /// Print a ready-to-paste `[[unlock.grants]]` entry for these roles.
    #[arg(short, long, value_delimiter = ',')]
    pub roles: Vec<String>,
}

/// Arguments for the token command.
#[derive(Args)]
pub struct TokenArgs {
    #[command(subcommand)]
    pub command: TokenCommand,
}

#[derive(Subcommand)]
pub enum TokenCommand {
    /// Decode a token's claims without checking the signature.
    Inspect {
        /// The token.
        token: String,
    },
    /// Verify a token against the configured secret.
    Verify {
        /// The token.
        token: String,

        /// Verify as a refresh token instead of an access token.
        #[arg(long)]
        refresh: bool,
    },
    /// Issue an access token for testing.
    Issue {
        /// Session id the token is bound to.
        #[arg(long)]
        session: Option<String>,

        /// User id.
        #[arg(long)]
        user: Option<String>,

        /// User email.
        #[arg(long)]
        email: Option<String>,

        /// Roles, comma separated.
        #[arg(short, long, value_delimiter = ',', default_value = "guest")]
        roles: Vec<String>,

        /// Mark the token authenticated.
        #[arg(long)]
        authenticated: bool,

        /// Lifetime in seconds (default: configured access TTL).
        #[arg(long)]
        ttl: Option<u64>,
    },
}
