//! Configuration commands.

use std::fs;

use anyhow::{bail, Context as _, Result};
use deck_auth::config::SameSite;

use super::secret::generate_secret;
use super::{ConfigArgs, ConfigCommand};
use crate::context::{Context, CONFIG_NAMES};
use crate::output::{format_duration, redact};

/// Run the config command.
pub async fn run(args: ConfigArgs, ctx: &Context) -> Result<()> {
    match args.command {
        ConfigCommand::Show => show_config(ctx),
        ConfigCommand::Validate => validate_config(ctx),
        ConfigCommand::Init { force } => init_config(force, ctx),
    }
}

fn show_config(ctx: &Context) -> Result<()> {
    let config = &ctx.config;

    if ctx.output.is_json() {
        let mut shown = config.clone();
        shown.token.secret = redact(&config.token.secret);
        ctx.output.json(&shown);
        return Ok(());
    }

    ctx.output.header("Current Configuration");
    match &ctx.config_path {
        Some(path) => ctx.output.kv("file", &path.display().to_string()),
        None => ctx.output.kv("file", "<defaults>"),
    }

    ctx.output.info("[token]");
    ctx.output.kv("secret", &redact(&config.token.secret));
    ctx.output.kv("algorithm", config.token.algorithm.as_str());
    ctx.output
        .kv("access_ttl", &format_duration(config.token.access_ttl_secs));
    ctx.output
        .kv("refresh_ttl", &format_duration(config.token.refresh_ttl_secs));
    if let Some(ref issuer) = config.token.issuer {
        ctx.output.kv("issuer", issuer);
    }

    ctx.output.info("[session]");
    ctx.output.kv("ttl", &format_duration(config.session.ttl_secs));
    ctx.output
        .kv("page_size", &config.session.page_size.to_string());
    ctx.output
        .kv("invalidation", &format!("{:?}", config.session.invalidation).to_lowercase());
    ctx.output.kv(
        "on_role_change",
        &format!("{:?}", config.session.on_role_change).to_lowercase(),
    );

    ctx.output.info("[credentials]");
    ctx.output.kv(
        "default_roles",
        &config.credentials.default_role_set().to_string(),
    );
    ctx.output.kv(
        "min_password_length",
        &config.credentials.min_password_length.to_string(),
    );

    ctx.output.info("[cookies]");
    ctx.output.kv("secure", &config.cookies.secure.to_string());
    ctx.output.kv("same_site", config.cookies.same_site.as_str());
    ctx.output.kv("path", &config.cookies.path);

    ctx.output.info("[unlock]");
    if config.unlock.grants.is_empty() {
        ctx.output.kv("grants", "none (unlock disabled)");
    }
    for grant in &config.unlock.grants {
        ctx.output.list_item(&grant.roles.join(", "));
    }

    Ok(())
}

fn validate_config(ctx: &Context) -> Result<()> {
    ctx.output.header("Validating configuration");
    let config = &ctx.config;

    if let Err(err) = config.validate() {
        ctx.output.error(&format!("Error: {}", err));
        bail!("Configuration is invalid");
    }

    let mut warnings: Vec<String> = Vec::new();
    if !config.cookies.secure {
        warnings.push("cookies.secure is off; cookies will be sent over plain HTTP".to_string());
    }
    if config.cookies.same_site == SameSite::None && !config.cookies.secure {
        warnings.push("cookies.same_site = \"None\" is rejected by browsers without secure".to_string());
    }
    if config.token.issuer.is_none() {
        warnings.push("token.issuer is unset; tokens are not bound to an issuer".to_string());
    }

    for warning in &warnings {
        ctx.output.warn(&format!("Warning: {}", warning));
    }

    if ctx.output.is_json() {
        ctx.output
            .json(&serde_json::json!({ "valid": true, "warnings": warnings }));
    } else if warnings.is_empty() {
        ctx.output.success("Configuration is valid");
    } else {
        ctx.output.success("Configuration is valid (with warnings)");
    }

    Ok(())
}

fn init_config(force: bool, ctx: &Context) -> Result<()> {
    let config_path = ctx.cwd.join(CONFIG_NAMES[0]);

    if config_path.exists() && !force {
        bail!(
            "Config file already exists: {}. Use --force to overwrite.",
            config_path.display()
        );
    }

    let config = deck_auth::AuthConfig::with_secret(generate_secret(48));
    let content = toml::to_string_pretty(&config).context("Failed to render config")?;
    fs::write(&config_path, content)
        .with_context(|| format!("Failed to write {}", config_path.display()))?;

    ctx.output
        .success(&format!("Created: {}", config_path.display()));
    ctx.output
        .info("The file holds the signing secret; keep it out of version control.");

    Ok(())
}
