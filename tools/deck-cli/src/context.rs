//! CLI execution context.

use std::path::{Path, PathBuf};

use anyhow::{Context as _, Result};
use deck_auth::AuthConfig;

use crate::output::Output;

/// Config file names searched from the working directory upwards.
pub const CONFIG_NAMES: [&str; 3] = ["deck.toml", ".deck.toml", "deck.json"];

/// Execution context for CLI commands.
pub struct Context {
    /// Auth configuration, with environment overrides applied but not
    /// yet validated.
    pub config: AuthConfig,
    /// File the configuration came from, if any.
    pub config_path: Option<PathBuf>,
    /// Output handler.
    pub output: Output,
    /// Working directory.
    pub cwd: PathBuf,
}

impl Context {
    /// Load context from an explicit config file or the nearest one found.
    pub fn load(config_path: Option<&str>, output: Output) -> Result<Self> {
        let cwd = std::env::current_dir().context("Failed to get current directory")?;

        let config_path = match config_path {
            Some(path) => Some(PathBuf::from(path)),
            None => Self::find_config(&cwd),
        };

        let mut config = match &config_path {
            Some(path) => {
                output.debug(&format!("Using config {}", path.display()));
                AuthConfig::from_file(path)?
            }
            None => {
                output.debug("No config file found, using defaults");
                AuthConfig::default()
            }
        };
        config
            .apply_overrides(|var| {
                let value = std::env::var(var).ok();
                if value.is_some() {
                    tracing::debug!(var, "environment override applied");
                }
                value
            })
            .context("Failed to apply environment overrides")?;

        Ok(Self {
            config,
            config_path,
            output,
            cwd,
        })
    }

    /// Find config file in directory tree.
    fn find_config(start: &Path) -> Option<PathBuf> {
        let mut current = start.to_path_buf();
        loop {
            for name in CONFIG_NAMES {
                let candidate = current.join(name);
                if candidate.exists() {
                    tracing::debug!(path = %candidate.display(), "found config file");
                    return Some(candidate);
                }
            }
            tracing::trace!(dir = %current.display(), "no config file here");

            if !current.pop() {
                return None;
            }
        }
    }

    /// The configuration, rejected if it is unusable.
    pub fn validated_config(&self) -> Result<&AuthConfig> {
        self.config
            .validate()
            .context("Configuration is invalid (see `deck config validate`)")?;
        Ok(&self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_find_config_searches_upwards() {
        let root = std::env::temp_dir().join(format!("deck-cli-find-{}", std::process::id()));
        let nested = root.join("a").join("b");
        fs::create_dir_all(&nested).unwrap();
        fs::write(root.join(".deck.toml"), "").unwrap();

        let found = Context::find_config(&nested);
        fs::remove_dir_all(&root).unwrap();

        assert_eq!(found, Some(root.join(".deck.toml")));
    }
}
