use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::{fs, path::Path, path::PathBuf};

pub const DEFAULT_SSH_CMD: &str = "ssh";
pub const DEFAULT_SSH_ARGS: &str = "";
pub const DEFAULT_HELPERTASK_ARGS: &str = "";

const SSH_CMD_KEY: &str = "ssh_cmd=";
const SSH_ARGS_KEY: &str = "ssh_args=";
const HELPERTASK_ARGS_KEY: &str = "helpertask_args=";

/// Parameters handed to the tunnel helper.
///
/// Built once when the plugin loads and passed by reference afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PluginConfig {
    pub ssh_cmd: String,
    pub ssh_args: String,
    pub helpertask_args: String,
}

impl Default for PluginConfig {
    fn default() -> Self {
        PluginConfig {
            ssh_cmd: DEFAULT_SSH_CMD.to_string(),
            ssh_args: DEFAULT_SSH_ARGS.to_string(),
            helpertask_args: DEFAULT_HELPERTASK_ARGS.to_string(),
        }
    }
}

impl PluginConfig {
    /// Compiled-in defaults overridden by `key=value` plugin tokens.
    pub fn load<I, S>(tokens: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self::default().with_tokens(tokens)
    }

    /// Apply plugin tokens on top of `self`. A `|` in a value stands for a
    /// space. Unknown tokens are skipped and the last occurrence of a key wins.
    pub fn with_tokens<I, S>(mut self, tokens: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for token in tokens {
            let token = token.as_ref();
            if let Some(value) = token.strip_prefix(SSH_CMD_KEY) {
                self.ssh_cmd = unpipe(value);
            } else if let Some(value) = token.strip_prefix(SSH_ARGS_KEY) {
                self.ssh_args = unpipe(value);
            } else if let Some(value) = token.strip_prefix(HELPERTASK_ARGS_KEY) {
                self.helpertask_args = unpipe(value);
            } else {
                tracing::debug!("ignoring unrecognized plugin argument '{}'", token);
            }
        }
        self
    }

    /// Read the JSON config file. A missing file at the default location
    /// yields the defaults; an explicit path must exist.
    pub fn from_file(path: Option<&Path>) -> Result<Self> {
        let config_path = match path {
            Some(p) => p.to_path_buf(),
            None => {
                let default_path = Self::config_path()?;
                if !default_path.exists() {
                    return Ok(PluginConfig::default());
                }
                default_path
            }
        };

        let contents = fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config file {}", config_path.display()))?;
        let config: PluginConfig = serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse config file {}", config_path.display()))?;

        tracing::debug!("loaded plugin config from {}", config_path.display());
        Ok(config)
    }

    pub fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .context("Could not determine config directory")?
            .join("stunnel");

        Ok(config_dir.join("config.json"))
    }
}

fn unpipe(value: &str) -> String {
    value.replace('|', " ")
}
