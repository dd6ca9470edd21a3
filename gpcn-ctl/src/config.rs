//! Configuration for gpcn-ctl.
//!
//! Sources, lowest precedence first: built-in defaults, `GPCN_*` environment
//! variables, the YAML file, command-line flags.

use std::fmt;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use config::{Config, Environment, File, FileFormat, Map};
use gpcn_common::{redact, LogFormat};
use gpcn_provisioner::{ApiConfig, PollingConfig};
use serde::Deserialize;
use tracing::debug;

use crate::cli::Args;

/// Environment variable prefix; nested keys use `__`, e.g.
/// `GPCN_POLLING__JOB_TIMEOUT_SECS`.
pub const ENV_PREFIX: &str = "GPCN";

/// Resolved settings.
#[derive(Clone, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Control plane base URL
    pub host: String,
    /// API key sent with every request
    pub api_key: String,
    pub log_level: String,
    pub log_format: LogFormat,
    pub polling: PollingConfig,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            host: String::new(),
            api_key: String::new(),
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            polling: PollingConfig::default(),
        }
    }
}

impl fmt::Debug for Settings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Settings")
            .field("host", &self.host)
            .field("api_key", &redact(&self.api_key))
            .field("log_level", &self.log_level)
            .field("log_format", &self.log_format)
            .field("polling", &self.polling)
            .finish()
    }
}

/// `~/.config/gpcn/ctl.yaml`, when a home directory is known.
pub fn default_config_path() -> Option<PathBuf> {
    std::env::var_os("HOME").map(|home| PathBuf::from(home).join(".config/gpcn/ctl.yaml"))
}

impl Settings {
    /// Layer environment and file sources over the defaults.
    ///
    /// `env` replaces the process environment when given. An explicit `path`
    /// must exist; the default path is optional.
    pub fn load(path: Option<&Path>, env: Option<Map<String, String>>) -> Result<Self> {
        let environment = Environment::with_prefix(ENV_PREFIX)
            .prefix_separator("_")
            .separator("__")
            .try_parsing(true)
            .source(env);

        let mut builder = Config::builder().add_source(environment);
        match path {
            Some(path) => {
                if !path.exists() {
                    bail!("Config file not found: {}", path.display());
                }
                builder = builder.add_source(File::from(path).format(FileFormat::Yaml));
            }
            None => {
                if let Some(default) = default_config_path() {
                    debug!(path = %default.display(), "Checking default config location");
                    builder = builder.add_source(File::from(default).format(FileFormat::Yaml).required(false));
                }
            }
        }

        builder
            .build()
            .context("Failed to read configuration")?
            .try_deserialize()
            .context("Failed to parse configuration")
    }

    /// Apply command-line overrides.
    pub fn with_cli_overrides(mut self, args: &Args) -> Result<Self> {
        if let Some(host) = &args.host {
            self.host = host.clone();
        }
        if let Some(level) = &args.log_level {
            self.log_level = level.clone();
        }
        if let Some(format) = &args.log_format {
            self.log_format = format.parse()?;
        }
        Ok(self)
    }

    /// Fail before any API call when credentials or timings are unusable.
    pub fn validate(&self) -> Result<()> {
        if self.host.trim().is_empty() {
            bail!(
                "GPCN host is not configured: set `host` in the config file, {}_HOST, or --host",
                ENV_PREFIX
            );
        }
        if self.api_key.trim().is_empty() {
            bail!(
                "GPCN API key is not configured: set `api_key` in the config file or {}_API_KEY",
                ENV_PREFIX
            );
        }
        self.polling.validate().context("Invalid polling configuration")
    }

    pub fn api_config(&self) -> ApiConfig {
        ApiConfig::new(self.host.clone(), self.api_key.clone())
            .with_request_timeout(self.polling.request_timeout())
    }
}
