//! Environment configuration shared by the CLI and the API

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::convert::{ExternalConverter, DEFAULT_CONVERTER_PROGRAM, DEFAULT_CONVERTER_TIMEOUT};
use crate::history::DEFAULT_HISTORY_DIR;
use crate::loader::{LegacyPolicy, LoaderOptions, DEFAULT_SHEET};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid LEGACY_FORMATS: {0}")]
    LegacyFormats(String),
}

#[derive(Debug, Clone)]
pub struct Config {
    pub history_dir: PathBuf,
    pub sheet_name: String,
    pub default_gerencia: String,
    pub default_user: String,
    pub legacy: LegacyPolicy,
    pub converter_program: String,
    pub converter_timeout: Duration,
    pub api_bind: String,
    pub max_upload_bytes: usize,
}

impl Config {
    /// Load `.env` if present, then read the process environment
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup; unset keys take their defaults
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_string());

        let legacy = var("LEGACY_FORMATS", "convert")
            .parse()
            .map_err(ConfigError::LegacyFormats)?;

        Ok(Self {
            history_dir: PathBuf::from(var("HISTORY_DIR", DEFAULT_HISTORY_DIR)),
            sheet_name: var("SHEET_NAME", DEFAULT_SHEET),
            default_gerencia: var("DEFAULT_GERENCIA", "ENERGIA"),
            default_user: var("DEFAULT_USER", "Administrador"),
            legacy,
            converter_program: var("CONVERTER_PROGRAM", DEFAULT_CONVERTER_PROGRAM),
            converter_timeout: Duration::from_secs(
                var("CONVERTER_TIMEOUT_SECS", "60")
                    .parse()
                    .unwrap_or(DEFAULT_CONVERTER_TIMEOUT.as_secs()),
            ),
            api_bind: var("API_BIND", "127.0.0.1:8080"),
            max_upload_bytes: var("MAX_UPLOAD_MB", "200")
                .parse::<usize>()
                .unwrap_or(200)
                .saturating_mul(1024 * 1024),
        })
    }

    pub fn loader_options(&self) -> LoaderOptions {
        LoaderOptions {
            legacy: self.legacy,
            converter: ExternalConverter::soffice(&self.converter_program, self.converter_timeout),
        }
    }
}
