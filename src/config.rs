use dotenvy::dotenv;
use std::env;
use std::path::PathBuf;
use thiserror::Error;

const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_RECORDING_BUFFER: usize = 1024;
const DEFAULT_LOG_LEVEL: &str = "info";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0} missing, it is required")]
    Missing(&'static str),

    #[error("{name} has an invalid value '{value}': {reason}")]
    Invalid {
        name: &'static str,
        value: String,
        reason: String,
    },

    #[error("either DATABASE_URL or FLAGS_FILE must be set")]
    NoFlagSource,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

/// Where flag definitions are read from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlagSource {
    Postgres { url: String },
    File { path: PathBuf },
}

#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub flag_source: FlagSource,
    pub recording_buffer: usize,
    pub log_level: String,
    pub log_format: LogFormat,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        let _ = dotenv().is_ok();
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Build a config from any variable source; `from_env` passes the
    /// process environment.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        let port = var("PORT")
            .ok_or(ConfigError::Missing("PORT"))?
            .parse()
            .map_err(|e: std::num::ParseIntError| ConfigError::Invalid {
                name: "PORT",
                value: var("PORT").unwrap_or_default(),
                reason: e.to_string(),
            })?;

        // A database wins over a snapshot file when both are configured
        let flag_source = match (var("DATABASE_URL"), var("FLAGS_FILE")) {
            (Some(url), _) => FlagSource::Postgres { url },
            (None, Some(path)) => FlagSource::File {
                path: PathBuf::from(path),
            },
            (None, None) => return Err(ConfigError::NoFlagSource),
        };

        let recording_buffer = match var("RECORDING_BUFFER") {
            None => DEFAULT_RECORDING_BUFFER,
            Some(raw) => match raw.parse::<usize>() {
                Ok(n) if n > 0 => n,
                _ => {
                    return Err(ConfigError::Invalid {
                        name: "RECORDING_BUFFER",
                        value: raw,
                        reason: "must be a positive integer".to_string(),
                    })
                }
            },
        };

        let log_format = match var("LOG_FORMAT").as_deref() {
            None | Some("text") => LogFormat::Text,
            Some("json") => LogFormat::Json,
            Some(other) => {
                return Err(ConfigError::Invalid {
                    name: "LOG_FORMAT",
                    value: other.to_string(),
                    reason: "expected 'text' or 'json'".to_string(),
                })
            }
        };

        Ok(Self {
            host: var("HOST").unwrap_or_else(|| DEFAULT_HOST.to_string()),
            port,
            flag_source,
            recording_buffer,
            log_level: var("LOG_LEVEL").unwrap_or_else(|| DEFAULT_LOG_LEVEL.to_string()),
            log_format,
        })
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
