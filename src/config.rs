use std::path::{Path, PathBuf};
use tracing::debug;

use crate::executor::FailurePolicy;
use crate::protocol::{RecognizeOptions, DEFAULT_AUDIO_EXTENSION, DEFAULT_RESULT_EXTENSION};
use crate::worker::RetryPolicy;

/// Environment variable holding the service API key
pub const API_KEY_VAR: &str = "API_KEY";
/// Environment variable holding the service base URL
pub const SERVICE_URL_VAR: &str = "SERVICE_URL";

pub const DEFAULT_CONCURRENCY: usize = 100;

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("cannot read {0}")]
    MissingEnv(&'static str),

    #[error("cannot load environment file {}: {source}", .path.display())]
    EnvFile {
        path: PathBuf,
        #[source]
        source: dotenvy::Error,
    },
}

/// Options for one batch run
#[derive(Debug, Clone)]
pub struct BatchConfig {
    /// Reprocess inputs whose result document already exists
    pub overwrite: bool,
    /// Maximum number of items in flight
    pub concurrency: usize,
    pub retry: RetryPolicy,
    pub failure_policy: FailurePolicy,
    pub audio_extension: String,
    pub result_extension: String,
    pub options: RecognizeOptions,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            overwrite: false,
            concurrency: DEFAULT_CONCURRENCY,
            retry: RetryPolicy::default(),
            failure_policy: FailurePolicy::default(),
            audio_extension: DEFAULT_AUDIO_EXTENSION.to_string(),
            result_extension: DEFAULT_RESULT_EXTENSION.to_string(),
            options: RecognizeOptions::default(),
        }
    }
}

/// Credentials for the recognition service
#[derive(Clone)]
pub struct Credentials {
    pub api_key: String,
    pub service_url: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("api_key", &"<redacted>")
            .field("service_url", &self.service_url)
            .finish()
    }
}

impl Credentials {
    /// Read `API_KEY` and `SERVICE_URL` from the process environment
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let read = |name: &'static str| {
            lookup(name)
                .filter(|value| !value.is_empty())
                .ok_or(ConfigError::MissingEnv(name))
        };

        Ok(Self {
            api_key: read(API_KEY_VAR)?,
            service_url: read(SERVICE_URL_VAR)?,
        })
    }
}

/// Load variables from a dotenv file into the environment
///
/// An explicit `path` must be readable. Without one, a `.env` in the current
/// directory or its ancestors is used if present.
pub fn load_env_file(path: Option<&Path>) -> Result<Option<PathBuf>, ConfigError> {
    match path {
        Some(path) => {
            dotenvy::from_path(path).map_err(|source| ConfigError::EnvFile {
                path: path.to_path_buf(),
                source,
            })?;
            debug!("Loaded environment from {}", path.display());
            Ok(Some(path.to_path_buf()))
        }
        None => match dotenvy::dotenv() {
            Ok(found) => {
                debug!("Loaded environment from {}", found.display());
                Ok(Some(found))
            }
            Err(e) if e.not_found() => Ok(None),
            Err(source) => Err(ConfigError::EnvFile {
                path: PathBuf::from(".env"),
                source,
            }),
        },
    }
}

/// Resolve a directory argument against `cwd`; no value means `cwd` itself
pub fn resolve_dir(value: Option<&Path>, cwd: &Path) -> PathBuf {
    match value {
        Some(dir) if dir.as_os_str().is_empty() => cwd.to_path_buf(),
        Some(dir) if dir.is_absolute() => dir.to_path_buf(),
        Some(dir) => cwd.join(dir),
        None => cwd.to_path_buf(),
    }
}
