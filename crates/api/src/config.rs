use std::path::PathBuf;
use std::time::Duration;

use scripter_core::{BackendRegistry, BackendSettings, CoreError, ScripterOptions};

/// Server configuration loaded from environment variables.
///
/// All fields have defaults suitable for local development.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address (default: `0.0.0.0`).
    pub host: String,
    /// Bind port (default: `4567`).
    pub port: u16,
    /// Allowed CORS origins, parsed from comma-separated `CORS_ORIGINS`.
    pub cors_origins: Vec<String>,
    /// HTTP request timeout in seconds (default: `30`).
    pub request_timeout_secs: u64,
    /// Directory holding `scripts/` and `sandboxes/`.
    pub scripter_home: PathBuf,
    /// Host search path shared by every sandbox as its parent.
    pub host_path: Vec<PathBuf>,
    /// Root for `bundle:` artifact locations.
    pub bundle_dir: Option<PathBuf>,
    /// Execution backends enabled at startup.
    pub languages: Vec<String>,
    /// Wall-clock limit for subprocess backends, in seconds.
    pub exec_timeout_secs: u64,
    pub python_bin: String,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{var} must be a valid {expected}, got '{value}'")]
    Invalid {
        var: &'static str,
        expected: &'static str,
        value: String,
    },
}

impl ServerConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                      | Default                 |
    /// |------------------------------|-------------------------|
    /// | `HOST`                       | `0.0.0.0`               |
    /// | `PORT`                       | `4567`                  |
    /// | `CORS_ORIGINS`               | `http://localhost:5173` |
    /// | `REQUEST_TIMEOUT_SECS`       | `30`                    |
    /// | `SCRIPTER_HOME`              | `$HOME/scripter`        |
    /// | `SCRIPTER_HOST_PATH`         | empty                   |
    /// | `SCRIPTER_BUNDLE_DIR`        | unset                   |
    /// | `SCRIPTER_LANGUAGES`         | `expr,shell,python`     |
    /// | `SCRIPTER_EXEC_TIMEOUT_SECS` | `30`                    |
    /// | `SCRIPTER_PYTHON_BIN`        | `python3`               |
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Same as [`from_env`](Self::from_env) over an arbitrary variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let var = |name: &str, default: &str| lookup(name).unwrap_or_else(|| default.to_string());

        let host = var("HOST", "0.0.0.0");
        let port = parse("PORT", "u16", var("PORT", "4567"))?;
        let cors_origins = split_list(&var("CORS_ORIGINS", "http://localhost:5173"), ',');
        let request_timeout_secs = parse(
            "REQUEST_TIMEOUT_SECS",
            "u64",
            var("REQUEST_TIMEOUT_SECS", "30"),
        )?;

        let scripter_home = lookup("SCRIPTER_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|| {
                lookup("HOME")
                    .map(PathBuf::from)
                    .unwrap_or_else(|| PathBuf::from("."))
                    .join("scripter")
            });
        let host_path = split_list(&var("SCRIPTER_HOST_PATH", ""), ':')
            .into_iter()
            .map(PathBuf::from)
            .collect();
        let bundle_dir = lookup("SCRIPTER_BUNDLE_DIR")
            .filter(|dir| !dir.trim().is_empty())
            .map(PathBuf::from);
        let languages = split_list(&var("SCRIPTER_LANGUAGES", "expr,shell,python"), ',');
        let exec_timeout_secs = parse(
            "SCRIPTER_EXEC_TIMEOUT_SECS",
            "u64",
            var("SCRIPTER_EXEC_TIMEOUT_SECS", "30"),
        )?;
        let python_bin = var("SCRIPTER_PYTHON_BIN", "python3");

        Ok(Self {
            host,
            port,
            cors_origins,
            request_timeout_secs,
            scripter_home,
            host_path,
            bundle_dir,
            languages,
            exec_timeout_secs,
            python_bin,
        })
    }

    /// Orchestrator options derived from this configuration.
    pub fn scripter_options(&self) -> Result<ScripterOptions, CoreError> {
        let settings = BackendSettings {
            timeout: Duration::from_secs(self.exec_timeout_secs),
            python_bin: self.python_bin.clone(),
        };
        let backends = BackendRegistry::from_names(&self.languages, &settings)?;

        let mut options = ScripterOptions::new(&self.scripter_home)
            .host_search_path(self.host_path.clone())
            .backends(backends)
            .warm_up(true);
        if let Some(dir) = &self.bundle_dir {
            options = options.bundle_dir(dir);
        }
        Ok(options)
    }
}

fn parse<T: std::str::FromStr>(
    var: &'static str,
    expected: &'static str,
    value: String,
) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::Invalid {
        var,
        expected,
        value,
    })
}

fn split_list(value: &str, separator: char) -> Vec<String> {
    value
        .split(separator)
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
