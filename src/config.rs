//! Environment-derived defaults shared by every tool.
//!
//! Each subcommand accepts the same small set of connection knobs. Values can
//! come from CLI flags, from environment variables (with optional `.env`
//! support), or fall back to the defaults Chrome itself uses for remote
//! debugging.

use std::env;
use std::num::ParseIntError;
use std::path::PathBuf;

use dotenvy::dotenv;
use thiserror::Error;

/// Default remote-debugging port (`chrome --remote-debugging-port=9222`).
pub const DEFAULT_PORT: u16 = 9222;

/// Default host the debugging endpoint listens on.
pub const DEFAULT_HOST: &str = "localhost";

/// Default per-action timeout in milliseconds.
pub const DEFAULT_TIMEOUT_MS: u64 = 10_000;

/// Connection defaults shared by all subcommands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolsConfig {
    pub host: String,
    pub port: u16,
    pub timeout_ms: u64,
    /// Explicit Chrome executable, consulted by the `start` command.
    pub chrome_executable: Option<PathBuf>,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        ToolsConfig {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            timeout_ms: DEFAULT_TIMEOUT_MS,
            chrome_executable: None,
        }
    }
}

impl ToolsConfig {
    /// Construct a configuration by reading relevant environment variables,
    /// after loading a `.env` file if present.
    pub fn from_env() -> Result<Self, ConfigError> {
        let _ = dotenv();
        let mut config = ToolsConfig::default();

        if let Some(value) = env_var("BROWSER_TOOLS_HOST") {
            config.host = value;
        }

        if let Some(value) = env_var("BROWSER_TOOLS_PORT") {
            config.port = parse_u16("BROWSER_TOOLS_PORT", &value)?;
        }

        if let Some(value) = env_var("BROWSER_TOOLS_TIMEOUT_MS") {
            config.timeout_ms = parse_u64("BROWSER_TOOLS_TIMEOUT_MS", &value)?;
        }

        if let Some(value) = env_var("BROWSER_TOOLS_CHROME_BIN") {
            config.chrome_executable = Some(PathBuf::from(value));
        }

        Ok(config)
    }

    /// HTTP endpoint of the remote-debugging interface. `chromiumoxide`
    /// resolves the websocket URL from `<debug_url>/json/version`.
    pub fn debug_url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }

    /// Apply a CLI port override, if one was given.
    pub fn with_port(mut self, port: Option<u16>) -> Self {
        if let Some(port) = port {
            self.port = port;
        }
        self
    }
}

/// Errors that can arise while constructing a [`ToolsConfig`].
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid number '{value}' for {field}: {source}")]
    InvalidNumber {
        field: &'static str,
        value: String,
        #[source]
        source: ParseIntError,
    },
}

fn env_var(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn parse_u16(field: &'static str, value: &str) -> Result<u16, ConfigError> {
    value
        .trim()
        .parse::<u16>()
        .map_err(|source| ConfigError::InvalidNumber {
            field,
            value: value.to_string(),
            source,
        })
}

fn parse_u64(field: &'static str, value: &str) -> Result<u64, ConfigError> {
    value
        .trim()
        .parse::<u64>()
        .map_err(|source| ConfigError::InvalidNumber {
            field,
            value: value.to_string(),
            source,
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Mutex, OnceLock};

    fn env_lock() -> &'static Mutex<()> {
        static LOCK: OnceLock<Mutex<()>> = OnceLock::new();
        LOCK.get_or_init(|| Mutex::new(()))
    }

    #[derive(Debug)]
    struct EnvGuard {
        saved: Vec<(String, Option<String>)>,
    }

    impl EnvGuard {
        fn new(vars: &[(&str, Option<&str>)]) -> Self {
            let saved = vars
                .iter()
                .map(|(key, value)| {
                    let original = env::var(key).ok();
                    match value {
                        Some(v) => env::set_var(key, v),
                        None => env::remove_var(key),
                    };
                    ((*key).to_string(), original)
                })
                .collect();
            EnvGuard { saved }
        }
    }

    impl Drop for EnvGuard {
        fn drop(&mut self) {
            for (key, value) in self.saved.drain(..) {
                match value {
                    Some(v) => env::set_var(&key, v),
                    None => env::remove_var(&key),
                }
            }
        }
    }

    fn with_env<F, T>(vars: &[(&str, Option<&str>)], f: F) -> T
    where
        F: FnOnce() -> T,
    {
        let lock = env_lock().lock().expect("env mutex poisoned");
        let guard = EnvGuard::new(vars);
        let result = f();
        drop(guard);
        drop(lock);
        result
    }

    #[test]
    fn defaults_match_chrome_conventions() {
        let vars = [
            ("BROWSER_TOOLS_HOST", None),
            ("BROWSER_TOOLS_PORT", None),
            ("BROWSER_TOOLS_TIMEOUT_MS", None),
            ("BROWSER_TOOLS_CHROME_BIN", None),
        ];
        with_env(&vars, || {
            let config = ToolsConfig::from_env().expect("config from env");
            assert_eq!(config.host, "localhost");
            assert_eq!(config.port, 9222);
            assert_eq!(config.timeout_ms, 10_000);
            assert!(config.chrome_executable.is_none());
            assert_eq!(config.debug_url(), "http://localhost:9222");
        });
    }

    #[test]
    fn from_env_parses_and_normalises_values() {
        let vars = [
            ("BROWSER_TOOLS_HOST", Some("127.0.0.1")),
            ("BROWSER_TOOLS_PORT", Some(" 9333 ")),
            ("BROWSER_TOOLS_TIMEOUT_MS", Some("5000")),
            ("BROWSER_TOOLS_CHROME_BIN", Some("/opt/chrome/chrome")),
        ];
        with_env(&vars, || {
            let config = ToolsConfig::from_env().expect("config from env");
            assert_eq!(config.host, "127.0.0.1");
            assert_eq!(config.port, 9333);
            assert_eq!(config.timeout_ms, 5_000);
            assert_eq!(
                config.chrome_executable.as_deref(),
                Some(std::path::Path::new("/opt/chrome/chrome"))
            );
            assert_eq!(config.debug_url(), "http://127.0.0.1:9333");
        });
    }

    #[test]
    fn invalid_port_reports_field_name() {
        let vars = [("BROWSER_TOOLS_PORT", Some("not-a-port"))];
        with_env(&vars, || {
            let err = ToolsConfig::from_env().expect_err("invalid port");
            assert!(err.to_string().contains("BROWSER_TOOLS_PORT"));
        });
    }

    #[test]
    fn cli_port_override_wins() {
        let config = ToolsConfig::default().with_port(Some(9444));
        assert_eq!(config.port, 9444);
        let config = ToolsConfig::default().with_port(None);
        assert_eq!(config.port, DEFAULT_PORT);
    }
}
