//! Launching Chrome with remote debugging enabled.
//!
//! The `start` command is the one place this crate manages the browser
//! process: resolve the requested Chrome variant to an executable, kill any
//! previous instance of that variant, spawn it detached with the
//! remote-debugging flags, and verify the debugging endpoint answers.

use std::io;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::Duration;

use clap::ValueEnum;
use log::{debug, info, warn};
use thiserror::Error;

use crate::config::ToolsConfig;
use crate::connection::{BrowserHandle, ConnectionError};

const VERIFY_ATTEMPTS: u32 = 5;

/// Chrome release channels the `start` command can launch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ChromeVariant {
    #[value(name = "chrome-stable")]
    Stable,
    #[value(name = "chrome-beta")]
    Beta,
    #[value(name = "chrome-dev")]
    Dev,
    #[value(name = "chrome-canary")]
    Canary,
}

impl ChromeVariant {
    /// Human-readable application name.
    pub fn app_name(self) -> &'static str {
        match self {
            ChromeVariant::Stable => "Google Chrome",
            ChromeVariant::Beta => "Google Chrome Beta",
            ChromeVariant::Dev => "Google Chrome Dev",
            ChromeVariant::Canary => "Google Chrome Canary",
        }
    }

    /// Key used for the per-variant user-data directory.
    pub fn dir_key(self) -> &'static str {
        match self {
            ChromeVariant::Stable => "chrome-stable",
            ChromeVariant::Beta => "chrome-beta",
            ChromeVariant::Dev => "chrome-dev",
            ChromeVariant::Canary => "chrome-canary",
        }
    }

    /// Process name to kill before relaunching.
    fn process_name(self) -> &'static str {
        if cfg!(target_os = "macos") {
            self.app_name()
        } else if cfg!(target_os = "windows") {
            "chrome.exe"
        } else {
            "chrome"
        }
    }

    /// Candidate executables, most specific first.
    fn executable_candidates(self) -> Vec<PathBuf> {
        #[cfg(target_os = "macos")]
        {
            let app = self.app_name();
            vec![PathBuf::from(format!(
                "/Applications/{app}.app/Contents/MacOS/{app}"
            ))]
        }

        #[cfg(target_os = "windows")]
        {
            let local = std::env::var("LOCALAPPDATA").unwrap_or_default();
            let programs =
                std::env::var("PROGRAMFILES").unwrap_or_else(|_| r"C:\Program Files".to_string());
            let path = match self {
                ChromeVariant::Stable => {
                    format!(r"{programs}\Google\Chrome\Application\chrome.exe")
                }
                ChromeVariant::Beta => {
                    format!(r"{programs}\Google\Chrome Beta\Application\chrome.exe")
                }
                ChromeVariant::Dev => {
                    format!(r"{local}\Google\Chrome Dev\Application\chrome.exe")
                }
                ChromeVariant::Canary => {
                    format!(r"{local}\Google\Chrome SxS\Application\chrome.exe")
                }
            };
            vec![PathBuf::from(path)]
        }

        #[cfg(not(any(target_os = "macos", target_os = "windows")))]
        {
            let names: &[&str] = match self {
                ChromeVariant::Stable => &["google-chrome", "google-chrome-stable", "chrome"],
                ChromeVariant::Beta => &["google-chrome-beta"],
                ChromeVariant::Dev => &["google-chrome-unstable"],
                ChromeVariant::Canary => &["google-chrome-canary"],
            };
            let mut candidates: Vec<PathBuf> = names
                .iter()
                .filter_map(|name| which::which(name).ok())
                .collect();
            if candidates.is_empty() {
                candidates.push(PathBuf::from(format!("/usr/bin/{}", names[0])));
            }
            candidates
        }
    }
}

/// Errors raised while launching or verifying Chrome.
#[derive(Debug, Error)]
pub enum LaunchError {
    #[error(
        "{app_name} not found (looked at {searched})\n\
         Please install {app_name} or use a different browser variant."
    )]
    NotFound { app_name: String, searched: String },
    #[error("failed to launch browser: {0}")]
    Spawn(#[source] io::Error),
    #[error("could not create user data dir {path}: {source}")]
    UserDataDir {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error(
        "failed to connect after {VERIFY_ATTEMPTS} attempts: {source}\n\
         Browser may have failed to start properly"
    )]
    VerifyFailed {
        #[source]
        source: ConnectionError,
    },
}

/// Outcome of a successful launch, for the caller to report.
#[derive(Debug)]
pub struct Launched {
    pub app_name: String,
    pub executable: PathBuf,
    pub port: u16,
}

/// Launch `variant` (or the executable at `custom_path`) with remote
/// debugging on `config.port`, then verify the endpoint answers.
pub async fn start(
    config: &ToolsConfig,
    variant: ChromeVariant,
    custom_path: Option<&Path>,
) -> Result<Launched, LaunchError> {
    let explicit = explicit_executable(custom_path, config, variant);
    let (executable, app_name, process_name, dir_key) = match explicit {
        Some(path) => {
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| path.display().to_string());
            (path.to_path_buf(), name.clone(), name, "custom".to_string())
        }
        None => {
            let executable = resolve_executable(variant)?;
            (
                executable,
                variant.app_name().to_string(),
                variant.process_name().to_string(),
                variant.dir_key().to_string(),
            )
        }
    };

    kill_existing(&process_name);
    tokio::time::sleep(Duration::from_secs(1)).await;

    let data_dir = user_data_dir(&dir_key);
    std::fs::create_dir_all(&data_dir).map_err(|source| LaunchError::UserDataDir {
        path: data_dir.clone(),
        source,
    })?;

    let mut command = Command::new(&executable);
    command
        .arg(format!("--remote-debugging-port={}", config.port))
        .arg(format!("--user-data-dir={}", data_dir.display()))
        .arg("--no-first-run")
        .arg("--no-default-browser-check")
        .stdout(Stdio::null())
        .stderr(Stdio::null());

    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        command.process_group(0);
    }

    command.spawn().map_err(LaunchError::Spawn)?;
    info!(
        "starting {app_name} with remote debugging on port {}",
        config.port
    );

    verify_connection(config).await?;

    Ok(Launched {
        app_name,
        executable,
        port: config.port,
    })
}

/// Pick an explicitly requested executable, if any. A `--path` flag always
/// wins; the env-configured binary applies only when the default variant was
/// requested, so `--browser chrome-beta` is never hijacked by the
/// environment.
fn explicit_executable<'a>(
    custom_path: Option<&'a Path>,
    config: &'a ToolsConfig,
    variant: ChromeVariant,
) -> Option<&'a Path> {
    if let Some(path) = custom_path {
        return Some(path);
    }
    if variant == ChromeVariant::Stable {
        return config.chrome_executable.as_deref();
    }
    if config.chrome_executable.is_some() {
        info!(
            "ignoring configured chrome executable: {} was requested explicitly",
            variant.app_name()
        );
    }
    None
}

fn resolve_executable(variant: ChromeVariant) -> Result<PathBuf, LaunchError> {
    let candidates = variant.executable_candidates();
    for candidate in &candidates {
        if candidate.exists() || which::which(candidate).is_ok() {
            debug!("resolved {} to {}", variant.app_name(), candidate.display());
            return Ok(candidate.clone());
        }
    }

    let searched = candidates
        .iter()
        .map(|path| path.display().to_string())
        .collect::<Vec<_>>()
        .join(", ");
    Err(LaunchError::NotFound {
        app_name: variant.app_name().to_string(),
        searched,
    })
}

/// Kill any running instance of the target variant. Failures are ignored;
/// a dead or absent process is the desired state either way.
fn kill_existing(process_name: &str) {
    debug!("killing existing '{process_name}' processes");
    let result = if cfg!(target_os = "windows") {
        Command::new("taskkill")
            .args(["/F", "/IM", process_name])
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
    } else {
        Command::new("pkill")
            .args(["-f", process_name])
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
    };
    if let Err(err) = result {
        warn!("could not kill existing browser processes: {err}");
    }
}

/// Per-variant profile directory under the user cache dir, so debugging
/// sessions never touch the default Chrome profile.
fn user_data_dir(dir_key: &str) -> PathBuf {
    let base = dirs::cache_dir().unwrap_or_else(std::env::temp_dir);
    base.join("browser-tools").join(dir_key)
}

async fn verify_connection(config: &ToolsConfig) -> Result<(), LaunchError> {
    let mut last_err = None;
    for attempt in 0..VERIFY_ATTEMPTS {
        tokio::time::sleep(Duration::from_millis(1_000 + u64::from(attempt) * 500)).await;

        match BrowserHandle::connect(config).await {
            Ok(handle) => {
                handle.shutdown().await;
                return Ok(());
            }
            Err(err) => {
                if attempt + 1 < VERIFY_ATTEMPTS {
                    info!("attempt {} failed, retrying...", attempt + 1);
                }
                last_err = Some(err);
            }
        }
    }

    Err(LaunchError::VerifyFailed {
        source: last_err.expect("at least one attempt recorded"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn variant_names_match_cli_values() {
        assert_eq!(ChromeVariant::Stable.dir_key(), "chrome-stable");
        assert_eq!(ChromeVariant::Canary.dir_key(), "chrome-canary");
        assert_eq!(ChromeVariant::Beta.app_name(), "Google Chrome Beta");
    }

    #[test]
    fn candidates_exist_for_every_variant() {
        for variant in [
            ChromeVariant::Stable,
            ChromeVariant::Beta,
            ChromeVariant::Dev,
            ChromeVariant::Canary,
        ] {
            assert!(
                !variant.executable_candidates().is_empty(),
                "{} has no candidates",
                variant.app_name()
            );
        }
    }

    #[test]
    fn candidate_list_has_no_duplicates() {
        for variant in [
            ChromeVariant::Stable,
            ChromeVariant::Beta,
            ChromeVariant::Dev,
            ChromeVariant::Canary,
        ] {
            let candidates = variant.executable_candidates();
            let mut seen = std::collections::HashSet::new();
            for candidate in &candidates {
                assert!(
                    seen.insert(candidate.clone()),
                    "duplicate candidate {} for {}",
                    candidate.display(),
                    variant.app_name()
                );
            }
        }
    }

    #[test]
    fn env_executable_only_applies_to_the_default_variant() {
        let configured = ToolsConfig {
            chrome_executable: Some(PathBuf::from("/opt/chromium/chrome")),
            ..ToolsConfig::default()
        };

        assert_eq!(
            explicit_executable(None, &configured, ChromeVariant::Stable),
            Some(Path::new("/opt/chromium/chrome"))
        );
        assert_eq!(
            explicit_executable(None, &configured, ChromeVariant::Beta),
            None
        );
        assert_eq!(
            explicit_executable(None, &configured, ChromeVariant::Canary),
            None
        );

        // --path beats the environment regardless of variant.
        let flag = Path::new("/usr/local/bin/thorium");
        assert_eq!(
            explicit_executable(Some(flag), &configured, ChromeVariant::Stable),
            Some(flag)
        );
    }

    #[test]
    fn user_data_dir_is_per_variant() {
        let stable = user_data_dir("chrome-stable");
        let canary = user_data_dir("chrome-canary");
        assert_ne!(stable, canary);
        assert!(stable.ends_with("browser-tools/chrome-stable"));
    }

    #[test]
    fn missing_variant_reports_searched_paths() {
        let err = LaunchError::NotFound {
            app_name: "Google Chrome Dev".into(),
            searched: "/usr/bin/google-chrome-unstable".into(),
        };
        let message = err.to_string();
        assert!(message.contains("Google Chrome Dev"));
        assert!(message.contains("/usr/bin/google-chrome-unstable"));
    }
}
