//! Application configuration loaded from environment variables.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::errors::{PondoError, Result};

#[derive(Clone)]
pub struct Config {
    /// Shared admin secret required by `POST /api/admin/login`
    pub admin_key: String,
    /// Port for the REST API server
    pub api_port: u16,
    /// How long an admin session stays valid after login
    pub session_timeout: Duration,
    /// How often expired sessions and stale rate-limit records are swept
    pub sweep_interval: Duration,
    /// Sliding window for counting login attempts
    pub login_window: Duration,
    /// Login attempts allowed per client inside one window
    pub login_max_attempts: usize,
    /// Honour the first `X-Forwarded-For` entry as the client identity
    pub trust_proxy: bool,
    /// Where the funds document lives
    pub storage: StorageConfig,
}

#[derive(Clone, PartialEq, Eq)]
pub enum StorageConfig {
    File {
        path: PathBuf,
    },
    GitHub {
        api_url: String,
        token: String,
        /// `owner/name`
        repo: String,
        branch: String,
        file_path: String,
    },
    Memory,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a config from an arbitrary key lookup (the process environment in
    /// production, a map in tests).
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let admin_key = var("ADMIN_KEY").ok_or_else(|| {
            PondoError::Config("ADMIN_KEY environment variable is required".to_string())
        })?;

        let session_minutes: u64 = parse_or(&var, "SESSION_TIMEOUT_MINUTES", 30)?;
        let sweep_secs: u64 = parse_or(&var, "SESSION_SWEEP_INTERVAL_SECS", 300)?;
        let window_secs: u64 = parse_or(&var, "LOGIN_RATE_WINDOW_SECS", 60)?;
        let login_max_attempts: usize = parse_or(&var, "LOGIN_MAX_ATTEMPTS", 5)?;

        for (key, value) in [
            ("SESSION_TIMEOUT_MINUTES", session_minutes),
            ("SESSION_SWEEP_INTERVAL_SECS", sweep_secs),
            ("LOGIN_RATE_WINDOW_SECS", window_secs),
            ("LOGIN_MAX_ATTEMPTS", login_max_attempts as u64),
        ] {
            if value == 0 {
                return Err(PondoError::Config(format!("{key} must be greater than zero")));
            }
        }

        let storage = match var("STORAGE_BACKEND")
            .unwrap_or_else(|| "file".to_string())
            .to_ascii_lowercase()
            .as_str()
        {
            "file" => StorageConfig::File {
                path: PathBuf::from(
                    var("DATA_FILE").unwrap_or_else(|| "./data/funds.json".to_string()),
                ),
            },
            "github" => {
                let repo = var("GITHUB_REPO").ok_or_else(|| {
                    PondoError::Config("GITHUB_REPO is required for the github backend".to_string())
                })?;
                if repo.split('/').filter(|s| !s.is_empty()).count() != 2 {
                    return Err(PondoError::Config(format!(
                        "GITHUB_REPO must look like owner/name, got {repo:?}"
                    )));
                }
                StorageConfig::GitHub {
                    api_url: var("GITHUB_API_URL")
                        .unwrap_or_else(|| "https://api.github.com".to_string())
                        .trim_end_matches('/')
                        .to_string(),
                    token: var("GITHUB_TOKEN").ok_or_else(|| {
                        PondoError::Config(
                            "GITHUB_TOKEN is required for the github backend".to_string(),
                        )
                    })?,
                    repo,
                    branch: var("GITHUB_BRANCH").unwrap_or_else(|| "main".to_string()),
                    file_path: var("GITHUB_FILE_PATH")
                        .unwrap_or_else(|| "data/funds.json".to_string())
                        .trim_start_matches('/')
                        .to_string(),
                }
            }
            "memory" => StorageConfig::Memory,
            other => {
                return Err(PondoError::Config(format!(
                    "Unknown STORAGE_BACKEND {other:?} (expected file, github or memory)"
                )))
            }
        };

        Ok(Config {
            admin_key,
            api_port: parse_or(&var, "API_PORT", 3000)?,
            session_timeout: Duration::from_secs(session_minutes * 60),
            sweep_interval: Duration::from_secs(sweep_secs),
            login_window: Duration::from_secs(window_secs),
            login_max_attempts,
            trust_proxy: parse_or(&var, "TRUST_PROXY", false)?,
            storage,
        })
    }
}

fn parse_or<T, F>(var: &F, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    match var(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| PondoError::Config(format!("Invalid {key}: {raw:?}"))),
        None => Ok(default),
    }
}

// Secrets never reach the logs.
impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("admin_key", &"<redacted>")
            .field("api_port", &self.api_port)
            .field("session_timeout", &self.session_timeout)
            .field("sweep_interval", &self.sweep_interval)
            .field("login_window", &self.login_window)
            .field("login_max_attempts", &self.login_max_attempts)
            .field("trust_proxy", &self.trust_proxy)
            .field("storage", &self.storage)
            .finish()
    }
}

impl fmt::Debug for StorageConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::File { path } => f.debug_struct("File").field("path", path).finish(),
            Self::GitHub {
                api_url,
                repo,
                branch,
                file_path,
                ..
            } => f
                .debug_struct("GitHub")
                .field("api_url", api_url)
                .field("token", &"<redacted>")
                .field("repo", repo)
                .field("branch", branch)
                .field("file_path", file_path)
                .finish(),
            Self::Memory => f.write_str("Memory"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(pairs: &[(&str, &str)]) -> Result<Config> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| map.get(key).cloned())
    }

    #[test]
    fn defaults_apply_when_only_admin_key_is_set() {
        let config = load(&[("ADMIN_KEY", "s3cret")]).unwrap();
        assert_eq!(config.api_port, 3000);
        assert_eq!(config.session_timeout, Duration::from_secs(30 * 60));
        assert_eq!(config.sweep_interval, Duration::from_secs(300));
        assert_eq!(config.login_window, Duration::from_secs(60));
        assert_eq!(config.login_max_attempts, 5);
        assert!(!config.trust_proxy);
        assert_eq!(
            config.storage,
            StorageConfig::File {
                path: PathBuf::from("./data/funds.json")
            }
        );
    }

    #[test]
    fn admin_key_is_required() {
        assert!(matches!(load(&[]), Err(PondoError::Config(_))));
        assert!(matches!(
            load(&[("ADMIN_KEY", "   ")]),
            Err(PondoError::Config(_))
        ));
    }

    #[test]
    fn github_backend_reads_coordinates() {
        let config = load(&[
            ("ADMIN_KEY", "k"),
            ("STORAGE_BACKEND", "GitHub"),
            ("GITHUB_TOKEN", "ghp_x"),
            ("GITHUB_REPO", "barkada/pondo-data"),
            ("GITHUB_FILE_PATH", "/funds.json"),
            ("GITHUB_API_URL", "http://localhost:9999/"),
        ])
        .unwrap();
        assert_eq!(
            config.storage,
            StorageConfig::GitHub {
                api_url: "http://localhost:9999".to_string(),
                token: "ghp_x".to_string(),
                repo: "barkada/pondo-data".to_string(),
                branch: "main".to_string(),
                file_path: "funds.json".to_string(),
            }
        );
    }

    #[test]
    fn github_backend_rejects_bad_repo() {
        let err = load(&[
            ("ADMIN_KEY", "k"),
            ("STORAGE_BACKEND", "github"),
            ("GITHUB_TOKEN", "t"),
            ("GITHUB_REPO", "just-a-name"),
        ])
        .unwrap_err();
        assert!(matches!(err, PondoError::Config(_)));
    }

    #[test]
    fn invalid_numbers_and_zero_values_are_rejected() {
        assert!(load(&[("ADMIN_KEY", "k"), ("API_PORT", "eighty")]).is_err());
        assert!(load(&[("ADMIN_KEY", "k"), ("LOGIN_MAX_ATTEMPTS", "0")]).is_err());
        assert!(load(&[("ADMIN_KEY", "k"), ("STORAGE_BACKEND", "s3")]).is_err());
    }

    #[test]
    fn debug_output_redacts_secrets() {
        let config = load(&[
            ("ADMIN_KEY", "super-secret-key"),
            ("STORAGE_BACKEND", "github"),
            ("GITHUB_TOKEN", "ghp_token_value"),
            ("GITHUB_REPO", "a/b"),
        ])
        .unwrap();
        let rendered = format!("{config:?}");
        assert!(!rendered.contains("super-secret-key"));
        assert!(!rendered.contains("ghp_token_value"));
    }
}
