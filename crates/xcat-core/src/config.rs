//! Configuration management for the Xcatcher client
//!
//! Settings are layered: built-in defaults, then an optional TOML file
//! (`.xcat/config.toml` or an explicit path), then environment variables.
//! The CLI applies its own flags on top.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::{IdempotencyKey, Network, Result, XcatError};

pub const ENV_BASE: &str = "XCAT_BASE";
pub const ENV_API_KEY: &str = "XCAT_API_KEY";
pub const ENV_MODE: &str = "XCAT_MODE";
pub const ENV_USERS: &str = "XCAT_USERS";
pub const ENV_IDEMPOTENCY_KEY: &str = "XCAT_IDEMPOTENCY_KEY";
pub const ENV_NETWORK: &str = "X402_NETWORK";
pub const ENV_TXHASH: &str = "X402_TXHASH";
pub const ENV_SIGNATURE: &str = "X402_SIGNATURE";

/// Client configuration passed explicitly into the orchestrator
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct XcatConfig {
    /// Service base URL, without trailing slash
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Bearer credential; never written back out
    #[serde(default, skip_serializing)]
    pub api_key: String,

    /// Crawl mode (`normal` is faster, `deep` is more thorough)
    #[serde(default = "default_mode")]
    pub mode: String,

    /// Accounts to crawl
    #[serde(default = "default_users")]
    pub users: Vec<String>,

    /// Stable key for create retries; generated per run when absent
    #[serde(default)]
    pub idempotency_key: Option<IdempotencyKey>,

    /// Settlement network, validated only when a payment is needed
    #[serde(default = "default_network")]
    pub network: String,

    /// Base transaction hash, available only after paying
    #[serde(default)]
    pub tx_hash: Option<String>,

    /// Solana signature, available only after paying
    #[serde(default)]
    pub signature: Option<String>,

    /// Directory the result file is written to
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,

    /// Result polling
    #[serde(default)]
    pub polling: PollingConfig,
}

/// Result polling parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollingConfig {
    #[serde(default = "default_poll_interval_ms")]
    pub interval_ms: u64,

    #[serde(default = "default_poll_timeout_ms")]
    pub timeout_ms: u64,
}

impl PollingConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

// Default value providers
fn default_base_url() -> String {
    "https://xcatcher.top".to_string()
}

fn default_mode() -> String {
    "normal".to_string()
}

pub fn default_users() -> Vec<String> {
    ["elonmusk", "naval", "balajis", "pmarca", "sama", "a16z"]
        .iter()
        .map(|u| u.to_string())
        .collect()
}

fn default_network() -> String {
    "base".to_string()
}

fn default_poll_interval_ms() -> u64 {
    5_000
}

fn default_poll_timeout_ms() -> u64 {
    900_000
}

fn default_output_dir() -> PathBuf {
    PathBuf::from(".")
}

/// Split a comma-separated user list, trimming whitespace and a leading `@`
pub fn parse_users(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|u| u.trim().trim_start_matches('@').trim())
        .filter(|u| !u.is_empty())
        .map(str::to_string)
        .collect()
}

fn env_var(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

impl XcatConfig {
    /// Load configuration from a TOML file (if any) and the environment
    ///
    /// With `path == None`, `.xcat/config.toml` in the working directory is
    /// used when it exists.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => {
                let default_path = Path::new(".xcat/config.toml");
                if default_path.exists() {
                    Self::from_file(default_path)?
                } else {
                    Self::default()
                }
            }
        };
        config.apply_env();
        Ok(config)
    }

    /// Parse a TOML configuration file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let mut config: Self = toml::from_str(&content)
            .map_err(|e| XcatError::Config(format!("Failed to parse {}: {}", path.display(), e)))?;
        config.base_url = config.base_url.trim_end_matches('/').to_string();
        Ok(config)
    }

    /// Override settings from environment variables
    pub fn apply_env(&mut self) {
        if let Some(base) = env_var(ENV_BASE) {
            self.base_url = base.trim_end_matches('/').to_string();
        }
        if let Some(key) = env_var(ENV_API_KEY) {
            self.api_key = key;
        }
        if let Some(mode) = env_var(ENV_MODE) {
            self.mode = mode.to_lowercase();
        }
        if let Some(users) = env_var(ENV_USERS) {
            let parsed = parse_users(&users);
            if !parsed.is_empty() {
                self.users = parsed;
            }
        }
        if let Some(key) = env_var(ENV_IDEMPOTENCY_KEY) {
            self.idempotency_key = Some(IdempotencyKey::new(key));
        }
        if let Some(network) = env_var(ENV_NETWORK) {
            self.network = network.to_lowercase();
        }
        if let Some(tx_hash) = env_var(ENV_TXHASH) {
            self.tx_hash = Some(tx_hash);
        }
        if let Some(signature) = env_var(ENV_SIGNATURE) {
            self.signature = Some(signature);
        }
    }

    /// Reject configurations the client cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.api_key.trim().is_empty() {
            return Err(XcatError::MissingApiKey);
        }
        if self.polling.interval_ms == 0 || self.polling.timeout_ms == 0 {
            return Err(XcatError::Config(
                "polling interval and timeout must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// Streamable HTTP MCP endpoint
    pub fn mcp_url(&self) -> String {
        format!("{}/mcp", self.base_url)
    }

    /// Account endpoint used for the balance check
    pub fn me_url(&self) -> String {
        format!("{}/api/v1/me", self.base_url)
    }

    /// Proof evidence supplied out-of-band for the given network
    pub fn evidence_for(&self, network: Network) -> Option<&str> {
        let evidence = match network {
            Network::Base => self.tx_hash.as_deref(),
            Network::Solana => self.signature.as_deref(),
        };
        evidence.map(str::trim).filter(|e| !e.is_empty())
    }

    /// Where the result of `task_id` is saved
    pub fn result_path(&self, task_id: crate::TaskId) -> PathBuf {
        self.output_dir.join(task_id.result_file_name())
    }
}

impl Default for XcatConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            api_key: String::new(),
            mode: default_mode(),
            users: default_users(),
            idempotency_key: None,
            network: default_network(),
            tx_hash: None,
            signature: None,
            polling: PollingConfig::default(),
            output_dir: default_output_dir(),
        }
    }
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_poll_interval_ms(),
            timeout_ms: default_poll_timeout_ms(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::TaskId;
    use std::sync::Mutex;

    // Mutex to prevent concurrent env var modifications
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    const ALL_VARS: [&str; 8] = [
        ENV_BASE,
        ENV_API_KEY,
        ENV_MODE,
        ENV_USERS,
        ENV_IDEMPOTENCY_KEY,
        ENV_NETWORK,
        ENV_TXHASH,
        ENV_SIGNATURE,
    ];

    fn with_env_vars<F, R>(vars: &[(&str, &str)], f: F) -> R
    where
        F: FnOnce() -> R,
    {
        let _guard = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());

        let originals: Vec<_> = ALL_VARS.iter().map(|k| (*k, std::env::var(k).ok())).collect();

        for key in ALL_VARS {
            std::env::remove_var(key);
        }
        for (key, value) in vars {
            std::env::set_var(key, value);
        }

        let result = f();

        for (key, original) in originals {
            match original {
                Some(v) => std::env::set_var(key, v),
                None => std::env::remove_var(key),
            }
        }

        result
    }

    #[test]
    fn test_defaults() {
        let config = XcatConfig::default();
        assert_eq!(config.base_url, "https://xcatcher.top");
        assert_eq!(config.mode, "normal");
        assert_eq!(config.network, "base");
        assert_eq!(config.users.len(), 6);
        assert_eq!(config.polling.interval(), Duration::from_secs(5));
        assert_eq!(config.polling.timeout(), Duration::from_secs(900));
        assert_eq!(config.mcp_url(), "https://xcatcher.top/mcp");
        assert_eq!(config.me_url(), "https://xcatcher.top/api/v1/me");
    }

    #[test]
    fn test_parse_users() {
        assert_eq!(parse_users(" @naval, sama ,,@a16z"), vec!["naval", "sama", "a16z"]);
        assert!(parse_users(" , ,").is_empty());
    }

    #[test]
    fn test_apply_env() {
        with_env_vars(
            &[
                (ENV_BASE, "https://example.test/ "),
                (ENV_API_KEY, " xc_live_abc "),
                (ENV_MODE, "DEEP"),
                (ENV_USERS, "@jack, vitalik"),
                (ENV_IDEMPOTENCY_KEY, "idem-1"),
                (ENV_NETWORK, "Solana"),
                (ENV_SIGNATURE, "5sig"),
            ],
            || {
                let mut config = XcatConfig::default();
                config.apply_env();
                assert_eq!(config.base_url, "https://example.test");
                assert_eq!(config.api_key, "xc_live_abc");
                assert_eq!(config.mode, "deep");
                assert_eq!(config.users, vec!["jack", "vitalik"]);
                assert_eq!(config.idempotency_key, Some(IdempotencyKey::new("idem-1")));
                assert_eq!(config.network, "solana");
                assert_eq!(config.evidence_for(Network::Solana), Some("5sig"));
                assert_eq!(config.evidence_for(Network::Base), None);
            },
        );
    }

    #[test]
    fn test_empty_user_list_keeps_defaults() {
        with_env_vars(&[(ENV_USERS, " , ")], || {
            let mut config = XcatConfig::default();
            config.apply_env();
            assert_eq!(config.users, default_users());
        });
    }

    #[test]
    fn test_validate_missing_api_key() {
        let config = XcatConfig::default();
        assert!(matches!(config.validate(), Err(XcatError::MissingApiKey)));
    }

    #[test]
    fn test_validate_polling() {
        let mut config = XcatConfig {
            api_key: "xc_live_abc".to_string(),
            ..XcatConfig::default()
        };
        assert!(config.validate().is_ok());

        config.polling.interval_ms = 0;
        assert!(matches!(config.validate(), Err(XcatError::Config(_))));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
base_url = "https://staging.xcatcher.top/"
mode = "deep"
users = ["naval"]
output_dir = "/tmp/results"

[polling]
interval_ms = 1000
"#,
        )
        .unwrap();

        with_env_vars(&[], || {
            let config = XcatConfig::load(Some(&path)).unwrap();
            assert_eq!(config.base_url, "https://staging.xcatcher.top");
            assert_eq!(config.mode, "deep");
            assert_eq!(config.users, vec!["naval"]);
            assert_eq!(config.polling.interval_ms, 1000);
            assert_eq!(config.polling.timeout_ms, 900_000);
            assert_eq!(
                config.result_path(TaskId(7)),
                PathBuf::from("/tmp/results/task_7.xlsx")
            );
        });
    }

    #[test]
    fn test_load_rejects_bad_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "mode = [").unwrap();
        assert!(matches!(
            XcatConfig::from_file(&path),
            Err(XcatError::Config(_))
        ));
    }

    #[test]
    fn test_api_key_not_serialized() {
        let config = XcatConfig {
            api_key: "xc_live_secret".to_string(),
            ..XcatConfig::default()
        };
        let rendered = toml::to_string_pretty(&config).unwrap();
        assert!(!rendered.contains("xc_live_secret"));
    }
}
