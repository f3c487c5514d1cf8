use serde::{Deserialize, Serialize};
use std::fs;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AppConfig {
    pub log_level: String,
    pub log_dir: String,
    pub log_file: String,
    pub use_json: bool,
    pub rotation: String,
    /// PostgreSQL connection URL for the wallet/transaction/transfer store
    pub postgres_url: String,
    #[serde(default)]
    pub ledger: LedgerConfig,
}

/// Commit-retry policy for the atomic commit engine
#[derive(Debug, Serialize, Deserialize, Clone, Copy)]
pub struct LedgerConfig {
    /// Max attempts for a unit of work hit by serialization conflicts
    pub max_commit_attempts: u32,
    /// Base backoff between attempts; doubles per attempt, with jitter
    pub retry_backoff_ms: u64,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            max_commit_attempts: 3,
            retry_backoff_ms: 50,
        }
    }
}

impl AppConfig {
    pub fn load(env: &str) -> Self {
        let config_path = format!("config/{}.yaml", env);
        let content = fs::read_to_string(&config_path)
            .unwrap_or_else(|_| panic!("Failed to read config file: {}", config_path));
        serde_yaml::from_str(&content).expect("Failed to parse config yaml")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ledger_config_defaults_when_absent() {
        let yaml = r#"
log_level: "debug"
log_dir: "./logs"
log_file: "test.log"
use_json: true
rotation: "never"
postgres_url: "postgresql://localhost/ledger"
"#;
        let config: AppConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.ledger.max_commit_attempts, 3);
        assert_eq!(config.ledger.retry_backoff_ms, 50);
    }

    #[test]
    fn test_ledger_config_overrides() {
        let yaml = r#"
log_level: "info"
log_dir: "./logs"
log_file: "test.log"
use_json: false
rotation: "daily"
postgres_url: "postgresql://localhost/ledger"
ledger:
  max_commit_attempts: 5
  retry_backoff_ms: 200
"#;
        let config: AppConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.ledger.max_commit_attempts, 5);
        assert_eq!(config.ledger.retry_backoff_ms, 200);
    }
}
