//! fedpsi configuration file handling
//!
//! Provides default configuration generation and loading for the `fedpsi`
//! operator CLI. Configuration files are TOML.
//!
//! ## Sections
//!
//! - `[session]`: job key, per-round deadline, attempt number
//! - `[algorithm]`: PSI variant and its tuning
//! - `[store]`: result store binding (`psi_writer_id`) and output directory
//! - `[retry]`: persistence retry policy
//! - `[logging]`: log level (overridden by `RUST_LOG`)
//! - `[[parties]]`: participants of a local simulation and their item files

use fedpsi::algorithm::AlgorithmConfig;
use fedpsi::session::retry::duration_str;
use fedpsi::session::{RetryPolicy, SessionSettings, DEFAULT_ROUND_TIMEOUT};
use fedpsi::store::is_safe_file_stem;
use fedpsi::types::{ParticipantId, SessionId};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default log level
const DEFAULT_LOG_LEVEL: &str = "info";

/// Default result store component id
pub const DEFAULT_PSI_WRITER_ID: &str = "file_writer";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PsiConfig {
    pub session: SessionSection,

    #[serde(default)]
    pub algorithm: AlgorithmConfig,

    pub store: StoreSection,

    #[serde(default)]
    pub retry: RetryPolicy,

    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub parties: Vec<PartyConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSection {
    /// Session (job) key shared by all participants
    pub id: SessionId,

    /// Deadline for each exchange round
    #[serde(default = "default_round_timeout", with = "duration_str")]
    pub round_timeout: Duration,

    /// Attempt number; bump when re-running after a timeout
    #[serde(default)]
    pub attempt: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreSection {
    /// Component id the result store is registered under
    #[serde(default = "default_psi_writer_id")]
    pub psi_writer_id: String,

    /// Results are written to `<result_dir>/<party>/<session>.json`
    pub result_dir: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartyConfig {
    /// Participant name
    pub name: String,

    /// Newline-delimited identifier file; relative paths are resolved
    /// against the config file's directory
    pub items: PathBuf,
}

fn default_round_timeout() -> Duration {
    DEFAULT_ROUND_TIMEOUT
}

fn default_psi_writer_id() -> String {
    DEFAULT_PSI_WRITER_ID.to_string()
}

fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: DEFAULT_LOG_LEVEL.to_string(),
        }
    }
}

impl PsiConfig {
    /// Create a new configuration writing results under `result_dir`
    pub fn new(session: SessionId, result_dir: PathBuf) -> Self {
        Self {
            session: SessionSection {
                id: session,
                round_timeout: DEFAULT_ROUND_TIMEOUT,
                attempt: 0,
            },
            algorithm: AlgorithmConfig::default(),
            store: StoreSection {
                psi_writer_id: default_psi_writer_id(),
                result_dir,
            },
            retry: RetryPolicy::default(),
            logging: LoggingConfig::default(),
            parties: Vec::new(),
        }
    }

    /// Load configuration from a TOML file
    pub fn load(path: &Path) -> Result<Self, Box<dyn std::error::Error>> {
        let contents = fs::read_to_string(path)
            .map_err(|e| format!("Failed to read config file '{}': {}", path.display(), e))?;

        let config: PsiConfig = toml::from_str(&contents)
            .map_err(|e| format!("Failed to parse config file '{}': {}", path.display(), e))?;

        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn save(&self, path: &Path) -> Result<(), Box<dyn std::error::Error>> {
        let contents = toml::to_string_pretty(self)
            .map_err(|e| format!("Failed to serialize config: {}", e))?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| format!("Failed to create config directory: {}", e))?;
        }

        fs::write(path, contents)
            .map_err(|e| format!("Failed to write config file '{}': {}", path.display(), e))?;

        Ok(())
    }

    /// Check the parts serde cannot: party names and tuning ranges
    pub fn validate(&self) -> Result<(), Box<dyn std::error::Error>> {
        if self.session.round_timeout.is_zero() {
            return Err("session.round_timeout must be positive".into());
        }
        if self.retry.max_attempts == 0 {
            return Err("retry.max_attempts must be at least 1".into());
        }
        if self.store.psi_writer_id.trim().is_empty() {
            return Err("store.psi_writer_id must not be empty".into());
        }

        let mut names = HashSet::new();
        for party in &self.parties {
            if party.name.trim().is_empty() {
                return Err("party name must not be empty".into());
            }
            // Party names become result directory names
            if !is_safe_file_stem(&party.name) {
                return Err(format!(
                    "party name '{}' may only use letters, digits, '-', '_' and '.', and must not start with '.'",
                    party.name
                )
                .into());
            }
            if !names.insert(party.name.as_str()) {
                return Err(format!("duplicate party '{}'", party.name).into());
            }
        }
        Ok(())
    }

    pub fn party(&self, name: &str) -> Option<&PartyConfig> {
        self.parties.iter().find(|p| p.name == name)
    }

    /// Session settings for `party`, peering with every other party
    pub fn session_settings(&self, party: &str) -> SessionSettings {
        let peers = self
            .parties
            .iter()
            .filter(|p| p.name != party)
            .map(|p| ParticipantId::new(p.name.clone()))
            .collect();

        SessionSettings::new(self.session.id.clone(), peers)
            .with_algorithm(self.algorithm.clone())
            .with_round_timeout(self.session.round_timeout)
            .with_retry(self.retry.clone())
            .with_attempt(self.session.attempt)
    }

    /// Result directory of one party
    pub fn party_result_dir(&self, party: &str) -> PathBuf {
        self.store.result_dir.join(party)
    }

    /// Generate default configuration content as a string with comments
    pub fn generate_default_toml(session: &SessionId, result_dir: &Path) -> String {
        format!(
            r#"# fedpsi configuration
#
# Each party learns only the identifiers every party holds. Item files never
# leave their owner in cleartext; only masked values are exchanged.

[session]
# Session (job) key shared by all participants
id = "{session}"

# Deadline for each exchange round ("500ms", "30s", "2m")
round_timeout = "30s"

# Bump after a timeout so frames from the failed attempt are ignored
attempt = 0

[algorithm]
# "dh"    - Diffie-Hellman double masking, exact
# "bloom" - DH masking with a Bloom filter reply; no false negatives,
#           false positives bounded by false_positive_rate
kind = "dh"
false_positive_rate = 1e-6

[store]
# Component id the result store is registered under
psi_writer_id = "{writer}"

# Results land in <result_dir>/<party>/<session>.json
result_dir = "{result_dir}"

[retry]
# Persistence retry policy (transient store errors only)
max_attempts = 3
base_delay = "200ms"
max_delay = "10s"

[logging]
# Log level: trace, debug, info, warn, error (RUST_LOG takes precedence)
level = "info"

# Parties of a local simulation (`fedpsi run`). Item files hold one
# identifier per line; blank lines and '#' comments are ignored.
# [[parties]]
# name = "site-1"
# items = "site-1.txt"
#
# [[parties]]
# name = "site-2"
# items = "site-2.txt"
"#,
            session = session,
            writer = DEFAULT_PSI_WRITER_ID,
            result_dir = result_dir.display()
        )
    }

    /// Create and save a default configuration file
    pub fn create_default(
        config_path: &Path,
        session: &SessionId,
        result_dir: &Path,
    ) -> Result<(), Box<dyn std::error::Error>> {
        let contents = Self::generate_default_toml(session, result_dir);

        if let Some(parent) = config_path.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| format!("Failed to create config directory: {}", e))?;
        }

        fs::write(config_path, contents).map_err(|e| {
            format!(
                "Failed to write config file '{}': {}",
                config_path.display(),
                e
            )
        })?;

        Ok(())
    }
}

/// Resolve an item path against the config file's directory
pub fn resolve_relative(config_path: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        return path.to_path_buf();
    }
    config_path
        .parent()
        .unwrap_or_else(|| Path::new("."))
        .join(path)
}

/// Get the default data directory
pub fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("fedpsi")
}

/// Get the default config file path
pub fn default_config_path() -> PathBuf {
    default_data_dir().join("config.toml")
}

/// Get the default result directory
pub fn default_result_dir() -> PathBuf {
    default_data_dir().join("results")
}

#[cfg(test)]
mod tests {
    use super::*;
    use fedpsi::algorithm::AlgorithmKind;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = PsiConfig::new(SessionId::from("job-1"), PathBuf::from("/data/results"));

        assert_eq!(config.session.round_timeout, DEFAULT_ROUND_TIMEOUT);
        assert_eq!(config.store.psi_writer_id, "file_writer");
        assert_eq!(config.algorithm.kind, AlgorithmKind::DhDoubleMask);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_save_and_load_config() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("config.toml");

        let mut config = PsiConfig::new(SessionId::from("job-1"), PathBuf::from("/data/results"));
        config.parties.push(PartyConfig {
            name: "site-1".to_string(),
            items: PathBuf::from("site-1.txt"),
        });
        config.save(&config_path).unwrap();

        let loaded = PsiConfig::load(&config_path).unwrap();
        assert_eq!(loaded.session.id, SessionId::from("job-1"));
        assert_eq!(loaded.session.round_timeout, DEFAULT_ROUND_TIMEOUT);
        assert_eq!(loaded.parties, config.parties);
    }

    #[test]
    fn test_create_default_config() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("config.toml");
        let result_dir = temp_dir.path().join("results");

        PsiConfig::create_default(&config_path, &SessionId::from("job-9"), &result_dir).unwrap();
        assert!(config_path.exists());

        let config = PsiConfig::load(&config_path).unwrap();
        assert_eq!(config.session.id, SessionId::from("job-9"));
        assert_eq!(config.store.result_dir, result_dir);
        assert_eq!(config.retry.base_delay, Duration::from_millis(200));
        assert!(config.parties.is_empty());
        config.validate().unwrap();
    }

    #[test]
    fn test_generate_default_toml() {
        let toml = PsiConfig::generate_default_toml(
            &SessionId::from("job-1"),
            Path::new("/data/fedpsi/results"),
        );

        assert!(toml.contains("id = \"job-1\""));
        assert!(toml.contains("psi_writer_id = \"file_writer\""));
        assert!(toml.contains("result_dir = \"/data/fedpsi/results\""));
        assert!(toml.contains("kind = \"dh\""));
    }

    #[test]
    fn test_load_config_with_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("config.toml");

        let minimal_config = r#"
[session]
id = "job-2"

[store]
result_dir = "/tmp/results"
"#;
        fs::write(&config_path, minimal_config).unwrap();

        let config = PsiConfig::load(&config_path).unwrap();
        assert_eq!(config.session.round_timeout, DEFAULT_ROUND_TIMEOUT);
        assert_eq!(config.session.attempt, 0);
        assert_eq!(config.store.psi_writer_id, "file_writer");
        assert_eq!(config.retry, RetryPolicy::default());
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_bloom_algorithm_section() {
        let toml = r#"
[session]
id = "job-3"
round_timeout = "2s"

[algorithm]
kind = "bloom"
false_positive_rate = 0.001

[store]
result_dir = "/tmp/results"
"#;
        let config: PsiConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.algorithm.kind, AlgorithmKind::BloomFilter);
        assert_eq!(config.algorithm.false_positive_rate, 0.001);
        assert_eq!(config.session.round_timeout, Duration::from_secs(2));
    }

    #[test]
    fn test_validate_rejects_duplicate_parties() {
        let mut config = PsiConfig::new(SessionId::from("job-1"), PathBuf::from("/tmp"));
        for _ in 0..2 {
            config.parties.push(PartyConfig {
                name: "site-1".to_string(),
                items: PathBuf::from("a.txt"),
            });
        }
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_party_names_outside_result_dir() {
        for name in ["../x", "a/b", ".hidden", "site 1"] {
            let mut config = PsiConfig::new(SessionId::from("job-1"), PathBuf::from("/tmp"));
            config.parties.push(PartyConfig {
                name: name.to_string(),
                items: PathBuf::from("a.txt"),
            });
            let err = config.validate().unwrap_err();
            assert!(err.to_string().contains(name), "{}", err);
        }

        let mut config = PsiConfig::new(SessionId::from("job-1"), PathBuf::from("/tmp"));
        config.parties.push(PartyConfig {
            name: "site_1.eu".to_string(),
            items: PathBuf::from("a.txt"),
        });
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_session_settings_peers_exclude_self() {
        let mut config = PsiConfig::new(SessionId::from("job-1"), PathBuf::from("/tmp"));
        for name in ["site-1", "site-2", "site-3"] {
            config.parties.push(PartyConfig {
                name: name.to_string(),
                items: PathBuf::from(format!("{}.txt", name)),
            });
        }

        let settings = config.session_settings("site-2");
        assert_eq!(
            settings.peers,
            vec![ParticipantId::from("site-1"), ParticipantId::from("site-3")]
        );
    }

    #[test]
    fn test_resolve_relative() {
        let config_path = Path::new("/etc/fedpsi/config.toml");
        assert_eq!(
            resolve_relative(config_path, Path::new("site-1.txt")),
            PathBuf::from("/etc/fedpsi/site-1.txt")
        );
        assert_eq!(
            resolve_relative(config_path, Path::new("/abs/items.txt")),
            PathBuf::from("/abs/items.txt")
        );
    }
}
