use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::{Deserialize, Serialize};

/// File name of the public keyring inside the store root.
pub const PUBRING_FILE: &str = ".gopass-pubring.xc";
/// File name of the secret keyring inside the store root.
pub const SECRING_FILE: &str = ".gopass-secring.xc";

/// Top-level configuration (loaded from hoard.toml)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HoardConfig {
    pub log: LogConfig,
    pub store: StoreConfig,
    pub crypto: CryptoConfig,
    pub agent: AgentConfig,
    pub remote: RemoteConfig,
    /// Warn if the config file is group/world-readable (default: true)
    pub config_file_mode_check: bool,
}

impl Default for HoardConfig {
    fn default() -> Self {
        Self {
            log: LogConfig::default(),
            store: StoreConfig::default(),
            crypto: CryptoConfig::default(),
            agent: AgentConfig::default(),
            remote: RemoteConfig::default(),
            config_file_mode_check: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Log level or EnvFilter directive (default: info)
    pub level: String,
    /// Log format: "json" or "text"
    pub format: LogFormat,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Store root holding index.pb, the keyrings and the blob shards
    pub root: PathBuf,
    /// Revisions kept per entry by compaction (default: 256)
    pub max_revisions: usize,
    /// Age after which deleted entries are dropped by compaction (default: 365)
    pub tombstone_ttl_days: u64,
    /// Also re-hash raw blob reads (sync uploads); entry reads and fsck always do
    pub verify_on_read: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum KdfChoice {
    /// argon2id t=4, m=256 MiB, p=4
    #[default]
    #[serde(rename = "argon2id")]
    Argon2id,
    /// argon2id t=1, m=8 MiB, p=1 for constrained devices and tests
    #[serde(rename = "argon2id-light")]
    Argon2idLight,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CryptoConfig {
    /// KDF used when locking newly generated private keys
    pub kdf: KdfChoice,
    /// Fingerprints every secret is encrypted for (the signer is always added)
    pub recipients: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Passphrase cache TTL since last use, in seconds (default: 300)
    pub ttl_secs: u64,
    /// Maximum cached passphrases before LRU eviction (default: 16)
    pub capacity: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    /// Enable remote sync
    pub enabled: bool,
    /// S3-compatible endpoint
    pub endpoint: String,
    /// S3 region (default: us-east-1)
    pub region: String,
    /// Bucket holding the remote index, lock and blobs
    pub bucket: String,
    /// Key prefix inside the bucket
    pub prefix: String,
    /// Refuse plaintext HTTP endpoints
    pub enforce_tls: bool,
    /// Per-call timeout for remote operations
    pub timeout_secs: u64,
    /// Hard ceiling on lock acquisition
    pub lock_timeout_secs: u64,
    /// Attempts for a whole sync round
    pub sync_attempts: u32,
    /// Attempts per blob transfer
    pub blob_attempts: u32,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: LogFormat::Text,
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("~/.local/share/hoard"),
            max_revisions: 256,
            tombstone_ttl_days: 365,
            verify_on_read: false,
        }
    }
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            ttl_secs: 300,
            capacity: 16,
        }
    }
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            endpoint: "http://localhost:9000".into(),
            region: "us-east-1".into(),
            bucket: "hoard".into(),
            prefix: String::new(),
            enforce_tls: false,
            timeout_secs: 30,
            lock_timeout_secs: 10,
            sync_attempts: 3,
            blob_attempts: 3,
        }
    }
}

impl HoardConfig {
    /// Load from `path`; a missing file yields the defaults.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = match std::fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "config file absent, using defaults");
                return Ok(Self::default());
            }
            Err(e) => {
                return Err(e).with_context(|| format!("reading config: {}", path.display()))
            }
        };

        let config: HoardConfig =
            toml::from_str(&raw).with_context(|| format!("parsing config: {}", path.display()))?;

        if config.config_file_mode_check {
            warn_if_readable_by_others(path);
        }
        Ok(config)
    }

    /// Store root with `~` expanded.
    pub fn store_root(&self) -> PathBuf {
        expand_tilde(&self.store.root)
    }

    pub fn pubring_path(&self) -> PathBuf {
        self.store_root().join(PUBRING_FILE)
    }

    pub fn secring_path(&self) -> PathBuf {
        self.store_root().join(SECRING_FILE)
    }
}

#[cfg(unix)]
fn warn_if_readable_by_others(path: &Path) {
    use std::os::unix::fs::PermissionsExt;
    if let Ok(meta) = std::fs::metadata(path) {
        let mode = meta.permissions().mode();
        if mode & 0o077 != 0 {
            tracing::warn!(
                path = %path.display(),
                mode = format!("{:o}", mode & 0o777),
                "config file is accessible by group/others"
            );
        }
    }
}

#[cfg(not(unix))]
fn warn_if_readable_by_others(_path: &Path) {}

/// Expand a leading `~/` to `$HOME`.
pub fn expand_tilde(path: &Path) -> PathBuf {
    let s = path.to_string_lossy();
    if let Some(rest) = s.strip_prefix("~/") {
        let home = std::env::var("HOME").unwrap_or_default();
        PathBuf::from(home).join(rest)
    } else {
        path.to_path_buf()
    }
}

/// Remote credentials from the environment, never from the config file.
///
/// `HOARD_*` wins over the AWS-standard variables.
pub fn remote_credentials() -> Option<(String, String)> {
    let key = std::env::var("HOARD_ACCESS_KEY_ID")
        .or_else(|_| std::env::var("AWS_ACCESS_KEY_ID"))
        .ok()?;
    let secret = std::env::var("HOARD_SECRET_ACCESS_KEY")
        .or_else(|_| std::env::var("AWS_SECRET_ACCESS_KEY"))
        .ok()?;
    Some((key, secret))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_config() {
        let toml_str = r#"
config_file_mode_check = false

[log]
level = "debug"
format = "json"

[store]
root = "/var/lib/hoard"
max_revisions = 32
tombstone_ttl_days = 30
verify_on_read = true

[crypto]
kdf = "argon2id-light"
recipients = ["0123456789abcdef0123456789abcdef01234567"]

[agent]
ttl_secs = 60
capacity = 4

[remote]
enabled = true
endpoint = "https://s3.example.com"
region = "eu-central-1"
bucket = "vault"
prefix = "team/"
enforce_tls = true
timeout_secs = 5
lock_timeout_secs = 20
sync_attempts = 5
blob_attempts = 2
"#;
        let config: HoardConfig = toml::from_str(toml_str).unwrap();

        assert_eq!(config.log.level, "debug");
        assert_eq!(config.log.format, LogFormat::Json);
        assert_eq!(config.store.root, PathBuf::from("/var/lib/hoard"));
        assert_eq!(config.store.max_revisions, 32);
        assert_eq!(config.store.tombstone_ttl_days, 30);
        assert!(config.store.verify_on_read);
        assert_eq!(config.crypto.kdf, KdfChoice::Argon2idLight);
        assert_eq!(config.crypto.recipients.len(), 1);
        assert_eq!(config.agent.capacity, 4);
        assert!(config.remote.enabled);
        assert!(config.remote.enforce_tls);
        assert_eq!(config.remote.prefix, "team/");
        assert_eq!(config.remote.sync_attempts, 5);
        assert!(!config.config_file_mode_check);
    }

    #[test]
    fn test_parse_defaults() {
        let config: HoardConfig = toml::from_str("").unwrap();

        assert_eq!(config.log.level, "info");
        assert_eq!(config.log.format, LogFormat::Text);
        assert_eq!(config.store.max_revisions, 256);
        assert_eq!(config.store.tombstone_ttl_days, 365);
        assert!(!config.store.verify_on_read);
        assert_eq!(config.crypto.kdf, KdfChoice::Argon2id);
        assert!(config.crypto.recipients.is_empty());
        assert_eq!(config.agent.ttl_secs, 300);
        assert_eq!(config.agent.capacity, 16);
        assert!(!config.remote.enabled);
        assert_eq!(config.remote.bucket, "hoard");
        assert_eq!(config.remote.lock_timeout_secs, 10);
        assert_eq!(config.remote.sync_attempts, 3);
        assert!(config.config_file_mode_check);
    }

    #[test]
    fn test_default_matches_empty_file() {
        let parsed: HoardConfig = toml::from_str("").unwrap();
        let built = HoardConfig::default();
        assert!(built.config_file_mode_check);
        assert_eq!(
            toml::to_string(&built).unwrap(),
            toml::to_string(&parsed).unwrap()
        );
    }

    #[test]
    fn test_parse_partial_config() {
        let toml_str = r#"
[remote]
endpoint = "http://192.168.1.100:9000"
"#;
        let config: HoardConfig = toml::from_str(toml_str).unwrap();

        // Overridden
        assert_eq!(config.remote.endpoint, "http://192.168.1.100:9000");
        // Defaults
        assert_eq!(config.remote.region, "us-east-1");
        assert_eq!(config.remote.timeout_secs, 30);
        assert_eq!(config.store.max_revisions, 256);
    }

    #[test]
    fn test_serialize_roundtrip() {
        let config = HoardConfig::default();
        let toml_str = toml::to_string(&config).unwrap();
        let parsed: HoardConfig = toml::from_str(&toml_str).unwrap();

        assert_eq!(config.store.root, parsed.store.root);
        assert_eq!(config.remote.endpoint, parsed.remote.endpoint);
        assert_eq!(config.crypto.kdf, parsed.crypto.kdf);
        assert_eq!(config.log.format, parsed.log.format);
    }

    #[test]
    fn test_load_missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = HoardConfig::load(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(config.agent.capacity, 16);
    }

    #[test]
    fn test_load_rejects_invalid_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hoard.toml");
        std::fs::write(&path, "[store\nroot = 1").unwrap();
        assert!(HoardConfig::load(&path).is_err());
    }

    #[test]
    fn test_ring_paths_under_root() {
        let mut config = HoardConfig::default();
        config.store.root = PathBuf::from("/srv/hoard");
        assert_eq!(
            config.pubring_path(),
            PathBuf::from("/srv/hoard/.gopass-pubring.xc")
        );
        assert_eq!(
            config.secring_path(),
            PathBuf::from("/srv/hoard/.gopass-secring.xc")
        );
    }

    #[test]
    fn test_expand_tilde() {
        let expanded = expand_tilde(Path::new("~/.local/share/hoard"));
        assert!(!expanded.to_string_lossy().starts_with("~/"));
        assert_eq!(expand_tilde(Path::new("/abs")), PathBuf::from("/abs"));
    }
}
