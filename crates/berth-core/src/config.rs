//! Configuration for Berth

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::types::{split_urls, NodeIdentity};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BerthConfig {
    #[serde(default)]
    pub node: NodeConfig,

    #[serde(default)]
    pub join: JoinConfig,

    #[serde(default)]
    pub security: SecurityConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

impl BerthConfig {
    pub fn from_file(path: &str) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| crate::Error::ConfigRead {
            path: path.to_string(),
            source: e,
        })?;

        Ok(toml::from_str(&content)?)
    }

    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env();
        config
    }

    /// Overlay `BERTH_*` environment variables on top of the current values
    pub fn apply_env(&mut self) {
        if let Ok(name) = std::env::var("BERTH_NAME") {
            self.node.name = name;
        }
        if let Ok(dir) = std::env::var("BERTH_DATA_DIR") {
            self.node.data_dir = PathBuf::from(dir);
        }
        if let Ok(urls) = std::env::var("BERTH_ADVERTISE_PEER_URLS") {
            self.node.advertise_peer_urls = split_urls(&urls);
        }
        if let Ok(urls) = std::env::var("BERTH_ADVERTISE_CLIENT_URLS") {
            self.node.advertise_client_urls = split_urls(&urls);
        }
        if let Ok(join) = std::env::var("BERTH_JOIN") {
            self.node.join = split_urls(&join);
        }
        if let Ok(lock) = std::env::var("BERTH_JOIN_LOCK") {
            self.join.lock_name = lock;
        }
        if let Ok(secs) = std::env::var("BERTH_JOIN_DEADLINE_SECS") {
            if let Ok(s) = secs.parse() {
                self.join.deadline_secs = Some(s);
            }
        }
        if std::env::var("BERTH_FAIL_ON_LOCK_ERROR")
            .map(|v| v == "true")
            .unwrap_or(false)
        {
            self.join.fail_on_lock_error = true;
        }
        if let Ok(level) = std::env::var("BERTH_LOG_LEVEL") {
            self.logging.level = level;
        }

        // TLS from environment
        if let Ok(ca) = std::env::var("BERTH_CA_CERT") {
            self.security.ca_cert = Some(PathBuf::from(ca));
        }
        if let Ok(cert) = std::env::var("BERTH_CLIENT_CERT") {
            self.security.client_cert = Some(PathBuf::from(cert));
        }
        if let Ok(key) = std::env::var("BERTH_CLIENT_KEY") {
            self.security.client_key = Some(PathBuf::from(key));
        }
    }

    pub fn validate(&self) -> crate::Result<()> {
        self.join.validate()?;
        self.security.validate()
    }

    /// Identity of the local node as the join protocol sees it
    pub fn identity(&self) -> NodeIdentity {
        NodeIdentity {
            name: self.node.name.clone(),
            peer_urls: self.node.advertise_peer_urls.clone(),
            client_urls: self.node.advertise_client_urls.clone(),
            data_dir: self.node.data_dir.clone(),
            join: self.node.join.clone(),
        }
    }
}

/// Settings describing the local node
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Cluster-unique member name
    pub name: String,
    /// Local data directory
    pub data_dir: PathBuf,
    /// Peer URLs advertised to other members
    pub advertise_peer_urls: Vec<String>,
    /// Client URLs advertised to external callers
    pub advertise_client_urls: Vec<String>,
    /// Client URLs of a running cluster to join
    pub join: Vec<String>,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            name: "default".to_string(),
            data_dir: PathBuf::from("default.berth"),
            advertise_peer_urls: vec!["http://127.0.0.1:2380".to_string()],
            advertise_client_urls: vec!["http://127.0.0.1:2379".to_string()],
            join: Vec::new(),
        }
    }
}

/// Tuning for the join protocol
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct JoinConfig {
    /// Name of the cluster-wide join lock
    pub lock_name: String,
    /// Dial timeout towards the join target
    pub dial_timeout_secs: u64,
    /// Per-request timeout towards the join target
    pub request_timeout_secs: u64,
    /// TTL of the lease backing the lock session
    pub lease_ttl_secs: u64,
    /// Interval between membership polls
    pub poll_interval_ms: u64,
    /// Interval between add-member retries
    pub add_retry_interval_ms: u64,
    /// Polls spent waiting for the new member to show up
    pub confirm_attempts: u32,
    /// Upper bound for the whole reconciliation; unbounded when unset
    pub deadline_secs: Option<u64>,
    /// Fail instead of skipping the join when the lock cannot be taken
    pub fail_on_lock_error: bool,
}

impl Default for JoinConfig {
    fn default() -> Self {
        Self {
            lock_name: crate::DEFAULT_JOIN_LOCK.to_string(),
            dial_timeout_secs: 3,
            request_timeout_secs: 10,
            lease_ttl_secs: 60,
            poll_interval_ms: 500,
            add_retry_interval_ms: 1000,
            confirm_attempts: 20,
            deadline_secs: None,
            fail_on_lock_error: false,
        }
    }
}

impl JoinConfig {
    pub fn dial_timeout(&self) -> Duration {
        Duration::from_secs(self.dial_timeout_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn lease_ttl(&self) -> Duration {
        Duration::from_secs(self.lease_ttl_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn add_retry_interval(&self) -> Duration {
        Duration::from_millis(self.add_retry_interval_ms)
    }

    pub fn deadline(&self) -> Option<Duration> {
        self.deadline_secs.map(Duration::from_secs)
    }

    pub fn validate(&self) -> crate::Result<()> {
        if self.lock_name.is_empty() {
            return Err(crate::Error::InvalidConfig("join.lock_name must not be empty".into()));
        }
        if self.confirm_attempts == 0 {
            return Err(crate::Error::InvalidConfig(
                "join.confirm_attempts must be at least 1".into(),
            ));
        }
        if self.lease_ttl_secs < 2 {
            return Err(crate::Error::InvalidConfig(
                "join.lease_ttl_secs must be at least 2".into(),
            ));
        }
        Ok(())
    }
}

/// TLS settings for talking to the join target
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SecurityConfig {
    /// Verify the server certificate
    pub verify_tls: bool,
    /// CA bundle (PEM) used to verify the cluster
    pub ca_cert: Option<PathBuf>,
    /// Client certificate (PEM) for mTLS
    pub client_cert: Option<PathBuf>,
    /// Client key (PEM) for mTLS
    pub client_key: Option<PathBuf>,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            verify_tls: true,
            ca_cert: None,
            client_cert: None,
            client_key: None,
        }
    }
}

impl SecurityConfig {
    pub fn validate(&self) -> crate::Result<()> {
        if self.client_cert.is_some() != self.client_key.is_some() {
            return Err(crate::Error::InvalidConfig(
                "security.client_cert and security.client_key must be set together".into(),
            ));
        }
        for path in [&self.ca_cert, &self.client_cert, &self.client_key]
            .into_iter()
            .flatten()
        {
            if !path.exists() {
                return Err(crate::Error::InvalidConfig(format!(
                    "File not found: {:?}",
                    path
                )));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = BerthConfig::default();
        assert_eq!(config.join.lock_name, "/berth/join");
        assert_eq!(config.join.confirm_attempts, 20);
        assert_eq!(config.join.poll_interval(), Duration::from_millis(500));
        assert_eq!(config.join.add_retry_interval(), Duration::from_secs(1));
        assert!(config.join.deadline().is_none());
        assert!(!config.join.fail_on_lock_error);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"
[node]
name = "pd-4"
data_dir = "/data/pd-4"
advertise_peer_urls = ["http://10.0.0.4:2380"]
advertise_client_urls = ["http://10.0.0.4:2379"]
join = ["http://10.0.0.1:2379", "http://10.0.0.2:2379"]

[join]
confirm_attempts = 5
deadline_secs = 120
"#
        )
        .unwrap();

        let config = BerthConfig::from_file(file.path().to_str().unwrap()).unwrap();
        assert_eq!(config.node.name, "pd-4");
        assert_eq!(config.join.confirm_attempts, 5);
        assert_eq!(config.join.deadline(), Some(Duration::from_secs(120)));
        // Unset fields keep their defaults.
        assert_eq!(config.join.lock_name, "/berth/join");
        assert_eq!(config.logging.level, "info");

        let identity = config.identity();
        assert_eq!(identity.join.len(), 2);
        assert_eq!(identity.join_marker_path(), PathBuf::from("/data/pd-4/join"));
    }

    #[test]
    fn test_from_file_errors() {
        assert!(matches!(
            BerthConfig::from_file("/nonexistent/berth.toml"),
            Err(crate::Error::ConfigRead { .. })
        ));

        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "[join]\nconfirm_attempts = \"many\"\n").unwrap();
        assert!(matches!(
            BerthConfig::from_file(file.path().to_str().unwrap()),
            Err(crate::Error::ConfigParse(_))
        ));
    }

    #[test]
    fn test_validate_join() {
        let mut config = BerthConfig::default();
        config.join.confirm_attempts = 0;
        assert!(config.validate().is_err());

        let mut config = BerthConfig::default();
        config.security.client_cert = Some(PathBuf::from("/tmp/cert.pem"));
        assert!(config.validate().is_err());
    }
}
