//! Local node identity

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use url::Url;

use super::member::same_endpoints;
use crate::error::{Error, Result};

/// Who this node is and which cluster it was told to join.
///
/// Built once from configuration and immutable for the duration of a join attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeIdentity {
    /// Cluster-unique member name
    pub name: String,
    /// Advertised URLs for inter-member traffic
    pub peer_urls: Vec<String>,
    /// Advertised URLs for external callers
    pub client_urls: Vec<String>,
    /// Local data directory
    pub data_dir: PathBuf,
    /// Client endpoints of an already-running cluster; empty means "do not join"
    pub join: Vec<String>,
}

impl NodeIdentity {
    pub fn new(name: impl Into<String>, data_dir: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            peer_urls: Vec::new(),
            client_urls: Vec::new(),
            data_dir: data_dir.into(),
            join: Vec::new(),
        }
    }

    pub fn with_peer_urls(mut self, urls: Vec<String>) -> Self {
        self.peer_urls = urls;
        self
    }

    pub fn with_client_urls(mut self, urls: Vec<String>) -> Self {
        self.client_urls = urls;
        self
    }

    pub fn with_join(mut self, join: Vec<String>) -> Self {
        self.join = join;
        self
    }

    pub fn has_join_target(&self) -> bool {
        !self.join.is_empty()
    }

    /// The join target points back at this node's own client endpoints
    pub fn is_self_join(&self) -> bool {
        self.has_join_target() && same_endpoints(&self.join, &self.client_urls)
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    /// Path of the persisted join marker
    pub fn join_marker_path(&self) -> PathBuf {
        self.data_dir.join(crate::JOIN_MARKER_FILE)
    }

    /// Directory the consensus engine replicates its own state into
    pub fn member_dir(&self) -> PathBuf {
        self.data_dir.join(crate::MEMBER_DATA_DIR)
    }

    /// Check everything a registration attempt relies on
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(Error::EmptyNodeName);
        }
        if self.peer_urls.is_empty() {
            return Err(Error::NoPeerUrls);
        }
        for url in self
            .peer_urls
            .iter()
            .chain(self.client_urls.iter())
            .chain(self.join.iter())
        {
            validate_url(url)?;
        }
        Ok(())
    }
}

fn validate_url(raw: &str) -> Result<()> {
    let parsed = Url::parse(raw).map_err(|e| Error::InvalidUrl {
        url: raw.to_string(),
        reason: e.to_string(),
    })?;
    match parsed.scheme() {
        "http" | "https" | "unix" | "unixs" => Ok(()),
        other => Err(Error::InvalidUrl {
            url: raw.to_string(),
            reason: format!("unsupported scheme '{}'", other),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity() -> NodeIdentity {
        NodeIdentity::new("pd-1", "/var/lib/berth")
            .with_peer_urls(vec!["http://10.0.0.1:2380".to_string()])
            .with_client_urls(vec![
                "http://10.0.0.1:2379".to_string(),
                "http://127.0.0.1:2379".to_string(),
            ])
    }

    #[test]
    fn test_self_join_detection() {
        let node = identity();
        assert!(!node.is_self_join());

        let node = node.with_join(vec![
            "http://127.0.0.1:2379".to_string(),
            "http://10.0.0.1:2379".to_string(),
        ]);
        assert!(node.is_self_join());

        let node = identity().with_join(vec!["http://10.0.0.2:2379".to_string()]);
        assert!(!node.is_self_join());
    }

    #[test]
    fn test_paths() {
        let node = identity();
        assert_eq!(node.join_marker_path(), PathBuf::from("/var/lib/berth/join"));
        assert_eq!(node.member_dir(), PathBuf::from("/var/lib/berth/member"));
    }

    #[test]
    fn test_validate() {
        assert!(identity().validate().is_ok());

        let nameless = NodeIdentity { name: " ".into(), ..identity() };
        assert!(matches!(nameless.validate(), Err(Error::EmptyNodeName)));

        let no_peers = identity().with_peer_urls(Vec::new());
        assert!(matches!(no_peers.validate(), Err(Error::NoPeerUrls)));

        let bad = identity().with_join(vec!["10.0.0.2:2379".to_string()]);
        assert!(matches!(bad.validate(), Err(Error::InvalidUrl { .. })));
    }
}
