//! Result of join preparation

use std::fmt;

use serde::{Deserialize, Serialize};

/// Cluster-state flag handed to the consensus engine at bootstrap
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClusterState {
    /// Bootstrap a brand new cluster
    New,
    /// Join a cluster that already runs
    Existing,
}

impl ClusterState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ClusterState::New => "new",
            ClusterState::Existing => "existing",
        }
    }
}

impl fmt::Display for ClusterState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Fields handed to the surrounding process once join preparation finishes
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct JoinOutcome {
    /// Initial-membership descriptor, `name=peerURL` pairs joined by commas
    pub initial_cluster: String,
    /// `None` leaves the engine's own default in place
    pub initial_cluster_state: Option<ClusterState>,
}

impl JoinOutcome {
    /// Nothing to do: the node keeps whatever it was configured with
    pub fn empty() -> Self {
        Self::default()
    }

    /// Join an existing cluster with the given descriptor (possibly empty)
    pub fn existing(initial_cluster: impl Into<String>) -> Self {
        Self {
            initial_cluster: initial_cluster.into(),
            initial_cluster_state: Some(ClusterState::Existing),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.initial_cluster.is_empty() && self.initial_cluster_state.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outcome_constructors() {
        assert!(JoinOutcome::empty().is_empty());

        let outcome = JoinOutcome::existing("a=http://a:2380");
        assert!(!outcome.is_empty());
        assert_eq!(outcome.initial_cluster_state, Some(ClusterState::Existing));

        // The data-directory short-circuit yields an empty descriptor that is still tagged.
        assert!(!JoinOutcome::existing("").is_empty());
    }

    #[test]
    fn test_cluster_state_rendering() {
        assert_eq!(ClusterState::Existing.to_string(), "existing");
        assert_eq!(
            serde_json::to_string(&ClusterState::New).unwrap(),
            "\"new\""
        );
    }
}
