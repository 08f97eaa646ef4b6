//! Join coordinator - decides at startup whether this node must register itself
//!
//! With data, join does nothing; without data and without a membership
//! entry, it registers the node. It refuses to join itself, and refuses to
//! join when another identity already holds this node's name.
//!
//! Cases without a data directory:
//! - A new node joins an existing cluster: add, confirm, persist.
//! - A node re-joins after losing its data: its stale entry is removed and it
//!   registers again.
//! - A deleted node joins its previous cluster: treated as a new node.
//!
//! Cases with a data directory: the consensus engine recovers membership
//! from its own state, so the outcome is an empty descriptor tagged
//! "existing".

use tracing::{info, warn};

use berth_core::config::JoinConfig;
use berth_core::types::{JoinOutcome, NodeIdentity};

use crate::data_dir::has_replicated_state;
use crate::error::{ClusterError, ClusterResult};
use crate::lock::{ClusterLock, LockGuard};
use crate::marker::JoinMarker;
use crate::membership::ClusterConnector;
use crate::reconciler::{MembershipReconciler, ReconcilerConfig};

/// Top-level orchestration of join preparation
pub struct JoinCoordinator<C: ClusterConnector> {
    connector: C,
    reconciler: MembershipReconciler,
    lock_name: String,
    fail_on_lock_error: bool,
}

impl<C: ClusterConnector> JoinCoordinator<C> {
    /// Create a coordinator with default protocol settings
    pub fn new(connector: C) -> Self {
        Self {
            connector,
            reconciler: MembershipReconciler::new(ReconcilerConfig::default()),
            lock_name: berth_core::DEFAULT_JOIN_LOCK.to_string(),
            fail_on_lock_error: false,
        }
    }

    /// Create a coordinator from the `[join]` configuration section
    pub fn from_config(connector: C, config: &JoinConfig) -> Self {
        Self::new(connector)
            .with_reconciler(MembershipReconciler::new(ReconcilerConfig::from(config)))
            .with_lock_name(config.lock_name.clone())
            .fail_on_lock_error(config.fail_on_lock_error)
    }

    pub fn with_reconciler(mut self, reconciler: MembershipReconciler) -> Self {
        self.reconciler = reconciler;
        self
    }

    pub fn with_lock_name(mut self, name: impl Into<String>) -> Self {
        self.lock_name = name.into();
        self
    }

    /// Surface lock acquisition failures instead of skipping the join
    pub fn fail_on_lock_error(mut self, fail: bool) -> Self {
        self.fail_on_lock_error = fail;
        self
    }

    /// Decide whether `identity` must register with its join target, and do so.
    pub async fn prepare_join(&self, identity: &NodeIdentity) -> ClusterResult<JoinOutcome> {
        if !identity.has_join_target() {
            return Ok(JoinOutcome::empty());
        }

        if identity.is_self_join() {
            return Err(ClusterError::SelfJoin);
        }

        info!(name = %identity.name, join = ?identity.join, "prepare join cluster");

        if let Some(descriptor) = JoinMarker::new(identity.data_dir()).load().await? {
            info!(initial_cluster = %descriptor, "found persisted join config");
            return Ok(JoinOutcome::existing(descriptor));
        }

        if has_replicated_state(&identity.member_dir()).await {
            info!("found existing member data, rejoining from local state");
            return Ok(JoinOutcome::existing(""));
        }

        identity.validate()?;

        let client = self.connector.connect(&identity.join).await?;
        let session = self.connector.open_session(&client).await?;

        let result = self.join_locked(identity, &client, &session).await;

        if let Err(e) = session.close().await {
            warn!(error = %e, "failed to close lock session");
        }
        result
    }

    /// Take the join lock, reconcile, and release the lock whatever the result
    async fn join_locked(
        &self,
        identity: &NodeIdentity,
        client: &C::Client,
        session: &C::Session,
    ) -> ClusterResult<JoinOutcome> {
        let guard = match session.lock(&self.lock_name).await {
            Ok(guard) => guard,
            Err(e) if self.fail_on_lock_error => return Err(e),
            Err(e) => {
                warn!(lock = %self.lock_name, error = %e, "failed to acquire join lock, skipping join");
                return Ok(JoinOutcome::empty());
            }
        };

        let result = self.reconciler.reconcile(identity, client).await;

        if let Err(e) = guard.release().await {
            warn!(lock = %self.lock_name, error = %e, "failed to release join lock");
        }
        result
    }
}

impl<C: ClusterConnector + std::fmt::Debug> std::fmt::Debug for JoinCoordinator<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JoinCoordinator")
            .field("connector", &self.connector)
            .field("lock_name", &self.lock_name)
            .field("fail_on_lock_error", &self.fail_on_lock_error)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use berth_core::types::{ClusterMember, ClusterState};

    use crate::memory::{MemoryCluster, MembershipCall};

    fn abc() -> Vec<ClusterMember> {
        vec![
            ClusterMember::new(1, "A", vec!["peer1".to_string()]),
            ClusterMember::new(2, "B", vec!["peer2".to_string()]),
            ClusterMember::new(3, "C", vec!["peer3".to_string()]),
        ]
    }

    fn node_d(data_dir: &std::path::Path) -> NodeIdentity {
        NodeIdentity::new("D", data_dir)
            .with_peer_urls(vec!["http://10.0.0.4:2380".to_string()])
            .with_client_urls(vec!["http://10.0.0.4:2379".to_string()])
            .with_join(vec!["http://10.0.0.1:2379".to_string()])
    }

    #[tokio::test]
    async fn test_no_join_target() {
        let tmp = tempfile::tempdir().unwrap();
        let cluster = MemoryCluster::with_members(abc());
        let identity = node_d(tmp.path()).with_join(Vec::new());

        let outcome = JoinCoordinator::new(cluster.clone())
            .prepare_join(&identity)
            .await
            .unwrap();

        assert!(outcome.is_empty());
        assert_eq!(cluster.connect_count(), 0);
        assert!(cluster.calls().is_empty());
    }

    #[tokio::test]
    async fn test_self_join_is_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        let cluster = MemoryCluster::with_members(abc());
        let identity = node_d(tmp.path()).with_join(vec!["http://10.0.0.4:2379".to_string()]);

        let err = JoinCoordinator::new(cluster.clone())
            .prepare_join(&identity)
            .await
            .unwrap_err();

        assert!(matches!(err, ClusterError::SelfJoin));
        assert_eq!(cluster.connect_count(), 0);
    }

    #[tokio::test]
    async fn test_self_join_wins_over_marker() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("join"), "D=http://10.0.0.4:2380").unwrap();
        let identity = node_d(tmp.path()).with_join(vec!["http://10.0.0.4:2379".to_string()]);

        let err = JoinCoordinator::new(MemoryCluster::new())
            .prepare_join(&identity)
            .await
            .unwrap_err();
        assert!(matches!(err, ClusterError::SelfJoin));
    }

    #[tokio::test]
    async fn test_marker_makes_join_idempotent() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(
            tmp.path().join("join"),
            "A=peer1,B=peer2,C=peer3,D=http://10.0.0.4:2380\n",
        )
        .unwrap();
        let cluster = MemoryCluster::with_members(abc());
        cluster.set_unreachable(true);
        let coordinator = JoinCoordinator::new(cluster.clone());

        for _ in 0..2 {
            let outcome = coordinator.prepare_join(&node_d(tmp.path())).await.unwrap();
            assert_eq!(
                outcome.initial_cluster,
                "A=peer1,B=peer2,C=peer3,D=http://10.0.0.4:2380"
            );
            assert_eq!(outcome.initial_cluster_state, Some(ClusterState::Existing));
        }
        assert_eq!(cluster.connect_count(), 0);
    }

    #[tokio::test]
    async fn test_existing_data_short_circuits() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(tmp.path().join("member").join("snap")).unwrap();
        let cluster = MemoryCluster::with_members(abc());
        cluster.set_unreachable(true);

        let outcome = JoinCoordinator::new(cluster.clone())
            .prepare_join(&node_d(tmp.path()))
            .await
            .unwrap();

        assert_eq!(outcome, JoinOutcome::existing(""));
        assert_eq!(cluster.connect_count(), 0);
        assert!(!tmp.path().join("join").exists());
    }

    #[tokio::test]
    async fn test_empty_member_dir_still_joins() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(tmp.path().join("member")).unwrap();
        let cluster = MemoryCluster::with_members(abc());

        let outcome = JoinCoordinator::new(cluster.clone())
            .prepare_join(&node_d(tmp.path()))
            .await
            .unwrap();

        assert_eq!(
            outcome.initial_cluster,
            "A=peer1,B=peer2,C=peer3,D=http://10.0.0.4:2380"
        );
        assert_eq!(cluster.connect_count(), 1);
    }

    #[tokio::test]
    async fn test_end_to_end_then_restart() {
        let tmp = tempfile::tempdir().unwrap();
        let cluster = MemoryCluster::with_members(abc());
        let coordinator = JoinCoordinator::new(cluster.clone());
        let identity = node_d(tmp.path());

        let first = coordinator.prepare_join(&identity).await.unwrap();
        assert_eq!(
            first,
            JoinOutcome::existing("A=peer1,B=peer2,C=peer3,D=http://10.0.0.4:2380")
        );
        assert!(!cluster.is_locked(berth_core::DEFAULT_JOIN_LOCK));

        // A restart reads the marker and leaves the cluster alone.
        cluster.set_unreachable(true);
        let second = coordinator.prepare_join(&identity).await.unwrap();
        assert_eq!(second, first);
        let adds = cluster
            .calls()
            .iter()
            .filter(|c| matches!(c, MembershipCall::AddLearner(_)))
            .count();
        assert_eq!(adds, 1);
    }

    #[tokio::test]
    async fn test_unreachable_target_fails() {
        let tmp = tempfile::tempdir().unwrap();
        let cluster = MemoryCluster::with_members(abc());
        cluster.set_unreachable(true);

        let err = JoinCoordinator::new(cluster)
            .prepare_join(&node_d(tmp.path()))
            .await
            .unwrap_err();
        assert!(matches!(err, ClusterError::Transport(_)));
    }

    #[tokio::test]
    async fn test_invalid_identity_is_rejected_before_connecting() {
        let tmp = tempfile::tempdir().unwrap();
        let cluster = MemoryCluster::with_members(abc());
        let identity = node_d(tmp.path()).with_peer_urls(Vec::new());

        let err = JoinCoordinator::new(cluster.clone())
            .prepare_join(&identity)
            .await
            .unwrap_err();
        assert!(matches!(err, ClusterError::InvalidIdentity(_)));
        assert_eq!(cluster.connect_count(), 0);
    }

    #[tokio::test]
    async fn test_lock_released_after_conflict() {
        let tmp = tempfile::tempdir().unwrap();
        let mut members = abc();
        members.push(ClusterMember::new(9, "D", vec!["http://10.0.0.9:2380".to_string()]));
        let cluster = MemoryCluster::with_members(members);

        let err = JoinCoordinator::new(cluster.clone())
            .prepare_join(&node_d(tmp.path()))
            .await
            .unwrap_err();

        assert!(matches!(err, ClusterError::DuplicateMember(_)));
        assert!(!cluster.is_locked(berth_core::DEFAULT_JOIN_LOCK));
        assert!(!tmp.path().join("join").exists());
    }

    #[tokio::test]
    async fn test_lock_failure_is_a_no_op_by_default() {
        let tmp = tempfile::tempdir().unwrap();
        let cluster = MemoryCluster::with_members(abc());
        cluster.set_lock_unavailable(true);

        let outcome = JoinCoordinator::new(cluster.clone())
            .prepare_join(&node_d(tmp.path()))
            .await
            .unwrap();

        assert!(outcome.is_empty());
        assert!(cluster.calls().is_empty());
        assert!(!tmp.path().join("join").exists());
    }

    #[tokio::test]
    async fn test_lock_failure_can_be_fatal() {
        let tmp = tempfile::tempdir().unwrap();
        let cluster = MemoryCluster::with_members(abc());
        cluster.set_lock_unavailable(true);

        let err = JoinCoordinator::new(cluster)
            .fail_on_lock_error(true)
            .prepare_join(&node_d(tmp.path()))
            .await
            .unwrap_err();
        assert!(matches!(err, ClusterError::Lock(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_waits_for_lock_holder() {
        let tmp = tempfile::tempdir().unwrap();
        let cluster = MemoryCluster::with_members(abc());
        let held = cluster.lock("/custom/join").await.unwrap();

        let coordinator = JoinCoordinator::new(cluster.clone()).with_lock_name("/custom/join");
        let identity = node_d(tmp.path());
        let join = tokio::spawn(async move { coordinator.prepare_join(&identity).await });

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(!join.is_finished());
        assert!(cluster.calls().is_empty());

        held.release().await.unwrap();
        let outcome = join.await.unwrap().unwrap();
        assert_eq!(outcome.initial_cluster_state, Some(ClusterState::Existing));
        assert!(!cluster.is_locked("/custom/join"));
    }

    #[tokio::test]
    async fn test_from_config() {
        let tmp = tempfile::tempdir().unwrap();
        let cluster = MemoryCluster::with_members(abc());
        cluster.set_lock_unavailable(true);
        let mut config = JoinConfig::default();
        config.fail_on_lock_error = true;
        config.lock_name = "/pd/join".to_string();

        let coordinator = JoinCoordinator::from_config(cluster, &config);
        assert_eq!(coordinator.lock_name, "/pd/join");
        assert!(coordinator
            .prepare_join(&node_d(tmp.path()))
            .await
            .is_err());
    }
}
