//! Membership reconciliation: the part of the join that runs under the lock.
//!
//! Steps:
//! 1. Wait until no other node's registration is in flight (an unnamed
//!    member whose peer URLs are not ours).
//! 2. Classify existing members against our identity: a member holding our
//!    name (or unnamed) with different peer URLs is a conflict; with our peer
//!    URLs it is a stale registration of ourselves that lost its data.
//! 3. Remove the stale registration, if any.
//! 4. Add ourselves as a learner, retrying until the service accepts.
//! 5. Poll until the new member shows up, bounded by an attempt budget.
//! 6. Build the initial-membership descriptor and persist it.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::{sleep, Instant};
use tracing::{info, warn};

use berth_core::config::JoinConfig;
use berth_core::types::{JoinOutcome, MemberId, MembershipSnapshot, NodeIdentity};

use crate::error::{ClusterError, ClusterResult};
use crate::marker::JoinMarker;
use crate::membership::MembershipClient;

/// Configuration for the reconciler
#[derive(Debug, Clone)]
pub struct ReconcilerConfig {
    /// Delay between membership polls
    pub poll_interval: Duration,
    /// Delay between add-member retries
    pub add_retry_interval: Duration,
    /// Polls spent waiting for the added member to appear
    pub confirm_attempts: u32,
    /// Bound on the otherwise unbounded waits (quiescence, add retries)
    pub deadline: Option<Duration>,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(500),
            add_retry_interval: Duration::from_secs(1),
            confirm_attempts: 20,
            deadline: None,
        }
    }
}

impl From<&JoinConfig> for ReconcilerConfig {
    fn from(config: &JoinConfig) -> Self {
        Self {
            poll_interval: config.poll_interval(),
            add_retry_interval: config.add_retry_interval(),
            confirm_attempts: config.confirm_attempts,
            deadline: config.deadline(),
        }
    }
}

/// Seam for forcing alternate paths through the reconciler in tests.
///
/// The production reconciler uses [`NoFaults`].
pub trait FaultInjector: Send + Sync + fmt::Debug {
    /// Skip registering the member, as if the add call was lost
    fn skip_add_member(&self) -> bool {
        false
    }

    /// Override the confirmation budget
    fn confirm_attempts(&self, configured: u32) -> u32 {
        configured
    }
}

/// Injects nothing
#[derive(Debug, Default, Clone, Copy)]
pub struct NoFaults;

impl FaultInjector for NoFaults {}

/// How existing members relate to this node
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Classification {
    /// Another identity is bound to our name or pending slot
    pub conflict: bool,
    /// Our own registration from a previous life whose data was lost
    pub stale_self: Option<MemberId>,
    /// Voting members
    pub voters: usize,
}

/// Classify `snapshot` against `identity`.
///
/// At most one member may carry this node's peer URLs. A second one, or one
/// registered under another name, is a conflict.
pub fn classify(identity: &NodeIdentity, snapshot: &MembershipSnapshot) -> Classification {
    let mut result = Classification::default();
    let mut own_entries = 0;

    for member in snapshot {
        let same_peers = member.has_peer_urls(&identity.peer_urls);
        if member.name == identity.name || member.is_unnamed() {
            info!(
                id = member.id,
                name = %member.name,
                client_urls = ?member.client_urls,
                peer_urls = ?member.peer_urls,
                "found member matching this node"
            );
            if same_peers {
                result.stale_self = Some(member.id);
            } else {
                result.conflict = true;
            }
        } else if same_peers {
            warn!(
                id = member.id,
                name = %member.name,
                "peer urls of this node are registered under another name"
            );
            result.conflict = true;
        }
        if same_peers {
            own_entries += 1;
        }
        if !member.is_learner {
            result.voters += 1;
        }
    }

    if own_entries > 1 {
        warn!(count = own_entries, "several members carry the peer urls of this node");
        result.conflict = true;
    }

    result
}

/// Drives this node's registration to a confirmed, persisted state
#[derive(Debug, Clone)]
pub struct MembershipReconciler {
    config: ReconcilerConfig,
    faults: Arc<dyn FaultInjector>,
}

impl MembershipReconciler {
    pub fn new(config: ReconcilerConfig) -> Self {
        Self {
            config,
            faults: Arc::new(NoFaults),
        }
    }

    pub fn with_fault_injector(mut self, faults: Arc<dyn FaultInjector>) -> Self {
        self.faults = faults;
        self
    }

    pub fn config(&self) -> &ReconcilerConfig {
        &self.config
    }

    /// Register `identity` with the cluster behind `client`.
    ///
    /// Must only be called while holding the cluster-wide join lock.
    pub async fn reconcile<C>(
        &self,
        identity: &NodeIdentity,
        client: &C,
    ) -> ClusterResult<JoinOutcome>
    where
        C: MembershipClient + ?Sized,
    {
        let deadline = self.config.deadline.map(|d| Instant::now() + d);

        let snapshot = self.wait_for_quiescence(identity, client, deadline).await?;

        let classification = classify(identity, &snapshot);
        info!(
            total_count = snapshot.len(),
            member_count = classification.voters,
            existed = classification.conflict,
            missing_data = classification.stale_self.is_some(),
            "list members info"
        );

        if classification.conflict {
            return Err(ClusterError::DuplicateMember(identity.name.clone()));
        }

        let added = if self.faults.skip_add_member() {
            warn!("fault injected: skipping member add");
            None
        } else {
            if let Some(id) = classification.stale_self {
                if let Err(e) = client.remove_member(id).await {
                    warn!(id, error = %e, "failed to remove stale member");
                    return Err(ClusterError::DuplicateMember(identity.name.clone()));
                }
                info!(id, "removed stale registration of this node");
            }
            Some(self.add_learner(identity, client, deadline).await?)
        };

        let descriptor = self.confirm(identity, client, added).await?;

        info!(initial_cluster = %descriptor, "save initial cluster info");
        JoinMarker::new(identity.data_dir())
            .persist(&descriptor)
            .await?;

        Ok(JoinOutcome::existing(descriptor))
    }

    /// Fetch membership until no foreign registration is pending
    async fn wait_for_quiescence<C>(
        &self,
        identity: &NodeIdentity,
        client: &C,
        deadline: Option<Instant>,
    ) -> ClusterResult<MembershipSnapshot>
    where
        C: MembershipClient + ?Sized,
    {
        let mut snapshot = client.list_members().await?;

        loop {
            let mut pending = false;
            for member in snapshot.foreign_pending(&identity.peer_urls) {
                info!(
                    id = member.id,
                    client_urls = ?member.client_urls,
                    peer_urls = ?member.peer_urls,
                    "there is a member that has not joined successfully"
                );
                pending = true;
            }
            if !pending {
                return Ok(snapshot);
            }

            loop {
                check_deadline(deadline, "waiting for pending members")?;
                sleep(self.config.poll_interval).await;
                match client.list_members().await {
                    Ok(next) => {
                        snapshot = next;
                        break;
                    }
                    Err(e) => info!(error = %e, "list members failed"),
                }
            }
        }
    }

    /// Add this node as a learner, retrying on every failure
    async fn add_learner<C>(
        &self,
        identity: &NodeIdentity,
        client: &C,
        deadline: Option<Instant>,
    ) -> ClusterResult<MemberId>
    where
        C: MembershipClient + ?Sized,
    {
        loop {
            match client.add_learner(&identity.peer_urls).await {
                Ok(member) => {
                    info!(id = member.id, peer_urls = ?member.peer_urls, "added learner");
                    return Ok(member.id);
                }
                Err(e) => {
                    warn!(error = %e, "add learner failed");
                    check_deadline(deadline, "adding learner")?;
                    sleep(self.config.add_retry_interval).await;
                }
            }
        }
    }

    /// Poll until the added member is listed; returns the descriptor
    async fn confirm<C>(
        &self,
        identity: &NodeIdentity,
        client: &C,
        added: Option<MemberId>,
    ) -> ClusterResult<String>
    where
        C: MembershipClient + ?Sized,
    {
        let attempts = self
            .faults
            .confirm_attempts(self.config.confirm_attempts)
            .max(1);

        for attempt in 0..attempts {
            info!(attempt, "check add member result");
            let snapshot = client.list_members().await?;

            if let Some(descriptor) = describe(identity, &snapshot, added)? {
                return Ok(descriptor);
            }
            if attempt + 1 < attempts {
                sleep(self.config.poll_interval).await;
            }
        }

        Err(ClusterError::MemberNotJoined {
            name: identity.name.clone(),
        })
    }
}

/// Build the initial-membership descriptor from `snapshot`.
///
/// The member with identifier `added` is described under this node's name.
/// Returns `None` if that member is not listed yet. Pairs follow snapshot
/// order, one per peer URL.
pub fn describe(
    identity: &NodeIdentity,
    snapshot: &MembershipSnapshot,
    added: Option<MemberId>,
) -> ClusterResult<Option<String>> {
    let mut found = false;
    let mut pairs = Vec::new();

    for member in snapshot {
        let name = if Some(member.id) == added {
            found = true;
            identity.name.as_str()
        } else {
            member.name.as_str()
        };

        if name.is_empty() && !member.has_peer_urls(&identity.peer_urls) {
            return Err(ClusterError::InconsistentMembership {
                id: member.id,
                peer_urls: member.peer_urls.clone(),
            });
        }

        for url in &member.peer_urls {
            pairs.push(format!("{}={}", name, url));
        }
    }

    Ok(found.then(|| pairs.join(",")))
}

fn check_deadline(deadline: Option<Instant>, stage: &'static str) -> ClusterResult<()> {
    match deadline {
        Some(at) if Instant::now() >= at => Err(ClusterError::DeadlineExceeded(stage)),
        _ => Ok(()),
    }
}
