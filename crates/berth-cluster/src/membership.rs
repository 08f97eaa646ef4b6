//! Interfaces to the membership service the node joins
//!
//! The join protocol treats the consensus cluster as an opaque service: it
//! can list members, add a learner and remove a member. How those calls reach
//! the cluster is up to the implementation.

use std::sync::Arc;

use async_trait::async_trait;

use berth_core::types::{ClusterMember, MemberId, MembershipSnapshot};

use crate::error::ClusterResult;
use crate::lock::ClusterLock;

/// Membership API of the consensus cluster
#[async_trait]
pub trait MembershipClient: Send + Sync {
    /// Read the whole membership list. May fail transiently.
    async fn list_members(&self) -> ClusterResult<MembershipSnapshot>;

    /// Register a non-voting member advertising `peer_urls`.
    ///
    /// Returns the member as recorded by the service, including its new identifier.
    async fn add_learner(&self, peer_urls: &[String]) -> ClusterResult<ClusterMember>;

    /// Remove a member by identifier
    async fn remove_member(&self, id: MemberId) -> ClusterResult<()>;
}

#[async_trait]
impl<T: MembershipClient + ?Sized> MembershipClient for Arc<T> {
    async fn list_members(&self) -> ClusterResult<MembershipSnapshot> {
        (**self).list_members().await
    }

    async fn add_learner(&self, peer_urls: &[String]) -> ClusterResult<ClusterMember> {
        (**self).add_learner(peer_urls).await
    }

    async fn remove_member(&self, id: MemberId) -> ClusterResult<()> {
        (**self).remove_member(id).await
    }
}

/// Opens connections and lock sessions towards a join target
#[async_trait]
pub trait ClusterConnector: Send + Sync {
    type Client: MembershipClient;
    type Session: ClusterLock;

    /// Connect to the cluster behind `endpoints`, bounded by a dial timeout
    async fn connect(&self, endpoints: &[String]) -> ClusterResult<Self::Client>;

    /// Open the cluster-visible session that backs the join lock
    async fn open_session(&self, client: &Self::Client) -> ClusterResult<Self::Session>;
}
