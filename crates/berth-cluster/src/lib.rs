//! Berth Cluster - join preparation for nodes of a consensus-replicated cluster
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      JoinCoordinator                        │
//! │                                                             │
//! │  self-join check ─► join marker ─► member data ─► validate  │
//! │                                                             │
//! │  ┌───────────────┐  ┌───────────────┐  ┌───────────────┐    │
//! │  │  ClusterLock  │  │  Membership   │  │  JoinMarker   │    │
//! │  │               │  │  Reconciler   │  │               │    │
//! │  │ - Session     │  │ - Quiescence  │  │ - Load        │    │
//! │  │ - Named lock  │  │ - Conflicts   │  │ - Persist     │    │
//! │  │ - Release     │  │ - Add/confirm │  │   (0600)      │    │
//! │  └───────┬───────┘  └───────┬───────┘  └───────────────┘    │
//! │          │                  │                               │
//! │          └────────┬─────────┘                               │
//! │          ┌────────┴────────┐                                │
//! │          │ ClusterConnector│  etcd gateway | in-memory      │
//! │          └─────────────────┘                                │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! A node started with join targets asks the existing cluster to admit it
//! as a learner, waits for the membership to show it, and persists the
//! resulting initial-membership descriptor so later restarts skip the
//! protocol entirely.
//!
//! The `testing` feature exposes `MemoryCluster`, an in-process membership
//! service and lock with fault knobs for exercising the protocol.

mod coordinator;
mod data_dir;
mod error;
mod etcd;
mod lock;
mod marker;
mod membership;
#[cfg(any(test, feature = "testing"))]
mod memory;
mod reconciler;
mod transport;

pub use coordinator::JoinCoordinator;
pub use data_dir::has_replicated_state;
pub use error::{ClusterError, ClusterResult};
pub use etcd::{EtcdClient, EtcdConnector, EtcdLockGuard, EtcdSession};
pub use lock::{ClusterLock, LockGuard};
pub use marker::JoinMarker;
pub use membership::{ClusterConnector, MembershipClient};
#[cfg(any(test, feature = "testing"))]
pub use memory::{MembershipCall, MemoryCluster, MemoryLockGuard};
pub use reconciler::{
    classify, describe, Classification, FaultInjector, MembershipReconciler, NoFaults,
    ReconcilerConfig,
};
pub use transport::{GatewayTransport, TransportConfig};

// Re-export types from core
pub use berth_core::types::{
    ClusterMember, ClusterState, JoinOutcome, MemberId, MembershipSnapshot, NodeIdentity,
};
