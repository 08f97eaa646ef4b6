//! Cluster error types

use thiserror::Error;

use berth_core::types::MemberId;

/// Result type for cluster operations
pub type ClusterResult<T> = Result<T, ClusterError>;

/// Errors raised while preparing a cluster join
#[derive(Error, Debug)]
pub enum ClusterError {
    #[error("join self is forbidden")]
    SelfJoin,

    #[error("missing data or join a duplicated member: {0}")]
    DuplicateMember(String),

    #[error("join failed, adding the new member {name} may have failed")]
    MemberNotJoined { name: String },

    #[error("there is a member that has not joined successfully (id {id}, peer urls {peer_urls:?})")]
    InconsistentMembership { id: MemberId, peer_urls: Vec<String> },

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Lock error: {0}")]
    Lock(String),

    #[error("Join marker I/O failed: {0}")]
    Persistence(#[source] std::io::Error),

    #[error("Deadline exceeded while {0}")]
    DeadlineExceeded(&'static str),

    #[error("Invalid node identity: {0}")]
    InvalidIdentity(#[from] berth_core::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}
