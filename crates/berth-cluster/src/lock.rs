//! Cluster-wide mutual exclusion for the join protocol.
//!
//! A lock is taken through a session that is visible to the whole cluster;
//! when the session dies, every lock it holds goes with it. Acquisition hands
//! out a guard that must be released once the critical section is over.

use async_trait::async_trait;

use crate::error::ClusterResult;

/// A session able to take named cluster-wide locks
#[async_trait]
pub trait ClusterLock: Send + Sync {
    /// The guard type returned on successful acquisition.
    type Guard: LockGuard;

    /// Acquire `name`, waiting until the current holder releases it.
    async fn lock(&self, name: &str) -> ClusterResult<Self::Guard>;

    /// End the session. Locks still held by it are released by the service.
    async fn close(&self) -> ClusterResult<()> {
        Ok(())
    }
}

/// Proof of holding a named lock.
///
/// Implementations release on drop as a fallback, but callers are expected
/// to call [`LockGuard::release`] so that failures can be observed.
#[async_trait]
pub trait LockGuard: Send + Sync + 'static {
    /// Name the guard was acquired for
    fn name(&self) -> &str;

    /// Release the lock
    async fn release(self) -> ClusterResult<()>;
}
