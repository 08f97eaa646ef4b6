//! In-memory (single process) membership service and join lock.
//!
//! Behaves like a tiny consensus cluster: members added as learners stay
//! unnamed until [`MemoryCluster::start_member`] is called for them, and the
//! join lock really excludes concurrent holders. A handful of knobs inject
//! failures so the join protocol can be exercised without a network.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::OwnedMutexGuard;
use tracing::debug;

use berth_core::types::{ClusterMember, MemberId, MembershipSnapshot};

use crate::error::{ClusterError, ClusterResult};
use crate::lock::{ClusterLock, LockGuard};
use crate::membership::{ClusterConnector, MembershipClient};

/// A call observed by the in-memory cluster
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MembershipCall {
    List,
    AddLearner(Vec<String>),
    Remove(MemberId),
}

#[derive(Debug, Default)]
struct State {
    members: Vec<ClusterMember>,
    calls: Vec<MembershipCall>,
    /// Members that get their name after this many further list calls
    pending_starts: Vec<(MemberId, String, usize)>,
    /// Added members that stay out of listings
    hidden: Vec<MemberId>,
}

#[derive(Debug, Default)]
struct Faults {
    unreachable: AtomicBool,
    lock_unavailable: AtomicBool,
    list_failures: AtomicUsize,
    add_failures: AtomicUsize,
    remove_fails: AtomicBool,
    hide_added: AtomicBool,
}

/// In-memory cluster shared by every handle cloned from it
#[derive(Debug, Clone, Default)]
pub struct MemoryCluster {
    state: Arc<Mutex<State>>,
    locks: Arc<Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>>,
    faults: Arc<Faults>,
    connects: Arc<AtomicUsize>,
}

impl MemoryCluster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start with the given members
    pub fn with_members(members: Vec<ClusterMember>) -> Self {
        let cluster = Self::new();
        cluster.state.lock().members = members;
        cluster
    }

    /// Current membership, bypassing fault injection and call recording
    pub fn members(&self) -> Vec<ClusterMember> {
        self.state.lock().members.clone()
    }

    /// Calls made through [`MembershipClient`], in order
    pub fn calls(&self) -> Vec<MembershipCall> {
        self.state.lock().calls.clone()
    }

    /// Number of times a connector connected to this cluster
    pub fn connect_count(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    /// Mark a member as started: it now advertises `name`
    pub fn start_member(&self, id: MemberId, name: impl Into<String>) {
        let name = name.into();
        let mut state = self.state.lock();
        if let Some(member) = state.members.iter_mut().find(|m| m.id == id) {
            member.name = name;
        }
    }

    /// Start member `id` as `name` once `lists` more list calls were served
    pub fn start_member_after(&self, id: MemberId, name: impl Into<String>, lists: usize) {
        self.state.lock().pending_starts.push((id, name.into(), lists));
    }

    /// Refuse connections, as an unreachable join target would
    pub fn set_unreachable(&self, unreachable: bool) {
        self.faults.unreachable.store(unreachable, Ordering::SeqCst);
    }

    /// Fail every lock acquisition
    pub fn set_lock_unavailable(&self, unavailable: bool) {
        self.faults.lock_unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Fail the next `n` list calls
    pub fn fail_next_lists(&self, n: usize) {
        self.faults.list_failures.store(n, Ordering::SeqCst);
    }

    /// Fail the next `n` add calls
    pub fn fail_next_adds(&self, n: usize) {
        self.faults.add_failures.store(n, Ordering::SeqCst);
    }

    /// Fail every remove call
    pub fn set_remove_fails(&self, fails: bool) {
        self.faults.remove_fails.store(fails, Ordering::SeqCst);
    }

    /// Accept adds but keep the new members out of listings
    pub fn set_hide_added(&self, hide: bool) {
        self.faults.hide_added.store(hide, Ordering::SeqCst);
    }

    /// True while some guard holds `name`
    pub fn is_locked(&self, name: &str) -> bool {
        self.locks
            .lock()
            .get(name)
            .map(|m| m.try_lock().is_err())
            .unwrap_or(false)
    }

    fn take_failure(counter: &AtomicUsize) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl MembershipClient for MemoryCluster {
    async fn list_members(&self) -> ClusterResult<MembershipSnapshot> {
        let mut state = self.state.lock();
        state.calls.push(MembershipCall::List);

        if Self::take_failure(&self.faults.list_failures) {
            return Err(ClusterError::Transport("injected list failure".to_string()));
        }

        let mut started = Vec::new();
        state.pending_starts.retain_mut(|(id, name, remaining)| {
            if *remaining == 0 {
                started.push((*id, std::mem::take(name)));
                false
            } else {
                *remaining -= 1;
                true
            }
        });
        for (id, name) in started {
            if let Some(member) = state.members.iter_mut().find(|m| m.id == id) {
                debug!(id, name = %name, "member started");
                member.name = name;
            }
        }

        let visible = state
            .members
            .iter()
            .filter(|m| !state.hidden.contains(&m.id))
            .cloned()
            .collect();
        Ok(MembershipSnapshot::new(visible))
    }

    async fn add_learner(&self, peer_urls: &[String]) -> ClusterResult<ClusterMember> {
        let mut state = self.state.lock();
        state.calls.push(MembershipCall::AddLearner(peer_urls.to_vec()));

        if Self::take_failure(&self.faults.add_failures) {
            return Err(ClusterError::Transport("injected add failure".to_string()));
        }

        let id = state.members.iter().map(|m| m.id).max().unwrap_or(0) + 1;
        let member = ClusterMember {
            id,
            name: String::new(),
            peer_urls: peer_urls.to_vec(),
            client_urls: Vec::new(),
            is_learner: true,
        };
        state.members.push(member.clone());
        if self.faults.hide_added.load(Ordering::SeqCst) {
            state.hidden.push(id);
        }
        Ok(member)
    }

    async fn remove_member(&self, id: MemberId) -> ClusterResult<()> {
        let mut state = self.state.lock();
        state.calls.push(MembershipCall::Remove(id));

        if self.faults.remove_fails.load(Ordering::SeqCst) {
            return Err(ClusterError::Transport("injected remove failure".to_string()));
        }

        let before = state.members.len();
        state.members.retain(|m| m.id != id);
        if state.members.len() == before {
            return Err(ClusterError::Transport(format!("member {} not found", id)));
        }
        Ok(())
    }
}

#[async_trait]
impl ClusterLock for MemoryCluster {
    type Guard = MemoryLockGuard;

    async fn lock(&self, name: &str) -> ClusterResult<MemoryLockGuard> {
        if self.faults.lock_unavailable.load(Ordering::SeqCst) {
            return Err(ClusterError::Lock("injected lock failure".to_string()));
        }

        let mutex = {
            let mut locks = self.locks.lock();
            Arc::clone(locks.entry(name.to_string()).or_default())
        };
        let guard = mutex.lock_owned().await;

        Ok(MemoryLockGuard {
            name: name.to_string(),
            _guard: guard,
        })
    }
}

/// Held in-memory lock; released on drop
#[derive(Debug)]
pub struct MemoryLockGuard {
    name: String,
    _guard: OwnedMutexGuard<()>,
}

#[async_trait]
impl LockGuard for MemoryLockGuard {
    fn name(&self) -> &str {
        &self.name
    }

    async fn release(self) -> ClusterResult<()> {
        drop(self);
        Ok(())
    }
}

#[async_trait]
impl ClusterConnector for MemoryCluster {
    type Client = MemoryCluster;
    type Session = MemoryCluster;

    async fn connect(&self, endpoints: &[String]) -> ClusterResult<MemoryCluster> {
        if self.faults.unreachable.load(Ordering::SeqCst) {
            return Err(ClusterError::Transport(format!(
                "context deadline exceeded dialing {:?}",
                endpoints
            )));
        }
        self.connects.fetch_add(1, Ordering::SeqCst);
        Ok(self.clone())
    }

    async fn open_session(&self, client: &MemoryCluster) -> ClusterResult<MemoryCluster> {
        Ok(client.clone())
    }
}
