//! Membership client and join lock backed by the etcd v3 JSON gateway
//!
//! Every call is a `POST` of a JSON body to a `/v3/...` path. The gateway
//! encodes 64-bit integers as strings and byte fields as base64, and omits
//! fields that hold their default value.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use berth_core::types::{ClusterMember, MemberId, MembershipSnapshot};

use crate::error::{ClusterError, ClusterResult};
use crate::lock::{ClusterLock, LockGuard};
use crate::membership::{ClusterConnector, MembershipClient};
use crate::transport::{GatewayTransport, TransportConfig};

/// Wire shapes of the gateway API
mod wire {
    use serde::{Deserialize, Deserializer, Serialize};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum U64Repr {
        Str(String),
        Num(u64),
    }

    pub fn u64_from_any<'de, D>(deserializer: D) -> Result<u64, D::Error>
    where
        D: Deserializer<'de>,
    {
        match U64Repr::deserialize(deserializer)? {
            U64Repr::Num(n) => Ok(n),
            U64Repr::Str(s) => s.parse().map_err(serde::de::Error::custom),
        }
    }

    #[derive(Debug, Deserialize)]
    pub struct Member {
        #[serde(rename = "ID", default, deserialize_with = "u64_from_any")]
        pub id: u64,
        #[serde(default)]
        pub name: String,
        #[serde(rename = "peerURLs", default)]
        pub peer_urls: Vec<String>,
        #[serde(rename = "clientURLs", default)]
        pub client_urls: Vec<String>,
        #[serde(rename = "isLearner", default)]
        pub is_learner: bool,
    }

    #[derive(Debug, Deserialize)]
    pub struct MemberListResponse {
        #[serde(default)]
        pub members: Vec<Member>,
    }

    #[derive(Debug, Serialize)]
    pub struct MemberAddRequest<'a> {
        #[serde(rename = "peerURLs")]
        pub peer_urls: &'a [String],
        #[serde(rename = "isLearner")]
        pub is_learner: bool,
    }

    #[derive(Debug, Deserialize)]
    pub struct MemberAddResponse {
        pub member: Option<Member>,
    }

    /// Body carrying a single 64-bit identifier (member remove, lease keepalive/revoke)
    #[derive(Debug, Serialize)]
    pub struct IdRequest {
        #[serde(rename = "ID")]
        pub id: String,
    }

    #[derive(Debug, Serialize)]
    pub struct LeaseGrantRequest {
        #[serde(rename = "TTL")]
        pub ttl: String,
    }

    #[derive(Debug, Deserialize)]
    pub struct LeaseGrantResponse {
        #[serde(rename = "ID", default, deserialize_with = "u64_from_any")]
        pub id: u64,
        #[serde(default)]
        pub error: String,
    }

    #[derive(Debug, Serialize)]
    pub struct LockRequest {
        pub name: String,
        pub lease: String,
    }

    #[derive(Debug, Deserialize)]
    pub struct LockResponse {
        #[serde(default)]
        pub key: String,
    }

    #[derive(Debug, Serialize)]
    pub struct UnlockRequest {
        pub key: String,
    }
}

impl From<wire::Member> for ClusterMember {
    fn from(m: wire::Member) -> Self {
        ClusterMember {
            id: m.id,
            name: m.name,
            peer_urls: m.peer_urls,
            client_urls: m.client_urls,
            is_learner: m.is_learner,
        }
    }
}

/// Membership client talking to etcd through its JSON gateway
#[derive(Debug, Clone)]
pub struct EtcdClient {
    transport: Arc<GatewayTransport>,
}

impl EtcdClient {
    pub fn new(transport: Arc<GatewayTransport>) -> Self {
        Self { transport }
    }

    pub fn transport(&self) -> &Arc<GatewayTransport> {
        &self.transport
    }

    fn timeout(&self) -> Option<Duration> {
        Some(self.transport.config().request_timeout)
    }
}

#[async_trait]
impl MembershipClient for EtcdClient {
    async fn list_members(&self) -> ClusterResult<MembershipSnapshot> {
        let resp: wire::MemberListResponse = self
            .transport
            .post("/v3/cluster/member/list", &serde_json::json!({}), self.timeout())
            .await?;
        Ok(MembershipSnapshot::new(
            resp.members.into_iter().map(ClusterMember::from).collect(),
        ))
    }

    async fn add_learner(&self, peer_urls: &[String]) -> ClusterResult<ClusterMember> {
        let request = wire::MemberAddRequest {
            peer_urls,
            is_learner: true,
        };
        let resp: wire::MemberAddResponse = self
            .transport
            .post("/v3/cluster/member/add", &request, self.timeout())
            .await?;
        resp.member
            .map(ClusterMember::from)
            .ok_or_else(|| ClusterError::Transport("member add returned no member".to_string()))
    }

    async fn remove_member(&self, id: MemberId) -> ClusterResult<()> {
        let request = wire::IdRequest { id: id.to_string() };
        let _: serde_json::Value = self
            .transport
            .post("/v3/cluster/member/remove", &request, self.timeout())
            .await?;
        Ok(())
    }
}

/// A lease-backed session holding the join lock
#[derive(Debug)]
pub struct EtcdSession {
    transport: Arc<GatewayTransport>,
    lease_id: u64,
    keepalive: JoinHandle<()>,
}

impl EtcdSession {
    /// Grant a lease and keep it alive until the session is closed or dropped
    pub async fn open(transport: Arc<GatewayTransport>, ttl: Duration) -> ClusterResult<Self> {
        let ttl_secs = ttl.as_secs().max(2);
        let grant: wire::LeaseGrantResponse = transport
            .post(
                "/v3/lease/grant",
                &wire::LeaseGrantRequest {
                    ttl: ttl_secs.to_string(),
                },
                Some(transport.config().request_timeout),
            )
            .await?;
        if !grant.error.is_empty() {
            return Err(ClusterError::Lock(grant.error));
        }
        debug!(lease = grant.id, ttl_secs, "lease granted");

        let keepalive = Self::spawn_keepalive(
            Arc::clone(&transport),
            grant.id,
            Duration::from_millis(ttl_secs * 1000 / 3),
        );

        Ok(Self {
            transport,
            lease_id: grant.id,
            keepalive,
        })
    }

    pub fn lease_id(&self) -> u64 {
        self.lease_id
    }

    fn spawn_keepalive(
        transport: Arc<GatewayTransport>,
        lease_id: u64,
        every: Duration,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.tick().await;

            loop {
                ticker.tick().await;
                let request = wire::IdRequest {
                    id: lease_id.to_string(),
                };
                let result: ClusterResult<serde_json::Value> = transport
                    .post("/v3/lease/keepalive", &request, Some(every))
                    .await;
                if let Err(e) = result {
                    warn!(lease = lease_id, error = %e, "lease keepalive failed");
                }
            }
        })
    }
}

#[async_trait]
impl ClusterLock for EtcdSession {
    type Guard = EtcdLockGuard;

    async fn lock(&self, name: &str) -> ClusterResult<EtcdLockGuard> {
        let request = wire::LockRequest {
            name: BASE64.encode(name),
            lease: self.lease_id.to_string(),
        };
        // Blocks server-side until the lock is free.
        let resp: wire::LockResponse = self
            .transport
            .post("/v3/lock/lock", &request, None)
            .await
            .map_err(|e| ClusterError::Lock(e.to_string()))?;
        if resp.key.is_empty() {
            return Err(ClusterError::Lock(format!("lock {} returned no key", name)));
        }
        info!(lock = name, "join lock acquired");

        Ok(EtcdLockGuard {
            transport: Arc::clone(&self.transport),
            name: name.to_string(),
            key: Some(resp.key),
        })
    }

    async fn close(&self) -> ClusterResult<()> {
        self.keepalive.abort();
        let request = wire::IdRequest {
            id: self.lease_id.to_string(),
        };
        let _: serde_json::Value = self
            .transport
            .post(
                "/v3/lease/revoke",
                &request,
                Some(self.transport.config().request_timeout),
            )
            .await?;
        debug!(lease = self.lease_id, "lease revoked");
        Ok(())
    }
}

impl Drop for EtcdSession {
    fn drop(&mut self) {
        self.keepalive.abort();
    }
}

/// Holds the etcd lock key until released
#[derive(Debug)]
pub struct EtcdLockGuard {
    transport: Arc<GatewayTransport>,
    name: String,
    /// Base64 lock key; `None` once released
    key: Option<String>,
}

impl EtcdLockGuard {
    async fn unlock(transport: &GatewayTransport, key: String) -> ClusterResult<()> {
        let _: serde_json::Value = transport
            .post(
                "/v3/lock/unlock",
                &wire::UnlockRequest { key },
                Some(transport.config().request_timeout),
            )
            .await?;
        Ok(())
    }
}

#[async_trait]
impl LockGuard for EtcdLockGuard {
    fn name(&self) -> &str {
        &self.name
    }

    async fn release(mut self) -> ClusterResult<()> {
        if let Some(key) = self.key.take() {
            Self::unlock(&self.transport, key)
                .await
                .map_err(|e| ClusterError::Lock(e.to_string()))?;
            info!(lock = %self.name, "join lock released");
        }
        Ok(())
    }
}

impl Drop for EtcdLockGuard {
    fn drop(&mut self) {
        let Some(key) = self.key.take() else {
            return;
        };
        warn!(lock = %self.name, "lock guard dropped without release, unlocking in background");
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let transport = Arc::clone(&self.transport);
                let name = self.name.clone();
                handle.spawn(async move {
                    if let Err(e) = Self::unlock(&transport, key).await {
                        warn!(lock = %name, error = %e, "background unlock failed");
                    }
                });
            }
            Err(_) => {
                warn!(lock = %self.name, "no runtime to unlock on, relying on lease expiry");
            }
        }
    }
}

/// Connects to etcd endpoints through the JSON gateway
#[derive(Debug, Clone)]
pub struct EtcdConnector {
    config: TransportConfig,
    lease_ttl: Duration,
}

impl EtcdConnector {
    pub fn new(config: TransportConfig, lease_ttl: Duration) -> Self {
        Self { config, lease_ttl }
    }
}

#[async_trait]
impl ClusterConnector for EtcdConnector {
    type Client = EtcdClient;
    type Session = EtcdSession;

    async fn connect(&self, endpoints: &[String]) -> ClusterResult<EtcdClient> {
        let transport = GatewayTransport::new(endpoints, self.config.clone())?;
        transport.probe().await?;
        info!(endpoints = ?endpoints, "connected to join target");
        Ok(EtcdClient::new(Arc::new(transport)))
    }

    async fn open_session(&self, client: &EtcdClient) -> ClusterResult<EtcdSession> {
        EtcdSession::open(Arc::clone(client.transport()), self.lease_ttl).await
    }
}
