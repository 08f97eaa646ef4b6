//! HTTP transport towards the membership service's JSON gateway
//!
//! Handles:
//! - Endpoint failover across the configured join target
//! - Bounded dial timeout
//! - TLS with an optional custom CA and client certificate
//!
//! Retries are left to the callers: the join protocol decides
//! per step whether a failure is retried, propagated or fatal.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use reqwest::{Certificate, Client, ClientBuilder, Identity};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, warn};

use berth_core::config::{JoinConfig, SecurityConfig};

use crate::error::{ClusterError, ClusterResult};

/// Transport configuration
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Connection timeout
    pub dial_timeout: Duration,
    /// Request timeout for non-blocking calls
    pub request_timeout: Duration,
    /// Enable TLS certificate verification
    pub verify_tls: bool,
    /// Custom CA certificate path
    pub ca_cert_path: Option<String>,
    /// Client certificate path
    pub client_cert_path: Option<String>,
    /// Client key path
    pub client_key_path: Option<String>,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            dial_timeout: Duration::from_secs(3),
            request_timeout: Duration::from_secs(10),
            verify_tls: true,
            ca_cert_path: None,
            client_cert_path: None,
            client_key_path: None,
        }
    }
}

impl TransportConfig {
    pub fn from_config(join: &JoinConfig, security: &SecurityConfig) -> Self {
        let path = |p: &Option<std::path::PathBuf>| {
            p.as_ref().map(|p| p.to_string_lossy().to_string())
        };
        Self {
            dial_timeout: join.dial_timeout(),
            request_timeout: join.request_timeout(),
            verify_tls: security.verify_tls,
            ca_cert_path: path(&security.ca_cert),
            client_cert_path: path(&security.client_cert),
            client_key_path: path(&security.client_key),
        }
    }
}

/// JSON-over-HTTP client bound to the endpoints of a running cluster
pub struct GatewayTransport {
    client: Client,
    endpoints: Vec<String>,
    /// Index of the endpoint that answered last
    active: AtomicUsize,
    config: TransportConfig,
}

impl GatewayTransport {
    /// Create a new transport for the given endpoints
    pub fn new(endpoints: &[String], config: TransportConfig) -> ClusterResult<Self> {
        if endpoints.is_empty() {
            return Err(ClusterError::Transport("no endpoints to connect to".to_string()));
        }

        let mut builder = ClientBuilder::new()
            .connect_timeout(config.dial_timeout)
            .pool_max_idle_per_host(2)
            .pool_idle_timeout(Duration::from_secs(90));

        if !config.verify_tls {
            builder = builder.danger_accept_invalid_certs(true);
        }

        if let Some(ca_path) = &config.ca_cert_path {
            let pem = std::fs::read(ca_path).map_err(|e| {
                ClusterError::Transport(format!("failed to read CA certificate {}: {}", ca_path, e))
            })?;
            builder = builder.add_root_certificate(Certificate::from_pem(&pem)?);
        }

        if let (Some(cert_path), Some(key_path)) =
            (&config.client_cert_path, &config.client_key_path)
        {
            let mut pem = std::fs::read(cert_path).map_err(|e| {
                ClusterError::Transport(format!("failed to read client cert {}: {}", cert_path, e))
            })?;
            let key = std::fs::read(key_path).map_err(|e| {
                ClusterError::Transport(format!("failed to read client key {}: {}", key_path, e))
            })?;
            pem.push(b'\n');
            pem.extend_from_slice(&key);
            builder = builder.identity(Identity::from_pem(&pem)?);
        }

        let client = builder
            .build()
            .map_err(|e| ClusterError::Transport(e.to_string()))?;

        Ok(Self {
            client,
            endpoints: endpoints
                .iter()
                .map(|e| e.trim_end_matches('/').to_string())
                .collect(),
            active: AtomicUsize::new(0),
            config,
        })
    }

    pub fn endpoints(&self) -> &[String] {
        &self.endpoints
    }

    pub fn config(&self) -> &TransportConfig {
        &self.config
    }

    /// Check that at least one endpoint answers within the dial timeout
    pub async fn probe(&self) -> ClusterResult<()> {
        let _: serde_json::Value = self
            .post(
                "/v3/maintenance/status",
                &serde_json::json!({}),
                Some(self.config.dial_timeout),
            )
            .await?;
        Ok(())
    }

    /// POST a JSON body, failing over to the next endpoint on connection errors.
    ///
    /// `timeout` of `None` lets the call block until the server answers; the
    /// lock call relies on this since it waits for the current holder.
    pub async fn post<Req, Resp>(
        &self,
        path: &str,
        body: &Req,
        timeout: Option<Duration>,
    ) -> ClusterResult<Resp>
    where
        Req: Serialize + ?Sized,
        Resp: DeserializeOwned,
    {
        let start = self.active.load(Ordering::Relaxed);
        let mut last_error = None;

        for offset in 0..self.endpoints.len() {
            let index = (start + offset) % self.endpoints.len();
            let url = format!("{}{}", self.endpoints[index], path);

            let mut request = self.client.post(&url).json(body);
            if let Some(timeout) = timeout {
                request = request.timeout(timeout);
            }

            match request.send().await {
                Ok(response) => {
                    self.active.store(index, Ordering::Relaxed);

                    if !response.status().is_success() {
                        let status = response.status();
                        let body = response.text().await.unwrap_or_default();
                        return Err(ClusterError::Transport(format!(
                            "{} failed with status {}: {}",
                            url, status, body
                        )));
                    }

                    let bytes = response.bytes().await?;
                    return Ok(serde_json::from_slice(&bytes)?);
                }
                Err(e) if e.is_connect() || e.is_timeout() => {
                    warn!(endpoint = %self.endpoints[index], error = %e, "endpoint unreachable");
                    last_error = Some(e.to_string());
                }
                Err(e) => return Err(e.into()),
            }
        }

        debug!(path, "all endpoints failed");
        Err(ClusterError::Transport(last_error.unwrap_or_else(|| {
            "no endpoint reachable".to_string()
        })))
    }
}

impl std::fmt::Debug for GatewayTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatewayTransport")
            .field("endpoints", &self.endpoints)
            .field("config", &self.config)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_config_default() {
        let config = TransportConfig::default();
        assert_eq!(config.dial_timeout, Duration::from_secs(3));
        assert!(config.verify_tls);
    }

    #[test]
    fn test_transport_config_from_config() {
        let mut join = JoinConfig::default();
        join.dial_timeout_secs = 7;
        let security = SecurityConfig {
            verify_tls: false,
            ca_cert: Some("/etc/berth/ca.pem".into()),
            ..Default::default()
        };

        let config = TransportConfig::from_config(&join, &security);
        assert_eq!(config.dial_timeout, Duration::from_secs(7));
        assert!(!config.verify_tls);
        assert_eq!(config.ca_cert_path.as_deref(), Some("/etc/berth/ca.pem"));
    }

    #[test]
    fn test_endpoints_are_normalized() {
        let transport = GatewayTransport::new(
            &["http://10.0.0.1:2379/".to_string(), "http://10.0.0.2:2379".to_string()],
            TransportConfig::default(),
        )
        .unwrap();
        assert_eq!(
            transport.endpoints(),
            &["http://10.0.0.1:2379".to_string(), "http://10.0.0.2:2379".to_string()]
        );

        assert!(GatewayTransport::new(&[], TransportConfig::default()).is_err());
    }

    #[tokio::test]
    async fn test_unreachable_endpoint() {
        // Port 9 on localhost is expected to refuse connections.
        let transport = GatewayTransport::new(
            &["http://127.0.0.1:9".to_string()],
            TransportConfig {
                dial_timeout: Duration::from_millis(200),
                ..Default::default()
            },
        )
        .unwrap();
        assert!(transport.probe().await.is_err());
    }
}
