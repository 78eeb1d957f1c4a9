//! Dialing agents over TCP and TLS.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use replicant_agent::{AGENT_PORT, AgentFactory, ClusterSpec, Error, InstanceIndex};
use rustls_pki_types::ServerName;
use socket2::{SockRef, TcpKeepalive};
use tokio::net::TcpStream;
use tokio::time::{Instant, timeout_at};
use tokio_rustls::TlsConnector;
use tracing::debug;

use crate::connection::TlsAgentConnection;
use crate::reloader::Reloader;
use crate::resolver::Resolver;

/// Default bound on resolution, dial and handshake together.
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Default idle time before TCP keepalive probes start.
const DEFAULT_KEEPALIVE: Duration = Duration::from_secs(60);

/// Configuration for the TLS agent factory
#[derive(Clone, Debug)]
pub struct TlsFactoryConfig {
    /// Port agents listen on
    pub agent_port: u16,
    /// Bound on resolution, dial and handshake together
    pub connect_timeout: Duration,
    /// Idle time before keepalive probes are sent
    pub keepalive: Duration,
}

impl Default for TlsFactoryConfig {
    fn default() -> Self {
        Self {
            agent_port: AGENT_PORT,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            keepalive: DEFAULT_KEEPALIVE,
        }
    }
}

/// Dials agents over mutually authenticated TLS.
///
/// The factory keeps no per-connection state; every call reads the current
/// identity from the reloader.
#[derive(Debug)]
pub struct TlsAgentFactory<R>
where
    R: Resolver,
{
    resolver: R,
    reloader: Arc<Reloader>,
    config: TlsFactoryConfig,
}

impl<R> TlsAgentFactory<R>
where
    R: Resolver,
{
    /// Creates a factory with default configuration.
    pub fn new(resolver: R, reloader: Arc<Reloader>) -> Self {
        Self::with_config(resolver, reloader, TlsFactoryConfig::default())
    }

    /// Creates a factory with custom configuration.
    pub const fn with_config(resolver: R, reloader: Arc<Reloader>, config: TlsFactoryConfig) -> Self {
        Self {
            resolver,
            reloader,
            config,
        }
    }

    async fn dial(&self, addr: SocketAddr, hostname: &str) -> Result<TlsAgentConnection, Error> {
        let connection_error = |reason: String| Error::Connection {
            addr: addr.to_string(),
            reason,
        };

        let tcp = TcpStream::connect(addr)
            .await
            .map_err(|e| connection_error(e.to_string()))?;

        let keepalive = TcpKeepalive::new().with_time(self.config.keepalive);
        SockRef::from(&tcp)
            .set_tcp_keepalive(&keepalive)
            .map_err(|e| connection_error(e.to_string()))?;

        // Certificates are issued for the pod hostname, not its IP.
        let server_name = ServerName::try_from(hostname.to_string())
            .map_err(|e| connection_error(e.to_string()))?;

        let connector = TlsConnector::from(self.reloader.tls_client_config());
        let stream = connector
            .connect(server_name, tcp)
            .await
            .map_err(|e| connection_error(e.to_string()))?;

        Ok(TlsAgentConnection::new(hostname.to_string(), stream))
    }
}

#[async_trait]
impl<R> AgentFactory for TlsAgentFactory<R>
where
    R: Resolver,
{
    type Connection = TlsAgentConnection;

    async fn connect(
        &self,
        cluster: &ClusterSpec,
        index: InstanceIndex,
    ) -> Result<Self::Connection, Error> {
        let hostname = cluster.pod_hostname(index);
        // One budget covers resolution, dial and handshake.
        let deadline = Instant::now() + self.config.connect_timeout;

        let ip = timeout_at(deadline, self.resolver.resolve(cluster, index))
            .await
            .map_err(|_| Error::Resolution {
                host: hostname.clone(),
                reason: format!("timed out after {:?}", self.config.connect_timeout),
            })??;

        let addr = SocketAddr::new(ip, self.config.agent_port);
        debug!("dialing agent {} at {}", hostname, addr);

        timeout_at(deadline, self.dial(addr, &hostname))
            .await
            .map_err(|_| Error::Timeout(self.config.connect_timeout))?
    }
}
