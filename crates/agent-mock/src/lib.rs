//! In-memory agents simulating MySQL replication state, for tests and local development.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod instance;

pub use instance::MockInstance;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use replicant_agent::errno::{
    CR_CONN_HOST_ERROR, CR_UNKNOWN_HOST, ER_ACCESS_DENIED_ERROR, ER_BAD_REPLICA, ER_CLONE_DONOR,
    ER_REPLICA_MUST_STOP,
};
use replicant_agent::{
    AgentConnection, AgentFactory, ClusterSpec, Error, InstanceIndex, InstanceStatus, MYSQL_PORT,
    ReplicaStatus, SourceEndpoint, ThreadState,
};
use tracing::debug;

#[derive(Debug)]
struct Fleet {
    cluster: ClusterSpec,
    instances: Vec<MockInstance>,
    external_sources: Vec<SourceEndpoint>,
    open_connections: usize,
}

impl Fleet {
    fn status_of(&self, index: InstanceIndex) -> InstanceStatus {
        let instance = &self.instances[index];
        InstanceStatus {
            read_only: instance.read_only,
            replica: instance
                .source
                .as_ref()
                .map(|source| self.replica_status(instance, source)),
            executed_position: instance.executed_position,
        }
    }

    fn replica_status(&self, instance: &MockInstance, source: &SourceEndpoint) -> ReplicaStatus {
        let mut status = ReplicaStatus {
            source_host: source.host.clone(),
            source_port: source.port,
            source_user: source.user.clone(),
            io_thread: ThreadState::Stopped,
            sql_thread: ThreadState::Stopped,
            last_io_errno: 0,
            last_io_error: String::new(),
            last_sql_errno: 0,
            last_sql_error: String::new(),
        };

        if !instance.replicating {
            return status;
        }

        status.io_thread = ThreadState::Running;
        status.sql_thread = ThreadState::Running;

        if let Some((errno, message)) = instance
            .io_fault
            .clone()
            .or_else(|| self.connect_fault(source))
        {
            status.io_thread = if errno == CR_CONN_HOST_ERROR
                || errno == CR_UNKNOWN_HOST
                || errno == ER_ACCESS_DENIED_ERROR
            {
                ThreadState::Connecting
            } else {
                ThreadState::Stopped
            };
            status.last_io_errno = errno;
            status.last_io_error = message;
        }

        if let Some((errno, message)) = instance.sql_fault.clone() {
            status.sql_thread = ThreadState::Stopped;
            status.last_sql_errno = errno;
            status.last_sql_error = message;
        }

        status
    }

    // Decides whether a running IO thread can reach `source`.
    fn connect_fault(&self, source: &SourceEndpoint) -> Option<(u32, String)> {
        if let Some(index) = self.cluster.index_of_hostname(&source.host) {
            if self.instances[index].reachable && source.port == MYSQL_PORT {
                return None;
            }
            return Some((
                CR_CONN_HOST_ERROR,
                format!("Can't connect to MySQL server on '{}:{}'", source.host, source.port),
            ));
        }

        match self
            .external_sources
            .iter()
            .find(|known| known.host == source.host && known.port == source.port)
        {
            None => Some((
                CR_UNKNOWN_HOST,
                format!("Unknown MySQL server host '{}'", source.host),
            )),
            Some(known) if known.user != source.user || known.password != source.password => {
                Some((
                    ER_ACCESS_DENIED_ERROR,
                    format!("Access denied for user '{}'", source.user),
                ))
            }
            Some(_) => None,
        }
    }
}

/// Factory for in-memory agents sharing one simulated fleet.
///
/// Clones share state, so a test can keep a handle to inspect and perturb
/// instances while the code under test drives them.
#[derive(Clone, Debug)]
pub struct MockAgentFactory {
    fleet: Arc<Mutex<Fleet>>,
}

impl MockAgentFactory {
    /// Creates a fleet for `cluster`; `instances[i]` backs instance `i`.
    #[must_use]
    pub fn new(cluster: &ClusterSpec, instances: Vec<MockInstance>) -> Self {
        Self {
            fleet: Arc::new(Mutex::new(Fleet {
                cluster: cluster.clone(),
                instances,
                external_sources: Vec::new(),
                open_connections: 0,
            })),
        }
    }

    /// Registers a server outside the cluster that instances can replicate from.
    pub fn add_external_source(&self, source: SourceEndpoint) {
        self.fleet.lock().external_sources.push(source);
    }

    /// Current status of instance `index`, as its agent would report it.
    #[must_use]
    pub fn status(&self, index: InstanceIndex) -> InstanceStatus {
        self.fleet.lock().status_of(index)
    }

    /// Number of mutating calls instance `index` has accepted.
    #[must_use]
    pub fn mutations(&self, index: InstanceIndex) -> usize {
        self.fleet.lock().instances[index].mutations
    }

    /// Number of connections handed out and not yet dropped.
    #[must_use]
    pub fn open_connections(&self) -> usize {
        self.fleet.lock().open_connections
    }

    /// Applies `f` to instance `index`.
    pub fn update(&self, index: InstanceIndex, f: impl FnOnce(&mut MockInstance)) {
        f(&mut self.fleet.lock().instances[index]);
    }
}

#[async_trait]
impl AgentFactory for MockAgentFactory {
    type Connection = MockAgentConnection;

    async fn connect(
        &self,
        cluster: &ClusterSpec,
        index: InstanceIndex,
    ) -> Result<Self::Connection, Error> {
        let mut fleet = self.fleet.lock();

        let Some(instance) = fleet.instances.get(index) else {
            return Err(Error::Resolution {
                host: cluster.pod_hostname(index),
                reason: "no such instance".to_string(),
            });
        };

        if !instance.reachable {
            return Err(Error::Connection {
                addr: cluster.pod_hostname(index),
                reason: "connection refused".to_string(),
            });
        }

        fleet.open_connections += 1;
        debug!("mock connection opened to instance {}", index);

        Ok(MockAgentConnection {
            fleet: Arc::clone(&self.fleet),
            index,
            closed: AtomicBool::new(false),
        })
    }
}

/// Connection to one simulated agent.
#[derive(Debug)]
pub struct MockAgentConnection {
    fleet: Arc<Mutex<Fleet>>,
    index: InstanceIndex,
    closed: AtomicBool,
}

impl MockAgentConnection {
    async fn call<T, F>(&self, method: &'static str, mutating: bool, f: F) -> Result<T, Error>
    where
        F: FnOnce(&mut Fleet, InstanceIndex) -> Result<T, Error> + Send,
    {
        let latency = self.fleet.lock().instances[self.index].latency;
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }

        let mut fleet = self.fleet.lock();
        let instance = &mut fleet.instances[self.index];

        let failure = if self.closed.load(Ordering::SeqCst) {
            Some("connection already closed".to_string())
        } else if !instance.reachable {
            Some("connection reset by peer".to_string())
        } else {
            instance.rpc_failure.clone()
        };
        if let Some(reason) = failure {
            return Err(Error::Rpc {
                method,
                errno: None,
                reason,
            });
        }

        if mutating {
            instance.mutations += 1;
        }
        f(&mut fleet, self.index)
    }
}

fn mysql_error(method: &'static str, errno: u32, reason: impl Into<String>) -> Error {
    Error::Rpc {
        method,
        errno: Some(errno),
        reason: reason.into(),
    }
}

#[async_trait]
impl AgentConnection for MockAgentConnection {
    async fn get_status(&self) -> Result<InstanceStatus, Error> {
        self.call("GetStatus", false, |fleet, index| Ok(fleet.status_of(index)))
            .await
    }

    async fn change_replication_source(&self, source: &SourceEndpoint) -> Result<(), Error> {
        self.call("ChangeReplicationSource", true, |fleet, index| {
            let instance = &mut fleet.instances[index];
            if instance.replicating {
                return Err(mysql_error(
                    "ChangeReplicationSource",
                    ER_REPLICA_MUST_STOP,
                    "This operation cannot be performed with a running replica",
                ));
            }
            instance.source = Some(source.clone());
            instance.io_fault = None;
            instance.sql_fault = None;
            Ok(())
        })
        .await
    }

    async fn start_replication(&self) -> Result<(), Error> {
        self.call("StartReplication", true, |fleet, index| {
            let instance = &mut fleet.instances[index];
            if instance.source.is_none() {
                return Err(mysql_error(
                    "StartReplication",
                    ER_BAD_REPLICA,
                    "The server is not configured as replica",
                ));
            }
            instance.replicating = true;
            Ok(())
        })
        .await
    }

    async fn stop_replication(&self) -> Result<(), Error> {
        self.call("StopReplication", true, |fleet, index| {
            fleet.instances[index].replicating = false;
            Ok(())
        })
        .await
    }

    async fn set_read_only(&self, read_only: bool) -> Result<(), Error> {
        self.call("SetReadOnly", true, |fleet, index| {
            fleet.instances[index].read_only = read_only;
            Ok(())
        })
        .await
    }

    async fn clone_from(&self, donor: &SourceEndpoint) -> Result<(), Error> {
        self.call("Clone", true, |fleet, index| {
            let donor_position = fleet
                .cluster
                .index_of_hostname(&donor.host)
                .map(|donor_index| &fleet.instances[donor_index])
                .filter(|instance| instance.reachable)
                .map(|instance| instance.executed_position)
                .ok_or_else(|| {
                    mysql_error(
                        "Clone",
                        ER_CLONE_DONOR,
                        format!("Clone donor {} is not available", donor.host),
                    )
                })?;

            let instance = &mut fleet.instances[index];
            instance.executed_position = donor_position;
            instance.source = None;
            instance.replicating = false;
            instance.io_fault = None;
            instance.sql_fault = None;
            instance.read_only = true;
            Ok(())
        })
        .await
    }

    async fn close(&self) -> Result<(), Error> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

impl Drop for MockAgentConnection {
    fn drop(&mut self) {
        self.fleet.lock().open_connections -= 1;
    }
}
