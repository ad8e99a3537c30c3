//! The coordination-service seam.

use anyhow::Result;
use async_trait::async_trait;
use serde::Deserialize;
use serde::Serialize;
use tokio::sync::mpsc;

/// One editor instance as seen by the cluster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceInfo {
    /// Stable unique id, e.g. `"editor-7f3a"`.
    pub id: String,
    /// Host clients should connect to.
    pub host: String,
    /// WebSocket/HTTP port.
    pub port: u16,
}

impl InstanceInfo {
    pub fn new(id: impl Into<String>, host: impl Into<String>, port: u16) -> Self {
        let id = id.into();
        assert!(!id.is_empty(), "instance id must not be empty");
        Self {
            id,
            host: host.into(),
            port,
        }
    }

    /// `host:port` form used in routing responses.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Membership change pushed to watchers.
#[derive(Debug, Clone)]
pub enum MembershipEvent {
    /// A new instance registered.
    InstanceAdded(InstanceInfo),
    /// An instance deregistered or its ephemeral registration expired.
    InstanceRemoved(String),
    /// This watcher's own coordination session lapsed; our ephemeral
    /// registration is gone until the session is restored.
    SessionLost,
    /// The coordination session came back. Holders of ephemeral
    /// registrations must re-register.
    SessionRestored,
}

/// Deregisters the instance when dropped.
///
/// Mirrors ephemeral-node semantics: the registration lives exactly as
/// long as the handle (and the session behind it).
pub struct RegistrationHandle {
    deregister: Option<Box<dyn FnOnce() + Send>>,
}

impl RegistrationHandle {
    pub fn new(deregister: impl FnOnce() + Send + 'static) -> Self {
        Self {
            deregister: Some(Box::new(deregister)),
        }
    }
}

impl Drop for RegistrationHandle {
    fn drop(&mut self) {
        if let Some(deregister) = self.deregister.take() {
            deregister();
        }
    }
}

impl std::fmt::Debug for RegistrationHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegistrationHandle").finish_non_exhaustive()
    }
}

/// Cluster coordination backend.
///
/// Backed in production by a coordination service with ephemeral nodes
/// and watches; [`MemoryCoordinator`] provides the same semantics
/// in-process for tests and single-machine runs.
///
/// [`MemoryCoordinator`]: crate::MemoryCoordinator
#[async_trait]
pub trait Coordinator: Send + Sync {
    /// Register an instance ephemerally. Dropping the returned handle
    /// (or losing the session) removes the registration and notifies
    /// every watcher.
    async fn register_ephemeral(&self, instance: InstanceInfo) -> Result<RegistrationHandle>;

    /// Snapshot of currently registered instances.
    async fn live_instances(&self) -> Result<Vec<InstanceInfo>>;

    /// Subscribe to membership changes observed after this call.
    fn watch(&self) -> mpsc::UnboundedReceiver<MembershipEvent>;
}
