//! Local membership view fed from the coordinator.

use std::sync::Arc;

use anyhow::Context;
use anyhow::Result;
use dashmap::DashMap;
use parking_lot::Mutex;
use parking_lot::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing::warn;

use crate::coordinator::Coordinator;
use crate::coordinator::InstanceInfo;
use crate::coordinator::MembershipEvent;
use crate::coordinator::RegistrationHandle;

/// Receives membership changes after the registry applies them.
///
/// Callbacks are synchronous and must be cheap; they run on the watch
/// task.
pub trait MembershipListener: Send + Sync {
    fn instance_added(&self, instance: &InstanceInfo);
    fn instance_removed(&self, instance_id: &str);
}

/// This instance's view of cluster membership.
///
/// [`start`] registers the local instance ephemerally, seeds the view
/// from the coordinator, and spawns a task that applies watch events
/// until shutdown. If the coordination session lapses and is later
/// restored, the registry re-registers the local instance so routing
/// converges back to including it.
///
/// [`start`]: MembershipRegistry::start
pub struct MembershipRegistry {
    coordinator: Arc<dyn Coordinator>,
    local: InstanceInfo,
    instances: DashMap<String, InstanceInfo>,
    listeners: RwLock<Vec<Arc<dyn MembershipListener>>>,
    registration: Mutex<Option<RegistrationHandle>>,
}

impl MembershipRegistry {
    pub fn new(coordinator: Arc<dyn Coordinator>, local: InstanceInfo) -> Arc<Self> {
        Arc::new(Self {
            coordinator,
            local,
            instances: DashMap::new(),
            listeners: RwLock::new(Vec::new()),
            registration: Mutex::new(None),
        })
    }

    /// Attach a listener. Subscribe before [`start`] to observe the
    /// seeding events too.
    ///
    /// [`start`]: MembershipRegistry::start
    pub fn subscribe(&self, listener: Arc<dyn MembershipListener>) {
        self.listeners.write().push(listener);
    }

    pub fn local(&self) -> &InstanceInfo {
        &self.local
    }

    pub fn is_live(&self, instance_id: &str) -> bool {
        self.instances.contains_key(instance_id)
    }

    pub fn get(&self, instance_id: &str) -> Option<InstanceInfo> {
        self.instances
            .get(instance_id)
            .map(|entry| entry.value().clone())
    }

    /// Current live set, id-sorted for stable output.
    pub fn instances(&self) -> Vec<InstanceInfo> {
        let mut all: Vec<InstanceInfo> = self
            .instances
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        all.sort_by(|a, b| a.id.cmp(&b.id));
        all
    }

    /// Register locally, seed the view, and run the watch loop until
    /// `shutdown` fires. Dropping the registration on shutdown lets
    /// the rest of the cluster route away from this instance.
    pub async fn start(self: Arc<Self>, shutdown: CancellationToken) -> Result<()> {
        // Watch before registering so no event can slip between the
        // seed snapshot and the first receive.
        let mut events = self.coordinator.watch();

        let handle = self
            .coordinator
            .register_ephemeral(self.local.clone())
            .await
            .context("failed to register local instance")?;
        *self.registration.lock() = Some(handle);

        for instance in self
            .coordinator
            .live_instances()
            .await
            .context("failed to list live instances")?
        {
            self.apply_added(instance);
        }
        info!(
            instance_id = %self.local.id,
            known = self.instances.len(),
            "membership registry started"
        );

        let registry = self;
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => {
                        registry.registration.lock().take();
                        info!(instance_id = %registry.local.id, "membership registry stopped");
                        return;
                    }
                    event = events.recv() => match event {
                        Some(event) => registry.apply_event(event).await,
                        None => {
                            warn!("coordinator watch closed");
                            return;
                        }
                    },
                }
            }
        });
        Ok(())
    }

    async fn apply_event(&self, event: MembershipEvent) {
        match event {
            MembershipEvent::InstanceAdded(instance) => self.apply_added(instance),
            MembershipEvent::InstanceRemoved(instance_id) => self.apply_removed(&instance_id),
            MembershipEvent::SessionLost => {
                // Our ephemeral registration is gone; peers will route
                // around us until the session is restored.
                warn!(instance_id = %self.local.id, "coordination session lost");
                self.registration.lock().take();
            }
            MembershipEvent::SessionRestored => {
                info!(instance_id = %self.local.id, "coordination session restored, re-registering");
                match self
                    .coordinator
                    .register_ephemeral(self.local.clone())
                    .await
                {
                    Ok(handle) => *self.registration.lock() = Some(handle),
                    Err(error) => {
                        warn!(instance_id = %self.local.id, %error, "re-registration failed");
                    }
                }
            }
        }
    }

    fn apply_added(&self, instance: InstanceInfo) {
        let previous = self.instances.insert(instance.id.clone(), instance.clone());
        if previous.as_ref() != Some(&instance) {
            info!(instance_id = %instance.id, address = %instance.address(), "instance joined");
            for listener in self.listeners.read().iter() {
                listener.instance_added(&instance);
            }
        }
    }

    fn apply_removed(&self, instance_id: &str) {
        if self.instances.remove(instance_id).is_some() {
            info!(instance_id, "instance left");
            for listener in self.listeners.read().iter() {
                listener.instance_removed(instance_id);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::memory::MemoryCoordinator;

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(30)).await;
    }

    #[tokio::test]
    async fn seeds_from_existing_members_and_tracks_changes() {
        let coordinator = MemoryCoordinator::new();
        let peer_handle = coordinator
            .register_ephemeral(InstanceInfo::new("editor-1", "10.0.0.1", 8080))
            .await
            .unwrap();

        let registry = MembershipRegistry::new(
            Arc::new(coordinator.clone()),
            InstanceInfo::new("editor-2", "10.0.0.2", 8080),
        );
        let shutdown = CancellationToken::new();
        Arc::clone(&registry).start(shutdown.clone()).await.unwrap();
        settle().await;

        assert!(registry.is_live("editor-1"));
        assert!(registry.is_live("editor-2"));

        drop(peer_handle);
        settle().await;
        assert!(!registry.is_live("editor-1"));
        assert!(registry.is_live("editor-2"));

        shutdown.cancel();
        settle().await;
        assert!(coordinator.live_instances().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn re_registers_after_session_restoration() {
        let coordinator = MemoryCoordinator::new();
        let registry = MembershipRegistry::new(
            Arc::new(coordinator.clone()),
            InstanceInfo::new("editor-1", "10.0.0.1", 8080),
        );
        let shutdown = CancellationToken::new();
        Arc::clone(&registry).start(shutdown.clone()).await.unwrap();
        settle().await;

        coordinator.expire_session("editor-1");
        settle().await;
        assert!(coordinator.live_instances().await.unwrap().is_empty());

        coordinator.restore_session();
        settle().await;
        let live = coordinator.live_instances().await.unwrap();
        assert_eq!(live.len(), 1);
        assert_eq!(live[0].id, "editor-1");
        assert!(registry.is_live("editor-1"));

        shutdown.cancel();
    }
}
