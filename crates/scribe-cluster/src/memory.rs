//! In-process coordinator with ephemeral-registration semantics.

use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::debug;

use crate::coordinator::Coordinator;
use crate::coordinator::InstanceInfo;
use crate::coordinator::MembershipEvent;
use crate::coordinator::RegistrationHandle;

struct Registered {
    token: u64,
    info: InstanceInfo,
}

#[derive(Default)]
struct State {
    instances: BTreeMap<String, Registered>,
    watchers: Vec<mpsc::UnboundedSender<MembershipEvent>>,
    next_token: u64,
}

impl State {
    fn broadcast(&mut self, event: &MembershipEvent) {
        // Closed watchers are pruned as a side effect of sending.
        self.watchers
            .retain(|watcher| watcher.send(event.clone()).is_ok());
    }

    /// Remove a registration. A `token` restricts removal to the exact
    /// registration that minted it, so a stale handle dropped after a
    /// re-registration cannot evict the newer entry.
    fn remove_instance(&mut self, instance_id: &str, token: Option<u64>) {
        let matches = self
            .instances
            .get(instance_id)
            .is_some_and(|registered| token.is_none_or(|t| t == registered.token));
        if matches {
            self.instances.remove(instance_id);
            debug!(instance_id, "instance deregistered");
            self.broadcast(&MembershipEvent::InstanceRemoved(instance_id.to_string()));
        }
    }
}

/// Shared-memory [`Coordinator`]: every clone attached to the same
/// coordinator sees the same membership.
#[derive(Clone, Default)]
pub struct MemoryCoordinator {
    state: Arc<Mutex<State>>,
}

impl MemoryCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate losing the session that holds `instance_id`: the
    /// ephemeral registration vanishes cluster-wide and the owner is
    /// told its session lapsed.
    pub fn expire_session(&self, instance_id: &str) {
        let mut state = self.state.lock();
        state.remove_instance(instance_id, None);
        state.broadcast(&MembershipEvent::SessionLost);
    }

    /// Simulate the session coming back after [`expire_session`].
    ///
    /// [`expire_session`]: MemoryCoordinator::expire_session
    pub fn restore_session(&self) {
        self.state.lock().broadcast(&MembershipEvent::SessionRestored);
    }
}

#[async_trait]
impl Coordinator for MemoryCoordinator {
    async fn register_ephemeral(&self, instance: InstanceInfo) -> Result<RegistrationHandle> {
        let instance_id = instance.id.clone();
        let token = {
            let mut state = self.state.lock();
            anyhow::ensure!(
                !state.instances.contains_key(&instance_id),
                "instance '{instance_id}' is already registered"
            );
            state.next_token += 1;
            let token = state.next_token;
            state.instances.insert(
                instance_id.clone(),
                Registered {
                    token,
                    info: instance.clone(),
                },
            );
            debug!(instance_id = %instance.id, "instance registered");
            state.broadcast(&MembershipEvent::InstanceAdded(instance));
            token
        };

        let state = Arc::clone(&self.state);
        Ok(RegistrationHandle::new(move || {
            state.lock().remove_instance(&instance_id, Some(token));
        }))
    }

    async fn live_instances(&self) -> Result<Vec<InstanceInfo>> {
        Ok(self
            .state
            .lock()
            .instances
            .values()
            .map(|registered| registered.info.clone())
            .collect())
    }

    fn watch(&self) -> mpsc::UnboundedReceiver<MembershipEvent> {
        let (sender, receiver) = mpsc::unbounded_channel();
        self.state.lock().watchers.push(sender);
        receiver
    }
}
