//! Document-to-instance routing.

use std::collections::BTreeMap;

use dashmap::DashMap;

use crate::coordinator::InstanceInfo;
use crate::registry::MembershipListener;
use crate::ring::HashRing;

/// Maps each document id to the live instance that owns it.
///
/// Wired to a [`MembershipRegistry`] as a listener: joins add an
/// instance's vnodes to the ring, departures remove them. Routing
/// walks the ring clockwise from the document's hash and returns the
/// first candidate that is still in the live set, which covers the
/// window where the ring and the live set disagree mid-update.
///
/// [`MembershipRegistry`]: crate::MembershipRegistry
#[derive(Default)]
pub struct DocRouter {
    ring: HashRing,
    live: DashMap<String, InstanceInfo>,
}

impl DocRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Owning live instance for a document, or `None` when the
    /// cluster is empty.
    pub fn route(&self, doc_id: &str) -> Option<InstanceInfo> {
        for candidate in self.ring.candidates_for(doc_id) {
            if let Some(instance) = self.live.get(&candidate) {
                return Some(instance.value().clone());
            }
        }
        None
    }

    /// Does this document route to `instance_id`?
    pub fn is_owned_by(&self, doc_id: &str, instance_id: &str) -> bool {
        self.route(doc_id)
            .is_some_and(|owner| owner.id == instance_id)
    }

    /// Ring points per instance, keyed by instance id.
    pub fn vnode_counts(&self) -> BTreeMap<String, usize> {
        self.ring.vnode_counts()
    }

    pub fn live_count(&self) -> usize {
        self.live.len()
    }
}

impl MembershipListener for DocRouter {
    fn instance_added(&self, instance: &InstanceInfo) {
        self.live.insert(instance.id.clone(), instance.clone());
        self.ring.add_instance(&instance.id);
    }

    fn instance_removed(&self, instance_id: &str) {
        self.live.remove(instance_id);
        self.ring.remove_instance(instance_id);
    }
}
