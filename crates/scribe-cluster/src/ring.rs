//! Consistent-hash ring over instance ids.

use std::collections::BTreeMap;

use arc_swap::ArcSwap;
use scribe_core::constants::VIRTUAL_NODES_PER_INSTANCE;
use sha2::Digest;
use sha2::Sha256;

/// First 8 bytes of SHA-256, big endian. Uniform enough for ring
/// placement and stable across platforms and restarts.
fn ring_hash(input: &str) -> u64 {
    let digest = Sha256::digest(input.as_bytes());
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&digest[..8]);
    u64::from_be_bytes(bytes)
}

/// Copy-on-write consistent-hash ring.
///
/// Each instance contributes [`VIRTUAL_NODES_PER_INSTANCE`] points
/// hashed from `"{instance_id}#{index}"`. Lookups walk clockwise from
/// the key's hash (first point at or after it, wrapping once), so
/// adding or removing one instance only moves the keys adjacent to its
/// points.
///
/// Readers never lock: the point map is swapped wholesale on every
/// membership change.
pub struct HashRing {
    points: ArcSwap<BTreeMap<u64, String>>,
    vnodes: usize,
}

impl HashRing {
    pub fn new() -> Self {
        Self::with_vnodes(VIRTUAL_NODES_PER_INSTANCE)
    }

    pub fn with_vnodes(vnodes: usize) -> Self {
        assert!(vnodes > 0, "a ring needs at least one vnode per instance");
        Self {
            points: ArcSwap::from_pointee(BTreeMap::new()),
            vnodes,
        }
    }

    pub fn add_instance(&self, instance_id: &str) {
        let mut points = BTreeMap::clone(&self.points.load());
        for index in 0..self.vnodes {
            points.insert(
                ring_hash(&format!("{instance_id}#{index}")),
                instance_id.to_string(),
            );
        }
        self.points.store(points.into());
    }

    pub fn remove_instance(&self, instance_id: &str) {
        let mut points = BTreeMap::clone(&self.points.load());
        points.retain(|_, owner| owner != instance_id);
        self.points.store(points.into());
    }

    /// Owner of `key`, ignoring liveness.
    pub fn owner(&self, key: &str) -> Option<String> {
        self.candidates_for(key).into_iter().next()
    }

    /// Distinct instance ids in clockwise order starting at `key`'s
    /// position. The first entry is the primary owner; the rest are
    /// the fallback order when owners are not live.
    pub fn candidates_for(&self, key: &str) -> Vec<String> {
        let points = self.points.load();
        if points.is_empty() {
            return Vec::new();
        }
        let hash = ring_hash(key);
        let mut ordered: Vec<String> = Vec::new();
        for owner in points
            .range(hash..)
            .map(|(_, owner)| owner)
            .chain(points.range(..hash).map(|(_, owner)| owner))
        {
            if !ordered.iter().any(|seen| seen == owner) {
                ordered.push(owner.clone());
            }
        }
        ordered
    }

    /// Owner counts over a sample of keys.
    pub fn distribution_stats<'a, I>(&self, keys: I) -> BTreeMap<String, usize>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut counts = BTreeMap::new();
        for key in keys {
            if let Some(owner) = self.owner(key) {
                *counts.entry(owner).or_insert(0) += 1;
            }
        }
        counts
    }

    /// Ring points per instance, for distribution inspection.
    pub fn vnode_counts(&self) -> BTreeMap<String, usize> {
        let mut counts = BTreeMap::new();
        for owner in self.points.load().values() {
            *counts.entry(owner.clone()).or_insert(0) += 1;
        }
        counts
    }

    pub fn is_empty(&self) -> bool {
        self.points.load().is_empty()
    }
}

impl Default for HashRing {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_is_deterministic() {
        let ring = HashRing::new();
        ring.add_instance("editor-1");
        ring.add_instance("editor-2");

        let first = ring.owner("doc-42").unwrap();
        let second = ring.owner("doc-42").unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn empty_ring_routes_nowhere() {
        let ring = HashRing::new();
        assert_eq!(ring.owner("doc-1"), None);
        assert!(ring.candidates_for("doc-1").is_empty());
    }

    #[test]
    fn each_instance_contributes_its_vnodes() {
        let ring = HashRing::new();
        ring.add_instance("editor-1");
        ring.add_instance("editor-2");

        let counts = ring.vnode_counts();
        assert_eq!(counts["editor-1"], VIRTUAL_NODES_PER_INSTANCE);
        assert_eq!(counts["editor-2"], VIRTUAL_NODES_PER_INSTANCE);
    }

    #[test]
    fn removal_only_moves_keys_owned_by_the_removed_instance() {
        let ring = HashRing::new();
        ring.add_instance("editor-1");
        ring.add_instance("editor-2");
        ring.add_instance("editor-3");

        let keys: Vec<String> = (0..1000).map(|i| format!("doc-{i}")).collect();
        let before: Vec<String> = keys.iter().map(|key| ring.owner(key).unwrap()).collect();

        ring.remove_instance("editor-2");

        let mut moved = 0usize;
        for (key, previous) in keys.iter().zip(&before) {
            let now = ring.owner(key).unwrap();
            assert_ne!(now, "editor-2");
            if previous == "editor-2" {
                moved += 1;
            } else {
                assert_eq!(&now, previous, "key '{key}' moved without cause");
            }
        }

        // Roughly a third of the keys belonged to the removed instance.
        assert!(moved > 0);
        assert!(moved < keys.len() / 2, "moved {moved} of {} keys", keys.len());
    }

    #[test]
    fn distribution_is_roughly_uniform() {
        let ring = HashRing::new();
        ring.add_instance("editor-1");
        ring.add_instance("editor-2");
        ring.add_instance("editor-3");

        let keys: Vec<String> = (0..6000).map(|i| format!("doc-{i}")).collect();
        let counts = ring.distribution_stats(keys.iter().map(String::as_str));

        for (instance, count) in &counts {
            assert!(
                *count > 1000 && *count < 3200,
                "instance {instance} owns {count} of 6000 keys"
            );
        }
    }

    #[test]
    fn candidates_start_with_the_owner_and_cover_all_instances() {
        let ring = HashRing::new();
        ring.add_instance("editor-1");
        ring.add_instance("editor-2");
        ring.add_instance("editor-3");

        let candidates = ring.candidates_for("doc-9");
        assert_eq!(candidates.len(), 3);
        assert_eq!(candidates[0], ring.owner("doc-9").unwrap());
    }
}
