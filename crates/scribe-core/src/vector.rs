//! Version vectors: per-origin highest-applied-sequence maps.

use std::collections::BTreeMap;

use serde::Deserialize;
use serde::Serialize;

/// An inclusive range of sequence numbers a replica is missing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeqRange {
    /// First missing sequence number.
    pub from: u64,
    /// Last missing sequence number.
    pub to: u64,
}

/// Per-document version vector.
///
/// Maps an origin server id to the highest sequence number known to be
/// applied to the snapshot. Entries are monotonically non-decreasing;
/// an absent server means zero edits applied from that origin.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VersionVector(BTreeMap<String, u64>);

impl VersionVector {
    /// An empty vector (no edits applied from any origin).
    pub fn new() -> Self {
        Self::default()
    }

    /// Highest applied sequence for `server_id`, zero if absent.
    pub fn get(&self, server_id: &str) -> u64 {
        self.0.get(server_id).copied().unwrap_or(0)
    }

    /// Record that `seq` from `server_id` has been applied.
    ///
    /// Monotonic: a smaller `seq` than the current entry is ignored.
    pub fn observe(&mut self, server_id: &str, seq: u64) {
        let entry = self.0.entry(server_id.to_string()).or_insert(0);
        if seq > *entry {
            *entry = seq;
        }
    }

    /// Iterate `(server_id, highest_seq)` pairs in server-id order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, u64)> {
        self.0.iter().map(|(server, seq)| (server.as_str(), *seq))
    }

    /// Number of origins with at least one applied edit.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// True when no origin has applied edits.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Per-origin ranges that `client` has not yet seen relative to
    /// this vector. Origins where the client is caught up are omitted.
    pub fn missing_from(&self, client: &VersionVector) -> BTreeMap<String, SeqRange> {
        let mut missing = BTreeMap::new();
        for (server_id, &server_seq) in &self.0 {
            let client_seq = client.get(server_id);
            if server_seq > client_seq {
                missing.insert(
                    server_id.clone(),
                    SeqRange {
                        from: client_seq + 1,
                        to: server_seq,
                    },
                );
            }
        }
        missing
    }
}

impl FromIterator<(String, u64)> for VersionVector {
    fn from_iter<I: IntoIterator<Item = (String, u64)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}
