//! Presence directory: who is in the lobby and when we last heard from them.
//!
//! Expiry is enforced only by [`Directory::sweep`], never on read, so a
//! lookup may briefly return a stale entry that the next sweep will evict.

use crate::signaling::Peer;
use std::collections::HashMap;
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerRecord {
    pub peer: Peer,
    pub last_seen_at: Instant,
}

/// Result of [`Directory::upsert`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Upsert {
    /// First sighting
    Inserted,
    /// Already known; liveness and display fields updated
    Refreshed,
}

pub struct Directory {
    entries: HashMap<String, PeerRecord>,
    ttl: Duration,
}

impl Directory {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: HashMap::new(),
            ttl,
        }
    }

    pub fn upsert(&mut self, peer: Peer, seen_at: Instant) -> Upsert {
        match self.entries.get_mut(&peer.peer_id) {
            Some(record) => {
                record.peer = peer;
                record.last_seen_at = seen_at;
                Upsert::Refreshed
            }
            None => {
                self.entries.insert(
                    peer.peer_id.clone(),
                    PeerRecord {
                        peer,
                        last_seen_at: seen_at,
                    },
                );
                Upsert::Inserted
            }
        }
    }

    pub fn remove(&mut self, peer_id: &str) -> Option<PeerRecord> {
        self.entries.remove(peer_id)
    }

    /// Evicts every entry with `now - last_seen_at >= ttl` and returns them
    pub fn sweep(&mut self, now: Instant) -> Vec<PeerRecord> {
        let ttl = self.ttl;
        let expired: Vec<String> = self
            .entries
            .iter()
            .filter(|(_, r)| now.saturating_duration_since(r.last_seen_at) >= ttl)
            .map(|(id, _)| id.clone())
            .collect();

        expired
            .into_iter()
            .filter_map(|id| self.entries.remove(&id))
            .collect()
    }

    /// Snapshot ordered by display name, then id
    pub fn peers(&self) -> Vec<Peer> {
        let mut peers: Vec<Peer> = self.entries.values().map(|r| r.peer.clone()).collect();
        peers.sort_by(|a, b| {
            a.display_name
                .cmp(&b.display_name)
                .then_with(|| a.peer_id.cmp(&b.peer_id))
        });
        peers
    }
}

#[cfg(test)]
impl Directory {
    fn get(&self, peer_id: &str) -> Option<&PeerRecord> {
        self.entries.get(peer_id)
    }

    fn contains(&self, peer_id: &str) -> bool {
        self.entries.contains_key(peer_id)
    }

    fn len(&self) -> usize {
        self.entries.len()
    }

    fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TTL: Duration = Duration::from_secs(30);

    fn peer(id: &str, name: &str) -> Peer {
        Peer::new(id, name)
    }

    #[test]
    fn test_upsert_is_idempotent() {
        let t0 = Instant::now();
        let mut dir = Directory::new(TTL);

        assert_eq!(dir.upsert(peer("p1", "ann"), t0), Upsert::Inserted);
        let later = t0 + Duration::from_secs(5);
        assert_eq!(dir.upsert(peer("p1", "annie"), later), Upsert::Refreshed);

        assert_eq!(dir.len(), 1);
        let record = dir.get("p1").unwrap();
        assert_eq!(record.peer.display_name, "annie");
        assert_eq!(record.last_seen_at, later);
    }

    #[test]
    fn test_sweep_evicts_at_ttl() {
        let t0 = Instant::now();
        let mut dir = Directory::new(TTL);
        dir.upsert(peer("p1", "ann"), t0);

        assert!(dir.sweep(t0 + Duration::from_secs(29)).is_empty());
        let evicted = dir.sweep(t0 + TTL);
        assert_eq!(evicted.len(), 1);
        assert_eq!(evicted[0].peer.peer_id, "p1");
        assert!(dir.is_empty());
    }

    #[test]
    fn test_refreshed_peer_survives_sweep() {
        let t0 = Instant::now();
        let mut dir = Directory::new(TTL);
        dir.upsert(peer("p1", "ann"), t0);
        dir.upsert(peer("p2", "ben"), t0);

        dir.upsert(peer("p1", "ann"), t0 + Duration::from_secs(20));
        let evicted = dir.sweep(t0 + Duration::from_secs(40));

        assert_eq!(evicted.len(), 1);
        assert_eq!(evicted[0].peer.peer_id, "p2");
        assert!(dir.contains("p1"));
    }

    #[test]
    fn test_stale_entry_visible_until_sweep() {
        let t0 = Instant::now();
        let mut dir = Directory::new(TTL);
        dir.upsert(peer("p1", "ann"), t0);
        // Reads never evict
        assert!(dir.contains("p1"));
        assert_eq!(dir.peers().len(), 1);
        dir.sweep(t0 + Duration::from_secs(60));
        assert!(!dir.contains("p1"));
    }

    #[test]
    fn test_remove_and_sorted_snapshot() {
        let t0 = Instant::now();
        let mut dir = Directory::new(TTL);
        dir.upsert(peer("p3", "cat"), t0);
        dir.upsert(peer("p1", "ann"), t0);
        dir.upsert(peer("p2", "ben"), t0);

        let names: Vec<_> = dir.peers().into_iter().map(|p| p.display_name).collect();
        assert_eq!(names, ["ann", "ben", "cat"]);

        assert!(dir.remove("p2").is_some());
        assert!(dir.remove("p2").is_none());
        assert_eq!(dir.len(), 2);
    }
}
