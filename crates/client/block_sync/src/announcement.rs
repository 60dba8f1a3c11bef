use crate::network::PeerPubkey;
use std::{
    collections::{HashMap, VecDeque},
    sync::Mutex,
    time::Duration,
};
use tokio::time::Instant;
use tp_chain::Hash;

#[derive(Debug)]
struct AnnouncementCacheEntry {
    block_height: u64,
    /// Peers that announced the block after the first one, in announcement order.
    next_senders: VecDeque<PeerPubkey>,
    inserted_at: Instant,
}

#[derive(Debug, Default)]
struct AnnouncementCacheInner {
    entries: HashMap<Hash, AnnouncementCacheEntry>,
    /// Insertion order, oldest first.
    order: VecDeque<Hash>,
}

/// Remembers recently announced blocks to filter duplicate announcements, and keeps the other peers that announced
/// a block as fallbacks when fetching it from the first sender fails.
///
/// Expired entries are evicted lazily, on every access.
pub struct AnnouncementCache {
    ttl: Duration,
    inner: Mutex<AnnouncementCacheInner>,
}

impl AnnouncementCache {
    pub fn new(ttl: Duration) -> Self {
        Self { ttl, inner: Default::default() }
    }

    fn evict_expired(&self, inner: &mut AnnouncementCacheInner, now: Instant) {
        while let Some(hash) = inner.order.front() {
            let expired = inner.entries.get(hash).map_or(true, |entry| entry.inserted_at + self.ttl <= now);
            if !expired {
                break;
            }
            if let Some(hash) = inner.order.pop_front() {
                inner.entries.remove(&hash);
            }
        }
    }

    /// Returns true when `block_hash` was not announced yet. Otherwise, `sender` is recorded as a retry candidate
    /// and false is returned.
    pub fn try_add_or_update(&self, block_hash: Hash, block_height: u64, sender: PeerPubkey) -> bool {
        let now = Instant::now();
        let mut inner = self.inner.lock().expect("Poisoned lock");
        self.evict_expired(&mut inner, now);

        if let Some(entry) = inner.entries.get_mut(&block_hash) {
            if !entry.next_senders.contains(&sender) {
                entry.next_senders.push_back(sender);
            }
            return false;
        }

        let entry = AnnouncementCacheEntry { block_height, next_senders: VecDeque::new(), inserted_at: now };
        inner.entries.insert(block_hash, entry);
        inner.order.push_back(block_hash);
        true
    }

    /// Pops the next peer to fetch `block_hash` from.
    pub fn try_get_next_sender(&self, block_hash: &Hash) -> Option<PeerPubkey> {
        let mut inner = self.inner.lock().expect("Poisoned lock");
        self.evict_expired(&mut inner, Instant::now());
        inner.entries.get_mut(block_hash)?.next_senders.pop_front()
    }

    /// Forgets the retry candidates of a fetched block. The announcement itself is still remembered, so that later
    /// announcements of the same block are filtered out.
    pub fn clear_next_senders(&self, block_hash: &Hash) {
        let mut inner = self.inner.lock().expect("Poisoned lock");
        self.evict_expired(&mut inner, Instant::now());
        if let Some(entry) = inner.entries.get_mut(block_hash) {
            entry.next_senders.clear();
        }
    }

    pub fn block_height(&self, block_hash: &Hash) -> Option<u64> {
        let mut inner = self.inner.lock().expect("Poisoned lock");
        self.evict_expired(&mut inner, Instant::now());
        inner.entries.get(block_hash).map(|entry| entry.block_height)
    }

    pub fn len(&self) -> usize {
        let mut inner = self.inner.lock().expect("Poisoned lock");
        self.evict_expired(&mut inner, Instant::now());
        inner.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
