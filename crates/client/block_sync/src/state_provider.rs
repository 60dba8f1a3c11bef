use crate::queue::SyncQueue;
use std::{collections::HashMap, sync::Mutex};
use tokio::time::Instant;
use tp_chain::Hash;

/// Shared, advisory sync state.
///
/// - Enqueue times: while a queue runs a task, the time at which that task was enqueued. Readers use it to tell how
///   backed up a queue is. Written by the queue consumers only.
/// - Download job target states: for the last block of a downloaded batch, whether it has been attached and
///   executed yet. Registered by the download service, flipped by the attach callback, read by the download worker.
#[derive(Default, Debug)]
pub struct BlockSyncStateProvider {
    enqueue_times: Mutex<HashMap<SyncQueue, Instant>>,
    download_job_target_states: Mutex<HashMap<Hash, bool>>,
}

impl BlockSyncStateProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_enqueue_time(&self, queue: SyncQueue) -> Option<Instant> {
        self.enqueue_times.lock().expect("Poisoned lock").get(&queue).copied()
    }

    pub fn set_enqueue_time(&self, queue: SyncQueue, enqueue_time: Option<Instant>) {
        let mut enqueue_times = self.enqueue_times.lock().expect("Poisoned lock");
        match enqueue_time {
            Some(time) => enqueue_times.insert(queue, time),
            None => enqueue_times.remove(&queue),
        };
    }

    pub fn set_download_job_target_state(&self, hash: Hash, attached: bool) {
        self.download_job_target_states.lock().expect("Poisoned lock").insert(hash, attached);
    }

    pub fn try_get_download_job_target_state(&self, hash: &Hash) -> Option<bool> {
        self.download_job_target_states.lock().expect("Poisoned lock").get(hash).copied()
    }

    /// Only updates registered targets. Returns whether `hash` was registered.
    pub fn try_update_download_job_target_state(&self, hash: &Hash, attached: bool) -> bool {
        match self.download_job_target_states.lock().expect("Poisoned lock").get_mut(hash) {
            Some(state) => {
                *state = attached;
                true
            }
            None => false,
        }
    }

    pub fn remove_download_job_target_state(&self, hash: &Hash) {
        self.download_job_target_states.lock().expect("Poisoned lock").remove(hash);
    }
}
