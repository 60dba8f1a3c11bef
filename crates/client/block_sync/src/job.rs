//! Download jobs: "fetch and attach blocks until this target is reached".

use crate::{config::BlockSyncConfig, network::PeerPubkey, state_provider::BlockSyncStateProvider};
use std::{
    collections::{HashMap, VecDeque},
    sync::{Arc, Mutex},
    time::Duration,
};
use tokio::time::Instant;
use tp_chain::{ChainSnapshot, Hash};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockDownloadJob {
    /// The hash of the target block. There is at most one job per target.
    pub job_id: Hash,
    pub target_block_hash: Hash,
    pub target_block_height: u64,
    pub batch_request_block_count: u64,
    pub suggested_peer: Option<PeerPubkey>,
    /// Last block downloaded so far. Height 0 means the job has not started.
    pub current_target_block_hash: Hash,
    pub current_target_block_height: u64,
    pub deadline: Instant,
    pub created_at: Instant,
    pub is_finished: bool,
}

impl BlockDownloadJob {
    pub fn is_started(&self) -> bool {
        self.current_target_block_height != 0
    }
}

#[derive(Debug, Default)]
struct JobStoreInner {
    jobs: HashMap<Hash, BlockDownloadJob>,
    /// Enqueue order.
    order: VecDeque<Hash>,
}

/// Bounded FIFO store of download jobs.
#[derive(Debug)]
pub struct BlockDownloadJobStore {
    max_job_count: usize,
    inner: Mutex<JobStoreInner>,
}

impl BlockDownloadJobStore {
    pub fn new(max_job_count: usize) -> Self {
        Self { max_job_count, inner: Default::default() }
    }

    /// Fails when the store is full or a job with the same id exists.
    pub fn add(&self, job: BlockDownloadJob) -> bool {
        let mut inner = self.inner.lock().expect("Poisoned lock");
        if inner.jobs.len() >= self.max_job_count || inner.jobs.contains_key(&job.job_id) {
            return false;
        }
        inner.order.push_back(job.job_id);
        inner.jobs.insert(job.job_id, job);
        true
    }

    pub fn get_first_waiting_job(&self) -> Option<BlockDownloadJob> {
        let inner = self.inner.lock().expect("Poisoned lock");
        inner.order.front().and_then(|id| inner.jobs.get(id)).cloned()
    }

    /// Only updates existing jobs.
    pub fn update(&self, job: BlockDownloadJob) -> bool {
        let mut inner = self.inner.lock().expect("Poisoned lock");
        match inner.jobs.get_mut(&job.job_id) {
            Some(stored) => {
                *stored = job;
                true
            }
            None => false,
        }
    }

    pub fn remove(&self, job_id: &Hash) -> Option<BlockDownloadJob> {
        let mut inner = self.inner.lock().expect("Poisoned lock");
        let job = inner.jobs.remove(job_id)?;
        inner.order.retain(|id| id != job_id);
        Some(job)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().expect("Poisoned lock").jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

pub struct BlockDownloadJobManager {
    store: BlockDownloadJobStore,
    state: Arc<BlockSyncStateProvider>,
    job_timeout: Duration,
}

impl BlockDownloadJobManager {
    pub fn new(config: &BlockSyncConfig, state: Arc<BlockSyncStateProvider>) -> Self {
        Self { store: BlockDownloadJobStore::new(config.max_job_count), state, job_timeout: config.job_timeout }
    }

    pub fn store(&self) -> &BlockDownloadJobStore {
        &self.store
    }

    /// Returns the job id, or `None` when the job could not be stored.
    pub fn enqueue(
        &self,
        target_block_hash: Hash,
        target_block_height: u64,
        batch_request_block_count: u64,
        suggested_peer: Option<PeerPubkey>,
    ) -> Option<Hash> {
        let now = Instant::now();
        let job = BlockDownloadJob {
            job_id: target_block_hash,
            target_block_hash,
            target_block_height,
            batch_request_block_count,
            suggested_peer,
            current_target_block_hash: Hash::ZERO,
            current_target_block_height: 0,
            deadline: now + self.job_timeout,
            created_at: now,
            is_finished: false,
        };

        if !self.store.add(job) {
            tracing::debug!("Could not add download job for block #{target_block_height} {target_block_hash:#}");
            return None;
        }
        tracing::debug!("Added download job for block #{target_block_height} {target_block_hash:#}");
        Some(target_block_hash)
    }

    /// First job in enqueue order. Jobs whose target is already covered by the best chain are removed on the way.
    pub fn get_first_waiting_job(&self, chain: &ChainSnapshot) -> Option<BlockDownloadJob> {
        loop {
            let job = self.store.get_first_waiting_job()?;
            if job.target_block_height > chain.best_chain_height {
                return Some(job);
            }
            tracing::debug!(
                "Dropping stale download job for block #{} {:#}",
                job.target_block_height,
                job.target_block_hash
            );
            self.remove(&job.job_id);
        }
    }

    pub fn update(&self, job: BlockDownloadJob) -> bool {
        self.store.update(job)
    }

    /// Removes the job together with the target state of its last downloaded batch.
    pub fn remove(&self, job_id: &Hash) -> Option<BlockDownloadJob> {
        let job = self.store.remove(job_id)?;
        if job.is_started() {
            self.state.remove_download_job_target_state(&job.current_target_block_hash);
        }
        Some(job)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::{fixture, rstest};

    #[fixture]
    fn manager() -> BlockDownloadJobManager {
        BlockDownloadJobManager::new(
            &BlockSyncConfig::default().max_job_count(3),
            Arc::new(BlockSyncStateProvider::new()),
        )
    }

    fn chain(best_chain_height: u64) -> ChainSnapshot {
        ChainSnapshot { best_chain_height, longest_chain_height: best_chain_height, ..Default::default() }
    }

    #[rstest]
    #[tokio::test]
    async fn enqueue_and_get_in_order(manager: BlockDownloadJobManager) {
        let first = manager.enqueue(Hash::compute_from("a"), 20, 10, Some("peer".into())).unwrap();
        let second = manager.enqueue(Hash::compute_from("b"), 30, 10, None).unwrap();
        assert_ne!(first, second);

        let job = manager.get_first_waiting_job(&chain(11)).unwrap();
        assert_eq!(job.job_id, first);
        assert_eq!(job.target_block_height, 20);
        assert_eq!(job.suggested_peer.as_deref(), Some("peer"));
        assert!(!job.is_started());
        assert!(job.deadline > job.created_at);

        manager.remove(&first);
        assert_eq!(manager.get_first_waiting_job(&chain(11)).unwrap().job_id, second);
    }

    #[rstest]
    #[tokio::test]
    async fn duplicate_and_full(manager: BlockDownloadJobManager) {
        assert!(manager.enqueue(Hash::compute_from("a"), 20, 10, None).is_some());
        assert!(manager.enqueue(Hash::compute_from("a"), 20, 10, None).is_none());
        assert!(manager.enqueue(Hash::compute_from("b"), 21, 10, None).is_some());
        assert!(manager.enqueue(Hash::compute_from("c"), 22, 10, None).is_some());
        assert!(manager.enqueue(Hash::compute_from("d"), 23, 10, None).is_none());
        assert_eq!(manager.store().len(), 3);
    }

    #[rstest]
    #[tokio::test]
    async fn stale_jobs_are_pruned(manager: BlockDownloadJobManager) {
        let stale = manager.enqueue(Hash::compute_from("a"), 10, 10, None).unwrap();
        let fresh = manager.enqueue(Hash::compute_from("b"), 30, 10, None).unwrap();

        let job = manager.get_first_waiting_job(&chain(11)).unwrap();
        assert_eq!(job.job_id, fresh);
        assert!(manager.store().remove(&stale).is_none());
        assert_eq!(manager.store().len(), 1);

        // Started jobs are pruned too, along with their target state.
        let current = Hash::compute_from("current");
        manager.state.set_download_job_target_state(current, true);
        let mut job = job;
        job.current_target_block_height = 25;
        job.current_target_block_hash = current;
        assert!(manager.update(job.clone()));
        assert_eq!(manager.get_first_waiting_job(&chain(29)), Some(job));

        assert_eq!(manager.get_first_waiting_job(&chain(30)), None);
        assert!(manager.store().is_empty());
        assert_eq!(manager.state.try_get_download_job_target_state(&current), None);
        assert!(manager.remove(&fresh).is_none());
    }
}
