//! Periodic worker draining the download job store, one job at a time.

use crate::{
    chain::ChainService,
    config::BlockSyncConfig,
    download::{BlockDownloadService, DownloadBlocksResult},
    error::SyncError,
    job::{BlockDownloadJob, BlockDownloadJobManager},
    queue::{BlockSyncQueueService, SyncQueue},
    service::BlockSyncService,
};
use std::sync::Arc;
use tokio::{sync::Semaphore, time::Instant};
use tp_chain::{ChainSnapshot, Hash};
use tp_common::service::ServiceContext;

/// A job in progress only continues while its last downloaded block is at most this far ahead of the longest chain.
const MAX_DOWNLOAD_AHEAD_OF_LONGEST_CHAIN: u64 = 8;

pub struct BlockDownloadWorker {
    config: Arc<BlockSyncConfig>,
    chain: Arc<dyn ChainService>,
    queue: Arc<BlockSyncQueueService>,
    download: Arc<BlockDownloadService>,
    job_manager: Arc<BlockDownloadJobManager>,
    /// Single permit: held while a job is being processed.
    busy: Semaphore,
}

impl BlockDownloadWorker {
    pub fn new(sync: &BlockSyncService) -> Self {
        Self {
            config: Arc::new(sync.config().clone()),
            chain: Arc::clone(sync.chain()),
            queue: Arc::clone(sync.queue()),
            download: Arc::clone(sync.download()),
            job_manager: Arc::clone(sync.job_manager()),
            busy: Semaphore::new(1),
        }
    }

    pub async fn run(self: Arc<Self>, ctx: ServiceContext) -> anyhow::Result<()> {
        let mut interval = tokio::time::interval(self.config.download_worker_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        while ctx.run_until_cancelled(interval.tick()).await.is_some() {
            if let Err(err) = self.process_download_job().await {
                tracing::warn!("❗ Download job failed: {err:#}");
            }
        }
        anyhow::Ok(())
    }

    /// Advances the first waiting job by one step. Returns immediately when another call is already processing a job.
    ///
    /// A failing job is removed from the store and its error returned, except for transient peer failures before the
    /// job deadline: the job is then retried on the next call.
    pub async fn process_download_job(&self) -> Result<(), SyncError> {
        let Ok(_permit) = self.busy.try_acquire() else {
            tracing::trace!("Download worker is busy");
            return Ok(());
        };

        loop {
            let chain = self.chain.get_chain().await?;
            let Some(mut job) = self.job_manager.get_first_waiting_job(&chain) else {
                return Ok(());
            };

            if !self.validate_before_download(&job) {
                return Ok(());
            }

            if job.is_finished {
                tracing::debug!("📥 Download job for block #{} {:#} is done", job.target_block_height, job.job_id);
                self.job_manager.remove(&job.job_id);
                continue;
            }

            let result = match self.download(&chain, &job).await {
                Ok(result) => result,
                Err(err) if err.is_retryable() && Instant::now() < job.deadline => {
                    tracing::debug!("Download job for block {:#} will be retried: {err:#}", job.job_id);
                    return Ok(());
                }
                Err(err) => {
                    self.job_manager.remove(&job.job_id);
                    return Err(err);
                }
            };

            if result.download_block_count == 0 {
                tracing::debug!("Nothing left to download for block #{} {:#}", job.target_block_height, job.job_id);
                self.job_manager.remove(&job.job_id);
                continue;
            }

            if job.is_started() {
                self.queue.state().remove_download_job_target_state(&job.current_target_block_hash);
            }
            job.current_target_block_hash = result.last_downloaded_block_hash;
            job.current_target_block_height = result.last_downloaded_block_height;
            job.deadline = Instant::now() + self.config.per_block_deadline * result.download_block_count as u32;
            job.is_finished = result.last_downloaded_block_height >= job.target_block_height;
            tracing::info!(
                "📥 Downloaded {} blocks up to #{} for target #{}",
                result.download_block_count,
                result.last_downloaded_block_height,
                job.target_block_height
            );
            self.job_manager.update(job);
            return Ok(());
        }
    }

    /// Waits for the attach pipeline to catch up: queues must not be backed up, and the last batch of the job must
    /// be attached unless the job deadline passed.
    fn validate_before_download(&self, job: &BlockDownloadJob) -> bool {
        if !self.queue.validate_queue_availability(SyncQueue::BlockSyncAttach)
            || !self.queue.validate_queue_availability(SyncQueue::UpdateChain)
        {
            return false;
        }

        let waiting_for_attach =
            self.queue.state().try_get_download_job_target_state(&job.current_target_block_hash) == Some(false);
        if job.is_started() && waiting_for_attach && Instant::now() < job.deadline {
            tracing::trace!("Waiting for block #{} to be attached", job.current_target_block_height);
            return false;
        }
        true
    }

    async fn download(&self, chain: &ChainSnapshot, job: &BlockDownloadJob) -> Result<DownloadBlocksResult, SyncError> {
        if job.is_started() {
            if job.current_target_block_height > chain.longest_chain_height + MAX_DOWNLOAD_AHEAD_OF_LONGEST_CHAIN {
                return Ok(DownloadBlocksResult::default());
            }
            return self.download_from(job, job.current_target_block_hash, job.current_target_block_height).await;
        }

        // Fresh jobs start from the longest chain. When the peer does not follow it, fall back to the best chain,
        // then to the last irreversible block to recover from a fork.
        let origins = [
            (chain.longest_chain_hash, chain.longest_chain_height),
            (chain.best_chain_hash, chain.best_chain_height),
            (chain.last_irreversible_block_hash, chain.last_irreversible_block_height),
        ];
        let mut result = DownloadBlocksResult::default();
        let mut tried = Vec::with_capacity(origins.len());
        for (hash, height) in origins {
            if tried.contains(&hash) {
                continue;
            }
            tried.push(hash);
            result = self.download_from(job, hash, height).await?;
            if result.download_block_count > 0 {
                break;
            }
            tracing::debug!("Peer does not follow block #{height} {hash:#}");
        }
        Ok(result)
    }

    async fn download_from(
        &self,
        job: &BlockDownloadJob,
        previous_block_hash: Hash,
        previous_block_height: u64,
    ) -> Result<DownloadBlocksResult, SyncError> {
        self.download
            .download_blocks(
                previous_block_hash,
                previous_block_height,
                job.batch_request_block_count,
                self.config.max_block_download_count,
                job.suggested_peer.clone(),
            )
            .await
    }
}
