//! Entry point of the sync pipeline: decides, for every announcement or pushed block, whether to fetch it directly
//! or to hand it to the download worker.

use crate::{
    announcement::AnnouncementCache,
    attach::BlockSyncAttachService,
    chain::ChainService,
    config::BlockSyncConfig,
    download::BlockDownloadService,
    error::SyncError,
    fetch::BlockFetchService,
    job::BlockDownloadJobManager,
    network::{NetworkService, PeerPubkey},
    queue::{BlockSyncQueueService, SyncQueue},
    state_provider::BlockSyncStateProvider,
    validation::BlockSyncValidationService,
};
use std::sync::Arc;
use tp_chain::{Block, ChainSnapshot, Hash};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncAnnouncementDto {
    pub sync_block_hash: Hash,
    pub sync_block_height: u64,
    pub batch_request_block_count: u64,
    pub suggested_peer: Option<PeerPubkey>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncBlockDto {
    pub block: Block,
    pub batch_request_block_count: u64,
    pub suggested_peer: Option<PeerPubkey>,
}

#[derive(Clone)]
pub struct BlockSyncService {
    config: Arc<BlockSyncConfig>,
    chain: Arc<dyn ChainService>,
    queue: Arc<BlockSyncQueueService>,
    announcement_cache: Arc<AnnouncementCache>,
    validation: Arc<BlockSyncValidationService>,
    attach: Arc<BlockSyncAttachService>,
    fetch: Arc<BlockFetchService>,
    download: Arc<BlockDownloadService>,
    job_manager: Arc<BlockDownloadJobManager>,
}

impl BlockSyncService {
    /// Wires the whole pipeline. Must be called within a tokio runtime, see [`BlockSyncQueueService::new`].
    pub fn new(config: BlockSyncConfig, chain: Arc<dyn ChainService>, network: Arc<dyn NetworkService>) -> Self {
        let state = Arc::new(BlockSyncStateProvider::new());
        let queue = Arc::new(BlockSyncQueueService::new(&config, Arc::clone(&state)));
        let announcement_cache = Arc::new(AnnouncementCache::new(config.announcement_cache_ttl));
        let validation =
            Arc::new(BlockSyncValidationService::new(Arc::clone(&chain), Arc::clone(&announcement_cache)));
        let attach =
            Arc::new(BlockSyncAttachService::new(Arc::clone(&chain), Arc::clone(&queue), Arc::clone(&validation)));
        let fetch = Arc::new(BlockFetchService::new(Arc::clone(&chain), Arc::clone(&network), Arc::clone(&attach)));
        let download = Arc::new(BlockDownloadService::new(network, Arc::clone(&attach), Arc::clone(&state)));
        let job_manager = Arc::new(BlockDownloadJobManager::new(&config, state));

        Self {
            config: Arc::new(config),
            chain,
            queue,
            announcement_cache,
            validation,
            attach,
            fetch,
            download,
            job_manager,
        }
    }

    pub fn config(&self) -> &BlockSyncConfig {
        &self.config
    }

    pub fn chain(&self) -> &Arc<dyn ChainService> {
        &self.chain
    }

    pub fn queue(&self) -> &Arc<BlockSyncQueueService> {
        &self.queue
    }

    pub fn state(&self) -> &Arc<BlockSyncStateProvider> {
        self.queue.state()
    }

    pub fn announcement_cache(&self) -> &Arc<AnnouncementCache> {
        &self.announcement_cache
    }

    pub fn download(&self) -> &Arc<BlockDownloadService> {
        &self.download
    }

    pub fn job_manager(&self) -> &Arc<BlockDownloadJobManager> {
        &self.job_manager
    }

    fn is_small_gap(&self, chain: &ChainSnapshot, height: u64) -> bool {
        height <= chain.longest_chain_height + self.config.block_sync_mode_height_offset
    }

    /// Validates an announcement received from `sender` against the current chain, then syncs it.
    pub async fn handle_announcement(
        &self,
        block_hash: Hash,
        block_height: u64,
        sender: PeerPubkey,
    ) -> Result<(), SyncError> {
        let chain = self.chain.get_chain().await?;
        if !self.validation.validate_announcement_before_sync(&chain, block_hash, block_height, sender.clone()) {
            return Ok(());
        }
        let dto = SyncAnnouncementDto {
            sync_block_hash: block_hash,
            sync_block_height: block_height,
            batch_request_block_count: self.config.max_batch_request_block_count,
            suggested_peer: Some(sender),
        };
        self.sync_by_announcement(&chain, dto);
        Ok(())
    }

    /// Validates a block pushed by `sender` against the current chain, then syncs it.
    pub async fn handle_block(&self, block: Block, sender: PeerPubkey) -> Result<(), SyncError> {
        let chain = self.chain.get_chain().await?;
        if !self.validation.validate_block_before_sync(&chain, &block, sender.clone()) {
            return Ok(());
        }
        let dto = SyncBlockDto {
            block,
            batch_request_block_count: self.config.max_batch_request_block_count,
            suggested_peer: Some(sender),
        };
        self.sync_by_block(&chain, dto);
        Ok(())
    }

    pub fn sync_by_announcement(&self, chain: &ChainSnapshot, dto: SyncAnnouncementDto) {
        if self.is_small_gap(chain, dto.sync_block_height) {
            if !self.queue.validate_queue_availability(SyncQueue::BlockFetch) {
                tracing::warn!(
                    "Dropping announcement of block #{} {:#}, the fetch queue is busy",
                    dto.sync_block_height,
                    dto.sync_block_hash
                );
                return;
            }
            self.enqueue_fetch_block_job(dto, self.config.fetch_block_retry_times);
            return;
        }

        self.enqueue_download_job(
            chain,
            dto.sync_block_hash,
            dto.sync_block_height,
            dto.batch_request_block_count,
            dto.suggested_peer,
        );
    }

    pub fn sync_by_block(&self, chain: &ChainSnapshot, dto: SyncBlockDto) {
        let hash = dto.block.hash();
        let height = dto.block.height();
        if self.is_small_gap(chain, height) {
            if !self.queue.validate_queue_availability(SyncQueue::BlockSyncAttach)
                || !self.queue.validate_queue_availability(SyncQueue::UpdateChain)
            {
                tracing::warn!("Dropping block #{height} {hash:#}, the attach queues are busy");
                return;
            }
            self.attach.enqueue_attach_block(dto.block, dto.suggested_peer, None);
            return;
        }

        self.enqueue_download_job(chain, hash, height, dto.batch_request_block_count, dto.suggested_peer);
    }

    fn enqueue_download_job(
        &self,
        chain: &ChainSnapshot,
        hash: Hash,
        height: u64,
        batch_request_block_count: u64,
        suggested_peer: Option<PeerPubkey>,
    ) {
        tracing::debug!(
            "Block #{height} {hash:#} is far ahead of the longest chain #{}, enqueuing a download job",
            chain.longest_chain_height
        );
        self.job_manager.enqueue(hash, height, batch_request_block_count, suggested_peer);
    }

    /// Fetches on [`SyncQueue::BlockFetch`]. A failed fetch is retried `retry_times` times, then with the next peer
    /// that announced the block, if any. Nothing is fetched nor retried while the attach queues are busy.
    fn enqueue_fetch_block_job(&self, dto: SyncAnnouncementDto, retry_times: u32) {
        let this = self.clone();
        self.queue.enqueue(SyncQueue::BlockFetch, async move {
            if !this.queue.validate_queue_availability(SyncQueue::BlockSyncAttach)
                || !this.queue.validate_queue_availability(SyncQueue::UpdateChain)
            {
                tracing::warn!(
                    "Dropping fetch of block #{} {:#}, the attach queues are busy",
                    dto.sync_block_height,
                    dto.sync_block_hash
                );
                return anyhow::Ok(());
            }

            let peer = dto.suggested_peer.clone();
            if this.fetch.fetch_block(dto.sync_block_hash, dto.sync_block_height, peer).await? {
                this.announcement_cache.clear_next_senders(&dto.sync_block_hash);
                return anyhow::Ok(());
            }

            if retry_times > 0 {
                this.enqueue_fetch_block_job(dto, retry_times - 1);
            } else if let Some(next_sender) = this.announcement_cache.try_get_next_sender(&dto.sync_block_hash) {
                let (height, hash) = (dto.sync_block_height, dto.sync_block_hash);
                tracing::debug!("Retrying block #{height} {hash:#} with {next_sender}");
                let dto = SyncAnnouncementDto { suggested_peer: Some(next_sender), ..dto };
                this.enqueue_fetch_block_job(dto, this.config.fetch_block_retry_times);
            } else {
                tracing::debug!("Giving up on block #{} {:#}", dto.sync_block_height, dto.sync_block_hash);
            }
            anyhow::Ok(())
        });
    }
}
