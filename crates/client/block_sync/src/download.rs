use crate::{
    attach::{AttachCallback, BlockSyncAttachService},
    error::SyncError,
    network::{NetworkService, PeerPubkey},
    state_provider::BlockSyncStateProvider,
};
use std::sync::Arc;
use tp_chain::Hash;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DownloadBlocksResult {
    pub download_block_count: u64,
    /// Last block enqueued for attach. Only meaningful when `download_block_count` is not zero.
    pub last_downloaded_block_hash: Hash,
    pub last_downloaded_block_height: u64,
}

/// Pulls consecutive blocks from a peer, batch by batch, and enqueues them for attach in height order.
pub struct BlockDownloadService {
    network: Arc<dyn NetworkService>,
    attach: Arc<BlockSyncAttachService>,
    state: Arc<BlockSyncStateProvider>,
}

impl BlockDownloadService {
    pub fn new(
        network: Arc<dyn NetworkService>,
        attach: Arc<BlockSyncAttachService>,
        state: Arc<BlockSyncStateProvider>,
    ) -> Self {
        Self { network, attach, state }
    }

    /// Downloads up to `max_block_download_count` blocks following `previous_block_hash`.
    ///
    /// The last block of the last batch is registered as a download target: its state flips to attached once the
    /// attach pipeline has executed it.
    pub async fn download_blocks(
        &self,
        previous_block_hash: Hash,
        previous_block_height: u64,
        batch_request_block_count: u64,
        max_block_download_count: u64,
        suggested_peer: Option<PeerPubkey>,
    ) -> Result<DownloadBlocksResult, SyncError> {
        let mut registered_target = None;
        let result = self
            .download_batches(
                previous_block_hash,
                previous_block_height,
                batch_request_block_count,
                max_block_download_count,
                suggested_peer,
                &mut registered_target,
            )
            .await;
        if result.is_err() {
            // The worker never learns about a target registered before the failure.
            if let Some(target) = registered_target {
                self.state.remove_download_job_target_state(&target);
            }
        }
        result
    }

    async fn download_batches(
        &self,
        previous_block_hash: Hash,
        previous_block_height: u64,
        batch_request_block_count: u64,
        max_block_download_count: u64,
        suggested_peer: Option<PeerPubkey>,
        registered_target: &mut Option<Hash>,
    ) -> Result<DownloadBlocksResult, SyncError> {
        let mut result = DownloadBlocksResult {
            download_block_count: 0,
            last_downloaded_block_hash: previous_block_hash,
            last_downloaded_block_height: previous_block_height,
        };
        let batch_request_block_count = batch_request_block_count.max(1);

        while result.download_block_count < max_block_download_count {
            let count = batch_request_block_count.min(max_block_download_count - result.download_block_count);
            let blocks =
                self.network.get_blocks(&result.last_downloaded_block_hash, count, suggested_peer.clone()).await?;
            let Some(last_block) = blocks.last() else {
                break;
            };
            let batch_len = blocks.len() as u64;

            let mut parent = result.last_downloaded_block_hash;
            for block in &blocks {
                if block.previous_block_hash() != parent {
                    let actual = block.previous_block_hash();
                    return Err(SyncError::InvalidBlockSequence { expected: parent, parent: actual });
                }
                parent = block.hash();
            }

            let target_hash = last_block.hash();
            let target_height = last_block.height();
            self.state.set_download_job_target_state(target_hash, false);
            if let Some(previous) = registered_target.replace(target_hash) {
                self.state.remove_download_job_target_state(&previous);
            }

            for block in blocks {
                let callback = (block.hash() == target_hash).then(|| {
                    let state = Arc::clone(&self.state);
                    Box::new(move || {
                        state.try_update_download_job_target_state(&target_hash, true);
                    }) as AttachCallback
                });
                self.attach.enqueue_attach_block(block, suggested_peer.clone(), callback);
            }

            result.download_block_count += batch_len;
            result.last_downloaded_block_hash = target_hash;
            result.last_downloaded_block_height = target_height;
            tracing::debug!("Downloaded {batch_len} blocks up to #{target_height} {target_hash:#}");

            if batch_len < count {
                break;
            }
        }

        Ok(result)
    }
}
