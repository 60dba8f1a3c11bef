use crate::{
    attach::BlockSyncAttachService,
    chain::ChainService,
    error::SyncError,
    network::{NetworkService, PeerPubkey},
};
use std::sync::Arc;
use tp_chain::Hash;

/// Fetches a single announced block and hands it to the attach pipeline.
pub struct BlockFetchService {
    chain: Arc<dyn ChainService>,
    network: Arc<dyn NetworkService>,
    attach: Arc<BlockSyncAttachService>,
}

impl BlockFetchService {
    pub fn new(
        chain: Arc<dyn ChainService>,
        network: Arc<dyn NetworkService>,
        attach: Arc<BlockSyncAttachService>,
    ) -> Self {
        Self { chain, network, attach }
    }

    /// Returns true when the block is already local or was fetched and enqueued for attach. Peer failures are
    /// reported as false so that the caller can retry, possibly with another peer.
    pub async fn fetch_block(
        &self,
        block_hash: Hash,
        block_height: u64,
        suggested_peer: Option<PeerPubkey>,
    ) -> Result<bool, SyncError> {
        if self.chain.get_block_by_hash(&block_hash).await?.is_some() {
            tracing::trace!("Block #{block_height} {block_hash:#} is already local");
            return Ok(true);
        }

        let block = match self.network.get_block_by_hash(&block_hash, suggested_peer.clone()).await {
            Ok(Some(block)) => block,
            Ok(None) => {
                tracing::debug!("Peer {suggested_peer:?} does not have block #{block_height} {block_hash:#}");
                return Ok(false);
            }
            Err(err) => {
                tracing::debug!("Fetching block #{block_height} {block_hash:#}: {err:#}");
                return Ok(false);
            }
        };

        if block.hash() != block_hash {
            tracing::warn!("Peer {suggested_peer:?} answered {:#} when asked for {block_hash:#}", block.hash());
            return Ok(false);
        }

        self.attach.enqueue_attach_block(block, suggested_peer, None);
        Ok(true)
    }
}
