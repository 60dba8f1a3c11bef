use crate::{
    chain::ChainService,
    network::PeerPubkey,
    queue::{BlockSyncQueueService, SyncQueue},
    validation::{AttachDecision, BlockSyncValidationService},
};
use std::sync::Arc;
use tp_chain::Block;

/// Called once the block is part of the chain, either because it was attached and executed or because it was
/// already known.
pub type AttachCallback = Box<dyn FnOnce() + Send + 'static>;

/// Two-step attach: the block is validated and attached on [`SyncQueue::BlockSyncAttach`], then executed on
/// [`SyncQueue::UpdateChain`].
pub struct BlockSyncAttachService {
    chain: Arc<dyn ChainService>,
    queue: Arc<BlockSyncQueueService>,
    validation: Arc<BlockSyncValidationService>,
}

impl BlockSyncAttachService {
    pub fn new(
        chain: Arc<dyn ChainService>,
        queue: Arc<BlockSyncQueueService>,
        validation: Arc<BlockSyncValidationService>,
    ) -> Self {
        Self { chain, queue, validation }
    }

    pub fn enqueue_attach_block(&self, block: Block, sender: Option<PeerPubkey>, callback: Option<AttachCallback>) {
        let chain = Arc::clone(&self.chain);
        let queue = Arc::clone(&self.queue);
        let validation = Arc::clone(&self.validation);

        self.queue.enqueue(SyncQueue::BlockSyncAttach, async move {
            let hash = block.hash();
            let height = block.height();
            match validation.validate_block_before_attach(&block).await? {
                AttachDecision::Reject => {
                    tracing::debug!("Not attaching block #{height} {hash:#} from {sender:?}");
                    return anyhow::Ok(());
                }
                AttachDecision::AlreadyKnown => {
                    if let Some(callback) = callback {
                        callback();
                    }
                    return anyhow::Ok(());
                }
                AttachDecision::Attach => {}
            }

            chain.attach_block(block).await?;
            tracing::trace!("Attached block #{height} {hash:#}");

            queue.enqueue(SyncQueue::UpdateChain, async move {
                chain.update_chain(&hash).await?;
                tracing::debug!("🔗 Executed synced block #{height} {hash:#}");
                if let Some(callback) = callback {
                    callback();
                }
                anyhow::Ok(())
            });
            anyhow::Ok(())
        });
    }
}
