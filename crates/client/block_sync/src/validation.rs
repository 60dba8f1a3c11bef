use crate::{announcement::AnnouncementCache, chain::ChainService, error::SyncError, network::PeerPubkey};
use std::sync::Arc;
use tp_chain::{Block, ChainSnapshot, Hash};

/// Outcome of [`BlockSyncValidationService::validate_block_before_attach`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttachDecision {
    Attach,
    /// Already in the chain, nothing to do.
    AlreadyKnown,
    Reject,
}

/// Cheap checks run before any sync work is scheduled.
pub struct BlockSyncValidationService {
    chain: Arc<dyn ChainService>,
    announcement_cache: Arc<AnnouncementCache>,
}

impl BlockSyncValidationService {
    pub fn new(chain: Arc<dyn ChainService>, announcement_cache: Arc<AnnouncementCache>) -> Self {
        Self { chain, announcement_cache }
    }

    /// Rejects announcements of final heights, and repeated announcements of the same block. A repeated announcement
    /// still records its sender as a fallback peer.
    pub fn validate_announcement_before_sync(
        &self,
        chain: &ChainSnapshot,
        block_hash: Hash,
        block_height: u64,
        sender: PeerPubkey,
    ) -> bool {
        if block_height <= chain.last_irreversible_block_height {
            tracing::debug!(
                "Ignoring announcement of block #{block_height} {block_hash:#} at or below LIB #{}",
                chain.last_irreversible_block_height
            );
            return false;
        }
        if !self.announcement_cache.try_add_or_update(block_hash, block_height, sender) {
            tracing::trace!("Ignoring repeated announcement of block #{block_height} {block_hash:#}");
            return false;
        }
        true
    }

    /// Same rules as announcements: a pushed block is also an announcement of itself.
    pub fn validate_block_before_sync(&self, chain: &ChainSnapshot, block: &Block, sender: PeerPubkey) -> bool {
        self.validate_announcement_before_sync(chain, block.hash(), block.height(), sender)
    }

    pub async fn validate_block_before_attach(&self, block: &Block) -> Result<AttachDecision, SyncError> {
        let hash = block.hash();
        if self.chain.get_block_by_hash(&hash).await?.is_some() {
            return Ok(AttachDecision::AlreadyKnown);
        }

        let chain = self.chain.get_chain().await?;
        if block.height() <= chain.last_irreversible_block_height {
            tracing::debug!("Rejecting block #{} {hash:#}: at or below LIB", block.height());
            return Ok(AttachDecision::Reject);
        }
        if !block.transactions_match_header() {
            tracing::warn!("Rejecting block #{} {hash:#}: transactions do not match the header", block.height());
            return Ok(AttachDecision::Reject);
        }
        Ok(AttachDecision::Attach)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::MockChainService;
    use std::time::Duration;
    use tp_chain::Transaction;

    fn chain(lib: u64) -> ChainSnapshot {
        ChainSnapshot { last_irreversible_block_height: lib, best_chain_height: lib + 5, ..Default::default() }
    }

    fn service(chain_service: MockChainService) -> BlockSyncValidationService {
        let cache = AnnouncementCache::new(Duration::from_secs(30));
        BlockSyncValidationService::new(Arc::new(chain_service), Arc::new(cache))
    }

    #[tokio::test]
    async fn announcements() {
        let service = service(MockChainService::new());
        let hash = Hash::compute_from("block");

        assert!(!service.validate_announcement_before_sync(&chain(10), hash, 10, "peer-a".into()));
        assert!(service.validate_announcement_before_sync(&chain(10), hash, 11, "peer-a".into()));
        assert!(!service.validate_announcement_before_sync(&chain(10), hash, 11, "peer-b".into()));
        assert_eq!(service.announcement_cache.try_get_next_sender(&hash).as_deref(), Some("peer-b"));
    }

    #[tokio::test]
    async fn blocks_before_attach() {
        let known = Block::new(Hash::ZERO, 12, 0, vec![]);
        let known_hash = known.hash();
        let mut chain_service = MockChainService::new();
        chain_service
            .expect_get_block_by_hash()
            .returning(move |hash| Ok((*hash == known_hash).then(|| Block::new(Hash::ZERO, 12, 0, vec![]))));
        chain_service.expect_get_chain().returning(|| Ok(chain(10)));
        let service = service(chain_service);

        assert_eq!(service.validate_block_before_attach(&known).await.unwrap(), AttachDecision::AlreadyKnown);

        let final_height = Block::new(Hash::ZERO, 10, 0, vec![]);
        assert_eq!(service.validate_block_before_attach(&final_height).await.unwrap(), AttachDecision::Reject);

        let mut tampered = Block::new(Hash::ZERO, 13, 0, vec![Transaction::default()]);
        tampered.transactions.push(Transaction::default());
        assert_eq!(service.validate_block_before_attach(&tampered).await.unwrap(), AttachDecision::Reject);

        let valid = Block::new(Hash::ZERO, 13, 0, vec![Transaction::default()]);
        assert_eq!(service.validate_block_before_attach(&valid).await.unwrap(), AttachDecision::Attach);
    }
}
