use async_trait::async_trait;
use tp_chain::{Block, ChainSnapshot, Hash};

#[derive(thiserror::Error, Debug)]
pub enum ChainError {
    #[error("Parent block {0:#} is unknown")]
    UnknownParent(Hash),
    #[error("Block {0:#} is unknown")]
    UnknownBlock(Hash),
    #[error("Executing block {hash:#}: {reason}")]
    ExecutionFailed { hash: Hash, reason: String },
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

/// Authoritative chain state. The sync pipeline never caches chain state beyond a single decision.
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait ChainService: Send + Sync {
    async fn get_chain(&self) -> Result<ChainSnapshot, ChainError>;

    async fn get_block_by_hash(&self, hash: &Hash) -> Result<Option<Block>, ChainError>;

    /// Stores a block whose parent is known, moving the longest chain if it becomes the highest branch.
    async fn attach_block(&self, block: Block) -> Result<(), ChainError>;

    /// Executes the branch ending at `hash` and makes it the best chain if it is now the highest executed branch.
    async fn update_chain(&self, hash: &Hash) -> Result<(), ChainError>;
}
