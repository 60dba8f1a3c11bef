use async_trait::async_trait;
use tp_chain::{Block, Hash};

/// Public key identifying a peer.
pub type PeerPubkey = String;

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum NetworkError {
    /// The request could not be delivered or timed out. Worth retrying later.
    #[error("Peer {0} is unreachable")]
    PeerUnreachable(PeerPubkey),
    /// The peer answered with something that cannot be used.
    #[error("Abnormal response from peer {peer}: {reason}")]
    Abnormal { peer: PeerPubkey, reason: String },
}

#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait NetworkService: Send + Sync {
    /// Up to `count` consecutive blocks following `previous_block_hash`. An empty list means the peer does not know
    /// `previous_block_hash` or has nothing after it.
    async fn get_blocks(
        &self,
        previous_block_hash: &Hash,
        count: u64,
        peer: Option<PeerPubkey>,
    ) -> Result<Vec<Block>, NetworkError>;

    async fn get_block_by_hash(&self, hash: &Hash, peer: Option<PeerPubkey>) -> Result<Option<Block>, NetworkError>;
}
