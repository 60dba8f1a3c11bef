use crate::{chain::ChainError, network::NetworkError};
use tp_chain::Hash;

#[derive(thiserror::Error, Debug)]
pub enum SyncError {
    #[error("Chain error: {0:#}")]
    Chain(#[from] ChainError),
    #[error("Network error: {0:#}")]
    Network(#[from] NetworkError),
    #[error("Downloaded blocks follow {parent:#} instead of the requested {expected:#}")]
    InvalidBlockSequence { expected: Hash, parent: Hash },
}

impl SyncError {
    /// Transient failures that do not invalidate the work in progress.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Network(NetworkError::PeerUnreachable(_)))
    }
}
