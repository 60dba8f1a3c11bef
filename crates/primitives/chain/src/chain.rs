use crate::Hash;
use serde::{Deserialize, Serialize};

/// Point-in-time view of the chain heads, read from the chain service at decision points.
///
/// - The *longest chain* is the highest branch that has been attached, executed or not.
/// - The *best chain* is the highest branch whose blocks have all been executed successfully.
/// - The *last irreversible block* (LIB) is final: nothing at or below its height can be replaced.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainSnapshot {
    pub best_chain_hash: Hash,
    pub best_chain_height: u64,
    pub longest_chain_hash: Hash,
    pub longest_chain_height: u64,
    pub last_irreversible_block_hash: Hash,
    pub last_irreversible_block_height: u64,
}

/// Pins the state view used to read contract state, e.g. during resource extraction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChainContext {
    pub block_hash: Hash,
    pub block_height: u64,
}

impl ChainContext {
    pub fn new(block_hash: Hash, block_height: u64) -> Self {
        Self { block_hash, block_height }
    }
}

impl From<&ChainSnapshot> for ChainContext {
    fn from(chain: &ChainSnapshot) -> Self {
        Self { block_hash: chain.best_chain_hash, block_height: chain.best_chain_height }
    }
}
