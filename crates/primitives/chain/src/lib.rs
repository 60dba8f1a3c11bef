//! Tessera chain primitives.

mod block;
mod chain;
mod hash;
mod transaction;

pub use block::{Block, BlockHeader, GENESIS_BLOCK_HEIGHT};
pub use chain::{ChainContext, ChainSnapshot};
pub use hash::Hash;
pub use transaction::Transaction;
