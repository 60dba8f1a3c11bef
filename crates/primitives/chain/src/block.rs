use crate::{Hash, Transaction};
use serde::{Deserialize, Serialize};

pub const GENESIS_BLOCK_HEIGHT: u64 = 1;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockHeader {
    pub previous_block_hash: Hash,
    pub height: u64,
    /// Unix timestamp in milliseconds.
    pub time: u64,
    pub transaction_ids: Vec<Hash>,
}

impl BlockHeader {
    pub fn hash(&self) -> Hash {
        Hash::compute_from_encoded(self)
    }

    pub fn is_genesis(&self) -> bool {
        self.height == GENESIS_BLOCK_HEIGHT && self.previous_block_hash == Hash::ZERO
    }
}

/// A block together with its transactions, as exchanged between peers.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    pub header: BlockHeader,
    pub transactions: Vec<Transaction>,
}

impl Block {
    /// Builds a block on top of `previous_block_hash`, filling in the transaction ids.
    pub fn new(previous_block_hash: Hash, height: u64, time: u64, transactions: Vec<Transaction>) -> Self {
        let transaction_ids = transactions.iter().map(Transaction::id).collect();
        Self { header: BlockHeader { previous_block_hash, height, time, transaction_ids }, transactions }
    }

    pub fn genesis(time: u64) -> Self {
        Self::new(Hash::ZERO, GENESIS_BLOCK_HEIGHT, time, vec![])
    }

    pub fn hash(&self) -> Hash {
        self.header.hash()
    }

    pub fn height(&self) -> u64 {
        self.header.height
    }

    pub fn previous_block_hash(&self) -> Hash {
        self.header.previous_block_hash
    }

    /// Checks that the header's transaction ids match the carried transactions.
    pub fn transactions_match_header(&self) -> bool {
        self.header.transaction_ids.len() == self.transactions.len()
            && self.header.transaction_ids.iter().zip(&self.transactions).all(|(id, tx)| *id == tx.id())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn block_hash_covers_transactions() {
        let tx = Transaction { method_name: "Transfer".into(), ..Default::default() };
        let empty = Block::new(Hash::ZERO, 2, 0, vec![]);
        let with_tx = Block::new(Hash::ZERO, 2, 0, vec![tx]);
        assert_ne!(empty.hash(), with_tx.hash());
        assert!(with_tx.transactions_match_header());
    }

    #[test]
    fn tampered_transactions_are_detected() {
        let tx = Transaction { method_name: "Transfer".into(), ..Default::default() };
        let mut block = Block::new(Hash::ZERO, 2, 0, vec![tx]);
        block.transactions[0].params = vec![1];
        assert!(!block.transactions_match_header());
    }

    #[test]
    fn genesis() {
        let genesis = Block::genesis(0);
        assert!(genesis.header.is_genesis());
        assert_eq!(genesis.height(), GENESIS_BLOCK_HEIGHT);
    }
}
