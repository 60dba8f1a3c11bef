//! In-memory collaborators for sync tests.

use crate::{
    chain::{ChainError, ChainService},
    network::{NetworkError, NetworkService, PeerPubkey},
};
use async_trait::async_trait;
use std::{
    collections::{HashMap, HashSet},
    sync::{
        atomic::{AtomicUsize, Ordering},
        Mutex,
    },
};
use tp_chain::{Block, ChainSnapshot, Hash, Transaction};

/// Peers answering [`TestNetwork`] requests with [`NetworkError::Abnormal`].
pub const ABNORMAL_PEER: &str = "AbnormalPeer";
/// Peers answering [`TestNetwork`] requests with [`NetworkError::PeerUnreachable`].
pub const UNREACHABLE_PEER: &str = "UnreachablePeer";

/// Builds `count` consecutive blocks on top of `parent`. Different `fork` values give different blocks at the same
/// heights.
pub fn generate_blocks(parent: &Block, count: u64, fork: &str) -> Vec<Block> {
    let mut previous = (parent.hash(), parent.height());
    (0..count)
        .map(|_| {
            let height = previous.1 + 1;
            let tx = Transaction {
                from: "miner".into(),
                to: "consensus".into(),
                ref_block_number: previous.1,
                method_name: fork.into(),
                params: height.to_le_bytes().to_vec(),
            };
            let block = Block::new(previous.0, height, height * 4000, vec![tx]);
            previous = (block.hash(), height);
            block
        })
        .collect()
}

#[derive(Debug, Default)]
struct InMemoryChainInner {
    blocks: HashMap<Hash, Block>,
    executed: HashSet<Hash>,
    chain: ChainSnapshot,
}

/// Chain service over a block tree held in memory. Attached blocks move the longest chain, executed blocks move the
/// best chain.
#[derive(Debug)]
pub struct InMemoryChain {
    inner: Mutex<InMemoryChainInner>,
}

impl InMemoryChain {
    pub fn new(genesis: Block) -> Self {
        let hash = genesis.hash();
        let height = genesis.height();
        let chain = ChainSnapshot {
            best_chain_hash: hash,
            best_chain_height: height,
            longest_chain_hash: hash,
            longest_chain_height: height,
            last_irreversible_block_hash: hash,
            last_irreversible_block_height: height,
        };
        let inner = InMemoryChainInner {
            blocks: HashMap::from([(hash, genesis)]),
            executed: HashSet::from([hash]),
            chain,
        };
        Self { inner: Mutex::new(inner) }
    }

    /// A chain made of `genesis` followed by the executed `blocks`.
    pub fn with_blocks(genesis: Block, blocks: impl IntoIterator<Item = Block>) -> Self {
        let chain = Self::new(genesis);
        for block in blocks {
            let hash = block.hash();
            chain.insert(block).expect("Test blocks must be consecutive");
            chain.execute(&hash).expect("Test blocks must be consecutive");
        }
        chain
    }

    pub fn snapshot(&self) -> ChainSnapshot {
        self.inner.lock().expect("Poisoned lock").chain.clone()
    }

    pub fn best_block(&self) -> Block {
        let inner = self.inner.lock().expect("Poisoned lock");
        inner.blocks[&inner.chain.best_chain_hash].clone()
    }

    pub fn contains(&self, hash: &Hash) -> bool {
        self.inner.lock().expect("Poisoned lock").blocks.contains_key(hash)
    }

    pub fn set_irreversible(&self, hash: &Hash) -> Result<(), ChainError> {
        let mut inner = self.inner.lock().expect("Poisoned lock");
        let height = inner.blocks.get(hash).ok_or(ChainError::UnknownBlock(*hash))?.height();
        inner.chain.last_irreversible_block_hash = *hash;
        inner.chain.last_irreversible_block_height = height;
        Ok(())
    }

    fn insert(&self, block: Block) -> Result<(), ChainError> {
        let mut inner = self.inner.lock().expect("Poisoned lock");
        if !inner.blocks.contains_key(&block.previous_block_hash()) {
            return Err(ChainError::UnknownParent(block.previous_block_hash()));
        }
        let hash = block.hash();
        if block.height() > inner.chain.longest_chain_height {
            inner.chain.longest_chain_hash = hash;
            inner.chain.longest_chain_height = block.height();
        }
        inner.blocks.insert(hash, block);
        Ok(())
    }

    fn execute(&self, hash: &Hash) -> Result<(), ChainError> {
        let mut inner = self.inner.lock().expect("Poisoned lock");
        let height = inner.blocks.get(hash).ok_or(ChainError::UnknownBlock(*hash))?.height();

        let mut cursor = *hash;
        while !inner.executed.contains(&cursor) {
            let parent = inner.blocks.get(&cursor).ok_or(ChainError::UnknownBlock(cursor))?.previous_block_hash();
            inner.executed.insert(cursor);
            cursor = parent;
        }

        if height > inner.chain.best_chain_height {
            inner.chain.best_chain_hash = *hash;
            inner.chain.best_chain_height = height;
        }
        Ok(())
    }
}

#[async_trait]
impl ChainService for InMemoryChain {
    async fn get_chain(&self) -> Result<ChainSnapshot, ChainError> {
        Ok(self.snapshot())
    }

    async fn get_block_by_hash(&self, hash: &Hash) -> Result<Option<Block>, ChainError> {
        Ok(self.inner.lock().expect("Poisoned lock").blocks.get(hash).cloned())
    }

    async fn attach_block(&self, block: Block) -> Result<(), ChainError> {
        self.insert(block)
    }

    async fn update_chain(&self, hash: &Hash) -> Result<(), ChainError> {
        self.execute(hash)
    }
}

/// Network where every peer serves the same block list, except [`ABNORMAL_PEER`] and [`UNREACHABLE_PEER`].
#[derive(Debug, Default)]
pub struct TestNetwork {
    blocks: HashMap<Hash, Block>,
    /// Child of each block on the served chain.
    next: HashMap<Hash, Hash>,
    requests: AtomicUsize,
}

impl TestNetwork {
    pub fn new(blocks: impl IntoIterator<Item = Block>) -> Self {
        let mut network = Self::default();
        network.serve(blocks);
        network
    }

    pub fn serve(&mut self, blocks: impl IntoIterator<Item = Block>) {
        for block in blocks {
            let hash = block.hash();
            self.next.insert(block.previous_block_hash(), hash);
            self.blocks.insert(hash, block);
        }
    }

    /// Number of requests received so far.
    pub fn requests(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }

    fn check_peer(&self, peer: &Option<PeerPubkey>) -> Result<(), NetworkError> {
        self.requests.fetch_add(1, Ordering::SeqCst);
        match peer.as_deref() {
            Some(ABNORMAL_PEER) => {
                Err(NetworkError::Abnormal { peer: ABNORMAL_PEER.into(), reason: "Malformed response".into() })
            }
            Some(UNREACHABLE_PEER) => Err(NetworkError::PeerUnreachable(UNREACHABLE_PEER.into())),
            _ => Ok(()),
        }
    }
}

#[async_trait]
impl NetworkService for TestNetwork {
    async fn get_blocks(
        &self,
        previous_block_hash: &Hash,
        count: u64,
        peer: Option<PeerPubkey>,
    ) -> Result<Vec<Block>, NetworkError> {
        self.check_peer(&peer)?;
        let mut blocks = vec![];
        let mut cursor = *previous_block_hash;
        while (blocks.len() as u64) < count {
            let Some(block) = self.next.get(&cursor).and_then(|hash| self.blocks.get(hash)) else {
                break;
            };
            cursor = block.hash();
            blocks.push(block.clone());
        }
        Ok(blocks)
    }

    async fn get_block_by_hash(&self, hash: &Hash, peer: Option<PeerPubkey>) -> Result<Option<Block>, NetworkError> {
        self.check_peer(&peer)?;
        Ok(self.blocks.get(hash).cloned())
    }
}
