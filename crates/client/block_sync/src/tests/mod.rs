use crate::{
    testing::{generate_blocks, InMemoryChain, TestNetwork},
    BlockDownloadWorker, BlockSyncConfig, BlockSyncService, SyncQueue,
};
use std::{sync::Arc, time::Duration};
use tokio::time::Instant;
use tp_chain::{Block, ChainSnapshot};

mod worker;

/// Height of the local best chain when a test starts.
const LOCAL_BEST_HEIGHT: u64 = 11;
/// Height of the best chain served by the peers.
const PEER_BEST_HEIGHT: u64 = 40;

/// A local chain of [`LOCAL_BEST_HEIGHT`] executed blocks, and peers serving the same chain extended up to
/// [`PEER_BEST_HEIGHT`].
struct SyncTestContext {
    chain: Arc<InMemoryChain>,
    network: Arc<TestNetwork>,
    /// Peer blocks above the local best chain, in height order.
    peer_blocks: Vec<Block>,
    sync: BlockSyncService,
    worker: BlockDownloadWorker,
}

impl SyncTestContext {
    fn new(config: BlockSyncConfig) -> Self {
        let genesis = Block::genesis(0);
        let local_blocks = generate_blocks(&genesis, LOCAL_BEST_HEIGHT - 1, "main");
        let local_best = local_blocks.last().cloned().unwrap_or_else(|| genesis.clone());
        let peer_blocks = generate_blocks(&local_best, PEER_BEST_HEIGHT - LOCAL_BEST_HEIGHT, "main");
        Self::with_chains(config, genesis, local_blocks, peer_blocks)
    }

    /// `local_blocks` are executed locally, the peers serve them followed by `peer_blocks`.
    fn with_chains(
        config: BlockSyncConfig,
        genesis: Block,
        local_blocks: Vec<Block>,
        peer_blocks: Vec<Block>,
    ) -> Self {
        let chain = Arc::new(InMemoryChain::with_blocks(genesis.clone(), local_blocks.clone()));
        let network = Arc::new(TestNetwork::new(
            std::iter::once(genesis).chain(local_blocks).chain(peer_blocks.iter().cloned()),
        ));
        let sync = BlockSyncService::new(config, chain.clone(), network.clone());
        let worker = BlockDownloadWorker::new(&sync);
        Self { chain, network, peer_blocks, sync, worker }
    }

    fn snapshot(&self) -> ChainSnapshot {
        self.chain.snapshot()
    }

    /// Peer block at `height`.
    fn peer_block(&self, height: u64) -> &Block {
        &self.peer_blocks[(height - LOCAL_BEST_HEIGHT - 1) as usize]
    }

    /// Marks `queue` as running a task that waited just over its age limit.
    fn make_busy(&self, queue: SyncQueue) {
        let waited = self.sync.queue().age_limit(queue) + Duration::from_millis(100);
        self.sync.state().set_enqueue_time(queue, Some(Instant::now() - waited));
    }

    async fn wait_idle(&self) {
        self.sync.queue().wait_idle().await;
    }
}
