use super::*;
use crate::{
    testing::{ABNORMAL_PEER, UNREACHABLE_PEER},
    ChainService, NetworkError, SyncError,
};
use assert_matches::assert_matches;
use tp_chain::Hash;
use tp_common::service::ServiceContext;

fn enqueue_peer_best(ctx: &SyncTestContext, peer: Option<&str>) -> Hash {
    let target = ctx.peer_block(PEER_BEST_HEIGHT).hash();
    let batch = ctx.sync.config().max_batch_request_block_count;
    ctx.sync.job_manager().enqueue(target, PEER_BEST_HEIGHT, batch, peer.map(Into::into)).unwrap()
}

#[tokio::test]
async fn download_job_runs_to_completion() {
    let ctx = SyncTestContext::new(BlockSyncConfig::default().max_block_download_count(20));
    let job_id = enqueue_peer_best(&ctx, None);

    ctx.worker.process_download_job().await.unwrap();
    ctx.wait_idle().await;

    let chain = ctx.snapshot();
    assert_eq!(chain.best_chain_height, 31);
    let job = ctx.sync.job_manager().store().get_first_waiting_job().unwrap();
    assert_eq!(job.job_id, job_id);
    assert_eq!(job.current_target_block_hash, chain.best_chain_hash);
    assert!(!job.is_finished);
    assert_eq!(ctx.sync.state().try_get_download_job_target_state(&chain.best_chain_hash), Some(true));

    ctx.worker.process_download_job().await.unwrap();
    ctx.wait_idle().await;

    let chain = ctx.snapshot();
    assert_eq!(chain.best_chain_height, PEER_BEST_HEIGHT);
    assert!(ctx.sync.job_manager().store().get_first_waiting_job().unwrap().is_finished);
    // The target of the previous batch is no longer tracked.
    assert_eq!(ctx.sync.state().try_get_download_job_target_state(&ctx.peer_block(31).hash()), None);

    ctx.worker.process_download_job().await.unwrap();
    assert!(ctx.sync.job_manager().store().is_empty());
    assert_eq!(ctx.sync.state().try_get_download_job_target_state(&chain.best_chain_hash), None);
}

#[tokio::test]
async fn job_waits_for_its_last_batch_to_be_attached() {
    let ctx = SyncTestContext::new(BlockSyncConfig::default().max_block_download_count(20));
    enqueue_peer_best(&ctx, None);

    ctx.worker.process_download_job().await.unwrap();
    let requests = ctx.network.requests();
    let current_target = ctx.sync.job_manager().store().get_first_waiting_job().unwrap().current_target_block_hash;
    assert_eq!(ctx.sync.state().try_get_download_job_target_state(&current_target), Some(false));

    // Nothing was attached yet.
    ctx.worker.process_download_job().await.unwrap();
    assert_eq!(ctx.network.requests(), requests);

    ctx.wait_idle().await;
    ctx.worker.process_download_job().await.unwrap();
    assert!(ctx.network.requests() > requests);
}

#[tokio::test]
async fn busy_queues_block_the_worker() {
    let ctx = SyncTestContext::new(BlockSyncConfig::default());
    let best = ctx.snapshot();

    // No job.
    ctx.worker.process_download_job().await.unwrap();
    assert_eq!(ctx.snapshot(), best);

    enqueue_peer_best(&ctx, None);

    ctx.make_busy(SyncQueue::BlockSyncAttach);
    ctx.worker.process_download_job().await.unwrap();
    ctx.wait_idle().await;
    assert_eq!(ctx.snapshot(), best);
    ctx.sync.state().set_enqueue_time(SyncQueue::BlockSyncAttach, None);

    ctx.make_busy(SyncQueue::UpdateChain);
    ctx.worker.process_download_job().await.unwrap();
    ctx.wait_idle().await;
    assert_eq!(ctx.snapshot(), best);
    ctx.sync.state().set_enqueue_time(SyncQueue::UpdateChain, None);

    assert_eq!(ctx.network.requests(), 0);
    assert_eq!(ctx.sync.job_manager().store().len(), 1);
}

#[tokio::test]
async fn jobs_behind_the_best_chain_are_dropped() {
    let ctx = SyncTestContext::new(BlockSyncConfig::default());
    let best = ctx.snapshot();

    let batch = ctx.sync.config().max_batch_request_block_count;
    ctx.sync.job_manager().enqueue(best.best_chain_hash, best.best_chain_height, batch, None).unwrap();
    ctx.sync.job_manager().enqueue(Hash::compute_from("behind"), best.best_chain_height - 1, batch, None).unwrap();

    ctx.worker.process_download_job().await.unwrap();

    assert_eq!(ctx.snapshot(), best);
    assert!(ctx.sync.job_manager().store().is_empty());
    assert_eq!(ctx.network.requests(), 0);
}

#[tokio::test]
async fn job_is_dropped_when_no_peer_follows_the_local_chain() {
    let ctx = SyncTestContext::new(BlockSyncConfig::default());
    ctx.sync.job_manager().enqueue(Hash::compute_from("unknown"), 30, 10, None).unwrap();

    // A local block no peer knows about becomes irreversible: every download origin is unknown to the peers.
    let local = generate_blocks(&ctx.chain.best_block(), 1, "local").remove(0);
    ctx.chain.attach_block(local.clone()).await.unwrap();
    ctx.chain.update_chain(&local.hash()).await.unwrap();
    ctx.chain.set_irreversible(&local.hash()).unwrap();

    ctx.worker.process_download_job().await.unwrap();
    ctx.wait_idle().await;

    assert_eq!(ctx.snapshot().best_chain_hash, local.hash());
    assert!(ctx.sync.job_manager().store().is_empty());
}

#[tokio::test]
async fn abnormal_peer_fails_the_job() {
    let ctx = SyncTestContext::new(BlockSyncConfig::default());
    enqueue_peer_best(&ctx, Some(ABNORMAL_PEER));

    assert_matches!(
        ctx.worker.process_download_job().await,
        Err(SyncError::Network(NetworkError::Abnormal { peer, .. })) if peer == ABNORMAL_PEER
    );
    assert!(ctx.sync.job_manager().store().is_empty());
}

#[tokio::test(start_paused = true)]
async fn unreachable_peer_is_retried_until_the_deadline() {
    let ctx = SyncTestContext::new(BlockSyncConfig::default().job_timeout(Duration::from_secs(10)));
    enqueue_peer_best(&ctx, Some(UNREACHABLE_PEER));

    ctx.worker.process_download_job().await.unwrap();
    assert_eq!(ctx.sync.job_manager().store().len(), 1);

    tokio::time::advance(Duration::from_secs(11)).await;
    assert_matches!(
        ctx.worker.process_download_job().await,
        Err(SyncError::Network(NetworkError::PeerUnreachable(peer))) if peer == UNREACHABLE_PEER
    );
    assert!(ctx.sync.job_manager().store().is_empty());
}

#[tokio::test]
async fn fresh_job_recovers_from_a_fork_through_the_last_irreversible_block() {
    let genesis = Block::genesis(0);
    let shared = generate_blocks(&genesis, 8, "main");
    let fork_point = shared.last().cloned().unwrap();
    let mut local_blocks = shared.clone();
    local_blocks.extend(generate_blocks(&fork_point, 2, "fork"));
    let peer_blocks = generate_blocks(&fork_point, PEER_BEST_HEIGHT - fork_point.height(), "main");
    let target = peer_blocks.last().cloned().unwrap();

    let ctx = SyncTestContext::with_chains(BlockSyncConfig::default(), genesis, local_blocks, peer_blocks);
    ctx.chain.set_irreversible(&fork_point.hash()).unwrap();
    assert_eq!(ctx.snapshot().best_chain_height, LOCAL_BEST_HEIGHT);

    ctx.sync.job_manager().enqueue(target.hash(), target.height(), 10, None).unwrap();
    ctx.worker.process_download_job().await.unwrap();
    ctx.wait_idle().await;

    let chain = ctx.snapshot();
    assert_eq!(chain.best_chain_hash, target.hash());
    assert_eq!(chain.best_chain_height, PEER_BEST_HEIGHT);
}

#[tokio::test]
async fn invalid_block_sequence_fails_the_job() {
    let ctx = SyncTestContext::new(BlockSyncConfig::default());
    let best = ctx.chain.best_block();
    let mut bad = generate_blocks(&best, 3, "main");
    bad.remove(0);
    let expected = best.hash();

    let mut network = crate::MockNetworkService::new();
    network.expect_get_blocks().returning(move |_, _, _| Ok(bad.clone()));

    let sync = BlockSyncService::new(BlockSyncConfig::default(), ctx.chain.clone(), Arc::new(network));
    let worker = BlockDownloadWorker::new(&sync);
    sync.job_manager().enqueue(Hash::compute_from("target"), 30, 10, None).unwrap();

    assert_matches!(
        worker.process_download_job().await,
        Err(SyncError::InvalidBlockSequence { expected: e, .. }) if e == expected
    );
    assert!(sync.job_manager().store().is_empty());
}

#[tokio::test]
async fn failure_after_a_batch_forgets_its_target() {
    let ctx = SyncTestContext::new(BlockSyncConfig::default().max_block_download_count(20));
    let first_batch: Vec<Block> = ctx.peer_blocks[..10].to_vec();
    let first_batch_target = first_batch[9].hash();

    let calls = std::sync::atomic::AtomicUsize::new(0);
    let mut network = crate::MockNetworkService::new();
    network.expect_get_blocks().returning(move |_, _, _| {
        match calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst) {
            0 => Ok(first_batch.clone()),
            _ => Err(NetworkError::Abnormal { peer: "peer".into(), reason: "garbage".into() }),
        }
    });

    let sync = BlockSyncService::new(ctx.sync.config().clone(), ctx.chain.clone(), Arc::new(network));
    let worker = BlockDownloadWorker::new(&sync);
    sync.job_manager().enqueue(ctx.peer_block(PEER_BEST_HEIGHT).hash(), PEER_BEST_HEIGHT, 10, None).unwrap();

    assert_matches!(worker.process_download_job().await, Err(SyncError::Network(NetworkError::Abnormal { .. })));
    sync.queue().wait_idle().await;

    assert!(sync.job_manager().store().is_empty());
    assert_eq!(sync.state().try_get_download_job_target_state(&first_batch_target), None);
}

#[tokio::test]
async fn worker_loop_syncs_until_cancelled() {
    let config = BlockSyncConfig::default().download_worker_interval(Duration::from_millis(10));
    let ctx = SyncTestContext::new(config);
    enqueue_peer_best(&ctx, None);

    let service_ctx = ServiceContext::new();
    let worker = Arc::new(BlockDownloadWorker::new(&ctx.sync));
    let handle = tokio::spawn(worker.run(service_ctx.clone()));

    tokio::time::timeout(Duration::from_secs(10), async {
        while !ctx.sync.job_manager().store().is_empty() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("Download job did not finish");
    assert_eq!(ctx.snapshot().best_chain_height, PEER_BEST_HEIGHT);

    service_ctx.cancel_local();
    handle.await.unwrap().unwrap();
}
