//! Named serial task queues of the sync pipeline.
//!
//! Every [`SyncQueue`] runs its tasks one at a time, in enqueue order, on its own consumer task. While a task runs,
//! the time at which it was enqueued is published to the [`BlockSyncStateProvider`]. A queue is *busy* when the task
//! it is currently running waited for longer than the queue's age limit: the queue is backed up, and producers
//! should drop work instead of piling more on.

use crate::{config::BlockSyncConfig, state_provider::BlockSyncStateProvider};
use futures::{future::BoxFuture, FutureExt};
use std::{
    fmt,
    future::Future,
    panic::AssertUnwindSafe,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};
use tokio::{
    sync::{mpsc, oneshot},
    time::Instant,
};
use tp_common::AbortOnDrop;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SyncQueue {
    /// Fetching single announced blocks.
    BlockFetch,
    /// Validating and attaching blocks to the chain.
    BlockSyncAttach,
    /// Executing attached blocks and moving the best chain.
    UpdateChain,
}

impl SyncQueue {
    /// In pipeline order.
    pub const ALL: [SyncQueue; 3] = [SyncQueue::BlockFetch, SyncQueue::BlockSyncAttach, SyncQueue::UpdateChain];

    fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for SyncQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BlockFetch => write!(f, "BlockFetchQueue"),
            Self::BlockSyncAttach => write!(f, "BlockSyncAttachQueue"),
            Self::UpdateChain => write!(f, "UpdateChainQueue"),
        }
    }
}

enum QueueMessage {
    Task { enqueued_at: Instant, task: BoxFuture<'static, anyhow::Result<()>> },
    /// Answered once every message sent before it has been handled.
    Barrier(oneshot::Sender<()>),
}

struct QueueHandle {
    sender: mpsc::UnboundedSender<QueueMessage>,
    pending: Arc<AtomicUsize>,
    _consumer: AbortOnDrop<()>,
}

pub struct BlockSyncQueueService {
    age_limits: [Duration; 3],
    state: Arc<BlockSyncStateProvider>,
    queues: Vec<QueueHandle>,
}

impl BlockSyncQueueService {
    /// Spawns one consumer per queue. Must be called within a tokio runtime. Consumers stop when the service is
    /// dropped.
    pub fn new(config: &BlockSyncConfig, state: Arc<BlockSyncStateProvider>) -> Self {
        let queues = SyncQueue::ALL
            .into_iter()
            .map(|queue| {
                let (sender, receiver) = mpsc::unbounded_channel();
                let pending = Arc::new(AtomicUsize::new(0));
                let consumer =
                    AbortOnDrop::spawn(consume_queue(queue, receiver, Arc::clone(&state), Arc::clone(&pending)));
                QueueHandle { sender, pending, _consumer: consumer }
            })
            .collect();

        Self {
            age_limits: [
                config.fetch_block_age_limit,
                config.attach_block_age_limit,
                config.attach_and_execute_block_age_limit,
            ],
            state,
            queues,
        }
    }

    pub fn state(&self) -> &Arc<BlockSyncStateProvider> {
        &self.state
    }

    pub fn age_limit(&self, queue: SyncQueue) -> Duration {
        self.age_limits[queue.index()]
    }

    pub fn enqueue<F>(&self, queue: SyncQueue, task: F)
    where
        F: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let handle = &self.queues[queue.index()];
        handle.pending.fetch_add(1, Ordering::SeqCst);
        let message = QueueMessage::Task { enqueued_at: Instant::now(), task: task.boxed() };
        if handle.sender.send(message).is_err() {
            handle.pending.fetch_sub(1, Ordering::SeqCst);
            tracing::warn!("Dropping task, {queue} consumer has stopped");
        }
    }

    /// False when the task currently running on `queue` waited for longer than the queue's age limit.
    pub fn validate_queue_availability(&self, queue: SyncQueue) -> bool {
        let Some(enqueue_time) = self.state.get_enqueue_time(queue) else {
            return true;
        };
        let waited = Instant::now().saturating_duration_since(enqueue_time);
        if waited > self.age_limit(queue) {
            tracing::warn!("⏳ {queue} is too busy, its current task waited {waited:?}");
            return false;
        }
        true
    }

    /// Number of tasks enqueued on `queue` that have not finished yet.
    pub fn pending(&self, queue: SyncQueue) -> usize {
        self.queues[queue.index()].pending.load(Ordering::SeqCst)
    }

    /// Waits until every task enqueued on `queue` so far has finished.
    pub async fn flush(&self, queue: SyncQueue) {
        let (sender, receiver) = oneshot::channel();
        if self.queues[queue.index()].sender.send(QueueMessage::Barrier(sender)).is_ok() {
            let _ = receiver.await;
        }
    }

    /// Waits until all queues are empty, including tasks enqueued by other tasks in the meantime.
    pub async fn wait_idle(&self) {
        loop {
            let mut idle = true;
            for queue in SyncQueue::ALL {
                while self.pending(queue) > 0 {
                    idle = false;
                    self.flush(queue).await;
                }
            }
            if idle {
                return;
            }
        }
    }
}

async fn consume_queue(
    queue: SyncQueue,
    mut receiver: mpsc::UnboundedReceiver<QueueMessage>,
    state: Arc<BlockSyncStateProvider>,
    pending: Arc<AtomicUsize>,
) {
    while let Some(message) = receiver.recv().await {
        match message {
            QueueMessage::Task { enqueued_at, task } => {
                state.set_enqueue_time(queue, Some(enqueued_at));
                match AssertUnwindSafe(task).catch_unwind().await {
                    Ok(Ok(())) => {}
                    Ok(Err(err)) => tracing::warn!("❗ {queue} task failed: {err:#}"),
                    Err(_) => tracing::error!("❗ {queue} task panicked"),
                }
                state.set_enqueue_time(queue, None);
                pending.fetch_sub(1, Ordering::SeqCst);
            }
            QueueMessage::Barrier(sender) => {
                let _ = sender.send(());
            }
        }
    }
}
