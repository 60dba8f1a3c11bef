use crate::{
    executor::{
        execute_sequential, ExecutionContext, ParallelBlockExecutor, SequentialOutput, TransactionResult,
        TransactionStatus,
    },
    state::{OverlayState, StateChanges, StateReader},
};
use std::sync::Arc;
use tp_chain::{Block, BlockHeader, Hash, Transaction};
use tp_common::{service::ServiceContext, spawn_rayon_task};

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ExecutionError {
    #[error("System transaction {transaction_id:#} failed: {reason}")]
    SystemTransactionFailed { transaction_id: Hash, reason: String },
}

/// Everything produced by executing one block.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BlockExecutedSet {
    /// The input header with `transaction_ids` set to the executed transactions, system transactions first.
    pub header: BlockHeader,
    pub transactions: Vec<Transaction>,
    pub transaction_results: Vec<TransactionResult>,
    /// Changes relative to the base state.
    pub state: StateChanges,
    pub conflicting: Vec<Transaction>,
    pub not_executed: Vec<Transaction>,
}

impl BlockExecutedSet {
    pub fn block(&self) -> Block {
        Block { header: self.header.clone(), transactions: self.transactions.clone() }
    }
}

/// Executes a block's transactions: system transactions first, sequentially and without cancellation, then the
/// cancellable transactions through the [`ParallelBlockExecutor`].
pub struct BlockExecutingService {
    executor: Arc<ParallelBlockExecutor>,
}

impl BlockExecutingService {
    pub fn new(executor: Arc<ParallelBlockExecutor>) -> Self {
        Self { executor }
    }

    pub async fn execute_block(
        &self,
        ctx: &ServiceContext,
        header: BlockHeader,
        base: Arc<dyn StateReader>,
        system_transactions: Vec<Transaction>,
        cancellable_transactions: Vec<Transaction>,
    ) -> Result<BlockExecutedSet, ExecutionError> {
        let context = ExecutionContext {
            block_height: header.height,
            previous_block_hash: header.previous_block_hash,
            block_time: header.time,
        };

        let executor = self.executor.transaction_executor();
        let system_context = context.clone();
        let (system, system_state) = spawn_rayon_task(move || {
            let mut state = OverlayState::new(base);
            // Detached context: system transactions are never cancelled.
            let ctx = ServiceContext::new();
            let output = execute_sequential(&*executor, &ctx, &system_context, &mut state, system_transactions);
            (output, state)
        })
        .await;
        let SequentialOutput { results: system_results, executed: system_executed, .. } = system;

        if let Some(failed) = system_results.iter().find(|r| r.status != TransactionStatus::Mined) {
            let reason = match &failed.status {
                TransactionStatus::Failed(reason) => reason.clone(),
                status => format!("{status:?}"),
            };
            return Err(ExecutionError::SystemTransactionFailed { transaction_id: failed.transaction_id, reason });
        }

        let mut state = system_state.changes().clone();
        let output = self.executor.execute(ctx, context, Arc::new(system_state), cancellable_transactions).await;
        state.extend(output.state);

        let mut transactions = system_executed;
        transactions.extend(output.executed);
        let mut transaction_results = system_results;
        transaction_results.extend(output.results);

        let header = BlockHeader { transaction_ids: transactions.iter().map(Transaction::id).collect(), ..header };
        tracing::debug!(
            "Executed block #{} with {} transactions, {} not executed",
            header.height,
            transactions.len(),
            output.not_executed.len()
        );

        Ok(BlockExecutedSet {
            header,
            transactions,
            transaction_results,
            state,
            conflicting: output.conflicting,
            not_executed: output.not_executed,
        })
    }
}
