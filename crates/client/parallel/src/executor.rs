//! Execution of grouped transactions.
//!
//! A block is executed in three phases:
//!
//! 1. Non-parallelizable transactions run one after the other on top of the base state. Their footprint is unknown,
//!    so nothing else runs at the same time.
//! 2. Parallel groups run concurrently on the rayon pool, each over its own [`LayeredState`] layered on the state
//!    produced by phase 1. Transactions within a group run in their input order.
//! 3. Group deltas are merged in group order. Declared resources can be wrong, so the merge checks the keys each
//!    group actually touched: a group that touched a key written by an earlier group (or wrote a key an earlier group
//!    touched) is rejected as a whole, its results are marked [`TransactionStatus::Conflict`] and its writes are
//!    dropped.
//!
//! Transactions without a resolvable contract are never executed.
//!
//! Cancellation is checked before each transaction starts. A transaction that has started always finishes, and
//! finished results are kept.

use crate::{
    grouper::{GroupedTransactions, TransactionGrouper},
    resource::ResourcePath,
    state::{LayeredState, OverlayState, StateChanges, StateDelta, StateReader},
};
use rayon::prelude::*;
use std::{collections::BTreeSet, sync::Arc};
use tp_chain::{ChainContext, Hash, Transaction};
use tp_common::{service::ServiceContext, spawn_rayon_task, stopwatch_end, PerfStopwatch};

/// Block-level information available to a transaction.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecutionContext {
    pub block_height: u64,
    pub previous_block_hash: Hash,
    /// Unix timestamp in milliseconds.
    pub block_time: u64,
}

impl ExecutionContext {
    /// Resources are resolved against the parent block.
    pub fn chain_context(&self) -> ChainContext {
        ChainContext::new(self.previous_block_hash, self.block_height.saturating_sub(1))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransactionStatus {
    Mined,
    Failed(String),
    InvalidContractAddress,
    /// Executed, but touched state that another group wrote to. Results and writes were discarded.
    Conflict,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionResult {
    pub transaction_id: Hash,
    pub status: TransactionStatus,
}

/// What a single transaction did. Writes of a transaction that did not end up [`TransactionStatus::Mined`] are
/// ignored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionOutcome {
    pub status: TransactionStatus,
    pub reads: BTreeSet<ResourcePath>,
    pub writes: StateChanges,
}

impl ExecutionOutcome {
    pub fn mined(reads: BTreeSet<ResourcePath>, writes: StateChanges) -> Self {
        Self { status: TransactionStatus::Mined, reads, writes }
    }

    pub fn failed(reason: impl Into<String>) -> Self {
        Self { status: TransactionStatus::Failed(reason.into()), reads: Default::default(), writes: Default::default() }
    }
}

/// Contract execution engine. Must not have side effects outside of the returned outcome.
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
pub trait TransactionExecutor: Send + Sync {
    fn execute(&self, context: &ExecutionContext, state: &dyn StateReader, transaction: &Transaction)
        -> ExecutionOutcome;
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecutionOutput {
    /// Sequential results first, then parallel groups in group order, then transactions without contract.
    pub results: Vec<TransactionResult>,
    /// Transactions whose results are part of the block, in result order.
    pub executed: Vec<Transaction>,
    pub state: StateChanges,
    /// Transactions of rejected groups. They can be re-queued for a later block.
    pub conflicting: Vec<Transaction>,
    /// Transactions that never started because execution was cancelled.
    pub not_executed: Vec<Transaction>,
    pub cancelled: bool,
}

#[derive(Default)]
struct GroupOutput {
    results: Vec<TransactionResult>,
    executed: Vec<Transaction>,
    not_executed: Vec<Transaction>,
    delta: StateDelta,
}

pub struct ParallelBlockExecutor {
    grouper: Arc<TransactionGrouper>,
    executor: Arc<dyn TransactionExecutor>,
}

impl ParallelBlockExecutor {
    pub fn new(grouper: Arc<TransactionGrouper>, executor: Arc<dyn TransactionExecutor>) -> Self {
        Self { grouper, executor }
    }

    pub fn grouper(&self) -> &TransactionGrouper {
        &self.grouper
    }

    pub fn transaction_executor(&self) -> Arc<dyn TransactionExecutor> {
        Arc::clone(&self.executor)
    }

    /// Groups `transactions` and executes them on top of `base`.
    pub async fn execute(
        &self,
        ctx: &ServiceContext,
        context: ExecutionContext,
        base: Arc<dyn StateReader>,
        transactions: Vec<Transaction>,
    ) -> ExecutionOutput {
        let grouped = self.grouper.group(&context.chain_context(), transactions).await;
        self.execute_grouped(ctx, context, base, grouped).await
    }

    pub async fn execute_grouped(
        &self,
        ctx: &ServiceContext,
        context: ExecutionContext,
        base: Arc<dyn StateReader>,
        grouped: GroupedTransactions,
    ) -> ExecutionOutput {
        let executor = Arc::clone(&self.executor);
        let ctx = ctx.clone();
        spawn_rayon_task(move || execute_grouped_blocking(&*executor, &ctx, &context, base, grouped)).await
    }
}

/// Result of [`execute_sequential`].
#[derive(Debug, Default)]
pub struct SequentialOutput {
    pub results: Vec<TransactionResult>,
    pub executed: Vec<Transaction>,
    pub not_executed: Vec<Transaction>,
}

/// Runs `transactions` one after the other on top of `state`, applying the writes of mined transactions. Stops at
/// cancellation.
pub fn execute_sequential(
    executor: &dyn TransactionExecutor,
    ctx: &ServiceContext,
    context: &ExecutionContext,
    state: &mut OverlayState,
    transactions: Vec<Transaction>,
) -> SequentialOutput {
    let mut results = Vec::with_capacity(transactions.len());
    let mut executed = Vec::with_capacity(transactions.len());
    let mut transactions = transactions.into_iter();

    while let Some(tx) = transactions.next() {
        if ctx.is_cancelled() {
            let mut not_executed = vec![tx];
            not_executed.extend(transactions.by_ref());
            return SequentialOutput { results, executed, not_executed };
        }

        let outcome = executor.execute(context, &*state, &tx);
        tracing::trace!("Executed sequential tx {:#}: {:?}", tx.id(), outcome.status);
        if outcome.status == TransactionStatus::Mined {
            state.apply(outcome.writes);
        }
        results.push(TransactionResult { transaction_id: tx.id(), status: outcome.status });
        executed.push(tx);
    }

    SequentialOutput { results, executed, not_executed: vec![] }
}

fn execute_group(
    executor: &dyn TransactionExecutor,
    ctx: &ServiceContext,
    context: &ExecutionContext,
    base: &dyn StateReader,
    group: Vec<Transaction>,
) -> GroupOutput {
    let mut state = LayeredState::new(base);
    let mut output = GroupOutput::default();
    let mut group = group.into_iter();

    while let Some(tx) = group.next() {
        if ctx.is_cancelled() {
            output.not_executed.push(tx);
            output.not_executed.extend(group.by_ref());
            break;
        }

        let outcome = executor.execute(context, &state, &tx);
        tracing::trace!("Executed grouped tx {:#}: {:?}", tx.id(), outcome.status);
        // Reads of failed transactions still count: they observed the state.
        let writes = if outcome.status == TransactionStatus::Mined { outcome.writes } else { Default::default() };
        state.commit(StateDelta { writes, reads: outcome.reads });
        output.results.push(TransactionResult { transaction_id: tx.id(), status: outcome.status });
        output.executed.push(tx);
    }

    output.delta = state.into_delta();
    output
}

fn execute_grouped_blocking(
    executor: &dyn TransactionExecutor,
    ctx: &ServiceContext,
    context: &ExecutionContext,
    base: Arc<dyn StateReader>,
    grouped: GroupedTransactions,
) -> ExecutionOutput {
    let sw = PerfStopwatch::new();
    let GroupedTransactions { parallelizables, non_parallelizables, transactions_without_contract } = grouped;
    let group_count = parallelizables.len();
    let sequential_count = non_parallelizables.len();

    let mut state = OverlayState::new(base);
    let SequentialOutput { mut results, mut executed, mut not_executed } =
        execute_sequential(executor, ctx, context, &mut state, non_parallelizables);

    let groups: Vec<GroupOutput> = {
        let state = &state;
        parallelizables.into_par_iter().map(|group| execute_group(executor, ctx, context, state, group)).collect()
    };

    let mut conflicting = Vec::new();
    let mut merged_writes = BTreeSet::new();
    let mut merged_touched = BTreeSet::new();
    for mut group in groups {
        not_executed.append(&mut group.not_executed);

        let conflicts = group.delta.writes.keys().any(|path| merged_touched.contains(path))
            || group.delta.reads.iter().any(|path| merged_writes.contains(path));
        if conflicts {
            tracing::warn!(
                "⚠️ Dropping a group of {} transactions touching state written concurrently",
                group.executed.len()
            );
            for result in &mut group.results {
                result.status = TransactionStatus::Conflict;
            }
            results.append(&mut group.results);
            conflicting.append(&mut group.executed);
            continue;
        }

        merged_touched.extend(group.delta.touched().cloned());
        merged_writes.extend(group.delta.writes.keys().cloned());
        state.apply(group.delta.writes);
        results.append(&mut group.results);
        executed.append(&mut group.executed);
    }

    results.extend(transactions_without_contract.iter().map(|tx| TransactionResult {
        transaction_id: tx.id(),
        status: TransactionStatus::InvalidContractAddress,
    }));

    let cancelled = !not_executed.is_empty();
    if cancelled {
        tracing::debug!("Execution cancelled, {} transactions not executed", not_executed.len());
    }

    stopwatch_end!(
        sw,
        "Executed {} transactions ({} groups, {} sequential, {} conflicting) in {:?}",
        executed.len(),
        group_count,
        sequential_count,
        conflicting.len()
    );

    ExecutionOutput { results, executed, state: state.into_changes(), conflicting, not_executed, cancelled }
}
