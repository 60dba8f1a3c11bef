//! Parallel transaction execution.
//!
//! Transactions of a block are first partitioned by the [`TransactionGrouper`] using the read/write footprint
//! returned by a [`ResourceExtractor`]: transactions sharing a state path, directly or transitively, are merged into
//! the same group using a [union-find](union_find). The [`ParallelBlockExecutor`] then runs groups concurrently on
//! the rayon pool, while transactions with an unknown footprint run sequentially and never overlap with a group.
//!
//! [`BlockExecutingService`] ties this together for a whole block: non-cancellable system transactions first,
//! followed by the cancellable transactions.

mod block_executing;
mod config;
mod executor;
mod grouper;
mod resource;
pub mod state;
pub mod union_find;

#[cfg(test)]
mod tests;

pub use block_executing::{BlockExecutedSet, BlockExecutingService, ExecutionError};
pub use config::GrouperConfig;
#[cfg(any(test, feature = "testing"))]
pub use executor::MockTransactionExecutor;
pub use executor::{
    execute_sequential, ExecutionContext, ExecutionOutcome, ExecutionOutput, ParallelBlockExecutor, SequentialOutput,
    TransactionExecutor, TransactionResult, TransactionStatus,
};
pub use grouper::{Group, GroupedTransactions, TransactionGrouper};
#[cfg(any(test, feature = "testing"))]
pub use resource::MockResourceExtractor;
pub use resource::{ExtractionError, ParallelType, ResourceExtractor, ResourcePath, TransactionResourceInfo};
