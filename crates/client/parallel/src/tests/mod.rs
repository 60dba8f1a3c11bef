//! Test doubles shared by the unit tests, plus cross-module scenarios.
//!
//! Test transactions carry their [`TransactionResourceInfo`] bincode-encoded in `params`, so that the
//! [`TestExtractor`] can hand it back without any contract code.


use crate::{
    executor::{ExecutionContext, ExecutionOutcome, TransactionExecutor},
    resource::{ExtractionError, ParallelType, ResourceExtractor, ResourcePath, TransactionResourceInfo},
    state::{StateChanges, StateReader},
};
use async_trait::async_trait;
use std::{
    collections::{BTreeSet, HashMap},
    sync::atomic::{AtomicU64, Ordering},
    time::Duration,
};
use tp_chain::{ChainContext, Transaction};

static NONCE: AtomicU64 = AtomicU64::new(0);

fn encoded_tx(method_name: &str, info: &TransactionResourceInfo) -> Transaction {
    Transaction {
        from: "tester".into(),
        to: "contract".into(),
        // Keeps transaction ids unique across identical calls.
        ref_block_number: NONCE.fetch_add(1, Ordering::Relaxed),
        method_name: method_name.into(),
        params: bincode::serialize(info).unwrap(),
    }
}

pub fn resource_path(resource: u32) -> ResourcePath {
    ResourcePath::new(["resource".to_string(), resource.to_string()])
}

/// A transaction writing both resources of `resources`.
pub fn resource_tx(method_name: &str, resources: (u32, u32), parallel_type: ParallelType) -> Transaction {
    let info = TransactionResourceInfo {
        parallel_type,
        read_paths: Default::default(),
        write_paths: [resource_path(resources.0), resource_path(resources.1)].into(),
    };
    encoded_tx(method_name, &info)
}

pub fn counter_path(name: &str) -> ResourcePath {
    ResourcePath::new(["counter", name])
}

/// A transaction incrementing the counter `name` when run by [`CounterExecutor`], declaring writes to the counters
/// in `declared`.
pub fn counter_tx(name: &str, declared: &[&str], parallel_type: ParallelType) -> Transaction {
    let info = TransactionResourceInfo {
        parallel_type,
        read_paths: Default::default(),
        write_paths: declared.iter().map(|d| counter_path(d)).collect(),
    };
    encoded_tx(name, &info)
}

/// Deterministic reordering.
pub fn shuffled(mut transactions: Vec<Transaction>) -> Vec<Transaction> {
    transactions.sort_by_key(Transaction::id);
    transactions
}

#[derive(Default)]
pub struct TestExtractor {
    delays: HashMap<String, Duration>,
}

impl TestExtractor {
    pub fn with_delay(mut self, method_name: &str, delay: Duration) -> Self {
        self.delays.insert(method_name.into(), delay);
        self
    }
}

#[async_trait]
impl ResourceExtractor for TestExtractor {
    async fn extract(
        &self,
        _chain_context: &ChainContext,
        transaction: &Transaction,
    ) -> Result<TransactionResourceInfo, ExtractionError> {
        if let Some(delay) = self.delays.get(&transaction.method_name) {
            tokio::time::sleep(*delay).await;
        }
        bincode::deserialize(&transaction.params).map_err(|err| ExtractionError::MalformedParams(err.to_string()))
    }
}

/// Increments the little-endian `u64` counter named after the method.
pub struct CounterExecutor;

impl TransactionExecutor for CounterExecutor {
    fn execute(
        &self,
        _context: &ExecutionContext,
        state: &dyn StateReader,
        transaction: &Transaction,
    ) -> ExecutionOutcome {
        let path = counter_path(&transaction.method_name);
        let current = state
            .get_state(&path)
            .map(|v| u64::from_le_bytes(v.try_into().expect("Counter values are 8 bytes")))
            .unwrap_or(0);
        ExecutionOutcome::mined(
            BTreeSet::from([path.clone()]),
            StateChanges::from([(path, Some((current + 1).to_le_bytes().to_vec()))]),
        )
    }
}
