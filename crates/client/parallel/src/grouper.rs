//! Partitions a transaction list into conflict-free groups.
//!
//! Two transactions end up in the same group when they share a resource path, directly or through a chain of
//! other transactions: a transaction touching `{A, B}` and one touching `{B, C}` are grouped together, and so is a
//! third one touching `{C, D}`. Different groups therefore never touch the same path and can execute concurrently.
//!
//! Transactions whose footprint is unknown (extraction failed, timed out, declared non-parallelizable, or no write
//! paths declared) are routed to [`GroupedTransactions::non_parallelizables`] and executed sequentially.

use crate::{
    config::GrouperConfig,
    resource::{ParallelType, ResourceExtractor, ResourcePath, TransactionResourceInfo},
    union_find::{NodeId, UnionFind},
};
use futures::stream::{FuturesUnordered, StreamExt};
use std::{collections::HashMap, sync::Arc};
use tp_chain::{ChainContext, Transaction};
use tp_common::{stopwatch_end, PerfStopwatch};

/// Transactions within a group keep their relative input order.
pub type Group = Vec<Transaction>;

/// Complete partition of a grouping input: every input transaction appears in exactly one of the three buckets.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GroupedTransactions {
    pub parallelizables: Vec<Group>,
    pub non_parallelizables: Vec<Transaction>,
    pub transactions_without_contract: Vec<Transaction>,
}

impl GroupedTransactions {
    pub fn transaction_count(&self) -> usize {
        self.parallelizables.iter().map(Vec::len).sum::<usize>()
            + self.non_parallelizables.len()
            + self.transactions_without_contract.len()
    }
}

pub struct TransactionGrouper {
    extractor: Arc<dyn ResourceExtractor>,
    config: GrouperConfig,
}

impl TransactionGrouper {
    pub fn new(extractor: Arc<dyn ResourceExtractor>, config: GrouperConfig) -> Self {
        Self { extractor, config }
    }

    pub fn config(&self) -> &GrouperConfig {
        &self.config
    }

    /// Never fails: extraction problems only downgrade transactions to sequential execution.
    pub async fn group(&self, chain_context: &ChainContext, transactions: Vec<Transaction>) -> GroupedTransactions {
        let sw = PerfStopwatch::new();
        let total = transactions.len();
        let considered = total.min(self.config.max_transactions);
        if considered < total {
            tracing::debug!(
                "Grouping capped at {} transactions, {} will be executed sequentially",
                considered,
                total - considered
            );
        }

        let infos = self.extract_resources(chain_context, &transactions[..considered]).await;

        let mut grouped = GroupedTransactions::default();
        let mut participants = Vec::new();
        let mut infos = infos.into_iter();
        for tx in transactions {
            // Past the cap, `infos` is exhausted and everything is sequential.
            let Some(info) = infos.next().flatten() else {
                grouped.non_parallelizables.push(tx);
                continue;
            };

            match info.parallel_type {
                ParallelType::InvalidContractAddress => grouped.transactions_without_contract.push(tx),
                ParallelType::NonParallelizable => grouped.non_parallelizables.push(tx),
                // A contract that declares no writes cannot be proven conflict-free.
                ParallelType::Parallelizable if info.write_paths.is_empty() => grouped.non_parallelizables.push(tx),
                ParallelType::Parallelizable => participants.push((tx, info)),
            }
        }

        grouped.parallelizables = group_parallelizables(participants);

        stopwatch_end!(
            sw,
            "Grouped {} transactions into {} groups, {} sequential, {} without contract in {:?}",
            total,
            grouped.parallelizables.len(),
            grouped.non_parallelizables.len(),
            grouped.transactions_without_contract.len()
        );
        grouped
    }

    /// Returns one entry per transaction, `None` when its resources are unknown.
    async fn extract_resources(
        &self,
        chain_context: &ChainContext,
        transactions: &[Transaction],
    ) -> Vec<Option<TransactionResourceInfo>> {
        let mut infos = vec![None; transactions.len()];

        let mut pending: FuturesUnordered<_> = transactions
            .iter()
            .enumerate()
            .map(|(index, tx)| async move { (index, self.extractor.extract(chain_context, tx).await) })
            .collect();

        let collect = async {
            while let Some((index, res)) = pending.next().await {
                match res {
                    Ok(info) => infos[index] = Some(info),
                    Err(err) => {
                        tracing::debug!("Resource extraction failed for tx {:#}: {err:#}", transactions[index].id())
                    }
                }
            }
        };

        if tokio::time::timeout(self.config.grouping_timeout, collect).await.is_err() {
            tracing::warn!(
                "⏳ Resource extraction timed out after {:?}, {} transactions left unresolved",
                self.config.grouping_timeout,
                pending.len()
            );
        }

        infos
    }
}

fn group_parallelizables(participants: Vec<(Transaction, TransactionResourceInfo)>) -> Vec<Group> {
    let mut union_find = UnionFind::with_capacity(participants.len() * 3);
    let mut node_by_path: HashMap<&ResourcePath, NodeId> = HashMap::new();

    let mut tx_nodes = Vec::with_capacity(participants.len());
    for (_, info) in &participants {
        let tx_node = union_find.make_node();
        for path in info.paths() {
            let path_node = *node_by_path.entry(path).or_insert_with(|| union_find.make_node());
            union_find.union(tx_node, path_node).expect("Nodes are allocated by this union-find");
        }
        tx_nodes.push(tx_node);
    }

    let mut group_by_root: HashMap<NodeId, usize> = HashMap::new();
    let mut groups: Vec<Group> = Vec::new();
    let roots: Vec<NodeId> = tx_nodes
        .into_iter()
        .map(|node| union_find.find(node).expect("Nodes are allocated by this union-find"))
        .collect();
    for ((tx, _), root) in participants.into_iter().zip(roots) {
        let index = *group_by_root.entry(root).or_insert_with(|| {
            groups.push(Vec::new());
            groups.len() - 1
        });
        groups[index].push(tx);
    }

    groups
}
