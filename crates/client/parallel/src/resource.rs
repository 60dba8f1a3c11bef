use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::{collections::BTreeSet, fmt};
use tp_chain::{ChainContext, Transaction};

/// Structured key of a single slot of contract state, e.g. `["token", "Balances", "alice", "ELF"]`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ResourcePath {
    pub parts: Vec<String>,
}

impl ResourcePath {
    pub fn new<I, S>(parts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self { parts: parts.into_iter().map(Into::into).collect() }
    }
}

impl fmt::Display for ResourcePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.parts.join("/"))
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ParallelType {
    #[default]
    Parallelizable,
    NonParallelizable,
    /// The target contract could not be resolved.
    InvalidContractAddress,
}

/// Declared state footprint of a transaction, produced by a [`ResourceExtractor`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionResourceInfo {
    pub parallel_type: ParallelType,
    pub read_paths: BTreeSet<ResourcePath>,
    pub write_paths: BTreeSet<ResourcePath>,
}

impl TransactionResourceInfo {
    pub fn parallelizable(
        read_paths: impl IntoIterator<Item = ResourcePath>,
        write_paths: impl IntoIterator<Item = ResourcePath>,
    ) -> Self {
        Self {
            parallel_type: ParallelType::Parallelizable,
            read_paths: read_paths.into_iter().collect(),
            write_paths: write_paths.into_iter().collect(),
        }
    }

    pub fn non_parallelizable() -> Self {
        Self { parallel_type: ParallelType::NonParallelizable, ..Default::default() }
    }

    pub fn invalid_contract_address() -> Self {
        Self { parallel_type: ParallelType::InvalidContractAddress, ..Default::default() }
    }

    /// Read and write paths, each path once.
    pub fn paths(&self) -> impl Iterator<Item = &ResourcePath> {
        self.write_paths.iter().chain(self.read_paths.iter().filter(|p| !self.write_paths.contains(*p)))
    }
}

#[derive(thiserror::Error, Debug)]
pub enum ExtractionError {
    #[error("Contract {contract} has no resource declaration for method {method}")]
    MissingDeclaration { contract: String, method: String },
    #[error("Malformed transaction parameters: {0}")]
    MalformedParams(String),
    #[error("State unavailable at block {0}")]
    StateUnavailable(u64),
}

/// Resolves the declared read/write footprint of a transaction.
///
/// Implementations must be deterministic for a given chain context and transaction.
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait ResourceExtractor: Send + Sync {
    async fn extract(
        &self,
        chain_context: &ChainContext,
        transaction: &Transaction,
    ) -> Result<TransactionResourceInfo, ExtractionError>;
}
