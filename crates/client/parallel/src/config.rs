use serde::{Deserialize, Serialize};
use std::time::Duration;
use tp_common::parsers::parse_duration;

#[derive(Clone, Debug, clap::Args, Deserialize, Serialize)]
pub struct GrouperConfig {
    /// Maximum time spent extracting transaction resources for one grouping call. Transactions whose resources are
    /// not known when this expires are executed sequentially.
    #[arg(env = "TESSERA_GROUPING_TIMEOUT", long, value_parser = parse_duration, default_value = "200ms")]
    pub grouping_timeout: Duration,

    /// Maximum number of transactions considered for parallel grouping in one call. The remaining transactions are
    /// executed sequentially.
    #[arg(env = "TESSERA_GROUPING_MAX_TRANSACTIONS", long = "grouping-max-transactions", default_value_t = usize::MAX)]
    pub max_transactions: usize,
}

impl Default for GrouperConfig {
    fn default() -> Self {
        Self { grouping_timeout: Duration::from_millis(200), max_transactions: usize::MAX }
    }
}

impl GrouperConfig {
    pub fn grouping_timeout(self, grouping_timeout: Duration) -> Self {
        Self { grouping_timeout, ..self }
    }
    pub fn max_transactions(self, max_transactions: usize) -> Self {
        Self { max_transactions, ..self }
    }
}
