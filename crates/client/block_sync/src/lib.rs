//! Block synchronization pipeline.
//!
//! Peers announce new blocks, or push them. The [`BlockSyncService`] validates each announcement and picks a sync
//! mode based on how far ahead of the local longest chain the block is:
//!
//! - Small gaps are fetched one block at a time on the [fetch queue](SyncQueue::BlockFetch), with retries against
//!   the other peers that announced the same block.
//! - Large gaps become a download job. The [`BlockDownloadWorker`] advances jobs one at a time, pulling blocks in
//!   batches.
//!
//! Every fetched or downloaded block goes through the same two serial queues: attach, then update chain. All
//! producers check how backed up these queues are, and drop work when they are too busy. A later announcement or
//! worker tick will pick it up again.

mod announcement;
mod attach;
mod chain;
mod config;
mod download;
mod error;
mod fetch;
mod job;
mod network;
mod queue;
mod service;
mod state_provider;
mod validation;
mod worker;

#[cfg(any(test, feature = "testing"))]
pub mod testing;
#[cfg(test)]
mod tests;

pub use announcement::AnnouncementCache;
pub use attach::{AttachCallback, BlockSyncAttachService};
#[cfg(any(test, feature = "testing"))]
pub use chain::MockChainService;
pub use chain::{ChainError, ChainService};
pub use config::BlockSyncConfig;
pub use download::{BlockDownloadService, DownloadBlocksResult};
pub use error::SyncError;
pub use fetch::BlockFetchService;
pub use job::{BlockDownloadJob, BlockDownloadJobManager, BlockDownloadJobStore};
#[cfg(any(test, feature = "testing"))]
pub use network::MockNetworkService;
pub use network::{NetworkError, NetworkService, PeerPubkey};
pub use queue::{BlockSyncQueueService, SyncQueue};
pub use service::{BlockSyncService, SyncAnnouncementDto, SyncBlockDto};
pub use state_provider::BlockSyncStateProvider;
pub use validation::{AttachDecision, BlockSyncValidationService};
pub use worker::BlockDownloadWorker;
