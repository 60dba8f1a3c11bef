use serde::{Deserialize, Serialize};
use std::time::Duration;
use tp_common::parsers::parse_duration;

#[derive(Clone, Debug, clap::Args, Deserialize, Serialize)]
pub struct BlockSyncConfig {
    /// Announced blocks at most this many blocks above the longest chain are fetched one by one. Larger gaps are
    /// handed to the download worker.
    #[arg(env = "TESSERA_BLOCK_SYNC_MODE_HEIGHT_OFFSET", long, default_value_t = 12)]
    pub block_sync_mode_height_offset: u64,

    /// Number of blocks requested from a peer in a single request.
    #[arg(env = "TESSERA_MAX_BATCH_REQUEST_BLOCK_COUNT", long, default_value_t = 10)]
    pub max_batch_request_block_count: u64,

    /// Maximum number of blocks downloaded by the worker in one tick.
    #[arg(env = "TESSERA_MAX_BLOCK_DOWNLOAD_COUNT", long, default_value_t = 50)]
    pub max_block_download_count: u64,

    /// The fetch queue is considered busy once its running task has been waiting for longer than this.
    #[arg(env = "TESSERA_FETCH_BLOCK_AGE_LIMIT", long, value_parser = parse_duration, default_value = "1000ms")]
    pub fetch_block_age_limit: Duration,

    #[arg(env = "TESSERA_ATTACH_BLOCK_AGE_LIMIT", long, value_parser = parse_duration, default_value = "2000ms")]
    pub attach_block_age_limit: Duration,

    #[arg(
        env = "TESSERA_ATTACH_AND_EXECUTE_BLOCK_AGE_LIMIT",
        long,
        value_parser = parse_duration,
        default_value = "4000ms"
    )]
    pub attach_and_execute_block_age_limit: Duration,

    /// Attempts per peer when fetching an announced block.
    #[arg(env = "TESSERA_FETCH_BLOCK_RETRY_TIMES", long, default_value_t = 3)]
    pub fetch_block_retry_times: u32,

    /// How long announcements are remembered, both for duplicate detection and as retry candidates.
    #[arg(env = "TESSERA_ANNOUNCEMENT_CACHE_TTL", long, value_parser = parse_duration, default_value = "30s")]
    pub announcement_cache_ttl: Duration,

    /// Initial deadline of a download job. A job that cannot reach its peer before this is discarded.
    #[arg(
        env = "TESSERA_DOWNLOAD_JOB_TIMEOUT",
        long = "download-job-timeout",
        value_parser = parse_duration,
        default_value = "10s"
    )]
    pub job_timeout: Duration,

    /// Time granted per downloaded block for it to be attached before the job moves on anyway.
    #[arg(env = "TESSERA_PER_BLOCK_DEADLINE", long, value_parser = parse_duration, default_value = "300ms")]
    pub per_block_deadline: Duration,

    /// Maximum number of pending download jobs.
    #[arg(env = "TESSERA_MAX_DOWNLOAD_JOB_COUNT", long = "max-download-job-count", default_value_t = 100)]
    pub max_job_count: usize,

    #[arg(env = "TESSERA_DOWNLOAD_WORKER_INTERVAL", long, value_parser = parse_duration, default_value = "500ms")]
    pub download_worker_interval: Duration,
}

impl Default for BlockSyncConfig {
    fn default() -> Self {
        Self {
            block_sync_mode_height_offset: 12,
            max_batch_request_block_count: 10,
            max_block_download_count: 50,
            fetch_block_age_limit: Duration::from_millis(1000),
            attach_block_age_limit: Duration::from_millis(2000),
            attach_and_execute_block_age_limit: Duration::from_millis(4000),
            fetch_block_retry_times: 3,
            announcement_cache_ttl: Duration::from_secs(30),
            job_timeout: Duration::from_secs(10),
            per_block_deadline: Duration::from_millis(300),
            max_job_count: 100,
            download_worker_interval: Duration::from_millis(500),
        }
    }
}

impl BlockSyncConfig {
    pub fn block_sync_mode_height_offset(self, block_sync_mode_height_offset: u64) -> Self {
        Self { block_sync_mode_height_offset, ..self }
    }
    pub fn max_batch_request_block_count(self, max_batch_request_block_count: u64) -> Self {
        Self { max_batch_request_block_count, ..self }
    }
    pub fn max_block_download_count(self, max_block_download_count: u64) -> Self {
        Self { max_block_download_count, ..self }
    }
    pub fn fetch_block_retry_times(self, fetch_block_retry_times: u32) -> Self {
        Self { fetch_block_retry_times, ..self }
    }
    pub fn announcement_cache_ttl(self, announcement_cache_ttl: Duration) -> Self {
        Self { announcement_cache_ttl, ..self }
    }
    pub fn job_timeout(self, job_timeout: Duration) -> Self {
        Self { job_timeout, ..self }
    }
    pub fn per_block_deadline(self, per_block_deadline: Duration) -> Self {
        Self { per_block_deadline, ..self }
    }
    pub fn max_job_count(self, max_job_count: usize) -> Self {
        Self { max_job_count, ..self }
    }
    pub fn download_worker_interval(self, download_worker_interval: Duration) -> Self {
        Self { download_worker_interval, ..self }
    }
}
