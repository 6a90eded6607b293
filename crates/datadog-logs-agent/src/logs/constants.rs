//! Sizing and timing constants shared by the logs pipeline.

use std::time::Duration;

/// Capacity of every hand-off queue between pipeline stages.
///
/// Queues are deliberately small: when the main destination stalls, the
/// sender stops draining, the processor blocks on its output, and tailers
/// block on `Pipeline::input_chan`. Ingestion slows down instead of dropping.
pub const CHAN_SIZE: usize = 100;

/// Default number of parallel pipelines owned by the provider.
pub const NUMBER_OF_PIPELINES: usize = 4;

/// Path of the logs intake on every HTTP endpoint.
pub const INTAKE_PATH: &str = "/api/v1/logs/input";

/// Request timeout for payload delivery.
pub const HTTP_SEND_TIMEOUT: Duration = Duration::from_secs(10);

/// Request timeout for the connectivity probe.
pub const HTTP_CONNECTIVITY_TIMEOUT: Duration = Duration::from_secs(5);

/// File name of the registry under `logs_config.run_path`.
pub const REGISTRY_FILENAME: &str = "registry.json";

/// Schema version written to the registry file.
pub const REGISTRY_API_VERSION: i64 = 2;

/// How often the auditor writes the registry to disk.
pub const DEFAULT_FLUSH_PERIOD: Duration = Duration::from_secs(1);

/// How often the auditor purges entries older than the TTL.
pub const DEFAULT_CLEANUP_PERIOD: Duration = Duration::from_secs(300);

/// Extra time granted after the destinations context is force-cancelled
/// when shutdown exceeds its grace period.
pub const FORCE_STOP_TIMEOUT: Duration = Duration::from_secs(5);

/// Number of formatted lines kept by the buffered diagnostic receiver.
pub const DIAGNOSTIC_BUFFER_SIZE: usize = 100;
