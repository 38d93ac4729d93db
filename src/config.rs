//! Global configuration options.

use std::sync::{OnceLock, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Global configuration options for this crate.
///
/// Retrieve the global [`Config`] with [`global_config`] and modify it with
/// [`global_config_mut`].
///
/// ## Worker Threads
/// > default: [`std::thread::available_parallelism`]`()`
///
/// The number of threads in the pool used for sink creation, chunk/shard
/// writes and (when the `blosc` feature runs compression) chunk compression.
///
/// ## Default Compression Level
/// > default: `5`
///
/// The blosc compression level (`0`-`9`) used when a stream is opened without
/// an explicit override.
///
/// ## S3 Multipart Part Size
/// > default: `5 MiB`
///
/// The buffering threshold at which an [`S3Sink`](crate::sink::s3::S3Sink)
/// promotes a single-object `PUT` into a multipart upload. S3 itself rejects
/// any part below 5 MiB except the final one, so this should not be lowered
/// below that without also accepting single-object fallback for small arrays.
#[derive(Debug)]
pub struct Config {
    worker_threads: usize,
    default_compression_level: u8,
    s3_multipart_part_size_bytes: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            worker_threads: std::thread::available_parallelism().map(std::num::NonZeroUsize::get).unwrap_or(4),
            default_compression_level: 5,
            s3_multipart_part_size_bytes: 5 << 20,
        }
    }
}

impl Config {
    /// Get the [worker threads](#worker-threads) configuration.
    #[must_use]
    pub fn worker_threads(&self) -> usize {
        self.worker_threads
    }

    /// Set the [worker threads](#worker-threads) configuration.
    pub fn set_worker_threads(&mut self, worker_threads: usize) {
        self.worker_threads = worker_threads.max(1);
    }

    /// Get the [default compression level](#default-compression-level) configuration.
    #[must_use]
    pub fn default_compression_level(&self) -> u8 {
        self.default_compression_level
    }

    /// Set the [default compression level](#default-compression-level) configuration.
    pub fn set_default_compression_level(&mut self, level: u8) {
        self.default_compression_level = level.min(9);
    }

    /// Get the [S3 multipart part size](#s3-multipart-part-size) configuration, in bytes.
    #[must_use]
    pub fn s3_multipart_part_size_bytes(&self) -> usize {
        self.s3_multipart_part_size_bytes
    }

    /// Set the [S3 multipart part size](#s3-multipart-part-size) configuration, in bytes.
    pub fn set_s3_multipart_part_size_bytes(&mut self, bytes: usize) {
        self.s3_multipart_part_size_bytes = bytes;
    }
}

static CONFIG: OnceLock<RwLock<Config>> = OnceLock::new();

/// Returns a reference to the global configuration.
///
/// # Panics
/// This function panics if the underlying lock has been poisoned.
pub fn global_config() -> RwLockReadGuard<'static, Config> {
    CONFIG.get_or_init(|| RwLock::new(Config::default())).read().unwrap()
}

/// Returns a mutable reference to the global configuration.
///
/// # Panics
/// This function panics if the underlying lock has been poisoned.
pub fn global_config_mut() -> RwLockWriteGuard<'static, Config> {
    CONFIG.get_or_init(|| RwLock::new(Config::default())).write().unwrap()
}
