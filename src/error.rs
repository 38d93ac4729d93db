//! Error types for the streaming writer.

use std::io;

/// An error raised while validating a dimension, chunk or shard index.
#[derive(Debug, thiserror::Error)]
pub enum IndexError {
    #[error("dimension index {0} is out of bounds (have {1} dimensions)")]
    DimensionOutOfBounds(usize, usize),
    #[error("chunk_size_px must be greater than zero (dimension {0})")]
    ZeroChunkSize(usize),
    #[error("frame index {0} exceeds the configured array size")]
    FrameOutOfBounds(u64),
}

/// An error raised while compressing or decompressing a chunk buffer.
#[derive(Debug, thiserror::Error)]
pub enum CompressionError {
    #[error("blosc compression failed with code {0}")]
    Blosc(i32),
    #[error("gzip compression failed: {0}")]
    Gzip(#[source] io::Error),
    #[error("zstd compression failed: {0}")]
    Zstd(#[source] io::Error),
    #[error("unknown or unsupported codec id: {0}")]
    UnknownCodec(String),
}

/// An error raised by a [`crate::sink::Sink`] implementation.
#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("write at offset {offset} is below the flushed watermark {flushed}")]
    OffsetBelowWatermark { offset: u64, flushed: u64 },
    #[error("sink already finalized")]
    AlreadyFinalized,
    #[error("bucket {0} does not exist or is not reachable")]
    BucketUnreachable(String),
    #[error("s3 request failed: {0}")]
    S3Request(String),
    #[error("multipart upload could not be completed: {0}")]
    MultipartIncomplete(String),
}

/// An error raised while constructing the tree of data/metadata sinks.
#[derive(Debug, thiserror::Error)]
pub enum SinkCreationError {
    #[error("failed to create directory {0}: {1}")]
    CreateDir(String, #[source] io::Error),
    #[error(transparent)]
    Sink(#[from] SinkError),
    #[error("thread pool rejected a sink-creation job: {0}")]
    ThreadPool(String),
}

/// An error raised while validating [`crate::stream::StreamSettings`].
#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("at most one dimension may have array_size_px == 0, and it must be dimension 0")]
    AppendDimensionMisplaced,
    #[error("an array must have at least 3 dimensions, got {0}")]
    TooFewDimensions(usize),
    #[error("dimension {0} has chunk_size_px == 0")]
    ZeroChunkSize(usize),
    #[error("dimension {0} has chunk_size_px ({1}) greater than array_size_px ({2})")]
    ChunkLargerThanArray(usize, u32, u32),
    #[error("zarr v3 requires shard_size_chunks > 0 on every dimension; dimension {0} has 0")]
    ZeroShardSize(usize),
    #[error("dimension name must not be empty")]
    EmptyDimensionName,
    #[error("a compressor was configured without specifying a codec id")]
    MissingCodecId,
    #[error("s3 endpoint must start with http:// or https://, got {0}")]
    InvalidS3Endpoint(String),
    #[error("custom metadata is not valid JSON: {0}")]
    InvalidCustomMetadata(#[from] serde_json::Error),
    #[error("store path must not be empty")]
    EmptyStorePath,
}

/// Top-level error returned by [`crate::stream::ZarrStream`].
#[derive(Debug, thiserror::Error)]
pub enum ZarrStreamError {
    #[error("invalid settings: {0}")]
    InvalidSettings(#[from] SettingsError),
    #[error("invalid index: {0}")]
    InvalidIndex(#[from] IndexError),
    #[error(transparent)]
    Sink(#[from] SinkError),
    #[error(transparent)]
    SinkCreation(#[from] SinkCreationError),
    #[error(transparent)]
    Compression(#[from] CompressionError),
    #[error("out of memory while allocating a chunk buffer ({0} bytes)")]
    OutOfMemory(usize),
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("internal error: {0}")]
    Internal(String),
    #[error("the stream has a sticky error from a previous failed operation: {0}")]
    Poisoned(String),
}

pub type Result<T, E = ZarrStreamError> = std::result::Result<T, E>;
