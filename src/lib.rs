//! A streaming writer for chunked, optionally compressed, optionally
//! multi-resolution Zarr v2/v3 datasets, backed by the local filesystem or
//! an S3-compatible object store.
//!
//! The producer-facing surface is [`ZarrStreamBuilder`]/[`ZarrStream`]:
//! assemble a [`stream::StreamSettings`], validate it, open it against
//! storage, then call [`ZarrStream::append`] once per frame. Dropping the
//! stream flushes and finalizes every resolution level.

pub mod array_writer;
pub mod codec;
pub mod config;
pub mod data_type;
pub mod dimension;
pub mod error;
pub mod metadata;
pub mod multiscale;
pub mod sink;
pub mod sink_creator;
pub mod stream;
pub mod thread_pool;

pub use data_type::DataType;
pub use dimension::{Dimension, DimensionKind, Dimensions};
pub use error::{Result, ZarrStreamError};
pub use stream::{StreamSettings, ZarrStream, ZarrStreamBuilder, ZarrVersion};

#[cfg(feature = "s3")]
pub use stream::S3ConnectionConfig;
