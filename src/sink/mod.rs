//! Offset-addressed, write-once sinks: the uniform destination every array
//! writer and metadata document writes through.

pub mod file;
#[cfg(feature = "s3")]
pub mod s3;

use crate::error::SinkError;

/// A single destination for a chunk, shard, or metadata document.
///
/// Writes within one finalization must use non-decreasing offsets; a sink
/// must not be written to after [`Sink::finalize`] is called.
pub trait Sink: Send {
    fn write(&mut self, offset: u64, data: &[u8]) -> Result<(), SinkError>;
    fn finalize(self: Box<Self>) -> Result<(), SinkError>;
}
