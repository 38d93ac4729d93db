//! Chunk compression codecs.

#[cfg(feature = "blosc")]
pub mod blosc;
