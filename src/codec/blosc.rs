//! In-place Blosc-family compression for chunk buffers.
//!
//! This module calls `blosc_compress_ctx` directly rather than going through
//! a codec plugin registry: a thin, safe wrapper over the C API exposed by
//! `blosc-src` rather than a `CodecTraits`/`inventory`-style plugin system,
//! since there is exactly one compressor family to support here.

use crate::error::CompressionError;

/// Matches `BLOSC_MIN_HEADER_LENGTH` in `blosc.h`: the maximum number of
/// bytes a compressed buffer can grow by relative to its input.
pub const BLOSC_MAX_OVERHEAD: usize = 16;

/// Byte-shuffle filter applied before compression.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shuffle {
    None,
    Byte,
    Bit,
}

impl Shuffle {
    fn as_c_int(self) -> i32 {
        match self {
            Shuffle::None => 0,
            Shuffle::Byte => 1,
            Shuffle::Bit => 2,
        }
    }
}

/// One of the Blosc-bundled codecs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BloscCodec {
    LZ4,
    Zstd,
    Zlib,
}

impl BloscCodec {
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            BloscCodec::LZ4 => "lz4",
            BloscCodec::Zstd => "zstd",
            BloscCodec::Zlib => "zlib",
        }
    }

    fn from_name(name: &str) -> Result<Self, CompressionError> {
        match name {
            "lz4" => Ok(BloscCodec::LZ4),
            "zstd" => Ok(BloscCodec::Zstd),
            "zlib" => Ok(BloscCodec::Zlib),
            other => Err(CompressionError::UnknownCodec(other.to_string())),
        }
    }
}

/// Parameters for one chunk's Blosc compression pass.
#[derive(Debug, Clone, Copy)]
pub struct BloscCompressionParams {
    pub codec: BloscCodec,
    pub clevel: u8,
    pub shuffle: Shuffle,
}

impl BloscCompressionParams {
    #[must_use]
    pub fn new(codec_id: &str, clevel: u8, shuffle: Shuffle) -> Result<Self, CompressionError> {
        Ok(Self {
            codec: BloscCodec::from_name(codec_id)?,
            clevel: clevel.min(9),
            shuffle,
        })
    }
}

#[allow(non_camel_case_types)]
mod ffi {
    use std::os::raw::{c_char, c_int, c_void};

    extern "C" {
        pub fn blosc_compress_ctx(
            clevel: c_int,
            doshuffle: c_int,
            typesize: usize,
            nbytes: usize,
            src: *const c_void,
            dest: *mut c_void,
            destsize: usize,
            compressor: *const c_char,
            blocksize: usize,
            numinternalthreads: c_int,
        ) -> c_int;

        pub fn blosc_decompress_ctx(
            src: *const c_void,
            dest: *mut c_void,
            destsize: usize,
            numinternalthreads: c_int,
        ) -> c_int;
    }
}

/// Compresses `src` (an array of `typesize`-byte elements) into a freshly
/// allocated buffer. Mirrors `compress_buffers_`'s per-chunk job body: a
/// scratch buffer of `src.len() + BLOSC_MAX_OVERHEAD` is used internally and
/// the result truncated to the actual compressed length.
pub fn compress(src: &[u8], typesize: usize, params: BloscCompressionParams) -> Result<Vec<u8>, CompressionError> {
    let mut dest = vec![0u8; src.len() + BLOSC_MAX_OVERHEAD];
    let codec_name = std::ffi::CString::new(params.codec.name()).expect("codec name has no interior nul");

    let written = unsafe {
        ffi::blosc_compress_ctx(
            i32::from(params.clevel),
            params.shuffle.as_c_int(),
            typesize,
            src.len(),
            src.as_ptr().cast(),
            dest.as_mut_ptr().cast(),
            dest.len(),
            codec_name.as_ptr(),
            0,
            1,
        )
    };

    if written <= 0 {
        return Err(CompressionError::Blosc(written));
    }
    dest.truncate(written as usize);
    Ok(dest)
}

/// Decompresses a Blosc-framed buffer into `dest`, which must be exactly the
/// original uncompressed size (Blosc's frame header records it, but this
/// writer never needs to recover it independently since chunk sizes are
/// always known ahead of time).
pub fn decompress(src: &[u8], dest: &mut [u8]) -> Result<(), CompressionError> {
    let written = unsafe { ffi::blosc_decompress_ctx(src.as_ptr().cast(), dest.as_mut_ptr().cast(), dest.len(), 1) };
    if written <= 0 {
        return Err(CompressionError::Blosc(written));
    }
    Ok(())
}
