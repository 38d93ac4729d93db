//! Common array-writer state machine: tiling, buffer lifecycle, flush
//! scheduling and rollover. Version-specific behavior (`flush_impl`,
//! `should_rollover`, metadata emission) lives in [`v2`] and [`v3`].

pub mod v2;
pub mod v3;

use std::sync::Arc;

use log::{debug, error, trace};

use crate::codec::blosc::BloscCompressionParams;
use crate::data_type::DataType;
use crate::dimension::Dimensions;
use crate::error::ZarrStreamError;
use crate::sink::Sink;
use crate::sink_creator::StoreBackend;
use crate::thread_pool::ThreadPool;

/// Configuration for one resolution level's writer.
pub struct ArrayWriterConfig {
    pub dimensions: Dimensions,
    pub dtype: DataType,
    pub level_of_detail: usize,
    pub compression: Option<BloscCompressionParams>,
}

/// Per-shard bookkeeping unique to Zarr v3.
pub struct ShardState {
    pub shard_file_offsets: Vec<u64>,
    pub shard_tables: Vec<Vec<u64>>,
}

impl ShardState {
    fn new(dims: &Dimensions) -> Self {
        let num_shards = dims.number_of_shards() as usize;
        let chunks_per_shard = dims.chunks_per_shard() as usize;
        Self {
            shard_file_offsets: vec![0; num_shards],
            shard_tables: vec![vec![u64::MAX; 2 * chunks_per_shard]; num_shards],
        }
    }

    fn reset(&mut self) {
        for offset in &mut self.shard_file_offsets {
            *offset = 0;
        }
        for table in &mut self.shard_tables {
            table.fill(u64::MAX);
        }
    }
}

pub enum ArrayWriterKind {
    V2,
    V3(ShardState),
}

/// Tiles an incoming frame into the chunk buffers and drives flush/rollover.
pub struct ArrayWriter {
    pub(crate) config: ArrayWriterConfig,
    pub(crate) kind: ArrayWriterKind,
    backend: Arc<StoreBackend>,
    thread_pool: Arc<ThreadPool>,
    pub(crate) chunk_buffers: Vec<Vec<u8>>,
    pub(crate) data_sinks: Vec<Box<dyn Sink>>,
    metadata_sink: Option<Box<dyn Sink>>,
    pub(crate) frames_written: u64,
    pub(crate) append_chunk_index: u64,
    bytes_to_flush: u64,
    is_finalizing: bool,
}

impl ArrayWriter {
    #[must_use]
    pub fn new(
        config: ArrayWriterConfig,
        version: ArrayVersion,
        backend: Arc<StoreBackend>,
        thread_pool: Arc<ThreadPool>,
    ) -> Self {
        let kind = match version {
            ArrayVersion::V2 => ArrayWriterKind::V2,
            ArrayVersion::V3 => ArrayWriterKind::V3(ShardState::new(&config.dimensions)),
        };
        Self {
            config,
            kind,
            backend,
            thread_pool,
            chunk_buffers: Vec::new(),
            data_sinks: Vec::new(),
            metadata_sink: None,
            frames_written: 0,
            append_chunk_index: 0,
            bytes_to_flush: 0,
            is_finalizing: false,
        }
    }

    fn bytes_per_frame(&self) -> Result<u64, ZarrStreamError> {
        Ok(self.config.dimensions.bytes_of_frame()?)
    }

    /// Writes one full frame, tiling it into the in-memory chunk buffers and
    /// triggering a flush at chunk boundaries. Returns the number of bytes
    /// consumed (`0` once the append dimension has a fixed size and is full).
    pub fn write_frame(&mut self, data: &[u8]) -> Result<usize, ZarrStreamError> {
        let bytes_per_frame = self.bytes_per_frame()?;
        if data.len() as u64 != bytes_per_frame {
            error!(
                "rejecting frame of {} bytes, expected {bytes_per_frame}",
                data.len()
            );
            return Ok(0);
        }

        if self.chunk_buffers.is_empty() {
            let n = self.config.dimensions.number_of_chunks_in_memory() as usize;
            let bytes = self.config.dimensions.bytes_per_chunk() as usize;
            trace!("allocating {n} chunk buffers of {bytes} bytes");
            self.chunk_buffers = (0..n).map(|_| vec![0u8; bytes]).collect();
        }

        self.tile_frame_into_chunks(data)?;

        self.frames_written += 1;
        self.bytes_to_flush += bytes_per_frame;

        if self.should_flush() {
            self.flush()?;
        }

        Ok(data.len())
    }

    fn tile_frame_into_chunks(&mut self, data: &[u8]) -> Result<(), ZarrStreamError> {
        let dims = &self.config.dimensions;
        let bytes_per_px = dims.data_type().bytes_of_type();
        let height_dim = &dims.as_slice()[dims.height_index()];
        let width_dim = &dims.as_slice()[dims.width_index()];
        let frame_height = height_dim.array_size_px as usize;
        let frame_width = width_dim.array_size_px as usize;
        let chunk_h = height_dim.chunk_size_px as usize;
        let chunk_w = width_dim.chunk_size_px as usize;

        let tiles_y = (frame_height + chunk_h - 1) / chunk_h;
        let tiles_x = (frame_width + chunk_w - 1) / chunk_w;

        let group_offset = dims.tile_group_offset(self.frames_written)? as usize;
        let chunk_offset = dims.chunk_internal_offset(self.frames_written)? as usize;
        let chunk_row_stride = chunk_w * bytes_per_px;

        for i in 0..tiles_y {
            let rows = chunk_h.min(frame_height - i * chunk_h);
            for j in 0..tiles_x {
                let cols = chunk_w.min(frame_width - j * chunk_w);
                let chunk_index = group_offset + i * tiles_x + j;
                let chunk = &mut self.chunk_buffers[chunk_index];

                for row in 0..rows {
                    let src_row = i * chunk_h + row;
                    let src_start = (src_row * frame_width + j * chunk_w) * bytes_per_px;
                    let src_end = src_start + cols * bytes_per_px;
                    let dst_start = chunk_offset + row * chunk_row_stride;
                    let dst_end = dst_start + cols * bytes_per_px;
                    chunk[dst_start..dst_end].copy_from_slice(&data[src_start..src_end]);
                }
            }
        }
        Ok(())
    }

    fn should_flush(&self) -> bool {
        self.frames_written % self.config.dimensions.frames_per_inner_slab() == 0
    }

    fn should_rollover(&self) -> bool {
        match &self.kind {
            ArrayWriterKind::V2 => v2::should_rollover(),
            ArrayWriterKind::V3(_) => v3::should_rollover(&self.config.dimensions, self.frames_written),
        }
    }

    /// Compresses every chunk buffer in place, in parallel, then dispatches
    /// to `flush_impl`, writes metadata at rollover/finalize boundaries, and
    /// rolls over if due.
    pub fn flush(&mut self) -> Result<(), ZarrStreamError> {
        if self.bytes_to_flush == 0 {
            return Ok(());
        }

        if let Some(params) = self.config.compression {
            self.compress_buffers(params)?;
        }

        match &self.kind {
            ArrayWriterKind::V2 => v2::flush_impl(self)?,
            ArrayWriterKind::V3(_) => v3::flush_impl(self)?,
        }

        let rollover = self.should_rollover();
        if rollover || self.is_finalizing {
            self.write_array_metadata()?;
        }
        if rollover {
            debug!("rolling over array writer at append chunk {}", self.append_chunk_index);
            self.close_sinks()?;
            self.append_chunk_index += 1;
            if let ArrayWriterKind::V3(state) = &mut self.kind {
                state.reset();
            }
        }

        let bytes = self.config.dimensions.bytes_per_chunk() as usize;
        for chunk in &mut self.chunk_buffers {
            chunk.clear();
            chunk.resize(bytes, 0);
        }
        self.bytes_to_flush = 0;
        Ok(())
    }

    #[cfg(feature = "blosc")]
    fn compress_buffers(&mut self, params: BloscCompressionParams) -> Result<(), ZarrStreamError> {
        use rayon::prelude::*;
        use rayon_iter_concurrent_limit::iter_concurrent_limit;

        let typesize = self.config.dimensions.data_type().bytes_of_type();
        // Compression is CPU-bound and independent per chunk; `rayon` fans it
        // out across its own worker pool rather than this crate's I/O thread
        // pool, since every buffer is already exclusively borrowed here.
        let target = crate::config::global_config().worker_threads();
        let results: Vec<_> = iter_concurrent_limit!(target, self.chunk_buffers, par_iter, |chunk| {
            crate::codec::blosc::compress(chunk, typesize, params)
        })
        .collect();
        for (chunk, result) in self.chunk_buffers.iter_mut().zip(results) {
            *chunk = result?;
        }
        Ok(())
    }

    #[cfg(not(feature = "blosc"))]
    fn compress_buffers(&mut self, _params: BloscCompressionParams) -> Result<(), ZarrStreamError> {
        Err(ZarrStreamError::Internal("blosc feature not enabled".to_string()))
    }

    fn write_array_metadata(&mut self) -> Result<(), ZarrStreamError> {
        if self.metadata_sink.is_none() {
            let path = match &self.kind {
                ArrayWriterKind::V2 => format!("{}/.zarray", self.config.level_of_detail),
                ArrayWriterKind::V3(_) => format!("meta/root/{}.array.json", self.config.level_of_detail),
            };
            self.metadata_sink = Some(self.backend.open_sink(&path)?);
        }

        let metadata = match &self.kind {
            ArrayWriterKind::V2 => crate::metadata::zarr_v2_array_metadata(
                &self.config.dimensions,
                self.config.dtype,
                self.frames_written,
                self.config.compression,
            ),
            ArrayWriterKind::V3(_) => crate::metadata::zarr_v3_array_metadata(
                &self.config.dimensions,
                self.config.dtype,
                self.frames_written,
                self.config.compression,
            ),
        };
        let bytes = serde_json::to_vec_pretty(&metadata)?;
        self.metadata_sink.as_mut().expect("just created").write(0, &bytes)?;
        Ok(())
    }

    fn close_sinks(&mut self) -> Result<(), ZarrStreamError> {
        for sink in self.data_sinks.drain(..) {
            sink.finalize()?;
        }
        Ok(())
    }

    pub(crate) fn backend(&self) -> &Arc<StoreBackend> {
        &self.backend
    }

    pub(crate) fn is_finalizing(&self) -> bool {
        self.is_finalizing
    }

    pub(crate) fn thread_pool(&self) -> &Arc<ThreadPool> {
        &self.thread_pool
    }

    /// Flushes any remaining buffered data and finalizes the array and its
    /// metadata sink. Idempotent.
    pub fn finalize(&mut self) -> Result<(), ZarrStreamError> {
        self.is_finalizing = true;
        self.flush()?;
        if let Some(sink) = self.metadata_sink.take() {
            sink.finalize()?;
        }
        Ok(())
    }
}

impl Drop for ArrayWriter {
    fn drop(&mut self) {
        if let Err(e) = self.finalize() {
            error!("failed to finalize array writer: {e}");
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArrayVersion {
    V2,
    V3,
}
