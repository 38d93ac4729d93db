//! Zarr v3 specifics: chunks packed into shards with a trailing offset
//! table.

use std::sync::{Arc, Mutex};

use crate::dimension::Dimensions;
use crate::error::ZarrStreamError;
use crate::sink::Sink;
use crate::sink_creator;
use crate::thread_pool::Latch;

use super::{ArrayWriter, ArrayWriterKind};

/// Unlike the shared `should_flush`, this multiplies by the append axis's
/// `shard_size_chunks`: a shard spans several append-chunk slabs before it
/// can be closed out and its offset table written.
#[must_use]
pub fn should_rollover(dims: &Dimensions, frames_written: u64) -> bool {
    frames_written % dims.frames_per_shard_slab() == 0
}

struct ShardJobResult {
    shard_index: usize,
    end_offset: u64,
    entries: Vec<(u64, u64, u64)>, // (internal_index, offset, length)
    sink: Box<dyn Sink>,
    error: Option<String>,
}

pub(super) fn flush_impl(writer: &mut ArrayWriter) -> Result<(), ZarrStreamError> {
    let dims = &writer.config.dimensions;

    if writer.data_sinks.is_empty() {
        let paths = sink_creator::v3_shard_paths(dims, writer.config.level_of_detail, writer.append_chunk_index);
        writer.data_sinks = sink_creator::make_sinks(writer.backend(), &paths, writer.thread_pool())?;
    }

    let num_shards = dims.number_of_shards() as usize;
    let mut chunks_in_shard: Vec<Vec<usize>> = vec![Vec::new(); num_shards];
    for i in 0..writer.chunk_buffers.len() {
        let shard_index = dims.shard_index_for_chunk(i as u64)?;
        chunks_in_shard[shard_index as usize].push(i);
    }

    let write_table = writer.is_finalizing() || should_rollover(dims, writer.frames_written);

    let starting_offsets = match &writer.kind {
        ArrayWriterKind::V3(state) => state.shard_file_offsets.clone(),
        ArrayWriterKind::V2 => unreachable!("v3 flush_impl called on a v2 writer"),
    };

    let sinks: Vec<Box<dyn Sink>> = writer.data_sinks.drain(..).collect();
    let sinks: Vec<Mutex<Option<Box<dyn Sink>>>> = sinks.into_iter().map(|s| Mutex::new(Some(s))).collect();
    let sinks = Arc::new(sinks);

    let latch = Latch::new(num_shards);
    let results: Arc<Mutex<Vec<Option<ShardJobResult>>>> = Arc::new(Mutex::new((0..num_shards).map(|_| None).collect()));

    for shard_index in 0..num_shards {
        let chunk_indices = chunks_in_shard[shard_index].clone();
        let chunk_data: Vec<Vec<u8>> = chunk_indices.iter().map(|&i| writer.chunk_buffers[i].clone()).collect();
        let internal_indices: Vec<u64> = chunk_indices
            .iter()
            .map(|&i| dims.shard_internal_index(i as u64).map(|(_, internal)| internal))
            .collect::<Result<_, _>>()?;
        let mut offset = starting_offsets[shard_index];
        let sinks = Arc::clone(&sinks);
        let results = Arc::clone(&results);
        let latch = latch.clone();

        writer
            .thread_pool()
            .push_job(Box::new(move || {
                let mut sink = sinks[shard_index].lock().unwrap().take().expect("sink present");
                let mut entries = Vec::with_capacity(chunk_data.len());
                let mut error = None;

                for (data, internal_index) in chunk_data.iter().zip(internal_indices.iter()) {
                    match sink.write(offset, data) {
                        Ok(()) => {
                            entries.push((*internal_index, offset, data.len() as u64));
                            offset += data.len() as u64;
                        }
                        Err(e) => {
                            error = Some(e.to_string());
                            break;
                        }
                    }
                }

                results.lock().unwrap()[shard_index] = Some(ShardJobResult {
                    shard_index,
                    end_offset: offset,
                    entries,
                    sink,
                    error: error.clone(),
                });
                latch.count_down();
                error.map_or(Ok(()), Err)
            }))
            .map_err(ZarrStreamError::Internal)?;
    }
    latch.wait();

    let mut results = Arc::try_unwrap(results)
        .map_err(|_| ZarrStreamError::Internal("shard results still shared after latch".to_string()))?
        .into_inner()
        .unwrap();

    let state = match &mut writer.kind {
        ArrayWriterKind::V3(state) => state,
        ArrayWriterKind::V2 => unreachable!("v3 flush_impl called on a v2 writer"),
    };

    let mut first_error = None;
    let mut sinks_out = vec![None; num_shards];
    let mut shard_errored = vec![false; num_shards];
    for slot in results.drain(..) {
        let result = slot.expect("every slot filled");
        if result.error.is_some() {
            shard_errored[result.shard_index] = true;
            if first_error.is_none() {
                first_error = result.error.clone();
            }
        }
        for (internal_index, offset, length) in &result.entries {
            state.shard_tables[result.shard_index][2 * *internal_index as usize] = *offset;
            state.shard_tables[result.shard_index][2 * *internal_index as usize + 1] = *length;
        }
        state.shard_file_offsets[result.shard_index] = result.end_offset;
        sinks_out[result.shard_index] = Some(result.sink);
    }

    if write_table {
        for shard_index in 0..num_shards {
            if shard_errored[shard_index] {
                continue;
            }
            let sink = sinks_out[shard_index].as_mut().expect("sink present");
            let offset = state.shard_file_offsets[shard_index];
            let table = &state.shard_tables[shard_index];
            let mut bytes = Vec::with_capacity(table.len() * 8);
            for value in table {
                bytes.extend_from_slice(&value.to_le_bytes());
            }
            sink.write(offset, &bytes)?;
        }
        state.reset();
    }

    writer.data_sinks = sinks_out.into_iter().map(|s| s.expect("every slot filled")).collect();

    if let Some(e) = first_error {
        return Err(ZarrStreamError::Internal(format!("failed to write shard: {e}")));
    }
    Ok(())
}
