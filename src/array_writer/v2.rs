//! Zarr v2 specifics: one chunk file per chunk, always rolling over at the
//! append-chunk boundary.

use std::sync::{Arc, Mutex};

use crate::error::ZarrStreamError;
use crate::sink::Sink;
use crate::sink_creator;
use crate::thread_pool::Latch;

use super::ArrayWriter;

/// v2 always rolls over: one chunk-file set per append-chunk slab.
#[must_use]
pub fn should_rollover() -> bool {
    true
}

pub(super) fn flush_impl(writer: &mut ArrayWriter) -> Result<(), ZarrStreamError> {
    if writer.data_sinks.is_empty() {
        let paths = sink_creator::v2_chunk_paths(
            &writer.config.dimensions,
            writer.config.level_of_detail,
            writer.append_chunk_index,
        );
        writer.data_sinks = sink_creator::make_sinks(writer.backend(), &paths, writer.thread_pool())?;
    }
    debug_assert_eq!(writer.data_sinks.len(), writer.chunk_buffers.len());

    let sinks: Vec<Option<Box<dyn Sink>>> = writer.data_sinks.drain(..).map(Some).collect();
    let slots: Arc<Mutex<Vec<Option<Box<dyn Sink>>>>> = Arc::new(Mutex::new(sinks));
    let latch = Latch::new(writer.chunk_buffers.len());
    let errors: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));

    for (i, chunk) in writer.chunk_buffers.iter().enumerate() {
        let slots = Arc::clone(&slots);
        let errors = Arc::clone(&errors);
        let latch = latch.clone();
        let data = chunk.clone();
        writer
            .thread_pool()
            .push_job(Box::new(move || {
                let mut sink = slots.lock().unwrap()[i].take().expect("sink present");
                let result = sink.write(0, &data);
                slots.lock().unwrap()[i] = Some(sink);
                latch.count_down();
                result.map_err(|e| {
                    errors.lock().unwrap().push(e.to_string());
                    e.to_string()
                })
            }))
            .map_err(ZarrStreamError::Internal)?;
    }
    latch.wait();

    writer.data_sinks = Arc::try_unwrap(slots)
        .map_err(|_| ZarrStreamError::Internal("sink slots still shared after latch".to_string()))?
        .into_inner()
        .unwrap()
        .into_iter()
        .map(|s| s.expect("every slot filled"))
        .collect();

    let errors = errors.lock().unwrap();
    if let Some(first) = errors.first() {
        return Err(ZarrStreamError::Internal(format!("failed to write chunk: {first}")));
    }
    Ok(())
}
