//! Materializes the tree of data and metadata sinks for one array writer.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use itertools::Itertools;

use crate::dimension::Dimensions;
use crate::error::{SinkCreationError, SinkError};
use crate::sink::file::FileSink;
#[cfg(feature = "s3")]
use crate::sink::s3::{S3Client, S3Sink};
use crate::sink::Sink;
use crate::thread_pool::{Latch, ThreadPool};

/// Where the dataset's bytes ultimately live.
pub enum StoreBackend {
    Filesystem { root: PathBuf },
    #[cfg(feature = "s3")]
    S3 { client: Arc<S3Client>, root_key: String },
}

impl StoreBackend {
    pub(crate) fn open_sink(&self, relative_path: &str) -> Result<Box<dyn Sink>, SinkError> {
        match self {
            StoreBackend::Filesystem { root } => Ok(Box::new(FileSink::create(root.join(relative_path))?)),
            #[cfg(feature = "s3")]
            StoreBackend::S3 { client, root_key } => {
                let key = format!("{}/{relative_path}", root_key.trim_end_matches('/'));
                Ok(Box::new(S3Sink::new(Arc::clone(client), key)))
            }
        }
    }

    pub fn bucket_is_reachable(&self) -> Result<bool, SinkError> {
        match self {
            StoreBackend::Filesystem { .. } => Ok(true),
            #[cfg(feature = "s3")]
            StoreBackend::S3 { client, .. } => client.bucket_exists(),
        }
    }
}

/// Enumeration of the chunk (v2) or shard (v3) lattice for dimensions
/// `1..ndims`, returning one relative directory/file path per combination in
/// the same flat order as
/// [`Dimensions::number_of_chunks_in_memory`] (v2) or one entry per shard (v3).
fn enumerate_paths(counts: &[u64]) -> Vec<Vec<u64>> {
    counts
        .iter()
        .map(|&count| 0..count.max(1))
        .multi_cartesian_product()
        .collect()
}

fn path_from_indices(prefix: &str, indices: &[u64]) -> String {
    let mut parts = vec![prefix.to_string()];
    parts.extend(indices.iter().map(u64::to_string));
    parts.join("/")
}

/// Relative paths for v2 chunk files, one per chunk buffer, in the same
/// order as the chunk-buffer vector: `{level}/{append_chunk_index}/{c1}/../{cN}`.
#[must_use]
pub fn v2_chunk_paths(dims: &Dimensions, level: usize, append_chunk_index: u64) -> Vec<String> {
    let counts: Vec<u64> = dims.as_slice()[1..]
        .iter()
        .map(|d| {
            let along = (u64::from(d.array_size_px) + u64::from(d.chunk_size_px) - 1) / u64::from(d.chunk_size_px).max(1);
            along.max(1)
        })
        .collect();
    enumerate_paths(&counts)
        .into_iter()
        .map(|idx| path_from_indices(&format!("{level}/{append_chunk_index}"), &idx))
        .collect()
}

/// Relative paths for v3 shard files, one per shard:
/// `data/root/{level}/c{append_chunk_index}/{s1}/../{sN}`.
#[must_use]
pub fn v3_shard_paths(dims: &Dimensions, level: usize, append_chunk_index: u64) -> Vec<String> {
    let counts: Vec<u64> = dims.as_slice()[1..]
        .iter()
        .map(|d| {
            let chunks_along = (u64::from(d.array_size_px) + u64::from(d.chunk_size_px) - 1) / u64::from(d.chunk_size_px).max(1);
            if d.shard_size_chunks == 0 {
                1
            } else {
                (chunks_along + u64::from(d.shard_size_chunks) - 1) / u64::from(d.shard_size_chunks)
            }
        })
        .collect();
    enumerate_paths(&counts)
        .into_iter()
        .map(|idx| path_from_indices(&format!("data/root/{level}/c{append_chunk_index}"), &idx))
        .collect()
}

/// Creates one sink per path in parallel via the thread pool, mirroring
/// `make_files_`/`make_s3_objects_`: every job runs to completion so the
/// latch always counts down, and the first error is reported to the caller.
pub fn make_sinks(
    backend: &Arc<StoreBackend>,
    paths: &[String],
    thread_pool: &ThreadPool,
) -> Result<Vec<Box<dyn Sink>>, SinkCreationError> {
    let results: Arc<Mutex<Vec<Option<Result<Box<dyn Sink>, SinkError>>>>> =
        Arc::new(Mutex::new((0..paths.len()).map(|_| None).collect()));
    let latch = Latch::new(paths.len());

    for (i, path) in paths.iter().enumerate() {
        let backend = Arc::clone(backend);
        let results = Arc::clone(&results);
        let latch = latch.clone();
        let path = path.clone();
        thread_pool
            .push_job(Box::new(move || {
                let sink = backend.open_sink(&path);
                let is_err = sink.is_err();
                results.lock().unwrap()[i] = Some(sink);
                latch.count_down();
                if is_err {
                    Err(format!("failed to create sink at {path}"))
                } else {
                    Ok(())
                }
            }))
            .map_err(SinkCreationError::ThreadPool)?;
    }
    latch.wait();

    let mut out = Vec::with_capacity(paths.len());
    let mut first_error = None;
    for slot in Arc::try_unwrap(results).expect("no outstanding references").into_inner().unwrap() {
        match slot.expect("every slot filled") {
            Ok(sink) => out.push(sink),
            Err(e) => {
                if first_error.is_none() {
                    first_error = Some(e);
                }
            }
        }
    }
    if let Some(e) = first_error {
        return Err(SinkCreationError::Sink(e));
    }
    Ok(out)
}

pub fn version_metadata_paths_v2() -> &'static [&'static str] {
    &[".zattrs", ".zgroup", "acquire.json", "0/.zattrs"]
}

pub fn version_metadata_paths_v3() -> &'static [&'static str] {
    &["zarr.json", "meta/root.group.json", "meta/acquire.json"]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data_type::DataType;
    use crate::dimension::{Dimension, DimensionKind};

    fn dims() -> Dimensions {
        Dimensions::new(
            vec![
                Dimension::new("t", DimensionKind::Time, 0, 5, 2),
                Dimension::new("c", DimensionKind::Channel, 8, 4, 2),
                Dimension::new("z", DimensionKind::Space, 6, 2, 1),
                Dimension::new("y", DimensionKind::Space, 48, 16, 1),
                Dimension::new("x", DimensionKind::Space, 64, 16, 2),
            ],
            DataType::Uint16,
            true,
        )
        .unwrap()
    }

    #[test]
    fn v2_paths_cover_the_full_chunk_lattice() {
        let paths = v2_chunk_paths(&dims(), 0, 0);
        assert_eq!(paths.len() as u64, dims().number_of_chunks_in_memory());
        assert!(paths.contains(&"0/0/0/0/0/0".to_string()));
        assert!(paths.contains(&"0/0/1/2/2/3".to_string()));
    }

    #[test]
    fn v3_paths_cover_every_shard() {
        let paths = v3_shard_paths(&dims(), 0, 0);
        assert_eq!(paths.len() as u64, dims().number_of_shards());
    }
}
