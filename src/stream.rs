//! Stream facade: the single producer-facing entry point that owns the
//! thread pool, the per-level array writers, the multiscale staging slots
//! and the base/group metadata sinks.

use std::sync::{Arc, Mutex};

use log::{error, info, warn};

use crate::array_writer::{ArrayVersion, ArrayWriter, ArrayWriterConfig};
use crate::codec::blosc::BloscCompressionParams;
use crate::config::global_config;
use crate::data_type::DataType;
use crate::dimension::Dimensions;
use crate::error::{SettingsError, ZarrStreamError};
use crate::metadata;
use crate::multiscale::{self, ScaledFrameSlot};
use crate::sink::Sink;
use crate::sink_creator::{self, StoreBackend};
use crate::thread_pool::ThreadPool;

#[cfg(feature = "s3")]
use crate::sink::s3::{S3Client, S3Config};

/// Which Zarr protocol version to write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ZarrVersion {
    V2,
    V3,
}

/// Where the store is rooted.
#[derive(Clone)]
pub enum StoreLocation {
    Filesystem { root: std::path::PathBuf },
    #[cfg(feature = "s3")]
    S3 { config: S3ConnectionConfig, root_key: String },
}

#[cfg(feature = "s3")]
#[derive(Clone)]
pub struct S3ConnectionConfig {
    pub endpoint: String,
    pub bucket_name: String,
    pub access_key_id: String,
    pub secret_access_key: String,
    pub region: String,
}

/// Validated configuration for one stream, the Rust-native counterpart of
/// the C ABI's settings struct: owned types and `Option`/`enum` instead of
/// sentinel values and raw pointers.
pub struct StreamSettings {
    pub version: ZarrVersion,
    pub store: StoreLocation,
    pub dimensions: Dimensions,
    pub data_type: DataType,
    pub compression: Option<BloscCompressionParams>,
    pub multiscale: bool,
    pub custom_metadata: serde_json::Value,
}

/// Assembles and validates a [`StreamSettings`] before handing it to
/// [`ZarrStream::new`], mirroring `ArrayBuilder`'s "assemble, then
/// materialize against storage" split.
pub struct ZarrStreamBuilder {
    version: ZarrVersion,
    store: Option<StoreLocation>,
    dimensions: Option<Dimensions>,
    data_type: Option<DataType>,
    compression: Option<BloscCompressionParams>,
    multiscale: bool,
    custom_metadata: serde_json::Value,
}

impl ZarrStreamBuilder {
    #[must_use]
    pub fn new(version: ZarrVersion) -> Self {
        Self {
            version,
            store: None,
            dimensions: None,
            data_type: None,
            compression: None,
            multiscale: false,
            custom_metadata: serde_json::Value::Object(serde_json::Map::new()),
        }
    }

    #[must_use]
    pub fn store_path(mut self, root: impl Into<std::path::PathBuf>) -> Self {
        self.store = Some(StoreLocation::Filesystem { root: root.into() });
        self
    }

    #[cfg(feature = "s3")]
    #[must_use]
    pub fn s3_store(mut self, config: S3ConnectionConfig, root_key: impl Into<String>) -> Self {
        self.store = Some(StoreLocation::S3 { config, root_key: root_key.into() });
        self
    }

    #[must_use]
    pub fn dimensions(mut self, dimensions: Dimensions) -> Self {
        self.dimensions = Some(dimensions);
        self
    }

    #[must_use]
    pub fn data_type(mut self, data_type: DataType) -> Self {
        self.data_type = Some(data_type);
        self
    }

    #[must_use]
    pub fn compression(mut self, compression: BloscCompressionParams) -> Self {
        self.compression = Some(compression);
        self
    }

    #[must_use]
    pub fn multiscale(mut self, enabled: bool) -> Self {
        self.multiscale = enabled;
        self
    }

    /// Parses `json` as the stream's custom metadata document, emitted
    /// verbatim as `acquire.json`.
    pub fn custom_metadata(mut self, json: &str) -> Result<Self, SettingsError> {
        self.custom_metadata = serde_json::from_str(json)?;
        Ok(self)
    }

    /// Validates the assembled settings and opens the stream against storage.
    pub fn build(self) -> Result<ZarrStream, ZarrStreamError> {
        let settings = self.validate()?;
        ZarrStream::new(settings)
    }

    fn validate(self) -> Result<StreamSettings, SettingsError> {
        let store = self.store.ok_or(SettingsError::EmptyStorePath)?;
        if let StoreLocation::Filesystem { root } = &store {
            if root.as_os_str().is_empty() {
                return Err(SettingsError::EmptyStorePath);
            }
        }
        #[cfg(feature = "s3")]
        if let StoreLocation::S3 { config, .. } = &store {
            if !config.endpoint.starts_with("http://") && !config.endpoint.starts_with("https://") {
                return Err(SettingsError::InvalidS3Endpoint(config.endpoint.clone()));
            }
        }

        let dimensions = self.dimensions.ok_or(SettingsError::TooFewDimensions(0))?;
        let data_type = self.data_type.ok_or(SettingsError::MissingCodecId)?;
        if dimensions.data_type() != data_type {
            return Err(SettingsError::MissingCodecId);
        }

        Ok(StreamSettings {
            version: self.version,
            store,
            dimensions,
            data_type,
            compression: self.compression,
            multiscale: self.multiscale,
            custom_metadata: self.custom_metadata,
        })
    }
}

/// Owns everything needed to accept frames and, on drop, finalize the
/// dataset: the thread pool, every resolution level's array writer, the
/// multiscale staging slots, and the base/group metadata sinks.
pub struct ZarrStream {
    settings_version: ZarrVersion,
    dtype: DataType,
    dimensions: Dimensions,
    backend: Arc<StoreBackend>,
    thread_pool: Arc<ThreadPool>,
    writers: Vec<ArrayWriter>,
    scaled_frame_slots: Vec<ScaledFrameSlot>,
    metadata_sinks: Vec<Box<dyn Sink>>,
    custom_metadata: serde_json::Value,
    sticky_error: Arc<Mutex<Option<String>>>,
    finalized: bool,
}

impl ZarrStream {
    pub fn new(settings: StreamSettings) -> Result<Self, ZarrStreamError> {
        let num_threads = global_config().worker_threads();
        let sticky_error: Arc<Mutex<Option<String>>> = Arc::new(Mutex::new(None));
        let sticky_error_writer = Arc::clone(&sticky_error);
        let thread_pool = Arc::new(ThreadPool::new(num_threads, move |msg| {
            error!("thread pool task failed: {msg}");
            let mut sticky = sticky_error_writer.lock().unwrap();
            if sticky.is_none() {
                *sticky = Some(msg);
            }
        }));

        let backend = Arc::new(match settings.store {
            StoreLocation::Filesystem { root } => StoreBackend::Filesystem { root },
            #[cfg(feature = "s3")]
            StoreLocation::S3 { config, root_key } => {
                let client = Arc::new(S3Client::new(S3Config {
                    endpoint: config.endpoint,
                    bucket_name: config.bucket_name,
                    access_key_id: config.access_key_id,
                    secret_access_key: config.secret_access_key,
                    region: config.region,
                })?);
                StoreBackend::S3 { client, root_key }
            }
        });

        if !backend.bucket_is_reachable()? {
            warn!("object store bucket may not be reachable; proceeding anyway");
        }

        let version = match settings.version {
            ZarrVersion::V2 => ArrayVersion::V2,
            ZarrVersion::V3 => ArrayVersion::V3,
        };

        let pyramid = if settings.multiscale {
            multiscale::build_pyramid_dimensions(&settings.dimensions)
        } else {
            vec![settings.dimensions.as_slice().to_vec()]
        };

        let mut writers = Vec::with_capacity(pyramid.len());
        for (level, dims) in pyramid.into_iter().enumerate() {
            let dimensions = Dimensions::new(dims, settings.data_type, version == ArrayVersion::V3)
                .map_err(ZarrStreamError::InvalidSettings)?;
            let config = ArrayWriterConfig {
                dimensions,
                dtype: settings.data_type,
                level_of_detail: level,
                compression: settings.compression,
            };
            writers.push(ArrayWriter::new(config, version, Arc::clone(&backend), Arc::clone(&thread_pool)));
        }
        let scaled_frame_slots = (0..writers.len().saturating_sub(1)).map(|_| ScaledFrameSlot::default()).collect();

        let num_levels = writers.len();
        let metadata_paths: Vec<&str> = match settings.version {
            ZarrVersion::V2 => sink_creator::version_metadata_paths_v2().to_vec(),
            ZarrVersion::V3 => sink_creator::version_metadata_paths_v3().to_vec(),
        };
        let mut metadata_sinks = Vec::with_capacity(metadata_paths.len());
        for path in &metadata_paths {
            metadata_sinks.push(backend.open_sink(*path)?);
        }

        let base_documents: Vec<serde_json::Value> = match settings.version {
            ZarrVersion::V2 => vec![
                metadata::multiscales_metadata(&settings.dimensions, num_levels),
                metadata::zarr_v2_group_metadata(),
                settings.custom_metadata.clone(),
            ],
            ZarrVersion::V3 => vec![
                metadata::zarr_v3_base_metadata(),
                metadata::zarr_v3_group_metadata(&settings.dimensions, num_levels),
                settings.custom_metadata.clone(),
            ],
        };
        for (sink, document) in metadata_sinks.iter_mut().zip(&base_documents) {
            let bytes = serde_json::to_vec_pretty(document)?;
            sink.write(0, &bytes)?;
        }

        info!("stream opened with {num_levels} resolution level(s)");

        Ok(Self {
            settings_version: settings.version,
            dtype: settings.data_type,
            dimensions: settings.dimensions,
            backend,
            thread_pool,
            writers,
            scaled_frame_slots,
            metadata_sinks,
            custom_metadata: settings.custom_metadata,
            sticky_error,
            finalized: false,
        })
    }

    /// Consumes full frames one at a time from `data`, writing each through
    /// the base-resolution writer and driving the multiscale pyramid.
    /// Returns the total number of bytes consumed.
    pub fn append(&mut self, data: &[u8]) -> Result<usize, ZarrStreamError> {
        if let Some(msg) = self.sticky_error.lock().unwrap().clone() {
            return Err(ZarrStreamError::Poisoned(msg));
        }

        let bytes_per_frame = self.dimensions.bytes_of_frame()? as usize;
        if bytes_per_frame == 0 {
            return Ok(0);
        }

        let width = self.dimensions.as_slice()[self.dimensions.width_index()].array_size_px as usize;
        let height = self.dimensions.as_slice()[self.dimensions.height_index()].array_size_px as usize;

        let mut consumed = 0;
        let mut remaining = data;
        while remaining.len() >= bytes_per_frame {
            let frame = &remaining[..bytes_per_frame];
            let written = self.writers[0].write_frame(frame)?;
            if written == 0 {
                break;
            }

            if self.writers.len() > 1 {
                multiscale::write_multiscale_frames(&mut self.writers, &mut self.scaled_frame_slots, self.dtype, frame, width, height)?;
            }

            consumed += written;
            remaining = &remaining[written..];
        }
        Ok(consumed)
    }

    #[must_use]
    pub fn num_levels(&self) -> usize {
        self.writers.len()
    }

    fn finalize(&mut self) -> Result<(), ZarrStreamError> {
        if self.finalized {
            return Ok(());
        }
        self.finalized = true;

        for writer in &mut self.writers {
            writer.finalize()?;
        }
        self.writers.clear();
        for sink in self.metadata_sinks.drain(..) {
            sink.finalize()?;
        }
        // Every writer held its own clone of the thread pool and backend
        // handles; dropping them above is what lets these `get_mut`s succeed.
        if let Some(pool) = Arc::get_mut(&mut self.thread_pool) {
            pool.await_stop();
        }
        let _ = &self.backend;
        let _ = &self.custom_metadata;
        let _ = self.settings_version;
        Ok(())
    }
}

impl Drop for ZarrStream {
    fn drop(&mut self) {
        if let Err(e) = self.finalize() {
            error!("failed to finalize stream: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dimension::{Dimension, DimensionKind};

    fn dims() -> Dimensions {
        Dimensions::new(
            vec![
                Dimension::new("t", DimensionKind::Time, 0, 2, 0),
                Dimension::new("y", DimensionKind::Space, 8, 4, 0),
                Dimension::new("x", DimensionKind::Space, 8, 4, 0),
            ],
            DataType::Uint8,
            false,
        )
        .unwrap()
    }

    #[test]
    fn builder_rejects_missing_store_path() {
        let err = ZarrStreamBuilder::new(ZarrVersion::V2)
            .dimensions(dims())
            .data_type(DataType::Uint8)
            .validate()
            .unwrap_err();
        assert!(matches!(err, SettingsError::EmptyStorePath));
    }

    #[test]
    fn builder_rejects_mismatched_data_type() {
        let err = ZarrStreamBuilder::new(ZarrVersion::V2)
            .store_path("/tmp/does-not-matter")
            .dimensions(dims())
            .data_type(DataType::Float32)
            .validate()
            .unwrap_err();
        assert!(matches!(err, SettingsError::MissingCodecId));
    }

    #[test]
    fn append_writes_full_frames_through_a_tempdir_store() {
        let dir = tempfile::tempdir().unwrap();
        let mut stream = ZarrStreamBuilder::new(ZarrVersion::V2)
            .store_path(dir.path())
            .dimensions(dims())
            .data_type(DataType::Uint8)
            .build()
            .unwrap();

        let frame = vec![7u8; 8 * 8];
        let mut buffer = Vec::new();
        for _ in 0..4 {
            buffer.extend_from_slice(&frame);
        }
        let consumed = stream.append(&buffer).unwrap();
        assert_eq!(consumed, buffer.len());
        drop(stream);

        assert!(dir.path().join(".zgroup").exists());
        assert!(dir.path().join("0/.zarray").exists());
    }
}
