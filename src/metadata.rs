//! JSON metadata document builders for Zarr v2/v3 arrays and groups, plus the
//! OME-Zarr multiscales document, built with `serde_json::json!`.

use serde_json::{json, Value};

use crate::codec::blosc::BloscCompressionParams;
use crate::data_type::DataType;
use crate::dimension::{Dimensions, DimensionKind};

/// Ceiling-divides the frames written so far down through every intermediate
/// (non-spatial, non-append) dimension's full extent, producing the append
/// axis's published extent. Shared by both v2 and v3 metadata.
fn append_axis_shape(dims: &Dimensions, frames_written: u64) -> u64 {
    let end = dims.height_index();
    let mut append_size = frames_written;
    for d in &dims.as_slice()[1..end] {
        let size = u64::from(d.array_size_px).max(1);
        append_size = (append_size + size - 1) / size;
    }
    append_size.max(1)
}

fn full_shape(dims: &Dimensions, frames_written: u64) -> Vec<u64> {
    let mut shape = vec![append_axis_shape(dims, frames_written)];
    shape.extend(dims.as_slice()[1..].iter().map(|d| u64::from(d.array_size_px)));
    shape
}

fn chunk_shape(dims: &Dimensions) -> Vec<u32> {
    dims.as_slice().iter().map(|d| d.chunk_size_px).collect()
}

/// `.zarray` document.
#[must_use]
pub fn zarr_v2_array_metadata(
    dims: &Dimensions,
    dtype: DataType,
    frames_written: u64,
    compression: Option<BloscCompressionParams>,
) -> Value {
    let compressor = compression.map_or(Value::Null, |c| {
        json!({
            "id": "blosc",
            "cname": c.codec.name(),
            "clevel": c.clevel,
            "shuffle": match c.shuffle {
                crate::codec::blosc::Shuffle::None => 0,
                crate::codec::blosc::Shuffle::Byte => 1,
                crate::codec::blosc::Shuffle::Bit => 2,
            },
        })
    });

    json!({
        "zarr_format": 2,
        "shape": full_shape(dims, frames_written),
        "chunks": chunk_shape(dims),
        "dtype": dtype.zarr_v2_code(),
        "fill_value": 0,
        "order": "C",
        "filters": Value::Null,
        "dimension_separator": "/",
        "compressor": compressor,
    })
}

/// `{level}.array.json` document.
#[must_use]
pub fn zarr_v3_array_metadata(
    dims: &Dimensions,
    dtype: DataType,
    frames_written: u64,
    compression: Option<BloscCompressionParams>,
) -> Value {
    let compressor = compression.map(|c| {
        json!({
            "codec": "https://purl.org/zarr/spec/codec/blosc/1.0",
            "configuration": {
                "blocksize": 0,
                "clevel": c.clevel,
                "cname": c.codec.name(),
                "shuffle": match c.shuffle {
                    crate::codec::blosc::Shuffle::None => 0,
                    crate::codec::blosc::Shuffle::Byte => 1,
                    crate::codec::blosc::Shuffle::Bit => 2,
                },
            }
        })
    });

    let mut metadata = json!({
        "attributes": {},
        "chunk_grid": {
            "type": "regular",
            "separator": "/",
            "chunk_shape": chunk_shape(dims),
        },
        "chunk_memory_layout": "C",
        "data_type": dtype.zarr_v3_name(),
        "extensions": [],
        "fill_value": 0,
        "shape": full_shape(dims, frames_written),
        "storage_transformers": [
            {
                "type": "indexed",
                "extension": "https://purl.org/zarr/spec/storage_transformers/sharding/1.0",
                "configuration": {
                    "chunks_per_shard": dims.as_slice().iter().map(|d| d.shard_size_chunks).collect::<Vec<_>>(),
                }
            }
        ],
    });
    if let Some(c) = compressor {
        metadata["compressor"] = c;
    }
    metadata
}

fn dimension_kind_str(kind: DimensionKind) -> &'static str {
    match kind {
        DimensionKind::Time => "time",
        DimensionKind::Channel => "channel",
        DimensionKind::Space => "space",
        DimensionKind::Other => "other",
    }
}

/// OME-Zarr `multiscales` attribute, shared between the v2 `.zattrs` and the
/// v3 group document.
#[must_use]
pub fn multiscales_metadata(dims: &Dimensions, num_levels: usize) -> Value {
    let ndims = dims.len();
    let axes: Vec<Value> = dims
        .as_slice()
        .iter()
        .enumerate()
        .map(|(i, d)| {
            let mut axis = json!({ "name": d.name, "type": dimension_kind_str(d.kind) });
            if i >= ndims - 2 {
                axis["unit"] = json!("micrometer");
            }
            axis
        })
        .collect();

    let mut datasets = vec![json!({
        "path": "0",
        "coordinateTransformations": [{ "type": "scale", "scale": vec![1.0; ndims] }],
    })];

    for level in 1..num_levels {
        let factor = 2f64.powi(level as i32);
        let mut scale = vec![factor]; // append axis
        scale.extend(std::iter::repeat(1.0).take(ndims.saturating_sub(3)));
        scale.push(factor); // y
        scale.push(factor); // x
        datasets.push(json!({
            "path": level.to_string(),
            "coordinateTransformations": [{ "type": "scale", "scale": scale }],
        }));
    }

    json!({
        "multiscales": [{
            "version": "0.4",
            "axes": axes,
            "datasets": datasets,
            "type": "local_mean",
            "metadata": {
                "description": "local mean downsampling, matching skimage.transform.downscale_local_mean v0.21.0",
                "args": [2],
                "kwargs": { "cval": 0 },
            },
        }]
    })
}

/// v2 `.zgroup` document.
#[must_use]
pub fn zarr_v2_group_metadata() -> Value {
    json!({ "zarr_format": 2 })
}

/// v3 `zarr.json` base document.
#[must_use]
pub fn zarr_v3_base_metadata() -> Value {
    json!({
        "extensions": [],
        "metadata_encoding": "https://purl.org/zarr/spec/protocol/core/3.0",
        "metadata_key_suffix": ".json",
        "zarr_format": "https://purl.org/zarr/spec/protocol/core/3.0",
    })
}

/// v3 `meta/root.group.json` document.
#[must_use]
pub fn zarr_v3_group_metadata(dims: &Dimensions, num_levels: usize) -> Value {
    json!({ "attributes": multiscales_metadata(dims, num_levels) })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dimension::Dimension;

    fn dims() -> Dimensions {
        Dimensions::new(
            vec![
                Dimension::new("t", DimensionKind::Time, 0, 5, 0),
                Dimension::new("z", DimensionKind::Space, 5, 2, 0),
                Dimension::new("y", DimensionKind::Space, 48, 16, 0),
                Dimension::new("x", DimensionKind::Space, 64, 16, 0),
            ],
            DataType::Uint16,
            false,
        )
        .unwrap()
    }

    #[test]
    fn v2_metadata_has_expected_shape_fields() {
        let md = zarr_v2_array_metadata(&dims(), DataType::Uint16, 15, None);
        assert_eq!(md["zarr_format"], 2);
        assert_eq!(md["dtype"], "<u2");
        assert_eq!(md["compressor"], Value::Null);
        assert_eq!(md["shape"][0], 3); // 15 frames / 5 z-frames-per-chunk-wide-slab
    }

    #[test]
    fn v3_metadata_includes_sharding_transformer() {
        let md = zarr_v3_array_metadata(&dims(), DataType::Uint16, 15, None);
        assert_eq!(md["data_type"], "uint16");
        assert_eq!(md["storage_transformers"][0]["type"], "indexed");
    }

    #[test]
    fn multiscales_metadata_has_one_dataset_per_level() {
        let md = multiscales_metadata(&dims(), 3);
        assert_eq!(md["multiscales"][0]["datasets"].as_array().unwrap().len(), 3);
    }
}
