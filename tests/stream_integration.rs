//! End-to-end coverage of `ZarrStream` against a tempdir-backed filesystem
//! store: v2/v3 writes, ragged appends, multiscale pyramid construction and
//! settings validation.

use zarr_stream::{DataType, Dimension, DimensionKind, Dimensions, ZarrStreamBuilder, ZarrVersion};

fn v2_dims(array: u32, chunk: u32) -> Dimensions {
    Dimensions::new(
        vec![
            Dimension::new("t", DimensionKind::Time, 0, 2, 0),
            Dimension::new("y", DimensionKind::Space, array, chunk, 0),
            Dimension::new("x", DimensionKind::Space, array, chunk, 0),
        ],
        DataType::Uint8,
        false,
    )
    .unwrap()
}

#[test]
fn zarr_v2_even_write_rolls_over_and_writes_metadata() {
    let dir = tempfile::tempdir().unwrap();
    let dims = v2_dims(8, 4);
    let mut stream = ZarrStreamBuilder::new(ZarrVersion::V2)
        .store_path(dir.path())
        .dimensions(dims)
        .data_type(DataType::Uint8)
        .build()
        .unwrap();

    // Two frames exactly fill the t-dimension's chunk size (2), triggering a
    // flush and (v2 always rolls over) a rollover at the append-chunk boundary.
    let frame = vec![9u8; 8 * 8];
    let mut buffer = Vec::new();
    buffer.extend_from_slice(&frame);
    buffer.extend_from_slice(&frame);
    let consumed = stream.append(&buffer).unwrap();
    assert_eq!(consumed, buffer.len());
    drop(stream);

    assert!(dir.path().join(".zgroup").exists());
    assert!(dir.path().join(".zattrs").exists());
    assert!(dir.path().join("acquire.json").exists());
    assert!(dir.path().join("0/.zarray").exists());

    // y and x each have 2 chunks along them (8 / 4), so 4 chunk files in the
    // first (and only, given rollover) append-chunk slab.
    for (y, x) in [(0, 0), (0, 1), (1, 0), (1, 1)] {
        let path = dir.path().join(format!("0/0/{y}/{x}"));
        assert!(path.exists(), "missing chunk file {y}/{x}");
        let bytes_per_chunk = 1 * 2 * 4 * 4; // dtype size * t-chunk * y-chunk * x-chunk
        assert_eq!(std::fs::metadata(&path).unwrap().len(), bytes_per_chunk as u64);
    }
}

#[test]
fn zarr_v3_even_write_rolls_over_a_single_shard() {
    let dir = tempfile::tempdir().unwrap();
    let dims = Dimensions::new(
        vec![
            Dimension::new("t", DimensionKind::Time, 0, 2, 1),
            Dimension::new("y", DimensionKind::Space, 8, 4, 2),
            Dimension::new("x", DimensionKind::Space, 8, 4, 2),
        ],
        DataType::Uint8,
        true,
    )
    .unwrap();

    let mut stream = ZarrStreamBuilder::new(ZarrVersion::V3)
        .store_path(dir.path())
        .dimensions(dims)
        .data_type(DataType::Uint8)
        .build()
        .unwrap();

    let frame = vec![3u8; 8 * 8];
    let mut buffer = Vec::new();
    buffer.extend_from_slice(&frame);
    buffer.extend_from_slice(&frame);
    let consumed = stream.append(&buffer).unwrap();
    assert_eq!(consumed, buffer.len());
    drop(stream);

    assert!(dir.path().join("zarr.json").exists());
    assert!(dir.path().join("meta/root.group.json").exists());
    assert!(dir.path().join("meta/acquire.json").exists());
    assert!(dir.path().join("meta/root/0.array.json").exists());

    // shard_size_chunks of 2 along y and x exactly covers the 2 chunks along
    // each, so the whole spatial grid packs into a single shard file.
    let shard_path = dir.path().join("data/root/0/c0/0/0");
    assert!(shard_path.exists());
    // 4 chunks of 32 bytes each, plus an 8-entry (2 per chunk) u64 offset table.
    let expected_len = 4 * (1 * 2 * 4 * 4) + 2 * 4 * 8;
    assert_eq!(std::fs::metadata(&shard_path).unwrap().len(), expected_len as u64);
}

#[test]
fn ragged_append_consumes_only_whole_frames() {
    let dir = tempfile::tempdir().unwrap();
    let dims = v2_dims(8, 8); // single chunk along y/x, so no partial-chunk edge cases
    let mut stream = ZarrStreamBuilder::new(ZarrVersion::V2)
        .store_path(dir.path())
        .dimensions(dims)
        .data_type(DataType::Uint8)
        .build()
        .unwrap();

    let bytes_per_frame = 8 * 8;
    let mut buffer = vec![1u8; bytes_per_frame + bytes_per_frame / 2]; // 1.5 frames
    buffer[bytes_per_frame..].fill(2);

    let consumed = stream.append(&buffer).unwrap();
    assert_eq!(consumed, bytes_per_frame);

    // Feeding the leftover half-frame plus its other half across two calls
    // is exactly how a producer is expected to retry the unconsumed tail.
    let leftover = &buffer[bytes_per_frame..];
    let mut second_call = leftover.to_vec();
    second_call.extend(std::iter::repeat(3u8).take(bytes_per_frame - leftover.len()));
    let consumed2 = stream.append(&second_call).unwrap();
    assert_eq!(consumed2, bytes_per_frame);
}

#[test]
fn multiscale_pyramid_averages_frame_pairs_into_level_one() {
    let dir = tempfile::tempdir().unwrap();
    let dims = Dimensions::new(
        vec![
            Dimension::new("t", DimensionKind::Time, 0, 2, 0),
            Dimension::new("y", DimensionKind::Space, 16, 8, 0),
            Dimension::new("x", DimensionKind::Space, 16, 8, 0),
        ],
        DataType::Uint8,
        false,
    )
    .unwrap();

    let mut stream = ZarrStreamBuilder::new(ZarrVersion::V2)
        .store_path(dir.path())
        .dimensions(dims)
        .multiscale(true)
        .data_type(DataType::Uint8)
        .build()
        .unwrap();

    // level 0 -> 1 still fits the chunk size (new array 8 >= chunk 8); level
    // 1 -> 2 would need to shrink chunk_size_px below 8, so the pyramid stops
    // at 2 levels.
    assert_eq!(stream.num_levels(), 2);

    let frame = vec![40u8; 16 * 16];
    let mut buffer = Vec::new();
    for _ in 0..4 {
        buffer.extend_from_slice(&frame);
    }
    let consumed = stream.append(&buffer).unwrap();
    assert_eq!(consumed, buffer.len());
    drop(stream);

    assert!(dir.path().join("0/.zarray").exists());
    assert!(dir.path().join("1/.zarray").exists());
}

#[test]
fn builder_rejects_misplaced_append_dimension() {
    let dims = vec![
        Dimension::new("z", DimensionKind::Space, 0, 2, 0),
        Dimension::new("y", DimensionKind::Space, 0, 4, 0),
        Dimension::new("x", DimensionKind::Space, 8, 4, 0),
    ];
    let err = Dimensions::new(dims, DataType::Uint8, false).unwrap_err();
    assert!(matches!(err, zarr_stream::error::SettingsError::AppendDimensionMisplaced));
}

#[test]
fn builder_rejects_v3_dimensions_missing_shard_size() {
    let dir = tempfile::tempdir().unwrap();
    let dims = Dimensions::new(
        vec![
            Dimension::new("t", DimensionKind::Time, 0, 2, 1),
            Dimension::new("y", DimensionKind::Space, 8, 4, 0),
            Dimension::new("x", DimensionKind::Space, 8, 4, 2),
        ],
        DataType::Uint8,
        false, // not yet validated against v3 sharding requirements
    )
    .unwrap();

    let result = ZarrStreamBuilder::new(ZarrVersion::V3)
        .store_path(dir.path())
        .dimensions(dims)
        .data_type(DataType::Uint8)
        .build();

    assert!(matches!(result, Err(zarr_stream::ZarrStreamError::InvalidSettings(_))));
}

#[cfg(feature = "s3")]
#[test]
fn builder_rejects_non_http_s3_endpoint() {
    use zarr_stream::S3ConnectionConfig;

    let err = ZarrStreamBuilder::new(ZarrVersion::V3)
        .s3_store(
            S3ConnectionConfig {
                endpoint: "ftp://example.invalid".to_string(),
                bucket_name: "bucket".to_string(),
                access_key_id: "id".to_string(),
                secret_access_key: "secret".to_string(),
                region: "us-east-1".to_string(),
            },
            "root",
        )
        .dimensions(v2_dims(8, 4))
        .data_type(DataType::Uint8)
        .build();

    assert!(matches!(err, Err(zarr_stream::ZarrStreamError::InvalidSettings(_))));
}
