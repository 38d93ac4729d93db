//! The dimension model: ordered array dimensions and the index algebra that
//! maps a frame index to chunk, shard and byte positions.

use crate::data_type::DataType;
use crate::error::{IndexError, SettingsError};

/// The semantic role of a dimension, used only to decide downsampling and
/// unit metadata behavior — it does not affect the index algebra.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DimensionKind {
    Time,
    Channel,
    Space,
    Other,
}

/// A single dimension of the array.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dimension {
    pub name: String,
    pub kind: DimensionKind,
    /// Full extent along this dimension. `0` is permitted only on dimension 0
    /// (the append dimension), meaning "unbounded".
    pub array_size_px: u32,
    pub chunk_size_px: u32,
    /// Ignored for Zarr v2; must be nonzero for Zarr v3.
    pub shard_size_chunks: u32,
}

impl Dimension {
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        kind: DimensionKind,
        array_size_px: u32,
        chunk_size_px: u32,
        shard_size_chunks: u32,
    ) -> Self {
        Self {
            name: name.into(),
            kind,
            array_size_px,
            chunk_size_px,
            shard_size_chunks,
        }
    }

    fn chunks_along(&self) -> u64 {
        ceil_div(self.array_size_px as u64, self.chunk_size_px as u64)
    }

    fn shards_along(&self) -> u64 {
        if self.shard_size_chunks == 0 {
            0
        } else {
            ceil_div(self.chunks_along(), self.shard_size_chunks as u64)
        }
    }
}

fn ceil_div(a: u64, b: u64) -> u64 {
    debug_assert!(b > 0);
    (a + b - 1) / b
}

/// The ordered dimension list for one array, plus the element type, bound
/// together because the byte-size computations need both.
#[derive(Debug, Clone)]
pub struct Dimensions {
    dims: Vec<Dimension>,
    data_type: DataType,
}

impl Dimensions {
    pub fn new(dims: Vec<Dimension>, data_type: DataType, require_sharding: bool) -> Result<Self, SettingsError> {
        if dims.len() < 3 {
            return Err(SettingsError::TooFewDimensions(dims.len()));
        }

        let mut append_dims = 0;
        for (i, d) in dims.iter().enumerate() {
            if d.name.trim().is_empty() {
                return Err(SettingsError::EmptyDimensionName);
            }
            if d.array_size_px == 0 {
                append_dims += 1;
                if i != 0 {
                    return Err(SettingsError::AppendDimensionMisplaced);
                }
            }
            if d.chunk_size_px == 0 {
                return Err(SettingsError::ZeroChunkSize(i));
            }
            if d.array_size_px != 0 && d.chunk_size_px > d.array_size_px {
                return Err(SettingsError::ChunkLargerThanArray(i, d.chunk_size_px, d.array_size_px));
            }
            if require_sharding && d.shard_size_chunks == 0 {
                return Err(SettingsError::ZeroShardSize(i));
            }
        }
        if append_dims > 1 {
            return Err(SettingsError::AppendDimensionMisplaced);
        }

        Ok(Self { dims, data_type })
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.dims.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.dims.is_empty()
    }

    #[must_use]
    pub fn as_slice(&self) -> &[Dimension] {
        &self.dims
    }

    #[must_use]
    pub fn data_type(&self) -> DataType {
        self.data_type
    }

    #[must_use]
    pub fn height_index(&self) -> usize {
        self.dims.len() - 2
    }

    #[must_use]
    pub fn width_index(&self) -> usize {
        self.dims.len() - 1
    }

    fn dim(&self, i: usize) -> Result<&Dimension, IndexError> {
        self.dims
            .get(i)
            .ok_or(IndexError::DimensionOutOfBounds(i, self.dims.len()))
    }

    /// `Π array_size_px(d)` for `d` in `[from, to)`, restricted to the
    /// "intermediate" dimensions (never the height/width dims).
    fn array_size_product(&self, from: usize, to: usize) -> u64 {
        self.dims[from..to].iter().map(|d| d.array_size_px as u64).product()
    }

    fn chunk_size_product(&self, from: usize, to: usize) -> u64 {
        self.dims[from..to].iter().map(|d| d.chunk_size_px as u64).product()
    }

    fn chunks_along_product(&self, from: usize, to: usize) -> u64 {
        self.dims[from..to].iter().map(Dimension::chunks_along).product()
    }

    fn shards_along_product(&self, from: usize, to: usize) -> u64 {
        self.dims[from..to].iter().map(Dimension::shards_along).product()
    }

    /// The intermediate dimensions are indices `1..height_index()`: every
    /// dimension except the append axis and the two spatial axes.
    fn intermediate_end(&self) -> usize {
        self.height_index()
    }

    /// Which chunk along `dim_index` frame `frame_id` belongs to. Only
    /// meaningful for `dim_index < height_index()`.
    pub fn chunk_lattice_index(&self, frame_id: u64, dim_index: usize) -> Result<u64, IndexError> {
        let end = self.intermediate_end();
        if dim_index >= end {
            return Err(IndexError::DimensionOutOfBounds(dim_index, self.dims.len()));
        }
        let dim = self.dim(dim_index)?;
        if dim.chunk_size_px == 0 {
            return Err(IndexError::ZeroChunkSize(dim_index));
        }

        if dim_index == 0 {
            let divisor = dim.chunk_size_px as u64 * self.array_size_product(1, end);
            Ok(frame_id / divisor.max(1))
        } else {
            let modulus = self.array_size_product(dim_index, end);
            let divisor = dim.chunk_size_px as u64 * self.array_size_product(dim_index + 1, end);
            Ok((frame_id % modulus.max(1)) / divisor.max(1))
        }
    }

    /// The offset, in whole chunks, of the chunk-group (spanning every
    /// height/width chunk) that frame `frame_id` falls into, within the
    /// flat `number_of_chunks_in_memory()` buffer array.
    pub fn tile_group_offset(&self, frame_id: u64) -> Result<u64, IndexError> {
        let end = self.intermediate_end();
        let spatial_chunks = self.chunks_along_product(end, self.dims.len());

        let mut offset = 0u64;
        for d in 1..end {
            let idx = self.chunk_lattice_index(frame_id, d)?;
            let stride = spatial_chunks * self.chunks_along_product(d + 1, end);
            offset += idx * stride;
        }
        Ok(offset)
    }

    /// The byte offset, within a chunk buffer, at which the tile for frame
    /// `frame_id` begins (before accounting for its row/column position
    /// inside the height/width tile, which the caller adds separately).
    pub fn chunk_internal_offset(&self, frame_id: u64) -> Result<u64, IndexError> {
        let end = self.intermediate_end();
        let tile_size = self.data_type.bytes_of_type() as u64
            * self.dim(self.height_index())?.chunk_size_px as u64
            * self.dim(self.width_index())?.chunk_size_px as u64;

        let mut units = 0u64;
        for d in 0..end {
            let dim = self.dim(d)?;
            let array_stride = self.array_size_product(d + 1, end);
            let internal_idx = if d == 0 {
                (frame_id / array_stride.max(1)) % dim.chunk_size_px as u64
            } else {
                (frame_id / array_stride.max(1)) % dim.array_size_px as u64 % dim.chunk_size_px as u64
            };
            let chunk_stride = self.chunk_size_product(d + 1, end);
            units += internal_idx * chunk_stride;
        }
        Ok(units * tile_size)
    }

    /// Number of chunk buffers that must be resident simultaneously: the
    /// product of `chunks_along` over every dimension except the append axis.
    pub fn number_of_chunks_in_memory(&self) -> u64 {
        self.chunks_along_product(1, self.dims.len())
    }

    pub fn bytes_per_chunk(&self) -> u64 {
        self.data_type.bytes_of_type() as u64 * self.chunk_size_product(0, self.dims.len())
    }

    pub fn bytes_of_frame(&self) -> Result<u64, IndexError> {
        Ok(self.data_type.bytes_of_type() as u64
            * self.dim(self.height_index())?.array_size_px as u64
            * self.dim(self.width_index())?.array_size_px as u64)
    }

    /// Number of shard files needed per append-chunk slab: the product of
    /// `shards_along` over every dimension except the append axis.
    pub fn number_of_shards(&self) -> u64 {
        self.shards_along_product(1, self.dims.len())
    }

    /// Number of chunks packed into one shard file, including the append axis
    /// (a shard may bundle several append-chunks' worth of data together).
    pub fn chunks_per_shard(&self) -> u64 {
        self.dims.iter().map(|d| d.shard_size_chunks.max(1) as u64).product()
    }

    /// The flat shard index that chunk `chunk_index` (an index into the
    /// `number_of_chunks_in_memory()`-sized buffer array) belongs to.
    pub fn shard_index_for_chunk(&self, chunk_index: u64) -> Result<u64, IndexError> {
        let end = self.dims.len();
        let (chunk_idx, _) = self.decompose_chunk_index(chunk_index)?;

        let mut shard_idx = 0u64;
        for d in 1..end {
            let shard_size = self.dims[d].shard_size_chunks.max(1) as u64;
            let shard_lattice_idx = chunk_idx[d] / shard_size;
            let stride = self.shards_along_product(d + 1, end);
            shard_idx += shard_lattice_idx * stride;
        }
        Ok(shard_idx)
    }

    /// `(shard_index, internal_index)` for chunk `chunk_index`, where
    /// `internal_index` addresses the chunk's slot within its shard's offset
    /// table (`0..chunks_per_shard excluding the append axis`).
    pub fn shard_internal_index(&self, chunk_index: u64) -> Result<(u64, u64), IndexError> {
        let end = self.dims.len();
        let (chunk_idx, _) = self.decompose_chunk_index(chunk_index)?;

        let mut shard_idx = 0u64;
        let mut internal_idx = 0u64;
        for d in 1..end {
            let shard_size = self.dims[d].shard_size_chunks.max(1) as u64;
            let shard_lattice_idx = chunk_idx[d] / shard_size;
            let internal = chunk_idx[d] % shard_size;

            let shard_stride = self.shards_along_product(d + 1, end);
            shard_idx += shard_lattice_idx * shard_stride;

            let internal_stride: u64 = self.dims[d + 1..end]
                .iter()
                .map(|dd| dd.shard_size_chunks.max(1) as u64)
                .product();
            internal_idx += internal * internal_stride;
        }
        Ok((shard_idx, internal_idx))
    }

    /// Decompose a flat index into the `number_of_chunks_in_memory()` buffer
    /// array into per-dimension chunk-lattice indices (dim 0 is always 0;
    /// it is not part of this flat space).
    fn decompose_chunk_index(&self, chunk_index: u64) -> Result<(Vec<u64>, u64), IndexError> {
        let end = self.dims.len();
        let mut idx = vec![0u64; end];
        let mut remaining = chunk_index;
        for d in (1..end).rev() {
            let along = self.dims[d].chunks_along().max(1);
            idx[d] = remaining % along;
            remaining /= along;
        }
        Ok((idx, remaining))
    }

    /// `frames_written mod frames_per_inner_slab == 0` marks a chunk-flush
    /// boundary, where `frames_per_inner_slab` covers the append dimension's
    /// own chunk size plus every intermediate dimension's full extent.
    pub fn frames_per_inner_slab(&self) -> u64 {
        let end = self.intermediate_end();
        self.dim(0).expect("dims non-empty").chunk_size_px as u64 * self.array_size_product(1, end)
    }

    /// Same as [`Self::frames_per_inner_slab`] but additionally multiplied by
    /// the append axis's `shard_size_chunks` — the v3 shard-rollover period.
    pub fn frames_per_shard_slab(&self) -> u64 {
        self.frames_per_inner_slab() * self.dim(0).expect("dims non-empty").shard_size_chunks.max(1) as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_dims() -> Dimensions {
        Dimensions::new(
            vec![
                Dimension::new("t", DimensionKind::Time, 0, 5, 0),
                Dimension::new("c", DimensionKind::Channel, 3, 2, 0),
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
    fn chunk_lattice_index_matches_reference_table() {
        let d = test_dims();
        assert_eq!(d.chunk_lattice_index(0, 2).unwrap(), 0);
        assert_eq!(d.chunk_lattice_index(0, 1).unwrap(), 0);
        assert_eq!(d.chunk_lattice_index(0, 0).unwrap(), 0);
        assert_eq!(d.chunk_lattice_index(2, 2).unwrap(), 1);
        assert_eq!(d.chunk_lattice_index(5, 2).unwrap(), 0);
        assert_eq!(d.chunk_lattice_index(5, 1).unwrap(), 0);
        assert_eq!(d.chunk_lattice_index(5, 0).unwrap(), 0);
        assert_eq!(d.chunk_lattice_index(12, 2).unwrap(), 1);
        assert_eq!(d.chunk_lattice_index(12, 1).unwrap(), 1);
        assert_eq!(d.chunk_lattice_index(26, 1).unwrap(), 1);
        assert_eq!(d.chunk_lattice_index(75, 0).unwrap(), 1);
    }

    #[test]
    fn tile_group_offset_matches_reference_table() {
        let d = test_dims();
        let cases = [(0u64, 0u64), (1, 0), (2, 12), (3, 12), (4, 24), (10, 36), (14, 60), (75, 0)];
        for (frame, expected) in cases {
            assert_eq!(d.tile_group_offset(frame).unwrap(), expected, "frame {frame}");
        }
    }

    #[test]
    fn chunk_internal_offset_matches_reference_table() {
        let d = test_dims();
        let cases = [(0u64, 0u64), (1, 512), (4, 0), (5, 1024), (15, 2048), (25, 2048), (75, 0)];
        for (frame, expected) in cases {
            assert_eq!(d.chunk_internal_offset(frame).unwrap(), expected, "frame {frame}");
        }
    }

    #[test]
    fn shard_index_for_chunk_matches_reference_formula() {
        let d = Dimensions::new(
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
        .unwrap();
        let period = d.number_of_chunks_in_memory();
        for k in 0..144u64 {
            let expected = (k / 2) % 18;
            assert_eq!(d.shard_index_for_chunk(k % period).unwrap(), expected, "k {k}");
        }
    }

    #[test]
    fn shard_internal_index_matches_reference_table() {
        let d = Dimensions::new(
            vec![
                Dimension::new("t", DimensionKind::Time, 0, 32, 1),
                Dimension::new("y", DimensionKind::Space, 960, 320, 2),
                Dimension::new("x", DimensionKind::Space, 1080, 270, 3),
            ],
            DataType::Uint8,
            true,
        )
        .unwrap();
        let cases: [(u64, u64, u64); 8] = [
            (0, 0, 0),
            (1, 0, 1),
            (2, 0, 2),
            (3, 1, 0),
            (4, 0, 3),
            (7, 1, 3),
            (8, 2, 0),
            (11, 3, 0),
        ];
        for (k, shard, internal) in cases {
            let (s, i) = d.shard_internal_index(k).unwrap();
            assert_eq!((s, i), (shard, internal), "k {k}");
        }
    }

    #[test]
    fn number_of_chunks_in_memory_and_bytes_per_chunk() {
        let d = test_dims();
        assert_eq!(d.number_of_chunks_in_memory(), 2 * 3 * 3 * 4);
        assert_eq!(d.bytes_per_chunk(), 2 * 5 * 2 * 2 * 16 * 16);
    }

    #[test]
    fn rejects_misplaced_append_dimension() {
        let dims = vec![
            Dimension::new("z", DimensionKind::Space, 0, 2, 0),
            Dimension::new("y", DimensionKind::Space, 0, 16, 0),
            Dimension::new("x", DimensionKind::Space, 64, 16, 0),
        ];
        assert!(matches!(
            Dimensions::new(dims, DataType::Uint8, false),
            Err(SettingsError::AppendDimensionMisplaced)
        ));
    }

    #[test]
    fn rejects_zero_shard_size_when_required() {
        let dims = vec![
            Dimension::new("z", DimensionKind::Space, 5, 2, 0),
            Dimension::new("y", DimensionKind::Space, 48, 16, 1),
            Dimension::new("x", DimensionKind::Space, 64, 16, 1),
        ];
        assert!(matches!(
            Dimensions::new(dims, DataType::Uint8, true),
            Err(SettingsError::ZeroShardSize(0))
        ));
    }
}
