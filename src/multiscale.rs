//! Multiscale pyramid: synchronous 2×2 downsampling plus two-frame
//! averaging across resolution levels.

use num_traits::{AsPrimitive, Zero};

use crate::array_writer::ArrayWriter;
use crate::data_type::DataType;
use crate::dimension::{Dimension, DimensionKind, Dimensions};
use crate::error::ZarrStreamError;

/// Derives the next pyramid level's dimension configuration from the
/// current one. Returns `None` once any dimension's chunk size could no
/// longer shrink.
#[must_use]
pub fn downsample(current: &[Dimension]) -> Option<Vec<Dimension>> {
    let mut next = Vec::with_capacity(current.len());

    for dim in current {
        if dim.kind == DimensionKind::Channel {
            next.push(dim.clone());
            continue;
        }

        let new_array_size = if dim.array_size_px == 0 {
            0
        } else {
            (dim.array_size_px + 1) / 2
        };
        let new_chunk_size = if dim.array_size_px == 0 {
            dim.chunk_size_px
        } else {
            dim.chunk_size_px.min(new_array_size.max(1))
        };
        let new_shard_size = if dim.array_size_px == 0 {
            1
        } else {
            let chunks_along = (u64::from(new_array_size) + u64::from(new_chunk_size) - 1) / u64::from(new_chunk_size).max(1);
            (dim.shard_size_chunks as u64).min(chunks_along.max(1)) as u32
        };

        next.push(Dimension::new(dim.name.clone(), dim.kind, new_array_size, new_chunk_size, new_shard_size));
    }

    if next.iter().zip(current).any(|(n, c)| n.chunk_size_px < c.chunk_size_px) {
        return None;
    }
    Some(next)
}

/// Numeric bound shared by every supported sample type, letting
/// `downscale2x`/`average_two_frames` be written once generically instead
/// of dispatched over at runtime per `DataType`.
pub trait Sample: Copy + Zero + AsPrimitive<f64> + 'static {
    fn from_f64(v: f64) -> Self;
}

macro_rules! impl_sample {
    ($t:ty) => {
        impl Sample for $t {
            fn from_f64(v: f64) -> Self {
                v as $t
            }
        }
    };
}
impl_sample!(u8);
impl_sample!(u16);
impl_sample!(u32);
impl_sample!(u64);
impl_sample!(i8);
impl_sample!(i16);
impl_sample!(i32);
impl_sample!(i64);
impl_sample!(f32);
impl_sample!(f64);

/// Pads odd dimensions by replicating the last row/column, then averages
/// each 2×2 block. Operates on a single-channel-at-a-time basis: callers
/// invoke this once per (non-channel) plane with `width`/`height` already
/// excluding the channel extent.
pub fn downscale2x<T: Sample>(src: &[T], width: usize, height: usize) -> (Vec<T>, usize, usize) {
    let pad_width = width % 2 != 0;
    let pad_height = height % 2 != 0;
    let w_pad = width + usize::from(pad_width);
    let h_pad = height + usize::from(pad_height);

    let out_w = w_pad / 2;
    let out_h = h_pad / 2;
    let mut out = vec![T::zero(); out_w * out_h];

    for row in (0..h_pad).step_by(2) {
        let down_row = if pad_height && row + 1 >= height { row } else { row + 1 };
        for col in (0..w_pad).step_by(2) {
            let right_col = if pad_width && col + 1 >= width { col } else { col + 1 };

            let here = src[row * width + col].as_();
            let right = src[row * width + right_col].as_();
            let down = src[down_row * width + col].as_();
            let diag = src[down_row * width + right_col].as_();

            let avg = 0.25 * (here + right + down + diag);
            out[(row / 2) * out_w + (col / 2)] = T::from_f64(avg);
        }
    }

    (out, out_w, out_h)
}

/// Element-wise average of two equally-sized frames.
pub fn average_two_frames<T: Sample>(a: &[T], b: &[T]) -> Vec<T> {
    a.iter().zip(b).map(|(x, y)| T::from_f64(0.5 * (x.as_() + y.as_()))).collect()
}

/// Untyped byte-buffer entry point, dispatching on [`DataType`] via
/// monomorphized generic functions instead of a runtime table.
pub fn downscale2x_bytes(dtype: DataType, data: &[u8], width: usize, height: usize) -> (Vec<u8>, usize, usize) {
    macro_rules! dispatch {
        ($t:ty) => {{
            let typed: &[$t] = cast_slice(data);
            let (out, w, h) = downscale2x(typed, width, height);
            (cast_vec_to_bytes(out), w, h)
        }};
    }
    match dtype {
        DataType::Int8 => dispatch!(i8),
        DataType::Uint8 => dispatch!(u8),
        DataType::Int16 => dispatch!(i16),
        DataType::Uint16 => dispatch!(u16),
        DataType::Int32 => dispatch!(i32),
        DataType::Uint32 => dispatch!(u32),
        DataType::Int64 => dispatch!(i64),
        DataType::Uint64 => dispatch!(u64),
        DataType::Float32 => dispatch!(f32),
        DataType::Float64 => dispatch!(f64),
    }
}

pub fn average_two_frames_bytes(dtype: DataType, a: &[u8], b: &[u8]) -> Vec<u8> {
    macro_rules! dispatch {
        ($t:ty) => {{
            let ta: &[$t] = cast_slice(a);
            let tb: &[$t] = cast_slice(b);
            cast_vec_to_bytes(average_two_frames(ta, tb))
        }};
    }
    match dtype {
        DataType::Int8 => dispatch!(i8),
        DataType::Uint8 => dispatch!(u8),
        DataType::Int16 => dispatch!(i16),
        DataType::Uint16 => dispatch!(u16),
        DataType::Int32 => dispatch!(i32),
        DataType::Uint32 => dispatch!(u32),
        DataType::Int64 => dispatch!(i64),
        DataType::Uint64 => dispatch!(u64),
        DataType::Float32 => dispatch!(f32),
        DataType::Float64 => dispatch!(f64),
    }
}

/// Reinterprets a byte slice as `&[T]`. Every `DataType`'s byte length is a
/// multiple of its element size by construction (it comes straight from
/// `DataType::bytes_of_type`), so this never panics on misalignment checks
/// other than a debug-mode length assertion.
fn cast_slice<T: Copy>(data: &[u8]) -> &[T] {
    let len = data.len() / std::mem::size_of::<T>();
    debug_assert_eq!(len * std::mem::size_of::<T>(), data.len());
    unsafe { std::slice::from_raw_parts(data.as_ptr().cast::<T>(), len) }
}

/// Reinterprets a `Vec<T>` as a `Vec<u8>` without copying, when safe to do
/// so. On Windows the allocator only guarantees `MIN_ALIGN`; reusing the
/// allocation for a type with a coarser alignment than that would hand the
/// deallocator a pointer it didn't allocate, so in that case (and for every
/// non-Windows target, where no such guarantee is assumed) this falls back
/// to a copy.
fn cast_vec_to_bytes<T: Copy>(data: Vec<T>) -> Vec<u8> {
    #[cfg(target_family = "windows")]
    {
        #[cfg(target_pointer_width = "64")]
        const MIN_ALIGN: usize = 16;
        #[cfg(target_pointer_width = "32")]
        const MIN_ALIGN: usize = 8;

        if std::mem::align_of::<T>() <= MIN_ALIGN {
            let mut data = data;
            let ptr = data.as_mut_ptr().cast::<u8>();
            let len = data.len() * std::mem::size_of::<T>();
            let cap = data.capacity() * std::mem::size_of::<T>();
            std::mem::forget(data);
            return unsafe { Vec::from_raw_parts(ptr, len, cap) };
        }
    }

    let len = data.len() * std::mem::size_of::<T>();
    let mut bytes = Vec::with_capacity(len);
    for value in &data {
        let value_bytes =
            unsafe { std::slice::from_raw_parts((value as *const T).cast::<u8>(), std::mem::size_of::<T>()) };
        bytes.extend_from_slice(value_bytes);
    }
    bytes
}

/// One pending downsampled frame awaiting a pair-partner to be averaged
/// with, per resolution level `>= 1`.
#[derive(Default)]
pub struct ScaledFrameSlot(Option<Vec<u8>>);

/// Drives the per-append multiscale fan-out: downsamples the just-written
/// frame for every level beyond the base, averaging adjacent pairs, and
/// writes the result through each level's [`ArrayWriter`].
pub fn write_multiscale_frames(
    writers: &mut [ArrayWriter],
    slots: &mut [ScaledFrameSlot],
    dtype: DataType,
    base_data: &[u8],
    base_width: usize,
    base_height: usize,
) -> Result<(), ZarrStreamError> {
    if writers.len() <= 1 {
        return Ok(());
    }

    let mut data = base_data.to_vec();
    let mut width = base_width;
    let mut height = base_height;

    for level in 1..writers.len() {
        let (scaled, new_w, new_h) = downscale2x_bytes(dtype, &data, width, height);
        width = new_w;
        height = new_h;

        let slot = &mut slots[level - 1].0;
        match slot.take() {
            None => {
                *slot = Some(scaled);
                break;
            }
            Some(previous) => {
                let averaged = average_two_frames_bytes(dtype, &previous, &scaled);
                writers[level].write_frame(&averaged)?;
                data = averaged;
            }
        }
    }
    Ok(())
}

/// Constructs the dimension list for every pyramid level by repeatedly
/// applying [`downsample`] until it signals the series is exhausted.
#[must_use]
pub fn build_pyramid_dimensions(base: &Dimensions) -> Vec<Vec<Dimension>> {
    let mut levels = vec![base.as_slice().to_vec()];
    while let Some(next) = downsample(levels.last().expect("non-empty")) {
        levels.push(next);
    }
    levels
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn downscale2x_averages_even_blocks() {
        let src: [u16; 16] = [1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14, 15, 16];
        let (out, w, h) = downscale2x(&src, 4, 4);
        assert_eq!((w, h), (2, 2));
        // top-left 2x2 block: (1+2+5+6)/4 = 3.5 -> 3 (truncating cast)
        assert_eq!(out[0], 3);
    }

    #[test]
    fn downscale2x_pads_odd_dimensions_by_replication() {
        let src: [u8; 9] = [1, 2, 3, 4, 5, 6, 7, 8, 9];
        let (out, w, h) = downscale2x(&src, 3, 3);
        assert_eq!((w, h), (2, 2));
        assert_eq!(out.len(), 4);
    }

    #[test]
    fn average_two_frames_is_elementwise_mean() {
        let a = [0u8, 10, 20];
        let b = [10u8, 20, 30];
        assert_eq!(average_two_frames(&a, &b), vec![5, 15, 25]);
    }

    #[test]
    fn downsample_preserves_channel_dimension() {
        let dims = vec![
            Dimension::new("t", DimensionKind::Time, 0, 5, 0),
            Dimension::new("c", DimensionKind::Channel, 3, 2, 0),
            Dimension::new("y", DimensionKind::Space, 48, 16, 0),
            Dimension::new("x", DimensionKind::Space, 64, 16, 0),
        ];
        let next = downsample(&dims).unwrap();
        assert_eq!(next[1].array_size_px, 3);
        assert_eq!(next[2].array_size_px, 24);
        assert_eq!(next[3].array_size_px, 32);
    }

    #[test]
    fn downsample_stops_once_chunk_size_cannot_shrink_further() {
        // level 0 -> 1: new array size 4 still covers the existing chunk size
        // of 4, so chunk_size_px is unchanged and downsample succeeds.
        let dims = vec![
            Dimension::new("t", DimensionKind::Time, 0, 5, 0),
            Dimension::new("y", DimensionKind::Space, 8, 4, 0),
            Dimension::new("x", DimensionKind::Space, 8, 4, 0),
        ];
        let next = downsample(&dims).unwrap();
        assert_eq!(next[1].chunk_size_px, 4);
        // level 1 -> 2: new array size 2 is smaller than the chunk size of 4,
        // so chunk_size_px would have to shrink and downsample stops instead.
        assert!(downsample(&next).is_none());
    }
}
