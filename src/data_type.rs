//! Supported array element types.

use derive_more::Display;

/// The element type of an array, fixing the byte size used by every chunk/shard
/// size computation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
pub enum DataType {
    #[display(fmt = "int8")]
    Int8,
    #[display(fmt = "uint8")]
    Uint8,
    #[display(fmt = "int16")]
    Int16,
    #[display(fmt = "uint16")]
    Uint16,
    #[display(fmt = "int32")]
    Int32,
    #[display(fmt = "uint32")]
    Uint32,
    #[display(fmt = "int64")]
    Int64,
    #[display(fmt = "uint64")]
    Uint64,
    #[display(fmt = "float32")]
    Float32,
    #[display(fmt = "float64")]
    Float64,
}

impl DataType {
    /// Size in bytes of a single element.
    #[must_use]
    pub const fn bytes_of_type(self) -> usize {
        match self {
            DataType::Int8 | DataType::Uint8 => 1,
            DataType::Int16 | DataType::Uint16 => 2,
            DataType::Int32 | DataType::Uint32 | DataType::Float32 => 4,
            DataType::Int64 | DataType::Uint64 | DataType::Float64 => 8,
        }
    }

    /// The Zarr v2 dtype code, endian-prefixed except for single-byte types.
    #[must_use]
    pub const fn zarr_v2_code(self) -> &'static str {
        match self {
            DataType::Int8 => "|i1",
            DataType::Uint8 => "|u1",
            DataType::Int16 => "<i2",
            DataType::Uint16 => "<u2",
            DataType::Int32 => "<i4",
            DataType::Uint32 => "<u4",
            DataType::Int64 => "<i8",
            DataType::Uint64 => "<u8",
            DataType::Float32 => "<f4",
            DataType::Float64 => "<f8",
        }
    }

    /// The Zarr v3 dtype name.
    #[must_use]
    pub const fn zarr_v3_name(self) -> &'static str {
        match self {
            DataType::Int8 => "int8",
            DataType::Uint8 => "uint8",
            DataType::Int16 => "int16",
            DataType::Uint16 => "uint16",
            DataType::Int32 => "int32",
            DataType::Uint32 => "uint32",
            DataType::Int64 => "int64",
            DataType::Uint64 => "uint64",
            DataType::Float32 => "float32",
            DataType::Float64 => "float64",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn byte_sizes() {
        assert_eq!(DataType::Uint8.bytes_of_type(), 1);
        assert_eq!(DataType::Uint16.bytes_of_type(), 2);
        assert_eq!(DataType::Float32.bytes_of_type(), 4);
        assert_eq!(DataType::Float64.bytes_of_type(), 8);
    }

    #[test]
    fn v2_codes_are_endian_prefixed_except_single_byte() {
        assert_eq!(DataType::Uint8.zarr_v2_code(), "|u1");
        assert_eq!(DataType::Uint16.zarr_v2_code(), "<u2");
        assert_eq!(DataType::Float32.zarr_v2_code(), "<f4");
    }

    #[test]
    fn v3_names_are_plain() {
        assert_eq!(DataType::Uint16.zarr_v3_name(), "uint16");
        assert_eq!(DataType::Float64.zarr_v3_name(), "float64");
    }

    #[test]
    fn display_matches_v3_name() {
        assert_eq!(DataType::Int32.to_string(), "int32");
    }
}
