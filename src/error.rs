// (c) Copyright 2025 Mikołaj Kuranowski
// SPDX-License-Identifier: MIT

use std::io;
use std::sync::Arc;

/// Max permitted size for a serialized [BlobHeader](crate::proto::fileformat::BlobHeader) -
/// 64 KiB.
pub const MAX_BLOB_HEADER_SIZE: u32 = 64 * 1024;

/// Max permitted size for a serialized & decompressed
/// [Blob](crate::proto::fileformat::Blob) - 32 MiB.
pub const MAX_BLOB_SIZE: u32 = 32 * 1024 * 1024;

/// Error conditions which can occur while decoding a PBF stream.
///
/// `Io` and `Protobuf` wrap their source in an [Arc] so that `Error` stays
/// `Clone`: the same terminal error is observed by every consumer of a
/// shared [Decoder](crate::Decoder) once the pipeline has failed.
#[derive(Debug, Clone, thiserror::Error)]
pub enum Error {
    #[error("io: {0}")]
    Io(#[from] Arc<io::Error>),

    #[error("protobuf: {0}")]
    Protobuf(#[from] Arc<protobuf::Error>),

    #[error("truncated input: expected more bytes mid-frame")]
    Truncated,

    #[error("BlobHeader too large: {0} >= {MAX_BLOB_HEADER_SIZE}")]
    HeaderTooLarge(u32),

    #[error("Blob too large: {0} >= {MAX_BLOB_SIZE}")]
    BlobTooLarge(u32),

    #[error("BlobHeader.datasize is negative: {0}")]
    NegativeDatasize(i32),

    #[error("BlobHeader.type: got {got:?}, expected {expected:?}")]
    UnexpectedBlobType { got: String, expected: &'static str },

    #[error("file requires unsupported features: {0:?}")]
    UnsupportedFeatures(Vec<String>),

    #[error("unknown blob data (neither raw nor zlib_data is set)")]
    UnknownBlobData,

    #[error("unsupported compression: {0} (supported: raw and zlib)")]
    UnsupportedCompression(&'static str),

    #[error("zlib inflate produced {got} bytes, expected raw_size={expected}")]
    DecompressedSizeMismatch { got: usize, expected: usize },

    #[error("{field}: keys/vals/roles/memids/types arrays have mismatched lengths")]
    LengthMismatch { field: &'static str },

    #[error("dense node tag stream ran out of key/value pairs before all nodes were emitted")]
    DenseTagStreamUnderflow,

    #[error("string table index {0} out of range")]
    StringIndexOutOfRange(i32),

    #[error("unknown relation member type {0}")]
    UnknownMemberType(i32),
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        Error::Io(Arc::new(e))
    }
}

impl From<protobuf::Error> for Error {
    fn from(e: protobuf::Error) -> Self {
        Error::Protobuf(Arc::new(e))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
