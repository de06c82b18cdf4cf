// (c) Copyright 2025 Mikołaj Kuranowski
// SPDX-License-Identifier: MIT

//! Length-prefixed `BlobHeader`/`Blob` framing (spec §4.1) and blob
//! decompression (the decompression half of §4.3, kept here because both the
//! frame reader and every worker need it).

use std::io::{self, Read};

use protobuf::Message;

use crate::error::{Error, Result, MAX_BLOB_HEADER_SIZE, MAX_BLOB_SIZE};
use crate::proto::fileformat::{Blob, BlobHeader};

/// Default initial capacity of the reusable scratch buffers, in bytes.
pub const DEFAULT_BUFFER_SIZE: usize = 1024 * 1024;

/// One `BlobHeader` + `Blob` frame, still compressed. Decompression is left
/// to the worker that owns this frame (§4.3 attributes it to the worker
/// budget, not the frame reader).
pub struct RawFrame {
    pub blob_type: String,
    pub blob: Blob,
}

/// Sequential reader of [RawFrame]s from a byte source.
///
/// Owns a single set of scratch buffers which grow monotonically as larger
/// frames are encountered; never shared with anything else (§4.1, §5
/// "Resource policy").
pub struct FrameReader<R> {
    reader: R,
    len_buf: [u8; 4],
    header_buf: Vec<u8>,
    blob_buf: Vec<u8>,
}

impl<R: Read> FrameReader<R> {
    pub fn new(reader: R, initial_capacity: usize) -> Self {
        Self {
            reader,
            len_buf: [0; 4],
            header_buf: Vec::with_capacity(initial_capacity),
            blob_buf: Vec::with_capacity(initial_capacity),
        }
    }

    /// Reads the next frame. Returns `Ok(None)` on a clean end-of-stream
    /// (EOF exactly at the start of a frame); any other EOF is a
    /// [Error::Truncated].
    pub fn read_frame(&mut self) -> Result<Option<RawFrame>> {
        match read_to_fill(&mut self.reader, &mut self.len_buf)? {
            Fill::Empty => return Ok(None),
            Fill::Partial => return Err(Error::Truncated),
            Fill::Full => {}
        }

        let header_len = u32::from_be_bytes(self.len_buf);
        if header_len >= MAX_BLOB_HEADER_SIZE {
            return Err(Error::HeaderTooLarge(header_len));
        }

        resize_scratch(&mut self.header_buf, header_len as usize);
        read_exact_mid_frame(&mut self.reader, &mut self.header_buf)?;
        let header = BlobHeader::parse_from_bytes(&self.header_buf)?;

        let datasize = header.datasize();
        if datasize < 0 {
            return Err(Error::NegativeDatasize(datasize));
        }
        if datasize as u32 >= MAX_BLOB_SIZE {
            return Err(Error::BlobTooLarge(datasize as u32));
        }

        resize_scratch(&mut self.blob_buf, datasize as usize);
        read_exact_mid_frame(&mut self.reader, &mut self.blob_buf)?;
        let blob = Blob::parse_from_bytes(&self.blob_buf)?;

        Ok(Some(RawFrame {
            blob_type: header.type_().to_string(),
            blob,
        }))
    }

    /// Reclaims the underlying reader, e.g. to hand the remainder of the
    /// stream to the pipeline once the header frame has been consumed.
    pub fn into_inner(self) -> R {
        self.reader
    }
}

/// Resizes `buf` to exactly `len`, never shrinking its allocation -
/// the scratch buffer grows monotonically across frames (§4.1, §5).
fn resize_scratch(buf: &mut Vec<u8>, len: usize) {
    buf.clear();
    buf.resize(len, 0);
}

enum Fill {
    Full,
    Partial,
    Empty,
}

/// Like `Read::read_exact`, but distinguishes "hit EOF before a single byte
/// was read" (a clean stream boundary) from "hit EOF partway through" (a
/// truncated frame).
fn read_to_fill<R: Read>(reader: &mut R, buf: &mut [u8]) -> Result<Fill> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => {
                return Ok(if filled == 0 {
                    Fill::Empty
                } else {
                    Fill::Partial
                })
            }
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        }
    }
    Ok(Fill::Full)
}

/// Reads exactly `buf.len()` bytes. Any EOF here is mid-frame, hence always
/// a truncation rather than a clean end-of-stream.
fn read_exact_mid_frame<R: Read>(reader: &mut R, buf: &mut [u8]) -> Result<()> {
    match read_to_fill(reader, buf)? {
        Fill::Full => Ok(()),
        Fill::Partial | Fill::Empty => Err(Error::Truncated),
    }
}

/// Decompresses a [Blob] into `scratch`, reusing its allocation across calls
/// (§4.3, §5: "each worker owns a private decompression buffer reused across
/// blobs"). `scratch` holds the decompressed bytes on return.
pub fn decompress_blob(blob: &Blob, scratch: &mut Vec<u8>) -> Result<()> {
    use crate::proto::fileformat::blob::Data;

    scratch.clear();

    match &blob.data {
        Some(Data::Raw(data)) => {
            scratch.extend_from_slice(data);
            Ok(())
        }

        Some(Data::ZlibData(data)) => {
            let raw_size = blob.raw_size() as usize;
            scratch.reserve(raw_size + 64);
            let mut decoder = flate2::read::ZlibDecoder::new(&data[..]);
            decoder.read_to_end(scratch)?;
            if scratch.len() != raw_size {
                return Err(Error::DecompressedSizeMismatch {
                    got: scratch.len(),
                    expected: raw_size,
                });
            }
            Ok(())
        }

        Some(Data::LzmaData(_)) => Err(Error::UnsupportedCompression("lzma")),
        Some(Data::OBSOLETEBzip2Data(_)) => Err(Error::UnsupportedCompression("bzip2")),
        None => Err(Error::UnknownBlobData),
    }
}
