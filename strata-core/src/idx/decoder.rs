//! IDX decoder and encoder
//!
//! Layout: a 4-byte big-endian magic whose low byte is the number of
//! dimensions and whose next byte is the element type tag, then one
//! big-endian `u32` per dimension, then the elements in row-major order,
//! each big-endian.

use std::io::Read;
use std::path::Path;
use tracing::{debug, warn};

use super::compression::{decompress, open_maybe_compressed};
use super::dtype::DType;
use super::tensor::{Tensor, TensorData};
use crate::error::{Result, StrataError};

/// Highest dimension count accepted in a header
pub const MAX_DIMS: usize = 3;

/// Largest declared payload, in bytes, that lenient decoding will zero-pad up to
pub const MAX_PADDED_BYTES: usize = 1 << 31;

/// Parsed header of an IDX stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdxHeader {
    pub dtype: DType,
    pub dims: Vec<usize>,
}

impl IdxHeader {
    /// Bytes taken by the magic and dimension words
    pub fn len(&self) -> usize {
        4 + 4 * self.dims.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dims.is_empty()
    }

    /// Element count implied by the dimensions
    pub fn numel(&self) -> Result<usize> {
        self.dims
            .iter()
            .try_fold(1usize, |acc, &d| acc.checked_mul(d))
            .ok_or_else(|| StrataError::format(format!("dimensions {:?} overflow", self.dims)))
    }

    /// Parse the header at the start of `data`
    pub fn parse(data: &[u8]) -> Result<Self> {
        let magic_bytes: [u8; 4] = data
            .get(..4)
            .and_then(|b| b.try_into().ok())
            .ok_or_else(|| StrataError::format("stream shorter than the 4-byte magic"))?;
        if magic_bytes[..2] != [0, 0] {
            return Err(StrataError::format(format!(
                "magic {:02x?} does not start with two zero bytes",
                magic_bytes
            )));
        }
        let magic = u32::from_be_bytes(magic_bytes);
        let nd = (magic % 256) as usize;
        let tag = magic / 256;

        if !(1..=MAX_DIMS).contains(&nd) {
            return Err(StrataError::format(format!(
                "dimension count {} outside 1..={}",
                nd, MAX_DIMS
            )));
        }
        let dtype = DType::from_tag(tag)
            .ok_or_else(|| StrataError::format(format!("unknown type tag {:#x}", tag)))?;

        let header_len = 4 + 4 * nd;
        if data.len() < header_len {
            return Err(StrataError::format(format!(
                "header needs {} bytes, stream has {}",
                header_len,
                data.len()
            )));
        }

        let dims = data[4..header_len]
            .chunks_exact(4)
            .map(|word| u32::from_be_bytes([word[0], word[1], word[2], word[3]]) as usize)
            .collect();

        Ok(Self { dtype, dims })
    }
}

/// Decode an IDX buffer, unwrapping gzip/xz if the header says so
///
/// With `strict`, the payload must hold exactly the element count the
/// dimensions imply. Otherwise surplus elements are dropped and missing ones
/// are zero-filled.
pub fn decode(data: &[u8], strict: bool) -> Result<Tensor> {
    let raw = decompress(data)?;
    decode_raw(&raw, strict)
}

/// Decode everything `reader` yields
pub fn decode_reader<R: Read>(mut reader: R, strict: bool) -> Result<Tensor> {
    let mut data = Vec::new();
    reader.read_to_end(&mut data)?;
    decode(&data, strict)
}

/// Decode an IDX file, decompressing by extension
pub fn read_idx_file(path: &Path, strict: bool) -> Result<Tensor> {
    debug!("Reading IDX file {}", path.display());
    let reader = open_maybe_compressed(path)?;
    decode_reader(reader, strict)
}

fn decode_raw(data: &[u8], strict: bool) -> Result<Tensor> {
    let header = IdxHeader::parse(data)?;
    let expected = header.numel()?;
    let element_size = header.dtype.element_size();
    let payload = &data[header.len()..];

    let available = payload.len() / element_size;
    let partial = payload.len() % element_size;

    if available != expected || partial != 0 {
        if strict {
            return Err(StrataError::format(format!(
                "expected {} {} elements ({} bytes), payload has {} bytes",
                expected,
                header.dtype,
                expected.saturating_mul(element_size),
                payload.len()
            )));
        }
        if available < expected {
            let declared = expected
                .checked_mul(element_size)
                .filter(|&bytes| bytes <= MAX_PADDED_BYTES)
                .ok_or_else(|| {
                    StrataError::format(format!(
                        "header declares {:?} {} elements but payload has {} bytes; \
                         refusing to pad beyond {} bytes",
                        header.dims,
                        header.dtype,
                        payload.len(),
                        MAX_PADDED_BYTES
                    ))
                })?;
            debug!("Padding IDX payload to {} bytes", declared);
        }
        warn!(
            "IDX payload holds {} elements (+{} stray bytes), header declares {}; adjusting",
            available, partial, expected
        );
    }

    let data = TensorData::from_be_bytes(header.dtype, payload, expected);
    let data = if data.len() < expected {
        data.resized(expected)?
    } else {
        data
    };
    Tensor::new(header.dims, data)
}

/// Encode a tensor into the IDX layout
pub fn encode(tensor: &Tensor) -> Result<Vec<u8>> {
    let nd = tensor.ndim();
    if !(1..=MAX_DIMS).contains(&nd) {
        return Err(StrataError::format(format!(
            "cannot encode a {}-dimensional tensor",
            nd
        )));
    }

    let magic = (tensor.dtype().tag() as u32) << 8 | nd as u32;
    let mut out = Vec::with_capacity(4 + 4 * nd + tensor.numel() * tensor.dtype().element_size());
    out.extend_from_slice(&magic.to_be_bytes());
    for &dim in tensor.shape() {
        let dim = u32::try_from(dim)
            .map_err(|_| StrataError::format(format!("dimension {} exceeds u32", dim)))?;
        out.extend_from_slice(&dim.to_be_bytes());
    }
    tensor.data().write_be(&mut out);
    Ok(out)
}
