//! Compression wrappers for IDX files
//!
//! Raw IDX files ship as `.gz` (and sometimes `.xz`) archives. Readers are
//! chosen by file extension for paths and by magic sniffing for byte buffers.

use bytes::Bytes;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use std::borrow::Cow;
use std::fs::File;
use std::io::{BufReader, Read, Write};
use std::path::{Path, PathBuf};
use xz2::read::XzDecoder;
use xz2::write::XzEncoder;

use crate::error::{Result, StrataError};

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];
const XZ_MAGIC: [u8; 6] = [0xfd, 0x37, 0x7a, 0x58, 0x5a, 0x00];

/// Container wrapping an IDX stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Compression {
    /// Plain IDX bytes
    #[default]
    None,
    /// gzip (`.gz`)
    Gzip,
    /// xz / LZMA2 (`.xz`)
    Xz,
}

impl Compression {
    /// Pick a wrapper from the file extension
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|ext| ext.to_str()) {
            Some("gz") => Compression::Gzip,
            Some("xz") => Compression::Xz,
            _ => Compression::None,
        }
    }

    /// Pick a wrapper from the leading magic bytes
    pub fn detect(data: &[u8]) -> Self {
        if data.starts_with(&GZIP_MAGIC) {
            Compression::Gzip
        } else if data.starts_with(&XZ_MAGIC) {
            Compression::Xz
        } else {
            Compression::None
        }
    }

    pub fn extension(&self) -> Option<&'static str> {
        match self {
            Compression::None => None,
            Compression::Gzip => Some("gz"),
            Compression::Xz => Some("xz"),
        }
    }

    /// Wrap `reader` in the matching decoder
    pub fn reader<'a, R: Read + 'a>(&self, reader: R) -> Box<dyn Read + 'a> {
        match self {
            Compression::None => Box::new(reader),
            Compression::Gzip => Box::new(GzDecoder::new(reader)),
            Compression::Xz => Box::new(XzDecoder::new(reader)),
        }
    }
}

/// Open `path`, transparently decompressing by extension
pub fn open_maybe_compressed(path: &Path) -> Result<Box<dyn Read>> {
    let file = BufReader::new(File::open(path)?);
    Ok(Compression::from_path(path).reader(file))
}

/// Decompress a buffer, auto-detecting the wrapper from its header
///
/// Plain input is handed back borrowed.
pub fn decompress(data: &[u8]) -> Result<Cow<'_, [u8]>> {
    let compression = Compression::detect(data);
    if compression == Compression::None {
        return Ok(Cow::Borrowed(data));
    }

    let mut out = Vec::with_capacity(data.len() * 4);
    compression
        .reader(data)
        .read_to_end(&mut out)
        .map_err(|e| StrataError::format(format!("corrupt {:?} stream: {}", compression, e)))?;
    Ok(Cow::Owned(out))
}

/// Compress a buffer with the given wrapper
pub fn compress(data: &[u8], compression: Compression) -> Result<Bytes> {
    match compression {
        Compression::None => Ok(Bytes::copy_from_slice(data)),
        Compression::Gzip => {
            let mut encoder = GzEncoder::new(Vec::new(), flate2::Compression::default());
            encoder.write_all(data)?;
            Ok(Bytes::from(encoder.finish()?))
        }
        Compression::Xz => {
            let mut encoder = XzEncoder::new(Vec::new(), 6);
            encoder.write_all(data)?;
            Ok(Bytes::from(encoder.finish()?))
        }
    }
}

/// `foo-idx3-ubyte.gz` -> `foo-idx3-ubyte`; other names are returned unchanged
pub fn strip_compression_suffix(path: &Path) -> PathBuf {
    match Compression::from_path(path) {
        Compression::None => path.to_path_buf(),
        _ => path.with_extension(""),
    }
}
