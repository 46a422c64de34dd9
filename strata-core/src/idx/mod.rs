//! IDX binary tensor format
//!
//! Decoding and encoding of the IDX ("SN3") layout used by MNIST-family
//! datasets, with transparent gzip/xz unwrapping.

pub mod compression;
pub mod decoder;
pub mod dtype;
pub mod tensor;

pub use compression::{open_maybe_compressed, strip_compression_suffix, Compression};
pub use decoder::{decode, decode_reader, encode, read_idx_file, IdxHeader};
pub use dtype::DType;
pub use tensor::{Tensor, TensorData};
