//! Dense typed tensors produced by the IDX decoder
//!
//! A `Tensor` is a row-major shape plus one flat buffer whose element type is
//! fixed by the IDX type tag. Sample records hold slices of decoded tensors.

use serde::{Deserialize, Serialize};
use std::fmt;

use super::dtype::DType;
use crate::error::{Result, StrataError};

/// Scalar element stored in a tensor buffer
pub(crate) trait Element: Copy + Default + PartialEq + fmt::Debug + Send + Sync + 'static {
    const SIZE: usize;

    fn from_be_slice(bytes: &[u8]) -> Self;
    fn write_be(self, out: &mut Vec<u8>);
    fn from_f64(value: f64) -> Self;
    fn to_f64(self) -> f64;
}

macro_rules! impl_element {
    ($($t:ty),*) => {
        $(
            impl Element for $t {
                const SIZE: usize = std::mem::size_of::<$t>();

                fn from_be_slice(bytes: &[u8]) -> Self {
                    let mut buf = [0u8; std::mem::size_of::<$t>()];
                    buf.copy_from_slice(bytes);
                    <$t>::from_be_bytes(buf)
                }

                fn write_be(self, out: &mut Vec<u8>) {
                    out.extend_from_slice(&self.to_be_bytes());
                }

                fn from_f64(value: f64) -> Self {
                    value as $t
                }

                fn to_f64(self) -> f64 {
                    self as f64
                }
            }
        )*
    };
}

impl_element!(u8, i8, i16, i32, f32, f64);

/// Run `$body` with `$v` bound to the typed buffer, whatever its variant
macro_rules! with_data {
    ($data:expr, $v:ident => $body:expr) => {
        match $data {
            TensorData::U8($v) => $body,
            TensorData::I8($v) => $body,
            TensorData::I16($v) => $body,
            TensorData::I32($v) => $body,
            TensorData::F32($v) => $body,
            TensorData::F64($v) => $body,
        }
    };
}

/// Like `with_data!`, rewrapping the resulting `Vec` in the same variant
macro_rules! map_data {
    ($data:expr, $v:ident => $body:expr) => {
        match $data {
            TensorData::U8($v) => TensorData::U8($body),
            TensorData::I8($v) => TensorData::I8($body),
            TensorData::I16($v) => TensorData::I16($body),
            TensorData::I32($v) => TensorData::I32($body),
            TensorData::F32($v) => TensorData::F32($body),
            TensorData::F64($v) => TensorData::F64($body),
        }
    };
}

/// Flat element buffer, one variant per supported element type
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TensorData {
    U8(Vec<u8>),
    I8(Vec<i8>),
    I16(Vec<i16>),
    I32(Vec<i32>),
    F32(Vec<f32>),
    F64(Vec<f64>),
}

impl TensorData {
    /// Element type of the buffer
    pub fn dtype(&self) -> DType {
        match self {
            TensorData::U8(_) => DType::U8,
            TensorData::I8(_) => DType::I8,
            TensorData::I16(_) => DType::I16,
            TensorData::I32(_) => DType::I32,
            TensorData::F32(_) => DType::F32,
            TensorData::F64(_) => DType::F64,
        }
    }

    /// Number of elements
    pub fn len(&self) -> usize {
        with_data!(self, v => v.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Element `index` widened to `f64`
    pub fn value_f64(&self, index: usize) -> Option<f64> {
        with_data!(self, v => v.get(index).map(|x| x.to_f64()))
    }

    /// Copy of the buffer converted to `f32`
    pub fn to_f32_vec(&self) -> Vec<f32> {
        with_data!(self, v => v.iter().map(|x| x.to_f64() as f32).collect())
    }

    /// Decode `count` big-endian elements of `dtype` from `payload`
    pub(crate) fn from_be_bytes(dtype: DType, payload: &[u8], count: usize) -> Self {
        match dtype {
            DType::U8 => TensorData::U8(decode_vec(payload, count)),
            DType::I8 => TensorData::I8(decode_vec(payload, count)),
            DType::I16 => TensorData::I16(decode_vec(payload, count)),
            DType::I32 => TensorData::I32(decode_vec(payload, count)),
            DType::F32 => TensorData::F32(decode_vec(payload, count)),
            DType::F64 => TensorData::F64(decode_vec(payload, count)),
        }
    }

    /// Append the buffer to `out` as big-endian elements
    pub(crate) fn write_be(&self, out: &mut Vec<u8>) {
        with_data!(self, v => v.iter().for_each(|x| x.write_be(out)))
    }

    /// Contiguous sub-range of the buffer
    pub(crate) fn slice(&self, start: usize, end: usize) -> Self {
        map_data!(self, v => v[start..end].to_vec())
    }

    /// Truncate or zero-pad to exactly `len` elements
    ///
    /// Padding memory is reserved up front; a length the allocator refuses is
    /// a `Format` error rather than an abort.
    pub(crate) fn resized(self, len: usize) -> Result<Self> {
        Ok(map_data!(self, v => resize_vec(v, len)?))
    }

    /// Pick elements by flat index; `None` slots take `fill`
    pub(crate) fn gather(&self, indices: &[Option<usize>], fill: f64) -> Self {
        map_data!(self, v => gather_vec(v, indices, fill))
    }
}

fn decode_vec<T: Element>(payload: &[u8], count: usize) -> Vec<T> {
    payload
        .chunks_exact(T::SIZE)
        .take(count)
        .map(T::from_be_slice)
        .collect()
}

fn resize_vec<T: Element>(mut values: Vec<T>, len: usize) -> Result<Vec<T>> {
    if len > values.len() {
        values
            .try_reserve_exact(len - values.len())
            .map_err(|e| StrataError::format(format!("cannot pad to {} elements: {}", len, e)))?;
    }
    values.resize(len, T::default());
    Ok(values)
}

fn gather_vec<T: Element>(values: &[T], indices: &[Option<usize>], fill: f64) -> Vec<T> {
    let fill = T::from_f64(fill);
    indices
        .iter()
        .map(|slot| slot.and_then(|i| values.get(i).copied()).unwrap_or(fill))
        .collect()
}

/// Row-major strides for `shape`
pub(crate) fn strides(shape: &[usize]) -> Vec<usize> {
    let mut strides = vec![1; shape.len()];
    for axis in (0..shape.len().saturating_sub(1)).rev() {
        strides[axis] = strides[axis + 1] * shape[axis + 1];
    }
    strides
}

/// A dense, shaped, typed array
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tensor {
    shape: Vec<usize>,
    data: TensorData,
}

impl Tensor {
    /// Create a tensor, checking that the buffer fills the shape exactly
    pub fn new(shape: Vec<usize>, data: TensorData) -> Result<Self> {
        let numel: usize = shape.iter().product();
        if numel != data.len() {
            return Err(StrataError::format(format!(
                "shape {:?} holds {} elements, buffer has {}",
                shape,
                numel,
                data.len()
            )));
        }
        Ok(Self { shape, data })
    }

    pub fn from_u8(shape: Vec<usize>, values: Vec<u8>) -> Result<Self> {
        Self::new(shape, TensorData::U8(values))
    }

    pub fn from_f32(shape: Vec<usize>, values: Vec<f32>) -> Result<Self> {
        Self::new(shape, TensorData::F32(values))
    }

    /// Built by crate code whose shape arithmetic already matches the buffer
    pub(crate) fn from_parts(shape: Vec<usize>, data: TensorData) -> Self {
        debug_assert_eq!(shape.iter().product::<usize>(), data.len());
        Self { shape, data }
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn ndim(&self) -> usize {
        self.shape.len()
    }

    /// Total element count
    pub fn numel(&self) -> usize {
        self.data.len()
    }

    pub fn dtype(&self) -> DType {
        self.data.dtype()
    }

    pub fn data(&self) -> &TensorData {
        &self.data
    }

    pub fn into_data(self) -> TensorData {
        self.data
    }

    /// Flat element `index` widened to `f64`
    pub fn value_f64(&self, index: usize) -> Option<f64> {
        self.data.value_f64(index)
    }

    /// Sub-tensor at position `index` along the first axis
    pub fn index_axis0(&self, index: usize) -> Result<Tensor> {
        let (&rows, rest) = self
            .shape
            .split_first()
            .ok_or_else(|| StrataError::format("cannot index a zero-dimensional tensor"))?;
        if index >= rows {
            return Err(StrataError::IndexOutOfBounds { index, len: rows });
        }
        let row_len: usize = rest.iter().product();
        let start = index * row_len;
        Ok(Tensor::from_parts(
            rest.to_vec(),
            self.data.slice(start, start + row_len),
        ))
    }

    /// Split along the first axis into one tensor per row
    pub fn unstack(&self) -> Result<Vec<Tensor>> {
        let rows = self
            .shape
            .first()
            .copied()
            .ok_or_else(|| StrataError::format("cannot unstack a zero-dimensional tensor"))?;
        (0..rows).map(|i| self.index_axis0(i)).collect()
    }

    /// Same elements under a new shape
    pub fn reshape(self, shape: Vec<usize>) -> Result<Tensor> {
        Tensor::new(shape, self.data)
    }

    /// Copy converted to `f32`
    pub fn to_f32(&self) -> Tensor {
        Tensor::from_parts(self.shape.clone(), TensorData::F32(self.data.to_f32_vec()))
    }

    /// Reorder axes; `order[i]` is the source axis of output axis `i`
    pub fn permute(&self, order: &[usize]) -> Result<Tensor> {
        let ndim = self.ndim();
        let mut seen = vec![false; ndim];
        if order.len() != ndim
            || order
                .iter()
                .any(|&axis| axis >= ndim || std::mem::replace(&mut seen[axis], true))
        {
            return Err(StrataError::format(format!(
                "axis order {:?} is not a permutation of {} axes",
                order, ndim
            )));
        }

        let in_strides = strides(&self.shape);
        let out_shape: Vec<usize> = order.iter().map(|&axis| self.shape[axis]).collect();
        let mut coord = vec![0usize; ndim];
        let mut indices = Vec::with_capacity(self.numel());

        for _ in 0..self.numel() {
            let src = coord
                .iter()
                .zip(order)
                .map(|(&c, &axis)| c * in_strides[axis])
                .sum();
            indices.push(Some(src));

            for axis in (0..ndim).rev() {
                coord[axis] += 1;
                if coord[axis] < out_shape[axis] {
                    break;
                }
                coord[axis] = 0;
            }
        }

        Ok(Tensor::from_parts(out_shape, self.data.gather(&indices, 0.0)))
    }

    /// New tensor of `shape` whose elements are picked from this one
    pub(crate) fn gather(&self, shape: Vec<usize>, indices: &[Option<usize>], fill: f64) -> Tensor {
        Tensor::from_parts(shape, self.data.gather(indices, fill))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_rejects_mismatched_buffer() {
        assert!(Tensor::from_u8(vec![2, 2], vec![0; 3]).is_err());
        assert!(Tensor::from_u8(vec![2, 2], vec![0; 4]).is_ok());
    }

    #[test]
    fn test_index_axis0() {
        let t = Tensor::from_u8(vec![3, 2], vec![1, 2, 3, 4, 5, 6]).unwrap();
        let row = t.index_axis0(1).unwrap();
        assert_eq!(row.shape(), &[2]);
        assert_eq!(row.data(), &TensorData::U8(vec![3, 4]));
        assert!(matches!(
            t.index_axis0(3),
            Err(StrataError::IndexOutOfBounds { index: 3, len: 3 })
        ));
    }

    #[test]
    fn test_unstack_labels() {
        let labels = Tensor::from_u8(vec![3], vec![7, 0, 9]).unwrap();
        let rows = labels.unstack().unwrap();
        assert_eq!(rows.len(), 3);
        assert!(rows[0].shape().is_empty());
        assert_eq!(rows[2].value_f64(0), Some(9.0));
    }

    #[test]
    fn test_permute_hwc_to_chw() {
        // 2x2 image with 2 channels: pixel (y, x) = [10*y + x, 100 + 10*y + x]
        let hwc = Tensor::from_u8(vec![2, 2, 2], vec![0, 100, 1, 101, 10, 110, 11, 111]).unwrap();
        let chw = hwc.permute(&[2, 0, 1]).unwrap();
        assert_eq!(chw.shape(), &[2, 2, 2]);
        assert_eq!(
            chw.data(),
            &TensorData::U8(vec![0, 1, 10, 11, 100, 101, 110, 111])
        );
    }

    #[test]
    fn test_permute_rejects_bad_order() {
        let t = Tensor::from_u8(vec![1, 2], vec![1, 2]).unwrap();
        assert!(t.permute(&[0, 0]).is_err());
        assert!(t.permute(&[0]).is_err());
        assert!(t.permute(&[0, 2]).is_err());
    }

    #[test]
    fn test_resized_pads_and_truncates() {
        let data = TensorData::I16(vec![1, 2, 3]);
        assert_eq!(data.clone().resized(5).unwrap(), TensorData::I16(vec![1, 2, 3, 0, 0]));
        assert_eq!(data.resized(2).unwrap(), TensorData::I16(vec![1, 2]));
    }

    #[test]
    fn test_gather_fill() {
        let data = TensorData::U8(vec![5, 6]);
        let out = data.gather(&[Some(1), None, Some(0)], 255.0);
        assert_eq!(out, TensorData::U8(vec![6, 255, 5]));
    }
}
