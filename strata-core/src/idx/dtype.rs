//! IDX element type table

use serde::{Deserialize, Serialize};
use std::fmt;

/// Element types an IDX header can declare
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DType {
    U8,
    I8,
    I16,
    I32,
    F32,
    F64,
}

impl DType {
    /// Every supported type, in tag order
    pub const ALL: [DType; 6] = [
        DType::U8,
        DType::I8,
        DType::I16,
        DType::I32,
        DType::F32,
        DType::F64,
    ];

    /// Resolve a header type tag
    pub fn from_tag(tag: u32) -> Option<Self> {
        match tag {
            8 => Some(DType::U8),
            9 => Some(DType::I8),
            11 => Some(DType::I16),
            12 => Some(DType::I32),
            13 => Some(DType::F32),
            14 => Some(DType::F64),
            _ => None,
        }
    }

    /// Header type tag for this element type
    pub fn tag(&self) -> u8 {
        match self {
            DType::U8 => 8,
            DType::I8 => 9,
            DType::I16 => 11,
            DType::I32 => 12,
            DType::F32 => 13,
            DType::F64 => 14,
        }
    }

    /// Size of one element in bytes
    pub fn element_size(&self) -> usize {
        match self {
            DType::U8 | DType::I8 => 1,
            DType::I16 => 2,
            DType::I32 | DType::F32 => 4,
            DType::F64 => 8,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DType::U8 => "uint8",
            DType::I8 => "int8",
            DType::I16 => "int16",
            DType::I32 => "int32",
            DType::F32 => "float32",
            DType::F64 => "float64",
        }
    }
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
