//! Typed dense arrays carried by step records.
//!
//! Row-major storage with an explicit shape. An empty shape is a scalar.

use serde::{Deserialize, Serialize};

use crate::error::{ReplayError, Result};

/// Element type of an [`Array`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DType {
    F32,
    F64,
    I32,
    I64,
    U8,
    Bool,
}

impl std::fmt::Display for DType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            DType::F32 => "f32",
            DType::F64 => "f64",
            DType::I32 => "i32",
            DType::I64 => "i64",
            DType::U8 => "u8",
            DType::Bool => "bool",
        };
        f.write_str(name)
    }
}

/// Flat element storage, one variant per dtype.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ArrayData {
    F32(Vec<f32>),
    F64(Vec<f64>),
    I32(Vec<i32>),
    I64(Vec<i64>),
    U8(Vec<u8>),
    Bool(Vec<bool>),
}

macro_rules! dispatch {
    ($data:expr, $v:ident => $body:expr) => {
        match $data {
            ArrayData::F32($v) => $body,
            ArrayData::F64($v) => $body,
            ArrayData::I32($v) => $body,
            ArrayData::I64($v) => $body,
            ArrayData::U8($v) => $body,
            ArrayData::Bool($v) => $body,
        }
    };
}

impl ArrayData {
    /// Element type.
    pub fn dtype(&self) -> DType {
        match self {
            ArrayData::F32(_) => DType::F32,
            ArrayData::F64(_) => DType::F64,
            ArrayData::I32(_) => DType::I32,
            ArrayData::I64(_) => DType::I64,
            ArrayData::U8(_) => DType::U8,
            ArrayData::Bool(_) => DType::Bool,
        }
    }

    /// Number of elements.
    pub fn len(&self) -> usize {
        dispatch!(self, v => v.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn zeros(dtype: DType, n: usize) -> Self {
        match dtype {
            DType::F32 => ArrayData::F32(vec![0.0; n]),
            DType::F64 => ArrayData::F64(vec![0.0; n]),
            DType::I32 => ArrayData::I32(vec![0; n]),
            DType::I64 => ArrayData::I64(vec![0; n]),
            DType::U8 => ArrayData::U8(vec![0; n]),
            DType::Bool => ArrayData::Bool(vec![false; n]),
        }
    }

    fn with_capacity(dtype: DType, n: usize) -> Self {
        match dtype {
            DType::F32 => ArrayData::F32(Vec::with_capacity(n)),
            DType::F64 => ArrayData::F64(Vec::with_capacity(n)),
            DType::I32 => ArrayData::I32(Vec::with_capacity(n)),
            DType::I64 => ArrayData::I64(Vec::with_capacity(n)),
            DType::U8 => ArrayData::U8(Vec::with_capacity(n)),
            DType::Bool => ArrayData::Bool(Vec::with_capacity(n)),
        }
    }

    /// Append `other`'s elements. Returns false on dtype mismatch.
    fn extend_from(&mut self, other: &ArrayData) -> bool {
        match (self, other) {
            (ArrayData::F32(a), ArrayData::F32(b)) => a.extend_from_slice(b),
            (ArrayData::F64(a), ArrayData::F64(b)) => a.extend_from_slice(b),
            (ArrayData::I32(a), ArrayData::I32(b)) => a.extend_from_slice(b),
            (ArrayData::I64(a), ArrayData::I64(b)) => a.extend_from_slice(b),
            (ArrayData::U8(a), ArrayData::U8(b)) => a.extend_from_slice(b),
            (ArrayData::Bool(a), ArrayData::Bool(b)) => a.extend_from_slice(b),
            _ => return false,
        }
        true
    }
}

/// A typed n-dimensional array.
///
/// Deserialization goes through [`Array::new`], so a decoded array always
/// fills its shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawArray")]
pub struct Array {
    data: ArrayData,
    shape: Vec<usize>,
}

#[derive(Deserialize)]
struct RawArray {
    data: ArrayData,
    shape: Vec<usize>,
}

impl TryFrom<RawArray> for Array {
    type Error = ReplayError;

    fn try_from(raw: RawArray) -> Result<Self> {
        Array::new(raw.data, raw.shape)
    }
}

impl Array {
    /// Create an array, checking that `data` fills `shape` exactly.
    pub fn new(data: ArrayData, shape: Vec<usize>) -> Result<Self> {
        let expected: usize = shape.iter().product();
        if data.len() != expected {
            return Err(ReplayError::InvalidArray(format!(
                "shape {:?} needs {} elements, got {}",
                shape,
                expected,
                data.len()
            )));
        }
        Ok(Self { data, shape })
    }

    /// Zero-filled array (`false` for bool).
    pub fn zeros(dtype: DType, shape: &[usize]) -> Self {
        let n = shape.iter().product();
        Self {
            data: ArrayData::zeros(dtype, n),
            shape: shape.to_vec(),
        }
    }

    /// 1-d f32 vector.
    pub fn from_f32(values: Vec<f32>) -> Self {
        let shape = vec![values.len()];
        Self {
            data: ArrayData::F32(values),
            shape,
        }
    }

    /// 1-d u8 vector (e.g. an encoded image row).
    pub fn from_u8(values: Vec<u8>) -> Self {
        let shape = vec![values.len()];
        Self {
            data: ArrayData::U8(values),
            shape,
        }
    }

    pub fn scalar_f32(value: f32) -> Self {
        Self {
            data: ArrayData::F32(vec![value]),
            shape: Vec::new(),
        }
    }

    pub fn scalar_i64(value: i64) -> Self {
        Self {
            data: ArrayData::I64(vec![value]),
            shape: Vec::new(),
        }
    }

    pub fn scalar_bool(value: bool) -> Self {
        Self {
            data: ArrayData::Bool(vec![value]),
            shape: Vec::new(),
        }
    }

    pub fn dtype(&self) -> DType {
        self.data.dtype()
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn data(&self) -> &ArrayData {
        &self.data
    }

    /// Number of elements.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn is_scalar(&self) -> bool {
        self.shape.is_empty()
    }

    /// Value of a scalar bool array, `None` for anything else.
    pub fn as_bool_scalar(&self) -> Option<bool> {
        match (&self.data, self.shape.is_empty()) {
            (ArrayData::Bool(v), true) => v.first().copied(),
            _ => None,
        }
    }

    pub fn as_f32(&self) -> Option<&[f32]> {
        match &self.data {
            ArrayData::F32(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<&[i64]> {
        match &self.data {
            ArrayData::I64(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<&[bool]> {
        match &self.data {
            ArrayData::Bool(v) => Some(v),
            _ => None,
        }
    }

    /// Stack same-typed, same-shaped arrays under new leading dimensions.
    ///
    /// `outer` must multiply out to `parts.len()`; the result has shape
    /// `outer ++ part_shape`.
    pub fn stack(parts: &[&Array], outer: &[usize]) -> Result<Array> {
        let first = parts
            .first()
            .ok_or_else(|| ReplayError::InvalidArray("cannot stack zero arrays".into()))?;
        let count: usize = outer.iter().product();
        if count != parts.len() {
            return Err(ReplayError::InvalidArray(format!(
                "outer shape {:?} does not match {} parts",
                outer,
                parts.len()
            )));
        }

        let mut data = ArrayData::with_capacity(first.dtype(), first.len() * parts.len());
        for part in parts {
            if part.shape != first.shape || !data.extend_from(&part.data) {
                return Err(ReplayError::InvalidArray(format!(
                    "cannot stack {}{:?} with {}{:?}",
                    part.dtype(),
                    part.shape,
                    first.dtype(),
                    first.shape
                )));
            }
        }

        let mut shape = outer.to_vec();
        shape.extend_from_slice(&first.shape);
        Ok(Array { data, shape })
    }
}
