// src/recording/array.rs
//! Owned n-dimensional arrays handed from producers to the recorder
//!
//! An [`NdArray`] is a dtype, a shape and a contiguous row-major buffer of
//! little-endian element bytes. The empty shape is a zero-dimensional scalar.
//! Compound dtypes pack their fields in declaration order with no padding,
//! so a record of `(f64, u32, u32, bool)` is 17 bytes.

use crate::utils::errors::{RecorderError, Result};
use bytes::{Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Element type of an array or table
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DType {
    Bool,
    I8,
    I16,
    I32,
    I64,
    U8,
    U16,
    U32,
    U64,
    F32,
    F64,
    /// Packed record of named fields
    Compound(Vec<Field>),
}

/// Named field of a compound dtype
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Field {
    pub name: String,
    pub dtype: DType,
}

impl Field {
    pub fn new(name: impl Into<String>, dtype: DType) -> Self {
        Self {
            name: name.into(),
            dtype,
        }
    }
}

impl DType {
    /// Build a compound dtype from `(name, dtype)` pairs
    pub fn compound<N: Into<String>>(fields: impl IntoIterator<Item = (N, DType)>) -> Self {
        DType::Compound(
            fields
                .into_iter()
                .map(|(name, dtype)| Field::new(name, dtype))
                .collect(),
        )
    }

    /// Size of one element in bytes
    pub fn itemsize(&self) -> usize {
        match self {
            DType::Bool | DType::I8 | DType::U8 => 1,
            DType::I16 | DType::U16 => 2,
            DType::I32 | DType::U32 | DType::F32 => 4,
            DType::I64 | DType::U64 | DType::F64 => 8,
            DType::Compound(fields) => fields.iter().map(|f| f.dtype.itemsize()).sum(),
        }
    }

    pub fn is_compound(&self) -> bool {
        matches!(self, DType::Compound(_))
    }
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DType::Bool => write!(f, "bool"),
            DType::I8 => write!(f, "int8"),
            DType::I16 => write!(f, "int16"),
            DType::I32 => write!(f, "int32"),
            DType::I64 => write!(f, "int64"),
            DType::U8 => write!(f, "uint8"),
            DType::U16 => write!(f, "uint16"),
            DType::U32 => write!(f, "uint32"),
            DType::U64 => write!(f, "uint64"),
            DType::F32 => write!(f, "float32"),
            DType::F64 => write!(f, "float64"),
            DType::Compound(fields) => {
                write!(f, "{{")?;
                for (i, field) in fields.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}: {}", field.name, field.dtype)?;
                }
                write!(f, "}}")
            }
        }
    }
}

/// Primitive element types with a fixed little-endian encoding
pub trait Element: Copy + Send + 'static {
    fn dtype() -> DType;
    fn write_le(self, out: &mut BytesMut);
    fn read_le(bytes: &[u8]) -> Self;
}

macro_rules! impl_element {
    ($($ty:ty => $dtype:ident),* $(,)?) => {
        $(
            impl Element for $ty {
                fn dtype() -> DType {
                    DType::$dtype
                }

                fn write_le(self, out: &mut BytesMut) {
                    out.extend_from_slice(&self.to_le_bytes());
                }

                fn read_le(bytes: &[u8]) -> Self {
                    let mut raw = [0u8; std::mem::size_of::<$ty>()];
                    raw.copy_from_slice(&bytes[..std::mem::size_of::<$ty>()]);
                    <$ty>::from_le_bytes(raw)
                }
            }
        )*
    };
}

impl_element! {
    i8 => I8, i16 => I16, i32 => I32, i64 => I64,
    u8 => U8, u16 => U16, u32 => U32, u64 => U64,
    f32 => F32, f64 => F64,
}

impl Element for bool {
    fn dtype() -> DType {
        DType::Bool
    }

    fn write_le(self, out: &mut BytesMut) {
        out.extend_from_slice(&[self as u8]);
    }

    fn read_le(bytes: &[u8]) -> Self {
        bytes[0] != 0
    }
}

/// A single primitive value, used to build and inspect compound records
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Scalar {
    Bool(bool),
    I8(i8),
    I16(i16),
    I32(i32),
    I64(i64),
    U8(u8),
    U16(u16),
    U32(u32),
    U64(u64),
    F32(f32),
    F64(f64),
}

impl Scalar {
    pub fn dtype(&self) -> DType {
        match self {
            Scalar::Bool(_) => DType::Bool,
            Scalar::I8(_) => DType::I8,
            Scalar::I16(_) => DType::I16,
            Scalar::I32(_) => DType::I32,
            Scalar::I64(_) => DType::I64,
            Scalar::U8(_) => DType::U8,
            Scalar::U16(_) => DType::U16,
            Scalar::U32(_) => DType::U32,
            Scalar::U64(_) => DType::U64,
            Scalar::F32(_) => DType::F32,
            Scalar::F64(_) => DType::F64,
        }
    }

    fn write_le(self, out: &mut BytesMut) {
        match self {
            Scalar::Bool(v) => v.write_le(out),
            Scalar::I8(v) => v.write_le(out),
            Scalar::I16(v) => v.write_le(out),
            Scalar::I32(v) => v.write_le(out),
            Scalar::I64(v) => v.write_le(out),
            Scalar::U8(v) => v.write_le(out),
            Scalar::U16(v) => v.write_le(out),
            Scalar::U32(v) => v.write_le(out),
            Scalar::U64(v) => v.write_le(out),
            Scalar::F32(v) => v.write_le(out),
            Scalar::F64(v) => v.write_le(out),
        }
    }

    fn read_le(dtype: &DType, bytes: &[u8]) -> Result<Self> {
        Ok(match dtype {
            DType::Bool => Scalar::Bool(bool::read_le(bytes)),
            DType::I8 => Scalar::I8(i8::read_le(bytes)),
            DType::I16 => Scalar::I16(i16::read_le(bytes)),
            DType::I32 => Scalar::I32(i32::read_le(bytes)),
            DType::I64 => Scalar::I64(i64::read_le(bytes)),
            DType::U8 => Scalar::U8(u8::read_le(bytes)),
            DType::U16 => Scalar::U16(u16::read_le(bytes)),
            DType::U32 => Scalar::U32(u32::read_le(bytes)),
            DType::U64 => Scalar::U64(u64::read_le(bytes)),
            DType::F32 => Scalar::F32(f32::read_le(bytes)),
            DType::F64 => Scalar::F64(f64::read_le(bytes)),
            DType::Compound(_) => {
                return Err(RecorderError::InvalidOperation(
                    "Nested compound fields are not supported".to_string(),
                ))
            }
        })
    }
}

/// Owned n-dimensional array
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NdArray {
    dtype: DType,
    shape: Vec<usize>,
    data: Bytes,
}

impl NdArray {
    /// Wrap raw element bytes; the length must match `itemsize * product(shape)`
    pub fn from_bytes(dtype: DType, shape: Vec<usize>, data: impl Into<Bytes>) -> Result<Self> {
        let data = data.into();
        let expected = dtype.itemsize() * shape.iter().product::<usize>();
        if data.len() != expected {
            return Err(RecorderError::InvalidOperation(format!(
                "Buffer of {} bytes does not fit shape {:?} of {} (expected {} bytes)",
                data.len(),
                shape,
                dtype,
                expected
            )));
        }

        Ok(Self { dtype, shape, data })
    }

    /// Build from typed values in row-major order
    pub fn from_vec<T: Element>(shape: Vec<usize>, values: Vec<T>) -> Result<Self> {
        let count: usize = shape.iter().product();
        if values.len() != count {
            return Err(RecorderError::InvalidOperation(format!(
                "{} values do not fit shape {:?}",
                values.len(),
                shape
            )));
        }

        let dtype = T::dtype();
        let mut buf = BytesMut::with_capacity(count * dtype.itemsize());
        for value in values {
            value.write_le(&mut buf);
        }

        Ok(Self {
            dtype,
            shape,
            data: buf.freeze(),
        })
    }

    /// Zero-dimensional array holding one value
    pub fn scalar<T: Element>(value: T) -> Self {
        let mut buf = BytesMut::with_capacity(T::dtype().itemsize());
        value.write_le(&mut buf);
        Self {
            dtype: T::dtype(),
            shape: Vec::new(),
            data: buf.freeze(),
        }
    }

    /// Zero-dimensional compound record; `values` must follow the field order
    pub fn record(dtype: &DType, values: &[Scalar]) -> Result<Self> {
        let DType::Compound(fields) = dtype else {
            return Err(RecorderError::InvalidOperation(format!(
                "record() needs a compound dtype, got {}",
                dtype
            )));
        };

        if fields.len() != values.len() {
            return Err(RecorderError::InvalidOperation(format!(
                "Record has {} fields but {} values were given",
                fields.len(),
                values.len()
            )));
        }

        let mut buf = BytesMut::with_capacity(dtype.itemsize());
        for (field, value) in fields.iter().zip(values) {
            if field.dtype != value.dtype() {
                return Err(RecorderError::InvalidOperation(format!(
                    "Field '{}' is {}, got {}",
                    field.name,
                    field.dtype,
                    value.dtype()
                )));
            }
            value.write_le(&mut buf);
        }

        Ok(Self {
            dtype: dtype.clone(),
            shape: Vec::new(),
            data: buf.freeze(),
        })
    }

    /// Repeat a scalar into every element of `shape`
    pub fn broadcast(&self, shape: Vec<usize>) -> Result<Self> {
        if !self.is_scalar() {
            return Err(RecorderError::InvalidOperation(format!(
                "Only scalars can be broadcast, got shape {:?}",
                self.shape
            )));
        }

        let count: usize = shape.iter().product();
        let mut buf = BytesMut::with_capacity(count * self.data.len());
        for _ in 0..count {
            buf.extend_from_slice(&self.data);
        }

        Ok(Self {
            dtype: self.dtype.clone(),
            shape,
            data: buf.freeze(),
        })
    }

    pub fn dtype(&self) -> &DType {
        &self.dtype
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn ndim(&self) -> usize {
        self.shape.len()
    }

    pub fn is_scalar(&self) -> bool {
        self.shape.is_empty()
    }

    /// Size of the leading dimension; scalars have none
    pub fn len(&self) -> Option<usize> {
        self.shape.first().copied()
    }

    pub fn is_empty(&self) -> bool {
        self.element_count() == 0
    }

    pub fn element_count(&self) -> usize {
        self.shape.iter().product()
    }

    /// Shape of one row along the leading dimension
    pub fn row_shape(&self) -> &[usize] {
        self.shape.get(1..).unwrap_or(&[])
    }

    /// Bytes in one row along the leading dimension
    pub fn row_bytes(&self) -> usize {
        self.dtype.itemsize() * self.row_shape().iter().product::<usize>()
    }

    pub fn as_bytes(&self) -> &Bytes {
        &self.data
    }

    pub fn nbytes(&self) -> usize {
        self.data.len()
    }

    /// Raw bytes of row `index`
    pub fn row(&self, index: usize) -> Result<&[u8]> {
        let len = self.len().ok_or_else(|| {
            RecorderError::InvalidOperation("Scalars have no rows".to_string())
        })?;
        if index >= len {
            return Err(RecorderError::InvalidOperation(format!(
                "Row {} out of range for length {}",
                index, len
            )));
        }

        let width = self.row_bytes();
        Ok(&self.data[index * width..(index + 1) * width])
    }

    /// Decode all elements as `T`
    pub fn to_vec<T: Element>(&self) -> Result<Vec<T>> {
        if self.dtype != T::dtype() {
            return Err(RecorderError::InvalidOperation(format!(
                "Cannot read {} elements as {}",
                self.dtype,
                T::dtype()
            )));
        }

        let size = self.dtype.itemsize();
        Ok(self.data.chunks_exact(size).map(T::read_le).collect())
    }

    /// Decode the fields of compound element `index` (flat, row-major)
    pub fn record_at(&self, index: usize) -> Result<Vec<Scalar>> {
        let DType::Compound(fields) = &self.dtype else {
            return Err(RecorderError::InvalidOperation(format!(
                "record_at() needs a compound array, got {}",
                self.dtype
            )));
        };

        if index >= self.element_count() {
            return Err(RecorderError::InvalidOperation(format!(
                "Element {} out of range for {} elements",
                index,
                self.element_count()
            )));
        }

        let mut offset = index * self.dtype.itemsize();
        let mut values = Vec::with_capacity(fields.len());
        for field in fields {
            values.push(Scalar::read_le(&field.dtype, &self.data[offset..])?);
            offset += field.dtype.itemsize();
        }

        Ok(values)
    }

    /// Add a leading dimension of size 1; the buffer is shared, not copied
    pub fn stacked(self) -> Self {
        let mut shape = Vec::with_capacity(self.shape.len() + 1);
        shape.push(1);
        shape.extend_from_slice(&self.shape);
        Self {
            dtype: self.dtype,
            shape,
            data: self.data,
        }
    }

    /// Concatenate along the leading dimension, preserving order
    pub fn concatenate(parts: Vec<NdArray>) -> Result<Self> {
        let mut iter = parts.into_iter();
        let first = iter.next().ok_or_else(|| {
            RecorderError::InvalidOperation("Nothing to concatenate".to_string())
        })?;
        if first.is_scalar() {
            return Err(RecorderError::InvalidOperation(
                "Cannot concatenate zero-dimensional arrays".to_string(),
            ));
        }

        let rest: Vec<NdArray> = iter.collect();
        if rest.is_empty() {
            return Ok(first);
        }

        let mut rows = first.shape[0];
        let mut buf = BytesMut::with_capacity(
            first.nbytes() + rest.iter().map(NdArray::nbytes).sum::<usize>(),
        );
        buf.extend_from_slice(&first.data);

        for part in &rest {
            if part.dtype != first.dtype {
                return Err(RecorderError::InvalidOperation(format!(
                    "Cannot concatenate {} with {}",
                    first.dtype, part.dtype
                )));
            }
            if part.is_scalar() || part.row_shape() != first.row_shape() {
                return Err(RecorderError::InvalidOperation(format!(
                    "Cannot concatenate shape {:?} with {:?}",
                    first.shape, part.shape
                )));
            }
            rows += part.shape[0];
            buf.extend_from_slice(&part.data);
        }

        let mut shape = first.shape.clone();
        shape[0] = rows;

        Ok(Self {
            dtype: first.dtype,
            shape,
            data: buf.freeze(),
        })
    }
}
