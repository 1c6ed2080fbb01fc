//! Typed little-endian reads.
//!
//! Index formats store fixed-width numbers; [`FileAccessor::read_scalars`]
//! reads a run of them through the block cache and decodes them according to
//! a [`ScalarKind`].

use crate::accessor::FileAccessor;
use crate::error::{ReadError, ReadResult};
use crate::option::ReadOption;

/// Width and interpretation of a stored number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScalarKind {
    U8,
    U16,
    U32,
    U64,
    I8,
    I16,
    I32,
    I64,
    F32,
    F64,
}

/// A decoded number.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Scalar {
    U8(u8),
    U16(u16),
    U32(u32),
    U64(u64),
    I8(i8),
    I16(i16),
    I32(i32),
    I64(i64),
    F32(f32),
    F64(f64),
}

#[inline]
fn le<const N: usize>(bytes: &[u8]) -> [u8; N] {
    let mut out = [0u8; N];
    out.copy_from_slice(&bytes[..N]);
    out
}

impl ScalarKind {
    /// Encoded size in bytes.
    pub const fn width(self) -> usize {
        match self {
            Self::U8 | Self::I8 => 1,
            Self::U16 | Self::I16 => 2,
            Self::U32 | Self::I32 | Self::F32 => 4,
            Self::U64 | Self::I64 | Self::F64 => 8,
        }
    }

    /// Decode one value from the front of `bytes`.
    ///
    /// # Panics
    ///
    /// Panics if `bytes` is shorter than [`width`](Self::width).
    pub fn decode(self, bytes: &[u8]) -> Scalar {
        match self {
            Self::U8 => Scalar::U8(bytes[0]),
            Self::U16 => Scalar::U16(u16::from_le_bytes(le(bytes))),
            Self::U32 => Scalar::U32(u32::from_le_bytes(le(bytes))),
            Self::U64 => Scalar::U64(u64::from_le_bytes(le(bytes))),
            Self::I8 => Scalar::I8(bytes[0] as i8),
            Self::I16 => Scalar::I16(i16::from_le_bytes(le(bytes))),
            Self::I32 => Scalar::I32(i32::from_le_bytes(le(bytes))),
            Self::I64 => Scalar::I64(i64::from_le_bytes(le(bytes))),
            Self::F32 => Scalar::F32(f32::from_le_bytes(le(bytes))),
            Self::F64 => Scalar::F64(f64::from_le_bytes(le(bytes))),
        }
    }
}

impl Scalar {
    pub fn kind(&self) -> ScalarKind {
        match self {
            Self::U8(_) => ScalarKind::U8,
            Self::U16(_) => ScalarKind::U16,
            Self::U32(_) => ScalarKind::U32,
            Self::U64(_) => ScalarKind::U64,
            Self::I8(_) => ScalarKind::I8,
            Self::I16(_) => ScalarKind::I16,
            Self::I32(_) => ScalarKind::I32,
            Self::I64(_) => ScalarKind::I64,
            Self::F32(_) => ScalarKind::F32,
            Self::F64(_) => ScalarKind::F64,
        }
    }

    /// The value as an unsigned integer, if it is a non-negative integer.
    pub fn as_u64(&self) -> Option<u64> {
        match *self {
            Self::U8(v) => Some(v as u64),
            Self::U16(v) => Some(v as u64),
            Self::U32(v) => Some(v as u64),
            Self::U64(v) => Some(v),
            Self::I8(v) => u64::try_from(v).ok(),
            Self::I16(v) => u64::try_from(v).ok(),
            Self::I32(v) => u64::try_from(v).ok(),
            Self::I64(v) => u64::try_from(v).ok(),
            Self::F32(_) | Self::F64(_) => None,
        }
    }

    pub fn as_f64(&self) -> f64 {
        match *self {
            Self::U8(v) => v as f64,
            Self::U16(v) => v as f64,
            Self::U32(v) => v as f64,
            Self::U64(v) => v as f64,
            Self::I8(v) => v as f64,
            Self::I16(v) => v as f64,
            Self::I32(v) => v as f64,
            Self::I64(v) => v as f64,
            Self::F32(v) => v as f64,
            Self::F64(v) => v,
        }
    }
}

impl FileAccessor {
    /// Read `count` consecutive values of `kind` starting at `offset`.
    ///
    /// Fails with `BadArgument` if the values run past the end of the file.
    pub fn read_scalars(
        &self,
        kind: ScalarKind,
        offset: u64,
        count: usize,
        opt: &ReadOption,
    ) -> ReadResult<Vec<Scalar>> {
        let width = kind.width();
        let len = width
            .checked_mul(count)
            .ok_or_else(|| ReadError::BadArgument(format!("{count} scalars overflow a read")))?;
        if len == 0 {
            return Ok(Vec::new());
        }

        let mut buf = vec![0u8; len];
        let n = self.read(&mut buf, offset, opt)?;
        if n < len {
            return Err(ReadError::BadArgument(format!(
                "{count} x {kind:?} at offset {offset} runs past end of file"
            )));
        }
        Ok(buf.chunks_exact(width).map(|chunk| kind.decode(chunk)).collect())
    }
}
