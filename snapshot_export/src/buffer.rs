//! Bounds-checked, zero-copy reads over a FlatBuffers byte slice.
//!
//! Every accessor validates `offset + width <= len` with checked arithmetic
//! before touching memory, so a corrupt or truncated buffer surfaces as a
//! [`DecodeError`] and never as a panic.

use std::borrow::Cow;

use flatbuffers::{
    FILE_IDENTIFIER_LENGTH, FLATBUFFERS_MAX_BUFFER_SIZE, SIZE_SIZEPREFIX, SIZE_SOFFSET,
    SIZE_UOFFSET, SIZE_VOFFSET,
};
use snapshot_schema::ScalarType;
use tracing::warn;

use crate::error::DecodeError;
use crate::record::ScalarValue;

/// Bytes of vtable metadata before the first slot (`vtable_len`, `table_len`).
const VTABLE_HEADER: usize = 2 * SIZE_VOFFSET;

#[derive(Debug, Clone, Copy)]
pub struct BufferView<'buf> {
    bytes: &'buf [u8],
}

impl<'buf> BufferView<'buf> {
    pub fn new(bytes: &'buf [u8]) -> Result<Self, DecodeError> {
        if bytes.len() > FLATBUFFERS_MAX_BUFFER_SIZE {
            return Err(DecodeError::BufferTooLarge { len: bytes.len() });
        }
        Ok(Self { bytes })
    }

    /// View over a buffer that starts with a u32 length prefix. Offsets inside
    /// the payload are relative to the byte after the prefix.
    pub fn size_prefixed(bytes: &'buf [u8]) -> Result<Self, DecodeError> {
        if bytes.len() < SIZE_SIZEPREFIX {
            return Err(DecodeError::Truncated {
                len: bytes.len(),
                needed: SIZE_SIZEPREFIX,
            });
        }
        let outer = Self::new(bytes)?;
        let declared = outer.read_u32(0)? as usize;
        let payload = outer.bytes_at(SIZE_SIZEPREFIX, declared)?;
        Self::new(payload)
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn bytes_at(&self, offset: usize, width: usize) -> Result<&'buf [u8], DecodeError> {
        let out_of_bounds = DecodeError::OutOfBounds {
            offset,
            width,
            len: self.bytes.len(),
        };
        let end = offset.checked_add(width).ok_or_else(|| out_of_bounds.clone())?;
        self.bytes.get(offset..end).ok_or(out_of_bounds)
    }

    fn array<const N: usize>(&self, offset: usize) -> Result<[u8; N], DecodeError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.bytes_at(offset, N)?);
        Ok(out)
    }

    pub fn read_u8(&self, offset: usize) -> Result<u8, DecodeError> {
        Ok(self.array::<1>(offset)?[0])
    }

    pub fn read_u16(&self, offset: usize) -> Result<u16, DecodeError> {
        self.array(offset).map(u16::from_le_bytes)
    }

    pub fn read_u32(&self, offset: usize) -> Result<u32, DecodeError> {
        self.array(offset).map(u32::from_le_bytes)
    }

    pub fn read_i32(&self, offset: usize) -> Result<i32, DecodeError> {
        self.array(offset).map(i32::from_le_bytes)
    }

    pub fn read_scalar(&self, offset: usize, ty: ScalarType) -> Result<ScalarValue, DecodeError> {
        Ok(match ty {
            ScalarType::Bool => ScalarValue::Bool(self.read_u8(offset)? != 0),
            ScalarType::Int8 => ScalarValue::Int(i8::from_le_bytes(self.array(offset)?).into()),
            ScalarType::Uint8 => ScalarValue::UInt(self.read_u8(offset)?.into()),
            ScalarType::Int16 => ScalarValue::Int(i16::from_le_bytes(self.array(offset)?).into()),
            ScalarType::Uint16 => ScalarValue::UInt(self.read_u16(offset)?.into()),
            ScalarType::Int32 => ScalarValue::Int(self.read_i32(offset)?.into()),
            ScalarType::Uint32 => ScalarValue::UInt(self.read_u32(offset)?.into()),
            ScalarType::Int64 => ScalarValue::Int(i64::from_le_bytes(self.array(offset)?)),
            ScalarType::Uint64 => ScalarValue::UInt(u64::from_le_bytes(self.array(offset)?)),
            ScalarType::Float32 => ScalarValue::Float32(f32::from_le_bytes(self.array(offset)?)),
            ScalarType::Float64 => ScalarValue::Float64(f64::from_le_bytes(self.array(offset)?)),
        })
    }

    /// Position of the root table, read from the first four bytes.
    pub fn root_offset(&self) -> Result<usize, DecodeError> {
        if self.bytes.len() < SIZE_UOFFSET {
            return Err(DecodeError::Truncated {
                len: self.bytes.len(),
                needed: SIZE_UOFFSET,
            });
        }
        Ok(self.read_u32(0)? as usize)
    }

    /// The four identifier bytes that follow the root offset.
    pub fn file_identifier(&self) -> Result<&'buf [u8], DecodeError> {
        let needed = SIZE_UOFFSET + FILE_IDENTIFIER_LENGTH;
        if self.bytes.len() < needed {
            return Err(DecodeError::Truncated {
                len: self.bytes.len(),
                needed,
            });
        }
        self.bytes_at(SIZE_UOFFSET, FILE_IDENTIFIER_LENGTH)
    }

    /// Resolve the relative offset stored at `offset`.
    ///
    /// The delta is read as signed so that back-references land on their
    /// target instead of wrapping; the target must lie inside the buffer.
    pub fn follow(&self, offset: usize) -> Result<usize, DecodeError> {
        let delta = self.read_i32(offset)?;
        let target = i64::try_from(offset)
            .ok()
            .and_then(|base| base.checked_add(i64::from(delta)))
            .and_then(|target| usize::try_from(target).ok())
            .filter(|&target| target < self.bytes.len());
        target.ok_or(DecodeError::OutOfBounds {
            offset,
            width: SIZE_UOFFSET,
            len: self.bytes.len(),
        })
    }

    /// Table whose first byte is at `position`.
    pub fn table(&self, position: usize) -> Result<TableRef<'buf>, DecodeError> {
        let soffset = self.read_i32(position)?;
        let vtable = i64::try_from(position)
            .ok()
            .and_then(|base| base.checked_sub(i64::from(soffset)))
            .and_then(|vtable| usize::try_from(vtable).ok())
            .ok_or(DecodeError::OutOfBounds {
                offset: position,
                width: SIZE_SOFFSET,
                len: self.bytes.len(),
            })?;
        let vtable_len = usize::from(self.read_u16(vtable)?);
        let table_len = usize::from(self.read_u16(vtable + SIZE_VOFFSET)?);
        self.bytes_at(vtable, vtable_len.max(VTABLE_HEADER))?;
        self.bytes_at(position, table_len.max(SIZE_SOFFSET))?;
        Ok(TableRef {
            view: *self,
            position,
            vtable,
            vtable_len,
        })
    }

    /// Vector referenced by the offset stored at `offset`. The whole element
    /// region is bounds-checked before any element is read.
    pub fn vector(&self, offset: usize, element_width: usize) -> Result<VectorRef, DecodeError> {
        let start = self.follow(offset)?;
        let len = self.read_u32(start)? as usize;
        let data = start + SIZE_UOFFSET;
        let span = len.checked_mul(element_width).ok_or(DecodeError::OutOfBounds {
            offset: data,
            width: usize::MAX,
            len: self.bytes.len(),
        })?;
        self.bytes_at(data, span)?;
        Ok(VectorRef {
            data,
            len,
            element_width,
        })
    }

    /// String referenced by the offset stored at `offset`. Invalid UTF-8 is
    /// replaced, never rejected.
    pub fn string(&self, offset: usize) -> Result<Cow<'buf, str>, DecodeError> {
        let start = self.follow(offset)?;
        let len = self.read_u32(start)? as usize;
        let raw = self.bytes_at(start + SIZE_UOFFSET, len)?;
        let text = String::from_utf8_lossy(raw);
        if let Cow::Owned(_) = text {
            warn!(
                target: "snapshot_export::buffer",
                offset = start,
                len,
                "decode.invalid_utf8"
            );
        }
        Ok(text)
    }
}

/// A resolved table: its position and the vtable describing its fields.
#[derive(Debug, Clone, Copy)]
pub struct TableRef<'buf> {
    view: BufferView<'buf>,
    position: usize,
    vtable: usize,
    vtable_len: usize,
}

impl<'buf> TableRef<'buf> {
    pub fn position(&self) -> usize {
        self.position
    }

    /// Absolute position of the field stored in vtable slot `slot_offset`,
    /// or `None` when the slot is zero or lies past the vtable (a buffer
    /// written against an older schema).
    pub fn field_position(&self, slot_offset: usize) -> Result<Option<usize>, DecodeError> {
        if slot_offset + SIZE_VOFFSET > self.vtable_len {
            return Ok(None);
        }
        match self.view.read_u16(self.vtable + slot_offset)? {
            0 => Ok(None),
            delta => Ok(Some(self.position + usize::from(delta))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VectorRef {
    data: usize,
    len: usize,
    element_width: usize,
}

impl VectorRef {
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Position of element `index`; only meaningful for `index < len`.
    pub fn element(&self, index: usize) -> usize {
        self.data + index * self.element_width
    }
}
