//! Immutable cartridge byte source.

use alloc::sync::Arc;
use alloc::vec::Vec;

use crate::AGB_MAP_ROM;

/// Error raised by a read outside the image or through a bad pointer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum RomError {
    #[error("read of {len} bytes at {pos:#08x} exceeds ROM size {size:#x}")]
    OutOfBounds { pos: usize, len: usize, size: usize },
    #[error("invalid cartridge pointer {ptr:#010x} at {pos:#08x}")]
    InvalidPointer { ptr: u32, pos: usize },
}

/// A cartridge image with little-endian typed reads.
///
/// Cloning is cheap; the bytes are shared.
#[derive(Clone, Debug)]
pub struct Rom {
    data: Arc<[u8]>,
}

impl Rom {
    pub fn new(data: impl Into<Arc<[u8]>>) -> Self {
        Self { data: data.into() }
    }

    pub fn from_vec(data: Vec<u8>) -> Self {
        Self::new(data)
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn bytes(&self) -> &[u8] {
        &self.data
    }

    /// Borrow `len` bytes starting at `pos`.
    pub fn slice(&self, pos: usize, len: usize) -> Result<&[u8], RomError> {
        pos.checked_add(len)
            .and_then(|end| self.data.get(pos..end))
            .ok_or(RomError::OutOfBounds { pos, len, size: self.data.len() })
    }

    fn array<const N: usize>(&self, pos: usize) -> Result<[u8; N], RomError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.slice(pos, N)?);
        Ok(out)
    }

    pub fn read_u8(&self, pos: usize) -> Result<u8, RomError> {
        Ok(self.array::<1>(pos)?[0])
    }

    pub fn read_s8(&self, pos: usize) -> Result<i8, RomError> {
        Ok(self.read_u8(pos)? as i8)
    }

    pub fn read_u16(&self, pos: usize) -> Result<u16, RomError> {
        Ok(u16::from_le_bytes(self.array(pos)?))
    }

    pub fn read_s16(&self, pos: usize) -> Result<i16, RomError> {
        Ok(i16::from_le_bytes(self.array(pos)?))
    }

    pub fn read_u32(&self, pos: usize) -> Result<u32, RomError> {
        Ok(u32::from_le_bytes(self.array(pos)?))
    }

    pub fn read_s32(&self, pos: usize) -> Result<i32, RomError> {
        Ok(i32::from_le_bytes(self.array(pos)?))
    }

    /// Read a cartridge pointer at `pos` and convert it to a ROM offset.
    pub fn read_agb_ptr(&self, pos: usize) -> Result<usize, RomError> {
        let ptr = self.read_u32(pos)?;
        if !self.valid_pointer(ptr) {
            return Err(RomError::InvalidPointer { ptr, pos });
        }
        Ok((ptr - AGB_MAP_ROM) as usize)
    }

    /// Whether `ptr` points inside the mapped cartridge.
    pub fn valid_pointer(&self, ptr: u32) -> bool {
        ptr >= AGB_MAP_ROM && ((ptr - AGB_MAP_ROM) as usize) < self.data.len().saturating_sub(1)
    }

    /// Whether `len` bytes starting at `pos` lie strictly inside the image.
    pub fn valid_range(&self, pos: usize, len: usize) -> bool {
        pos.checked_add(len).is_some_and(|end| end < self.data.len())
    }
}

impl From<Vec<u8>> for Rom {
    fn from(data: Vec<u8>) -> Self {
        Self::from_vec(data)
    }
}
