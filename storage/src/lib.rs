//! Flash device traits.
//!
//! These traits describe the minimal contract the boot core needs from a
//! flash driver: bounded reads, aligned programs, and sector erases.  A
//! device advertises three granularities: `read_size`, `write_size` (the
//! minimum write alignment) and `erase_size`.  Programming may only clear
//! bits; the sole way to bring a bit back to `1` is erasing the sector that
//! contains it.  Drivers are expected to fail a write that would require a
//! `0` to `1` transition rather than silently corrupt the word.

#![cfg_attr(not(any(feature = "std", test)), no_std)]

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Error {
    /// Offset or length does not honor the device granularity.
    NotAligned,
    /// Access past the end of the device.
    OutOfBounds,
    /// A write would need to set a cleared bit.
    NotErased,
    /// The underlying device reported a fault.
    Io,
}

pub type Result<T> = core::result::Result<T, Error>;

/// Read-only view of a flash device.
pub trait ReadFlash {
    /// Read granularity (alignment and size multiple).
    fn read_size(&self) -> usize;
    /// Total device size in bytes.
    fn capacity(&self) -> usize;
    fn read(&mut self, offset: usize, bytes: &mut [u8]) -> Result<()>;
}

/// A programmable flash device.
pub trait Flash: ReadFlash {
    /// Write granularity (alignment and size multiple).
    fn write_size(&self) -> usize;
    /// Erase granularity (alignment and size multiple).
    fn erase_size(&self) -> usize;

    fn write(&mut self, offset: usize, bytes: &[u8]) -> Result<()>;
    /// Erase `len` bytes starting at `offset`; both must be multiples of the
    /// erase granularity.
    fn erase(&mut self, offset: usize, len: usize) -> Result<()>;
}

// Argument validation shared by drivers and the simulator, so every
// implementation rejects the same malformed accesses.

pub fn check_read<T: ReadFlash>(flash: &T, offset: usize, length: usize) -> Result<()> {
    check_slice(flash, flash.read_size(), offset, length)
}

pub fn check_write<T: Flash>(flash: &T, offset: usize, length: usize) -> Result<()> {
    check_slice(flash, flash.write_size(), offset, length)
}

pub fn check_erase<T: Flash>(flash: &T, offset: usize, length: usize) -> Result<()> {
    check_slice(flash, flash.erase_size(), offset, length)
}

pub fn check_slice<T: ReadFlash>(
    flash: &T,
    align: usize,
    offset: usize,
    length: usize,
) -> Result<()> {
    if length > flash.capacity() || offset > flash.capacity() - length {
        return Err(Error::OutOfBounds);
    }
    if offset % align != 0 || length % align != 0 {
        return Err(Error::NotAligned);
    }
    Ok(())
}
