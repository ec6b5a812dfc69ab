//! Manufacturing meta region.
//!
//! Manufacturing tooling leaves a description of the device at the very end
//! of the boot loader area:
//!
//! ```text
//! | TLV type (u8) | TLV size (u8) | data ...                      |
//! | ...                                                           |
//! | region size (u16) | version (u8) | 0xff pad | magic (u32)     |  <- area end
//! ```
//!
//! The footer's region size covers the TLVs and the footer itself, so the
//! region is found by walking back from the end of the area.  The records
//! describe the flash layout the image was manufactured for; the boot
//! package reads them, the boot decision itself does not.

use byteorder::{ByteOrder, LittleEndian};
use storage::ReadFlash;

use crate::{Error, FlashArea, Result};

pub const META_MAGIC: u32 = 0x3bb2a269;
pub const META_VERSION: u8 = 2;

const FOOTER_SIZE: usize = 8;
const TLV_HEADER_SIZE: usize = 2;

/// Record types.
pub const META_TLV_HASH: u8 = 0x01;
pub const META_TLV_FLASH_AREA: u8 = 0x02;
/// Informational only; not read by firmware.
pub const META_TLV_FLASH_TRAITS: u8 = 0x03;
pub const META_TLV_MMR_REF: u8 = 0x04;

pub const META_HASH_SIZE: usize = 32;

/// A flash-area record: one logical area of the manufactured layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MetaFlashArea {
    pub area_id: u8,
    pub device_id: u8,
    pub off: u32,
    pub size: u32,
}

/// One record header inside the region.
#[derive(Debug, Clone, Copy)]
pub struct MetaTlv {
    pub kind: u8,
    pub size: u8,
    off: usize,
}

/// Sequential reader over the meta region of one flash area.
pub struct MetaReader<'a, F: ReadFlash> {
    flash: &'a mut F,
    /// Offset of the first TLV.
    start: usize,
    /// Offset of the footer.
    end: usize,
    pos: usize,
}

impl<'a, F: ReadFlash> MetaReader<'a, F> {
    /// Look for a meta region at the end of `area`.  `Ok(None)` means the
    /// area simply has none; a present but truncated region is an error.
    pub fn open(flash: &'a mut F, area: &FlashArea) -> Result<Option<MetaReader<'a, F>>> {
        if (area.size as usize) < FOOTER_SIZE {
            return Ok(None);
        }
        let footer_off = area.off as usize + area.size as usize - FOOTER_SIZE;
        let mut raw = [0u8; FOOTER_SIZE];
        flash.read(footer_off, &mut raw)?;

        let size = LittleEndian::read_u16(&raw[0..2]) as usize;
        let version = raw[2];
        let magic = LittleEndian::read_u32(&raw[4..8]);
        if magic != META_MAGIC || version != META_VERSION {
            return Ok(None);
        }
        if size < FOOTER_SIZE || size > area.size as usize {
            return Err(Error::BadVector);
        }

        let start = footer_off + FOOTER_SIZE - size;
        Ok(Some(MetaReader {
            flash,
            start,
            end: footer_off,
            pos: 0,
        }))
    }

    /// Advance to the next record; `Ok(None)` at the end of the region.
    pub fn next_tlv(&mut self) -> Result<Option<MetaTlv>> {
        let off = self.start + self.pos;
        if off == self.end {
            return Ok(None);
        }
        if off + TLV_HEADER_SIZE > self.end {
            return Err(Error::BadVector);
        }
        let mut raw = [0u8; TLV_HEADER_SIZE];
        self.flash.read(off, &mut raw)?;
        let tlv = MetaTlv {
            kind: raw[0],
            size: raw[1],
            off: off + TLV_HEADER_SIZE,
        };
        if tlv.off + tlv.size as usize > self.end {
            return Err(Error::BadVector);
        }
        self.pos += TLV_HEADER_SIZE + tlv.size as usize;
        Ok(Some(tlv))
    }

    /// Advance to the next record of the given type.
    pub fn next_tlv_with_type(&mut self, kind: u8) -> Result<Option<MetaTlv>> {
        while let Some(tlv) = self.next_tlv()? {
            if tlv.kind == kind {
                return Ok(Some(tlv));
            }
        }
        Ok(None)
    }

    /// Read the manufacturing image hash out of a HASH record.
    pub fn read_hash(&mut self, tlv: &MetaTlv) -> Result<[u8; META_HASH_SIZE]> {
        if tlv.kind != META_TLV_HASH || tlv.size as usize != META_HASH_SIZE {
            return Err(Error::BadVector);
        }
        let mut hash = [0u8; META_HASH_SIZE];
        self.flash.read(tlv.off, &mut hash)?;
        Ok(hash)
    }

    /// Decode a FLASH_AREA record.
    pub fn read_flash_area(&mut self, tlv: &MetaTlv) -> Result<MetaFlashArea> {
        if tlv.kind != META_TLV_FLASH_AREA || (tlv.size as usize) < 10 {
            return Err(Error::BadVector);
        }
        let mut raw = [0u8; 10];
        self.flash.read(tlv.off, &mut raw)?;
        Ok(MetaFlashArea {
            area_id: raw[0],
            device_id: raw[1],
            off: LittleEndian::read_u32(&raw[2..6]),
            size: LittleEndian::read_u32(&raw[6..10]),
        })
    }

    /// Decode an MMR_REF record: the id of another area carrying a region.
    pub fn read_mmr_ref(&mut self, tlv: &MetaTlv) -> Result<u8> {
        if tlv.kind != META_TLV_MMR_REF || tlv.size == 0 {
            return Err(Error::BadVector);
        }
        let mut raw = [0u8];
        self.flash.read(tlv.off, &mut raw)?;
        Ok(raw[0])
    }

    /// Collect every FLASH_AREA record in the region.
    pub fn flash_areas(&mut self) -> Result<heapless::Vec<MetaFlashArea, 16>> {
        let mut out = heapless::Vec::new();
        while let Some(tlv) = self.next_tlv_with_type(META_TLV_FLASH_AREA)? {
            let area = self.read_flash_area(&tlv)?;
            out.push(area).map_err(|_| Error::BadVector)?;
        }
        Ok(out)
    }
}
