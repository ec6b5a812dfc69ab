//! Image trailer support.
//!
//! Each slot, and the scratch region, ends with a fixed 8-byte trailer:
//!
//! ```text
//!  0                   1                   2                   3
//! +---------------+---------------+---------------+---------------+
//! |                     copy-start magic (u32)                    |
//! +---------------+---------------+---------------+---------------+
//! |   copy-done   |   image-ok    |            padding            |
//! +---------------+---------------+---------------+---------------+
//! ```
//!
//! The magic `0x12344321` in slot 1 means a swap has been requested; in
//! slot 0 it means a swap has completed.  `copy_done` becomes `0x01` when the
//! copy finished; `image_ok` becomes `0x01` once the running application
//! confirms the image.  Everything else reads as the erased `0xff`.
//!
//! Trailer bytes obey the flash no-rewrite rule: each field is written once,
//! while still erased, and only a full sector erase resets it.  Writes below
//! the device's program alignment are widened to an aligned unit merged with
//! the cells around the field, so no bit outside the field changes.

use byteorder::{ByteOrder, LittleEndian};
use storage::Flash;

use crate::{BootReq, Error, Result};

/// Trailer magic; `0xffffffff` when erased.
pub const BOOT_IMG_MAGIC: u32 = 0x1234_4321;

pub const TRAILER_SIZE: usize = 8;

const COPY_DONE_OFF: usize = 4;
const IMAGE_OK_OFF: usize = 5;

/// Decoded image trailer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageTrailer {
    pub copy_start: u32,
    pub copy_done: u8,
    pub image_ok: u8,
}

impl ImageTrailer {
    pub fn decode(raw: &[u8; TRAILER_SIZE]) -> ImageTrailer {
        ImageTrailer {
            copy_start: LittleEndian::read_u32(&raw[0..4]),
            copy_done: raw[4],
            image_ok: raw[5],
        }
    }
}

/// Program `bytes` at `off`, widening the access to the device's write
/// alignment.  The widened unit is read back first and merged, so cells
/// outside the field are rewritten with the value they already hold and no
/// bit anywhere is asked to rise.
pub(crate) fn write_padded<F: Flash>(flash: &mut F, off: usize, bytes: &[u8]) -> Result<()> {
    let align = flash.write_size();
    let start = off - off % align;
    let mut end = off + bytes.len();
    end += (align - end % align) % align;

    let mut unit = [0xffu8; 2 * TRAILER_SIZE];
    let len = end - start;
    if len > unit.len() {
        return Err(Error::BadArgs);
    }
    flash.read(start, &mut unit[..len])?;
    unit[off - start..off - start + bytes.len()].copy_from_slice(bytes);
    flash.write(start, &unit[..len])?;
    Ok(())
}

impl<'a, F: Flash> BootReq<'a, F> {
    /// Device and offset of a slot's trailer.
    pub(crate) fn magic_loc(&self, slot: usize) -> (u8, usize) {
        let (device_id, base) = self.slot_base(slot);
        (device_id, base as usize + self.img_sz as usize - TRAILER_SIZE)
    }

    /// Device and offset of the trailer image inside scratch.
    ///
    /// Status lives in scratch only while the first sector group is being
    /// moved.  That group is the one holding the slot trailers, and its copy
    /// lands at the start of scratch, so the trailer sits at the same offset
    /// from the group start it has from the group start inside the slot.
    pub(crate) fn scratch_loc(&self) -> (u8, usize) {
        let scratch = self.areas[self.scratch_idx as usize];
        let (group_sz, _) = self.copy_sz(self.slot_areas[1] as usize);
        (
            scratch.device_id,
            scratch.off as usize + group_sz as usize - TRAILER_SIZE,
        )
    }

    pub(crate) fn read_trailer_at(&mut self, device_id: u8, off: usize) -> Result<ImageTrailer> {
        let mut raw = [0u8; TRAILER_SIZE];
        self.device(device_id)?.read(off, &mut raw)?;
        Ok(ImageTrailer::decode(&raw))
    }

    /// Read the trailer of an image slot.
    pub fn read_slot_trailer(&mut self, slot: usize) -> Result<ImageTrailer> {
        let (device_id, off) = self.magic_loc(slot);
        self.read_trailer_at(device_id, off)
    }

    /// Read the trailer from the scratch area.
    pub fn read_scratch_trailer(&mut self) -> Result<ImageTrailer> {
        let (device_id, off) = self.scratch_loc();
        self.read_trailer_at(device_id, off)
    }

    /// Schedule a test swap for the next boot by writing the magic into the
    /// secondary slot's trailer.  Idempotent if a swap is already scheduled.
    pub fn set_pending(&mut self) -> Result<()> {
        let trailer = self.read_slot_trailer(1)?;
        match trailer.copy_start {
            BOOT_IMG_MAGIC => Ok(()),
            0xffff_ffff => {
                let (device_id, off) = self.magic_loc(1);
                let mut raw = [0u8; 4];
                LittleEndian::write_u32(&mut raw, BOOT_IMG_MAGIC);
                write_padded(self.device(device_id)?, off, &raw)
            }
            _ => Err(Error::BadStatus),
        }
    }

    /// Make the image currently running from the primary slot permanent, so
    /// the next boot does not revert it.  Called by the application once it
    /// considers itself healthy.
    pub fn set_confirmed(&mut self) -> Result<()> {
        let trailer = self.read_slot_trailer(0)?;
        if trailer.copy_start != BOOT_IMG_MAGIC {
            // Never swapped; nothing to confirm.
            return Ok(());
        }
        if trailer.copy_done == 0xff {
            // The swap this trailer describes never finished.
            return Err(Error::BadStatus);
        }
        if trailer.image_ok != 0xff {
            return Ok(());
        }
        let (device_id, off) = self.magic_loc(0);
        write_padded(self.device(device_id)?, off + IMAGE_OK_OFF, &[0x01])
    }

    /// Record that the copy phase of a test swap finished.
    pub(crate) fn write_copy_done(&mut self) -> Result<()> {
        let (device_id, off) = self.magic_loc(0);
        write_padded(self.device(device_id)?, off + COPY_DONE_OFF, &[0x01])
    }

    /// Write a fully confirmed trailer into the (just erased) primary slot in
    /// a single program operation.
    pub(crate) fn write_confirmed_trailer(&mut self) -> Result<()> {
        let mut raw = [0xffu8; TRAILER_SIZE];
        LittleEndian::write_u32(&mut raw[0..4], BOOT_IMG_MAGIC);
        raw[COPY_DONE_OFF] = 0x01;
        raw[IMAGE_OK_OFF] = 0x01;
        let (device_id, off) = self.magic_loc(0);
        self.device(device_id)?.write(off, &raw)?;
        Ok(())
    }
}

#[cfg(test)]
mod tester {
    use super::{ImageTrailer, BOOT_IMG_MAGIC, TRAILER_SIZE};

    #[test]
    fn decode_erased() {
        let trailer = ImageTrailer::decode(&[0xff; TRAILER_SIZE]);
        assert_eq!(trailer.copy_start, 0xffff_ffff);
        assert_eq!(trailer.copy_done, 0xff);
        assert_eq!(trailer.image_ok, 0xff);
    }

    #[test]
    fn decode_confirmed() {
        let raw = [0x21, 0x43, 0x34, 0x12, 0x01, 0x01, 0xff, 0xff];
        let trailer = ImageTrailer::decode(&raw);
        assert_eq!(trailer.copy_start, BOOT_IMG_MAGIC);
        assert_eq!(trailer.copy_done, 0x01);
        assert_eq!(trailer.image_ok, 0x01);
    }
}
