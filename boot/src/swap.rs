//! The sector swap engine.
//!
//! A swap exchanges the contents of the two slots using scratch as the spill
//! area.  Sectors are grouped from the top of the slots downward: each group
//! is the largest run of consecutive sectors that still fits in scratch, and
//! the group containing the trailers is moved first.  Per group the engine
//! runs a three-step cycle:
//!
//! 1. erase scratch, copy the slot-1 sectors there;
//! 2. erase the slot-1 sectors, copy the slot-0 sectors over (minus the
//!    trailer and status region for the top group, so the stale trailer never
//!    travels into slot 1);
//! 3. erase the slot-0 sectors, copy scratch over, move to the next group.
//!
//! One status element is programmed after each step.  Every step starts with
//! an erase, so re-running an interrupted step from its beginning is always
//! safe; the status run is the sole source of truth when resuming.

use storage::Flash;

use crate::image::{ImageHeader, IMAGE_MAGIC, IMAGE_MAGIC_NONE};
use crate::image::flags;
use crate::status::{status_sz, BootStatus};
use crate::trailer::TRAILER_SIZE;
use crate::{BootReq, Error, Result, SwapType};

/// Bytes of swap bookkeeping at the end of a slot: the trailer plus the
/// status element run.
pub(crate) fn meta_sz(elem_sz: usize) -> usize {
    TRAILER_SIZE + status_sz(elem_sz)
}

impl<'a, F: Flash> BootReq<'a, F> {
    /// Total scratch size in bytes.
    pub(crate) fn scratch_size(&self) -> u32 {
        self.areas[self.scratch_idx as usize..]
            .iter()
            .map(|a| a.size)
            .sum()
    }

    /// How many sectors directly below `max_idx` fit in scratch together,
    /// and their combined size.  This is the sector group ending at
    /// `max_idx - 1`.
    pub(crate) fn copy_sz(&self, max_idx: usize) -> (u32, usize) {
        let scratch_sz = self.scratch_size();
        let mut sz = 0;
        let mut cnt = 0;
        for i in (0..max_idx).rev() {
            let area_sz = self.areas[i].size;
            if sz + area_sz > scratch_sz {
                break;
            }
            sz += area_sz;
            cnt += 1;
        }
        (sz, cnt)
    }

    /// Erase `len` bytes starting at an area's base.
    pub(crate) fn erase_area(&mut self, area_idx: usize, len: u32) -> Result<()> {
        let area = self.area(area_idx)?;
        self.device(area.device_id)?
            .erase(area.off as usize, len as usize)?;
        Ok(())
    }

    /// Copy `sz` bytes from one area's base to another's, through the work
    /// buffer.  The destination must already be erased.
    pub(crate) fn copy_area(&mut self, from_idx: usize, to_idx: usize, sz: u32) -> Result<()> {
        let from = self.area(from_idx)?;
        let to = self.area(to_idx)?;
        let sz = sz as usize;

        // Keep intermediate chunks write aligned; the tail is a sector
        // remainder and therefore aligned on its own.
        let buf_len = {
            let align = self.flash[to.device_id as usize].write_size();
            self.buf.len() - self.buf.len() % align
        };
        if buf_len == 0 {
            return Err(Error::NoMemory);
        }

        let mut off = 0;
        while off < sz {
            let chunk = (sz - off).min(buf_len);
            {
                let dev = self
                    .flash
                    .get_mut(from.device_id as usize)
                    .ok_or(Error::BadArgs)?;
                dev.read(from.off as usize + off, &mut self.buf[..chunk])?;
            }
            {
                let dev = self
                    .flash
                    .get_mut(to.device_id as usize)
                    .ok_or(Error::BadArgs)?;
                dev.write(to.off as usize + off, &self.buf[..chunk])?;
            }
            off += chunk;
        }
        Ok(())
    }

    /// Run (or resume) the three-step cycle for the group of sectors starting
    /// at relative index `idx` within each slot.
    fn swap_areas(
        &mut self,
        idx: usize,
        sz: u32,
        end_area: bool,
        bs: &mut BootStatus,
    ) -> Result<()> {
        let area0 = self.slot_areas[0] as usize + idx;
        let area1 = self.slot_areas[1] as usize + idx;
        let scratch = self.scratch_idx as usize;

        if bs.state == 0 {
            self.erase_area(scratch, sz)?;
            self.copy_area(area1, scratch, sz)?;
            bs.state = 1;
            self.write_status(bs)?;
        }
        if bs.state == 1 {
            self.erase_area(area1, sz)?;
            let copy = if end_area {
                // Leave the stale trailer and status run behind; slot 1 must
                // read as erased there once the swap completes.
                sz - meta_sz(bs.elem_sz) as u32
            } else {
                sz
            };
            self.copy_area(area0, area1, copy)?;
            bs.state = 2;
            self.write_status(bs)?;
        }
        if bs.state == 2 {
            self.erase_area(area0, sz)?;
            self.copy_area(scratch, area0, sz)?;
            bs.idx += 1;
            bs.state = 0;
            self.write_status(bs)?;
        }
        Ok(())
    }

    /// Swap the two slots, resuming from `bs` if a previous attempt was cut
    /// short.
    pub(crate) fn copy_image(&mut self, bs: &mut BootStatus) -> Result<()> {
        let mut i = self.slot_areas[1] as usize;
        let mut cur_idx: u32 = 0;
        let mut end_area = true;
        while i > 0 {
            let (sz, cnt) = self.copy_sz(i);
            if cnt == 0 {
                // A sector bigger than scratch; check() should have caught it.
                return Err(Error::BadArgs);
            }
            i -= cnt;
            if cur_idx >= bs.idx {
                self.swap_areas(i, sz, end_area, bs)?;
            }
            end_area = false;
            cur_idx += 1;
        }
        if bs.idx > cur_idx {
            // The status run claims more groups than the layout has.
            return Err(Error::BadStatus);
        }
        Ok(())
    }

    /// Marks a freshly swapped test image as fully copied.  `image_ok` stays
    /// erased: the image is on probation until the application confirms it.
    pub(crate) fn finalize_test_swap(&mut self) -> Result<()> {
        self.write_copy_done()
    }

    /// Marks a reverted image as confirmed, in one write, so the status run
    /// from the revert is never looked at again.
    pub(crate) fn finalize_revert_swap(&mut self) -> Result<()> {
        self.write_confirmed_trailer()
    }

    /// Determine the swap to perform, checking the secondary image first.  A
    /// secondary slot holding a broken image is erased and the request is
    /// downgraded to "no swap", so the device keeps booting what it has.
    pub(crate) fn validated_swap_type(&mut self, secondary: &ImageHeader) -> Result<SwapType> {
        let swap_type = self.swap_type()?;
        if swap_type == SwapType::None {
            return Ok(SwapType::None);
        }

        if secondary.magic == IMAGE_MAGIC_NONE || secondary.flags & flags::NON_BOOTABLE != 0 {
            // Nothing bootable was ever placed there; leave it alone.
            return Ok(SwapType::None);
        }
        if secondary.magic != IMAGE_MAGIC {
            warn!("secondary header unrecognized; erasing slot 1");
            self.erase_area(self.slot_areas[1] as usize, self.img_sz)?;
            return Ok(SwapType::None);
        }
        match self.check_image(1, secondary, None, None) {
            Ok(()) => Ok(swap_type),
            Err(Error::Flash(e)) => Err(Error::Flash(e)),
            Err(_) => {
                warn!("secondary image failed validation; erasing slot 1");
                self.erase_area(self.slot_areas[1] as usize, self.img_sz)?;
                Ok(SwapType::None)
            }
        }
    }
}
