//! Swap progress tracking.
//!
//! The swap engine records its progress as a run of single-element writes in
//! the status area that sits just below a trailer:
//!
//! ```text
//! +--------------------------------+  <- trailer offset
//! | entry 0: state 1 | state 2     |     (one element per state, element =
//! | entry 1: state 0 | ...         |      the larger of the two devices'
//! | ...                            |      write alignments)
//! +--------------------------------+  <- trailer offset - status size
//! ```
//!
//! After each completed sub-step the engine programs one more element, so the
//! index of the last non-`0xff` element encodes `(idx, state)`: which sector
//! group was being moved and how far it got.  The first element, `(0, 0)`, is
//! never written; recovery treats an all-erased run as "nothing to resume".
//!
//! While the first group is in flight the run lives in scratch (the slot-0
//! trailer area is being rewritten at that point); afterwards it lives in
//! slot 0.  The status-source table in [`crate::decision`] picks the right
//! location on reboot.

use storage::Flash;

use crate::decision::{self, StatusSource};
use crate::{trailer, BootReq, Result};

/// Sub-steps per sector group.
pub const BOOT_STATUS_STATE_COUNT: u32 = 3;
/// Maximum number of sector groups a swap can track.
pub const BOOT_STATUS_MAX_ENTRIES: u32 = 128;

/// Progress of an image swap.
#[derive(Debug, Clone, Copy)]
pub struct BootStatus {
    /// Sector group being moved.
    pub idx: u32,
    /// Sub-step within the group.
    pub state: u8,
    /// Size of one status element: the write alignment the run is recorded
    /// with.
    pub elem_sz: usize,
}

impl BootStatus {
    pub(crate) fn new(elem_sz: usize) -> BootStatus {
        BootStatus {
            idx: 0,
            state: 0,
            elem_sz,
        }
    }

    /// Anything past `(0, 0)` means a swap was cut short by a reset.
    pub fn in_progress(&self) -> bool {
        self.idx != 0 || self.state != 0
    }
}

/// Size of the status byte run, in flash bytes.
pub fn status_sz(elem_sz: usize) -> usize {
    (BOOT_STATUS_MAX_ENTRIES * BOOT_STATUS_STATE_COUNT) as usize * elem_sz
}

/// Flash offset of one status element, relative to the trailer at
/// `trailer_off`.
fn status_off(trailer_off: usize, idx: u32, state: u8, elem_sz: usize) -> usize {
    let start = trailer_off - status_sz(elem_sz);
    start + (idx * BOOT_STATUS_STATE_COUNT + state as u32) as usize * elem_sz
}

impl<'a, F: Flash> BootReq<'a, F> {
    /// Status elements are written with the coarser of the two write
    /// alignments involved in a swap, so one element is one programmable
    /// unit on both devices.
    pub(crate) fn status_elem_sz(&self) -> usize {
        let (slot_dev, _) = self.slot_base(0);
        let scratch_dev = self.areas[self.scratch_idx as usize].device_id;
        let slot_align = self.flash[slot_dev as usize].write_size();
        let scratch_align = self.flash[scratch_dev as usize].write_size();
        slot_align.max(scratch_align)
    }

    /// Recover the progress of a partially completed swap, if any.  The
    /// status-source table names the trailer whose run is current; an
    /// all-erased run decodes as `(0, 0)`.
    pub(crate) fn read_status(&mut self) -> Result<BootStatus> {
        let mut bs = BootStatus::new(self.status_elem_sz());

        let slot0 = self.read_slot_trailer(0)?;
        let scratch = self.read_scratch_trailer()?;
        match decision::status_source_of(&slot0, &scratch) {
            StatusSource::None => {}
            StatusSource::Slot0 => {
                let (device_id, off) = self.magic_loc(0);
                self.read_status_elems(device_id, off, &mut bs)?;
            }
            StatusSource::Scratch => {
                let (device_id, off) = self.scratch_loc();
                self.read_status_elems(device_id, off, &mut bs)?;
            }
        }
        Ok(bs)
    }

    /// Scan the element run below `trailer_off` and decode the last written
    /// element into `(idx, state)`.
    fn read_status_elems(
        &mut self,
        device_id: u8,
        trailer_off: usize,
        bs: &mut BootStatus,
    ) -> Result<()> {
        let start = trailer_off - status_sz(bs.elem_sz);
        let flash = self.device(device_id)?;

        let mut last = None;
        for i in 0..(BOOT_STATUS_MAX_ENTRIES * BOOT_STATUS_STATE_COUNT) {
            let mut elem = [0u8];
            flash.read(start + i as usize * bs.elem_sz, &mut elem)?;
            if elem[0] == 0xff {
                if last.is_some() {
                    break;
                }
            } else {
                last = Some(i);
            }
        }

        if let Some(i) = last {
            bs.idx = i / BOOT_STATUS_STATE_COUNT;
            bs.state = (i % BOOT_STATUS_STATE_COUNT) as u8;
        }
        Ok(())
    }

    /// Persist the current progress.  Called only after the erase-and-copy
    /// pair of the preceding sub-step has fully completed; the single element
    /// write is what makes that sub-step durable.
    pub(crate) fn write_status(&mut self, bs: &BootStatus) -> Result<()> {
        // While the first group is moving, slot 0's tail sector (and with it
        // the status area) is itself being rewritten, so progress goes to
        // scratch.
        let (device_id, trailer_off) = if bs.idx == 0 {
            self.scratch_loc()
        } else {
            self.magic_loc(0)
        };

        let off = status_off(trailer_off, bs.idx, bs.state, bs.elem_sz);
        let mut elem = [0xffu8; trailer::TRAILER_SIZE];
        elem[0] = bs.state;
        let elem_sz = bs.elem_sz;
        self.device(device_id)?.write(off, &elem[..elem_sz])?;
        Ok(())
    }
}
