//! A power-fail-safe A/B image bootloader core.
//!
//! The loader manages two equally sized image slots and a scratch region.
//! Every decision is driven by the trailers at the end of those regions: a
//! magic word in the secondary slot schedules a swap, the primary slot's
//! trailer records whether a swapped image has been confirmed, and a run of
//! status bytes tracks the progress of an in-flight swap so that a reset at
//! any point resumes without losing either image.
//!
//! The core never talks to hardware directly.  The caller describes the
//! layout in a [`BootReq`]: the flash devices, the sector table for both
//! slots and scratch, and a work buffer.  [`boot_go`] completes any
//! interrupted swap, performs a newly requested one, validates the primary
//! image and reports where to jump.

#![cfg_attr(not(any(feature = "std", test)), no_std)]

#[macro_use]
mod fmt;

pub mod decision;
pub mod image;
pub mod meta;
pub mod split;
pub mod status;
pub mod swap;
pub mod trailer;

pub use decision::SwapType;
pub use image::{ImageHeader, ImageVersion, SignatureVerify};
pub use status::BootStatus;
pub use trailer::ImageTrailer;

use storage::Flash;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// The underlying flash driver failed.
    Flash(storage::Error),
    /// Bad header magic, inconsistent flags, hash mismatch, malformed TLV or
    /// rejected signature.
    BadImage,
    /// Persistent boot metadata is missing or unparsable.
    BadVector,
    /// The trailers or status bytes describe a state the loader can never
    /// write.
    BadStatus,
    /// The caller-supplied work buffer is missing or unusable.
    NoMemory,
    /// The request describes an impossible layout.
    BadArgs,
}

impl From<storage::Error> for Error {
    fn from(e: storage::Error) -> Error {
        Error::Flash(e)
    }
}

pub type Result<T> = core::result::Result<T, Error>;

/// One physical flash sector belonging to a slot or to the scratch region.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlashArea {
    pub device_id: u8,
    pub off: u32,
    pub size: u32,
}

/// Capacity of a caller-built sector table.
pub const MAX_AREAS: usize = 32;

/// Sector table produced by [`build_area_table`].
pub type AreaVec = heapless::Vec<FlashArea, MAX_AREAS>;

/// A request object instructing the boot loader how to proceed.
///
/// The descriptor table is sector granular and ordered: all of slot 0's
/// sectors first, then slot 1's, then the scratch sectors.  Both slots must
/// have the same sector layout.
pub struct BootReq<'a, F: Flash> {
    /// Flash devices, indexed by the `device_id` of each area.
    pub flash: &'a mut [F],
    /// Area descriptors for both slots and scratch.
    pub areas: &'a [FlashArea],
    /// Indices into `areas` of the first sector of each slot.
    pub slot_areas: [u8; 2],
    /// Index into `areas` of the first scratch sector.
    pub scratch_idx: u8,
    /// Size of one image slot in bytes.
    pub img_sz: u32,
    /// Caller-owned work buffer for copies and hashing.
    pub buf: &'a mut [u8],
    /// Signature verification capability, when the environment has one.
    pub verifier: Option<&'a dyn SignatureVerify>,
}

/// Where to jump once the boot loader is done.
///
/// The entry point is `image_addr + hdr.hdr_size` on the indicated device.
#[derive(Debug, Clone, Copy)]
pub struct BootRsp {
    pub flash_id: u8,
    pub image_addr: u32,
    pub hdr: ImageHeader,
}

impl<'a, F: Flash> BootReq<'a, F> {
    pub(crate) fn area(&self, idx: usize) -> Result<FlashArea> {
        self.areas.get(idx).copied().ok_or(Error::BadArgs)
    }

    pub(crate) fn device(&mut self, device_id: u8) -> Result<&mut F> {
        self.flash.get_mut(device_id as usize).ok_or(Error::BadArgs)
    }

    /// Flash id and base address of an image slot.
    pub(crate) fn slot_base(&self, slot: usize) -> (u8, u32) {
        let area = self.areas[self.slot_areas[slot] as usize];
        (area.device_id, area.off)
    }

    /// Reject layouts the swap machinery cannot operate on.  Nothing here
    /// depends on flash contents; a failure is a configuration error.
    pub(crate) fn check(&self) -> Result<()> {
        let s1 = self.slot_areas[1] as usize;
        let scratch = self.scratch_idx as usize;

        if self.slot_areas[0] != 0 || s1 == 0 || scratch <= s1 || scratch >= self.areas.len() {
            return Err(Error::BadArgs);
        }
        // The swap exchanges sectors pairwise, so the slots must mirror each
        // other exactly.
        if scratch - s1 != s1 {
            return Err(Error::BadArgs);
        }
        let mut slot_sz = 0u32;
        for i in 0..s1 {
            let a = self.area(i)?;
            let b = self.area(s1 + i)?;
            if a.size != b.size {
                return Err(Error::BadArgs);
            }
            slot_sz += a.size;
        }
        if slot_sz != self.img_sz {
            return Err(Error::BadArgs);
        }
        // One group per sector in the worst case, plus the final progress
        // record, must fit in the status area.
        if s1 >= status::BOOT_STATUS_MAX_ENTRIES as usize {
            return Err(Error::BadArgs);
        }
        for area in self.areas {
            if area.device_id as usize >= self.flash.len() {
                return Err(Error::BadArgs);
            }
        }
        // Sector runs must be contiguous: group copies and whole-slot erases
        // address a run through its first sector.
        for region in [0..s1, s1..scratch, scratch..self.areas.len()] {
            for pair in self.areas[region].windows(2) {
                if pair[1].device_id != pair[0].device_id
                    || pair[1].off != pair[0].off + pair[0].size
                {
                    return Err(Error::BadArgs);
                }
            }
        }

        let elem_sz = self.status_elem_sz();
        if elem_sz > trailer::TRAILER_SIZE {
            // The fixed trailer layout cannot express larger write units.
            return Err(Error::BadArgs);
        }
        let scratch_sz = self.scratch_size();
        let largest = self.areas[..s1].iter().map(|a| a.size).fold(0, u32::max);
        if scratch_sz < largest || (scratch_sz as usize) < swap::meta_sz(elem_sz) {
            return Err(Error::BadArgs);
        }

        if self.buf.is_empty() {
            return Err(Error::NoMemory);
        }
        for dev in self.flash.iter() {
            if self.buf.len() < dev.write_size() {
                return Err(Error::NoMemory);
            }
        }
        Ok(())
    }
}

/// Flatten the per-region sector lists into the single descriptor table a
/// [`BootReq`] carries, returning the table together with the slot start
/// indices and the scratch index.
pub fn build_area_table(
    slot0: &[FlashArea],
    slot1: &[FlashArea],
    scratch: &[FlashArea],
) -> Result<(AreaVec, [u8; 2], u8)> {
    let mut table = AreaVec::new();
    for region in [slot0, slot1, scratch] {
        table
            .extend_from_slice(region)
            .map_err(|()| Error::BadArgs)?;
    }
    let slot_areas = [0, slot0.len() as u8];
    let scratch_idx = (slot0.len() + slot1.len()) as u8;
    Ok((table, slot_areas, scratch_idx))
}

/// Prepares the booting process.  Completes an interrupted swap if one was
/// underway, performs a requested swap, validates the resulting primary
/// image, and tells the caller what to execute.
///
/// Any flash write issued here leaves the trailers in a state the decision
/// tables interpret correctly on the next reset, so power may be lost at any
/// point.
pub fn boot_go<F: Flash>(req: &mut BootReq<'_, F>) -> Result<BootRsp> {
    req.check()?;

    let headers = req.read_image_headers();

    // Determine if we rebooted in the middle of an image swap.
    let mut bs = req.read_status()?;
    let swap_type = if bs.in_progress() {
        info!("resuming swap at idx={} state={}", bs.idx, bs.state);
        req.copy_image(&mut bs)?;
        decision::partial_swap_type(req.swap_type()?)?
    } else {
        let ty = req.validated_swap_type(&headers[1])?;
        if ty != SwapType::None {
            req.copy_image(&mut bs)?;
        }
        ty
    };
    info!("swap type: {}", swap_type.name());

    match swap_type {
        SwapType::None => {}
        SwapType::Test => req.finalize_test_swap()?,
        SwapType::Revert => req.finalize_revert_swap()?,
        // Never produced by the decision tables; confirmation happens through
        // `set_confirmed` while the application runs.
        SwapType::Permanent => return Err(Error::BadStatus),
    }

    // The primary slot holds the chosen image now.  Hand back its current
    // header, refusing to boot anything that does not validate.
    let hdr = req.read_image_header(0)?;
    req.check_image(0, &hdr, None, None)?;

    let (flash_id, image_addr) = req.slot_base(0);
    Ok(BootRsp {
        flash_id,
        image_addr,
        hdr,
    })
}
