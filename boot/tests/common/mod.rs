//! Shared fixture for the boot scenarios.
//!
//! One byte-writable device of eight 128 KiB sectors carries the whole
//! layout: three sectors per slot starting at 0x20000, one scratch sector at
//! the top.  With a write alignment of one, the swap bookkeeping at the end
//! of a slot is the 8-byte trailer plus 384 status bytes.

#![allow(dead_code)]

use simflash::gen::{GenBuilder, GeneratedImage};
use simflash::{styles, SimFlash};
use storage::ReadFlash;
use swapboot::trailer::BOOT_IMG_MAGIC;
use swapboot::{BootReq, FlashArea, ImageTrailer};

pub const SECTOR: usize = 128 * 1024;
pub const SLOT_SIZE: u32 = 384 * 1024;
pub const SLOT0_BASE: usize = 0x20000;
pub const SLOT1_BASE: usize = 0x80000;
pub const SCRATCH_BASE: usize = 0xe0000;

pub const TRAILER_SIZE: usize = 8;
pub const STATUS_SIZE: usize = 128 * 3;
/// Trailer plus status run.
pub const META_SIZE: usize = TRAILER_SIZE + STATUS_SIZE;

pub static AREAS: [FlashArea; 7] = [
    FlashArea { device_id: 0, off: 0x20000, size: SECTOR as u32 },
    FlashArea { device_id: 0, off: 0x40000, size: SECTOR as u32 },
    FlashArea { device_id: 0, off: 0x60000, size: SECTOR as u32 },
    FlashArea { device_id: 0, off: 0x80000, size: SECTOR as u32 },
    FlashArea { device_id: 0, off: 0xa0000, size: SECTOR as u32 },
    FlashArea { device_id: 0, off: 0xc0000, size: SECTOR as u32 },
    FlashArea { device_id: 0, off: 0xe0000, size: SECTOR as u32 },
];

pub struct Fixture {
    pub flash: [SimFlash; 1],
    pub buf: [u8; 1024],
}

impl Fixture {
    pub fn new() -> Fixture {
        Fixture {
            flash: [styles::UNIFIED.build().unwrap()],
            buf: [0; 1024],
        }
    }

    /// Borrow the fixture as a boot request.
    pub fn req(&mut self) -> BootReq<'_, SimFlash> {
        BootReq {
            flash: &mut self.flash,
            areas: &AREAS,
            slot_areas: [0, 3],
            scratch_idx: 6,
            img_sz: SLOT_SIZE,
            buf: &mut self.buf,
            verifier: None,
        }
    }

    pub fn dev(&mut self) -> &mut SimFlash {
        &mut self.flash[0]
    }

    pub fn slot_base(slot: usize) -> usize {
        if slot == 0 {
            SLOT0_BASE
        } else {
            SLOT1_BASE
        }
    }

    pub fn install(&mut self, img: &GeneratedImage, slot: usize) {
        self.dev().install(&img.data, Self::slot_base(slot)).unwrap();
    }

    pub fn read_vec(&mut self, off: usize, len: usize) -> Vec<u8> {
        let mut out = vec![0u8; len];
        self.dev().read(off, &mut out).unwrap();
        out
    }

    pub fn trailer(&mut self, slot: usize) -> ImageTrailer {
        let off = Self::slot_base(slot) + SLOT_SIZE as usize - TRAILER_SIZE;
        let mut raw = [0u8; TRAILER_SIZE];
        self.dev().read(off, &mut raw).unwrap();
        ImageTrailer::decode(&raw)
    }

    /// The whole on-flash extent of a slot, bookkeeping included.
    pub fn slot_contents(&mut self, slot: usize) -> Vec<u8> {
        self.read_vec(Self::slot_base(slot), SLOT_SIZE as usize)
    }

    pub fn assert_slot_holds(&mut self, slot: usize, img: &GeneratedImage) {
        let got = self.read_vec(Self::slot_base(slot), img.data.len());
        assert!(got == img.data, "slot {} does not hold the expected image", slot);
    }

    pub fn assert_erased(&mut self, off: usize, len: usize) {
        let got = self.read_vec(off, len);
        assert!(got.iter().all(|&b| b == 0xff), "range at {:#x} not erased", off);
    }

    /// No half-done swap is recorded against the primary slot.
    pub fn assert_status_clear(&mut self) {
        let trailer = self.trailer(0);
        assert!(trailer.copy_start != BOOT_IMG_MAGIC || trailer.copy_done != 0xff);
    }
}

/// The image the device ships with.
pub fn primary_image() -> GeneratedImage {
    GenBuilder::default()
        .size(12 * 1024)
        .seed(1)
        .version((0, 2, 3, 4))
        .build()
        .unwrap()
}

/// The image an update places into the secondary slot.
pub fn upgrade_image() -> GeneratedImage {
    GenBuilder::default()
        .size(32 * 1024)
        .seed(2)
        .version((1, 2, 3, 432))
        .build()
        .unwrap()
}
