//! Flash styles
//!
//! Various microcontrollers have various types of flash memories available to
//! them.  These presets reproduce the common shapes so tests can run the same
//! scenario across all of them.

use crate::SimFlash;
use anyhow::Result;

/// The geometry of a single flash device.
pub struct AreaLayout {
    pub read_size: usize,
    pub write_size: usize,
    pub erase_size: usize,
    pub sectors: usize,
}

impl AreaLayout {
    pub fn build(&self) -> Result<SimFlash> {
        SimFlash::new(self.read_size, self.write_size, self.erase_size, self.sectors)
    }
}

/// STM32F4-style.
/// A small number of relatively large sectors; the whole secondary area is a
/// single sector, which stresses the small end of layouts.
pub static STM32F_MAIN: AreaLayout = AreaLayout {
    read_size: 1,
    write_size: 8,
    erase_size: 128 * 1024,
    sectors: 2,
};
pub static STM32F_UPGRADE: AreaLayout = AreaLayout {
    read_size: 1,
    write_size: 8,
    erase_size: 128 * 1024,
    sectors: 1,
};

/// K64-style.
/// Small uniform sectors.
pub static K64_MAIN: AreaLayout = AreaLayout {
    read_size: 1,
    write_size: 8,
    erase_size: 4 * 1024,
    sectors: 128 / 4 + 1,
};
pub static K64_UPGRADE: AreaLayout = AreaLayout {
    read_size: 1,
    write_size: 8,
    erase_size: 4 * 1024,
    sectors: 128 / 4 + 1,
};

/// Page-style devices, based on the LPC55S69: write and erase size coincide.
pub static LPC_MAIN: AreaLayout = AreaLayout {
    read_size: 1,
    write_size: 512,
    erase_size: 512,
    sectors: 128 * 2,
};
pub static LPC_UPGRADE: AreaLayout = AreaLayout {
    read_size: 1,
    write_size: 512,
    erase_size: 512,
    sectors: 128 * 2,
};

/// Large-write style, based on the STM32H745.
pub static STM32H_MAIN: AreaLayout = AreaLayout {
    read_size: 1,
    write_size: 32,
    erase_size: 128 * 1024,
    sectors: 4,
};
pub static STM32H_UPGRADE: AreaLayout = AreaLayout {
    read_size: 1,
    write_size: 32,
    erase_size: 128 * 1024,
    sectors: 3,
};

/// The mynewt-style test layout: one device carrying both slots and scratch
/// as uniform 128 KiB sectors, byte-writable.
pub static UNIFIED: AreaLayout = AreaLayout {
    read_size: 1,
    write_size: 1,
    erase_size: 128 * 1024,
    sectors: 8,
};

/// All of the two-device styles, as (main, upgrade) pairs.
pub static ALL_FLASHES: [(&'static AreaLayout, &'static AreaLayout); 4] = [
    (&STM32F_MAIN, &STM32F_UPGRADE),
    (&K64_MAIN, &K64_UPGRADE),
    (&LPC_MAIN, &LPC_UPGRADE),
    (&STM32H_MAIN, &STM32H_UPGRADE),
];

/// An iterator that returns each of the device pairs on each iteration.
pub fn all_flashes() -> impl Iterator<Item = Result<(SimFlash, SimFlash)>> {
    ALL_FLASHES.iter().map(|(a, b)| Ok((a.build()?, b.build()?)))
}
