//! Simulated flash
//!
//! The NOR-type flashes used in microcontrollers differ quite a bit in terms
//! of capabilities provided.  This simulator attempts to capture the
//! diversity of these devices: small write units with huge sectors, large
//! write units, and page-style devices where write and erase size coincide.
//!
//! Beyond geometry, the simulator enforces the two rules real NOR flash
//! punishes violations of:
//!
//! - programming can only clear bits.  A write that would need a `0` to
//!   become `1` fails with `NotErased` instead of silently succeeding, so any
//!   code path that forgets an erase shows up in tests immediately.
//! - every access must honor the device's read/write/erase granularity.
//!
//! The simulator can also act as an unreliable power supply: give it an
//! operation budget and the n-th program or erase fails with an I/O error,
//! leaving flash exactly as a reset at that instant would.  Sweeping the
//! budget over a whole swap exercises every resume point of the boot code.

pub mod gen;
pub mod styles;

use anyhow::{anyhow, bail, Result};
use storage::{Error, Flash, ReadFlash};

/// An in-memory NOR flash device.
pub struct SimFlash {
    data: Vec<u8>,
    read_size: usize,
    write_size: usize,
    erase_size: usize,
    /// Remaining program/erase operations before the simulated power cut.
    op_limit: Option<usize>,
    /// Program/erase operations performed so far.
    ops: usize,
}

impl SimFlash {
    /// Build a device with `sectors` erase units of the given geometry, fully
    /// erased.
    pub fn new(
        read_size: usize,
        write_size: usize,
        erase_size: usize,
        sectors: usize,
    ) -> Result<SimFlash> {
        if read_size == 0 || !write_size.is_power_of_two() || !erase_size.is_power_of_two() {
            bail!("unsupported flash geometry");
        }
        if erase_size % write_size != 0 || sectors == 0 {
            bail!("unsupported flash geometry");
        }
        Ok(SimFlash {
            data: vec![0xff; erase_size * sectors],
            read_size,
            write_size,
            erase_size,
            op_limit: None,
            ops: 0,
        })
    }

    /// Place an image (or any blob) into erased flash, padding the write out
    /// to the device's write granularity.
    pub fn install(&mut self, data: &[u8], offset: usize) -> Result<()> {
        if offset % self.write_size != 0 {
            bail!("install offset not write aligned");
        }
        let mut padded = data.to_vec();
        padded.resize(data.len().div_ceil(self.write_size) * self.write_size, 0xff);

        // Setup traffic shouldn't count against an operation budget.
        let saved = self.op_limit.take();
        let r = self.write(offset, &padded);
        self.op_limit = saved;
        r.map_err(|e| anyhow!("install failed: {:?}", e))
    }

    /// Fail every program/erase operation after the next `n`.
    pub fn set_op_limit(&mut self, n: usize) {
        self.op_limit = Some(n);
    }

    pub fn clear_op_limit(&mut self) {
        self.op_limit = None;
    }

    /// Number of program/erase operations performed so far.
    pub fn op_count(&self) -> usize {
        self.ops
    }

    pub fn reset_op_count(&mut self) {
        self.ops = 0;
    }

    fn take_op(&mut self) -> storage::Result<()> {
        if let Some(remaining) = self.op_limit {
            if remaining == 0 {
                return Err(Error::Io);
            }
            self.op_limit = Some(remaining - 1);
        }
        self.ops += 1;
        Ok(())
    }
}

impl ReadFlash for SimFlash {
    fn read_size(&self) -> usize {
        self.read_size
    }

    fn capacity(&self) -> usize {
        self.data.len()
    }

    fn read(&mut self, offset: usize, bytes: &mut [u8]) -> storage::Result<()> {
        storage::check_read(self, offset, bytes.len())?;
        bytes.copy_from_slice(&self.data[offset..offset + bytes.len()]);
        Ok(())
    }
}

impl Flash for SimFlash {
    fn write_size(&self) -> usize {
        self.write_size
    }

    fn erase_size(&self) -> usize {
        self.erase_size
    }

    fn write(&mut self, offset: usize, bytes: &[u8]) -> storage::Result<()> {
        storage::check_write(self, offset, bytes.len())?;
        self.take_op()?;
        let cells = &mut self.data[offset..offset + bytes.len()];
        for (cell, new) in cells.iter_mut().zip(bytes) {
            // Programming pulls bits low; asking for a bit to rise is the
            // missing-erase bug this simulator exists to catch.
            if new & !*cell != 0 {
                return Err(Error::NotErased);
            }
            *cell &= new;
        }
        Ok(())
    }

    fn erase(&mut self, offset: usize, len: usize) -> storage::Result<()> {
        storage::check_erase(self, offset, len)?;
        self.take_op()?;
        self.data[offset..offset + len].fill(0xff);
        Ok(())
    }
}

#[cfg(test)]
mod tester {
    use super::*;

    #[test]
    fn write_once() {
        let mut flash = SimFlash::new(1, 1, 4096, 4).unwrap();
        flash.write(16, &[0x12, 0x34]).unwrap();

        let mut back = [0u8; 2];
        flash.read(16, &mut back).unwrap();
        assert_eq!(back, [0x12, 0x34]);

        // Rewriting the same value is a no-op; any value that needs a bit
        // raised, the erased pattern included, is refused.
        flash.write(16, &[0x12]).unwrap();
        assert_eq!(flash.write(16, &[0xff]), Err(Error::NotErased));
        assert_eq!(flash.write(16, &[0x21]), Err(Error::NotErased));

        flash.erase(0, 4096).unwrap();
        flash.write(16, &[0x21]).unwrap();
    }

    #[test]
    fn alignment() {
        let mut flash = SimFlash::new(1, 8, 4096, 4).unwrap();
        assert_eq!(flash.write(4, &[0u8; 8]), Err(Error::NotAligned));
        assert_eq!(flash.write(8, &[0u8; 4]), Err(Error::NotAligned));
        assert_eq!(flash.erase(100, 4096), Err(Error::NotAligned));
        assert_eq!(flash.erase(0, 100), Err(Error::NotAligned));
        assert_eq!(flash.write(16 * 1024 - 8, &[0u8; 16]), Err(Error::OutOfBounds));
        flash.write(8, &[0u8; 8]).unwrap();
    }

    #[test]
    fn op_budget() {
        let mut flash = SimFlash::new(1, 1, 4096, 4).unwrap();
        flash.set_op_limit(2);
        flash.write(0, &[1]).unwrap();
        flash.erase(0, 4096).unwrap();
        assert_eq!(flash.write(0, &[1]), Err(Error::Io));
        assert_eq!(flash.erase(0, 4096), Err(Error::Io));

        flash.clear_op_limit();
        flash.write(0, &[1]).unwrap();
        assert_eq!(flash.op_count(), 3);
    }

    #[test]
    fn install_pads() {
        let mut flash = SimFlash::new(1, 512, 512, 16).unwrap();
        flash.install(&[0xaa; 700], 512).unwrap();
        let mut back = [0u8; 2];
        flash.read(512 + 699, &mut back).unwrap();
        assert_eq!(back, [0xaa, 0xff]);
    }
}
