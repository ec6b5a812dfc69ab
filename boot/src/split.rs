//! Split images.
//!
//! A split setup boots a small loader from the primary slot and a larger
//! application from the secondary slot at run time.  No swapping is involved:
//! the pair is validated in tandem and control jumps straight into the app.
//! The binding between the two is cryptographic: the app's digest is computed
//! over `[loader digest || app header || app payload]`, so an app only
//! matches the exact loader it was built against.
//!
//! Whether to enter the app at all is policy, persisted in the environment's
//! key/value store and consulted before any validation work.  If a pending
//! slot swap is also scheduled, the swap runs first and the split check
//! operates on the post-swap layout.

use storage::Flash;

use crate::image::HASH_SIZE;
use crate::{BootReq, Error, Result};

/// Persisted split-image policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SplitMode {
    /// Run the loader only.
    Loader = 0,
    /// Run the app once; revert to the loader on reboot.
    TestApp = 1,
    /// Run the app; no change on reboot.
    App = 2,
    /// Run the loader once; revert to loader + app on reboot.
    TestLoader = 3,
}

impl SplitMode {
    pub fn from_u8(v: u8) -> Result<SplitMode> {
        match v {
            0 => Ok(SplitMode::Loader),
            1 => Ok(SplitMode::TestApp),
            2 => Ok(SplitMode::App),
            3 => Ok(SplitMode::TestLoader),
            _ => Err(Error::BadVector),
        }
    }
}

/// The slice of the persistent config store that holds the split mode.
pub trait SplitStore {
    fn split_mode(&mut self) -> Result<SplitMode>;
    fn set_split_mode(&mut self, mode: SplitMode) -> Result<()>;
}

/// Outcome of a split compatibility check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SplitStatus {
    Matching,
    NonMatching,
    Invalid,
}

impl<'a, F: Flash> BootReq<'a, F> {
    /// Validate a loader/app pair and return the app's entry address.
    ///
    /// The bootable flag is deliberately not consulted here; split apps are
    /// normally marked non-bootable so the swap path refuses to boot them
    /// standalone, but entering one from its loader is exactly the point.
    pub fn split_go(&mut self, loader_slot: usize, split_slot: usize) -> Result<u32> {
        let headers = self.read_image_headers();
        let loader_hdr = headers[loader_slot];
        let split_hdr = headers[split_slot];

        let mut loader_hash = [0u8; HASH_SIZE];
        self.check_image(loader_slot, &loader_hdr, None, Some(&mut loader_hash))?;
        self.check_image(split_slot, &split_hdr, Some(&loader_hash), None)?;

        let (_, base) = self.slot_base(split_slot);
        Ok(base + split_hdr.hdr_size as u32)
    }

    /// Non-destructive compatibility probe over the current pair.
    pub fn split_status(&mut self, loader_slot: usize, split_slot: usize) -> SplitStatus {
        match self.split_go(loader_slot, split_slot) {
            Ok(_) => SplitStatus::Matching,
            Err(Error::BadImage) => SplitStatus::NonMatching,
            Err(_) => SplitStatus::Invalid,
        }
    }

    /// Consult the persisted split mode and, when it says so, validate the
    /// pair and return the app entry point.  `Ok(None)` means "stay in the
    /// loader".  One-shot test modes rewrite themselves before the jump so a
    /// crash reverts the policy.
    pub fn split_app_go<S: SplitStore>(
        &mut self,
        store: &mut S,
        loader_slot: usize,
        split_slot: usize,
    ) -> Result<Option<u32>> {
        let mode = store.split_mode()?;
        match mode {
            SplitMode::Loader => Ok(None),
            SplitMode::TestLoader => {
                store.set_split_mode(SplitMode::App)?;
                Ok(None)
            }
            SplitMode::TestApp | SplitMode::App => {
                if mode == SplitMode::TestApp {
                    store.set_split_mode(SplitMode::Loader)?;
                }
                let entry = self.split_go(loader_slot, split_slot)?;
                Ok(Some(entry))
            }
        }
    }
}
