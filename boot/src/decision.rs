//! The boot decision tables.
//!
//! Two small tables turn trailer contents into an action.  They are kept as
//! literal data so the correspondence with the documented state machine stays
//! mechanical; a field value of zero means "don't care", and the first row to
//! match wins.
//!
//! Swap-type table (what, if anything, was requested):
//!
//! ```text
//!  slot-0 magic | slot-1 magic | slot-0 image-ok | swap
//! --------------+--------------+-----------------+--------
//!  0xffffffff   | 0xffffffff   |       *         | none
//!      *        | 0x12344321   |       *         | test
//!  0x12344321   | 0xffffffff   |      0xff       | revert
//!  0x12344321   | 0xffffffff   |      0x01       | none
//! ```
//!
//! Any other combination cannot be produced by the loader's own writes and is
//! reported as a fatal inconsistency.
//!
//! Status-source table (where the progress run described in [`crate::status`]
//! is recorded):
//!
//! ```text
//!  slot-0 magic | scratch magic | slot-0 copy-done | source
//! --------------+---------------+------------------+---------
//!  0x12344321   |      *        |       0x01       | none
//!  0x12344321   |      *        |       0xff       | slot 0
//!      *        | 0x12344321    |        *         | scratch
//!  0xffffffff   | 0xffffffff    |       0xff       | slot 0
//! ```
//!
//! The last row covers both "no swap was ever attempted" (the run is erased,
//! reading it is harmless) and "mid-revert, past the first group" (a revert
//! leaves both magics erased while its progress run sits in slot 0).

use storage::Flash;

use crate::trailer::{ImageTrailer, BOOT_IMG_MAGIC};
use crate::{BootReq, Error, Result};

/// The operation the decision engine prescribes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwapType {
    /// Boot the primary slot as-is.
    None,
    /// Swap the slots; revert unless the new image confirms itself.
    Test,
    /// Swap back to the previous image.
    Revert,
    /// Keep the current image without any copying; produced by the
    /// confirmation path, never by the tables.
    Permanent,
}

impl SwapType {
    pub fn name(&self) -> &'static str {
        match self {
            SwapType::None => "none",
            SwapType::Test => "test",
            SwapType::Revert => "revert",
            SwapType::Permanent => "permanent",
        }
    }
}

/// Which trailer holds the progress run of an in-flight swap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum StatusSource {
    None,
    Slot0,
    Scratch,
}

/// Wildcard table entry; matches any value.
const ANY_WORD: u32 = 0;
const ANY_BYTE: u8 = 0;

const ERASED_WORD: u32 = 0xffff_ffff;
const ERASED_BYTE: u8 = 0xff;

struct SwapRow {
    magic_slot0: u32,
    magic_slot1: u32,
    image_ok_slot0: u8,
    swap_type: SwapType,
}

static SWAP_TABLE: [SwapRow; 4] = [
    SwapRow {
        magic_slot0: ERASED_WORD,
        magic_slot1: ERASED_WORD,
        image_ok_slot0: ANY_BYTE,
        swap_type: SwapType::None,
    },
    SwapRow {
        magic_slot0: ANY_WORD,
        magic_slot1: BOOT_IMG_MAGIC,
        image_ok_slot0: ANY_BYTE,
        swap_type: SwapType::Test,
    },
    SwapRow {
        magic_slot0: BOOT_IMG_MAGIC,
        magic_slot1: ERASED_WORD,
        image_ok_slot0: ERASED_BYTE,
        swap_type: SwapType::Revert,
    },
    SwapRow {
        magic_slot0: BOOT_IMG_MAGIC,
        magic_slot1: ERASED_WORD,
        image_ok_slot0: 0x01,
        swap_type: SwapType::None,
    },
];

struct StatusRow {
    magic_slot0: u32,
    magic_scratch: u32,
    copy_done_slot0: u8,
    source: StatusSource,
}

static STATUS_TABLE: [StatusRow; 4] = [
    StatusRow {
        magic_slot0: BOOT_IMG_MAGIC,
        magic_scratch: ANY_WORD,
        copy_done_slot0: 0x01,
        source: StatusSource::None,
    },
    StatusRow {
        magic_slot0: BOOT_IMG_MAGIC,
        magic_scratch: ANY_WORD,
        copy_done_slot0: ERASED_BYTE,
        source: StatusSource::Slot0,
    },
    StatusRow {
        magic_slot0: ANY_WORD,
        magic_scratch: BOOT_IMG_MAGIC,
        copy_done_slot0: ANY_BYTE,
        source: StatusSource::Scratch,
    },
    StatusRow {
        magic_slot0: ERASED_WORD,
        magic_scratch: ERASED_WORD,
        copy_done_slot0: ERASED_BYTE,
        source: StatusSource::Slot0,
    },
];

fn word_matches(pattern: u32, value: u32) -> bool {
    pattern == ANY_WORD || pattern == value
}

fn byte_matches(pattern: u8, value: u8) -> bool {
    pattern == ANY_BYTE || pattern == value
}

/// Classify the trailers into a swap operation.
pub(crate) fn swap_type_of(slot0: &ImageTrailer, slot1: &ImageTrailer) -> Result<SwapType> {
    for row in &SWAP_TABLE {
        if word_matches(row.magic_slot0, slot0.copy_start)
            && word_matches(row.magic_slot1, slot1.copy_start)
            && byte_matches(row.image_ok_slot0, slot0.image_ok)
        {
            return Ok(row.swap_type);
        }
    }
    Err(Error::BadStatus)
}

/// Find where an in-flight swap keeps its progress run.
pub(crate) fn status_source_of(slot0: &ImageTrailer, scratch: &ImageTrailer) -> StatusSource {
    for row in &STATUS_TABLE {
        if word_matches(row.magic_slot0, slot0.copy_start)
            && word_matches(row.magic_scratch, scratch.copy_start)
            && byte_matches(row.copy_done_slot0, slot0.copy_done)
        {
            return row.source;
        }
    }
    StatusSource::None
}

/// After an interrupted swap has been driven to completion, the trailers
/// describe the work as a whole, not the half that remained.  Map the
/// apparent type to the one that was actually just finished.
pub(crate) fn partial_swap_type(swap_type: SwapType) -> Result<SwapType> {
    match swap_type {
        SwapType::None => Ok(SwapType::Revert),
        SwapType::Revert => Ok(SwapType::Test),
        _ => Err(Error::BadStatus),
    }
}

impl<'a, F: Flash> BootReq<'a, F> {
    /// Classify the current trailer state into a swap operation.
    pub fn swap_type(&mut self) -> Result<SwapType> {
        let slot0 = self.read_slot_trailer(0)?;
        let slot1 = self.read_slot_trailer(1)?;
        swap_type_of(&slot0, &slot1)
    }
}

#[cfg(test)]
mod tester {
    use super::*;

    fn trailer(copy_start: u32, copy_done: u8, image_ok: u8) -> ImageTrailer {
        ImageTrailer {
            copy_start,
            copy_done,
            image_ok,
        }
    }

    const ERASED: ImageTrailer = ImageTrailer {
        copy_start: 0xffff_ffff,
        copy_done: 0xff,
        image_ok: 0xff,
    };

    #[test]
    fn swap_rows() {
        // Fresh flash: nothing to do.
        assert_eq!(swap_type_of(&ERASED, &ERASED), Ok(SwapType::None));

        // Request magic in slot 1 wins regardless of slot 0.
        let requested = trailer(BOOT_IMG_MAGIC, 0xff, 0xff);
        assert_eq!(swap_type_of(&ERASED, &requested), Ok(SwapType::Test));
        let confirmed0 = trailer(BOOT_IMG_MAGIC, 0x01, 0x01);
        assert_eq!(swap_type_of(&confirmed0, &requested), Ok(SwapType::Test));

        // Unconfirmed test image in slot 0: revert on the next boot.
        let on_probation = trailer(BOOT_IMG_MAGIC, 0x01, 0xff);
        assert_eq!(swap_type_of(&on_probation, &ERASED), Ok(SwapType::Revert));

        // Confirmed image: stay put.
        assert_eq!(swap_type_of(&confirmed0, &ERASED), Ok(SwapType::None));
    }

    #[test]
    fn swap_unreachable() {
        // A slot-0 magic with a garbage image-ok byte is not a state the
        // loader ever writes.
        let broken = trailer(BOOT_IMG_MAGIC, 0x01, 0x5a);
        assert_eq!(swap_type_of(&broken, &ERASED), Err(Error::BadStatus));
    }

    #[test]
    fn status_rows() {
        let done = trailer(BOOT_IMG_MAGIC, 0x01, 0xff);
        assert_eq!(status_source_of(&done, &ERASED), StatusSource::None);

        // Copy not finished: the run is in slot 0, even if scratch still
        // carries a stale magic from the first group.
        let mid = trailer(BOOT_IMG_MAGIC, 0xff, 0xff);
        assert_eq!(status_source_of(&mid, &ERASED), StatusSource::Slot0);
        let stale_scratch = trailer(BOOT_IMG_MAGIC, 0xff, 0xff);
        assert_eq!(status_source_of(&mid, &stale_scratch), StatusSource::Slot0);

        // First group still moving: scratch holds the run.
        assert_eq!(
            status_source_of(&ERASED, &stale_scratch),
            StatusSource::Scratch
        );

        // Everything erased: reading slot 0's erased run is harmless and
        // covers the mid-revert case.
        assert_eq!(status_source_of(&ERASED, &ERASED), StatusSource::Slot0);
    }

    #[test]
    fn partial_remap() {
        assert_eq!(partial_swap_type(SwapType::None), Ok(SwapType::Revert));
        assert_eq!(partial_swap_type(SwapType::Revert), Ok(SwapType::Test));
        assert_eq!(partial_swap_type(SwapType::Test), Err(Error::BadStatus));
        assert_eq!(
            partial_swap_type(SwapType::Permanent),
            Err(Error::BadStatus)
        );
    }
}
