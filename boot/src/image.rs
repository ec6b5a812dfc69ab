//! Boot image support.
//!
//! An image sits at the start of a slot: a fixed 32-byte header, the padding
//! up to `hdr_size`, the executable payload, and a run of TLV records
//! carrying the SHA-256 digest of everything before them and, optionally, a
//! signature over that digest.  All on-flash fields are little endian and are
//! decoded explicitly; nothing here overlays structs onto flash.

use byteorder::{ByteOrder, LittleEndian};
use sha2::{Digest, Sha256};
use storage::{Flash, ReadFlash};

use crate::{BootReq, Error, Result};

/// The image header starts with this magic value.
pub const IMAGE_MAGIC: u32 = 0x96f3b83c;
/// Header magic of an erased slot.
pub const IMAGE_MAGIC_NONE: u32 = 0xffff_ffff;

/// Image header flags.
pub mod flags {
    /// Position independent image.
    pub const PIC: u32 = 0x0000_0001;
    /// The TLV section carries a SHA-256 of the header and payload.
    pub const SHA256: u32 = 0x0000_0002;
    /// PKCS#1.5 RSA-2048 signature over the digest.
    pub const RSA2048_SHA256: u32 = 0x0000_0004;
    /// ECDSA-P224 signature over the digest.
    pub const ECDSA224_SHA256: u32 = 0x0000_0008;
    /// The image must never be executed (data or partial upload).
    pub const NON_BOOTABLE: u32 = 0x0000_0010;

    pub(crate) const ANY_HASH: u32 = SHA256 | RSA2048_SHA256 | ECDSA224_SHA256;
    pub(crate) const ANY_SIG: u32 = RSA2048_SHA256 | ECDSA224_SHA256;
}

/// TLV record types.
pub const TLV_SHA256: u8 = 1;
pub const TLV_RSA2048: u8 = 2;
pub const TLV_ECDSA224: u8 = 3;

pub const HEADER_SIZE: usize = 32;
const TLV_HEADER_SIZE: usize = 4;

pub const HASH_SIZE: usize = 32;

/// Pseudo-semantic image version, used by management tools to decide upgrade
/// eligibility.  The boot core only carries it through.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ImageVersion {
    pub major: u8,
    pub minor: u8,
    pub revision: u16,
    pub build_num: u32,
}

/// Decoded image header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageHeader {
    pub magic: u32,
    /// Size of the trailing TLV section in bytes.
    pub tlv_size: u16,
    /// Key the signature TLV was made with.
    pub key_id: u8,
    /// Offset of the payload; the header is padded out to this.
    pub hdr_size: u16,
    /// Payload size, not counting header or TLVs.
    pub img_size: u32,
    pub flags: u32,
    pub version: ImageVersion,
}

impl ImageHeader {
    pub fn decode(raw: &[u8; HEADER_SIZE]) -> ImageHeader {
        ImageHeader {
            magic: LittleEndian::read_u32(&raw[0..4]),
            tlv_size: LittleEndian::read_u16(&raw[4..6]),
            key_id: raw[6],
            hdr_size: LittleEndian::read_u16(&raw[8..10]),
            img_size: LittleEndian::read_u32(&raw[12..16]),
            flags: LittleEndian::read_u32(&raw[16..20]),
            version: ImageVersion {
                major: raw[20],
                minor: raw[21],
                revision: LittleEndian::read_u16(&raw[22..24]),
                build_num: LittleEndian::read_u32(&raw[24..28]),
            },
        }
    }

    /// The header an erased slot decodes to.
    pub fn erased() -> ImageHeader {
        ImageHeader::decode(&[0xff; HEADER_SIZE])
    }

    /// Total bytes the image occupies on flash.
    pub fn total_size(&self) -> u32 {
        self.hdr_size as u32 + self.img_size + self.tlv_size as u32
    }
}

/// One TLV record header; the value follows it immediately.
#[derive(Debug, Clone, Copy)]
struct Tlv {
    kind: u8,
    len: u16,
}

impl Tlv {
    fn decode(raw: &[u8; TLV_HEADER_SIZE]) -> Tlv {
        Tlv {
            kind: raw[0],
            len: LittleEndian::read_u16(&raw[2..4]),
        }
    }
}

/// Signature verification capability.  The core treats the check as an opaque
/// yes/no; environments without crypto simply pass no verifier, and images
/// that demand a signature are then rejected.
pub trait SignatureVerify {
    fn verify(&self, key_id: u8, digest: &[u8; HASH_SIZE], sig: &[u8]) -> bool;
}

/// Validate the image at `base`.
///
/// Streams `[seed || header || payload]` through SHA-256 in `buf`-sized
/// chunks, then walks the TLV section: the SHA256 record must match the
/// computed digest, and a signature record is checked through `verifier`.
/// Declared sizes are bounded against `limit` (the slot size) before any of
/// them is trusted.  On success the digest is stored through `out_hash`,
/// which the split-image path uses for chaining.
pub fn validate<F: ReadFlash>(
    flash: &mut F,
    base: u32,
    hdr: &ImageHeader,
    limit: u32,
    buf: &mut [u8],
    seed: Option<&[u8; HASH_SIZE]>,
    out_hash: Option<&mut [u8; HASH_SIZE]>,
    verifier: Option<&dyn SignatureVerify>,
) -> Result<()> {
    if hdr.magic != IMAGE_MAGIC {
        return Err(Error::BadImage);
    }
    // An image that carries no digest at all can never be trusted across a
    // swap, so it does not validate.
    if hdr.flags & flags::ANY_HASH == 0 {
        return Err(Error::BadImage);
    }
    if (hdr.hdr_size as usize) < HEADER_SIZE || hdr.total_size() > limit {
        return Err(Error::BadImage);
    }
    if buf.is_empty() {
        return Err(Error::NoMemory);
    }

    let mut hasher = Sha256::new();
    if let Some(seed) = seed {
        hasher.update(seed);
    }

    let hashed_len = hdr.hdr_size as usize + hdr.img_size as usize;
    let base = base as usize;
    let mut off = 0;
    while off < hashed_len {
        let chunk = (hashed_len - off).min(buf.len());
        flash.read(base + off, &mut buf[..chunk])?;
        hasher.update(&buf[..chunk]);
        off += chunk;
    }
    let digest: [u8; HASH_SIZE] = hasher.finalize().into();

    let tlv_base = base + hashed_len;
    let tlv_size = hdr.tlv_size as usize;
    let mut pos = 0;
    let mut hash_seen = false;
    let mut sig_seen = false;
    while pos + TLV_HEADER_SIZE <= tlv_size {
        let mut raw = [0u8; TLV_HEADER_SIZE];
        flash.read(tlv_base + pos, &mut raw)?;
        let tlv = Tlv::decode(&raw);
        pos += TLV_HEADER_SIZE;
        if tlv.len as usize > tlv_size - pos {
            return Err(Error::BadImage);
        }
        match tlv.kind {
            TLV_SHA256 => {
                if tlv.len as usize != HASH_SIZE {
                    return Err(Error::BadImage);
                }
                let mut stored = [0u8; HASH_SIZE];
                flash.read(tlv_base + pos, &mut stored)?;
                if stored != digest {
                    return Err(Error::BadImage);
                }
                hash_seen = true;
            }
            TLV_RSA2048 | TLV_ECDSA224 => {
                let verifier = verifier.ok_or(Error::BadImage)?;
                if tlv.len as usize > buf.len() {
                    return Err(Error::BadImage);
                }
                let sig = &mut buf[..tlv.len as usize];
                flash.read(tlv_base + pos, sig)?;
                if !verifier.verify(hdr.key_id, &digest, sig) {
                    return Err(Error::BadImage);
                }
                sig_seen = true;
            }
            // Unknown record types are skipped; newer tooling may add more.
            _ => {}
        }
        pos += tlv.len as usize;
    }

    if hdr.flags & flags::SHA256 != 0 && !hash_seen {
        return Err(Error::BadImage);
    }
    if hdr.flags & flags::ANY_SIG != 0 && !sig_seen {
        return Err(Error::BadImage);
    }

    if let Some(out) = out_hash {
        *out = digest;
    }
    Ok(())
}

impl<'a, F: Flash> BootReq<'a, F> {
    /// Read a slot's image header.  A read failure or a header that is not an
    /// image decodes as an erased slot, matching what the decision path
    /// expects from empty flash.
    pub(crate) fn read_image_headers(&mut self) -> [ImageHeader; 2] {
        let mut headers = [ImageHeader::erased(); 2];
        for (slot, out) in headers.iter_mut().enumerate() {
            if let Ok(hdr) = self.read_image_header(slot) {
                if hdr.magic == IMAGE_MAGIC {
                    *out = hdr;
                }
            }
        }
        headers
    }

    pub(crate) fn read_image_header(&mut self, slot: usize) -> Result<ImageHeader> {
        let (device_id, base) = self.slot_base(slot);
        let mut raw = [0u8; HEADER_SIZE];
        self.device(device_id)?.read(base as usize, &mut raw)?;
        Ok(ImageHeader::decode(&raw))
    }

    /// Validate a slot's image hash (and signature, if any).
    pub(crate) fn check_image(
        &mut self,
        slot: usize,
        hdr: &ImageHeader,
        seed: Option<&[u8; HASH_SIZE]>,
        out_hash: Option<&mut [u8; HASH_SIZE]>,
    ) -> Result<()> {
        let (device_id, base) = self.slot_base(slot);
        let limit = self.img_sz;
        let verifier = self.verifier;
        let flash = self
            .flash
            .get_mut(device_id as usize)
            .ok_or(Error::BadArgs)?;
        validate(flash, base, hdr, limit, self.buf, seed, out_hash, verifier)
    }
}

#[cfg(test)]
mod tester {
    use super::{ImageHeader, ImageVersion, HEADER_SIZE, IMAGE_MAGIC};

    #[test]
    fn header_decode() {
        let mut raw = [0xffu8; HEADER_SIZE];
        raw[0..4].copy_from_slice(&0x96f3b83cu32.to_le_bytes());
        raw[4..6].copy_from_slice(&36u16.to_le_bytes());
        raw[6] = 2;
        raw[8..10].copy_from_slice(&0x200u16.to_le_bytes());
        raw[12..16].copy_from_slice(&(12 * 1024u32).to_le_bytes());
        raw[16..20].copy_from_slice(&0x02u32.to_le_bytes());
        raw[20] = 0;
        raw[21] = 2;
        raw[22..24].copy_from_slice(&3u16.to_le_bytes());
        raw[24..28].copy_from_slice(&4u32.to_le_bytes());

        let hdr = ImageHeader::decode(&raw);
        assert_eq!(hdr.magic, IMAGE_MAGIC);
        assert_eq!(hdr.tlv_size, 36);
        assert_eq!(hdr.key_id, 2);
        assert_eq!(hdr.hdr_size, 0x200);
        assert_eq!(hdr.img_size, 12 * 1024);
        assert_eq!(hdr.flags, 0x02);
        assert_eq!(
            hdr.version,
            ImageVersion {
                major: 0,
                minor: 2,
                revision: 3,
                build_num: 4
            }
        );
        assert_eq!(hdr.total_size(), 0x200 + 12 * 1024 + 36);
    }

    #[test]
    fn erased_header() {
        let hdr = ImageHeader::erased();
        assert_eq!(hdr.magic, super::IMAGE_MAGIC_NONE);
        assert_eq!(hdr.flags, 0xffff_ffff);
    }
}
