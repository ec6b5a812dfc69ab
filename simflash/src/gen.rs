//! Image generation.
//!
//! Builds signed-image blobs the way the manufacturing tooling does: a
//! 32-byte little-endian header padded out to `header_size`, a seeded random
//! payload, and a TLV section carrying the SHA-256 of everything before it.
//! The payload comes from a fixed-seed PRNG so tests can verify flash
//! contents after a swap by comparing against the regenerated bytes.

use anyhow::{bail, Result};
use rand::{RngCore, SeedableRng};
use rand_xoshiro::Xoshiro256Plus;
use sha2::{Digest, Sha256};

// Wire constants, as the image tooling defines them.
const IMAGE_MAGIC: u32 = 0x96f3b83c;
const HEADER_SIZE: usize = 32;
const TLV_SHA256: u8 = 1;
const HASH_SIZE: usize = 32;

/// The SHA256 header flag; the generator's default.
pub const FLAG_SHA256: u32 = 0x02;

pub struct GeneratedImage {
    /// The full on-flash blob: header, payload, TLVs.
    pub data: Vec<u8>,
    /// Digest of header and payload (the correct one, even for an image
    /// built with a corrupted hash record).
    pub digest: [u8; HASH_SIZE],
}

pub struct GenBuilder {
    /// Offset of the payload within the image.
    header_size: usize,
    /// Size of the payload, not counting header or TLV.
    size: usize,
    /// Seed for the PRNG.
    seed: u64,
    version: (u8, u8, u16, u32),
    flags: u32,
    /// Emit the SHA256 TLV record.
    hash_tlv: bool,
    /// Zero the digest value in the TLV record.
    corrupt_hash: bool,
    /// Emit a signature record: TLV type and signature length.
    sig: Option<(u8, usize)>,
    /// Prefix digest for chained (split) images.
    chain: Option<[u8; HASH_SIZE]>,
}

impl Default for GenBuilder {
    fn default() -> Self {
        GenBuilder {
            header_size: 0x200,
            size: 76_137,
            seed: 1,
            version: (0, 1, 0, 0),
            flags: FLAG_SHA256,
            hash_tlv: true,
            corrupt_hash: false,
            sig: None,
            chain: None,
        }
    }
}

impl GenBuilder {
    pub fn header_size(&mut self, header_size: usize) -> &mut Self {
        self.header_size = header_size;
        self
    }

    pub fn size(&mut self, size: usize) -> &mut Self {
        self.size = size;
        self
    }

    pub fn seed(&mut self, seed: u64) -> &mut Self {
        self.seed = seed;
        self
    }

    pub fn version(&mut self, version: (u8, u8, u16, u32)) -> &mut Self {
        self.version = version;
        self
    }

    pub fn flags(&mut self, flags: u32) -> &mut Self {
        self.flags = flags;
        self
    }

    /// Leave the TLV section out entirely.
    pub fn no_tlv(&mut self) -> &mut Self {
        self.hash_tlv = false;
        self
    }

    /// Write a zeroed digest value so validation must fail.
    pub fn corrupt_hash(&mut self) -> &mut Self {
        self.corrupt_hash = true;
        self
    }

    /// Append a signature record of the given TLV type and length.  The
    /// signature bytes are a fill pattern; pair this with a test verifier.
    pub fn sig_tlv(&mut self, kind: u8, len: usize) -> &mut Self {
        self.sig = Some((kind, len));
        self
    }

    /// Chain this image to another one's digest (split-image style).
    pub fn chain(&mut self, digest: [u8; HASH_SIZE]) -> &mut Self {
        self.chain = Some(digest);
        self
    }

    pub fn build(&self) -> Result<GeneratedImage> {
        if self.header_size < HEADER_SIZE {
            bail!("header_size smaller than the header itself");
        }

        let mut tlv_size: usize = if self.hash_tlv { 4 + HASH_SIZE } else { 0 };
        if let Some((_, sig_len)) = self.sig {
            tlv_size += 4 + sig_len;
        }
        let hashed_len = self.header_size + self.size;
        let mut data = vec![0xffu8; hashed_len + tlv_size];

        let mut rng = Xoshiro256Plus::seed_from_u64(self.seed);
        rng.fill_bytes(&mut data[self.header_size..hashed_len]);

        let hdr = &mut data[..HEADER_SIZE];
        hdr[0..4].copy_from_slice(&IMAGE_MAGIC.to_le_bytes());
        hdr[4..6].copy_from_slice(&(tlv_size as u16).to_le_bytes());
        hdr[6] = 0; // key id
        hdr[7] = 0xff;
        hdr[8..10].copy_from_slice(&(self.header_size as u16).to_le_bytes());
        hdr[12..16].copy_from_slice(&(self.size as u32).to_le_bytes());
        hdr[16..20].copy_from_slice(&self.flags.to_le_bytes());
        hdr[20] = self.version.0;
        hdr[21] = self.version.1;
        hdr[22..24].copy_from_slice(&self.version.2.to_le_bytes());
        hdr[24..28].copy_from_slice(&self.version.3.to_le_bytes());

        let mut hasher = Sha256::new();
        if let Some(chain) = &self.chain {
            hasher.update(chain);
        }
        hasher.update(&data[..hashed_len]);
        let digest: [u8; HASH_SIZE] = hasher.finalize().into();

        let mut tlv_off = hashed_len;
        if self.hash_tlv {
            let tlv = &mut data[tlv_off..tlv_off + 4 + HASH_SIZE];
            tlv[0] = TLV_SHA256;
            tlv[1] = 0;
            tlv[2..4].copy_from_slice(&(HASH_SIZE as u16).to_le_bytes());
            if self.corrupt_hash {
                tlv[4..].fill(0);
            } else {
                tlv[4..].copy_from_slice(&digest);
            }
            tlv_off += 4 + HASH_SIZE;
        }
        if let Some((kind, sig_len)) = self.sig {
            let tlv = &mut data[tlv_off..tlv_off + 4 + sig_len];
            tlv[0] = kind;
            tlv[1] = 0;
            tlv[2..4].copy_from_slice(&(sig_len as u16).to_le_bytes());
            tlv[4..].fill(0xa5);
        }

        Ok(GeneratedImage { data, digest })
    }
}

#[cfg(test)]
mod tester {
    use super::GenBuilder;
    use crate::styles;
    use storage::ReadFlash;
    use swapboot::image::{self, ImageHeader, HEADER_SIZE};

    #[test]
    fn test_gen() {
        let img = GenBuilder::default().build().unwrap();

        let mut flash = styles::LPC_MAIN.build().unwrap();
        flash.install(&img.data, 0).unwrap();

        let mut raw = [0u8; HEADER_SIZE];
        flash.read(0, &mut raw).unwrap();
        let hdr = ImageHeader::decode(&raw);
        assert_eq!(hdr.img_size as usize, 76_137);

        let limit = flash.capacity() as u32;
        let mut buf = [0u8; 1024];
        image::validate(&mut flash, 0, &hdr, limit, &mut buf, None, None, None).unwrap();
    }

    #[test]
    fn corrupt_hash_fails() {
        let img = GenBuilder::default().corrupt_hash().build().unwrap();

        let mut flash = styles::LPC_MAIN.build().unwrap();
        flash.install(&img.data, 0).unwrap();

        let mut raw = [0u8; HEADER_SIZE];
        flash.read(0, &mut raw).unwrap();
        let hdr = ImageHeader::decode(&raw);

        let limit = flash.capacity() as u32;
        let mut buf = [0u8; 1024];
        assert!(image::validate(&mut flash, 0, &hdr, limit, &mut buf, None, None, None).is_err());
    }
}
