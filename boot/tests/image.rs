// Image validation over simulated flash.

use simflash::gen::GenBuilder;
use simflash::{styles, SimFlash};
use storage::ReadFlash;
use swapboot::image::{self, flags, ImageHeader, HEADER_SIZE, TLV_RSA2048};
use swapboot::{Error, SignatureVerify};

fn header_of(flash: &mut SimFlash) -> ImageHeader {
    let mut raw = [0u8; HEADER_SIZE];
    flash.read(0, &mut raw).unwrap();
    ImageHeader::decode(&raw)
}

fn validate_at(flash: &mut SimFlash, verifier: Option<&dyn SignatureVerify>) -> swapboot::Result<()> {
    let hdr = header_of(flash);
    let limit = flash.capacity() as u32;
    let mut buf = [0u8; 1024];
    image::validate(flash, 0, &hdr, limit, &mut buf, None, None, verifier)
}

struct AcceptAll;

impl SignatureVerify for AcceptAll {
    fn verify(&self, _key_id: u8, _digest: &[u8; 32], _sig: &[u8]) -> bool {
        true
    }
}

struct RejectAll;

impl SignatureVerify for RejectAll {
    fn verify(&self, _key_id: u8, _digest: &[u8; 32], _sig: &[u8]) -> bool {
        false
    }
}

#[test]
fn image_test() {
    // A well-formed image validates on every flash geometry.
    for flashes in styles::all_flashes() {
        let (mut main, _upgrade) = flashes.unwrap();

        let img = GenBuilder::default().build().unwrap();
        main.install(&img.data, 0).unwrap();

        validate_at(&mut main, None).unwrap();
    }
}

#[test]
fn hashless_image_rejected() {
    // No digest flag at all: nothing ties the payload to the header.
    let mut flash = styles::UNIFIED.build().unwrap();
    let img = GenBuilder::default().flags(0).build().unwrap();
    flash.install(&img.data, 0).unwrap();

    assert_eq!(validate_at(&mut flash, None), Err(Error::BadImage));
}

#[test]
fn missing_hash_record_rejected() {
    // The flag promises a SHA256 record that is not there.
    let mut flash = styles::UNIFIED.build().unwrap();
    let img = GenBuilder::default().no_tlv().build().unwrap();
    flash.install(&img.data, 0).unwrap();

    assert_eq!(validate_at(&mut flash, None), Err(Error::BadImage));
}

#[test]
fn wrong_digest_rejected() {
    let mut flash = styles::UNIFIED.build().unwrap();
    let img = GenBuilder::default().corrupt_hash().build().unwrap();
    flash.install(&img.data, 0).unwrap();

    assert_eq!(validate_at(&mut flash, None), Err(Error::BadImage));
}

#[test]
fn truncated_tlv_rejected() {
    // Grow the declared TLV size past the actual records; the walk runs into
    // erased flash, whose fake record length cannot fit.
    let mut flash = styles::UNIFIED.build().unwrap();
    let mut img = GenBuilder::default().build().unwrap();
    let tlv_size = u16::from_le_bytes([img.data[4], img.data[5]]);
    img.data[4..6].copy_from_slice(&(tlv_size + 10).to_le_bytes());
    flash.install(&img.data, 0).unwrap();

    assert_eq!(validate_at(&mut flash, None), Err(Error::BadImage));
}

#[test]
fn oversized_image_rejected() {
    // A length field pointing past the slot must not be trusted.
    let mut flash = styles::UNIFIED.build().unwrap();
    let img = GenBuilder::default().build().unwrap();
    flash.install(&img.data, 0).unwrap();

    let hdr = header_of(&mut flash);
    let mut buf = [0u8; 1024];
    let limit = hdr.total_size() - 1;
    assert_eq!(
        image::validate(&mut flash, 0, &hdr, limit, &mut buf, None, None, None),
        Err(Error::BadImage)
    );
}

#[test]
fn signature_needs_verifier() {
    let mut flash = styles::UNIFIED.build().unwrap();
    let img = GenBuilder::default()
        .flags(flags::SHA256 | flags::RSA2048_SHA256)
        .sig_tlv(TLV_RSA2048, 256)
        .build()
        .unwrap();
    flash.install(&img.data, 0).unwrap();

    // Signature demanded, no crypto linked in: reject.
    assert_eq!(validate_at(&mut flash, None), Err(Error::BadImage));
    // The environment's verifier decides.
    assert_eq!(validate_at(&mut flash, Some(&AcceptAll)), Ok(()));
    assert_eq!(validate_at(&mut flash, Some(&RejectAll)), Err(Error::BadImage));
}

#[test]
fn signature_flag_without_record_rejected() {
    let mut flash = styles::UNIFIED.build().unwrap();
    let img = GenBuilder::default()
        .flags(flags::SHA256 | flags::RSA2048_SHA256)
        .build()
        .unwrap();
    flash.install(&img.data, 0).unwrap();

    assert_eq!(validate_at(&mut flash, Some(&AcceptAll)), Err(Error::BadImage));
}
