// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Sector read-modify-write tests against the in-memory flash.

mod common;

use common::MemFlash;
use iap_common::flash::{erase_region, FlashError, FlashWriter, SectorBuffer};
use iap_common::layout::{Layout, Region, Sector, REGION_A_ADDR, SECTOR_SIZE};

fn make_region() -> Region {
    Layout::dual().region_a
}

// ===== erase on demand =====

#[test]
fn test_erased_target_programmed_without_erase() {
    let mut flash = MemFlash::new();
    let mut scratch = SectorBuffer::new();
    let mut writer = FlashWriter::new(&mut flash, &mut scratch, make_region());

    writer.write_bytes(REGION_A_ADDR, &[0x11; 48]).unwrap();

    assert!(flash.erases.is_empty());
    assert_eq!(flash.programs, 3);
    assert_eq!(flash.slice(REGION_A_ADDR, 48), &[0x11; 48][..]);
}

#[test]
fn test_straddling_write_preserves_unrelated_bytes() {
    let mut flash = MemFlash::new();
    let boundary = REGION_A_ADDR + SECTOR_SIZE;
    // Unrelated content in both sectors.
    flash.load(REGION_A_ADDR, &[0xA5; 64]);
    flash.load(boundary - 32, &[0x01; 32]);
    flash.load(boundary, &[0x02; 16]);
    flash.load(boundary + SECTOR_SIZE - 16, &[0xB6; 16]);

    let mut scratch = SectorBuffer::new();
    let mut writer = FlashWriter::new(&mut flash, &mut scratch, make_region());
    writer.write_bytes(boundary - 32, &[0x5A; 64]).unwrap();

    assert_eq!(
        flash.erases,
        vec![
            Sector::containing(REGION_A_ADDR).unwrap(),
            Sector::containing(boundary).unwrap()
        ]
    );
    assert_eq!(flash.slice(REGION_A_ADDR, 64), &[0xA5; 64][..]);
    assert_eq!(flash.slice(boundary - 32, 64), &[0x5A; 64][..]);
    assert_eq!(flash.slice(boundary + SECTOR_SIZE - 16, 16), &[0xB6; 16][..]);
}

#[test]
fn test_only_dirty_sector_is_erased() {
    let mut flash = MemFlash::new();
    let boundary = REGION_A_ADDR + SECTOR_SIZE;
    flash.load(boundary - 16, &[0x00; 16]);

    let mut scratch = SectorBuffer::new();
    let mut writer = FlashWriter::new(&mut flash, &mut scratch, make_region());
    writer.write_bytes(boundary - 16, &[0x77; 32]).unwrap();

    assert_eq!(flash.erases, vec![Sector::containing(REGION_A_ADDR).unwrap()]);
    assert_eq!(flash.slice(boundary - 16, 32), &[0x77; 32][..]);
}

#[test]
fn test_partial_granule_keeps_existing_tail() {
    let mut flash = MemFlash::new();
    let mut scratch = SectorBuffer::new();
    let mut writer = FlashWriter::new(&mut flash, &mut scratch, make_region());
    writer.write_bytes(REGION_A_ADDR, &[0x42; 5]).unwrap();

    let mut expected = [0xFF; 16];
    expected[..5].copy_from_slice(&[0x42; 5]);
    assert_eq!(flash.slice(REGION_A_ADDR, 16), &expected[..]);
    assert!(flash.erases.is_empty());
}

#[test]
fn test_halfword_write_is_little_endian() {
    let mut flash = MemFlash::new();
    let mut scratch = SectorBuffer::new();
    let mut writer = FlashWriter::new(&mut flash, &mut scratch, make_region());
    writer.write(REGION_A_ADDR, &[0x1234, 0xABCD]).unwrap();
    assert_eq!(flash.slice(REGION_A_ADDR, 4), &[0x34, 0x12, 0xCD, 0xAB]);
}

#[test]
fn test_halfword_read_matches_write() {
    let mut flash = MemFlash::new();
    let mut scratch = SectorBuffer::new();
    let mut writer = FlashWriter::new(&mut flash, &mut scratch, make_region());
    writer.write(REGION_A_ADDR, &[0x1234, 0xABCD, 0x00FF]).unwrap();

    let mut back = [0u16; 4];
    writer.read_halfwords(REGION_A_ADDR, &mut back).unwrap();
    assert_eq!(back, [0x1234, 0xABCD, 0x00FF, 0xFFFF]);

    // Unaligned start reads across the halfword boundary.
    let mut odd = [0u16; 1];
    writer.read_halfwords(REGION_A_ADDR + 1, &mut odd).unwrap();
    assert_eq!(odd, [0xCD12]);
}

// ===== rejected requests =====

#[test]
fn test_misaligned_write_rejected_without_side_effects() {
    let mut flash = MemFlash::new();
    let mut scratch = SectorBuffer::new();
    let mut writer = FlashWriter::new(&mut flash, &mut scratch, make_region());
    assert_eq!(
        writer.write_bytes(REGION_A_ADDR + 2, &[0; 16]),
        Err(FlashError::Misaligned(REGION_A_ADDR + 2))
    );
    assert_eq!(flash.programs, 0);
    assert!(flash.erases.is_empty());
}

#[test]
fn test_write_past_region_rejected() {
    let region = make_region();
    let mut flash = MemFlash::new();
    let mut scratch = SectorBuffer::new();
    let mut writer = FlashWriter::new(&mut flash, &mut scratch, region);
    let addr = region.end() - 16;
    assert_eq!(
        writer.write_bytes(addr, &[0; 32]),
        Err(FlashError::OutOfRange(addr))
    );
    assert_eq!(
        writer.write_bytes(region.base - 16, &[0; 16]),
        Err(FlashError::OutOfRange(region.base - 16))
    );
    assert_eq!(flash.programs, 0);
}

// ===== region erase =====

#[test]
fn test_region_erase_covers_both_banks() {
    let mut flash = MemFlash::new();
    erase_region(&mut flash, &make_region()).unwrap();
    let banks: Vec<u8> = flash.erases.iter().map(|s| s.bank).collect();
    assert_eq!(banks, vec![0, 0, 0, 0, 1, 1]);
}
