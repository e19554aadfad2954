// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Receive session and update flow, end to end over the in-memory flash.

mod common;

use common::{decode_statuses, make_data_frames, make_image, FakeClock, MemFlash, ScriptedLink};
use iap_common::boot::Bootloader;
use iap_common::crc32::crc32;
use iap_common::escape::EscapeWindow;
use iap_common::flash::{FlashError, SectorBuffer};
use iap_common::frame::{Deframer, StatusCode};
use iap_common::image::ImageManager;
use iap_common::layout::{Layout, Sector, Slot, REGION_A_ADDR, REGION_B_ADDR, REGION_SIZE};
use iap_common::session::{Session, SessionSettings, UpdateError};

const CHUNK: usize = 512;

fn make_link(frames: &[Vec<u8>]) -> ScriptedLink {
    let mut link = ScriptedLink::new();
    for frame in frames {
        link.chunk(frame).idle();
    }
    link.end_marker();
    link
}

// ===== session =====

#[test]
fn test_session_writes_image_and_acks_every_frame() {
    let image = make_image(REGION_B_ADDR, 3000 + 5);
    let frames = make_data_frames(&image, CHUNK, EscapeWindow::Sentinels);
    let mut link = make_link(&frames);
    let clock = FakeClock::new(1);

    let mut flash = MemFlash::new();
    let mut scratch = SectorBuffer::new();
    let mut deframer = Deframer::new(EscapeWindow::Sentinels);
    let mut images = ImageManager::new(&mut flash, &mut scratch, Layout::dual());
    images.load().unwrap();
    images.update_start(Slot::B).unwrap();
    images.erase_image(Slot::B).unwrap();

    let size = {
        let mut writer = images.writer(Slot::B);
        let mut session = Session::new(&mut writer, &mut deframer, SessionSettings::default());
        let result = session.run(&mut link, &clock);
        assert_eq!(session.progress(), image.len() as u32);
        result.unwrap()
    };
    assert_eq!(size, image.len() as u32);

    let crc = images.calculate_image_crc(REGION_B_ADDR, size).unwrap();
    assert_eq!(crc, crc32(&image));
    images.update_complete(Slot::B, size, crc).unwrap();
    let target = images.select_boot_image().unwrap().unwrap();
    assert_eq!(target.slot, Slot::B);
    assert_eq!(images.config().image_b.crc, crc32(&image));
    drop(images);

    assert_eq!(flash.slice(REGION_B_ADDR, image.len()), &image[..]);
    // Tail granule padded with the erased value.
    assert_eq!(flash.slice(REGION_B_ADDR + image.len() as u32, 11), &[0xFF; 11]);

    let statuses = decode_statuses(&link.sent, EscapeWindow::Sentinels);
    assert_eq!(statuses.len(), frames.len());
    for (i, status) in statuses.iter().enumerate() {
        assert_eq!(status.tag, (i as u32).to_le_bytes());
        assert_eq!(status.status, StatusCode::Ok);
    }
}

#[test]
fn test_rejected_frame_writes_nothing() {
    let image = make_image(REGION_B_ADDR, 64);
    let mut frames = make_data_frames(&image, CHUNK, EscapeWindow::Sentinels);
    frames[0][12] ^= 0x01;
    let mut link = make_link(&frames);
    let clock = FakeClock::new(1);

    let mut flash = MemFlash::new();
    let mut scratch = SectorBuffer::new();
    let mut deframer = Deframer::new(EscapeWindow::Sentinels);
    let result = {
        let region = Layout::dual().region_b;
        let mut writer = iap_common::flash::FlashWriter::new(&mut flash, &mut scratch, region);
        let mut session = Session::new(&mut writer, &mut deframer, SessionSettings::default());
        session.run(&mut link, &clock)
    };

    assert_eq!(result, Err(UpdateError::NoData));
    assert_eq!(flash.programs, 0);
    let statuses = decode_statuses(&link.sent, EscapeWindow::Sentinels);
    assert_eq!(statuses.len(), 1);
    assert_eq!(statuses[0].tag, [0, 0, 0, 0]);
    assert_eq!(statuses[0].status, StatusCode::Error);
}

#[test]
fn test_legacy_window_session() {
    let image = make_image(REGION_B_ADDR, 700);
    let frames = make_data_frames(&image, 100, EscapeWindow::Legacy);
    let mut link = make_link(&frames);
    let clock = FakeClock::new(1);
    let settings = SessionSettings {
        escape: EscapeWindow::Legacy,
        ..SessionSettings::default()
    };

    let mut flash = MemFlash::new();
    let mut scratch = SectorBuffer::new();
    let mut deframer = Deframer::new(EscapeWindow::Legacy);
    let region = Layout::dual().region_b;
    let mut writer = iap_common::flash::FlashWriter::new(&mut flash, &mut scratch, region);
    let mut session = Session::new(&mut writer, &mut deframer, settings);
    let result = session.run(&mut link, &clock);

    assert_eq!(result, Ok(700));
    drop(session);
    drop(writer);
    assert_eq!(flash.slice(REGION_B_ADDR, 700), &image[..]);
}

// ===== update flow =====

#[test]
fn test_duplicate_frame_acked_but_written_once() {
    let image = make_image(REGION_B_ADDR, 1500);
    let frames = make_data_frames(&image, CHUNK, EscapeWindow::Sentinels);
    // Ok status for frame 1 lost on the way back: the host sends it again.
    let stream = vec![
        frames[0].clone(),
        frames[1].clone(),
        frames[1].clone(),
        frames[2].clone(),
    ];

    let mut flash = MemFlash::new();
    let mut scratch = SectorBuffer::new();
    let mut deframer = Deframer::new(EscapeWindow::Sentinels);
    let mut boot = make_bootloader(&mut flash, &mut scratch, &mut deframer, make_link(&stream), 1);

    assert_eq!(boot.start_update(), Ok(1500));
    let config = boot.get_config();
    assert_eq!(config.image_b.size, 1500);
    assert_eq!(config.image_b.crc, crc32(&image));

    let statuses = decode_statuses(&boot.link_mut().sent, EscapeWindow::Sentinels);
    let tags: Vec<[u8; 4]> = statuses.iter().map(|s| s.tag).collect();
    assert_eq!(
        tags,
        vec![
            0u32.to_le_bytes(),
            1u32.to_le_bytes(),
            1u32.to_le_bytes(),
            2u32.to_le_bytes()
        ]
    );
    assert!(statuses.iter().all(|s| s.status == StatusCode::Ok));
    drop(boot);
    assert_eq!(flash.slice(REGION_B_ADDR, image.len()), &image[..]);
}

#[test]
fn test_end_marker_after_resend_with_lost_end() {
    let image = make_image(REGION_B_ADDR, 1000);
    let frames = make_data_frames(&image, CHUNK, EscapeWindow::Sentinels);
    let cut = frames[1][..frames[1].len() - 1].to_vec();

    let mut link = ScriptedLink::new();
    link.chunk(&frames[0]).idle();
    link.chunk(&cut).idle();
    link.chunk(&frames[1]).idle();
    link.end_marker();

    let mut flash = MemFlash::new();
    let mut scratch = SectorBuffer::new();
    let mut deframer = Deframer::new(EscapeWindow::Sentinels);
    let mut boot = make_bootloader(&mut flash, &mut scratch, &mut deframer, link, 1);

    assert_eq!(boot.start_update(), Ok(1000));
    assert_eq!(boot.get_config().image_b.crc, crc32(&image));
    let statuses = decode_statuses(&boot.link_mut().sent, EscapeWindow::Sentinels);
    assert_eq!(statuses.len(), 2);
    assert!(statuses.iter().all(|s| s.status == StatusCode::Ok));
}


fn make_bootloader<'a>(
    flash: &'a mut MemFlash,
    scratch: &'a mut SectorBuffer,
    deframer: &'a mut Deframer,
    link: ScriptedLink,
    clock_step: u32,
) -> Bootloader<'a, &'a mut MemFlash, ScriptedLink, FakeClock> {
    let mut images = ImageManager::new(flash, scratch, Layout::dual());
    images.load().unwrap();
    Bootloader::new(
        images,
        link,
        FakeClock::new(clock_step),
        deframer,
        SessionSettings::default(),
    )
}

#[test]
fn test_start_update_commits_new_image() {
    let image = make_image(REGION_B_ADDR, 4100);
    let frames = make_data_frames(&image, CHUNK, EscapeWindow::Sentinels);

    let mut flash = MemFlash::new();
    let mut scratch = SectorBuffer::new();
    let mut deframer = Deframer::new(EscapeWindow::Sentinels);
    let mut boot = make_bootloader(&mut flash, &mut scratch, &mut deframer, make_link(&frames), 1);

    assert_eq!(boot.start_update(), Ok(4100));
    assert_eq!(boot.get_progress(), 4100);
    let config = boot.get_config();
    assert_eq!(config.active, Slot::B);
    assert!(!config.updating);
    assert_eq!(config.boot_count, 0);
    assert_eq!(config.image_b.size, 4100);
    assert_eq!(config.image_b.crc, crc32(&image));

    let entry = boot.select_entry().unwrap();
    assert_eq!(entry.base, REGION_B_ADDR);
    assert_eq!(entry.reset_vector, REGION_B_ADDR + 0x201);
}

#[test]
fn test_retransmitted_frame_after_crc_error() {
    let image = make_image(REGION_B_ADDR, 1500);
    let frames = make_data_frames(&image, CHUNK, EscapeWindow::Sentinels);
    let mut bad = frames[1].clone();
    bad[12] ^= 0x80;
    let mut stream = vec![frames[0].clone(), bad];
    stream.extend(frames[1..].iter().cloned());

    let mut flash = MemFlash::new();
    let mut scratch = SectorBuffer::new();
    let mut deframer = Deframer::new(EscapeWindow::Sentinels);
    let mut boot = make_bootloader(&mut flash, &mut scratch, &mut deframer, make_link(&stream), 1);

    assert_eq!(boot.start_update(), Ok(1500));
    let statuses = decode_statuses(&boot.link_mut().sent, EscapeWindow::Sentinels);
    let codes: Vec<StatusCode> = statuses.iter().map(|s| s.status).collect();
    assert_eq!(
        codes,
        vec![StatusCode::Ok, StatusCode::Error, StatusCode::Ok, StatusCode::Ok]
    );
    assert_eq!(statuses[1].tag, 1u32.to_le_bytes());
    assert_eq!(boot.get_config().image_b.crc, crc32(&image));
}

#[test]
fn test_timeout_leaves_record_not_updating() {
    let mut flash = MemFlash::new();
    let mut scratch = SectorBuffer::new();
    let mut deframer = Deframer::new(EscapeWindow::Sentinels);
    let mut boot = make_bootloader(&mut flash, &mut scratch, &mut deframer, ScriptedLink::new(), 1000);

    let result = boot.start_update();
    assert_eq!(result, Err(UpdateError::Timeout { received: 0 }));
    assert_eq!(result.unwrap_err().code(), -2);
    assert!(!boot.get_config().updating);
    assert!(!boot.images().read_config().0.updating);
    assert_eq!(boot.get_config().active, Slot::A);
}

#[test]
fn test_partial_transfer_timeout_never_activates_target() {
    let image = make_image(REGION_B_ADDR, 2000);
    let frames = make_data_frames(&image, CHUNK, EscapeWindow::Sentinels);
    let mut link = ScriptedLink::new();
    link.chunk(&frames[0]).chunk(&frames[1]);

    let mut flash = MemFlash::new();
    let mut scratch = SectorBuffer::new();
    let mut deframer = Deframer::new(EscapeWindow::Sentinels);
    let mut boot = make_bootloader(&mut flash, &mut scratch, &mut deframer, link, 500);

    assert_eq!(
        boot.start_update(),
        Err(UpdateError::Timeout {
            received: 2 * CHUNK as u32
        })
    );
    let config = boot.get_config();
    assert!(!config.updating);
    assert_eq!(config.active, Slot::A);
    assert_eq!(config.image_b.size, 0);
}

#[test]
fn test_end_marker_without_data() {
    let mut link = ScriptedLink::new();
    link.idle().end_marker();
    let mut flash = MemFlash::new();
    let mut scratch = SectorBuffer::new();
    let mut deframer = Deframer::new(EscapeWindow::Sentinels);
    let mut boot = make_bootloader(&mut flash, &mut scratch, &mut deframer, link, 1);

    let result = boot.start_update();
    assert_eq!(result, Err(UpdateError::NoData));
    assert_eq!(result.unwrap_err().code(), -3);
    assert!(!boot.get_config().updating);
}

#[test]
fn test_implausible_image_rejected() {
    // Linked for region A but sent to region B.
    let image = make_image(REGION_A_ADDR, 600);
    let frames = make_data_frames(&image, CHUNK, EscapeWindow::Sentinels);
    let mut flash = MemFlash::new();
    let mut scratch = SectorBuffer::new();
    let mut deframer = Deframer::new(EscapeWindow::Sentinels);
    let mut boot = make_bootloader(&mut flash, &mut scratch, &mut deframer, make_link(&frames), 1);

    let result = boot.start_update();
    assert_eq!(result, Err(UpdateError::InvalidImage));
    assert_eq!(result.unwrap_err().code(), -4);
    let config = boot.get_config();
    assert!(!config.updating);
    assert_eq!(config.image_b.size, 0);
}

#[test]
fn test_oversized_image_rejected() {
    let image = make_image(REGION_B_ADDR, REGION_SIZE as usize + 1024);
    let frames = make_data_frames(&image, 1024, EscapeWindow::Sentinels);
    let mut flash = MemFlash::new();
    let mut scratch = SectorBuffer::new();
    let mut deframer = Deframer::new(EscapeWindow::Sentinels);
    let mut boot = make_bootloader(&mut flash, &mut scratch, &mut deframer, make_link(&frames), 1);

    let result = boot.start_update();
    assert_eq!(result, Err(UpdateError::ImageTooLarge));
    assert_eq!(result.unwrap_err().code(), -5);
    assert!(!boot.get_config().updating);
    assert_eq!(boot.get_progress(), REGION_SIZE);
}

#[test]
fn test_erase_failure_aborts_before_session() {
    let mut flash = MemFlash::new();
    let bad = Sector::containing(REGION_B_ADDR + 0x2000).unwrap();
    flash.fail_erase = Some(bad);
    let mut scratch = SectorBuffer::new();
    let mut deframer = Deframer::new(EscapeWindow::Sentinels);
    let mut link = ScriptedLink::new();
    link.end_marker();
    let mut boot = make_bootloader(&mut flash, &mut scratch, &mut deframer, link, 1);

    let result = boot.start_update();
    assert_eq!(result, Err(UpdateError::EraseFailed(FlashError::EraseFailed(bad))));
    assert_eq!(result.unwrap_err().code(), -1);
    assert!(!boot.get_config().updating);
    assert_eq!(boot.link_mut().remaining(), 1);
}

#[test]
fn test_erase_discards_standby_only() {
    let image = make_image(REGION_B_ADDR, 800);
    let frames = make_data_frames(&image, CHUNK, EscapeWindow::Sentinels);
    let factory = make_image(REGION_A_ADDR, 900);
    let mut flash = MemFlash::new();
    flash.load(REGION_A_ADDR, &factory);
    let mut scratch = SectorBuffer::new();
    let mut deframer = Deframer::new(EscapeWindow::Sentinels);
    let mut boot = make_bootloader(&mut flash, &mut scratch, &mut deframer, make_link(&frames), 1);
    assert_eq!(boot.get_config().image_a.size, 900);
    boot.start_update().unwrap();

    // B is now active, so erase hits A.
    boot.erase().unwrap();
    let config = boot.get_config();
    assert_eq!(config.active, Slot::B);
    assert_eq!(config.image_b.size, 800);
    assert_eq!(config.image_a.size, 0);
    drop(boot);
    assert_eq!(flash.slice(REGION_A_ADDR, 16), &[0xFF; 16]);
}
