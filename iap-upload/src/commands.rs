// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Command implementations for bootloader operations.

use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use crc::{Crc, CRC_32_ISO_HDLC};
use indicatif::{ProgressBar, ProgressStyle};

use iap_common::escape::{DELIMITER, LEGACY_WINDOW};
use iap_common::frame::{encode_frame_vec, DATA_HEADER_LEN, END_OF_TRANSFER, MAX_PAYLOAD, TAG_LEN};
use iap_common::{EscapeWindow, FrameHeader, StatusCode};

use crate::transport::{Reply, Transport};

const CRC32: Crc<u32> = Crc::<u32>::new(&CRC_32_ISO_HDLC);

/// Firmware bytes per frame unless overridden.
pub const DEFAULT_CHUNK: usize = 512;

/// How long the device may take to verify and record the image.
const FINISH_TIMEOUT: Duration = Duration::from_secs(10);

/// One encoded data frame and the tag it carries.
pub struct DataFrame {
    pub tag: [u8; TAG_LEN],
    /// Firmware bytes carried.
    pub len: usize,
    pub wire: Vec<u8>,
}

fn check_chunk(chunk: usize) -> Result<()> {
    if chunk == 0 || chunk > MAX_PAYLOAD {
        bail!("chunk size must be between 1 and {}", MAX_PAYLOAD);
    }
    Ok(())
}

/// Tag of frame `index`: the index in the low 24 bits, `salt` on top.
fn make_tag(index: usize, salt: u8) -> [u8; TAG_LEN] {
    ((index as u32 & 0x00FF_FFFF) | (salt as u32) << 24).to_le_bytes()
}

/// Whether the unescaped length and CRC fields of a legacy frame are free
/// of the delimiter. The device would close the frame early otherwise.
fn legacy_fields_clean(wire: &[u8]) -> bool {
    let n = wire.len();
    !wire[1..LEGACY_WINDOW].contains(&DELIMITER)
        && !wire[n - LEGACY_WINDOW..n - 1].contains(&DELIMITER)
}

/// Split an image into tagged data frames.
///
/// In legacy mode the length and CRC go out unescaped, so a frame is
/// shortened by one byte when its length would contain `0x7E`, and the
/// tag is salted until the CRC does not. Resends then repeat a frame that
/// can actually get through, with the same tag.
pub fn build_frames(firmware: &[u8], chunk: usize, window: EscapeWindow) -> Result<Vec<DataFrame>> {
    check_chunk(chunk)?;
    let mut frames = Vec::with_capacity(firmware.len().div_ceil(chunk));
    let mut offset = 0;

    while offset < firmware.len() {
        let index = frames.len();
        let mut len = chunk.min(firmware.len() - offset);
        if window == EscapeWindow::Legacy {
            while ((DATA_HEADER_LEN + len) as u32)
                .to_le_bytes()
                .contains(&DELIMITER)
            {
                len -= 1;
            }
        }
        let data = &firmware[offset..offset + len];

        let mut encoded = None;
        for salt in 0..=u8::MAX {
            let tag = make_tag(index, salt);
            let wire = encode_frame_vec(FrameHeader::to_device(), &[&tag, data], window)
                .map_err(|e| anyhow::anyhow!("Failed to encode frame {}: {:?}", index, e))?;
            if window == EscapeWindow::Sentinels || legacy_fields_clean(&wire) {
                encoded = Some(DataFrame { tag, len, wire });
                break;
            }
        }
        let frame = encoded
            .ok_or_else(|| anyhow::anyhow!("No legacy-safe encoding for frame {}", index))?;
        frames.push(frame);
        offset += len;
    }
    Ok(frames)
}

fn read_firmware(file: &Path) -> Result<Vec<u8>> {
    let firmware = fs::read(file).with_context(|| format!("Failed to read {}", file.display()))?;
    if firmware.is_empty() {
        bail!("{} is empty", file.display());
    }
    Ok(firmware)
}

/// Stream an image to the device, one frame per status.
pub fn upload(
    transport: &mut Transport,
    file: &Path,
    chunk: usize,
    retries: u32,
    timeout_ms: u64,
) -> Result<()> {
    let firmware = read_firmware(file)?;
    let frames = build_frames(&firmware, chunk, transport.window())?;
    let size = firmware.len() as u64;

    println!(
        "Firmware: {} ({} bytes, CRC32: 0x{:08x})",
        file.display(),
        size,
        CRC32.checksum(&firmware)
    );
    println!("Port:     {}", transport.port_name());
    println!("Frames:   {} x {} bytes", frames.len(), chunk);
    println!();

    transport.drain_rx();

    let pb = ProgressBar::new(size);
    pb.set_style(
        ProgressStyle::default_bar()
            .template(
                "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({eta})",
            )?
            .progress_chars("#>-"),
    );

    let timeout = Duration::from_millis(timeout_ms);
    let mut sent = 0u64;
    for (index, frame) in frames.iter().enumerate() {
        if let Err(e) = send_frame(transport, frame, retries, timeout) {
            pb.abandon();
            return Err(e.context(format!("frame {} (offset {})", index, sent)));
        }
        sent += frame.len as u64;
        pb.set_position(sent);
    }
    pb.finish_with_message("Upload complete");
    println!();

    // The end marker must arrive as its own chunk, after the line went idle.
    transport.send(&[END_OF_TRANSFER])?;
    match transport.wait_line("===", FINISH_TIMEOUT)? {
        Some(line) if line.contains("update ok") => {
            println!("{}", line);
            println!("Firmware uploaded successfully!");
            Ok(())
        }
        Some(line) => bail!("Device rejected the image: {}", line),
        None => bail!("No result from the device after the end marker"),
    }
}

fn send_frame(
    transport: &mut Transport,
    frame: &DataFrame,
    retries: u32,
    timeout: Duration,
) -> Result<()> {
    for attempt in 0..=retries {
        transport.send(&frame.wire)?;
        match transport.wait_status(timeout)? {
            Reply::Status(status) if status.tag == frame.tag => match status.status {
                StatusCode::Ok => return Ok(()),
                StatusCode::Error if is_final(attempt, retries) => {
                    bail!("device reported an error")
                }
                StatusCode::Error => {}
            },
            // Status for an earlier frame or a corrupted one; resend.
            Reply::Status(_) | Reply::Timeout if !is_final(attempt, retries) => {}
            Reply::Status(status) => bail!("unexpected status tag {:02x?}", status.tag),
            Reply::Timeout => bail!("timeout waiting for status"),
        }
    }
    bail!("no acknowledgement after {} attempts", retries + 1)
}

fn is_final(attempt: u32, retries: u32) -> bool {
    attempt == retries
}

/// Write the complete wire stream, end marker included, to a file.
pub fn frame(file: &Path, out: &Path, chunk: usize, window: EscapeWindow) -> Result<()> {
    let firmware = read_firmware(file)?;
    let frames = build_frames(&firmware, chunk, window)?;

    let mut stream: Vec<u8> = frames.iter().flat_map(|f| f.wire.iter().copied()).collect();
    stream.push(END_OF_TRANSFER);
    fs::write(out, &stream).with_context(|| format!("Failed to write {}", out.display()))?;

    println!(
        "{} frames, {} bytes written to {}",
        frames.len(),
        stream.len(),
        out.display()
    );
    Ok(())
}

/// Print what the bootloader will record for this image.
pub fn crc(file: &Path) -> Result<()> {
    let firmware = read_firmware(file)?;
    println!("size:  {} bytes", firmware.len());
    println!("crc32: 0x{:08x}", CRC32.checksum(&firmware));
    Ok(())
}
