// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Host doubles shared by the integration tests.

#![allow(dead_code)]

use std::cell::Cell;
use std::collections::VecDeque;

use iap_common::boot::{EntryPoint, Platform};
use iap_common::escape::EscapeWindow;
use iap_common::flash::{Flash, FlashError};
use iap_common::frame::{
    encode_frame, Deframer, FrameEvent, FrameHeader, StatusResponse, END_OF_TRANSFER,
    MAX_WIRE_FRAME,
};
use iap_common::layout::{Sector, ERASED_BYTE, FLASH_BASE, FLASH_SIZE, PROGRAM_GRANULE, SECTOR_SIZE};
use iap_common::session::{Clock, LinkError, RxEvent, SerialLink};

// ===== Flash =====

/// In-memory 128KB flash. Programming a granule that is not erased fails,
/// like on the real part.
pub struct MemFlash {
    pub mem: Vec<u8>,
    pub erases: Vec<Sector>,
    pub programs: usize,
    /// Sector whose erase reports a failure.
    pub fail_erase: Option<Sector>,
}

impl MemFlash {
    pub fn new() -> Self {
        Self {
            mem: vec![ERASED_BYTE; FLASH_SIZE as usize],
            erases: Vec::new(),
            programs: 0,
            fail_erase: None,
        }
    }

    /// Place bytes directly, bypassing erase/program rules.
    pub fn load(&mut self, addr: u32, bytes: &[u8]) {
        let at = (addr - FLASH_BASE) as usize;
        self.mem[at..at + bytes.len()].copy_from_slice(bytes);
    }

    pub fn slice(&self, addr: u32, len: usize) -> &[u8] {
        let at = (addr - FLASH_BASE) as usize;
        &self.mem[at..at + len]
    }

    pub fn reset_counters(&mut self) {
        self.erases.clear();
        self.programs = 0;
    }

    fn offset(addr: u32, len: usize) -> Result<usize, FlashError> {
        if addr < FLASH_BASE || addr as u64 + len as u64 > (FLASH_BASE + FLASH_SIZE) as u64 {
            return Err(FlashError::OutOfRange(addr));
        }
        Ok((addr - FLASH_BASE) as usize)
    }
}

impl Flash for MemFlash {
    fn read(&self, addr: u32, buf: &mut [u8]) -> Result<(), FlashError> {
        let at = Self::offset(addr, buf.len())?;
        buf.copy_from_slice(&self.mem[at..at + buf.len()]);
        Ok(())
    }

    fn erase(&mut self, sector: Sector) -> Result<(), FlashError> {
        if self.fail_erase == Some(sector) {
            return Err(FlashError::EraseFailed(sector));
        }
        let at = Self::offset(sector.base_addr(), SECTOR_SIZE as usize)?;
        self.mem[at..at + SECTOR_SIZE as usize].fill(ERASED_BYTE);
        self.erases.push(sector);
        Ok(())
    }

    fn program(&mut self, addr: u32, data: &[u8; PROGRAM_GRANULE]) -> Result<(), FlashError> {
        if addr as usize % PROGRAM_GRANULE != 0 {
            return Err(FlashError::Misaligned(addr));
        }
        let at = Self::offset(addr, PROGRAM_GRANULE)?;
        let target = &mut self.mem[at..at + PROGRAM_GRANULE];
        if target.iter().any(|&b| b != ERASED_BYTE) {
            return Err(FlashError::NotErased(addr));
        }
        target.copy_from_slice(data);
        self.programs += 1;
        Ok(())
    }
}

// ===== Link and clock =====

/// Serial link replaying a script of receive events and capturing
/// everything sent.
pub struct ScriptedLink {
    script: VecDeque<Option<Vec<u8>>>,
    pub sent: Vec<u8>,
}

impl ScriptedLink {
    pub fn new() -> Self {
        Self {
            script: VecDeque::new(),
            sent: Vec::new(),
        }
    }

    /// Queue one received chunk.
    pub fn chunk(&mut self, bytes: &[u8]) -> &mut Self {
        self.script.push_back(Some(bytes.to_vec()));
        self
    }

    /// Queue one idle wait.
    pub fn idle(&mut self) -> &mut Self {
        self.script.push_back(None);
        self
    }

    pub fn end_marker(&mut self) -> &mut Self {
        self.chunk(&[END_OF_TRANSFER])
    }

    pub fn remaining(&self) -> usize {
        self.script.len()
    }
}

impl SerialLink for ScriptedLink {
    fn send(&mut self, bytes: &[u8]) -> Result<(), LinkError> {
        self.sent.extend_from_slice(bytes);
        Ok(())
    }

    fn receive(&mut self, buf: &mut [u8], _timeout_ms: u32) -> Result<RxEvent, LinkError> {
        match self.script.pop_front() {
            Some(Some(mut bytes)) => {
                if bytes.len() > buf.len() {
                    let rest = bytes.split_off(buf.len());
                    self.script.push_front(Some(rest));
                }
                buf[..bytes.len()].copy_from_slice(&bytes);
                Ok(RxEvent::Chunk(bytes.len()))
            }
            Some(None) | None => Ok(RxEvent::Idle),
        }
    }
}

/// Clock that moves forward by `step` every time it is read.
pub struct FakeClock {
    now: Cell<u32>,
    step: u32,
}

impl FakeClock {
    pub fn new(step: u32) -> Self {
        Self {
            now: Cell::new(0),
            step,
        }
    }

    pub fn elapsed(&self) -> u32 {
        self.now.get()
    }
}

impl Clock for FakeClock {
    fn now_ms(&self) -> u32 {
        let now = self.now.get();
        self.now.set(now.wrapping_add(self.step));
        now
    }
}

// ===== Platform =====

/// Hand-off that panics with the target, so tests can assert on it with
/// `#[should_panic(expected = ...)]`.
pub struct RecordingPlatform;

impl Platform for RecordingPlatform {
    fn hand_off(&mut self, entry: EntryPoint) -> ! {
        panic!("hand-off to {:#x} sp {:#x}", entry.base, entry.initial_sp);
    }
}

// ===== Images and streams =====

pub const TEST_SP: u32 = 0x2000_8000;

/// A plausible image linked at `base`: vector table then a byte pattern
/// that never ends in `0xFF`.
pub fn make_image(base: u32, len: usize) -> Vec<u8> {
    let mut image: Vec<u8> = (0..len).map(|i| (i * 7 + 3) as u8 % 0xF0).collect();
    image[0..4].copy_from_slice(&TEST_SP.to_le_bytes());
    image[4..8].copy_from_slice(&(base + 0x201).to_le_bytes());
    image
}

pub fn encode(header: FrameHeader, parts: &[&[u8]], window: EscapeWindow) -> Vec<u8> {
    let mut out = vec![0u8; MAX_WIRE_FRAME];
    let n = encode_frame(header, parts, window, &mut out).expect("frame fits");
    out.truncate(n);
    out
}

/// One data frame per `chunk` bytes of `image`, tagged with the frame index.
pub fn make_data_frames(image: &[u8], chunk: usize, window: EscapeWindow) -> Vec<Vec<u8>> {
    image
        .chunks(chunk)
        .enumerate()
        .map(|(i, part)| {
            let tag = (i as u32).to_le_bytes();
            encode(FrameHeader::to_device(), &[&tag, part], window)
        })
        .collect()
}

/// Decode every status frame in `wire`.
pub fn decode_statuses(wire: &[u8], window: EscapeWindow) -> Vec<StatusResponse> {
    let mut deframer = Deframer::new(window);
    let mut out = Vec::new();
    for &byte in wire {
        if let Some(FrameEvent::Accepted) = deframer.push(byte) {
            if let Some(status) = StatusResponse::from_body(deframer.body()) {
                out.push(status);
            }
        }
    }
    out
}
