// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Receive session: drives the deframer from the serial link and commits
//! accepted firmware bytes through the [`FlashWriter`].
//!
//! The link delivers chunks of bytes terminated by a line-idle condition.
//! A chunk consisting of the single byte `0xFF` while no frame is open ends
//! the transfer. The whole session shares one wall-clock budget measured
//! from its start.

use crate::config::ConfigError;
use crate::escape::EscapeWindow;
use crate::flash::{Flash, FlashError, FlashWriter};
use crate::frame::{
    DataFrame, Deframer, FrameError, FrameEvent, FrameHeader, StatusCode, StatusResponse,
    DATA_HEADER_LEN, END_OF_TRANSFER, HEADER_LEN, MAX_STATUS_FRAME, TAG_LEN,
};
use crate::layout::PROGRAM_GRANULE;
use crate::log;

/// Default session budget.
pub const DEFAULT_SESSION_TIMEOUT_MS: u32 = 30_000;
/// Longest single wait on the link before the budget is re-checked.
pub const DEFAULT_POLL_MS: u32 = 100;
/// Receive chunk size.
pub const RX_CHUNK: usize = 256;

/// Serial link failures.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum LinkError {
    /// Bytes were lost because the receiver was not drained in time.
    Overrun,
    Hardware,
}

/// Result of one wait on the receive channel.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum RxEvent {
    /// `n` bytes were received, followed by line idle.
    Chunk(usize),
    /// Nothing arrived within the wait.
    Idle,
}

/// Byte transport to the host.
pub trait SerialLink {
    fn send(&mut self, bytes: &[u8]) -> Result<(), LinkError>;

    /// Wait at most `timeout_ms` for the next chunk and copy it into `buf`.
    fn receive(&mut self, buf: &mut [u8], timeout_ms: u32) -> Result<RxEvent, LinkError>;
}

impl<L: SerialLink + ?Sized> SerialLink for &mut L {
    fn send(&mut self, bytes: &[u8]) -> Result<(), LinkError> {
        (**self).send(bytes)
    }

    fn receive(&mut self, buf: &mut [u8], timeout_ms: u32) -> Result<RxEvent, LinkError> {
        (**self).receive(buf, timeout_ms)
    }
}

/// Millisecond tick.
pub trait Clock {
    fn now_ms(&self) -> u32;
}

impl<C: Clock + ?Sized> Clock for &C {
    fn now_ms(&self) -> u32 {
        (**self).now_ms()
    }
}

/// Tunables for one session.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SessionSettings {
    pub timeout_ms: u32,
    pub poll_ms: u32,
    pub escape: EscapeWindow,
    /// Header used for status frames.
    pub status_header: FrameHeader,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            timeout_ms: DEFAULT_SESSION_TIMEOUT_MS,
            poll_ms: DEFAULT_POLL_MS,
            escape: EscapeWindow::default(),
            status_header: FrameHeader::to_host(),
        }
    }
}

/// Why an update did not complete.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum UpdateError {
    /// Erasing the target region failed before the session started.
    EraseFailed(FlashError),
    Link(LinkError),
    /// Budget elapsed; `received` bytes had been committed.
    Timeout { received: u32 },
    /// End marker arrived before any firmware byte.
    NoData,
    /// Programming failed mid-session.
    Flash(FlashError),
    /// Image does not fit the target region.
    ImageTooLarge,
    /// Transfer completed but the image is not plausible.
    InvalidImage,
    Config(ConfigError),
}

impl UpdateError {
    /// Signed status code reported to the menu layer.
    pub fn code(&self) -> i8 {
        match self {
            UpdateError::EraseFailed(_)
            | UpdateError::Link(_)
            | UpdateError::Flash(_)
            | UpdateError::Config(_) => -1,
            UpdateError::Timeout { .. } => -2,
            UpdateError::NoData => -3,
            UpdateError::InvalidImage => -4,
            UpdateError::ImageTooLarge => -5,
        }
    }
}

impl From<LinkError> for UpdateError {
    fn from(e: LinkError) -> Self {
        UpdateError::Link(e)
    }
}

impl From<ConfigError> for UpdateError {
    fn from(e: ConfigError) -> Self {
        UpdateError::Config(e)
    }
}

impl From<FlashError> for UpdateError {
    fn from(e: FlashError) -> Self {
        match e {
            FlashError::OutOfRange(_) => UpdateError::ImageTooLarge,
            other => UpdateError::Flash(other),
        }
    }
}

/// One update attempt.
pub struct Session<'s, 'w, F: Flash> {
    writer: &'s mut FlashWriter<'w, F>,
    deframer: &'s mut Deframer,
    settings: SessionSettings,
    cursor: u32,
    received: u32,
    /// Tag of the last frame committed, so a resend is acknowledged
    /// without being written again.
    last_tag: Option<[u8; TAG_LEN]>,
    carry: [u8; PROGRAM_GRANULE],
    carry_len: usize,
}

impl<'s, 'w, F: Flash> Session<'s, 'w, F> {
    /// Writes start at the base of the writer's region.
    pub fn new(
        writer: &'s mut FlashWriter<'w, F>,
        deframer: &'s mut Deframer,
        settings: SessionSettings,
    ) -> Self {
        deframer.reset();
        let cursor = writer.region().base;
        Self {
            writer,
            deframer,
            settings,
            cursor,
            received: 0,
            last_tag: None,
            carry: [0; PROGRAM_GRANULE],
            carry_len: 0,
        }
    }

    /// Bytes committed to flash so far.
    pub fn progress(&self) -> u32 {
        self.received
    }

    /// Run until the end marker, a fatal error or the budget runs out.
    ///
    /// Returns the image length on success.
    pub fn run<L: SerialLink, C: Clock>(&mut self, link: &mut L, clock: &C) -> Result<u32, UpdateError> {
        let start = clock.now_ms();
        let mut rx = [0u8; RX_CHUNK];

        loop {
            let elapsed = clock.now_ms().wrapping_sub(start);
            if elapsed >= self.settings.timeout_ms {
                log::warn!("session timeout after {} bytes", self.received);
                return Err(UpdateError::Timeout {
                    received: self.received,
                });
            }
            let wait = (self.settings.timeout_ms - elapsed).min(self.settings.poll_ms);

            let n = match link.receive(&mut rx, wait)? {
                RxEvent::Idle => continue,
                RxEvent::Chunk(n) => n.min(RX_CHUNK),
            };
            let chunk = &rx[..n];

            // A lone START left over from a resend is not a frame yet.
            if chunk == [END_OF_TRANSFER] && !self.deframer.has_partial_frame() {
                self.deframer.reset();
                return self.finish();
            }

            for &byte in chunk {
                if let Some(event) = self.deframer.push(byte) {
                    self.handle(event, link)?;
                }
            }
        }
    }

    fn handle<L: SerialLink>(&mut self, event: FrameEvent, link: &mut L) -> Result<(), UpdateError> {
        let body = self.deframer.body();
        let frame = match event {
            FrameEvent::Accepted => DataFrame::parse(body),
            FrameEvent::Rejected(e) => Err(e),
        };

        let frame = match frame {
            Ok(frame) => frame,
            Err(_e) => {
                log::warn!("frame rejected: {}", _e);
                let tag = match event {
                    FrameEvent::Rejected(FrameError::CrcMismatch { .. }) => body
                        .get(HEADER_LEN..DATA_HEADER_LEN)
                        .and_then(|t| t.try_into().ok())
                        .unwrap_or([0; TAG_LEN]),
                    _ => [0; TAG_LEN],
                };
                return self.send_status(link, tag, StatusCode::Error);
            }
        };

        let tag = frame.tag;
        if self.last_tag == Some(tag) {
            log::warn!("duplicate frame, not written again");
            return self.send_status(link, tag, StatusCode::Ok);
        }

        // Copy out of the deframer so the writer can borrow `self`.
        let mut data = [0u8; crate::frame::MAX_PAYLOAD];
        let len = frame.firmware.len();
        data[..len].copy_from_slice(frame.firmware);

        if let Err(e) = self.commit(&data[..len]) {
            log::error!("flash write failed at {=u32:#x}: {}", self.cursor, e);
            self.send_status(link, tag, StatusCode::Error)?;
            return Err(e.into());
        }
        self.last_tag = Some(tag);
        self.send_status(link, tag, StatusCode::Ok)
    }

    /// Append firmware bytes, writing whole granules and carrying the rest.
    fn commit(&mut self, mut data: &[u8]) -> Result<(), FlashError> {
        if self.carry_len > 0 {
            let take = (PROGRAM_GRANULE - self.carry_len).min(data.len());
            self.carry[self.carry_len..self.carry_len + take].copy_from_slice(&data[..take]);
            self.carry_len += take;
            data = &data[take..];
            if self.carry_len < PROGRAM_GRANULE {
                return Ok(());
            }
            let carry = self.carry;
            self.write_at_cursor(&carry)?;
            self.carry_len = 0;
        }

        let whole = data.len() / PROGRAM_GRANULE * PROGRAM_GRANULE;
        if whole > 0 {
            self.write_at_cursor(&data[..whole])?;
        }

        let rest = &data[whole..];
        self.carry[..rest.len()].copy_from_slice(rest);
        self.carry_len = rest.len();
        Ok(())
    }

    fn write_at_cursor(&mut self, data: &[u8]) -> Result<(), FlashError> {
        self.writer.write_bytes(self.cursor, data)?;
        self.cursor += data.len() as u32;
        self.received += data.len() as u32;
        Ok(())
    }

    /// End marker received: flush the carried tail.
    fn finish(&mut self) -> Result<u32, UpdateError> {
        if self.carry_len > 0 {
            let len = self.carry_len;
            let carry = self.carry;
            self.write_at_cursor(&carry[..len])?;
            self.carry_len = 0;
        }
        if self.received == 0 {
            log::warn!("end marker without data");
            return Err(UpdateError::NoData);
        }
        log::info!("session complete: {} bytes", self.received);
        Ok(self.received)
    }

    fn send_status<L: SerialLink>(
        &mut self,
        link: &mut L,
        tag: [u8; TAG_LEN],
        status: StatusCode,
    ) -> Result<(), UpdateError> {
        let mut out = [0u8; MAX_STATUS_FRAME];
        let n = StatusResponse { tag, status }
            .encode(self.settings.status_header, self.settings.escape, &mut out)
            .map_err(|_| UpdateError::Link(LinkError::Hardware))?;
        link.send(&out[..n])?;
        Ok(())
    }
}
