// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Wire frames of the update protocol.
//!
//! ```text
//! 0x7E | len:u32 LE | version | receiver | sender | payload[len-3] | crc32:u32 LE | 0x7E
//! ```
//!
//! The CRC covers the four length bytes followed by the body. A data frame
//! carries `tag[4] | firmware...` as payload; the device answers each one
//! with a status frame whose payload is `tag[4] | status:u32 LE`.

#[cfg(feature = "std")]
use alloc::vec::Vec;

use heapless::Vec as HeaplessVec;

use crate::crc32::Crc32Digest;
use crate::escape::{self, EscapeError, EscapeWindow, Escaper, DELIMITER};
use crate::log;

/// Protocol version byte carried in every frame.
pub const PROTOCOL_VERSION: u8 = 0x01;
/// Address of the host (receiver of status frames).
pub const HOST_ADDRESS: u8 = 0x01;
/// Address of the bootloader.
pub const DEVICE_ADDRESS: u8 = 0x00;

/// Out-of-band end-of-transfer marker, sent alone outside any frame.
pub const END_OF_TRANSFER: u8 = 0xFF;

/// version + receiver + sender.
pub const HEADER_LEN: usize = 3;
/// Correlation tag echoed in status responses.
pub const TAG_LEN: usize = 4;
/// Body bytes in front of the firmware in a data frame.
pub const DATA_HEADER_LEN: usize = HEADER_LEN + TAG_LEN;
/// Largest firmware chunk accepted in one frame.
pub const MAX_PAYLOAD: usize = 1024;
/// Smallest and largest body the parser accepts.
pub const MIN_BODY_LEN: usize = HEADER_LEN;
pub const MAX_BODY_LEN: usize = DATA_HEADER_LEN + MAX_PAYLOAD;
/// START + length + CRC + END.
pub const FRAME_OVERHEAD: usize = 1 + 4 + 4 + 1;
/// A wire frame is never shorter than this.
pub const MIN_WIRE_FRAME: usize = FRAME_OVERHEAD + MIN_BODY_LEN;
/// Largest unescaped frame.
pub const MAX_RAW_FRAME: usize = FRAME_OVERHEAD + MAX_BODY_LEN;
/// Largest escaped frame (every interior byte doubled).
pub const MAX_WIRE_FRAME: usize = 2 + 2 * (MAX_RAW_FRAME - 2);
/// Status payload: tag + u32 status.
pub const STATUS_PAYLOAD_LEN: usize = TAG_LEN + 4;
/// Wire size of a status frame, escaped worst case.
pub const MAX_STATUS_FRAME: usize = 2 + 2 * (FRAME_OVERHEAD + HEADER_LEN + STATUS_PAYLOAD_LEN - 2);

/// Per-frame protocol errors. None of them end a session.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum FrameError {
    /// Declared body length outside `MIN_BODY_LEN..=MAX_BODY_LEN`.
    BadLength(u32),
    /// Trailer CRC does not match the recomputed one.
    CrcMismatch { received: u32, computed: u32 },
    /// Something other than `0x7E` after the CRC.
    MissingEnd,
    /// Frame closed before the declared length was reached.
    Truncated,
    /// Wire frame larger than the receive buffer.
    Overflow,
    /// Data frame body too short to hold the tag.
    ShortBody(usize),
    /// Byte stuffing was malformed.
    Escape(EscapeError),
}

impl From<EscapeError> for FrameError {
    fn from(e: EscapeError) -> Self {
        FrameError::Escape(e)
    }
}

/// The three addressing bytes at the start of every body.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct FrameHeader {
    pub version: u8,
    pub receiver: u8,
    pub sender: u8,
}

impl FrameHeader {
    pub const fn new(receiver: u8, sender: u8) -> Self {
        Self {
            version: PROTOCOL_VERSION,
            receiver,
            sender,
        }
    }

    /// Header of frames sent by the host to the bootloader.
    pub const fn to_device() -> Self {
        Self::new(DEVICE_ADDRESS, HOST_ADDRESS)
    }

    /// Header of status frames sent by the bootloader.
    pub const fn to_host() -> Self {
        Self::new(HOST_ADDRESS, DEVICE_ADDRESS)
    }

    fn to_bytes(self) -> [u8; HEADER_LEN] {
        [self.version, self.receiver, self.sender]
    }
}

/// Encode a frame whose payload is the concatenation of `parts`.
///
/// Returns the number of wire bytes written to `out`.
pub fn encode_frame(
    header: FrameHeader,
    parts: &[&[u8]],
    window: EscapeWindow,
    out: &mut [u8],
) -> Result<usize, FrameError> {
    let payload_len: usize = parts.iter().map(|p| p.len()).sum();
    let body_len = HEADER_LEN + payload_len;
    if body_len > MAX_BODY_LEN {
        return Err(FrameError::BadLength(body_len as u32));
    }

    let len_bytes = (body_len as u32).to_le_bytes();
    let head = header.to_bytes();

    let mut digest = Crc32Digest::new();
    digest.update(&len_bytes);
    digest.update(&head);
    for part in parts {
        digest.update(part);
    }
    let crc = digest.finalize().to_le_bytes();

    let mut escaper = Escaper::new(out, FRAME_OVERHEAD + body_len, window);
    escaper.push(DELIMITER)?;
    escaper.extend(&len_bytes)?;
    escaper.extend(&head)?;
    for part in parts {
        escaper.extend(part)?;
    }
    escaper.extend(&crc)?;
    escaper.push(DELIMITER)?;
    Ok(escaper.written())
}

#[cfg(feature = "std")]
/// Encode a frame into a Vec (for std).
pub fn encode_frame_vec(
    header: FrameHeader,
    parts: &[&[u8]],
    window: EscapeWindow,
) -> Result<Vec<u8>, FrameError> {
    let mut out = alloc::vec![0u8; MAX_WIRE_FRAME];
    let n = encode_frame(header, parts, window, &mut out)?;
    out.truncate(n);
    Ok(out)
}

/// Parser states, one per field of the frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ParseState {
    WaitStart,
    ReadLength,
    ReadBody,
    ReadCrc,
    WaitEnd,
}

/// Byte-at-a-time frame parser operating on unescaped bytes.
pub struct FrameParser {
    state: ParseState,
    field: [u8; 4],
    count: usize,
    declared: u32,
    received_crc: u32,
    body: HeaplessVec<u8, MAX_BODY_LEN>,
}

impl FrameParser {
    pub const fn new() -> Self {
        Self {
            state: ParseState::WaitStart,
            field: [0; 4],
            count: 0,
            declared: 0,
            received_crc: 0,
            body: HeaplessVec::new(),
        }
    }

    pub fn state(&self) -> ParseState {
        self.state
    }

    /// Body of the last accepted frame.
    pub fn body(&self) -> &[u8] {
        &self.body
    }

    pub fn reset(&mut self) {
        self.state = ParseState::WaitStart;
        self.count = 0;
    }

    /// Feed one byte. Returns `Some` when a frame has been accepted or
    /// rejected; the parser is back in `WaitStart` in both cases.
    pub fn push(&mut self, byte: u8) -> Option<Result<(), FrameError>> {
        match self.state {
            ParseState::WaitStart => {
                if byte == DELIMITER {
                    self.body.clear();
                    self.count = 0;
                    self.state = ParseState::ReadLength;
                }
                None
            }
            ParseState::ReadLength => {
                let len = self.take_field(byte)?;
                if !(MIN_BODY_LEN as u32..=MAX_BODY_LEN as u32).contains(&len) {
                    self.state = ParseState::WaitStart;
                    return Some(Err(FrameError::BadLength(len)));
                }
                self.declared = len;
                self.state = ParseState::ReadBody;
                None
            }
            ParseState::ReadBody => {
                // Capacity is guaranteed by the length check.
                let _ = self.body.push(byte);
                if self.body.len() == self.declared as usize {
                    self.state = ParseState::ReadCrc;
                }
                None
            }
            ParseState::ReadCrc => {
                self.received_crc = self.take_field(byte)?;
                self.state = ParseState::WaitEnd;
                None
            }
            ParseState::WaitEnd => {
                self.state = ParseState::WaitStart;
                if byte != DELIMITER {
                    return Some(Err(FrameError::MissingEnd));
                }
                let mut digest = Crc32Digest::new();
                digest.update(&self.declared.to_le_bytes());
                digest.update(&self.body);
                let computed = digest.finalize();
                if computed != self.received_crc {
                    log::warn!(
                        "frame crc mismatch: received {=u32:#x}, computed {=u32:#x}",
                        self.received_crc,
                        computed
                    );
                    return Some(Err(FrameError::CrcMismatch {
                        received: self.received_crc,
                        computed,
                    }));
                }
                Some(Ok(()))
            }
        }
    }

    /// Collect a 4-byte little-endian field.
    fn take_field(&mut self, byte: u8) -> Option<u32> {
        self.field[self.count] = byte;
        self.count += 1;
        if self.count < 4 {
            return None;
        }
        self.count = 0;
        Some(u32::from_le_bytes(self.field))
    }
}

impl Default for FrameParser {
    fn default() -> Self {
        Self::new()
    }
}

/// Outcome of one complete wire frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum FrameEvent {
    /// CRC and length check out; the body is available via [`Deframer::body`].
    Accepted,
    Rejected(FrameError),
}

/// Splits a raw byte stream into wire frames, unescapes them and runs
/// them through a [`FrameParser`].
pub struct Deframer {
    window: EscapeWindow,
    in_frame: bool,
    wire: HeaplessVec<u8, MAX_WIRE_FRAME>,
    parser: FrameParser,
}

impl Deframer {
    pub const fn new(window: EscapeWindow) -> Self {
        Self {
            window,
            in_frame: false,
            wire: HeaplessVec::new(),
            parser: FrameParser::new(),
        }
    }

    /// No frame is being collected.
    pub fn is_idle(&self) -> bool {
        !self.in_frame
    }

    /// Bytes beyond a START have been collected for the current frame.
    pub fn has_partial_frame(&self) -> bool {
        self.in_frame && self.wire.len() > 1
    }

    /// Body of the last accepted frame.
    pub fn body(&self) -> &[u8] {
        self.parser.body()
    }

    pub fn reset(&mut self) {
        self.in_frame = false;
        self.wire.clear();
        self.parser.reset();
    }

    /// Feed one received byte.
    pub fn push(&mut self, byte: u8) -> Option<FrameEvent> {
        if !self.in_frame {
            if byte == DELIMITER {
                self.start();
            }
            return None;
        }

        if byte == DELIMITER {
            if self.wire.len() + 1 >= MIN_WIRE_FRAME {
                let _ = self.wire.push(byte);
                return Some(self.finish());
            }
            if self.window == EscapeWindow::Sentinels {
                // Too short to be an END: treat it as the START of a new frame.
                self.start();
                return None;
            }
        }

        if self.wire.push(byte).is_err() {
            log::error!("frame buffer overflow");
            self.reset();
            return Some(FrameEvent::Rejected(FrameError::Overflow));
        }
        None
    }

    fn start(&mut self) {
        self.in_frame = true;
        self.wire.clear();
        let _ = self.wire.push(DELIMITER);
    }

    fn finish(&mut self) -> FrameEvent {
        self.in_frame = false;
        let decoded = match escape::unescape_in_place(&mut self.wire, self.window) {
            Ok(n) => n,
            Err(e) => return FrameEvent::Rejected(e.into()),
        };

        self.parser.reset();
        for &byte in &self.wire[..decoded] {
            if let Some(result) = self.parser.push(byte) {
                return match result {
                    Ok(()) => FrameEvent::Accepted,
                    Err(e) => FrameEvent::Rejected(e),
                };
            }
        }

        self.parser.reset();
        FrameEvent::Rejected(FrameError::Truncated)
    }
}

/// View of an accepted data frame body.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DataFrame<'a> {
    pub header: FrameHeader,
    pub tag: [u8; TAG_LEN],
    pub firmware: &'a [u8],
}

impl<'a> DataFrame<'a> {
    pub fn parse(body: &'a [u8]) -> Result<Self, FrameError> {
        if body.len() < DATA_HEADER_LEN {
            return Err(FrameError::ShortBody(body.len()));
        }
        let mut tag = [0u8; TAG_LEN];
        tag.copy_from_slice(&body[HEADER_LEN..DATA_HEADER_LEN]);
        Ok(Self {
            header: FrameHeader {
                version: body[0],
                receiver: body[1],
                sender: body[2],
            },
            tag,
            firmware: &body[DATA_HEADER_LEN..],
        })
    }
}

/// Status code carried in a status response.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u32)]
pub enum StatusCode {
    Ok = 0,
    Error = 1,
}

/// Per-frame acknowledgement sent back to the host.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct StatusResponse {
    pub tag: [u8; TAG_LEN],
    pub status: StatusCode,
}

impl StatusResponse {
    pub fn to_payload(&self) -> [u8; STATUS_PAYLOAD_LEN] {
        let mut out = [0u8; STATUS_PAYLOAD_LEN];
        out[..TAG_LEN].copy_from_slice(&self.tag);
        out[TAG_LEN..].copy_from_slice(&(self.status as u32).to_le_bytes());
        out
    }

    /// Decode from an accepted frame body (header included).
    pub fn from_body(body: &[u8]) -> Option<Self> {
        let payload = body.get(HEADER_LEN..)?;
        if payload.len() != STATUS_PAYLOAD_LEN {
            return None;
        }
        let mut tag = [0u8; TAG_LEN];
        tag.copy_from_slice(&payload[..TAG_LEN]);
        let mut word = [0u8; 4];
        word.copy_from_slice(&payload[TAG_LEN..]);
        let status = match u32::from_le_bytes(word) {
            0 => StatusCode::Ok,
            _ => StatusCode::Error,
        };
        Some(Self { tag, status })
    }

    /// Encode as a complete wire frame.
    pub fn encode(
        &self,
        header: FrameHeader,
        window: EscapeWindow,
        out: &mut [u8],
    ) -> Result<usize, FrameError> {
        encode_frame(header, &[&self.to_payload()], window, out)
    }
}
