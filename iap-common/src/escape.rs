// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Byte stuffing for the `0x7E`-delimited wire frames.
//!
//! Inside the escaped window `0x7E` becomes `0x7A 0x55` and `0x7A` becomes
//! `0x7A 0xAA`, so the delimiter never appears between START and END.

#[cfg(feature = "std")]
use alloc::vec::Vec;

use heapless::Vec as HeaplessVec;

/// Frame delimiter (START and END).
pub const DELIMITER: u8 = 0x7E;
/// Escape introducer.
pub const ESCAPE: u8 = 0x7A;
/// Second byte of an escaped `0x7E`.
pub const ESCAPED_DELIMITER: u8 = 0x55;
/// Second byte of an escaped `0x7A`.
pub const ESCAPED_ESCAPE: u8 = 0xAA;

/// Number of verbatim bytes at each end of a frame in [`EscapeWindow::Legacy`].
pub const LEGACY_WINDOW: usize = 5;

/// Which positions of a frame are copied verbatim.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum EscapeWindow {
    /// Only the START byte and the END byte are verbatim. Length and CRC
    /// fields are escaped like the body.
    #[default]
    Sentinels,
    /// The first 5 bytes (START + length) and the last 5 bytes (CRC + END)
    /// are verbatim. Matches senders deployed with the first protocol
    /// revision; a length or CRC byte equal to `0x7E` breaks framing.
    Legacy,
}

impl EscapeWindow {
    /// Whether position `i` of a `len`-byte frame is outside the escaped window.
    pub fn is_verbatim(self, i: usize, len: usize) -> bool {
        match self {
            EscapeWindow::Sentinels => i == 0 || i + 1 >= len,
            EscapeWindow::Legacy => i < LEGACY_WINDOW || i >= len.saturating_sub(LEGACY_WINDOW),
        }
    }
}

/// Escape/unescape failures.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum EscapeError {
    /// `0x7A` followed by something other than `0x55`/`0xAA`.
    InvalidEscape(u8),
    /// `0x7A` as the last byte of the escaped window.
    TruncatedEscape,
    /// A bare `0x7E` inside the escaped window.
    UnexpectedDelimiter,
    /// Output does not fit.
    BufferTooSmall,
}

/// Streaming escaper writing into a caller buffer.
///
/// The total raw length must be known up front because the legacy window
/// is counted from the end of the frame.
pub struct Escaper<'a> {
    out: &'a mut [u8],
    written: usize,
    index: usize,
    raw_len: usize,
    window: EscapeWindow,
}

impl<'a> Escaper<'a> {
    pub fn new(out: &'a mut [u8], raw_len: usize, window: EscapeWindow) -> Self {
        Self {
            out,
            written: 0,
            index: 0,
            raw_len,
            window,
        }
    }

    /// Append one raw byte.
    pub fn push(&mut self, byte: u8) -> Result<(), EscapeError> {
        let verbatim = self.window.is_verbatim(self.index, self.raw_len);
        self.index += 1;
        match byte {
            _ if verbatim => self.put(byte),
            DELIMITER => {
                self.put(ESCAPE)?;
                self.put(ESCAPED_DELIMITER)
            }
            ESCAPE => {
                self.put(ESCAPE)?;
                self.put(ESCAPED_ESCAPE)
            }
            _ => self.put(byte),
        }
    }

    pub fn extend(&mut self, bytes: &[u8]) -> Result<(), EscapeError> {
        bytes.iter().try_for_each(|&b| self.push(b))
    }

    /// Bytes written to the output so far.
    pub fn written(&self) -> usize {
        self.written
    }

    fn put(&mut self, byte: u8) -> Result<(), EscapeError> {
        let slot = self
            .out
            .get_mut(self.written)
            .ok_or(EscapeError::BufferTooSmall)?;
        *slot = byte;
        self.written += 1;
        Ok(())
    }
}

/// Escape `raw` into `out`, returning the number of bytes written.
pub fn escape_into(raw: &[u8], window: EscapeWindow, out: &mut [u8]) -> Result<usize, EscapeError> {
    let mut escaper = Escaper::new(out, raw.len(), window);
    escaper.extend(raw)?;
    Ok(escaper.written())
}

/// Unescape `buf` in place, returning the decoded length.
///
/// The window is evaluated against the escaped length, so the verbatim head
/// and tail are found where the encoder left them.
pub fn unescape_in_place(buf: &mut [u8], window: EscapeWindow) -> Result<usize, EscapeError> {
    let len = buf.len();
    let mut read = 0;
    let mut write = 0;

    while read < len {
        let byte = buf[read];
        if window.is_verbatim(read, len) {
            buf[write] = byte;
            read += 1;
            write += 1;
            continue;
        }
        match byte {
            ESCAPE => {
                let next = read + 1;
                if next >= len || window.is_verbatim(next, len) {
                    return Err(EscapeError::TruncatedEscape);
                }
                buf[write] = match buf[next] {
                    ESCAPED_DELIMITER => DELIMITER,
                    ESCAPED_ESCAPE => ESCAPE,
                    other => return Err(EscapeError::InvalidEscape(other)),
                };
                read += 2;
            }
            DELIMITER if window == EscapeWindow::Sentinels => {
                return Err(EscapeError::UnexpectedDelimiter);
            }
            _ => {
                buf[write] = byte;
                read += 1;
            }
        }
        write += 1;
    }

    Ok(write)
}

/// Escape into a heapless Vec (for no_std).
pub fn escape_heapless<const N: usize>(
    raw: &[u8],
    window: EscapeWindow,
) -> Result<HeaplessVec<u8, N>, EscapeError> {
    let mut output: HeaplessVec<u8, N> = HeaplessVec::new();
    output
        .resize(N, 0)
        .map_err(|_| EscapeError::BufferTooSmall)?;
    let n = escape_into(raw, window, &mut output)?;
    output.truncate(n);
    Ok(output)
}

/// Unescape into a heapless Vec (for no_std).
pub fn unescape_heapless<const N: usize>(
    wire: &[u8],
    window: EscapeWindow,
) -> Result<HeaplessVec<u8, N>, EscapeError> {
    let mut output: HeaplessVec<u8, N> =
        HeaplessVec::from_slice(wire).map_err(|_| EscapeError::BufferTooSmall)?;
    let n = unescape_in_place(&mut output, window)?;
    output.truncate(n);
    Ok(output)
}

#[cfg(feature = "std")]
/// Escape into a Vec (for std).
pub fn escape(raw: &[u8], window: EscapeWindow) -> Vec<u8> {
    let mut output = Vec::with_capacity(raw.len() * 2);
    for (i, &byte) in raw.iter().enumerate() {
        match byte {
            _ if window.is_verbatim(i, raw.len()) => output.push(byte),
            DELIMITER => output.extend_from_slice(&[ESCAPE, ESCAPED_DELIMITER]),
            ESCAPE => output.extend_from_slice(&[ESCAPE, ESCAPED_ESCAPE]),
            _ => output.push(byte),
        }
    }
    output
}

#[cfg(feature = "std")]
/// Unescape into a Vec (for std).
pub fn unescape(wire: &[u8], window: EscapeWindow) -> Result<Vec<u8>, EscapeError> {
    let mut output = wire.to_vec();
    let n = unescape_in_place(&mut output, window)?;
    output.truncate(n);
    Ok(output)
}
