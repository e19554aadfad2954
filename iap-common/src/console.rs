// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Human-readable status lines on the serial link.
//!
//! Purely cosmetic: send errors are dropped and a line that does not fit
//! the buffer is cut short.

use core::fmt::Write;

use heapless::String;

use crate::boot::{BootError, EntryPoint};
use crate::config::Config;
use crate::session::{SerialLink, UpdateError};

/// Longest status line.
pub const LINE_CAPACITY: usize = 96;

pub struct Console;

impl Console {
    /// Format and send one line, `\r\n` terminated.
    pub fn line<L: SerialLink>(link: &mut L, args: core::fmt::Arguments<'_>) {
        let mut buf: String<LINE_CAPACITY> = String::new();
        let _ = buf.write_fmt(args);
        let _ = link.send(buf.as_bytes());
        let _ = link.send(b"\r\n");
    }

    pub fn config<L: SerialLink>(link: &mut L, config: &Config) {
        Self::line(
            link,
            format_args!(
                "active={} updating={} boot_count={} request={}",
                config.active.label(),
                config.updating as u8,
                config.boot_count,
                config.update_request as u8
            ),
        );
        Self::line(
            link,
            format_args!(
                "A: {} bytes crc {:#010x}  B: {} bytes crc {:#010x}",
                config.image_a.size,
                config.image_a.crc,
                config.image_b.size,
                config.image_b.crc
            ),
        );
    }

    pub fn update_result<L: SerialLink>(link: &mut L, result: &Result<u32, UpdateError>) {
        match result {
            Ok(size) => Self::line(link, format_args!("=== update ok: {} bytes ===", size)),
            Err(e) => Self::line(
                link,
                format_args!("=== update failed ({}): {:?} ===", e.code(), e),
            ),
        }
    }

    pub fn handoff<L: SerialLink>(link: &mut L, entry: &EntryPoint) {
        Self::line(
            link,
            format_args!("jumping to slot {} at {:#010x}", entry.slot.label(), entry.base),
        );
    }

    pub fn halted<L: SerialLink>(link: &mut L, error: &BootError) {
        Self::line(link, format_args!("no bootable image: {:?}", error));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::{LinkError, RxEvent};

    struct Capture(std::vec::Vec<u8>);

    impl SerialLink for Capture {
        fn send(&mut self, bytes: &[u8]) -> Result<(), LinkError> {
            self.0.extend_from_slice(bytes);
            Ok(())
        }

        fn receive(&mut self, _buf: &mut [u8], _timeout_ms: u32) -> Result<RxEvent, LinkError> {
            Ok(RxEvent::Idle)
        }
    }

    #[test]
    fn test_update_result_line_carries_code() {
        let mut link = Capture(std::vec::Vec::new());
        Console::update_result(&mut link, &Err(UpdateError::NoData));
        assert_eq!(link.0, b"=== update failed (-3): NoData ===\r\n");
    }

    #[test]
    fn test_long_line_is_truncated() {
        let mut link = Capture(std::vec::Vec::new());
        Console::line(&mut link, format_args!("{:0>200}", 1));
        assert_eq!(link.0.len(), LINE_CAPACITY + 2);
    }
}
