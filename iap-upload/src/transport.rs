// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Serial transport layer for bootloader communication.

use anyhow::{bail, Context, Result};
use serialport::SerialPort;
use std::io::{Read, Write};
use std::time::{Duration, Instant};

use iap_common::frame::StatusResponse;
use iap_common::{Deframer, EscapeWindow, FrameEvent};

/// Timeout for a single blocking read.
const READ_SLICE_MS: u64 = 20;

/// What came back for one data frame.
#[derive(Debug)]
pub enum Reply {
    Status(StatusResponse),
    /// No status frame before the deadline.
    Timeout,
}

/// UART transport for communicating with the bootloader.
pub struct Transport {
    port: Box<dyn SerialPort>,
    window: EscapeWindow,
    deframer: Deframer,
    /// Bytes seen outside any frame (console lines).
    text: Vec<u8>,
}

impl Transport {
    pub fn new(port_name: &str, baud: u32, window: EscapeWindow) -> Result<Self> {
        let port = serialport::new(port_name, baud)
            .timeout(Duration::from_millis(READ_SLICE_MS))
            .open()
            .with_context(|| format!("Failed to open serial port {}", port_name))?;

        Ok(Self {
            port,
            window,
            deframer: Deframer::new(window),
            text: Vec::with_capacity(256),
        })
    }

    /// Get the port name.
    pub fn port_name(&self) -> String {
        self.port.name().unwrap_or_else(|| "?".to_string())
    }

    pub fn window(&self) -> EscapeWindow {
        self.window
    }

    pub fn send(&mut self, bytes: &[u8]) -> Result<()> {
        self.port
            .write_all(bytes)
            .map_err(|e| anyhow::anyhow!("Failed to write to serial port: {}", e))?;
        self.port.flush()?;
        Ok(())
    }

    /// Drop anything already queued (console banner, stale statuses).
    pub fn drain_rx(&mut self) {
        let mut buf = [0u8; 64];
        while self.port.read(&mut buf).unwrap_or(0) > 0 {}
        self.deframer.reset();
        self.text.clear();
    }

    fn read_some(&mut self, buf: &mut [u8]) -> Result<usize> {
        match self.port.read(buf) {
            Ok(n) => Ok(n),
            Err(e) if e.kind() == std::io::ErrorKind::TimedOut => Ok(0),
            Err(e) => bail!("Serial read error: {}", e),
        }
    }

    /// Wait for the next status frame.
    pub fn wait_status(&mut self, timeout: Duration) -> Result<Reply> {
        let deadline = Instant::now() + timeout;
        let mut buf = [0u8; 64];

        while Instant::now() < deadline {
            let n = self.read_some(&mut buf)?;
            for &byte in &buf[..n] {
                let was_idle = self.deframer.is_idle();
                match self.deframer.push(byte) {
                    Some(FrameEvent::Accepted) => {
                        if let Some(status) = StatusResponse::from_body(self.deframer.body()) {
                            return Ok(Reply::Status(status));
                        }
                    }
                    Some(FrameEvent::Rejected(_)) => {}
                    None if was_idle && self.deframer.is_idle() => self.text.push(byte),
                    None => {}
                }
            }
        }
        Ok(Reply::Timeout)
    }

    /// Collect console output until a line starting with `prefix` arrives.
    pub fn wait_line(&mut self, prefix: &str, timeout: Duration) -> Result<Option<String>> {
        let deadline = Instant::now() + timeout;
        let mut buf = [0u8; 64];

        loop {
            if let Some(line) = take_line(&mut self.text, prefix) {
                return Ok(Some(line));
            }
            if Instant::now() >= deadline {
                return Ok(None);
            }
            let n = self.read_some(&mut buf)?;
            self.text.extend_from_slice(&buf[..n]);
        }
    }
}

/// Remove complete lines from `text` up to and including the first one
/// that starts with `prefix`, and return that line.
pub fn take_line(text: &mut Vec<u8>, prefix: &str) -> Option<String> {
    let mut start = 0;
    while let Some(pos) = text[start..].iter().position(|&b| b == b'\n') {
        let end = start + pos;
        let line = String::from_utf8_lossy(&text[start..end])
            .trim_end_matches('\r')
            .to_string();
        if line.starts_with(prefix) {
            text.drain(..=end);
            return Some(line);
        }
        start = end + 1;
    }
    None
}
