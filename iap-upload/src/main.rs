// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Firmware upload tool for the IAP bootloader over a UART.
//!
//! Usage:
//!   iap-upload --port /dev/ttyUSB0 upload firmware.bin
//!   iap-upload --legacy-escape --port /dev/ttyUSB0 upload firmware.bin --chunk 256
//!   iap-upload frame firmware.bin --out firmware.frames
//!   iap-upload crc firmware.bin

mod cli;
mod commands;
mod transport;

use anyhow::Result;
use clap::Parser;

fn main() -> Result<()> {
    let args = cli::Cli::parse();
    cli::run(args)
}
