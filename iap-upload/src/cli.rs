// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Command-line interface definitions.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use iap_common::EscapeWindow;

use crate::commands;
use crate::transport::Transport;

/// Command-line arguments.
#[derive(Parser)]
#[command(name = "iap-upload")]
#[command(about = "Firmware upload tool for the IAP bootloader")]
pub struct Cli {
    /// Serial port (e.g., /dev/ttyUSB0). Required by `upload`.
    #[arg(short, long)]
    pub port: Option<String>,

    /// Baud rate
    #[arg(short, long, default_value = "115200")]
    pub baud: u32,

    /// Leave the length and CRC fields unescaped (first protocol revision)
    #[arg(long)]
    pub legacy_escape: bool,

    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    pub fn escape_window(&self) -> EscapeWindow {
        if self.legacy_escape {
            EscapeWindow::Legacy
        } else {
            EscapeWindow::Sentinels
        }
    }
}

/// Available subcommands.
#[derive(Subcommand)]
pub enum Commands {
    /// Stream a firmware image to a device waiting in update mode
    Upload {
        /// Firmware binary file
        #[arg(value_name = "FILE")]
        file: PathBuf,

        /// Firmware bytes per frame
        #[arg(short, long, default_value_t = commands::DEFAULT_CHUNK)]
        chunk: usize,

        /// Resends of a frame before giving up
        #[arg(short, long, default_value = "3")]
        retries: u32,

        /// Wait for each status frame at most this long
        #[arg(long, default_value = "3000")]
        timeout_ms: u64,
    },

    /// Write the encoded wire stream to a file instead of a port
    Frame {
        /// Firmware binary file
        #[arg(value_name = "FILE")]
        file: PathBuf,

        /// Output file
        #[arg(short, long)]
        out: PathBuf,

        /// Firmware bytes per frame
        #[arg(short, long, default_value_t = commands::DEFAULT_CHUNK)]
        chunk: usize,
    },

    /// Print the size and CRC32 the bootloader will record for an image
    Crc {
        /// Firmware binary file
        #[arg(value_name = "FILE")]
        file: PathBuf,
    },
}

/// Execute the parsed CLI command.
pub fn run(cli: Cli) -> Result<()> {
    let window = cli.escape_window();

    match cli.command {
        Commands::Upload {
            file,
            chunk,
            retries,
            timeout_ms,
        } => {
            let port = cli.port.context("--port is required for upload")?;
            let mut transport = Transport::new(&port, cli.baud, window)?;
            commands::upload(&mut transport, &file, chunk, retries, timeout_ms)
        }
        Commands::Frame { file, out, chunk } => commands::frame(&file, &out, chunk, window),
        Commands::Crc { file } => commands::crc(&file),
    }
}
