// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Core of the dual-region IAP bootloader.
//!
//! This crate supports both `no_std` (embedded) and `std` (host) environments:
//! - Default: `no_std` mode for embedded targets
//! - `std` feature: Enables `std` support for host tools (frame encoder into `Vec`)
//! - `embedded` feature: Enables the STM32H5 flash controller and hand-off backend
//! - `defmt` feature: Routes the internal log points to `defmt`
//!
//! Everything that decides something (boot selection, the update lifecycle,
//! the wire protocol, the sector writer) is written against the [`flash::Flash`],
//! [`session::SerialLink`] and [`boot::Platform`] traits so it can run on the
//! host against in-memory doubles.

#![cfg_attr(not(any(feature = "std", test)), no_std)]

#[cfg(feature = "std")]
extern crate alloc;

mod log;

pub mod app;
pub mod boot;
pub mod boot_fsm;
pub mod config;
pub mod console;
pub mod crc32;
pub mod escape;
pub mod flash;
pub mod frame;
pub mod image;
pub mod layout;
pub mod session;

// STM32H5 register-level backend (requires embedded feature)
#[cfg(feature = "embedded")]
pub mod hal;

// Re-export commonly used types
pub use boot::{BootError, BootStep, Bootloader, Dispatcher, EntryPoint, Platform};
pub use config::{Config, ConfigError, CONFIG_MAGIC, CONFIG_RECORD_SIZE};
pub use console::Console;
pub use crc32::{crc32, Crc32Digest};
pub use escape::{EscapeError, EscapeWindow};
pub use flash::{Flash, FlashError, FlashWriter, SectorBuffer};
pub use frame::{Deframer, FrameError, FrameEvent, FrameHeader, FrameParser, StatusCode};
pub use image::{BootTarget, ImageManager, VectorTable};
pub use layout::{Layout, Region, Sector, Slot, Topology, MAX_BOOT_ATTEMPTS};
pub use session::{Clock, LinkError, RxEvent, SerialLink, Session, SessionSettings, UpdateError};
