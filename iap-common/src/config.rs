// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Persisted boot/update record.
//!
//! The record is 32 bytes, little-endian, written as two quadwords at the
//! start of the config sector:
//!
//! | offset | size | field          |
//! |--------|------|----------------|
//! | 0      | 4    | magic          |
//! | 4      | 1    | active slot    |
//! | 5      | 1    | updating       |
//! | 6      | 1    | boot_count     |
//! | 7      | 1    | update_request |
//! | 8      | 4    | size_a         |
//! | 12     | 4    | crc_a          |
//! | 16     | 4    | size_b         |
//! | 20     | 4    | crc_b          |
//! | 24     | 4    | reserved (0xFF)|
//! | 28     | 4    | crc32 of 0..28 |

use crate::crc32::crc32;
use crate::flash::{program_padded, Flash, FlashError};
use crate::layout::{Sector, Slot, MAX_BOOT_ATTEMPTS};

/// Magic value marking an initialised record.
pub const CONFIG_MAGIC: u32 = 0x1A9C_0F16;

/// Serialized size of the record.
pub const CONFIG_RECORD_SIZE: usize = 32;

const CHECKED_LEN: usize = CONFIG_RECORD_SIZE - 4;

/// Why a stored record was not accepted, or could not be written.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ConfigError {
    /// Magic missing: sector never initialised or erased.
    BadMagic(u32),
    /// Record checksum mismatch (torn or corrupted write).
    BadChecksum,
    /// A field holds a value outside its range.
    InvalidField,
    /// Image copied into the run region does not match its CRC.
    VerifyFailed,
    Flash(FlashError),
}

impl From<FlashError> for ConfigError {
    fn from(e: FlashError) -> Self {
        ConfigError::Flash(e)
    }
}

/// Recorded size and CRC of one image slot. `size == 0` means no image.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ImageRecord {
    pub size: u32,
    pub crc: u32,
}

/// In-memory form of the persisted record.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Config {
    pub active: Slot,
    pub updating: bool,
    pub boot_count: u8,
    pub update_request: bool,
    pub image_a: ImageRecord,
    pub image_b: ImageRecord,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            active: Slot::A,
            updating: false,
            boot_count: 0,
            update_request: false,
            image_a: ImageRecord::default(),
            image_b: ImageRecord::default(),
        }
    }
}

impl Config {
    pub fn image(&self, slot: Slot) -> ImageRecord {
        match slot {
            Slot::A => self.image_a,
            Slot::B => self.image_b,
        }
    }

    pub fn set_image(&mut self, slot: Slot, size: u32, crc: u32) {
        let record = ImageRecord { size, crc };
        match slot {
            Slot::A => self.image_a = record,
            Slot::B => self.image_b = record,
        }
    }

    pub fn clear_image(&mut self, slot: Slot) {
        self.set_image(slot, 0, 0);
    }

    pub fn to_bytes(&self) -> [u8; CONFIG_RECORD_SIZE] {
        let mut out = [0xFFu8; CONFIG_RECORD_SIZE];
        out[0..4].copy_from_slice(&CONFIG_MAGIC.to_le_bytes());
        out[4] = self.active.index();
        out[5] = self.updating as u8;
        out[6] = self.boot_count;
        out[7] = self.update_request as u8;
        out[8..12].copy_from_slice(&self.image_a.size.to_le_bytes());
        out[12..16].copy_from_slice(&self.image_a.crc.to_le_bytes());
        out[16..20].copy_from_slice(&self.image_b.size.to_le_bytes());
        out[20..24].copy_from_slice(&self.image_b.crc.to_le_bytes());
        let crc = crc32(&out[..CHECKED_LEN]);
        out[CHECKED_LEN..].copy_from_slice(&crc.to_le_bytes());
        out
    }

    /// Parse and validate a stored record.
    ///
    /// `max_image_size` bounds the recorded sizes.
    pub fn from_bytes(
        bytes: &[u8; CONFIG_RECORD_SIZE],
        max_image_size: u32,
    ) -> Result<Self, ConfigError> {
        let word = |at: usize| u32::from_le_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]]);
        let flag = |b: u8| match b {
            0 => Ok(false),
            1 => Ok(true),
            _ => Err(ConfigError::InvalidField),
        };

        let magic = word(0);
        if magic != CONFIG_MAGIC {
            return Err(ConfigError::BadMagic(magic));
        }
        if word(CHECKED_LEN) != crc32(&bytes[..CHECKED_LEN]) {
            return Err(ConfigError::BadChecksum);
        }

        let active = Slot::from_index(bytes[4]).ok_or(ConfigError::InvalidField)?;
        let boot_count = bytes[6];
        if boot_count > MAX_BOOT_ATTEMPTS {
            return Err(ConfigError::InvalidField);
        }
        let image_a = ImageRecord {
            size: word(8),
            crc: word(12),
        };
        let image_b = ImageRecord {
            size: word(16),
            crc: word(20),
        };
        if image_a.size > max_image_size || image_b.size > max_image_size {
            return Err(ConfigError::InvalidField);
        }

        Ok(Self {
            active,
            updating: flag(bytes[5])?,
            boot_count,
            update_request: flag(bytes[7])?,
            image_a,
            image_b,
        })
    }
}

/// Read and validate the record stored at `addr`.
pub fn read_record<F: Flash>(flash: &F, addr: u32, max_image_size: u32) -> Result<Config, ConfigError> {
    let mut bytes = [0u8; CONFIG_RECORD_SIZE];
    flash.read(addr, &mut bytes)?;
    Config::from_bytes(&bytes, max_image_size)
}

/// Replace the record at `addr`: one sector erase followed by two quadword
/// programs, with interrupts masked so nothing reads the sector in between.
pub fn write_record<F: Flash>(flash: &mut F, addr: u32, config: &Config) -> Result<(), ConfigError> {
    let sector = Sector::containing(addr).ok_or(FlashError::OutOfRange(addr))?;
    let bytes = config.to_bytes();
    critical_section::with(|_| {
        flash.erase(sector)?;
        program_padded(flash, addr, &bytes)
    })?;
    Ok(())
}
