// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Flash memory map of the STM32H503 (128KB flash, 32KB RAM).
//!
//! ```text
//! 0x0800_0000  bootloader      24KB  sectors 0-2   (bank 1)
//! 0x0800_6000  config record    8KB  sector  3     (bank 1)
//! 0x0800_8000  region A        48KB  sectors 4-9   (bank 1 + bank 2)
//! 0x0801_4000  region B        48KB  sectors 10-15 (bank 2)
//! ```
//!
//! In the staging/run topology region A is the staging area and region B
//! is the run area the application is linked for.

/// Flash base address.
pub const FLASH_BASE: u32 = 0x0800_0000;
/// Total flash size (128KB).
pub const FLASH_SIZE: u32 = 128 * 1024;
/// Erase sector size (8KB).
pub const SECTOR_SIZE: u32 = 8 * 1024;
/// Sectors per flash bank.
pub const SECTORS_PER_BANK: u8 = 8;
/// Number of flash banks.
pub const BANK_COUNT: u8 = 2;
/// Minimum program unit: one 128-bit quadword.
pub const PROGRAM_GRANULE: usize = 16;
/// Value of an erased flash byte.
pub const ERASED_BYTE: u8 = 0xFF;
/// Value of an erased flash halfword.
pub const ERASED_HALFWORD: u16 = 0xFFFF;

/// Bootloader region (24KB).
pub const BOOTLOADER_ADDR: u32 = 0x0800_0000;
pub const BOOTLOADER_SIZE: u32 = 24 * 1024;

/// Config sector (last sector of the bootloader area).
pub const CONFIG_ADDR: u32 = 0x0800_6000;

/// Image region A (48KB).
pub const REGION_A_ADDR: u32 = 0x0800_8000;
/// Image region B (48KB).
pub const REGION_B_ADDR: u32 = 0x0801_4000;
/// Size of each image region.
pub const REGION_SIZE: u32 = 48 * 1024;

/// RAM window an initial stack pointer must fall into.
pub const RAM_START: u32 = 0x2000_0000;
pub const RAM_END: u32 = 0x2000_8000;

/// Maximum number of unconfirmed boots before rolling back to the other image.
pub const MAX_BOOT_ATTEMPTS: u8 = 3;

/// One of the two image slots tracked by the configuration record.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Slot {
    A,
    B,
}

impl Slot {
    /// The slot that is not `self`.
    pub fn other(self) -> Self {
        match self {
            Slot::A => Slot::B,
            Slot::B => Slot::A,
        }
    }

    /// Index as stored in the configuration record.
    pub fn index(self) -> u8 {
        match self {
            Slot::A => 0,
            Slot::B => 1,
        }
    }

    pub fn from_index(index: u8) -> Option<Self> {
        match index {
            0 => Some(Slot::A),
            1 => Some(Slot::B),
            _ => None,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Slot::A => "A",
            Slot::B => "B",
        }
    }
}

/// A contiguous span of flash.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Region {
    pub base: u32,
    pub size: u32,
}

impl Region {
    pub const fn new(base: u32, size: u32) -> Self {
        Self { base, size }
    }

    /// First address past the region.
    pub fn end(&self) -> u32 {
        self.base + self.size
    }

    /// Whether `[addr, addr + len)` lies entirely inside the region.
    pub fn contains(&self, addr: u32, len: usize) -> bool {
        addr >= self.base
            && (addr as u64 + len as u64) <= self.end() as u64
    }

    /// Sectors covering the region, in address order.
    pub fn sectors(&self) -> impl Iterator<Item = Sector> {
        let first = (self.base - FLASH_BASE) / SECTOR_SIZE;
        let count = self.size.div_ceil(SECTOR_SIZE);
        (first..first + count).map(|n| Sector::from_number(n as u8))
    }
}

/// An erase sector, addressed the way the flash controller wants it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Sector {
    /// Flash bank (0 = bank 1, 1 = bank 2).
    pub bank: u8,
    /// Sector index within its bank.
    pub index: u8,
}

impl Sector {
    /// Sector from its global number (0..16).
    pub fn from_number(number: u8) -> Self {
        Self {
            bank: number / SECTORS_PER_BANK,
            index: number % SECTORS_PER_BANK,
        }
    }

    /// Sector containing `addr`, or `None` outside flash.
    pub fn containing(addr: u32) -> Option<Self> {
        if !(FLASH_BASE..FLASH_BASE + FLASH_SIZE).contains(&addr) {
            return None;
        }
        Some(Self::from_number(((addr - FLASH_BASE) / SECTOR_SIZE) as u8))
    }

    /// Global sector number.
    pub fn number(&self) -> u8 {
        self.bank * SECTORS_PER_BANK + self.index
    }

    /// Absolute address of the first byte of the sector.
    pub fn base_addr(&self) -> u32 {
        FLASH_BASE + self.number() as u32 * SECTOR_SIZE
    }
}

/// How the two image regions are used.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Topology {
    /// Symmetric A/B regions with an active pointer that swaps.
    Dual,
    /// Updates always land in staging (slot A) and are copied into run
    /// (slot B) once verified. Only the run region is ever booted.
    StagingRun,
}

/// Static description of where everything lives.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Layout {
    pub topology: Topology,
    pub config_addr: u32,
    pub region_a: Region,
    pub region_b: Region,
}

impl Layout {
    /// Symmetric A/B layout.
    pub const fn dual() -> Self {
        Self {
            topology: Topology::Dual,
            config_addr: CONFIG_ADDR,
            region_a: Region::new(REGION_A_ADDR, REGION_SIZE),
            region_b: Region::new(REGION_B_ADDR, REGION_SIZE),
        }
    }

    /// Staging/run layout (staging = region A, run = region B).
    pub const fn staging_run() -> Self {
        Self {
            topology: Topology::StagingRun,
            ..Self::dual()
        }
    }

    pub fn region(&self, slot: Slot) -> Region {
        match slot {
            Slot::A => self.region_a,
            Slot::B => self.region_b,
        }
    }

    /// Largest image either region can hold.
    pub fn max_image_size(&self) -> u32 {
        self.region_a.size.max(self.region_b.size)
    }

    pub fn config_sector(&self) -> Option<Sector> {
        Sector::containing(self.config_addr)
    }
}

impl Default for Layout {
    fn default() -> Self {
        Self::dual()
    }
}

/// Whether `sp` is a plausible initial stack pointer.
pub fn is_valid_stack_pointer(sp: u32) -> bool {
    (RAM_START..=RAM_END).contains(&sp)
}

/// Whether `addr` is a plausible reset vector inside `region` (Thumb bit set).
pub fn is_valid_reset_vector(addr: u32, region: &Region) -> bool {
    addr & 1 == 1 && region.contains(addr & !1, 2)
}
