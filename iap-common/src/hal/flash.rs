// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Embedded flash of the STM32H503 behind the embassy blocking driver.
//!
//! The driver takes offsets from the start of flash and programs in 16-byte
//! quad-words, which is the same granule the writer works in. Reads stay
//! plain memory-mapped copies.

use embassy_stm32::flash::{Blocking, Flash as FlashDriver};
use embassy_stm32::pac;
use embassy_stm32::peripherals::FLASH;

use crate::flash::{Flash, FlashError};
use crate::layout::{Sector, FLASH_BASE, FLASH_SIZE, PROGRAM_GRANULE, SECTOR_SIZE};

/// Memory-mapped internal flash.
pub struct InternalFlash {
    driver: FlashDriver<'static, Blocking>,
}

impl InternalFlash {
    pub fn new(flash: FLASH) -> Self {
        Self {
            driver: FlashDriver::new_blocking(flash),
        }
    }

    /// Code fetched from a sector that was just rewritten must not come
    /// from the instruction cache.
    fn invalidate_icache(&mut self) {
        pac::ICACHE.cr().modify(|w| w.set_cacheinv(true));
        while pac::ICACHE.sr().read().busyf() {
            core::hint::spin_loop();
        }
    }
}

fn offset(addr: u32) -> u32 {
    addr - FLASH_BASE
}

impl Flash for InternalFlash {
    fn read(&self, addr: u32, buf: &mut [u8]) -> Result<(), FlashError> {
        let end = addr as u64 + buf.len() as u64;
        if addr < FLASH_BASE || end > (FLASH_BASE + FLASH_SIZE) as u64 {
            return Err(FlashError::OutOfRange(addr));
        }
        for (i, byte) in buf.iter_mut().enumerate() {
            *byte = unsafe { ((addr + i as u32) as *const u8).read_volatile() };
        }
        Ok(())
    }

    fn erase(&mut self, sector: Sector) -> Result<(), FlashError> {
        let from = offset(sector.base_addr());
        let result = self.driver.blocking_erase(from, from + SECTOR_SIZE);
        self.invalidate_icache();
        result.map_err(|_| FlashError::EraseFailed(sector))
    }

    fn program(&mut self, addr: u32, data: &[u8; PROGRAM_GRANULE]) -> Result<(), FlashError> {
        if addr as usize % PROGRAM_GRANULE != 0 {
            return Err(FlashError::Misaligned(addr));
        }
        if addr < FLASH_BASE || addr + PROGRAM_GRANULE as u32 > FLASH_BASE + FLASH_SIZE {
            return Err(FlashError::OutOfRange(addr));
        }
        self.driver
            .blocking_write(offset(addr), data)
            .map_err(|_| FlashError::ProgramFailed(addr))
    }
}
