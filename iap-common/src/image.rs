// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Image and configuration management.
//!
//! [`ImageManager`] owns the flash capability, the configuration record
//! and the sector scratch buffer. Every state transition is written
//! through to the config sector before the call returns.

use crate::boot_fsm;
use crate::config::{self, Config, ConfigError};
use crate::crc32::Crc32Digest;
use crate::flash::{erase_region, program_padded, Flash, FlashError, FlashWriter, SectorBuffer};
use crate::layout::{
    is_valid_reset_vector, is_valid_stack_pointer, Layout, Region, Slot, Topology, ERASED_BYTE,
    SECTOR_SIZE,
};
use crate::log;

/// Chunk size used when streaming flash contents through the CRC.
const READ_CHUNK: usize = 256;

/// First two words of an image.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct VectorTable {
    pub initial_sp: u32,
    pub reset_vector: u32,
}

impl VectorTable {
    pub fn read<F: Flash>(flash: &F, base: u32) -> Result<Self, FlashError> {
        let mut words = [0u8; 8];
        flash.read(base, &mut words)?;
        Ok(Self {
            initial_sp: u32::from_le_bytes([words[0], words[1], words[2], words[3]]),
            reset_vector: u32::from_le_bytes([words[4], words[5], words[6], words[7]]),
        })
    }

    /// Stack pointer in RAM and reset vector inside the region the image
    /// executes from.
    pub fn is_plausible(&self, exec_region: &Region) -> bool {
        is_valid_stack_pointer(self.initial_sp) && is_valid_reset_vector(self.reset_vector, exec_region)
    }
}

/// Where to jump.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct BootTarget {
    pub slot: Slot,
    pub base: u32,
}

pub struct ImageManager<'a, F: Flash> {
    flash: F,
    scratch: &'a mut SectorBuffer,
    layout: Layout,
    config: Config,
}

impl<'a, F: Flash> ImageManager<'a, F> {
    /// The record is not read until [`ImageManager::load`] is called.
    pub fn new(flash: F, scratch: &'a mut SectorBuffer, layout: Layout) -> Self {
        Self {
            flash,
            scratch,
            layout,
            config: Config::default(),
        }
    }

    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    /// Current (persisted) record.
    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn flash(&self) -> &F {
        &self.flash
    }

    pub fn flash_mut(&mut self) -> &mut F {
        &mut self.flash
    }

    /// Read the record, initialising the sector if it is not valid.
    ///
    /// Returns whether a valid record was found.
    pub fn load(&mut self) -> Result<bool, ConfigError> {
        let (config, valid) = self.read_config();
        if valid {
            self.config = config;
        } else {
            log::warn!("config record invalid, initialising");
            self.init_config()?;
        }
        Ok(valid)
    }

    /// Read the stored record. Invalid records come back as defaults.
    pub fn read_config(&self) -> (Config, bool) {
        match config::read_record(&self.flash, self.layout.config_addr, self.layout.max_image_size()) {
            Ok(config) => (config, true),
            Err(_e) => {
                log::debug!("config read failed: {}", _e);
                (Config::default(), false)
            }
        }
    }

    /// Persist `config` and make it the current record.
    pub fn write_config(&mut self, config: &Config) -> Result<(), ConfigError> {
        config::write_record(&mut self.flash, self.layout.config_addr, config)?;
        self.config = *config;
        Ok(())
    }

    /// Write a default record, trusting any factory image already present.
    ///
    /// This also runs when a record write was cut between erase and
    /// program. Which slot was active is lost then: when both regions hold
    /// a plausible image, A becomes active and B stays recorded, so an A
    /// that never confirms its boot still rolls back to B.
    pub fn init_config(&mut self) -> Result<(), ConfigError> {
        let mut config = Config::default();
        let candidates: &[Slot] = match self.layout.topology {
            Topology::Dual => &[Slot::B, Slot::A],
            Topology::StagingRun => &[boot_fsm::RUN_SLOT],
        };
        for &slot in candidates {
            if let Some((size, crc)) = self.scan_factory_image(slot)? {
                log::info!("factory image in slot {}: {} bytes", slot.label(), size);
                config.set_image(slot, size, crc);
                config.active = slot;
            }
        }
        self.write_config(&config)
    }

    /// Estimate size and CRC of an image flashed without going through an
    /// update (plausible vector table, size up to the last non-`0xFF` byte).
    fn scan_factory_image(&self, slot: Slot) -> Result<Option<(u32, u32)>, FlashError> {
        let region = self.layout.region(slot);
        let vt = VectorTable::read(&self.flash, region.base)?;
        if !vt.is_plausible(&self.exec_region(slot)) {
            return Ok(None);
        }

        let mut end = region.end();
        let mut chunk = [0u8; READ_CHUNK];
        let size = loop {
            let start = end.saturating_sub(READ_CHUNK as u32).max(region.base);
            let buf = &mut chunk[..(end - start) as usize];
            self.flash.read(start, buf)?;
            if let Some(last) = buf.iter().rposition(|&b| b != ERASED_BYTE) {
                break start + last as u32 + 1 - region.base;
            }
            if start == region.base {
                return Ok(None);
            }
            end = start;
        };

        let crc = self.calculate_image_crc(region.base, size)?;
        Ok(Some((size, crc)))
    }

    /// CRC-32 over `size` bytes at `base`. Returns 0 for an empty or
    /// oversized image.
    pub fn calculate_image_crc(&self, base: u32, size: u32) -> Result<u32, FlashError> {
        if size == 0 || size > self.layout.max_image_size() {
            return Ok(0);
        }
        let mut digest = Crc32Digest::new();
        let mut chunk = [0u8; READ_CHUNK];
        let mut offset = 0;
        while offset < size {
            let n = (size - offset).min(READ_CHUNK as u32) as usize;
            self.flash.read(base + offset, &mut chunk[..n])?;
            digest.update(&chunk[..n]);
            offset += n as u32;
        }
        Ok(digest.finalize())
    }

    /// Region an image in `slot` is linked to execute from.
    pub fn exec_region(&self, slot: Slot) -> Region {
        match self.layout.topology {
            Topology::Dual => self.layout.region(slot),
            Topology::StagingRun => self.layout.region(boot_fsm::RUN_SLOT),
        }
    }

    /// Check the recorded image of `slot` against `config`: non-zero size,
    /// stack pointer inside RAM and matching CRC.
    ///
    /// This is the single gate every boot goes through, so image
    /// authentication would be added here.
    pub fn verify_image(&self, slot: Slot, config: &Config) -> bool {
        let record = config.image(slot);
        if record.size == 0 {
            return false;
        }
        let base = self.layout.region(slot).base;
        let sp_ok = VectorTable::read(&self.flash, base)
            .map(|vt| is_valid_stack_pointer(vt.initial_sp))
            .unwrap_or(false);
        if !sp_ok {
            return false;
        }
        match self.calculate_image_crc(base, record.size) {
            Ok(crc) if crc == record.crc => true,
            Ok(_crc) => {
                log::warn!(
                    "slot {} crc mismatch: expected {=u32:#x}, got {=u32:#x}",
                    slot.label(),
                    record.crc,
                    _crc
                );
                false
            }
            Err(_) => false,
        }
    }

    /// Whether [`ImageManager::select_boot_image`] would find something,
    /// without touching the stored record.
    pub fn has_bootable_image(&self) -> bool {
        let (_, chosen) = boot_fsm::select_boot_slot(&self.config, self.layout.topology, |slot, cfg| {
            self.verify_image(slot, cfg)
        });
        chosen.is_some()
    }

    /// Boot decision: recover an interrupted update, roll back after too
    /// many unconfirmed boots, then take the first slot that verifies.
    ///
    /// Each transition is persisted before the next one is evaluated.
    pub fn select_boot_image(&mut self) -> Result<Option<BootTarget>, ConfigError> {
        let topology = self.layout.topology;
        let mut config = self.config;

        if boot_fsm::recover_interrupted_update(&mut config, topology) {
            log::warn!(
                "interrupted update detected, discarding slot {}",
                boot_fsm::update_target(&config, topology).label()
            );
            self.write_config(&config)?;
        }

        if boot_fsm::needs_rollback(&config, topology) {
            boot_fsm::apply_rollback(&mut config);
            log::warn!(
                "boot attempts exhausted, rolling back to slot {}",
                config.active.label()
            );
            self.write_config(&config)?;
        }

        for slot in boot_fsm::boot_candidates(&config, topology) {
            if self.verify_image(slot, &config) {
                boot_fsm::record_boot_attempt(&mut config, slot);
                self.write_config(&config)?;
                return Ok(Some(BootTarget {
                    slot,
                    base: self.layout.region(slot).base,
                }));
            }
            log::info!("slot {} not bootable", slot.label());
        }

        Ok(None)
    }

    pub fn select_update_target(&self) -> Slot {
        boot_fsm::update_target(&self.config, self.layout.topology)
    }

    /// Mark an update as in progress. Must precede any erase of `target`.
    pub fn update_start(&mut self, target: Slot) -> Result<(), ConfigError> {
        log::info!("update start, target slot {}", target.label());
        let mut config = self.config;
        config.updating = true;
        config.update_request = false;
        self.write_config(&config)
    }

    /// Record the new image and make it the boot target.
    ///
    /// In the staging/run topology the staged image is first copied into
    /// the run region and checked there.
    pub fn update_complete(&mut self, target: Slot, size: u32, crc: u32) -> Result<(), ConfigError> {
        let mut config = self.config;
        config.set_image(target, size, crc);

        let boot_slot = match self.layout.topology {
            Topology::Dual => target,
            Topology::StagingRun => {
                let run = boot_fsm::RUN_SLOT;
                self.copy_region(self.layout.region(target), self.layout.region(run), size)?;
                let copied = self.calculate_image_crc(self.layout.region(run).base, size)?;
                if copied != crc {
                    return Err(ConfigError::VerifyFailed);
                }
                config.set_image(run, size, crc);
                run
            }
        };

        config.active = boot_slot;
        config.updating = false;
        config.boot_count = 0;
        self.write_config(&config)
    }

    /// Abandon an update. Both image records stay as they were.
    pub fn update_failed(&mut self) -> Result<(), ConfigError> {
        let mut config = self.config;
        config.updating = false;
        self.write_config(&config)
    }

    /// Called once the application is up. Idempotent.
    pub fn confirm_boot_success(&mut self) -> Result<(), ConfigError> {
        if self.config.boot_count == 0 {
            return Ok(());
        }
        let mut config = self.config;
        config.boot_count = 0;
        self.write_config(&config)
    }

    /// Ask the next boot to enter update mode.
    pub fn request_update(&mut self) -> Result<(), ConfigError> {
        let mut config = self.config;
        config.update_request = true;
        self.write_config(&config)
    }

    /// Forget the recorded image of `slot`.
    pub fn discard_image(&mut self, slot: Slot) -> Result<(), ConfigError> {
        if self.config.image(slot).size == 0 {
            return Ok(());
        }
        let mut config = self.config;
        config.clear_image(slot);
        self.write_config(&config)
    }

    /// Erase every sector of `slot`'s region, across both banks if needed.
    pub fn erase_image(&mut self, slot: Slot) -> Result<(), FlashError> {
        let region = self.layout.region(slot);
        erase_region(&mut self.flash, &region)
    }

    /// Writer confined to `slot`'s region.
    pub fn writer(&mut self, slot: Slot) -> FlashWriter<'_, F> {
        let region = self.layout.region(slot);
        FlashWriter::new(&mut self.flash, &mut *self.scratch, region)
    }

    /// Copy `size` bytes from `src` to `dst` one sector at a time through
    /// the scratch buffer.
    fn copy_region(&mut self, src: Region, dst: Region, size: u32) -> Result<(), FlashError> {
        if size > dst.size {
            return Err(FlashError::OutOfRange(dst.base));
        }
        erase_region(&mut self.flash, &dst)?;
        let mut offset = 0;
        while offset < size {
            let n = (size - offset).min(SECTOR_SIZE) as usize;
            let buf = &mut self.scratch.as_mut_slice()[..n];
            self.flash.read(src.base + offset, buf)?;
            let flash = &mut self.flash;
            let buf = &self.scratch.as_slice()[..n];
            critical_section::with(|_| program_padded(flash, dst.base + offset, buf))?;
            offset += n as u32;
        }
        Ok(())
    }
}
