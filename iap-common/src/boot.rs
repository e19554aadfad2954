// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Boot dispatcher and the operations exposed to the menu layer.
//!
//! [`Bootloader`] bundles the image manager with the serial link and the
//! clock and offers `start_update`, `erase`, `run_app`, `get_config` and
//! `confirm_boot`. [`Dispatcher`] runs the power-on sequence on top of it:
//! decide whether to update, then hand control to the selected image.
//!
//! The jump itself goes through [`Platform`], so everything up to the
//! hand-off runs unchanged on the host.

use crate::config::{Config, ConfigError};
use crate::flash::{Flash, FlashError};
use crate::frame::Deframer;
use crate::image::{ImageManager, VectorTable};
use crate::layout::Slot;
use crate::log;
use crate::session::{Clock, SerialLink, Session, SessionSettings, UpdateError};

/// Everything the hand-off needs to start an image.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct EntryPoint {
    pub slot: Slot,
    /// Vector table address.
    pub base: u32,
    pub initial_sp: u32,
    pub reset_vector: u32,
}

/// Irreversible transfer of control to an application image.
pub trait Platform {
    fn hand_off(&mut self, entry: EntryPoint) -> !;
}

impl<P: Platform + ?Sized> Platform for &mut P {
    fn hand_off(&mut self, entry: EntryPoint) -> ! {
        (**self).hand_off(entry)
    }
}

/// Why the dispatcher could not reach an application.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum BootError {
    /// Neither candidate verified.
    NoBootableImage,
    Config(ConfigError),
    Flash(FlashError),
}

impl From<ConfigError> for BootError {
    fn from(e: ConfigError) -> Self {
        BootError::Config(e)
    }
}

impl From<FlashError> for BootError {
    fn from(e: FlashError) -> Self {
        BootError::Flash(e)
    }
}

pub struct Bootloader<'a, F: Flash, L: SerialLink, C: Clock> {
    images: ImageManager<'a, F>,
    link: L,
    clock: C,
    deframer: &'a mut Deframer,
    settings: SessionSettings,
    progress: u32,
}

impl<'a, F: Flash, L: SerialLink, C: Clock> Bootloader<'a, F, L, C> {
    /// `images` must already be loaded.
    pub fn new(
        images: ImageManager<'a, F>,
        link: L,
        clock: C,
        deframer: &'a mut Deframer,
        settings: SessionSettings,
    ) -> Self {
        Self {
            images,
            link,
            clock,
            deframer,
            settings,
            progress: 0,
        }
    }

    pub fn images(&self) -> &ImageManager<'a, F> {
        &self.images
    }

    pub fn images_mut(&mut self) -> &mut ImageManager<'a, F> {
        &mut self.images
    }

    pub fn link_mut(&mut self) -> &mut L {
        &mut self.link
    }

    pub fn settings(&self) -> &SessionSettings {
        &self.settings
    }

    pub fn get_config(&self) -> Config {
        *self.images.config()
    }

    /// Bytes committed by the last (or current) update session.
    pub fn get_progress(&self) -> u32 {
        self.progress
    }

    pub fn confirm_boot(&mut self) -> Result<(), ConfigError> {
        self.images.confirm_boot_success()
    }

    /// Erase the update target and forget its record. The active image is
    /// never touched.
    pub fn erase(&mut self) -> Result<(), UpdateError> {
        let target = self.images.select_update_target();
        log::info!("erasing slot {}", target.label());
        self.images
            .erase_image(target)
            .map_err(UpdateError::EraseFailed)?;
        self.images.discard_image(target)?;
        Ok(())
    }

    /// Receive and commit a new image.
    ///
    /// On any failure the record is left with `updating` cleared and the
    /// previous images untouched. Returns the image size.
    pub fn start_update(&mut self) -> Result<u32, UpdateError> {
        let target = self.images.select_update_target();
        self.progress = 0;
        self.images.update_start(target)?;

        let result = self.run_update(target);
        if let Err(_e) = result {
            log::error!("update failed: {}", _e);
            if let Err(_e) = self.images.update_failed() {
                log::error!("could not clear update flag: {}", _e);
            }
        }
        result
    }

    fn run_update(&mut self, target: Slot) -> Result<u32, UpdateError> {
        self.images
            .erase_image(target)
            .map_err(UpdateError::EraseFailed)?;

        let settings = self.settings;
        let mut writer = self.images.writer(target);
        let mut session = Session::new(&mut writer, &mut *self.deframer, settings);
        let outcome = session.run(&mut self.link, &self.clock);
        self.progress = session.progress();
        let size = outcome?;

        let base = self.images.layout().region(target).base;
        let vt = VectorTable::read(self.images.flash(), base).map_err(UpdateError::Flash)?;
        if !vt.is_plausible(&self.images.exec_region(target)) {
            log::warn!(
                "rejecting image: sp {=u32:#x}, reset {=u32:#x}",
                vt.initial_sp,
                vt.reset_vector
            );
            return Err(UpdateError::InvalidImage);
        }

        let crc = self
            .images
            .calculate_image_crc(base, size)
            .map_err(UpdateError::Flash)?;
        self.images.update_complete(target, size, crc)?;
        log::info!(
            "update complete: slot {}, {} bytes, crc {=u32:#x}",
            target.label(),
            size,
            crc
        );
        Ok(size)
    }

    /// Run boot selection and resolve the entry point of the chosen image.
    pub fn select_entry(&mut self) -> Result<EntryPoint, BootError> {
        let target = self
            .images
            .select_boot_image()?
            .ok_or(BootError::NoBootableImage)?;
        let vt = VectorTable::read(self.images.flash(), target.base)?;
        Ok(EntryPoint {
            slot: target.slot,
            base: target.base,
            initial_sp: vt.initial_sp,
            reset_vector: vt.reset_vector,
        })
    }

    /// Jump to the selected image. Only returns if there is nothing to run.
    pub fn run_app<P: Platform>(&mut self, platform: &mut P) -> BootError {
        match self.select_entry() {
            Ok(entry) => {
                log::info!("booting slot {} at {=u32:#x}", entry.slot.label(), entry.base);
                platform.hand_off(entry)
            }
            Err(e) => {
                log::error!("no image to run: {}", e);
                e
            }
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
enum Phase {
    Check,
    Update,
    Jump,
    Finished,
}

/// Observable result of one dispatcher step.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum BootStep {
    /// Config inspected; the next step updates or jumps.
    Checked { update: bool },
    /// An update session ran. Failures fall through to the jump.
    Updated(Result<u32, UpdateError>),
    /// Ready to hand off.
    Handoff(EntryPoint),
    /// Nothing to boot; the caller should stay reachable for an update.
    Halted(BootError),
}

/// Power-on sequence: `Check -> [Update] -> Jump`.
pub struct Dispatcher {
    phase: Phase,
}

impl Dispatcher {
    pub const fn new() -> Self {
        Self {
            phase: Phase::Check,
        }
    }

    pub fn is_finished(&self) -> bool {
        self.phase == Phase::Finished
    }

    /// Advance by one phase.
    pub fn step<F: Flash, L: SerialLink, C: Clock>(
        &mut self,
        boot: &mut Bootloader<'_, F, L, C>,
    ) -> BootStep {
        match self.phase {
            Phase::Check => {
                let requested = boot.images().config().update_request;
                let bootable = boot.images().has_bootable_image();
                let update = requested || !bootable;
                if update {
                    log::info!(
                        "entering update mode (requested: {}, bootable image: {})",
                        requested,
                        bootable
                    );
                }
                self.phase = if update { Phase::Update } else { Phase::Jump };
                BootStep::Checked { update }
            }
            Phase::Update => {
                self.phase = Phase::Jump;
                BootStep::Updated(boot.start_update())
            }
            Phase::Jump => {
                self.phase = Phase::Finished;
                match boot.select_entry() {
                    Ok(entry) => BootStep::Handoff(entry),
                    Err(e) => BootStep::Halted(e),
                }
            }
            Phase::Finished => BootStep::Halted(BootError::NoBootableImage),
        }
    }

    /// Run to the end. Hands off on success, otherwise returns why not.
    pub fn run<F: Flash, L: SerialLink, C: Clock, P: Platform>(
        &mut self,
        boot: &mut Bootloader<'_, F, L, C>,
        platform: &mut P,
    ) -> BootError {
        loop {
            match self.step(boot) {
                BootStep::Handoff(entry) => platform.hand_off(entry),
                BootStep::Halted(e) => return e,
                BootStep::Checked { .. } | BootStep::Updated(_) => {}
            }
        }
    }
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}
