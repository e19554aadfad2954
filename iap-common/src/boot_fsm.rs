// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Boot slot selection FSM - pure logic without hardware dependencies.
//!
//! These functions only transform a [`Config`]; reading images and
//! persisting the record is done by [`crate::image::ImageManager`], which
//! writes the record back after every transition that changes it.

use crate::config::Config;
use crate::layout::{Slot, Topology, MAX_BOOT_ATTEMPTS};

/// Slot that receives an update.
pub fn update_target(config: &Config, topology: Topology) -> Slot {
    match topology {
        Topology::Dual => config.active.other(),
        Topology::StagingRun => Slot::A,
    }
}

/// Slot that is booted in the staging/run topology.
pub const RUN_SLOT: Slot = Slot::B;

/// A previous update never completed: forget whatever was being written.
///
/// Returns true if the record changed.
pub fn recover_interrupted_update(config: &mut Config, topology: Topology) -> bool {
    if !config.updating {
        return false;
    }
    config.clear_image(update_target(config, topology));
    config.updating = false;
    config.boot_count = 0;
    true
}

/// Check if the active image has used up its boot attempts.
pub fn needs_rollback(config: &Config, topology: Topology) -> bool {
    topology == Topology::Dual && config.boot_count >= MAX_BOOT_ATTEMPTS
}

/// Fail over to the other slot.
pub fn apply_rollback(config: &mut Config) {
    config.active = config.active.other();
    config.boot_count = 0;
}

/// Slots to try, in priority order. Active first so a healthy image is
/// never abandoned for the standby one.
pub fn boot_candidates(config: &Config, topology: Topology) -> heapless::Vec<Slot, 2> {
    let mut out = heapless::Vec::new();
    match topology {
        Topology::Dual => {
            let _ = out.push(config.active);
            let _ = out.push(config.active.other());
        }
        Topology::StagingRun => {
            let _ = out.push(RUN_SLOT);
        }
    }
    out
}

/// Record a boot attempt of `slot`.
pub fn record_boot_attempt(config: &mut Config, slot: Slot) {
    config.active = slot;
    config.boot_count = config.boot_count.saturating_add(1).min(MAX_BOOT_ATTEMPTS);
}

/// Apply the transitions that happen before any image is verified.
///
/// Returns true if the record changed.
pub fn prepare_selection(config: &mut Config, topology: Topology) -> bool {
    let mut changed = recover_interrupted_update(config, topology);
    if needs_rollback(config, topology) {
        apply_rollback(config);
        changed = true;
    }
    changed
}

/// Run the whole selection on a copy of `config` with an external verifier.
///
/// Returns the updated record and the chosen slot. The record still needs
/// to be persisted by the caller.
pub fn select_boot_slot(
    config: &Config,
    topology: Topology,
    mut verify: impl FnMut(Slot, &Config) -> bool,
) -> (Config, Option<Slot>) {
    let mut next = *config;
    prepare_selection(&mut next, topology);
    let chosen = boot_candidates(&next, topology)
        .into_iter()
        .find(|&slot| verify(slot, &next));
    if let Some(slot) = chosen {
        record_boot_attempt(&mut next, slot);
    }
    (next, chosen)
}
