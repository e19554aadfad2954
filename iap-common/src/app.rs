// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Calls made by a running application image.
//!
//! These touch only the config sector, so no scratch buffer is needed.

use crate::config::{self, ConfigError};
use crate::flash::Flash;
use crate::layout::Layout;

/// Tell the bootloader this image came up. Clears the boot counter so no
/// rollback happens on the next reset. Idempotent.
pub fn confirm_boot<F: Flash>(flash: &mut F, layout: &Layout) -> Result<(), ConfigError> {
    let mut cfg = config::read_record(flash, layout.config_addr, layout.max_image_size())?;
    if cfg.boot_count == 0 {
        return Ok(());
    }
    cfg.boot_count = 0;
    config::write_record(flash, layout.config_addr, &cfg)
}

/// Enter update mode on the next reset.
pub fn request_update<F: Flash>(flash: &mut F, layout: &Layout) -> Result<(), ConfigError> {
    let mut cfg = config::read_record(flash, layout.config_addr, layout.max_image_size())?;
    cfg.update_request = true;
    config::write_record(flash, layout.config_addr, &cfg)
}
