// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! STM32H5 backend: the embassy flash driver behind [`Flash`]
//! and the Cortex-M hand-off behind [`Platform`].
//!
//! [`Flash`]: crate::flash::Flash
//! [`Platform`]: crate::boot::Platform

pub mod flash;
pub mod handoff;

pub use flash::InternalFlash;
pub use handoff::CortexMHandoff;
