// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Log macros: `defmt` when the feature is enabled, no-ops otherwise.

#[cfg(feature = "defmt")]
pub(crate) use defmt::{debug, error, info, warn};

#[cfg(not(feature = "defmt"))]
mod noop {
    macro_rules! info {
        ( $( $x:expr ),* $(,)? ) => {{ $( let _ = &$x; )* }};
    }
    pub(crate) use info;
    macro_rules! debug {
        ( $( $x:expr ),* $(,)? ) => {{ $( let _ = &$x; )* }};
    }
    pub(crate) use debug;
    macro_rules! error {
        ( $( $x:expr ),* $(,)? ) => {{ $( let _ = &$x; )* }};
    }
    pub(crate) use error;
    macro_rules! warner {
        ( $( $x:expr ),* $(,)? ) => {{ $( let _ = &$x; )* }};
    }
    pub(crate) use warner as warn;
}

#[cfg(not(feature = "defmt"))]
pub(crate) use noop::{debug, error, info, warn};
