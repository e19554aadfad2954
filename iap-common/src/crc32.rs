// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! CRC-32 (zip/ethernet variant) used by the frame trailer, image
//! verification and the configuration record checksum.

use crc::{Crc, Digest, CRC_32_ISO_HDLC};

static CRC32: Crc<u32> = Crc::<u32>::new(&CRC_32_ISO_HDLC);

/// CRC-32 of `data` in one shot.
pub fn crc32(data: &[u8]) -> u32 {
    CRC32.checksum(data)
}

/// Incremental CRC-32 for data that arrives in pieces.
pub struct Crc32Digest {
    inner: Digest<'static, u32>,
}

impl Crc32Digest {
    pub fn new() -> Self {
        Self {
            inner: CRC32.digest(),
        }
    }

    pub fn update(&mut self, data: &[u8]) {
        self.inner.update(data);
    }

    pub fn finalize(self) -> u32 {
        self.inner.finalize()
    }
}

impl Default for Crc32Digest {
    fn default() -> Self {
        Self::new()
    }
}
