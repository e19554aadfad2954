// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Sector-aware flash write path.
//!
//! [`Flash`] is the raw capability (read, erase one sector, program one
//! quadword). [`FlashWriter`] turns arbitrary aligned writes into the
//! erase-on-demand read-modify-write sequence the hardware needs.

use crate::layout::{Region, Sector, ERASED_BYTE, PROGRAM_GRANULE, SECTOR_SIZE};
use crate::log;

/// Flash driver errors.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum FlashError {
    /// Address not aligned to the 16-byte program granule.
    Misaligned(u32),
    /// Access outside flash or outside the managed region.
    OutOfRange(u32),
    /// The controller reported an error while erasing.
    EraseFailed(Sector),
    /// The controller reported an error while programming.
    ProgramFailed(u32),
    /// Programming a granule that is not in the erased state.
    NotErased(u32),
}

/// Raw flash capability.
///
/// `program` writes exactly one 16-byte granule at a 16-byte aligned
/// address that must currently be erased.
pub trait Flash {
    /// Copy `buf.len()` bytes starting at `addr`. No alignment requirement.
    fn read(&self, addr: u32, buf: &mut [u8]) -> Result<(), FlashError>;

    /// Erase one sector to `0xFF`.
    fn erase(&mut self, sector: Sector) -> Result<(), FlashError>;

    /// Program one quadword.
    fn program(&mut self, addr: u32, data: &[u8; PROGRAM_GRANULE]) -> Result<(), FlashError>;
}

impl<F: Flash + ?Sized> Flash for &mut F {
    fn read(&self, addr: u32, buf: &mut [u8]) -> Result<(), FlashError> {
        (**self).read(addr, buf)
    }

    fn erase(&mut self, sector: Sector) -> Result<(), FlashError> {
        (**self).erase(sector)
    }

    fn program(&mut self, addr: u32, data: &[u8; PROGRAM_GRANULE]) -> Result<(), FlashError> {
        (**self).program(addr, data)
    }
}

/// One sector worth of scratch space, aligned for quadword programming.
///
/// Meant to live in a `static` so its address is always inside mapped RAM.
#[repr(C, align(16))]
pub struct SectorBuffer {
    bytes: [u8; SECTOR_SIZE as usize],
}

impl SectorBuffer {
    pub const fn new() -> Self {
        Self {
            bytes: [ERASED_BYTE; SECTOR_SIZE as usize],
        }
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.bytes
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.bytes
    }
}

impl Default for SectorBuffer {
    fn default() -> Self {
        Self::new()
    }
}

/// Round `n` up to the next granule boundary.
pub fn granule_ceil(n: usize) -> usize {
    n.div_ceil(PROGRAM_GRANULE) * PROGRAM_GRANULE
}

fn is_erased(bytes: &[u8]) -> bool {
    bytes.iter().all(|&b| b == ERASED_BYTE)
}

/// Program `data` at `addr` without checking the target first.
///
/// The last partial granule is padded with `0xFF`.
pub fn program_padded<F: Flash>(flash: &mut F, addr: u32, data: &[u8]) -> Result<(), FlashError> {
    if addr as usize % PROGRAM_GRANULE != 0 {
        return Err(FlashError::Misaligned(addr));
    }
    for (i, chunk) in data.chunks(PROGRAM_GRANULE).enumerate() {
        let mut granule = [ERASED_BYTE; PROGRAM_GRANULE];
        granule[..chunk.len()].copy_from_slice(chunk);
        flash.program(addr + (i * PROGRAM_GRANULE) as u32, &granule)?;
    }
    Ok(())
}

/// Erase every sector of `region`. Sectors are addressed per bank, so a
/// region crossing the bank boundary is handled transparently.
///
/// Interrupts are masked for one sector at a time.
pub fn erase_region<F: Flash>(flash: &mut F, region: &Region) -> Result<(), FlashError> {
    for sector in region.sectors() {
        log::debug!("erase bank {} sector {}", sector.bank, sector.index);
        critical_section::with(|_| flash.erase(sector))?;
    }
    Ok(())
}

/// Erase-on-demand writer confined to one region.
pub struct FlashWriter<'a, F: Flash> {
    flash: &'a mut F,
    scratch: &'a mut SectorBuffer,
    region: Region,
}

impl<'a, F: Flash> FlashWriter<'a, F> {
    pub fn new(flash: &'a mut F, scratch: &'a mut SectorBuffer, region: Region) -> Self {
        Self {
            flash,
            scratch,
            region,
        }
    }

    pub fn region(&self) -> Region {
        self.region
    }

    /// Plain read, no synchronisation needed.
    pub fn read(&self, addr: u32, buf: &mut [u8]) -> Result<(), FlashError> {
        self.flash.read(addr, buf)
    }

    /// Read `halfwords.len()` little-endian halfwords starting at `addr`.
    /// Counterpart of [`FlashWriter::write`]; any alignment is accepted.
    pub fn read_halfwords(&self, addr: u32, halfwords: &mut [u16]) -> Result<(), FlashError> {
        let mut pair = [0u8; 2];
        for (i, hw) in halfwords.iter_mut().enumerate() {
            self.flash.read(addr + (i * 2) as u32, &mut pair)?;
            *hw = u16::from_le_bytes(pair);
        }
        Ok(())
    }

    /// Write halfwords (little-endian) starting at a granule-aligned address.
    pub fn write(&mut self, addr: u32, halfwords: &[u16]) -> Result<(), FlashError> {
        self.write_with(addr, halfwords.len() * 2, |i| {
            halfwords[i / 2].to_le_bytes()[i % 2]
        })
    }

    /// Write bytes starting at a granule-aligned address.
    pub fn write_bytes(&mut self, addr: u32, data: &[u8]) -> Result<(), FlashError> {
        self.write_with(addr, data.len(), |i| data[i])
    }

    fn write_with(
        &mut self,
        addr: u32,
        len: usize,
        byte_at: impl Fn(usize) -> u8,
    ) -> Result<(), FlashError> {
        if addr as usize % PROGRAM_GRANULE != 0 {
            return Err(FlashError::Misaligned(addr));
        }
        if !self.region.contains(addr, granule_ceil(len)) {
            return Err(FlashError::OutOfRange(addr));
        }

        let mut done = 0;
        while done < len {
            let cur = addr + done as u32;
            let sector = Sector::containing(cur).ok_or(FlashError::OutOfRange(cur))?;
            let base = sector.base_addr();
            let offset = (cur - base) as usize;
            let chunk = (len - done).min(SECTOR_SIZE as usize - offset);
            let span_end = granule_ceil(offset + chunk);

            let buf = &mut self.scratch.bytes;
            self.flash.read(base, buf)?;
            let needs_erase = !is_erased(&buf[offset..span_end]);

            // Merge into what is already there; bytes outside the target
            // span keep their current contents.
            for (i, slot) in buf[offset..offset + chunk].iter_mut().enumerate() {
                *slot = byte_at(done + i);
            }

            let flash = &mut *self.flash;
            let buf = &self.scratch.bytes;
            critical_section::with(|_| {
                let (start, end) = if needs_erase {
                    log::debug!("rmw erase sector {}", sector.number());
                    flash.erase(sector)?;
                    (0, SECTOR_SIZE as usize)
                } else {
                    (offset, span_end)
                };
                program_granules(flash, base, buf, start, end)
            })?;

            done += chunk;
        }

        Ok(())
    }
}

/// Program the non-erased granules of `buf[start..end]` at `base + start`.
fn program_granules<F: Flash>(
    flash: &mut F,
    base: u32,
    buf: &[u8],
    start: usize,
    end: usize,
) -> Result<(), FlashError> {
    for (i, chunk) in buf[start..end].chunks_exact(PROGRAM_GRANULE).enumerate() {
        if is_erased(chunk) {
            continue;
        }
        let addr = base + (start + i * PROGRAM_GRANULE) as u32;
        let granule: &[u8; PROGRAM_GRANULE] =
            chunk.try_into().map_err(|_| FlashError::Misaligned(addr))?;
        flash.program(addr, granule)?;
    }
    Ok(())
}
