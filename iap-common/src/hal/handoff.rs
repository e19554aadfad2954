// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Jump from the bootloader into an application image.

use crate::boot::{EntryPoint, Platform};

const SYST_CSR: *mut u32 = 0xE000_E010 as *mut u32;
const SYST_RVR: *mut u32 = 0xE000_E014 as *mut u32;
const SYST_CVR: *mut u32 = 0xE000_E018 as *mut u32;
const NVIC_ICER: *mut u32 = 0xE000_E180 as *mut u32;
const NVIC_ICPR: *mut u32 = 0xE000_E280 as *mut u32;
const NVIC_WORDS: usize = 8;
const SCB_VTOR: *mut u32 = 0xE000_ED08 as *mut u32;

const ICACHE_CR: *mut u32 = 0x4003_0400 as *mut u32;
const ICACHE_CR_EN: u32 = 1 << 0;

/// Cortex-M33 hand-off. `deinit` returns every peripheral the bootloader
/// touched to its reset state; it runs with interrupts already masked.
pub struct CortexMHandoff {
    deinit: fn(),
}

impl CortexMHandoff {
    pub const fn new(deinit: fn()) -> Self {
        Self { deinit }
    }
}

impl Platform for CortexMHandoff {
    fn hand_off(&mut self, entry: EntryPoint) -> ! {
        cortex_m::interrupt::disable();
        (self.deinit)();
        unsafe {
            reset_systick();
            clear_nvic();
            relocate_vector_table(entry.base);
            disable_icache();
            jump_to_image(entry.initial_sp, entry.reset_vector)
        }
    }
}

unsafe fn reset_systick() {
    SYST_CSR.write_volatile(0);
    SYST_RVR.write_volatile(0);
    SYST_CVR.write_volatile(0);
}

unsafe fn clear_nvic() {
    for i in 0..NVIC_WORDS {
        NVIC_ICER.add(i).write_volatile(0xFFFF_FFFF);
        NVIC_ICPR.add(i).write_volatile(0xFFFF_FFFF);
    }
}

unsafe fn relocate_vector_table(base: u32) {
    SCB_VTOR.write_volatile(base);
    cortex_m::asm::dsb();
    cortex_m::asm::isb();
}

unsafe fn disable_icache() {
    ICACHE_CR.write_volatile(ICACHE_CR.read_volatile() & !ICACHE_CR_EN);
    cortex_m::asm::dsb();
    cortex_m::asm::isb();
}

unsafe fn jump_to_image(initial_sp: u32, reset_vector: u32) -> ! {
    core::arch::asm!(
        "msr msp, {sp}",
        "cpsie i",  // The application starts with PRIMASK cleared
        "bx {reset}",
        sp = in(reg) initial_sp,
        reset = in(reg) reset_vector,
        options(noreturn)
    );
}
