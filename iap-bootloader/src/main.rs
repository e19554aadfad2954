// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! IAP bootloader for the STM32H503 with dual image regions and a framed
//! UART update mode.

#![no_std]
#![no_main]

mod peripherals;

use cortex_m_rt::entry;
use defmt_rtt as _;
use embedded_hal::delay::DelayNs;
use iap_common::hal::{CortexMHandoff, InternalFlash};
use iap_common::{
    BootStep, Bootloader, Console, Deframer, Dispatcher, EscapeWindow, ImageManager, Layout,
    SectorBuffer, SessionSettings,
};
use panic_probe as _;
use static_cell::StaticCell;

defmt::timestamp!("{=u32:ms}", peripherals::ticks());

/// Time between retries when there is nothing to boot.
const HALT_RETRY_MS: u32 = 1_000;

static SCRATCH: StaticCell<SectorBuffer> = StaticCell::new();
static DEFRAMER: StaticCell<Deframer> = StaticCell::new();

#[entry]
fn main() -> ! {
    defmt::println!("Bootloader init");

    let cp = cortex_m::Peripherals::take().unwrap();
    let mut p = match peripherals::init(cp.SYST) {
        Ok(p) => p,
        Err(e) => defmt::panic!("peripheral init failed: {}", e),
    };

    let scratch = SCRATCH.init_with(SectorBuffer::new);
    let deframer = DEFRAMER.init_with(|| Deframer::new(EscapeWindow::default()));

    let mut images = ImageManager::new(InternalFlash::new(p.flash), scratch, Layout::dual());
    match images.load() {
        Ok(true) => defmt::info!("config loaded"),
        Ok(false) => defmt::warn!("config initialised to defaults"),
        Err(e) => defmt::error!("config unavailable: {}", e),
    }

    let mut boot = Bootloader::new(
        images,
        &mut p.link,
        &p.clock,
        deframer,
        SessionSettings::default(),
    );
    Console::line(boot.link_mut(), format_args!("IAP bootloader"));
    let config = boot.get_config();
    Console::config(boot.link_mut(), &config);

    let mut platform = CortexMHandoff::new(peripherals::deinit);
    let mut dispatcher = Dispatcher::new();
    while !dispatcher.is_finished() {
        match dispatcher.step(&mut boot) {
            BootStep::Checked { update: true } => {
                Console::line(boot.link_mut(), format_args!("waiting for image"));
            }
            BootStep::Checked { update: false } => {}
            BootStep::Updated(result) => {
                Console::update_result(boot.link_mut(), &result);
            }
            BootStep::Handoff(entry) => {
                Console::handoff(boot.link_mut(), &entry);
                // Let the last line drain before the UART is torn down.
                peripherals::SysTickClock.delay_ms(10);
                platform.hand_off(entry);
            }
            BootStep::Halted(e) => {
                Console::halted(boot.link_mut(), &e);
            }
        }
    }

    // Nothing runnable: stay in update mode until an image arrives.
    loop {
        peripherals::SysTickClock.delay_ms(HALT_RETRY_MS);
        Console::line(boot.link_mut(), format_args!("waiting for image"));
        let result = boot.start_update();
        Console::update_result(boot.link_mut(), &result);
        if result.is_ok() {
            let e = boot.run_app(&mut platform);
            Console::halted(boot.link_mut(), &e);
        }
    }
}
