// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Sample application image for the IAP bootloader.
//!
//! Confirms the boot so the bootloader does not roll back, then serves a
//! small command shell on USART1.

#![no_std]
#![no_main]

mod uart;

use core::fmt::Write;

use cortex_m_rt::entry;
use defmt_rtt as _;
use heapless::String;
use iap_common::hal::InternalFlash;
use iap_common::{app, config, Layout};
use panic_probe as _;
use uart::Shell;

defmt::timestamp!("{=u64:us}", { 0 });

/// Process a received command line. Returns true to reset the device.
fn process_command(
    line: &str,
    shell: &mut Shell,
    flash: &mut InternalFlash,
    layout: &Layout,
) -> bool {
    match line.trim() {
        "help" | "?" => {
            shell.write(b"Available commands:\r\n");
            shell.write(b"  help     - Show this help\r\n");
            shell.write(b"  status   - Show boot status\r\n");
            shell.write(b"  bootload - Reset into bootloader update mode\r\n");
            shell.write(b"  reboot   - Reset normally\r\n");
        }
        "status" => match config::read_record(
            &*flash,
            layout.config_addr,
            layout.max_image_size(),
        ) {
            Ok(cfg) => {
                let mut line: String<160> = String::new();
                let _ = write!(
                    line,
                    "Boot status:\r\n  Active: {}\r\n  Boot count: {}\r\n  A: {} bytes\r\n  B: {} bytes\r\n",
                    cfg.active.label(),
                    cfg.boot_count,
                    cfg.image_a.size,
                    cfg.image_b.size
                );
                shell.write(line.as_bytes());
            }
            Err(_) => shell.write(b"Config: invalid\r\n"),
        },
        "bootload" => match app::request_update(flash, layout) {
            Ok(()) => {
                shell.write(b"Rebooting to bootloader...\r\n");
                return true;
            }
            Err(e) => {
                defmt::error!("update request failed: {}", e);
                shell.write(b"Could not set update request\r\n");
            }
        },
        "reboot" => {
            shell.write(b"Rebooting...\r\n");
            return true;
        }
        "" => {}
        _ => shell.write(b"Unknown command. Type 'help' for available commands.\r\n"),
    }
    false
}

#[entry]
fn main() -> ! {
    defmt::println!("Firmware started!");

    let p = embassy_stm32::init(embassy_stm32::Config::default());
    let layout = Layout::dual();
    let mut flash = InternalFlash::new(p.FLASH);

    // Only the config sector is touched, outside any interrupt context.
    match cortex_m::interrupt::free(|_| app::confirm_boot(&mut flash, &layout)) {
        Ok(()) => defmt::println!("Boot confirmed"),
        Err(e) => defmt::println!("Config invalid, skipping confirmation: {}", e),
    }

    let mut shell = match Shell::new(p.USART1, p.PA10, p.PA9) {
        Ok(shell) => shell,
        Err(e) => defmt::panic!("uart init failed: {}", e),
    };
    shell.write(b"\r\nIAP sample firmware. Type 'help' for commands.\r\n");

    let mut cmd: String<64> = String::new();
    loop {
        let Some(byte) = shell.read_byte() else {
            continue;
        };
        match byte {
            b'\r' | b'\n' => {
                shell.write(b"\r\n");
                if !cmd.is_empty() {
                    if process_command(&cmd, &mut shell, &mut flash, &layout) {
                        shell.flush();
                        cortex_m::peripheral::SCB::sys_reset();
                    }
                    cmd.clear();
                }
            }
            0x7F | 0x08 => {
                if cmd.pop().is_some() {
                    shell.write(b"\x08 \x08");
                }
            }
            b if b.is_ascii_graphic() || b == b' ' => {
                if cmd.push(b as char).is_ok() {
                    shell.write(&[b]);
                }
            }
            _ => {}
        }
    }
}
