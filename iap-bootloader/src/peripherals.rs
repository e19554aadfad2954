// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Peripheral initialization for the bootloader: USART1 on PA9/PA10 and a
//! 1 ms SysTick. The core runs from HSI divided down to 32 MHz.

use core::sync::atomic::{AtomicU32, Ordering};

use cortex_m::peripheral::syst::SystClkSource;
use cortex_m::peripheral::SYST;
use cortex_m_rt::exception;
use embassy_stm32::mode::Blocking;
use embassy_stm32::rcc::{HSIPrescaler, Sysclk};
use embassy_stm32::usart::{self, Uart, UartRx, UartTx};
use embassy_stm32::{pac, peripherals::FLASH};
use iap_common::{Clock, LinkError, RxEvent, SerialLink};

pub const SYSCLK_HZ: u32 = 32_000_000;
pub const BAUD_RATE: u32 = 115_200;

/// Silence on the line that ends a received chunk.
const IDLE_GAP_MS: u32 = 2;

static TICKS: AtomicU32 = AtomicU32::new(0);

#[exception]
fn SysTick() {
    TICKS.fetch_add(1, Ordering::Relaxed);
}

/// Milliseconds since `init`.
pub fn ticks() -> u32 {
    TICKS.load(Ordering::Relaxed)
}

pub struct Peripherals {
    pub link: Usart1Link,
    pub clock: SysTickClock,
    pub flash: FLASH,
}

#[derive(Debug, defmt::Format)]
pub enum InitError {
    Uart(usart::ConfigError),
}

pub fn init(mut syst: SYST) -> Result<Peripherals, InitError> {
    let mut config = embassy_stm32::Config::default();
    config.rcc.hsi = Some(HSIPrescaler::DIV2);
    config.rcc.sys = Sysclk::HSI;
    let p = embassy_stm32::init(config);

    syst.set_clock_source(SystClkSource::Core);
    syst.set_reload(SYSCLK_HZ / 1_000 - 1);
    syst.clear_current();
    syst.enable_interrupt();
    syst.enable_counter();

    let mut uart_config = usart::Config::default();
    uart_config.baudrate = BAUD_RATE;
    let uart = Uart::new_blocking(p.USART1, p.PA10, p.PA9, uart_config).map_err(InitError::Uart)?;
    let (tx, rx) = uart.split();

    Ok(Peripherals {
        link: Usart1Link { tx, rx },
        clock: SysTickClock,
        flash: p.FLASH,
    })
}

/// Return USART1 and GPIOA to their reset state. Runs right before the
/// jump to an application, with interrupts masked.
pub fn deinit() {
    while !pac::USART1.isr().read().tc() {
        core::hint::spin_loop();
    }

    pac::RCC.apb2rstr().modify(|w| w.set_usart1rst(true));
    pac::RCC.apb2rstr().modify(|w| w.set_usart1rst(false));
    pac::RCC.ahb2rstr().modify(|w| w.set_gpioarst(true));
    pac::RCC.ahb2rstr().modify(|w| w.set_gpioarst(false));

    pac::RCC.apb2enr().modify(|w| w.set_usart1en(false));
    pac::RCC.ahb2enr().modify(|w| w.set_gpioaen(false));
}

/// Polled USART1. A chunk ends when the line stays quiet for
/// [`IDLE_GAP_MS`] or the buffer is full.
pub struct Usart1Link {
    tx: UartTx<'static, Blocking>,
    rx: UartRx<'static, Blocking>,
}

impl Usart1Link {
    fn take_byte(&mut self) -> Result<Option<u8>, LinkError> {
        match self.rx.nb_read() {
            Ok(b) => Ok(Some(b)),
            Err(nb::Error::WouldBlock) => Ok(None),
            Err(nb::Error::Other(usart::Error::Overrun)) => Err(LinkError::Overrun),
            Err(nb::Error::Other(_)) => Err(LinkError::Hardware),
        }
    }
}

impl SerialLink for Usart1Link {
    fn send(&mut self, bytes: &[u8]) -> Result<(), LinkError> {
        self.tx.blocking_write(bytes).map_err(|_| LinkError::Hardware)?;
        self.tx.blocking_flush().map_err(|_| LinkError::Hardware)
    }

    fn receive(&mut self, buf: &mut [u8], timeout_ms: u32) -> Result<RxEvent, LinkError> {
        if buf.is_empty() {
            return Ok(RxEvent::Idle);
        }

        let start = ticks();
        let first = loop {
            if let Some(b) = self.take_byte()? {
                break b;
            }
            if ticks().wrapping_sub(start) >= timeout_ms {
                return Ok(RxEvent::Idle);
            }
        };

        buf[0] = first;
        let mut n = 1;
        let mut last = ticks();
        while n < buf.len() {
            if let Some(b) = self.take_byte()? {
                buf[n] = b;
                n += 1;
                last = ticks();
                continue;
            }
            if ticks().wrapping_sub(last) >= IDLE_GAP_MS {
                break;
            }
        }
        Ok(RxEvent::Chunk(n))
    }
}

/// SysTick-backed millisecond clock.
pub struct SysTickClock;

impl Clock for SysTickClock {
    fn now_ms(&self) -> u32 {
        ticks()
    }
}

impl embedded_hal::delay::DelayNs for SysTickClock {
    fn delay_ns(&mut self, ns: u32) {
        let ms = ns.div_ceil(1_000_000);
        let start = ticks();
        while ticks().wrapping_sub(start) < ms {
            cortex_m::asm::nop();
        }
    }
}
