// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Polled USART1 on PA9/PA10, 115200 8N1.

use embassy_stm32::mode::Blocking;
use embassy_stm32::peripherals::{PA10, PA9, USART1};
use embassy_stm32::usart::{self, Uart};

pub struct Shell {
    uart: Uart<'static, Blocking>,
}

impl Shell {
    pub fn new(usart: USART1, rx: PA10, tx: PA9) -> Result<Self, usart::ConfigError> {
        let mut config = usart::Config::default();
        config.baudrate = 115_200;
        let uart = Uart::new_blocking(usart, rx, tx, config)?;
        Ok(Self { uart })
    }

    pub fn write(&mut self, bytes: &[u8]) {
        // Console output is best effort.
        let _ = self.uart.blocking_write(bytes);
    }

    /// Wait for the last byte to leave the shift register.
    pub fn flush(&mut self) {
        let _ = self.uart.blocking_flush();
    }

    /// Next received byte, if any. Line errors drop the byte.
    pub fn read_byte(&mut self) -> Option<u8> {
        self.uart.nb_read().ok()
    }
}
