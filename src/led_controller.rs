use log::debug;
use rppal::gpio::{Gpio, Level, OutputPin};

use crate::error::Result;

/**
 * Camera flash. Turned on just before a frame is frozen and off again once the
 * freeze command has gone out.
 */
pub(crate) trait Flash: Send {
    fn set(&mut self, on: bool);
}

/**
 * Parallel output lines that broadcast the running photo count to whatever is
 * listening on the other side of the connector.
 */
pub(crate) trait PhotoCountBus: Send {
    fn write(&mut self, count: u8);
}

pub(crate) struct LedFlash {
    pin: OutputPin,
    lit: bool,
}

pub(crate) struct ParallelPhotoCount {
    pins: Vec<OutputPin>,
}

/**
 * Claims the flash pin as an output and makes sure the LED starts dark.
 */
pub(crate) fn start_led_flash(gpio: &Gpio, pin: u8) -> Result<LedFlash> {
    let mut flash = LedFlash {
        pin: gpio.get(pin)?.into_output(),
        lit: false,
    };
    flash.set(false);
    Ok(flash)
}

/**
 * Claims the photo count lines (least significant bit first) and zeroes them.
 */
pub(crate) fn start_photo_count(gpio: &Gpio, pins: &[u8]) -> Result<ParallelPhotoCount> {
    let mut outputs = Vec::with_capacity(pins.len());
    for pin in pins {
        outputs.push(gpio.get(*pin)?.into_output());
    }
    let mut bus = ParallelPhotoCount { pins: outputs };
    bus.write(0);
    Ok(bus)
}

impl Flash for LedFlash {
    fn set(&mut self, on: bool) {
        self.pin.write(if on { Level::High } else { Level::Low });
        self.lit = on;
    }
}

impl PhotoCountBus for ParallelPhotoCount {
    fn write(&mut self, count: u8) {
        let levels = count_levels(count, self.pins.len());
        for (pin, level) in self.pins.iter_mut().zip(levels) {
            pin.write(level);
        }
        debug!("photo count lines set to {:#010b}", count);
    }
}

impl Drop for LedFlash {
    fn drop(&mut self) {
        if self.lit {
            self.pin.set_low();
        }
    }
}

/** Bit `i` of `count` drives line `i`; bits past `width` are dropped. */
fn count_levels(count: u8, width: usize) -> Vec<Level> {
    (0..width)
        .map(|bit| {
            if bit < 8 && count & (1 << bit) != 0 {
                Level::High
            } else {
                Level::Low
            }
        })
        .collect()
}

/** Stand-in for outputs that are not wired up or could not be claimed. */
pub(crate) struct Unwired;

impl Flash for Unwired {
    fn set(&mut self, _on: bool) {}
}

impl PhotoCountBus for Unwired {
    fn write(&mut self, _count: u8) {}
}
