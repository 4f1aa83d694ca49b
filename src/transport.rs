use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread,
    time::Duration,
};

use log::trace;
use rppal::{
    gpio::Gpio,
    uart::{Parity, Uart},
};

use crate::error::{CameraError, Result};

/** Line speed the VC0706 boots with. */
pub(crate) const BAUD_RATE: u32 = 38400;
/** Hard cap on the bytes collected by a single short read or drain. */
pub(crate) const CAMERA_BUFFER_LEN: usize = 100;
/** Default sleep between polls when no byte is waiting. */
pub(crate) const DEFAULT_POLL_QUANTUM: Duration = Duration::from_millis(200);
/** Consecutive empty polls after which a drain gives up. */
const DRAIN_IDLE_POLLS: u32 = 2;
/** Sleep used while waiting on data with no deadline. */
const WAIT_QUANTUM: Duration = Duration::from_millis(1);

/**
 * Byte level access to one serial line. Implemented for the Pi's UART and by
 * the scripted camera used in tests.
 */
pub(crate) trait SerialLink: Send {
    fn bytes_available(&mut self) -> Result<usize>;

    /**
     * Reads one byte if one is waiting. Never blocks.
     */
    fn read_byte(&mut self) -> Result<Option<u8>>;

    fn write_byte(&mut self, byte: u8) -> Result<()>;
}

/**
 * Source of the sleeps inside the poll loops. Tests swap in a pacer that only
 * adds up the requested time.
 */
pub(crate) trait Pacer: Send {
    fn pause(&mut self, duration: Duration);
}

pub(crate) struct ThreadPacer;

impl Pacer for ThreadPacer {
    fn pause(&mut self, duration: Duration) {
        thread::sleep(duration);
    }
}

impl SerialLink for Uart {
    fn bytes_available(&mut self) -> Result<usize> {
        Ok(self.input_len()?)
    }

    fn read_byte(&mut self) -> Result<Option<u8>> {
        let mut buffer = [0u8; 1];
        match self.read(&mut buffer)? {
            0 => Ok(None),
            _ => Ok(Some(buffer[0])),
        }
    }

    fn write_byte(&mut self, byte: u8) -> Result<()> {
        self.write(&[byte])?;
        Ok(())
    }
}

/**
 * Opens /dev/ttyAMA<interface> at the camera's baud rate in non-blocking read
 * mode and makes sure the GPIO peripheral is reachable.
 */
pub(crate) fn open_uart(interface_id: u8) -> Result<Uart> {
    let path = format!("/dev/ttyAMA{}", interface_id);
    let mut uart = Uart::with_path(&path, BAUD_RATE, Parity::None, 8, 1)
        .map_err(|source| CameraError::SerialOpen {
            path: path.clone(),
            source,
        })?;
    uart.set_read_mode(0, Duration::ZERO)?;
    uart.set_write_mode(true)?;

    // The serial pins are muxed through the GPIO block; bail out early if it
    // is not accessible rather than failing mid-capture.
    Gpio::new()?;

    Ok(uart)
}

/**
 * Owns one serial connection and implements the bounded busy-poll reads the
 * camera protocol is built on. Idle budgets are wall-clock durations measured
 * in poll quanta; the shared run flag aborts any loop early.
 */
pub(crate) struct Transport<L> {
    link: L,
    pacer: Box<dyn Pacer>,
    quantum: Duration,
    running: Arc<AtomicBool>,
}

impl<L: SerialLink> Transport<L> {
    pub(crate) fn new(
        link: L,
        pacer: Box<dyn Pacer>,
        quantum: Duration,
        running: Arc<AtomicBool>,
    ) -> Self {
        Self {
            link,
            pacer,
            quantum,
            running,
        }
    }

    pub(crate) fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }

    #[cfg(test)]
    pub(crate) fn link(&self) -> &L {
        &self.link
    }

    /**
     * Unbuffered single byte write.
     */
    pub(crate) fn write_byte(&mut self, byte: u8) -> Result<()> {
        self.link.write_byte(byte)
    }

    /**
     * Collects up to `max_bytes` (never more than CAMERA_BUFFER_LEN). Gives up
     * after `idle_quanta` poll quanta pass without a byte arriving. A short
     * result is not an error; callers check what they got.
     */
    pub(crate) fn read_with_timeout(&mut self, max_bytes: usize, idle_quanta: u32) -> Result<Vec<u8>> {
        let limit = max_bytes.min(CAMERA_BUFFER_LEN);
        let mut reply = Vec::with_capacity(limit);
        self._poll_read(limit, idle_quanta, |byte| reply.push(byte))?;
        Ok(reply)
    }

    /**
     * Same polling discipline as `read_with_timeout` but without the hard cap,
     * appending straight into `out`. Returns the number of bytes appended.
     */
    pub(crate) fn read_into(
        &mut self,
        out: &mut Vec<u8>,
        count: usize,
        idle_quanta: u32,
    ) -> Result<usize> {
        self._poll_read(count, idle_quanta, |byte| out.push(byte))
    }

    /**
     * Discards whatever is waiting on the line. Stops after CAMERA_BUFFER_LEN
     * bytes or a couple of empty polls, and never sleeps.
     */
    pub(crate) fn drain(&mut self) -> Result<usize> {
        let mut idle_polls = 0;
        let mut discarded = 0;
        while idle_polls < DRAIN_IDLE_POLLS && discarded < CAMERA_BUFFER_LEN {
            if self.link.bytes_available()? == 0 {
                idle_polls += 1;
                continue;
            }
            idle_polls = 0;
            if self.link.read_byte()?.is_some() {
                discarded += 1;
            }
        }
        if discarded > 0 {
            trace!("drained {} stray bytes", discarded);
        }
        Ok(discarded)
    }

    /**
     * Waits with no deadline until at least one byte is available. Only the
     * run flag can break this loop.
     */
    pub(crate) fn wait_for_data(&mut self) -> Result<()> {
        loop {
            if !self.is_running() {
                return Err(CameraError::Cancelled);
            }
            if self.link.bytes_available()? > 0 {
                return Ok(());
            }
            self.pacer.pause(WAIT_QUANTUM);
        }
    }

    pub(crate) fn read_byte_blocking(&mut self) -> Result<u8> {
        loop {
            self.wait_for_data()?;
            if let Some(byte) = self.link.read_byte()? {
                return Ok(byte);
            }
        }
    }

    pub(crate) fn pause(&mut self, duration: Duration) {
        self.pacer.pause(duration);
    }

    fn _poll_read(
        &mut self,
        limit: usize,
        idle_quanta: u32,
        mut sink: impl FnMut(u8),
    ) -> Result<usize> {
        let idle_budget = self.quantum * idle_quanta;
        let mut idle = Duration::ZERO;
        let mut received = 0;

        while received < limit && idle < idle_budget && self.is_running() {
            if self.link.bytes_available()? == 0 {
                self.pacer.pause(self.quantum);
                idle += self.quantum;
                continue;
            }
            if let Some(byte) = self.link.read_byte()? {
                sink(byte);
                received += 1;
                idle = Duration::ZERO;
            }
        }
        Ok(received)
    }
}
