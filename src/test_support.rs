//! Fakes shared by the unit tests: a scripted serial line, a VC0706 emulator,
//! a pacer that only counts, and recorders for the GPIO/telemetry seams.

use std::{
    collections::{HashSet, VecDeque},
    sync::{Arc, Mutex},
    time::Duration,
};

use crate::{
    camera_controller::CaptureNotifier,
    error::Result,
    led_controller::{Flash, PhotoCountBus},
    protocol::{
        ACK_MARKER, COMMAND_BEGIN, FBUF_CTRL, GEN_VERSION, GET_FBUF_LEN, READ_FBUF, RESUME_FRAME,
        STOP_CURRENT_FRAME,
    },
    transport::{Pacer, SerialLink},
};

#[derive(Clone, Default)]
pub(crate) struct FakePacer {
    elapsed: Arc<Mutex<Duration>>,
}

impl FakePacer {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn elapsed(&self) -> Duration {
        *self.elapsed.lock().unwrap()
    }
}

impl Pacer for FakePacer {
    fn pause(&mut self, duration: Duration) {
        *self.elapsed.lock().unwrap() += duration;
    }
}

/** A line that plays back fixed input and records everything written. */
#[derive(Default)]
pub(crate) struct ScriptedLink {
    input: VecDeque<u8>,
    written: Vec<u8>,
    gaps: usize,
    gap_remaining: usize,
    polls: usize,
}

impl ScriptedLink {
    pub(crate) fn with_input(input: &[u8]) -> Self {
        Self {
            input: input.iter().copied().collect(),
            ..Self::default()
        }
    }

    /** Number of empty polls reported before each byte. */
    pub(crate) fn set_gaps(&mut self, gaps: usize) {
        self.gaps = gaps;
        self.gap_remaining = gaps;
    }

    pub(crate) fn pending(&self) -> usize {
        self.input.len()
    }

    pub(crate) fn polls(&self) -> usize {
        self.polls
    }

    pub(crate) fn written(&self) -> &[u8] {
        &self.written
    }
}

impl SerialLink for ScriptedLink {
    fn bytes_available(&mut self) -> Result<usize> {
        self.polls += 1;
        if self.input.is_empty() {
            return Ok(0);
        }
        if self.gap_remaining > 0 {
            self.gap_remaining -= 1;
            return Ok(0);
        }
        Ok(self.input.len())
    }

    fn read_byte(&mut self) -> Result<Option<u8>> {
        let byte = self.input.pop_front();
        if byte.is_some() {
            self.gap_remaining = self.gaps;
        }
        Ok(byte)
    }

    fn write_byte(&mut self, byte: u8) -> Result<()> {
        self.written.push(byte);
        Ok(())
    }
}

/**
 * Emulates enough of a VC0706 to run whole captures: it decodes command
 * frames as they are written and queues the replies a real module sends.
 */
pub(crate) struct FakeCamera {
    image: Vec<u8>,
    reported_lens: VecDeque<u32>,
    output: VecDeque<u8>,
    incoming: Vec<u8>,
    commands: Vec<Vec<u8>>,
    silent: bool,
    trickle: bool,
    trickle_ready: bool,
    bad_ack_opcodes: HashSet<u8>,
    bad_trailing_ack: bool,
    stray_after_resume: Vec<u8>,
    pending_at_command: Vec<usize>,
}

impl FakeCamera {
    pub(crate) fn new(image: &[u8]) -> Self {
        Self {
            image: image.to_vec(),
            reported_lens: VecDeque::new(),
            output: VecDeque::new(),
            incoming: Vec::new(),
            commands: Vec::new(),
            silent: false,
            trickle: false,
            trickle_ready: false,
            bad_ack_opcodes: HashSet::new(),
            bad_trailing_ack: false,
            stray_after_resume: Vec::new(),
            pending_at_command: Vec::new(),
        }
    }

    /** A camera that never answers anything. */
    pub(crate) fn silent() -> Self {
        let mut camera = Self::new(&[]);
        camera.silent = true;
        camera
    }

    /** Deliver replies one byte per successful poll, with an empty poll between. */
    pub(crate) fn trickle(mut self) -> Self {
        self.trickle = true;
        self
    }

    /** Lengths reported by the next GET_FBUF_LEN commands, before the real one. */
    pub(crate) fn report_lengths(mut self, lens: &[u32]) -> Self {
        self.reported_lens = lens.iter().copied().collect();
        self
    }

    pub(crate) fn reject_opcode(mut self, opcode: u8) -> Self {
        self.bad_ack_opcodes.insert(opcode);
        self
    }

    pub(crate) fn corrupt_trailing_ack(mut self) -> Self {
        self.bad_trailing_ack = true;
        self
    }

    /** Noise queued once, right behind the next resume ack. */
    pub(crate) fn stray_after_resume(mut self, bytes: &[u8]) -> Self {
        self.stray_after_resume = bytes.to_vec();
        self
    }

    /** Unread reply bytes still waiting when each command came in. */
    pub(crate) fn pending_at_command(&self) -> &[usize] {
        &self.pending_at_command
    }

    pub(crate) fn commands(&self) -> &[Vec<u8>] {
        &self.commands
    }

    pub(crate) fn opcodes(&self) -> Vec<u8> {
        self.commands.iter().map(|frame| frame[2]).collect()
    }

    pub(crate) fn push_stray(&mut self, bytes: &[u8]) {
        self.output.extend(bytes);
    }

    fn _ack(&mut self, opcode: u8, data_len: u8) {
        if self.bad_ack_opcodes.contains(&opcode) {
            self.output.extend([ACK_MARKER, 0x00, 0xFF, 0x00, 0x00]);
        } else {
            self.output.extend([ACK_MARKER, 0x00, opcode, 0x00, data_len]);
        }
    }

    fn _handle(&mut self, frame: Vec<u8>) {
        let opcode = frame[2];
        let args = frame[4..].to_vec();
        self.pending_at_command.push(self.output.len());
        self.commands.push(frame);
        if self.silent {
            return;
        }

        match opcode {
            GEN_VERSION => {
                let version = b"VC0703 1.00";
                self._ack(opcode, version.len() as u8);
                self.output.extend(version);
            }
            FBUF_CTRL if args == [STOP_CURRENT_FRAME] => self._ack(opcode, 0),
            FBUF_CTRL if args == [RESUME_FRAME] => {
                self._ack(opcode, 0);
                let stray = std::mem::take(&mut self.stray_after_resume);
                self.output.extend(stray);
            }
            GET_FBUF_LEN => {
                self._ack(opcode, 4);
                let len = self
                    .reported_lens
                    .pop_front()
                    .unwrap_or(self.image.len() as u32);
                self.output.extend(len.to_be_bytes());
            }
            READ_FBUF => {
                let offset = u32::from_be_bytes([args[2], args[3], args[4], args[5]]) as usize;
                let len = u32::from_be_bytes([args[6], args[7], args[8], args[9]]) as usize;
                self._ack(opcode, 0);
                let end = (offset + len).min(self.image.len());
                let chunk = self.image[offset.min(end)..end].to_vec();
                self.output.extend(chunk);
                if self.bad_trailing_ack {
                    self.output.extend([0x00, 0x00, 0x00, 0x00, 0x00]);
                } else {
                    self._ack(opcode, 0);
                }
            }
            _ => self._ack(opcode, 0),
        }
    }
}

impl SerialLink for FakeCamera {
    fn bytes_available(&mut self) -> Result<usize> {
        if self.output.is_empty() {
            return Ok(0);
        }
        if self.trickle {
            self.trickle_ready = !self.trickle_ready;
            return Ok(if self.trickle_ready { 1 } else { 0 });
        }
        Ok(self.output.len())
    }

    fn read_byte(&mut self) -> Result<Option<u8>> {
        Ok(self.output.pop_front())
    }

    fn write_byte(&mut self, byte: u8) -> Result<()> {
        if self.incoming.is_empty() && byte != COMMAND_BEGIN {
            return Ok(());
        }
        self.incoming.push(byte);
        if self.incoming.len() >= 4 && self.incoming.len() == 4 + self.incoming[3] as usize {
            let frame = std::mem::take(&mut self.incoming);
            self._handle(frame);
        }
        Ok(())
    }
}

#[derive(Clone, Default)]
pub(crate) struct RecordingFlash {
    pub(crate) states: Arc<Mutex<Vec<bool>>>,
}

impl Flash for RecordingFlash {
    fn set(&mut self, on: bool) {
        self.states.lock().unwrap().push(on);
    }
}

#[derive(Clone, Default)]
pub(crate) struct RecordingPhotoCount {
    pub(crate) writes: Arc<Mutex<Vec<u8>>>,
}

impl PhotoCountBus for RecordingPhotoCount {
    fn write(&mut self, count: u8) {
        self.writes.lock().unwrap().push(count);
    }
}

#[derive(Clone, Default)]
pub(crate) struct RecordingNotifier {
    pub(crate) filenames: Arc<Mutex<Vec<String>>>,
}

impl CaptureNotifier for RecordingNotifier {
    fn notify(&mut self, filename: &str) {
        self.filenames.lock().unwrap().push(filename.to_string());
    }
}
