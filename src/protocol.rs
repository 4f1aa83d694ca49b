use std::sync::Arc;

use log::trace;

use crate::{
    error::{CameraError, Result},
    events::{EventId, EventLog},
    transport::{SerialLink, Transport},
};

/////////////////////
// Wire constants
/////////////////////
pub(crate) const COMMAND_BEGIN: u8 = 0x56;
pub(crate) const ACK_MARKER: u8 = 0x76;

pub(crate) const RESET: u8 = 0x26;
pub(crate) const GEN_VERSION: u8 = 0x11;
pub(crate) const READ_FBUF: u8 = 0x32;
pub(crate) const GET_FBUF_LEN: u8 = 0x34;
pub(crate) const FBUF_CTRL: u8 = 0x36;
pub(crate) const COMM_MOTION_CTRL: u8 = 0x37;
pub(crate) const MOTION_CTRL: u8 = 0x42;

pub(crate) const STOP_CURRENT_FRAME: u8 = 0x00;
pub(crate) const RESUME_FRAME: u8 = 0x03;

/** Fixed leading bytes of every READ_FBUF argument block. */
const READ_FBUF_MODE: [u8; 2] = [0x00, 0x0A];
/** Inter-byte delay requested from the camera while it streams a chunk. */
pub(crate) const CAMERA_DELAY: u16 = 10;
/** Motion detection config block sent ahead of COMM_MOTION_CTRL. */
pub(crate) const MOTION_CTRL_ARGS: [u8; 4] = [0x01, 0x01, 0x00, 0x00];

/** Every ack this app waits for is five bytes long. */
pub(crate) const ACK_LEN: usize = 5;
/** Poll quanta a reply may stay silent before it is given up on. */
pub(crate) const REPLY_IDLE_QUANTA: u32 = 3;

/**
 * Builds a command frame: begin marker, serial number, opcode, argument count,
 * arguments.
 */
pub(crate) fn encode_command(serial_number: u8, opcode: u8, args: &[u8]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(4 + args.len());
    frame.extend([COMMAND_BEGIN, serial_number, opcode, args.len() as u8]);
    frame.extend_from_slice(args);
    frame
}

/**
 * A reply is valid when it starts with the ack marker, serial number 0 and the
 * opcode it answers.
 */
pub(crate) fn reply_is_valid(reply: &[u8], opcode: u8) -> bool {
    matches!(reply, [ACK_MARKER, 0x00, echoed, ..] if *echoed == opcode)
}

pub(crate) fn decode_frame_length(bytes: [u8; 4]) -> u32 {
    u32::from_be_bytes(bytes)
}

pub(crate) fn read_fbuf_args(offset: u32, len: u32) -> [u8; 12] {
    let mut args = [0u8; 12];
    args[..2].copy_from_slice(&READ_FBUF_MODE);
    args[2..6].copy_from_slice(&offset.to_be_bytes());
    args[6..10].copy_from_slice(&len.to_be_bytes());
    args[10..].copy_from_slice(&CAMERA_DELAY.to_be_bytes());
    args
}

/**
 * Command/response exchanges with one camera. Owns the transport so that no
 * two exchanges can overlap on the same line.
 */
pub(crate) struct Protocol<L> {
    transport: Transport<L>,
    interface: u8,
    serial_number: u8,
    events: Arc<EventLog>,
}

impl<L: SerialLink> Protocol<L> {
    pub(crate) fn new(
        transport: Transport<L>,
        interface: u8,
        serial_number: u8,
        events: Arc<EventLog>,
    ) -> Self {
        Self {
            transport,
            interface,
            serial_number,
            events,
        }
    }

    pub(crate) fn interface(&self) -> u8 {
        self.interface
    }

    pub(crate) fn events(&self) -> &EventLog {
        &self.events
    }

    pub(crate) fn transport(&mut self) -> &mut Transport<L> {
        &mut self.transport
    }

    #[cfg(test)]
    pub(crate) fn link(&self) -> &L {
        self.transport.link()
    }

    /** Writes the frame one byte at a time, no batching. */
    pub(crate) fn send_command(&mut self, opcode: u8, args: &[u8]) -> Result<()> {
        trace!(
            "camera {}: sending opcode {:#04x} with {} args",
            self.interface,
            opcode,
            args.len()
        );
        for byte in encode_command(self.serial_number, opcode, args) {
            self.transport.write_byte(byte)?;
        }
        Ok(())
    }

    /**
     * Reads up to `size` reply bytes and checks the header. A bad reply is
     * reported as a ReplyErr event and returned as `CameraError::BadReply`.
     */
    pub(crate) fn check_reply(&mut self, opcode: u8, size: usize) -> Result<()> {
        let reply = self.transport.read_with_timeout(size, REPLY_IDLE_QUANTA)?;
        if reply_is_valid(&reply, opcode) {
            return Ok(());
        }

        self.events.record(
            EventId::ReplyErr,
            format_args!(
                "Camera {} unresponsive! opcode {:#04x} reply {:02x?}",
                self.interface, opcode, reply
            ),
        );
        Err(CameraError::BadReply {
            interface: self.interface,
            opcode,
            reply,
        })
    }

    pub(crate) fn drain(&mut self) -> Result<usize> {
        self.transport.drain()
    }
}
