use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use log::{debug, warn};

use crate::{
    error::{CameraError, Result},
    events::EventId,
    image_sink::ImageSink,
    led_controller::Flash,
    protocol::{
        decode_frame_length, read_fbuf_args, Protocol, ACK_LEN, FBUF_CTRL, GET_FBUF_LEN,
        READ_FBUF, RESUME_FRAME, STOP_CURRENT_FRAME,
    },
    transport::SerialLink,
};

/** Time the flash gets to come up to brightness before the freeze. */
const FLASH_WARMUP: Duration = Duration::from_millis(50);
/** Idle poll quanta allowed while a chunk is streaming in. */
const CHUNK_IDLE_QUANTA: u32 = 20;

/**
 * Knobs for one capture. The defaults match the flight configuration.
 */
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct CapturePolicy {
    /** Largest frame the reader accepts; anything bigger is re-shot. */
    pub(crate) max_frame_len: u32,
    /** Total attempts (first shot included) before oversized frames give up. */
    pub(crate) max_attempts: u32,
    /** Fail the capture on a bad trailing chunk ack instead of keeping the bytes. */
    pub(crate) reject_corrupt_chunks: bool,
}

impl Default for CapturePolicy {
    fn default() -> Self {
        Self {
            max_frame_len: 20000,
            max_attempts: 3,
            reject_corrupt_chunks: false,
        }
    }
}

/**
 * Read position inside the camera's frame buffer. Reset at the start of every
 * capture attempt and only moved forward by the chunk loop.
 */
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub(crate) struct FrameCursor {
    pub(crate) offset: u32,
    /** Bytes received by the most recent chunk read. */
    pub(crate) pending_buffer_len: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct CapturedImage {
    pub(crate) path: PathBuf,
    /** Length the camera reported for the frame. */
    pub(crate) frame_len: u32,
    /** Bytes actually received and stored. */
    pub(crate) stored_len: usize,
    pub(crate) attempts: u32,
    /** Chunks whose closing ack was wrong; their bytes were kept. */
    pub(crate) trailing_ack_mismatches: u32,
}

enum FrameLength {
    Fits(u32),
    TooLarge(u32),
}

/**
 * Takes one picture: freezes the frame, learns its length, pulls it out of the
 * frame buffer and stores it at `path`. Oversized frames are re-shot up to
 * `policy.max_attempts` times.
 */
pub(crate) fn capture_frame<L: SerialLink>(
    protocol: &mut Protocol<L>,
    cursor: &mut FrameCursor,
    flash: &mut dyn Flash,
    sink: &ImageSink,
    path: &Path,
    policy: &CapturePolicy,
) -> Result<CapturedImage> {
    let interface = protocol.interface();

    for attempt in 1..=policy.max_attempts {
        *cursor = FrameCursor::default();

        let frame_len = match _freeze_and_measure(protocol, flash, policy)? {
            FrameLength::Fits(len) => len,
            FrameLength::TooLarge(len) => {
                protocol.events().record(
                    EventId::LengthErr,
                    format_args!(
                        "Camera {} image too large. Length [{}] Expected <= {} (attempt {}/{})",
                        interface, len, policy.max_frame_len, attempt, policy.max_attempts
                    ),
                );
                resume_video(protocol)?;
                protocol.drain()?;
                continue;
            }
        };

        let (image, trailing_ack_mismatches) =
            _read_frame_buffer(protocol, cursor, frame_len, policy)?;
        if image.len() < frame_len as usize {
            warn!(
                "camera {}: frame short by {} bytes",
                interface,
                frame_len as usize - image.len()
            );
        }

        let stored = sink.store(path, &image);
        if let Err(err) = &stored {
            protocol.events().record(
                EventId::StorageErr,
                format_args!("Camera {} image not stored: {}", interface, err),
            );
        }
        // Leave the camera live even when the write failed.
        resume_video(protocol)?;
        protocol.drain()?;
        stored?;

        protocol.events().record(
            EventId::CaptureInfo,
            format_args!("Camera {} stored as <{}>", interface, path.display()),
        );
        return Ok(CapturedImage {
            path: path.to_path_buf(),
            frame_len,
            stored_len: image.len(),
            attempts: attempt,
            trailing_ack_mismatches,
        });
    }

    Err(CameraError::OversizeRetriesExhausted {
        interface,
        attempts: policy.max_attempts,
    })
}

/**
 * Asks the camera to go back to live video after a freeze. A bad ack is only
 * logged.
 */
pub(crate) fn resume_video<L: SerialLink>(protocol: &mut Protocol<L>) -> Result<()> {
    protocol.send_command(FBUF_CTRL, &[RESUME_FRAME])?;
    match protocol.check_reply(FBUF_CTRL, ACK_LEN) {
        Err(CameraError::BadReply { .. }) => {
            warn!("camera {} did not resume", protocol.interface());
            Ok(())
        }
        other => other,
    }
}

/**
 * Steps up to and including the length guard: flash, freeze, flash off, ask
 * for the frame length and read it back.
 */
fn _freeze_and_measure<L: SerialLink>(
    protocol: &mut Protocol<L>,
    flash: &mut dyn Flash,
    policy: &CapturePolicy,
) -> Result<FrameLength> {
    flash.set(true);
    protocol.transport().pause(FLASH_WARMUP);

    let frozen = _freeze(protocol);
    // The flash only stays on for the freeze round trip, whatever happened.
    flash.set(false);
    frozen?;

    protocol.send_command(GET_FBUF_LEN, &[0x00])?;
    protocol.check_reply(GET_FBUF_LEN, ACK_LEN)?;

    let transport = protocol.transport();
    transport.wait_for_data()?;
    let mut len_bytes = [0u8; 4];
    for byte in len_bytes.iter_mut() {
        *byte = transport.read_byte_blocking()?;
    }
    let len = decode_frame_length(len_bytes);
    debug!("camera {}: frame length {}", protocol.interface(), len);

    if len > policy.max_frame_len {
        Ok(FrameLength::TooLarge(len))
    } else {
        Ok(FrameLength::Fits(len))
    }
}

fn _freeze<L: SerialLink>(protocol: &mut Protocol<L>) -> Result<()> {
    protocol.drain()?;
    protocol.send_command(FBUF_CTRL, &[STOP_CURRENT_FRAME])?;
    protocol.check_reply(FBUF_CTRL, ACK_LEN)
}

/**
 * Chunk loop. Each round asks for everything that is left, so in practice a
 * frame comes over in a single chunk.
 */
fn _read_frame_buffer<L: SerialLink>(
    protocol: &mut Protocol<L>,
    cursor: &mut FrameCursor,
    frame_len: u32,
    policy: &CapturePolicy,
) -> Result<(Vec<u8>, u32)> {
    let interface = protocol.interface();
    // One spare byte past the frame, never filled.
    let mut image = Vec::with_capacity(frame_len as usize + 1);
    let mut remaining = frame_len;
    let mut trailing_ack_mismatches = 0;

    while remaining > 0 {
        let read_bytes = remaining;

        protocol.send_command(READ_FBUF, &read_fbuf_args(cursor.offset, read_bytes))?;
        protocol.check_reply(READ_FBUF, ACK_LEN)?;

        cursor.pending_buffer_len = 0;
        let received =
            protocol
                .transport()
                .read_into(&mut image, read_bytes as usize, CHUNK_IDLE_QUANTA)?;
        cursor.pending_buffer_len = received;
        if !protocol.transport().is_running() {
            return Err(CameraError::Cancelled);
        }

        cursor.offset += read_bytes;
        remaining -= read_bytes;

        match protocol.check_reply(READ_FBUF, ACK_LEN) {
            Ok(()) => {}
            Err(CameraError::BadReply { .. }) => {
                trailing_ack_mismatches += 1;
                protocol.events().record(
                    EventId::ChunkAckErr,
                    format_args!(
                        "Camera {} bad end of chunk ack | offset: {} | remaining: {}",
                        interface, cursor.offset, remaining
                    ),
                );
                if policy.reject_corrupt_chunks {
                    return Err(CameraError::ChunkAck {
                        interface,
                        offset: cursor.offset,
                    });
                }
            }
            Err(err) => return Err(err),
        }
    }

    Ok((image, trailing_ack_mismatches))
}
