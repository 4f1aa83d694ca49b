use std::{
    path::{Path, PathBuf},
    sync::{atomic::AtomicBool, Arc},
    time::Duration,
};

use log::{debug, info, warn};

use crate::{
    error::{CameraError, Result},
    events::{EventId, EventLog},
    frame_buffer::{self, CapturePolicy, CapturedImage, FrameCursor},
    image_sink::ImageSink,
    led_controller::Flash,
    protocol::{
        Protocol, ACK_LEN, COMM_MOTION_CTRL, GEN_VERSION, MOTION_CTRL, MOTION_CTRL_ARGS, RESET,
    },
    transport::{Pacer, SerialLink, Transport, CAMERA_BUFFER_LEN},
};

/** Protocol serial number; every module flown so far answers to 0. */
const SERIAL_NUMBER: u8 = 0;
/** Quanta to wait for the tail of a version reply. */
const VERSION_IDLE_QUANTA: u32 = 1;

/**
 * Lifecycle of a session. There is no way back from `Failed`; a camera that
 * could not be opened stays skipped until the process restarts.
 */
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SessionState {
    Uninitialized,
    Ready,
    Failed,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub(crate) struct SessionStats {
    pub(crate) captures: u64,
    pub(crate) failures: u64,
    pub(crate) probe_failures: u64,
    pub(crate) trailing_ack_mismatches: u64,
}

/**
 * One camera on one serial port.
 */
pub(crate) struct CameraSession<L> {
    interface_id: u8,
    state: SessionState,
    protocol: Option<Protocol<L>>,
    cursor: FrameCursor,
    motion_enabled: bool,
    last_image_name: Option<PathBuf>,
    version: Option<String>,
    stats: SessionStats,
    events: Arc<EventLog>,
}

impl<L: SerialLink> CameraSession<L> {
    pub(crate) fn new(interface_id: u8, events: Arc<EventLog>) -> Self {
        Self {
            interface_id,
            state: SessionState::Uninitialized,
            protocol: None,
            cursor: FrameCursor::default(),
            motion_enabled: true,
            last_image_name: None,
            version: None,
            stats: SessionStats::default(),
            events,
        }
    }

    /**
     * Opens the serial link through `open`. On failure the session is marked
     * `Failed` for good.
     */
    pub(crate) fn initialize(
        &mut self,
        open: impl FnOnce(u8) -> Result<L>,
        pacer: Box<dyn Pacer>,
        poll_quantum: Duration,
        running: Arc<AtomicBool>,
    ) -> Result<()> {
        match self.state {
            SessionState::Ready => return Ok(()),
            SessionState::Failed => return Err(CameraError::NotReady(self.interface_id)),
            SessionState::Uninitialized => {}
        }

        self.cursor = FrameCursor::default();
        self.motion_enabled = true;

        match open(self.interface_id) {
            Ok(link) => {
                let transport = Transport::new(link, pacer, poll_quantum, running);
                self.protocol = Some(Protocol::new(
                    transport,
                    self.interface_id,
                    SERIAL_NUMBER,
                    self.events.clone(),
                ));
                self.state = SessionState::Ready;
                self.events.record(
                    EventId::Init,
                    format_args!("camera {} ready on /dev/ttyAMA{}", self.interface_id, self.interface_id),
                );
                Ok(())
            }
            Err(err) => {
                self.state = SessionState::Failed;
                self.events.record(
                    EventId::InitErr,
                    format_args!("init Error: camera {}: {}", self.interface_id, err),
                );
                Err(err)
            }
        }
    }

    pub(crate) fn interface_id(&self) -> u8 {
        self.interface_id
    }

    pub(crate) fn state(&self) -> SessionState {
        self.state
    }

    pub(crate) fn is_ready(&self) -> bool {
        self.state == SessionState::Ready
    }

    pub(crate) fn last_image_name(&self) -> Option<&Path> {
        self.last_image_name.as_deref()
    }

    pub(crate) fn version(&self) -> Option<&str> {
        self.version.as_deref()
    }

    pub(crate) fn motion_enabled(&self) -> bool {
        self.motion_enabled
    }

    pub(crate) fn stats(&self) -> SessionStats {
        self.stats
    }

    #[cfg(test)]
    pub(crate) fn frame_cursor(&self) -> FrameCursor {
        self.cursor
    }

    #[cfg(test)]
    pub(crate) fn link(&self) -> Option<&L> {
        self.protocol.as_ref().map(|protocol| protocol.link())
    }

    fn _protocol(&mut self) -> Result<&mut Protocol<L>> {
        match (self.state, self.protocol.as_mut()) {
            (SessionState::Ready, Some(protocol)) => Ok(protocol),
            _ => Err(CameraError::NotReady(self.interface_id)),
        }
    }

    /**
     * Resets the module. A bad ack is logged and otherwise ignored.
     */
    pub(crate) fn reset(&mut self) -> Result<()> {
        let protocol = self._protocol()?;
        protocol.send_command(RESET, &[0x00])?;
        if let Err(err) = protocol.check_reply(RESET, ACK_LEN) {
            warn!("reset() check reply failed: {}", err);
        }
        protocol.drain()?;
        Ok(())
    }

    pub(crate) fn resume_video(&mut self) -> Result<()> {
        frame_buffer::resume_video(self._protocol()?)
    }

    /**
     * Liveness probe. Any version text that follows the ack is kept, but
     * nothing depends on it.
     */
    pub(crate) fn get_version(&mut self) -> Result<()> {
        let interface_id = self.interface_id;
        let protocol = self._protocol()?;
        protocol.send_command(GEN_VERSION, &[0x00])?;
        if let Err(err) = protocol.check_reply(GEN_VERSION, ACK_LEN) {
            self.stats.probe_failures += 1;
            return Err(err);
        }

        let tail = protocol
            .transport()
            .read_with_timeout(CAMERA_BUFFER_LEN, VERSION_IDLE_QUANTA)?;
        self.cursor.pending_buffer_len = tail.len();
        if !tail.is_empty() {
            let version = String::from_utf8_lossy(&tail).trim().to_string();
            debug!("camera {} version '{}'", interface_id, version);
            self.version = Some(version);
        }
        Ok(())
    }

    /**
     * Configures motion detection and switches it on or off. The module's
     * acks are thrown away with the drain.
     */
    pub(crate) fn set_motion_detect(&mut self, enabled: bool) -> Result<()> {
        let protocol = self._protocol()?;
        protocol.send_command(MOTION_CTRL, &MOTION_CTRL_ARGS)?;
        protocol.send_command(COMM_MOTION_CTRL, &[enabled as u8])?;
        protocol.drain()?;
        self.motion_enabled = enabled;
        info!(
            "camera {} motion detection {}",
            self.interface_id,
            if enabled { "enabled" } else { "disabled" }
        );
        Ok(())
    }

    /**
     * Takes a picture and stores it at `path`.
     */
    pub(crate) fn capture(
        &mut self,
        path: &Path,
        flash: &mut dyn Flash,
        sink: &ImageSink,
        policy: &CapturePolicy,
    ) -> Result<CapturedImage> {
        let protocol = match (self.state, self.protocol.as_mut()) {
            (SessionState::Ready, Some(protocol)) => protocol,
            _ => return Err(CameraError::NotReady(self.interface_id)),
        };

        let result = frame_buffer::capture_frame(protocol, &mut self.cursor, flash, sink, path, policy);
        match &result {
            Ok(captured) => {
                self.stats.captures += 1;
                self.stats.trailing_ack_mismatches += u64::from(captured.trailing_ack_mismatches);
                self.last_image_name = Some(captured.path.clone());
            }
            Err(_) => self.stats.failures += 1,
        }
        result
    }
}
