use std::{
    fs::File,
    io::Read,
    path::Path,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread,
};

use log::{debug, error, info, warn};

use crate::{
    camera_session::CameraSession,
    error::CameraError,
    frame_buffer::CapturePolicy,
    image_sink::ImageSink,
    led_controller::{Flash, PhotoCountBus},
    transport::SerialLink,
};

/** Filename reported downstream when a capture fails. */
pub(crate) const FAILURE_SENTINEL: &str = "error.txt";
/** Prefix used when the reboot log cannot be read. */
const UNKNOWN_REBOOT_PREFIX: &str = "999";

/**
 * Receives one filename per capture attempt: the stored image's name on
 * success, FAILURE_SENTINEL otherwise.
 */
pub(crate) trait CaptureNotifier: Send {
    fn notify(&mut self, filename: &str);
}

pub(crate) struct CameraController {
    pub(crate) thread_handle: thread::JoinHandle<()>,
}

/**
 * Runs the scheduler on its own thread until the run flag is cleared.
 */
pub(crate) fn start_camera_controller<L: SerialLink + 'static>(
    mut scheduler: CaptureScheduler<L>,
) -> CameraController {
    let thread_handle = thread::spawn(move || {
        info!("Starting Camera Controller Thread...");
        scheduler.run();
        info!("Camera Controller Thread stopped");
    });
    CameraController { thread_handle }
}

/**
 * `<reboots>_<camera>_<counter>.jpg`, e.g. `007_1_0042.jpg`. The counter is
 * padded to four digits and simply grows wider past 9999.
 */
pub(crate) fn image_filename(reboot_prefix: &str, interface_id: u8, counter: u32) -> String {
    format!("{:.3}_{}_{:04}.jpg", reboot_prefix, interface_id, counter)
}

/**
 * First three bytes of the reboot log, or "999" if they cannot be read.
 */
pub(crate) fn read_reboot_prefix(path: &Path) -> String {
    let mut prefix = [0u8; 3];
    let read = File::open(path).and_then(|mut file| file.read_exact(&mut prefix));
    match read {
        Ok(()) => String::from_utf8_lossy(&prefix).into_owned(),
        Err(err) => {
            warn!(
                "could not read reboot count from {}: {}; using {}",
                path.display(),
                err,
                UNKNOWN_REBOOT_PREFIX
            );
            UNKNOWN_REBOOT_PREFIX.to_string()
        }
    }
}

/**
 * Round-robins over every configured camera forever: probe, name, capture,
 * report. Sessions are visited strictly one after another, so the name
 * buffers and the picture counter need no locking.
 */
pub(crate) struct CaptureScheduler<L> {
    sessions: Vec<CameraSession<L>>,
    flash: Box<dyn Flash>,
    photo_count: Box<dyn PhotoCountBus>,
    notifier: Box<dyn CaptureNotifier>,
    sink: ImageSink,
    policy: CapturePolicy,
    reboot_prefix: String,
    picture_counter: u32,
    running: Arc<AtomicBool>,
}

impl<L: SerialLink> CaptureScheduler<L> {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        sessions: Vec<CameraSession<L>>,
        flash: Box<dyn Flash>,
        photo_count: Box<dyn PhotoCountBus>,
        notifier: Box<dyn CaptureNotifier>,
        sink: ImageSink,
        policy: CapturePolicy,
        reboot_prefix: String,
        running: Arc<AtomicBool>,
    ) -> Self {
        Self {
            sessions,
            flash,
            photo_count,
            notifier,
            sink,
            policy,
            reboot_prefix,
            picture_counter: 1,
            running,
        }
    }

    #[cfg(test)]
    pub(crate) fn picture_counter(&self) -> u32 {
        self.picture_counter
    }

    #[cfg(test)]
    pub(crate) fn sessions(&self) -> &[CameraSession<L>] {
        &self.sessions
    }

    pub(crate) fn run(&mut self) {
        if !self.sessions.iter().any(|session| session.is_ready()) {
            warn!("no camera initialized; scheduler will idle until stopped");
        }
        while self.running.load(Ordering::Relaxed) {
            let stored = self.run_round();
            if stored == 0 && !self.sessions.iter().any(|session| session.is_ready()) {
                // Nothing can ever become ready again; don't spin.
                thread::park_timeout(std::time::Duration::from_secs(10));
            }
        }
    }

    /**
     * One pass over all sessions. Returns how many images were stored.
     */
    pub(crate) fn run_round(&mut self) -> usize {
        let mut stored = 0;

        for session in self.sessions.iter_mut() {
            if !self.running.load(Ordering::Relaxed) {
                break;
            }
            if !session.is_ready() {
                continue;
            }

            let interface_id = session.interface_id();
            if let Err(err) = session.get_version() {
                debug!("camera {}: liveness probe failed: {}", interface_id, err);
                warn!("Failed communication to Camera {}", interface_id);
                continue;
            }

            let filename = image_filename(&self.reboot_prefix, interface_id, self.picture_counter);
            let path = self.sink.path_for(&filename);

            match session.capture(&path, self.flash.as_mut(), &self.sink, &self.policy) {
                Ok(captured) => {
                    debug!(
                        "camera {}: {} of {} bytes after {} attempt(s)",
                        interface_id, captured.stored_len, captured.frame_len, captured.attempts
                    );
                    if captured.trailing_ack_mismatches > 0 {
                        warn!(
                            "camera {}: {} kept with {} suspect chunk(s)",
                            interface_id, filename, captured.trailing_ack_mismatches
                        );
                    }
                    self.notifier.notify(&filename);
                    self.photo_count.write(self.picture_counter as u8);
                    self.picture_counter = self.picture_counter.saturating_add(1);
                    stored += 1;
                }
                Err(CameraError::Cancelled) => break,
                Err(err) => {
                    error!("camera {}: capture failed: {}", interface_id, err);
                    self.notifier.notify(FAILURE_SENTINEL);
                }
            }

            let stats = session.stats();
            debug!(
                "camera {} ({}): {} stored, {} failed, {} probe failures, {} suspect chunks, last {:?}",
                interface_id,
                session.version().unwrap_or("unknown version"),
                stats.captures,
                stats.failures,
                stats.probe_failures,
                stats.trailing_ack_mismatches,
                session.last_image_name()
            );
        }

        stored
    }
}

#[cfg(test)]
mod tests {
    use std::{io::Write, time::Duration};

    use super::*;
    use crate::{
        camera_session::SessionState,
        error::CameraError,
        events::{EventId, EventLog},
        protocol::{GEN_VERSION, GET_FBUF_LEN},
        test_support::{
            FakeCamera, FakePacer, RecordingFlash, RecordingNotifier, RecordingPhotoCount,
        },
        transport::DEFAULT_POLL_QUANTUM,
    };

    struct Harness {
        scheduler: CaptureScheduler<FakeCamera>,
        notifier: RecordingNotifier,
        photo_count: RecordingPhotoCount,
        events: Arc<EventLog>,
        running: Arc<AtomicBool>,
        dir: tempfile::TempDir,
    }

    fn harness(cameras: Vec<Option<FakeCamera>>) -> Harness {
        let events = Arc::new(EventLog::new());
        let running = Arc::new(AtomicBool::new(true));
        let sessions = cameras
            .into_iter()
            .enumerate()
            .map(|(id, camera)| {
                let mut session = CameraSession::new(id as u8, events.clone());
                let _ = session.initialize(
                    move |id| camera.ok_or(CameraError::NotReady(id)),
                    Box::new(FakePacer::new()),
                    DEFAULT_POLL_QUANTUM,
                    running.clone(),
                );
                session
            })
            .collect();

        let dir = tempfile::tempdir().unwrap();
        let notifier = RecordingNotifier::default();
        let photo_count = RecordingPhotoCount::default();
        let scheduler = CaptureScheduler::new(
            sessions,
            Box::new(RecordingFlash::default()),
            Box::new(photo_count.clone()),
            Box::new(notifier.clone()),
            ImageSink::new(dir.path()),
            CapturePolicy::default(),
            "007".to_string(),
            running.clone(),
        );
        Harness {
            scheduler,
            notifier,
            photo_count,
            events,
            running,
            dir,
        }
    }

    fn jpeg(len: usize) -> Vec<u8> {
        let mut image = vec![0xFF, 0xD8];
        image.extend((0..len - 4).map(|i| i as u8));
        image.extend([0xFF, 0xD9]);
        image
    }

    #[test]
    fn filename_format() {
        assert_eq!(image_filename("007", 1, 42), "007_1_0042.jpg");
        assert_eq!(image_filename("007", 1, 9999), "007_1_9999.jpg");
        assert_eq!(image_filename("007", 0, 10000), "007_0_10000.jpg");
        assert_eq!(image_filename("12345", 0, 1), "123_0_0001.jpg");
    }

    #[test]
    fn reboot_prefix_reads_three_characters() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "0071").unwrap();
        assert_eq!(read_reboot_prefix(file.path()), "007");
    }

    #[test]
    fn reboot_prefix_falls_back_to_nines() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(read_reboot_prefix(&dir.path().join("reboot.txt")), "999");

        let mut short = tempfile::NamedTempFile::new().unwrap();
        write!(short, "12").unwrap();
        assert_eq!(read_reboot_prefix(short.path()), "999");
    }

    #[test]
    fn dead_camera_is_skipped_and_live_one_captures() {
        let image = jpeg(600);
        let mut h = harness(vec![
            Some(FakeCamera::silent()),
            Some(FakeCamera::new(&image)),
        ]);

        assert_eq!(h.scheduler.run_round(), 1);

        assert_eq!(*h.notifier.filenames.lock().unwrap(), vec!["007_1_0001.jpg"]);
        assert_eq!(h.scheduler.picture_counter(), 2);
        assert_eq!(*h.photo_count.writes.lock().unwrap(), vec![1]);
        assert_eq!(
            std::fs::read(h.dir.path().join("007_1_0001.jpg")).unwrap(),
            image
        );
        // The silent camera only ever saw its probe.
        let silent = h.scheduler.sessions()[0].link().unwrap();
        assert_eq!(silent.opcodes(), vec![GEN_VERSION]);
    }

    #[test]
    fn counter_is_shared_across_cameras() {
        let mut h = harness(vec![
            Some(FakeCamera::new(&jpeg(100))),
            Some(FakeCamera::new(&jpeg(100))),
        ]);
        h.scheduler.run_round();
        h.scheduler.run_round();
        assert_eq!(
            *h.notifier.filenames.lock().unwrap(),
            vec!["007_0_0001.jpg", "007_1_0002.jpg", "007_0_0003.jpg", "007_1_0004.jpg"]
        );
        assert_eq!(h.scheduler.picture_counter(), 5);
    }

    #[test]
    fn failed_capture_reports_sentinel_and_keeps_counter() {
        let mut h = harness(vec![Some(
            FakeCamera::new(&jpeg(100)).reject_opcode(GET_FBUF_LEN),
        )]);
        assert_eq!(h.scheduler.run_round(), 0);
        assert_eq!(*h.notifier.filenames.lock().unwrap(), vec![FAILURE_SENTINEL]);
        assert_eq!(h.scheduler.picture_counter(), 1);
        assert!(h.photo_count.writes.lock().unwrap().is_empty());
        assert_eq!(h.scheduler.sessions()[0].stats().failures, 1);
    }

    #[test]
    fn failed_sessions_are_never_touched() {
        let mut h = harness(vec![None, Some(FakeCamera::new(&jpeg(50)))]);
        assert_eq!(h.scheduler.sessions()[0].state(), SessionState::Failed);
        assert_eq!(h.events.count(EventId::InitErr), 1);

        h.scheduler.run_round();
        assert_eq!(*h.notifier.filenames.lock().unwrap(), vec!["007_1_0001.jpg"]);
    }

    #[test]
    fn oversized_frame_is_retried_within_one_attempt() {
        let image = jpeg(400);
        let mut h = harness(vec![Some(
            FakeCamera::new(&image).report_lengths(&[25000]),
        )]);

        assert_eq!(h.scheduler.run_round(), 1);
        assert_eq!(h.events.count(EventId::LengthErr), 1);
        assert_eq!(*h.notifier.filenames.lock().unwrap(), vec!["007_0_0001.jpg"]);
        assert_eq!(
            std::fs::read(h.dir.path().join("007_0_0001.jpg")).unwrap(),
            image
        );
    }

    #[test]
    fn run_returns_once_stopped() {
        let mut h = harness(vec![Some(FakeCamera::new(&jpeg(10)))]);
        h.running.store(false, Ordering::Relaxed);
        h.scheduler.run();
        assert!(h.notifier.filenames.lock().unwrap().is_empty());
    }

    #[test]
    fn controller_thread_stops_with_run_flag() {
        let h = harness(vec![Some(FakeCamera::new(&jpeg(10)))]);
        let notifier = h.notifier.clone();
        let running = h.running.clone();
        let controller = start_camera_controller(h.scheduler);

        while notifier.filenames.lock().unwrap().is_empty() {
            thread::sleep(Duration::from_millis(1));
        }
        running.store(false, Ordering::Relaxed);
        controller.thread_handle.join().unwrap();
        assert!(notifier.filenames.lock().unwrap()[0].starts_with("007_0_"));
    }
}
