use std::{
    io::BufRead,
    str::FromStr,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex, PoisonError,
    },
    thread::{self, JoinHandle},
    time::Duration,
};

use log::{info, warn};

use crate::{
    camera_controller::FAILURE_SENTINEL,
    common::NotificationQueue,
    events::{EventId, EventLog},
};

/** Longest filename the downstream image packet carries. */
pub(crate) const MAX_IMAGE_NAME_LEN: usize = 15;

/**
 * Ground commands this app understands. Neither carries a payload.
 */
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum HousekeepingCommand {
    Noop,
    ResetCounters,
    Report,
}

impl FromStr for HousekeepingCommand {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "noop" => Ok(Self::Noop),
            "reset" | "reset_counters" => Ok(Self::ResetCounters),
            "hk" | "report" => Ok(Self::Report),
            other => Err(other.to_string()),
        }
    }
}

/**
 * Downstream command an image notification is sent with, picked from the
 * camera digit in the filename.
 */
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ImageRoute {
    Image0 = 3,
    Image1 = 5,
}

pub(crate) fn route_for(filename: &str) -> ImageRoute {
    match filename.as_bytes().get(4) {
        Some(b'0') => ImageRoute::Image0,
        Some(b'1') => ImageRoute::Image1,
        _ => {
            if filename != FAILURE_SENTINEL {
                warn!(
                    "Did not recognize camera identifier in {}. Defaulting to Cam 0",
                    filename
                );
            }
            ImageRoute::Image0
        }
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub(crate) struct HousekeepingSnapshot {
    pub(crate) command_count: u8,
    pub(crate) command_error_count: u8,
    pub(crate) last_filename: String,
    pub(crate) notifications: u64,
}

/**
 * Telemetry counters shared between the command loop and the telemetry
 * thread.
 */
#[derive(Debug)]
pub(crate) struct Housekeeping {
    state: Mutex<HousekeepingSnapshot>,
    events: Arc<EventLog>,
}

impl Housekeeping {
    pub(crate) fn new(events: Arc<EventLog>) -> Self {
        Self {
            state: Mutex::new(HousekeepingSnapshot::default()),
            events,
        }
    }

    pub(crate) fn snapshot(&self) -> HousekeepingSnapshot {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub(crate) fn handle(&self, command: HousekeepingCommand) {
        match command {
            HousekeepingCommand::Noop => {
                self._update(|hk| hk.command_count = hk.command_count.wrapping_add(1));
                self.events
                    .record(EventId::CommandNoop, format_args!("VC0706: NOOP command"));
            }
            HousekeepingCommand::ResetCounters => self.reset_counters(),
            HousekeepingCommand::Report => {
                let hk = self.snapshot();
                info!(
                    "HK: commands={} errors={} notifications={} last='{}' events={} reply_errs={} length_errs={}",
                    hk.command_count,
                    hk.command_error_count,
                    hk.notifications,
                    hk.last_filename,
                    self.events.total(),
                    self.events.count(EventId::ReplyErr),
                    self.events.count(EventId::LengthErr)
                );
            }
        }
    }

    /**
     * Parses and runs one command line. Unknown commands only bump the error
     * counter.
     */
    pub(crate) fn handle_line(&self, line: &str) {
        if line.trim().is_empty() {
            return;
        }
        match line.parse::<HousekeepingCommand>() {
            Ok(command) => self.handle(command),
            Err(unknown) => {
                self._update(|hk| hk.command_error_count = hk.command_error_count.wrapping_add(1));
                self.events.record(
                    EventId::CommandErr,
                    format_args!("VC0706: invalid command '{}'", unknown),
                );
            }
        }
    }

    pub(crate) fn reset_counters(&self) {
        self._update(|hk| {
            hk.command_count = 0;
            hk.command_error_count = 0;
        });
        self.events
            .record(EventId::CommandReset, format_args!("VC0706: RESET command"));
    }

    pub(crate) fn record_notification(&self, filename: &str) {
        let name: String = filename.chars().take(MAX_IMAGE_NAME_LEN).collect();
        let route = route_for(&name);
        info!("image notification {} (route {:?}, cc {})", name, route, route as u8);
        self._update(|hk| {
            hk.last_filename = name;
            hk.notifications += 1;
        });
    }

    fn _update(&self, f: impl FnOnce(&mut HousekeepingSnapshot)) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut state);
    }
}

/**
 * Forwards filenames from the camera controller into housekeeping until the
 * run flag is cleared and the queue is empty.
 */
pub(crate) fn start_telemetry_controller(
    queue: Arc<NotificationQueue>,
    housekeeping: Arc<Housekeeping>,
    running: Arc<AtomicBool>,
) -> JoinHandle<()> {
    thread::spawn(move || {
        info!("Starting Telemetry Thread...");
        loop {
            match queue.pop_timeout(Duration::from_millis(500)) {
                Some(filename) => housekeeping.record_notification(&filename),
                None if !running.load(Ordering::Relaxed) => {
                    while let Some(filename) = queue.pop_timeout(Duration::ZERO) {
                        housekeeping.record_notification(&filename);
                    }
                    break;
                }
                None => {}
            }
        }
    })
}

/**
 * Reads one command per line from `input` until it closes.
 */
pub(crate) fn monitor_commands(input: impl BufRead, housekeeping: &Housekeeping) {
    for line in input.lines() {
        match line {
            Ok(line) => housekeeping.handle_line(&line),
            Err(err) => {
                warn!("command input failed: {}", err);
                break;
            }
        }
    }
}
