use std::{
    fmt,
    sync::atomic::{AtomicU64, Ordering},
};

use log::Level;

/**
 * Stable identifiers for everything the app reports. The numbers are the ones
 * the ground side filters on, so never renumber an existing entry.
 */
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum EventId {
    Startup = 1,
    CommandErr = 2,
    CommandNoop = 3,
    CommandReset = 4,
    LengthErr = 6,
    InitErr = 7,
    Init = 8,
    ReplyErr = 9,
    CaptureInfo = 10,
    ChunkAckErr = 11,
    StorageErr = 12,
}

const NUM_EVENT_IDS: usize = 13;

impl EventId {
    fn level(self) -> Level {
        match self {
            EventId::CommandErr
            | EventId::LengthErr
            | EventId::InitErr
            | EventId::ReplyErr
            | EventId::StorageErr => Level::Error,
            EventId::ChunkAckErr => Level::Warn,
            _ => Level::Info,
        }
    }
}

/**
 * Counted event log. Every record goes to the `log` facade and bumps a per-id
 * counter so housekeeping (and tests) can see what happened without scraping
 * log output. Shared between threads behind an `Arc`.
 */
#[derive(Debug, Default)]
pub(crate) struct EventLog {
    counts: [AtomicU64; NUM_EVENT_IDS],
}

impl EventLog {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record(&self, id: EventId, message: fmt::Arguments<'_>) {
        self.counts[id as usize].fetch_add(1, Ordering::Relaxed);
        log::log!(target: "vc0706::event", id.level(), "[EID {}] {}", id as u8, message);
    }

    pub(crate) fn count(&self, id: EventId) -> u64 {
        self.counts[id as usize].load(Ordering::Relaxed)
    }

    pub(crate) fn total(&self) -> u64 {
        self.counts
            .iter()
            .map(|count| count.load(Ordering::Relaxed))
            .sum()
    }
}
