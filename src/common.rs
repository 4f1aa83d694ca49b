use std::{
    sync::{Arc, Condvar, Mutex, PoisonError},
    time::Duration,
};

use log::warn;
use queues::{IsQueue, Queue};

use crate::camera_controller::CaptureNotifier;

/**
 * Filenames travelling from the camera controller to the telemetry thread.
 */
#[derive(Debug)]
pub(crate) struct NotificationQueue {
    pub(crate) filled_queue: Mutex<Queue<String>>,
    pub(crate) filled_cv: Condvar,
}

impl NotificationQueue {
    pub(crate) fn new() -> Self {
        Self {
            filled_queue: Mutex::new(Queue::new()),
            filled_cv: Condvar::new(),
        }
    }

    pub(crate) fn push(&self, filename: &str) {
        {
            let mut filled_q = self
                .filled_queue
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            if let Err(err) = filled_q.add(filename.to_string()) {
                warn!("dropping notification {}: {}", filename, err);
            }
        }
        self.filled_cv.notify_all();
    }

    /**
     * Pops the oldest filename, waiting up to `timeout` for one to show up.
     */
    pub(crate) fn pop_timeout(&self, timeout: Duration) -> Option<String> {
        let mut filled_q = self
            .filled_queue
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if let Ok(filename) = filled_q.remove() {
            return Some(filename);
        }

        let (mut filled_q, _) = self
            .filled_cv
            .wait_timeout(filled_q, timeout)
            .unwrap_or_else(PoisonError::into_inner);
        filled_q.remove().ok()
    }
}

impl CaptureNotifier for Arc<NotificationQueue> {
    fn notify(&mut self, filename: &str) {
        self.push(filename);
    }
}
