mod camera_controller;
mod camera_session;
mod common;
mod error;
mod events;
mod frame_buffer;
mod housekeeping;
mod image_sink;
mod led_controller;
mod protocol;
mod transport;
mod user_config;

#[cfg(test)]
mod test_support;

use std::{
    io::stdin,
    path::Path,
    process,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

use log::{error, info, warn};
use rppal::{gpio::Gpio, uart::Uart};

use crate::{
    camera_controller::{read_reboot_prefix, start_camera_controller, CaptureScheduler},
    camera_session::CameraSession,
    common::NotificationQueue,
    events::{EventId, EventLog},
    housekeeping::{monitor_commands, start_telemetry_controller, Housekeeping},
    image_sink::ImageSink,
    led_controller::{start_led_flash, start_photo_count, Flash, PhotoCountBus, Unwired},
    transport::{open_uart, ThreadPacer},
    user_config::AppConfig,
};

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = match AppConfig::read() {
        Ok(config) => config,
        Err(err) => {
            error!("{}", err);
            process::exit(1);
        }
    };
    info!("{:?}", config);

    let events = Arc::new(EventLog::new());
    let running = Arc::new(AtomicBool::new(true));

    let (flash, photo_count) = _start_outputs(&config);
    let reboot_prefix = read_reboot_prefix(Path::new(&config.reboot_file));

    let mut sessions = Vec::with_capacity(config.interfaces.len());
    for interface_id in &config.interfaces {
        let mut session: CameraSession<Uart> = CameraSession::new(*interface_id, events.clone());
        if let Err(err) = session.initialize(
            open_uart,
            Box::new(ThreadPacer),
            config.poll_quantum,
            running.clone(),
        ) {
            error!("Camera initialization error on interface {}: {}", interface_id, err);
        } else {
            _prepare_session(&mut session, &config);
        }
        info!("camera {}: {:?}", interface_id, session.state());
        sessions.push(session);
    }

    events.record(
        EventId::Startup,
        format_args!("VC0706 app initialized, version {}", env!("CARGO_PKG_VERSION")),
    );

    let queue = Arc::new(NotificationQueue::new());
    let housekeeping = Arc::new(Housekeeping::new(events.clone()));

    let scheduler = CaptureScheduler::new(
        sessions,
        flash,
        photo_count,
        Box::new(queue.clone()),
        ImageSink::new(&config.image_dir),
        config.capture,
        reboot_prefix,
        running.clone(),
    );
    let camera_controller = start_camera_controller(scheduler);
    let telemetry_handle =
        start_telemetry_controller(queue, housekeeping.clone(), running.clone());

    // Commands come in on stdin; closing it shuts the app down.
    monitor_commands(stdin().lock(), &housekeeping);

    info!("command input closed, stopping");
    running.store(false, Ordering::Relaxed);
    camera_controller.thread_handle.thread().unpark();
    for handle in [camera_controller.thread_handle, telemetry_handle] {
        if handle.join().is_err() {
            error!("worker thread panicked");
        }
    }
}

/**
 * Claims the flash LED and photo count lines. Anything that cannot be claimed
 * is replaced with an unwired stand-in so capture keeps going without it.
 */
fn _start_outputs(config: &AppConfig) -> (Box<dyn Flash>, Box<dyn PhotoCountBus>) {
    let gpio = match Gpio::new() {
        Ok(gpio) => gpio,
        Err(err) => {
            warn!("GPIO unavailable, running without flash or photo count: {}", err);
            return (Box::new(Unwired), Box::new(Unwired));
        }
    };

    let flash: Box<dyn Flash> = match config.led_pin.map(|pin| start_led_flash(&gpio, pin)) {
        Some(Ok(flash)) => Box::new(flash),
        Some(Err(err)) => {
            warn!("flash LED unavailable: {}", err);
            Box::new(Unwired)
        }
        None => Box::new(Unwired),
    };
    let photo_count: Box<dyn PhotoCountBus> =
        match start_photo_count(&gpio, &config.photo_count_pins) {
            Ok(bus) => Box::new(bus),
            Err(err) => {
                warn!("photo count lines unavailable: {}", err);
                Box::new(Unwired)
            }
        };

    (flash, photo_count)
}

fn _prepare_session(session: &mut CameraSession<Uart>, config: &AppConfig) {
    let interface_id = session.interface_id();
    if config.reset_on_start {
        if let Err(err) = session.reset().and_then(|()| session.resume_video()) {
            warn!("camera {}: reset failed: {}", interface_id, err);
        }
    }
    if let Some(enabled) = config.motion_detect {
        if let Err(err) = session.set_motion_detect(enabled) {
            warn!("camera {}: motion detect setup failed: {}", interface_id, err);
        }
    }
    info!(
        "camera {}: motion detection {}",
        interface_id,
        if session.motion_enabled() { "on" } else { "off" }
    );
}
