use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub(crate) enum CameraError {
    #[error("could not open serial port {path}: {source}")]
    SerialOpen {
        path: String,
        #[source]
        source: rppal::uart::Error,
    },

    #[error("serial i/o failed: {0}")]
    Serial(#[from] rppal::uart::Error),

    #[error("gpio setup failed: {0}")]
    Gpio(#[from] rppal::gpio::Error),

    #[error("camera {0} is not ready")]
    NotReady(u8),

    #[error("camera {interface} sent an unexpected reply to opcode {opcode:#04x}: {reply:02x?}")]
    BadReply {
        interface: u8,
        opcode: u8,
        reply: Vec<u8>,
    },

    #[error("camera {interface} kept reporting oversized frames after {attempts} attempts")]
    OversizeRetriesExhausted { interface: u8, attempts: u32 },

    #[error("camera {interface} sent a bad trailing ack for the chunk ending at offset {offset}")]
    ChunkAck { interface: u8, offset: u32 },

    #[error("could not store image {}: {source}", path.display())]
    Storage {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("capture cancelled")]
    Cancelled,
}

#[derive(Debug, Error)]
pub(crate) enum ConfigError {
    #[error("could not read {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("could not parse {path} as json: {source}")]
    Parse {
        path: String,
        #[source]
        source: json::Error,
    },

    #[error("invalid value for '{key}' in {path}")]
    Invalid { path: String, key: &'static str },
}

pub(crate) type Result<T> = std::result::Result<T, CameraError>;
