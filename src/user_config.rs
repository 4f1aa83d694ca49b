use std::{fs::read_to_string, io::ErrorKind, path::Path, time::Duration};

use json::JsonValue;
use log::warn;

use crate::{error::ConfigError, frame_buffer::CapturePolicy, transport::DEFAULT_POLL_QUANTUM};

pub(crate) const CONFIG_PATH: &str = "./config";
const APP_CONFIG_FILE: &str = "vc0706.json";
/** Upper bound for max_frame_len; the frame buffer is allocated up front. */
const FRAME_LEN_LIMIT: u32 = 0x00FF_FFFF;

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct AppConfig {
    /** Serial interfaces to drive, i.e. 0 for /dev/ttyAMA0. Visited in this order. */
    pub(crate) interfaces: Vec<u8>,
    pub(crate) image_dir: String,
    pub(crate) reboot_file: String,
    /** BCM pin driving the flash LED. */
    pub(crate) led_pin: Option<u8>,
    /** Photo count lines, least significant bit first. */
    pub(crate) photo_count_pins: Vec<u8>,
    pub(crate) capture: CapturePolicy,
    pub(crate) poll_quantum: Duration,
    /** Reset each camera (and resume video) once it is opened. */
    pub(crate) reset_on_start: bool,
    /** Motion detection setting pushed at startup; None leaves the module alone. */
    pub(crate) motion_detect: Option<bool>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            interfaces: vec![0, 1],
            image_dir: String::from("/ram/images"),
            reboot_file: String::from("/ram/logs/reboot.txt"),
            led_pin: Some(16),
            photo_count_pins: vec![36, 35, 34, 33, 32, 31],
            capture: CapturePolicy::default(),
            poll_quantum: DEFAULT_POLL_QUANTUM,
            reset_on_start: false,
            motion_detect: None,
        }
    }
}

///////////////////
// Implementations
///////////////////
impl AppConfig {
    /**
     * Reads ./config/vc0706.json. A missing file means defaults; a file that
     * exists but does not parse is an error.
     */
    pub(crate) fn read() -> Result<Self, ConfigError> {
        Self::read_from(&Path::new(CONFIG_PATH).join(APP_CONFIG_FILE))
    }

    pub(crate) fn read_from(path: &Path) -> Result<Self, ConfigError> {
        let display = path.display().to_string();
        match read_to_string(path) {
            Ok(raw) => Self::parse(&raw, &display),
            Err(err) if err.kind() == ErrorKind::NotFound => {
                warn!("{} not found, using default configuration", display);
                Ok(Self::default())
            }
            Err(source) => Err(ConfigError::Read {
                path: display,
                source,
            }),
        }
    }

    pub(crate) fn parse(raw: &str, path: &str) -> Result<Self, ConfigError> {
        let config_json = json::parse(raw).map_err(|source| ConfigError::Parse {
            path: path.to_string(),
            source,
        })?;
        let invalid = |key| ConfigError::Invalid {
            path: path.to_string(),
            key,
        };

        let mut config = Self::default();

        if let Some(interfaces) = _parse_u8_list(&config_json["interfaces"]) {
            config.interfaces = interfaces.ok_or_else(|| invalid("interfaces"))?;
        }
        if !config_json["image_dir"].is_null() {
            config.image_dir = config_json["image_dir"]
                .as_str()
                .ok_or_else(|| invalid("image_dir"))?
                .to_string();
        }
        if !config_json["reboot_file"].is_null() {
            config.reboot_file = config_json["reboot_file"]
                .as_str()
                .ok_or_else(|| invalid("reboot_file"))?
                .to_string();
        }
        if config_json.has_key("led_pin") {
            let led_json = &config_json["led_pin"];
            config.led_pin = if led_json.is_null() {
                None
            } else {
                Some(led_json.as_u8().ok_or_else(|| invalid("led_pin"))?)
            };
        }
        if let Some(pins) = _parse_u8_list(&config_json["photo_count_pins"]) {
            config.photo_count_pins = pins.ok_or_else(|| invalid("photo_count_pins"))?;
        }
        if !config_json["max_frame_len"].is_null() {
            config.capture.max_frame_len = config_json["max_frame_len"]
                .as_u32()
                .filter(|len| *len > 0 && *len <= FRAME_LEN_LIMIT)
                .ok_or_else(|| invalid("max_frame_len"))?;
        }
        if !config_json["max_capture_attempts"].is_null() {
            config.capture.max_attempts = config_json["max_capture_attempts"]
                .as_u32()
                .filter(|attempts| *attempts > 0)
                .ok_or_else(|| invalid("max_capture_attempts"))?;
        }
        if !config_json["reject_corrupt_chunks"].is_null() {
            config.capture.reject_corrupt_chunks = config_json["reject_corrupt_chunks"]
                .as_bool()
                .ok_or_else(|| invalid("reject_corrupt_chunks"))?;
        }
        if !config_json["poll_quantum_ms"].is_null() {
            let millis = config_json["poll_quantum_ms"]
                .as_u64()
                .filter(|millis| *millis > 0)
                .ok_or_else(|| invalid("poll_quantum_ms"))?;
            config.poll_quantum = Duration::from_millis(millis);
        }

        if !config_json["reset_on_start"].is_null() {
            config.reset_on_start = config_json["reset_on_start"]
                .as_bool()
                .ok_or_else(|| invalid("reset_on_start"))?;
        }
        if !config_json["motion_detect"].is_null() {
            config.motion_detect = Some(
                config_json["motion_detect"]
                    .as_bool()
                    .ok_or_else(|| invalid("motion_detect"))?,
            );
        }

        Ok(config)
    }
}

/**
 * None when the key is absent, Some(None) when it is present but is not an
 * array of small integers.
 */
fn _parse_u8_list(json_value: &JsonValue) -> Option<Option<Vec<u8>>> {
    if json_value.is_null() {
        return None;
    }
    if !json_value.is_array() {
        return Some(None);
    }
    Some(json_value.members().map(|val| val.as_u8()).collect())
}
