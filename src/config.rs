use anyhow::Result;
use serde::Deserialize;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use crate::media::{DeviceConfig, FileDevice};
use crate::recording::{RecorderConfig, DEFAULT_BITS_PER_SECOND, MIME_CANDIDATES};
use crate::vad::{VadConfig, DEFAULT_FFT_SIZE, SAMPLE_INTERVAL, SPEAKING_THRESHOLD};

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub service: ServiceConfig,
    pub client: ClientConfig,
    pub media: MediaConfig,
    pub vad: VadSettings,
    pub recording: RecordingConfig,
    pub retell: RetellConfig,
    pub eleven: ElevenConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub name: String,
    pub http: HttpConfig,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: "interview-call".to_string(),
            http: HttpConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    pub bind: String,
    pub port: u16,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1".to_string(),
            port: 3000,
        }
    }
}

/// Where the interview client finds the credential routes
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub base_url: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:3000".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MediaConfig {
    /// Request a camera alongside the microphone
    pub video: bool,
    pub permission_check_ms: u64,
    pub device_change_debounce_ms: u64,
    /// Frame length file devices deliver
    pub frame_ms: u64,
    pub devices: Vec<FileDevice>,
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            video: false,
            permission_check_ms: 1000,
            device_change_debounce_ms: 300,
            frame_ms: 100,
            devices: Vec::new(),
        }
    }
}

impl MediaConfig {
    pub fn device_config(&self) -> DeviceConfig {
        DeviceConfig {
            video: self.video,
            permission_check_interval: Duration::from_millis(self.permission_check_ms),
            device_change_debounce: Duration::from_millis(self.device_change_debounce_ms),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct VadSettings {
    pub threshold: f32,
    pub interval_ms: u64,
}

impl Default for VadSettings {
    fn default() -> Self {
        Self {
            threshold: SPEAKING_THRESHOLD,
            interval_ms: SAMPLE_INTERVAL.as_millis() as u64,
        }
    }
}

impl VadSettings {
    pub fn vad_config(&self) -> VadConfig {
        VadConfig {
            threshold: self.threshold,
            interval: Duration::from_millis(self.interval_ms),
            fft_size: DEFAULT_FFT_SIZE,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RecordingConfig {
    /// Supports `~`
    pub download_dir: String,
    pub bits_per_second: u32,
    pub mime_candidates: Vec<String>,
    pub flush_poll_ms: u64,
}

impl Default for RecordingConfig {
    fn default() -> Self {
        Self {
            download_dir: "~/Downloads".to_string(),
            bits_per_second: DEFAULT_BITS_PER_SECOND,
            mime_candidates: MIME_CANDIDATES.iter().map(|s| s.to_string()).collect(),
            flush_poll_ms: 100,
        }
    }
}

impl RecordingConfig {
    pub fn download_path(&self) -> PathBuf {
        PathBuf::from(shellexpand::tilde(&self.download_dir).into_owned())
    }

    pub fn recorder_config(&self) -> RecorderConfig {
        RecorderConfig {
            mime_candidates: self.mime_candidates.clone(),
            bits_per_second: self.bits_per_second,
            flush_poll: Duration::from_millis(self.flush_poll_ms),
            download_dir: self.download_path(),
        }
    }
}

#[derive(Clone, Deserialize)]
#[serde(default)]
pub struct RetellConfig {
    pub api_base: String,
    pub api_key: String,
    /// Websocket relay that joins web calls on the client's behalf
    pub relay_url: String,
    /// Used when the LLM key's agent variable is unset
    pub default_agent_id: Option<String>,
}

impl Default for RetellConfig {
    fn default() -> Self {
        Self {
            api_base: "https://api.retellai.com".to_string(),
            api_key: String::new(),
            relay_url: "ws://127.0.0.1:8765/retell".to_string(),
            default_agent_id: None,
        }
    }
}

impl fmt::Debug for RetellConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetellConfig")
            .field("api_base", &self.api_base)
            .field("api_key", &redact(&self.api_key))
            .field("relay_url", &self.relay_url)
            .field("default_agent_id", &self.default_agent_id)
            .finish()
    }
}

#[derive(Clone, Deserialize)]
#[serde(default)]
pub struct ElevenConfig {
    pub api_base: String,
    pub api_key: String,
    pub default_agent_id: Option<String>,
}

impl Default for ElevenConfig {
    fn default() -> Self {
        Self {
            api_base: "https://api.elevenlabs.io".to_string(),
            api_key: String::new(),
            default_agent_id: None,
        }
    }
}

impl fmt::Debug for ElevenConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ElevenConfig")
            .field("api_base", &self.api_base)
            .field("api_key", &redact(&self.api_key))
            .field("default_agent_id", &self.default_agent_id)
            .finish()
    }
}

fn redact(secret: &str) -> &'static str {
    if secret.is_empty() {
        "<unset>"
    } else {
        "<redacted>"
    }
}

impl Config {
    /// Load `<path>.toml` (optional) overlaid with `INTERVIEW__*` variables
    ///
    /// `INTERVIEW__RETELL__API_KEY=...` sets `retell.api_key`.
    pub fn load(path: &str) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name(path).required(false))
            .add_source(
                config::Environment::with_prefix("INTERVIEW")
                    .prefix_separator("__")
                    .separator("__"),
            )
            .build()?;

        Ok(settings.try_deserialize()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_without_file() {
        let cfg = Config::load("config/does-not-exist").unwrap();
        assert_eq!(cfg.media.permission_check_ms, 1000);
        assert_eq!(cfg.media.device_change_debounce_ms, 300);
        assert_eq!(cfg.vad.threshold, 15.0);
        assert_eq!(cfg.recording.bits_per_second, 100_000);
        assert_eq!(cfg.retell.api_base, "https://api.retellai.com");
    }

    #[test]
    fn test_debug_redacts_api_keys() {
        let mut cfg = Config::default();
        cfg.eleven.api_key = "xi-secret".to_string();
        let debug = format!("{:?}", cfg);
        assert!(!debug.contains("xi-secret"));
        assert!(debug.contains("<redacted>"));
    }

    #[test]
    fn test_download_dir_expands_home() {
        let recording = RecordingConfig {
            download_dir: "~/interviews".to_string(),
            ..Default::default()
        };
        assert!(!recording.download_path().to_string_lossy().starts_with('~'));
    }
}
