//! Application configuration
//!
//! Loaded from `config.toml` in the platform config directory, falling back to
//! built-in defaults. Every section is optional in the file.

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::constants::*;
use crate::error::{Error, Result};
use crate::protocol::AudioInfo;

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub network: NetworkConfig,
    pub ui: UiConfig,
    pub session: SessionConfig,
    pub reader: ReaderConfig,
    pub transcoder: TranscoderConfig,
}

/// UDP ingress settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Address the data socket binds to
    pub bind_address: String,
    /// UDP data port
    pub udp_port: u16,
    /// Host handed to producers in the signalling response
    pub advertised_host: String,
    /// Receive buffer per datagram
    pub max_datagram_size: usize,
    /// Kernel socket receive buffer size in bytes
    pub recv_buffer_size: usize,
    /// Log every received packet
    pub echo_packets: bool,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0".to_string(),
            udp_port: DEFAULT_UDP_PORT,
            advertised_host: "127.0.0.1".to_string(),
            max_datagram_size: MAX_DATAGRAM_SIZE,
            recv_buffer_size: 1024 * 1024,
            echo_packets: false,
        }
    }
}

/// HTTP signalling and egress settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UiConfig {
    pub bind_address: String,
    pub http_port: u16,
    /// Directory served under `/static`
    pub static_dir: PathBuf,
}

impl Default for UiConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0".to_string(),
            http_port: DEFAULT_HTTP_PORT,
            static_dir: PathBuf::from("static"),
        }
    }
}

/// Per-session fan-out settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Format assigned to newly created sessions
    pub audio_info: AudioInfo,
    /// Inbound queue depth between ingress and dispatcher
    pub inbound_capacity: usize,
    /// How long a listener may stall before a packet is forfeited
    pub delivery_timeout_ms: u64,
    /// Packets queued per listener ahead of its delivery worker
    pub delivery_backlog: usize,
}

impl SessionConfig {
    pub fn delivery_timeout(&self) -> Duration {
        Duration::from_millis(self.delivery_timeout_ms)
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            audio_info: AudioInfo::default(),
            inbound_capacity: DEFAULT_INBOUND_CAPACITY,
            delivery_timeout_ms: DEFAULT_DELIVERY_TIMEOUT_MS,
            delivery_backlog: DEFAULT_DELIVERY_BACKLOG,
        }
    }
}

/// Stream reader settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReaderConfig {
    /// Listener channel depth; the reorder buffer holds one and a half times this
    pub buffer_length: usize,
    /// Upper bound on how long an idle reader waits before re-checking its buffer
    pub poll_interval_ms: u64,
}

impl ReaderConfig {
    pub fn channel_capacity(&self) -> usize {
        self.buffer_length.max(1)
    }

    pub fn reorder_capacity(&self) -> usize {
        let len = self.channel_capacity();
        len + len / 2
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }
}

impl Default for ReaderConfig {
    fn default() -> Self {
        Self {
            buffer_length: DEFAULT_READER_BUFFER_LENGTH,
            poll_interval_ms: DEFAULT_READER_POLL_MS,
        }
    }
}

/// External transcoder settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TranscoderConfig {
    /// Executable to spawn
    pub program: String,
    /// Arguments used verbatim instead of the generated ffmpeg ones
    pub args: Vec<String>,
    /// ffmpeg output container
    pub output_format: String,
    /// Content-Type of the HTTP response
    pub content_type: String,
    /// Bytes per write into the transcoder's stdin
    pub chunk_size: usize,
}

impl Default for TranscoderConfig {
    fn default() -> Self {
        Self {
            program: "ffmpeg".to_string(),
            args: Vec::new(),
            output_format: "mp3".to_string(),
            content_type: "audio/mpeg".to_string(),
            chunk_size: 4096,
        }
    }
}

impl AppConfig {
    /// Default location of the config file
    pub fn default_path() -> Option<PathBuf> {
        ProjectDirs::from("", "", "cloud-audio-relay").map(|dirs| dirs.config_dir().join("config.toml"))
    }

    /// Load from the default location, or defaults if there is no file
    pub fn load() -> Result<Self> {
        match Self::default_path() {
            Some(path) if path.exists() => Self::load_from(&path),
            _ => {
                tracing::debug!("No config file found, using defaults");
                Ok(Self::default())
            }
        }
    }

    /// Load from an explicit path
    pub fn load_from(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&text)
            .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))?;
        config.validate()?;
        tracing::info!("Loaded config from {}", path.display());
        Ok(config)
    }

    /// Write to `path`, creating parent directories
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let text = toml::to_string_pretty(self).map_err(|e| Error::Config(e.to_string()))?;
        std::fs::write(path, text)?;
        Ok(())
    }

    /// Reject settings the relay cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.network.max_datagram_size < crate::protocol::HEADER_SIZE {
            return Err(Error::Config(format!(
                "max_datagram_size {} is smaller than the packet header",
                self.network.max_datagram_size
            )));
        }
        if self.session.inbound_capacity == 0 || self.session.delivery_backlog == 0 {
            return Err(Error::Config("session queue depths must be non-zero".into()));
        }
        let audio = &self.session.audio_info;
        if audio.sample_rate == 0 || audio.channels == 0 || audio.bytes_per_sample == 0 {
            return Err(Error::Config("audio_info fields must be non-zero".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = AppConfig::default();
        assert_eq!(config.network.udp_port, 2445);
        assert_eq!(config.ui.http_port, 2444);
        assert_eq!(config.session.delivery_timeout(), Duration::from_secs(1));
        assert_eq!(config.reader.channel_capacity(), 10);
        assert_eq!(config.reader.reorder_capacity(), 15);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml() {
        let config: AppConfig = toml::from_str(
            r#"
            [network]
            udp_port = 9000

            [session]
            delivery_timeout_ms = 250
            "#,
        )
        .unwrap();

        assert_eq!(config.network.udp_port, 9000);
        assert_eq!(config.network.max_datagram_size, MAX_DATAGRAM_SIZE);
        assert_eq!(config.session.delivery_timeout(), Duration::from_millis(250));
        assert_eq!(config.ui, UiConfig::default());
    }

    #[test]
    fn test_save_and_load() {
        let path = std::env::temp_dir()
            .join(format!("cloud-audio-relay-{}", std::process::id()))
            .join("config.toml");

        let mut config = AppConfig::default();
        config.transcoder.output_format = "ogg".to_string();
        config.save_to(&path).unwrap();

        let loaded = AppConfig::load_from(&path).unwrap();
        assert_eq!(loaded, config);

        let _ = std::fs::remove_dir_all(path.parent().unwrap());
    }

    #[test]
    fn test_validate_rejects_tiny_datagrams() {
        let mut config = AppConfig::default();
        config.network.max_datagram_size = 8;
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }
}
