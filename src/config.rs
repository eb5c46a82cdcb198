//! YAML configuration for readers, aligners and capture sessions.
//!
//! Every section has defaults, so an empty document is a valid
//! configuration:
//!
//! ```yaml
//! sample_rate: 65536
//! reader:
//!   channels: [13]
//!   min_capture_ms: 2000
//! alignment:
//!   policy: pulse
//!   pulse:
//!     threshold: 0.2
//!     pre_samples: 1024
//!     post_samples: 4096
//! session:
//!   capture_ms: 5000
//!   reference_endpoint: 192.168.100.2:8001
//!   sync_endpoint: 192.168.100.3:8001
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::align::{DelayCalibrator, PulseConfig};
use crate::providers::{DEFAULT_MAX_PAYLOAD, DEFAULT_RECEIVE_BUFFER};
use crate::types::PulseScope;
use crate::{Result, TelemetryError};

/// Device sample rate used when none is configured (131072 Hz / 2).
pub const DEFAULT_SAMPLE_RATE: f64 = 65536.0;

/// Top-level configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Analog sample rate in Hz.
    pub sample_rate: f64,
    pub reader: ReaderConfig,
    pub alignment: AlignmentConfig,
    pub calibration: DelayCalibrator,
    pub session: SessionConfig,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            sample_rate: DEFAULT_SAMPLE_RATE,
            reader: ReaderConfig::default(),
            alignment: AlignmentConfig::default(),
            calibration: DelayCalibrator::default(),
            session: SessionConfig::default(),
        }
    }
}

impl SyncConfig {
    /// Parse and validate a YAML document.
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let config: SyncConfig = serde_yaml_ng::from_str(yaml)
            .map_err(|e| TelemetryError::config(format!("invalid configuration: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let yaml = std::fs::read_to_string(path)
            .map_err(|e| TelemetryError::file_error(path.to_path_buf(), e))?;
        debug!("Loaded configuration from {}", path.display());
        Self::from_yaml_str(&yaml)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let yaml = serde_yaml_ng::to_string(self)
            .map_err(|e| TelemetryError::config(format!("cannot encode configuration: {}", e)))?;
        std::fs::write(path, yaml).map_err(|e| TelemetryError::file_error(path.to_path_buf(), e))
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.sample_rate.is_finite() && self.sample_rate > 0.0) {
            return Err(TelemetryError::config(format!(
                "sample rate must be positive, got {}",
                self.sample_rate
            )));
        }
        if self.reader.initial_buffer == 0 {
            return Err(TelemetryError::config("reader initial buffer must be non-zero"));
        }
        if self.reader.max_payload == 0 {
            return Err(TelemetryError::config("reader payload limit must be non-zero"));
        }
        let designated = [
            ("reference", self.alignment.reference_channel),
            ("sync", self.alignment.sync_channel),
        ];
        for (side, channel) in designated {
            if let Some(id) = channel
                && !self.reader.channels.contains(&id)
            {
                return Err(TelemetryError::config(format!(
                    "{} channel {} is not subscribed (reader channels {:?})",
                    side, id, self.reader.channels
                )));
            }
        }
        if self.session.capture_ms == 0 {
            return Err(TelemetryError::config("session capture time must be non-zero"));
        }
        self.alignment.pulse.validate()?;
        self.calibration.validate()
    }

    /// Validate for a capture session, which needs analog data to align.
    pub fn validate_session(&self) -> Result<()> {
        self.validate()?;
        if self.reader.channels.is_empty() {
            return Err(TelemetryError::config(
                "session reader subscribes to no analog channel; set reader.channels",
            ));
        }
        Ok(())
    }
}

/// Stream reader settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReaderConfig {
    /// Subscribed analog channel ids.
    pub channels: Vec<u16>,
    /// Minimum capture window, measured from the first packet, honoured by `stop`.
    pub min_capture_ms: u64,
    /// Initial receive buffer size in bytes.
    pub initial_buffer: usize,
    /// Largest payload a frame header may declare.
    pub max_payload: usize,
    pub connect_timeout_ms: u64,
}

impl Default for ReaderConfig {
    fn default() -> Self {
        Self {
            channels: Vec::new(),
            min_capture_ms: 2000,
            initial_buffer: DEFAULT_RECEIVE_BUFFER,
            max_payload: DEFAULT_MAX_PAYLOAD,
            connect_timeout_ms: 5000,
        }
    }
}

impl ReaderConfig {
    /// Reader subscribed to `channels` with default settings otherwise.
    pub fn for_channels(channels: impl IntoIterator<Item = u16>) -> Self {
        Self { channels: channels.into_iter().collect(), ..Default::default() }
    }

    pub fn min_capture(&self) -> Duration {
        Duration::from_millis(self.min_capture_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

/// How two systems are put on a common time base.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlignmentPolicy {
    Gps,
    #[default]
    Ptp,
    Pulse,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AlignmentConfig {
    pub policy: AlignmentPolicy,
    /// Designated channel on the reference system; lowest analog id when unset.
    pub reference_channel: Option<u16>,
    /// Designated channel on the sync system; lowest analog id when unset.
    pub sync_channel: Option<u16>,
    pub pulse: PulseConfig,
    /// Narrow aligned blocks to the calibration pulse when set.
    pub scope: Option<PulseScope>,
}

/// Repeating capture settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Capture time per cycle.
    pub capture_ms: u64,
    /// Pause between cycles.
    pub cycle_interval_ms: u64,
    /// `host:port` of the reference system's stream.
    pub reference_endpoint: Option<String>,
    /// `host:port` of the sync system's stream.
    pub sync_endpoint: Option<String>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            capture_ms: 5000,
            cycle_interval_ms: 60_000,
            reference_endpoint: None,
            sync_endpoint: None,
        }
    }
}

impl SessionConfig {
    pub fn capture(&self) -> Duration {
        Duration::from_millis(self.capture_ms)
    }

    pub fn cycle_interval(&self) -> Duration {
        Duration::from_millis(self.cycle_interval_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;

    #[test]
    fn empty_document_gives_defaults() -> Result<()> {
        let config = SyncConfig::from_yaml_str("{}")?;
        assert_eq!(config, SyncConfig::default());
        assert_eq!(config.sample_rate, 65536.0);
        assert_eq!(config.reader.min_capture(), Duration::from_secs(2));
        assert_eq!(config.calibration.compare_period, 65536);
        assert_eq!(config.alignment.policy, AlignmentPolicy::Ptp);
        Ok(())
    }

    #[test]
    fn partial_sections_keep_other_defaults() -> Result<()> {
        let yaml = r#"
reader:
  channels: [13, 14]
alignment:
  policy: pulse
  sync_channel: 14
  pulse:
    pre_samples: 256
  scope:
    margin: 10
session:
  reference_endpoint: "10.0.0.2:8001"
"#;
        let config = SyncConfig::from_yaml_str(yaml)?;
        assert_eq!(config.reader.channels, vec![13, 14]);
        assert_eq!(config.reader.initial_buffer, DEFAULT_RECEIVE_BUFFER);
        assert_eq!(config.alignment.policy, AlignmentPolicy::Pulse);
        assert_eq!(config.alignment.sync_channel, Some(14));
        assert_eq!(config.alignment.reference_channel, None);
        assert_eq!(config.alignment.pulse.pre_samples, 256);
        assert_eq!(config.alignment.pulse.post_samples, 4096);
        assert_eq!(config.alignment.scope, Some(PulseScope { threshold: 0.1, margin: 10 }));
        assert_eq!(config.session.reference_endpoint.as_deref(), Some("10.0.0.2:8001"));
        assert_eq!(config.session.cycle_interval(), Duration::from_secs(60));
        Ok(())
    }

    #[test]
    fn invalid_values_are_config_errors() {
        for yaml in [
            "sample_rate: 0",
            "alignment: { pulse: { transform_length: 1000 } }",
            "alignment: { pulse: { post_samples: 0 } }",
            "alignment: { policy: radio }",
            "calibration: { high_threshold: -1.0 }",
            "session: { capture_ms: 0 }",
            "reader: { max_payload: 0 }",
            "alignment: { reference_channel: 3 }",
            "reader: { channels: [1, 2] }\nalignment: { sync_channel: 3 }",
        ] {
            let result = SyncConfig::from_yaml_str(yaml);
            assert!(matches!(result, Err(TelemetryError::Config { .. })), "{yaml}");
        }
    }

    #[test]
    fn sessions_need_a_subscription() -> Result<()> {
        let config = SyncConfig::default();
        config.validate()?;
        assert!(matches!(config.validate_session(), Err(TelemetryError::Config { .. })));

        let config = SyncConfig::from_yaml_str(
            "reader: { channels: [13] }\nalignment: { reference_channel: 13, sync_channel: 13 }",
        )?;
        config.validate_session()?;
        assert_eq!(config.reader.max_payload, DEFAULT_MAX_PAYLOAD);
        Ok(())
    }

    #[test]
    fn save_then_load_preserves_config() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("qsync.yaml");

        let mut config = SyncConfig::default();
        config.reader.channels = vec![1, 2, 3];
        config.alignment.policy = AlignmentPolicy::Gps;
        config.session.sync_endpoint = Some("127.0.0.1:9000".to_string());
        config.save(&path)?;

        assert_eq!(SyncConfig::load(&path)?, config);
        Ok(())
    }

    #[test]
    fn missing_file_is_file_error() {
        let result = SyncConfig::load("/no/such/qsync.yaml");
        assert!(matches!(result, Err(TelemetryError::File { .. })));
    }
}
