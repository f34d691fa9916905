//! Capture configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;

use rdpshot_core::SessionSettings;
use serde::{Deserialize, Serialize};

/// Largest width or height the capture canvas may have.
pub const MAX_DIMENSION: u32 = 8192;

/// Top-level configuration for the capture tool.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RdpshotConfig {
    /// What to capture and where to put it.
    pub capture: CaptureConfig,
    /// Connection settings.
    pub network: NetworkConfig,
    /// Logging.
    pub logging: LoggingConfig,
}

/// Capture settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CaptureConfig {
    /// Requested desktop width.
    pub width: u32,
    /// Requested desktop height.
    pub height: u32,
    /// Prefix the host name is appended to.
    pub output_prefix: String,
    /// Output extension: "jpg" or "png".
    pub format: String,
    /// JPEG quality, 1-100.
    pub jpeg_quality: u8,
    /// Seconds without updates before the screen counts as settled.
    pub idle_timeout_secs: f64,
}

/// Network settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct NetworkConfig {
    /// Port used for targets given without one.
    pub default_port: u16,
    /// TCP connect timeout in milliseconds.
    pub connect_timeout_ms: u64,
    /// How long to wait for the server to confirm our close.
    pub close_grace_ms: u64,
}

/// Logging.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level, used when `RUST_LOG` is not set.
    pub level: String,
}

// ── Defaults ─────────────────────────────────────────────────────

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            width: 1024,
            height: 800,
            output_prefix: "/tmp/".into(),
            format: "jpg".into(),
            jpeg_quality: rdpshot_core::snapshot::DEFAULT_JPEG_QUALITY,
            idle_timeout_secs: 5.0,
        }
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            default_port: rdpshot_core::DEFAULT_PORT,
            connect_timeout_ms: 10_000,
            close_grace_ms: 2_000,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
        }
    }
}

// ── Loading ──────────────────────────────────────────────────────

impl RdpshotConfig {
    /// Load from a TOML file, falling back to defaults.
    pub fn load(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(contents) => toml::from_str(&contents).unwrap_or_else(|e| {
                tracing::warn!("invalid config {}: {e}; using defaults", path.display());
                Self::default()
            }),
            Err(_) => {
                tracing::debug!("no config at {}; using defaults", path.display());
                Self::default()
            }
        }
    }

    /// Write default config to a file.
    pub fn write_default(path: &Path) -> std::io::Result<()> {
        let text = toml::to_string_pretty(&Self::default()).map_err(std::io::Error::other)?;
        std::fs::write(path, text)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.network.connect_timeout_ms)
    }

    /// The idle timeout, or the default if the configured value is not a
    /// usable duration.
    pub fn idle_timeout(&self) -> Duration {
        Duration::try_from_secs_f64(self.capture.idle_timeout_secs).unwrap_or_else(|_| {
            let fallback = CaptureConfig::default().idle_timeout_secs;
            tracing::warn!(
                "idle timeout {} is not valid; using {fallback}s",
                self.capture.idle_timeout_secs
            );
            Duration::from_secs_f64(fallback)
        })
    }

    /// Canvas size, or the default if either side is zero or above
    /// [`MAX_DIMENSION`].
    pub fn dimensions(&self) -> (u32, u32) {
        let (width, height) = (self.capture.width, self.capture.height);
        let valid = |v: u32| (1..=MAX_DIMENSION).contains(&v);
        if valid(width) && valid(height) {
            return (width, height);
        }
        let fallback = CaptureConfig::default();
        tracing::warn!(
            "capture size {width}x{height} is not valid (1..={MAX_DIMENSION}); using {}x{}",
            fallback.width,
            fallback.height
        );
        (fallback.width, fallback.height)
    }

    /// Per-session settings derived from this config.
    pub fn to_session_settings(&self) -> SessionSettings {
        let (width, height) = self.dimensions();
        SessionSettings {
            width,
            height,
            output_prefix: PathBuf::from(&self.capture.output_prefix),
            extension: self.capture.format.trim_start_matches('.').to_ascii_lowercase(),
            jpeg_quality: self.capture.jpeg_quality.clamp(1, 100),
            idle_timeout: self.idle_timeout(),
            close_grace: Duration::from_millis(self.network.close_grace_ms),
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────
