use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub stream: StreamConfig,
    #[serde(default)]
    pub output: OutputConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Per-session stream settings. Immutable once a session is created from it.
#[derive(Debug, Clone, Deserialize)]
pub struct StreamConfig {
    pub url: String,
    /// Seconds after the first delivered frame before the session stops
    /// itself. Zero or negative disables the auto-stop timer.
    #[serde(default)]
    pub auto_stop_secs: i64,
    #[serde(default = "default_enable_log")]
    pub enable_log: bool,
    /// Target dimensions for the presentation layer. The stream core never
    /// resizes frames itself.
    #[serde(default)]
    pub resize: Option<ResizeTarget>,
    #[serde(default = "default_max_frame_bytes")]
    pub max_frame_bytes: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct ResizeTarget {
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OutputConfig {
    #[serde(default)]
    pub dir: Option<PathBuf>,
    #[serde(default = "default_log_every")]
    pub log_every: u64,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            dir: None,
            log_every: default_log_every(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadFile(path.display().to_string(), e))?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Config =
            toml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.stream.validate()?;
        if config.output.log_every == 0 {
            return Err(ConfigError::Invalid("output.log_every must be at least 1".into()));
        }
        Ok(config)
    }
}

impl StreamConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            auto_stop_secs: 0,
            enable_log: default_enable_log(),
            resize: None,
            max_frame_bytes: default_max_frame_bytes(),
        }
    }

    pub fn with_auto_stop(mut self, secs: i64) -> Self {
        self.auto_stop_secs = secs;
        self
    }

    pub fn with_logging(mut self, enable_log: bool) -> Self {
        self.enable_log = enable_log;
        self
    }

    pub fn with_resize(mut self, width: u32, height: u32) -> Self {
        self.resize = Some(ResizeTarget { width, height });
        self
    }

    pub fn with_max_frame_bytes(mut self, max_frame_bytes: usize) -> Self {
        self.max_frame_bytes = max_frame_bytes;
        self
    }

    /// The auto-stop duration, or `None` when the timer is disabled.
    pub fn auto_stop(&self) -> Option<std::time::Duration> {
        (self.auto_stop_secs > 0).then(|| std::time::Duration::from_secs(self.auto_stop_secs as u64))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.url.trim().is_empty() {
            return Err(ConfigError::Invalid("stream.url must not be empty".into()));
        }
        if let Some(target) = self.resize {
            if target.width == 0 || target.height == 0 {
                return Err(ConfigError::Invalid(format!(
                    "stream.resize must be non-zero, got {}x{}",
                    target.width, target.height
                )));
            }
        }
        if self.max_frame_bytes == 0 {
            return Err(ConfigError::Invalid("stream.max_frame_bytes must be at least 1".into()));
        }
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {0}: {1}")]
    ReadFile(String, std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(String),
    #[error("invalid config: {0}")]
    Invalid(String),
}

// Default value functions
fn default_enable_log() -> bool {
    true
}
fn default_max_frame_bytes() -> usize {
    16 * 1024 * 1024
}
fn default_log_every() -> u64 {
    30
}
fn default_log_level() -> String {
    "info".into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_config_uses_defaults() {
        let config = Config::from_toml(
            r#"
            [stream]
            url = "http://camera.local/stream"
            "#,
        )
        .unwrap();
        assert_eq!(config.stream.url, "http://camera.local/stream");
        assert_eq!(config.stream.auto_stop_secs, 0);
        assert!(config.stream.auto_stop().is_none());
        assert!(config.stream.enable_log);
        assert!(config.stream.resize.is_none());
        assert_eq!(config.output.log_every, 30);
        assert!(config.output.dir.is_none());
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn full_config() {
        let config = Config::from_toml(
            r#"
            [stream]
            url = "http://camera.local/stream"
            auto_stop_secs = 15
            enable_log = false
            max_frame_bytes = 1048576
            resize = { width = 320, height = 240 }

            [output]
            dir = "/tmp/snapshots"
            log_every = 10

            [logging]
            level = "debug"
            "#,
        )
        .unwrap();
        assert_eq!(config.stream.auto_stop(), Some(std::time::Duration::from_secs(15)));
        assert!(!config.stream.enable_log);
        assert_eq!(
            config.stream.resize,
            Some(ResizeTarget {
                width: 320,
                height: 240
            })
        );
        assert_eq!(config.stream.max_frame_bytes, 1048576);
        assert_eq!(config.output.dir, Some(PathBuf::from("/tmp/snapshots")));
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn negative_auto_stop_disables_timer() {
        let config = StreamConfig::new("http://cam").with_auto_stop(-1);
        assert!(config.auto_stop().is_none());
    }

    #[test]
    fn rejects_empty_url() {
        let err = StreamConfig::new("  ").validate().unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn rejects_zero_resize() {
        let err = StreamConfig::new("http://cam")
            .with_resize(0, 240)
            .validate()
            .unwrap_err();
        assert!(err.to_string().contains("0x240"));
    }

    #[test]
    fn rejects_unparsable_toml() {
        assert!(matches!(
            Config::from_toml("[stream"),
            Err(ConfigError::Parse(_))
        ));
    }
}
