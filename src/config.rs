use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct PupilConfig {
    pub recording: RecordingConfig,
    pub session: SessionConfig,
    pub video: VideoConfig,
    pub bus: BusConfig,
    pub runtime: RuntimeConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct RecordingConfig {
    /// Recording directory holding the eye videos
    #[serde(default = "default_recording_path")]
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct SessionConfig {
    /// Subdirectory of the recording that holds offline results
    #[serde(default = "default_data_dir")]
    pub data_dir: String,

    /// Base name shared by the results file and the metadata file
    #[serde(default = "default_session_name")]
    pub name: String,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct VideoConfig {
    /// Candidate eye video extensions, probed in order
    #[serde(default = "default_video_extensions")]
    pub extensions: Vec<String>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct BusConfig {
    /// Broadcast channel capacity (high water mark)
    #[serde(default = "default_bus_capacity")]
    pub capacity: usize,

    /// Log every published message at debug level
    #[serde(default)]
    pub debug_logging: bool,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct RuntimeConfig {
    /// Host ticks per second
    #[serde(default = "default_tick_hz")]
    pub tick_hz: u32,
}

impl PupilConfig {
    /// Load configuration from a specific file path, then apply environment overrides
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path_str = path.as_ref().to_string_lossy();
        debug!("Loading configuration from: {}", path_str);

        let settings = Config::builder()
            .set_default(
                "recording.path",
                default_recording_path().to_string_lossy().to_string(),
            )?
            .set_default("session.data_dir", default_data_dir())?
            .set_default("session.name", default_session_name())?
            .set_default("video.extensions", default_video_extensions())?
            .set_default("bus.capacity", default_bus_capacity() as i64)?
            .set_default("bus.debug_logging", false)?
            .set_default("runtime.tick_hz", default_tick_hz())?
            .add_source(File::with_name(&path_str).required(false))
            .add_source(
                Environment::with_prefix("OFFLINE_PUPIL")
                    .prefix_separator("_")
                    .separator("__"),
            )
            .build()?;

        let config: PupilConfig = settings.try_deserialize()?;

        info!("Configuration loaded successfully");
        debug!("Final configuration: {:#?}", config);

        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.session.data_dir.trim().is_empty() {
            return Err(ConfigError::Message(
                "Session data_dir must not be empty".to_string(),
            ));
        }

        if self.session.name.trim().is_empty() {
            return Err(ConfigError::Message(
                "Session name must not be empty".to_string(),
            ));
        }

        if self.video.extensions.is_empty() {
            return Err(ConfigError::Message(
                "At least one video extension must be configured".to_string(),
            ));
        }

        if self.bus.capacity == 0 {
            return Err(ConfigError::Message(
                "Bus capacity must be greater than 0".to_string(),
            ));
        }

        if self.runtime.tick_hz == 0 {
            return Err(ConfigError::Message(
                "Runtime tick_hz must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }

    /// Directory holding the offline results for the configured recording
    pub fn data_dir(&self) -> PathBuf {
        self.recording.path.join(&self.session.data_dir)
    }
}

impl Default for PupilConfig {
    fn default() -> Self {
        Self {
            recording: RecordingConfig {
                path: default_recording_path(),
            },
            session: SessionConfig {
                data_dir: default_data_dir(),
                name: default_session_name(),
            },
            video: VideoConfig {
                extensions: default_video_extensions(),
            },
            bus: BusConfig {
                capacity: default_bus_capacity(),
                debug_logging: false,
            },
            runtime: RuntimeConfig {
                tick_hz: default_tick_hz(),
            },
        }
    }
}

// Default value functions
fn default_recording_path() -> PathBuf {
    PathBuf::from(".")
}

fn default_data_dir() -> String {
    "offline_data".to_string()
}
fn default_session_name() -> String {
    "offline_pupil".to_string()
}

fn default_video_extensions() -> Vec<String> {
    vec![".mjpeg".to_string(), ".mp4".to_string(), ".mkv".to_string()]
}

fn default_bus_capacity() -> usize {
    100_000
}

fn default_tick_hz() -> u32 {
    30
}
