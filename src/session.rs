use crate::error::{PupilError, Result};
use crate::record::{DetectorTag, EyeId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::Path;
use tracing::{debug, info, warn};

/// Version of the persisted session metadata
pub const SESSION_DATA_VERSION: u32 = 3;

/// The detectors produce both 2d and 3d data, so 3d is always the active method.
/// A different stored preference is overridden when a session is opened.
pub const FORCED_DETECTION_METHOD: DetectorTag = DetectorTag::ThreeD;

/// Per-eye detection status, persisted as its display string
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum DetectionStatus {
    Unknown,
    Detecting,
    Complete,
    Failed(String),
}

impl DetectionStatus {
    pub const NO_VIDEO: &'static str = "No eye video found.";

    pub fn as_str(&self) -> &str {
        match self {
            DetectionStatus::Unknown => "unknown",
            DetectionStatus::Detecting => "Detecting...",
            DetectionStatus::Complete => "complete",
            DetectionStatus::Failed(message) => message,
        }
    }

    pub fn no_video() -> Self {
        DetectionStatus::Failed(Self::NO_VIDEO.to_string())
    }

    pub fn is_complete(&self) -> bool {
        matches!(self, DetectionStatus::Complete)
    }
}

impl From<String> for DetectionStatus {
    fn from(value: String) -> Self {
        match value.as_str() {
            "unknown" => DetectionStatus::Unknown,
            "Detecting..." => DetectionStatus::Detecting,
            "complete" => DetectionStatus::Complete,
            _ => DetectionStatus::Failed(value),
        }
    }
}

impl From<DetectionStatus> for String {
    fn from(status: DetectionStatus) -> String {
        status.as_str().to_string()
    }
}

impl fmt::Display for DetectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Persisted description of an offline detection session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionMetadata {
    pub version: u32,
    pub detection_method: Option<DetectorTag>,
    pub detection_status: [DetectionStatus; 2],
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub saved_at: Option<DateTime<Utc>>,
}

impl Default for SessionMetadata {
    fn default() -> Self {
        Self {
            version: SESSION_DATA_VERSION,
            detection_method: None,
            detection_status: [DetectionStatus::Unknown, DetectionStatus::Unknown],
            saved_at: None,
        }
    }
}

impl SessionMetadata {
    pub fn status(&self, eye_id: EyeId) -> &DetectionStatus {
        &self.detection_status[eye_id.index()]
    }

    pub fn set_status(&mut self, eye_id: EyeId, status: DetectionStatus) {
        debug!("Eye {} status: {}", eye_id, status);
        self.detection_status[eye_id.index()] = status;
    }

    /// Read metadata, failing on absence, corruption or a version mismatch
    pub fn load(path: &Path) -> Result<Self> {
        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(PupilError::NotFound {
                    path: path.to_path_buf(),
                })
            }
            Err(e) => return Err(e.into()),
        };

        let value: serde_json::Value = serde_json::from_str(&content)
            .map_err(|e| PupilError::corrupt(path, e.to_string()))?;
        let found = value
            .get("version")
            .and_then(serde_json::Value::as_u64)
            .ok_or_else(|| PupilError::corrupt(path, "missing version"))?;
        let found = u32::try_from(found)
            .map_err(|_| PupilError::corrupt(path, format!("version {} out of range", found)))?;
        if found != SESSION_DATA_VERSION {
            return Err(PupilError::VersionMismatch {
                expected: SESSION_DATA_VERSION,
                found,
            });
        }

        serde_json::from_value(value).map_err(|e| PupilError::corrupt(path, e.to_string()))
    }

    /// Read metadata or fall back to a fresh default; never merges partial state
    pub fn load_or_default(path: &Path) -> Self {
        match Self::load(path) {
            Ok(meta) => {
                debug!("Loaded session metadata from {}", path.display());
                meta
            }
            Err(PupilError::NotFound { .. }) => {
                debug!("No session metadata at {}", path.display());
                Self::default()
            }
            Err(e) => {
                warn!(
                    "Resetting session metadata from {}: {}",
                    path.display(),
                    e
                );
                Self::default()
            }
        }
    }

    /// Write metadata as pretty JSON
    pub fn save(&self, path: &Path) -> Result<()> {
        let mut meta = self.clone();
        meta.version = SESSION_DATA_VERSION;
        meta.saved_at = Some(Utc::now());

        let json = serde_json::to_string_pretty(&meta)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut tmp_path = path.as_os_str().to_owned();
        tmp_path.push(".tmp");
        fs::write(&tmp_path, json)?;
        fs::rename(&tmp_path, path)?;

        info!("Cached session metadata to {}", path.display());
        Ok(())
    }
}
