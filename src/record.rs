use crate::error::PupilError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Identifier of one of the two eye cameras
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum EyeId {
    Eye0,
    Eye1,
}

impl EyeId {
    pub const ALL: [EyeId; 2] = [EyeId::Eye0, EyeId::Eye1];

    pub fn index(self) -> usize {
        match self {
            EyeId::Eye0 => 0,
            EyeId::Eye1 => 1,
        }
    }

    /// Bus topic carrying detection results for this eye
    pub fn topic(self) -> String {
        format!("pupil.{}", self.index())
    }
}

impl TryFrom<u8> for EyeId {
    type Error = PupilError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(EyeId::Eye0),
            1 => Ok(EyeId::Eye1),
            other => Err(PupilError::system(format!("invalid eye id {}", other))),
        }
    }
}

impl From<EyeId> for u8 {
    fn from(eye: EyeId) -> u8 {
        eye.index() as u8
    }
}

impl fmt::Display for EyeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.index())
    }
}

/// Which detection method produced a datum
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum DetectorTag {
    TwoD,
    ThreeD,
    Other(String),
}

impl DetectorTag {
    pub fn as_str(&self) -> &str {
        match self {
            DetectorTag::TwoD => "2d",
            DetectorTag::ThreeD => "3d",
            DetectorTag::Other(name) => name,
        }
    }

    /// Map a detector's method string (e.g. "3d c++") onto a tag
    pub fn from_method(method: &str) -> Self {
        let method = method.trim();
        if method.starts_with("2d") {
            DetectorTag::TwoD
        } else if method.starts_with("3d") {
            DetectorTag::ThreeD
        } else {
            DetectorTag::Other(method.to_string())
        }
    }
}

impl From<String> for DetectorTag {
    fn from(value: String) -> Self {
        DetectorTag::from_method(&value)
    }
}

impl From<&str> for DetectorTag {
    fn from(value: &str) -> Self {
        DetectorTag::from_method(value)
    }
}

impl From<DetectorTag> for String {
    fn from(tag: DetectorTag) -> String {
        tag.as_str().to_string()
    }
}

impl fmt::Display for DetectorTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single pupil measurement as emitted by an eye process.
///
/// Fields shared by every detector are mandatory. Fields only the 3d detector
/// fills are optional, and anything this crate does not know about is kept in
/// `extra` so it survives a load/save cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PupilDatum {
    pub id: u8,
    pub timestamp: f64,
    pub method: String,
    pub confidence: f64,
    #[serde(default)]
    pub norm_pos: [f64; 2],
    #[serde(default)]
    pub diameter: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub diameter_3d: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_confidence: Option<f64>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl PupilDatum {
    pub fn new(eye_id: EyeId, timestamp: f64, tag: DetectorTag, confidence: f64) -> Self {
        Self {
            id: eye_id.into(),
            timestamp,
            method: tag.as_str().to_string(),
            confidence,
            norm_pos: [0.0, 0.0],
            diameter: 0.0,
            diameter_3d: None,
            model_confidence: None,
            extra: BTreeMap::new(),
        }
    }

    pub fn detector_tag(&self) -> DetectorTag {
        DetectorTag::from_method(&self.method)
    }

    /// Numeric field lookup by name, including numeric extras
    pub fn field(&self, key: &str) -> Option<f64> {
        match key {
            "timestamp" => Some(self.timestamp),
            "confidence" => Some(self.confidence),
            "diameter" => Some(self.diameter),
            "diameter_3d" => self.diameter_3d,
            "model_confidence" => self.model_confidence,
            other => self.extra.get(other).and_then(serde_json::Value::as_f64),
        }
    }

    /// Decode a datum from a MessagePack bus payload
    pub fn from_msgpack(bytes: &[u8]) -> Result<Self, PupilError> {
        Ok(rmp_serde::from_slice(bytes)?)
    }

    /// Encode as a named-field MessagePack payload
    pub fn to_msgpack(&self) -> Result<Vec<u8>, PupilError> {
        Ok(rmp_serde::to_vec_named(self)?)
    }
}

/// A datum filed under its eye and detector
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionRecord {
    pub eye_id: EyeId,
    pub detector_tag: DetectorTag,
    pub timestamp: f64,
    pub datum: PupilDatum,
}

impl DetectionRecord {
    pub fn new(eye_id: EyeId, detector_tag: DetectorTag, datum: PupilDatum, timestamp: f64) -> Self {
        Self {
            eye_id,
            detector_tag,
            timestamp,
            datum,
        }
    }
}
