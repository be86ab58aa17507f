use crate::error::{PupilError, Result};
use crate::record::{DetectionRecord, DetectorTag, EyeId, PupilDatum};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::ops::Deref;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, trace, warn};

/// Results file format version
pub const STORE_FILE_VERSION: u32 = 1;

/// Key of one timestamp-ordered series
pub type SeriesKey = (EyeId, DetectorTag);

/// One ascending-by-timestamp run of records, with the timestamps kept in a
/// parallel column for bisection
#[derive(Debug, Clone, Default)]
struct Series {
    timestamps: Vec<f64>,
    records: Vec<Arc<DetectionRecord>>,
}

impl Series {
    fn insert(&mut self, record: Arc<DetectionRecord>) {
        let ts = record.timestamp;
        match self.timestamps.last() {
            Some(last) if *last > ts => {
                // after any equal timestamps so equal-time arrivals keep their order
                let pos = self.timestamps.partition_point(|t| *t <= ts);
                trace!("Out-of-order insert at {} of {}", pos, self.timestamps.len());
                self.timestamps.insert(pos, ts);
                self.records.insert(pos, record);
            }
            _ => {
                self.timestamps.push(ts);
                self.records.push(record);
            }
        }
    }

    fn range(&self, start: f64, end: f64) -> std::ops::Range<usize> {
        if !(start <= end) {
            return 0..0;
        }
        let lo = self.timestamps.partition_point(|t| *t < start);
        let hi = self.timestamps.partition_point(|t| *t <= end);
        lo..hi.max(lo)
    }

    fn len(&self) -> usize {
        self.records.len()
    }
}

/// Read-only view shared by the live store and its snapshots
#[derive(Debug, Clone, Default)]
pub struct PupilData {
    series: BTreeMap<SeriesKey, Series>,
}

impl PupilData {
    fn get(&self, eye_id: EyeId, tag: &DetectorTag) -> Option<&Series> {
        self.series.get(&(eye_id, tag.clone()))
    }

    /// Number of records stored for one eye and detector
    pub fn count(&self, eye_id: EyeId, tag: &DetectorTag) -> usize {
        self.get(eye_id, tag).map_or(0, Series::len)
    }

    /// Number of records stored for a detector across both eyes
    pub fn count_tag(&self, tag: &DetectorTag) -> usize {
        EyeId::ALL.iter().map(|eye| self.count(*eye, tag)).sum()
    }

    /// Total number of records
    pub fn len(&self) -> usize {
        self.series.values().map(Series::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Keys that currently hold at least one record
    pub fn keys(&self) -> impl Iterator<Item = &SeriesKey> {
        self.series
            .iter()
            .filter(|(_, series)| series.len() > 0)
            .map(|(key, _)| key)
    }

    /// Records with `start <= timestamp <= end`, ascending. Empty when nothing matches.
    pub fn query_window(
        &self,
        eye_id: EyeId,
        tag: &DetectorTag,
        start: f64,
        end: f64,
    ) -> &[Arc<DetectionRecord>] {
        match self.get(eye_id, tag) {
            Some(series) => &series.records[series.range(start, end)],
            None => &[],
        }
    }

    /// The `index`-th record of a series
    pub fn query_by_index(
        &self,
        eye_id: EyeId,
        tag: &DetectorTag,
        index: usize,
    ) -> Result<&Arc<DetectionRecord>> {
        let records = self.records(eye_id, tag);
        records.get(index).ok_or(PupilError::OutOfRange {
            index,
            len: records.len(),
        })
    }

    /// All records of a series, ascending by timestamp
    pub fn records(&self, eye_id: EyeId, tag: &DetectorTag) -> &[Arc<DetectionRecord>] {
        self.get(eye_id, tag)
            .map_or(&[][..], |series| series.records.as_slice())
    }

    /// Sorted timestamp column of a series
    pub fn timestamps(&self, eye_id: EyeId, tag: &DetectorTag) -> &[f64] {
        self.get(eye_id, tag)
            .map_or(&[][..], |series| series.timestamps.as_slice())
    }

    /// Records of every series inside the window, merged by timestamp
    pub fn query_window_all(&self, start: f64, end: f64) -> Vec<Arc<DetectionRecord>> {
        let mut merged: Vec<Arc<DetectionRecord>> = self
            .series
            .values()
            .flat_map(|series| series.records[series.range(start, end)].iter().cloned())
            .collect();
        merged.sort_by(|a, b| a.timestamp.total_cmp(&b.timestamp));
        merged
    }

    /// Write every series to a versioned MessagePack file
    pub fn save(&self, path: &Path) -> Result<()> {
        let file = StoreFile {
            version: STORE_FILE_VERSION,
            series: self
                .series
                .iter()
                .filter(|(_, series)| series.len() > 0)
                .map(|((eye_id, tag), series)| PersistedSeries {
                    eye_id: *eye_id,
                    detector_tag: tag.clone(),
                    timestamps: series.timestamps.clone(),
                    data: series.records.iter().map(|r| r.datum.clone()).collect(),
                })
                .collect(),
        };

        let bytes = rmp_serde::to_vec_named(&file)?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut tmp_path = path.as_os_str().to_owned();
        tmp_path.push(".tmp");
        fs::write(&tmp_path, &bytes)?;
        fs::rename(&tmp_path, path)?;

        debug!(
            "Saved {} records in {} series to {}",
            self.len(),
            file.series.len(),
            path.display()
        );
        Ok(())
    }
}

#[derive(Serialize, Deserialize)]
struct StoreFile {
    version: u32,
    series: Vec<PersistedSeries>,
}

#[derive(Deserialize)]
struct StoreFileHeader {
    version: u32,
}

#[derive(Serialize, Deserialize)]
struct PersistedSeries {
    eye_id: EyeId,
    detector_tag: DetectorTag,
    timestamps: Vec<f64>,
    data: Vec<PupilDatum>,
}

/// Timestamp-sorted pupil store filled while detection runs
#[derive(Debug, Default)]
pub struct PupilDataBisector {
    data: PupilData,
}

impl PupilDataBisector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a datum under `(eye_id, tag)` keeping that series sorted by timestamp
    pub fn append(&mut self, eye_id: EyeId, tag: DetectorTag, datum: PupilDatum, timestamp: f64) {
        if !timestamp.is_finite() {
            warn!(
                "Dropping eye {} datum with non-finite timestamp {}",
                eye_id, timestamp
            );
            return;
        }
        let record = Arc::new(DetectionRecord::new(eye_id, tag.clone(), datum, timestamp));
        self.data
            .series
            .entry((eye_id, tag))
            .or_default()
            .insert(record);
    }

    /// Immutable copy, unaffected by later appends or clears
    pub fn copy(&self) -> PupilSnapshot {
        PupilSnapshot(Arc::new(self.data.clone()))
    }

    /// Drop every record
    pub fn clear(&mut self) {
        self.data = PupilData::default();
        debug!("Pupil data store cleared");
    }

    /// Read a results file written by [`PupilData::save`]
    pub fn load(path: &Path) -> Result<Self> {
        let bytes = match fs::read(path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(PupilError::NotFound {
                    path: path.to_path_buf(),
                })
            }
            Err(e) => return Err(e.into()),
        };

        let header: StoreFileHeader = rmp_serde::from_slice(&bytes)
            .map_err(|e| PupilError::corrupt(path, format!("unreadable header: {}", e)))?;
        if header.version != STORE_FILE_VERSION {
            return Err(PupilError::VersionMismatch {
                expected: STORE_FILE_VERSION,
                found: header.version,
            });
        }

        let file: StoreFile = rmp_serde::from_slice(&bytes)
            .map_err(|e| PupilError::corrupt(path, e.to_string()))?;

        let mut store = Self::new();
        for persisted in file.series {
            if persisted.timestamps.len() != persisted.data.len() {
                return Err(PupilError::corrupt(
                    path,
                    format!(
                        "series ({}, {}) has {} timestamps but {} data",
                        persisted.eye_id,
                        persisted.detector_tag,
                        persisted.timestamps.len(),
                        persisted.data.len()
                    ),
                ));
            }
            if persisted.timestamps.windows(2).any(|w| !(w[0] <= w[1])) {
                return Err(PupilError::corrupt(
                    path,
                    format!(
                        "series ({}, {}) is not sorted by timestamp",
                        persisted.eye_id, persisted.detector_tag
                    ),
                ));
            }

            let series = store
                .data
                .series
                .entry((persisted.eye_id, persisted.detector_tag.clone()))
                .or_default();
            for (timestamp, datum) in persisted.timestamps.into_iter().zip(persisted.data) {
                series.insert(Arc::new(DetectionRecord::new(
                    persisted.eye_id,
                    persisted.detector_tag.clone(),
                    datum,
                    timestamp,
                )));
            }
        }

        info!("Loaded {} pupil records from {}", store.len(), path.display());
        Ok(store)
    }

    /// Load a results file, starting empty when there is no usable one
    pub fn load_or_empty(path: &Path) -> Result<Self> {
        match Self::load(path) {
            Ok(store) => Ok(store),
            Err(PupilError::NotFound { .. }) => {
                debug!("No pupil data at {}, starting empty", path.display());
                Ok(Self::new())
            }
            Err(e) if e.is_recoverable_load() => {
                warn!("Discarding pupil data at {}: {}", path.display(), e);
                Ok(Self::new())
            }
            Err(e) => Err(e),
        }
    }
}

impl Deref for PupilDataBisector {
    type Target = PupilData;

    fn deref(&self) -> &PupilData {
        &self.data
    }
}

/// Published, never-mutated copy of the pupil store
#[derive(Debug, Clone, Default)]
pub struct PupilSnapshot(Arc<PupilData>);

impl PupilSnapshot {
    pub fn empty() -> Self {
        Self::default()
    }
}

impl Deref for PupilSnapshot {
    type Target = PupilData;

    fn deref(&self) -> &PupilData {
        &self.0
    }
}
