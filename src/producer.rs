use crate::error::Result;
use crate::published::PupilPublisher;
use crate::record::DetectionRecord;
use crate::store::{PupilDataBisector, PupilSnapshot};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

/// Base name of the pupil data recorded live during capture
pub const RECORDED_PUPIL_NAME: &str = "pupil";

/// Uses the pupil data captured during the recording instead of detecting it again
pub struct PupilFromRecording {
    source: PathBuf,
    publisher: PupilPublisher,
}

impl PupilFromRecording {
    /// Load `<rec_dir>/pupil.pldata`, publish it and announce it as existing data
    pub fn new<P: AsRef<Path>>(rec_dir: P, publisher: PupilPublisher) -> Result<Self> {
        let source = rec_dir
            .as_ref()
            .join(format!("{}.pldata", RECORDED_PUPIL_NAME));
        let store = PupilDataBisector::load_or_empty(&source)?;
        info!(
            "Loaded {} recorded pupil positions from {}",
            store.len(),
            source.display()
        );

        publisher.publish_existing(store.copy());
        debug!("Pupil positions changed");

        Ok(Self { source, publisher })
    }

    pub fn source(&self) -> &Path {
        &self.source
    }

    pub fn current(&self) -> PupilSnapshot {
        self.publisher.reader().current()
    }
}

/// Time window belonging to a world frame: halfway to each neighbour, open-ended
/// at the first and last frame
pub fn enclosing_window(timestamps: &[f64], index: usize) -> Option<(f64, f64)> {
    let now = *timestamps.get(index)?;
    let before = if index > 0 {
        timestamps[index - 1]
    } else {
        f64::NEG_INFINITY
    };
    let after = timestamps.get(index + 1).copied().unwrap_or(f64::INFINITY);
    Some(((now + before) / 2.0, (after + now) / 2.0))
}

/// All pupil records that fall into a world frame's window
pub fn pupil_for_frame(
    snapshot: &PupilSnapshot,
    world_timestamps: &[f64],
    frame_index: usize,
) -> Vec<Arc<DetectionRecord>> {
    match enclosing_window(world_timestamps, frame_index) {
        Some((start, end)) => snapshot.query_window_all(start, end),
        None => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::published::{published_slot, ChangeKind, DataChangedAnnouncer};
    use crate::record::{DetectorTag, EyeId, PupilDatum};
    use parking_lot::Mutex;

    fn recorded_store(timestamps: &[f64]) -> PupilDataBisector {
        let mut store = PupilDataBisector::new();
        for (i, ts) in timestamps.iter().enumerate() {
            let eye = if i % 2 == 0 { EyeId::Eye0 } else { EyeId::Eye1 };
            store.append(
                eye,
                DetectorTag::TwoD,
                PupilDatum::new(eye, *ts, DetectorTag::TwoD, 1.0),
                *ts,
            );
        }
        store
    }

    #[test]
    fn test_enclosing_window() {
        let world = [1.0, 2.0, 4.0];
        assert_eq!(enclosing_window(&world, 0), Some((f64::NEG_INFINITY, 1.5)));
        assert_eq!(enclosing_window(&world, 1), Some((1.5, 3.0)));
        assert_eq!(enclosing_window(&world, 2), Some((3.0, f64::INFINITY)));
        assert_eq!(enclosing_window(&world, 3), None);
    }

    #[test]
    fn test_pupil_for_frame() {
        let snapshot = recorded_store(&[0.9, 1.4, 1.6, 2.9, 3.1]).copy();
        let world = [1.0, 2.0, 4.0];

        let frame0: Vec<f64> = pupil_for_frame(&snapshot, &world, 0)
            .iter()
            .map(|r| r.timestamp)
            .collect();
        assert_eq!(frame0, vec![0.9, 1.4]);

        let frame1: Vec<f64> = pupil_for_frame(&snapshot, &world, 1)
            .iter()
            .map(|r| r.timestamp)
            .collect();
        assert_eq!(frame1, vec![1.6, 2.9]);

        assert!(pupil_for_frame(&snapshot, &world, 10).is_empty());
    }

    #[test]
    fn test_loads_recorded_data_as_existing() {
        let dir = tempfile::tempdir().unwrap();
        recorded_store(&[1.0, 2.0, 3.0])
            .save(&dir.path().join("pupil.pldata"))
            .unwrap();

        let kinds = Arc::new(Mutex::new(Vec::new()));
        let announcer = Arc::new(DataChangedAnnouncer::new(dir.path()));
        {
            let kinds = Arc::clone(&kinds);
            announcer.add_listener(move |change| kinds.lock().push(change.kind));
        }
        let (writer, reader) = published_slot();
        let producer = PupilFromRecording::new(dir.path(), PupilPublisher::new(writer, announcer))
            .unwrap();

        assert_eq!(producer.current().len(), 3);
        assert_eq!(reader.current().len(), 3);
        assert_eq!(kinds.lock().as_slice(), &[ChangeKind::Existing]);
    }

    #[test]
    fn test_missing_recording_data_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let (writer, reader) = published_slot();
        let announcer = Arc::new(DataChangedAnnouncer::new(dir.path()));
        PupilFromRecording::new(dir.path(), PupilPublisher::new(writer, announcer)).unwrap();
        assert!(reader.current().is_empty());
    }
}
