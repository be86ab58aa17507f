use super::OfflinePupilDetection;
use crate::error::Result;
use crate::events::Notification;
use crate::record::{DetectorTag, EyeId};
use crate::session::DetectionStatus;
use tracing::{debug, info};

impl OfflinePupilDetection {
    /// Share of expected frames that have produced a datum for the current method,
    /// 0.0 when no frames are expected and never above 1.0
    pub fn detection_progress(&self) -> f64 {
        let total: usize = self.eyes.iter().map(|eye| eye.expected_frame_count).sum();
        if total == 0 {
            return 0.0;
        }
        let detected = self.store.count_tag(&self.detection_method);
        (detected as f64 / total as f64).min(1.0)
    }

    /// Publish an immutable copy of the store, announce it and persist it
    pub fn correlate_publish(&mut self) -> Result<()> {
        let snapshot = self.store.copy();
        let records = snapshot.len();
        self.publisher.publish_new(snapshot);
        self.publish_count += 1;
        debug!("Pupil positions changed ({} records)", records);
        self.save_offline_data()
    }

    /// Persist the store and the session metadata
    pub fn save_offline_data(&mut self) -> Result<()> {
        self.store.save(&self.results_path())?;
        self.session.detection_method = Some(self.detection_method.clone());
        self.session.save(&self.meta_path())?;
        info!("Cached detected pupil data to {}", self.data_dir.display());
        Ok(())
    }

    /// Throw away all results and run detection again from the first frame.
    ///
    /// With no eye left to run, the empty result is published and persisted right away.
    pub fn redetect(&mut self) -> Result<()> {
        info!("Redetecting pupil positions");
        self.store.clear();
        self.publisher.publish_new(self.store.copy());
        self.set_detection_paused(false);

        for eye_id in EyeId::ALL {
            self.session.set_status(eye_id, DetectionStatus::Unknown);
            match self.eyes[eye_id.index()].source_path.clone() {
                None => {
                    self.start_eye_process(eye_id);
                }
                Some(source_path) => {
                    self.event_bus.notify_all(Notification::SourceSeek {
                        frame_index: 0,
                        source_path,
                    });
                    self.session.set_status(eye_id, DetectionStatus::Detecting);
                }
            }
        }

        if self.all_eyes_idle() {
            self.correlate_publish()?;
        }
        Ok(())
    }

    /// Switch detector: announce the mode, start over, then adopt the new method
    pub fn set_detection_mapping_mode(&mut self, mode: DetectorTag) -> Result<()> {
        self.event_bus
            .notify_all(Notification::SetDetectionMappingMode { mode: mode.clone() });
        self.redetect()?;
        self.detection_method = mode;

        // redetect already persisted the empty result under the old method
        if self.all_eyes_idle() {
            self.save_offline_data()?;
        }
        Ok(())
    }
}
