use super::OfflinePupilDetection;
use crate::error::PupilError;
use crate::events::Notification;
use crate::record::EyeId;
use crate::session::DetectionStatus;
use tracing::{debug, error, warn};

impl OfflinePupilDetection {
    /// Find the eye's video and ask for an eye process on it.
    ///
    /// A missing or empty video only marks that eye as failed; mono
    /// recordings have a single eye camera. Returns whether a start was requested.
    pub fn start_eye_process(&mut self, eye_id: EyeId) -> bool {
        let candidates = self.resolver.candidates(&self.rec_dir, eye_id);
        let Some(source_path) = candidates.into_iter().next() else {
            self.mark_missing(eye_id);
            return false;
        };

        let frame_count = match self.resolver.frame_count(&source_path) {
            Ok(count) => count,
            Err(e) => {
                warn!("Could not count frames of {}: {}", source_path.display(), e);
                0
            }
        };
        if frame_count == 0 {
            self.mark_missing(eye_id);
            return false;
        }

        let eye = &mut self.eyes[eye_id.index()];
        eye.expected_frame_count = frame_count;
        eye.source_path = Some(source_path.clone());
        eye.is_paused = false;

        self.event_bus.notify_all(Notification::EyeProcessShouldStart {
            eye_id,
            source_path,
        });
        self.session.set_status(eye_id, DetectionStatus::Detecting);
        true
    }

    fn mark_missing(&mut self, eye_id: EyeId) {
        error!("{}", PupilError::MissingSource { eye_id: eye_id.into() });
        self.session.set_status(eye_id, DetectionStatus::no_video());
    }

    /// Ask the eye process to stop. Safe to call on an eye that is not running.
    pub fn stop_eye_process(&mut self, eye_id: EyeId) {
        self.event_bus
            .notify_all(Notification::EyeProcessShouldStop { eye_id });
        let eye = &mut self.eyes[eye_id.index()];
        eye.source_path = None;
        eye.is_paused = false;
    }

    /// Pause or resume one eye's source; no effect when that eye is not running
    pub fn set_paused(&mut self, eye_id: EyeId, paused: bool) {
        let eye = &mut self.eyes[eye_id.index()];
        let Some(source_path) = eye.source_path.clone() else {
            debug!("Eye {} not active, ignoring pause={}", eye_id, paused);
            return;
        };
        eye.is_paused = paused;

        let notification = if paused {
            Notification::SourceShouldPause { source_path }
        } else {
            Notification::SourceShouldPlay { source_path }
        };
        self.event_bus.notify_all(notification);
    }

    /// Single pause toggle applied to every running eye
    pub fn set_detection_paused(&mut self, paused: bool) {
        self.detection_paused = paused;
        for eye in EyeId::ALL {
            self.set_paused(eye, paused);
        }
    }

    pub fn detection_paused(&self) -> bool {
        self.detection_paused
    }
}
