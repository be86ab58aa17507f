use super::types::EyeProcessState;
use crate::config::PupilConfig;
use crate::error::Result;
use crate::events::{EventBus, EventFilter, EventReceiver};
use crate::published::{PupilPublisher, SlotReader};
use crate::record::{DetectorTag, EyeId};
use crate::session::{DetectionStatus, SessionMetadata, FORCED_DETECTION_METHOD};
use crate::store::{PupilData, PupilDataBisector};
use crate::video::VideoSourceResolver;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

/// Offline pupil detection over a recording's eye videos.
///
/// Starts one eye process per eye camera, collects their results from the
/// bus into a timestamp-sorted store, and publishes the merged data once
/// every eye has finished. Driven by [`OfflinePupilDetection::recent_events`]
/// once per host tick; nothing in here blocks.
pub struct OfflinePupilDetection {
    pub(super) rec_dir: PathBuf,
    pub(super) data_dir: PathBuf,
    pub(super) session_name: String,

    pub(super) event_bus: Arc<EventBus>,
    pub(super) data_sub: Option<EventReceiver>,
    pub(super) notify_sub: Option<EventReceiver>,
    pub(super) resolver: Arc<dyn VideoSourceResolver>,
    pub(super) publisher: PupilPublisher,

    pub(super) store: PupilDataBisector,
    pub(super) session: SessionMetadata,
    pub(super) detection_method: DetectorTag,
    pub(super) eyes: [EyeProcessState; 2],
    pub(super) detection_paused: bool,
    pub(super) progress: f64,
    pub(super) publish_count: u64,
}

impl OfflinePupilDetection {
    /// Open (or resume) the offline session of the configured recording and
    /// start eye processes for every eye that is not complete yet
    pub fn new(
        config: &PupilConfig,
        event_bus: Arc<EventBus>,
        resolver: Arc<dyn VideoSourceResolver>,
        publisher: PupilPublisher,
    ) -> Result<Self> {
        let rec_dir = config.recording.path.clone();
        let data_dir = config.data_dir();
        fs::create_dir_all(&data_dir)?;
        info!("Offline pupil detection for {}", rec_dir.display());

        // subscribe before anything is started so no early result is missed
        let data_sub = event_bus.subscribe_filtered(
            EventFilter::topics(["pupil.", "notify.source.video_finished"]),
            "offline_pupil.data",
        );
        let notify_sub = event_bus.subscribe_filtered(
            EventFilter::topics(["notify.eye_process.started", "notify.eye_process.stopped"]),
            "offline_pupil.notify",
        );

        let session_name = config.session.name.clone();
        let mut session = SessionMetadata::load_or_default(&meta_path(&data_dir, &session_name));
        if let Some(stored) = &session.detection_method {
            if *stored != FORCED_DETECTION_METHOD {
                info!(
                    "Stored detection method '{}' overridden by '{}'",
                    stored, FORCED_DETECTION_METHOD
                );
            }
        }
        session.detection_method = Some(FORCED_DETECTION_METHOD);
        let detection_method = FORCED_DETECTION_METHOD;

        let store = PupilDataBisector::load_or_empty(&results_path(&data_dir, &session_name))?;

        let eyes = EyeId::ALL.map(|eye| EyeProcessState {
            expected_frame_count: store.count(eye, &detection_method),
            ..EyeProcessState::default()
        });

        let mut detection = Self {
            rec_dir,
            data_dir,
            session_name,
            event_bus,
            data_sub: Some(data_sub),
            notify_sub: Some(notify_sub),
            resolver,
            publisher,
            store,
            session,
            detection_method,
            eyes,
            detection_paused: false,
            progress: 0.0,
            publish_count: 0,
        };

        for eye in EyeId::ALL {
            if !detection.session.status(eye).is_complete() {
                detection.start_eye_process(eye);
            } else {
                debug!("Eye {} already complete", eye);
            }
        }

        // nothing was started (all complete, or no videos): publish what we have
        if detection.all_eyes_idle() {
            detection.correlate_publish()?;
        }
        detection.progress = detection.detection_progress();

        Ok(detection)
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn results_path(&self) -> PathBuf {
        results_path(&self.data_dir, &self.session_name)
    }

    pub fn meta_path(&self) -> PathBuf {
        meta_path(&self.data_dir, &self.session_name)
    }

    pub fn detection_method(&self) -> &DetectorTag {
        &self.detection_method
    }

    pub fn detection_status(&self, eye_id: EyeId) -> &DetectionStatus {
        self.session.status(eye_id)
    }

    pub fn eye_state(&self, eye_id: EyeId) -> &EyeProcessState {
        &self.eyes[eye_id.index()]
    }

    /// The live accumulation store; only snapshots leave this type
    pub fn store(&self) -> &PupilData {
        &self.store
    }

    /// Progress indicator as of the last drain cycle
    pub fn progress(&self) -> f64 {
        self.progress
    }

    pub fn publish_count(&self) -> u64 {
        self.publish_count
    }

    pub fn reader(&self) -> SlotReader {
        self.publisher.reader()
    }

    /// No eye process is running or requested
    pub fn all_eyes_idle(&self) -> bool {
        self.eyes.iter().all(|eye| !eye.is_active())
    }
}

pub(super) fn results_path(data_dir: &Path, name: &str) -> PathBuf {
    data_dir.join(format!("{}.pldata", name))
}

pub(super) fn meta_path(data_dir: &Path, name: &str) -> PathBuf {
    data_dir.join(format!("{}.meta", name))
}
