use super::*;
use crate::config::PupilConfig;
use crate::error::{PupilError, Result};
use crate::events::{BusMessage, EventBus, EventFilter, EventReceiver, Notification};
use crate::published::{published_slot, ChangeKind, DataChangedAnnouncer, PupilPublisher};
use crate::record::{DetectorTag, EyeId, PupilDatum};
use crate::session::{DetectionStatus, SessionMetadata};
use crate::video::VideoSourceResolver;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;

/// Resolver with a fixed set of videos and frame counts
#[derive(Default)]
struct ScriptedResolver {
    videos: HashMap<EyeId, (PathBuf, usize)>,
}

impl ScriptedResolver {
    fn with_video(mut self, eye_id: EyeId, path: PathBuf, frames: usize) -> Self {
        self.videos.insert(eye_id, (path, frames));
        self
    }
}

impl VideoSourceResolver for ScriptedResolver {
    fn candidates(&self, _rec_dir: &Path, eye_id: EyeId) -> Vec<PathBuf> {
        self.videos
            .get(&eye_id)
            .map(|(path, _)| vec![path.clone()])
            .unwrap_or_default()
    }

    fn frame_count(&self, source: &Path) -> Result<usize> {
        self.videos
            .values()
            .find(|(path, _)| path == source)
            .map(|(_, frames)| *frames)
            .ok_or_else(|| PupilError::NotFound {
                path: source.to_path_buf(),
            })
    }
}

type Announcements = Arc<Mutex<Vec<(ChangeKind, usize)>>>;

struct Fixture {
    dir: TempDir,
    config: PupilConfig,
    bus: Arc<EventBus>,
    observer: EventReceiver,
}

impl Fixture {
    fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let mut config = PupilConfig::default();
        config.recording.path = dir.path().to_path_buf();
        let bus = Arc::new(EventBus::new(1024));
        let observer = bus.subscribe_filtered(EventFilter::topics(["notify."]), "observer");
        Self {
            dir,
            config,
            bus,
            observer,
        }
    }

    fn video(&self, eye_id: EyeId) -> PathBuf {
        self.dir.path().join(format!("eye{}.mp4", eye_id))
    }

    fn both_eyes(&self, frames: usize) -> ScriptedResolver {
        ScriptedResolver::default()
            .with_video(EyeId::Eye0, self.video(EyeId::Eye0), frames)
            .with_video(EyeId::Eye1, self.video(EyeId::Eye1), frames)
    }

    fn build(&self, resolver: ScriptedResolver) -> (OfflinePupilDetection, Announcements) {
        let announcements: Announcements = Arc::new(Mutex::new(Vec::new()));
        let announcer = Arc::new(DataChangedAnnouncer::new(self.dir.path()));
        {
            let announcements = Arc::clone(&announcements);
            announcer.add_listener(move |change| {
                announcements
                    .lock()
                    .push((change.kind, change.snapshot.len()));
            });
        }
        let (writer, _reader) = published_slot();
        let detection = OfflinePupilDetection::new(
            &self.config,
            Arc::clone(&self.bus),
            Arc::new(resolver),
            PupilPublisher::new(writer, announcer),
        )
        .unwrap();
        (detection, announcements)
    }

    fn send_datum(&self, eye_id: EyeId, timestamp: f64, tag: DetectorTag) {
        let datum = PupilDatum::new(eye_id, timestamp, tag, 0.95);
        self.bus
            .publish(BusMessage::pupil(eye_id, datum.to_msgpack().unwrap()))
            .unwrap();
    }

    fn finish(&self, eye_id: EyeId) {
        self.bus.notify_all(Notification::SourceVideoFinished {
            source_path: self.video(eye_id),
        });
    }

    /// Notifications seen on the bus since the last call
    fn outbound(&mut self) -> Vec<Notification> {
        let mut seen = Vec::new();
        while let Some(message) = self.observer.try_recv().unwrap() {
            if let BusMessage::Notify(notification) = message {
                seen.push(notification);
            }
        }
        seen
    }
}

#[test]
fn test_mono_recording_publishes_once() {
    let mut fx = Fixture::new();
    let resolver = ScriptedResolver::default().with_video(EyeId::Eye0, fx.video(EyeId::Eye0), 3);
    let (mut detection, announcements) = fx.build(resolver);

    assert_eq!(detection.detection_status(EyeId::Eye0), &DetectionStatus::Detecting);
    assert_eq!(detection.detection_status(EyeId::Eye1), &DetectionStatus::no_video());
    assert_eq!(detection.publish_count(), 0);
    assert!(fx.outbound().contains(&Notification::EyeProcessShouldStart {
        eye_id: EyeId::Eye0,
        source_path: fx.video(EyeId::Eye0),
    }));

    for ts in [0.1, 0.3, 0.2] {
        fx.send_datum(EyeId::Eye0, ts, DetectorTag::ThreeD);
    }
    let report = detection.recent_events().unwrap();
    assert_eq!(report.data_received, 3);
    assert!(!report.published);
    assert!((report.progress - 1.0).abs() < 1e-9);

    fx.finish(EyeId::Eye0);
    let report = detection.recent_events().unwrap();
    assert!(report.published);
    assert_eq!(report.completed, vec![EyeId::Eye0]);
    assert_eq!(detection.publish_count(), 1);
    assert_eq!(detection.detection_status(EyeId::Eye0), &DetectionStatus::Complete);
    assert!(fx.outbound().contains(&Notification::EyeProcessShouldStop {
        eye_id: EyeId::Eye0
    }));

    let published = detection.reader().current();
    assert_eq!(published.count(EyeId::Eye0, &DetectorTag::ThreeD), 3);
    assert_eq!(published.count(EyeId::Eye1, &DetectorTag::ThreeD), 0);
    let timestamps = published.timestamps(EyeId::Eye0, &DetectorTag::ThreeD);
    assert_eq!(timestamps, &[0.1, 0.2, 0.3]);
    assert_eq!(announcements.lock().as_slice(), &[(ChangeKind::New, 3)]);

    let meta = SessionMetadata::load(&detection.meta_path()).unwrap();
    assert_eq!(meta.status(EyeId::Eye0), &DetectionStatus::Complete);
    assert_eq!(meta.status(EyeId::Eye1), &DetectionStatus::no_video());
    assert!(detection.results_path().exists());

    // a late duplicate notification does not publish again
    fx.finish(EyeId::Eye0);
    let report = detection.recent_events().unwrap();
    assert!(!report.published);
    assert_eq!(detection.publish_count(), 1);
}

#[test]
fn test_completion_order_does_not_matter() {
    let fx = Fixture::new();
    let (mut detection, announcements) = fx.build(fx.both_eyes(2));

    fx.send_datum(EyeId::Eye1, 1.05, DetectorTag::ThreeD);
    fx.send_datum(EyeId::Eye0, 1.0, DetectorTag::ThreeD);
    fx.send_datum(EyeId::Eye1, 1.15, DetectorTag::ThreeD);
    fx.finish(EyeId::Eye1);
    let report = detection.recent_events().unwrap();
    assert_eq!(report.completed, vec![EyeId::Eye1]);
    assert!(!report.published);
    assert!(detection.eye_state(EyeId::Eye0).is_active());
    assert!(!detection.eye_state(EyeId::Eye1).is_active());

    fx.send_datum(EyeId::Eye0, 1.1, DetectorTag::ThreeD);
    fx.finish(EyeId::Eye0);
    let report = detection.recent_events().unwrap();
    assert!(report.published);
    assert_eq!(detection.publish_count(), 1);
    assert_eq!(announcements.lock().len(), 1);

    let published = detection.reader().current();
    assert_eq!(published.count_tag(&DetectorTag::ThreeD), 4);
}

#[test]
fn test_mode_change_restarts_accumulation() {
    let mut fx = Fixture::new();
    let (mut detection, announcements) = fx.build(fx.both_eyes(10));

    for ts in [0.0, 0.1, 0.2] {
        fx.send_datum(EyeId::Eye0, ts, DetectorTag::ThreeD);
        fx.send_datum(EyeId::Eye1, ts, DetectorTag::ThreeD);
    }
    detection.recent_events().unwrap();
    assert_eq!(detection.store().count_tag(&DetectorTag::ThreeD), 6);
    fx.outbound();

    detection.set_detection_mapping_mode(DetectorTag::TwoD).unwrap();

    assert!(detection.store().is_empty());
    assert!(detection.reader().current().is_empty());
    assert_eq!(announcements.lock().last(), Some(&(ChangeKind::New, 0)));
    assert_eq!(detection.detection_method(), &DetectorTag::TwoD);

    let sent = fx.outbound();
    assert_eq!(
        sent.first(),
        Some(&Notification::SetDetectionMappingMode {
            mode: DetectorTag::TwoD
        })
    );
    for eye_id in EyeId::ALL {
        assert!(sent.contains(&Notification::SourceSeek {
            frame_index: 0,
            source_path: fx.video(eye_id),
        }));
        assert_eq!(detection.detection_status(eye_id), &DetectionStatus::Detecting);
    }
    assert_eq!(detection.publish_count(), 0);
}

#[test]
fn test_redetect_restarts_stopped_eye() {
    let mut fx = Fixture::new();
    let (mut detection, _) = fx.build(fx.both_eyes(5));

    fx.bus.notify_all(Notification::EyeProcessStopped {
        eye_id: EyeId::Eye1,
    });
    detection.recent_events().unwrap();
    assert!(!detection.eye_state(EyeId::Eye1).is_active());
    fx.outbound();

    detection.redetect().unwrap();
    let sent = fx.outbound();
    assert!(sent.contains(&Notification::SourceSeek {
        frame_index: 0,
        source_path: fx.video(EyeId::Eye0),
    }));
    assert!(sent.contains(&Notification::EyeProcessShouldStart {
        eye_id: EyeId::Eye1,
        source_path: fx.video(EyeId::Eye1),
    }));
    assert!(detection.eye_state(EyeId::Eye1).is_active());
}

#[test]
fn test_redetect_without_sources_publishes_empty_result() {
    let fx = Fixture::new();
    let (mut detection, announcements) = fx.build(ScriptedResolver::default());
    assert!(detection.all_eyes_idle());
    assert_eq!(detection.publish_count(), 1);
    std::fs::remove_file(detection.results_path()).unwrap();

    detection.redetect().unwrap();

    assert!(detection.all_eyes_idle());
    assert_eq!(detection.publish_count(), 2);
    assert!(detection.results_path().exists());
    for eye_id in EyeId::ALL {
        assert_eq!(detection.detection_status(eye_id), &DetectionStatus::no_video());
    }
    assert_eq!(
        announcements.lock().as_slice(),
        &[(ChangeKind::New, 0), (ChangeKind::New, 0), (ChangeKind::New, 0)]
    );
}

#[test]
fn test_mode_change_without_sources_persists_new_method() {
    let fx = Fixture::new();
    let (mut detection, _) = fx.build(ScriptedResolver::default());

    detection.set_detection_mapping_mode(DetectorTag::TwoD).unwrap();

    assert_eq!(detection.publish_count(), 2);
    let meta = SessionMetadata::load(&detection.meta_path()).unwrap();
    assert_eq!(meta.detection_method, Some(DetectorTag::TwoD));
}

#[test]
fn test_eye_process_started_propagates_mode() {
    let mut fx = Fixture::new();
    let (mut detection, _) = fx.build(fx.both_eyes(5));
    fx.outbound();

    fx.bus.notify_all(Notification::EyeProcessStarted {
        eye_id: EyeId::Eye0,
    });
    detection.recent_events().unwrap();

    let sent = fx.outbound();
    assert!(sent.contains(&Notification::SetDetectionMappingMode {
        mode: DetectorTag::ThreeD
    }));
    assert_eq!(detection.detection_method(), &DetectorTag::ThreeD);
}

#[test]
fn test_mismatched_eye_id_is_fatal() {
    let fx = Fixture::new();
    let (mut detection, _) = fx.build(fx.both_eyes(5));

    let datum = PupilDatum::new(EyeId::Eye1, 1.0, DetectorTag::ThreeD, 1.0);
    fx.bus
        .publish(BusMessage::pupil(EyeId::Eye0, datum.to_msgpack().unwrap()))
        .unwrap();

    match detection.recent_events() {
        Err(PupilError::ProtocolViolation { topic, .. }) => assert_eq!(topic, "pupil.0"),
        other => panic!("Expected protocol violation, got {:?}", other),
    }
    assert!(detection.store().is_empty());
}

#[test]
fn test_undecodable_payload_is_dropped() {
    let fx = Fixture::new();
    let (mut detection, _) = fx.build(fx.both_eyes(5));

    fx.bus
        .publish(BusMessage::pupil(EyeId::Eye0, vec![0xc1]))
        .unwrap();
    fx.send_datum(EyeId::Eye0, 2.0, DetectorTag::TwoD);

    let report = detection.recent_events().unwrap();
    assert_eq!(report.data_received, 1);
    assert_eq!(detection.store().count(EyeId::Eye0, &DetectorTag::TwoD), 1);
}

#[test]
fn test_progress_bounds() {
    let fx = Fixture::new();
    let (detection, announcements) = fx.build(ScriptedResolver::default());

    // no videos at all: nothing started, empty result published right away
    assert_eq!(detection.detection_progress(), 0.0);
    assert_eq!(detection.publish_count(), 1);
    assert_eq!(announcements.lock().as_slice(), &[(ChangeKind::New, 0)]);

    let fx = Fixture::new();
    let resolver = ScriptedResolver::default().with_video(EyeId::Eye1, fx.video(EyeId::Eye1), 2);
    let (mut detection, _) = fx.build(resolver);
    for i in 0..5 {
        fx.send_datum(EyeId::Eye1, i as f64, DetectorTag::ThreeD);
    }
    // 2d results do not count towards the 3d method
    fx.send_datum(EyeId::Eye1, 9.0, DetectorTag::TwoD);
    let report = detection.recent_events().unwrap();
    assert_eq!(report.progress, 1.0);
    assert!(detection.detection_progress() <= 1.0);
}

#[test]
fn test_empty_video_counts_as_missing() {
    let fx = Fixture::new();
    let resolver = ScriptedResolver::default()
        .with_video(EyeId::Eye0, fx.video(EyeId::Eye0), 0)
        .with_video(EyeId::Eye1, fx.video(EyeId::Eye1), 4);
    let (detection, _) = fx.build(resolver);

    assert_eq!(detection.detection_status(EyeId::Eye0), &DetectionStatus::no_video());
    assert!(!detection.eye_state(EyeId::Eye0).is_active());
    assert_eq!(detection.eye_state(EyeId::Eye1).expected_frame_count, 4);
}

#[test]
fn test_completed_session_is_resumed() {
    let mut fx = Fixture::new();
    let video0 = fx.video(EyeId::Eye0);
    let resolver = || ScriptedResolver::default().with_video(EyeId::Eye0, video0.clone(), 3);

    {
        let (mut detection, _) = fx.build(resolver());
        for ts in [0.1, 0.2, 0.3] {
            fx.send_datum(EyeId::Eye0, ts, DetectorTag::ThreeD);
        }
        fx.finish(EyeId::Eye0);
        detection.recent_events().unwrap();
        detection.cleanup().unwrap();
    }
    fx.outbound();

    let (detection, announcements) = fx.build(resolver());
    let sent = fx.outbound();
    assert!(!sent
        .iter()
        .any(|n| matches!(n, Notification::EyeProcessShouldStart { .. })));
    assert_eq!(detection.publish_count(), 1);
    assert_eq!(announcements.lock().as_slice(), &[(ChangeKind::New, 3)]);
    assert_eq!(detection.eye_state(EyeId::Eye0).expected_frame_count, 3);
    assert_eq!(detection.progress(), 1.0);
}

#[test]
fn test_stale_metadata_version_restarts_both_eyes() {
    let mut fx = Fixture::new();
    let data_dir = fx.config.data_dir();
    std::fs::create_dir_all(&data_dir).unwrap();
    std::fs::write(
        data_dir.join("offline_pupil.meta"),
        r#"{"version": 1, "detection_method": "3d", "detection_status": ["complete", "complete"]}"#,
    )
    .unwrap();

    let (detection, _) = fx.build(fx.both_eyes(5));
    let started = fx
        .outbound()
        .into_iter()
        .filter(|n| matches!(n, Notification::EyeProcessShouldStart { .. }))
        .count();
    assert_eq!(started, 2);
    assert_eq!(detection.publish_count(), 0);
}

#[test]
fn test_pause_toggle_only_touches_active_eyes() {
    let mut fx = Fixture::new();
    let resolver = ScriptedResolver::default().with_video(EyeId::Eye1, fx.video(EyeId::Eye1), 3);
    let (mut detection, _) = fx.build(resolver);
    fx.outbound();

    detection.set_detection_paused(true);
    assert!(detection.detection_paused());
    assert!(detection.eye_state(EyeId::Eye1).is_paused);
    assert!(!detection.eye_state(EyeId::Eye0).is_paused);
    assert_eq!(
        fx.outbound(),
        vec![Notification::SourceShouldPause {
            source_path: fx.video(EyeId::Eye1)
        }]
    );

    detection.set_detection_paused(false);
    assert_eq!(
        fx.outbound(),
        vec![Notification::SourceShouldPlay {
            source_path: fx.video(EyeId::Eye1)
        }]
    );
}

#[test]
fn test_cleanup_stops_and_persists() {
    let mut fx = Fixture::new();
    let (mut detection, _) = fx.build(fx.both_eyes(5));
    fx.send_datum(EyeId::Eye0, 0.5, DetectorTag::ThreeD);
    detection.recent_events().unwrap();
    fx.outbound();

    detection.cleanup().unwrap();

    let sent = fx.outbound();
    for eye_id in EyeId::ALL {
        assert!(sent.contains(&Notification::EyeProcessShouldStop { eye_id }));
        assert!(!detection.eye_state(eye_id).is_active());
    }
    assert!(!detection.is_subscribed());

    let saved = crate::store::PupilDataBisector::load(&detection.results_path()).unwrap();
    assert_eq!(saved.count(EyeId::Eye0, &DetectorTag::ThreeD), 1);
    let meta = SessionMetadata::load(&detection.meta_path()).unwrap();
    assert_eq!(meta.status(EyeId::Eye0), &DetectionStatus::Detecting);
}
