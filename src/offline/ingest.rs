use super::OfflinePupilDetection;
use crate::error::{EventBusError, PupilError, Result};
use crate::events::{BusMessage, EventReceiver, Notification};
use crate::record::{EyeId, PupilDatum};
use crate::session::DetectionStatus;
use std::path::Path;
use tracing::{debug, error, info, warn};

/// What one drain cycle did
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TickReport {
    pub data_received: usize,
    pub completed: Vec<EyeId>,
    pub published: bool,
    pub progress: f64,
}

impl OfflinePupilDetection {
    /// Drain everything currently waiting on the bus and return immediately.
    ///
    /// Fails only on a protocol violation or when the publish after the last
    /// eye finishes cannot be persisted.
    pub fn recent_events(&mut self) -> Result<TickReport> {
        let mut report = TickReport::default();
        let publishes_before = self.publish_count;

        if let Some(mut data_sub) = self.data_sub.take() {
            let result = self.drain_data(&mut data_sub, &mut report);
            self.data_sub = Some(data_sub);
            result?;
        }

        if let Some(mut notify_sub) = self.notify_sub.take() {
            let result = drain(&mut notify_sub, |message| match message {
                BusMessage::Notify(notification) => self.on_notify(&notification),
                BusMessage::Data { .. } => Ok(()),
            });
            self.notify_sub = Some(notify_sub);
            result?;
        }

        self.progress = self.detection_progress();
        report.progress = self.progress;
        report.published = self.publish_count > publishes_before;
        Ok(report)
    }

    fn drain_data(&mut self, data_sub: &mut EventReceiver, report: &mut TickReport) -> Result<()> {
        drain(data_sub, |message| match message {
            BusMessage::Data { topic, payload } => {
                if self.ingest_datum(&topic, &payload)? {
                    report.data_received += 1;
                }
                Ok(())
            }
            BusMessage::Notify(Notification::SourceVideoFinished { source_path }) => {
                if let Some(eye_id) = self.on_video_finished(&source_path)? {
                    report.completed.push(eye_id);
                }
                Ok(())
            }
            BusMessage::Notify(other) => {
                debug!("Ignoring {}", other.subject());
                Ok(())
            }
        })
    }

    /// File one `pupil.<eye>` payload into the store
    fn ingest_datum(&mut self, topic: &str, payload: &[u8]) -> Result<bool> {
        let topic_eye = topic
            .strip_prefix("pupil.")
            .and_then(|rest| rest.parse::<u8>().ok())
            .and_then(|id| EyeId::try_from(id).ok())
            .ok_or_else(|| PupilError::protocol(topic, "topic does not name an eye"))?;

        let datum = match PupilDatum::from_msgpack(payload) {
            Ok(datum) => datum,
            Err(e) => {
                error!("Dropping undecodable datum on '{}': {}", topic, e);
                return Ok(false);
            }
        };

        if datum.id != u8::from(topic_eye) {
            return Err(PupilError::protocol(
                topic,
                format!("datum claims eye {} on topic for eye {}", datum.id, topic_eye),
            ));
        }

        let tag = datum.detector_tag();
        let timestamp = datum.timestamp;
        self.store.append(topic_eye, tag, datum, timestamp);
        Ok(true)
    }

    /// Mark the eye reading `source_path` complete. Publishes when it was the last one.
    fn on_video_finished(&mut self, source_path: &Path) -> Result<Option<EyeId>> {
        let Some(eye_id) = EyeId::ALL.into_iter().find(|eye| {
            self.eyes[eye.index()].source_path.as_deref() == Some(source_path)
        }) else {
            debug!("Finished video {} is not ours", source_path.display());
            return Ok(None);
        };

        info!("Eye {} process complete", eye_id);
        self.session.set_status(eye_id, DetectionStatus::Complete);
        self.stop_eye_process(eye_id);

        if self.all_eyes_idle() {
            self.correlate_publish()?;
        }
        Ok(Some(eye_id))
    }

    /// Lifecycle acknowledgements from eye processes
    pub fn on_notify(&mut self, notification: &Notification) -> Result<()> {
        match notification {
            Notification::EyeProcessStarted { eye_id } => {
                debug!("Eye {} process started", eye_id);
                let mode = self.detection_method.clone();
                self.set_detection_mapping_mode(mode)?;
            }
            Notification::EyeProcessStopped { eye_id } => {
                debug!("Eye {} process stopped", eye_id);
                self.eyes[eye_id.index()].source_path = None;
            }
            _ => {}
        }
        Ok(())
    }
}

/// Pull messages until the receiver is empty, skipping over lag
fn drain<F>(receiver: &mut EventReceiver, mut handle: F) -> Result<()>
where
    F: FnMut(BusMessage) -> Result<()>,
{
    loop {
        match receiver.try_recv() {
            Ok(Some(message)) => handle(message)?,
            Ok(None) => return Ok(()),
            Err(EventBusError::Lagged(n)) => {
                warn!("'{}' lost {} messages", receiver.name(), n);
            }
            Err(EventBusError::ChannelClosed) => return Ok(()),
            Err(e) => return Err(e.into()),
        }
    }
}
