use crate::error::EventBusError;
use crate::record::{DetectorTag, EyeId};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

/// Lifecycle and control notifications exchanged with eye processes and sources
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "subject")]
pub enum Notification {
    #[serde(rename = "eye_process.should_start")]
    EyeProcessShouldStart { eye_id: EyeId, source_path: PathBuf },
    #[serde(rename = "eye_process.should_stop")]
    EyeProcessShouldStop { eye_id: EyeId },
    #[serde(rename = "eye_process.started")]
    EyeProcessStarted { eye_id: EyeId },
    #[serde(rename = "eye_process.stopped")]
    EyeProcessStopped { eye_id: EyeId },
    #[serde(rename = "source.should_pause")]
    SourceShouldPause { source_path: PathBuf },
    #[serde(rename = "source.should_play")]
    SourceShouldPlay { source_path: PathBuf },
    #[serde(rename = "source.seek")]
    SourceSeek { frame_index: u64, source_path: PathBuf },
    #[serde(rename = "source.video_finished")]
    SourceVideoFinished { source_path: PathBuf },
    #[serde(rename = "set_detection_mapping_mode")]
    SetDetectionMappingMode { mode: DetectorTag },
}

impl Notification {
    pub fn subject(&self) -> &'static str {
        match self {
            Notification::EyeProcessShouldStart { .. } => "eye_process.should_start",
            Notification::EyeProcessShouldStop { .. } => "eye_process.should_stop",
            Notification::EyeProcessStarted { .. } => "eye_process.started",
            Notification::EyeProcessStopped { .. } => "eye_process.stopped",
            Notification::SourceShouldPause { .. } => "source.should_pause",
            Notification::SourceShouldPlay { .. } => "source.should_play",
            Notification::SourceSeek { .. } => "source.seek",
            Notification::SourceVideoFinished { .. } => "source.video_finished",
            Notification::SetDetectionMappingMode { .. } => "set_detection_mapping_mode",
        }
    }

    /// Get a human-readable description of the notification
    pub fn description(&self) -> String {
        match self {
            Notification::EyeProcessShouldStart {
                eye_id,
                source_path,
            } => format!("Start eye {} on {}", eye_id, source_path.display()),
            Notification::EyeProcessShouldStop { eye_id } => format!("Stop eye {}", eye_id),
            Notification::EyeProcessStarted { eye_id } => format!("Eye {} started", eye_id),
            Notification::EyeProcessStopped { eye_id } => format!("Eye {} stopped", eye_id),
            Notification::SourceShouldPause { source_path } => {
                format!("Pause {}", source_path.display())
            }
            Notification::SourceShouldPlay { source_path } => {
                format!("Play {}", source_path.display())
            }
            Notification::SourceSeek {
                frame_index,
                source_path,
            } => format!("Seek {} to frame {}", source_path.display(), frame_index),
            Notification::SourceVideoFinished { source_path } => {
                format!("Video finished: {}", source_path.display())
            }
            Notification::SetDetectionMappingMode { mode } => {
                format!("Detection mapping mode: {}", mode)
            }
        }
    }
}

/// Everything that travels over the bus
#[derive(Debug, Clone, PartialEq)]
pub enum BusMessage {
    /// Serialized detection result on a `pupil.<eye>` topic
    Data { topic: String, payload: Vec<u8> },
    /// Notification on `notify.<subject>`
    Notify(Notification),
}

impl BusMessage {
    pub fn pupil(eye_id: EyeId, payload: Vec<u8>) -> Self {
        BusMessage::Data {
            topic: eye_id.topic(),
            payload,
        }
    }

    pub fn topic(&self) -> String {
        match self {
            BusMessage::Data { topic, .. } => topic.clone(),
            BusMessage::Notify(notification) => format!("notify.{}", notification.subject()),
        }
    }

    pub fn description(&self) -> String {
        match self {
            BusMessage::Data { topic, payload } => {
                format!("{} ({} bytes)", topic, payload.len())
            }
            BusMessage::Notify(notification) => notification.description(),
        }
    }
}

/// Message bus for eye processes and the host, backed by a broadcast channel
pub struct EventBus {
    sender: broadcast::Sender<BusMessage>,
    debug_logging: bool,
}

impl EventBus {
    /// Create a new event bus with the specified channel capacity
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender,
            debug_logging: false,
        }
    }

    /// Create a new event bus with debug logging enabled
    pub fn with_debug_logging(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender,
            debug_logging: true,
        }
    }

    /// Subscribe to messages and get a raw receiver
    pub fn subscribe(&self) -> broadcast::Receiver<BusMessage> {
        self.sender.subscribe()
    }

    /// Subscribe with a topic filter
    pub fn subscribe_filtered<S: Into<String>>(&self, filter: EventFilter, name: S) -> EventReceiver {
        EventReceiver::new(self.sender.subscribe(), filter, name.into())
    }

    /// Publish a message to all subscribers. Never blocks.
    pub fn publish(&self, message: BusMessage) -> Result<usize, EventBusError> {
        if self.debug_logging {
            debug!("Publishing {}: {}", message.topic(), message.description());
        }

        self.sender
            .send(message)
            .map_err(|e| EventBusError::PublishFailed {
                details: e.to_string(),
            })
    }

    /// Fire-and-forget notification; having no listeners is not an error
    pub fn notify_all(&self, notification: Notification) {
        match &notification {
            Notification::EyeProcessShouldStart { .. }
            | Notification::EyeProcessShouldStop { .. }
            | Notification::SetDetectionMappingMode { .. } => {
                info!("{}", notification.description());
            }
            _ => debug!("{}", notification.description()),
        }

        if let Err(e) = self.publish(BusMessage::Notify(notification)) {
            debug!("Notification dropped: {}", e);
        }
    }

    /// Get the number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    /// Check if there are any active subscribers
    pub fn has_subscribers(&self) -> bool {
        self.sender.receiver_count() > 0
    }
}

impl Clone for EventBus {
    fn clone(&self) -> Self {
        Self {
            sender: self.sender.clone(),
            debug_logging: self.debug_logging,
        }
    }
}

/// Message filter for selective receiving
#[derive(Debug, Clone)]
pub enum EventFilter {
    /// Accept all messages
    All,
    /// Accept messages whose topic starts with one of these prefixes
    Topics(Vec<String>),
}

impl EventFilter {
    pub fn topics<I, S>(prefixes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        EventFilter::Topics(prefixes.into_iter().map(Into::into).collect())
    }

    /// Check if a message passes this filter
    pub fn matches(&self, message: &BusMessage) -> bool {
        match self {
            EventFilter::All => true,
            EventFilter::Topics(prefixes) => {
                let topic = message.topic();
                prefixes.iter().any(|prefix| topic.starts_with(prefix.as_str()))
            }
        }
    }
}

/// Receiver that only yields messages passing its filter
pub struct EventReceiver {
    receiver: broadcast::Receiver<BusMessage>,
    filter: EventFilter,
    name: String,
}

impl EventReceiver {
    pub fn new(receiver: broadcast::Receiver<BusMessage>, filter: EventFilter, name: String) -> Self {
        Self {
            receiver,
            filter,
            name,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Receive the next filtered message
    pub async fn recv(&mut self) -> Result<BusMessage, EventBusError> {
        loop {
            match self.receiver.recv().await {
                Ok(message) => {
                    if self.filter.matches(&message) {
                        return Ok(message);
                    }
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!("Receiver '{}' lagged behind by {} messages", self.name, n);
                    return Err(EventBusError::Lagged(n));
                }
                Err(broadcast::error::RecvError::Closed) => {
                    debug!("Event bus closed for receiver '{}'", self.name);
                    return Err(EventBusError::ChannelClosed);
                }
            }
        }
    }

    /// Try to receive a message without blocking
    pub fn try_recv(&mut self) -> Result<Option<BusMessage>, EventBusError> {
        loop {
            match self.receiver.try_recv() {
                Ok(message) => {
                    if self.filter.matches(&message) {
                        return Ok(Some(message));
                    }
                }
                Err(broadcast::error::TryRecvError::Empty) => {
                    return Ok(None);
                }
                Err(broadcast::error::TryRecvError::Lagged(n)) => {
                    warn!("Receiver '{}' lagged behind by {} messages", self.name, n);
                    return Err(EventBusError::Lagged(n));
                }
                Err(broadcast::error::TryRecvError::Closed) => {
                    debug!("Event bus closed for receiver '{}'", self.name);
                    return Err(EventBusError::ChannelClosed);
                }
            }
        }
    }
}
