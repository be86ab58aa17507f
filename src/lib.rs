pub mod config;
pub mod error;
pub mod events;
pub mod offline;
pub mod producer;
pub mod published;
pub mod record;
pub mod session;
pub mod store;
pub mod timeline;
pub mod video;

pub use config::PupilConfig;
pub use error::{EventBusError, PupilError, Result};
pub use events::{BusMessage, EventBus, EventFilter, EventReceiver, Notification};
pub use offline::{EyeProcessState, OfflinePupilDetection, TickReport};
pub use producer::{enclosing_window, pupil_for_frame, PupilFromRecording};
pub use published::{
    published_slot, ChangeKind, DataChanged, DataChangedAnnouncer, PupilPublisher, SlotReader,
    SlotWriter, PUPIL_POSITIONS_TOPIC,
};
pub use record::{DetectionRecord, DetectorTag, EyeId, PupilDatum};
pub use session::{DetectionStatus, SessionMetadata, FORCED_DETECTION_METHOD, SESSION_DATA_VERSION};
pub use store::{PupilData, PupilDataBisector, PupilSnapshot, SeriesKey, STORE_FILE_VERSION};
pub use timeline::{cache_timeline_data, TimelineCache};
pub use video::{FileSystemResolver, VideoSourceResolver};
