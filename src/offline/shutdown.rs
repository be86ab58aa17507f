use super::OfflinePupilDetection;
use crate::error::Result;
use crate::record::EyeId;
use tracing::info;

impl OfflinePupilDetection {
    /// Stop both eyes, let go of the bus and persist the final state.
    ///
    /// Must run before the host tears the bus down. A failed save is returned.
    pub fn cleanup(&mut self) -> Result<()> {
        info!("Shutting down offline pupil detection");
        for eye_id in EyeId::ALL {
            self.stop_eye_process(eye_id);
        }

        self.data_sub = None;
        self.notify_sub = None;

        self.save_offline_data()
    }

    pub fn is_subscribed(&self) -> bool {
        self.data_sub.is_some() || self.notify_sub.is_some()
    }
}
