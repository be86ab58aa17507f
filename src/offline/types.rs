use std::path::PathBuf;

/// What the orchestrator knows about one eye process while it is alive
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EyeProcessState {
    /// Video the eye process was started on; `None` when not running
    pub source_path: Option<PathBuf>,
    /// Frames the eye process is expected to produce
    pub expected_frame_count: usize,
    pub is_paused: bool,
}

impl EyeProcessState {
    pub fn is_active(&self) -> bool {
        self.source_path.is_some()
    }
}
