mod ingest;
mod lifecycle;
mod orchestrator;
mod publish;
mod shutdown;
mod types;

#[cfg(test)]
mod tests;

pub use ingest::TickReport;
pub use orchestrator::OfflinePupilDetection;
pub use types::EyeProcessState;
