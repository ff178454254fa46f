use serde::{Deserialize, Serialize};

/// Counters kept by the capture loop.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct CaptureStats {
    pub frames_read: u64,
    /// Frames that went through motion and face detection.
    pub frames_processed: u64,
    /// Iterations that took longer than one frame period.
    pub deadline_misses: u64,
    pub worst_iteration_ms: u64,
    pub reports_emitted: u64,
}
