//! Frame perception: motion extraction, face localisation restricted to
//! moving regions, and the privacy blur applied before any upload.

use smartguard_types::SmartguardError;

pub mod faces;
pub mod motion;
pub mod overlay;
pub mod privacy;

pub use faces::{FaceDetector, FaceLocator, SeetaFaceDetector};
pub use motion::MotionDetector;
pub use overlay::DebugRecorder;
pub use privacy::{encode_jpeg, PrivacyFilter};

/// Gaussian sigma matching an odd square kernel size when no explicit sigma
/// is given.
pub fn kernel_sigma(kernel: u32) -> f32 {
    0.3 * ((kernel.max(1) as f32 - 1.0) * 0.5 - 1.0) + 0.8
}

pub fn vision_error(message: impl Into<String>) -> SmartguardError {
    SmartguardError::Vision(message.into())
}
