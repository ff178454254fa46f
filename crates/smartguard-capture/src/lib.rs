//! Video source abstraction layer.

use std::collections::VecDeque;

use async_trait::async_trait;
use image::RgbImage;
use smartguard_types::{frame::VideoFrame, SmartguardError, Result};
use tokio::time::{sleep, Duration, Instant};
use tracing::info;

mod ffmpeg;

pub use ffmpeg::{parse_probe_output, scaled_dimensions, FfmpegSource};

/// How frames arriving from a source are admitted into processing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pacing {
    /// Frames arrive at the camera's own rate; only frames whose
    /// inter-arrival since the last processed one exceeds the frame period
    /// are processed.
    Live,
    /// Frames are read as fast as the decoder allows; the reader sleeps one
    /// frame period between reads and processes every frame.
    File,
}

#[async_trait]
pub trait VideoSource: Send {
    /// Returns `Ok(None)` once the stream is exhausted.
    async fn next_frame(&mut self) -> Result<Option<VideoFrame>>;
    fn dimensions(&self) -> (u32, u32);
    fn fps(&self) -> u32;
    fn pacing(&self) -> Pacing;
    /// Releases any process or device held by the source.
    async fn release(&mut self) -> Result<()>;
}

/// Decides per frame whether the capture loop processes it.
#[derive(Debug)]
pub struct FramePacer {
    pacing: Pacing,
    period: Duration,
    last_processed: Instant,
}

impl FramePacer {
    pub fn new(pacing: Pacing, fps: u32) -> Self {
        Self {
            pacing,
            period: frame_period(fps),
            last_processed: Instant::now(),
        }
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    pub async fn admit(&mut self) -> bool {
        match self.pacing {
            Pacing::File => {
                sleep(self.period).await;
                true
            }
            Pacing::Live => {
                let now = Instant::now();
                if now.duration_since(self.last_processed) > self.period {
                    self.last_processed = now;
                    true
                } else {
                    false
                }
            }
        }
    }
}

pub fn frame_period(fps: u32) -> Duration {
    Duration::from_secs_f64(1.0 / fps.max(1) as f64)
}

/// Source replaying a fixed list of frames, used for integration and tests.
pub struct MemorySource {
    frames: VecDeque<RgbImage>,
    dimensions: (u32, u32),
    fps: u32,
    pacing: Pacing,
}

impl MemorySource {
    pub fn new(frames: Vec<RgbImage>, fps: u32) -> Self {
        let dimensions = frames
            .first()
            .map(|frame| frame.dimensions())
            .unwrap_or((0, 0));
        Self {
            frames: frames.into(),
            dimensions,
            fps,
            pacing: Pacing::File,
        }
    }

    pub fn with_pacing(mut self, pacing: Pacing) -> Self {
        self.pacing = pacing;
        self
    }

    pub fn remaining(&self) -> usize {
        self.frames.len()
    }
}

#[async_trait]
impl VideoSource for MemorySource {
    async fn next_frame(&mut self) -> Result<Option<VideoFrame>> {
        let Some(image) = self.frames.pop_front() else {
            return Ok(None);
        };
        if image.dimensions() != self.dimensions {
            return Err(capture_error(format!(
                "frame size {:?} differs from stream size {:?}",
                image.dimensions(),
                self.dimensions
            )));
        }
        Ok(Some(VideoFrame::new(image)))
    }

    fn dimensions(&self) -> (u32, u32) {
        self.dimensions
    }

    fn fps(&self) -> u32 {
        self.fps
    }

    fn pacing(&self) -> Pacing {
        self.pacing
    }

    async fn release(&mut self) -> Result<()> {
        info!("Releasing memory source with {} unread frames", self.frames.len());
        self.frames.clear();
        Ok(())
    }
}

/// Generate an error aligned with capture semantics.
pub fn capture_error(message: impl Into<String>) -> SmartguardError {
    SmartguardError::Capture(message.into())
}
