use smartguard_types::{config::ScoringConfig, frame::AnnotatedFrame};

/// Weighted count of detected regions.
///
/// Scores are memoized on the frame: the first call computes and stores
/// the score, later calls return the stored value.
#[derive(Debug, Clone, Copy)]
pub struct FrameScorer {
    config: ScoringConfig,
}

impl FrameScorer {
    pub fn new(config: ScoringConfig) -> Self {
        Self { config }
    }

    pub fn score(&self, frame: &AnnotatedFrame) -> u32 {
        frame.score_or_init(|frame| self.compute(frame))
    }

    fn compute(&self, frame: &AnnotatedFrame) -> u32 {
        let motion = frame.motion_regions.len() as u32;
        let faces = frame.face_regions.len() as u32;
        self.config.motion_weight * motion + self.config.face_weight * faces
    }

    pub fn is_motion(&self, score: u32) -> bool {
        score > 0 && score >= self.config.motion_threshold
    }

    pub fn is_good(&self, score: u32) -> bool {
        score > self.config.good_threshold
    }
}
