use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use smartguard_types::{config::MonitorConfig, frame::AnnotatedFrame, report::ReportKind};
use tracing::{debug, info};

use crate::{
    ring::{RingBuffer, Window},
    scorer::FrameScorer,
};

/// Timestamps driving the escalation and cooldown logic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonitorState {
    pub last_activity_check: DateTime<Utc>,
    /// Set when motion is first seen, cleared when a report goes out.
    pub last_motion_detected_at: Option<DateTime<Utc>>,
    pub last_report_sent_at: Option<DateTime<Utc>>,
    /// Only good reports update this one.
    pub last_strong_report_sent_at: Option<DateTime<Utc>>,
}

impl MonitorState {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            last_activity_check: now,
            last_motion_detected_at: None,
            last_report_sent_at: None,
            last_strong_report_sent_at: None,
        }
    }
}

/// Derived view of [`MonitorState`], attached to the check log lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorPhase {
    Idle,
    Escalating,
    CoolingDown,
}

/// Report chosen by a check.
#[derive(Debug, Clone)]
pub struct ReportDecision {
    pub kind: ReportKind,
    pub score: u32,
    pub frame: AnnotatedFrame,
}

/// Owns the frame history and decides when activity is worth reporting.
///
/// A check runs at most once per `check_interval_secs`. Within
/// `cooldown_secs` of a good report every check is skipped. A window with a
/// good frame produces a good report; sustained motion without one produces
/// a best-effort report after `best_effort_after_secs`, unless any report
/// went out within the cooldown.
#[derive(Debug)]
pub struct ActivityMonitor {
    config: MonitorConfig,
    fps: u32,
    scorer: FrameScorer,
    buffer: RingBuffer,
    state: MonitorState,
}

impl ActivityMonitor {
    pub fn new(config: MonitorConfig, fps: u32) -> Self {
        Self::starting_at(config, fps, Utc::now())
    }

    pub fn starting_at(config: MonitorConfig, fps: u32, now: DateTime<Utc>) -> Self {
        let capacity =
            RingBuffer::capacity_for(fps, config.history_secs, config.min_history_frames);
        Self {
            scorer: FrameScorer::new(config.scoring),
            buffer: RingBuffer::with_capacity(capacity),
            state: MonitorState::new(now),
            config,
            fps,
        }
    }

    pub fn add_frame(&mut self, frame: AnnotatedFrame) {
        self.buffer.append(frame);
    }

    pub fn buffer(&self) -> &RingBuffer {
        &self.buffer
    }

    pub fn state(&self) -> &MonitorState {
        &self.state
    }

    pub fn phase(&self, now: DateTime<Utc>) -> MonitorPhase {
        if self.within_cooldown(self.state.last_strong_report_sent_at, now) {
            MonitorPhase::CoolingDown
        } else if self.state.last_motion_detected_at.is_some() {
            MonitorPhase::Escalating
        } else {
            MonitorPhase::Idle
        }
    }

    pub fn check_activity(&mut self) -> Option<ReportDecision> {
        self.check_activity_at(Utc::now())
    }

    pub fn check_activity_at(&mut self, now: DateTime<Utc>) -> Option<ReportDecision> {
        if now - self.state.last_activity_check < secs(self.config.check_interval_secs) {
            return None;
        }
        self.state.last_activity_check = now;

        if let Some(sent) = self.state.last_strong_report_sent_at {
            if self.within_cooldown(Some(sent), now) {
                debug!(
                    phase = ?MonitorPhase::CoolingDown,
                    minutes_ago = (now - sent).num_minutes(),
                    "good report sent recently, skipping activity check"
                );
                return None;
            }
        }

        let window_len = (self.fps as u64).saturating_mul(self.config.window_secs) as usize;
        let summary = summarize(self.buffer.latest(window_len), &self.scorer);

        if self.state.last_motion_detected_at.is_none() && summary.has_motion {
            info!(frames = summary.frames, "motion detected");
            self.state.last_motion_detected_at = Some(now);
        }

        let (frame, score) = summary.best?;
        if summary.has_good {
            return Some(self.report(ReportKind::Good, frame, score, now));
        }

        let motion_since = self.state.last_motion_detected_at?;
        let escalated_for = now - motion_since;
        debug!(
            phase = ?self.phase(now),
            seconds = escalated_for.num_seconds(),
            last_report = ?self.state.last_report_sent_at,
            "escalating without a good frame"
        );
        if escalated_for > secs(self.config.best_effort_after_secs)
            && !self.within_cooldown(self.state.last_report_sent_at, now)
        {
            info!(
                "motion for {}s without a good frame, sending the best one",
                escalated_for.num_seconds()
            );
            return Some(self.report(ReportKind::BestEffort, frame, score, now));
        }
        None
    }

    fn report(
        &mut self,
        kind: ReportKind,
        frame: AnnotatedFrame,
        score: u32,
        now: DateTime<Utc>,
    ) -> ReportDecision {
        info!(
            ?kind,
            score,
            objects = frame.motion_regions.len(),
            faces = frame.face_regions.len(),
            "reporting best frame"
        );
        self.state.last_motion_detected_at = None;
        self.state.last_report_sent_at = Some(now);
        if kind == ReportKind::Good {
            self.state.last_strong_report_sent_at = Some(now);
        }
        ReportDecision { kind, score, frame }
    }

    fn within_cooldown(&self, sent: Option<DateTime<Utc>>, now: DateTime<Utc>) -> bool {
        sent.is_some_and(|sent| now - sent < secs(self.config.cooldown_secs))
    }
}

struct WindowSummary {
    frames: usize,
    has_motion: bool,
    has_good: bool,
    best: Option<(AnnotatedFrame, u32)>,
}

/// Scores every frame of the window and picks the best one. On equal
/// scores the earliest frame wins.
fn summarize(window: Window<'_>, scorer: &FrameScorer) -> WindowSummary {
    let mut has_motion = false;
    let mut has_good = false;
    let mut best: Option<(&AnnotatedFrame, u32)> = None;

    for frame in window {
        let score = scorer.score(frame);
        has_motion |= scorer.is_motion(score);
        has_good |= scorer.is_good(score);
        if best.map_or(true, |(_, top)| score > top) {
            best = Some((frame, score));
        }
    }

    WindowSummary {
        frames: window.len(),
        has_motion,
        has_good,
        best: best.map(|(frame, score)| (frame.clone(), score)),
    }
}

fn secs(seconds: u64) -> Duration {
    Duration::seconds(seconds as i64)
}
