//! Activity decision engine: frame scoring, bounded frame history and the
//! escalation/cooldown state machine that decides when to report.

pub mod activity;
pub mod ring;
pub mod scorer;

pub use activity::{ActivityMonitor, MonitorPhase, MonitorState, ReportDecision};
pub use ring::{RingBuffer, Window};
pub use scorer::FrameScorer;
