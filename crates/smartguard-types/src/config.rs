use std::{fs, path::Path};

use serde::{Deserialize, Serialize};

use crate::{Result, SmartguardError};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    pub client_id: String,
    pub report_topic: String,
    /// Topic the remote side answers on; `{client_id}` is substituted.
    pub grant_topic: String,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            client_id: "smartguard-device".into(),
            report_topic: "from/device/detections".into(),
            grant_topic: "to/device/{client_id}".into(),
        }
    }
}

impl DeviceConfig {
    pub fn resolved_grant_topic(&self) -> String {
        self.grant_topic.replace("{client_id}", &self.client_id)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    pub fps: u32,
    /// Persist annotated debug frames.
    pub display: bool,
    /// Video file to read. `None` or empty means the live camera.
    pub input: Option<String>,
    pub camera_device: String,
    pub camera_format: String,
    /// Frames are scaled to this width before detection.
    pub working_width: u32,
    pub ffmpeg_path: Option<String>,
    pub ffprobe_path: Option<String>,
    pub debug_dir: String,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            fps: 10,
            display: false,
            input: None,
            camera_device: "/dev/video0".into(),
            camera_format: "v4l2".into(),
            working_width: 600,
            ffmpeg_path: None,
            ffprobe_path: None,
            debug_dir: "debug-frames".into(),
        }
    }
}

impl CaptureConfig {
    pub fn input_path(&self) -> Option<&str> {
        self.input.as_deref().filter(|path| !path.trim().is_empty())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MotionConfig {
    pub blur_kernel: u32,
    pub threshold: u8,
    pub dilate_iterations: u8,
    /// Minimum blob area at `reference_width`.
    pub min_area: u64,
    pub reference_width: u32,
}

impl Default for MotionConfig {
    fn default() -> Self {
        Self {
            blur_kernel: 5,
            threshold: 20,
            dilate_iterations: 20,
            min_area: 10_000,
            reference_width: 600,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FaceConfig {
    pub model_path: String,
    pub scale_step: f32,
    pub min_neighbors: u32,
    pub min_face_size: u32,
    pub score_threshold: f64,
}

impl Default for FaceConfig {
    fn default() -> Self {
        Self {
            model_path: "models/seeta_fd_frontal_v1.0.bin".into(),
            scale_step: 1.1,
            min_neighbors: 4,
            min_face_size: 20,
            score_threshold: 2.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PrivacyConfig {
    /// Unblurred margin around a face, as a fraction of its size.
    pub margin: f32,
    pub blur_kernel: u32,
    pub jpeg_quality: u8,
}

impl Default for PrivacyConfig {
    fn default() -> Self {
        Self {
            margin: 0.35,
            blur_kernel: 51,
            jpeg_quality: 90,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringConfig {
    pub motion_weight: u32,
    pub face_weight: u32,
    /// A frame with `score >= motion_threshold` counts as motion.
    pub motion_threshold: u32,
    /// A frame with `score > good_threshold` is good enough to report.
    pub good_threshold: u32,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            motion_weight: 1,
            face_weight: 5,
            motion_threshold: 1,
            good_threshold: 3,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    pub check_interval_secs: u64,
    pub cooldown_secs: u64,
    pub best_effort_after_secs: u64,
    pub window_secs: u64,
    pub history_secs: u64,
    pub min_history_frames: usize,
    pub scoring: ScoringConfig,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            check_interval_secs: 5,
            cooldown_secs: 7 * 60,
            best_effort_after_secs: 60,
            window_secs: 60,
            history_secs: 120,
            min_history_frames: 1200,
            scoring: ScoringConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    #[default]
    Local,
    Mqtt,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    pub transport: TransportKind,
    pub broker_host: String,
    pub broker_port: u16,
    pub channel_capacity: usize,
    /// Extra attempts per upload target. At most one.
    pub upload_retries: u8,
    pub upload_timeout_secs: u64,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            transport: TransportKind::Local,
            broker_host: "localhost".into(),
            broker_port: 1883,
            channel_capacity: 64,
            upload_retries: 0,
            upload_timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OpsConfig {
    pub log_level: String,
}

impl Default for OpsConfig {
    fn default() -> Self {
        Self {
            log_level: "info".into(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SmartguardConfig {
    pub device: DeviceConfig,
    pub capture: CaptureConfig,
    pub motion: MotionConfig,
    pub faces: FaceConfig,
    pub privacy: PrivacyConfig,
    pub monitor: MonitorConfig,
    pub network: NetworkConfig,
    pub ops: OpsConfig,
}

impl SmartguardConfig {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path_ref = path.as_ref();
        let contents = fs::read_to_string(path_ref).map_err(|err| {
            SmartguardError::Configuration(format!(
                "unable to read config file {}: {err}",
                path_ref.display()
            ))
        })?;
        toml::from_str(&contents).map_err(|err| {
            SmartguardError::Configuration(format!(
                "failed to parse config file {}: {err}",
                path_ref.display()
            ))
        })
    }

    pub fn validate(&self) -> Result<()> {
        if self.device.client_id.trim().is_empty() {
            return Err(config_error("device.client_id must not be empty"));
        }
        if self.capture.fps == 0 {
            return Err(config_error("capture.fps must be greater than zero"));
        }
        if self.capture.working_width == 0 || self.motion.reference_width == 0 {
            return Err(config_error(
                "capture.working_width and motion.reference_width must be greater than zero",
            ));
        }
        if self.motion.blur_kernel % 2 == 0 || self.privacy.blur_kernel % 2 == 0 {
            return Err(config_error("blur kernels must be odd"));
        }
        if self.faces.scale_step <= 1.0 {
            return Err(config_error("faces.scale_step must be greater than 1.0"));
        }
        if !(0.0..=1.0).contains(&self.privacy.margin) {
            return Err(config_error("privacy.margin must be between 0.0 and 1.0"));
        }
        if !(1..=100).contains(&self.privacy.jpeg_quality) {
            return Err(config_error("privacy.jpeg_quality must be between 1 and 100"));
        }
        if self.monitor.check_interval_secs == 0 || self.monitor.window_secs == 0 {
            return Err(config_error(
                "monitor.check_interval_secs and monitor.window_secs must be greater than zero",
            ));
        }
        if self.monitor.scoring.good_threshold < self.monitor.scoring.motion_threshold {
            return Err(config_error(
                "monitor.scoring.good_threshold must not be below motion_threshold",
            ));
        }
        if self.network.upload_retries > 1 {
            return Err(config_error("network.upload_retries must be 0 or 1"));
        }
        if self.network.channel_capacity == 0 {
            return Err(config_error("network.channel_capacity must be greater than zero"));
        }
        Ok(())
    }
}

fn config_error(message: &str) -> SmartguardError {
    SmartguardError::Configuration(message.into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn load_smartguard_config_from_file() {
        let temp_path = std::env::temp_dir().join("smartguard-config-test.toml");
        let mut config = SmartguardConfig::default();
        config.device.client_id = "porch-cam".into();
        config.capture.fps = 15;
        config.capture.input = Some("clips/walkby.mp4".into());
        config.monitor.scoring.face_weight = 7;
        config.network.transport = TransportKind::Mqtt;

        let doc = toml::to_string(&config).expect("serialize config");
        fs::write(&temp_path, doc).expect("write temp config");

        let loaded = SmartguardConfig::from_file(&temp_path).expect("load config");
        assert_eq!(loaded.device.client_id, "porch-cam");
        assert_eq!(loaded.capture.fps, 15);
        assert_eq!(loaded.capture.input_path(), Some("clips/walkby.mp4"));
        assert_eq!(loaded.monitor.scoring.face_weight, 7);
        assert_eq!(loaded.network.transport, TransportKind::Mqtt);
        fs::remove_file(&temp_path).expect("cleanup temp config");
    }

    #[test]
    fn partial_file_uses_defaults() {
        let config: SmartguardConfig = toml::from_str(
            r#"
            [capture]
            fps = 5

            [monitor.scoring]
            good_threshold = 4
            "#,
        )
        .expect("parse partial config");

        assert_eq!(config.capture.fps, 5);
        assert_eq!(config.capture.working_width, 600);
        assert_eq!(config.monitor.scoring.good_threshold, 4);
        assert_eq!(config.monitor.scoring.face_weight, 5);
        assert_eq!(config.monitor.cooldown_secs, 420);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn grant_topic_substitutes_client_id() {
        let device = DeviceConfig {
            client_id: "raspberrypi".into(),
            ..Default::default()
        };
        assert_eq!(device.resolved_grant_topic(), "to/device/raspberrypi");
    }

    #[test]
    fn empty_input_means_live_camera() {
        let capture = CaptureConfig {
            input: Some("  ".into()),
            ..Default::default()
        };
        assert_eq!(capture.input_path(), None);
    }

    #[test]
    fn validate_configuration_rules() {
        let mut config = SmartguardConfig::default();
        assert!(config.validate().is_ok());

        config.capture.fps = 0;
        assert!(config.validate().is_err());
        config.capture.fps = 10;
        config.privacy.blur_kernel = 50;
        assert!(config.validate().is_err());
        config.privacy.blur_kernel = 51;
        config.privacy.margin = 1.5;
        assert!(config.validate().is_err());
        config.privacy.margin = 0.35;
        config.faces.scale_step = 1.0;
        assert!(config.validate().is_err());
        config.faces.scale_step = 1.1;
        config.network.upload_retries = 2;
        assert!(config.validate().is_err());
        config.network.upload_retries = 1;
        config.device.client_id = String::new();
        assert!(config.validate().is_err());
        config.device.client_id = "device".into();
        assert!(config.validate().is_ok());
    }
}
