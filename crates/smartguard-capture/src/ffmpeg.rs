use std::{
    path::{Path, PathBuf},
    process::Stdio,
};

use async_trait::async_trait;
use image::RgbImage;
use smartguard_types::{config::CaptureConfig, frame::VideoFrame, Result};
use tokio::{
    io::AsyncReadExt,
    process::{Child, ChildStdout, Command},
};
use tracing::{debug, info};

use crate::{capture_error, Pacing, VideoSource};

const DEFAULT_FFMPEG: &str = "ffmpeg";
const DEFAULT_FFPROBE: &str = "ffprobe";

/// Video source decoding through an `ffmpeg` child process into raw RGB24
/// frames scaled to the working width.
///
/// A file path reads a video file; without one the configured camera device
/// is opened (`v4l2` by default).
pub struct FfmpegSource {
    child: Child,
    stdout: ChildStdout,
    width: u32,
    height: u32,
    fps: u32,
    pacing: Pacing,
    frames_read: u64,
}

struct InputSpec {
    format: Option<String>,
    location: String,
}

impl InputSpec {
    fn args(&self) -> Vec<String> {
        let mut args = Vec::new();
        if let Some(format) = &self.format {
            args.push("-f".to_string());
            args.push(format.clone());
        }
        args.push("-i".to_string());
        args.push(self.location.clone());
        args
    }
}

impl FfmpegSource {
    pub async fn open(config: &CaptureConfig) -> Result<Self> {
        let (input, pacing) = match config.input_path() {
            Some(path) => (
                InputSpec {
                    format: None,
                    location: path.to_string(),
                },
                Pacing::File,
            ),
            None => (
                InputSpec {
                    format: Some(config.camera_format.clone()),
                    location: config.camera_device.clone(),
                },
                Pacing::Live,
            ),
        };

        let ffprobe = binary_path(config.ffprobe_path.as_deref(), DEFAULT_FFPROBE);
        let (source_width, source_height) = probe_dimensions(&ffprobe, &input).await?;
        let (width, height) = scaled_dimensions(source_width, source_height, config.working_width);

        let ffmpeg = binary_path(config.ffmpeg_path.as_deref(), DEFAULT_FFMPEG);
        let scale = format!("scale={width}:{height}");
        let mut command = Command::new(&ffmpeg);
        command
            .args(["-nostdin", "-loglevel", "error"])
            .args(input.args())
            .args([
                "-vf",
                scale.as_str(),
                "-f",
                "rawvideo",
                "-pix_fmt",
                "rgb24",
                "pipe:1",
            ])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);

        let mut child = command.spawn().map_err(|err| {
            capture_error(format!("failed to start {}: {err}", ffmpeg.display()))
        })?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| capture_error("ffmpeg stdout not captured"))?;

        info!(
            "Opened {} ({}x{} scaled to {}x{}, {:?} pacing @ {}fps)",
            input.location, source_width, source_height, width, height, pacing, config.fps
        );

        Ok(Self {
            child,
            stdout,
            width,
            height,
            fps: config.fps,
            pacing,
            frames_read: 0,
        })
    }

    fn frame_len(&self) -> usize {
        self.width as usize * self.height as usize * 3
    }
}

#[async_trait]
impl VideoSource for FfmpegSource {
    async fn next_frame(&mut self) -> Result<Option<VideoFrame>> {
        let mut buffer = vec![0u8; self.frame_len()];
        match self.stdout.read_exact(&mut buffer).await {
            Ok(_) => {}
            Err(err) if err.kind() == std::io::ErrorKind::UnexpectedEof => {
                debug!("ffmpeg stream ended after {} frames", self.frames_read);
                return Ok(None);
            }
            Err(err) => return Err(capture_error(format!("frame read failed: {err}"))),
        }
        self.frames_read += 1;
        let image = RgbImage::from_raw(self.width, self.height, buffer)
            .ok_or_else(|| capture_error("decoded frame has unexpected size"))?;
        Ok(Some(VideoFrame::new(image)))
    }

    fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn fps(&self) -> u32 {
        self.fps
    }

    fn pacing(&self) -> Pacing {
        self.pacing
    }

    async fn release(&mut self) -> Result<()> {
        if self
            .child
            .try_wait()
            .map_err(|err| capture_error(format!("ffmpeg status check failed: {err}")))?
            .is_none()
        {
            self.child
                .kill()
                .await
                .map_err(|err| capture_error(format!("failed to stop ffmpeg: {err}")))?;
        }
        info!("Released ffmpeg source after {} frames", self.frames_read);
        Ok(())
    }
}

fn binary_path(configured: Option<&str>, default: &str) -> PathBuf {
    configured
        .filter(|path| !path.is_empty())
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(default))
}

async fn probe_dimensions(ffprobe: &Path, input: &InputSpec) -> Result<(u32, u32)> {
    let mut args = vec![
        "-v".to_string(),
        "error".to_string(),
        "-select_streams".to_string(),
        "v:0".to_string(),
        "-show_entries".to_string(),
        "stream=width,height".to_string(),
        "-of".to_string(),
        "csv=p=0:s=x".to_string(),
    ];
    if let Some(format) = &input.format {
        args.push("-f".to_string());
        args.push(format.clone());
    }
    args.push(input.location.clone());

    let output = Command::new(ffprobe)
        .args(&args)
        .output()
        .await
        .map_err(|err| capture_error(format!("ffprobe failed to run ({}): {err}", args.join(" "))))?;

    if !output.status.success() {
        return Err(capture_error(format!(
            "ffprobe failed on {}: {}",
            input.location,
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }
    parse_probe_output(&String::from_utf8_lossy(&output.stdout))
}

/// Parses `WIDTHxHEIGHT` as printed by ffprobe's csv writer.
pub fn parse_probe_output(output: &str) -> Result<(u32, u32)> {
    let line = output
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .ok_or_else(|| capture_error("ffprobe reported no video stream"))?;
    let (width, height) = line
        .split_once('x')
        .ok_or_else(|| capture_error(format!("unexpected ffprobe output '{line}'")))?;
    let parse = |value: &str| {
        value
            .trim()
            .parse::<u32>()
            .ok()
            .filter(|v| *v > 0)
            .ok_or_else(|| capture_error(format!("invalid dimension in '{line}'")))
    };
    Ok((parse(width)?, parse(height)?))
}

/// Scales to `working_width` keeping the aspect ratio.
pub fn scaled_dimensions(width: u32, height: u32, working_width: u32) -> (u32, u32) {
    if width == 0 || working_width == 0 {
        return (width, height);
    }
    let scaled_height = (height as f64 * working_width as f64 / width as f64).round() as u32;
    (working_width, scaled_height.max(1))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_ffprobe_csv() {
        assert_eq!(parse_probe_output("1280x720\n").expect("parse"), (1280, 720));
        assert_eq!(parse_probe_output("\n 640x480 \n").expect("parse"), (640, 480));
        assert!(parse_probe_output("").is_err());
        assert!(parse_probe_output("1280,720").is_err());
        assert!(parse_probe_output("0x720").is_err());
    }

    #[test]
    fn scale_to_working_width() {
        assert_eq!(scaled_dimensions(1280, 720, 600), (600, 338));
        assert_eq!(scaled_dimensions(600, 400, 600), (600, 400));
        assert_eq!(scaled_dimensions(320, 240, 600), (600, 450));
    }

    #[test]
    fn camera_input_carries_format() {
        let input = InputSpec {
            format: Some("v4l2".into()),
            location: "/dev/video0".into(),
        };
        assert_eq!(input.args(), vec!["-f", "v4l2", "-i", "/dev/video0"]);
    }
}
