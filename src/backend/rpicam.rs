//! Native Raspberry Pi camera stack, driven through the rpicam apps
//! (`rpicam-vid` / `rpicam-still`, or their older `libcamera-*` names).
//!
//! Streaming runs `rpicam-vid` with MJPEG output on stdout and splits the
//! byte stream into frames. Still capture pauses the stream, runs
//! `rpicam-still` at full sensor resolution and then resumes streaming.

use super::mjpeg::{jpeg_dimensions, MjpegReader};
use super::{Backend, BackendDescriptor, CameraHandle, RPICAM};
use crate::errors::CameraError;
use crate::types::{CaptureConfig, ParamOutcome, ParamValue, RawFrame, Resolution};
use std::env;
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdout, Command, Stdio};

const VIDEO_APPS: [&str; 2] = ["rpicam-vid", "libcamera-vid"];
const STILL_APPS: [&str; 2] = ["rpicam-still", "libcamera-still"];

/// Locate an executable on `PATH`.
pub fn find_on_path(name: &str) -> Option<PathBuf> {
    let paths = env::var_os("PATH")?;
    env::split_paths(&paths)
        .map(|dir| dir.join(name))
        .find(|candidate| candidate.is_file())
}

fn find_first(names: &[&str]) -> Option<PathBuf> {
    names.iter().find_map(|name| find_on_path(name))
}

pub struct RpicamBackend {
    video_apps: Vec<String>,
    still_apps: Vec<String>,
}

impl RpicamBackend {
    pub fn new() -> Self {
        Self {
            video_apps: VIDEO_APPS.iter().map(|s| s.to_string()).collect(),
            still_apps: STILL_APPS.iter().map(|s| s.to_string()).collect(),
        }
    }

    fn video_app(&self) -> Option<PathBuf> {
        let names: Vec<&str> = self.video_apps.iter().map(String::as_str).collect();
        find_first(&names)
    }

    fn still_app(&self) -> Option<PathBuf> {
        let names: Vec<&str> = self.still_apps.iter().map(String::as_str).collect();
        find_first(&names)
    }
}

impl Default for RpicamBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl Backend for RpicamBackend {
    fn descriptor(&self) -> BackendDescriptor {
        RPICAM
    }

    fn probe_available(&self) -> bool {
        self.video_app().is_some()
    }

    fn open(&self, config: &CaptureConfig) -> Result<Box<dyn CameraHandle>, CameraError> {
        let video_app = self.video_app().ok_or_else(|| {
            CameraError::InitializationError("rpicam-vid not found on PATH".to_string())
        })?;

        let mut handle = RpicamHandle {
            video_app,
            still_app: self.still_app(),
            settings: StreamSettings::from_config(config),
            stream: None,
            closed: false,
        };
        handle.start_stream()?;
        Ok(Box::new(handle))
    }
}

#[derive(Debug, Clone, PartialEq)]
struct StreamSettings {
    resolution: Resolution,
    framerate: u32,
    rotation: u32,
    hflip: bool,
    vflip: bool,
    autofocus: bool,
}

impl StreamSettings {
    fn from_config(config: &CaptureConfig) -> Self {
        Self {
            resolution: config.resolution,
            framerate: config.framerate,
            rotation: config.rotation,
            hflip: config.hflip,
            vflip: config.vflip,
            autofocus: false,
        }
    }

    /// Flags shared by the video and still apps.
    fn transform_args(&self) -> Vec<String> {
        let mut args = Vec::new();
        match self.rotation {
            0 => {}
            180 => args.extend(["--rotation".to_string(), "180".to_string()]),
            other => log::debug!("rpicam apps only rotate by 0 or 180, ignoring {}", other),
        }
        if self.hflip {
            args.push("--hflip".to_string());
        }
        if self.vflip {
            args.push("--vflip".to_string());
        }
        args
    }

    fn video_args(&self) -> Vec<String> {
        let mut args = vec![
            "--timeout".to_string(),
            "0".to_string(),
            "--nopreview".to_string(),
            "--codec".to_string(),
            "mjpeg".to_string(),
            "--width".to_string(),
            self.resolution.width.to_string(),
            "--height".to_string(),
            self.resolution.height.to_string(),
            "--framerate".to_string(),
            self.framerate.to_string(),
        ];
        if self.autofocus {
            args.extend(["--autofocus-mode".to_string(), "continuous".to_string()]);
        }
        args.extend(self.transform_args());
        args.extend(["--output".to_string(), "-".to_string()]);
        args
    }

    fn still_args(&self, path: &Path) -> Vec<String> {
        let mut args = vec![
            "--nopreview".to_string(),
            "--immediate".to_string(),
            "--output".to_string(),
            path.display().to_string(),
        ];
        args.extend(self.transform_args());
        args
    }
}

struct VideoProcess {
    child: Child,
    frames: MjpegReader<ChildStdout>,
}

impl VideoProcess {
    fn terminate(mut self) {
        if let Err(e) = self.child.kill() {
            log::debug!("rpicam-vid already exited: {}", e);
        }
        let _ = self.child.wait();
    }
}

pub struct RpicamHandle {
    video_app: PathBuf,
    still_app: Option<PathBuf>,
    settings: StreamSettings,
    stream: Option<VideoProcess>,
    closed: bool,
}

impl RpicamHandle {
    fn start_stream(&mut self) -> Result<(), CameraError> {
        self.stop_stream();

        let args = self.settings.video_args();
        log::debug!("Starting {} {}", self.video_app.display(), args.join(" "));
        let mut child = Command::new(&self.video_app)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| {
                CameraError::InitializationError(format!(
                    "Failed to start {}: {}",
                    self.video_app.display(),
                    e
                ))
            })?;

        let stdout = match child.stdout.take() {
            Some(stdout) => stdout,
            None => {
                let _ = child.kill();
                let _ = child.wait();
                return Err(CameraError::InitializationError(
                    "rpicam-vid stdout was not captured".to_string(),
                ));
            }
        };

        self.stream = Some(VideoProcess {
            child,
            frames: MjpegReader::new(stdout),
        });
        Ok(())
    }

    fn stop_stream(&mut self) {
        if let Some(process) = self.stream.take() {
            process.terminate();
        }
    }

    fn restart_with(&mut self, settings: StreamSettings) -> Result<(), CameraError> {
        if settings == self.settings && self.stream.is_some() {
            return Ok(());
        }
        self.settings = settings;
        self.start_stream()
    }
}

impl CameraHandle for RpicamHandle {
    fn is_open(&self) -> bool {
        !self.closed && self.stream.is_some()
    }

    fn set_mode(
        &mut self,
        resolution: Resolution,
        framerate: u32,
    ) -> Result<(Resolution, u32), CameraError> {
        let settings = StreamSettings {
            resolution,
            framerate,
            ..self.settings.clone()
        };
        self.restart_with(settings)?;
        // Echoes the request. Each frame carries the size from its JPEG
        // header, and negotiation checks that.
        Ok((self.settings.resolution, self.settings.framerate))
    }

    fn read(&mut self) -> Result<RawFrame, CameraError> {
        let process = self
            .stream
            .as_mut()
            .ok_or_else(|| CameraError::CaptureError("rpicam stream is not running".to_string()))?;

        match process.frames.next_frame() {
            Ok(Some(jpeg)) => {
                let (width, height) = jpeg_dimensions(&jpeg).unwrap_or((
                    self.settings.resolution.width,
                    self.settings.resolution.height,
                ));
                Ok(RawFrame::jpeg(width, height, jpeg))
            }
            Ok(None) => {
                // The app exited; drop the dead process so is_open() reports it.
                self.stop_stream();
                Err(CameraError::CaptureError(
                    "rpicam-vid exited unexpectedly".to_string(),
                ))
            }
            Err(e) => Err(CameraError::CaptureError(format!(
                "Failed to read MJPEG stream: {}",
                e
            ))),
        }
    }

    fn set_param(&mut self, name: &str, value: ParamValue) -> ParamOutcome {
        let mut settings = self.settings.clone();
        match (name, value) {
            ("framerate", ParamValue::Int(fps)) if fps > 0 => settings.framerate = fps as u32,
            ("autofocus", ParamValue::Bool(enabled)) => settings.autofocus = enabled,
            ("framerate", _) | ("autofocus", _) => {
                return ParamOutcome::Ignored(format!("invalid value for {}", name))
            }
            _ => return ParamOutcome::Unsupported,
        }

        let previous = self.settings.clone();
        match self.restart_with(settings) {
            Ok(()) => ParamOutcome::Applied,
            Err(e) => {
                // Go back to the last settings that worked.
                self.settings = previous;
                match self.start_stream() {
                    Ok(()) => ParamOutcome::Ignored(e.to_string()),
                    Err(restart) => ParamOutcome::Ignored(format!("{}; {}", e, restart)),
                }
            }
        }
    }

    fn capture_still(&mut self, path: &Path) -> Result<(), CameraError> {
        let still_app = self.still_app.clone().ok_or_else(|| {
            CameraError::UnsupportedOperation("rpicam-still not found on PATH".to_string())
        })?;

        // The sensor can only be held by one app at a time.
        self.stop_stream();
        let args = self.settings.still_args(path);
        log::debug!("Running {} {}", still_app.display(), args.join(" "));
        let status = Command::new(&still_app)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status();

        let result = match status {
            Ok(status) if status.success() => Ok(()),
            Ok(status) => Err(CameraError::StillCaptureError(format!(
                "{} exited with {}",
                still_app.display(),
                status
            ))),
            Err(e) => Err(CameraError::StillCaptureError(format!(
                "Failed to run {}: {}",
                still_app.display(),
                e
            ))),
        };

        if !self.closed {
            if let Err(e) = self.start_stream() {
                log::warn!("Failed to resume rpicam stream after still capture: {}", e);
            }
        }
        result
    }

    fn close(&mut self) {
        if self.closed {
            return;
        }
        self.stop_stream();
        self.closed = true;
    }

    fn is_self_paced(&self) -> bool {
        true
    }
}

impl Drop for RpicamHandle {
    fn drop(&mut self) {
        self.close();
    }
}
