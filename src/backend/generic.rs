//! Generic capture backends built on nokhwa: the V4L2 API on Linux and the
//! platform's automatic API choice as the universal fallback.

use super::{Backend, BackendDescriptor, CameraHandle, AUTO, V4L2};
use crate::errors::CameraError;
use crate::types::{CaptureConfig, ParamOutcome, ParamValue, RawFrame, Resolution};
use nokhwa::{
    pixel_format::RgbFormat,
    query,
    utils::{
        ApiBackend, CameraFormat, CameraIndex, FrameFormat, RequestedFormat, RequestedFormatType,
        Resolution as NokhwaResolution,
    },
    CallbackCamera,
};

pub struct NokhwaBackend {
    descriptor: BackendDescriptor,
    api: ApiBackend,
    device_index: u32,
}

impl NokhwaBackend {
    pub fn v4l2(device_index: u32) -> Self {
        Self {
            descriptor: V4L2,
            api: ApiBackend::Video4Linux,
            device_index,
        }
    }

    pub fn auto(device_index: u32) -> Self {
        Self {
            descriptor: AUTO,
            api: ApiBackend::Auto,
            device_index,
        }
    }

    fn is_v4l2(&self) -> bool {
        matches!(self.api, ApiBackend::Video4Linux)
    }
}

#[cfg(target_os = "linux")]
fn v4l2_node_can_capture(index: u32) -> bool {
    let node = format!("/dev/video{}", index);
    if !std::path::Path::new(&node).exists() {
        return false;
    }
    match v4l::Device::new(index as usize) {
        Ok(device) => device
            .query_caps()
            .map(|caps| {
                caps.capabilities
                    .contains(v4l::capability::Flags::VIDEO_CAPTURE)
            })
            .unwrap_or(false),
        Err(e) => {
            log::debug!("Cannot open {}: {}", node, e);
            false
        }
    }
}

#[cfg(not(target_os = "linux"))]
fn v4l2_node_can_capture(_index: u32) -> bool {
    false
}

impl Backend for NokhwaBackend {
    fn descriptor(&self) -> BackendDescriptor {
        self.descriptor
    }

    fn probe_available(&self) -> bool {
        if self.is_v4l2() {
            return v4l2_node_can_capture(self.device_index);
        }
        match query(self.api) {
            Ok(cameras) => cameras.len() > self.device_index as usize,
            Err(e) => {
                log::debug!("Camera query via {:?} failed: {}", self.api, e);
                false
            }
        }
    }

    fn open(&self, config: &CaptureConfig) -> Result<Box<dyn CameraHandle>, CameraError> {
        if config.has_transform() {
            log::debug!(
                "Backend '{}' cannot rotate or flip, ignoring transform",
                self.descriptor.id
            );
        }

        let format = CameraFormat::new(
            NokhwaResolution::new(config.resolution.width, config.resolution.height),
            FrameFormat::MJPEG,
            config.framerate,
        );
        let requested = RequestedFormat::new::<RgbFormat>(RequestedFormatType::Closest(format));

        let mut camera = CallbackCamera::with_backend(
            CameraIndex::Index(self.device_index),
            requested,
            self.api,
            |_| {},
        )
        .map_err(|e| {
            CameraError::InitializationError(format!("Failed to initialize camera: {}", e))
        })?;

        if let Err(e) = camera.open_stream() {
            // Nothing is streaming yet; dropping the camera releases the device.
            return Err(CameraError::InitializationError(format!(
                "Failed to start stream: {}",
                e
            )));
        }

        Ok(Box::new(NokhwaHandle {
            camera,
            self_paced: self.is_v4l2(),
            closed: false,
        }))
    }
}

pub struct NokhwaHandle {
    camera: CallbackCamera,
    self_paced: bool,
    closed: bool,
}

impl CameraHandle for NokhwaHandle {
    fn is_open(&self) -> bool {
        !self.closed && self.camera.is_stream_open()
    }

    fn set_mode(
        &mut self,
        resolution: Resolution,
        framerate: u32,
    ) -> Result<(Resolution, u32), CameraError> {
        if let Err(e) = self
            .camera
            .set_resolution(NokhwaResolution::new(resolution.width, resolution.height))
        {
            // Drivers clamp or refuse; the read-back below decides.
            log::debug!("set_resolution({}) refused: {}", resolution, e);
        }
        if let Err(e) = self.camera.set_frame_rate(framerate) {
            log::debug!("set_frame_rate({}) refused: {}", framerate, e);
        }

        let actual = self
            .camera
            .resolution()
            .map_err(|e| CameraError::NegotiationError(format!("Failed to read resolution: {}", e)))?;
        let fps = self.camera.frame_rate().unwrap_or(framerate);
        Ok((Resolution::new(actual.width_x, actual.height_y), fps))
    }

    fn read(&mut self) -> Result<RawFrame, CameraError> {
        let buffer = self
            .camera
            .poll_frame()
            .map_err(|e| CameraError::CaptureError(format!("Failed to capture frame: {}", e)))?;
        let image = buffer
            .decode_image::<RgbFormat>()
            .map_err(|e| CameraError::CaptureError(format!("Failed to decode frame: {}", e)))?;

        let (width, height) = (image.width(), image.height());
        Ok(RawFrame::rgb(width, height, image.into_raw()))
    }

    fn set_param(&mut self, name: &str, value: ParamValue) -> ParamOutcome {
        match (name, value) {
            ("framerate", ParamValue::Int(fps)) if fps > 0 => {
                match self.camera.set_frame_rate(fps as u32) {
                    Ok(()) => ParamOutcome::Applied,
                    Err(e) => ParamOutcome::Ignored(e.to_string()),
                }
            }
            ("framerate", _) => ParamOutcome::Ignored("invalid framerate".to_string()),
            _ => ParamOutcome::Unsupported,
        }
    }

    fn close(&mut self) {
        if self.closed {
            return;
        }
        if let Err(e) = self.camera.stop_stream() {
            log::debug!("Failed to stop stream: {}", e);
        }
        self.closed = true;
    }

    fn is_self_paced(&self) -> bool {
        self.self_paced
    }
}

impl Drop for NokhwaHandle {
    fn drop(&mut self) {
        self.close();
    }
}

// Moved to the production thread once and only ever used from there.
unsafe impl Send for NokhwaHandle {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_descriptors() {
        assert_eq!(NokhwaBackend::v4l2(0).descriptor().id, "v4l2");
        assert_eq!(NokhwaBackend::auto(0).descriptor().id, "auto");
    }

    #[test]
    fn test_probe_missing_device_index() {
        // No machine has this many capture nodes.
        assert!(!NokhwaBackend::v4l2(4096).probe_available());
    }
}
