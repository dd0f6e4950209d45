//! OpenCV-backed sensor driver, compiled with the `camera` feature.

use opencv::{
    core::Mat,
    imgproc,
    prelude::*,
    videoio::{self, VideoCapture},
};

use super::frame::{ChannelFrame, ChannelRole, PixelFormat, Resolution};
use super::source::{CaptureError, FrameSource};

pub struct OpenCvSource {
    role: ChannelRole,
    index: i32,
    format: PixelFormat,
    resolution: Resolution,
    capture: Option<VideoCapture>,
}

impl OpenCvSource {
    pub fn new(role: ChannelRole, index: i32) -> Self {
        Self {
            role,
            index,
            format: PixelFormat::default(),
            resolution: Resolution::default(),
            capture: None,
        }
    }

    fn unavailable(&self, err: opencv::Error) -> CaptureError {
        CaptureError::Unavailable {
            role: self.role,
            reason: format!("camera {}: {err}", self.index),
        }
    }

    fn read_failed(&self, reason: impl Into<String>) -> CaptureError {
        CaptureError::ReadFailed {
            role: self.role,
            reason: reason.into(),
        }
    }

    /// Convert OpenCV's BGR (or mono) frame into the configured interleaved layout.
    fn to_format(&self, frame: &Mat) -> opencv::Result<Mat> {
        let code = match (self.format, frame.channels()) {
            (PixelFormat::Gray8, 1) => return frame.try_clone(),
            (PixelFormat::Gray8, _) => imgproc::COLOR_BGR2GRAY,
            (PixelFormat::Rgb888, 1) => imgproc::COLOR_GRAY2RGB,
            (PixelFormat::Rgb888, _) => imgproc::COLOR_BGR2RGB,
        };
        let mut converted = Mat::default();
        imgproc::cvt_color(frame, &mut converted, code, 0)?;
        Ok(converted)
    }
}

impl FrameSource for OpenCvSource {
    fn role(&self) -> ChannelRole {
        self.role
    }

    fn configure(&mut self, format: PixelFormat, resolution: Resolution) -> Result<(), CaptureError> {
        self.format = format;
        self.resolution = resolution;
        Ok(())
    }

    fn start(&mut self) -> Result<(), CaptureError> {
        let mut capture =
            VideoCapture::new(self.index, videoio::CAP_ANY).map_err(|err| self.unavailable(err))?;
        let opened = capture.is_opened().map_err(|err| self.unavailable(err))?;
        if !opened {
            return Err(CaptureError::Unavailable {
                role: self.role,
                reason: format!("camera {} could not be opened", self.index),
            });
        }

        capture
            .set(videoio::CAP_PROP_FRAME_WIDTH, self.resolution.width as f64)
            .map_err(|err| self.unavailable(err))?;
        capture
            .set(videoio::CAP_PROP_FRAME_HEIGHT, self.resolution.height as f64)
            .map_err(|err| self.unavailable(err))?;

        log::info!(
            "{} camera {} started at {} ({:?})",
            self.role,
            self.index,
            self.resolution,
            self.format
        );
        self.capture = Some(capture);
        Ok(())
    }

    fn stop(&mut self) -> Result<(), CaptureError> {
        if let Some(mut capture) = self.capture.take() {
            capture.release().map_err(|err| self.read_failed(err.to_string()))?;
        }
        Ok(())
    }

    fn capture_frame(&mut self) -> Result<ChannelFrame, CaptureError> {
        let role = self.role;
        let capture = self
            .capture
            .as_mut()
            .ok_or(CaptureError::NotStarted { role })?;

        if !capture.is_opened().unwrap_or(false) {
            return Err(CaptureError::DeviceClosed { role });
        }

        let mut frame = Mat::default();
        let grabbed = capture
            .read(&mut frame)
            .map_err(|err| CaptureError::ReadFailed {
                role,
                reason: err.to_string(),
            })?;
        if !grabbed || frame.empty() {
            return Err(self.read_failed("camera returned no frame"));
        }

        let pixels = self
            .to_format(&frame)
            .map_err(|err| self.read_failed(err.to_string()))?;
        let resolution = Resolution::new(pixels.cols() as u32, pixels.rows() as u32);
        let bytes = pixels
            .data_bytes()
            .map_err(|err| self.read_failed(err.to_string()))?;

        ChannelFrame::from_interleaved(role, self.format, resolution, bytes)
    }
}
