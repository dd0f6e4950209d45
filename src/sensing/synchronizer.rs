use std::time::{Duration, Instant};

use super::frame::{ChannelFrame, PixelFormat, Resolution};
use super::source::{CaptureError, FrameSource};

/// One time-aligned NIR/RED capture.
#[derive(Debug, Clone)]
pub struct FramePair {
    pub nir: ChannelFrame,
    pub red: ChannelFrame,
    /// Wall time between the two back-to-back reads. The sensors are not
    /// hardware-triggered, so this is the pair's alignment error in time.
    pub skew: Duration,
}

/// Owns both sensor drivers and turns them into aligned frame pairs.
pub struct CaptureSynchronizer {
    nir: Box<dyn FrameSource>,
    red: Box<dyn FrameSource>,
    running: bool,
}

impl CaptureSynchronizer {
    pub fn new(nir: Box<dyn FrameSource>, red: Box<dyn FrameSource>) -> Self {
        Self {
            nir,
            red,
            running: false,
        }
    }

    #[cfg(test)]
    pub(crate) fn is_running(&self) -> bool {
        self.running
    }

    /// Configure and start NIR, then RED.
    ///
    /// If RED fails, NIR is stopped again before returning so nothing stays acquired.
    pub fn start(&mut self, format: PixelFormat, resolution: Resolution) -> Result<(), CaptureError> {
        if self.running {
            return Ok(());
        }

        self.nir.configure(format, resolution)?;
        self.nir.start()?;

        let red_started = self
            .red
            .configure(format, resolution)
            .and_then(|_| self.red.start());

        if let Err(err) = red_started {
            if let Err(stop_err) = self.nir.stop() {
                log::warn!("failed to stop NIR sensor after RED startup failure: {stop_err}");
            }
            return Err(err);
        }

        self.running = true;
        log::info!("sensors started at {resolution} ({format:?})");
        Ok(())
    }

    /// Capture NIR then RED with no delay in between.
    pub fn capture_aligned(&mut self) -> Result<FramePair, CaptureError> {
        let nir = self.nir.capture_frame()?;
        let nir_done = Instant::now();
        let red = self.red.capture_frame()?;
        let skew = nir_done.elapsed();

        if nir.resolution() != red.resolution() {
            return Err(CaptureError::DimensionMismatch {
                nir: nir.resolution(),
                red: red.resolution(),
            });
        }

        Ok(FramePair { nir, red, skew })
    }

    /// Stop RED then NIR. Both are attempted; the first failure is returned.
    /// Calling this again after a stop is a no-op.
    pub fn stop(&mut self) -> Result<(), CaptureError> {
        if !self.running {
            return Ok(());
        }
        self.running = false;

        let red = self.red.stop();
        let nir = self.nir.stop();
        log::info!("sensors stopped");
        red.and(nir)
    }
}
