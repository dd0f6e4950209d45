use rand::{rngs::StdRng, Rng, SeedableRng};
use thiserror::Error;

use super::frame::{ChannelFrame, ChannelRole, PixelFormat, Resolution};

#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("{role} sensor unavailable: {reason}")]
    Unavailable { role: ChannelRole, reason: String },

    #[error("{role} sensor is not started")]
    NotStarted { role: ChannelRole },

    #[error("{role} sensor read failed: {reason}")]
    ReadFailed { role: ChannelRole, reason: String },

    #[error("{role} sensor device closed")]
    DeviceClosed { role: ChannelRole },

    #[error("sensor resolution mismatch: NIR {nir}, RED {red}")]
    DimensionMismatch { nir: Resolution, red: Resolution },
}

impl CaptureError {
    /// Transient read failures skip one cycle; everything else ends the session.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, CaptureError::ReadFailed { .. })
    }
}

/// Driver seam for one image sensor.
///
/// Calls are blocking; the scheduler runs them on the blocking pool.
pub trait FrameSource: Send {
    fn role(&self) -> ChannelRole;

    fn configure(&mut self, format: PixelFormat, resolution: Resolution) -> Result<(), CaptureError>;

    fn start(&mut self) -> Result<(), CaptureError>;

    fn stop(&mut self) -> Result<(), CaptureError>;

    fn capture_frame(&mut self) -> Result<ChannelFrame, CaptureError>;
}

/// What a synthetic sensor reports on every read.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SyntheticPattern {
    Constant(f32),
    /// Uniform noise of +/- `amplitude` around `base`, clamped to 0..=255.
    Noise { base: f32, amplitude: f32 },
    /// Left-to-right ramp from `from` to `to`.
    Gradient { from: f32, to: f32 },
}

/// Hardware-free sensor used for bench runs and tests.
pub struct SyntheticSource {
    role: ChannelRole,
    pattern: SyntheticPattern,
    format: PixelFormat,
    resolution: Resolution,
    started: bool,
    rng: StdRng,
}

impl SyntheticSource {
    pub fn new(role: ChannelRole, pattern: SyntheticPattern) -> Self {
        Self::with_seed(role, pattern, 0x5EED)
    }

    pub fn with_seed(role: ChannelRole, pattern: SyntheticPattern, seed: u64) -> Self {
        Self {
            role,
            pattern,
            format: PixelFormat::default(),
            resolution: Resolution::default(),
            started: false,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Default bench scene: healthy vegetation reflects NIR strongly and absorbs red.
    pub fn vegetation(role: ChannelRole) -> Self {
        let pattern = match role {
            ChannelRole::Nir => SyntheticPattern::Noise {
                base: 180.0,
                amplitude: 20.0,
            },
            ChannelRole::Red => SyntheticPattern::Noise {
                base: 45.0,
                amplitude: 10.0,
            },
        };
        let seed = match role {
            ChannelRole::Nir => 0x4E49,
            ChannelRole::Red => 0x5245,
        };
        Self::with_seed(role, pattern, seed)
    }

    /// The scene as the interleaved 8-bit buffer a camera in `format` would deliver.
    fn render_buffer(&mut self) -> Vec<u8> {
        let levels = self.render().into_iter().map(|v| v.round().clamp(0.0, 255.0) as u8);
        match self.format {
            PixelFormat::Gray8 => levels.collect(),
            // Neutral gray: luma and the red component both read back the level.
            PixelFormat::Rgb888 => levels.flat_map(|v| [v, v, v]).collect(),
        }
    }

    fn render(&mut self) -> Vec<f32> {
        let Resolution { width, height } = self.resolution;
        let count = self.resolution.pixel_count();
        match self.pattern {
            SyntheticPattern::Constant(value) => vec![value; count],
            SyntheticPattern::Noise { base, amplitude } => (0..count)
                .map(|_| {
                    let offset = if amplitude > 0.0 {
                        self.rng.gen_range(-amplitude..=amplitude)
                    } else {
                        0.0
                    };
                    (base + offset).clamp(0.0, 255.0)
                })
                .collect(),
            SyntheticPattern::Gradient { from, to } => {
                let span = (width.max(2) - 1) as f32;
                (0..height)
                    .flat_map(|_| (0..width).map(move |x| from + (to - from) * x as f32 / span))
                    .collect()
            }
        }
    }
}

impl FrameSource for SyntheticSource {
    fn role(&self) -> ChannelRole {
        self.role
    }

    fn configure(&mut self, format: PixelFormat, resolution: Resolution) -> Result<(), CaptureError> {
        if resolution.pixel_count() == 0 {
            return Err(CaptureError::Unavailable {
                role: self.role,
                reason: format!("unsupported resolution {resolution}"),
            });
        }
        self.format = format;
        self.resolution = resolution;
        Ok(())
    }

    fn start(&mut self) -> Result<(), CaptureError> {
        self.started = true;
        Ok(())
    }

    fn stop(&mut self) -> Result<(), CaptureError> {
        self.started = false;
        Ok(())
    }

    fn capture_frame(&mut self) -> Result<ChannelFrame, CaptureError> {
        if !self.started {
            return Err(CaptureError::NotStarted { role: self.role });
        }
        let buffer = self.render_buffer();
        ChannelFrame::from_interleaved(self.role, self.format, self.resolution, &buffer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capture_requires_start() {
        let mut source = SyntheticSource::new(ChannelRole::Red, SyntheticPattern::Constant(50.0));
        let err = source.capture_frame().unwrap_err();
        assert!(matches!(err, CaptureError::NotStarted { role: ChannelRole::Red }));
        assert!(!err.is_recoverable());
    }

    #[test]
    fn constant_pattern_fills_configured_resolution() {
        let mut source = SyntheticSource::new(ChannelRole::Nir, SyntheticPattern::Constant(200.0));
        source.configure(PixelFormat::Gray8, Resolution::new(4, 3)).unwrap();
        source.start().unwrap();

        let frame = source.capture_frame().unwrap();
        assert_eq!(frame.resolution(), Resolution::new(4, 3));
        assert!(frame.samples().iter().all(|&v| v == 200.0));
    }

    #[test]
    fn noise_stays_in_sensor_range() {
        let mut source = SyntheticSource::new(
            ChannelRole::Nir,
            SyntheticPattern::Noise {
                base: 250.0,
                amplitude: 30.0,
            },
        );
        source.configure(PixelFormat::Rgb888, Resolution::new(16, 16)).unwrap();
        source.start().unwrap();

        let frame = source.capture_frame().unwrap();
        assert!(frame.samples().iter().all(|&v| (0.0..=255.0).contains(&v)));
    }

    #[test]
    fn gradient_spans_requested_range() {
        let mut source = SyntheticSource::new(
            ChannelRole::Red,
            SyntheticPattern::Gradient { from: 0.0, to: 100.0 },
        );
        source.configure(PixelFormat::Rgb888, Resolution::new(5, 2)).unwrap();
        source.start().unwrap();

        let frame = source.capture_frame().unwrap();
        assert_eq!(frame.sample(0, 1), 0.0);
        assert_eq!(frame.sample(4, 1), 100.0);
        assert_eq!(frame.sample(2, 0), 50.0);
    }

    #[test]
    fn gray_and_rgb_requests_read_the_same_scene() {
        let mut frames = Vec::new();
        for format in [PixelFormat::Gray8, PixelFormat::Rgb888] {
            let mut source = SyntheticSource::with_seed(
                ChannelRole::Nir,
                SyntheticPattern::Noise {
                    base: 120.0,
                    amplitude: 40.0,
                },
                7,
            );
            source.configure(format, Resolution::new(6, 4)).unwrap();
            source.start().unwrap();
            frames.push(source.capture_frame().unwrap());
        }

        assert_eq!(frames[0], frames[1]);
        assert!(frames[0].samples().iter().all(|v| v.fract() == 0.0));
    }

    #[test]
    fn zero_resolution_is_rejected() {
        let mut source = SyntheticSource::vegetation(ChannelRole::Nir);
        let err = source
            .configure(PixelFormat::Rgb888, Resolution::new(0, 480))
            .unwrap_err();
        assert!(matches!(err, CaptureError::Unavailable { .. }));
    }
}
