//! Sensor drivers and the capture synchronizer.

#[cfg(feature = "camera")]
pub mod camera;
pub mod frame;
pub mod source;
pub mod synchronizer;

#[cfg(feature = "camera")]
pub use camera::OpenCvSource;
pub use frame::{ChannelFrame, ChannelRole, PixelFormat, Resolution};
pub use source::{CaptureError, FrameSource, SyntheticPattern, SyntheticSource};
pub use synchronizer::{CaptureSynchronizer, FramePair};
