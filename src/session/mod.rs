//! Capture session lifecycle: state, the cycle scheduler and its controller.

pub mod controller;
pub mod scheduler;
pub mod state;

pub use controller::SessionController;
pub use scheduler::{SessionError, SessionScheduler};
pub use state::{CaptureSession, SessionConfig, SessionEnd, SessionPhase, SessionReport};
