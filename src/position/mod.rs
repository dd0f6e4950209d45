//! Position fixes from an optional NMEA receiver.

pub mod fix;
pub mod nmea;
pub mod receiver;
pub mod resolver;

pub use fix::{Coordinate, FixQuality, PositionFix};
pub use nmea::parse_sentence;
pub use receiver::{NmeaReceiver, ReadOutcome, ReceiverCapability};
pub use resolver::PositionResolver;
