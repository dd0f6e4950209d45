use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct Coordinate {
    pub latitude: f64,
    pub longitude: f64,
}

impl Coordinate {
    pub const fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }

    pub const ORIGIN: Coordinate = Coordinate::new(0.0, 0.0);
}

impl fmt::Display for Coordinate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({:.6}, {:.6})", self.latitude, self.longitude)
    }
}

/// Where a fix's coordinate came from.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum FixQuality {
    /// Parsed from a receiver sentence.
    Fixed,
    /// Receiver present but silent until the deadline; coordinate is (0, 0).
    Degraded,
    /// No receiver configured; coordinate is the configured testing location.
    Unavailable,
}

impl FixQuality {
    pub fn as_str(&self) -> &'static str {
        match self {
            FixQuality::Fixed => "fixed",
            FixQuality::Degraded => "degraded",
            FixQuality::Unavailable => "unavailable",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PositionFix {
    pub coordinate: Coordinate,
    pub quality: FixQuality,
    pub acquired_at: DateTime<Utc>,
}

impl PositionFix {
    pub fn fixed(coordinate: Coordinate, acquired_at: DateTime<Utc>) -> Self {
        Self {
            coordinate,
            quality: FixQuality::Fixed,
            acquired_at,
        }
    }

    pub fn degraded(acquired_at: DateTime<Utc>) -> Self {
        Self {
            coordinate: Coordinate::ORIGIN,
            quality: FixQuality::Degraded,
            acquired_at,
        }
    }

    pub fn unavailable(testing: Coordinate, acquired_at: DateTime<Utc>) -> Self {
        Self {
            coordinate: testing,
            quality: FixQuality::Unavailable,
            acquired_at,
        }
    }

    pub fn latitude(&self) -> f64 {
        self.coordinate.latitude
    }

    pub fn longitude(&self) -> f64 {
        self.coordinate.longitude
    }

    pub fn is_fixed(&self) -> bool {
        self.quality == FixQuality::Fixed
    }
}

impl fmt::Display for PositionFix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [{}]", self.coordinate, self.quality.as_str())
    }
}
