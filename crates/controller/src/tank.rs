//! Tank fullness classification from an ultrasonic distance sample.
//!
//! Two calibrations are deployed: fixed distance bands that map to
//! LOW / MID / HIGH, and a linear percentage between an "empty" and a
//! "full" distance.  Classification is a pure function of the sample; an
//! absent sample always classifies as unknown.

use std::fmt;

/// Percentage below which a tank counts as low in percentage mode.
pub const DEFAULT_LOW_THRESHOLD_PCT: u8 = 15;

// ---------------------------------------------------------------------------
// Levels
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TankLevel {
    Low,
    Mid,
    High,
    Unknown,
}

impl fmt::Display for TankLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Low => write!(f, "LOW"),
            Self::Mid => write!(f, "MID"),
            Self::High => write!(f, "HIGH"),
            Self::Unknown => write!(f, "UNKNOWN"),
        }
    }
}

/// Result of classifying one sample under the active calibration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TankStatus {
    Level(TankLevel),
    /// `None` when there was no usable distance sample.
    Percent(Option<u8>),
}

impl fmt::Display for TankStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Level(level) => write!(f, "{level}"),
            Self::Percent(Some(pct)) => write!(f, "{pct}%"),
            Self::Percent(None) => write!(f, "UNKNOWN"),
        }
    }
}

/// What the watering policy needs to know about the tank.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Supply {
    /// Confirmed low: watering must stop.
    Low,
    Sufficient,
    /// No trustworthy reading this tick.
    Unknown,
}

/// One tick's tank observation.  Rebuilt from scratch every tick.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TankReading {
    pub distance_cm: Option<f32>,
    pub status: TankStatus,
    pub supply: Supply,
}

impl fmt::Display for TankReading {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.distance_cm {
            Some(cm) => write!(f, "{} ({cm:.1} cm)", self.status),
            None => write!(f, "{} (n/a cm)", self.status),
        }
    }
}

// ---------------------------------------------------------------------------
// Calibration
// ---------------------------------------------------------------------------

/// Inclusive distance range in centimetres.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Band {
    pub min_cm: f32,
    pub max_cm: f32,
}

impl Band {
    pub const fn new(min_cm: f32, max_cm: f32) -> Self {
        Self { min_cm, max_cm }
    }

    pub fn contains(&self, cm: f32) -> bool {
        cm >= self.min_cm && cm <= self.max_cm
    }

    pub fn overlaps(&self, other: &Band) -> bool {
        self.min_cm <= other.max_cm && other.min_cm <= self.max_cm
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bands {
    pub low: Band,
    pub mid: Band,
    pub high: Band,
}

impl Default for Bands {
    /// Bands measured on the deployed tank: the sensor sits above the water,
    /// so a larger distance means less water.
    fn default() -> Self {
        Self {
            low: Band::new(7.6, 8.6),
            mid: Band::new(4.0, 7.5),
            high: Band::new(2.0, 3.9),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Calibration {
    Banded(Bands),
    Percentage {
        /// Distance at (and beyond) which the tank reads 0%.
        empty_cm: f32,
        /// Distance at (and below) which the tank reads 100%.
        full_cm: f32,
        low_threshold_pct: u8,
    },
}

impl Default for Calibration {
    fn default() -> Self {
        Self::Banded(Bands::default())
    }
}

impl Calibration {
    /// Classify a possibly-absent distance sample.  Non-finite samples are
    /// treated as absent.
    pub fn classify(&self, distance_cm: Option<f32>) -> TankReading {
        let distance_cm = distance_cm.filter(|cm| cm.is_finite());

        let status = match self {
            Self::Banded(bands) => TankStatus::Level(classify_banded(bands, distance_cm)),
            Self::Percentage {
                empty_cm, full_cm, ..
            } => TankStatus::Percent(distance_cm.map(|d| percent_full(d, *empty_cm, *full_cm))),
        };

        TankReading {
            distance_cm,
            status,
            supply: self.supply(status),
        }
    }

    fn supply(&self, status: TankStatus) -> Supply {
        match status {
            TankStatus::Level(TankLevel::Low) => Supply::Low,
            TankStatus::Level(TankLevel::Mid | TankLevel::High) => Supply::Sufficient,
            TankStatus::Level(TankLevel::Unknown) | TankStatus::Percent(None) => Supply::Unknown,
            TankStatus::Percent(Some(pct)) => {
                let threshold = match self {
                    Self::Percentage {
                        low_threshold_pct, ..
                    } => *low_threshold_pct,
                    Self::Banded(_) => DEFAULT_LOW_THRESHOLD_PCT,
                };
                if pct < threshold {
                    Supply::Low
                } else {
                    Supply::Sufficient
                }
            }
        }
    }
}

fn classify_banded(bands: &Bands, distance_cm: Option<f32>) -> TankLevel {
    let Some(d) = distance_cm else {
        return TankLevel::Unknown;
    };
    if bands.low.contains(d) {
        TankLevel::Low
    } else if bands.mid.contains(d) {
        TankLevel::Mid
    } else if bands.high.contains(d) {
        TankLevel::High
    } else {
        TankLevel::Unknown
    }
}

/// Linear fill percentage, truncated toward zero.
pub fn percent_full(distance_cm: f32, empty_cm: f32, full_cm: f32) -> u8 {
    if distance_cm >= empty_cm {
        return 0;
    }
    if distance_cm <= full_cm {
        return 100;
    }
    let span = empty_cm - full_cm;
    let pct = (empty_cm - distance_cm) / span * 100.0;
    (pct as u8).min(100)
}

// ===========================================================================
// Tests
// ===========================================================================
