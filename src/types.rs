use chrono::{NaiveDate, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Property holding an image's acquisition time in epoch milliseconds
pub const TIME_START: &str = "system:time_start";

/// Property holding the dekad start day-of-year of a composite
pub const BEGIN: &str = "begin";

/// Milliseconds in one day
pub const DAY_MS: f64 = 86_400_000.0;

/// Name of the per-pixel QA flag band produced by masking
pub const QA_BAND: &str = "qa";

/// Name of the elapsed-time band used by the regressions
pub const TIME_BAND: &str = "time";

/// Name of the all-ones band used as regression intercept
pub const CONSTANT_BAND: &str = "constant";

/// Per-pixel quality flag values written to the `qa` band
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum QaFlag {
    Clear,
    NoData,
    OutOfRange,
    PoorQuality,
    Cloud,
    Shadow,
    Snow,
    SensorZenith,
    SolarZenith,
}

impl QaFlag {
    /// Flags describing a quality problem, in default priority order
    pub const ISSUES: [QaFlag; 7] = [
        QaFlag::OutOfRange,
        QaFlag::PoorQuality,
        QaFlag::Cloud,
        QaFlag::Shadow,
        QaFlag::Snow,
        QaFlag::SensorZenith,
        QaFlag::SolarZenith,
    ];

    pub fn value(self) -> u8 {
        match self {
            QaFlag::Clear => 0,
            QaFlag::NoData => 1,
            QaFlag::OutOfRange => 2,
            QaFlag::PoorQuality => 3,
            QaFlag::Cloud => 4,
            QaFlag::Shadow => 5,
            QaFlag::Snow => 6,
            QaFlag::SensorZenith => 7,
            QaFlag::SolarZenith => 8,
        }
    }

    pub fn from_value(value: u8) -> Option<Self> {
        match value {
            0 => Some(QaFlag::Clear),
            1 => Some(QaFlag::NoData),
            2 => Some(QaFlag::OutOfRange),
            3 => Some(QaFlag::PoorQuality),
            4 => Some(QaFlag::Cloud),
            5 => Some(QaFlag::Shadow),
            6 => Some(QaFlag::Snow),
            7 => Some(QaFlag::SensorZenith),
            8 => Some(QaFlag::SolarZenith),
            _ => None,
        }
    }

    /// Suffix used for the per-category fraction bands of a composite
    pub fn label(self) -> &'static str {
        match self {
            QaFlag::Clear => "Clear",
            QaFlag::NoData => "NoData",
            QaFlag::OutOfRange => "OutOfRange",
            QaFlag::PoorQuality => "PoorQuality",
            QaFlag::Cloud => "Clouds",
            QaFlag::Shadow => "Shadows",
            QaFlag::Snow => "Snow",
            QaFlag::SensorZenith => "SensorZenith",
            QaFlag::SolarZenith => "SolarZenith",
        }
    }
}

impl std::fmt::Display for QaFlag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.label(), self.value())
    }
}

/// Unit used to express elapsed time in the `time` band
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeUnit {
    Second,
    Minute,
    Day,
    Month,
    Year,
}

impl TimeUnit {
    /// Length of one unit in milliseconds
    pub fn millis(self) -> f64 {
        match self {
            TimeUnit::Second => 1_000.0,
            TimeUnit::Minute => 60_000.0,
            TimeUnit::Day => DAY_MS,
            TimeUnit::Month => 30.4375 * DAY_MS,
            TimeUnit::Year => 365.25 * DAY_MS,
        }
    }
}

impl Default for TimeUnit {
    fn default() -> Self {
        TimeUnit::Year
    }
}

impl FromStr for TimeUnit {
    type Err = RendviError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "second" => Ok(TimeUnit::Second),
            "minute" => Ok(TimeUnit::Minute),
            "day" => Ok(TimeUnit::Day),
            "month" => Ok(TimeUnit::Month),
            "year" => Ok(TimeUnit::Year),
            _ => Err(RendviError::UnknownTimeUnit(s.to_string())),
        }
    }
}

impl std::fmt::Display for TimeUnit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TimeUnit::Second => write!(f, "second"),
            TimeUnit::Minute => write!(f, "minute"),
            TimeUnit::Day => write!(f, "day"),
            TimeUnit::Month => write!(f, "month"),
            TimeUnit::Year => write!(f, "year"),
        }
    }
}

/// Geographic bounding box in degrees, used as export region
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub min_lon: f64,
    pub max_lon: f64,
    pub min_lat: f64,
    pub max_lat: f64,
}

impl BoundingBox {
    pub fn new(min_lon: f64, min_lat: f64, max_lon: f64, max_lat: f64) -> Self {
        Self { min_lon, max_lon, min_lat, max_lat }
    }

    pub fn width(&self) -> f64 {
        self.max_lon - self.min_lon
    }

    pub fn height(&self) -> f64 {
        self.max_lat - self.min_lat
    }

    /// Closed ring of corner coordinates, counter-clockwise from the south-west corner
    pub fn ring(&self) -> Vec<[f64; 2]> {
        vec![
            [self.min_lon, self.min_lat],
            [self.max_lon, self.min_lat],
            [self.max_lon, self.max_lat],
            [self.min_lon, self.max_lat],
            [self.min_lon, self.min_lat],
        ]
    }
}

/// Error types for reNDVI processing
#[derive(Debug, thiserror::Error)]
pub enum RendviError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Compute service returned {status}: {message}")]
    Service { status: u16, message: String },

    #[error("Unknown time unit '{0}' (expected second, minute, day, month or year)")]
    UnknownTimeUnit(String),

    #[error("Invalid date: '{0}'")]
    InvalidDate(String),

    #[error("Unknown product: {0}")]
    UnknownProduct(String),

    #[error("Invalid dekad {dekad} (expected 1..=36)")]
    InvalidDekad { dekad: u32 },

    #[error("Model has not been fit")]
    ModelNotFit,

    #[error("Evaluation error: {0}")]
    Evaluation(String),

    #[error("Unexpected value: {0}")]
    UnexpectedValue(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

/// Result type for reNDVI operations
pub type RendviResult<T> = Result<T, RendviError>;

/// Parse a caller-supplied date in one of the accepted layouts
pub fn parse_date(value: &str) -> RendviResult<NaiveDateTime> {
    let value = value.trim();
    for format in ["%Y%m%d", "%Y-%m-%d"] {
        if let Ok(date) = NaiveDate::parse_from_str(value, format) {
            if let Some(dt) = date.and_hms_opt(0, 0, 0) {
                return Ok(dt);
            }
        }
    }
    for format in ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%dT%H:%M:%S%.f"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(value, format) {
            return Ok(dt);
        }
    }
    Err(RendviError::InvalidDate(value.to_string()))
}

/// Epoch milliseconds of a UTC date-time
pub fn to_millis(dt: &NaiveDateTime) -> i64 {
    Utc.from_utc_datetime(dt).timestamp_millis()
}

/// Format epoch milliseconds as `YYYYMMDD`
pub fn format_millis(millis: i64, format: &str) -> RendviResult<String> {
    Utc.timestamp_millis_opt(millis)
        .single()
        .map(|dt| dt.format(format).to_string())
        .ok_or_else(|| RendviError::UnexpectedValue(format!("timestamp out of range: {}", millis)))
}
