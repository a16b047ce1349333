use std::fmt;
use std::ops::{Add, Sub};

use chrono::{DateTime, FixedOffset, Timelike};
use serde::{Deserialize, Serialize};

/// Duration helper type for time intervals.
/// Wraps `chrono::Duration` with convenience constructors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Duration(pub chrono::Duration);

impl Duration {
    pub fn seconds(secs: i64) -> Self {
        Self(chrono::Duration::seconds(secs))
    }

    pub fn minutes(mins: i64) -> Self {
        Self(chrono::Duration::minutes(mins))
    }

    pub fn as_seconds(&self) -> i64 {
        self.0.num_seconds()
    }

    pub fn as_minutes_f64(&self) -> f64 {
        self.0.num_seconds() as f64 / 60.0
    }
}

impl From<chrono::Duration> for Duration {
    fn from(d: chrono::Duration) -> Self {
        Self(d)
    }
}

impl fmt::Display for Duration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let minutes = self.0.num_minutes();
        write!(f, "{}h{}m", minutes / 60, minutes % 60)
    }
}

/// A point in time, always carrying its offset. Every comparison in the
/// scheduler happens in this single time-zone-aware domain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Timestamp(pub DateTime<FixedOffset>);

impl Timestamp {
    pub fn now(offset: &FixedOffset) -> Self {
        Self(chrono::Utc::now().with_timezone(offset))
    }

    pub fn add(&self, duration: Duration) -> Self {
        Self(self.0 + duration.0)
    }

    pub fn sub(&self, duration: Duration) -> Self {
        Self(self.0 - duration.0)
    }

    pub fn duration_since(&self, other: &Timestamp) -> Duration {
        Duration(self.0 - other.0)
    }

    pub fn hour(&self) -> u32 {
        self.0.hour()
    }

    pub fn round_to_hour(&self) -> Self {
        Self(
            self.0
                .with_minute(0)
                .and_then(|d| d.with_second(0))
                .and_then(|d| d.with_nanosecond(0))
                .unwrap_or(self.0),
        )
    }

    pub fn to_rfc3339(&self) -> String {
        self.0.to_rfc3339()
    }
}

impl From<DateTime<FixedOffset>> for Timestamp {
    fn from(dt: DateTime<FixedOffset>) -> Self {
        Self(dt)
    }
}

impl From<Timestamp> for DateTime<FixedOffset> {
    fn from(ts: Timestamp) -> Self {
        ts.0
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.format("%Y-%m-%d %H:%M:%S %:z"))
    }
}

/// Power in Watts. Sign convention is fixed throughout this codebase:
/// negative = charging, positive = discharging, zero = idle.
#[cfg_attr(feature = "swagger", derive(utoipa::ToSchema))]
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, PartialOrd)]
pub struct Power(pub f64);

impl Power {
    pub fn watts(w: f64) -> Self {
        Self(w)
    }

    pub fn kilowatts(kw: f64) -> Self {
        Self(kw * 1000.0)
    }

    pub fn as_watts(&self) -> f64 {
        self.0
    }

    pub fn as_kilowatts(&self) -> f64 {
        self.0 / 1000.0
    }
}

impl fmt::Display for Power {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.abs() >= 1000.0 {
            write!(f, "{:.2} kW", self.as_kilowatts())
        } else {
            write!(f, "{:.1} W", self.0)
        }
    }
}

impl Add for Power {
    type Output = Self;
    fn add(self, rhs: Self) -> Self::Output {
        Self(self.0 + rhs.0)
    }
}

impl Sub for Power {
    type Output = Self;
    fn sub(self, rhs: Self) -> Self::Output {
        Self(self.0 - rhs.0)
    }
}

/// Energy in kilowatt-hours (kWh).
#[cfg_attr(feature = "swagger", derive(utoipa::ToSchema))]
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, PartialOrd)]
pub struct Energy(pub f64);

impl Energy {
    pub fn kilowatt_hours(kwh: f64) -> Self {
        Self(kwh)
    }

    pub fn as_kilowatt_hours(&self) -> f64 {
        self.0
    }
}

impl fmt::Display for Energy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.2} kWh", self.0)
    }
}

/// State of charge as a percentage in `[0, 100]`.
#[cfg_attr(feature = "swagger", derive(utoipa::ToSchema))]
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, PartialOrd)]
pub struct Percentage(pub f64);

impl Percentage {
    pub fn new(value: f64) -> Self {
        Self(value.clamp(0.0, 100.0))
    }

    pub fn as_percent(&self) -> f64 {
        self.0
    }
}

impl fmt::Display for Percentage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.1}%", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn power_conversions() {
        let power = Power::kilowatts(5.0);
        assert_eq!(power.as_watts(), 5000.0);
        assert_eq!((power - Power::watts(2000.0)).as_watts(), 3000.0);
    }

    #[test]
    fn percentage_clamps() {
        assert_eq!(Percentage::new(150.0).as_percent(), 100.0);
        assert_eq!(Percentage::new(-10.0).as_percent(), 0.0);
    }

    #[test]
    fn timestamp_round_to_hour() {
        let offset = FixedOffset::east_opt(3600).unwrap();
        let t: Timestamp = "2024-01-01T10:45:30+01:00"
            .parse::<DateTime<FixedOffset>>()
            .unwrap()
            .into();
        let _ = offset;
        let rounded = t.round_to_hour();
        assert_eq!(rounded.0.minute(), 0);
        assert_eq!(rounded.0.second(), 0);
    }
}
