//! Unit-aware distance and speed values
//!
//! Both types keep one canonical unit internally (miles, miles per hour).
//! Which unit gets shown is a presentation choice passed in at display time,
//! falling back to the unit the value was created in.

use crate::{Error, Result};
use std::fmt;
use std::ops::Add;

/// Kilometres in one statute mile
pub const KM_PER_MILE: f64 = 1.609344;

/// Display unit family
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Unit {
    /// miles, mph
    Imperial,
    /// kilometres, kph
    Metric,
}

impl Unit {
    /// Parse the persisted preference (`"mph"` / `"kph"`)
    pub fn from_pref(raw: &str) -> Option<Unit> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "mph" | "mi" | "imperial" => Some(Unit::Imperial),
            "kph" | "km" | "kmh" | "metric" => Some(Unit::Metric),
            _ => None,
        }
    }

    pub fn as_pref(self) -> &'static str {
        match self {
            Unit::Imperial => "mph",
            Unit::Metric => "kph",
        }
    }
}

/// A non-negative distance
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Distance {
    miles: f64,
    source: Unit,
}

impl Distance {
    pub fn from_miles(miles: f64) -> Result<Self> {
        check_magnitude(miles, "distance")?;
        Ok(Distance { miles, source: Unit::Imperial })
    }

    pub fn from_kilometers(km: f64) -> Result<Self> {
        check_magnitude(km, "distance")?;
        Ok(Distance { miles: km / KM_PER_MILE, source: Unit::Metric })
    }

    pub fn zero() -> Self {
        Distance { miles: 0.0, source: Unit::Imperial }
    }

    pub fn miles(&self) -> f64 {
        self.miles
    }

    pub fn kilometers(&self) -> f64 {
        self.miles * KM_PER_MILE
    }

    pub fn source_unit(&self) -> Unit {
        self.source
    }

    /// A new distance `factor` times this one
    pub fn scale(&self, factor: f64) -> Result<Self> {
        check_magnitude(factor, "scale factor")?;
        Ok(Distance { miles: self.miles * factor, source: self.source })
    }

    /// Render in `unit`, or in the source unit when `None`
    pub fn display(&self, unit: Option<Unit>) -> String {
        match unit.unwrap_or(self.source) {
            Unit::Imperial => format!("{:.2} mi", self.miles()),
            Unit::Metric => format!("{:.2} km", self.kilometers()),
        }
    }
}

impl Add for Distance {
    type Output = Distance;

    fn add(self, rhs: Distance) -> Distance {
        Distance { miles: self.miles + rhs.miles, source: self.source }
    }
}

impl fmt::Display for Distance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.display(None))
    }
}

/// Average speed over an elapsed whole number of seconds
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Speed {
    mph: f64,
    source: Unit,
}

impl Speed {
    pub fn new(distance: Distance, seconds: i64) -> Result<Self> {
        if seconds <= 0 {
            return Err(Error::InvalidArgument(format!("elapsed seconds must be positive, got {}", seconds)));
        }
        check_magnitude(distance.miles(), "distance")?;
        let hours = seconds as f64 / 3600.0;
        Ok(Speed { mph: distance.miles() / hours, source: distance.source })
    }

    pub fn mph(&self) -> f64 {
        self.mph
    }

    pub fn kph(&self) -> f64 {
        self.mph * KM_PER_MILE
    }

    pub fn display(&self, unit: Option<Unit>) -> String {
        match unit.unwrap_or(self.source) {
            Unit::Imperial => format!("{:.1} mph", self.mph()),
            Unit::Metric => format!("{:.1} kph", self.kph()),
        }
    }
}

impl fmt::Display for Speed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.display(None))
    }
}

fn check_magnitude(v: f64, what: &str) -> Result<()> {
    if !v.is_finite() || v < 0.0 {
        return Err(Error::InvalidArgument(format!("{} must be finite and non-negative, got {}", what, v)));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn distance_conversions() {
        let d = Distance::from_miles(2.25).unwrap();
        assert!((d.kilometers() - 3.621024).abs() < 1e-9);
        let k = Distance::from_kilometers(KM_PER_MILE).unwrap();
        assert!((k.miles() - 1.0).abs() < 1e-12);
        assert_eq!(k.source_unit(), Unit::Metric);
    }

    #[test]
    fn arithmetic_returns_new_values() {
        let a = Distance::from_miles(1.5).unwrap();
        let b = a.scale(2.0).unwrap();
        let c = a + b;
        assert_eq!(a.miles(), 1.5);
        assert_eq!(b.miles(), 3.0);
        assert_eq!(c.miles(), 4.5);
        assert!(a.scale(f64::NAN).is_err());
    }

    #[test]
    fn bad_distances_are_rejected() {
        assert!(Distance::from_miles(f64::INFINITY).is_err());
        assert!(Distance::from_miles(-1.0).is_err());
        assert!(Distance::from_kilometers(f64::NAN).is_err());
    }

    #[test]
    fn speed_from_distance_and_seconds() {
        let s = Speed::new(Distance::from_miles(3.0).unwrap(), 1800).unwrap();
        assert_eq!(s.mph(), 6.0);
        assert!((s.kph() - 6.0 * KM_PER_MILE).abs() < 1e-9);
    }

    #[test]
    fn speed_rejects_non_positive_seconds() {
        let d = Distance::from_miles(1.0).unwrap();
        assert!(matches!(Speed::new(d, 0), Err(Error::InvalidArgument(_))));
        assert!(matches!(Speed::new(d, -5), Err(Error::InvalidArgument(_))));
    }

    #[test]
    fn display_defaults_to_source_unit() {
        let mi = Speed::new(Distance::from_miles(3.0).unwrap(), 1800).unwrap();
        assert_eq!(mi.to_string(), "6.0 mph");
        assert_eq!(mi.display(Some(Unit::Metric)), "9.7 kph");

        let km = Distance::from_kilometers(10.0).unwrap();
        assert_eq!(km.to_string(), "10.00 km");
        assert_eq!(km.display(Some(Unit::Imperial)), "6.21 mi");
    }

    #[test]
    fn unit_preferences() {
        assert_eq!(Unit::from_pref("KPH"), Some(Unit::Metric));
        assert_eq!(Unit::from_pref("mph"), Some(Unit::Imperial));
        assert_eq!(Unit::from_pref("furlongs"), None);
        assert_eq!(Unit::from_pref(Unit::Metric.as_pref()), Some(Unit::Metric));
    }
}
