//! Units and stored value types for items.

use std::fmt;
use std::mem::size_of;

use serde::{Deserialize, Serialize};

/// Physical unit of an item.
///
/// Codes are stable and are what is written to the file. A code this library doesn't know about is
/// kept as `Unit::Other` so it survives a read/write cycle.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Unit {
    #[default]
    Undefined,
    Meter,
    Kilometer,
    Millimeter,
    Feet,
    MeterPerSecond,
    FeetPerSecond,
    CubicMeterPerSecond,
    Second,
    Hour,
    DegreeCelsius,
    MilligramPerLiter,
    Percent,
    Dimensionless,
    Other(u16),
}

impl Unit {
    pub fn code(&self) -> u16 {
        match self {
            Unit::Undefined => 0,
            Unit::Meter => 1000,
            Unit::Kilometer => 1001,
            Unit::Millimeter => 1002,
            Unit::Feet => 1014,
            Unit::MeterPerSecond => 2000,
            Unit::FeetPerSecond => 2002,
            Unit::CubicMeterPerSecond => 1800,
            Unit::Second => 1400,
            Unit::Hour => 1402,
            Unit::DegreeCelsius => 2800,
            Unit::MilligramPerLiter => 2203,
            Unit::Percent => 99,
            Unit::Dimensionless => 1,
            Unit::Other(code) => *code,
        }
    }

    pub fn from_code(code: u16) -> Self {
        match code {
            0 => Unit::Undefined,
            1000 => Unit::Meter,
            1001 => Unit::Kilometer,
            1002 => Unit::Millimeter,
            1014 => Unit::Feet,
            2000 => Unit::MeterPerSecond,
            2002 => Unit::FeetPerSecond,
            1800 => Unit::CubicMeterPerSecond,
            1400 => Unit::Second,
            1402 => Unit::Hour,
            2800 => Unit::DegreeCelsius,
            2203 => Unit::MilligramPerLiter,
            99 => Unit::Percent,
            1 => Unit::Dimensionless,
            code => Unit::Other(code),
        }
    }
}

impl fmt::Display for Unit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let abbreviation = match self {
            Unit::Undefined => "-",
            Unit::Meter => "m",
            Unit::Kilometer => "km",
            Unit::Millimeter => "mm",
            Unit::Feet => "ft",
            Unit::MeterPerSecond => "m/s",
            Unit::FeetPerSecond => "ft/s",
            Unit::CubicMeterPerSecond => "m^3/s",
            Unit::Second => "s",
            Unit::Hour => "h",
            Unit::DegreeCelsius => "degC",
            Unit::MilligramPerLiter => "mg/l",
            Unit::Percent => "%",
            Unit::Dimensionless => "()",
            Unit::Other(code) => return write!(f, "unit#{code}"),
        };

        f.write_str(abbreviation)
    }
}

/// The numeric type an item's values are stored as.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ValueType {
    #[default]
    Float32,
    Float64,
}

impl ValueType {
    /// Bytes per stored value
    pub fn size(&self) -> usize {
        match self {
            ValueType::Float32 => size_of::<f32>(),
            ValueType::Float64 => size_of::<f64>(),
        }
    }

    pub fn code(&self) -> u8 {
        match self {
            ValueType::Float32 => 1,
            ValueType::Float64 => 2,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(ValueType::Float32),
            2 => Some(ValueType::Float64),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unit_codes() {
        for unit in [
            Unit::Undefined,
            Unit::Meter,
            Unit::Kilometer,
            Unit::Millimeter,
            Unit::Feet,
            Unit::MeterPerSecond,
            Unit::FeetPerSecond,
            Unit::CubicMeterPerSecond,
            Unit::Second,
            Unit::Hour,
            Unit::DegreeCelsius,
            Unit::MilligramPerLiter,
            Unit::Percent,
            Unit::Dimensionless,
        ] {
            assert_eq!(Unit::from_code(unit.code()), unit);
        }
    }

    #[test]
    fn unknown_unit_survives() {
        let unit = Unit::from_code(4711);
        assert_eq!(unit, Unit::Other(4711));
        assert_eq!(unit.code(), 4711);
        assert_eq!(unit.to_string(), "unit#4711");
    }

    #[test]
    fn value_types() {
        assert_eq!(ValueType::Float32.size(), 4);
        assert_eq!(ValueType::Float64.size(), 8);
        assert_eq!(ValueType::from_code(2), Some(ValueType::Float64));
        assert_eq!(ValueType::from_code(3), None);
    }
}
