use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// User-selected operating policy. Constrains which statuses are reachable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    Off,
    #[serde(rename = "auto")]
    Automatic,
    #[serde(rename = "cool")]
    Cooling,
    #[serde(rename = "heat")]
    Heating,
}

impl Mode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Off => "off",
            Self::Automatic => "auto",
            Self::Cooling => "cool",
            Self::Heating => "heat",
        }
    }
}

impl FromStr for Mode {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "off" => Ok(Self::Off),
            "auto" => Ok(Self::Automatic),
            "cool" => Ok(Self::Cooling),
            "heat" => Ok(Self::Heating),
            other => Err(ConfigError::InvalidMode(other.to_string())),
        }
    }
}

/// User-selected fan behavior: always running, or coupled to equipment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FanMode {
    On,
    #[serde(rename = "auto")]
    Automatic,
}

impl FanMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::On => "on",
            Self::Automatic => "auto",
        }
    }
}

impl FromStr for FanMode {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "on" => Ok(Self::On),
            "auto" => Ok(Self::Automatic),
            other => Err(ConfigError::InvalidFanMode(other.to_string())),
        }
    }
}

/// The engine's current equipment decision, distinct from [`Mode`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    #[serde(rename = "idle")]
    Off,
    Cooling,
    Heating,
}

impl Status {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Off => "idle",
            Self::Cooling => "cooling",
            Self::Heating => "heating",
        }
    }

    /// Human-readable form used in status lines.
    pub fn label(self) -> &'static str {
        match self {
            Self::Off => "Idle",
            Self::Cooling => "Cooling",
            Self::Heating => "Heating",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Display unit preference. Control comparisons are always Celsius.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DegreeUnit {
    #[serde(rename = "c")]
    Celsius,
    #[serde(rename = "f")]
    Fahrenheit,
}

impl DegreeUnit {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Celsius => "c",
            Self::Fahrenheit => "f",
        }
    }
}

impl FromStr for DegreeUnit {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "c" => Ok(Self::Celsius),
            "f" => Ok(Self::Fahrenheit),
            other => Err(ConfigError::InvalidUnit(other.to_string())),
        }
    }
}

pub fn celsius_to_fahrenheit(celsius: f32) -> f32 {
    celsius * 9.0 / 5.0 + 32.0
}

pub fn fahrenheit_to_celsius(fahrenheit: f32) -> f32 {
    (fahrenheit - 32.0) * 5.0 / 9.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn mode_round_trips_through_settings_vocabulary() {
        for mode in [Mode::Off, Mode::Automatic, Mode::Cooling, Mode::Heating] {
            assert_eq!(mode.as_str().parse::<Mode>().unwrap(), mode);
        }
    }

    #[test]
    fn unknown_mode_surfaces_config_error() {
        let err = "eco".parse::<Mode>().unwrap_err();
        assert_eq!(err, ConfigError::InvalidMode("eco".to_string()));
    }

    #[test]
    fn fan_mode_parses_both_values() {
        assert_eq!("on".parse::<FanMode>().unwrap(), FanMode::On);
        assert_eq!("auto".parse::<FanMode>().unwrap(), FanMode::Automatic);
        assert!("fast".parse::<FanMode>().is_err());
    }

    #[test]
    fn unit_conversion_is_inverse() {
        assert_eq!(celsius_to_fahrenheit(20.0), 68.0);
        assert_eq!(fahrenheit_to_celsius(68.0), 20.0);
        assert_eq!(celsius_to_fahrenheit(0.0), 32.0);
    }
}
