pub mod error;
pub mod logic;
pub mod settings;
pub mod topics;
pub mod types;

pub use error::ConfigError;
pub use logic::{ChangeEvent, ListenerToken, StatusSink, ThermostatLogic, TEMP_EPSILON};
pub use settings::{SettingsStore, Transaction};
pub use topics::*;
pub use types::{
    celsius_to_fahrenheit, fahrenheit_to_celsius, DegreeUnit, FanMode, Mode, Status,
};
