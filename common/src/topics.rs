pub const TOPIC_SENSOR_TEMP: &str = "hvac/sensor/temperature";
pub const TOPIC_SENSOR_STATUS: &str = "hvac/sensor/status";

pub const TOPIC_CONTROLLER_STATE: &str = "hvac/controller/state";

pub const TOPIC_CMD_TARGET: &str = "hvac/cmnd/thermostat/target";
pub const TOPIC_CMD_MODE: &str = "hvac/cmnd/thermostat/mode";
pub const TOPIC_CMD_FAN: &str = "hvac/cmnd/thermostat/fan";
