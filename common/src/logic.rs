use crate::types::{FanMode, Mode, Status};

/// Dead zone around the setpoint, in degrees Celsius. Keeps the equipment
/// from flapping when the reading oscillates near the target.
pub const TEMP_EPSILON: f32 = 0.5;

/// Collaborator that records status transitions for the audit trail.
///
/// Called synchronously from inside the engine, before the corresponding
/// change notification goes out.
pub trait StatusSink {
    fn status_changed(&mut self, status: Status, fan_running: bool);
}

impl<F> StatusSink for F
where
    F: FnMut(Status, bool) + Send,
{
    fn status_changed(&mut self, status: Status, fan_running: bool) {
        self(status, fan_running)
    }
}

/// What a change notification is about.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ChangeEvent {
    CurrentTemperature(f32),
    TargetTemperature(f32),
    Mode(Mode),
    FanMode(FanMode),
    Status { status: Status, fan_running: bool },
    Refresh,
}

/// Handle returned by [`ThermostatLogic::subscribe`], used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListenerToken(u64);

type Listener = Box<dyn FnMut(&ChangeEvent) + Send>;

/// The control-decision state machine.
///
/// Holds the last observed temperature, the user setpoint, operating mode
/// and fan mode, and derives the equipment status from them. Every mutator
/// is change-detecting: a write that does not alter the stored value does
/// nothing at all. When an input actually changes, the engine re-evaluates
/// synchronously and notifies listeners, so derived state is never stale
/// between a mutation and its notification.
///
/// The engine is persistence-agnostic; it only reports transitions through
/// the registered [`StatusSink`]. All temperatures are Celsius. Listeners
/// must not re-enter the engine during dispatch.
pub struct ThermostatLogic {
    // None until the sensor reports for the first time; no evaluation
    // happens before that.
    current: Option<f32>,
    target: f32,
    mode: Mode,
    fan_mode: FanMode,

    status: Status,
    fan_running: bool,

    sink: Option<Box<dyn StatusSink + Send>>,
    listeners: Vec<(u64, Listener)>,
    next_listener_id: u64,
}

impl Default for ThermostatLogic {
    fn default() -> Self {
        Self::new()
    }
}

impl ThermostatLogic {
    pub fn new() -> Self {
        Self {
            current: None,
            target: 20.0,
            mode: Mode::Automatic,
            fan_mode: FanMode::Automatic,
            status: Status::Off,
            fan_running: false,
            sink: None,
            listeners: Vec::new(),
            next_listener_id: 0,
        }
    }

    pub fn current_temperature(&self) -> Option<f32> {
        self.current
    }

    pub fn target_temperature(&self) -> f32 {
        self.target
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn fan_mode(&self) -> FanMode {
        self.fan_mode
    }

    pub fn status(&self) -> Status {
        self.status
    }

    pub fn fan_status(&self) -> bool {
        self.fan_running
    }

    /// Registers the audit-trail collaborator, replacing any previous one.
    pub fn set_status_sink(&mut self, sink: Box<dyn StatusSink + Send>) {
        self.sink = Some(sink);
    }

    /// Registers a change listener. Listeners run synchronously, in
    /// registration order.
    pub fn subscribe(
        &mut self,
        listener: impl FnMut(&ChangeEvent) + Send + 'static,
    ) -> ListenerToken {
        let id = self.next_listener_id;
        self.next_listener_id += 1;
        self.listeners.push((id, Box::new(listener)));
        ListenerToken(id)
    }

    /// Removes a previously registered listener. Returns false if the
    /// token was already removed.
    pub fn unsubscribe(&mut self, token: ListenerToken) -> bool {
        let before = self.listeners.len();
        self.listeners.retain(|(id, _)| *id != token.0);
        self.listeners.len() != before
    }

    /// Feeds a sensor reading. Rounded to the nearest whole degree; a
    /// reading that rounds to the stored value is a no-op. Returns whether
    /// the stored value changed.
    pub fn set_current_temperature(&mut self, value: f32) -> bool {
        let value = value.round();
        if self.current == Some(value) {
            return false;
        }
        self.current = Some(value);
        self.process();
        self.notify(ChangeEvent::CurrentTemperature(value));
        true
    }

    /// Moves the setpoint. Same rounding and change-detection contract as
    /// [`set_current_temperature`](Self::set_current_temperature).
    pub fn set_target_temperature(&mut self, value: f32) -> bool {
        let value = value.round();
        if self.target == value {
            return false;
        }
        self.target = value;
        self.process();
        self.notify(ChangeEvent::TargetTemperature(value));
        true
    }

    pub fn set_mode(&mut self, mode: Mode) -> bool {
        if self.mode == mode {
            return false;
        }
        self.mode = mode;
        self.process();
        self.notify(ChangeEvent::Mode(mode));
        true
    }

    pub fn set_fan_mode(&mut self, fan_mode: FanMode) -> bool {
        if self.fan_mode == fan_mode {
            return false;
        }
        self.fan_mode = fan_mode;
        self.process();
        self.notify(ChangeEvent::FanMode(fan_mode));
        true
    }

    /// Raises a notification without touching any state. Used after
    /// presentation-only settings changes (e.g. the display unit).
    pub fn force_refresh(&mut self) {
        self.notify(ChangeEvent::Refresh);
    }

    /// Re-derives status and fan state from the current inputs.
    ///
    /// Does nothing until the sensor has reported at least once.
    fn process(&mut self) {
        let Some(cur) = self.current else {
            return;
        };
        let tgt = self.target;

        let status = match self.mode {
            Mode::Automatic if cur - tgt > TEMP_EPSILON => Status::Cooling,
            Mode::Automatic if tgt - cur > TEMP_EPSILON => Status::Heating,
            Mode::Automatic => Status::Off,
            Mode::Cooling if cur - tgt > TEMP_EPSILON => Status::Cooling,
            Mode::Cooling => Status::Off,
            Mode::Heating if tgt - cur > TEMP_EPSILON => Status::Heating,
            Mode::Heating => Status::Off,
            Mode::Off => Status::Off,
        };

        let fan_running = status != Status::Off || self.fan_mode == FanMode::On;
        self.set_status(status, fan_running);
    }

    fn set_status(&mut self, status: Status, fan_running: bool) {
        let changed = self.status != status || self.fan_running != fan_running;
        self.status = status;
        self.fan_running = fan_running;

        if changed {
            if let Some(sink) = self.sink.as_mut() {
                sink.status_changed(status, fan_running);
            }
            self.notify(ChangeEvent::Status {
                status,
                fan_running,
            });
        }
    }

    fn notify(&mut self, event: ChangeEvent) {
        for (_, listener) in &mut self.listeners {
            listener(&event);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    use pretty_assertions::assert_eq;

    use super::*;

    fn primed(mode: Mode, target: f32, current: f32) -> ThermostatLogic {
        let mut logic = ThermostatLogic::new();
        logic.set_mode(mode);
        logic.set_target_temperature(target);
        logic.set_current_temperature(current);
        logic
    }

    #[test]
    fn no_evaluation_before_first_reading() {
        let mut logic = ThermostatLogic::new();
        logic.set_mode(Mode::Heating);
        logic.set_target_temperature(30.0);

        // Way below target, but the sensor has never reported.
        assert_eq!(logic.status(), Status::Off);
        assert!(!logic.fan_status());
    }

    #[test]
    fn zero_celsius_is_a_legitimate_reading() {
        let logic = primed(Mode::Heating, 20.0, 0.0);
        assert_eq!(logic.status(), Status::Heating);
    }

    #[test]
    fn stays_off_inside_hysteresis_band() {
        for current in [19.6, 20.0, 20.4] {
            let logic = primed(Mode::Automatic, 20.0, current);
            assert_eq!(logic.status(), Status::Off, "current={current}");
            assert!(!logic.fan_status());
        }
    }

    #[test]
    fn automatic_mode_picks_direction_past_the_band() {
        let mut logic = primed(Mode::Automatic, 20.0, 22.0);
        assert_eq!(logic.status(), Status::Cooling);
        assert!(logic.fan_status());

        logic.set_current_temperature(17.0);
        assert_eq!(logic.status(), Status::Heating);
        assert!(logic.fan_status());
    }

    #[test]
    fn cooling_mode_never_heats() {
        for current in [-10.0, 0.0, 15.0, 20.0, 30.0] {
            let logic = primed(Mode::Cooling, 20.0, current);
            assert_ne!(logic.status(), Status::Heating, "current={current}");
        }
        assert_eq!(primed(Mode::Cooling, 20.0, 30.0).status(), Status::Cooling);
        assert_eq!(primed(Mode::Cooling, 20.0, 10.0).status(), Status::Off);
    }

    #[test]
    fn heating_mode_never_cools() {
        for current in [-10.0, 15.0, 20.0, 30.0, 40.0] {
            let logic = primed(Mode::Heating, 20.0, current);
            assert_ne!(logic.status(), Status::Cooling, "current={current}");
        }
        assert_eq!(primed(Mode::Heating, 20.0, 10.0).status(), Status::Heating);
        assert_eq!(primed(Mode::Heating, 20.0, 30.0).status(), Status::Off);
    }

    #[test]
    fn off_mode_ignores_temperatures() {
        for current in [-40.0, 0.0, 20.0, 45.0] {
            let logic = primed(Mode::Off, 20.0, current);
            assert_eq!(logic.status(), Status::Off, "current={current}");
        }
    }

    #[test]
    fn fan_follows_equipment_and_fan_mode() {
        let mut logic = primed(Mode::Automatic, 20.0, 25.0);
        assert_eq!(logic.status(), Status::Cooling);
        assert!(logic.fan_status());

        // Back inside the band with fan on automatic: fan stops.
        logic.set_current_temperature(20.0);
        assert_eq!(logic.status(), Status::Off);
        assert!(!logic.fan_status());

        // Fan mode On keeps the fan running while idle.
        logic.set_fan_mode(FanMode::On);
        assert_eq!(logic.status(), Status::Off);
        assert!(logic.fan_status());
    }

    #[test]
    fn mutators_report_whether_anything_changed() {
        let mut logic = ThermostatLogic::new();

        assert!(logic.set_current_temperature(20.2));
        assert!(!logic.set_current_temperature(20.4)); // same rounded value
        assert!(!logic.set_target_temperature(20.0)); // the default
        assert!(logic.set_target_temperature(22.0));
        assert!(logic.set_mode(Mode::Heating));
        assert!(!logic.set_mode(Mode::Heating));
        assert!(logic.set_fan_mode(FanMode::On));
        assert!(!logic.set_fan_mode(FanMode::On));
    }

    #[test]
    fn repeated_reading_raises_exactly_one_notification() {
        let mut logic = ThermostatLogic::new();
        let count = Arc::new(AtomicUsize::new(0));
        let seen = count.clone();
        logic.subscribe(move |_| {
            seen.fetch_add(1, Ordering::SeqCst);
        });

        logic.set_current_temperature(20.2);
        let after_first = count.load(Ordering::SeqCst);
        logic.set_current_temperature(20.2);
        logic.set_current_temperature(20.4); // rounds to 20 as well

        assert_eq!(count.load(Ordering::SeqCst), after_first);
        assert_eq!(after_first, 1);
    }

    #[test]
    fn status_transition_is_one_notification_covering_both_fields() {
        let mut logic = primed(Mode::Automatic, 20.0, 20.0);
        let events = Arc::new(Mutex::new(Vec::new()));
        let log = events.clone();
        logic.subscribe(move |event| {
            log.lock().unwrap().push(*event);
        });

        logic.set_current_temperature(25.0);

        let events = events.lock().unwrap();
        assert_eq!(
            *events,
            vec![
                ChangeEvent::Status {
                    status: Status::Cooling,
                    fan_running: true,
                },
                ChangeEvent::CurrentTemperature(25.0),
            ]
        );
    }

    #[test]
    fn sink_sees_transition_before_listeners() {
        let order = Arc::new(Mutex::new(Vec::new()));

        let mut logic = primed(Mode::Automatic, 20.0, 20.0);
        let from_sink = order.clone();
        logic.set_status_sink(Box::new(move |status: Status, fan: bool| {
            from_sink
                .lock()
                .unwrap()
                .push(format!("sink:{}:{fan}", status.as_str()));
        }));
        let from_listener = order.clone();
        logic.subscribe(move |event| {
            if let ChangeEvent::Status { status, .. } = event {
                from_listener
                    .lock()
                    .unwrap()
                    .push(format!("listener:{}", status.as_str()));
            }
        });

        logic.set_current_temperature(30.0);
        logic.set_mode(Mode::Off);

        assert_eq!(
            *order.lock().unwrap(),
            vec![
                "sink:cooling:true",
                "listener:cooling",
                "sink:idle:false",
                "listener:idle",
            ]
        );
    }

    #[test]
    fn no_status_notification_when_evaluation_lands_on_same_state() {
        let mut logic = primed(Mode::Automatic, 20.0, 25.0);
        let events = Arc::new(Mutex::new(Vec::new()));
        let log = events.clone();
        logic.subscribe(move |event| {
            log.lock().unwrap().push(*event);
        });

        // Still cooling; only the input-change event fires.
        logic.set_current_temperature(26.0);

        assert_eq!(
            *events.lock().unwrap(),
            vec![ChangeEvent::CurrentTemperature(26.0)]
        );
    }

    #[test]
    fn force_refresh_notifies_without_reevaluating() {
        let mut logic = primed(Mode::Automatic, 20.0, 25.0);
        let events = Arc::new(Mutex::new(Vec::new()));
        let log = events.clone();
        logic.subscribe(move |event| {
            log.lock().unwrap().push(*event);
        });

        logic.force_refresh();

        assert_eq!(*events.lock().unwrap(), vec![ChangeEvent::Refresh]);
        assert_eq!(logic.status(), Status::Cooling);
    }

    #[test]
    fn unsubscribe_stops_delivery() {
        let mut logic = ThermostatLogic::new();
        let count = Arc::new(AtomicUsize::new(0));
        let seen = count.clone();
        let token = logic.subscribe(move |_| {
            seen.fetch_add(1, Ordering::SeqCst);
        });

        // At the setpoint: one input-change event, no status transition.
        logic.set_current_temperature(20.0);
        assert!(logic.unsubscribe(token));
        assert!(!logic.unsubscribe(token));
        logic.set_current_temperature(25.0);

        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn scenario_walkthrough() {
        // Automatic mode, target 20, fan automatic.
        let mut logic = ThermostatLogic::new();

        logic.set_current_temperature(22.0);
        assert_eq!(logic.status(), Status::Cooling);
        assert!(logic.fan_status());

        logic.set_current_temperature(20.3);
        assert_eq!(logic.status(), Status::Off);
        assert!(!logic.fan_status());

        logic.set_current_temperature(17.0);
        assert_eq!(logic.status(), Status::Heating);
        assert!(logic.fan_status());

        logic.set_mode(Mode::Off);
        assert_eq!(logic.status(), Status::Off);
        assert!(!logic.fan_status());
    }
}
