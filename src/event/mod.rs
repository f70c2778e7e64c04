//! Controller events delivered by the provider
//!
//! Every event starts with the same header ([`BaseEvent`]) and is immutable
//! once built. Numeric identifiers (key codes, axes, state kinds) are kept as
//! newtypes rather than closed enums: a newer provider may report values this
//! crate has no name for, and those must still decode.

pub mod codec;

use std::fmt;

/// Key code reported in [`KeyEvent::key_code`] and accepted by key queries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct KeyCode(pub i32);

impl KeyCode {
    pub const DPAD_UP: KeyCode = KeyCode(19);
    pub const DPAD_DOWN: KeyCode = KeyCode(20);
    pub const DPAD_LEFT: KeyCode = KeyCode(21);
    pub const DPAD_RIGHT: KeyCode = KeyCode(22);
    pub const BUTTON_A: KeyCode = KeyCode(96);
    pub const BUTTON_B: KeyCode = KeyCode(97);
    pub const BUTTON_X: KeyCode = KeyCode(99);
    pub const BUTTON_Y: KeyCode = KeyCode(100);
    pub const BUTTON_L1: KeyCode = KeyCode(102);
    pub const BUTTON_R1: KeyCode = KeyCode(103);
    pub const BUTTON_L2: KeyCode = KeyCode(104);
    pub const BUTTON_R2: KeyCode = KeyCode(105);
    pub const BUTTON_THUMBL: KeyCode = KeyCode(106);
    pub const BUTTON_THUMBR: KeyCode = KeyCode(107);
    pub const BUTTON_START: KeyCode = KeyCode(108);
    pub const BUTTON_SELECT: KeyCode = KeyCode(109);

    pub fn name(self) -> Option<&'static str> {
        let name = match self {
            Self::DPAD_UP => "DPAD_UP",
            Self::DPAD_DOWN => "DPAD_DOWN",
            Self::DPAD_LEFT => "DPAD_LEFT",
            Self::DPAD_RIGHT => "DPAD_RIGHT",
            Self::BUTTON_A => "BUTTON_A",
            Self::BUTTON_B => "BUTTON_B",
            Self::BUTTON_X => "BUTTON_X",
            Self::BUTTON_Y => "BUTTON_Y",
            Self::BUTTON_L1 => "BUTTON_L1",
            Self::BUTTON_R1 => "BUTTON_R1",
            Self::BUTTON_L2 => "BUTTON_L2",
            Self::BUTTON_R2 => "BUTTON_R2",
            Self::BUTTON_THUMBL => "BUTTON_THUMBL",
            Self::BUTTON_THUMBR => "BUTTON_THUMBR",
            Self::BUTTON_START => "BUTTON_START",
            Self::BUTTON_SELECT => "BUTTON_SELECT",
            _ => return None,
        };
        Some(name)
    }
}

impl fmt::Display for KeyCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(name) => f.write_str(name),
            None => write!(f, "KEY({})", self.0),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeyAction {
    Down = 0,
    Up = 1,
}

impl TryFrom<i32> for KeyAction {
    type Error = i32;

    fn try_from(value: i32) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(KeyAction::Down),
            1 => Ok(KeyAction::Up),
            other => Err(other),
        }
    }
}

/// Axis identifier used by [`MotionEvent`] and axis queries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Axis(pub i32);

impl Axis {
    pub const X: Axis = Axis(0);
    pub const Y: Axis = Axis(1);
    pub const Z: Axis = Axis(11);
    pub const RZ: Axis = Axis(14);
    pub const LTRIGGER: Axis = Axis(17);
    pub const RTRIGGER: Axis = Axis(18);
}

impl fmt::Display for Axis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Self::X => f.write_str("X"),
            Self::Y => f.write_str("Y"),
            Self::Z => f.write_str("Z"),
            Self::RZ => f.write_str("RZ"),
            Self::LTRIGGER => f.write_str("LTRIGGER"),
            Self::RTRIGGER => f.write_str("RTRIGGER"),
            Axis(other) => write!(f, "AXIS({})", other),
        }
    }
}

/// Which piece of controller state a [`StateEvent`] or state query refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StateKind(pub i32);

impl StateKind {
    pub const UNKNOWN: StateKind = StateKind(0);
    pub const CONNECTION: StateKind = StateKind(1);
    pub const POWER_LOW: StateKind = StateKind(2);
    pub const SUPPORTED_PRODUCT_VERSION: StateKind = StateKind(3);
    pub const CURRENT_PRODUCT_VERSION: StateKind = StateKind(4);
}

/// State-specific action values
pub mod state_action {
    pub const FALSE: i32 = 0;
    pub const TRUE: i32 = 1;
    pub const DISCONNECTED: i32 = 0;
    pub const CONNECTED: i32 = 1;
    pub const CONNECTING: i32 = 2;
    pub const VERSION_MOGA: i32 = 0;
    pub const VERSION_MOGAPRO: i32 = 1;
}

/// Selector for `getInfo`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct InfoKind(pub i32);

impl InfoKind {
    pub const UNKNOWN: InfoKind = InfoKind(0);
    pub const KNOWN_DEVICE_COUNT: InfoKind = InfoKind(1);
    pub const ACTIVE_DEVICE_COUNT: InfoKind = InfoKind(2);
}

/// Message selector for `sendMessage`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MessageKind(pub i32);

impl MessageKind {
    pub const ACTIVITY_EVENT: MessageKind = MessageKind(1);
}

/// Host application lifecycle phase, reported to the provider so it can pick
/// a delivery and power policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ActivityEvent {
    #[default]
    Create = 1,
    Destroy = 2,
    Start = 3,
    Stop = 4,
    Resume = 5,
    Pause = 6,
    ServiceConnected = 7,
}

impl ActivityEvent {
    pub fn code(self) -> i32 {
        self as i32
    }
}

impl TryFrom<i32> for ActivityEvent {
    type Error = i32;

    fn try_from(value: i32) -> Result<Self, Self::Error> {
        Ok(match value {
            1 => ActivityEvent::Create,
            2 => ActivityEvent::Destroy,
            3 => ActivityEvent::Start,
            4 => ActivityEvent::Stop,
            5 => ActivityEvent::Resume,
            6 => ActivityEvent::Pause,
            7 => ActivityEvent::ServiceConnected,
            other => return Err(other),
        })
    }
}

/// Header shared by every event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct BaseEvent {
    /// Monotonic timestamp in milliseconds
    pub event_time: i64,
    pub controller_id: i32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyEvent {
    pub base: BaseEvent,
    pub key_code: KeyCode,
    pub action: KeyAction,
}

impl KeyEvent {
    pub fn new(event_time: i64, controller_id: i32, key_code: KeyCode, action: KeyAction) -> Self {
        Self {
            base: BaseEvent {
                event_time,
                controller_id,
            },
            key_code,
            action,
        }
    }
}

impl fmt::Display for KeyEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "key {} {:?} (controller {}, t={})",
            self.key_code, self.action, self.base.controller_id, self.base.event_time
        )
    }
}

/// Analog state snapshot. Axis entries keep their insertion order; setting an
/// axis twice replaces the earlier value.
#[derive(Debug, Clone, Default)]
pub struct MotionEvent {
    pub base: BaseEvent,
    axes: Vec<(Axis, f32)>,
    precision: Vec<(Axis, f32)>,
}

impl MotionEvent {
    pub fn new(event_time: i64, controller_id: i32) -> Self {
        Self {
            base: BaseEvent {
                event_time,
                controller_id,
            },
            axes: Vec::new(),
            precision: Vec::new(),
        }
    }

    pub fn with_axis(mut self, axis: Axis, value: f32) -> Self {
        upsert(&mut self.axes, axis, value);
        self
    }

    pub fn with_precision(mut self, axis: Axis, value: f32) -> Self {
        upsert(&mut self.precision, axis, value);
        self
    }

    /// Value of `axis`, or 0.0 when the event does not carry it
    pub fn axis_value(&self, axis: Axis) -> f32 {
        lookup(&self.axes, axis)
    }

    pub fn axis_precision(&self, axis: Axis) -> f32 {
        lookup(&self.precision, axis)
    }

    pub fn axes(&self) -> &[(Axis, f32)] {
        &self.axes
    }

    pub fn precision(&self) -> &[(Axis, f32)] {
        &self.precision
    }

    pub(crate) fn from_parts(
        base: BaseEvent,
        axes: Vec<(Axis, f32)>,
        precision: Vec<(Axis, f32)>,
    ) -> Self {
        Self {
            base,
            axes,
            precision,
        }
    }
}

fn upsert(entries: &mut Vec<(Axis, f32)>, axis: Axis, value: f32) {
    match entries.iter_mut().find(|(a, _)| *a == axis) {
        Some(entry) => entry.1 = value,
        None => entries.push((axis, value)),
    }
}

fn lookup(entries: &[(Axis, f32)], axis: Axis) -> f32 {
    entries
        .iter()
        .find(|(a, _)| *a == axis)
        .map(|(_, v)| *v)
        .unwrap_or(0.0)
}

fn same_bits(a: &[(Axis, f32)], b: &[(Axis, f32)]) -> bool {
    a.len() == b.len()
        && a
            .iter()
            .zip(b)
            .all(|((ka, va), (kb, vb))| ka == kb && va.to_bits() == vb.to_bits())
}

// Bitwise so NaN equals itself and -0.0 differs from 0.0
impl PartialEq for MotionEvent {
    fn eq(&self, other: &Self) -> bool {
        self.base == other.base
            && same_bits(&self.axes, &other.axes)
            && same_bits(&self.precision, &other.precision)
    }
}

impl fmt::Display for MotionEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "motion")?;
        for (axis, value) in &self.axes {
            write!(f, " {}={:.3}", axis, value)?;
        }
        write!(
            f,
            " (controller {}, t={})",
            self.base.controller_id, self.base.event_time
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StateEvent {
    pub base: BaseEvent,
    pub state: StateKind,
    pub action: i32,
}

impl StateEvent {
    pub fn new(event_time: i64, controller_id: i32, state: StateKind, action: i32) -> Self {
        Self {
            base: BaseEvent {
                event_time,
                controller_id,
            },
            state,
            action,
        }
    }
}

impl fmt::Display for StateEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "state {} -> {} (controller {}, t={})",
            self.state.0, self.action, self.base.controller_id, self.base.event_time
        )
    }
}

/// Any event the listener interface can carry
#[derive(Debug, Clone, PartialEq)]
pub enum ControllerEvent {
    Key(KeyEvent),
    Motion(MotionEvent),
    State(StateEvent),
}

impl ControllerEvent {
    pub fn base(&self) -> &BaseEvent {
        match self {
            ControllerEvent::Key(e) => &e.base,
            ControllerEvent::Motion(e) => &e.base,
            ControllerEvent::State(e) => &e.base,
        }
    }

    pub fn controller_id(&self) -> i32 {
        self.base().controller_id
    }
}

impl fmt::Display for ControllerEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ControllerEvent::Key(e) => e.fmt(f),
            ControllerEvent::Motion(e) => e.fmt(f),
            ControllerEvent::State(e) => e.fmt(f),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn absent_axis_reads_zero() {
        let event = MotionEvent::new(10, 1).with_axis(Axis::X, 0.5);
        assert_eq!(event.axis_value(Axis::X), 0.5);
        assert_eq!(event.axis_value(Axis::RZ), 0.0);
        assert_eq!(event.axis_precision(Axis::X), 0.0);
        assert_eq!(MotionEvent::new(0, 1).axis_value(Axis::LTRIGGER), 0.0);
    }

    #[test]
    fn setting_an_axis_twice_keeps_its_position() {
        let event = MotionEvent::new(0, 1)
            .with_axis(Axis::Y, 1.0)
            .with_axis(Axis::X, 2.0)
            .with_axis(Axis::Y, -1.0);
        assert_eq!(event.axes(), &[(Axis::Y, -1.0), (Axis::X, 2.0)]);
    }

    #[test]
    fn motion_equality_is_bitwise() {
        let nan = MotionEvent::new(0, 1).with_axis(Axis::Z, f32::NAN);
        assert_eq!(nan, nan.clone());

        let pos = MotionEvent::new(0, 1).with_axis(Axis::Z, 0.0);
        let neg = MotionEvent::new(0, 1).with_axis(Axis::Z, -0.0);
        assert_ne!(pos, neg);
    }

    #[test]
    fn key_code_display_falls_back_to_number() {
        assert_eq!(KeyCode::BUTTON_X.to_string(), "BUTTON_X");
        assert_eq!(KeyCode(4242).to_string(), "KEY(4242)");
    }

    #[test]
    fn activity_event_codes() {
        assert_eq!(ActivityEvent::Resume.code(), 5);
        assert_eq!(ActivityEvent::Pause.code(), 6);
        assert_eq!(ActivityEvent::try_from(7), Ok(ActivityEvent::ServiceConnected));
        assert_eq!(ActivityEvent::try_from(0), Err(0));
    }
}
