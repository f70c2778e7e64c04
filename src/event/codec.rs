//! Wire layout of the event types
//!
//! The header goes first (`event_time` as i64, `controller_id` as i32), then
//! each type's own fields in declaration order. Readers consume exactly what
//! the writers produce; anything short or inconsistent is a [`ParcelError`].

use super::{Axis, BaseEvent, KeyAction, KeyCode, KeyEvent, MotionEvent, StateEvent, StateKind};
use crate::transport::{Parcel, ParcelError, Parcelable};

impl Parcelable for BaseEvent {
    fn write_to(&self, parcel: &mut Parcel) {
        parcel.write_i64(self.event_time);
        parcel.write_i32(self.controller_id);
    }

    fn read_from(parcel: &mut Parcel) -> Result<Self, ParcelError> {
        Ok(BaseEvent {
            event_time: parcel.read_i64()?,
            controller_id: parcel.read_i32()?,
        })
    }
}

impl Parcelable for KeyEvent {
    fn write_to(&self, parcel: &mut Parcel) {
        self.base.write_to(parcel);
        parcel.write_i32(self.key_code.0);
        parcel.write_i32(self.action as i32);
    }

    fn read_from(parcel: &mut Parcel) -> Result<Self, ParcelError> {
        let base = BaseEvent::read_from(parcel)?;
        let key_code = KeyCode(parcel.read_i32()?);
        let action = KeyAction::try_from(parcel.read_i32()?).map_err(|value| {
            ParcelError::InvalidValue {
                field: "key action",
                value,
            }
        })?;
        Ok(KeyEvent {
            base,
            key_code,
            action,
        })
    }
}

impl Parcelable for MotionEvent {
    fn write_to(&self, parcel: &mut Parcel) {
        self.base.write_to(parcel);
        write_axis_table(parcel, self.axes());
        write_axis_table(parcel, self.precision());
    }

    fn read_from(parcel: &mut Parcel) -> Result<Self, ParcelError> {
        let base = BaseEvent::read_from(parcel)?;
        let axes = read_axis_table(parcel)?;
        let precision = read_axis_table(parcel)?;
        Ok(MotionEvent::from_parts(base, axes, precision))
    }
}

impl Parcelable for StateEvent {
    fn write_to(&self, parcel: &mut Parcel) {
        self.base.write_to(parcel);
        parcel.write_i32(self.state.0);
        parcel.write_i32(self.action);
    }

    fn read_from(parcel: &mut Parcel) -> Result<Self, ParcelError> {
        Ok(StateEvent {
            base: BaseEvent::read_from(parcel)?,
            state: StateKind(parcel.read_i32()?),
            action: parcel.read_i32()?,
        })
    }
}

fn write_axis_table(parcel: &mut Parcel, entries: &[(Axis, f32)]) {
    parcel.write_i32(entries.len() as i32);
    for (axis, value) in entries {
        parcel.write_i32(axis.0);
        parcel.write_f32(*value);
    }
}

/// Axis id plus raw float bits
const AXIS_ENTRY_SIZE: usize = 8;

fn read_axis_table(parcel: &mut Parcel) -> Result<Vec<(Axis, f32)>, ParcelError> {
    let count = parcel.read_count(AXIS_ENTRY_SIZE)?;
    let mut entries: Vec<(Axis, f32)> = Vec::with_capacity(count);
    for _ in 0..count {
        let axis = Axis(parcel.read_i32()?);
        let value = parcel.read_f32()?;
        if entries.iter().any(|(a, _)| *a == axis) {
            return Err(ParcelError::DuplicateAxis(axis.0));
        }
        entries.push((axis, value));
    }
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip<T: Parcelable>(value: &T) -> T {
        let mut parcel = Parcel::new();
        parcel.write(value);
        let decoded = parcel.read::<T>().expect("decode");
        assert_eq!(parcel.remaining(), 0, "decoder left bytes behind");
        decoded
    }

    #[test]
    fn key_event_layout() {
        let event = KeyEvent::new(0x0102_0304_0506_0708, 1, KeyCode::BUTTON_A, KeyAction::Up);
        let mut parcel = Parcel::new();
        parcel.write(&event);

        let mut expected = Vec::new();
        expected.extend_from_slice(&0x0102_0304_0506_0708i64.to_le_bytes());
        expected.extend_from_slice(&1i32.to_le_bytes());
        expected.extend_from_slice(&96i32.to_le_bytes());
        expected.extend_from_slice(&1i32.to_le_bytes());
        assert_eq!(parcel.as_bytes(), expected.as_slice());
    }

    #[test]
    fn header_boundaries_survive() {
        for time in [0, i64::MAX, i64::MIN] {
            let key = KeyEvent::new(time, 1, KeyCode::DPAD_LEFT, KeyAction::Down);
            assert_eq!(round_trip(&key), key);

            let state = StateEvent::new(time, -7, StateKind::POWER_LOW, 1);
            assert_eq!(round_trip(&state), state);
        }
    }

    #[test]
    fn motion_floats_are_bit_exact() {
        let event = MotionEvent::new(42, 1)
            .with_axis(Axis::X, 0.0)
            .with_axis(Axis::Y, -0.0)
            .with_axis(Axis::Z, f32::NAN)
            .with_axis(Axis::RZ, f32::INFINITY)
            .with_axis(Axis::LTRIGGER, f32::NEG_INFINITY)
            .with_axis(Axis(99), f32::from_bits(0x7fc0_1234))
            .with_precision(Axis::X, 0.25);

        let decoded = round_trip(&event);
        assert_eq!(decoded, event);
        assert_eq!(decoded.axes()[5].1.to_bits(), 0x7fc0_1234);
        assert_eq!(decoded.axis_precision(Axis::X), 0.25);
    }

    #[test]
    fn empty_motion_event() {
        let event = MotionEvent::new(1, 1);
        let decoded = round_trip(&event);
        assert!(decoded.axes().is_empty());
        assert_eq!(decoded.axis_value(Axis::X), 0.0);
    }

    #[test]
    fn motion_order_is_preserved_for_reencoding() {
        let event = MotionEvent::new(1, 1)
            .with_axis(Axis::RTRIGGER, 1.0)
            .with_axis(Axis::X, 2.0);

        let mut first = Parcel::new();
        first.write(&event);
        let mut second = Parcel::new();
        second.write(&round_trip(&event));
        assert_eq!(first.as_bytes(), second.as_bytes());
    }

    #[test]
    fn truncated_events_are_rejected() {
        let mut full = Parcel::new();
        full.write(
            &MotionEvent::new(5, 1)
                .with_axis(Axis::X, 1.0)
                .with_axis(Axis::Y, 1.0),
        );
        let bytes = full.as_bytes().to_vec();

        for cut in 0..bytes.len() {
            let mut parcel = Parcel::from_bytes(bytes[..cut].to_vec());
            assert!(
                matches!(
                    parcel.read::<MotionEvent>(),
                    Err(ParcelError::UnexpectedEof { .. })
                ),
                "cut at {cut}"
            );
        }
    }

    #[test]
    fn duplicate_axis_is_rejected() {
        let mut parcel = Parcel::new();
        BaseEvent::default().write_to(&mut parcel);
        parcel.write_i32(2);
        parcel.write_i32(Axis::X.0);
        parcel.write_f32(1.0);
        parcel.write_i32(Axis::X.0);
        parcel.write_f32(2.0);
        parcel.write_i32(0);

        assert_eq!(
            parcel.read::<MotionEvent>().unwrap_err(),
            ParcelError::DuplicateAxis(0)
        );
    }

    #[test]
    fn negative_axis_count_is_rejected() {
        let mut parcel = Parcel::new();
        BaseEvent::default().write_to(&mut parcel);
        parcel.write_i32(-1);

        assert_eq!(
            parcel.read::<MotionEvent>().unwrap_err(),
            ParcelError::InvalidCount(-1)
        );
    }

    #[test]
    fn large_axis_tables_decode() {
        let event = (0..4097).fold(MotionEvent::new(9, 1), |event, axis| {
            event.with_axis(Axis(axis), axis as f32)
        });

        let decoded = round_trip(&event);
        assert_eq!(decoded.axes().len(), 4097);
        assert_eq!(decoded, event);
    }

    #[test]
    fn axis_count_past_the_buffer_is_rejected() {
        let mut parcel = Parcel::new();
        BaseEvent::default().write_to(&mut parcel);
        parcel.write_i32(3);
        parcel.write_i32(Axis::X.0);
        parcel.write_f32(1.0);
        parcel.write_i32(Axis::Y.0);
        parcel.write_f32(1.0);
        parcel.write_i32(0);

        // Two entries plus the empty precision table leave 20 bytes, not 24
        assert_eq!(
            parcel.read::<MotionEvent>().unwrap_err(),
            ParcelError::UnexpectedEof {
                needed: 24,
                remaining: 20
            }
        );
    }

    #[test]
    fn unknown_key_action_is_rejected() {
        let mut parcel = Parcel::new();
        BaseEvent::default().write_to(&mut parcel);
        parcel.write_i32(KeyCode::BUTTON_B.0);
        parcel.write_i32(9);

        assert_eq!(
            parcel.read::<KeyEvent>().unwrap_err(),
            ParcelError::InvalidValue {
                field: "key action",
                value: 9
            }
        );
    }

    #[test]
    fn unknown_key_codes_still_decode() {
        let event = KeyEvent::new(3, 1, KeyCode(311), KeyAction::Down);
        assert_eq!(round_trip(&event).key_code, KeyCode(311));
    }
}
