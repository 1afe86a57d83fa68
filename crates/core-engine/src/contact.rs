//! Per-contact lifecycle state.
//!
//! Each live contact is exactly one of Pending, Active, or Disqualified.
//! Pending exists so modifier and continuous keys do not engage on the first
//! sample (a pointer drag often starts on top of a key); Active carries the
//! hold/repeat bookkeeping; Disqualified suppresses every further dispatch
//! for the contact until it lifts.

use core_events::Side;
use core_geometry::{Binding, Point};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisqualifyReason {
    IntentMouse,
    /// Typing is off for this contact's side: the global toggle, or the
    /// chord-shift latch suppressing its source side.
    TypingDisabled,
    DragCancel,
    ForceCap,
    TapConsumed,
    SnapConsumed,
}

impl DisqualifyReason {
    pub const fn as_str(self) -> &'static str {
        match self {
            DisqualifyReason::IntentMouse => "intent_mouse",
            DisqualifyReason::TypingDisabled => "typing_disabled",
            DisqualifyReason::DragCancel => "drag_cancel",
            DisqualifyReason::ForceCap => "force_cap",
            DisqualifyReason::TapConsumed => "tap_consumed",
            DisqualifyReason::SnapConsumed => "snap_consumed",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ContactState {
    /// Landed on a modifier or continuous key; waiting out the settle window
    /// before engaging.
    Pending,
    Active {
        /// A down edge (modifier count or mouse button press) was emitted
        /// and must be balanced on release.
        engaged: bool,
        /// A hold action or continuous hold already fired.
        did_hold: bool,
        /// The hold started an auto-repeat stream.
        hold_repeat_active: bool,
    },
    Disqualified {
        reason: DisqualifyReason,
    },
}

/// Everything the engine tracks for one live contact. The binding (and the
/// layer it came from) is captured at landing; configuration changes midway
/// through a press do not retarget it.
#[derive(Debug, Clone)]
pub struct ContactRecord {
    pub side: Side,
    pub binding: Option<Binding>,
    pub layer: u8,
    pub initial_point: Point,
    pub initial_pressure: f32,
    pub start_ticks: u64,
    pub last_point: Point,
    pub last_pressure: f32,
    pub max_drift2: f32,
    pub force_guard_triggered: bool,
    pub state: ContactState,
    /// Frame serial this contact was last reported in; contacts missing from
    /// their device's next frame are treated as released.
    pub seen_frame: u64,
}

impl ContactRecord {
    pub fn new(
        side: Side,
        binding: Option<Binding>,
        layer: u8,
        point: Point,
        pressure: f32,
        now: u64,
        frame_serial: u64,
        pending: bool,
    ) -> Self {
        ContactRecord {
            side,
            binding,
            layer,
            initial_point: point,
            initial_pressure: pressure,
            start_ticks: now,
            last_point: point,
            last_pressure: pressure,
            max_drift2: 0.0,
            force_guard_triggered: false,
            state: if pending {
                ContactState::Pending
            } else {
                ContactState::Active {
                    engaged: false,
                    did_hold: false,
                    hold_repeat_active: false,
                }
            },
            seen_frame: frame_serial,
        }
    }

    pub fn touch_sample(&mut self, point: Point, pressure: f32, frame_serial: u64) {
        self.last_point = point;
        self.last_pressure = pressure;
        self.seen_frame = frame_serial;
        let drift2 = self.initial_point.distance2(point);
        if drift2 > self.max_drift2 {
            self.max_drift2 = drift2;
        }
    }

    pub fn duration(&self, now: u64) -> u64 {
        now.saturating_sub(self.start_ticks)
    }

    pub fn is_disqualified(&self) -> bool {
        matches!(self.state, ContactState::Disqualified { .. })
    }

    pub fn disqualify(&mut self, reason: DisqualifyReason) {
        if !self.is_disqualified() {
            self.state = ContactState::Disqualified { reason };
        }
    }

    pub fn activate(&mut self) {
        if self.state == ContactState::Pending {
            self.state = ContactState::Active {
                engaged: false,
                did_hold: false,
                hold_repeat_active: false,
            };
        }
    }

    /// The binding is a key the user can anchor typing on (modifier held or
    /// a continuous key).
    pub fn is_anchor(&self) -> bool {
        self.binding
            .as_ref()
            .map(|b| b.action.is_modifier() || b.continuous)
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core_geometry::{Action, BindingOrigin, Rect};

    fn binding(action: Action, continuous: bool) -> Binding {
        Binding {
            side: Side::Left,
            rect: Rect::new(0.0, 0.0, 0.2, 0.2),
            label: "k".to_string(),
            action,
            hold_action: None,
            continuous,
            origin: BindingOrigin::Grid { row: 0, col: 0 },
        }
    }

    #[test]
    fn drift_accumulates_monotonically() {
        let mut rec = ContactRecord::new(
            Side::Left,
            None,
            0,
            Point::new(0.1, 0.1),
            1.0,
            0,
            1,
            false,
        );
        rec.touch_sample(Point::new(0.15, 0.1), 1.0, 2);
        let first = rec.max_drift2;
        rec.touch_sample(Point::new(0.1, 0.1), 1.0, 3); // returns home
        assert_eq!(rec.max_drift2, first); // drift never shrinks
    }

    #[test]
    fn disqualify_is_latched_and_sticky() {
        let mut rec = ContactRecord::new(
            Side::Left,
            None,
            0,
            Point::new(0.1, 0.1),
            1.0,
            0,
            1,
            false,
        );
        rec.disqualify(DisqualifyReason::DragCancel);
        rec.disqualify(DisqualifyReason::TapConsumed);
        assert_eq!(
            rec.state,
            ContactState::Disqualified {
                reason: DisqualifyReason::DragCancel
            }
        );
    }

    #[test]
    fn pending_activates_once() {
        let mut rec = ContactRecord::new(
            Side::Left,
            Some(binding(
                Action::Modifier {
                    code: core_events::keycode::VK_SHIFT,
                },
                false,
            )),
            0,
            Point::new(0.05, 0.3),
            1.0,
            0,
            1,
            true,
        );
        assert_eq!(rec.state, ContactState::Pending);
        rec.activate();
        assert!(matches!(rec.state, ContactState::Active { .. }));
        assert!(rec.is_anchor());
    }

    #[test]
    fn continuous_key_counts_as_anchor() {
        let rec = ContactRecord::new(
            Side::Left,
            Some(binding(
                Action::Key {
                    code: core_events::keycode::VK_SPACE,
                    flags: core_events::ModFlags::empty(),
                },
                true,
            )),
            0,
            Point::new(0.5, 0.9),
            1.0,
            0,
            1,
            false,
        );
        assert!(rec.is_anchor());
    }
}
