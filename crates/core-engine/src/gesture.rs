//! Multi-finger gesture detectors, one bank per side.
//!
//! Detection and emission are decoupled: tap-click candidates arm while the
//! fingers are down (usually inside GestureCandidate intent) but the click
//! only fires on all-up, after the classifier has returned to Idle, so no
//! mouse button ever dispatches inside a gesture mode.

use core_config::Tunables;
use core_events::{MouseButton, Side};
use core_geometry::Point;
use tracing::{debug, trace};

/// Outer share of each axis that counts as a corner / edge band.
const CORNER_FRACTION: f32 = 0.15;

/// One live touch on this side, as the detectors see it.
#[derive(Debug, Clone, Copy)]
pub struct GestureTouch {
    pub point: Point,
    pub start_ticks: u64,
    pub drift2: f32,
}

/// Per-frame view of one side's touch set.
#[derive(Debug, Clone, Copy)]
pub struct GestureInput<'a> {
    pub now: u64,
    pub touches: &'a [GestureTouch],
    pub tap_click_enabled: bool,
    pub keyboard_mode: bool,
    pub grace_active: bool,
}

/// What a detector decided this frame; the engine owns the side effects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GestureEvent {
    TapClick { button: MouseButton, count: u8 },
    SwipeTypingToggle,
    CornerHold,
    VoiceToggle,
    /// Dictation corner engagement changed; `true` pins the intent.
    VoicePin(bool),
}

// -------------------------------------------------------------------------------------------------
// Tap-click
// -------------------------------------------------------------------------------------------------

#[derive(Debug, Clone, Copy)]
struct ArmedClick {
    fingers: u8,
    deadline: u64,
}

#[derive(Debug, Default)]
struct TapClick {
    armed: Option<ArmedClick>,
    last_click: Option<(MouseButton, u64)>,
}

impl TapClick {
    fn update(&mut self, input: &GestureInput<'_>, tun: &Tunables) -> Option<GestureEvent> {
        if !input.tap_click_enabled || input.keyboard_mode {
            self.armed = None;
            return None;
        }
        if input.grace_active {
            // Grace suppresses clicks and restarts the double-tap cadence.
            self.armed = None;
            self.last_click = None;
            return None;
        }

        let now = input.now;
        let count = input.touches.len();
        if count == 0 {
            let armed = self.armed.take()?;
            if now > armed.deadline {
                trace!(target: "engine.gesture", "tap_click_deadline_missed");
                return None;
            }
            let button = if armed.fingers == 2 {
                MouseButton::Left
            } else {
                MouseButton::Right
            };
            let count = match self.last_click {
                Some((prev, at))
                    if prev == button && now.saturating_sub(at) <= tun.tap_click_cadence_ticks =>
                {
                    2
                }
                _ => 1,
            };
            self.last_click = Some((button, now));
            debug!(target: "engine.gesture", button = button.as_str(), count, "tap_click");
            return Some(GestureEvent::TapClick { button, count });
        }

        if count == 2 || count == 3 {
            let min_start = input
                .touches
                .iter()
                .map(|t| t.start_ticks)
                .min()
                .unwrap_or(now);
            let max_duration = now.saturating_sub(min_start);
            let max_drift2 = input
                .touches
                .iter()
                .map(|t| t.drift2)
                .fold(0.0f32, f32::max);
            if max_duration <= tun.tap_max_ticks && max_drift2 <= tun.move_threshold2 {
                self.armed = Some(ArmedClick {
                    fingers: count as u8,
                    deadline: now + tun.tap_click_cadence_ticks.max(tun.contact_hold_ticks),
                });
            } else {
                self.armed = None;
            }
        } else {
            // One finger is pointing; four or more is a chord.
            self.armed = None;
        }
        None
    }

    fn reset(&mut self) {
        self.armed = None;
        self.last_click = None;
    }
}

// -------------------------------------------------------------------------------------------------
// Five-finger swipe
// -------------------------------------------------------------------------------------------------

fn centroid(touches: &[GestureTouch]) -> Point {
    let n = touches.len().max(1) as f32;
    let mut sum = Point::default();
    for t in touches {
        sum.x += t.point.x;
        sum.y += t.point.y;
    }
    Point::new(sum.x / n, sum.y / n)
}

#[derive(Debug, Default)]
struct Swipe {
    engaged: bool,
    origin: Point,
    triggered: bool,
}

impl Swipe {
    fn update(&mut self, input: &GestureInput<'_>, tun: &Tunables) -> Option<GestureEvent> {
        let count = input.touches.len();
        if count >= 5 {
            let centroid = centroid(input.touches);
            if !self.engaged {
                self.engaged = true;
                self.triggered = false;
                self.origin = centroid;
                return None;
            }
            let dx = centroid.x - self.origin.x;
            let dy = centroid.y - self.origin.y;
            if !self.triggered && dx.abs() >= tun.swipe_threshold_norm && dx.abs() >= dy.abs() {
                self.triggered = true;
                debug!(target: "engine.gesture", dx, dy, "five_finger_swipe");
                return Some(GestureEvent::SwipeTypingToggle);
            }
        } else if count < 4 {
            // A transient 5 -> 4 -> 5 dip keeps the engagement alive; three
            // or fewer ends it.
            self.engaged = false;
            self.triggered = false;
        }
        None
    }

    fn reset(&mut self) {
        self.engaged = false;
        self.triggered = false;
    }
}

// -------------------------------------------------------------------------------------------------
// Corner holds
// -------------------------------------------------------------------------------------------------

fn in_corner(p: Point, left: bool, top: bool) -> bool {
    let x_ok = if left {
        p.x <= CORNER_FRACTION
    } else {
        p.x >= 1.0 - CORNER_FRACTION
    };
    let y_ok = if top {
        p.y <= CORNER_FRACTION
    } else {
        p.y >= 1.0 - CORNER_FRACTION
    };
    x_ok && y_ok
}

#[derive(Debug, Default)]
struct CornerHold {
    fired: bool,
}

impl CornerHold {
    fn update(&mut self, input: &GestureInput<'_>, tun: &Tunables) -> Option<GestureEvent> {
        let touches = input.touches;
        if touches.is_empty() {
            self.fired = false;
            return None;
        }
        if self.fired || touches.len() != 2 {
            return None;
        }
        let (a, b) = (&touches[0], &touches[1]);
        let diagonal = (in_corner(a.point, true, true) && in_corner(b.point, false, false))
            || (in_corner(b.point, true, true) && in_corner(a.point, false, false))
            || (in_corner(a.point, false, true) && in_corner(b.point, true, false))
            || (in_corner(b.point, false, true) && in_corner(a.point, true, false));
        if !diagonal {
            return None;
        }
        let held = input.now.saturating_sub(a.start_ticks.max(b.start_ticks));
        if held >= tun.corner_hold_ticks {
            self.fired = true;
            debug!(target: "engine.gesture", "corner_hold");
            return Some(GestureEvent::CornerHold);
        }
        None
    }

    fn reset(&mut self) {
        self.fired = false;
    }
}

/// Two fingers parked top-and-bottom of the side's outer edge toggle the
/// dictation session after a long hold.
#[derive(Debug, Default)]
struct VoiceCorner {
    engaged: bool,
    fired: bool,
}

impl VoiceCorner {
    fn update(
        &mut self,
        side: Side,
        input: &GestureInput<'_>,
        tun: &Tunables,
        out: &mut Vec<GestureEvent>,
    ) {
        let touches = input.touches;
        let outer_left = side == Side::Left;
        let positioned = touches.len() == 2 && {
            let (a, b) = (&touches[0], &touches[1]);
            (in_corner(a.point, outer_left, true) && in_corner(b.point, outer_left, false))
                || (in_corner(b.point, outer_left, true) && in_corner(a.point, outer_left, false))
        };

        if positioned {
            if !self.engaged {
                self.engaged = true;
                out.push(GestureEvent::VoicePin(true));
            }
            let held = input
                .now
                .saturating_sub(touches.iter().map(|t| t.start_ticks).max().unwrap_or(input.now));
            if !self.fired && held >= tun.voice_hold_ticks {
                self.fired = true;
                debug!(target: "engine.gesture", side = side.as_str(), "voice_corner_toggle");
                out.push(GestureEvent::VoiceToggle);
            }
        } else {
            if self.engaged {
                self.engaged = false;
                out.push(GestureEvent::VoicePin(false));
            }
            if touches.is_empty() {
                self.fired = false;
            }
        }
    }

    fn reset(&mut self) {
        self.engaged = false;
        self.fired = false;
    }
}

// -------------------------------------------------------------------------------------------------
// Bank
// -------------------------------------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct SideGestures {
    side_index: usize,
    tap_click: TapClick,
    swipe: Swipe,
    corner: CornerHold,
    voice: VoiceCorner,
}

impl SideGestures {
    pub fn new(side: Side) -> Self {
        SideGestures {
            side_index: side.index(),
            ..Default::default()
        }
    }

    pub fn side(&self) -> Side {
        Side::from_index(self.side_index)
    }

    pub fn update(&mut self, input: &GestureInput<'_>, tun: &Tunables) -> Vec<GestureEvent> {
        let mut out = Vec::new();
        let side = self.side();
        self.voice.update(side, input, tun, &mut out);
        if let Some(ev) = self.swipe.update(input, tun) {
            out.push(ev);
        }
        if let Some(ev) = self.corner.update(input, tun) {
            out.push(ev);
        }
        if let Some(ev) = self.tap_click.update(input, tun) {
            out.push(ev);
        }
        out
    }

    pub fn reset(&mut self) {
        self.tap_click.reset();
        self.swipe.reset();
        self.corner.reset();
        self.voice.reset();
    }
}
