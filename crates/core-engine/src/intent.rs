//! Intent classifier: decides, once per frame and before any per-contact
//! work, whether the user is typing, pointing, or gesturing.
//!
//! The classifier is a single global state machine over the live touch set.
//! A "mouse signal" (drift, velocity, a second finger landing off-key, or a
//! centroid shift) is strictly stronger than any on-key signal. All-up
//! transitions back to `Idle` are applied by `finish_frame` after per-contact
//! processing, so release commits and snap still see the pre-release mode.

use core_events::ContactKey;
use core_geometry::Point;

use core_config::Tunables;
use tracing::{debug, trace};

use crate::table::ContactTable;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum IntentMode {
    Idle,
    KeyCandidate {
        start: u64,
        touch: ContactKey,
        centroid: Point,
    },
    TypingCommitted {
        until_all_up: bool,
    },
    MouseCandidate {
        start: u64,
    },
    MouseActive,
    GestureCandidate {
        start: u64,
    },
}

impl IntentMode {
    pub const fn name(&self) -> &'static str {
        match self {
            IntentMode::Idle => "idle",
            IntentMode::KeyCandidate { .. } => "key_candidate",
            IntentMode::TypingCommitted { .. } => "typing_committed",
            IntentMode::MouseCandidate { .. } => "mouse_candidate",
            IntentMode::MouseActive => "mouse_active",
            IntentMode::GestureCandidate { .. } => "gesture_candidate",
        }
    }

    /// Typing dispatch is permitted in these modes; chord-shift can still
    /// override per side on top of this.
    pub const fn allows_typing(&self) -> bool {
        matches!(
            self,
            IntentMode::Idle | IntentMode::KeyCandidate { .. } | IntentMode::TypingCommitted { .. }
        )
    }

    pub const fn is_gesture(&self) -> bool {
        matches!(self, IntentMode::GestureCandidate { .. })
    }
}

/// Why a transition fired; recorded in the diagnostics tap and folded into
/// the replay fingerprint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntentReason {
    AnchorTouch,
    TouchOnKey,
    TouchOffKey,
    Drift,
    Velocity,
    SecondTouchOffKey,
    CentroidShift,
    BufferElapsed,
    MultiLanding,
    GraceActive,
    CommitOnRelease,
    AllUp,
    DictationPinned,
    Reset,
}

impl IntentReason {
    pub const fn as_str(self) -> &'static str {
        match self {
            IntentReason::AnchorTouch => "anchor_touch",
            IntentReason::TouchOnKey => "touch_on_key",
            IntentReason::TouchOffKey => "touch_off_key",
            IntentReason::Drift => "drift",
            IntentReason::Velocity => "velocity",
            IntentReason::SecondTouchOffKey => "second_touch_off_key",
            IntentReason::CentroidShift => "centroid_shift",
            IntentReason::BufferElapsed => "buffer_elapsed",
            IntentReason::MultiLanding => "multi_landing",
            IntentReason::GraceActive => "grace_active",
            IntentReason::CommitOnRelease => "commit_on_release",
            IntentReason::AllUp => "all_up",
            IntentReason::DictationPinned => "dictation_pinned",
            IntentReason::Reset => "reset",
        }
    }
}

/// One intent transition, as surfaced to diagnostics.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IntentTransition {
    pub prev: IntentMode,
    pub next: IntentMode,
    pub reason: IntentReason,
    pub ticks: u64,
}

/// Per-touch bookkeeping the classifier owns.
#[derive(Debug, Clone, Copy)]
pub struct TouchTrack {
    pub start_point: Point,
    pub start_ticks: u64,
    pub prev_point: Point,
    pub prev_ticks: u64,
    pub last_point: Point,
    pub last_ticks: u64,
    pub max_drift2: f32,
    pub started_on_key: bool,
}

/// What the engine tells the classifier about one contact this frame.
#[derive(Debug, Clone, Copy)]
pub struct IntentSample {
    pub key: ContactKey,
    pub point: Point,
    pub down: bool,
    pub on_key: bool,
    /// Binding under the touch is a modifier or continuous key.
    pub anchor: bool,
}

/// Aggregates computed over the live touch set each frame.
#[derive(Debug, Clone, Copy, Default)]
pub struct FrameMetrics {
    pub contact_count: usize,
    pub on_key_count: usize,
    pub off_key_count: usize,
    pub max_velocity: f32,
    pub max_drift2: f32,
    pub centroid: Point,
    pub centroid_shift2: f32,
    pub landing_spread_ticks: u64,
    pub new_touch_off_key: bool,
    pub anchor_on_key: bool,
}

#[derive(Debug)]
pub struct IntentClassifier {
    mode: IntentMode,
    touches: ContactTable<TouchTrack>,
    pub last_contact_count: usize,
    pinned: bool,
}

impl Default for IntentClassifier {
    fn default() -> Self {
        IntentClassifier {
            mode: IntentMode::Idle,
            touches: ContactTable::default(),
            last_contact_count: 0,
            pinned: false,
        }
    }
}

impl IntentClassifier {
    pub fn mode(&self) -> IntentMode {
        self.mode
    }

    pub fn touch_count(&self) -> usize {
        self.touches.len()
    }

    pub fn track(&self, key: ContactKey) -> Option<&TouchTrack> {
        self.touches.get(key)
    }

    /// Pin the mode to `GestureCandidate` (dictation corner engaged).
    pub fn pin_gesture(&mut self, now: u64, out: &mut Vec<IntentTransition>) {
        self.pinned = true;
        self.transition(
            IntentMode::GestureCandidate { start: now },
            IntentReason::DictationPinned,
            now,
            out,
        );
    }

    pub fn unpin_gesture(&mut self) {
        self.pinned = false;
    }

    pub fn is_pinned(&self) -> bool {
        self.pinned
    }

    /// Release-time promotion: a quick tap released before the key buffer
    /// elapsed still counts as typing.
    pub fn commit_typing(
        &mut self,
        now: u64,
        until_all_up: bool,
        out: &mut Vec<IntentTransition>,
    ) {
        if matches!(self.mode, IntentMode::KeyCandidate { .. }) {
            self.transition(
                IntentMode::TypingCommitted { until_all_up },
                IntentReason::CommitOnRelease,
                now,
                out,
            );
        }
    }

    pub fn reset(&mut self, now: u64, out: &mut Vec<IntentTransition>) {
        self.touches.clear_preserving_capacity();
        self.last_contact_count = 0;
        self.pinned = false;
        if self.mode != IntentMode::Idle {
            self.transition(IntentMode::Idle, IntentReason::Reset, now, out);
        } else {
            self.mode = IntentMode::Idle;
        }
    }

    /// Per-frame update, called before any per-contact lifecycle work.
    pub fn update(
        &mut self,
        now: u64,
        samples: &[IntentSample],
        grace_active: bool,
        keyboard_mode: bool,
        allow_takeover: bool,
        tun: &Tunables,
        out: &mut Vec<IntentTransition>,
    ) -> FrameMetrics {
        // Track maintenance.
        for s in samples {
            if s.down {
                match self.touches.get_mut(s.key) {
                    Some(track) => {
                        track.prev_point = track.last_point;
                        track.prev_ticks = track.last_ticks;
                        track.last_point = s.point;
                        track.last_ticks = now;
                        let drift2 = track.start_point.distance2(s.point);
                        if drift2 > track.max_drift2 {
                            track.max_drift2 = drift2;
                        }
                    }
                    None => {
                        self.touches.insert(
                            s.key,
                            TouchTrack {
                                start_point: s.point,
                                start_ticks: now,
                                prev_point: s.point,
                                prev_ticks: now,
                                last_point: s.point,
                                last_ticks: now,
                                max_drift2: 0.0,
                                started_on_key: s.on_key,
                            },
                        );
                    }
                }
            } else {
                self.touches.remove(s.key);
            }
        }

        let metrics = self.metrics(now, samples, tun);

        if self.pinned {
            if !self.mode.is_gesture() {
                self.transition(
                    IntentMode::GestureCandidate { start: now },
                    IntentReason::DictationPinned,
                    now,
                    out,
                );
            }
            self.last_contact_count = metrics.contact_count;
            return metrics;
        }

        if grace_active && metrics.contact_count > 0 && !self.mode.is_gesture() {
            if !matches!(self.mode, IntentMode::TypingCommitted { .. }) {
                self.transition(
                    IntentMode::TypingCommitted {
                        until_all_up: !allow_takeover,
                    },
                    IntentReason::GraceActive,
                    now,
                    out,
                );
            }
            self.last_contact_count = metrics.contact_count;
            return metrics;
        }

        // Advance the machine; a single frame may cascade (e.g. a violent
        // drag demotes KeyCandidate and immediately activates the mouse).
        for _ in 0..4 {
            let Some((next, reason)) =
                self.step(now, &metrics, keyboard_mode, allow_takeover, tun)
            else {
                break;
            };
            self.transition(next, reason, now, out);
        }

        self.last_contact_count = metrics.contact_count;
        metrics
    }

    /// End-of-frame rule: every non-idle mode returns to `Idle` once all
    /// fingers have lifted. Runs after lifecycle/snap so release handling
    /// still observes the in-flight mode.
    pub fn finish_frame(&mut self, now: u64, out: &mut Vec<IntentTransition>) {
        if self.pinned {
            return;
        }
        if self.touches.is_empty() && self.mode != IntentMode::Idle {
            self.transition(IntentMode::Idle, IntentReason::AllUp, now, out);
        }
    }

    fn metrics(&self, now: u64, samples: &[IntentSample], tun: &Tunables) -> FrameMetrics {
        let mut m = FrameMetrics::default();
        let mut sum = Point::default();
        let mut start_sum = Point::default();
        let mut min_start = u64::MAX;
        let mut max_start = 0u64;

        self.touches.for_each(|_, track| {
            m.contact_count += 1;
            sum.x += track.last_point.x;
            sum.y += track.last_point.y;
            start_sum.x += track.start_point.x;
            start_sum.y += track.start_point.y;
            if track.max_drift2 > m.max_drift2 {
                m.max_drift2 = track.max_drift2;
            }
            min_start = min_start.min(track.start_ticks);
            max_start = max_start.max(track.start_ticks);
            let dt = tun.ticks_delta_seconds(track.prev_ticks, track.last_ticks);
            if dt > 0.0 {
                let v = track.prev_point.distance2(track.last_point).sqrt() / dt;
                if v > m.max_velocity {
                    m.max_velocity = v;
                }
            }
        });

        for s in samples {
            if !s.down {
                continue;
            }
            if s.on_key {
                m.on_key_count += 1;
                if s.anchor {
                    m.anchor_on_key = true;
                }
            } else {
                m.off_key_count += 1;
            }
            if !s.on_key {
                if let Some(track) = self.touches.get(s.key) {
                    if track.start_ticks == now {
                        m.new_touch_off_key = true;
                    }
                }
            }
        }

        if m.contact_count > 0 {
            let n = m.contact_count as f32;
            m.centroid = Point::new(sum.x / n, sum.y / n);
            let start_centroid = Point::new(start_sum.x / n, start_sum.y / n);
            m.centroid_shift2 = m.centroid.distance2(start_centroid);
            m.landing_spread_ticks = max_start.saturating_sub(min_start);
        }
        m
    }

    fn mouse_signal(
        &self,
        metrics: &FrameMetrics,
        keyboard_mode: bool,
        tun: &Tunables,
    ) -> Option<IntentReason> {
        let velocity_fires = metrics.max_velocity > tun.velocity_threshold_norm_per_s
            && metrics.max_drift2 * 16.0 > tun.move_threshold2;
        if keyboard_mode {
            // Keyboard mode: only a decisive velocity spike takes the mouse.
            return velocity_fires.then_some(IntentReason::Velocity);
        }
        if metrics.max_drift2 > tun.move_threshold2 {
            return Some(IntentReason::Drift);
        }
        if velocity_fires {
            return Some(IntentReason::Velocity);
        }
        if metrics.new_touch_off_key && metrics.contact_count >= 2 {
            return Some(IntentReason::SecondTouchOffKey);
        }
        if metrics.centroid_shift2 > tun.move_threshold2 {
            return Some(IntentReason::CentroidShift);
        }
        None
    }

    fn multi_landing(&self, metrics: &FrameMetrics, tun: &Tunables) -> bool {
        (2..=5).contains(&metrics.contact_count)
            && metrics.landing_spread_ticks <= tun.key_buffer_ticks
    }

    fn step(
        &self,
        now: u64,
        metrics: &FrameMetrics,
        keyboard_mode: bool,
        allow_takeover: bool,
        tun: &Tunables,
    ) -> Option<(IntentMode, IntentReason)> {
        let signal = self.mouse_signal(metrics, keyboard_mode, tun);
        match self.mode {
            IntentMode::Idle => {
                if metrics.contact_count == 0 {
                    return None;
                }
                if self.multi_landing(metrics, tun) {
                    return Some((
                        IntentMode::GestureCandidate { start: now },
                        IntentReason::MultiLanding,
                    ));
                }
                if metrics.anchor_on_key && metrics.contact_count <= 1 {
                    return Some((
                        IntentMode::TypingCommitted {
                            until_all_up: !allow_takeover,
                        },
                        IntentReason::AnchorTouch,
                    ));
                }
                if metrics.on_key_count > 0 && signal.is_none() {
                    let touch = self.first_touch_key();
                    return Some((
                        IntentMode::KeyCandidate {
                            start: now,
                            touch,
                            centroid: metrics.centroid,
                        },
                        IntentReason::TouchOnKey,
                    ));
                }
                Some((
                    IntentMode::MouseCandidate { start: now },
                    IntentReason::TouchOffKey,
                ))
            }
            IntentMode::KeyCandidate { start, .. } => {
                if let Some(reason) = signal {
                    return Some((IntentMode::MouseCandidate { start: now }, reason));
                }
                if self.multi_landing(metrics, tun) && metrics.contact_count >= 2 {
                    return Some((
                        IntentMode::GestureCandidate { start: now },
                        IntentReason::MultiLanding,
                    ));
                }
                if now.saturating_sub(start) >= tun.key_buffer_ticks {
                    return Some((
                        IntentMode::TypingCommitted {
                            until_all_up: !allow_takeover,
                        },
                        IntentReason::BufferElapsed,
                    ));
                }
                None
            }
            IntentMode::TypingCommitted { until_all_up } => {
                if !until_all_up {
                    if let Some(reason) = signal {
                        return Some((IntentMode::MouseActive, reason));
                    }
                }
                None
            }
            IntentMode::MouseCandidate { start } => {
                if let Some(reason) = signal {
                    return Some((IntentMode::MouseActive, reason));
                }
                if now.saturating_sub(start) >= tun.key_buffer_ticks {
                    return Some((IntentMode::MouseActive, IntentReason::BufferElapsed));
                }
                if self.multi_landing(metrics, tun) {
                    return Some((
                        IntentMode::GestureCandidate { start: now },
                        IntentReason::MultiLanding,
                    ));
                }
                None
            }
            IntentMode::MouseActive => None,
            IntentMode::GestureCandidate { .. } => None,
        }
    }

    fn first_touch_key(&self) -> ContactKey {
        let mut best: Option<(u64, ContactKey)> = None;
        self.touches.for_each(|key, track| {
            let candidate = (track.start_ticks, key);
            if best.map(|b| candidate < b).unwrap_or(true) {
                best = Some(candidate);
            }
        });
        best.map(|(_, k)| k).unwrap_or(ContactKey(0))
    }

    fn transition(
        &mut self,
        next: IntentMode,
        reason: IntentReason,
        now: u64,
        out: &mut Vec<IntentTransition>,
    ) {
        let prev = self.mode;
        if prev == next {
            return;
        }
        debug!(
            target: "engine.intent",
            prev = prev.name(),
            next = next.name(),
            reason = reason.as_str(),
            "intent_transition"
        );
        core_events::INTENT_TRANSITIONS.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        self.mode = next;
        out.push(IntentTransition {
            prev,
            next,
            reason,
            ticks: now,
        });
        trace!(target: "engine.intent", touches = self.touches.len(), "post_transition");
    }
}
