//! The synchronous engine: one owner of all state, driven to completion one
//! frame at a time.
//!
//! `process_frame` never reads the wall clock and never blocks; every time
//! comparison uses the frame's tick stamp, so replaying a capture with
//! synthetic ticks reproduces live behavior bit for bit. The async actor in
//! `actor.rs` wraps this type; nothing here is aware of tasks or threads
//! beyond the dispatch queue producer it feeds.

use std::sync::Arc;

use core_config::{EngineSettings, Tunables};
use core_events::{
    ContactKey, DispatchEvent, DispatchKind, HapticPort, ModFlags, ModifierKind, QueueMetrics,
    QueueProducer, RawFrame, Side, VoicePort, keycode,
};
use core_geometry::{Action, Binding, BindingIndex, LayerMap, Layout, Point};
use tracing::{debug, info, trace};

use crate::contact::{ContactRecord, ContactState, DisqualifyReason};
use crate::diag::{DiagnosticsTap, FrameSummary, StatusSnapshot};
use crate::gesture::{GestureEvent, GestureInput, GestureTouch, SideGestures};
use crate::intent::{IntentClassifier, IntentMode, IntentSample, IntentTransition};
use crate::modifier::{ChordEdge, ChordShift, ModifierBank};
use crate::repeat::RepeatScheduler;
use crate::table::ContactTable;

/// Per-side layout + layer maps with lazily rebuilt binding indexes.
struct SideMaps {
    layout: Layout,
    layers: Vec<LayerMap>,
    customs: Vec<Binding>,
    indexes: Vec<Option<BindingIndex>>,
    generation: u64,
}

impl SideMaps {
    fn new(side: Side) -> Self {
        SideMaps {
            layout: core_geometry::preset_6x3(),
            layers: core_geometry::default_layer_maps(side),
            customs: Vec::new(),
            indexes: vec![None, None],
            generation: 0,
        }
    }

    fn invalidate(&mut self) {
        self.indexes = vec![None; self.layers.len().max(1)];
        self.generation += 1;
    }

    fn index(&mut self, side: Side, layer: u8, snap_fraction: f32) -> Option<&BindingIndex> {
        if self.layers.is_empty() {
            return None;
        }
        // Unknown layer indices fall back to base (safe-default rule).
        let layer = if (layer as usize) < self.layers.len() {
            layer
        } else {
            0
        };
        let slot = layer as usize;
        if self.indexes[slot].is_none() {
            let bindings = self.layout.bindings(side, &self.layers[slot], &self.customs);
            self.indexes[slot] = Some(BindingIndex::build(
                side,
                layer,
                bindings,
                self.layout.rows as usize,
                self.layout.cols as usize,
                snap_fraction,
            ));
        }
        self.indexes[slot].as_ref()
    }
}

/// An event waiting to be flushed to the queue at the end of a stage.
struct Emission {
    event: DispatchEvent,
    /// Fresh typing output: suppressed (and counted) when typing is off.
    typing_gated: bool,
}

impl Emission {
    fn typing(event: DispatchEvent) -> Self {
        Emission {
            event,
            typing_gated: true,
        }
    }

    fn edge(event: DispatchEvent) -> Self {
        Emission {
            event,
            typing_gated: false,
        }
    }
}

pub struct Engine {
    settings: EngineSettings,
    tun: Tunables,
    maps: [SideMaps; 2],
    device_side_overrides: Vec<(u32, Side)>,

    contacts: ContactTable<ContactRecord>,
    intent: IntentClassifier,
    modifiers: ModifierBank,
    chord: ChordShift,
    repeats: RepeatScheduler,
    gestures: [SideGestures; 2],

    queue: QueueProducer,
    haptic: Option<Arc<dyn HapticPort>>,
    voice: Option<Arc<dyn VoicePort>>,

    typing_enabled: bool,
    listening: bool,
    keymap_editing: bool,
    dictation_engaged: bool,
    voice_corner_held: bool,

    persistent_layer: u8,
    momentary_layers: Vec<(ContactKey, u8)>,

    typing_grace_deadline: Option<u64>,
    snap_attempts: u64,
    snap_accepted: u64,

    held_display: usize,
    held_changed_ticks: u64,
    last_haptic_ticks: [u64; 2],

    frame_serial: u64,
    frames_processed: u64,
    frames_ignored: u64,
    last_ticks: u64,

    diag: DiagnosticsTap,
    transitions: Vec<IntentTransition>,
}

impl Engine {
    pub fn new(settings: EngineSettings, queue: QueueProducer) -> Self {
        let tun = settings.tunables();
        Engine {
            settings,
            tun,
            maps: [SideMaps::new(Side::Left), SideMaps::new(Side::Right)],
            device_side_overrides: Vec::new(),
            contacts: ContactTable::default(),
            intent: IntentClassifier::default(),
            modifiers: ModifierBank::default(),
            chord: ChordShift::default(),
            repeats: RepeatScheduler::default(),
            gestures: [SideGestures::new(Side::Left), SideGestures::new(Side::Right)],
            queue,
            haptic: None,
            voice: None,
            typing_enabled: true,
            listening: true,
            keymap_editing: false,
            dictation_engaged: false,
            voice_corner_held: false,
            persistent_layer: 0,
            momentary_layers: Vec::new(),
            typing_grace_deadline: None,
            snap_attempts: 0,
            snap_accepted: 0,
            held_display: 0,
            held_changed_ticks: 0,
            last_haptic_ticks: [0; 2],
            frame_serial: 0,
            frames_processed: 0,
            frames_ignored: 0,
            last_ticks: 0,
            diag: DiagnosticsTap::default(),
            transitions: Vec::new(),
        }
    }

    pub fn with_haptic(mut self, haptic: Arc<dyn HapticPort>) -> Self {
        self.haptic = Some(haptic);
        self
    }

    pub fn with_voice(mut self, voice: Arc<dyn VoicePort>) -> Self {
        self.voice = Some(voice);
        self
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    // ---------------------------------------------------------------------
    // Ingress
    // ---------------------------------------------------------------------

    pub fn ingest(&mut self, frame: &RawFrame) {
        core_events::FRAMES_INGESTED.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        if !self.listening {
            self.frames_ignored += 1;
            return;
        }
        let side = self.side_for_device(frame.device);
        if self.maps[side.index()].layers.is_empty() {
            // Missing layout: frame ignored silently.
            self.frames_ignored += 1;
            core_events::FRAMES_IGNORED.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
            return;
        }

        self.frame_serial += 1;
        self.frames_processed += 1;
        let now = frame.ticks;
        self.last_ticks = now;
        let grace = self.grace_active(now);
        let enqueued_before = self.queue.metrics().enqueued;

        // Stage 0: contact bookkeeping and classifier samples.
        let samples = self.sample_contacts(frame, side, now);

        // Stage 1: chord-shift pre-pass.
        if self.settings.chordal_shift_enabled {
            let down_count = samples.iter().filter(|s| s.down).count();
            let edge = self.chord.observe(
                side,
                down_count,
                self.settings.chord_threshold,
                self.tun.contact_hold_ticks,
                now,
            );
            if self.chord.side_active(side) {
                self.suppress_side_contacts(side, now);
            }
            self.apply_chord_edge(edge, side, now);
            let decayed = self.chord.decay(now, self.tun.contact_hold_ticks);
            self.apply_chord_edge(decayed, side.opposite(), now);
        }

        // Stage 2: intent update; entering MouseCandidate disqualifies every
        // current on-key touch.
        let t_before = self.transitions.len();
        self.intent.update(
            now,
            &samples,
            grace,
            self.settings.keyboard_mode_enabled,
            self.settings.allow_mouse_takeover_during_typing,
            &self.tun,
            &mut self.transitions,
        );
        let entered_mouse_candidate = self.transitions[t_before..]
            .iter()
            .any(|t| matches!(t.next, IntentMode::MouseCandidate { .. }));
        if entered_mouse_candidate {
            self.disqualify_on_key_contacts(now);
        }

        // Stage 3: per-contact lifecycle, in frame report order.
        for contact in &frame.contacts {
            if contact.phase.is_down() {
                self.process_touch(frame.contact_key(contact), now);
            }
        }

        // Stage 4: releases (ending phases plus contacts absent from the
        // frame), then snap.
        for key in self.collect_released(frame) {
            self.release_contact(key, now);
        }

        // Stage 5: all-up returns intent to Idle before gestures emit.
        self.intent.finish_frame(now, &mut self.transitions);

        // Stage 6: gesture detectors for this side.
        self.run_gestures(side, now, grace);

        // Stage 7: auto-repeat poll against frame ticks.
        self.poll_repeats(now);

        // Stage 8: held-count smoothing + diagnostics.
        self.update_held_count(now);
        let transitions = std::mem::take(&mut self.transitions);
        self.diag.push_transitions(&transitions);
        self.diag.push_frame(FrameSummary {
            ticks: now,
            device: frame.device,
            contact_count: frame.contacts.iter().filter(|c| c.phase.is_down()).count(),
            events_emitted: (self.queue.metrics().enqueued - enqueued_before) as usize,
        });
    }

    /// Timer re-entry: drive repeats and chord decay forward without a frame.
    pub fn tick(&mut self, now: u64) {
        if now < self.last_ticks {
            return;
        }
        self.last_ticks = now;
        if self.settings.chordal_shift_enabled {
            let edge = self.chord.decay(now, self.tun.contact_hold_ticks);
            self.apply_chord_edge(edge, Side::Left, now);
        }
        self.poll_repeats(now);
        self.update_held_count(now);
        let transitions = std::mem::take(&mut self.transitions);
        self.diag.push_transitions(&transitions);
    }

    // ---------------------------------------------------------------------
    // Stage helpers
    // ---------------------------------------------------------------------

    fn sample_contacts(&mut self, frame: &RawFrame, side: Side, now: u64) -> Vec<IntentSample> {
        let mut samples = Vec::with_capacity(frame.contacts.len() + 2);
        let snap_fraction = self.settings.snap_radius_fraction();

        for contact in &frame.contacts {
            let key = frame.contact_key(contact);
            let point = Point::new(contact.x, contact.y);
            if !contact.phase.is_down() {
                samples.push(IntentSample {
                    key,
                    point,
                    down: false,
                    on_key: false,
                    anchor: false,
                });
                continue;
            }

            let existing = self.contacts.get(key).map(|rec| (rec.layer, rec.is_anchor()));
            let (on_key, anchor) = match existing {
                Some((layer, anchor)) => {
                    (self.point_on_key(side, layer, point, snap_fraction), anchor)
                }
                None => {
                    // Landing: capture the binding under the initial point on
                    // the layer active right now; it stays captured for the
                    // whole press even if configuration changes mid-flight.
                    let layer = self.active_layer();
                    let binding = self.maps[side.index()]
                        .index(side, layer, snap_fraction)
                        .and_then(|idx| idx.at(point))
                        .cloned();
                    if let Some(Action::LayerMomentary(n)) = binding.as_ref().map(|b| b.action) {
                        self.momentary_layers.push((key, n));
                        debug!(target: "engine.contact", key = %key, layer = n, "momentary_layer_open");
                    }
                    let anchor = binding
                        .as_ref()
                        .map(|b| b.action.is_modifier() || b.continuous)
                        .unwrap_or(false);
                    let pending = anchor && self.tun.drag_cancel2 > 0.0;
                    let on_key =
                        binding.is_some() || self.point_on_key(side, layer, point, snap_fraction);
                    self.contacts.insert(
                        key,
                        ContactRecord::new(
                            side,
                            binding,
                            layer,
                            point,
                            contact.pressure,
                            now,
                            self.frame_serial,
                            pending,
                        ),
                    );
                    (on_key, anchor)
                }
            };
            if let Some(rec) = self.contacts.get_mut(key) {
                rec.touch_sample(point, contact.pressure, self.frame_serial);
            }
            samples.push(IntentSample {
                key,
                point,
                down: true,
                on_key,
                anchor,
            });
        }

        // Contacts of this device missing from the frame are lifted.
        let serial = self.frame_serial;
        let device = frame.device;
        self.contacts.for_each(|key, rec| {
            if key.device() == device && rec.seen_frame < serial {
                samples.push(IntentSample {
                    key,
                    point: rec.last_point,
                    down: false,
                    on_key: false,
                    anchor: false,
                });
            }
        });

        samples
    }

    /// Near-miss within the snap radius still reads as "on a key" so the
    /// classifier does not demote a sloppy tap to pointing.
    fn point_on_key(&mut self, side: Side, layer: u8, point: Point, snap_fraction: f32) -> bool {
        match self.maps[side.index()].index(side, layer, snap_fraction) {
            Some(idx) => idx.at(point).is_some() || idx.snap(point).is_some(),
            None => false,
        }
    }

    fn process_touch(&mut self, key: ContactKey, now: u64) {
        let Some(rec) = self.contacts.get(key) else {
            return;
        };
        let side = rec.side;
        let allow = self.allow_typing_side(side);
        let gesture_mode = self.intent.mode().is_gesture();
        let chord_suppressed = self.chord.side_active(side);
        let any_mods = self.modifiers.any_active();
        let effective_flags = self.modifiers.effective_flags();
        let cap = self.settings.force_click_cap_grams;
        let typing_enabled = self.typing_enabled;
        let tun = self.tun;

        let mut emissions: Vec<Emission> = Vec::new();

        // The block only borrows `contacts`, `modifiers`, `repeats`, and
        // `momentary_layers` (disjoint fields); emissions flush at the end.
        'lifecycle: {
            let Some(rec) = self.contacts.get_mut(key) else {
                break 'lifecycle;
            };
            if rec.is_disqualified() {
                break 'lifecycle;
            }
            if chord_suppressed {
                rec.disqualify(DisqualifyReason::TypingDisabled);
                break 'lifecycle;
            }

            // Force guard: a hard press with no modifiers active means the
            // user is clicking through the glass, not typing.
            if cap > 0.0 && !any_mods && (rec.last_pressure - rec.initial_pressure) as f64 >= cap {
                rec.force_guard_triggered = true;
                rec.disqualify(DisqualifyReason::ForceCap);
                trace!(target: "engine.contact", key = %key, "force_cap_disqualify");
                break 'lifecycle;
            }

            let Some(binding) = rec.binding.clone() else {
                break 'lifecycle; // off-key touch: pointer material
            };
            match binding.action {
                Action::None
                | Action::TypingToggle
                | Action::LayerToggle(_)
                | Action::LayerMomentary(_) => break 'lifecycle, // release-driven
                _ => {}
            }

            let landing = rec.start_ticks == now;

            // Tap-on-release priority: with modifiers already down, a plain
            // key fires immediately so chords feel instant.
            if landing
                && allow
                && any_mods
                && !binding.continuous
                && matches!(binding.action, Action::Key { flags, .. } if flags.is_empty())
            {
                if let Some(vk) = binding.action.virtual_key() {
                    emissions.push(Emission::typing(DispatchEvent::key_tap(
                        now,
                        binding.side,
                        vk,
                        effective_flags,
                        &binding.label,
                    )));
                    rec.disqualify(DisqualifyReason::TapConsumed);
                    break 'lifecycle;
                }
            }

            // Pending keys settle on their second sample.
            if rec.state == ContactState::Pending && !landing {
                rec.activate();
                if binding.action.is_modifier() && typing_enabled {
                    if let Some(vk) = binding.action.virtual_key() {
                        if let Some(kind) = keycode::modifier_kind(vk) {
                            if let ContactState::Active { engaged, .. } = &mut rec.state {
                                *engaged = true;
                            }
                            if let Some(ev) = self.modifiers.down(kind, binding.side, vk, now) {
                                emissions.push(Emission::edge(ev));
                            }
                        }
                    }
                }
            }

            // Mouse-button bindings press on landing, release on lift. A
            // gesture in progress owns the touch set; no button edges then.
            if landing && !gesture_mode {
                if let Action::MouseButton(btn) = binding.action {
                    if let ContactState::Active { engaged, .. } = &mut rec.state {
                        *engaged = true;
                    }
                    emissions.push(Emission::edge(DispatchEvent::mouse_edge(
                        now,
                        binding.side,
                        btn,
                        true,
                    )));
                }
            }

            // Drag handling: non-modifier taps cancel on drift; continuous
            // keys cancel when the finger leaves the rect.
            let dragged = rec.max_drift2 > tun.drag_cancel2;
            if !binding.action.is_modifier() {
                if binding.continuous {
                    if !binding.rect.contains(rec.last_point) {
                        rec.disqualify(DisqualifyReason::DragCancel);
                        self.repeats.cancel(key);
                        break 'lifecycle;
                    }
                } else if dragged && !matches!(binding.action, Action::MouseButton(_)) {
                    let held_through = matches!(rec.state, ContactState::Active { did_hold: true, .. });
                    if !held_through {
                        rec.disqualify(DisqualifyReason::DragCancel);
                        trace!(target: "engine.contact", key = %key, drift2 = rec.max_drift2, "drag_cancel");
                        break 'lifecycle;
                    }
                }
            }

            // Hold detection.
            let duration = rec.duration(now);
            let in_rect = binding.rect.contains(rec.initial_point);
            let ContactState::Active {
                did_hold,
                hold_repeat_active,
                ..
            } = &mut rec.state
            else {
                break 'lifecycle;
            };
            if *did_hold
                || duration < tun.hold_min_ticks
                || dragged
                || !in_rect
                || !allow
                || !typing_enabled
            {
                break 'lifecycle;
            }
            if binding.continuous {
                if let Some(vk) = binding.action.virtual_key() {
                    *did_hold = true;
                    *hold_repeat_active = true;
                    let flags = effective_flags | action_flags(&binding.action);
                    emissions.push(Emission::typing(DispatchEvent::key_tap(
                        now,
                        binding.side,
                        vk,
                        flags,
                        &binding.label,
                    )));
                    self.repeats.start(
                        key,
                        binding.side,
                        vk,
                        flags,
                        &binding.label,
                        now,
                        tun.repeat_initial_ticks,
                        tun.repeat_interval_ticks,
                    );
                }
            } else if let Some(hold) = binding.hold_action {
                *did_hold = true;
                match hold {
                    Action::Key { code, flags } => {
                        let flags = effective_flags | flags;
                        emissions.push(Emission::typing(DispatchEvent::key_tap(
                            now,
                            binding.side,
                            code,
                            flags,
                            &binding.label,
                        )));
                        if keycode::is_continuous(code) {
                            *hold_repeat_active = true;
                            self.repeats.start(
                                key,
                                binding.side,
                                code,
                                flags,
                                &binding.label,
                                now,
                                tun.repeat_initial_ticks,
                                tun.repeat_interval_ticks,
                            );
                        }
                    }
                    Action::KeyChord { code, extra_flags } => {
                        emissions.push(Emission::typing(DispatchEvent::key_tap(
                            now,
                            binding.side,
                            code,
                            effective_flags | extra_flags,
                            &binding.label,
                        )));
                    }
                    Action::LayerMomentary(n) => {
                        self.momentary_layers.push((key, n));
                        debug!(target: "engine.contact", key = %key, layer = n, "hold_momentary_layer");
                    }
                    other => {
                        trace!(
                            target: "engine.contact",
                            action = other.kind_str(),
                            "hold_action_unsupported"
                        );
                    }
                }
            }
        }

        self.flush(emissions);
    }

    fn collect_released(&mut self, frame: &RawFrame) -> Vec<ContactKey> {
        let mut released = Vec::new();
        for contact in &frame.contacts {
            if contact.phase.is_ending() {
                released.push(frame.contact_key(contact));
            }
        }
        let serial = self.frame_serial;
        let device = frame.device;
        self.contacts.for_each(|key, rec| {
            if key.device() == device && rec.seen_frame < serial && !released.contains(&key) {
                released.push(key);
            }
        });
        released
    }

    fn release_contact(&mut self, key: ContactKey, now: u64) {
        let Some(rec) = self.contacts.remove(key) else {
            return;
        };
        let mut emissions: Vec<Emission> = Vec::new();

        // Repeat streams die with their holder: the terminating KeyUp (with
        // the stream's token) goes out before anything else this release
        // produces. Momentary layers opened by this contact close too.
        if let Some((token, vk, flags, rside, label)) = self.repeats.active_entry(key) {
            emissions.push(Emission::edge(DispatchEvent::key_up(
                now,
                rside,
                vk,
                flags,
                &label,
                Some(token),
            )));
        }
        self.repeats.cancel(key);
        self.momentary_layers.retain(|(k, _)| *k != key);

        let allow = self.allow_typing_side(rec.side);
        let duration = rec.duration(now);
        let drift_ok = rec.max_drift2 <= self.tun.drag_cancel2;
        let (engaged, did_hold) = match rec.state {
            ContactState::Active {
                engaged, did_hold, ..
            } => (engaged, did_hold),
            _ => (false, false),
        };

        // Balance any down edge this contact emitted.
        if engaged {
            if let Some(binding) = &rec.binding {
                match binding.action {
                    Action::Modifier { code } => {
                        if let Some(kind) = keycode::modifier_kind(code) {
                            if let Some(ev) = self.modifiers.up(kind, binding.side, code, now) {
                                emissions.push(Emission::edge(ev));
                            }
                        }
                    }
                    Action::MouseButton(btn) => {
                        emissions.push(Emission::edge(DispatchEvent::mouse_edge(
                            now,
                            binding.side,
                            btn,
                            false,
                        )));
                    }
                    _ => {}
                }
            }
        }

        let disqualified = rec.is_disqualified();

        if !disqualified && !did_hold {
            match rec.binding.as_ref().map(|b| b.action) {
                Some(Action::TypingToggle) => {
                    if drift_ok {
                        self.flush(emissions);
                        self.toggle_typing(now);
                        return;
                    }
                }
                Some(Action::LayerToggle(n)) => {
                    if drift_ok && self.typing_enabled {
                        self.persistent_layer = if self.persistent_layer == n { 0 } else { n };
                        info!(target: "engine", layer = self.persistent_layer, "persistent_layer_toggled");
                    }
                }
                Some(Action::Key { .. }) | Some(Action::KeyChord { .. }) => {
                    if duration <= self.tun.tap_max_ticks && drift_ok {
                        let committed = if allow {
                            true
                        } else if matches!(self.intent.mode(), IntentMode::KeyCandidate { .. })
                            && self.typing_enabled
                        {
                            // Commit-on-release: the quick tap itself proves
                            // typing intent.
                            let until = !self.settings.allow_mouse_takeover_during_typing;
                            self.intent.commit_typing(now, until, &mut self.transitions);
                            true
                        } else {
                            false
                        };
                        if committed {
                            let binding = rec.binding.as_ref().expect("key action has binding");
                            if let Some(vk) = binding.action.virtual_key() {
                                emissions.push(Emission::typing(DispatchEvent::key_tap(
                                    now,
                                    binding.side,
                                    vk,
                                    self.modifiers.effective_flags()
                                        | action_flags(&binding.action),
                                    &binding.label,
                                )));
                            }
                        }
                    }
                }
                _ => {}
            }
        }

        // Snap on release: a quick near-miss that landed on no binding, while
        // intent still reads as typing.
        if !disqualified
            && !did_hold
            && rec.binding.is_none()
            && duration <= self.tun.tap_max_ticks
            && drift_ok
            && self.typing_enabled
            && matches!(
                self.intent.mode(),
                IntentMode::KeyCandidate { .. } | IntentMode::TypingCommitted { .. }
            )
        {
            self.snap_release(&rec, key, now, &mut emissions);
        }

        self.flush(emissions);
    }

    fn snap_release(
        &mut self,
        rec: &ContactRecord,
        key: ContactKey,
        now: u64,
        emissions: &mut Vec<Emission>,
    ) {
        let snap_fraction = self.settings.snap_radius_fraction();
        let side = rec.side;
        self.snap_attempts += 1;
        let snapped = self.maps[side.index()]
            .index(side, rec.layer, snap_fraction)
            .and_then(|idx| {
                idx.snap(rec.last_point)
                    .map(|o| idx.binding(o.binding_index).clone())
            });
        let Some(binding) = snapped else {
            trace!(target: "engine.contact", key = %key, "snap_missed");
            return;
        };
        self.snap_accepted += 1;
        if matches!(self.intent.mode(), IntentMode::KeyCandidate { .. }) {
            let until = !self.settings.allow_mouse_takeover_during_typing;
            self.intent.commit_typing(now, until, &mut self.transitions);
        }
        if let Some(vk) = binding.action.virtual_key() {
            debug!(target: "engine.contact", key = %key, label = binding.label.as_str(), "snap_accepted");
            emissions.push(Emission::typing(DispatchEvent::key_tap(
                now,
                binding.side,
                vk,
                self.modifiers.effective_flags() | action_flags(&binding.action),
                &binding.label,
            )));
        }
    }

    fn run_gestures(&mut self, side: Side, now: u64, grace: bool) {
        let mut touches: Vec<GestureTouch> = Vec::new();
        self.contacts.for_each(|_, rec| {
            if rec.side == side {
                touches.push(GestureTouch {
                    point: rec.last_point,
                    start_ticks: rec.start_ticks,
                    drift2: rec.max_drift2,
                });
            }
        });
        let input = GestureInput {
            now,
            touches: &touches,
            tap_click_enabled: self.settings.tap_click_enabled,
            keyboard_mode: self.settings.keyboard_mode_enabled,
            grace_active: grace,
        };
        let events = self.gestures[side.index()].update(&input, &self.tun);
        for ev in events {
            match ev {
                GestureEvent::TapClick { button, count } => {
                    if !self.dictation_engaged {
                        self.flush(vec![Emission::edge(DispatchEvent::mouse_click(
                            now, side, button, count,
                        ))]);
                    }
                }
                GestureEvent::SwipeTypingToggle => self.toggle_typing(now),
                GestureEvent::CornerHold => {
                    // Corner hold flips keyboard-only mode; a toggle keeps
                    // the gesture dispatch-free while the fingers hold.
                    self.settings.keyboard_mode_enabled = !self.settings.keyboard_mode_enabled;
                    info!(
                        target: "engine.gesture",
                        enabled = self.settings.keyboard_mode_enabled,
                        "corner_hold_keyboard_mode"
                    );
                }
                GestureEvent::VoiceToggle => self.toggle_dictation(now),
                GestureEvent::VoicePin(held) => {
                    self.voice_corner_held = held;
                    self.sync_gesture_pin(now);
                }
            }
        }
    }

    fn poll_repeats(&mut self, now: u64) {
        let fired = self.repeats.poll(now);
        if fired.is_empty() {
            return;
        }
        let emissions = fired.into_iter().map(Emission::typing).collect();
        self.flush(emissions);
    }

    pub fn next_repeat_deadline(&self) -> Option<u64> {
        self.repeats.next_deadline()
    }

    pub fn grace_deadline(&self) -> Option<u64> {
        self.typing_grace_deadline
    }

    // ---------------------------------------------------------------------
    // Side effects
    // ---------------------------------------------------------------------

    fn flush(&mut self, emissions: Vec<Emission>) {
        for Emission {
            mut event,
            typing_gated,
        } in emissions
        {
            if typing_gated && !self.typing_enabled {
                self.queue.note_suppressed_typing_disabled();
                continue;
            }
            if self.keymap_editing {
                event = event.into_probe();
            }
            if matches!(event.kind, DispatchKind::KeyTap | DispatchKind::KeyDown) {
                self.typing_grace_deadline = Some(event.ticks + self.tun.typing_grace_ticks);
            }
            if event.flags.haptic {
                self.play_haptic(event.side, event.ticks);
            }
            self.queue.try_enqueue(event);
        }
    }

    fn play_haptic(&mut self, side: Side, now: u64) {
        let Some(haptic) = &self.haptic else { return };
        let slot = &mut self.last_haptic_ticks[side.index()];
        if *slot != 0 && now.saturating_sub(*slot) < self.tun.haptic_min_ticks {
            return;
        }
        *slot = now;
        haptic.play(side, self.settings.haptic_strength, None);
    }

    fn apply_chord_edge(&mut self, edge: Option<ChordEdge>, side: Side, now: u64) {
        let Some(edge) = edge else { return };
        let ev = match edge {
            ChordEdge::Engage => self
                .modifiers
                .down(ModifierKind::Shift, side, keycode::VK_SHIFT, now),
            ChordEdge::Release => self
                .modifiers
                .up(ModifierKind::Shift, side, keycode::VK_SHIFT, now),
        };
        if let Some(event) = ev {
            self.flush(vec![Emission::edge(event)]);
        }
    }

    fn suppress_side_contacts(&mut self, side: Side, now: u64) {
        for key in self.contacts.keys() {
            let skip = self
                .contacts
                .get(key)
                .map(|rec| rec.side != side || rec.is_disqualified())
                .unwrap_or(true);
            if !skip {
                self.disqualify_contact(key, DisqualifyReason::TypingDisabled, now);
            }
        }
    }

    fn disqualify_on_key_contacts(&mut self, now: u64) {
        for key in self.contacts.keys() {
            let reason = match self.contacts.get(key) {
                Some(rec)
                    if !rec.is_disqualified()
                        && rec.binding.is_some()
                        && !rec
                            .binding
                            .as_ref()
                            .map(|b| b.action.is_modifier())
                            .unwrap_or(false) =>
                {
                    // Name the contact's own drag when it caused the demotion.
                    if rec.max_drift2 > self.tun.drag_cancel2 {
                        DisqualifyReason::DragCancel
                    } else {
                        DisqualifyReason::IntentMouse
                    }
                }
                _ => continue,
            };
            self.disqualify_contact(key, reason, now);
        }
    }

    /// Disqualify with full cleanup: the contact stops dispatching but any
    /// down edge or repeat stream it already emitted is balanced immediately.
    fn disqualify_contact(&mut self, key: ContactKey, reason: DisqualifyReason, now: u64) {
        let mut emissions = Vec::new();
        if let Some((token, vk, flags, rside, label)) = self.repeats.active_entry(key) {
            emissions.push(Emission::edge(DispatchEvent::key_up(
                now,
                rside,
                vk,
                flags,
                &label,
                Some(token),
            )));
        }
        self.repeats.cancel(key);
        self.momentary_layers.retain(|(k, _)| *k != key);
        if let Some(rec) = self.contacts.get_mut(key) {
            let was_engaged = matches!(rec.state, ContactState::Active { engaged: true, .. });
            let binding = rec.binding.clone();
            rec.disqualify(reason);
            if was_engaged {
                match binding.as_ref().map(|b| b.action) {
                    Some(Action::Modifier { code }) => {
                        if let Some(kind) = keycode::modifier_kind(code) {
                            let side = binding.as_ref().map(|b| b.side).unwrap_or(Side::Left);
                            if let Some(ev) = self.modifiers.up(kind, side, code, now) {
                                emissions.push(Emission::edge(ev));
                            }
                        }
                    }
                    Some(Action::MouseButton(btn)) => {
                        let side = binding.as_ref().map(|b| b.side).unwrap_or(Side::Left);
                        emissions.push(Emission::edge(DispatchEvent::mouse_edge(
                            now, side, btn, false,
                        )));
                    }
                    _ => {}
                }
            }
            trace!(target: "engine.contact", key = %key, reason = reason.as_str(), "disqualified");
        }
        self.flush(emissions);
    }

    fn toggle_typing(&mut self, now: u64) {
        self.typing_enabled = !self.typing_enabled;
        info!(target: "engine", enabled = self.typing_enabled, "typing_toggled");
        if !self.typing_enabled {
            // Turning off releases all held keys, modifiers, repeats, and
            // the dictation session. Per-contact cleanup runs first so every
            // live repeat stream gets its terminating KeyUp.
            for key in self.contacts.keys() {
                self.disqualify_contact(key, DisqualifyReason::TypingDisabled, now);
            }
            self.repeats.cancel_all();
            let edge = self.chord.reset();
            self.apply_chord_edge(edge, Side::Left, now);
            let ups = self.modifiers.force_clear(Side::Left, now);
            self.flush(ups.into_iter().map(Emission::edge).collect());
            self.typing_grace_deadline = None;
            if self.dictation_engaged {
                self.toggle_dictation(now);
            }
        }
    }

    fn toggle_dictation(&mut self, now: u64) {
        self.dictation_engaged = !self.dictation_engaged;
        info!(target: "engine", engaged = self.dictation_engaged, "dictation_toggled");
        if let Some(voice) = &self.voice {
            if self.dictation_engaged {
                voice.begin_session();
            } else {
                voice.end_session();
            }
        }
        self.sync_gesture_pin(now);
    }

    fn sync_gesture_pin(&mut self, now: u64) {
        let want_pinned = self.voice_corner_held || self.dictation_engaged;
        if want_pinned && !self.intent.is_pinned() {
            self.intent.pin_gesture(now, &mut self.transitions);
        } else if !want_pinned && self.intent.is_pinned() {
            self.intent.unpin_gesture();
            self.intent.finish_frame(now, &mut self.transitions);
        }
    }

    fn grace_active(&self, now: u64) -> bool {
        self.typing_grace_deadline.map(|d| now < d).unwrap_or(false)
    }

    /// Intent-level permission only; the global typing toggle is enforced at
    /// flush time so suppressed output is counted, not silently skipped.
    fn allow_typing_side(&self, side: Side) -> bool {
        if self.chord.side_active(side) {
            return false;
        }
        // Chord on one side lets the other side keep typing even when the
        // global mode says otherwise.
        self.intent.mode().allows_typing() || self.chord.side_active(side.opposite())
    }

    fn active_layer(&self) -> u8 {
        self.momentary_layers
            .iter()
            .map(|(_, n)| *n)
            .max()
            .unwrap_or(self.persistent_layer)
    }

    fn side_for_device(&self, device: u32) -> Side {
        for (dev, side) in &self.device_side_overrides {
            if *dev == device {
                return *side;
            }
        }
        if device % 2 == 0 { Side::Left } else { Side::Right }
    }

    fn update_held_count(&mut self, now: u64) {
        let live = self.contacts.len();
        if live > self.held_display {
            self.held_display = live;
            self.held_changed_ticks = now;
        } else if live < self.held_display
            && now.saturating_sub(self.held_changed_ticks) >= self.tun.contact_hold_ticks
        {
            self.held_display = live;
            self.held_changed_ticks = now;
        }
    }

    // ---------------------------------------------------------------------
    // Configuration surface (applied between frames by the actor)
    // ---------------------------------------------------------------------

    fn reapply_settings(&mut self) {
        self.tun = self.settings.tunables();
    }

    pub fn update_layouts(
        &mut self,
        left: (Layout, Vec<LayerMap>),
        right: (Layout, Vec<LayerMap>),
    ) {
        self.maps[0].layout = left.0;
        self.maps[0].layers = left.1;
        self.maps[1].layout = right.0;
        self.maps[1].layers = right.1;
        for m in &mut self.maps {
            m.invalidate();
        }
    }

    pub fn update_key_mappings(
        &mut self,
        left_layers: Vec<LayerMap>,
        right_layers: Vec<LayerMap>,
    ) {
        self.maps[0].layers = left_layers;
        self.maps[1].layers = right_layers;
        for m in &mut self.maps {
            m.invalidate();
        }
    }

    pub fn update_custom_buttons(&mut self, buttons: Vec<Binding>) {
        for m in &mut self.maps {
            m.customs.clear();
        }
        for b in buttons {
            self.maps[b.side.index()].customs.push(b);
        }
        for m in &mut self.maps {
            m.invalidate();
        }
    }

    pub fn set_device_side(&mut self, device: u32, side: Side) {
        self.device_side_overrides.retain(|(d, _)| *d != device);
        self.device_side_overrides.push((device, side));
    }

    pub fn set_listening(&mut self, listening: bool) {
        self.listening = listening;
    }

    pub fn set_persistent_layer(&mut self, layer: u8) {
        self.persistent_layer = if layer <= 1 { layer } else { 0 };
    }

    pub fn set_keymap_editing_enabled(&mut self, enabled: bool) {
        self.keymap_editing = enabled;
    }

    pub fn update_hold_threshold(&mut self, seconds: f64) {
        self.settings.hold_min_seconds = seconds.max(0.0);
        self.reapply_settings();
    }

    pub fn update_drag_cancel_distance(&mut self, mm: f64) {
        self.settings.drag_cancel_mm = mm.max(0.0);
        self.reapply_settings();
    }

    pub fn update_typing_grace(&mut self, ms: u64) {
        self.settings.typing_grace_ms = ms;
        self.reapply_settings();
    }

    pub fn update_intent_move_threshold(&mut self, mm: f64) {
        self.settings.intent_move_threshold_mm = mm.max(0.0);
        self.reapply_settings();
    }

    pub fn update_intent_velocity_threshold(&mut self, mm_s: f64) {
        self.settings.intent_velocity_threshold_mm_s = mm_s.max(0.0);
        self.reapply_settings();
    }

    pub fn update_allow_mouse_takeover(&mut self, allow: bool) {
        self.settings.allow_mouse_takeover_during_typing = allow;
    }

    pub fn update_force_click_cap(&mut self, grams: f64) {
        self.settings.force_click_cap_grams = grams.max(0.0);
    }

    pub fn update_haptic_strength(&mut self, strength: f32) {
        self.settings.haptic_strength = strength.clamp(0.0, 1.0);
    }

    pub fn update_snap_radius_percent(&mut self, percent: u16) {
        self.settings.snap_radius_percent = percent;
        self.reapply_settings();
        for m in &mut self.maps {
            m.invalidate();
        }
    }

    pub fn update_chordal_shift_enabled(&mut self, enabled: bool) {
        self.settings.chordal_shift_enabled = enabled;
        if !enabled {
            let edge = self.chord.reset();
            self.apply_chord_edge(edge, Side::Left, self.last_ticks);
        }
    }

    pub fn update_keyboard_mode_enabled(&mut self, enabled: bool) {
        self.settings.keyboard_mode_enabled = enabled;
    }

    pub fn update_tap_click_enabled(&mut self, enabled: bool) {
        self.settings.tap_click_enabled = enabled;
    }

    pub fn update_tap_click_cadence(&mut self, ms: u64) {
        self.settings.tap_click_cadence_ms = ms;
        self.reapply_settings();
    }

    pub fn typing_enabled(&self) -> bool {
        self.typing_enabled
    }

    // ---------------------------------------------------------------------
    // Reset & status
    // ---------------------------------------------------------------------

    /// Force-release everything and return to a provably quiescent state:
    /// zero modifiers, zero repeats, zero contacts.
    pub fn reset(&mut self, stop_voice: bool) {
        let now = self.last_ticks;
        // Stale queued output is dropped first so the balancing releases
        // below are the only events left behind.
        self.queue.purge();
        let stream_ups: Vec<Emission> = self
            .repeats
            .active_entries()
            .into_iter()
            .map(|(token, vk, flags, side, label)| {
                Emission::edge(DispatchEvent::key_up(now, side, vk, flags, &label, Some(token)))
            })
            .collect();
        self.flush(stream_ups);
        self.repeats.cancel_all();

        let edge = self.chord.reset();
        self.apply_chord_edge(edge, Side::Left, now);
        let ups = self.modifiers.force_clear(Side::Left, now);
        self.flush(ups.into_iter().map(Emission::edge).collect());

        self.contacts.clear_preserving_capacity();
        self.momentary_layers.clear();
        self.voice_corner_held = false;
        if stop_voice && self.dictation_engaged {
            self.toggle_dictation(now);
        }
        self.intent.reset(now, &mut self.transitions);
        for g in &mut self.gestures {
            g.reset();
        }
        self.typing_grace_deadline = None;
        self.held_display = 0;
        let transitions = std::mem::take(&mut self.transitions);
        self.diag.push_transitions(&transitions);
        info!(target: "engine", stop_voice, "engine_reset");
    }

    pub fn status_snapshot(&self) -> StatusSnapshot {
        StatusSnapshot {
            intent_mode: self.intent.mode().name(),
            typing_enabled: self.typing_enabled,
            listening: self.listening,
            keymap_editing: self.keymap_editing,
            persistent_layer: self.persistent_layer,
            active_layer: self.active_layer(),
            live_contacts: self.contacts.len(),
            held_contacts: self.held_display,
            modifier_counts: self.modifiers.counts(),
            chord_left: self.chord.side_active(Side::Left),
            chord_right: self.chord.side_active(Side::Right),
            repeats_active: self.repeats.active_count(),
            repeats_started: self.repeats.started_total(),
            repeats_cancelled: self.repeats.cancelled_total(),
            snap_attempts: self.snap_attempts,
            snap_accepted: self.snap_accepted,
            dictation_engaged: self.dictation_engaged,
            frames_processed: self.frames_processed,
            frames_ignored: self.frames_ignored,
            queue: self.queue_metrics(),
        }
    }

    pub fn queue_metrics(&self) -> QueueMetrics {
        self.queue.metrics()
    }

    /// Drain recorded intent transitions (replay fingerprinting).
    pub fn take_transitions(&mut self) -> Vec<IntentTransition> {
        self.diag.drain_transitions()
    }

    pub fn set_record_frames(&mut self, record: bool) {
        self.diag.record_frames = record;
    }

    pub fn take_frame_summaries(&mut self) -> Vec<FrameSummary> {
        self.diag.drain_frames()
    }

    #[cfg(test)]
    pub(crate) fn layer_generation(&self, side: Side) -> u64 {
        self.maps[side.index()].generation
    }
}

fn action_flags(action: &Action) -> ModFlags {
    match action {
        Action::Key { flags, .. } => *flags,
        Action::KeyChord { extra_flags, .. } => *extra_flags,
        _ => ModFlags::empty(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core_events::queue::DispatchQueue;

    fn engine() -> Engine {
        let (tx, _rx) = DispatchQueue::bounded(16);
        Engine::new(EngineSettings::default(), tx)
    }

    #[test]
    fn device_parity_maps_to_sides_with_overrides() {
        let mut e = engine();
        assert_eq!(e.side_for_device(0), Side::Left);
        assert_eq!(e.side_for_device(1), Side::Right);
        assert_eq!(e.side_for_device(2), Side::Left);
        e.set_device_side(2, Side::Right);
        assert_eq!(e.side_for_device(2), Side::Right);
        e.set_device_side(2, Side::Left);
        assert_eq!(e.side_for_device(2), Side::Left);
    }

    #[test]
    fn momentary_layers_win_over_persistent() {
        let mut e = engine();
        assert_eq!(e.active_layer(), 0);
        e.set_persistent_layer(1);
        assert_eq!(e.active_layer(), 1);
        e.momentary_layers.push((ContactKey::new(0, 1), 0));
        // Momentary set non-empty: its max wins even when lower.
        assert_eq!(e.active_layer(), 0);
        e.momentary_layers.push((ContactKey::new(0, 2), 1));
        assert_eq!(e.active_layer(), 1);
        e.momentary_layers.clear();
        assert_eq!(e.active_layer(), 1);
        e.set_persistent_layer(7); // out of range -> base
        assert_eq!(e.active_layer(), 0);
    }

    #[test]
    fn snap_percent_update_invalidates_indexes() {
        let mut e = engine();
        let before = e.layer_generation(Side::Left);
        e.update_snap_radius_percent(150);
        assert!(e.layer_generation(Side::Left) > before);
        assert_eq!(e.settings().snap_radius_percent, 150);
    }

    #[test]
    fn missing_layout_ignores_frames_silently() {
        let mut e = engine();
        e.update_key_mappings(Vec::new(), Vec::new());
        e.ingest(&RawFrame {
            device: 0,
            ticks: 0,
            contacts: vec![],
        });
        let status = e.status_snapshot();
        assert_eq!(status.frames_processed, 0);
        assert_eq!(status.frames_ignored, 1);
    }

    #[test]
    fn listening_gate_counts_but_does_not_process() {
        let mut e = engine();
        e.set_listening(false);
        e.ingest(&RawFrame {
            device: 0,
            ticks: 0,
            contacts: vec![],
        });
        assert_eq!(e.status_snapshot().frames_processed, 0);
        e.set_listening(true);
        e.ingest(&RawFrame {
            device: 0,
            ticks: 1,
            contacts: vec![],
        });
        assert_eq!(e.status_snapshot().frames_processed, 1);
    }
}
