//! End-to-end frame scenarios against a default-configured engine.
//!
//! Every test drives the engine with literal frames (synthetic ticks) and
//! asserts on the exact dispatch stream drained from the queue, the same way
//! the headless replay binary does.

use std::time::Duration;

use core_config::EngineSettings;
use core_engine::Engine;
use core_events::{
    ContactPhase, DispatchEvent, DispatchKind, MouseButton, QueueConsumer, RawContact, RawFrame,
    Side, keycode,
    queue::DispatchQueue,
};
use core_geometry::{Point, default_layer_maps, preset_6x3};
use pretty_assertions::assert_eq;

const MS: u64 = 1_000_000;

fn engine() -> (Engine, QueueConsumer) {
    let (tx, rx) = DispatchQueue::bounded(4096);
    (Engine::new(EngineSettings::default(), tx), rx)
}

fn key_center(side: Side, layer: usize, label: &str) -> Point {
    let layout = preset_6x3();
    let maps = default_layer_maps(side);
    let bindings = layout.bindings(side, &maps[layer], &[]);
    bindings
        .iter()
        .find(|b| b.label == label)
        .unwrap_or_else(|| panic!("no binding labelled {label}"))
        .rect
        .center()
}

fn frame(device: u32, ms: u64, contacts: &[(u32, f32, f32, ContactPhase)]) -> RawFrame {
    RawFrame {
        device,
        ticks: ms * MS,
        contacts: contacts
            .iter()
            .map(|&(id, x, y, phase)| RawContact {
                id,
                x,
                y,
                pressure: 1.0,
                phase,
            })
            .collect(),
    }
}

fn drain(rx: &QueueConsumer) -> Vec<DispatchEvent> {
    let mut out = Vec::new();
    while let Some(ev) = rx.try_dequeue(Duration::from_millis(1)) {
        out.push(ev);
    }
    out
}

fn kinds(events: &[DispatchEvent]) -> Vec<DispatchKind> {
    events.iter().map(|e| e.kind).collect()
}

#[test]
fn simple_tap_dispatches_one_key() {
    let (mut engine, rx) = engine();
    let c = key_center(Side::Left, 0, "a");
    engine.ingest(&frame(0, 0, &[(1, c.x, c.y, ContactPhase::Making)]));
    engine.ingest(&frame(0, 60, &[(1, c.x, c.y, ContactPhase::Touching)]));
    engine.ingest(&frame(0, 70, &[(1, c.x, c.y, ContactPhase::Breaking)]));

    let events = drain(&rx);
    assert_eq!(kinds(&events), vec![DispatchKind::KeyTap]);
    assert_eq!(events[0].virtual_key, keycode::VK_ANSI_A);
    assert_eq!(events[0].side, Side::Left);

    let path: Vec<_> = engine
        .take_transitions()
        .iter()
        .map(|t| t.next.name())
        .collect();
    assert_eq!(path, vec!["key_candidate", "typing_committed", "idle"]);
}

#[test]
fn drag_cancels_tap_and_takes_mouse() {
    let (mut engine, rx) = engine();
    let c = key_center(Side::Left, 0, "a");
    engine.ingest(&frame(0, 0, &[(2, c.x, c.y, ContactPhase::Making)]));
    // ~25% of the surface away within 10 ms: unmistakably a drag.
    engine.ingest(&frame(0, 10, &[(2, c.x + 0.3, c.y + 0.25, ContactPhase::Touching)]));
    engine.ingest(&frame(0, 30, &[(2, c.x + 0.3, c.y + 0.25, ContactPhase::Breaking)]));

    assert!(drain(&rx).is_empty(), "a dragged touch must not tap");
    let path: Vec<_> = engine
        .take_transitions()
        .iter()
        .map(|t| t.next.name())
        .collect();
    assert!(path.contains(&"mouse_candidate"));
    assert!(path.contains(&"mouse_active"));
}

#[test]
fn held_modifier_with_multi_tap_brackets_cleanly() {
    let (mut engine, rx) = engine();
    let shift = key_center(Side::Left, 0, "shift");
    let a = key_center(Side::Left, 0, "a");
    // Shift drifts ~500 device units while held; drift never cancels a
    // modifier.
    let drifted = Point::new(shift.x + 500.0 / 7612.0, shift.y);

    engine.ingest(&frame(0, 0, &[(53, shift.x, shift.y, ContactPhase::Making)]));
    engine.ingest(&frame(
        0,
        16,
        &[
            (53, drifted.x, drifted.y, ContactPhase::Touching),
            (54, a.x, a.y, ContactPhase::Making),
        ],
    ));
    engine.ingest(&frame(
        0,
        24,
        &[
            (53, drifted.x, drifted.y, ContactPhase::Touching),
            (54, a.x, a.y, ContactPhase::Breaking),
        ],
    ));
    engine.ingest(&frame(
        0,
        32,
        &[
            (53, drifted.x, drifted.y, ContactPhase::Touching),
            (55, a.x, a.y, ContactPhase::Making),
        ],
    ));
    engine.ingest(&frame(
        0,
        40,
        &[
            (53, drifted.x, drifted.y, ContactPhase::Touching),
            (55, a.x, a.y, ContactPhase::Breaking),
        ],
    ));
    engine.ingest(&frame(0, 48, &[(53, drifted.x, drifted.y, ContactPhase::Breaking)]));

    let events = drain(&rx);
    assert_eq!(
        kinds(&events),
        vec![
            DispatchKind::ModifierDown,
            DispatchKind::KeyTap,
            DispatchKind::KeyTap,
            DispatchKind::ModifierUp,
        ]
    );
    assert_eq!(events[0].virtual_key, keycode::VK_SHIFT);
    assert_eq!(events[1].virtual_key, keycode::VK_ANSI_A);
    assert!(events[1].mod_flags.contains(core_events::ModFlags::SHIFT));
    assert_eq!(events[3].virtual_key, keycode::VK_SHIFT);
}

#[test]
fn five_finger_swipe_toggles_typing_both_ways() {
    let (mut engine, rx) = engine();
    assert!(engine.typing_enabled());

    let down: Vec<_> = (0..5)
        .map(|i| {
            (
                10 + i as u32,
                (900.0 + 300.0 * i as f32) / 7612.0,
                (1500.0 + 50.0 * i as f32) / 5065.0,
                ContactPhase::Making,
            )
        })
        .collect();
    let moved: Vec<_> = down
        .iter()
        .map(|&(id, x, y, _)| (id, x + 2300.0 / 7612.0, y, ContactPhase::Touching))
        .collect();
    let up: Vec<_> = moved
        .iter()
        .map(|&(id, x, y, _)| (id, x, y, ContactPhase::Breaking))
        .collect();

    engine.ingest(&frame(0, 0, &down));
    engine.ingest(&frame(0, 12, &moved));
    engine.ingest(&frame(0, 24, &up));
    assert!(!engine.typing_enabled(), "swipe must disable typing");

    // No key output during the swipe (shift edges from the chord latch are
    // modifier bookkeeping, not typing).
    let events = drain(&rx);
    assert!(events.iter().all(|e| e.kind != DispatchKind::KeyTap));

    // With typing off a clean tap on 'a' is suppressed and counted.
    let a = key_center(Side::Left, 0, "a");
    engine.ingest(&frame(0, 300, &[(30, a.x, a.y, ContactPhase::Making)]));
    engine.ingest(&frame(0, 350, &[(30, a.x, a.y, ContactPhase::Breaking)]));
    assert!(drain(&rx).iter().all(|e| e.kind != DispatchKind::KeyTap));
    assert!(engine.queue_metrics().suppressed_typing_disabled >= 1);

    // A second swipe re-enables typing and the tap dispatches again.
    let down2: Vec<_> = down
        .iter()
        .map(|&(id, x, y, _)| (id + 40, x, y, ContactPhase::Making))
        .collect();
    let moved2: Vec<_> = down2
        .iter()
        .map(|&(id, x, y, _)| (id, x + 2300.0 / 7612.0, y, ContactPhase::Touching))
        .collect();
    let up2: Vec<_> = moved2
        .iter()
        .map(|&(id, x, y, _)| (id, x, y, ContactPhase::Breaking))
        .collect();
    engine.ingest(&frame(0, 1000, &down2));
    engine.ingest(&frame(0, 1012, &moved2));
    engine.ingest(&frame(0, 1024, &up2));
    assert!(engine.typing_enabled());

    drain(&rx);
    engine.ingest(&frame(0, 2000, &[(50, a.x, a.y, ContactPhase::Making)]));
    engine.ingest(&frame(0, 2050, &[(50, a.x, a.y, ContactPhase::Breaking)]));
    let events = drain(&rx);
    assert_eq!(
        events.iter().filter(|e| e.kind == DispatchKind::KeyTap).count(),
        1
    );
}

#[test]
fn three_finger_tap_right_clicks_once() {
    let (mut engine, rx) = engine();
    let down = [
        (1, 120.0 / 7612.0, 140.0 / 5065.0, ContactPhase::Making),
        (2, 420.0 / 7612.0, 260.0 / 5065.0, ContactPhase::Making),
        (3, 760.0 / 7612.0, 300.0 / 5065.0, ContactPhase::Making),
    ];
    let up: Vec<_> = down
        .iter()
        .map(|&(id, x, y, _)| (id, x, y, ContactPhase::Breaking))
        .collect();
    engine.ingest(&frame(0, 0, &down));
    engine.ingest(&frame(0, 22, &up));

    let events = drain(&rx);
    assert_eq!(kinds(&events), vec![DispatchKind::MouseButtonClick]);
    assert_eq!(events[0].mouse_button, Some(MouseButton::Right));
    assert_eq!(events[0].click_count, 1);
}

#[test]
fn snap_on_release_recovers_a_near_miss() {
    let (mut engine, rx) = engine();
    // 30% key spacing and a 200% snap radius, as the reference setup uses.
    let layout = preset_6x3().with_gap(0.3);
    engine.update_layouts(
        (layout, default_layer_maps(Side::Left)),
        (layout, default_layer_maps(Side::Right)),
    );
    engine.update_snap_radius_percent(200);

    // Probe just right of 'a' (row 1, col 1): inside the widened gap.
    let a_center = {
        let maps = default_layer_maps(Side::Left);
        let bindings = layout.bindings(Side::Left, &maps[0], &[]);
        bindings.iter().find(|b| b.label == "a").unwrap().rect
    };
    let probe = Point::new(a_center.x + a_center.w + 0.002, a_center.y + a_center.h / 2.0);

    engine.ingest(&frame(0, 0, &[(9, probe.x, probe.y, ContactPhase::Making)]));
    engine.ingest(&frame(0, 40, &[(9, probe.x, probe.y, ContactPhase::Breaking)]));

    let events = drain(&rx);
    assert_eq!(kinds(&events), vec![DispatchKind::KeyTap]);
    assert_eq!(events[0].virtual_key, keycode::VK_ANSI_A);

    let status = engine.status_snapshot();
    assert_eq!(status.snap_attempts, 1);
    assert_eq!(status.snap_accepted, 1);
}

#[test]
fn hold_on_continuous_key_starts_repeat_stream() {
    let (mut engine, rx) = engine();
    let del = key_center(Side::Right, 0, "delete");
    engine.ingest(&frame(1, 0, &[(7, del.x, del.y, ContactPhase::Making)]));
    // Past the hold threshold: initial tap fires and the repeat arms.
    engine.ingest(&frame(1, 400, &[(7, del.x, del.y, ContactPhase::Touching)]));
    let first = drain(&rx);
    assert_eq!(kinds(&first), vec![DispatchKind::KeyTap]);
    assert_eq!(first[0].virtual_key, keycode::VK_DELETE);

    // 350 ms initial delay later the stream emits repeat KeyDowns.
    engine.ingest(&frame(1, 800, &[(7, del.x, del.y, ContactPhase::Touching)]));
    let repeats = drain(&rx);
    assert!(!repeats.is_empty());
    assert!(repeats.iter().all(|e| e.kind == DispatchKind::KeyDown));
    let token = repeats[0].repeat_token.expect("repeat carries token");
    assert!(repeats.iter().all(|e| e.repeat_token == Some(token)));

    // Release terminates the stream with a token-carrying KeyUp.
    engine.ingest(&frame(1, 900, &[(7, del.x, del.y, ContactPhase::Breaking)]));
    let ended = drain(&rx);
    assert_eq!(kinds(&ended), vec![DispatchKind::KeyUp]);
    assert_eq!(ended[0].repeat_token, Some(token));
    let status = engine.status_snapshot();
    assert_eq!(status.repeats_started, status.repeats_cancelled);
    assert_eq!(status.repeats_active, 0);
}

#[test]
fn momentary_layer_retargets_landings_while_held() {
    let (mut engine, rx) = engine();
    let fn_key = key_center(Side::Right, 0, "fn");
    // On layer 1 the right row 0 col 0 is '7'; on layer 0 it is 'y'.
    let seven = key_center(Side::Right, 1, "7");

    engine.ingest(&frame(1, 0, &[(11, fn_key.x, fn_key.y, ContactPhase::Making)]));
    engine.ingest(&frame(
        1,
        600,
        &[
            (11, fn_key.x, fn_key.y, ContactPhase::Touching),
            (12, seven.x, seven.y, ContactPhase::Making),
        ],
    ));
    engine.ingest(&frame(
        1,
        650,
        &[
            (11, fn_key.x, fn_key.y, ContactPhase::Touching),
            (12, seven.x, seven.y, ContactPhase::Breaking),
        ],
    ));
    engine.ingest(&frame(1, 700, &[(11, fn_key.x, fn_key.y, ContactPhase::Breaking)]));

    let taps: Vec<_> = drain(&rx)
        .into_iter()
        .filter(|e| e.kind == DispatchKind::KeyTap)
        .collect();
    assert_eq!(taps.len(), 1);
    assert_eq!(taps[0].virtual_key, keycode::VK_ANSI_7);

    // Layer closed on release: a later tap lands on the base layer again.
    engine.ingest(&frame(1, 1500, &[(13, seven.x, seven.y, ContactPhase::Making)]));
    engine.ingest(&frame(1, 1550, &[(13, seven.x, seven.y, ContactPhase::Breaking)]));
    let taps: Vec<_> = drain(&rx)
        .into_iter()
        .filter(|e| e.kind == DispatchKind::KeyTap)
        .collect();
    assert_eq!(taps.len(), 1);
    assert_eq!(taps[0].virtual_key, keycode::VK_ANSI_Y);
}
