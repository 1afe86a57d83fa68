//! Actor boundary tests: message FIFO, snapshots, reset, and the timer task
//! that re-enters the actor for auto-repeat.

use std::sync::Arc;
use std::time::Duration;

use core_config::EngineSettings;
use core_engine::{ConfigUpdate, Engine, actor};
use core_events::{
    ClockPort, ContactPhase, DispatchKind, MonotonicClock, QueueConsumer, RawContact, RawFrame,
    Side, queue::DispatchQueue,
};
use core_geometry::{Point, default_layer_maps, preset_6x3};

fn key_center(side: Side, label: &str) -> Point {
    let layout = preset_6x3();
    let maps = default_layer_maps(side);
    layout
        .bindings(side, &maps[0], &[])
        .iter()
        .find(|b| b.label == label)
        .unwrap()
        .rect
        .center()
}

fn frame_at(ticks: u64, device: u32, contacts: &[(u32, f32, f32, ContactPhase)]) -> RawFrame {
    RawFrame {
        device,
        ticks,
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

fn spawn_engine() -> (core_engine::EngineHandle, QueueConsumer, Arc<MonotonicClock>) {
    let (tx, rx) = DispatchQueue::bounded(4096);
    let engine = Engine::new(EngineSettings::default(), tx);
    let clock = Arc::new(MonotonicClock::new());
    let (handle, _join) = actor::spawn(engine, clock.clone());
    (handle, rx, clock)
}

#[tokio::test]
async fn tap_through_the_actor_dispatches() {
    let (handle, rx, clock) = spawn_engine();
    let a = key_center(Side::Left, "a");
    let t0 = clock.now_ticks();
    assert!(handle.ingest(frame_at(t0, 0, &[(1, a.x, a.y, ContactPhase::Making)])).await);
    assert!(
        handle
            .ingest(frame_at(
                t0 + 60_000_000,
                0,
                &[(1, a.x, a.y, ContactPhase::Touching)]
            ))
            .await
    );
    assert!(
        handle
            .ingest(frame_at(
                t0 + 70_000_000,
                0,
                &[(1, a.x, a.y, ContactPhase::Breaking)]
            ))
            .await
    );

    let snapshot = handle.status_snapshot().await.expect("snapshot");
    assert_eq!(snapshot.frames_processed, 3);
    assert_eq!(snapshot.live_contacts, 0);

    let ev = rx.try_dequeue(Duration::from_millis(100)).expect("tap event");
    assert_eq!(ev.kind, DispatchKind::KeyTap);
    handle.shutdown().await;
}

#[tokio::test]
async fn config_updates_apply_between_frames() {
    let (handle, _rx, _clock) = spawn_engine();
    assert!(handle.update(ConfigUpdate::Listening(false)).await);
    assert!(handle.update(ConfigUpdate::PersistentLayer(1)).await);
    let snapshot = handle.status_snapshot().await.expect("snapshot");
    assert!(!snapshot.listening);
    assert_eq!(snapshot.persistent_layer, 1);
    handle.shutdown().await;
}

#[tokio::test]
async fn reset_through_actor_is_idempotent() {
    let (handle, _rx, clock) = spawn_engine();
    let shift = key_center(Side::Left, "shift");
    let t0 = clock.now_ticks();
    handle
        .ingest(frame_at(t0, 0, &[(1, shift.x, shift.y, ContactPhase::Making)]))
        .await;
    handle
        .ingest(frame_at(
            t0 + 20_000_000,
            0,
            &[(1, shift.x, shift.y, ContactPhase::Touching)],
        ))
        .await;

    handle.reset(true).await;
    let first = handle.status_snapshot().await.expect("snapshot");
    handle.reset(true).await;
    let second = handle.status_snapshot().await.expect("snapshot");
    assert_eq!(first, second);
    assert_eq!(first.modifier_counts, [0, 0, 0, 0]);
    handle.shutdown().await;
}

#[tokio::test]
async fn repeat_timer_re_enters_without_frames() {
    let (handle, rx, clock) = spawn_engine();
    // Shorten the repeat cadence so the test stays quick.
    handle.update(ConfigUpdate::HoldThresholdSeconds(0.05)).await;
    let del = key_center(Side::Right, "delete");
    let t0 = clock.now_ticks();
    handle
        .ingest(frame_at(t0, 1, &[(7, del.x, del.y, ContactPhase::Making)]))
        .await;
    handle
        .ingest(frame_at(
            t0 + 80_000_000,
            1,
            &[(7, del.x, del.y, ContactPhase::Touching)],
        ))
        .await;

    // Initial hold tap arrives from the frame path.
    let first = rx.try_dequeue(Duration::from_millis(200)).expect("hold tap");
    assert_eq!(first.kind, DispatchKind::KeyTap);

    // With no further frames the timer task must deliver repeat KeyDowns
    // (350 ms initial delay, 85 ms interval).
    let repeat = rx
        .try_dequeue(Duration::from_millis(1500))
        .expect("timer-driven repeat");
    assert_eq!(repeat.kind, DispatchKind::KeyDown);
    assert!(repeat.repeat_token.is_some());

    handle
        .ingest(frame_at(
            clock.now_ticks(),
            1,
            &[(7, del.x, del.y, ContactPhase::Breaking)],
        ))
        .await;
    let snapshot = handle.status_snapshot().await.expect("snapshot");
    assert_eq!(snapshot.repeats_active, 0);
    handle.shutdown().await;
}
