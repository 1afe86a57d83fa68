//! Async boundary around the synchronous engine.
//!
//! All state mutation happens on one task: ingress frames and configuration
//! mutations arrive as messages in FIFO order and are processed to
//! completion one at a time. The repeat/grace timer runs as an independent
//! cooperative task that re-enters the actor only through `Tick` messages;
//! it never touches engine state directly.

use std::sync::Arc;

use core_events::{ClockPort, RawFrame, Side};
use core_geometry::{Binding, LayerMap, Layout};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::diag::StatusSnapshot;
use crate::engine::Engine;

pub const ENGINE_CHANNEL_CAP: usize = 1024;

/// One configuration mutator, applied between frames.
#[derive(Debug)]
pub enum ConfigUpdate {
    Layouts {
        left: (Layout, Vec<LayerMap>),
        right: (Layout, Vec<LayerMap>),
    },
    KeyMappings {
        left: Vec<LayerMap>,
        right: Vec<LayerMap>,
    },
    CustomButtons(Vec<Binding>),
    DeviceSide { device: u32, side: Side },
    Listening(bool),
    PersistentLayer(u8),
    HoldThresholdSeconds(f64),
    DragCancelMm(f64),
    TypingGraceMs(u64),
    IntentMoveThresholdMm(f64),
    IntentVelocityThresholdMmS(f64),
    AllowMouseTakeover(bool),
    ForceClickCapGrams(f64),
    HapticStrength(f32),
    SnapRadiusPercent(u16),
    ChordalShiftEnabled(bool),
    KeyboardModeEnabled(bool),
    KeymapEditingEnabled(bool),
    TapClickEnabled(bool),
    TapClickCadenceMs(u64),
}

impl ConfigUpdate {
    fn apply(self, engine: &mut Engine) {
        match self {
            ConfigUpdate::Layouts { left, right } => engine.update_layouts(left, right),
            ConfigUpdate::KeyMappings { left, right } => engine.update_key_mappings(left, right),
            ConfigUpdate::CustomButtons(buttons) => engine.update_custom_buttons(buttons),
            ConfigUpdate::DeviceSide { device, side } => engine.set_device_side(device, side),
            ConfigUpdate::Listening(on) => engine.set_listening(on),
            ConfigUpdate::PersistentLayer(layer) => engine.set_persistent_layer(layer),
            ConfigUpdate::HoldThresholdSeconds(s) => engine.update_hold_threshold(s),
            ConfigUpdate::DragCancelMm(mm) => engine.update_drag_cancel_distance(mm),
            ConfigUpdate::TypingGraceMs(ms) => engine.update_typing_grace(ms),
            ConfigUpdate::IntentMoveThresholdMm(mm) => engine.update_intent_move_threshold(mm),
            ConfigUpdate::IntentVelocityThresholdMmS(v) => {
                engine.update_intent_velocity_threshold(v)
            }
            ConfigUpdate::AllowMouseTakeover(allow) => engine.update_allow_mouse_takeover(allow),
            ConfigUpdate::ForceClickCapGrams(g) => engine.update_force_click_cap(g),
            ConfigUpdate::HapticStrength(s) => engine.update_haptic_strength(s),
            ConfigUpdate::SnapRadiusPercent(p) => engine.update_snap_radius_percent(p),
            ConfigUpdate::ChordalShiftEnabled(on) => engine.update_chordal_shift_enabled(on),
            ConfigUpdate::KeyboardModeEnabled(on) => engine.update_keyboard_mode_enabled(on),
            ConfigUpdate::KeymapEditingEnabled(on) => engine.set_keymap_editing_enabled(on),
            ConfigUpdate::TapClickEnabled(on) => engine.update_tap_click_enabled(on),
            ConfigUpdate::TapClickCadenceMs(ms) => engine.update_tap_click_cadence(ms),
        }
    }
}

#[derive(Debug)]
pub enum EngineMsg {
    Frame(RawFrame),
    /// Timer re-entry with the clock's current ticks.
    Tick(u64),
    Config(ConfigUpdate),
    Reset { stop_voice: bool },
    Snapshot(oneshot::Sender<StatusSnapshot>),
    Shutdown,
}

/// Cloneable message-passing handle to the engine actor.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineMsg>,
}

impl EngineHandle {
    pub async fn ingest(&self, frame: RawFrame) -> bool {
        self.tx.send(EngineMsg::Frame(frame)).await.is_ok()
    }

    /// Non-async ingress for the platform decoder thread. Returns false when
    /// the channel is full (frame dropped) or the actor is gone.
    pub fn try_ingest(&self, frame: RawFrame) -> bool {
        match self.tx.try_send(EngineMsg::Frame(frame)) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!(target: "engine.actor", "ingress_channel_full");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }

    pub async fn update(&self, update: ConfigUpdate) -> bool {
        self.tx.send(EngineMsg::Config(update)).await.is_ok()
    }

    pub async fn reset(&self, stop_voice: bool) -> bool {
        self.tx.send(EngineMsg::Reset { stop_voice }).await.is_ok()
    }

    pub async fn status_snapshot(&self) -> Option<StatusSnapshot> {
        let (reply_tx, reply_rx) = oneshot::channel();
        if self.tx.send(EngineMsg::Snapshot(reply_tx)).await.is_err() {
            return None;
        }
        reply_rx.await.ok()
    }

    pub async fn shutdown(&self) {
        let _ = self.tx.send(EngineMsg::Shutdown).await;
    }
}

/// Spawn the engine actor and its timer task.
pub fn spawn(mut engine: Engine, clock: Arc<dyn ClockPort>) -> (EngineHandle, JoinHandle<()>) {
    let (tx, mut rx) = mpsc::channel::<EngineMsg>(ENGINE_CHANNEL_CAP);
    let (deadline_tx, deadline_rx) = watch::channel::<Option<u64>>(None);

    let waker = tokio::spawn(deadline_waker(deadline_rx, tx.clone(), clock.clone()));

    let actor = tokio::spawn(async move {
        info!(target: "engine.actor", "actor_started");
        while let Some(msg) = rx.recv().await {
            match msg {
                EngineMsg::Frame(frame) => engine.ingest(&frame),
                EngineMsg::Tick(now) => engine.tick(now),
                EngineMsg::Config(update) => update.apply(&mut engine),
                EngineMsg::Reset { stop_voice } => engine.reset(stop_voice),
                EngineMsg::Snapshot(reply) => {
                    let _ = reply.send(engine.status_snapshot());
                }
                EngineMsg::Shutdown => break,
            }
            let deadline = match (engine.next_repeat_deadline(), engine.grace_deadline()) {
                (Some(a), Some(b)) => Some(a.min(b)),
                (a, b) => a.or(b),
            };
            let _ = deadline_tx.send(deadline);
        }
        waker.abort();
        debug!(target: "engine.actor", "actor_stopped");
    });

    (EngineHandle { tx }, actor)
}

/// Sleeps until the engine's next deadline and posts a `Tick`. Suspends on a
/// watch channel so a new deadline (or none) retargets the sleep instantly.
async fn deadline_waker(
    mut rx: watch::Receiver<Option<u64>>,
    tx: mpsc::Sender<EngineMsg>,
    clock: Arc<dyn ClockPort>,
) {
    loop {
        let target = *rx.borrow_and_update();
        match target {
            None => {
                if rx.changed().await.is_err() {
                    break;
                }
            }
            Some(deadline) => {
                let now = clock.now_ticks();
                if now >= deadline {
                    if tx.send(EngineMsg::Tick(clock.now_ticks())).await.is_err() {
                        break;
                    }
                    // Wait for the actor to publish the next deadline so a
                    // stale target cannot spin.
                    if rx.changed().await.is_err() {
                        break;
                    }
                } else {
                    let delta = deadline - now;
                    let hz = clock.tick_hz().max(1);
                    let wait = std::time::Duration::new(
                        delta / hz,
                        (delta % hz).saturating_mul(1_000_000_000).div_euclid(hz) as u32,
                    );
                    tokio::select! {
                        _ = tokio::time::sleep(wait) => {}
                        changed = rx.changed() => {
                            if changed.is_err() {
                                break;
                            }
                        }
                    }
                }
            }
        }
    }
}
