//! Core event types, ports, and channel plumbing for GlassToKey.
//!
//! This crate is the leaf of the workspace: it defines the normalized input
//! model delivered by the platform decoder (`RawFrame`), the synthetic output
//! model consumed by the injector (`DispatchEvent`), the port traits that
//! separate the engine from the OS (`EgressPort`, `HapticPort`, `VoicePort`,
//! `ClockPort`), and the bounded dispatch queue between them.

use std::fmt;
use std::sync::atomic::AtomicU64;

pub mod keycode;
pub mod queue;

pub use queue::{DispatchQueue, QueueConsumer, QueueMetrics, QueueProducer};

// -------------------------------------------------------------------------------------------------
// Telemetry
// -------------------------------------------------------------------------------------------------
// Simple atomic counters (no locking, fetch_add relaxed). Queue-local counters live on the queue
// itself so tests can observe isolated instances; these globals track whole-process totals and can
// be inspected in unit tests or periodically logged.
// -------------------------------------------------------------------------------------------------
pub static FRAMES_INGESTED: AtomicU64 = AtomicU64::new(0);
pub static FRAMES_IGNORED: AtomicU64 = AtomicU64::new(0); // not listening / missing layout
pub static EVENTS_EMITTED: AtomicU64 = AtomicU64::new(0);
pub static INTENT_TRANSITIONS: AtomicU64 = AtomicU64::new(0);
pub static MODIFIER_UNDERFLOWS: AtomicU64 = AtomicU64::new(0);

/// Trackpad side. Device indices map onto sides; every binding and every
/// dispatch event is tagged with the side it originated from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Side {
    Left,
    Right,
}

impl Side {
    pub const fn index(self) -> usize {
        match self {
            Side::Left => 0,
            Side::Right => 1,
        }
    }

    pub const fn opposite(self) -> Side {
        match self {
            Side::Left => Side::Right,
            Side::Right => Side::Left,
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Side::Left => "left",
            Side::Right => "right",
        }
    }

    pub const fn from_index(idx: usize) -> Side {
        if idx == 0 { Side::Left } else { Side::Right }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// -------------------------------------------------------------------------------------------------
// Contact identity
// -------------------------------------------------------------------------------------------------

/// Sole identity of a touch throughout its lifetime: `(device << 32) | contact_id`.
/// Totally ordered so tables and logs can sort deterministically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContactKey(pub u64);

impl ContactKey {
    pub const fn new(device: u32, contact_id: u32) -> Self {
        ContactKey(((device as u64) << 32) | contact_id as u64)
    }

    pub const fn device(self) -> u32 {
        (self.0 >> 32) as u32
    }

    pub const fn contact_id(self) -> u32 {
        self.0 as u32
    }
}

impl fmt::Display for ContactKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.device(), self.contact_id())
    }
}

/// Lifecycle tag reported per contact by the platform decoder. Mirrors the
/// hardware contact state machine; unknown tags are tolerated for forward
/// compatibility and treated as no-ops by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContactPhase {
    Starting,
    Making,
    Touching,
    Breaking,
    Leaving,
    Hovering,
    Lingering,
    NotTouching,
    Unknown(u8),
}

impl ContactPhase {
    pub const fn from_raw(raw: u8) -> Self {
        match raw {
            0 => ContactPhase::NotTouching,
            1 => ContactPhase::Starting,
            2 => ContactPhase::Hovering,
            3 => ContactPhase::Making,
            4 => ContactPhase::Touching,
            5 => ContactPhase::Breaking,
            6 => ContactPhase::Lingering,
            7 => ContactPhase::Leaving,
            other => ContactPhase::Unknown(other),
        }
    }

    pub const fn to_raw(self) -> u8 {
        match self {
            ContactPhase::NotTouching => 0,
            ContactPhase::Starting => 1,
            ContactPhase::Hovering => 2,
            ContactPhase::Making => 3,
            ContactPhase::Touching => 4,
            ContactPhase::Breaking => 5,
            ContactPhase::Lingering => 6,
            ContactPhase::Leaving => 7,
            ContactPhase::Unknown(other) => other,
        }
    }

    /// Finger is pressing the surface.
    pub const fn is_down(self) -> bool {
        matches!(self, ContactPhase::Making | ContactPhase::Touching)
    }

    /// Finger has left (or is leaving) the surface; the contact is over.
    pub const fn is_ending(self) -> bool {
        matches!(
            self,
            ContactPhase::Breaking
                | ContactPhase::Leaving
                | ContactPhase::Lingering
                | ContactPhase::NotTouching
        )
    }
}

/// One contact inside a frame. Positions are normalized to `[0,1]²` with the
/// vertical axis already flipped once at decode, so all engine math downstream
/// is origin-agnostic.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RawContact {
    pub id: u32,
    pub x: f32,
    pub y: f32,
    pub pressure: f32,
    pub phase: ContactPhase,
}

/// One normalized multitouch frame from one device. Frames are transient: the
/// engine consumes them to completion and never stores them.
#[derive(Debug, Clone, PartialEq)]
pub struct RawFrame {
    pub device: u32,
    /// Monotonic arrival time in high-resolution ticks. The engine never reads
    /// the wall clock; replay hands synthetic ticks through this field.
    pub ticks: u64,
    pub contacts: Vec<RawContact>,
}

impl RawFrame {
    pub fn contact_key(&self, contact: &RawContact) -> ContactKey {
        ContactKey::new(self.device, contact.id)
    }
}

// -------------------------------------------------------------------------------------------------
// Modifier flags
// -------------------------------------------------------------------------------------------------

bitflags::bitflags! {
    /// Modifier mask carried on key actions and computed from the live
    /// modifier counters.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
    pub struct ModFlags: u8 {
        const SHIFT   = 0b0000_0001;
        const CONTROL = 0b0000_0010;
        const OPTION  = 0b0000_0100;
        const COMMAND = 0b0000_1000;
    }
}

/// The four reference-counted modifier classes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ModifierKind {
    Shift,
    Control,
    Option,
    Command,
}

impl ModifierKind {
    pub const ALL: [ModifierKind; 4] = [
        ModifierKind::Shift,
        ModifierKind::Control,
        ModifierKind::Option,
        ModifierKind::Command,
    ];

    pub const fn index(self) -> usize {
        match self {
            ModifierKind::Shift => 0,
            ModifierKind::Control => 1,
            ModifierKind::Option => 2,
            ModifierKind::Command => 3,
        }
    }

    pub const fn flag(self) -> ModFlags {
        match self {
            ModifierKind::Shift => ModFlags::SHIFT,
            ModifierKind::Control => ModFlags::CONTROL,
            ModifierKind::Option => ModFlags::OPTION,
            ModifierKind::Command => ModFlags::COMMAND,
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            ModifierKind::Shift => "shift",
            ModifierKind::Control => "control",
            ModifierKind::Option => "option",
            ModifierKind::Command => "command",
        }
    }
}

// -------------------------------------------------------------------------------------------------
// Dispatch events
// -------------------------------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MouseButton {
    Left,
    Right,
    Middle,
}

impl MouseButton {
    pub const fn as_str(self) -> &'static str {
        match self {
            MouseButton::Left => "left",
            MouseButton::Right => "right",
            MouseButton::Middle => "middle",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DispatchKind {
    KeyTap,
    KeyDown,
    KeyUp,
    ModifierDown,
    ModifierUp,
    MouseButtonClick,
    MouseButtonDown,
    MouseButtonUp,
}

impl DispatchKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            DispatchKind::KeyTap => "key_tap",
            DispatchKind::KeyDown => "key_down",
            DispatchKind::KeyUp => "key_up",
            DispatchKind::ModifierDown => "modifier_down",
            DispatchKind::ModifierUp => "modifier_up",
            DispatchKind::MouseButtonClick => "mouse_click",
            DispatchKind::MouseButtonDown => "mouse_down",
            DispatchKind::MouseButtonUp => "mouse_up",
        }
    }

    /// Discriminant stable across runs; used by replay fingerprints.
    pub const fn tag(self) -> u8 {
        match self {
            DispatchKind::KeyTap => 0,
            DispatchKind::KeyDown => 1,
            DispatchKind::KeyUp => 2,
            DispatchKind::ModifierDown => 3,
            DispatchKind::ModifierUp => 4,
            DispatchKind::MouseButtonClick => 5,
            DispatchKind::MouseButtonDown => 6,
            DispatchKind::MouseButtonUp => 7,
        }
    }
}

/// Per-event delivery flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EventFlags {
    /// Event participates in an auto-repeat stream (carries `repeat_token`).
    pub repeatable: bool,
    /// Event should trigger a haptic pulse on delivery.
    pub haptic: bool,
}

/// Semantic classification attached for diagnostics, fixtures, and the keymap
/// editor probe path. Never consulted by the injector for real key synthesis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SemanticKind {
    Key,
    Modifier,
    Mouse,
    Layer,
    Toggle,
    /// Keymap-editing probe: the injector must not synthesize OS input.
    Probe,
}

impl SemanticKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            SemanticKind::Key => "key",
            SemanticKind::Modifier => "modifier",
            SemanticKind::Mouse => "mouse",
            SemanticKind::Layer => "layer",
            SemanticKind::Toggle => "toggle",
            SemanticKind::Probe => "probe",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Semantic {
    pub kind: SemanticKind,
    pub label: String,
}

/// One synthetic event handed to the injector.
#[derive(Debug, Clone, PartialEq)]
pub struct DispatchEvent {
    pub ticks: u64,
    pub kind: DispatchKind,
    pub virtual_key: u16,
    pub mouse_button: Option<MouseButton>,
    /// Opaque, monotonically increasing token tying a KeyDown to its ongoing
    /// auto-repeat stream. The injector treats a KeyDown with an already-seen
    /// token as a repeat, not a fresh press.
    pub repeat_token: Option<u64>,
    pub mod_flags: ModFlags,
    pub flags: EventFlags,
    pub side: Side,
    pub label: String,
    pub click_count: u8,
    pub semantic: Semantic,
}

impl DispatchEvent {
    pub fn key_tap(ticks: u64, side: Side, vk: u16, mod_flags: ModFlags, label: &str) -> Self {
        DispatchEvent {
            ticks,
            kind: DispatchKind::KeyTap,
            virtual_key: vk,
            mouse_button: None,
            repeat_token: None,
            mod_flags,
            flags: EventFlags {
                repeatable: false,
                haptic: true,
            },
            side,
            label: label.to_string(),
            click_count: 1,
            semantic: Semantic {
                kind: SemanticKind::Key,
                label: label.to_string(),
            },
        }
    }

    pub fn key_down_repeat(
        ticks: u64,
        side: Side,
        vk: u16,
        mod_flags: ModFlags,
        label: &str,
        token: u64,
    ) -> Self {
        DispatchEvent {
            ticks,
            kind: DispatchKind::KeyDown,
            virtual_key: vk,
            mouse_button: None,
            repeat_token: Some(token),
            mod_flags,
            flags: EventFlags {
                repeatable: true,
                haptic: false,
            },
            side,
            label: label.to_string(),
            click_count: 1,
            semantic: Semantic {
                kind: SemanticKind::Key,
                label: label.to_string(),
            },
        }
    }

    /// Terminates a repeat stream; carries the stream's token so the
    /// injector releases the right press.
    pub fn key_up(
        ticks: u64,
        side: Side,
        vk: u16,
        mod_flags: ModFlags,
        label: &str,
        token: Option<u64>,
    ) -> Self {
        DispatchEvent {
            ticks,
            kind: DispatchKind::KeyUp,
            virtual_key: vk,
            mouse_button: None,
            repeat_token: token,
            mod_flags,
            flags: EventFlags {
                repeatable: true,
                haptic: false,
            },
            side,
            label: label.to_string(),
            click_count: 1,
            semantic: Semantic {
                kind: SemanticKind::Key,
                label: label.to_string(),
            },
        }
    }

    pub fn modifier_edge(ticks: u64, side: Side, vk: u16, down: bool) -> Self {
        let kind = if down {
            DispatchKind::ModifierDown
        } else {
            DispatchKind::ModifierUp
        };
        let label = keycode::name(vk);
        DispatchEvent {
            ticks,
            kind,
            virtual_key: vk,
            mouse_button: None,
            repeat_token: None,
            mod_flags: ModFlags::empty(),
            flags: EventFlags {
                repeatable: false,
                haptic: down,
            },
            side,
            label: label.to_string(),
            click_count: 1,
            semantic: Semantic {
                kind: SemanticKind::Modifier,
                label: label.to_string(),
            },
        }
    }

    pub fn mouse_click(ticks: u64, side: Side, button: MouseButton, click_count: u8) -> Self {
        DispatchEvent {
            ticks,
            kind: DispatchKind::MouseButtonClick,
            virtual_key: 0,
            mouse_button: Some(button),
            repeat_token: None,
            mod_flags: ModFlags::empty(),
            flags: EventFlags {
                repeatable: false,
                haptic: true,
            },
            side,
            label: button.as_str().to_string(),
            click_count,
            semantic: Semantic {
                kind: SemanticKind::Mouse,
                label: button.as_str().to_string(),
            },
        }
    }

    pub fn mouse_edge(ticks: u64, side: Side, button: MouseButton, down: bool) -> Self {
        let kind = if down {
            DispatchKind::MouseButtonDown
        } else {
            DispatchKind::MouseButtonUp
        };
        DispatchEvent {
            ticks,
            kind,
            virtual_key: 0,
            mouse_button: Some(button),
            repeat_token: None,
            mod_flags: ModFlags::empty(),
            flags: EventFlags::default(),
            side,
            label: button.as_str().to_string(),
            click_count: 1,
            semantic: Semantic {
                kind: SemanticKind::Mouse,
                label: button.as_str().to_string(),
            },
        }
    }

    /// Rewrite the event as a keymap-editing probe: same shape, but the
    /// injector must surface it to the editor instead of synthesizing input.
    pub fn into_probe(mut self) -> Self {
        self.semantic.kind = SemanticKind::Probe;
        self
    }
}

// -------------------------------------------------------------------------------------------------
// Ports
// -------------------------------------------------------------------------------------------------

/// Implemented by the OS-side injector; receives events drained from the
/// dispatch queue by the egress thread. Must be idempotent for repeated
/// modifier balance and must honor `repeat_token`.
pub trait EgressPort: Send + 'static {
    fn inject(&mut self, event: DispatchEvent);
}

/// Best-effort haptic actuator handle; calls may be dropped under rate limit.
pub trait HapticPort: Send + Sync + 'static {
    fn play(&self, side: Side, strength: f32, device_id: Option<u32>);
}

/// Dictation toggle callback pair. The engine only ever begins or ends a
/// session; everything else about voice input is out of scope.
pub trait VoicePort: Send + Sync + 'static {
    fn begin_session(&self);
    fn end_session(&self);
}

/// Monotonic tick source for live operation. The engine core never calls
/// this; only the actor's timer tasks do, so replay stays deterministic.
pub trait ClockPort: Send + Sync + 'static {
    fn now_ticks(&self) -> u64;
    fn tick_hz(&self) -> u64;
}

/// `ClockPort` backed by `std::time::Instant`, in nanosecond ticks.
pub struct MonotonicClock {
    origin: std::time::Instant,
}

impl MonotonicClock {
    pub fn new() -> Self {
        MonotonicClock {
            origin: std::time::Instant::now(),
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl ClockPort for MonotonicClock {
    fn now_ticks(&self) -> u64 {
        self.origin.elapsed().as_nanos() as u64
    }

    fn tick_hz(&self) -> u64 {
        1_000_000_000
    }
}

/// Helper result type for port glue.
pub type EventResult<T> = anyhow::Result<T>;
