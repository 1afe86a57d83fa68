//! core-engine: the GlassToKey touch processing engine.
//!
//! Converts normalized multitouch frames into a synthetic keyboard/mouse
//! event stream. The crate is split into focused sub-modules:
//! * `table`    - open-addressed contact map (the hot-path collection)
//! * `intent`   - global typing/pointing/gesture classifier
//! * `contact`  - per-contact lifecycle state
//! * `modifier` - reference-counted modifiers + chord-shift latch
//! * `repeat`   - per-token auto-repeat scheduling
//! * `gesture`  - tap-click, five-finger swipe, corner holds
//! * `engine`   - the synchronous single-owner orchestrator
//! * `actor`    - tokio actor wrapper + timer task
//! * `diag`     - diagnostics tap and status snapshots
//!
//! The engine core is deliberately clock-free: callers stamp every frame
//! with monotonic ticks, and replaying a capture with the same stamps
//! reproduces the exact event stream.

pub mod actor;
pub mod contact;
pub mod diag;
pub mod engine;
pub mod gesture;
pub mod intent;
pub mod modifier;
pub mod repeat;
pub mod table;

pub use actor::{ConfigUpdate, EngineHandle, EngineMsg, spawn};
pub use contact::{ContactRecord, ContactState, DisqualifyReason};
pub use diag::{DiagnosticsTap, FrameSummary, StatusSnapshot};
pub use engine::Engine;
pub use gesture::{GestureEvent, SideGestures};
pub use intent::{IntentClassifier, IntentMode, IntentReason, IntentSample, IntentTransition};
pub use modifier::{ChordEdge, ChordShift, ModifierBank};
pub use repeat::RepeatScheduler;
pub use table::ContactTable;
