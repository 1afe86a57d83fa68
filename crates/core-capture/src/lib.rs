//! core-capture: ATPCAP capture files and deterministic replay.
//!
//! Captures exist only as test oracles: the reader tolerates both the v2
//! raw-HID record format and the v3 engine-frame format, the writer emits
//! v3, and the replay runner proves that two engine passes over the same
//! frames produce identical fingerprints and counters.

mod error;
pub mod fingerprint;
pub mod format;
pub mod frame;
pub mod replay;

pub use error::CaptureError;
pub use fingerprint::{DispatchHasher, Fnv64, IntentHasher, RawStreamHasher};
pub use format::{Capture, CaptureHeader, CaptureRecord, CaptureWriter, RecordHeader, SideHint};
pub use frame::FrameRecord;
pub use replay::{
    DecodedCapture, DecodedFrame, DeterminismReport, Fixture, PassOutput, ReplayMeta,
    ReplayRunner, decode_capture, encode_session,
};
