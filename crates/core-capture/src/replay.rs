//! Capture decoding, deterministic two-pass replay, and fixtures.
//!
//! A replay builds a fresh engine per pass, feeds it the decoded frames in
//! capture order with their original tick stamps, and folds everything
//! observable into three fingerprints. Determinism demands the triple (and
//! the counter outputs) match across passes bit for bit.

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use core_config::EngineSettings;
use core_engine::{Engine, StatusSnapshot};
use core_events::{RawFrame, Side, queue::DispatchQueue};

use crate::error::CaptureError;
use crate::fingerprint::{DispatchHasher, IntentHasher, RawStreamHasher};
use crate::format::{self, CaptureRecord, CaptureWriter, RecordHeader, SideHint};
use crate::frame;

pub const META_SCHEMA: &str = "g2k-replay-v1";

/// JSON meta record embedded alongside frames.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplayMeta {
    #[serde(rename = "type")]
    pub kind: String,
    pub schema: String,
    #[serde(rename = "capturedAt")]
    pub captured_at: String,
    pub platform: String,
    pub source: String,
    #[serde(rename = "framesCaptured")]
    pub frames_captured: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DecodedFrame {
    pub device_hash: u32,
    pub sequence: u64,
    pub side: Option<Side>,
    pub frame: RawFrame,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DecodedCapture {
    pub version: u32,
    pub tick_hz: u64,
    pub frames: Vec<DecodedFrame>,
    pub meta: Option<ReplayMeta>,
    /// Records whose payloads are raw HID reports we do not decode (v2).
    pub opaque_records: usize,
    pub raw_fingerprint: u64,
}

/// Decode a capture byte stream into engine frames plus the raw-stream hash.
pub fn decode_capture(bytes: &[u8]) -> Result<DecodedCapture, CaptureError> {
    let capture = format::read_capture(bytes)?;
    let mut raw = RawStreamHasher::default();
    let mut frames = Vec::new();
    let mut meta = None;
    let mut opaque = 0usize;

    for record in &capture.records {
        let CaptureRecord {
            offset,
            header,
            payload,
        } = record;
        if frame::is_frame_payload(payload) {
            let decoded = frame::decode_frame(
                payload,
                header.device_index.max(0) as u32,
                capture.header.tick_hz.max(1) as u64,
                *offset,
            )?;
            raw.add_frame(
                header.device_hash,
                decoded.sequence,
                header.ticks,
                &decoded.frame.contacts,
            );
            frames.push(DecodedFrame {
                device_hash: header.device_hash,
                sequence: decoded.sequence,
                side: header.side_hint.side(),
                frame: decoded.frame,
            });
        } else if payload.first() == Some(&b'{') {
            let parsed: ReplayMeta =
                serde_json::from_slice(payload).map_err(|source| CaptureError::Meta {
                    offset: *offset,
                    source,
                })?;
            raw.add_opaque(header.device_hash, header.ticks, payload);
            if parsed.kind == "meta" && parsed.schema == META_SCHEMA {
                meta = Some(parsed);
            }
        } else {
            // Raw HID payload (v2): fingerprint material only.
            raw.add_opaque(header.device_hash, header.ticks, payload);
            opaque += 1;
        }
    }

    debug!(
        target: "capture.replay",
        frames = frames.len(),
        opaque,
        has_meta = meta.is_some(),
        "capture_decoded"
    );
    Ok(DecodedCapture {
        version: capture.header.version,
        tick_hz: capture.header.tick_hz.max(1) as u64,
        frames,
        meta,
        opaque_records: opaque,
        raw_fingerprint: raw.finish(),
    })
}

/// Everything one replay pass produced.
#[derive(Debug, Clone, PartialEq)]
pub struct PassOutput {
    pub raw_fingerprint: u64,
    pub intent_fingerprint: u64,
    pub dispatch_fingerprint: u64,
    pub events_dispatched: u64,
    pub status: StatusSnapshot,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DeterminismReport {
    pub first: PassOutput,
    pub second: PassOutput,
    pub mismatches: Vec<String>,
}

impl DeterminismReport {
    pub fn deterministic(&self) -> bool {
        self.mismatches.is_empty()
    }
}

pub struct ReplayRunner {
    decoded: DecodedCapture,
    settings: EngineSettings,
}

impl ReplayRunner {
    pub fn new(decoded: DecodedCapture, mut settings: EngineSettings) -> Self {
        settings.tick_hz = decoded.tick_hz;
        ReplayRunner { decoded, settings }
    }

    pub fn from_bytes(bytes: &[u8], settings: EngineSettings) -> Result<Self, CaptureError> {
        Ok(Self::new(decode_capture(bytes)?, settings))
    }

    pub fn decoded(&self) -> &DecodedCapture {
        &self.decoded
    }

    /// Run the decoded frame stream through a freshly seeded engine.
    pub fn run_pass(&self) -> PassOutput {
        let (tx, rx) = DispatchQueue::bounded(self.settings.queue_capacity);
        let mut engine = Engine::new(self.settings.clone(), tx);
        for decoded in &self.decoded.frames {
            if let Some(side) = decoded.side {
                engine.set_device_side(decoded.frame.device, side);
            }
        }

        let mut intent = IntentHasher::default();
        let mut dispatch = DispatchHasher::default();
        let mut events_dispatched = 0u64;

        for decoded in &self.decoded.frames {
            engine.ingest(&decoded.frame);
            // Drain per frame so the diagnostics ring never wraps.
            for t in engine.take_transitions() {
                intent.add(&t);
            }
            for ev in rx.drain() {
                dispatch.add(&ev);
                events_dispatched += 1;
            }
        }

        PassOutput {
            raw_fingerprint: self.decoded.raw_fingerprint,
            intent_fingerprint: intent.finish(),
            dispatch_fingerprint: dispatch.finish(),
            events_dispatched,
            status: engine.status_snapshot(),
        }
    }

    /// Run twice with identical seed configuration and compare everything.
    pub fn verify_determinism(&self) -> DeterminismReport {
        let first = self.run_pass();
        let second = self.run_pass();
        let mut mismatches = Vec::new();
        if first.raw_fingerprint != second.raw_fingerprint {
            mismatches.push(format!(
                "raw fingerprint: {:016x} != {:016x}",
                first.raw_fingerprint, second.raw_fingerprint
            ));
        }
        if first.intent_fingerprint != second.intent_fingerprint {
            mismatches.push(format!(
                "intent fingerprint: {:016x} != {:016x}",
                first.intent_fingerprint, second.intent_fingerprint
            ));
        }
        if first.dispatch_fingerprint != second.dispatch_fingerprint {
            mismatches.push(format!(
                "dispatch fingerprint: {:016x} != {:016x}",
                first.dispatch_fingerprint, second.dispatch_fingerprint
            ));
        }
        if first.events_dispatched != second.events_dispatched {
            mismatches.push(format!(
                "events dispatched: {} != {}",
                first.events_dispatched, second.events_dispatched
            ));
        }
        if first.status != second.status {
            mismatches.push("status snapshot mismatch".to_string());
        }
        info!(
            target: "capture.replay",
            deterministic = mismatches.is_empty(),
            events = first.events_dispatched,
            "determinism_verified"
        );
        DeterminismReport {
            first,
            second,
            mismatches,
        }
    }
}

// -------------------------------------------------------------------------------------------------
// Capture authoring (tests and the self-test path)
// -------------------------------------------------------------------------------------------------

/// Serialize engine-level frames into a v3 capture.
pub fn encode_session(
    tick_hz: u64,
    frames: &[(Option<Side>, RawFrame)],
    meta: Option<&ReplayMeta>,
) -> Vec<u8> {
    let mut writer = CaptureWriter::new(tick_hz as i64);
    for (sequence, (side, frame)) in frames.iter().enumerate() {
        let payload = frame::encode_frame(sequence as u64, frame.device as u64, frame, tick_hz);
        writer.push_record(
            &RecordHeader {
                ticks: frame.ticks as i64,
                device_index: frame.device as i32,
                device_hash: 0x6721_0000 ^ frame.device,
                vendor: 0x05AC,
                product: 0x0265,
                usage_page: 0x000D,
                usage: 0x0005,
                side_hint: match side {
                    Some(Side::Left) => SideHint::Left,
                    Some(Side::Right) => SideHint::Right,
                    None => SideHint::Unknown,
                },
                decoder_profile: 1,
            },
            &payload,
        );
    }
    if let Some(meta) = meta {
        let payload = serde_json::to_vec(meta).expect("meta serializes");
        writer.push_record(
            &RecordHeader {
                ticks: 0,
                device_index: -1,
                device_hash: 0,
                vendor: 0,
                product: 0,
                usage_page: 0,
                usage: 0,
                side_hint: SideHint::Unknown,
                decoder_profile: 0,
            },
            &payload,
        );
    }
    writer.finish()
}

// -------------------------------------------------------------------------------------------------
// Fixtures
// -------------------------------------------------------------------------------------------------

pub const FIXTURE_SCHEMA: &str = "g2k-fixture-v1";

/// Persisted expectation for a capture replay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fixture {
    pub schema: String,
    pub raw: String,
    pub intent: String,
    pub dispatch: String,
    pub events: u64,
}

impl Fixture {
    pub fn from_pass(pass: &PassOutput) -> Self {
        Fixture {
            schema: FIXTURE_SCHEMA.to_string(),
            raw: format!("{:016x}", pass.raw_fingerprint),
            intent: format!("{:016x}", pass.intent_fingerprint),
            dispatch: format!("{:016x}", pass.dispatch_fingerprint),
            events: pass.events_dispatched,
        }
    }

    /// Field-by-field comparison; returns one line per mismatch.
    pub fn compare(&self, pass: &PassOutput) -> Vec<String> {
        let actual = Fixture::from_pass(pass);
        let mut out = Vec::new();
        if self.schema != actual.schema {
            out.push(format!("schema: {} != {}", self.schema, actual.schema));
        }
        for (name, want, got) in [
            ("raw", &self.raw, &actual.raw),
            ("intent", &self.intent, &actual.intent),
            ("dispatch", &self.dispatch, &actual.dispatch),
        ] {
            if want != got {
                out.push(format!("{name}: fixture {want} != replay {got}"));
            }
        }
        if self.events != actual.events {
            out.push(format!(
                "events: fixture {} != replay {}",
                self.events, actual.events
            ));
        }
        out
    }
}
