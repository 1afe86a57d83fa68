//! RFV3 engine-frame payload codec.
//!
//! Payload layout: magic `RFV3` (u32-LE 0x33564652) · sequence u64-LE ·
//! timestamp seconds f64-LE · device numeric id u64-LE · contact count
//! u16-LE · 2 reserved bytes · `count` 40-byte contact records (id i32 ·
//! x f32 · y f32 · six reserved f32 · state byte · 3 pad bytes). Our writer
//! stores the contact pressure in the first reserved f32 slot; readers that
//! predate it see zeros there, which decodes as zero pressure.

use core_events::{ContactPhase, RawContact, RawFrame};

use crate::error::CaptureError;

pub const FRAME_MAGIC: u32 = 0x3356_4652; // "RFV3"
pub const FRAME_HEADER_LEN: usize = 4 + 8 + 8 + 8 + 2 + 2;
pub const CONTACT_RECORD_LEN: usize = 40;

/// A decoded engine-level frame plus its capture-side identity.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameRecord {
    pub sequence: u64,
    pub device_id: u64,
    pub frame: RawFrame,
}

/// True when the payload leads with the RFV3 magic.
pub fn is_frame_payload(payload: &[u8]) -> bool {
    payload.len() >= 4
        && u32::from_le_bytes(payload[0..4].try_into().unwrap()) == FRAME_MAGIC
}

pub fn encode_frame(sequence: u64, device_id: u64, frame: &RawFrame, tick_hz: u64) -> Vec<u8> {
    let mut buf = Vec::with_capacity(FRAME_HEADER_LEN + frame.contacts.len() * CONTACT_RECORD_LEN);
    buf.extend_from_slice(&FRAME_MAGIC.to_le_bytes());
    buf.extend_from_slice(&sequence.to_le_bytes());
    let seconds = frame.ticks as f64 / tick_hz.max(1) as f64;
    buf.extend_from_slice(&seconds.to_le_bytes());
    buf.extend_from_slice(&device_id.to_le_bytes());
    buf.extend_from_slice(&(frame.contacts.len() as u16).to_le_bytes());
    buf.extend_from_slice(&[0u8; 2]);
    for contact in &frame.contacts {
        buf.extend_from_slice(&(contact.id as i32).to_le_bytes());
        buf.extend_from_slice(&contact.x.to_le_bytes());
        buf.extend_from_slice(&contact.y.to_le_bytes());
        buf.extend_from_slice(&contact.pressure.to_le_bytes());
        buf.extend_from_slice(&[0u8; 20]); // remaining reserved f32 slots
        buf.push(contact.phase.to_raw());
        buf.extend_from_slice(&[0u8; 3]);
    }
    buf
}

/// Decode an RFV3 payload. `base_offset` is the payload's position in the
/// capture, used only for error reporting.
pub fn decode_frame(
    payload: &[u8],
    device_index: u32,
    tick_hz: u64,
    base_offset: usize,
) -> Result<FrameRecord, CaptureError> {
    if !is_frame_payload(payload) {
        return Err(CaptureError::BadFrameMagic {
            offset: base_offset,
        });
    }
    if payload.len() < FRAME_HEADER_LEN {
        return Err(CaptureError::Truncated {
            offset: base_offset,
            needed: FRAME_HEADER_LEN,
            available: payload.len(),
        });
    }
    let sequence = u64::from_le_bytes(payload[4..12].try_into().unwrap());
    let seconds = f64::from_le_bytes(payload[12..20].try_into().unwrap());
    let device_id = u64::from_le_bytes(payload[20..28].try_into().unwrap());
    let count = u16::from_le_bytes(payload[28..30].try_into().unwrap()) as usize;

    let needed = FRAME_HEADER_LEN + count * CONTACT_RECORD_LEN;
    if payload.len() < needed {
        return Err(CaptureError::Truncated {
            offset: base_offset + FRAME_HEADER_LEN,
            needed,
            available: payload.len(),
        });
    }

    let mut contacts = Vec::with_capacity(count);
    for i in 0..count {
        let at = FRAME_HEADER_LEN + i * CONTACT_RECORD_LEN;
        let rec = &payload[at..at + CONTACT_RECORD_LEN];
        contacts.push(RawContact {
            id: i32::from_le_bytes(rec[0..4].try_into().unwrap()) as u32,
            x: f32::from_le_bytes(rec[4..8].try_into().unwrap()),
            y: f32::from_le_bytes(rec[8..12].try_into().unwrap()),
            pressure: f32::from_le_bytes(rec[12..16].try_into().unwrap()),
            phase: ContactPhase::from_raw(rec[36]),
        });
    }

    let ticks = (seconds * tick_hz.max(1) as f64).round() as u64;
    Ok(FrameRecord {
        sequence,
        device_id,
        frame: RawFrame {
            device: device_index,
            ticks,
            contacts,
        },
    })
}
