//! FNV-1a-style 64-bit rolling fingerprints over the three replay-visible
//! streams: raw frames, intent transitions, and dispatched events.

use core_engine::IntentTransition;
use core_events::{DispatchEvent, RawContact};

pub const FNV_OFFSET_BASIS: u64 = 0xCBF2_9CE4_8422_2325;
pub const FNV_PRIME: u64 = 0x0000_0100_0000_01B3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Fnv64(u64);

impl Default for Fnv64 {
    fn default() -> Self {
        Fnv64(FNV_OFFSET_BASIS)
    }
}

impl Fnv64 {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn write(&mut self, bytes: &[u8]) {
        for &b in bytes {
            self.0 ^= b as u64;
            self.0 = self.0.wrapping_mul(FNV_PRIME);
        }
    }

    pub fn write_u8(&mut self, v: u8) {
        self.write(&[v]);
    }

    pub fn write_u16(&mut self, v: u16) {
        self.write(&v.to_le_bytes());
    }

    pub fn write_u32(&mut self, v: u32) {
        self.write(&v.to_le_bytes());
    }

    pub fn write_u64(&mut self, v: u64) {
        self.write(&v.to_le_bytes());
    }

    pub fn write_i64(&mut self, v: i64) {
        self.write(&v.to_le_bytes());
    }

    pub fn write_f32(&mut self, v: f32) {
        self.write(&v.to_le_bytes());
    }

    pub fn finish(&self) -> u64 {
        self.0
    }
}

/// Raw-stream hash: device tag, report id, scan time, contact count, then
/// each contact's `(flags, id, x, y)` in record order.
#[derive(Debug, Default, Clone, Copy)]
pub struct RawStreamHasher {
    fnv: Fnv64,
}

impl RawStreamHasher {
    pub fn add_frame(
        &mut self,
        device_tag: u32,
        report_id: u64,
        scan_time_ticks: i64,
        contacts: &[RawContact],
    ) {
        self.fnv.write_u32(device_tag);
        self.fnv.write_u64(report_id);
        self.fnv.write_i64(scan_time_ticks);
        self.fnv.write_u16(contacts.len() as u16);
        for c in contacts {
            self.fnv.write_u8(c.phase.to_raw());
            self.fnv.write_u32(c.id);
            self.fnv.write_f32(c.x);
            self.fnv.write_f32(c.y);
        }
    }

    /// Opaque (non-RFV3) payloads contribute their raw bytes.
    pub fn add_opaque(&mut self, device_tag: u32, scan_time_ticks: i64, payload: &[u8]) {
        self.fnv.write_u32(device_tag);
        self.fnv.write_i64(scan_time_ticks);
        self.fnv.write(payload);
    }

    pub fn finish(&self) -> u64 {
        self.fnv.finish()
    }
}

/// Intent-transition hash: `(previous, current, reason)` names per edge.
#[derive(Debug, Default, Clone, Copy)]
pub struct IntentHasher {
    fnv: Fnv64,
}

impl IntentHasher {
    pub fn add(&mut self, transition: &IntentTransition) {
        self.fnv.write(transition.prev.name().as_bytes());
        self.fnv.write_u8(0xFF);
        self.fnv.write(transition.next.name().as_bytes());
        self.fnv.write_u8(0xFF);
        self.fnv.write(transition.reason.as_str().as_bytes());
        self.fnv.write_u8(0xFE);
    }

    pub fn finish(&self) -> u64 {
        self.fnv.finish()
    }
}

/// Dispatch hash over the fields the injector acts on.
#[derive(Debug, Default, Clone, Copy)]
pub struct DispatchHasher {
    fnv: Fnv64,
}

impl DispatchHasher {
    pub fn add(&mut self, event: &DispatchEvent) {
        self.fnv.write_u8(event.kind.tag());
        self.fnv.write_u16(event.virtual_key);
        self.fnv.write_u8(match event.mouse_button {
            None => 0,
            Some(core_events::MouseButton::Left) => 1,
            Some(core_events::MouseButton::Right) => 2,
            Some(core_events::MouseButton::Middle) => 3,
        });
        self.fnv.write_u8(event.side.index() as u8);
        self.fnv.write_u8(event.mod_flags.bits());
        self.fnv.write_u8(event.click_count);
        self.fnv.write(event.label.as_bytes());
        self.fnv.write_u8(0xFD);
    }

    pub fn finish(&self) -> u64 {
        self.fnv.finish()
    }
}
