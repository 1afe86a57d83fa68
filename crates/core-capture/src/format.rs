//! ATPCAP container parsing and writing.
//!
//! Layout:
//! * Header (20 bytes): magic `ATPCAP01` · version u32-LE · tick frequency
//!   i64-LE.
//! * V2 record header (32 bytes): payload length i32-LE · arrival ticks
//!   i64-LE · device index i32-LE · device hash u32-LE · vendor u32-LE ·
//!   product u32-LE · usage page u16-LE · usage u16-LE, followed by the
//!   payload bytes.
//! * V3 record header (34 bytes): the V2 header plus a side-hint byte
//!   {0=unknown, 1=left, 2=right} and a decoder-profile byte.
//!
//! Version 2 payloads are raw HID reports (opaque here); version 3 payloads
//! are engine-level RFV3 frames or JSON meta records.

use core_events::Side;
use tracing::debug;

use crate::error::CaptureError;

pub const CAPTURE_MAGIC: &[u8; 8] = b"ATPCAP01";
pub const HEADER_LEN: usize = 20;
pub const V2_RECORD_HEADER_LEN: usize = 32;
pub const V3_RECORD_HEADER_LEN: usize = 34;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureHeader {
    pub version: u32,
    pub tick_hz: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SideHint {
    Unknown,
    Left,
    Right,
}

impl SideHint {
    pub const fn from_raw(raw: u8) -> SideHint {
        match raw {
            1 => SideHint::Left,
            2 => SideHint::Right,
            _ => SideHint::Unknown,
        }
    }

    pub const fn to_raw(self) -> u8 {
        match self {
            SideHint::Unknown => 0,
            SideHint::Left => 1,
            SideHint::Right => 2,
        }
    }

    pub const fn side(self) -> Option<Side> {
        match self {
            SideHint::Left => Some(Side::Left),
            SideHint::Right => Some(Side::Right),
            SideHint::Unknown => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordHeader {
    pub ticks: i64,
    pub device_index: i32,
    pub device_hash: u32,
    pub vendor: u32,
    pub product: u32,
    pub usage_page: u16,
    pub usage: u16,
    pub side_hint: SideHint,
    pub decoder_profile: u8,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureRecord {
    /// Byte offset of the record header within the capture (diagnostics).
    pub offset: usize,
    pub header: RecordHeader,
    pub payload: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Capture {
    pub header: CaptureHeader,
    pub records: Vec<CaptureRecord>,
}

struct Cursor<'a> {
    bytes: &'a [u8],
    offset: usize,
}

impl<'a> Cursor<'a> {
    fn take(&mut self, n: usize) -> Result<&'a [u8], CaptureError> {
        if self.offset + n > self.bytes.len() {
            return Err(CaptureError::Truncated {
                offset: self.offset,
                needed: n,
                available: self.bytes.len() - self.offset,
            });
        }
        let out = &self.bytes[self.offset..self.offset + n];
        self.offset += n;
        Ok(out)
    }

    fn u16_le(&mut self) -> Result<u16, CaptureError> {
        Ok(u16::from_le_bytes(self.take(2)?.try_into().unwrap()))
    }

    fn u32_le(&mut self) -> Result<u32, CaptureError> {
        Ok(u32::from_le_bytes(self.take(4)?.try_into().unwrap()))
    }

    fn i32_le(&mut self) -> Result<i32, CaptureError> {
        Ok(i32::from_le_bytes(self.take(4)?.try_into().unwrap()))
    }

    fn i64_le(&mut self) -> Result<i64, CaptureError> {
        Ok(i64::from_le_bytes(self.take(8)?.try_into().unwrap()))
    }

    fn u8(&mut self) -> Result<u8, CaptureError> {
        Ok(self.take(1)?[0])
    }

    fn eof(&self) -> bool {
        self.offset >= self.bytes.len()
    }
}

/// Parse a whole capture from bytes.
pub fn read_capture(bytes: &[u8]) -> Result<Capture, CaptureError> {
    let mut cur = Cursor { bytes, offset: 0 };
    let magic = cur.take(8)?;
    if magic != CAPTURE_MAGIC {
        return Err(CaptureError::BadMagic { offset: 0 });
    }
    let version = cur.u32_le()?;
    if version != 2 && version != 3 {
        return Err(CaptureError::UnsupportedVersion { version });
    }
    let tick_hz = cur.i64_le()?;
    let header = CaptureHeader { version, tick_hz };

    let mut records = Vec::new();
    while !cur.eof() {
        let offset = cur.offset;
        let payload_len = cur.i32_le()?;
        if payload_len < 0 {
            return Err(CaptureError::NegativeLength {
                offset,
                len: payload_len,
            });
        }
        let ticks = cur.i64_le()?;
        let device_index = cur.i32_le()?;
        let device_hash = cur.u32_le()?;
        let vendor = cur.u32_le()?;
        let product = cur.u32_le()?;
        let usage_page = cur.u16_le()?;
        let usage = cur.u16_le()?;
        let (side_hint, decoder_profile) = if version >= 3 {
            (SideHint::from_raw(cur.u8()?), cur.u8()?)
        } else {
            (SideHint::Unknown, 0)
        };
        let payload = cur.take(payload_len as usize)?.to_vec();
        records.push(CaptureRecord {
            offset,
            header: RecordHeader {
                ticks,
                device_index,
                device_hash,
                vendor,
                product,
                usage_page,
                usage,
                side_hint,
                decoder_profile,
            },
            payload,
        });
    }

    debug!(
        target: "capture",
        version,
        tick_hz,
        records = records.len(),
        "capture_parsed"
    );
    Ok(Capture { header, records })
}

/// Serializes a v3 capture.
pub struct CaptureWriter {
    buf: Vec<u8>,
}

impl CaptureWriter {
    pub fn new(tick_hz: i64) -> Self {
        let mut buf = Vec::with_capacity(1024);
        buf.extend_from_slice(CAPTURE_MAGIC);
        buf.extend_from_slice(&3u32.to_le_bytes());
        buf.extend_from_slice(&tick_hz.to_le_bytes());
        CaptureWriter { buf }
    }

    pub fn push_record(&mut self, header: &RecordHeader, payload: &[u8]) {
        self.buf
            .extend_from_slice(&(payload.len() as i32).to_le_bytes());
        self.buf.extend_from_slice(&header.ticks.to_le_bytes());
        self.buf
            .extend_from_slice(&header.device_index.to_le_bytes());
        self.buf.extend_from_slice(&header.device_hash.to_le_bytes());
        self.buf.extend_from_slice(&header.vendor.to_le_bytes());
        self.buf.extend_from_slice(&header.product.to_le_bytes());
        self.buf.extend_from_slice(&header.usage_page.to_le_bytes());
        self.buf.extend_from_slice(&header.usage.to_le_bytes());
        self.buf.push(header.side_hint.to_raw());
        self.buf.push(header.decoder_profile);
        self.buf.extend_from_slice(payload);
    }

    pub fn finish(self) -> Vec<u8> {
        self.buf
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn header(ticks: i64, device: i32) -> RecordHeader {
        RecordHeader {
            ticks,
            device_index: device,
            device_hash: 0xDEAD_0001,
            vendor: 0x05AC,
            product: 0x0265,
            usage_page: 0x000D,
            usage: 0x0005,
            side_hint: SideHint::Left,
            decoder_profile: 1,
        }
    }

    #[test]
    fn v3_container_round_trips() {
        let mut w = CaptureWriter::new(1_000_000_000);
        w.push_record(&header(100, 0), b"hello");
        w.push_record(&header(200, 1), b"");
        let bytes = w.finish();

        let cap = read_capture(&bytes).unwrap();
        assert_eq!(cap.header.version, 3);
        assert_eq!(cap.header.tick_hz, 1_000_000_000);
        assert_eq!(cap.records.len(), 2);
        assert_eq!(cap.records[0].payload, b"hello");
        assert_eq!(cap.records[0].header, header(100, 0));
        assert_eq!(cap.records[1].header.device_index, 1);
    }

    #[test]
    fn bad_magic_is_reported_at_offset_zero() {
        let err = read_capture(b"NOTACAP0....").unwrap_err();
        assert!(matches!(err, CaptureError::BadMagic { offset: 0 }));
    }

    #[test]
    fn unsupported_version_is_rejected() {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(CAPTURE_MAGIC);
        bytes.extend_from_slice(&9u32.to_le_bytes());
        bytes.extend_from_slice(&1_000_000i64.to_le_bytes());
        let err = read_capture(&bytes).unwrap_err();
        assert!(matches!(err, CaptureError::UnsupportedVersion { version: 9 }));
    }

    #[test]
    fn truncated_record_carries_offset() {
        let mut w = CaptureWriter::new(1_000_000);
        w.push_record(&header(1, 0), b"full payload");
        let mut bytes = w.finish();
        bytes.truncate(bytes.len() - 4);
        let err = read_capture(&bytes).unwrap_err();
        match err {
            CaptureError::Truncated { offset, .. } => assert_eq!(offset, HEADER_LEN + V3_RECORD_HEADER_LEN),
            other => panic!("expected truncation, got {other}"),
        }
    }

    #[test]
    fn v2_records_parse_without_hint_bytes() {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(CAPTURE_MAGIC);
        bytes.extend_from_slice(&2u32.to_le_bytes());
        bytes.extend_from_slice(&24_000_000i64.to_le_bytes());
        // One v2 record: 3-byte payload.
        bytes.extend_from_slice(&3i32.to_le_bytes());
        bytes.extend_from_slice(&42i64.to_le_bytes());
        bytes.extend_from_slice(&0i32.to_le_bytes());
        bytes.extend_from_slice(&7u32.to_le_bytes());
        bytes.extend_from_slice(&1u32.to_le_bytes());
        bytes.extend_from_slice(&2u32.to_le_bytes());
        bytes.extend_from_slice(&13u16.to_le_bytes());
        bytes.extend_from_slice(&5u16.to_le_bytes());
        bytes.extend_from_slice(&[0xAA, 0xBB, 0xCC]);

        let cap = read_capture(&bytes).unwrap();
        assert_eq!(cap.header.version, 2);
        assert_eq!(cap.records.len(), 1);
        assert_eq!(cap.records[0].header.side_hint, SideHint::Unknown);
        assert_eq!(cap.records[0].payload, vec![0xAA, 0xBB, 0xCC]);
    }

    #[test]
    fn negative_payload_length_is_fatal() {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(CAPTURE_MAGIC);
        bytes.extend_from_slice(&3u32.to_le_bytes());
        bytes.extend_from_slice(&1i64.to_le_bytes());
        bytes.extend_from_slice(&(-5i32).to_le_bytes());
        bytes.extend_from_slice(&[0u8; 30]);
        let err = read_capture(&bytes).unwrap_err();
        assert!(matches!(err, CaptureError::NegativeLength { len: -5, .. }));
    }
}
