use serde::{Deserialize, Serialize};
use crate::{NetsiftError, Result};

pub const LINKTYPE_ETHERNET: u32 = 1;
pub const LINKTYPE_RAW: u32 = 101;
pub const LINKTYPE_IPV4: u32 = 228;
pub const LINKTYPE_IPV6: u32 = 229;

/// tcpdump's default (and maximum) snapshot length, used when a header
/// declares zero.
const MAXIMUM_SNAPLEN: u32 = 262144;

const GLOBAL_HEADER_LEN: usize = 24;
const RECORD_HEADER_LEN: usize = 16;

const MAGIC_MICROS: u32 = 0xa1b2_c3d4;
const MAGIC_NANOS: u32 = 0xa1b2_3c4d;

/// One raw captured packet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Frame {
    pub ts_sec: i64,
    pub ts_usec: u32,
    pub original_length: u32,
    pub captured_length: u32,
    pub data: Vec<u8>,
}

impl Frame {
    pub fn new(ts_sec: i64, ts_usec: u32, original_length: u32, data: Vec<u8>) -> Self {
        Self {
            ts_sec,
            ts_usec,
            original_length,
            captured_length: data.len() as u32,
            data,
        }
    }

    pub fn is_truncated(&self) -> bool {
        self.captured_length < self.original_length
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ByteOrder {
    Little,
    Big,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TimestampPrecision {
    Micros,
    Nanos,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaptureHeader {
    pub byte_order: ByteOrder,
    pub precision: TimestampPrecision,
    pub version_major: u16,
    pub version_minor: u16,
    pub snaplen: u32,
    pub link_type: u32,
}

/// A record dropped for exceeding the snapshot length. Only produced when
/// the reader could still find the next record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameError {
    /// 1-based position of the record in the file.
    pub record: usize,
    pub offset: usize,
    pub reason: String,
}

#[derive(Debug, Clone)]
pub struct ParsedCapture {
    pub header: CaptureHeader,
    pub frames: Vec<Frame>,
    pub errors: Vec<FrameError>,
}

pub struct CaptureReader;

impl CaptureReader {
    pub fn parse(bytes: &[u8]) -> Result<ParsedCapture> {
        let header = Self::parse_header(bytes)?;
        let mut frames = Vec::new();
        let mut errors = Vec::new();
        let mut offset = GLOBAL_HEADER_LEN;
        let mut record = 0usize;

        while offset < bytes.len() {
            record += 1;
            let remaining = bytes.len() - offset;
            if remaining < RECORD_HEADER_LEN {
                return Err(NetsiftError::Format(format!(
                    "record {} header truncated at offset {} ({} of {} bytes)",
                    record, offset, remaining, RECORD_HEADER_LEN
                )));
            }

            let field = |at: usize| read_u32(&bytes[offset + at..offset + at + 4], header.byte_order);
            let ts_sec = field(0);
            let ts_frac = field(4);
            let incl_len = field(8) as usize;
            let orig_len = field(12);

            let body_start = offset + RECORD_HEADER_LEN;
            let body_end = body_start
                .checked_add(incl_len)
                .filter(|end| *end <= bytes.len())
                .ok_or_else(|| NetsiftError::Format(format!(
                    "record {} body truncated at offset {}: declares {} bytes, {} available",
                    record, body_start, incl_len, bytes.len() - body_start
                )))?;

            if incl_len > header.snaplen as usize {
                log::warn!(
                    "Skipping record {}: captured length {} exceeds snapshot length {}",
                    record, incl_len, header.snaplen
                );
                errors.push(FrameError {
                    record,
                    offset,
                    reason: format!(
                        "captured length {} exceeds snapshot length {}",
                        incl_len, header.snaplen
                    ),
                });
                offset = body_end;
                continue;
            }

            let ts_usec = match header.precision {
                TimestampPrecision::Micros => ts_frac,
                TimestampPrecision::Nanos => ts_frac / 1000,
            };

            frames.push(Frame {
                ts_sec: ts_sec as i64,
                ts_usec,
                original_length: orig_len,
                captured_length: incl_len as u32,
                data: bytes[body_start..body_end].to_vec(),
            });
            offset = body_end;
        }

        Ok(ParsedCapture {
            header,
            frames,
            errors,
        })
    }

    fn parse_header(bytes: &[u8]) -> Result<CaptureHeader> {
        if bytes.len() < GLOBAL_HEADER_LEN {
            return Err(NetsiftError::Format(format!(
                "file too short for a capture header ({} bytes)",
                bytes.len()
            )));
        }

        let magic_le = read_u32(&bytes[0..4], ByteOrder::Little);
        let magic_be = read_u32(&bytes[0..4], ByteOrder::Big);
        let (byte_order, precision) = match (magic_le, magic_be) {
            (MAGIC_MICROS, _) => (ByteOrder::Little, TimestampPrecision::Micros),
            (MAGIC_NANOS, _) => (ByteOrder::Little, TimestampPrecision::Nanos),
            (_, MAGIC_MICROS) => (ByteOrder::Big, TimestampPrecision::Micros),
            (_, MAGIC_NANOS) => (ByteOrder::Big, TimestampPrecision::Nanos),
            _ => {
                return Err(NetsiftError::Format(format!(
                    "unrecognized magic number: {:02x?}",
                    &bytes[0..4]
                )))
            }
        };

        let version_major = read_u16(&bytes[4..6], byte_order);
        let version_minor = read_u16(&bytes[6..8], byte_order);
        if version_major != 2 {
            return Err(NetsiftError::Format(format!(
                "unsupported capture version {}.{}",
                version_major, version_minor
            )));
        }

        let snaplen = match read_u32(&bytes[16..20], byte_order) {
            0 => MAXIMUM_SNAPLEN,
            n => n,
        };
        let link_type = read_u32(&bytes[20..24], byte_order) & 0x0fff_ffff;

        Ok(CaptureHeader {
            byte_order,
            precision,
            version_major,
            version_minor,
            snaplen,
            link_type,
        })
    }
}

/// Serialises frames as a little-endian, microsecond pcap container.
pub struct CaptureWriter;

impl CaptureWriter {
    pub fn write(frames: &[Frame], link_type: u32) -> Vec<u8> {
        let largest = frames.iter().map(|f| f.data.len() as u32).max().unwrap_or(0);
        let snaplen = largest.max(65535);
        let body: usize = frames.iter().map(|f| RECORD_HEADER_LEN + f.data.len()).sum();

        let mut out = Vec::with_capacity(GLOBAL_HEADER_LEN + body);
        out.extend_from_slice(&MAGIC_MICROS.to_le_bytes());
        out.extend_from_slice(&2u16.to_le_bytes());
        out.extend_from_slice(&4u16.to_le_bytes());
        out.extend_from_slice(&0i32.to_le_bytes()); // thiszone
        out.extend_from_slice(&0u32.to_le_bytes()); // sigfigs
        out.extend_from_slice(&snaplen.to_le_bytes());
        out.extend_from_slice(&link_type.to_le_bytes());

        for frame in frames {
            out.extend_from_slice(&classic_seconds(frame.ts_sec).to_le_bytes());
            out.extend_from_slice(&frame.ts_usec.to_le_bytes());
            out.extend_from_slice(&(frame.data.len() as u32).to_le_bytes());
            out.extend_from_slice(&frame.original_length.max(frame.data.len() as u32).to_le_bytes());
            out.extend_from_slice(&frame.data);
        }

        out
    }
}

/// Classic pcap stores unsigned 32-bit seconds; out-of-range times are
/// clamped to the representable span.
fn classic_seconds(ts_sec: i64) -> u32 {
    u32::try_from(ts_sec.clamp(0, i64::from(u32::MAX))).unwrap_or(u32::MAX)
}

fn read_u32(bytes: &[u8], order: ByteOrder) -> u32 {
    let raw = [bytes[0], bytes[1], bytes[2], bytes[3]];
    match order {
        ByteOrder::Little => u32::from_le_bytes(raw),
        ByteOrder::Big => u32::from_be_bytes(raw),
    }
}

fn read_u16(bytes: &[u8], order: ByteOrder) -> u16 {
    let raw = [bytes[0], bytes[1]];
    match order {
        ByteOrder::Little => u16::from_le_bytes(raw),
        ByteOrder::Big => u16::from_be_bytes(raw),
    }
}
