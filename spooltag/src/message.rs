//! NDEF message framing.
//!
//! Every record is laid out as:
//! ```text
//! ┌───────┬──────────┬─────────────┬───────────┬──────┬────┬─────────┐
//! │ Flags │ Type len │ Payload len │ ID len    │ Type │ ID │ Payload │
//! │ 1 byte│ 1 byte   │ 1 or 4 bytes│ 0 or 1    │      │    │         │
//! └───────┴──────────┴─────────────┴───────────┴──────┴────┴─────────┘
//! ```
//! The payload length is a single byte for short records (`SR`) and a big
//! endian u32 otherwise. The ID length is only present when `IL` is set.
//!
//! Decoding is lenient: anything that cannot be classified is skipped and the
//! records that could be read are returned in tag order.

use crate::record::{Checksum, MaterialRecord, RecordKind, SpoolRecord, StatRecord};

/// Flag bits of the first header byte.
pub mod flags {
    /// Message begin.
    pub const MB: u8 = 0b1000_0000;
    /// Message end.
    pub const ME: u8 = 0b0100_0000;
    /// Chunk flag.
    pub const CF: u8 = 0b0010_0000;
    /// Short record, payload length fits a single byte.
    pub const SR: u8 = 0b0001_0000;
    /// ID length field present.
    pub const IL: u8 = 0b0000_1000;
    pub const TNF_MASK: u8 = 0b0000_0111;

    #[inline]
    pub fn has_flag(flags: u8, flag: u8) -> bool {
        flags & flag != 0
    }
}

const WELL_KNOWN_PREFIX: &str = "urn:nfc:wkt:";
const EXTERNAL_PREFIX: &str = "urn:nfc:ext:";

/// Type name format, the low three bits of the flags byte.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tnf {
    Empty = 0,
    WellKnown = 1,
    Media = 2,
    AbsoluteUri = 3,
    External = 4,
    Unknown = 5,
    Unchanged = 6,
    Reserved = 7,
}
impl Tnf {
    pub const fn from_flags(flags: u8) -> Self {
        match flags & flags::TNF_MASK {
            0 => Tnf::Empty,
            1 => Tnf::WellKnown,
            2 => Tnf::Media,
            3 => Tnf::AbsoluteUri,
            4 => Tnf::External,
            5 => Tnf::Unknown,
            6 => Tnf::Unchanged,
            _ => Tnf::Reserved,
        }
    }
}

/// Splits a `urn:nfc:` type identifier into the TNF and the type bytes that
/// go on the wire.
pub fn split_type_id(type_id: &str) -> (Tnf, &str) {
    if let Some(name) = type_id.strip_prefix(WELL_KNOWN_PREFIX) {
        (Tnf::WellKnown, name)
    } else if let Some(name) = type_id.strip_prefix(EXTERNAL_PREFIX) {
        (Tnf::External, name)
    } else {
        (Tnf::AbsoluteUri, type_id)
    }
}

/// Inverse of [`split_type_id`] for the formats spool records use.
pub fn join_type_id(tnf: Tnf, name: &[u8]) -> Option<String> {
    let prefix = match tnf {
        Tnf::WellKnown => WELL_KNOWN_PREFIX,
        Tnf::External => EXTERNAL_PREFIX,
        _ => return None,
    };
    let name = std::str::from_utf8(name).ok()?;
    Some(format!("{prefix}{name}"))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordHeader {
    pub flags: u8,
    pub type_length: u8,
    pub payload_length: u32,
    pub id_length: u8,
}
impl RecordHeader {
    pub const fn tnf(&self) -> Tnf {
        Tnf::from_flags(self.flags)
    }
    pub const fn is_short(&self) -> bool {
        self.flags & flags::SR != 0
    }
    pub const fn has_id(&self) -> bool {
        self.flags & flags::IL != 0
    }

    /// Bytes taken by the header itself.
    pub const fn header_len(&self) -> usize {
        2 + if self.is_short() { 1 } else { 4 } + if self.has_id() { 1 } else { 0 }
    }
    /// Header, type, ID and payload together.
    pub fn record_len(&self) -> usize {
        self.header_len() + usize::from(self.type_length) + usize::from(self.id_length) + self.payload_length as usize
    }

    /// Returns `None` if `buf` is too short to hold the header.
    pub fn decode(buf: &[u8]) -> Option<Self> {
        let (&flags, rest) = buf.split_first()?;
        let (&type_length, rest) = rest.split_first()?;
        let (payload_length, rest) = if flags::has_flag(flags, flags::SR) {
            let (&len, rest) = rest.split_first()?;
            (u32::from(len), rest)
        } else {
            let (len, rest) = rest.split_first_chunk::<4>()?;
            (u32::from_be_bytes(*len), rest)
        };
        let id_length = if flags::has_flag(flags, flags::IL) {
            *rest.first()?
        } else {
            0
        };
        Some(Self {
            flags,
            type_length,
            payload_length,
            id_length,
        })
    }

    pub fn encode_into(&self, out: &mut Vec<u8>) {
        out.push(self.flags);
        out.push(self.type_length);
        if self.is_short() {
            out.push(self.payload_length as u8);
        } else {
            out.extend_from_slice(&self.payload_length.to_be_bytes());
        }
        if self.has_id() {
            out.push(self.id_length);
        }
    }
}

/// Frames `records` into one NDEF message.
///
/// An empty slice produces the single empty record NDEF uses for an empty
/// message.
pub fn encode_message(records: &[SpoolRecord]) -> Vec<u8> {
    if records.is_empty() {
        return vec![flags::MB | flags::ME | flags::SR | Tnf::Empty as u8, 0, 0];
    }
    let mut out = Vec::new();
    let last = records.len() - 1;
    for (index, record) in records.iter().enumerate() {
        let kind = record.kind();
        let (tnf, name) = split_type_id(kind.type_id());
        let id = kind.name();
        let payload = record.encode_payload();

        let mut header_flags = tnf as u8;
        if index == 0 {
            header_flags |= flags::MB;
        }
        if index == last {
            header_flags |= flags::ME;
        }
        if payload.len() < 256 {
            header_flags |= flags::SR;
        }
        if !id.is_empty() {
            header_flags |= flags::IL;
        }
        let header = RecordHeader {
            flags: header_flags,
            type_length: name.len() as u8,
            payload_length: payload.len() as u32,
            id_length: id.len() as u8,
        };
        header.encode_into(&mut out);
        out.extend_from_slice(name.as_bytes());
        out.extend_from_slice(id.as_bytes());
        out.extend_from_slice(&payload);
    }
    out
}

/// Records recovered from a raw tag buffer.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde_derive::Serialize)]
pub struct DecodedMessage {
    pub records: Vec<SpoolRecord>,
    /// Records that were present but could not be classified or decoded.
    pub skipped: usize,
    /// At least one stat record carried a CRC8 that did not match its content.
    pub checksum_mismatch: bool,
}
impl DecodedMessage {
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
    pub fn material(&self) -> Option<&MaterialRecord> {
        self.records.iter().find_map(|record| match record {
            SpoolRecord::Material(material) => Some(material),
            _ => None,
        })
    }
    pub fn stat(&self) -> Option<&StatRecord> {
        self.records.iter().find_map(|record| match record {
            SpoolRecord::Stat(stat) => Some(stat),
            _ => None,
        })
    }
    pub fn count(&self, kind: RecordKind) -> usize {
        self.records.iter().filter(|record| record.kind() == kind).count()
    }
}

/// Walks `data` once and returns every spool record it can make sense of.
///
/// Decoding stops at the first record flagged `ME`, at the end of the buffer,
/// or at a header whose lengths run past the buffer.
pub fn decode_message(data: &[u8]) -> DecodedMessage {
    let mut message = DecodedMessage::default();
    let mut rest = data;
    while !rest.is_empty() {
        let offset = data.len() - rest.len();
        let header = match RecordHeader::decode(rest) {
            Some(header) => header,
            None => {
                log::warn!("Truncated record header at offset {offset}");
                break;
            }
        };
        let record_len = header.record_len();
        if record_len > rest.len() {
            log::warn!("Record at offset {offset} claims {record_len} bytes, only {} left", rest.len());
            break;
        }
        let (record, tail) = rest.split_at(record_len);
        rest = tail;

        let body = &record[header.header_len()..];
        let (type_name, body) = body.split_at(usize::from(header.type_length));
        let payload = &body[usize::from(header.id_length)..];

        match classify(&header, type_name) {
            Some(kind) => match kind.decode(payload) {
                Ok((record, checksum)) => {
                    if let Checksum::Mismatch { .. } = checksum {
                        message.checksum_mismatch = true;
                    }
                    message.records.push(record);
                }
                Err(err) => {
                    log::warn!("Dropping record at offset {offset}: {err}");
                    message.skipped += 1;
                }
            },
            None if header.tnf() == Tnf::Empty => {}
            None => {
                log::debug!("Skipping unrecognized record at offset {offset} (tnf {:?})", header.tnf());
                message.skipped += 1;
            }
        }

        if flags::has_flag(header.flags, flags::ME) {
            break;
        }
    }
    message
}

fn classify(header: &RecordHeader, type_name: &[u8]) -> Option<RecordKind> {
    if flags::has_flag(header.flags, flags::CF) {
        return None;
    }
    let type_id = join_type_id(header.tnf(), type_name)?;
    RecordKind::from_type_id(&type_id)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::record::{MaterialUnit, SignatureRecord};
    use uuid::Uuid;

    fn material() -> MaterialRecord {
        MaterialRecord::new(Uuid::parse_str("e92c7723-0763-4cb7-9864-562dce715c9e").unwrap(), "0123456789ABCD")
    }

    #[test]
    fn test_single_record_layout() {
        let data = encode_message(&[SignatureRecord::default().into()]);
        assert_eq!(
            vec![flags::MB | flags::ME | flags::SR | Tnf::WellKnown as u8, 3, 2, b'S', b'i', b'g', 0x20, 0x00],
            data
        );
    }

    #[test]
    fn test_material_header() {
        let data = encode_message(&[material().into()]);
        assert_eq!(0xd0 | flags::IL | Tnf::External as u8, data[0]);
        assert_eq!(21, data[1]);
        assert_eq!(108, data[2]);
        assert_eq!(1, data[3]);
        assert_eq!(b"ultimaker.nl:material", &data[4..25]);
        assert_eq!(b'1', data[25]);
        assert_eq!(4 + 21 + 1 + 108, data.len());
    }

    #[test]
    fn test_begin_and_end_flags() {
        let records: Vec<SpoolRecord> = vec![
            material().into(),
            SignatureRecord::default().into(),
            StatRecord::new(MaterialUnit::MassMg, 10).into(),
        ];
        let data = encode_message(&records);
        let first = RecordHeader::decode(&data).unwrap();
        assert!(flags::has_flag(first.flags, flags::MB));
        assert!(!flags::has_flag(first.flags, flags::ME));
        let second = RecordHeader::decode(&data[first.record_len()..]).unwrap();
        assert_eq!(0, second.flags & (flags::MB | flags::ME));
        let third = RecordHeader::decode(&data[first.record_len() + second.record_len()..]).unwrap();
        assert!(flags::has_flag(third.flags, flags::ME));

        let decoded = decode_message(&data);
        assert_eq!(records, decoded.records);
        assert_eq!(0, decoded.skipped);
        assert!(!decoded.checksum_mismatch);
    }

    #[test]
    fn test_long_header_round_trip() {
        let header = RecordHeader {
            flags: flags::MB | Tnf::Media as u8,
            type_length: 10,
            payload_length: 300,
            id_length: 0,
        };
        let mut out = Vec::new();
        header.encode_into(&mut out);
        assert_eq!(6, out.len());
        assert_eq!(Some(header), RecordHeader::decode(&out));
        assert_eq!(None, RecordHeader::decode(&out[..5]));
    }

    #[test]
    fn test_empty_message() {
        let data = encode_message(&[]);
        let decoded = decode_message(&data);
        assert!(decoded.is_empty());
        assert_eq!(0, decoded.skipped);
    }

    #[test]
    fn test_unknown_records_are_skipped() {
        let mut data = Vec::new();
        // well known text record
        RecordHeader { flags: flags::MB | flags::SR | Tnf::WellKnown as u8, type_length: 1, payload_length: 3, id_length: 0 }
            .encode_into(&mut data);
        data.extend_from_slice(b"T\x02en");
        // media record
        RecordHeader { flags: flags::SR | Tnf::Media as u8, type_length: 3, payload_length: 1, id_length: 0 }
            .encode_into(&mut data);
        data.extend_from_slice(b"a/b\x00");
        let mut tail = encode_message(&[SignatureRecord::default().into()]);
        tail[0] &= !flags::MB;
        data.extend_from_slice(&tail);

        let decoded = decode_message(&data);
        assert_eq!(vec![SpoolRecord::Signature(SignatureRecord::default())], decoded.records);
        assert_eq!(2, decoded.skipped);
    }

    #[test]
    fn test_chunked_record_is_skipped() {
        let mut data = encode_message(&[SignatureRecord::default().into()]);
        data[0] |= flags::CF;
        let decoded = decode_message(&data);
        assert!(decoded.is_empty());
        assert_eq!(1, decoded.skipped);
    }

    #[test]
    fn test_short_payload_drops_record_and_continues() {
        let mut data = Vec::new();
        RecordHeader { flags: flags::MB | flags::SR | Tnf::External as u8, type_length: 17, payload_length: 4, id_length: 0 }
            .encode_into(&mut data);
        data.extend_from_slice(b"ultimaker.nl:stat");
        data.extend_from_slice(&[0, 0, 2, 0]);
        let mut tail = encode_message(&[SignatureRecord::default().into()]);
        tail[0] &= !flags::MB;
        data.extend_from_slice(&tail);

        let decoded = decode_message(&data);
        assert_eq!(1, decoded.records.len());
        assert_eq!(1, decoded.skipped);
        assert_eq!(0, decoded.count(RecordKind::Stat));
    }

    #[test]
    fn test_material_followed_by_garbage() {
        let mut data = encode_message(&[material().into()]);
        data.extend_from_slice(&[0xff, 0x13, 0x37, 0xde, 0xad, 0xbe, 0xef]);
        let decoded = decode_message(&data);
        assert_eq!(vec![SpoolRecord::Material(material())], decoded.records);

        // without the end flag the garbage header overruns the buffer and stops the walk
        data[0] &= !flags::ME;
        let decoded = decode_message(&data);
        assert_eq!(vec![SpoolRecord::Material(material())], decoded.records);
    }

    #[test]
    fn test_blank_buffers() {
        assert!(decode_message(&[]).is_empty());
        let zeros = decode_message(&[0u8; 300]);
        assert!(zeros.is_empty());
        assert_eq!(0, zeros.skipped);
        // empty NDEF TLV as found on factory fresh tags
        let mut fresh = vec![0x03, 0x00, 0xfe];
        fresh.resize(300, 0);
        assert!(decode_message(&fresh).is_empty());
    }

    #[test]
    fn test_checksum_mismatch_flag() {
        let mut data = encode_message(&[StatRecord::new(MaterialUnit::MassMg, 5).into()]);
        let last = data.len() - 1;
        data[last] ^= 0x01;
        let decoded = decode_message(&data);
        assert_eq!(1, decoded.count(RecordKind::Stat));
        assert!(decoded.checksum_mismatch);
    }

    #[test]
    fn test_type_ids() {
        assert_eq!((Tnf::WellKnown, "Sig"), split_type_id("urn:nfc:wkt:Sig"));
        assert_eq!((Tnf::External, "ultimaker.nl:stat"), split_type_id(StatRecord::TYPE));
        assert_eq!(Some(MaterialRecord::TYPE.to_string()), join_type_id(Tnf::External, b"ultimaker.nl:material"));
        assert_eq!(None, join_type_id(Tnf::Media, b"text/plain"));
        assert_eq!(None, join_type_id(Tnf::External, &[0xff, 0xfe]));
    }
}
