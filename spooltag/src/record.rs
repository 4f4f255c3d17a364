//! Fixed layout payloads of the three records a spool tag carries.
//!
//! All integers are big endian. Text fields are zero padded to their slot and
//! silently cut when they do not fit; decoding stops a text field at the first
//! zero byte.

use std::fmt::Display;
use uuid::Uuid;
use crate::crc8;

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("Not enough data: {kind} payload needs at least {needed} bytes, got {got}")]
    Truncated {
        kind: RecordKind,
        needed: usize,
        got: usize,
    },
    #[error("Invalid material unit {0}")]
    InvalidUnit(u8),
}

/// Result of re-checking the stat record's trailing CRC8.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde_derive::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Checksum {
    Valid,
    Mismatch { stored: u8, computed: u8 },
}
impl Checksum {
    pub const fn is_valid(&self) -> bool {
        matches!(self, Checksum::Valid)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde_derive::Serialize, serde_derive::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordKind {
    Material,
    Stat,
    Signature,
}
impl RecordKind {
    pub const ALL: [RecordKind; 3] = [RecordKind::Material, RecordKind::Stat, RecordKind::Signature];

    pub const fn type_id(self) -> &'static str {
        match self {
            RecordKind::Material => MaterialRecord::TYPE,
            RecordKind::Stat => StatRecord::TYPE,
            RecordKind::Signature => SignatureRecord::TYPE,
        }
    }
    pub const fn name(self) -> &'static str {
        match self {
            RecordKind::Material => MaterialRecord::NAME,
            RecordKind::Stat => StatRecord::NAME,
            RecordKind::Signature => SignatureRecord::NAME,
        }
    }
    pub const fn size(self) -> usize {
        match self {
            RecordKind::Material => MaterialRecord::SIZE,
            RecordKind::Stat => StatRecord::SIZE,
            RecordKind::Signature => SignatureRecord::SIZE,
        }
    }
    /// Smallest payload [`RecordKind::decode`] accepts.
    pub const fn min_size(self) -> usize {
        match self {
            RecordKind::Material => MaterialRecord::MIN_SIZE,
            RecordKind::Stat => StatRecord::SIZE,
            RecordKind::Signature => SignatureRecord::SIZE,
        }
    }

    pub fn from_type_id(type_id: &str) -> Option<Self> {
        match type_id {
            MaterialRecord::TYPE => Some(RecordKind::Material),
            StatRecord::TYPE => Some(RecordKind::Stat),
            SignatureRecord::TYPE => Some(RecordKind::Signature),
            _ => None,
        }
    }

    /// Decodes `payload` as this kind of record.
    ///
    /// Only stat records carry a checksum, every other kind reports [`Checksum::Valid`].
    pub fn decode(self, payload: &[u8]) -> Result<(SpoolRecord, Checksum), DecodeError> {
        match self {
            RecordKind::Material => Ok((SpoolRecord::Material(MaterialRecord::decode(payload)?), Checksum::Valid)),
            RecordKind::Stat => {
                let (record, checksum) = StatRecord::decode(payload)?;
                Ok((SpoolRecord::Stat(record), checksum))
            }
            RecordKind::Signature => Ok((SpoolRecord::Signature(SignatureRecord::decode(payload)?), Checksum::Valid)),
        }
    }

    fn ensure_len(self, payload: &[u8]) -> Result<(), DecodeError> {
        if payload.len() < self.min_size() {
            return Err(DecodeError::Truncated {
                kind: self,
                needed: self.min_size(),
                got: payload.len(),
            });
        }
        Ok(())
    }
}
impl Display for RecordKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.type_id())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, serde_derive::Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SpoolRecord {
    Material(MaterialRecord),
    Stat(StatRecord),
    Signature(SignatureRecord),
}
impl SpoolRecord {
    pub const fn kind(&self) -> RecordKind {
        match self {
            SpoolRecord::Material(_) => RecordKind::Material,
            SpoolRecord::Stat(_) => RecordKind::Stat,
            SpoolRecord::Signature(_) => RecordKind::Signature,
        }
    }
    pub fn encode_payload(&self) -> Vec<u8> {
        match self {
            SpoolRecord::Material(record) => record.encode().to_vec(),
            SpoolRecord::Stat(record) => record.encode().to_vec(),
            SpoolRecord::Signature(record) => record.encode().to_vec(),
        }
    }
}
impl From<MaterialRecord> for SpoolRecord {
    fn from(record: MaterialRecord) -> Self {
        SpoolRecord::Material(record)
    }
}
impl From<StatRecord> for SpoolRecord {
    fn from(record: StatRecord) -> Self {
        SpoolRecord::Stat(record)
    }
}
impl From<SignatureRecord> for SpoolRecord {
    fn from(record: SignatureRecord) -> Self {
        SpoolRecord::Signature(record)
    }
}

fn write_text(slot: &mut [u8], text: &str) {
    let mut end = text.len().min(slot.len());
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    slot[..end].copy_from_slice(&text.as_bytes()[..end]);
}

fn read_text(slot: &[u8]) -> String {
    let end = slot.iter().position(|&b| b == 0).unwrap_or(slot.len());
    String::from_utf8_lossy(&slot[..end]).into_owned()
}

/// Identity of the spool: who made it, when, and which material is on it.
#[derive(Debug, Clone, PartialEq, Eq, serde_derive::Serialize, serde_derive::Deserialize)]
pub struct MaterialRecord {
    pub version: u8,
    pub compatibility_version: u8,
    pub serial_number: String,
    pub manufacturing_timestamp: u64,
    pub material_id: Uuid,
    pub programming_station_id: u16,
    pub batch_code: String,
}
impl MaterialRecord {
    pub const TYPE: &'static str = "urn:nfc:ext:ultimaker.nl:material";
    pub const NAME: &'static str = "1";
    pub const SIZE: usize = 108;
    pub const MIN_SIZE: usize = 42;
    pub const SERIAL_LEN: usize = 14;
    pub const BATCH_CODE_LEN: usize = Self::SIZE - Self::MIN_SIZE;
    pub const NO_MATERIAL: Uuid = Uuid::nil();

    pub fn new(material_id: Uuid, serial_number: impl Into<String>) -> Self {
        Self {
            material_id,
            serial_number: serial_number.into(),
            ..Self::default()
        }
    }

    pub fn encode(&self) -> [u8; Self::SIZE] {
        let mut out = [0u8; Self::SIZE];
        out[0] = self.version;
        out[1] = self.compatibility_version;
        write_text(&mut out[2..16], &self.serial_number);
        out[16..24].copy_from_slice(&self.manufacturing_timestamp.to_be_bytes());
        out[24..40].copy_from_slice(self.material_id.as_bytes());
        out[40..42].copy_from_slice(&self.programming_station_id.to_be_bytes());
        write_text(&mut out[42..], &self.batch_code);
        out
    }

    /// Everything past the station id is batch code; a payload cut anywhere
    /// in that region still decodes with a shorter batch code.
    pub fn decode(payload: &[u8]) -> Result<Self, DecodeError> {
        RecordKind::Material.ensure_len(payload)?;
        let mut timestamp = [0u8; 8];
        timestamp.copy_from_slice(&payload[16..24]);
        let mut material_id = [0u8; 16];
        material_id.copy_from_slice(&payload[24..40]);
        let batch_end = payload.len().min(Self::SIZE);
        Ok(Self {
            version: payload[0],
            compatibility_version: payload[1],
            serial_number: read_text(&payload[2..16]),
            manufacturing_timestamp: u64::from_be_bytes(timestamp),
            material_id: Uuid::from_bytes(material_id),
            programming_station_id: u16::from_be_bytes([payload[40], payload[41]]),
            batch_code: read_text(&payload[42..batch_end]),
        })
    }
}
impl Default for MaterialRecord {
    fn default() -> Self {
        Self {
            version: 0,
            compatibility_version: 0,
            serial_number: String::new(),
            manufacturing_timestamp: 0,
            material_id: Self::NO_MATERIAL,
            programming_station_id: 0,
            batch_code: String::new(),
        }
    }
}

#[repr(u8)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, serde_derive::Serialize, serde_derive::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MaterialUnit {
    #[default]
    Unused = 0,
    LengthMm = 1,
    MassMg = 2,
    VolumeCm3 = 3,
}
impl MaterialUnit {
    pub const fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(MaterialUnit::Unused),
            1 => Some(MaterialUnit::LengthMm),
            2 => Some(MaterialUnit::MassMg),
            3 => Some(MaterialUnit::VolumeCm3),
            _ => None,
        }
    }
    pub const fn symbol(self) -> &'static str {
        match self {
            MaterialUnit::Unused => "N/A",
            MaterialUnit::LengthMm => "mm",
            MaterialUnit::MassMg => "mg",
            MaterialUnit::VolumeCm3 => "cm³",
        }
    }
}
impl TryFrom<u8> for MaterialUnit {
    type Error = DecodeError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Self::from_u8(value).ok_or(DecodeError::InvalidUnit(value))
    }
}
impl Display for MaterialUnit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.symbol())
    }
}

/// How much material the spool holds and how long it has been printing.
#[derive(Debug, Clone, PartialEq, Eq, serde_derive::Serialize, serde_derive::Deserialize)]
pub struct StatRecord {
    pub version: u8,
    pub compatibility_version: u8,
    pub unit: MaterialUnit,
    pub total: u32,
    pub remaining: u32,
    /// Seconds.
    pub usage_duration: u64,
}
impl StatRecord {
    pub const TYPE: &'static str = "urn:nfc:ext:ultimaker.nl:stat";
    pub const NAME: &'static str = "2";
    pub const SIZE: usize = 20;
    const CRC_OFFSET: usize = 19;

    /// A fresh spool: nothing used, remaining equals total.
    pub const fn new(unit: MaterialUnit, total: u32) -> Self {
        Self {
            version: 0,
            compatibility_version: 0,
            unit,
            total,
            remaining: total,
            usage_duration: 0,
        }
    }
    pub const fn with_remaining(mut self, remaining: u32) -> Self {
        self.remaining = remaining;
        self
    }
    pub fn usage_hours(&self) -> f64 {
        self.usage_duration as f64 / 3600.0
    }

    pub fn encode(&self) -> [u8; Self::SIZE] {
        let mut out = [0u8; Self::SIZE];
        out[0] = self.version;
        out[1] = self.compatibility_version;
        out[2] = self.unit as u8;
        out[3..7].copy_from_slice(&self.total.to_be_bytes());
        out[7..11].copy_from_slice(&self.remaining.to_be_bytes());
        out[11..19].copy_from_slice(&self.usage_duration.to_be_bytes());
        out[Self::CRC_OFFSET] = crc8::checksum(&out[..Self::CRC_OFFSET]);
        out
    }

    /// A checksum mismatch is returned next to the record, never as an error.
    pub fn decode(payload: &[u8]) -> Result<(Self, Checksum), DecodeError> {
        RecordKind::Stat.ensure_len(payload)?;
        let unit = MaterialUnit::try_from(payload[2])?;
        let mut duration = [0u8; 8];
        duration.copy_from_slice(&payload[11..19]);
        let record = Self {
            version: payload[0],
            compatibility_version: payload[1],
            unit,
            total: u32::from_be_bytes([payload[3], payload[4], payload[5], payload[6]]),
            remaining: u32::from_be_bytes([payload[7], payload[8], payload[9], payload[10]]),
            usage_duration: u64::from_be_bytes(duration),
        };
        let stored = payload[Self::CRC_OFFSET];
        let computed = crc8::checksum(&payload[..Self::CRC_OFFSET]);
        let checksum = if stored == computed {
            Checksum::Valid
        } else {
            log::warn!("Stat record crc mismatch: tag={stored:#04x} computed={computed:#04x}");
            Checksum::Mismatch { stored, computed }
        };
        Ok((record, checksum))
    }
}
impl Default for StatRecord {
    fn default() -> Self {
        Self::new(MaterialUnit::Unused, 0)
    }
}

/// Marks the tag content as spool data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde_derive::Serialize, serde_derive::Deserialize)]
pub struct SignatureRecord {
    pub marker: u16,
}
impl SignatureRecord {
    pub const TYPE: &'static str = "urn:nfc:wkt:Sig";
    pub const NAME: &'static str = "";
    pub const SIZE: usize = 2;
    pub const SPOOL_MARKER: u16 = 0x2000;

    pub const fn new(marker: u16) -> Self {
        Self { marker }
    }
    pub fn encode(&self) -> [u8; Self::SIZE] {
        self.marker.to_be_bytes()
    }
    pub fn decode(payload: &[u8]) -> Result<Self, DecodeError> {
        RecordKind::Signature.ensure_len(payload)?;
        Ok(Self::new(u16::from_be_bytes([payload[0], payload[1]])))
    }
}
impl Default for SignatureRecord {
    fn default() -> Self {
        Self::new(Self::SPOOL_MARKER)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn sample_material() -> MaterialRecord {
        MaterialRecord {
            version: 1,
            compatibility_version: 2,
            serial_number: "0123456789ABCD".to_string(),
            manufacturing_timestamp: 0x0102_0304_0506_0708,
            material_id: Uuid::parse_str("e92c7723-0763-4cb7-9864-562dce715c9e").unwrap(),
            programming_station_id: 0xaffe,
            batch_code: "123456789AB".to_string(),
        }
    }

    #[test]
    fn test_material_layout() {
        let record = sample_material();
        let data = record.encode();
        assert_eq!(MaterialRecord::SIZE, data.len());
        assert_eq!([1, 2], data[0..2]);
        assert_eq!(b"0123456789ABCD", &data[2..16]);
        assert_eq!([1, 2, 3, 4, 5, 6, 7, 8], data[16..24]);
        assert_eq!([0xe9, 0x2c, 0x77, 0x23], data[24..28]);
        assert_eq!([0x5c, 0x9e], data[38..40]);
        assert_eq!([0xaf, 0xfe], data[40..42]);
        assert_eq!(b"123456789AB", &data[42..53]);
        assert!(data[53..].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_material_round_trip() {
        let record = sample_material();
        assert_eq!(record, MaterialRecord::decode(&record.encode()).unwrap());

        let empty = MaterialRecord::default();
        let decoded = MaterialRecord::decode(&empty.encode()).unwrap();
        assert_eq!(MaterialRecord::NO_MATERIAL, decoded.material_id);
        assert_eq!(empty, decoded);
    }

    #[test]
    fn test_material_truncates_long_text() {
        let mut record = sample_material();
        record.serial_number = "0123456789ABCDEFGH".to_string();
        record.batch_code = "x".repeat(100);
        let decoded = MaterialRecord::decode(&record.encode()).unwrap();
        assert_eq!("0123456789ABCD", decoded.serial_number);
        assert_eq!("x".repeat(MaterialRecord::BATCH_CODE_LEN), decoded.batch_code);
    }

    #[test]
    fn test_material_truncates_on_char_boundary() {
        let mut record = sample_material();
        // 13 ascii bytes followed by a two byte character straddling the slot end
        record.serial_number = "0123456789ABCé".to_string();
        let data = record.encode();
        assert_eq!(0, data[15]);
        assert_eq!("0123456789ABC", MaterialRecord::decode(&data).unwrap().serial_number);
    }

    #[test]
    fn test_material_text_stops_at_zero() {
        let mut data = sample_material().encode();
        data[5] = 0;
        assert_eq!("012", MaterialRecord::decode(&data).unwrap().serial_number);
    }

    #[test]
    fn test_material_short_payload() {
        let data = sample_material().encode();
        let decoded = MaterialRecord::decode(&data[..48]).unwrap();
        assert_eq!("123456", decoded.batch_code);
        assert_eq!(
            Err(DecodeError::Truncated { kind: RecordKind::Material, needed: 42, got: 41 }),
            MaterialRecord::decode(&data[..41])
        );
    }

    #[test]
    fn test_stat_layout_and_crc() {
        let record = StatRecord {
            version: 0,
            compatibility_version: 0,
            unit: MaterialUnit::MassMg,
            total: 1_000_000,
            remaining: 500_000,
            usage_duration: 7200,
        };
        let data = record.encode();
        assert_eq!(StatRecord::SIZE, data.len());
        assert_eq!(2, data[2]);
        assert_eq!(1_000_000u32.to_be_bytes(), data[3..7]);
        assert_eq!(500_000u32.to_be_bytes(), data[7..11]);
        assert_eq!(7200u64.to_be_bytes(), data[11..19]);
        assert_eq!(crc8::checksum(&data[..19]), data[19]);

        let (decoded, checksum) = StatRecord::decode(&data).unwrap();
        assert_eq!(record, decoded);
        assert_eq!(Checksum::Valid, checksum);
        assert_eq!(2.0, decoded.usage_hours());
    }

    #[test]
    fn test_stat_remaining_defaults_to_total() {
        let record = StatRecord::new(MaterialUnit::LengthMm, 42);
        assert_eq!(42, record.remaining);
        assert_eq!(7, record.with_remaining(7).remaining);
    }

    #[test]
    fn test_stat_crc_mismatch_still_decodes() {
        let record = StatRecord::new(MaterialUnit::VolumeCm3, 1234);
        let mut data = record.encode();
        let stored = data[19] ^ 0xff;
        data[19] = stored;
        let (decoded, checksum) = StatRecord::decode(&data).unwrap();
        assert_eq!(record, decoded);
        assert_eq!(Checksum::Mismatch { stored, computed: stored ^ 0xff }, checksum);
        assert!(!checksum.is_valid());
    }

    #[test]
    fn test_stat_single_bit_corruption_detected() {
        let data = StatRecord::new(MaterialUnit::MassMg, 750_000).encode();
        for byte in 0..19 {
            for bit in 0..8 {
                let mut corrupted = data;
                corrupted[byte] ^= 1 << bit;
                assert_ne!(data[19], crc8::checksum(&corrupted[..19]), "byte {byte} bit {bit}");
            }
        }
    }

    #[test]
    fn test_stat_rejects_bad_unit_and_short_payload() {
        let mut data = StatRecord::new(MaterialUnit::MassMg, 1).encode();
        data[2] = 4;
        assert_eq!(Err(DecodeError::InvalidUnit(4)), StatRecord::decode(&data));
        assert!(matches!(
            StatRecord::decode(&data[..19]),
            Err(DecodeError::Truncated { kind: RecordKind::Stat, needed: 20, got: 19 })
        ));
    }

    #[test]
    fn test_signature() {
        let record = SignatureRecord::default();
        assert_eq!([0x20, 0x00], record.encode());
        assert_eq!(record, SignatureRecord::decode(&[0x20, 0x00, 0xff]).unwrap());
        assert!(SignatureRecord::decode(&[0x20]).is_err());
    }

    #[test]
    fn test_kind_dispatch() {
        for kind in RecordKind::ALL {
            assert_eq!(Some(kind), RecordKind::from_type_id(kind.type_id()));
        }
        assert_eq!(None, RecordKind::from_type_id("urn:nfc:wkt:T"));
        let (record, _) = RecordKind::Signature.decode(&[0x20, 0x00]).unwrap();
        assert_eq!(SpoolRecord::Signature(SignatureRecord::default()), record);
        assert_eq!(2, record.encode_payload().len());
    }
}
