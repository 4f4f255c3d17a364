//! The complete payload written to one spool tag.

use std::path::Path;
use uuid::Uuid;
use crate::message::{self, DecodedMessage};
use crate::record::{MaterialRecord, MaterialUnit, SignatureRecord, SpoolRecord, StatRecord};

/// Tags are written and read in pages of this many bytes.
pub const PAGE_SIZE: usize = 4;

#[derive(thiserror::Error, Debug)]
pub enum ImageError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// Material, signature and two copies of the stat record.
///
/// The stat record is written twice so a torn write of one copy still leaves
/// a readable quantity on the tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpoolImage {
    pub material: MaterialRecord,
    pub signature: SignatureRecord,
    pub stat: StatRecord,
}
impl SpoolImage {
    pub const DEFAULT_BATCH_CODE: &'static str = "123456789AB";
    pub const DEFAULT_STATION_ID: u16 = 0xaffe;
    pub const DEFAULT_UNIT: MaterialUnit = MaterialUnit::MassMg;
    pub const DEFAULT_TOTAL: u32 = 750_000;

    pub fn new(material_id: Uuid, serial: impl Into<String>, unit: MaterialUnit, total: u32) -> Self {
        let mut material = MaterialRecord::new(material_id, serial);
        material.batch_code = Self::DEFAULT_BATCH_CODE.to_string();
        material.programming_station_id = Self::DEFAULT_STATION_ID;
        Self {
            material,
            signature: SignatureRecord::default(),
            stat: StatRecord::new(unit, total),
        }
    }
    pub fn with_remaining(mut self, remaining: u32) -> Self {
        self.stat.remaining = remaining;
        self
    }
    pub fn with_batch_code(mut self, batch_code: impl Into<String>) -> Self {
        self.material.batch_code = batch_code.into();
        self
    }
    pub fn with_station_id(mut self, station_id: u16) -> Self {
        self.material.programming_station_id = station_id;
        self
    }
    pub fn with_manufacturing_timestamp(mut self, timestamp: u64) -> Self {
        self.material.manufacturing_timestamp = timestamp;
        self
    }

    pub fn records(&self) -> [SpoolRecord; 4] {
        [
            SpoolRecord::Material(self.material.clone()),
            SpoolRecord::Signature(self.signature),
            SpoolRecord::Stat(self.stat.clone()),
            SpoolRecord::Stat(self.stat.clone()),
        ]
    }

    /// The framed message, zero padded to a whole number of pages.
    pub fn encode(&self) -> Vec<u8> {
        let mut data = message::encode_message(&self.records());
        let unpadded = data.len();
        pad_to_page(&mut data);
        log::debug!(
            "Spool image is {} bytes ({} padding), {} pages",
            data.len(),
            data.len() - unpadded,
            data.len() / PAGE_SIZE
        );
        data
    }

    /// Writes the encoded image to `path` and returns the bytes written.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<Vec<u8>, ImageError> {
        let data = self.encode();
        let path = path.as_ref();
        std::fs::write(path, &data).map_err(|source| ImageError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Ok(data)
    }
}

pub fn pad_to_page(data: &mut Vec<u8>) {
    let excess = data.len() % PAGE_SIZE;
    if excess != 0 {
        data.resize(data.len() + PAGE_SIZE - excess, 0);
    }
}

/// Reads a raw tag image, as written by [`SpoolImage::save`] or dumped from a tag.
pub fn load(path: impl AsRef<Path>) -> Result<Vec<u8>, ImageError> {
    let path = path.as_ref();
    std::fs::read(path).map_err(|source| ImageError::Io {
        path: path.display().to_string(),
        source,
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde_derive::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TagStatus {
    /// Material and stat records were found.
    Valid,
    /// Nothing recognisable, usually a fresh tag or foreign content.
    Blank,
    /// The tag left the field before all pages were read.
    Removed,
}

/// The figures a user cares about when looking at a spool tag.
#[derive(Debug, Clone, PartialEq, serde_derive::Serialize)]
pub struct SpoolSummary {
    pub status: TagStatus,
    pub material_id: Option<Uuid>,
    pub unit: MaterialUnit,
    pub total: u32,
    pub remaining: u32,
    pub usage_hours: f64,
}
impl SpoolSummary {
    /// Uses the first material and the first stat record of the message.
    pub fn from_message(message: &DecodedMessage) -> Self {
        let material = message.material();
        let stat = message.stat();
        let status = match (material, stat) {
            (Some(_), Some(_)) => TagStatus::Valid,
            _ => TagStatus::Blank,
        };
        Self {
            status,
            material_id: material.map(|material| material.material_id),
            unit: stat.map(|stat| stat.unit).unwrap_or_default(),
            total: stat.map_or(0, |stat| stat.total),
            remaining: stat.map_or(0, |stat| stat.remaining),
            usage_hours: stat.map_or(0.0, StatRecord::usage_hours),
        }
    }
    pub fn removed() -> Self {
        Self {
            status: TagStatus::Removed,
            material_id: None,
            unit: MaterialUnit::Unused,
            total: 0,
            remaining: 0,
            usage_hours: 0.0,
        }
    }
}
