//! Encoding and decoding of the NFC tags attached to filament spools.
//!
//! A tag holds one NDEF message with a material record, a signature record
//! and two stat records, see [`SpoolImage`]. Decoding is best effort: foreign
//! or damaged records are skipped and whatever could be read is returned.

pub mod crc8;
pub mod image;
pub mod message;
pub mod record;

pub use image::{PAGE_SIZE, ImageError, SpoolImage, SpoolSummary, TagStatus};
pub use message::{DecodedMessage, decode_message, encode_message};
pub use record::{
    Checksum, DecodeError, MaterialRecord, MaterialUnit, RecordKind, SignatureRecord, SpoolRecord, StatRecord,
};
