//! Terminal and JSON rendering of what the tool found on a tag.

use std::fmt::{Display, Formatter};
use spooltag::{DecodedMessage, MaterialRecord, SignatureRecord, SpoolRecord, SpoolSummary, StatRecord};
use crate::session::{Failure, ReadOutcome, WriteOutcome};

/// Per record listing of a decoded message.
pub struct MessageDump<'a>(pub &'a DecodedMessage);

impl Display for MessageDump<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let message = self.0;
        if message.is_empty() {
            writeln!(f, "Tag contains no records. Is it a blank tag perhaps?")?;
        }
        for record in &message.records {
            match record {
                SpoolRecord::Material(material) => write_material(f, material)?,
                SpoolRecord::Stat(stat) => write_stat(f, stat)?,
                SpoolRecord::Signature(signature) => write_signature(f, signature)?,
            }
        }
        if message.skipped > 0 {
            writeln!(f, "Skipped {} unrecognised record(s)", message.skipped)?;
        }
        if message.checksum_mismatch {
            writeln!(f, "Warning: stat record checksum does not match its content")?;
        }
        Ok(())
    }
}

fn write_material(f: &mut Formatter<'_>, material: &MaterialRecord) -> std::fmt::Result {
    writeln!(f, "Material record")?;
    writeln!(f, "  Material GUID:      {}", material.material_id)?;
    writeln!(f, "  Version:            {}", material.version)?;
    writeln!(f, "  Compatibility:      {}", material.compatibility_version)?;
    writeln!(f, "  Serial number:      {}", material.serial_number)?;
    writeln!(f, "  Manufactured:       {}", format_timestamp(material.manufacturing_timestamp))?;
    writeln!(f, "  Station id:         {:#06x}", material.programming_station_id)?;
    writeln!(f, "  Batch code:         {}", material.batch_code)
}

fn write_stat(f: &mut Formatter<'_>, stat: &StatRecord) -> std::fmt::Result {
    writeln!(f, "Stat record")?;
    writeln!(f, "  Version:            {}", stat.version)?;
    writeln!(f, "  Compatibility:      {}", stat.compatibility_version)?;
    writeln!(f, "  Unit:               {:?} ({})", stat.unit, stat.unit)?;
    writeln!(f, "  Total:              {} {}", stat.total, stat.unit)?;
    writeln!(f, "  Remaining:          {} {}", stat.remaining, stat.unit)?;
    writeln!(f, "  Usage:              {:.2} h", stat.usage_hours())
}

fn write_signature(f: &mut Formatter<'_>, signature: &SignatureRecord) -> std::fmt::Result {
    writeln!(f, "Signature record")?;
    writeln!(f, "  Marker:             {:#06x}", signature.marker)
}

/// Unix seconds as UTC, or the raw number when out of range. Zero means unset.
pub fn format_timestamp(seconds: u64) -> String {
    if seconds == 0 {
        return "unset".to_string();
    }
    match i64::try_from(seconds).ok().and_then(|secs| chrono::DateTime::from_timestamp(secs, 0)) {
        Some(time) => time.format("%Y-%m-%d %H:%M:%S UTC").to_string(),
        None => seconds.to_string(),
    }
}

pub fn failure_text(failure: &Failure) -> String {
    match failure {
        Failure::NoCard => "No card detected".to_string(),
        Failure::CardRemoved => "Card was removed before the operation finished".to_string(),
        Failure::Reader(reason) => format!("Reader error: {reason}"),
    }
}

pub fn summary_text(summary: &SpoolSummary) -> String {
    match summary.material_id {
        Some(material_id) => format!(
            "{:?}: material {material_id}, {} of {} {} remaining, {:.2} h used",
            summary.status, summary.remaining, summary.total, summary.unit, summary.usage_hours
        ),
        None => format!("{:?}", summary.status),
    }
}

pub fn write_outcome_text(outcome: &WriteOutcome) -> String {
    match outcome {
        WriteOutcome::Written { serial, pages } => format!("Wrote {pages} pages to tag {serial}"),
        WriteOutcome::Failed(failure) => format!("Write failed: {}", failure_text(failure)),
    }
}

pub fn read_outcome_text(outcome: &ReadOutcome) -> String {
    match outcome {
        ReadOutcome::Read(report) => format!(
            "Tag {}\n{}\n{}",
            report.display_serial(),
            summary_text(&report.summary),
            MessageDump(&report.message)
        ),
        ReadOutcome::Failed { failure, .. } => match outcome.serial() {
            Some(serial) => format!("Read of tag {serial} failed: {}", failure_text(failure)),
            None => format!("Read failed: {}", failure_text(failure)),
        },
    }
}

pub fn write_outcome_json(outcome: &WriteOutcome) -> anyhow::Result<String> {
    let value = match outcome {
        WriteOutcome::Written { serial, pages } => serde_json::json!({
            "success": true,
            "serial": serial,
            "pages": pages,
        }),
        WriteOutcome::Failed(failure) => serde_json::json!({
            "success": false,
            "failure": failure,
        }),
    };
    Ok(serde_json::to_string_pretty(&value)?)
}

pub fn read_outcome_json(outcome: &ReadOutcome) -> anyhow::Result<String> {
    let value = match outcome {
        ReadOutcome::Read(report) => serde_json::to_value(report)?,
        ReadOutcome::Failed { serial, failure } => serde_json::json!({
            "status": outcome.status(),
            "serial": serial,
            "failure": failure,
        }),
    };
    Ok(serde_json::to_string_pretty(&value)?)
}

/// JSON for a buffer that did not come from a tag, so it has no serial.
pub fn message_json(message: &DecodedMessage) -> anyhow::Result<String> {
    let report = serde_json::json!({
        "summary": SpoolSummary::from_message(message),
        "message": message,
    });
    Ok(serde_json::to_string_pretty(&report)?)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::session::TagReport;
    use spooltag::{MaterialUnit, SpoolImage, TagStatus};

    fn message() -> DecodedMessage {
        let material_id = uuid::Uuid::parse_str("e92c7723-0763-4cb7-9864-562dce715c9e").unwrap();
        let image = SpoolImage::new(material_id, "04A1B2C3D4E5F6", MaterialUnit::MassMg, 750_000)
            .with_manufacturing_timestamp(1_600_000_000);
        spooltag::decode_message(&image.encode())
    }

    #[test]
    fn test_dump_lists_fields() {
        let dump = MessageDump(&message()).to_string();
        assert!(dump.contains("Material GUID:      e92c7723-0763-4cb7-9864-562dce715c9e"));
        assert!(dump.contains("Serial number:      04A1B2C3D4E5F6"));
        assert!(dump.contains("Manufactured:       2020-09-13 12:26:40 UTC"));
        assert!(dump.contains("Station id:         0xaffe"));
        assert!(dump.contains("Total:              750000 mg"));
        assert!(dump.contains("Marker:             0x2000"));
        assert!(!dump.contains("blank tag"));
        assert!(!dump.contains("Warning"));
    }

    #[test]
    fn test_dump_blank_notice() {
        let dump = MessageDump(&DecodedMessage::default()).to_string();
        assert!(dump.starts_with("Tag contains no records. Is it a blank tag perhaps?"));
    }

    #[test]
    fn test_dump_warnings() {
        let message = DecodedMessage {
            skipped: 2,
            checksum_mismatch: true,
            ..message()
        };
        let dump = MessageDump(&message).to_string();
        assert!(dump.contains("Skipped 2 unrecognised record(s)"));
        assert!(dump.contains("checksum does not match"));
    }

    #[test]
    fn test_timestamps() {
        assert_eq!("unset", format_timestamp(0));
        assert_eq!("1970-01-01 00:00:01 UTC", format_timestamp(1));
        assert_eq!(u64::MAX.to_string(), format_timestamp(u64::MAX));
    }

    #[test]
    fn test_outcome_text() {
        let written = WriteOutcome::Written { serial: "04A1".to_string(), pages: 57 };
        assert_eq!("Wrote 57 pages to tag 04A1", write_outcome_text(&written));
        assert_eq!(
            "Write failed: No card detected",
            write_outcome_text(&WriteOutcome::Failed(Failure::NoCard))
        );
        assert_eq!(
            "Read failed: Reader error: stall",
            read_outcome_text(&ReadOutcome::Failed { serial: None, failure: Failure::Reader("stall".to_string()) })
        );
        let removed = ReadOutcome::Failed { serial: Some("04A1".to_string()), failure: Failure::CardRemoved };
        assert_eq!(
            "Read of tag 04A1 failed: Card was removed before the operation finished",
            read_outcome_text(&removed)
        );
    }

    #[test]
    fn test_read_json() {
        let message = message();
        let report = TagReport {
            serial: "04A1B2C3D4E5F6".to_string(),
            summary: SpoolSummary::from_message(&message),
            message,
        };
        let value: serde_json::Value = serde_json::from_str(&read_outcome_json(&ReadOutcome::Read(report)).unwrap()).unwrap();
        assert_eq!("valid", value["summary"]["status"]);
        assert_eq!("04A1B2C3D4E5F6", value["serial"]);
        assert_eq!("material", value["message"]["records"][0]["kind"]);

        let removed = ReadOutcome::Failed { serial: Some("04A1B2C3D4E5F6".to_string()), failure: Failure::CardRemoved };
        let value: serde_json::Value = serde_json::from_str(&read_outcome_json(&removed).unwrap()).unwrap();
        assert_eq!("removed", value["status"]);
        assert_eq!("04A1B2C3D4E5F6", value["serial"]);
        assert_eq!("card_removed", value["failure"]);
        assert_eq!(Some(TagStatus::Removed), removed.status());

        let no_card = ReadOutcome::Failed { serial: None, failure: Failure::NoCard };
        let value: serde_json::Value = serde_json::from_str(&read_outcome_json(&no_card).unwrap()).unwrap();
        assert!(value["serial"].is_null());
        assert!(value["status"].is_null());
    }
}
