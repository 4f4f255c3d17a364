//! USB CCID bulk messages, the framing smart card readers use on the wire.
//!
//! Every message starts with a 10 byte header: message type, little endian
//! u32 data length, slot, sequence number and three message specific bytes.

use super::TransmitError;

pub const HEADER_SIZE: usize = 10;

pub const PC_TO_RDR_ICC_POWER_ON: u8 = 0x62;
pub const PC_TO_RDR_GET_SLOT_STATUS: u8 = 0x65;
pub const PC_TO_RDR_XFR_BLOCK: u8 = 0x6F;

pub const RDR_TO_PC_DATA_BLOCK: u8 = 0x80;
pub const RDR_TO_PC_SLOT_STATUS: u8 = 0x81;

pub fn command(message_type: u8, slot: u8, seq: u8, params: [u8; 3], data: &[u8]) -> Result<Vec<u8>, TransmitError> {
    let len = u32::try_from(data.len())
        .map_err(|_| TransmitError::Protocol(format!("Command of {} bytes is too long", data.len())))?;
    let mut out = Vec::with_capacity(HEADER_SIZE + data.len());
    out.push(message_type);
    out.extend_from_slice(&len.to_le_bytes());
    out.push(slot);
    out.push(seq);
    out.extend_from_slice(&params);
    out.extend_from_slice(data);
    Ok(out)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IccStatus {
    Active,
    Inactive,
    Absent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandStatus {
    Ok,
    Failed,
    TimeExtension,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    message_type: u8,
    slot: u8,
    seq: u8,
    status: u8,
    error: u8,
    data: Vec<u8>,
}
impl Reply {
    pub fn decode(buf: &[u8]) -> Result<Self, TransmitError> {
        let Some((header, rest)) = buf.split_first_chunk::<HEADER_SIZE>() else {
            return Err(TransmitError::Protocol(format!("CCID reply of {} bytes is shorter than its header", buf.len())));
        };
        let len = u32::from_le_bytes([header[1], header[2], header[3], header[4]]) as usize;
        let data = match rest.get(..len) {
            Some(data) => data,
            None => {
                return Err(TransmitError::Protocol(format!(
                    "CCID reply announces {len} bytes, only {} received",
                    rest.len()
                )))
            }
        };
        Ok(Self {
            message_type: header[0],
            slot: header[5],
            seq: header[6],
            status: header[7],
            error: header[8],
            data: data.to_vec(),
        })
    }

    pub const fn message_type(&self) -> u8 { self.message_type }
    pub const fn slot(&self) -> u8 { self.slot }
    pub const fn seq(&self) -> u8 { self.seq }
    pub const fn error(&self) -> u8 { self.error }
    pub fn data(&self) -> &[u8] { &self.data }
    pub fn into_data(self) -> Vec<u8> { self.data }

    pub const fn icc_status(&self) -> IccStatus {
        match self.status & 0x03 {
            0 => IccStatus::Active,
            1 => IccStatus::Inactive,
            _ => IccStatus::Absent,
        }
    }
    /// Reads a GetSlotStatus answer, anything but a slot status reply is a protocol fault.
    pub fn card_present(&self) -> Result<bool, TransmitError> {
        if self.message_type != RDR_TO_PC_SLOT_STATUS {
            return Err(TransmitError::Protocol(format!(
                "Unexpected slot status reply {:#04x}",
                self.message_type
            )));
        }
        Ok(self.icc_status() != IccStatus::Absent)
    }
    pub const fn command_status(&self) -> CommandStatus {
        match (self.status >> 6) & 0x03 {
            0 => CommandStatus::Ok,
            2 => CommandStatus::TimeExtension,
            _ => CommandStatus::Failed,
        }
    }
}
