pub mod apdu;
mod ccid;

pub use apdu::{Response, StatusWord};

use std::time::Duration;
use tokio::time::MissedTickBehavior;

/// Smart card readers expose an interface of this class.
const CCID_INTERFACE_CLASS: u8 = 0x0B;
const USB_TIMEOUT: Duration = Duration::from_secs(2);
const MAX_MESSAGE_SIZE: usize = 512;
const SLOT: u8 = 0;

#[derive(thiserror::Error, Debug)]
pub enum TransmitError {
    #[error("Card was removed")]
    CardRemoved,
    #[error("USB transfer failed: {0}")]
    Usb(#[from] rusb::Error),
    #[error("Reader protocol error: {0}")]
    Protocol(String),
}

/// What a spool session needs from a reader.
///
/// Every call is a blocking request/response exchange; a session owns the
/// reader exclusively for the duration of one operation.
pub trait CardReader {
    /// Polls once, `Ok(true)` when a card sits in the field.
    fn card_present(&mut self) -> Result<bool, TransmitError>;
    /// Powers up the card and returns its ATR.
    fn connect(&mut self) -> Result<Vec<u8>, TransmitError>;
    fn transmit(&mut self, command: &[u8]) -> Result<Response, TransmitError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CardPresence {
    Present,
    TimedOut,
}

/// Polls `reader` every `poll` until a card shows up or `timeout` expires.
///
/// Expiry cancels the poll loop and yields [`CardPresence::TimedOut`]; it is
/// never reported as an error.
pub async fn wait_for_card<R: CardReader + ?Sized>(reader: &mut R, timeout: Duration, poll: Duration) -> Result<CardPresence, TransmitError> {
    let poll_loop = async {
        let mut interval = tokio::time::interval(poll);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            interval.tick().await;
            if reader.card_present()? {
                return Ok::<(), TransmitError>(());
            }
        }
    };
    match tokio::time::timeout(timeout, poll_loop).await {
        Ok(Ok(())) => Ok(CardPresence::Present),
        Ok(Err(err)) => Err(err),
        Err(_) => Ok(CardPresence::TimedOut),
    }
}

/// A USB device with a CCID interface and its bulk endpoints.
pub struct ReaderInfo {
    device: rusb::Device<rusb::GlobalContext>,
    vendor_id: u16,
    product_id: u16,
    interface: u8,
    endpoint_in: u8,
    endpoint_out: u8,
}
impl ReaderInfo {
    pub fn product(&self) -> Option<String> {
        let descriptor = self.device.device_descriptor().ok()?;
        let handle = self.device.open().ok()?;
        handle.read_product_string_ascii(&descriptor).ok()
    }
}
impl std::fmt::Display for ReaderInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{:04x}:{:04x} (bus = {}, address = {}, interface = {})",
            self.vendor_id,
            self.product_id,
            self.device.bus_number(),
            self.device.address(),
            self.interface
        )
    }
}

/// Lists every attached smart card reader.
pub fn scan_for_readers() -> anyhow::Result<Vec<ReaderInfo>> {
    let device_list = match rusb::DeviceList::new() {
        Ok(v) => v,
        Err(err) => anyhow::bail!("Failed to get device list: {err}")
    };
    let mut readers = Vec::new();
    for device in device_list.iter() {
        let descriptor = match device.device_descriptor() {
            Ok(v) => v,
            Err(err) => {
                log::warn!("Failed to get device descriptor: {err}");
                continue;
            }
        };
        let config = match device.active_config_descriptor() {
            Ok(v) => v,
            Err(err) => {
                log::debug!("Skipping {:04x}:{:04x}, no active configuration: {err}", descriptor.vendor_id(), descriptor.product_id());
                continue;
            }
        };
        for interface in config.interfaces() {
            for setting in interface.descriptors() {
                if setting.class_code() != CCID_INTERFACE_CLASS {
                    continue;
                }
                let mut endpoint_in = None;
                let mut endpoint_out = None;
                for endpoint in setting.endpoint_descriptors() {
                    if endpoint.transfer_type() != rusb::TransferType::Bulk {
                        continue;
                    }
                    match endpoint.direction() {
                        rusb::Direction::In => endpoint_in = Some(endpoint.address()),
                        rusb::Direction::Out => endpoint_out = Some(endpoint.address()),
                    }
                }
                if let (Some(endpoint_in), Some(endpoint_out)) = (endpoint_in, endpoint_out) {
                    readers.push(ReaderInfo {
                        device: device.clone(),
                        vendor_id: descriptor.vendor_id(),
                        product_id: descriptor.product_id(),
                        interface: setting.interface_number(),
                        endpoint_in,
                        endpoint_out,
                    });
                }
            }
        }
    }
    Ok(readers)
}

/// A CCID reader driven directly over USB bulk transfers.
pub struct CcidReader {
    handle: rusb::DeviceHandle<rusb::GlobalContext>,
    interface: u8,
    endpoint_in: u8,
    endpoint_out: u8,
    seq: u8,
}
impl CcidReader {
    pub fn open(info: &ReaderInfo) -> anyhow::Result<Self> {
        let handle = match info.device.open() {
            Ok(v) => v,
            Err(err) => anyhow::bail!("Failed to open reader {info}: {err}")
        };
        if let Err(err) = handle.set_auto_detach_kernel_driver(true) {
            log::debug!("Auto detach of kernel driver unavailable: {err}");
        }
        match handle.claim_interface(info.interface) {
            Ok(()) => (),
            Err(err) => anyhow::bail!("Failed to claim reader {info} on interface {}: {err}", info.interface)
        };
        log::info!("Opened reader {info}");
        Ok(Self {
            handle,
            interface: info.interface,
            endpoint_in: info.endpoint_in,
            endpoint_out: info.endpoint_out,
            seq: 0,
        })
    }

    fn exchange(&mut self, message_type: u8, params: [u8; 3], data: &[u8]) -> Result<ccid::Reply, TransmitError> {
        self.seq = self.seq.wrapping_add(1);
        let seq = self.seq;
        let message = ccid::command(message_type, SLOT, seq, params, data)?;
        self.handle.write_bulk(self.endpoint_out, &message, USB_TIMEOUT)?;
        loop {
            let mut buf = [0u8; MAX_MESSAGE_SIZE];
            let len = self.handle.read_bulk(self.endpoint_in, &mut buf, USB_TIMEOUT)?;
            let reply = ccid::Reply::decode(&buf[..len])?;
            if reply.seq() != seq || reply.slot() != SLOT {
                log::trace!("Dropping stale CCID reply seq {} (waiting for {seq})", reply.seq());
                continue;
            }
            match reply.command_status() {
                ccid::CommandStatus::TimeExtension => continue,
                ccid::CommandStatus::Ok => return Ok(reply),
                ccid::CommandStatus::Failed if reply.icc_status() == ccid::IccStatus::Absent => {
                    return Err(TransmitError::CardRemoved);
                }
                ccid::CommandStatus::Failed => {
                    return Err(TransmitError::Protocol(format!(
                        "CCID command {message_type:#04x} failed with error {:#04x}",
                        reply.error()
                    )));
                }
            }
        }
    }
}
impl CardReader for CcidReader {
    fn card_present(&mut self) -> Result<bool, TransmitError> {
        match self.exchange(ccid::PC_TO_RDR_GET_SLOT_STATUS, [0; 3], &[]) {
            Ok(reply) => reply.card_present(),
            Err(TransmitError::CardRemoved) => Ok(false),
            Err(err) => Err(err),
        }
    }

    fn connect(&mut self) -> Result<Vec<u8>, TransmitError> {
        let reply = self.exchange(ccid::PC_TO_RDR_ICC_POWER_ON, [0; 3], &[])?;
        if reply.message_type() != ccid::RDR_TO_PC_DATA_BLOCK {
            return Err(TransmitError::Protocol(format!("Unexpected power on reply {:#04x}", reply.message_type())));
        }
        Ok(reply.into_data())
    }

    fn transmit(&mut self, command: &[u8]) -> Result<Response, TransmitError> {
        let reply = self.exchange(ccid::PC_TO_RDR_XFR_BLOCK, [0; 3], command)?;
        Response::from_bytes(reply.data())
    }
}
impl Drop for CcidReader {
    fn drop(&mut self) {
        match self.handle.release_interface(self.interface) {
            Ok(()) => (),
            Err(err) => {
                log::warn!("Failed to release reader interface {}: {err}", self.interface);
            }
        }
    }
}


#[cfg(test)]
mod test {
    use super::mock::MockReader;
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_wait_times_out_at_bound() {
        let mut reader = MockReader::default();
        let bound = Duration::from_secs(1);
        let start = tokio::time::Instant::now();
        let presence = wait_for_card(&mut reader, bound, Duration::from_millis(100)).await.unwrap();
        assert_eq!(CardPresence::TimedOut, presence);
        assert!(start.elapsed() >= bound);
        assert!(reader.polls >= 10);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_returns_when_card_arrives() {
        let mut reader = MockReader {
            present_after: Some(3),
            ..MockReader::default()
        };
        let start = tokio::time::Instant::now();
        let presence = wait_for_card(&mut reader, Duration::from_secs(30), Duration::from_millis(250)).await.unwrap();
        assert_eq!(CardPresence::Present, presence);
        assert_eq!(4, reader.polls);
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_propagates_reader_faults() {
        struct Broken;
        impl CardReader for Broken {
            fn card_present(&mut self) -> Result<bool, TransmitError> {
                Err(TransmitError::Usb(rusb::Error::NoDevice))
            }
            fn connect(&mut self) -> Result<Vec<u8>, TransmitError> {
                unreachable!()
            }
            fn transmit(&mut self, _command: &[u8]) -> Result<Response, TransmitError> {
                unreachable!()
            }
        }
        let result = wait_for_card(&mut Broken, Duration::from_secs(1), Duration::from_millis(100)).await;
        assert!(matches!(result, Err(TransmitError::Usb(rusb::Error::NoDevice))));
    }
}
