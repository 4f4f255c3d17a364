//! One read or write of a spool tag, from waiting for the card to the result.
//!
//! ```text
//! WaitingForCard ──► Connected ──► Exchanging ──► Done
//!        │               │              │
//!        └───────────────┴──────────────┴──► Failed
//! ```
//! Hardware trouble never escapes as an error: every way a session can end is
//! an outcome value.

use std::time::Duration;
use spooltag::{DecodedMessage, MaterialUnit, SpoolImage, SpoolSummary, TagStatus};
use crate::device::{self, CardPresence, CardReader, TransmitError, apdu};
use crate::pages::{self, PageError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionConfig {
    pub card_timeout: Duration,
    pub poll_interval: Duration,
}
impl SessionConfig {
    pub const DEFAULT: Self = Self {
        card_timeout: Duration::from_secs(30),
        poll_interval: Duration::from_millis(250),
    };
}
impl Default for SessionConfig {
    fn default() -> Self {
        SessionConfig::DEFAULT
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    WaitingForCard,
    Connected,
    Exchanging,
    Done,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, serde_derive::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Failure {
    /// No card showed up before the timeout.
    NoCard,
    /// The card stopped answering part way through.
    CardRemoved,
    /// The reader itself failed.
    Reader(String),
}
impl From<&TransmitError> for Failure {
    fn from(err: &TransmitError) -> Self {
        match err {
            TransmitError::CardRemoved => Failure::CardRemoved,
            err => Failure::Reader(err.to_string()),
        }
    }
}
impl From<&PageError> for Failure {
    fn from(err: &PageError) -> Self {
        match err {
            PageError::Transmit { source, .. } => Failure::from(source),
            PageError::Status { .. } | PageError::ShortRead { .. } => Failure::CardRemoved,
            PageError::Unaligned(_) => Failure::Reader(err.to_string()),
        }
    }
}

/// What to put on the tag. The serial number comes from the tag itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteRequest {
    pub material_id: uuid::Uuid,
    pub unit: MaterialUnit,
    pub total: u32,
    pub remaining: Option<u32>,
    pub batch_code: Option<String>,
    pub station_id: Option<u16>,
    pub manufacturing_timestamp: u64,
}
impl WriteRequest {
    pub fn new(material_id: uuid::Uuid, unit: MaterialUnit, total: u32) -> Self {
        Self {
            material_id,
            unit,
            total,
            remaining: None,
            batch_code: None,
            station_id: None,
            manufacturing_timestamp: 0,
        }
    }
    pub fn image(&self, serial: &str) -> SpoolImage {
        let mut image = SpoolImage::new(self.material_id, serial, self.unit, self.total)
            .with_manufacturing_timestamp(self.manufacturing_timestamp);
        if let Some(remaining) = self.remaining {
            image = image.with_remaining(remaining);
        }
        if let Some(batch_code) = &self.batch_code {
            image = image.with_batch_code(batch_code.clone());
        }
        if let Some(station_id) = self.station_id {
            image = image.with_station_id(station_id);
        }
        image
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteOutcome {
    Written { serial: String, pages: usize },
    Failed(Failure),
}
impl WriteOutcome {
    pub const fn is_success(&self) -> bool {
        matches!(self, WriteOutcome::Written { .. })
    }
}

#[derive(Debug, Clone, serde_derive::Serialize)]
pub struct TagReport {
    /// Upper case hex of the tag UID.
    pub serial: String,
    pub summary: SpoolSummary,
    pub message: DecodedMessage,
}
impl TagReport {
    /// The serial as `04:A1:B2:...`.
    pub fn display_serial(&self) -> String {
        self.serial
            .as_bytes()
            .chunks(2)
            .map(|pair| String::from_utf8_lossy(pair).into_owned())
            .collect::<Vec<_>>()
            .join(":")
    }
}

#[derive(Debug, Clone)]
pub enum ReadOutcome {
    Read(TagReport),
    /// `serial` is set once the tag UID was read before things went wrong.
    Failed { serial: Option<String>, failure: Failure },
}
impl ReadOutcome {
    /// `None` when no tag was seen at all.
    pub fn status(&self) -> Option<TagStatus> {
        match self {
            ReadOutcome::Read(report) => Some(report.summary.status),
            ReadOutcome::Failed { failure: Failure::CardRemoved, .. } => Some(TagStatus::Removed),
            ReadOutcome::Failed { .. } => None,
        }
    }
    pub fn serial(&self) -> Option<&str> {
        match self {
            ReadOutcome::Read(report) => Some(&report.serial),
            ReadOutcome::Failed { serial, .. } => serial.as_deref(),
        }
    }
}

/// Drives one operation against a reader. Build a new session per operation.
pub struct SpoolSession<'r, R: CardReader + ?Sized> {
    reader: &'r mut R,
    config: SessionConfig,
    state: SessionState,
}
impl<'r, R: CardReader + ?Sized> SpoolSession<'r, R> {
    pub fn new(reader: &'r mut R, config: SessionConfig) -> Self {
        Self {
            reader,
            config,
            state: SessionState::WaitingForCard,
        }
    }
    pub const fn state(&self) -> SessionState {
        self.state
    }

    fn transition(&mut self, next: SessionState) {
        log::debug!("Session {:?} -> {:?}", self.state, next);
        self.state = next;
    }

    fn fail(&mut self, failure: Failure) -> Failure {
        self.transition(SessionState::Failed);
        failure
    }

    /// Waits for a card, connects and returns the tag serial.
    async fn connect(&mut self) -> Result<String, Failure> {
        log::info!("Waiting for tag...");
        match device::wait_for_card(self.reader, self.config.card_timeout, self.config.poll_interval).await {
            Ok(CardPresence::Present) => (),
            Ok(CardPresence::TimedOut) => {
                log::warn!("No card detected after {:?}", self.config.card_timeout);
                return Err(self.fail(Failure::NoCard));
            }
            Err(err) => {
                log::error!("Reader failed while waiting for a card: {err}");
                return Err(self.fail(Failure::from(&err)));
            }
        }
        let atr = match self.reader.connect() {
            Ok(atr) => atr,
            Err(err) => {
                log::warn!("Failed to connect to tag: {err}");
                return Err(self.fail(Failure::from(&err)));
            }
        };
        log::info!("Connected to NFC tag, ATR = {}", hex::encode_upper(&atr));
        self.transition(SessionState::Connected);

        let uid = match self.reader.transmit(&apdu::GET_UID) {
            Ok(response) if response.is_success() => response,
            Ok(response) => {
                log::warn!("Tag refused UID request with status {}", response.status());
                return Err(self.fail(Failure::CardRemoved));
            }
            Err(err) => {
                log::warn!("Failed to read tag UID: {err}");
                return Err(self.fail(Failure::from(&err)));
            }
        };
        let serial = hex::encode_upper(uid.data());
        log::info!("UID = {serial}");
        Ok(serial)
    }

    pub async fn write(&mut self, request: &WriteRequest) -> WriteOutcome {
        let serial = match self.connect().await {
            Ok(serial) => serial,
            Err(failure) => return WriteOutcome::Failed(failure),
        };
        self.transition(SessionState::Exchanging);

        let data = request.image(&serial).encode();
        let pages = match pages::write_pages(self.reader, &data) {
            Ok(pages) => pages,
            Err(err) => {
                log::error!("Writing tag failed: {err}");
                return WriteOutcome::Failed(self.fail(Failure::from(&err)));
            }
        };
        log::info!("Wrote {pages} pages to tag {serial}");

        match self.reader.transmit(&apdu::BEEP) {
            Ok(response) if response.is_success() => (),
            Ok(response) => log::warn!("Beep refused with status {}", response.status()),
            Err(err) => log::warn!("Beep failed: {err}"),
        }
        self.transition(SessionState::Done);
        WriteOutcome::Written { serial, pages }
    }

    pub async fn read(&mut self) -> ReadOutcome {
        let serial = match self.connect().await {
            Ok(serial) => serial,
            Err(failure) => return ReadOutcome::Failed { serial: None, failure },
        };
        self.transition(SessionState::Exchanging);

        let data = match pages::read_pages(self.reader) {
            Ok(data) => data,
            Err(err) => {
                log::error!("Reading tag {serial} failed: {err}");
                let failure = self.fail(Failure::from(&err));
                return ReadOutcome::Failed { serial: Some(serial), failure };
            }
        };
        let message = spooltag::decode_message(&data);
        if message.is_empty() {
            log::info!("Tag {serial} contains no spool records");
        }
        let summary = SpoolSummary::from_message(&message);
        self.transition(SessionState::Done);
        ReadOutcome::Read(TagReport { serial, summary, message })
    }
}
