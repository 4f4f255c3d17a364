use std::fmt::Display;
use super::TransmitError;

/// Returns the UID of the tag in the field.
pub const GET_UID: [u8; 5] = [0xFF, 0xCA, 0x00, 0x00, 0x00];
/// Buzzer on for 300ms, LEDs unchanged.
pub const BEEP: [u8; 9] = [0xFF, 0x00, 0x40, 0x00, 0x04, 0x01, 0x00, 0x03, 0x03];

pub fn read_pages(page: u16, count: u8) -> [u8; 5] {
    let [hi, lo] = page.to_be_bytes();
    [0xFF, 0xB0, hi, lo, count]
}

pub fn write_page(page: u16, data: &[u8; 4]) -> [u8; 9] {
    let [hi, lo] = page.to_be_bytes();
    [0xFF, 0xD6, hi, lo, 0x04, data[0], data[1], data[2], data[3]]
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde_derive::Serialize)]
pub struct StatusWord(pub u8, pub u8);
impl StatusWord {
    pub const SUCCESS: Self = Self(0x90, 0x00);
    pub const FAILED: Self = Self(0x63, 0x00);
}
impl Display for StatusWord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:02X} {:02X}", self.0, self.1)
    }
}

/// Response body plus the trailing status word.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    data: Vec<u8>,
    status: StatusWord,
}
impl Response {
    pub fn new(data: Vec<u8>, status: StatusWord) -> Self {
        Self { data, status }
    }
    pub fn from_bytes(raw: &[u8]) -> Result<Self, TransmitError> {
        match raw.split_last_chunk::<2>() {
            Some((data, [sw1, sw2])) => Ok(Self::new(data.to_vec(), StatusWord(*sw1, *sw2))),
            None => Err(TransmitError::Protocol(format!("APDU response of {} bytes has no status word", raw.len()))),
        }
    }
    pub fn data(&self) -> &[u8] { &self.data }
    pub const fn status(&self) -> StatusWord { self.status }
    pub fn is_success(&self) -> bool { self.status == StatusWord::SUCCESS }
}
