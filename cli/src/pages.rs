//! Page addressed tag storage.
//!
//! User memory starts at page 4. Every page is 4 bytes and costs one command
//! round trip; a failing page aborts the rest of the sequence.

use spooltag::PAGE_SIZE;
use crate::device::{CardReader, StatusWord, TransmitError, apdu};

pub const FIRST_PAGE: u16 = 4;
/// Nothing this tool writes comes close to this, so a read stops here.
pub const READ_SPAN: usize = 300;

#[derive(thiserror::Error, Debug)]
pub enum PageError {
    #[error("Data of {0} bytes is not a whole number of 4 byte pages")]
    Unaligned(usize),
    #[error("Page {page} failed after {completed} pages: {source}")]
    Transmit {
        page: u16,
        completed: usize,
        #[source]
        source: TransmitError,
    },
    #[error("Page {page} answered {status} after {completed} pages")]
    Status {
        page: u16,
        completed: usize,
        status: StatusWord,
    },
    #[error("Page {page} returned {got} bytes after {completed} pages")]
    ShortRead {
        page: u16,
        completed: usize,
        got: usize,
    },
}
impl PageError {
    /// Pages that went through before the failure.
    pub const fn completed(&self) -> usize {
        match self {
            PageError::Unaligned(_) => 0,
            PageError::Transmit { completed, .. } => *completed,
            PageError::Status { completed, .. } => *completed,
            PageError::ShortRead { completed, .. } => *completed,
        }
    }
}

/// Writes `data` to consecutive pages from [`FIRST_PAGE`] on and returns the
/// number of pages written.
///
/// `data` must already be padded to whole pages.
pub fn write_pages<R: CardReader + ?Sized>(reader: &mut R, data: &[u8]) -> Result<usize, PageError> {
    if data.len() % PAGE_SIZE != 0 {
        return Err(PageError::Unaligned(data.len()));
    }
    for (completed, chunk) in data.chunks_exact(PAGE_SIZE).enumerate() {
        let page = FIRST_PAGE + completed as u16;
        let mut bytes = [0u8; 4];
        bytes.copy_from_slice(chunk);
        let response = reader
            .transmit(&apdu::write_page(page, &bytes))
            .map_err(|source| PageError::Transmit { page, completed, source })?;
        log::debug!("[{page:02x}] = {} status = {}", hex::encode_upper(bytes), response.status());
        if !response.is_success() {
            return Err(PageError::Status { page, completed, status: response.status() });
        }
    }
    Ok(data.len() / PAGE_SIZE)
}

/// Reads [`READ_SPAN`] bytes starting at [`FIRST_PAGE`].
pub fn read_pages<R: CardReader + ?Sized>(reader: &mut R) -> Result<Vec<u8>, PageError> {
    let mut data = Vec::with_capacity(READ_SPAN);
    for completed in 0..READ_SPAN / PAGE_SIZE {
        let page = FIRST_PAGE + completed as u16;
        let response = reader
            .transmit(&apdu::read_pages(page, PAGE_SIZE as u8))
            .map_err(|source| PageError::Transmit { page, completed, source })?;
        log::trace!("[{page:02x}] = {} status = {}", hex::encode_upper(response.data()), response.status());
        if !response.is_success() {
            return Err(PageError::Status { page, completed, status: response.status() });
        }
        match response.data().get(..PAGE_SIZE) {
            Some(bytes) => data.extend_from_slice(bytes),
            None => return Err(PageError::ShortRead { page, completed, got: response.data().len() }),
        }
    }
    Ok(data)
}
