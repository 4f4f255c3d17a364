//! Single byte checksum guarding the stat record.
//!
//! Polynomial `0x07`, zero init, no reflection and no final xor. Tags written
//! by the printer vendor's own tooling use the same parameters.

pub const CRC8: crc::Crc<u8> = crc::Crc::<u8>::new(&crc::CRC_8_SMBUS);

#[inline]
pub fn checksum(bytes: &[u8]) -> u8 {
    CRC8.checksum(bytes)
}
