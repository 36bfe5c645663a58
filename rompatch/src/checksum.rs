//! Checksums over whole buffers.
//!
//! Only [`crc32`] takes part in patch validation. The rest exist to identify
//! ROMs for display purposes.

const CRC32: crc::Crc<u32> = crc::Crc::<u32>::new(&crc::CRC_32_ISO_HDLC);
// CRC-16/CCITT-FALSE
const CRC16: crc::Crc<u16> = crc::Crc::<u16>::new(&crc::CRC_16_IBM_3740);

pub fn crc32(data: &[u8]) -> u32 {
    CRC32.checksum(data)
}

pub fn crc16(data: &[u8]) -> u16 {
    CRC16.checksum(data)
}

pub fn adler32(data: &[u8]) -> u32 {
    let mut hasher = simd_adler32::Adler32::new();
    hasher.write(data);
    hasher.finish()
}

pub fn md5_hex(data: &[u8]) -> String {
    format!("{:x}", md5::compute(data))
}

pub(crate) fn verify_crc(data: &[u8], expected: u32) -> Result<(), ()> {
    (crc32(data) == expected).then_some(()).ok_or(())
}
