//! CRC-64 (ECMA-182) used by the OpenIGTLink header
//!
//! MSB-first, initial value 0, no final XOR.

/// ECMA-182 generator polynomial
pub const POLYNOMIAL: u64 = 0x42F0_E1EB_A9EA_3693;

const TABLE: [u64; 256] = build_table();

const fn build_table() -> [u64; 256] {
    let mut table = [0u64; 256];
    let mut i = 0;
    while i < 256 {
        let mut crc = (i as u64) << 56;
        let mut bit = 0;
        while bit < 8 {
            crc = if crc & (1 << 63) != 0 {
                (crc << 1) ^ POLYNOMIAL
            } else {
                crc << 1
            };
            bit += 1;
        }
        table[i] = crc;
        i += 1;
    }
    table
}

/// CRC-64 of a message body
///
/// # Examples
///
/// ```
/// use igtl_tracking_server::protocol::calculate_crc;
///
/// assert_eq!(calculate_crc(b""), 0);
/// assert_eq!(calculate_crc(b"123456789"), 0x6C40_DF5F_0B49_7347);
/// ```
pub fn calculate_crc(data: &[u8]) -> u64 {
    data.iter().fold(0u64, |crc, &byte| {
        TABLE[(((crc >> 56) as u8) ^ byte) as usize] ^ (crc << 8)
    })
}

/// Whether `data` matches the CRC carried in a header
pub fn verify_crc(data: &[u8], expected: u64) -> bool {
    calculate_crc(data) == expected
}
