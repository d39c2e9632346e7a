//! Table-driven CRC engine parameterized over width, polynomial, seed,
//! final XOR, and bit reflection. Not hardcoded to any one standard: the
//! per-width constructors carry common defaults and every parameter can be
//! overridden.

use crate::error::{ProtocolError, Result};

/// CRC-8-DVB-S2 default polynomial.
pub const CRC8_DEFAULT_POLY: u64 = 0xD5;
pub const CRC8_DEFAULT_SEED: u64 = 0x00;

/// CRC-16-CCITT default polynomial.
pub const CRC16_DEFAULT_POLY: u64 = 0x1021;
pub const CRC16_DEFAULT_SEED: u64 = 0xFFFF;

/// CRC-32 default polynomial.
pub const CRC32_DEFAULT_POLY: u64 = 0x04C1_1DB7;
pub const CRC32_DEFAULT_SEED: u64 = 0xFFFF_FFFF;

/// CRC-64-ECMA default polynomial.
pub const CRC64_DEFAULT_POLY: u64 = 0x42F0_E1EB_A9EA_3693;
pub const CRC64_DEFAULT_SEED: u64 = 0xFFFF_FFFF_FFFF_FFFF;

/// A fully-parameterized CRC calculator.
#[derive(Clone)]
pub struct Crc {
    bit_size: u32,
    seed: u64,
    xor: bool,
    reflect: bool,
    table: [u64; 256],
}

impl Crc {
    /// Build a calculator for `bit_size` in {8, 16, 32, 64}.
    pub fn new(bit_size: u32, poly: u64, seed: u64, xor: bool, reflect: bool) -> Result<Self> {
        if !matches!(bit_size, 8 | 16 | 32 | 64) {
            return Err(ProtocolError::InvalidCrcWidth(bit_size));
        }
        let mut table = [0u64; 256];
        for (index, entry) in table.iter_mut().enumerate() {
            *entry = compute_table_entry(index as u64, bit_size, poly);
        }
        Ok(Self {
            bit_size,
            seed,
            xor,
            reflect,
            table,
        })
    }

    /// CRC-8 with the DVB-S2 defaults.
    pub fn crc8() -> Self {
        Self::new(8, CRC8_DEFAULT_POLY, CRC8_DEFAULT_SEED, false, false)
            .expect("8 is a valid width")
    }

    /// CRC-16 with the CCITT defaults.
    pub fn crc16() -> Self {
        Self::new(16, CRC16_DEFAULT_POLY, CRC16_DEFAULT_SEED, false, false)
            .expect("16 is a valid width")
    }

    /// Standard CRC-32 (reflected, final XOR).
    pub fn crc32() -> Self {
        Self::new(32, CRC32_DEFAULT_POLY, CRC32_DEFAULT_SEED, true, true)
            .expect("32 is a valid width")
    }

    /// CRC-64-ECMA (reflected, final XOR).
    pub fn crc64() -> Self {
        Self::new(64, CRC64_DEFAULT_POLY, CRC64_DEFAULT_SEED, true, true)
            .expect("64 is a valid width")
    }

    /// Defaults for `bit_size` with any subset of parameters overridden.
    pub fn with_params(
        bit_size: u32,
        poly: Option<u64>,
        seed: Option<u64>,
        xor: Option<bool>,
        reflect: Option<bool>,
    ) -> Result<Self> {
        let defaults = match bit_size {
            8 => Self::crc8(),
            16 => Self::crc16(),
            32 => Self::crc32(),
            64 => Self::crc64(),
            other => return Err(ProtocolError::InvalidCrcWidth(other)),
        };
        match (poly, seed, xor, reflect) {
            (None, None, None, None) => Ok(defaults),
            _ => Self::new(
                bit_size,
                poly.unwrap_or(default_poly(bit_size)),
                seed.unwrap_or(default_seed(bit_size)),
                xor.unwrap_or(defaults.xor),
                reflect.unwrap_or(defaults.reflect),
            ),
        }
    }

    pub fn bit_size(&self) -> u32 {
        self.bit_size
    }

    /// Calculate the CRC of `data` using the configured seed.
    pub fn calc(&self, data: &[u8]) -> u64 {
        self.calc_seeded(data, self.seed)
    }

    /// Calculate the CRC of `data` starting from an explicit seed.
    pub fn calc_seeded(&self, data: &[u8], seed: u64) -> u64 {
        let mask = width_mask(self.bit_size);
        let shift = self.bit_size - 8;
        let mut crc = seed & mask;

        if self.reflect {
            for &byte in data {
                let index = ((crc >> shift) ^ u64::from(byte.reverse_bits())) & 0xFF;
                crc = ((crc << 8) & mask) ^ self.table[index as usize];
            }
            let out = if self.xor { crc ^ mask } else { crc };
            reverse_bits(out, self.bit_size)
        } else {
            for &byte in data {
                let index = ((crc >> shift) ^ u64::from(byte)) & 0xFF;
                crc = ((crc << 8) & mask) ^ self.table[index as usize];
            }
            if self.xor {
                crc ^ mask
            } else {
                crc
            }
        }
    }
}

impl std::fmt::Debug for Crc {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Crc")
            .field("bit_size", &self.bit_size)
            .field("seed", &self.seed)
            .field("xor", &self.xor)
            .field("reflect", &self.reflect)
            .finish()
    }
}

fn default_poly(bit_size: u32) -> u64 {
    match bit_size {
        8 => CRC8_DEFAULT_POLY,
        16 => CRC16_DEFAULT_POLY,
        32 => CRC32_DEFAULT_POLY,
        _ => CRC64_DEFAULT_POLY,
    }
}

fn default_seed(bit_size: u32) -> u64 {
    match bit_size {
        8 => CRC8_DEFAULT_SEED,
        16 => CRC16_DEFAULT_SEED,
        32 => CRC32_DEFAULT_SEED,
        _ => CRC64_DEFAULT_SEED,
    }
}

fn width_mask(bit_size: u32) -> u64 {
    if bit_size == 64 {
        u64::MAX
    } else {
        (1u64 << bit_size) - 1
    }
}

/// Reverse the low `bit_size` bits of `value`.
fn reverse_bits(value: u64, bit_size: u32) -> u64 {
    value.reverse_bits() >> (64 - bit_size)
}

fn compute_table_entry(index: u64, bit_size: u32, poly: u64) -> u64 {
    let mask = width_mask(bit_size);
    let top_bit = 1u128 << (bit_size - 1);
    let mut crc = u128::from(index) << (bit_size - 8);
    for _ in 0..8 {
        if crc & top_bit != 0 {
            crc = (crc << 1) ^ u128::from(poly);
        } else {
            crc <<= 1;
        }
    }
    (crc as u64) & mask
}

#[cfg(test)]
mod tests {
    use super::*;

    // Check values are the standard catalog CRCs of b"123456789".
    const CHECK_INPUT: &[u8] = b"123456789";

    #[test]
    fn crc8_dvb_s2_check_value() {
        assert_eq!(Crc::crc8().calc(CHECK_INPUT), 0xBC);
    }

    #[test]
    fn crc16_ccitt_check_value() {
        assert_eq!(Crc::crc16().calc(CHECK_INPUT), 0x29B1);
    }

    #[test]
    fn crc32_check_value() {
        assert_eq!(Crc::crc32().calc(CHECK_INPUT), 0xCBF4_3926);
    }

    #[test]
    fn crc32_mpeg2_parameters() {
        // poly 0x04C11DB7, seed 0xFFFFFFFF, no xor, no reflect
        let crc = Crc::new(32, CRC32_DEFAULT_POLY, CRC32_DEFAULT_SEED, false, false).unwrap();
        assert_eq!(crc.calc(CHECK_INPUT), 0x0376_E6E7);
    }

    #[test]
    fn crc64_xz_check_value() {
        assert_eq!(Crc::crc64().calc(CHECK_INPUT), 0x995D_C9BB_DF19_39FA);
    }

    #[test]
    fn single_bit_flip_is_detected() {
        let crc = Crc::crc32();
        let data = b"\x01\x02\x03\x04";
        let reference = crc.calc(data);
        for byte_index in 0..data.len() {
            for bit in 0..8 {
                let mut corrupted = data.to_vec();
                corrupted[byte_index] ^= 1 << bit;
                assert_ne!(crc.calc(&corrupted), reference);
            }
        }
    }

    #[test]
    fn explicit_seed_overrides_default() {
        let crc = Crc::crc16();
        assert_ne!(crc.calc_seeded(CHECK_INPUT, 0x0000), crc.calc(CHECK_INPUT));
    }

    #[test]
    fn with_params_merges_defaults() {
        let default = Crc::crc16();
        let merged = Crc::with_params(16, None, None, None, None).unwrap();
        assert_eq!(merged.calc(CHECK_INPUT), default.calc(CHECK_INPUT));

        let custom = Crc::with_params(16, Some(0x8005), None, None, None).unwrap();
        assert_ne!(custom.calc(CHECK_INPUT), default.calc(CHECK_INPUT));
    }

    #[test]
    fn invalid_width_is_rejected() {
        assert!(matches!(
            Crc::new(24, 0x1021, 0, false, false),
            Err(ProtocolError::InvalidCrcWidth(24))
        ));
    }

    #[test]
    fn empty_input_yields_seed_transform() {
        // With no data the non-reflected CRC is just the seed (optionally
        // xored).
        let crc = Crc::new(16, 0x1021, 0xFFFF, false, false).unwrap();
        assert_eq!(crc.calc(b""), 0xFFFF);
    }
}
