//! Bit-level integer and float primitives
//!
//! All readers take a byte buffer plus a *bit* offset into it. Bit `0` of the
//! buffer is the most significant bit of byte 0 for big and middle endian and
//! the least significant bit of byte 0 for little endian, so a little-endian
//! one-bit field at offset 0 reads `buf[0] & 1`.

use byteorder::{BigEndian, ByteOrder, LittleEndian};

use crate::endian::Endian;
use crate::error::{Error, Result};

/// Widest integer the primitives can return
pub const MAX_BITS: u32 = 64;

/// Read an unsigned integer of `nbits` bits (0 to 64)
///
/// Reading zero bits returns 0. A range that leaves `buf` fails with
/// [`Error::BitRead`].
pub fn read_uint(buf: &[u8], bit_offset: u64, nbits: u32, endian: Endian) -> Result<u64> {
    if nbits > MAX_BITS {
        return Err(Error::internal(format!("can't read {} bits as an integer", nbits)));
    }
    if nbits == 0 {
        return Ok(0);
    }
    let end = bit_offset + u64::from(nbits);
    if end > buf.len() as u64 * 8 {
        return Err(Error::BitRead {
            offset: bit_offset,
            nbits: u64::from(nbits),
        });
    }

    match endian {
        Endian::Big => Ok(read_msb_first(buf, bit_offset, nbits)),
        Endian::Little => {
            if bit_offset % 8 == 0 && nbits % 8 == 0 {
                let start = (bit_offset / 8) as usize;
                let nbytes = (nbits / 8) as usize;
                Ok(LittleEndian::read_uint(&buf[start..start + nbytes], nbytes))
            } else {
                Ok(read_lsb_first(buf, bit_offset, nbits))
            }
        }
        Endian::Middle => {
            // Swap the enclosing 16-bit words, then read as big endian
            let first = ((bit_offset / 8) & !1) as usize;
            let last = (end.div_ceil(8) as usize).next_multiple_of(2);
            if last > buf.len() {
                return Err(Error::BitRead {
                    offset: bit_offset,
                    nbits: u64::from(nbits),
                });
            }
            let mut words = buf[first..last].to_vec();
            swap_words(&mut words);
            Ok(read_msb_first(&words, bit_offset - first as u64 * 8, nbits))
        }
    }
}

/// Read a two's complement integer of `nbits` bits and sign-extend it
pub fn read_int(buf: &[u8], bit_offset: u64, nbits: u32, endian: Endian) -> Result<i64> {
    let value = read_uint(buf, bit_offset, nbits, endian)?;
    Ok(sign_extend(value, nbits))
}

/// Sign-extend the low `nbits` bits of `value`
pub fn sign_extend(value: u64, nbits: u32) -> i64 {
    if nbits == 0 {
        return 0;
    }
    if nbits >= 64 {
        return value as i64;
    }
    let shift = 64 - nbits;
    ((value << shift) as i64) >> shift
}

/// Mask keeping the low `nbits` bits
pub fn mask(nbits: u32) -> u64 {
    if nbits >= 64 { u64::MAX } else { (1u64 << nbits) - 1 }
}

fn read_msb_first(buf: &[u8], bit_offset: u64, nbits: u32) -> u64 {
    if bit_offset % 8 == 0 && nbits % 8 == 0 {
        let start = (bit_offset / 8) as usize;
        let nbytes = (nbits / 8) as usize;
        return BigEndian::read_uint(&buf[start..start + nbytes], nbytes);
    }
    let mut value = 0u64;
    for i in 0..u64::from(nbits) {
        let pos = bit_offset + i;
        let bit = (buf[(pos / 8) as usize] >> (7 - pos % 8)) & 1;
        value = (value << 1) | u64::from(bit);
    }
    value
}

fn read_lsb_first(buf: &[u8], bit_offset: u64, nbits: u32) -> u64 {
    let mut value = 0u64;
    for i in 0..u64::from(nbits) {
        let pos = bit_offset + i;
        let bit = (buf[(pos / 8) as usize] >> (pos % 8)) & 1;
        value |= u64::from(bit) << i;
    }
    value
}

/// Swap the two bytes of every 16-bit word in place
///
/// A trailing odd byte is left untouched.
pub fn swap_words(buf: &mut [u8]) {
    for pair in buf.chunks_exact_mut(2) {
        pair.swap(0, 1);
    }
}

/// Encode the low `nbytes` bytes of `value` in the given byte order
pub fn long2raw(value: u64, endian: Endian, nbytes: usize) -> Result<Vec<u8>> {
    if !(1..=8).contains(&nbytes) {
        return Err(Error::internal(format!("can't encode an integer on {} bytes", nbytes)));
    }
    let value = value & mask(nbytes as u32 * 8);
    let mut raw = vec![0u8; nbytes];
    match endian {
        Endian::Big => BigEndian::write_uint(&mut raw, value, nbytes),
        Endian::Little => LittleEndian::write_uint(&mut raw, value, nbytes),
        Endian::Middle => {
            if nbytes % 2 != 0 {
                return Err(Error::internal("middle endian needs an even number of bytes"));
            }
            BigEndian::write_uint(&mut raw, value, nbytes);
            swap_words(&mut raw);
        }
    }
    Ok(raw)
}

/// Decode an unsigned integer from 1 to 8 bytes
pub fn raw2long(raw: &[u8], endian: Endian) -> Result<u64> {
    let nbytes = raw.len();
    if !(1..=8).contains(&nbytes) {
        return Err(Error::internal(format!("can't decode an integer from {} bytes", nbytes)));
    }
    match endian {
        Endian::Big => Ok(BigEndian::read_uint(raw, nbytes)),
        Endian::Little => Ok(LittleEndian::read_uint(raw, nbytes)),
        Endian::Middle => {
            if nbytes % 2 != 0 {
                return Err(Error::internal("middle endian needs an even number of bytes"));
            }
            let mut words = raw.to_vec();
            swap_words(&mut words);
            Ok(BigEndian::read_uint(&words, nbytes))
        }
    }
}

/// Put `raw` into big-endian byte order
fn to_big_endian(raw: &[u8], endian: Endian) -> Vec<u8> {
    let mut bytes = raw.to_vec();
    match endian {
        Endian::Big => {}
        Endian::Little => bytes.reverse(),
        Endian::Middle => swap_words(&mut bytes),
    }
    bytes
}

/// Decode an IEEE 754 single precision float
pub fn float32(raw: &[u8], endian: Endian) -> Result<f32> {
    if raw.len() != 4 {
        return Err(Error::internal("float32 needs 4 bytes"));
    }
    Ok(BigEndian::read_f32(&to_big_endian(raw, endian)))
}

/// Decode an IEEE 754 double precision float
pub fn float64(raw: &[u8], endian: Endian) -> Result<f64> {
    if raw.len() != 8 {
        return Err(Error::internal("float64 needs 8 bytes"));
    }
    Ok(BigEndian::read_f64(&to_big_endian(raw, endian)))
}

/// Decode an 80-bit x87 extended precision float
///
/// Layout (big endian): 1 sign bit, 15-bit exponent biased by 16383, 64-bit
/// significand with an explicit leading one.
pub fn float80(raw: &[u8], endian: Endian) -> Result<f64> {
    if raw.len() != 10 {
        return Err(Error::internal("float80 needs 10 bytes"));
    }
    let bytes = to_big_endian(raw, endian);
    let head = BigEndian::read_u16(&bytes[0..2]);
    let mantissa = BigEndian::read_u64(&bytes[2..10]);
    let negative = head & 0x8000 != 0;
    let exponent = i32::from(head & 0x7FFF);

    let magnitude = if exponent == 0 {
        0.0
    } else if exponent == 0x7FFF {
        if mantissa & 0x7FFF_FFFF_FFFF_FFFF != 0 {
            return Ok(f64::NAN);
        }
        f64::INFINITY
    } else {
        let fraction = mantissa as f64 / 2f64.powi(63);
        fraction * 2f64.powi(exponent - 16383)
    };
    Ok(if negative { -magnitude } else { magnitude })
}

/// Encode an f32 in the given byte order
pub fn float32_to_raw(value: f32, endian: Endian) -> Vec<u8> {
    let mut raw = value.to_be_bytes().to_vec();
    match endian {
        Endian::Big => {}
        Endian::Little => raw.reverse(),
        Endian::Middle => swap_words(&mut raw),
    }
    raw
}

/// Encode an f64 in the given byte order
pub fn float64_to_raw(value: f64, endian: Endian) -> Vec<u8> {
    let mut raw = value.to_be_bytes().to_vec();
    match endian {
        Endian::Big => {}
        Endian::Little => raw.reverse(),
        Endian::Middle => swap_words(&mut raw),
    }
    raw
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_read_zero_bits() {
        assert_eq!(read_uint(&[], 0, 0, Endian::Big).unwrap(), 0);
        assert_eq!(read_uint(&[0xFF], 8, 0, Endian::Little).unwrap(), 0);
    }

    #[test]
    fn test_big_endian_bits() {
        let buf = [0b1010_0000, 0xFF];
        assert_eq!(read_uint(&buf, 0, 1, Endian::Big).unwrap(), 1);
        assert_eq!(read_uint(&buf, 1, 1, Endian::Big).unwrap(), 0);
        assert_eq!(read_uint(&buf, 0, 3, Endian::Big).unwrap(), 0b101);
        assert_eq!(read_uint(&buf, 4, 8, Endian::Big).unwrap(), 0x0F);
        assert_eq!(read_uint(&buf, 0, 16, Endian::Big).unwrap(), 0xA0FF);
    }

    #[test]
    fn test_little_endian_bits_are_lsb_first() {
        // gzip FLG byte with FNAME (bit 3) set
        let buf = [0x08];
        assert_eq!(read_uint(&buf, 0, 1, Endian::Little).unwrap(), 0);
        assert_eq!(read_uint(&buf, 3, 1, Endian::Little).unwrap(), 1);
        assert_eq!(read_uint(&buf, 5, 3, Endian::Little).unwrap(), 0);

        let buf = [0x34, 0x12];
        assert_eq!(read_uint(&buf, 0, 16, Endian::Little).unwrap(), 0x1234);
        assert_eq!(read_uint(&buf, 4, 8, Endian::Little).unwrap(), 0x23);
    }

    #[test]
    fn test_middle_endian() {
        let buf = [0x12, 0x34, 0x56, 0x78];
        assert_eq!(read_uint(&buf, 0, 32, Endian::Middle).unwrap(), 0x3412_7856);
        assert_eq!(read_uint(&buf, 0, 16, Endian::Middle).unwrap(), 0x3412);
        assert_eq!(read_uint(&buf, 16, 16, Endian::Middle).unwrap(), 0x7856);
        assert_eq!(long2raw(0x3412_7856, Endian::Middle, 4).unwrap(), buf.to_vec());
    }

    #[test]
    fn test_read_past_end() {
        let buf = [0u8; 2];
        assert!(read_uint(&buf, 0, 16, Endian::Big).is_ok());
        assert!(matches!(
            read_uint(&buf, 1, 16, Endian::Big),
            Err(Error::BitRead { offset: 1, nbits: 16 })
        ));
        assert!(read_uint(&buf, 0, 65, Endian::Big).is_err());
    }

    #[test]
    fn test_sign_extension() {
        assert_eq!(read_int(&[0xFF], 0, 8, Endian::Big).unwrap(), -1);
        assert_eq!(read_int(&[0x80, 0x00], 0, 16, Endian::Big).unwrap(), -32768);
        assert_eq!(read_int(&[0b0100_0000], 0, 2, Endian::Big).unwrap(), 1);
        assert_eq!(read_int(&[0b1000_0000], 0, 2, Endian::Big).unwrap(), -2);
        assert_eq!(sign_extend(u64::MAX, 64), -1);
        assert_eq!(sign_extend(0x8000_0000_0000, 48), -0x8000_0000_0000);
    }

    #[test]
    fn test_long2raw() {
        assert_eq!(long2raw(0x1234, Endian::Big, 2).unwrap(), vec![0x12, 0x34]);
        assert_eq!(long2raw(0x1234, Endian::Little, 2).unwrap(), vec![0x34, 0x12]);
        assert_eq!(long2raw(0x12_3456, Endian::Little, 3).unwrap(), vec![0x56, 0x34, 0x12]);
        // values wider than nbytes are truncated
        assert_eq!(long2raw(0x1FF, Endian::Big, 1).unwrap(), vec![0xFF]);
        assert!(long2raw(1, Endian::Big, 0).is_err());
        assert!(long2raw(1, Endian::Middle, 3).is_err());
    }

    #[test]
    fn test_floats() {
        assert_eq!(float32(&[0x3F, 0x80, 0, 0], Endian::Big).unwrap(), 1.0);
        assert_eq!(float32(&[0, 0, 0x80, 0x3F], Endian::Little).unwrap(), 1.0);
        assert_eq!(float64(&float64_to_raw(-2.5, Endian::Little), Endian::Little).unwrap(), -2.5);
    }

    #[test]
    fn test_float80() {
        // 1.0 = exponent 16383, significand 0x8000000000000000
        let one = [0x3F, 0xFF, 0x80, 0, 0, 0, 0, 0, 0, 0];
        assert_eq!(float80(&one, Endian::Big).unwrap(), 1.0);

        let mut reversed = one;
        reversed.reverse();
        assert_eq!(float80(&reversed, Endian::Little).unwrap(), 1.0);

        // 44100.0 as stored in AIFF headers
        let rate = [0x40, 0x0E, 0xAC, 0x44, 0, 0, 0, 0, 0, 0];
        assert_eq!(float80(&rate, Endian::Big).unwrap(), 44100.0);

        let zero = [0x80, 0x00, 0x12, 0, 0, 0, 0, 0, 0, 0];
        assert_eq!(float80(&zero, Endian::Big).unwrap(), 0.0);

        let inf = [0xFF, 0xFF, 0x80, 0, 0, 0, 0, 0, 0, 0];
        assert_eq!(float80(&inf, Endian::Big).unwrap(), f64::NEG_INFINITY);

        let nan = [0x7F, 0xFF, 0xC0, 0, 0, 0, 0, 0, 0, 0];
        assert!(float80(&nan, Endian::Big).unwrap().is_nan());
    }

    proptest! {
        #[test]
        fn prop_little_endian_matches_byteorder(value: u32) {
            let buf = value.to_le_bytes();
            prop_assert_eq!(read_uint(&buf, 0, 32, Endian::Little).unwrap(), u64::from(value));
        }

        #[test]
        fn prop_unaligned_big_endian_read(value: u16, shift in 0u64..8) {
            // place `value` at bit offset `shift`
            let wide = u32::from(value) << (16 - shift);
            let buf = wide.to_be_bytes();
            prop_assert_eq!(read_uint(&buf, shift, 16, Endian::Big).unwrap(), u64::from(value));
        }
    }
}
