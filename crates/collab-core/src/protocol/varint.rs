//! Unsigned LEB128-style varints.
//!
//! Seven value bits per byte, least significant group first, high bit as the
//! continuation flag. At most ten bytes encode a `u64`.

use bytes::BytesMut;

/// Decode failure: truncated input or an encoding that overflows `u64`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VarintError;

/// Append `value` to `dst` in varint encoding.
pub fn write_var_u64(dst: &mut BytesMut, mut value: u64) {
    loop {
        let byte = (value & 0x7f) as u8;
        value >>= 7;
        if value == 0 {
            dst.extend_from_slice(&[byte]);
            return;
        }
        dst.extend_from_slice(&[byte | 0x80]);
    }
}

/// Read a varint from the front of `input`, advancing it past the encoding.
pub fn read_var_u64(input: &mut &[u8]) -> Result<u64, VarintError> {
    let mut value: u64 = 0;
    let mut shift: u32 = 0;
    let mut consumed = 0;

    for &byte in input.iter() {
        consumed += 1;
        let group = u64::from(byte & 0x7f);
        // The tenth byte may only carry the single remaining bit.
        if shift == 63 && group > 1 {
            return Err(VarintError);
        }
        if shift > 63 {
            return Err(VarintError);
        }
        value |= group << shift;
        if byte & 0x80 == 0 {
            *input = &input[consumed..];
            return Ok(value);
        }
        shift += 7;
    }

    Err(VarintError)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip(value: u64) {
        let mut buf = BytesMut::new();
        write_var_u64(&mut buf, value);
        let mut slice: &[u8] = &buf;
        assert_eq!(read_var_u64(&mut slice), Ok(value));
        assert!(slice.is_empty());
    }

    #[test]
    fn round_trips_boundaries() {
        for value in [0, 1, 127, 128, 16_383, 16_384, u64::from(u32::MAX), u64::MAX] {
            round_trip(value);
        }
    }

    #[test]
    fn single_byte_values() {
        let mut buf = BytesMut::new();
        write_var_u64(&mut buf, 5);
        assert_eq!(&buf[..], &[5]);
    }

    #[test]
    fn truncated_input_errors() {
        let mut slice: &[u8] = &[0x80];
        assert_eq!(read_var_u64(&mut slice), Err(VarintError));
    }

    #[test]
    fn overlong_encoding_errors() {
        let mut slice: &[u8] = &[0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0x7f];
        assert_eq!(read_var_u64(&mut slice), Err(VarintError));
    }

    #[test]
    fn advances_past_consumed_bytes() {
        let mut buf = BytesMut::new();
        write_var_u64(&mut buf, 300);
        buf.extend_from_slice(b"tail");
        let mut slice: &[u8] = &buf;
        assert_eq!(read_var_u64(&mut slice), Ok(300));
        assert_eq!(slice, b"tail");
    }
}
