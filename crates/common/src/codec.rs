//! 7-bit-safe encoding of signed 16-bit targets: three bytes, each `<= 0x7F`,
//! carrying bits 0-6, 7-13 and 14-15 of the two's-complement value.

use crate::error::{StageError, StageResult};

/// Encoded form of one target.
pub type TargetFrame = [u8; 3];

const DATA_MASK: u8 = 0x7F;
const TOP_MASK: u8 = 0x03;

/// Encode any integer, rejecting values that do not fit in an `i16`.
pub fn encode(value: i64) -> StageResult<TargetFrame> {
    let value = i16::try_from(value).map_err(|_| StageError::OutOfRange(value))?;
    Ok(encode_i16(value))
}

/// Encode a value already known to be in range.
pub fn encode_i16(value: i16) -> TargetFrame {
    let raw = value as u16;
    [
        (raw & 0x7F) as u8,
        ((raw >> 7) & 0x7F) as u8,
        ((raw >> 14) & 0x03) as u8,
    ]
}

/// Reassemble a target. Bits above the documented layout are ignored.
pub fn decode(b0: u8, b1: u8, b2: u8) -> i16 {
    let raw = (u16::from(b2 & TOP_MASK) << 14)
        | (u16::from(b1 & DATA_MASK) << 7)
        | u16::from(b0 & DATA_MASK);
    raw as i16
}

/// Like [`decode`], but refuses frames that could not have come from [`encode`].
pub fn decode_checked(frame: TargetFrame) -> StageResult<i16> {
    let [b0, b1, b2] = frame;
    if b0 > DATA_MASK || b1 > DATA_MASK || b2 > TOP_MASK {
        return Err(StageError::MalformedFrame(frame));
    }
    Ok(decode(b0, b1, b2))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_i16_round_trips() {
        for v in i16::MIN..=i16::MAX {
            let [b0, b1, b2] = encode_i16(v);
            assert_eq!(decode(b0, b1, b2), v);
        }
    }

    #[test]
    fn encoded_bytes_are_seven_bit_safe() {
        for v in [i16::MIN, -1, 0, 1, 10, 0x3FFF, 0x4000, i16::MAX] {
            assert!(encode_i16(v).iter().all(|b| *b <= 0x7F), "value {v}");
        }
    }

    #[test]
    fn known_layouts() {
        assert_eq!(encode(10).unwrap(), [10, 0, 0]);
        assert_eq!(encode(128).unwrap(), [0, 1, 0]);
        assert_eq!(encode(-1).unwrap(), [0x7F, 0x7F, 0x03]);
        assert_eq!(encode(-32768).unwrap(), [0, 0, 0x02]);
        assert_eq!(encode(32767).unwrap(), [0x7F, 0x7F, 0x01]);
    }

    #[test]
    fn range_boundaries() {
        assert!(encode(-32768).is_ok());
        assert!(encode(32767).is_ok());
        assert!(matches!(encode(32768), Err(StageError::OutOfRange(32768))));
        assert!(matches!(encode(-32769), Err(StageError::OutOfRange(-32769))));
        assert!(matches!(encode(i64::MAX), Err(StageError::OutOfRange(_))));
    }

    #[test]
    fn checked_decode_rejects_high_bits() {
        assert_eq!(decode_checked([10, 0, 0]).unwrap(), 10);
        assert!(matches!(
            decode_checked([0x80, 0, 0]),
            Err(StageError::MalformedFrame(_))
        ));
        assert!(matches!(
            decode_checked([0, 0, 0x04]),
            Err(StageError::MalformedFrame(_))
        ));
    }
}
