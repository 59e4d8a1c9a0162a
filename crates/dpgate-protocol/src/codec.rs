//! The DP value codec.
//!
//! Two pure functions sit at the heart of the adapter:
//!
//! - [`decode`] turns a received [`DataPointFrame`] into a [`DecodedValue`].
//!   It never fails loudly: an unknown datatype tag yields `None`, which
//!   callers can tell apart from a legitimate `false` or `0`.
//! - [`encode`] turns a typed value back into payload bytes. It is strict:
//!   anything that cannot be represented exactly is rejected with
//!   [`ProtocolError::InvalidValue`] before it can reach the radio.
//!
//! [`encode_bounded`] adds range checks for settings whose legal values
//! are a known set (power-on behavior, brightness limits, ...).

use serde::{Deserialize, Serialize};

use crate::{DataPointFrame, Datatype, DecodedValue, ProtocolError};

// ---------------------------------------------------------------------------
// Decode
// ---------------------------------------------------------------------------

/// Decodes a frame payload according to its datatype tag.
///
/// | datatype       | rule                                                  |
/// |----------------|-------------------------------------------------------|
/// | `bool`         | first byte equals 1                                   |
/// | `value`/`bitmap` | big-endian accumulation of every byte               |
/// | `string`       | each byte is one character code                       |
/// | `enum`         | first byte                                            |
/// | `raw`          | payload unchanged                                     |
///
/// Integer accumulation keeps no width check; payloads longer than eight
/// bytes keep their low 64 bits. Returns `None` for unknown tags and for
/// an `enum` record with no payload byte.
///
/// The wire width of `value` and `bitmap` is 4 bytes. A wider payload
/// still decodes, but [`encode`] only takes the result back if it fits
/// in 4 bytes, so `decode(encode(decode(p))) == decode(p)` holds for
/// exactly those payloads.
pub fn decode(frame: &DataPointFrame) -> Option<DecodedValue> {
    let Some(datatype) = frame.datatype() else {
        tracing::debug!(
            dp = %frame.dp,
            tag = frame.tag,
            "unknown datatype tag, no value decoded"
        );
        return None;
    };

    let payload = &frame.payload;
    let value = match datatype {
        Datatype::Raw => DecodedValue::Raw(payload.clone()),
        Datatype::Bool => DecodedValue::Bool(payload.first() == Some(&1)),
        Datatype::Value => DecodedValue::Value(accumulate(payload)),
        Datatype::Bitmap => DecodedValue::Bitmap(accumulate(payload)),
        Datatype::String => DecodedValue::String(payload.iter().map(|&b| char::from(b)).collect()),
        Datatype::Enum => match payload.first() {
            Some(&e) => DecodedValue::Enum(e),
            None => {
                tracing::debug!(dp = %frame.dp, "enum record without payload byte");
                return None;
            }
        },
    };
    Some(value)
}

/// `acc = acc * 256 + byte` over every byte, in order.
fn accumulate(bytes: &[u8]) -> u64 {
    bytes
        .iter()
        .fold(0u64, |acc, &b| acc.wrapping_mul(256).wrapping_add(u64::from(b)))
}

// ---------------------------------------------------------------------------
// Encode
// ---------------------------------------------------------------------------

/// Encodes `value` as the payload of a `datatype` record.
///
/// # Errors
/// [`ProtocolError::InvalidValue`] when the value's variant does not match
/// `datatype`, when an integer does not fit the wire width (4 bytes for
/// `value`, at most 4 for `bitmap`), or when a string holds a character
/// above code 255.
pub fn encode(datatype: Datatype, value: &DecodedValue) -> Result<Vec<u8>, ProtocolError> {
    match (datatype, value) {
        (Datatype::Raw, DecodedValue::Raw(bytes)) => Ok(bytes.clone()),
        (Datatype::Bool, DecodedValue::Bool(b)) => Ok(vec![u8::from(*b)]),
        (Datatype::Enum, DecodedValue::Enum(e)) => Ok(vec![*e]),
        (Datatype::Value, DecodedValue::Value(v)) => {
            let v = u32::try_from(*v).map_err(|_| {
                ProtocolError::InvalidValue(format!("value {v} does not fit in 4 bytes"))
            })?;
            Ok(v.to_be_bytes().to_vec())
        }
        (Datatype::Bitmap, DecodedValue::Bitmap(v)) => {
            if let Ok(b) = u8::try_from(*v) {
                Ok(vec![b])
            } else if let Ok(w) = u16::try_from(*v) {
                Ok(w.to_be_bytes().to_vec())
            } else if let Ok(d) = u32::try_from(*v) {
                Ok(d.to_be_bytes().to_vec())
            } else {
                Err(ProtocolError::InvalidValue(format!(
                    "bitmap {v:#x} does not fit in 4 bytes"
                )))
            }
        }
        (Datatype::String, DecodedValue::String(s)) => s
            .chars()
            .map(|c| {
                u8::try_from(u32::from(c)).map_err(|_| {
                    ProtocolError::InvalidValue(format!("character {c:?} has no single-byte code"))
                })
            })
            .collect(),
        (expected, found) => Err(ProtocolError::InvalidValue(format!(
            "expected a {expected} value, got {}",
            found.datatype()
        ))),
    }
}

// ---------------------------------------------------------------------------
// Bounds
// ---------------------------------------------------------------------------

/// Legal values for a bounded setting.
///
/// Attached to a DP binding in a device profile and checked by
/// [`encode_bounded`] before a write is attempted.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ValueBounds {
    /// No restriction beyond what the datatype can carry.
    #[default]
    Any,
    /// Inclusive integer range.
    Range { min: u64, max: u64 },
    /// A fixed set of enumerants.
    OneOf { values: Vec<u8> },
}

impl ValueBounds {
    /// Checks `value` against these bounds.
    ///
    /// # Errors
    /// [`ProtocolError::InvalidValue`] if the value is outside the bounds,
    /// or if bounds are declared but the value is not an integer.
    pub fn check(&self, value: &DecodedValue) -> Result<(), ProtocolError> {
        if matches!(self, Self::Any) {
            return Ok(());
        }
        let n = value.as_u64().ok_or_else(|| {
            ProtocolError::InvalidValue(format!(
                "bounded setting needs an integer, got {}",
                value.datatype()
            ))
        })?;
        match self {
            Self::Any => Ok(()),
            Self::Range { min, max } if (*min..=*max).contains(&n) => Ok(()),
            Self::Range { min, max } => Err(ProtocolError::InvalidValue(format!(
                "{n} outside {min}..={max}"
            ))),
            Self::OneOf { values } if values.iter().any(|&v| u64::from(v) == n) => Ok(()),
            Self::OneOf { values } => Err(ProtocolError::InvalidValue(format!(
                "{n} not one of {values:?}"
            ))),
        }
    }
}

/// [`encode`] preceded by a bounds check.
///
/// # Errors
/// Any error from [`ValueBounds::check`] or [`encode`].
pub fn encode_bounded(
    datatype: Datatype,
    value: &DecodedValue,
    bounds: &ValueBounds,
) -> Result<Vec<u8>, ProtocolError> {
    bounds.check(value)?;
    encode(datatype, value)
}

// =========================================================================
// Tests
// =========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::DpId;

    fn frame(datatype: Datatype, payload: &[u8]) -> DataPointFrame {
        DataPointFrame::new(DpId(1), datatype, payload.to_vec())
    }

    // =====================================================================
    // decode()
    // =====================================================================

    #[test]
    fn test_decode_bool_one_is_true() {
        assert_eq!(decode(&frame(Datatype::Bool, &[1])), Some(DecodedValue::Bool(true)));
    }

    #[test]
    fn test_decode_bool_zero_is_false_not_none() {
        // A decoded `false` must be distinguishable from "no value".
        assert_eq!(decode(&frame(Datatype::Bool, &[0])), Some(DecodedValue::Bool(false)));
    }

    #[test]
    fn test_decode_value_accumulates_big_endian() {
        let v = decode(&frame(Datatype::Value, &[0x00, 0x00, 0x03, 0xe8]));
        assert_eq!(v, Some(DecodedValue::Value(1000)));
    }

    #[test]
    fn test_decode_value_zero_is_some() {
        assert_eq!(decode(&frame(Datatype::Value, &[0, 0, 0, 0])), Some(DecodedValue::Value(0)));
    }

    #[test]
    fn test_decode_value_accepts_any_width() {
        assert_eq!(decode(&frame(Datatype::Value, &[0x01, 0x00])), Some(DecodedValue::Value(256)));
        assert_eq!(decode(&frame(Datatype::Value, &[])), Some(DecodedValue::Value(0)));
    }

    #[test]
    fn test_decode_bitmap_accumulates_big_endian() {
        let v = decode(&frame(Datatype::Bitmap, &[0x80, 0x01]));
        assert_eq!(v, Some(DecodedValue::Bitmap(0x8001)));
    }

    #[test]
    fn test_decode_string_one_char_per_byte() {
        let v = decode(&frame(Datatype::String, b"on"));
        assert_eq!(v, Some(DecodedValue::String("on".into())));
    }

    #[test]
    fn test_decode_enum_first_byte() {
        assert_eq!(decode(&frame(Datatype::Enum, &[2, 9])), Some(DecodedValue::Enum(2)));
    }

    #[test]
    fn test_decode_enum_empty_payload_is_none() {
        assert_eq!(decode(&frame(Datatype::Enum, &[])), None);
    }

    #[test]
    fn test_decode_raw_passes_through() {
        let v = decode(&frame(Datatype::Raw, &[0xde, 0xad]));
        assert_eq!(v, Some(DecodedValue::Raw(vec![0xde, 0xad])));
    }

    #[test]
    fn test_decode_unknown_tag_is_none() {
        let f = DataPointFrame {
            dp: DpId(1),
            tag: 0x42,
            payload: vec![1],
        };
        assert_eq!(decode(&f), None);
    }

    // =====================================================================
    // encode()
    // =====================================================================

    #[test]
    fn test_encode_value_is_four_bytes_big_endian() {
        let bytes = encode(Datatype::Value, &DecodedValue::Value(1000)).unwrap();
        assert_eq!(bytes, vec![0x00, 0x00, 0x03, 0xe8]);
    }

    #[test]
    fn test_encode_value_wider_than_u32_is_invalid() {
        let err = encode(Datatype::Value, &DecodedValue::Value(1 << 40)).unwrap_err();
        assert!(matches!(err, ProtocolError::InvalidValue(_)));
    }

    #[test]
    fn test_encode_bitmap_uses_smallest_width() {
        assert_eq!(encode(Datatype::Bitmap, &DecodedValue::Bitmap(0x05)).unwrap(), vec![0x05]);
        assert_eq!(
            encode(Datatype::Bitmap, &DecodedValue::Bitmap(0x0102)).unwrap(),
            vec![0x01, 0x02]
        );
        assert_eq!(
            encode(Datatype::Bitmap, &DecodedValue::Bitmap(0x0001_0000)).unwrap(),
            vec![0x00, 0x01, 0x00, 0x00]
        );
    }

    #[test]
    fn test_encode_string_rejects_wide_characters() {
        let err = encode(Datatype::String, &DecodedValue::String("€".into())).unwrap_err();
        assert!(matches!(err, ProtocolError::InvalidValue(_)));
    }

    #[test]
    fn test_encode_type_mismatch_is_invalid() {
        let err = encode(Datatype::Bool, &DecodedValue::Value(1)).unwrap_err();
        assert!(matches!(err, ProtocolError::InvalidValue(_)));
    }

    // =====================================================================
    // Symmetry: decode(encode(dt, decode(bytes))) == decode(bytes)
    // =====================================================================

    #[test]
    fn test_codec_symmetry_for_every_datatype() {
        let cases: &[(Datatype, &[u8])] = &[
            (Datatype::Bool, &[1]),
            (Datatype::Bool, &[0]),
            (Datatype::Bool, &[7]),
            (Datatype::Value, &[0x00, 0x01, 0x86, 0xa0]),
            (Datatype::Value, &[0x2a]),
            (Datatype::Bitmap, &[0x00, 0x00, 0x00, 0x11]),
            (Datatype::Bitmap, &[0xff, 0xff]),
            (Datatype::String, b"relay"),
            (Datatype::String, &[0xe9, 0x41]),
            (Datatype::Enum, &[2]),
            (Datatype::Enum, &[1, 0, 0]),
            (Datatype::Raw, &[0x00, 0x10, 0x20]),
        ];

        for (dt, bytes) in cases {
            let first = decode(&frame(*dt, bytes)).expect("valid frame");
            let encoded = encode(*dt, &first).expect("decoded value re-encodes");
            let second = decode(&frame(*dt, &encoded)).expect("re-encoded frame decodes");
            assert_eq!(first, second, "{dt} payload {bytes:?}");
        }
    }

    #[test]
    fn test_codec_wide_value_decodes_but_does_not_reencode() {
        // Leading zeros beyond 4 bytes are harmless.
        let padded = decode(&frame(Datatype::Value, &[0, 0, 0, 0, 0x2a])).unwrap();
        assert_eq!(padded, DecodedValue::Value(42));
        assert_eq!(encode(Datatype::Value, &padded).unwrap(), vec![0, 0, 0, 0x2a]);

        let wide = decode(&frame(Datatype::Value, &[0x01, 0, 0, 0, 0])).unwrap();
        assert_eq!(wide, DecodedValue::Value(0x01_0000_0000));
        assert!(matches!(
            encode(Datatype::Value, &wide),
            Err(ProtocolError::InvalidValue(_))
        ));
        let wide_bitmap = decode(&frame(Datatype::Bitmap, &[0x80, 0, 0, 0, 1])).unwrap();
        assert!(encode(Datatype::Bitmap, &wide_bitmap).is_err());
    }

    // =====================================================================
    // Bounds
    // =====================================================================

    #[test]
    fn test_encode_bounded_one_of_rejects_unknown_enumerant() {
        let bounds = ValueBounds::OneOf {
            values: vec![0, 1, 2],
        };
        let err = encode_bounded(Datatype::Enum, &DecodedValue::Enum(3), &bounds).unwrap_err();
        assert!(matches!(err, ProtocolError::InvalidValue(_)));
        assert_eq!(
            encode_bounded(Datatype::Enum, &DecodedValue::Enum(2), &bounds).unwrap(),
            vec![2]
        );
    }

    #[test]
    fn test_encode_bounded_range_is_inclusive() {
        let bounds = ValueBounds::Range { min: 0, max: 1000 };
        assert!(encode_bounded(Datatype::Value, &DecodedValue::Value(1000), &bounds).is_ok());
        assert!(encode_bounded(Datatype::Value, &DecodedValue::Value(1001), &bounds).is_err());
    }

    #[test]
    fn test_bounds_on_non_integer_is_invalid() {
        let bounds = ValueBounds::Range { min: 0, max: 1 };
        assert!(bounds.check(&DecodedValue::Bool(true)).is_err());
        assert!(ValueBounds::Any.check(&DecodedValue::Bool(true)).is_ok());
    }

    #[test]
    fn test_value_bounds_deserialize_from_json() {
        let bounds: ValueBounds =
            serde_json::from_str(r#"{"kind":"one_of","values":[0,1,2]}"#).unwrap();
        assert_eq!(
            bounds,
            ValueBounds::OneOf {
                values: vec![0, 1, 2]
            }
        );
    }
}
