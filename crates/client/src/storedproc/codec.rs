//! Serializer/deserializer for the stored-procedure value stream.
//!
//! The format is a compact tagged byte stream: every value starts with a
//! one-byte tag, lengths and integer magnitudes are base-128 varints
//! (low-order seven bits first, continuation bit 0x80), and the whole
//! stream is terminated by [`SO_END_OF_ITEMS`].
//!
//! Known fidelity limit, kept on purpose: strings are encoded one byte per
//! `char`, truncating each code point to its low byte. Non-ASCII text does
//! not survive a round trip. Server-side procedures depend on this
//! encoding, so it is documented here rather than changed.

use crate::error::{QuadraError, QuadraResult};

use super::value::SerialValue;

pub const SO_VECTOR: u8 = 1;
pub const SO_STRING: u8 = 5;
pub const SO_NULL: u8 = 7;
pub const SO_LIST: u8 = 8;
pub const SO_POS_INTEGER: u8 = 9;
pub const SO_END_OF_ITEMS: u8 = 10;
pub const SO_NEG_INTEGER: u8 = 11;
pub const SO_BYTEVECTOR: u8 = 15;

/// Serialize a value tree into the terminated byte stream.
pub fn serialize(value: &SerialValue) -> QuadraResult<Vec<u8>> {
    let mut out = Vec::new();
    write_value(&mut out, value)?;
    out.push(SO_END_OF_ITEMS);
    Ok(out)
}

/// Decode a terminated byte stream back into a value tree.
///
/// Truncated input is a hard error, as is anything left over after the
/// end-of-items sentinel.
pub fn deserialize(bytes: &[u8]) -> QuadraResult<SerialValue> {
    let mut cursor = Cursor { data: bytes, pos: 0 };
    let tag = cursor.next_byte()?;
    // A stream holding nothing but the sentinel decodes as null.
    if tag == SO_END_OF_ITEMS {
        return cursor.finish(SerialValue::Null);
    }
    let value = cursor.read_value(tag)?;
    match cursor.next_byte()? {
        SO_END_OF_ITEMS => cursor.finish(value),
        other => Err(QuadraError::Codec(format!(
            "expected end-of-items sentinel, found tag {other}"
        ))),
    }
}

/// Serialize and text-armor a value for the `spargstr` parameter.
pub fn serialize_and_encode(value: &SerialValue) -> QuadraResult<String> {
    Ok(super::radix64::encode(&serialize(value)?))
}

/// De-armor and deserialize a stored-procedure response body.
pub fn decode_and_deserialize(text: &str) -> QuadraResult<SerialValue> {
    deserialize(&super::radix64::decode(text)?)
}

fn write_value(out: &mut Vec<u8>, value: &SerialValue) -> QuadraResult<()> {
    match value {
        SerialValue::Str(s) => {
            out.push(SO_STRING);
            write_uint(out, s.chars().count() as u64);
            for c in s.chars() {
                // Low-byte truncation; see the module docs.
                out.push((c as u32 & 0xff) as u8);
            }
        }
        SerialValue::Int(i) => {
            if *i >= 0 {
                out.push(SO_POS_INTEGER);
                write_uint(out, *i as u64);
            } else {
                let magnitude = i.checked_neg().ok_or_else(|| {
                    QuadraError::Codec(format!("integer {i} cannot round-trip through the sign-tag encoding"))
                })?;
                out.push(SO_NEG_INTEGER);
                write_uint(out, magnitude as u64);
            }
        }
        SerialValue::Null => out.push(SO_NULL),
        SerialValue::Vector(items) => {
            out.push(SO_VECTOR);
            write_uint(out, items.len() as u64);
            for item in items {
                write_value(out, item)?;
            }
        }
        SerialValue::List(items) => {
            out.push(SO_LIST);
            write_uint(out, items.len() as u64);
            for item in items {
                write_value(out, item)?;
            }
            // The server requires a null sentinel after the counted
            // elements; both the length prefix and the sentinel are part
            // of the format.
            out.push(SO_NULL);
        }
        SerialValue::Bytes(bytes) => {
            out.push(SO_BYTEVECTOR);
            write_uint(out, bytes.len() as u64);
            out.extend_from_slice(bytes);
        }
    }
    Ok(())
}

fn write_uint(out: &mut Vec<u8>, mut value: u64) {
    loop {
        let mut lower = (value & 0x7f) as u8;
        value >>= 7;
        if value != 0 {
            lower |= 0x80;
        }
        out.push(lower);
        if value == 0 {
            break;
        }
    }
}

struct Cursor<'a> {
    data: &'a [u8],
    pos: usize,
}

impl Cursor<'_> {
    fn next_byte(&mut self) -> QuadraResult<u8> {
        let byte = self
            .data
            .get(self.pos)
            .copied()
            .ok_or_else(|| QuadraError::Codec("unexpected end of serialized data".to_string()))?;
        self.pos += 1;
        Ok(byte)
    }

    fn read_uint(&mut self) -> QuadraResult<u64> {
        let mut result: u64 = 0;
        let mut shift = 0u32;
        loop {
            let byte = self.next_byte()?;
            let masked = (byte & 0x7f) as u64;
            if shift >= 64 || (shift == 63 && masked > 1) {
                return Err(QuadraError::Codec("varint overflows 64 bits".to_string()));
            }
            result |= masked << shift;
            if byte & 0x80 == 0 {
                break;
            }
            shift += 7;
        }
        Ok(result)
    }

    fn read_len(&mut self) -> QuadraResult<usize> {
        let len = self.read_uint()?;
        // A length can never exceed the bytes that are left; reject early
        // instead of letting a corrupt prefix trigger a huge allocation.
        if len > (self.data.len() - self.pos) as u64 {
            return Err(QuadraError::Codec(format!(
                "length prefix {len} exceeds remaining input"
            )));
        }
        Ok(len as usize)
    }

    fn read_value(&mut self, tag: u8) -> QuadraResult<SerialValue> {
        match tag {
            SO_STRING => {
                let len = self.read_len()?;
                let mut s = String::with_capacity(len);
                for _ in 0..len {
                    s.push(self.next_byte()? as char);
                }
                Ok(SerialValue::Str(s))
            }
            SO_POS_INTEGER => {
                let magnitude = self.read_uint()?;
                let value = i64::try_from(magnitude).map_err(|_| {
                    QuadraError::Codec(format!("integer magnitude {magnitude} overflows i64"))
                })?;
                Ok(SerialValue::Int(value))
            }
            SO_NEG_INTEGER => {
                let magnitude = self.read_uint()?;
                let value = i64::try_from(magnitude).map_err(|_| {
                    QuadraError::Codec(format!("integer magnitude {magnitude} overflows i64"))
                })?;
                Ok(SerialValue::Int(-value))
            }
            SO_NULL => Ok(SerialValue::Null),
            SO_VECTOR => {
                let len = self.read_len()?;
                let mut items = Vec::with_capacity(len);
                for _ in 0..len {
                    let tag = self.next_byte()?;
                    items.push(self.read_value(tag)?);
                }
                Ok(SerialValue::Vector(items))
            }
            SO_LIST => {
                let len = self.read_len()?;
                let mut items = Vec::with_capacity(len);
                for _ in 0..len {
                    let tag = self.next_byte()?;
                    items.push(self.read_value(tag)?);
                }
                match self.next_byte()? {
                    SO_NULL => Ok(SerialValue::List(items)),
                    other => Err(QuadraError::Codec(format!(
                        "list missing its null sentinel, found tag {other}"
                    ))),
                }
            }
            SO_BYTEVECTOR => {
                let len = self.read_len()?;
                let start = self.pos;
                self.pos += len;
                Ok(SerialValue::Bytes(self.data[start..self.pos].to_vec()))
            }
            other => Err(QuadraError::Codec(format!(
                "bad tag found by deserializer: {other}"
            ))),
        }
    }

    fn finish(&self, value: SerialValue) -> QuadraResult<SerialValue> {
        if self.pos != self.data.len() {
            return Err(QuadraError::Codec(format!(
                "{} trailing bytes after end-of-items sentinel",
                self.data.len() - self.pos
            )));
        }
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn round_trip(value: SerialValue) {
        let bytes = serialize(&value).unwrap();
        assert_eq!(deserialize(&bytes).unwrap(), value);
    }

    #[test]
    fn round_trips_scalars() {
        round_trip(SerialValue::Null);
        round_trip(SerialValue::from("predicate-stats"));
        round_trip(SerialValue::from(""));
        round_trip(SerialValue::Int(0));
        round_trip(SerialValue::Int(127));
        round_trip(SerialValue::Int(128));
        round_trip(SerialValue::Int(16384));
        round_trip(SerialValue::Int(-1));
        round_trip(SerialValue::Int(-300));
        round_trip(SerialValue::Int(i64::MAX));
        round_trip(SerialValue::Bytes(vec![0, 1, 2, 0xff]));
        round_trip(SerialValue::Bytes(vec![]));
    }

    #[test]
    fn round_trips_nested_trees() {
        round_trip(SerialValue::vector([
            SerialValue::from("s"),
            SerialValue::list([SerialValue::Int(1), SerialValue::Null]),
            SerialValue::Bytes(vec![9, 9]),
            SerialValue::vector([]),
        ]));
        round_trip(SerialValue::list([]));
    }

    #[test]
    fn produces_the_documented_byte_layout() {
        // ["a", 3, null, ["x", "y"]] as a list value.
        let value = SerialValue::list([
            SerialValue::from("a"),
            SerialValue::Int(3),
            SerialValue::Null,
            SerialValue::list([SerialValue::from("x"), SerialValue::from("y")]),
        ]);
        let bytes = serialize(&value).unwrap();
        assert_eq!(
            bytes,
            vec![
                SO_LIST, 4,
                SO_STRING, 1, b'a',
                SO_POS_INTEGER, 3,
                SO_NULL,
                SO_LIST, 2, SO_STRING, 1, b'x', SO_STRING, 1, b'y', SO_NULL,
                SO_NULL, // outer list sentinel
                SO_END_OF_ITEMS,
            ]
        );
        assert_eq!(deserialize(&bytes).unwrap(), value);
    }

    #[test]
    fn varints_use_low_order_bits_first() {
        let bytes = serialize(&SerialValue::Int(300)).unwrap();
        assert_eq!(bytes, vec![SO_POS_INTEGER, 0xac, 0x02, SO_END_OF_ITEMS]);
    }

    #[test]
    fn truncated_input_is_a_hard_error() {
        let bytes = serialize(&SerialValue::from("hello")).unwrap();
        for cut in 1..bytes.len() {
            assert!(
                deserialize(&bytes[..cut]).is_err(),
                "prefix of {cut} bytes should not decode"
            );
        }
        assert!(deserialize(&[]).is_err());
    }

    #[test]
    fn trailing_garbage_is_rejected() {
        let mut bytes = serialize(&SerialValue::Null).unwrap();
        bytes.push(0);
        assert!(deserialize(&bytes).is_err());
    }

    #[test]
    fn rejects_unencodable_integer() {
        assert!(serialize(&SerialValue::Int(i64::MIN)).is_err());
    }

    #[test]
    fn rejects_oversized_length_prefix() {
        // SO_STRING claiming 200 chars with 1 byte of payload.
        assert!(deserialize(&[SO_STRING, 200, 1, b'a']).is_err());
    }

    #[test]
    fn rejects_list_without_sentinel() {
        let bytes = vec![SO_LIST, 1, SO_POS_INTEGER, 1, SO_POS_INTEGER, 2, SO_END_OF_ITEMS];
        assert!(deserialize(&bytes).is_err());
    }

    #[test]
    fn non_ascii_strings_are_truncated_not_preserved() {
        // The documented fidelity limit: 'é' (0xe9) survives as its low
        // byte, 'λ' (0x3bb) does not.
        let bytes = serialize(&SerialValue::from("λ")).unwrap();
        assert_eq!(bytes, vec![SO_STRING, 1, 0xbb, SO_END_OF_ITEMS]);
        assert_eq!(
            deserialize(&bytes).unwrap(),
            SerialValue::from("\u{bb}")
        );
    }

    #[test]
    fn armored_round_trip() {
        let value = SerialValue::list([
            SerialValue::from("add-triple"),
            SerialValue::Int(42),
            SerialValue::Bytes(vec![1, 2, 3]),
        ]);
        let armored = serialize_and_encode(&value).unwrap();
        assert!(armored.bytes().all(|c| c.is_ascii_alphanumeric() || c == b'*' || c == b'+'));
        assert_eq!(decode_and_deserialize(&armored).unwrap(), value);
    }
}
