//! Type-tagged value encoding and decoding.
//!
//! Every value on the wire is preceded by a tag byte so a receiver
//! can validate payload shape without an external schema. Integers
//! are fixed-width little-endian; strings and blobs share one tag
//! family where lengths up to 14 live in the tag byte itself and
//! longer ones use an escape tag plus an explicit u32 length.

use loam_core::{ChunkPosition, OccupantId, PacketId, Position, RealmId, TickId, UpdateCounter};

use crate::error::WireError;
use crate::frame::MAX_PAYLOAD_SIZE;

/// The fixed tag table.
pub mod tag {
    /// Unsigned 1-byte integer.
    pub const U8: u8 = 0x01;
    /// Unsigned 2-byte integer.
    pub const U16: u8 = 0x02;
    /// Unsigned 4-byte integer.
    pub const U32: u8 = 0x03;
    /// Unsigned 8-byte integer.
    pub const U64: u8 = 0x04;
    /// Signed 1-byte integer.
    pub const I8: u8 = 0x05;
    /// Signed 2-byte integer.
    pub const I16: u8 = 0x06;
    /// Signed 4-byte integer.
    pub const I32: u8 = 0x07;
    /// Signed 8-byte integer.
    pub const I64: u8 = 0x08;
    /// Empty string. Tags `0x11..=0x1E` are inline strings of length
    /// `tag - 0x10`; anything longer uses [`STR_LONG`].
    pub const STR_EMPTY: u8 = 0x10;
    /// String/blob with explicit u32 little-endian length following
    /// the tag.
    pub const STR_LONG: u8 = 0x1F;

    /// Longest string length encodable in the tag byte itself.
    pub const INLINE_STR_MAX: usize = 14;

    /// Whether a byte is in the tag table at all.
    pub fn is_known(byte: u8) -> bool {
        matches!(byte, U8..=I64 | STR_EMPTY..=STR_LONG)
    }
}

// ── Encoder ─────────────────────────────────────────────────────

/// Appends tagged values to a growing payload buffer.
#[derive(Clone, Debug, Default)]
pub struct Encoder {
    bytes: Vec<u8>,
}

impl Encoder {
    /// A fresh, empty encoder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Consume the encoder, yielding the payload bytes.
    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }

    /// Encoded length so far.
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Whether nothing has been encoded yet.
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Append a tagged u8.
    pub fn put_u8(&mut self, v: u8) {
        self.bytes.push(tag::U8);
        self.bytes.push(v);
    }

    /// Append a tagged u16.
    pub fn put_u16(&mut self, v: u16) {
        self.bytes.push(tag::U16);
        self.bytes.extend_from_slice(&v.to_le_bytes());
    }

    /// Append a tagged u32.
    pub fn put_u32(&mut self, v: u32) {
        self.bytes.push(tag::U32);
        self.bytes.extend_from_slice(&v.to_le_bytes());
    }

    /// Append a tagged u64.
    pub fn put_u64(&mut self, v: u64) {
        self.bytes.push(tag::U64);
        self.bytes.extend_from_slice(&v.to_le_bytes());
    }

    /// Append a tagged i8.
    pub fn put_i8(&mut self, v: i8) {
        self.bytes.push(tag::I8);
        self.bytes.extend_from_slice(&v.to_le_bytes());
    }

    /// Append a tagged i16.
    pub fn put_i16(&mut self, v: i16) {
        self.bytes.push(tag::I16);
        self.bytes.extend_from_slice(&v.to_le_bytes());
    }

    /// Append a tagged i32.
    pub fn put_i32(&mut self, v: i32) {
        self.bytes.push(tag::I32);
        self.bytes.extend_from_slice(&v.to_le_bytes());
    }

    /// Append a tagged i64.
    pub fn put_i64(&mut self, v: i64) {
        self.bytes.push(tag::I64);
        self.bytes.extend_from_slice(&v.to_le_bytes());
    }

    /// Append a tagged string.
    ///
    /// Lengths up to [`tag::INLINE_STR_MAX`] are carried in the tag
    /// byte; longer strings use the escape tag plus a u32 length.
    pub fn put_str(&mut self, s: &str) {
        self.put_raw_blob(s.as_bytes());
    }

    /// Append a tagged byte blob (same wire family as strings).
    pub fn put_bytes(&mut self, b: &[u8]) {
        self.put_raw_blob(b);
    }

    fn put_raw_blob(&mut self, b: &[u8]) {
        let len = b.len();
        if len == 0 {
            self.bytes.push(tag::STR_EMPTY);
            return;
        }
        if len <= tag::INLINE_STR_MAX {
            self.bytes.push(tag::STR_EMPTY + len as u8);
        } else {
            self.bytes.push(tag::STR_LONG);
            self.bytes.extend_from_slice(&(len as u32).to_le_bytes());
        }
        self.bytes.extend_from_slice(b);
    }

    /// Append a tile position as two i64 values.
    pub fn put_position(&mut self, pos: Position) {
        self.put_i64(pos.row);
        self.put_i64(pos.column);
    }

    /// Append a chunk coordinate as two i32 values.
    pub fn put_chunk(&mut self, chunk: ChunkPosition) {
        self.put_i32(chunk.x);
        self.put_i32(chunk.y);
    }

    /// Append an occupant ID.
    pub fn put_occupant_id(&mut self, id: OccupantId) {
        self.put_u64(id.0);
    }

    /// Append a realm ID.
    pub fn put_realm_id(&mut self, id: RealmId) {
        self.put_u32(id.0);
    }

    /// Append a tick ID.
    pub fn put_tick_id(&mut self, id: TickId) {
        self.put_u64(id.0);
    }

    /// Append an update counter.
    pub fn put_update_counter(&mut self, counter: UpdateCounter) {
        self.put_u64(counter.0);
    }

    /// Append a packet ID (as a value, not the frame header).
    pub fn put_packet_id(&mut self, id: PacketId) {
        self.put_u16(id.0);
    }
}

// ── Decoder ─────────────────────────────────────────────────────

/// Reads tagged values from a payload, validating tags as it goes.
///
/// Reading past the available bytes, an unknown tag, or a tag that
/// does not match the requested type are explicit [`WireError`]s,
/// never panics.
#[derive(Debug)]
pub struct Decoder<'a> {
    data: &'a [u8],
    offset: usize,
}

impl<'a> Decoder<'a> {
    /// Decode from a payload slice.
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, offset: 0 }
    }

    /// Bytes not yet consumed.
    pub fn remaining(&self) -> usize {
        self.data.len() - self.offset
    }

    /// Whether every byte has been consumed.
    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    /// Assert the payload was fully consumed.
    ///
    /// Packets call this after decoding themselves; leftover bytes
    /// mean the payload did not match the packet's shape.
    pub fn finish(&self) -> Result<(), WireError> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(WireError::TrailingBytes {
                count: self.remaining(),
            })
        }
    }

    fn raw(&mut self, n: usize) -> Result<&'a [u8], WireError> {
        if self.remaining() < n {
            return Err(WireError::UnexpectedEnd {
                needed: n,
                available: self.remaining(),
            });
        }
        let out = &self.data[self.offset..self.offset + n];
        self.offset += n;
        Ok(out)
    }

    fn expect_tag(&mut self, expected: u8) -> Result<(), WireError> {
        let found = self.raw(1)?[0];
        if found == expected {
            return Ok(());
        }
        if tag::is_known(found) {
            Err(WireError::TagMismatch { expected, found })
        } else {
            Err(WireError::UnknownTag { found })
        }
    }

    /// Read a tagged u8.
    pub fn take_u8(&mut self) -> Result<u8, WireError> {
        self.expect_tag(tag::U8)?;
        Ok(self.raw(1)?[0])
    }

    /// Read a tagged u16.
    pub fn take_u16(&mut self) -> Result<u16, WireError> {
        self.expect_tag(tag::U16)?;
        let bytes = self.raw(2)?;
        Ok(u16::from_le_bytes([bytes[0], bytes[1]]))
    }

    /// Read a tagged u32.
    pub fn take_u32(&mut self) -> Result<u32, WireError> {
        self.expect_tag(tag::U32)?;
        let bytes = self.raw(4)?;
        Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    /// Read a tagged u64.
    pub fn take_u64(&mut self) -> Result<u64, WireError> {
        self.expect_tag(tag::U64)?;
        let bytes = self.raw(8)?;
        let mut buf = [0u8; 8];
        buf.copy_from_slice(bytes);
        Ok(u64::from_le_bytes(buf))
    }

    /// Read a tagged i8.
    pub fn take_i8(&mut self) -> Result<i8, WireError> {
        self.expect_tag(tag::I8)?;
        Ok(self.raw(1)?[0] as i8)
    }

    /// Read a tagged i16.
    pub fn take_i16(&mut self) -> Result<i16, WireError> {
        self.expect_tag(tag::I16)?;
        let bytes = self.raw(2)?;
        Ok(i16::from_le_bytes([bytes[0], bytes[1]]))
    }

    /// Read a tagged i32.
    pub fn take_i32(&mut self) -> Result<i32, WireError> {
        self.expect_tag(tag::I32)?;
        let bytes = self.raw(4)?;
        Ok(i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    /// Read a tagged i64.
    pub fn take_i64(&mut self) -> Result<i64, WireError> {
        self.expect_tag(tag::I64)?;
        let bytes = self.raw(8)?;
        let mut buf = [0u8; 8];
        buf.copy_from_slice(bytes);
        Ok(i64::from_le_bytes(buf))
    }

    /// Read a tagged byte blob.
    pub fn take_bytes(&mut self) -> Result<Vec<u8>, WireError> {
        let first = self.raw(1)?[0];
        let len = match first {
            tag::STR_EMPTY => 0,
            t if t > tag::STR_EMPTY && t < tag::STR_LONG => (t - tag::STR_EMPTY) as usize,
            tag::STR_LONG => {
                let bytes = self.raw(4)?;
                let declared =
                    u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as usize;
                if declared > MAX_PAYLOAD_SIZE {
                    return Err(WireError::PayloadTooLarge {
                        declared,
                        max: MAX_PAYLOAD_SIZE,
                    });
                }
                declared
            }
            found if tag::is_known(found) => {
                return Err(WireError::TagMismatch {
                    expected: tag::STR_EMPTY,
                    found,
                })
            }
            found => return Err(WireError::UnknownTag { found }),
        };
        Ok(self.raw(len)?.to_vec())
    }

    /// Read a tagged UTF-8 string.
    pub fn take_str(&mut self) -> Result<String, WireError> {
        let bytes = self.take_bytes()?;
        String::from_utf8(bytes).map_err(|_| WireError::InvalidUtf8)
    }

    /// Read a tile position (two i64 values).
    pub fn take_position(&mut self) -> Result<Position, WireError> {
        let row = self.take_i64()?;
        let column = self.take_i64()?;
        Ok(Position::new(row, column))
    }

    /// Read a chunk coordinate (two i32 values).
    pub fn take_chunk(&mut self) -> Result<ChunkPosition, WireError> {
        let x = self.take_i32()?;
        let y = self.take_i32()?;
        Ok(ChunkPosition::new(x, y))
    }

    /// Read an occupant ID.
    pub fn take_occupant_id(&mut self) -> Result<OccupantId, WireError> {
        Ok(OccupantId(self.take_u64()?))
    }

    /// Read a realm ID.
    pub fn take_realm_id(&mut self) -> Result<RealmId, WireError> {
        Ok(RealmId(self.take_u32()?))
    }

    /// Read a tick ID.
    pub fn take_tick_id(&mut self) -> Result<TickId, WireError> {
        Ok(TickId(self.take_u64()?))
    }

    /// Read an update counter.
    pub fn take_update_counter(&mut self) -> Result<UpdateCounter, WireError> {
        Ok(UpdateCounter(self.take_u64()?))
    }

    /// Read a packet ID value.
    pub fn take_packet_id(&mut self) -> Result<PacketId, WireError> {
        Ok(PacketId(self.take_u16()?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unsigned_round_trips() {
        let mut enc = Encoder::new();
        enc.put_u8(0xAB);
        enc.put_u16(0xBEEF);
        enc.put_u32(0xDEAD_BEEF);
        enc.put_u64(0x0123_4567_89AB_CDEF);
        let bytes = enc.into_bytes();

        let mut dec = Decoder::new(&bytes);
        assert_eq!(dec.take_u8().unwrap(), 0xAB);
        assert_eq!(dec.take_u16().unwrap(), 0xBEEF);
        assert_eq!(dec.take_u32().unwrap(), 0xDEAD_BEEF);
        assert_eq!(dec.take_u64().unwrap(), 0x0123_4567_89AB_CDEF);
        dec.finish().unwrap();
    }

    #[test]
    fn signed_round_trips() {
        let mut enc = Encoder::new();
        enc.put_i8(-1);
        enc.put_i16(-30_000);
        enc.put_i32(i32::MIN);
        enc.put_i64(i64::MIN);
        let bytes = enc.into_bytes();

        let mut dec = Decoder::new(&bytes);
        assert_eq!(dec.take_i8().unwrap(), -1);
        assert_eq!(dec.take_i16().unwrap(), -30_000);
        assert_eq!(dec.take_i32().unwrap(), i32::MIN);
        assert_eq!(dec.take_i64().unwrap(), i64::MIN);
        dec.finish().unwrap();
    }

    #[test]
    fn numbers_are_little_endian_on_the_wire() {
        let mut enc = Encoder::new();
        enc.put_u16(0x0102);
        let bytes = enc.into_bytes();
        assert_eq!(bytes, vec![tag::U16, 0x02, 0x01]);

        let mut enc = Encoder::new();
        enc.put_u32(0x0102_0304);
        let bytes = enc.into_bytes();
        assert_eq!(bytes, vec![tag::U32, 0x04, 0x03, 0x02, 0x01]);
    }

    #[test]
    fn empty_string_is_one_tag_byte() {
        let mut enc = Encoder::new();
        enc.put_str("");
        let bytes = enc.into_bytes();
        assert_eq!(bytes, vec![tag::STR_EMPTY]);

        let mut dec = Decoder::new(&bytes);
        assert_eq!(dec.take_str().unwrap(), "");
        dec.finish().unwrap();
    }

    #[test]
    fn short_string_length_lives_in_the_tag() {
        let mut enc = Encoder::new();
        enc.put_str("chunk");
        let bytes = enc.into_bytes();
        assert_eq!(bytes[0], tag::STR_EMPTY + 5);
        assert_eq!(&bytes[1..], b"chunk");
    }

    #[test]
    fn fourteen_byte_string_is_still_inline() {
        let s = "abcdefghijklmn";
        assert_eq!(s.len(), tag::INLINE_STR_MAX);
        let mut enc = Encoder::new();
        enc.put_str(s);
        let bytes = enc.into_bytes();
        assert_eq!(bytes[0], tag::STR_EMPTY + 14);

        let mut dec = Decoder::new(&bytes);
        assert_eq!(dec.take_str().unwrap(), s);
    }

    #[test]
    fn fifteen_byte_string_uses_the_escape_tag() {
        let s = "abcdefghijklmno";
        let mut enc = Encoder::new();
        enc.put_str(s);
        let bytes = enc.into_bytes();
        assert_eq!(bytes[0], tag::STR_LONG);
        assert_eq!(&bytes[1..5], &15u32.to_le_bytes());
        assert_eq!(&bytes[5..], s.as_bytes());

        let mut dec = Decoder::new(&bytes);
        assert_eq!(dec.take_str().unwrap(), s);
    }

    #[test]
    fn tag_mismatch_is_reported() {
        let mut enc = Encoder::new();
        enc.put_u32(7);
        let bytes = enc.into_bytes();

        let mut dec = Decoder::new(&bytes);
        let err = dec.take_u16().unwrap_err();
        assert_eq!(
            err,
            WireError::TagMismatch {
                expected: tag::U16,
                found: tag::U32,
            }
        );
    }

    #[test]
    fn unknown_tag_is_reported() {
        let bytes = [0x7Fu8, 0x00];
        let mut dec = Decoder::new(&bytes);
        let err = dec.take_u8().unwrap_err();
        assert_eq!(err, WireError::UnknownTag { found: 0x7F });
    }

    #[test]
    fn decode_past_end_is_an_error() {
        let mut enc = Encoder::new();
        enc.put_u64(1);
        let mut bytes = enc.into_bytes();
        bytes.truncate(5); // tag + 4 of 8 value bytes

        let mut dec = Decoder::new(&bytes);
        let err = dec.take_u64().unwrap_err();
        assert_eq!(
            err,
            WireError::UnexpectedEnd {
                needed: 8,
                available: 4,
            }
        );
    }

    #[test]
    fn hostile_blob_length_rejected_before_allocation() {
        let mut bytes = vec![tag::STR_LONG];
        bytes.extend_from_slice(&u32::MAX.to_le_bytes());
        let mut dec = Decoder::new(&bytes);
        let err = dec.take_bytes().unwrap_err();
        assert!(matches!(err, WireError::PayloadTooLarge { .. }));
    }

    #[test]
    fn truncated_long_blob_is_an_error() {
        let mut bytes = vec![tag::STR_LONG];
        bytes.extend_from_slice(&100u32.to_le_bytes());
        bytes.extend_from_slice(&[0u8; 10]);
        let mut dec = Decoder::new(&bytes);
        let err = dec.take_bytes().unwrap_err();
        assert_eq!(
            err,
            WireError::UnexpectedEnd {
                needed: 100,
                available: 10,
            }
        );
    }

    #[test]
    fn invalid_utf8_is_an_error() {
        let mut enc = Encoder::new();
        enc.put_bytes(&[0xFF, 0xFE, 0xFD]);
        let bytes = enc.into_bytes();
        let mut dec = Decoder::new(&bytes);
        assert_eq!(dec.take_str().unwrap_err(), WireError::InvalidUtf8);
    }

    #[test]
    fn finish_reports_trailing_bytes() {
        let mut enc = Encoder::new();
        enc.put_u8(1);
        enc.put_u8(2);
        let bytes = enc.into_bytes();
        let mut dec = Decoder::new(&bytes);
        dec.take_u8().unwrap();
        assert_eq!(dec.finish().unwrap_err(), WireError::TrailingBytes { count: 2 });
    }

    #[test]
    fn domain_values_round_trip() {
        let mut enc = Encoder::new();
        enc.put_position(Position::new(-40, 7));
        enc.put_chunk(ChunkPosition::new(-3, 2));
        enc.put_occupant_id(OccupantId(99));
        enc.put_realm_id(RealmId(4));
        enc.put_update_counter(UpdateCounter(17));
        let bytes = enc.into_bytes();

        let mut dec = Decoder::new(&bytes);
        assert_eq!(dec.take_position().unwrap(), Position::new(-40, 7));
        assert_eq!(dec.take_chunk().unwrap(), ChunkPosition::new(-3, 2));
        assert_eq!(dec.take_occupant_id().unwrap(), OccupantId(99));
        assert_eq!(dec.take_realm_id().unwrap(), RealmId(4));
        assert_eq!(dec.take_update_counter().unwrap(), UpdateCounter(17));
        dec.finish().unwrap();
    }

    mod proptests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn roundtrip_u8(v in any::<u8>()) {
                let mut enc = Encoder::new();
                enc.put_u8(v);
                let bytes = enc.into_bytes();
                prop_assert_eq!(Decoder::new(&bytes).take_u8().unwrap(), v);
            }

            #[test]
            fn roundtrip_u16(v in any::<u16>()) {
                let mut enc = Encoder::new();
                enc.put_u16(v);
                let bytes = enc.into_bytes();
                prop_assert_eq!(Decoder::new(&bytes).take_u16().unwrap(), v);
            }

            #[test]
            fn roundtrip_u32(v in any::<u32>()) {
                let mut enc = Encoder::new();
                enc.put_u32(v);
                let bytes = enc.into_bytes();
                prop_assert_eq!(Decoder::new(&bytes).take_u32().unwrap(), v);
            }

            #[test]
            fn roundtrip_u64(v in any::<u64>()) {
                let mut enc = Encoder::new();
                enc.put_u64(v);
                let bytes = enc.into_bytes();
                prop_assert_eq!(Decoder::new(&bytes).take_u64().unwrap(), v);
            }

            #[test]
            fn roundtrip_i8(v in any::<i8>()) {
                let mut enc = Encoder::new();
                enc.put_i8(v);
                let bytes = enc.into_bytes();
                prop_assert_eq!(Decoder::new(&bytes).take_i8().unwrap(), v);
            }

            #[test]
            fn roundtrip_i16(v in any::<i16>()) {
                let mut enc = Encoder::new();
                enc.put_i16(v);
                let bytes = enc.into_bytes();
                prop_assert_eq!(Decoder::new(&bytes).take_i16().unwrap(), v);
            }

            #[test]
            fn roundtrip_i32(v in any::<i32>()) {
                let mut enc = Encoder::new();
                enc.put_i32(v);
                let bytes = enc.into_bytes();
                prop_assert_eq!(Decoder::new(&bytes).take_i32().unwrap(), v);
            }

            #[test]
            fn roundtrip_i64(v in any::<i64>()) {
                let mut enc = Encoder::new();
                enc.put_i64(v);
                let bytes = enc.into_bytes();
                prop_assert_eq!(Decoder::new(&bytes).take_i64().unwrap(), v);
            }

            #[test]
            fn roundtrip_string(s in "[ -~]{0,64}") {
                let mut enc = Encoder::new();
                enc.put_str(&s);
                let bytes = enc.into_bytes();
                prop_assert_eq!(Decoder::new(&bytes).take_str().unwrap(), s);
            }

            #[test]
            fn roundtrip_bytes(b in prop::collection::vec(any::<u8>(), 0..256)) {
                let mut enc = Encoder::new();
                enc.put_bytes(&b);
                let bytes = enc.into_bytes();
                prop_assert_eq!(Decoder::new(&bytes).take_bytes().unwrap(), b);
            }

            #[test]
            fn truncated_payloads_never_panic(
                b in prop::collection::vec(any::<u8>(), 0..64),
                cut in 0usize..64,
            ) {
                let cut = cut.min(b.len());
                let mut dec = Decoder::new(&b[..cut]);
                // Whatever happens, it must be a Result, not a panic.
                let _ = dec.take_u64();
                let _ = dec.take_str();
                let _ = dec.take_i32();
            }
        }
    }
}
