//! Sequential reader over a bit stream, with ART's varint encodings.

use crate::art::bit_memory::{BitSpan, WORD_BITS};
use crate::art::error::{ArtError, ErrorKind};

/// Width of the varint header nibble.
pub const VARINT_BITS: usize = 4;
/// Largest value stored directly in the nibble. Larger nibbles are escapes.
pub const VARINT_MAX: u32 = 11;
/// Bits of payload per escape step (one byte).
const VARINT_ESCAPE_UNIT: usize = 8;

/// A forward-only cursor over a byte buffer.
///
/// The cursor may start at any bit of the buffer; `bits_read` counts from there.
/// Everything already read is available through [`BitCursor::read_so_far`].
#[derive(Clone)]
pub struct BitCursor<'a> {
    data: &'a [u8],
    start_bit: usize,
    bits_read: usize,
}

impl<'a> BitCursor<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        BitCursor { data, start_bit: 0, bits_read: 0 }
    }

    /// A cursor positioned `start_bit` bits into `data`.
    pub fn at_bit(data: &'a [u8], start_bit: usize) -> Result<Self, ArtError> {
        if start_bit > data.len() * 8 {
            fail!(Truncated, "cursor start bit {} past buffer of {} bits", start_bit, data.len() * 8);
        }
        Ok(BitCursor { data, start_bit, bits_read: 0 })
    }

    pub fn data(&self) -> &'a [u8] {
        self.data
    }

    pub fn bits_read(&self) -> usize {
        self.bits_read
    }

    /// Absolute bit position of the cursor within `data`.
    pub fn bit_offset(&self) -> usize {
        self.start_bit + self.bits_read
    }

    /// Bits left before the end of the buffer.
    pub fn remaining_bits(&self) -> usize {
        self.data.len() * 8 - self.bit_offset()
    }

    /// The region consumed so far.
    pub fn read_so_far(&self) -> BitSpan<'a> {
        // start_bit + bits_read is kept within the buffer by every read.
        BitSpan::with_range(self.data, self.start_bit, self.bits_read).unwrap_or_else(|_| BitSpan::new(&[]))
    }

    /// Consumes `bit_length` bits and returns them as a span.
    pub fn read_region(&mut self, bit_length: usize) -> Result<BitSpan<'a>, ArtError> {
        let region = BitSpan::with_range(self.data, self.bit_offset(), bit_length)?;
        self.bits_read += bit_length;
        Ok(region)
    }

    pub fn read_bits(&mut self, bit_length: usize) -> Result<u64, ArtError> {
        let region = self.read_region(bit_length)?;
        region.load_bits(0, bit_length)
    }

    pub fn read_bit(&mut self) -> Result<bool, ArtError> {
        Ok(self.read_bits(1)? != 0)
    }

    /// Reads one ART varint: a 4-bit nibble holding 0..=11 directly, or an
    /// escape `11 + k` followed by a `k`-byte payload.
    pub fn read_varint(&mut self) -> Result<u32, ArtError> {
        let nibble = self.read_bits(VARINT_BITS)? as u32;
        self.finish_varint(nibble)
    }

    fn finish_varint(&mut self, nibble: u32) -> Result<u32, ArtError> {
        if nibble <= VARINT_MAX {
            return Ok(nibble);
        }
        let payload_bits = (nibble - VARINT_MAX) as usize * VARINT_ESCAPE_UNIT;
        Ok(self.read_bits(payload_bits)? as u32)
    }

    /// Reads `count` varints stored as all nibbles first, then all escape
    /// payloads in index order.
    pub fn read_interleaved_varints(&mut self, count: usize) -> Result<Vec<u32>, ArtError> {
        let mut values = Vec::with_capacity(count);
        let nibbles_per_word = WORD_BITS / VARINT_BITS;

        // The lump of nibbles is read in word-sized pieces so counts above 16
        // still go through a single 64-bit extraction per piece.
        let mut left = count;
        while left > 0 {
            let take = left.min(nibbles_per_word);
            let lump = self.read_bits(take * VARINT_BITS)?;
            for i in 0..take {
                values.push(((lump >> (i * VARINT_BITS)) & 0xf) as u32);
            }
            left -= take;
        }

        for value in values.iter_mut() {
            *value = self.finish_varint(*value)?;
        }
        Ok(values)
    }

    /// Fixed-size form of [`BitCursor::read_interleaved_varints`] for headers.
    pub fn read_interleaved_varints_array<const N: usize>(&mut self) -> Result<[u32; N], ArtError> {
        let values = self.read_interleaved_varints(N)?;
        let mut out = [0u32; N];
        out.copy_from_slice(&values);
        Ok(out)
    }
}

impl std::fmt::Debug for BitCursor<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "BitCursor[{}+{} of {} bytes]", self.start_bit, self.bits_read, self.data.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::bit_writer::BitWriter;
    use rand::Rng;

    #[test]
    fn small_varints_take_one_nibble() {
        for v in 0..=VARINT_MAX {
            let mut w = BitWriter::new();
            w.write_varint(v);
            assert_eq!(w.bit_len(), 4);
            let bytes = w.into_bytes();
            let mut c = BitCursor::new(&bytes);
            assert_eq!(c.read_varint().unwrap(), v);
            assert_eq!(c.bits_read(), 4);
        }
    }

    #[test]
    fn escaped_varints() {
        let cases: &[(u32, usize)] =
            &[(12, 12), (255, 12), (256, 20), (0xffff, 20), (0x10000, 28), (0xff_ffff, 28), (0x100_0000, 36), (u32::MAX, 36)];
        for &(v, bits) in cases {
            let mut w = BitWriter::new();
            w.write_varint(v);
            assert_eq!(w.bit_len(), bits, "value {}", v);
            let bytes = w.into_bytes();
            let mut c = BitCursor::new(&bytes);
            assert_eq!(c.read_varint().unwrap(), v);
            assert_eq!(c.bits_read(), bits);
        }
    }

    #[test]
    fn escape_nibble_counts_payload_bytes() {
        // nibble 13 => two payload bytes
        let mut w = BitWriter::new();
        w.write_bits(13, 4);
        w.write_bits(0x0102, 16);
        let bytes = w.into_bytes();
        let mut c = BitCursor::new(&bytes);
        assert_eq!(c.read_varint().unwrap(), 0x0102);
    }

    #[test]
    fn interleaved_equals_sequential() {
        let mut rng = rand::rng();
        for count in [1usize, 6, 7, 16, 17, 40] {
            let values: Vec<u32> = (0..count)
                .map(|_| match rng.random_range(0..4) {
                    0 => rng.random_range(0..=VARINT_MAX),
                    1 => rng.random_range(12..256),
                    2 => rng.random_range(256..0x100_0000),
                    _ => rng.random(),
                })
                .collect();

            let mut interleaved = BitWriter::new();
            interleaved.write_interleaved_varints(&values);
            let interleaved = interleaved.into_bytes();

            let mut sequential = BitWriter::new();
            for v in &values {
                sequential.write_varint(*v);
            }
            let sequential = sequential.into_bytes();

            let decoded = BitCursor::new(&interleaved).read_interleaved_varints(count).unwrap();
            let mut c = BitCursor::new(&sequential);
            let naive: Vec<u32> = (0..count).map(|_| c.read_varint().unwrap()).collect();
            assert_eq!(decoded, values);
            assert_eq!(naive, values);
        }
    }

    #[test]
    fn interleaved_payloads_follow_all_nibbles() {
        // [3, 300, 5]: nibbles 3, 13, 5 then a 16-bit payload
        let mut w = BitWriter::new();
        w.write_bits(3 | (13 << 4) | (5 << 8), 12);
        w.write_bits(300, 16);
        let bytes = w.into_bytes();
        let mut c = BitCursor::new(&bytes);
        assert_eq!(c.read_interleaved_varints_array::<3>().unwrap(), [3, 300, 5]);
        assert_eq!(c.bits_read(), 28);
    }

    #[test]
    fn regions_track_the_cursor() {
        let bytes = [0xa5u8, 0x0f, 0xff];
        let mut c = BitCursor::at_bit(&bytes, 4).unwrap();
        let r = c.read_region(8).unwrap();
        assert_eq!(r.bit_start(), 4);
        assert_eq!(r.load_bits(0, 8).unwrap(), 0xfa);
        assert_eq!(c.bit_offset(), 12);
        assert_eq!(c.read_so_far().size_in_bits(), 8);
        assert_eq!(c.remaining_bits(), 12);
    }

    #[test]
    fn reading_past_end_fails() {
        let bytes = [0xffu8];
        let mut c = BitCursor::new(&bytes);
        // nibble 15 wants 32 more bits
        let e = c.read_varint().unwrap_err();
        assert_eq!(e.kind(), ErrorKind::Truncated);
        assert!(BitCursor::at_bit(&bytes, 9).is_err());
    }
}
