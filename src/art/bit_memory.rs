//! Bit-addressable views over byte buffers.
//!
//! ART packs its stack maps at bit granularity. A [`BitSpan`] names a run of bits
//! inside a byte buffer and extracts integers from it, including fields that
//! straddle a storage word. Storage words are always 64 bits wide and assembled
//! little-endian from the underlying bytes, independent of the target's pointer size.

use crate::art::error::{ArtError, ErrorKind};

/// Width of the storage word used for extraction and chunked iteration.
pub const WORD_BITS: usize = 64;

/// A read-only run of bits: `(data, bit_start, bit_size)`.
///
/// Copying a span never copies the bytes; [`BitSpan::subspan`] shares the same storage.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct BitSpan<'a> {
    data: &'a [u8],
    bit_start: usize,
    bit_size: usize,
}

impl<'a> BitSpan<'a> {
    /// A span over every bit of `data`.
    pub fn new(data: &'a [u8]) -> Self {
        BitSpan { data, bit_start: 0, bit_size: data.len() * 8 }
    }

    /// A span of `bit_size` bits starting `bit_start` bits into `data`.
    pub fn with_range(data: &'a [u8], bit_start: usize, bit_size: usize) -> Result<Self, ArtError> {
        let end = bit_start.checked_add(bit_size);
        match end {
            Some(end) if end <= data.len() * 8 => Ok(BitSpan { data, bit_start, bit_size }),
            _ => fail!(
                Truncated,
                "bit range {}+{} exceeds buffer of {} bits",
                bit_start,
                bit_size,
                data.len() * 8
            ),
        }
    }

    /// An empty span, used where ART hands out a default `BitMemoryRegion`.
    pub fn empty() -> BitSpan<'static> {
        BitSpan { data: &[], bit_start: 0, bit_size: 0 }
    }

    pub fn size_in_bits(&self) -> usize {
        self.bit_size
    }

    pub fn is_empty(&self) -> bool {
        self.bit_size == 0
    }

    /// Absolute bit position of the first bit within the backing bytes.
    pub fn bit_start(&self) -> usize {
        self.bit_start
    }

    pub fn data(&self) -> &'a [u8] {
        self.data
    }

    /// A view of `bit_length` bits starting `bit_offset` bits into this span.
    pub fn subspan(&self, bit_offset: usize, bit_length: usize) -> Result<BitSpan<'a>, ArtError> {
        self.check_range(bit_offset, bit_length)?;
        Ok(BitSpan { data: self.data, bit_start: self.bit_start + bit_offset, bit_size: bit_length })
    }

    /// Everything from `bit_offset` to the end of the span.
    pub fn subspan_from(&self, bit_offset: usize) -> Result<BitSpan<'a>, ArtError> {
        if bit_offset > self.bit_size {
            fail!(Truncated, "bit offset {} past span of {} bits", bit_offset, self.bit_size);
        }
        self.subspan(bit_offset, self.bit_size - bit_offset)
    }

    fn check_range(&self, bit_offset: usize, bit_length: usize) -> Result<(), ArtError> {
        match bit_offset.checked_add(bit_length) {
            Some(end) if end <= self.bit_size => Ok(()),
            _ => fail!(
                Truncated,
                "bit range {}+{} exceeds span of {} bits",
                bit_offset,
                bit_length,
                self.bit_size
            ),
        }
    }

    // Bytes past the end of the slice read as zero. Callers only ever keep bits
    // that passed `check_range`, so the padding never reaches a result.
    #[inline]
    fn load_word(&self, word_index: usize) -> u64 {
        let start = word_index * 8;
        let mut bytes = [0u8; 8];
        if start < self.data.len() {
            let end = (start + 8).min(self.data.len());
            bytes[..end - start].copy_from_slice(&self.data[start..end]);
        }
        u64::from_le_bytes(bytes)
    }

    /// Loads `bit_length` (0..=64) bits starting `bit_offset` bits into the span.
    ///
    /// Bits of the result above `bit_length` are always zero.
    pub fn load_bits(&self, bit_offset: usize, bit_length: usize) -> Result<u64, ArtError> {
        if bit_length > WORD_BITS {
            fail!(Format, "cannot load {} bits into a 64-bit value", bit_length);
        }
        self.check_range(bit_offset, bit_length)?;
        Ok(self.load_bits_unchecked(bit_offset, bit_length))
    }

    #[inline]
    pub(crate) fn load_bits_unchecked(&self, bit_offset: usize, bit_length: usize) -> u64 {
        if bit_length == 0 {
            return 0;
        }
        let position = self.bit_start + bit_offset;
        let word_index = position / WORD_BITS;
        let shift = position % WORD_BITS;

        let mut value = self.load_word(word_index) >> shift;
        if shift + bit_length > WORD_BITS {
            // shift > 0 here, so the left shift is in 1..64.
            value |= self.load_word(word_index + 1) << (WORD_BITS - shift);
        }
        mask_low_bits(value, bit_length)
    }

    pub fn load_bit(&self, bit_offset: usize) -> Result<bool, ArtError> {
        Ok(self.load_bits(bit_offset, 1)? != 0)
    }

    /// Walks the span in word-sized chunks.
    ///
    /// The visitor sees `(offset_within_span, chunk_bits, chunk_value)` for an
    /// optional unaligned leading chunk, every full 64-bit word, and an optional
    /// trailing partial chunk, in ascending order. Unused high bits of partial
    /// chunks are zero. Returns `false` as soon as the visitor does.
    pub fn visit_chunks<F>(&self, mut visitor: F) -> bool
    where
        F: FnMut(usize, usize, u64) -> bool,
    {
        let mut remaining = self.bit_size;
        if remaining == 0 {
            return true;
        }
        let mut offset = 0;
        let mut word_index = self.bit_start / WORD_BITS;
        let misalignment = self.bit_start % WORD_BITS;

        if misalignment != 0 {
            let mut leading = WORD_BITS - misalignment;
            let mut value = self.load_word(word_index) >> misalignment;
            if leading > remaining {
                leading = remaining;
                value = mask_low_bits(value, remaining);
            }
            if !visitor(offset, leading, value) {
                return false;
            }
            offset += leading;
            remaining -= leading;
            word_index += 1;
        }

        while remaining >= WORD_BITS {
            if !visitor(offset, WORD_BITS, self.load_word(word_index)) {
                return false;
            }
            offset += WORD_BITS;
            remaining -= WORD_BITS;
            word_index += 1;
        }

        if remaining > 0 {
            let value = mask_low_bits(self.load_word(word_index), remaining);
            if !visitor(offset, remaining, value) {
                return false;
            }
        }
        true
    }

    /// Number of set bits in `bit_length` bits starting at `bit_offset`. The
    /// range may be any length, not just one word.
    pub fn pop_count(&self, bit_offset: usize, bit_length: usize) -> Result<u32, ArtError> {
        let region = self.subspan(bit_offset, bit_length)?;
        let mut count = 0u32;
        region.visit_chunks(|_, _, value| {
            count += value.count_ones();
            true
        });
        Ok(count)
    }

    /// Set bits across the whole span.
    pub fn pop_count_all(&self) -> u32 {
        let mut count = 0u32;
        self.visit_chunks(|_, _, value| {
            count += value.count_ones();
            true
        });
        count
    }

    /// Offset of the lowest set bit at or after `bit_offset`, if any.
    pub fn first_set_bit(&self, bit_offset: usize) -> Result<Option<usize>, ArtError> {
        let region = self.subspan_from(bit_offset)?;
        let mut found = None;
        region.visit_chunks(|offset, _, value| {
            if value != 0 {
                found = Some(bit_offset + offset + value.trailing_zeros() as usize);
                return false;
            }
            true
        });
        Ok(found)
    }

    /// Offset of the highest set bit, if any. ART uses this to size stack masks
    /// whose trailing zeros were trimmed by the encoder.
    pub fn last_set_bit(&self) -> Option<usize> {
        let mut found = None;
        self.visit_chunks(|offset, _, value| {
            if value != 0 {
                found = Some(offset + (63 - value.leading_zeros() as usize));
            }
            true
        });
        found
    }

    /// Bitwise equality of two spans, regardless of their alignment.
    pub fn bits_equal(&self, other: &BitSpan<'_>) -> bool {
        if self.bit_size != other.bit_size {
            return false;
        }
        self.visit_chunks(|offset, bits, value| other.load_bits_unchecked(offset, bits) == value)
    }
}

#[inline]
fn mask_low_bits(value: u64, bit_length: usize) -> u64 {
    if bit_length >= WORD_BITS {
        value
    } else {
        value & !(u64::MAX << bit_length)
    }
}

impl std::fmt::Debug for BitSpan<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "BitSpan[{}+{}]", self.bit_start, self.bit_size)
    }
}

impl std::fmt::Binary for BitSpan<'_> {
    // Lowest bit first, which matches how ART dumps stack masks.
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for i in 0..self.bit_size {
            let bit = self.load_bits_unchecked(i, 1);
            write!(f, "{}", bit)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::Rng;

    fn reference_bits(bytes: &[u8; 16], offset: usize, length: usize) -> u64 {
        let whole = u128::from_le_bytes(*bytes);
        let shifted = whole >> offset;
        if length == 64 {
            shifted as u64
        } else {
            (shifted & ((1u128 << length) - 1)) as u64
        }
    }

    #[test]
    fn zero_length_is_zero() {
        let data = [0xffu8; 16];
        let span = BitSpan::new(&data);
        for offset in 0..=128 {
            assert_eq!(span.load_bits(offset, 0).unwrap(), 0);
        }
    }

    #[test]
    fn all_ones_and_all_zeros() {
        let ones = [0xffu8; 24];
        let zeros = [0u8; 24];
        let ones = BitSpan::new(&ones);
        let zeros = BitSpan::new(&zeros);
        for length in 1..=64usize {
            let expected = if length == 64 { u64::MAX } else { (1u64 << length) - 1 };
            for offset in 0..=(192 - length) {
                assert_eq!(ones.load_bits(offset, length).unwrap(), expected, "offset {} length {}", offset, length);
                assert_eq!(zeros.load_bits(offset, length).unwrap(), 0);
            }
        }
    }

    #[test]
    fn cross_word_matches_reference() {
        let mut rng = rand::rng();
        for _ in 0..32 {
            let bytes: [u8; 16] = rng.random();
            let span = BitSpan::new(&bytes);
            for offset in 1..64usize {
                // every length that reaches into the second word
                for length in (64 - offset + 1)..=64usize {
                    if offset + length > 128 {
                        continue;
                    }
                    assert_eq!(
                        span.load_bits(offset, length).unwrap(),
                        reference_bits(&bytes, offset, length),
                        "offset {} length {}",
                        offset,
                        length
                    );
                }
            }
        }
    }

    #[test]
    fn subspan_shares_offsets() {
        let bytes = 0x0123_4567_89ab_cdef_u64.to_le_bytes();
        let span = BitSpan::new(&bytes);
        let sub = span.subspan(4, 40).unwrap();
        assert_eq!(sub.size_in_bits(), 40);
        assert_eq!(sub.load_bits(0, 8).unwrap(), 0xde);
        assert_eq!(sub.load_bits(8, 12).unwrap(), span.load_bits(12, 12).unwrap());
        let subsub = sub.subspan(8, 8).unwrap();
        assert_eq!(subsub.bit_start(), 12);
    }

    #[test]
    fn out_of_range_is_truncated() {
        let bytes = [0u8; 4];
        let span = BitSpan::new(&bytes);
        let e = span.load_bits(30, 3).unwrap_err();
        assert_eq!(e.kind(), ErrorKind::Truncated);
        assert!(BitSpan::with_range(&bytes, 1, 32).is_err());
        assert_eq!(span.load_bits(0, 65).unwrap_err().kind(), ErrorKind::Format);
    }

    #[test]
    fn visit_chunks_layout() {
        let bytes = [0xffu8; 32];
        let span = BitSpan::with_range(&bytes, 10, 200).unwrap();
        let mut chunks = vec![];
        assert!(span.visit_chunks(|offset, bits, value| {
            chunks.push((offset, bits, value));
            true
        }));
        assert_eq!(
            chunks,
            vec![
                (0, 54, (1u64 << 54) - 1),
                (54, 64, u64::MAX),
                (118, 64, u64::MAX),
                (182, 18, (1u64 << 18) - 1),
            ]
        );
    }

    #[test]
    fn visit_chunks_stops_early() {
        let bytes = [0u8; 32];
        let span = BitSpan::new(&bytes);
        let mut calls = 0;
        assert!(!span.visit_chunks(|_, _, _| {
            calls += 1;
            calls < 2
        }));
        assert_eq!(calls, 2);
    }

    #[test]
    fn pop_count_is_additive() {
        let mut rng = rand::rng();
        let mut bytes = [0u8; 40];
        rng.fill(&mut bytes[..]);
        let span = BitSpan::with_range(&bytes, 3, 300).unwrap();
        let total = span.pop_count(0, 300).unwrap();
        assert_eq!(total, span.pop_count_all());
        for m in 0..=300 {
            assert_eq!(total, span.pop_count(0, m).unwrap() + span.pop_count(m, 300 - m).unwrap());
        }
    }

    #[test]
    fn first_and_last_set_bit() {
        let mut bytes = [0u8; 24];
        bytes[9] = 0b0001_0000; // bit 76
        bytes[20] = 0b0000_0010; // bit 161
        let span = BitSpan::new(&bytes);
        assert_eq!(span.first_set_bit(0).unwrap(), Some(76));
        assert_eq!(span.first_set_bit(77).unwrap(), Some(161));
        assert_eq!(span.first_set_bit(162).unwrap(), None);
        assert_eq!(span.last_set_bit(), Some(161));
        assert_eq!(BitSpan::new(&[0u8; 3]).last_set_bit(), None);
    }

    #[test]
    fn equality_ignores_alignment() {
        let a = [0b1011_0110u8, 0x5a];
        let b = [0b0110_1100u8, 0xb5, 0x00];
        let left = BitSpan::with_range(&a, 0, 16).unwrap();
        let right = BitSpan::with_range(&b, 1, 16).unwrap();
        assert!(left.bits_equal(&right));
        assert!(!left.bits_equal(&BitSpan::with_range(&b, 0, 16).unwrap()));
    }
}
