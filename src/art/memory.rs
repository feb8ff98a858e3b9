//! Byte access by virtual address.
//!
//! The decoders only need `read(address, length)` and the target's pointer size.
//! [`MemorySource`] is that seam; a core-dump loader or a `/proc/<pid>/mem` reader
//! implements it. [`MemoryImage`] is an in-memory implementation built from
//! address-tagged segments, the shape of a core file's loadable segments.

use std::ops::Range;

use log::debug;
use rangemap::RangeMap;
use serde::{Deserialize, Serialize};

use crate::art::code_info::{CodeInfo, CodeInfoHeader, MAX_HEADER_BYTES};
use crate::art::error::{ArtError, ErrorKind, ResultExt};
use crate::art::version::FormatVersion;
use crate::art::{read_u1, read_u2, read_u4, read_u8};

pub trait MemorySource {
    /// Copies `length` bytes starting at `address`.
    fn read_bytes(&self, address: u64, length: usize) -> Result<Vec<u8>, ArtError>;

    /// Target pointer size in bytes: 4 or 8.
    fn pointer_size(&self) -> usize;

    /// The mapping containing `address`, if any.
    fn mapped_range(&self, address: u64) -> Option<Range<u64>>;

    fn word_bits(&self) -> usize {
        self.pointer_size() * 8
    }

    fn read_u8(&self, address: u64) -> Result<u8, ArtError> {
        let bytes = self.read_bytes(address, 1)?;
        read_u1(&bytes, &mut 0)
    }

    fn read_u16(&self, address: u64) -> Result<u16, ArtError> {
        let bytes = self.read_bytes(address, 2)?;
        read_u2(&bytes, &mut 0)
    }

    fn read_u32(&self, address: u64) -> Result<u32, ArtError> {
        let bytes = self.read_bytes(address, 4)?;
        read_u4(&bytes, &mut 0)
    }

    fn read_u64(&self, address: u64) -> Result<u64, ArtError> {
        let bytes = self.read_bytes(address, 8)?;
        read_u8(&bytes, &mut 0)
    }

    fn read_pointer(&self, address: u64) -> Result<u64, ArtError> {
        match self.pointer_size() {
            4 => Ok(self.read_u32(address)? as u64),
            8 => self.read_u64(address),
            n => fail!(Memory, "unsupported pointer size {}", n),
        }
    }
}

struct Segment {
    base: u64,
    bytes: Vec<u8>,
}

/// A sparse address space assembled from byte segments.
pub struct MemoryImage {
    pointer_size: usize,
    segments: Vec<Segment>,
    index: RangeMap<u64, usize>,
}

impl MemoryImage {
    pub fn new(pointer_size: usize) -> Self {
        MemoryImage { pointer_size, segments: Vec::new(), index: RangeMap::new() }
    }

    /// Maps `bytes` at `base`. Segments may touch but not overlap.
    pub fn add_segment(&mut self, base: u64, bytes: Vec<u8>) -> Result<(), ArtError> {
        if bytes.is_empty() {
            return Ok(());
        }
        let end = match base.checked_add(bytes.len() as u64) {
            Some(end) => end,
            None => fail!(Memory, "segment at {:#x} wraps the address space", base),
        };
        let range = base..end;
        if self.index.overlaps(&range) {
            fail!(Memory, "segment {:#x}..{:#x} overlaps an existing segment", base, end);
        }
        self.index.insert(range, self.segments.len());
        self.segments.push(Segment { base, bytes });
        Ok(())
    }

    pub fn with_segment(pointer_size: usize, base: u64, bytes: Vec<u8>) -> Result<Self, ArtError> {
        let mut image = MemoryImage::new(pointer_size);
        image.add_segment(base, bytes)?;
        Ok(image)
    }

    pub fn segment_count(&self) -> usize {
        self.segments.len()
    }
}

impl MemorySource for MemoryImage {
    // Reads may run across touching segments.
    fn read_bytes(&self, address: u64, length: usize) -> Result<Vec<u8>, ArtError> {
        let mut out = Vec::with_capacity(length);
        let mut cursor = address;
        while out.len() < length {
            let (range, index) = match self.index.get_key_value(&cursor) {
                Some(hit) => hit,
                None => fail!(
                    Memory,
                    "address {:#x} is not mapped (reading {} bytes at {:#x})",
                    cursor,
                    length,
                    address
                ),
            };
            let segment = &self.segments[*index];
            let start = (cursor - segment.base) as usize;
            let available = (range.end - cursor) as usize;
            let take = available.min(length - out.len());
            out.extend_from_slice(&segment.bytes[start..start + take]);
            cursor += take as u64;
        }
        Ok(out)
    }

    fn pointer_size(&self) -> usize {
        self.pointer_size
    }

    fn mapped_range(&self, address: u64) -> Option<Range<u64>> {
        self.index.get_key_value(&address).map(|(range, _)| range.clone())
    }
}

/// How much memory to copy around a CodeInfo.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadOptions {
    /// Bytes before the CodeInfo, for deduplicated tables stored in earlier CodeInfos.
    pub lookbehind: usize,
    /// Bytes from the CodeInfo start onwards.
    pub max_size: usize,
}

impl Default for LoadOptions {
    fn default() -> Self {
        LoadOptions { lookbehind: 64 * 1024, max_size: 1024 * 1024 }
    }
}

/// A copy of the memory around one CodeInfo, clamped to its mapping.
pub struct CodeInfoBytes {
    address: u64,
    window_start: u64,
    bytes: Vec<u8>,
}

impl CodeInfoBytes {
    pub fn read<M: MemorySource + ?Sized>(
        source: &M,
        address: u64,
        options: &LoadOptions,
    ) -> Result<CodeInfoBytes, ArtError> {
        let mapping = source
            .mapped_range(address)
            .ok_or_else(|| err!(Memory, "CodeInfo address {:#x} is not mapped", address))?;
        let window_start = address.saturating_sub(options.lookbehind as u64).max(mapping.start);
        let window_end = address.saturating_add(options.max_size as u64).min(mapping.end);
        let bytes = source
            .read_bytes(window_start, (window_end - window_start) as usize)
            .context(|| format!("CodeInfo window at {:#x}", address))?;
        debug!(
            "loaded CodeInfo window {:#x}..{:#x} for {:#x}",
            window_start, window_end, address
        );
        Ok(CodeInfoBytes { address, window_start, bytes })
    }

    pub fn address(&self) -> u64 {
        self.address
    }

    /// Address of the first copied byte.
    pub fn window_start(&self) -> u64 {
        self.window_start
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn code_info(&self, version: FormatVersion) -> Result<CodeInfo<'_>, ArtError> {
        CodeInfo::at(&self.bytes, (self.address - self.window_start) as usize, version)
    }
}

/// Reads and decodes only the header of the CodeInfo at `address`.
pub fn read_code_info_header<M: MemorySource + ?Sized>(
    source: &M,
    address: u64,
    version: &FormatVersion,
) -> Result<CodeInfoHeader, ArtError> {
    let mapping = source
        .mapped_range(address)
        .ok_or_else(|| err!(Memory, "CodeInfo address {:#x} is not mapped", address))?;
    let end = address.saturating_add(MAX_HEADER_BYTES as u64).min(mapping.end);
    let bytes = source.read_bytes(address, (end - address) as usize)?;
    CodeInfo::decode_header_only(&bytes, version).context(|| format!("CodeInfo header at {:#x}", address))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_within_and_across_segments() {
        let mut image = MemoryImage::new(8);
        image.add_segment(0x1000, vec![1, 2, 3, 4]).unwrap();
        image.add_segment(0x1004, vec![5, 6, 7, 8]).unwrap();
        assert_eq!(image.segment_count(), 2);
        assert_eq!(image.read_u8(0x1001).unwrap(), 2);
        assert_eq!(image.read_u16(0x1002).unwrap(), 0x0403);
        assert_eq!(image.read_u32(0x1002).unwrap(), 0x0605_0403);
        assert_eq!(image.read_u64(0x1000).unwrap(), 0x0807_0605_0403_0201);
        assert_eq!(image.read_pointer(0x1000).unwrap(), 0x0807_0605_0403_0201);
    }

    #[test]
    fn unmapped_reads_fail() {
        let image = MemoryImage::with_segment(4, 0x2000, vec![0; 16]).unwrap();
        let e = image.read_u32(0x200e).unwrap_err();
        assert_eq!(e.kind(), ErrorKind::Memory);
        assert!(image.read_u8(0x1fff).is_err());
        assert_eq!(image.read_pointer(0x2000).unwrap(), 0);
        assert_eq!(image.word_bits(), 32);
    }

    #[test]
    fn overlapping_segments_rejected() {
        let mut image = MemoryImage::new(8);
        image.add_segment(0x1000, vec![0; 0x100]).unwrap();
        assert!(image.add_segment(0x10ff, vec![0; 2]).is_err());
        assert!(image.add_segment(0x1100, vec![0; 2]).is_ok());
        assert_eq!(image.mapped_range(0x1050), Some(0x1000..0x1100));
        assert_eq!(image.mapped_range(0x5000), None);
    }

    #[test]
    fn code_info_window_is_clamped() {
        let image = MemoryImage::with_segment(8, 0x4000, vec![0xab; 0x100]).unwrap();
        let options = LoadOptions { lookbehind: 0x1000, max_size: 0x40 };
        let window = CodeInfoBytes::read(&image, 0x4010, &options).unwrap();
        assert_eq!(window.window_start(), 0x4000);
        assert_eq!(window.bytes().len(), 0x50);
        assert_eq!(window.address(), 0x4010);
        assert!(CodeInfoBytes::read(&image, 0x9000, &options).is_err());
    }
}
