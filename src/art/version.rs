//! Format version selection.
//!
//! Every layout decision the decoders make is keyed off a [`FormatVersion`] passed
//! in by the caller. The SDK level alone selects it; see [`FormatVersion::for_sdk`].

use std::ops::RangeInclusive;

use once_cell::sync::Lazy;
use rangemap::RangeInclusiveMap;
use serde::{Deserialize, Serialize};

use crate::art::error::{ArtError, ErrorKind};

/// Android 10 (Q), the first release whose CodeInfo is built from bit tables.
pub const SDK_Q: i32 = 29;
/// Android 11 (R): interleaved varint headers, table presence flags.
pub const SDK_R: i32 = 30;
/// Android 12 (S): code size moves into the CodeInfo header.
pub const SDK_S: i32 = 31;
/// Android 13 (T): the method header drops its should-deoptimize bit.
pub const SDK_T: i32 = 33;

/// How the CodeInfo header is laid out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HeaderLayout {
    /// Four sequential varints; every table present with a dedup bit.
    Sequential4,
    /// Six interleaved varints, no code size.
    Interleaved6,
    /// Seven interleaved varints, with code size.
    Interleaved7,
}

impl HeaderLayout {
    /// Number of header varints.
    pub fn num_headers(&self) -> usize {
        match self {
            HeaderLayout::Sequential4 => 4,
            HeaderLayout::Interleaved6 => 6,
            HeaderLayout::Interleaved7 => 7,
        }
    }

    pub fn has_code_size(&self) -> bool {
        matches!(self, HeaderLayout::Interleaved7)
    }

    pub fn has_bit_table_flags(&self) -> bool {
        !matches!(self, HeaderLayout::Sequential4)
    }
}

/// How a bit table encodes its row count and column widths.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TableEncoding {
    /// Row count varint, then one varint per column only when rows != 0 (OAT 170).
    Sequential,
    /// Row count and column widths as one interleaved varint group (OAT >= 171).
    Interleaved,
}

/// How the `OatQuickMethodHeader` in front of compiled code is laid out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MethodHeaderLayout {
    /// `[code_info_offset: u32, code_size: u32]`; bit 31 of the size is should-deoptimize.
    OffsetAndSize,
    /// One `u32`: bit 31 should-deoptimize, bit 30 is-CodeInfo, 30 bits of payload.
    PackedWithDeoptimizeBit,
    /// One `u32`: bit 31 is-CodeInfo, 31 bits of payload. Should-deoptimize is a CodeInfo flag.
    Packed,
}

static METHOD_HEADER_LAYOUTS: Lazy<RangeInclusiveMap<i32, MethodHeaderLayout>> = Lazy::new(|| {
    let mut map = RangeInclusiveMap::new();
    map.insert(SDK_Q..=SDK_R, MethodHeaderLayout::OffsetAndSize);
    map.insert(SDK_S..=SDK_T - 1, MethodHeaderLayout::PackedWithDeoptimizeBit);
    map.insert(SDK_T..=i32::MAX, MethodHeaderLayout::Packed);
    map
});

static HEADER_LAYOUTS: Lazy<RangeInclusiveMap<i32, HeaderLayout>> = Lazy::new(|| {
    let mut map = RangeInclusiveMap::new();
    map.insert(SDK_Q..=SDK_Q, HeaderLayout::Sequential4);
    map.insert(SDK_R..=SDK_R, HeaderLayout::Interleaved6);
    map.insert(SDK_S..=i32::MAX, HeaderLayout::Interleaved7);
    map
});

/// Resolved decoding parameters for one Android release.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FormatVersion {
    pub sdk: i32,
    pub header_layout: HeaderLayout,
    pub table_encoding: TableEncoding,
    /// Columns in the MethodInfo table: 1 before S, 3 from S on.
    pub method_info_columns: usize,
    pub method_header_layout: MethodHeaderLayout,
}

impl FormatVersion {
    /// The layout used by `sdk`. Total over `i32`: anything older than Q is
    /// rejected rather than guessed.
    pub fn for_sdk(sdk: i32) -> Result<FormatVersion, ArtError> {
        let header_layout = match HEADER_LAYOUTS.get(&sdk) {
            Some(layout) => *layout,
            None => fail!(
                UnsupportedVersion,
                "SDK {} predates bit-table CodeInfo (supported from {})",
                sdk,
                SDK_Q
            ),
        };
        let table_encoding = match header_layout {
            HeaderLayout::Sequential4 => TableEncoding::Sequential,
            _ => TableEncoding::Interleaved,
        };
        let method_info_columns = if sdk >= SDK_S { 3 } else { 1 };
        let method_header_layout = match METHOD_HEADER_LAYOUTS.get(&sdk) {
            Some(layout) => *layout,
            None => fail!(UnsupportedVersion, "no method header layout for SDK {}", sdk),
        };
        Ok(FormatVersion { sdk, header_layout, table_encoding, method_info_columns, method_header_layout })
    }

    /// SDK levels with a known layout.
    pub fn supported_range() -> RangeInclusive<i32> {
        SDK_Q..=i32::MAX
    }

    /// Whether the OatQuickMethodHeader carries the code size (before S).
    pub fn method_header_has_code_size(&self) -> bool {
        self.method_header_layout == MethodHeaderLayout::OffsetAndSize
    }
}
