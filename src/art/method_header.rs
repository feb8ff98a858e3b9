//! `OatQuickMethodHeader`: the few bytes ART places right before compiled code.
//!
//! Before S the header is `[code_info_offset: u32, code_size: u32]`; the top bit
//! of `code_size` is the should-deoptimize flag. From S on it is a single `u32`
//! whose is-CodeInfo bit says the payload is a CodeInfo offset (otherwise it is
//! the code size of a stub without CodeInfo), and the code size lives in the
//! CodeInfo header. S keeps should-deoptimize in bit 31 with is-CodeInfo in bit
//! 30; from T on bit 31 is is-CodeInfo and should-deoptimize is a CodeInfo flag.

use log::trace;
use serde::{Deserialize, Serialize};

use crate::art::code_info::CodeInfoFlags;
use crate::art::error::{ArtError, ErrorKind, ResultExt};
use crate::art::memory::{read_code_info_header, MemorySource};
use crate::art::version::{FormatVersion, MethodHeaderLayout};
use crate::types::InstructionSet;

/// Before T: should-deoptimize bit of the header word (or of `code_size`).
pub const SHOULD_DEOPTIMIZE_MASK: u32 = 0x8000_0000;
/// S only.
pub const S_IS_CODE_INFO_MASK: u32 = 0x4000_0000;
pub const S_CODE_INFO_MASK: u32 = 0x3fff_ffff;
/// T and later.
pub const IS_CODE_INFO_MASK: u32 = 0x8000_0000;
pub const CODE_INFO_MASK: u32 = 0x7fff_ffff;
const LEGACY_CODE_SIZE_MASK: u32 = !SHOULD_DEOPTIMIZE_MASK;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MethodHeader {
    /// First instruction of the method.
    pub code: u64,
    /// Address of the CodeInfo, absent for stubs.
    pub code_info: Option<u64>,
    pub code_size: u32,
    pub should_deoptimize: bool,
}

impl MethodHeader {
    pub fn read<M: MemorySource + ?Sized>(
        source: &M,
        code: u64,
        version: &FormatVersion,
    ) -> Result<MethodHeader, ArtError> {
        Self::read_inner(source, code, version).context(|| format!("method header of code at {:#x}", code))
    }

    fn read_inner<M: MemorySource + ?Sized>(
        source: &M,
        code: u64,
        version: &FormatVersion,
    ) -> Result<MethodHeader, ArtError> {
        let (is_code_info_mask, payload_mask, deoptimize_mask) = match version.method_header_layout {
            MethodHeaderLayout::OffsetAndSize => return Self::read_offset_and_size(source, code),
            MethodHeaderLayout::PackedWithDeoptimizeBit => {
                (S_IS_CODE_INFO_MASK, S_CODE_INFO_MASK, SHOULD_DEOPTIMIZE_MASK)
            }
            MethodHeaderLayout::Packed => (IS_CODE_INFO_MASK, CODE_INFO_MASK, 0),
        };

        let base = match code.checked_sub(4) {
            Some(base) => base,
            None => fail!(Memory, "code pointer {:#x} leaves no room for a header", code),
        };
        let data = source.read_u32(base)?;
        trace!("method header at {:#x}: data {:#x}", base, data);
        let header_deoptimize = data & deoptimize_mask != 0;
        if data & is_code_info_mask == 0 {
            return Ok(MethodHeader {
                code,
                code_info: None,
                code_size: data & payload_mask,
                should_deoptimize: header_deoptimize,
            });
        }

        let code_info = code_info_address(code, data & payload_mask)?;
        let (code_size, flag_deoptimize) = match code_info {
            Some(address) => {
                let header = read_code_info_header(source, address, version)?;
                (
                    header.code_size().unwrap_or(0),
                    header.flags().contains(CodeInfoFlags::HAS_SHOULD_DEOPTIMIZE_FLAG),
                )
            }
            None => (0, false),
        };
        let should_deoptimize = if deoptimize_mask != 0 { header_deoptimize } else { flag_deoptimize };
        Ok(MethodHeader { code, code_info, code_size, should_deoptimize })
    }

    fn read_offset_and_size<M: MemorySource + ?Sized>(source: &M, code: u64) -> Result<MethodHeader, ArtError> {
        let base = match code.checked_sub(8) {
            Some(base) => base,
            None => fail!(Memory, "code pointer {:#x} leaves no room for a header", code),
        };
        let offset = source.read_u32(base)?;
        let raw_size = source.read_u32(base + 4)?;
        let code_info = code_info_address(code, offset)?;
        trace!("method header at {:#x}: code_info_offset {:#x} code_size {:#x}", base, offset, raw_size);
        Ok(MethodHeader {
            code,
            code_info,
            code_size: raw_size & LEGACY_CODE_SIZE_MASK,
            should_deoptimize: raw_size & SHOULD_DEOPTIMIZE_MASK != 0,
        })
    }

    /// Whether `pc` falls inside the method's code.
    pub fn contains(&self, pc: u64) -> bool {
        pc >= self.code && pc - self.code < self.code_size as u64
    }

    /// Offset of `pc` from the start of the code, for stack map lookups.
    pub fn native_pc_offset(&self, pc: u64) -> Option<u32> {
        if self.contains(pc) {
            Some((pc - self.code) as u32)
        } else {
            None
        }
    }
}

fn code_info_address(code: u64, offset: u32) -> Result<Option<u64>, ArtError> {
    if offset == 0 {
        return Ok(None);
    }
    match code.checked_sub(offset as u64) {
        Some(address) => Ok(Some(address)),
        None => fail!(Format, "CodeInfo offset {:#x} reaches below address zero from {:#x}", offset, code),
    }
}

/// Entry points of Thumb-2 code carry the mode bit; the code starts one byte earlier.
pub fn code_pointer_from_entry_point(entry_point: u64, isa: InstructionSet) -> u64 {
    match isa {
        InstructionSet::Thumb2 => entry_point & !1,
        _ => entry_point,
    }
}
