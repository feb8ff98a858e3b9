//! CodeInfo: the stack-map blob ART's optimizing compiler and JIT attach to each method.
//!
//! A CodeInfo is a header of varints followed by up to eight bit tables. Only the
//! header is decoded eagerly. Tables are decoded on first use, in stream order,
//! and kept for the lifetime of the [`CodeInfo`].

use bitflags::bitflags;
use log::{debug, warn};
use once_cell::unsync::OnceCell;
use serde::{Deserialize, Serialize};

use crate::art::bit_memory::BitSpan;
use crate::art::bit_reader::BitCursor;
use crate::art::bit_table::{BitTable, NO_VALUE};
use crate::art::error::{ArtError, ErrorKind, ResultExt};
use crate::art::stack_map::{
    pack_native_pc, DexRegisterInfo, DexRegisterMap, DexRegisterMapEntry, InlineInfo, MethodInfo, RegisterMask,
    StackMap, TableKind, NUM_TABLES,
};
use crate::art::version::{FormatVersion, HeaderLayout};
use crate::types::{DexRegisterKind, DexRegisterLocation, FrameInfo, InstructionSet, StackMapKind};

/// Frame sizes are stored divided by this.
pub const STACK_ALIGNMENT: u32 = 16;

/// Upper bound on the encoded header: seven nibbles plus seven 32-bit payloads.
pub const MAX_HEADER_BYTES: usize = 32;

/// `bit_table_flags` for layouts that always carry every table.
const ALL_TABLES_PRESENT: u32 = (1 << NUM_TABLES) - 1;

bitflags! {
    /// CodeInfo `flags` header field.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct CodeInfoFlags: u32 {
        const HAS_INLINE_INFO = 1 << 0;
        const IS_BASELINE = 1 << 1;
        const HAS_SHOULD_DEOPTIMIZE_FLAG = 1 << 2;
        const IS_DEBUGGABLE = 1 << 3;
    }
}

/// The scalar fields at the start of every CodeInfo.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodeInfoHeader {
    pub layout: HeaderLayout,
    pub flags: u32,
    /// Only stored from S on; earlier releases keep it in the method header.
    pub code_size: Option<u32>,
    pub packed_frame_size: u32,
    pub core_spill_mask: u32,
    pub fp_spill_mask: u32,
    pub number_of_dex_registers: u32,
    /// Bit `i`: table `i` present. Bit `i + 8`: table `i` deduplicated.
    pub bit_table_flags: u32,
    /// Encoded size of the header.
    pub header_bits: usize,
}

impl CodeInfoHeader {
    /// Decodes the header at the cursor. Never touches the tables.
    pub fn decode(cursor: &mut BitCursor<'_>, version: &FormatVersion) -> Result<CodeInfoHeader, ArtError> {
        let start = cursor.bits_read();
        let mut header = match version.header_layout {
            HeaderLayout::Sequential4 => {
                let mut fields = [0u32; 4];
                for field in fields.iter_mut() {
                    *field = cursor.read_varint()?;
                }
                CodeInfoHeader {
                    layout: HeaderLayout::Sequential4,
                    flags: 0,
                    code_size: None,
                    packed_frame_size: fields[0],
                    core_spill_mask: fields[1],
                    fp_spill_mask: fields[2],
                    number_of_dex_registers: fields[3],
                    bit_table_flags: ALL_TABLES_PRESENT,
                    header_bits: 0,
                }
            }
            HeaderLayout::Interleaved6 => {
                let fields = cursor.read_interleaved_varints_array::<6>()?;
                CodeInfoHeader {
                    layout: HeaderLayout::Interleaved6,
                    flags: fields[0],
                    code_size: None,
                    packed_frame_size: fields[1],
                    core_spill_mask: fields[2],
                    fp_spill_mask: fields[3],
                    number_of_dex_registers: fields[4],
                    bit_table_flags: fields[5],
                    header_bits: 0,
                }
            }
            HeaderLayout::Interleaved7 => {
                let fields = cursor.read_interleaved_varints_array::<7>()?;
                CodeInfoHeader {
                    layout: HeaderLayout::Interleaved7,
                    flags: fields[0],
                    code_size: Some(fields[1]),
                    packed_frame_size: fields[2],
                    core_spill_mask: fields[3],
                    fp_spill_mask: fields[4],
                    number_of_dex_registers: fields[5],
                    bit_table_flags: fields[6],
                    header_bits: 0,
                }
            }
        };
        header.header_bits = cursor.bits_read() - start;

        if CodeInfoFlags::from_bits(header.flags).is_none() {
            warn!("CodeInfo flags {:#x} carry unknown bits", header.flags);
        }
        if header.bit_table_flags >> (2 * NUM_TABLES) != 0 {
            warn!("CodeInfo bit_table_flags {:#x} carry unknown bits", header.bit_table_flags);
        }
        Ok(header)
    }

    pub fn flags(&self) -> CodeInfoFlags {
        CodeInfoFlags::from_bits_retain(self.flags)
    }

    pub fn has_inline_info(&self) -> bool {
        self.flags().contains(CodeInfoFlags::HAS_INLINE_INFO)
    }

    pub fn is_baseline(&self) -> bool {
        self.flags().contains(CodeInfoFlags::IS_BASELINE)
    }

    pub fn is_debuggable(&self) -> bool {
        self.flags().contains(CodeInfoFlags::IS_DEBUGGABLE)
    }

    pub fn code_size(&self) -> Option<u32> {
        self.code_size
    }

    pub fn frame_size_in_bytes(&self) -> u32 {
        self.packed_frame_size.wrapping_mul(STACK_ALIGNMENT)
    }

    pub fn frame_info(&self) -> FrameInfo {
        FrameInfo {
            frame_size_bytes: self.frame_size_in_bytes(),
            core_spill_mask: self.core_spill_mask,
            fp_spill_mask: self.fp_spill_mask,
        }
    }

    pub fn has_table(&self, kind: TableKind) -> bool {
        self.bit_table_flags & (1 << kind.index()) != 0
    }

    /// Always false for the Q layout, which marks duplicates in the stream instead.
    pub fn is_table_deduped(&self, kind: TableKind) -> bool {
        self.layout.has_bit_table_flags() && self.bit_table_flags & (1 << (kind.index() + NUM_TABLES)) != 0
    }
}

struct TableSlot<'a> {
    table: BitTable<'a>,
    /// Absolute bit offset in the backing bytes just past this table's entry.
    stream_end: usize,
}

/// A CodeInfo over borrowed bytes.
///
/// Table decoding is memoized in unsynchronized cells, so a `CodeInfo` is not
/// `Sync`; decode one per thread when sharing bytes between threads.
pub struct CodeInfo<'a> {
    data: &'a [u8],
    origin_bit: usize,
    version: FormatVersion,
    header: CodeInfoHeader,
    slots: [OnceCell<TableSlot<'a>>; NUM_TABLES],
}

impl<'a> CodeInfo<'a> {
    /// A CodeInfo starting at the first byte of `data`.
    pub fn new(data: &'a [u8], version: FormatVersion) -> Result<CodeInfo<'a>, ArtError> {
        Self::at(data, 0, version)
    }

    /// A CodeInfo starting `byte_offset` bytes into `data`. Bytes before it stay
    /// reachable for deduplicated tables that point backwards.
    pub fn at(data: &'a [u8], byte_offset: usize, version: FormatVersion) -> Result<CodeInfo<'a>, ArtError> {
        let origin_bit = byte_offset * 8;
        let mut cursor = BitCursor::at_bit(data, origin_bit)?;
        let header = CodeInfoHeader::decode(&mut cursor, &version)
            .context(|| format!("CodeInfo header at byte {:#x}", byte_offset))?;
        debug!(
            "CodeInfo at byte {:#x}: frame {} bytes, {} dex registers, table flags {:#x}",
            byte_offset,
            header.frame_size_in_bytes(),
            header.number_of_dex_registers,
            header.bit_table_flags
        );
        Ok(CodeInfo { data, origin_bit, version, header, slots: Default::default() })
    }

    /// Decodes only the header; the cheap path for frame-size queries.
    pub fn decode_header_only(data: &[u8], version: &FormatVersion) -> Result<CodeInfoHeader, ArtError> {
        CodeInfoHeader::decode(&mut BitCursor::new(data), version)
    }

    pub fn decode_frame_info(data: &[u8], version: &FormatVersion) -> Result<FrameInfo, ArtError> {
        Ok(Self::decode_header_only(data, version)?.frame_info())
    }

    pub fn decode_code_size(data: &[u8], version: &FormatVersion) -> Result<Option<u32>, ArtError> {
        Ok(Self::decode_header_only(data, version)?.code_size())
    }

    pub fn header(&self) -> &CodeInfoHeader {
        &self.header
    }

    pub fn version(&self) -> &FormatVersion {
        &self.version
    }

    pub fn frame_info(&self) -> FrameInfo {
        self.header.frame_info()
    }

    pub fn code_size(&self) -> Option<u32> {
        self.header.code_size()
    }

    pub fn number_of_dex_registers(&self) -> u32 {
        self.header.number_of_dex_registers
    }

    /// Whether table `kind` has been decoded yet.
    pub fn is_table_decoded(&self, kind: TableKind) -> bool {
        self.slots[kind.index()].get().is_some()
    }

    /// The table `kind`, decoding it (and any earlier tables) on first use.
    pub fn table(&self, kind: TableKind) -> Result<&BitTable<'a>, ArtError> {
        Ok(&self.slot(kind)?.table)
    }

    fn slot(&self, kind: TableKind) -> Result<&TableSlot<'a>, ArtError> {
        let cell = &self.slots[kind.index()];
        if let Some(slot) = cell.get() {
            return Ok(slot);
        }
        let start = match kind.index() {
            0 => self.origin_bit + self.header.header_bits,
            i => self.slot(TableKind::ALL[i - 1])?.stream_end,
        };
        let slot = self
            .decode_slot(kind, start)
            .context(|| format!("{} table", kind.name()))
            .context(|| format!("CodeInfo at byte {:#x}", self.origin_bit / 8))?;
        Ok(cell.get_or_init(|| slot))
    }

    fn decode_slot(&self, kind: TableKind, start: usize) -> Result<TableSlot<'a>, ArtError> {
        let mut cursor = BitCursor::at_bit(self.data, start)?;
        let columns = kind.num_columns(self.version.method_info_columns);

        let table = if self.header.layout.has_bit_table_flags() {
            if !self.header.has_table(kind) {
                BitTable::empty(columns)
            } else if self.header.is_table_deduped(kind) {
                self.decode_deduped(&mut cursor, columns)?
            } else {
                BitTable::decode(&mut cursor, columns, self.version.table_encoding)?
            }
        } else if cursor.read_bit()? {
            self.decode_deduped(&mut cursor, columns)?
        } else {
            BitTable::decode(&mut cursor, columns, self.version.table_encoding)?
        };

        Ok(TableSlot { table, stream_end: cursor.bit_offset() })
    }

    // A deduplicated entry is a varint distance, in bits, from the current stream
    // position back to an identical table emitted earlier.
    fn decode_deduped(&self, cursor: &mut BitCursor<'a>, columns: usize) -> Result<BitTable<'a>, ArtError> {
        let here = cursor.bit_offset();
        let distance = cursor.read_varint()? as usize;
        let target = match here.checked_sub(distance) {
            Some(target) if distance != 0 => target,
            _ => fail!(
                Format,
                "deduplicated table distance {} from bit {} is outside the loaded bytes",
                distance,
                here
            ),
        };
        if target >= self.origin_bit {
            warn!("deduplicated table at bit {} points inside its own CodeInfo", target);
        }
        let mut other = BitCursor::at_bit(self.data, target)?;
        BitTable::decode(&mut other, columns, self.version.table_encoding)
    }

    /// Decodes every table. Returns the encoded size of this CodeInfo in bits.
    pub fn decode_all(&self) -> Result<usize, ArtError> {
        let last = self.slot(TableKind::DexRegisterInfo)?;
        Ok(last.stream_end - self.origin_bit)
    }

    /// Encoded size in bytes; ART starts the next CodeInfo on a byte boundary.
    pub fn size_in_bytes(&self) -> Result<usize, ArtError> {
        Ok(self.decode_all()?.div_ceil(8))
    }

    pub fn number_of_stack_maps(&self) -> Result<u32, ArtError> {
        Ok(self.table(TableKind::StackMap)?.num_rows())
    }

    pub fn number_of_stack_mask_bits(&self) -> Result<usize, ArtError> {
        Ok(self.table(TableKind::StackMask)?.column_width(0))
    }

    pub fn stack_map_at(&self, index: u32) -> Result<Option<StackMap<'_, 'a>>, ArtError> {
        let table = self.table(TableKind::StackMap)?;
        if index >= table.num_rows() {
            return Ok(None);
        }
        Ok(Some(StackMap::new(table, index)))
    }

    pub fn stack_maps(&self) -> Result<impl Iterator<Item = StackMap<'_, 'a>>, ArtError> {
        let table = self.table(TableKind::StackMap)?;
        Ok((0..table.num_rows()).map(move |row| StackMap::new(table, row)))
    }

    /// The Default or OSR stack map at native offset `native_pc`.
    ///
    /// Non-catch stack maps are sorted by native PC and catch stack maps follow
    /// them, so a binary search finds the first candidate.
    pub fn stack_map_for_native_pc(
        &self,
        native_pc: u32,
        isa: InstructionSet,
    ) -> Result<Option<StackMap<'_, 'a>>, ArtError> {
        let table = self.table(TableKind::StackMap)?;
        let packed_pc = pack_native_pc(native_pc, isa);

        let (mut lo, mut hi) = (0u32, table.num_rows());
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            let sm = StackMap::new(table, mid);
            if sm.packed_native_pc() < packed_pc && sm.kind() != StackMapKind::Catch {
                lo = mid + 1;
            } else {
                hi = mid;
            }
        }

        for row in lo..table.num_rows() {
            let sm = StackMap::new(table, row);
            if sm.native_pc_offset(isa) != native_pc {
                break;
            }
            if matches!(sm.kind(), StackMapKind::Default | StackMapKind::Osr) {
                return Ok(Some(sm));
            }
        }
        Ok(None)
    }

    /// First non-debug stack map for `dex_pc`.
    pub fn stack_map_for_dex_pc(&self, dex_pc: u32) -> Result<Option<StackMap<'_, 'a>>, ArtError> {
        Ok(self.stack_maps()?.find(|sm| sm.dex_pc() == dex_pc && sm.kind() != StackMapKind::Debug))
    }

    /// Catch stack maps sit at the end, so search backwards.
    pub fn catch_stack_map_for_dex_pc(&self, dex_pc: u32) -> Result<Option<StackMap<'_, 'a>>, ArtError> {
        let table = self.table(TableKind::StackMap)?;
        Ok((0..table.num_rows())
            .rev()
            .map(|row| StackMap::new(table, row))
            .find(|sm| sm.dex_pc() == dex_pc && sm.kind() == StackMapKind::Catch))
    }

    pub fn osr_stack_map_for_dex_pc(&self, dex_pc: u32) -> Result<Option<StackMap<'_, 'a>>, ArtError> {
        Ok(self.stack_maps()?.find(|sm| sm.dex_pc() == dex_pc && sm.kind() == StackMapKind::Osr))
    }

    /// Core registers holding references at `stack_map`.
    pub fn register_mask_of(&self, stack_map: &StackMap<'_, '_>) -> Result<u32, ArtError> {
        let index = stack_map.register_mask_index();
        if index == NO_VALUE {
            return Ok(0);
        }
        let table = self.table(TableKind::RegisterMask)?;
        if index >= table.num_rows() {
            fail!(Format, "register mask index {} outside {} rows", index, table.num_rows());
        }
        Ok(RegisterMask::new(table, index).mask())
    }

    /// Stack slots holding references at `stack_map`, one bit per slot.
    pub fn stack_mask_of(&self, stack_map: &StackMap<'_, '_>) -> Result<Option<BitSpan<'a>>, ArtError> {
        let index = stack_map.stack_mask_index();
        if index == NO_VALUE {
            return Ok(None);
        }
        Ok(Some(self.table(TableKind::StackMask)?.bit_region(index, 0)?))
    }

    /// Inlined frames at `stack_map`, outermost first.
    pub fn inline_infos_of(&self, stack_map: &StackMap<'_, '_>) -> Result<Vec<InlineInfo<'_, 'a>>, ArtError> {
        let mut infos = vec![];
        let mut row = stack_map.inline_info_index();
        if row == NO_VALUE {
            return Ok(infos);
        }
        let table = self.table(TableKind::InlineInfo)?;
        loop {
            if row >= table.num_rows() {
                fail!(Format, "inline info chain runs past {} rows", table.num_rows());
            }
            let info = InlineInfo::new(table, row);
            infos.push(info);
            if info.is_last() != InlineInfo::MORE {
                break;
            }
            row += 1;
        }
        Ok(infos)
    }

    /// The method of an inlined frame, or `None` when the frame stores an
    /// `ArtMethod*` instead.
    pub fn method_info_of(&self, inline_info: &InlineInfo<'_, '_>) -> Result<Option<MethodInfo<'_, 'a>>, ArtError> {
        let index = inline_info.method_info_index();
        if index == NO_VALUE {
            return Ok(None);
        }
        let table = self.table(TableKind::MethodInfo)?;
        if index >= table.num_rows() {
            fail!(Format, "method info index {} outside {} rows", index, table.num_rows());
        }
        Ok(Some(MethodInfo::new(table, index)))
    }

    /// Locations of the outer method's dex registers at `stack_map`.
    pub fn dex_register_map_of(&self, stack_map: &StackMap<'_, '_>) -> Result<DexRegisterMap, ArtError> {
        if !stack_map.has_dex_register_map() {
            return Ok(DexRegisterMap::new(0, DexRegisterLocation::none()));
        }
        let mut map = DexRegisterMap::new(self.header.number_of_dex_registers as usize, DexRegisterLocation::invalid());
        self.decode_dex_register_map(stack_map.row(), 0, &mut map)?;
        Ok(map)
    }

    /// Locations of an inlined frame's dex registers at `stack_map`.
    ///
    /// Register counts in the inline table are cumulative over the outer levels,
    /// so the frame's range is `[previous level's count, this level's count)`.
    pub fn inline_dex_register_map_of(
        &self,
        stack_map: &StackMap<'_, '_>,
        inline_info: &InlineInfo<'_, '_>,
    ) -> Result<DexRegisterMap, ArtError> {
        if !stack_map.has_dex_register_map() {
            return Ok(DexRegisterMap::new(0, DexRegisterLocation::none()));
        }
        let base = stack_map.inline_info_index();
        if base == NO_VALUE || inline_info.row() < base {
            fail!(Format, "inline info row {} does not belong to stack map {}", inline_info.row(), stack_map.row());
        }
        let first = if inline_info.row() == base {
            self.header.number_of_dex_registers
        } else {
            InlineInfo::new(inline_info.table(), inline_info.row() - 1).number_of_dex_registers()
        };
        let last = inline_info.number_of_dex_registers();
        if last < first {
            fail!(Format, "inline frame registers [{}, {}) are reversed", first, last);
        }
        let mut map = DexRegisterMap::new((last - first) as usize, DexRegisterLocation::invalid());
        self.decode_dex_register_map(stack_map.row(), first as usize, &mut map)?;
        Ok(map)
    }

    // Stack maps only record registers that changed since the previous one. Walk
    // backwards and keep the most recent location of each register.
    fn decode_dex_register_map(
        &self,
        stack_map_index: u32,
        first_dex_register: usize,
        map: &mut DexRegisterMap,
    ) -> Result<(), ArtError> {
        let stack_maps = self.table(TableKind::StackMap)?;
        let masks = self.table(TableKind::DexRegisterMask)?;
        let maps = self.table(TableKind::DexRegisterMap)?;
        let catalog = self.table(TableKind::DexRegisterInfo)?;

        let mut remaining = map.len();
        let regs = map.locations_mut();

        for s in (0..=stack_map_index).rev() {
            if remaining == 0 {
                break;
            }
            let sm = StackMap::new(stack_maps, s);
            let mask_index = sm.dex_register_mask_index();
            if mask_index == NO_VALUE {
                continue;
            }
            // Trailing zero bits may have been trimmed from the mask.
            let mut mask = masks.bit_region(mask_index, 0)?;
            if mask.size_in_bits() <= first_dex_register {
                continue;
            }

            let mut map_index = sm.dex_register_map_index();
            if map_index == NO_VALUE {
                fail!(Format, "stack map {} has a register mask but no register map", s);
            }
            map_index = map_index.wrapping_add(mask.pop_count(0, first_dex_register)?);
            mask = mask.subspan_from(first_dex_register)?;

            let end = regs.len().min(mask.size_in_bits());
            let mut reg = 0;
            while reg < end {
                let mut bits = mask.load_bits(reg, (end - reg).min(32))? as u32;
                while bits != 0 {
                    let bit = bits.trailing_zeros() as usize;
                    if regs[reg + bit].kind == DexRegisterKind::Invalid {
                        regs[reg + bit] = self.catalog_entry(maps, catalog, map_index)?;
                        remaining -= 1;
                    }
                    map_index = map_index.wrapping_add(1);
                    bits ^= 1 << bit;
                }
                reg += 32;
            }
        }

        if remaining != 0 {
            for r in regs.iter_mut().filter(|r| r.kind == DexRegisterKind::Invalid) {
                *r = DexRegisterLocation::none();
            }
        }
        Ok(())
    }

    fn catalog_entry(
        &self,
        maps: &BitTable<'a>,
        catalog: &BitTable<'a>,
        map_index: u32,
    ) -> Result<DexRegisterLocation, ArtError> {
        if map_index >= maps.num_rows() {
            fail!(Format, "dex register map index {} outside {} rows", map_index, maps.num_rows());
        }
        let catalog_index = DexRegisterMapEntry::new(maps, map_index).catalogue_index();
        if catalog_index == NO_VALUE {
            return Ok(DexRegisterLocation::none());
        }
        if catalog_index >= catalog.num_rows() {
            fail!(Format, "dex register catalogue index {} outside {} rows", catalog_index, catalog.num_rows());
        }
        Ok(DexRegisterInfo::new(catalog, catalog_index).location())
    }
}

impl std::fmt::Debug for CodeInfo<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CodeInfo")
            .field("origin_bit", &self.origin_bit)
            .field("header", &self.header)
            .finish()
    }
}
