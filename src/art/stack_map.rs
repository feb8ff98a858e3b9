//! Row views over the eight tables that make up a CodeInfo.

use serde::{Deserialize, Serialize};

use crate::bit_table_accessor;
use crate::types::{DexRegisterKind, DexRegisterLocation, InstructionSet, StackMapKind};

/// Bytes per stack slot; stack-resident dex registers store their slot index.
pub const FRAME_SLOT_SIZE: u32 = 4;

/// The constituent tables, in stream order. The discriminant is the table's
/// bit in the header's `bit_table_flags`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum TableKind {
    StackMap = 0,
    RegisterMask = 1,
    StackMask = 2,
    InlineInfo = 3,
    MethodInfo = 4,
    DexRegisterMask = 5,
    DexRegisterMap = 6,
    DexRegisterInfo = 7,
}

pub const NUM_TABLES: usize = 8;

impl TableKind {
    pub const ALL: [TableKind; NUM_TABLES] = [
        TableKind::StackMap,
        TableKind::RegisterMask,
        TableKind::StackMask,
        TableKind::InlineInfo,
        TableKind::MethodInfo,
        TableKind::DexRegisterMask,
        TableKind::DexRegisterMap,
        TableKind::DexRegisterInfo,
    ];

    pub fn index(&self) -> usize {
        *self as usize
    }

    /// Column count, which only varies for MethodInfo.
    pub fn num_columns(&self, method_info_columns: usize) -> usize {
        match self {
            TableKind::StackMap => 8,
            TableKind::RegisterMask => 2,
            TableKind::StackMask => 1,
            TableKind::InlineInfo => 6,
            TableKind::MethodInfo => method_info_columns,
            TableKind::DexRegisterMask => 1,
            TableKind::DexRegisterMap => 1,
            TableKind::DexRegisterInfo => 2,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            TableKind::StackMap => "StackMap",
            TableKind::RegisterMask => "RegisterMask",
            TableKind::StackMask => "StackMask",
            TableKind::InlineInfo => "InlineInfo",
            TableKind::MethodInfo => "MethodInfo",
            TableKind::DexRegisterMask => "DexRegisterMask",
            TableKind::DexRegisterMap => "DexRegisterMap",
            TableKind::DexRegisterInfo => "DexRegisterInfo",
        }
    }
}

bit_table_accessor! {
    /// One safepoint: maps a native PC to dex state.
    pub struct StackMap {
        0 => kind_raw / has_kind,
        1 => packed_native_pc / has_packed_native_pc,
        2 => dex_pc / has_dex_pc,
        3 => register_mask_index / has_register_mask_index,
        4 => stack_mask_index / has_stack_mask_index,
        5 => inline_info_index / has_inline_info_index,
        6 => dex_register_mask_index / has_dex_register_mask_index,
        7 => dex_register_map_index / has_dex_register_map_index,
    }
}

impl StackMap<'_, '_> {
    pub fn kind(&self) -> StackMapKind {
        StackMapKind::from_raw(self.kind_raw())
    }

    pub fn native_pc_offset(&self, isa: InstructionSet) -> u32 {
        unpack_native_pc(self.packed_native_pc(), isa)
    }

    pub fn has_dex_register_map(&self) -> bool {
        self.has_dex_register_map_index()
    }
}

pub fn pack_native_pc(native_pc: u32, isa: InstructionSet) -> u32 {
    native_pc / isa.instruction_alignment()
}

pub fn unpack_native_pc(packed_native_pc: u32, isa: InstructionSet) -> u32 {
    packed_native_pc.wrapping_mul(isa.instruction_alignment())
}

bit_table_accessor! {
    /// Live core registers holding references, stored as `value << shift`.
    pub struct RegisterMask {
        0 => value / has_value,
        1 => shift / has_shift,
    }
}

impl RegisterMask<'_, '_> {
    pub fn mask(&self) -> u32 {
        let shift = self.shift();
        if shift >= 32 {
            return 0;
        }
        self.value() << shift
    }
}

bit_table_accessor! {
    /// One level of inlining. Rows for a stack map are consecutive and end at
    /// the row whose `is_last` is [`InlineInfo::LAST`].
    pub struct InlineInfo {
        0 => is_last / has_is_last,
        1 => dex_pc / has_dex_pc,
        2 => method_info_index / has_method_info_index,
        3 => art_method_hi / has_art_method_hi,
        4 => art_method_lo / has_art_method_lo,
        5 => number_of_dex_registers / has_number_of_dex_registers,
    }
}

impl InlineInfo<'_, '_> {
    pub const MORE: u32 = 0;
    pub const LAST: u32 = u32::MAX;

    /// JIT code may reference the inlined `ArtMethod*` directly instead of a
    /// method index.
    pub fn encodes_art_method(&self) -> bool {
        self.has_art_method_lo()
    }

    pub fn art_method(&self) -> u64 {
        ((self.art_method_hi() as u64) << 32) | self.art_method_lo() as u64
    }
}

bit_table_accessor! {
    /// Method reference of an inlined frame. From S on it also names the dex file.
    pub struct MethodInfo {
        0 => method_index / has_method_index,
        1 => dex_file_index_kind / has_dex_file_index_kind,
        2 => dex_file_index / has_dex_file_index,
    }
}

impl MethodInfo<'_, '_> {
    pub const KIND_NON_BCP: u32 = u32::MAX;
    pub const KIND_BCP: u32 = 0;
}

bit_table_accessor! {
    /// Entry of the per-stack-map list of changed registers: an index into the
    /// DexRegisterInfo catalogue.
    pub struct DexRegisterMapEntry {
        0 => catalogue_index / has_catalogue_index,
    }
}

bit_table_accessor! {
    /// A deduplicated register location.
    pub struct DexRegisterInfo {
        0 => kind_raw / has_kind,
        1 => packed_value / has_packed_value,
    }
}

impl DexRegisterInfo<'_, '_> {
    pub fn location(&self) -> DexRegisterLocation {
        let kind = DexRegisterKind::from_raw(self.kind_raw());
        let mut value = self.packed_value();
        if kind == DexRegisterKind::InStack {
            value = value.wrapping_mul(FRAME_SLOT_SIZE);
        }
        DexRegisterLocation { kind, value }
    }
}

/// Locations of a contiguous range of dex registers at one stack map.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DexRegisterMap {
    locations: Vec<DexRegisterLocation>,
}

impl DexRegisterMap {
    pub(crate) fn new(size: usize, fill: DexRegisterLocation) -> Self {
        DexRegisterMap { locations: vec![fill; size] }
    }

    pub fn len(&self) -> usize {
        self.locations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locations.is_empty()
    }

    pub fn get(&self, dex_register: usize) -> Option<&DexRegisterLocation> {
        self.locations.get(dex_register)
    }

    pub fn iter(&self) -> impl Iterator<Item = &DexRegisterLocation> {
        self.locations.iter()
    }

    pub(crate) fn locations_mut(&mut self) -> &mut [DexRegisterLocation] {
        &mut self.locations
    }

    /// Registers holding a value.
    pub fn live_count(&self) -> usize {
        self.locations.iter().filter(|l| l.is_live()).count()
    }
}
