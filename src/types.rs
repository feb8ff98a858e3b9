//! Value types reported by the decoders.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Instruction sets ART compiles for. Only the code alignment matters here:
/// native PCs are stored divided by it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum InstructionSet {
    Arm,
    Thumb2,
    Arm64,
    X86,
    X86_64,
    Riscv64,
}

impl InstructionSet {
    pub fn instruction_alignment(&self) -> u32 {
        match self {
            InstructionSet::Arm | InstructionSet::Thumb2 => 2,
            InstructionSet::Arm64 => 4,
            InstructionSet::X86 | InstructionSet::X86_64 => 1,
            InstructionSet::Riscv64 => 2,
        }
    }

    pub fn pointer_size(&self) -> usize {
        match self {
            InstructionSet::Arm | InstructionSet::Thumb2 | InstructionSet::X86 => 4,
            InstructionSet::Arm64 | InstructionSet::X86_64 | InstructionSet::Riscv64 => 8,
        }
    }
}

impl fmt::Display for InstructionSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            InstructionSet::Arm => "arm",
            InstructionSet::Thumb2 => "thumb2",
            InstructionSet::Arm64 => "arm64",
            InstructionSet::X86 => "x86",
            InstructionSet::X86_64 => "x86_64",
            InstructionSet::Riscv64 => "riscv64",
        };
        write!(f, "{}", s)
    }
}

/// Frame layout of a compiled method (ART's `QuickMethodFrameInfo`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameInfo {
    pub frame_size_bytes: u32,
    pub core_spill_mask: u32,
    pub fp_spill_mask: u32,
}

/// The kind of a stack map row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StackMapKind {
    Default,
    Catch,
    Osr,
    Debug,
    /// A value no known encoder writes.
    Unknown(u32),
}

impl StackMapKind {
    /// Maps the decoded (biased) column value. `Default` is stored as -1.
    pub fn from_raw(raw: u32) -> StackMapKind {
        match raw as i32 {
            -1 => StackMapKind::Default,
            0 => StackMapKind::Catch,
            1 => StackMapKind::Osr,
            2 => StackMapKind::Debug,
            _ => StackMapKind::Unknown(raw),
        }
    }
}

/// Where a dex register lives at a given stack map.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DexRegisterKind {
    /// Not yet resolved; never returned from a finished map.
    Invalid,
    /// The register holds no live value.
    None,
    InStack,
    Constant,
    InRegister,
    InRegisterHigh,
    InFpuRegister,
    InFpuRegisterHigh,
    Unknown(u32),
}

impl DexRegisterKind {
    pub fn from_raw(raw: u32) -> DexRegisterKind {
        match raw as i32 {
            -2 => DexRegisterKind::Invalid,
            -1 => DexRegisterKind::None,
            0 => DexRegisterKind::InStack,
            1 => DexRegisterKind::Constant,
            2 => DexRegisterKind::InRegister,
            3 => DexRegisterKind::InRegisterHigh,
            4 => DexRegisterKind::InFpuRegister,
            5 => DexRegisterKind::InFpuRegisterHigh,
            _ => DexRegisterKind::Unknown(raw),
        }
    }
}

/// A dex register's location and payload (stack offset in bytes, register
/// number or constant bits, depending on the kind).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DexRegisterLocation {
    pub kind: DexRegisterKind,
    pub value: u32,
}

impl DexRegisterLocation {
    pub fn none() -> DexRegisterLocation {
        DexRegisterLocation { kind: DexRegisterKind::None, value: 0 }
    }

    pub(crate) fn invalid() -> DexRegisterLocation {
        DexRegisterLocation { kind: DexRegisterKind::Invalid, value: 0 }
    }

    pub fn is_live(&self) -> bool {
        !matches!(self.kind, DexRegisterKind::None | DexRegisterKind::Invalid)
    }
}

impl fmt::Display for DexRegisterLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            DexRegisterKind::Invalid => write!(f, "Invalid"),
            DexRegisterKind::None => write!(f, "None"),
            DexRegisterKind::InStack => write!(f, "sp+{}", self.value),
            DexRegisterKind::Constant => write!(f, "#{}", self.value as i32),
            DexRegisterKind::InRegister => write!(f, "r{}", self.value),
            DexRegisterKind::InRegisterHigh => write!(f, "r{}/hi", self.value),
            DexRegisterKind::InFpuRegister => write!(f, "f{}", self.value),
            DexRegisterKind::InFpuRegisterHigh => write!(f, "f{}/hi", self.value),
            DexRegisterKind::Unknown(k) => write!(f, "?{}:{}", k, self.value),
        }
    }
}
