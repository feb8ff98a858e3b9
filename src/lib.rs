//! # art_stackmap
//!
//! A library for decoding the stack maps that the Android Runtime (ART) attaches
//! to compiled methods, read from a core dump or a live process's memory.
//!
//! The layers, bottom up:
//!
//! - [`art::bit_memory::BitSpan`]: bit-addressable view with cross-word extraction
//! - [`art::bit_reader::BitCursor`]: sequential reads and ART's varints
//! - [`art::bit_table::BitTable`]: the columnar bit table format
//! - [`art::code_info::CodeInfo`]: the per-method header and its eight tables
//!
//! Every decoder takes a [`art::version::FormatVersion`] selecting the layout of
//! one Android release.
//!
//! # Examples
//!
//! ```no_run
//!  use art_stackmap::art::code_info::CodeInfo;
//!  use art_stackmap::art::version::FormatVersion;
//!  use art_stackmap::types::InstructionSet;
//!
//!  let bytes: Vec<u8> = std::fs::read("code_info.bin").unwrap();
//!  let version = FormatVersion::for_sdk(34).unwrap();
//!  let code_info = CodeInfo::new(&bytes, version).unwrap();
//!  println!("frame size {}", code_info.frame_info().frame_size_bytes);
//!  if let Some(sm) = code_info.stack_map_for_native_pc(0x40, InstructionSet::Arm64).unwrap() {
//!      for (reg, loc) in code_info.dex_register_map_of(&sm).unwrap().iter().enumerate() {
//!          println!("v{} = {}", reg, loc);
//!      }
//!  }
//! ```

pub mod art;
pub mod types;


pub use crate::art::error::{ArtError, ErrorKind};
