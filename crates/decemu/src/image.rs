//! Program images: decompiled routines plus the memory they run against.
//!
//! An image is a JSON document:
//!
//! ```json
//! {
//!   "space_bits": 64,
//!   "endianness": "little",
//!   "types": { "struct node": 16 },
//!   "segments": [ { "address": 6291456, "bytes": "a01240000000..." } ],
//!   "routines": [ ... ]
//! }
//! ```

use anyhow::{Context, Result};
use decemu_ast::{Routine, TypeDatabase};
use decemu_emulate::{Endianness, PagedMemory, RoutineProvider};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::Path;

fn default_space_bits() -> u32 {
    64
}

/// A contiguous block of initialized memory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Segment {
    pub address: u64,
    /// Hex-encoded content.
    pub bytes: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgramImage {
    #[serde(default = "default_space_bits")]
    pub space_bits: u32,
    #[serde(default)]
    pub endianness: Endianness,
    /// Overrides the pointer size implied by `space_bits`.
    #[serde(default)]
    pub pointer_size: Option<usize>,
    /// Named types on top of the builtin C types.
    #[serde(default)]
    pub types: HashMap<String, usize>,
    #[serde(default)]
    pub segments: Vec<Segment>,
    pub routines: Vec<Routine>,
}

impl ProgramImage {
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("Failed to read image {}", path.display()))?;
        serde_json::from_str(&text).with_context(|| format!("Failed to parse image {}", path.display()))
    }

    pub fn pointer_size(&self) -> usize {
        self.pointer_size.unwrap_or(self.space_bits as usize / 8)
    }

    pub fn type_database(&self) -> TypeDatabase {
        let mut db = TypeDatabase::with_pointer_size(self.pointer_size());
        db.extend(self.types.iter().map(|(name, size)| (name.as_str(), *size)));
        db
    }

    /// Map every segment into a fresh address space.
    pub fn memory(&self) -> Result<PagedMemory> {
        let mut memory = PagedMemory::new(self.endianness, self.space_bits);
        for segment in &self.segments {
            let bytes = hex::decode(segment.bytes.trim())
                .with_context(|| format!("Invalid hex in segment at {:#x}", segment.address))?;
            memory
                .load(segment.address, &bytes)
                .with_context(|| format!("Failed to map segment at {:#x}", segment.address))?;
        }
        Ok(memory)
    }
}

impl RoutineProvider for ProgramImage {
    fn routine_at(&self, address: u64) -> Option<&Routine> {
        self.routines.as_slice().routine_at(address)
    }
}
