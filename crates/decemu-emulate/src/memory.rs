//! Paged virtual memory for emulation.
//!
//! Memory is mapped in 4 KiB pages. Only mapped pages can be accessed, and
//! every access is checked against the page's access flags before a single
//! byte is touched, so a faulting access leaves memory unchanged.

use crate::{EmulationError, EmulationResult};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Page size for memory (4KB).
pub const PAGE_SIZE: u64 = 4096;
const PAGE_MASK: u64 = PAGE_SIZE - 1;

/// Byte order of multi-byte accesses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Endianness {
    #[default]
    Little,
    Big,
}

/// Page access flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Access {
    pub read: bool,
    pub write: bool,
    pub execute: bool,
}

impl Access {
    pub const READ: Access = Access {
        read: true,
        write: false,
        execute: false,
    };
    pub const WRITE: Access = Access {
        read: false,
        write: true,
        execute: false,
    };
    pub const READ_WRITE: Access = Access {
        read: true,
        write: true,
        execute: false,
    };
    pub const ALL: Access = Access {
        read: true,
        write: true,
        execute: true,
    };
}

impl Default for Access {
    fn default() -> Self {
        Self::READ_WRITE
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Page {
    bytes: Box<[u8]>,
    access: Access,
}

impl Page {
    fn zeroed(access: Access) -> Self {
        Self {
            bytes: vec![0u8; PAGE_SIZE as usize].into_boxed_slice(),
            access,
        }
    }
}

/// Page-granular virtual memory.
///
/// Cloning (or [`PagedMemory::duplicate`]) deep-copies every page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PagedMemory {
    /// Pages indexed by page number (address >> 12).
    pages: HashMap<u64, Page>,
    endianness: Endianness,
    space_bits: u32,
}

impl Default for PagedMemory {
    fn default() -> Self {
        Self::new(Endianness::Little, 64)
    }
}

impl PagedMemory {
    /// Create an empty memory with the given byte order and address width.
    pub fn new(endianness: Endianness, space_bits: u32) -> Self {
        Self {
            pages: HashMap::new(),
            endianness,
            space_bits: space_bits.clamp(8, 64),
        }
    }

    pub fn endianness(&self) -> Endianness {
        self.endianness
    }

    /// Width of the address space in bits.
    pub fn space_bits(&self) -> u32 {
        self.space_bits
    }

    /// Highest valid address.
    pub fn max_address(&self) -> u64 {
        if self.space_bits >= 64 {
            u64::MAX
        } else {
            (1u64 << self.space_bits) - 1
        }
    }

    /// Independent deep copy of this memory.
    pub fn duplicate(&self) -> Self {
        self.clone()
    }

    /// Get number of mapped pages.
    pub fn page_count(&self) -> usize {
        self.pages.len()
    }

    /// Returns true if the page containing `address` is mapped.
    pub fn is_mapped(&self, address: u64) -> bool {
        self.pages.contains_key(&(address >> 12))
    }

    /// Access flags of the page containing `address`.
    pub fn access_at(&self, address: u64) -> Option<Access> {
        self.pages.get(&(address >> 12)).map(|p| p.access)
    }

    /// Map `[address, address + size)`, filling only the gaps.
    ///
    /// Pages that are already mapped keep their contents and flags. Returns
    /// the number of newly mapped pages.
    pub fn allocate(&mut self, address: u64, size: u64, access: Access) -> EmulationResult<usize> {
        if size == 0 {
            return Ok(0);
        }
        let last = self.last_address(address, size as usize)?;
        let mut added = 0;
        for page_num in (address >> 12)..=(last >> 12) {
            self.pages.entry(page_num).or_insert_with(|| {
                added += 1;
                Page::zeroed(access)
            });
        }
        Ok(added)
    }

    /// Map a segment and copy `bytes` into it.
    pub fn load(&mut self, base_address: u64, bytes: &[u8]) -> EmulationResult<()> {
        self.allocate(base_address, bytes.len() as u64, Access::ALL)?;
        self.write_bytes(base_address, bytes)
    }

    /// Read `buf.len()` bytes starting at `address`.
    pub fn read_bytes(&self, address: u64, buf: &mut [u8]) -> EmulationResult<()> {
        self.check(address, buf.len(), |a| a.read)?;
        for (i, byte) in buf.iter_mut().enumerate() {
            let addr = address + i as u64;
            // Checked above.
            if let Some(page) = self.pages.get(&(addr >> 12)) {
                *byte = page.bytes[(addr & PAGE_MASK) as usize];
            }
        }
        Ok(())
    }

    /// Write `bytes` starting at `address`.
    pub fn write_bytes(&mut self, address: u64, bytes: &[u8]) -> EmulationResult<()> {
        self.check(address, bytes.len(), |a| a.write)?;
        for (i, byte) in bytes.iter().enumerate() {
            let addr = address + i as u64;
            if let Some(page) = self.pages.get_mut(&(addr >> 12)) {
                page.bytes[(addr & PAGE_MASK) as usize] = *byte;
            }
        }
        Ok(())
    }

    /// Read an unsigned integer of 1, 2, 4 or 8 bytes, zero-extended.
    pub fn read_uint(&self, address: u64, size: usize) -> EmulationResult<u64> {
        check_width(size)?;
        let mut buf = [0u8; 8];
        self.read_bytes(address, &mut buf[..size])?;
        let value = match self.endianness {
            Endianness::Little => buf[..size]
                .iter()
                .rev()
                .fold(0u64, |acc, b| (acc << 8) | *b as u64),
            Endianness::Big => buf[..size]
                .iter()
                .fold(0u64, |acc, b| (acc << 8) | *b as u64),
        };
        Ok(value)
    }

    /// Write the low `size` bytes of `value` (1, 2, 4 or 8).
    pub fn write_uint(&mut self, address: u64, value: u64, size: usize) -> EmulationResult<()> {
        check_width(size)?;
        match self.endianness {
            Endianness::Little => self.write_bytes(address, &value.to_le_bytes()[..size]),
            Endianness::Big => self.write_bytes(address, &value.to_be_bytes()[8 - size..]),
        }
    }

    /// Check that `len` bytes at `address` are mapped with every flag set in
    /// `access`, without touching them.
    pub fn check_range(&self, address: u64, len: usize, access: Access) -> EmulationResult<()> {
        self.check(address, len, |page| {
            (page.read || !access.read) && (page.write || !access.write) && (page.execute || !access.execute)
        })
    }

    fn last_address(&self, address: u64, size: usize) -> EmulationResult<u64> {
        let fault = EmulationError::MemoryAccessFault { address, size };
        let last = address
            .checked_add(size as u64 - 1)
            .ok_or_else(|| fault.clone())?;
        if last > self.max_address() {
            return Err(fault);
        }
        Ok(last)
    }

    fn check(&self, address: u64, size: usize, allowed: impl Fn(Access) -> bool) -> EmulationResult<()> {
        if size == 0 {
            return Ok(());
        }
        let last = self.last_address(address, size)?;
        for page_num in (address >> 12)..=(last >> 12) {
            match self.pages.get(&page_num) {
                Some(page) if allowed(page.access) => {}
                _ => return Err(EmulationError::MemoryAccessFault { address, size }),
            }
        }
        Ok(())
    }
}

fn check_width(size: usize) -> EmulationResult<()> {
    match size {
        1 | 2 | 4 | 8 => Ok(()),
        other => Err(EmulationError::UnsupportedWidth(other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unmapped_access_faults() {
        let mem = PagedMemory::default();
        assert_eq!(
            mem.read_uint(0x1000, 4),
            Err(EmulationError::MemoryAccessFault {
                address: 0x1000,
                size: 4
            })
        );
    }

    #[test]
    fn test_read_write_multi_byte() {
        let mut mem = PagedMemory::default();
        mem.allocate(0x1000, 0x10, Access::READ_WRITE).unwrap();

        mem.write_uint(0x1000, 0xDEADBEEF, 4).unwrap();
        assert_eq!(mem.read_uint(0x1000, 4).unwrap(), 0xDEADBEEF);

        // Check individual bytes (little-endian)
        assert_eq!(mem.read_uint(0x1000, 1).unwrap(), 0xEF);
        assert_eq!(mem.read_uint(0x1003, 1).unwrap(), 0xDE);
    }

    #[test]
    fn test_big_endian() {
        let mut mem = PagedMemory::new(Endianness::Big, 32);
        mem.allocate(0x1000, 0x10, Access::READ_WRITE).unwrap();

        mem.write_uint(0x1000, 0x1122_3344, 4).unwrap();
        let mut buf = [0u8; 4];
        mem.read_bytes(0x1000, &mut buf).unwrap();
        assert_eq!(buf, [0x11, 0x22, 0x33, 0x44]);
        assert_eq!(mem.read_uint(0x1000, 4).unwrap(), 0x1122_3344);

        mem.write_uint(0x1008, 0xAABB, 2).unwrap();
        assert_eq!(mem.read_uint(0x1008, 1).unwrap(), 0xAA);
    }

    #[test]
    fn test_allocate_fills_gaps_only() {
        let mut mem = PagedMemory::default();
        assert_eq!(mem.allocate(0x2000, 0x1000, Access::READ_WRITE).unwrap(), 1);
        mem.write_uint(0x2000, 0x42, 1).unwrap();

        // Overlaps the existing page on both sides.
        assert_eq!(mem.allocate(0x1800, 0x2000, Access::READ_WRITE).unwrap(), 2);
        assert_eq!(mem.page_count(), 3);
        assert_eq!(mem.read_uint(0x2000, 1).unwrap(), 0x42);
    }

    #[test]
    fn test_cross_page_access() {
        let mut mem = PagedMemory::default();
        mem.allocate(0x0, 0x2000, Access::READ_WRITE).unwrap();

        // Write at page boundary
        mem.write_uint(0xFFE, 0xAABBCCDD, 4).unwrap();

        // Read back (spans two pages)
        assert_eq!(mem.read_uint(0xFFE, 4).unwrap(), 0xAABBCCDD);
    }

    #[test]
    fn test_faulting_write_is_atomic() {
        let mut mem = PagedMemory::default();
        mem.allocate(0x0, 0x1000, Access::READ_WRITE).unwrap();
        mem.write_uint(0xFFC, 0x1111_1111, 4).unwrap();

        // Second half lands in an unmapped page.
        assert!(mem.write_uint(0xFFC, u64::MAX, 8).is_err());
        assert_eq!(mem.read_uint(0xFFC, 4).unwrap(), 0x1111_1111);
    }

    #[test]
    fn test_check_range() {
        let mut mem = PagedMemory::default();
        mem.allocate(0x4000, 0x10, Access::READ).unwrap();
        mem.allocate(0x5000, 0x10, Access::READ_WRITE).unwrap();

        assert!(mem.check_range(0x4000, 0x2000, Access::READ).is_ok());
        assert!(mem.check_range(0x4000, 0x2000, Access::WRITE).is_err());
        assert!(mem.check_range(0x5000, 0x1000, Access::WRITE).is_ok());
        assert!(mem.check_range(0x5000, 0x1001, Access::WRITE).is_err());
        assert!(mem.check_range(0x9000, 0, Access::ALL).is_ok());
        assert_eq!(
            mem.check_range(0x4000, usize::MAX, Access::READ),
            Err(EmulationError::MemoryAccessFault {
                address: 0x4000,
                size: usize::MAX
            })
        );
    }

    #[test]
    fn test_read_only_pages() {
        let mut mem = PagedMemory::default();
        mem.allocate(0x4000, 0x10, Access::READ).unwrap();
        assert_eq!(mem.read_uint(0x4000, 8).unwrap(), 0);
        assert!(mem.write_uint(0x4000, 1, 1).is_err());
    }

    #[test]
    fn test_unsupported_width() {
        let mut mem = PagedMemory::default();
        mem.allocate(0x0, 0x10, Access::READ_WRITE).unwrap();
        assert_eq!(mem.read_uint(0, 3), Err(EmulationError::UnsupportedWidth(3)));
    }

    #[test]
    fn test_duplicate_is_independent() {
        let mut mem = PagedMemory::default();
        mem.load(0x1000, &[1, 2, 3, 4]).unwrap();
        let mut copy = mem.duplicate();
        copy.write_uint(0x1000, 0xFF, 1).unwrap();
        assert_eq!(mem.read_uint(0x1000, 1).unwrap(), 1);
        assert_eq!(copy.read_uint(0x1000, 1).unwrap(), 0xFF);
    }
}
