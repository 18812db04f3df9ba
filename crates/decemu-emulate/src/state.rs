//! Machine state for emulation.
//!
//! Contains the register bank, virtual memory and the type catalog used to
//! size variables and dereferences.

use crate::memory::{Access, PagedMemory};
use crate::{EmulationError, EmulationResult};
use decemu_ast::{IdentClass, Identifier, RegisterId, TypeCatalog};
use log::warn;
use std::collections::HashMap;
use std::fmt::Write;
use std::sync::Arc;

/// Register ids used by the decompiler for x86-64 register mirrors, plus
/// engine-synthetic registers.
pub mod regs {
    use decemu_ast::RegisterId;

    pub const RAX: RegisterId = -65536;
    pub const RBX: RegisterId = -65728;
    pub const RBP: RegisterId = -65856;

    /// Holds the address of the next handler discovered by a far jump or an
    /// unresolved call.
    pub const NEXT_HANDLER: RegisterId = 1;

    /// Get the register name.
    pub fn name(id: RegisterId) -> &'static str {
        match id {
            RAX => "rax",
            RBX => "rbx",
            RBP => "rbp",
            NEXT_HANDLER => "next_handler",
            _ => "unknown",
        }
    }
}

/// Where local variables live relative to the frame base.
///
/// A local's address is `offset + frame base + bias`. The stack layout is
/// assumed static for the duration of one emulation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameLayout {
    /// Register holding the frame base.
    pub frame_register: RegisterId,
    /// Added to every local's offset.
    pub bias: i64,
}

impl Default for FrameLayout {
    fn default() -> Self {
        Self {
            frame_register: regs::RBP,
            bias: 8,
        }
    }
}

/// A memory region to seed the machine state with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryDump {
    pub base_address: u64,
    pub bytes: Vec<u8>,
    /// Frame base value to start from (stack dumps only).
    pub base_pointer: Option<u64>,
}

impl MemoryDump {
    pub fn new(base_address: u64, bytes: Vec<u8>) -> Self {
        Self {
            base_address,
            bytes,
            base_pointer: None,
        }
    }

    pub fn with_base_pointer(mut self, base_pointer: u64) -> Self {
        self.base_pointer = Some(base_pointer);
        self
    }
}

/// Full machine state for emulation.
#[derive(Debug, Clone)]
pub struct MachineState {
    /// Register values, absent when never written.
    registers: HashMap<RegisterId, u64>,

    /// Memory.
    pub memory: PagedMemory,

    types: Arc<dyn TypeCatalog>,

    /// Default pointer size in bytes.
    pointer_size: usize,

    frame: FrameLayout,
}

impl MachineState {
    /// Create a machine state over `memory`.
    ///
    /// The default pointer size is derived from the memory's address width.
    pub fn new(types: Arc<dyn TypeCatalog>, memory: PagedMemory) -> Self {
        let pointer_size = (memory.space_bits() / 8) as usize;
        Self {
            registers: HashMap::new(),
            memory,
            types,
            pointer_size,
            frame: FrameLayout::default(),
        }
    }

    /// Create a machine state over a duplicate of `memory`, seeded with
    /// stack and heap dumps.
    ///
    /// The stack dump's base pointer, when present, becomes the frame base.
    pub fn from_dumps(
        types: Arc<dyn TypeCatalog>,
        memory: &PagedMemory,
        stack: Option<&MemoryDump>,
        heap: Option<&MemoryDump>,
    ) -> EmulationResult<Self> {
        let mut state = Self::new(types, memory.duplicate());
        for dump in stack.iter().chain(heap.iter()) {
            state.allocate(dump.base_address, dump.bytes.len() as u64)?;
            state.memory.write_bytes(dump.base_address, &dump.bytes)?;
        }
        if let Some(bp) = stack.and_then(|d| d.base_pointer) {
            state.set_register(state.frame.frame_register, bp);
        }
        Ok(state)
    }

    pub fn with_frame_layout(mut self, frame: FrameLayout) -> Self {
        self.frame = frame;
        self
    }

    pub fn frame_layout(&self) -> FrameLayout {
        self.frame
    }

    /// Default pointer size in bytes.
    pub fn pointer_size(&self) -> usize {
        self.pointer_size
    }

    pub fn set_pointer_size(&mut self, size: usize) {
        self.pointer_size = size;
    }

    pub fn types(&self) -> &dyn TypeCatalog {
        self.types.as_ref()
    }

    /// Independent copy of this state, memory included.
    pub fn duplicate(&self) -> Self {
        Self {
            registers: self.registers.clone(),
            memory: self.memory.duplicate(),
            types: Arc::clone(&self.types),
            pointer_size: self.pointer_size,
            frame: self.frame,
        }
    }

    // ==================== Register Access ====================

    /// Get a register value, `None` if never written.
    pub fn register(&self, id: RegisterId) -> Option<u64> {
        self.registers.get(&id).copied()
    }

    /// Set a full 64-bit register value.
    pub fn set_register(&mut self, id: RegisterId, value: u64) {
        self.registers.insert(id, value);
    }

    /// Set a register, truncating `value` to `size` bytes.
    pub fn set_register_sized(&mut self, id: RegisterId, value: u64, size: usize) -> EmulationResult<()> {
        let value = truncate(value, size)?;
        self.registers.insert(id, value);
        Ok(())
    }

    /// Forget a register value.
    pub fn clear_register(&mut self, id: RegisterId) -> Option<u64> {
        self.registers.remove(&id)
    }

    // ==================== Memory Access ====================

    /// Map `[address, address + size)` read-write, filling gaps only.
    pub fn allocate(&mut self, address: u64, size: u64) -> EmulationResult<()> {
        self.memory.allocate(address, size, Access::READ_WRITE)?;
        Ok(())
    }

    /// Map stack space around the frame base.
    ///
    /// Returns false when the frame base register is not set.
    pub fn allocate_stack_space(&mut self) -> EmulationResult<bool> {
        let Some(bp) = self.register(self.frame.frame_register) else {
            return Ok(false);
        };
        let base = (bp & !0xFFF).wrapping_sub(0x10_0000);
        self.allocate(base, 0x11_0000)?;
        Ok(true)
    }

    /// Read `size` bytes (1, 2, 4 or 8), zero-extended.
    pub fn read(&self, address: u64, size: usize) -> EmulationResult<u64> {
        self.memory.read_uint(address, size)
    }

    /// Like [`MachineState::read`], but a failed read yields 0.
    pub fn read_safe(&self, address: u64, size: usize) -> u64 {
        match self.read(address, size) {
            Ok(value) => value,
            Err(e) => {
                warn!("cannot read memory at {:#010x}, returning 0 ({})", address, e);
                0
            }
        }
    }

    /// Write the low `size` bytes of `value`.
    pub fn write(&mut self, address: u64, value: u64, size: usize) -> EmulationResult<()> {
        self.memory.write_uint(address, value, size)
    }

    /// Copy `n` bytes from `src` to `dst` through an intermediate buffer.
    ///
    /// Nothing is written if either range is inaccessible.
    pub fn copy(&mut self, src: u64, dst: u64, n: usize) -> EmulationResult<()> {
        self.memory.check_range(src, n, Access::READ)?;
        self.memory.check_range(dst, n, Access::WRITE)?;
        let mut buf = vec![0u8; n];
        self.memory.read_bytes(src, &mut buf)?;
        self.memory.write_bytes(dst, &buf)
    }

    // ==================== Variables ====================

    /// Current frame base.
    pub fn frame_base(&self) -> EmulationResult<u64> {
        self.register(self.frame.frame_register)
            .ok_or(EmulationError::UndefinedFrameBase)
    }

    /// Address of a memory-backed variable.
    pub fn var_address(&self, var: &Identifier) -> EmulationResult<u64> {
        match var.class {
            IdentClass::Local => Ok((var.address.wrapping_add(self.frame.bias) as u64)
                .wrapping_add(self.frame_base()?)),
            IdentClass::Global => Ok(var.address as u64),
            IdentClass::Register | IdentClass::Parameter => Err(
                EmulationError::UnsupportedIdentifierClass(format!("{} ({:?})", var.name, var.class)),
            ),
        }
    }

    /// Value of a variable, `None` for a register that was never written.
    pub fn var_value(&self, var: &Identifier) -> EmulationResult<Option<u64>> {
        match var.class {
            IdentClass::Local | IdentClass::Global => {
                let size = self.type_size(&var.ty)?;
                self.read(self.var_address(var)?, size).map(Some)
            }
            IdentClass::Register | IdentClass::Parameter => Ok(self.register(var.id)),
        }
    }

    /// Store `value` into a variable, truncated to its type size.
    pub fn set_var_value(&mut self, var: &Identifier, value: u64) -> EmulationResult<()> {
        let size = self.type_size(&var.ty)?;
        match var.class {
            IdentClass::Local | IdentClass::Global => {
                let address = self.var_address(var)?;
                self.write(address, value, size)
            }
            IdentClass::Register | IdentClass::Parameter => self.set_register_sized(var.id, value, size),
        }
    }

    // ==================== Types ====================

    /// Size in bytes of a type.
    pub fn type_size(&self, signature: &str) -> EmulationResult<usize> {
        self.types
            .size_of(signature)
            .ok_or_else(|| EmulationError::UnknownType(signature.to_string()))
    }

    /// Size of `T` in `T*`.
    ///
    /// Non-pointer signatures use the default pointer size.
    pub fn base_type_size(&self, signature: &str) -> EmulationResult<usize> {
        match self.types.base_type_signature(signature) {
            Some(base) => self
                .types
                .size_of(&base)
                .ok_or_else(|| EmulationError::UnknownType(format!("base type of {}", signature))),
            None if self.pointer_size > 0 => Ok(self.pointer_size),
            None => Err(EmulationError::NotAPointerType(signature.to_string())),
        }
    }

    /// Dump registers for debugging.
    pub fn dump(&self) -> String {
        let mut ids: Vec<_> = self.registers.keys().copied().collect();
        ids.sort_unstable();
        let mut s = String::from("Registers:\n");
        for id in ids {
            let _ = writeln!(s, "  {} ({}): {:#x}", regs::name(id), id, self.registers[&id]);
        }
        let _ = writeln!(s, "Mapped pages: {}", self.memory.page_count());
        s
    }
}

/// Truncate `value` to `size` bytes (1, 2, 4 or 8).
pub(crate) fn truncate(value: u64, size: usize) -> EmulationResult<u64> {
    match size {
        8 => Ok(value),
        4 => Ok(value & 0xFFFF_FFFF),
        2 => Ok(value & 0xFFFF),
        1 => Ok(value & 0xFF),
        other => Err(EmulationError::UnsupportedWidth(other)),
    }
}

/// Sign-extend the low `size` bytes of `value` to 64 bits.
pub(crate) fn sign_extend(value: u64, size: usize) -> i64 {
    match size {
        1 => value as u8 as i8 as i64,
        2 => value as u16 as i16 as i64,
        4 => value as u32 as i32 as i64,
        _ => value as i64,
    }
}
