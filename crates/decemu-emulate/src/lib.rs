//! # decemu-emulate
//!
//! Concrete execution of decompiled routines.
//!
//! Instead of emulating machine instructions, this crate walks the
//! structured statements a decompiler recovered and evaluates them against a
//! register bank and paged virtual memory. It is meant for resolving
//! computed control transfers (dispatch tables, handler chains of
//! virtualized code) that static analysis cannot follow.
//!
//! This crate provides:
//! - A control-flow graph over structured statements ([`Cfg`])
//! - Machine state: registers plus paged memory ([`MachineState`], [`PagedMemory`])
//! - An expression evaluator and statement dispatcher ([`Evaluator`], [`Emulator`])
//! - Pluggable call simulation ([`CallSimulator`], [`LibcSimulator`])
//! - Multi-round handler chaining ([`HandlerChain`])
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use decemu_ast::{Expr, RoutineBuilder, TypeDatabase};
//! use decemu_emulate::{regs, Emulator, EmulatorConfig, MachineState, OutputLog, PagedMemory};
//!
//! let mut b = RoutineBuilder::new("f", 0x401000);
//! let r = b.local("r", "int", -0x14);
//! let init = b.assign(Expr::ident(r), Expr::int(0));
//! let ret = b.ret(Some(Expr::ident(r)));
//! let routine = b.finish(vec![init, ret]).unwrap();
//!
//! let mut state = MachineState::new(Arc::new(TypeDatabase::new()), PagedMemory::default());
//! state.set_register(regs::RBP, 0x7fff_0000);
//! state.allocate_stack_space().unwrap();
//!
//! let emulator = Emulator::new(EmulatorConfig::default());
//! let trace = emulator.emulate(&routine, &mut state, &mut OutputLog::new()).unwrap();
//!
//! assert_eq!(trace.statements, vec!["r = 0", "return r"]);
//! assert_eq!(state.register(regs::RAX), Some(0));
//! ```

pub mod cfg;
pub mod chain;
pub mod eval;
pub mod executor;
pub mod log;
pub mod memory;
pub mod simulation;
pub mod stack_machine;
pub mod state;

pub use cfg::{Cfg, Successors};
pub use chain::{ChainConfig, ChainReport, ChainStop, HandlerChain, RoundReport, RoutineProvider};
pub use eval::Evaluator;
pub use executor::{Emulator, EmulatorConfig, TRACE_HEADER};
pub use crate::log::{ExecutionTrace, OutputLog};
pub use memory::{Access, Endianness, PagedMemory, PAGE_SIZE};
pub use simulation::{normalize_name, CallSimulator, CallSite, LibcSimulator};
pub use stack_machine::{StackMachineLayout, StackMachineSimulator};
pub use state::{regs, FrameLayout, MachineState, MemoryDump};

use thiserror::Error;

/// Errors that can occur during emulation.
///
/// Variants tied to a statement or expression carry its rendering.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EmulationError {
    #[error("Unimplemented statement: {0}")]
    UnimplementedStatement(String),

    #[error("Unimplemented operator: {0}")]
    UnimplementedOperator(String),

    #[error("Unimplemented expression: {0}")]
    UnimplementedExpression(String),

    #[error("Unresolved call target: {0}")]
    UnresolvedCallTarget(String),

    #[error("Unsupported identifier class: {0}")]
    UnsupportedIdentifierClass(String),

    #[error("Unsupported assignment: {0}")]
    UnsupportedAssignment(String),

    #[error("Unknown type: {0}")]
    UnknownType(String),

    #[error("Not a pointer type: {0}")]
    NotAPointerType(String),

    #[error("Unsupported access width: {0} bytes")]
    UnsupportedWidth(usize),

    #[error("Memory access fault at {address:#x} ({size} bytes)")]
    MemoryAccessFault { address: u64, size: usize },

    #[error("Missing entry point: {0}")]
    MissingEntryPoint(String),

    #[error("Division by zero: {0}")]
    DivisionByZero(String),

    #[error("Frame base register is not set")]
    UndefinedFrameBase,

    #[error("Maximum step count exceeded: {0}")]
    StepLimitExceeded(usize),

    #[error("Cannot write log: {0}")]
    LogSink(String),
}

/// Result type for emulation operations.
pub type EmulationResult<T> = Result<T, EmulationError>;
