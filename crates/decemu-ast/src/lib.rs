//! # decemu-ast
//!
//! Structured representation of decompiled routines for the decemu emulator.
//!
//! A [`Routine`] is an arena of statements addressed by [`StmtId`]. Statement
//! identity (not value) is what the control-flow graph keys on, so the same
//! statement is never shared between two blocks. Expressions are plain trees
//! owned by the statement that contains them.
//!
//! This crate also provides:
//! - [`RoutineBuilder`] for building routines programmatically
//! - C-like rendering of statements and expressions (used for traces)
//! - the [`TypeCatalog`] abstraction and a [`TypeDatabase`] implementation
//!
//! # Example
//!
//! ```
//! use decemu_ast::{Expr, Operator, RoutineBuilder};
//!
//! let mut b = RoutineBuilder::new("handler", 0x401000);
//! let r = b.local("r", "int", -0x14);
//! let init = b.assign(Expr::ident(r), Expr::int(0));
//! let ret = b.ret(Some(Expr::ident(r)));
//! let routine = b.finish(vec![init, ret]).unwrap();
//!
//! assert_eq!(routine.render_stmt(init), "r = 0");
//! assert_eq!(Operator::Gt.symbol(), ">");
//! ```

pub mod builder;
pub mod expr;
pub mod render;
pub mod routine;
pub mod stmt;
pub mod types;

pub use builder::RoutineBuilder;
pub use expr::{CallExpr, Callee, Expr, ExprKind, Operator};
pub use routine::{IdentClass, IdentId, Identifier, RegisterId, Routine, StmtId};
pub use stmt::{Branch, LoopKind, Stmt, StmtKind, SwitchCase};
pub use types::{TypeCatalog, TypeDatabase, TypeSig};

use thiserror::Error;

/// Structural errors in a routine arena.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AstError {
    /// A statement reference points outside the arena.
    #[error("statement #{0} is out of range")]
    DanglingStatement(u32),

    /// An identifier reference points outside the identifier table.
    #[error("identifier #{0} is out of range")]
    DanglingIdentifier(u32),

    /// The routine body must be a block statement.
    #[error("routine body #{0} is not a block")]
    BodyNotBlock(u32),

    /// A statement is nested in more than one place.
    #[error("statement #{0} appears in more than one block")]
    SharedStatement(u32),

    /// A goto/break/continue target is not a label statement.
    #[error("statement #{0} is used as a jump target but is not a label")]
    NotALabel(u32),

    /// A branch or loop body is not a block statement.
    #[error("statement #{0} is used as a body but is not a block")]
    NotABlock(u32),
}
