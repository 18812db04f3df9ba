//! Routine arena: statements, identifiers and the routine body.

use crate::stmt::{Stmt, StmtKind};
use crate::types::TypeSig;
use crate::AstError;
use serde::{Deserialize, Serialize};

/// Identifier space for machine registers and engine-synthetic registers.
pub type RegisterId = i32;

/// Index of a statement in its routine's arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StmtId(pub u32);

impl StmtId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Index of an identifier in its routine's identifier table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IdentId(pub u32);

impl IdentId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Storage class of an identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdentClass {
    /// Stack variable at a fixed offset from the frame base.
    Local,
    /// Variable at a fixed absolute address.
    Global,
    /// Register mirror.
    Register,
    /// Routine parameter (register-passed).
    Parameter,
}

/// A declared identifier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identifier {
    /// Register id for register-backed classes.
    #[serde(default)]
    pub id: RegisterId,
    pub name: String,
    pub class: IdentClass,
    /// Type signature, e.g. `int`, `char*`.
    pub ty: TypeSig,
    /// Frame offset (locals) or absolute address (globals).
    #[serde(default)]
    pub address: i64,
}

/// A decompiled routine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RoutineRepr")]
pub struct Routine {
    pub name: String,
    pub address: u64,
    stmts: Vec<Stmt>,
    idents: Vec<Identifier>,
    body: StmtId,
}

#[derive(Deserialize)]
struct RoutineRepr {
    name: String,
    address: u64,
    stmts: Vec<Stmt>,
    #[serde(default)]
    idents: Vec<Identifier>,
    body: StmtId,
}

impl TryFrom<RoutineRepr> for Routine {
    type Error = AstError;

    fn try_from(repr: RoutineRepr) -> Result<Self, Self::Error> {
        Routine::new(repr.name, repr.address, repr.stmts, repr.idents, repr.body)
    }
}

impl Routine {
    /// Creates a routine after validating the arena.
    pub fn new(
        name: impl Into<String>,
        address: u64,
        stmts: Vec<Stmt>,
        idents: Vec<Identifier>,
        body: StmtId,
    ) -> Result<Self, AstError> {
        let routine = Self {
            name: name.into(),
            address,
            stmts,
            idents,
            body,
        };
        routine.validate()?;
        Ok(routine)
    }

    /// Returns the statement with the given id.
    ///
    /// # Panics
    ///
    /// Panics if `id` does not belong to this routine.
    pub fn stmt(&self, id: StmtId) -> &Stmt {
        &self.stmts[id.index()]
    }

    pub fn get(&self, id: StmtId) -> Option<&Stmt> {
        self.stmts.get(id.index())
    }

    /// Returns the identifier with the given id.
    ///
    /// # Panics
    ///
    /// Panics if `id` does not belong to this routine.
    pub fn ident(&self, id: IdentId) -> &Identifier {
        &self.idents[id.index()]
    }

    pub fn get_ident(&self, id: IdentId) -> Option<&Identifier> {
        self.idents.get(id.index())
    }

    pub fn contains(&self, id: StmtId) -> bool {
        id.index() < self.stmts.len()
    }

    /// The body block.
    pub fn body(&self) -> StmtId {
        self.body
    }

    /// Top-level statements of the body.
    pub fn body_stmts(&self) -> &[StmtId] {
        match &self.stmt(self.body).kind {
            StmtKind::Block { stmts } => stmts,
            _ => &[],
        }
    }

    /// First statement of the body, if any.
    pub fn entry(&self) -> Option<StmtId> {
        self.body_stmts().first().copied()
    }

    /// Number of statements in the arena.
    pub fn len(&self) -> usize {
        self.stmts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stmts.is_empty()
    }

    /// Iterates over all statements with their ids.
    pub fn stmts(&self) -> impl Iterator<Item = (StmtId, &Stmt)> {
        self.stmts
            .iter()
            .enumerate()
            .map(|(i, s)| (StmtId(i as u32), s))
    }

    pub fn idents(&self) -> impl Iterator<Item = (IdentId, &Identifier)> {
        self.idents
            .iter()
            .enumerate()
            .map(|(i, id)| (IdentId(i as u32), id))
    }

    /// Finds an identifier by name.
    pub fn find_ident(&self, name: &str) -> Option<IdentId> {
        self.idents()
            .find(|(_, ident)| ident.name == name)
            .map(|(id, _)| id)
    }

    /// Finds a label statement by name.
    pub fn find_label(&self, name: &str) -> Option<StmtId> {
        self.stmts()
            .find(|(_, s)| matches!(&s.kind, StmtKind::Label { name: n } if n == name))
            .map(|(id, _)| id)
    }

    /// Checks that every reference is in range, that the body and all
    /// branch/loop bodies are blocks, that jump targets are labels, and that
    /// no statement is nested in more than one block.
    pub fn validate(&self) -> Result<(), AstError> {
        let mut parents = vec![0u32; self.stmts.len()];

        self.check_block(self.body)?;
        parents[self.body.index()] += 1;

        for (_, stmt) in self.stmts() {
            for child in stmt.children() {
                if !self.contains(child) {
                    return Err(AstError::DanglingStatement(child.0));
                }
                parents[child.index()] += 1;
                if parents[child.index()] > 1 {
                    return Err(AstError::SharedStatement(child.0));
                }
            }
            for body in stmt.bodies() {
                self.check_block(body)?;
            }
            for target in stmt.jump_targets() {
                self.check_label(target)?;
            }
            let mut dangling = None;
            stmt.visit_exprs(&mut |e| {
                if let Some(id) = e.as_ident() {
                    if id.index() >= self.idents.len() && dangling.is_none() {
                        dangling = Some(id);
                    }
                }
            });
            if let Some(id) = dangling {
                return Err(AstError::DanglingIdentifier(id.0));
            }
            if let StmtKind::Decl { ident } = &stmt.kind {
                if ident.index() >= self.idents.len() {
                    return Err(AstError::DanglingIdentifier(ident.0));
                }
            }
        }

        Ok(())
    }

    fn check_block(&self, id: StmtId) -> Result<(), AstError> {
        match self.get(id) {
            None => Err(AstError::DanglingStatement(id.0)),
            Some(s) if matches!(s.kind, StmtKind::Block { .. }) => Ok(()),
            Some(_) if id == self.body => Err(AstError::BodyNotBlock(id.0)),
            Some(_) => Err(AstError::NotABlock(id.0)),
        }
    }

    fn check_label(&self, id: StmtId) -> Result<(), AstError> {
        match self.get(id) {
            None => Err(AstError::DanglingStatement(id.0)),
            Some(s) if matches!(s.kind, StmtKind::Label { .. }) => Ok(()),
            Some(_) => Err(AstError::NotALabel(id.0)),
        }
    }
}
