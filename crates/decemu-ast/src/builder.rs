//! Programmatic construction of routines.

use crate::expr::{CallExpr, Expr, Operator};
use crate::routine::{IdentClass, IdentId, Identifier, RegisterId, Routine, StmtId};
use crate::stmt::{Branch, LoopKind, Stmt, StmtKind, SwitchCase};
use crate::types::TypeSig;
use crate::AstError;

/// Builds a [`Routine`] bottom-up.
///
/// Statements are created detached and placed into blocks afterwards, so
/// a label can be created before the `goto` that targets it.
#[derive(Debug, Clone)]
pub struct RoutineBuilder {
    name: String,
    address: u64,
    stmts: Vec<Stmt>,
    idents: Vec<Identifier>,
}

impl RoutineBuilder {
    pub fn new(name: impl Into<String>, address: u64) -> Self {
        Self {
            name: name.into(),
            address,
            stmts: Vec::new(),
            idents: Vec::new(),
        }
    }

    // ==================== Identifiers ====================

    /// Declare an identifier.
    pub fn ident(&mut self, ident: Identifier) -> IdentId {
        self.idents.push(ident);
        IdentId((self.idents.len() - 1) as u32)
    }

    /// Declare a stack variable at `offset` from the frame base.
    pub fn local(&mut self, name: impl Into<String>, ty: impl Into<TypeSig>, offset: i64) -> IdentId {
        self.ident(Identifier {
            id: 0,
            name: name.into(),
            class: IdentClass::Local,
            ty: ty.into(),
            address: offset,
        })
    }

    /// Declare a global variable at an absolute address.
    pub fn global(&mut self, name: impl Into<String>, ty: impl Into<TypeSig>, address: u64) -> IdentId {
        self.ident(Identifier {
            id: 0,
            name: name.into(),
            class: IdentClass::Global,
            ty: ty.into(),
            address: address as i64,
        })
    }

    /// Declare a register mirror.
    pub fn register(&mut self, name: impl Into<String>, ty: impl Into<TypeSig>, id: RegisterId) -> IdentId {
        self.ident(Identifier {
            id,
            name: name.into(),
            class: IdentClass::Register,
            ty: ty.into(),
            address: 0,
        })
    }

    /// Declare a register-passed parameter.
    pub fn parameter(&mut self, name: impl Into<String>, ty: impl Into<TypeSig>, id: RegisterId) -> IdentId {
        self.ident(Identifier {
            id,
            name: name.into(),
            class: IdentClass::Parameter,
            ty: ty.into(),
            address: 0,
        })
    }

    // ==================== Statements ====================

    /// Add a detached statement.
    pub fn push(&mut self, kind: StmtKind) -> StmtId {
        self.stmts.push(Stmt::new(kind));
        StmtId((self.stmts.len() - 1) as u32)
    }

    /// `lhs = rhs`
    pub fn assign(&mut self, lhs: Expr, rhs: Expr) -> StmtId {
        self.push(StmtKind::Assign {
            lhs,
            rhs,
            compound: None,
            declare: false,
        })
    }

    /// `ty name = rhs`
    pub fn declare(&mut self, ident: IdentId, rhs: Expr) -> StmtId {
        self.push(StmtKind::Assign {
            lhs: Expr::ident(ident),
            rhs,
            compound: None,
            declare: true,
        })
    }

    /// `lhs op= rhs`
    pub fn compound_assign(&mut self, op: Operator, lhs: Expr, rhs: Expr) -> StmtId {
        self.push(StmtKind::Assign {
            lhs,
            rhs,
            compound: Some(op),
            declare: false,
        })
    }

    /// `ty name;`
    pub fn decl(&mut self, ident: IdentId) -> StmtId {
        self.push(StmtKind::Decl { ident })
    }

    pub fn block(&mut self, stmts: Vec<StmtId>) -> StmtId {
        self.push(StmtKind::Block { stmts })
    }

    /// `if (p0) {..} else if (p1) {..} [else {..}]`
    pub fn if_else(&mut self, branches: Vec<(Expr, Vec<StmtId>)>, default: Option<Vec<StmtId>>) -> StmtId {
        let branches = branches
            .into_iter()
            .map(|(predicate, body)| Branch {
                predicate,
                block: self.block(body),
            })
            .collect();
        let default = default.map(|body| self.block(body));
        self.push(StmtKind::If { branches, default })
    }

    /// `if (p) {..}`
    pub fn if_then(&mut self, predicate: Expr, body: Vec<StmtId>) -> StmtId {
        self.if_else(vec![(predicate, body)], None)
    }

    pub fn while_loop(&mut self, predicate: Expr, body: Vec<StmtId>) -> StmtId {
        self.loop_of(LoopKind::While, predicate, body)
    }

    pub fn do_while(&mut self, predicate: Expr, body: Vec<StmtId>) -> StmtId {
        self.loop_of(LoopKind::DoWhile, predicate, body)
    }

    pub fn for_loop(&mut self, predicate: Expr, body: Vec<StmtId>) -> StmtId {
        self.loop_of(LoopKind::For, predicate, body)
    }

    fn loop_of(&mut self, kind: LoopKind, predicate: Expr, body: Vec<StmtId>) -> StmtId {
        let body = self.block(body);
        self.push(StmtKind::Loop {
            kind,
            predicate,
            body,
        })
    }

    pub fn label(&mut self, name: impl Into<String>) -> StmtId {
        self.push(StmtKind::Label { name: name.into() })
    }

    pub fn goto(&mut self, label: StmtId) -> StmtId {
        self.push(StmtKind::Goto { label })
    }

    pub fn ret(&mut self, value: Option<Expr>) -> StmtId {
        self.push(StmtKind::Return(value))
    }

    pub fn jump_far(&mut self, target: Expr) -> StmtId {
        self.push(StmtKind::JumpFar { target })
    }

    pub fn call(&mut self, call: CallExpr) -> StmtId {
        self.push(StmtKind::Call(call))
    }

    pub fn brk(&mut self) -> StmtId {
        self.push(StmtKind::Break { label: None })
    }

    pub fn brk_to(&mut self, label: StmtId) -> StmtId {
        self.push(StmtKind::Break { label: Some(label) })
    }

    pub fn cont(&mut self) -> StmtId {
        self.push(StmtKind::Continue { label: None })
    }

    pub fn cont_to(&mut self, label: StmtId) -> StmtId {
        self.push(StmtKind::Continue { label: Some(label) })
    }

    pub fn switch(&mut self, value: Expr, cases: Vec<(Vec<i64>, Vec<StmtId>)>, default: Option<Vec<StmtId>>) -> StmtId {
        let cases = cases
            .into_iter()
            .map(|(values, body)| SwitchCase {
                values,
                block: self.block(body),
            })
            .collect();
        let default = default.map(|body| self.block(body));
        self.push(StmtKind::Switch {
            value,
            cases,
            default,
        })
    }

    /// Wrap `body` into the routine's body block and validate the arena.
    pub fn finish(mut self, body: Vec<StmtId>) -> Result<Routine, AstError> {
        let body = self.block(body);
        Routine::new(self.name, self.address, self.stmts, self.idents, body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stmt::StmtKind;

    #[test]
    fn test_if_else_creates_blocks() {
        let mut b = RoutineBuilder::new("f", 0);
        let x = b.local("x", "int", -4);
        let a = b.assign(Expr::ident(x), Expr::int(1));
        let c = b.assign(Expr::ident(x), Expr::int(2));
        let stm = b.if_else(vec![(Expr::int(1), vec![a])], Some(vec![c]));
        let routine = b.finish(vec![stm]).unwrap();

        match &routine.stmt(stm).kind {
            StmtKind::If { branches, default } => {
                assert_eq!(branches.len(), 1);
                assert!(default.is_some());
                assert!(matches!(
                    routine.stmt(branches[0].block).kind,
                    StmtKind::Block { ref stmts } if stmts == &vec![a]
                ));
            }
            other => panic!("expected if, got {:?}", other),
        }
    }

    #[test]
    fn test_detached_statement_is_fine_but_double_placement_is_not() {
        let mut b = RoutineBuilder::new("f", 0);
        let r = b.ret(None);
        let inner = b.block(vec![r]);
        assert_eq!(
            b.finish(vec![inner, r]).unwrap_err(),
            AstError::SharedStatement(r.0)
        );
    }
}
