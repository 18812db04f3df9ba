//! Statements of a decompiled routine.

use crate::expr::{CallExpr, Expr, ExprKind, Operator};
use crate::routine::{IdentId, StmtId};
use serde::{Deserialize, Serialize};

/// A statement node. Nested statements are referenced by [`StmtId`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Stmt {
    pub kind: StmtKind,
}

/// Loop flavours. All of them share while-loop control flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoopKind {
    #[default]
    While,
    DoWhile,
    For,
}

/// One `if` / `else if` arm.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Branch {
    pub predicate: Expr,
    /// Block executed when the predicate holds.
    pub block: StmtId,
}

/// One `case` arm of a switch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SwitchCase {
    pub values: Vec<i64>,
    pub block: StmtId,
}

/// The kind of statement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StmtKind {
    /// `lhs = rhs`, or `lhs op= rhs` when `compound` is set.
    Assign {
        lhs: Expr,
        rhs: Expr,
        #[serde(default)]
        compound: Option<Operator>,
        /// The assignment also declares `lhs` (`int x = 1`).
        #[serde(default)]
        declare: bool,
    },

    /// `if (p0) {..} else if (p1) {..} else {..}`
    If {
        branches: Vec<Branch>,
        #[serde(default)]
        default: Option<StmtId>,
    },

    /// `while`, `do..while` and `for` loops.
    Loop {
        #[serde(default)]
        kind: LoopKind,
        predicate: Expr,
        body: StmtId,
    },

    Goto {
        label: StmtId,
    },

    Label {
        name: String,
    },

    Return(Option<Expr>),

    /// Unconditional transfer out of the routine to a computed address.
    JumpFar {
        target: Expr,
    },

    Call(CallExpr),

    Break {
        #[serde(default)]
        label: Option<StmtId>,
    },

    Continue {
        #[serde(default)]
        label: Option<StmtId>,
    },

    Decl {
        ident: IdentId,
    },

    /// Compound statement.
    Block {
        stmts: Vec<StmtId>,
    },

    Switch {
        value: Expr,
        cases: Vec<SwitchCase>,
        #[serde(default)]
        default: Option<StmtId>,
    },
}

impl Stmt {
    pub fn new(kind: StmtKind) -> Self {
        Self { kind }
    }

    /// Statements nested directly in this one.
    pub fn children(&self) -> Vec<StmtId> {
        match &self.kind {
            StmtKind::Block { stmts } => stmts.clone(),
            _ => self.bodies(),
        }
    }

    /// Sub-blocks owned by a compound statement, in source order.
    pub fn bodies(&self) -> Vec<StmtId> {
        match &self.kind {
            StmtKind::If { branches, default } => branches
                .iter()
                .map(|b| b.block)
                .chain(default.iter().copied())
                .collect(),
            StmtKind::Loop { body, .. } => vec![*body],
            StmtKind::Switch { cases, default, .. } => cases
                .iter()
                .map(|c| c.block)
                .chain(default.iter().copied())
                .collect(),
            _ => Vec::new(),
        }
    }

    /// Label statements this statement may jump to.
    pub fn jump_targets(&self) -> Vec<StmtId> {
        match &self.kind {
            StmtKind::Goto { label } => vec![*label],
            StmtKind::Break { label: Some(label) } | StmtKind::Continue { label: Some(label) } => {
                vec![*label]
            }
            _ => Vec::new(),
        }
    }

    /// Returns true for loop headers.
    pub fn is_loop(&self) -> bool {
        matches!(self.kind, StmtKind::Loop { .. })
    }

    /// Visits every expression held by this statement (not by nested
    /// statements), including sub-expressions.
    pub fn visit_exprs(&self, f: &mut dyn FnMut(&Expr)) {
        match &self.kind {
            StmtKind::Assign { lhs, rhs, .. } => {
                visit_expr(lhs, f);
                visit_expr(rhs, f);
            }
            StmtKind::If { branches, .. } => {
                for b in branches {
                    visit_expr(&b.predicate, f);
                }
            }
            StmtKind::Loop { predicate, .. } => visit_expr(predicate, f),
            StmtKind::Return(Some(e)) | StmtKind::JumpFar { target: e } => visit_expr(e, f),
            StmtKind::Switch { value, .. } => visit_expr(value, f),
            StmtKind::Call(call) => visit_call(call, f),
            StmtKind::Return(None)
            | StmtKind::Goto { .. }
            | StmtKind::Label { .. }
            | StmtKind::Break { .. }
            | StmtKind::Continue { .. }
            | StmtKind::Decl { .. }
            | StmtKind::Block { .. } => {}
        }
    }
}

fn visit_expr(expr: &Expr, f: &mut dyn FnMut(&Expr)) {
    f(expr);
    match &expr.kind {
        ExprKind::Op { operands, .. } => {
            for e in operands {
                visit_expr(e, f);
            }
        }
        ExprKind::Predicate(inner) => visit_expr(inner, f),
        ExprKind::Call(call) => visit_call(call, f),
        ExprKind::Int(_) | ExprKind::Ptr(_) | ExprKind::Ident(_) => {}
    }
}

fn visit_call(call: &CallExpr, f: &mut dyn FnMut(&Expr)) {
    visit_expr(&call.callsite, f);
    for arg in &call.args {
        visit_expr(arg, f);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_if_bodies_in_source_order() {
        let stmt = Stmt::new(StmtKind::If {
            branches: vec![
                Branch {
                    predicate: Expr::int(1),
                    block: StmtId(4),
                },
                Branch {
                    predicate: Expr::int(0),
                    block: StmtId(2),
                },
            ],
            default: Some(StmtId(7)),
        });
        assert_eq!(stmt.bodies(), vec![StmtId(4), StmtId(2), StmtId(7)]);
        assert_eq!(stmt.children(), stmt.bodies());
    }

    #[test]
    fn test_visit_reaches_call_arguments() {
        let stmt = Stmt::new(StmtKind::Call(CallExpr::direct(
            "memcpy",
            None,
            vec![Expr::ident(IdentId(0)), Expr::ident(IdentId(1)), Expr::int(4)],
        )));
        let mut idents = Vec::new();
        stmt.visit_exprs(&mut |e| {
            if let Some(id) = e.as_ident() {
                idents.push(id);
            }
        });
        assert_eq!(idents, vec![IdentId(0), IdentId(1)]);
    }
}
