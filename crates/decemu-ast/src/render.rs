//! C-like rendering of statements and expressions.
//!
//! Compound statements render their header only; the rendering of a
//! statement is what ends up in an execution trace.

use crate::expr::{CallExpr, Expr, ExprKind, Operator};
use crate::routine::{Routine, StmtId};
use crate::stmt::{LoopKind, StmtKind};
use std::fmt::{self, Write};

impl Routine {
    /// Render a single statement.
    pub fn render_stmt(&self, id: StmtId) -> String {
        let mut out = String::new();
        // Writing into a String never fails.
        let _ = self.write_stmt(&mut out, id);
        out
    }

    /// Render an expression in the context of this routine.
    pub fn render_expr(&self, expr: &Expr) -> String {
        ExprDisplay {
            routine: self,
            expr,
        }
        .to_string()
    }

    /// Render a call site as `name(args)`.
    pub fn render_call(&self, call: &CallExpr) -> String {
        let mut out = String::new();
        let _ = self.write_call(&mut out, call);
        out
    }

    /// Display adapter for an expression.
    pub fn display<'a>(&'a self, expr: &'a Expr) -> ExprDisplay<'a> {
        ExprDisplay {
            routine: self,
            expr,
        }
    }

    fn write_stmt(&self, out: &mut String, id: StmtId) -> fmt::Result {
        let Some(stmt) = self.get(id) else {
            return write!(out, "<stmt #{}>", id.0);
        };
        match &stmt.kind {
            StmtKind::Assign {
                lhs,
                rhs,
                compound,
                declare,
            } => {
                if *declare {
                    if let Some(ident) = lhs.as_ident().and_then(|i| self.get_ident(i)) {
                        write!(out, "{} ", ident.ty)?;
                    }
                }
                match compound {
                    Some(op) => write!(out, "{} {}= {}", self.display(lhs), op.symbol(), self.display(rhs)),
                    None => write!(out, "{} = {}", self.display(lhs), self.display(rhs)),
                }
            }
            StmtKind::If { branches, default } => {
                for (i, branch) in branches.iter().enumerate() {
                    if i > 0 {
                        out.push_str(" else ");
                    }
                    write!(out, "if({}) {{...}}", self.display(&branch.predicate))?;
                }
                if default.is_some() {
                    out.push_str(" else {...}");
                }
                Ok(())
            }
            StmtKind::Loop {
                kind, predicate, ..
            } => match kind {
                LoopKind::While => write!(out, "while({})", self.display(predicate)),
                LoopKind::DoWhile => write!(out, "do {{...}} while({})", self.display(predicate)),
                LoopKind::For => write!(out, "for(; {}; )", self.display(predicate)),
            },
            StmtKind::Goto { label } => write!(out, "goto {}", self.label_name(*label)),
            StmtKind::Label { name } => write!(out, "{}:", name),
            StmtKind::Return(None) => out.write_str("return"),
            StmtKind::Return(Some(e)) => write!(out, "return {}", self.display(e)),
            StmtKind::JumpFar { target } => write!(out, "jumpfar {}", self.display(target)),
            StmtKind::Call(call) => self.write_call(out, call),
            StmtKind::Break { label: None } => out.write_str("break"),
            StmtKind::Break { label: Some(l) } => write!(out, "break {}", self.label_name(*l)),
            StmtKind::Continue { label: None } => out.write_str("continue"),
            StmtKind::Continue { label: Some(l) } => {
                write!(out, "continue {}", self.label_name(*l))
            }
            StmtKind::Decl { ident } => match self.get_ident(*ident) {
                Some(ident) => write!(out, "{} {}", ident.ty, ident.name),
                None => write!(out, "<ident #{}>", ident.0),
            },
            StmtKind::Block { .. } => out.write_str("{...}"),
            StmtKind::Switch { value, .. } => write!(out, "switch({}) {{...}}", self.display(value)),
        }
    }

    fn label_name(&self, id: StmtId) -> String {
        match self.get(id).map(|s| &s.kind) {
            Some(StmtKind::Label { name }) => name.clone(),
            _ => format!("<stmt #{}>", id.0),
        }
    }

    fn write_call<W: Write>(&self, out: &mut W, call: &CallExpr) -> fmt::Result {
        match &call.callee {
            Some(callee) => out.write_str(&callee.name)?,
            None => match &call.callsite.kind {
                ExprKind::Op { .. } => write!(out, "({})", self.display(&call.callsite))?,
                _ => write!(out, "{}", self.display(&call.callsite))?,
            },
        }
        out.write_char('(')?;
        for (i, arg) in call.args.iter().enumerate() {
            if i > 0 {
                out.write_str(", ")?;
            }
            write!(out, "{}", self.display(arg))?;
        }
        out.write_char(')')
    }
}

/// Formats an expression with identifier names resolved.
pub struct ExprDisplay<'a> {
    routine: &'a Routine,
    expr: &'a Expr,
}

impl ExprDisplay<'_> {
    fn child<'b>(&'b self, expr: &'b Expr) -> ExprDisplay<'b> {
        ExprDisplay {
            routine: self.routine,
            expr,
        }
    }

    /// Writes `expr`, parenthesized if it binds looser than `parent`.
    fn write_operand(&self, f: &mut fmt::Formatter<'_>, expr: &Expr, parent: &Operator) -> fmt::Result {
        match expr.as_op() {
            Some((op, _)) if op.precedence() <= parent.precedence() && !op.is_unary() => {
                write!(f, "({})", self.child(expr))
            }
            _ => write!(f, "{}", self.child(expr)),
        }
    }
}

fn write_int(f: &mut fmt::Formatter<'_>, value: i64) -> fmt::Result {
    if (-9..=9).contains(&value) {
        write!(f, "{}", value)
    } else if value < 0 {
        write!(f, "-0x{:X}", value.unsigned_abs())
    } else {
        write!(f, "0x{:X}", value)
    }
}

impl fmt::Display for ExprDisplay<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.expr.kind {
            ExprKind::Int(v) => write_int(f, *v),
            ExprKind::Ptr(addr) => write!(f, "0x{:X}", addr),
            ExprKind::Ident(id) => match self.routine.get_ident(*id) {
                Some(ident) => f.write_str(&ident.name),
                None => write!(f, "<ident #{}>", id.0),
            },
            ExprKind::Predicate(inner) => write!(f, "{}", self.child(inner)),
            ExprKind::Call(call) => {
                let mut s = String::new();
                self.routine.write_call(&mut s, call)?;
                f.write_str(&s)
            }
            ExprKind::Op { op, operands } => match (op, operands.as_slice()) {
                (Operator::Cond, [c, a, b]) => {
                    self.write_operand(f, c, op)?;
                    f.write_str(" ? ")?;
                    self.write_operand(f, a, op)?;
                    f.write_str(" : ")?;
                    self.write_operand(f, b, op)
                }
                (Operator::Cast(ty), [e]) => {
                    write!(f, "({})", ty)?;
                    self.write_unary_operand(f, e)
                }
                (Operator::LogIdent, [e]) => write!(f, "{}", self.child(e)),
                (Operator::SizeOf, [e]) => write!(f, "sizeof({})", self.child(e)),
                (Operator::Custom(name), args) => {
                    f.write_str(name)?;
                    if !args.is_empty() {
                        f.write_str("(")?;
                        for (i, arg) in args.iter().enumerate() {
                            if i > 0 {
                                f.write_str(", ")?;
                            }
                            write!(f, "{}", self.child(arg))?;
                        }
                        f.write_str(")")?;
                    }
                    Ok(())
                }
                (op, [e]) if op.is_unary() => {
                    f.write_str(op.symbol())?;
                    self.write_unary_operand(f, e)
                }
                (op, [a, b]) => {
                    self.write_operand(f, a, op)?;
                    write!(f, " {} ", op.symbol())?;
                    self.write_operand(f, b, op)
                }
                (op, operands) => {
                    write!(f, "{}(", op.symbol())?;
                    for (i, e) in operands.iter().enumerate() {
                        if i > 0 {
                            f.write_str(", ")?;
                        }
                        write!(f, "{}", self.child(e))?;
                    }
                    f.write_str(")")
                }
            },
        }
    }
}

impl ExprDisplay<'_> {
    fn write_unary_operand(&self, f: &mut fmt::Formatter<'_>, e: &Expr) -> fmt::Result {
        match e.as_op() {
            Some((op, _)) if !op.is_unary() => write!(f, "({})", self.child(e)),
            _ => write!(f, "{}", self.child(e)),
        }
    }
}
