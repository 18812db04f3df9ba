//! Expression trees.
//!
//! Expressions mirror the decompiler's C-like grammar: constants,
//! identifiers, operations with up to three operands, predicate wrappers and
//! calls.

use crate::routine::IdentId;
use crate::types::TypeSig;
use serde::{Deserialize, Serialize};

/// A decompiled expression.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Expr {
    pub kind: ExprKind,
}

/// The kind of expression.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExprKind {
    /// Integer constant.
    Int(i64),

    /// Pointer constant (absolute address).
    Ptr(u64),

    /// Local, global or register identifier.
    Ident(IdentId),

    /// Operation: `op(operands...)`, one to three operands.
    Op { op: Operator, operands: Vec<Expr> },

    /// Boolean predicate wrapper; evaluates to 1 or 0.
    Predicate(Box<Expr>),

    /// Function call.
    Call(CallExpr),
}

/// Operators of the decompiled expression grammar.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operator {
    // Arithmetic
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Neg,

    // Bitwise
    And,
    Or,
    Xor,
    Not,
    Shl,
    Shr,
    UShr,

    // Logical
    LogAnd,
    LogOr,
    LogNot,
    LogIdent,

    // Comparison
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,

    /// Ternary `a ? b : c`.
    Cond,
    /// Cast to the given type signature.
    Cast(TypeSig),
    /// Dereference `*a`.
    Ptr,
    /// Address-of `&a`.
    Ref,
    SizeOf,
    /// Decompiler-specific operator, identified by name.
    Custom(String),
}

impl Operator {
    /// Returns the C operator text.
    pub fn symbol(&self) -> &str {
        match self {
            Self::Add => "+",
            Self::Sub | Self::Neg => "-",
            Self::Mul | Self::Ptr => "*",
            Self::Div => "/",
            Self::Rem => "%",
            Self::And | Self::Ref => "&",
            Self::Or => "|",
            Self::Xor => "^",
            Self::Not => "~",
            Self::Shl => "<<",
            Self::Shr => ">>",
            Self::UShr => ">>>",
            Self::LogAnd => "&&",
            Self::LogOr => "||",
            Self::LogNot => "!",
            Self::LogIdent => "",
            Self::Eq => "==",
            Self::Ne => "!=",
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Gt => ">",
            Self::Ge => ">=",
            Self::Cond => "?:",
            Self::Cast(_) => "(cast)",
            Self::SizeOf => "sizeof",
            Self::Custom(name) => name.as_str(),
        }
    }

    /// Returns true for unary operators.
    pub fn is_unary(&self) -> bool {
        matches!(
            self,
            Self::Neg
                | Self::Not
                | Self::LogNot
                | Self::LogIdent
                | Self::Cast(_)
                | Self::Ptr
                | Self::Ref
                | Self::SizeOf
        )
    }

    /// Returns true for comparison operators.
    pub fn is_comparison(&self) -> bool {
        matches!(
            self,
            Self::Eq | Self::Ne | Self::Lt | Self::Le | Self::Gt | Self::Ge
        )
    }

    pub fn is_cast(&self) -> bool {
        matches!(self, Self::Cast(_))
    }

    /// Returns the target type of a cast operator.
    pub fn cast_type(&self) -> Option<&str> {
        match self {
            Self::Cast(ty) => Some(ty.as_str()),
            _ => None,
        }
    }

    /// Returns the logical complement of a comparison or logical operator.
    ///
    /// `a < b` becomes `a >= b`, `a && b` has no single-operator complement
    /// and returns `None`.
    pub fn negated(&self) -> Option<Operator> {
        Some(match self {
            Self::Eq => Self::Ne,
            Self::Ne => Self::Eq,
            Self::Lt => Self::Ge,
            Self::Ge => Self::Lt,
            Self::Gt => Self::Le,
            Self::Le => Self::Gt,
            Self::LogNot => Self::LogIdent,
            Self::LogIdent => Self::LogNot,
            _ => return None,
        })
    }

    /// Returns precedence (higher = binds tighter).
    pub fn precedence(&self) -> u8 {
        match self {
            Self::Cond => 1,
            Self::LogOr => 2,
            Self::LogAnd => 3,
            Self::Or => 4,
            Self::Xor => 5,
            Self::And => 6,
            Self::Eq | Self::Ne => 7,
            Self::Lt | Self::Le | Self::Gt | Self::Ge => 8,
            Self::Shl | Self::Shr | Self::UShr => 9,
            Self::Add | Self::Sub => 10,
            Self::Mul | Self::Div | Self::Rem => 11,
            Self::Neg
            | Self::Not
            | Self::LogNot
            | Self::LogIdent
            | Self::Cast(_)
            | Self::Ptr
            | Self::Ref
            | Self::SizeOf => 12,
            Self::Custom(_) => 13,
        }
    }
}

/// A call site.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallExpr {
    /// Statically resolved callee, if the decompiler knows it.
    #[serde(default)]
    pub callee: Option<Callee>,
    /// The call target expression as written at the call site.
    pub callsite: Box<Expr>,
    #[serde(default)]
    pub args: Vec<Expr>,
}

/// A statically resolved call target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Callee {
    pub name: String,
    #[serde(default)]
    pub address: Option<u64>,
}

impl CallExpr {
    /// Call to a statically known routine.
    pub fn direct(name: impl Into<String>, address: Option<u64>, args: Vec<Expr>) -> Self {
        let name = name.into();
        let callsite = match address {
            Some(addr) => Expr::ptr(addr),
            None => Expr::op(Operator::Custom(name.clone()), Vec::new()),
        };
        Self {
            callee: Some(Callee { name, address }),
            callsite: Box::new(callsite),
            args,
        }
    }

    /// Call through a computed target.
    pub fn indirect(callsite: Expr, args: Vec<Expr>) -> Self {
        Self {
            callee: None,
            callsite: Box::new(callsite),
            args,
        }
    }
}

impl Expr {
    pub fn new(kind: ExprKind) -> Self {
        Self { kind }
    }

    pub fn int(value: i64) -> Self {
        Self::new(ExprKind::Int(value))
    }

    pub fn ptr(address: u64) -> Self {
        Self::new(ExprKind::Ptr(address))
    }

    pub fn ident(id: IdentId) -> Self {
        Self::new(ExprKind::Ident(id))
    }

    pub fn op(op: Operator, operands: Vec<Expr>) -> Self {
        Self::new(ExprKind::Op { op, operands })
    }

    pub fn unary(op: Operator, operand: Expr) -> Self {
        Self::op(op, vec![operand])
    }

    pub fn binary(op: Operator, left: Expr, right: Expr) -> Self {
        Self::op(op, vec![left, right])
    }

    /// `cond ? then_expr : else_expr`
    pub fn cond(cond: Expr, then_expr: Expr, else_expr: Expr) -> Self {
        Self::op(Operator::Cond, vec![cond, then_expr, else_expr])
    }

    /// `(ty)expr`
    pub fn cast(ty: impl Into<TypeSig>, expr: Expr) -> Self {
        Self::unary(Operator::Cast(ty.into()), expr)
    }

    /// `*expr`
    pub fn deref(expr: Expr) -> Self {
        Self::unary(Operator::Ptr, expr)
    }

    /// `&expr`
    pub fn addr_of(expr: Expr) -> Self {
        Self::unary(Operator::Ref, expr)
    }

    pub fn predicate(expr: Expr) -> Self {
        Self::new(ExprKind::Predicate(Box::new(expr)))
    }

    pub fn call(call: CallExpr) -> Self {
        Self::new(ExprKind::Call(call))
    }

    /// Returns the identifier if this is a bare identifier.
    pub fn as_ident(&self) -> Option<IdentId> {
        match self.kind {
            ExprKind::Ident(id) => Some(id),
            _ => None,
        }
    }

    /// Returns the operator and operands if this is an operation.
    pub fn as_op(&self) -> Option<(&Operator, &[Expr])> {
        match &self.kind {
            ExprKind::Op { op, operands } => Some((op, operands.as_slice())),
            _ => None,
        }
    }

    /// Returns the n-th operand (0-based) of an operation.
    pub fn operand(&self, n: usize) -> Option<&Expr> {
        self.as_op().and_then(|(_, operands)| operands.get(n))
    }

    /// Returns true if this is a cast operation.
    pub fn is_cast(&self) -> bool {
        matches!(self.as_op(), Some((op, _)) if op.is_cast())
    }

    /// Returns the dereferenced expression if this is `*expr`.
    pub fn deref_operand(&self) -> Option<&Expr> {
        match self.as_op() {
            Some((Operator::Ptr, operands)) => operands.first(),
            _ => None,
        }
    }

    /// Returns the first bare identifier among the first three operands.
    ///
    /// In pointer arithmetic like `p + 4` this is the base pointer whose
    /// type decides the dereference width.
    pub fn base_pointer(&self) -> Option<IdentId> {
        let (_, operands) = self.as_op()?;
        operands.iter().take(3).find_map(Expr::as_ident)
    }

    /// Number of operands (0 for non-operations).
    pub fn operand_count(&self) -> usize {
        self.as_op().map_or(0, |(_, operands)| operands.len())
    }

    /// Strips any number of leading casts.
    pub fn strip_casts(&self) -> &Expr {
        let mut expr = self;
        while let Some((Operator::Cast(_), operands)) = expr.as_op() {
            match operands.first() {
                Some(inner) => expr = inner,
                None => break,
            }
        }
        expr
    }
}
