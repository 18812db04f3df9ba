//! Expression evaluation against a machine state.
//!
//! Values are 64-bit two's complement integers. Arithmetic wraps, comparisons
//! are signed and yield 1 or 0.

use crate::log::OutputLog;
use crate::simulation::{CallSimulator, CallSite};
use crate::state::{regs, sign_extend};
use crate::{EmulationError, EmulationResult, MachineState};
use decemu_ast::{CallExpr, Expr, ExprKind, IdentId, Identifier, Operator, Routine};
use log::warn;

/// Where a dereference reads or writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DerefTarget {
    pub address: u64,
    /// Access width in bytes.
    pub size: usize,
    /// The read value is sign-extended (dereference of a cast pointer).
    pub signed: bool,
}

/// Evaluates expressions of one routine.
///
/// Borrows everything an evaluation may touch: the machine state, the call
/// simulators consulted for calls, and the output log they append to.
pub struct Evaluator<'a> {
    routine: &'a Routine,
    state: &'a mut MachineState,
    simulators: &'a [Box<dyn CallSimulator>],
    log: &'a mut OutputLog,
}

impl<'a> Evaluator<'a> {
    pub fn new(
        routine: &'a Routine,
        state: &'a mut MachineState,
        simulators: &'a [Box<dyn CallSimulator>],
        log: &'a mut OutputLog,
    ) -> Self {
        Self {
            routine,
            state,
            simulators,
            log,
        }
    }

    /// The routine being evaluated.
    pub fn routine(&self) -> &'a Routine {
        self.routine
    }

    pub fn state(&self) -> &MachineState {
        &*self.state
    }

    pub fn state_mut(&mut self) -> &mut MachineState {
        &mut *self.state
    }

    pub fn log(&mut self) -> &mut OutputLog {
        &mut *self.log
    }

    /// Evaluate an expression to a 64-bit value.
    pub fn evaluate(&mut self, expr: &Expr) -> EmulationResult<i64> {
        match &expr.kind {
            ExprKind::Int(v) => Ok(*v),
            ExprKind::Ptr(addr) => Ok(*addr as i64),
            ExprKind::Ident(id) => {
                let ident = self.ident(*id)?;
                match self.state.var_value(ident)? {
                    Some(v) => Ok(v as i64),
                    None => {
                        warn!("uninitialized identifier {}, using 0", ident.name);
                        Ok(0)
                    }
                }
            }
            ExprKind::Predicate(inner) => Ok((self.evaluate(inner)? != 0) as i64),
            ExprKind::Call(call) => {
                self.call(call)?;
                match self.state.register(regs::RAX) {
                    Some(v) => Ok(v as i64),
                    None => {
                        warn!("no return value for {}, using 0", self.routine.render_call(call));
                        Ok(0)
                    }
                }
            }
            ExprKind::Op { op, operands } => self.evaluate_op(expr, op, operands),
        }
    }

    fn evaluate_op(&mut self, expr: &Expr, op: &Operator, operands: &[Expr]) -> EmulationResult<i64> {
        let value = match (op, operands) {
            (Operator::Add, [a, b]) => self.evaluate(a)?.wrapping_add(self.evaluate(b)?),
            (Operator::Sub, [a, b]) => self.evaluate(a)?.wrapping_sub(self.evaluate(b)?),
            (Operator::Mul, [a, b]) => self.evaluate(a)?.wrapping_mul(self.evaluate(b)?),
            (Operator::Div, [a, b]) => {
                let (a, b) = (self.evaluate(a)?, self.evaluate(b)?);
                if b == 0 {
                    return Err(EmulationError::DivisionByZero(self.routine.render_expr(expr)));
                }
                a.wrapping_div(b)
            }
            (Operator::Rem, [a, b]) => {
                let (a, b) = (self.evaluate(a)?, self.evaluate(b)?);
                if b == 0 {
                    return Err(EmulationError::DivisionByZero(self.routine.render_expr(expr)));
                }
                a.wrapping_rem(b)
            }
            (Operator::Neg, [a]) => self.evaluate(a)?.wrapping_neg(),
            (Operator::And, [a, b]) => self.evaluate(a)? & self.evaluate(b)?,
            (Operator::Or, [a, b]) => self.evaluate(a)? | self.evaluate(b)?,
            (Operator::Xor, [a, b]) => self.evaluate(a)? ^ self.evaluate(b)?,
            (Operator::Not, [a]) => !self.evaluate(a)?,
            // Shift counts use their low six bits.
            (Operator::Shl, [a, b]) => self.evaluate(a)?.wrapping_shl(self.evaluate(b)? as u32),
            (Operator::Shr, [a, b]) => self.evaluate(a)?.wrapping_shr(self.evaluate(b)? as u32),
            (Operator::UShr, [a, b]) => {
                (self.evaluate(a)? as u64).wrapping_shr(self.evaluate(b)? as u32) as i64
            }
            (Operator::LogAnd, [a, b]) => (self.evaluate(a)? != 0 && self.evaluate(b)? != 0) as i64,
            (Operator::LogOr, [a, b]) => (self.evaluate(a)? != 0 || self.evaluate(b)? != 0) as i64,
            (Operator::LogNot, [a]) => (self.evaluate(a)? == 0) as i64,
            (Operator::LogIdent, [a]) => self.evaluate(a)?,
            (Operator::Eq, [a, b]) => (self.evaluate(a)? == self.evaluate(b)?) as i64,
            (Operator::Ne, [a, b]) => (self.evaluate(a)? != self.evaluate(b)?) as i64,
            (Operator::Lt, [a, b]) => (self.evaluate(a)? < self.evaluate(b)?) as i64,
            (Operator::Le, [a, b]) => (self.evaluate(a)? <= self.evaluate(b)?) as i64,
            (Operator::Gt, [a, b]) => (self.evaluate(a)? > self.evaluate(b)?) as i64,
            (Operator::Ge, [a, b]) => (self.evaluate(a)? >= self.evaluate(b)?) as i64,
            (Operator::Cond, [c, a, b]) => {
                if self.evaluate(c)? != 0 {
                    self.evaluate(a)?
                } else {
                    self.evaluate(b)?
                }
            }
            (Operator::Cast(ty), [a]) => {
                let size = self.state.type_size(ty)?;
                let value = self.evaluate(a)?;
                if size >= 8 {
                    value
                } else {
                    value & ((1i64 << (size * 8)) - 1)
                }
            }
            (Operator::Ptr, [a]) => {
                let target = self.deref_target(a)?;
                let raw = self.state.read_safe(target.address, target.size);
                if target.signed {
                    sign_extend(raw, target.size)
                } else {
                    raw as i64
                }
            }
            (Operator::Ref, [a]) => match a.as_ident() {
                Some(id) => {
                    let ident = self.ident(id)?;
                    self.state.var_address(ident)? as i64
                }
                None => {
                    return Err(EmulationError::UnimplementedExpression(
                        self.routine.render_expr(expr),
                    ))
                }
            },
            (Operator::SizeOf | Operator::Custom(_), _) => {
                return Err(EmulationError::UnimplementedOperator(self.routine.render_expr(expr)))
            }
            _ => {
                return Err(EmulationError::UnimplementedExpression(
                    self.routine.render_expr(expr),
                ))
            }
        };
        Ok(value)
    }

    /// Resolve the address and width of `*operand`.
    ///
    /// The width is the base-type size of a bare pointer identifier, of a
    /// cast's target type (read sign-extended at the cast's inner value), or
    /// of the first identifier among the operands of pointer arithmetic.
    /// Anything else uses the default pointer size.
    pub fn deref_target(&mut self, operand: &Expr) -> EmulationResult<DerefTarget> {
        match &operand.kind {
            ExprKind::Ident(id) => {
                let size = self.state.base_type_size(&self.ident(*id)?.ty)?;
                let address = self.evaluate(operand)? as u64;
                Ok(DerefTarget {
                    address,
                    size,
                    signed: false,
                })
            }
            ExprKind::Op {
                op: Operator::Cast(ty),
                operands,
            } => {
                let inner = operands.first().ok_or_else(|| {
                    EmulationError::UnimplementedExpression(self.routine.render_expr(operand))
                })?;
                let size = self.state.base_type_size(ty)?;
                let address = self.evaluate(inner)? as u64;
                Ok(DerefTarget {
                    address,
                    size,
                    signed: true,
                })
            }
            ExprKind::Op { .. } => {
                let size = match operand.base_pointer() {
                    Some(id) => self.state.base_type_size(&self.ident(id)?.ty)?,
                    None => {
                        let size = self.default_pointer_size(operand)?;
                        warn!(
                            "no base pointer in {}, reading {} bytes",
                            self.routine.render_expr(operand),
                            size
                        );
                        size
                    }
                };
                let address = self.evaluate(operand)? as u64;
                Ok(DerefTarget {
                    address,
                    size,
                    signed: false,
                })
            }
            ExprKind::Int(_) | ExprKind::Ptr(_) => {
                let size = self.default_pointer_size(operand)?;
                let address = self.evaluate(operand)? as u64;
                warn!("read with fixed size ({}) at address {:#x}", size, address);
                Ok(DerefTarget {
                    address,
                    size,
                    signed: false,
                })
            }
            ExprKind::Predicate(_) | ExprKind::Call(_) => Err(EmulationError::UnimplementedExpression(
                format!("*{}", self.routine.render_expr(operand)),
            )),
        }
    }

    fn default_pointer_size(&self, operand: &Expr) -> EmulationResult<usize> {
        match self.state.pointer_size() {
            0 => Err(EmulationError::NotAPointerType(self.routine.render_expr(operand))),
            size => Ok(size),
        }
    }

    /// Execute `lhs = rhs`. The right-hand side is evaluated first.
    pub fn assign(&mut self, lhs: &Expr, rhs: &Expr) -> EmulationResult<()> {
        let value = self.evaluate(rhs)? as u64;
        if let Some(inner) = lhs.deref_operand() {
            let target = self.deref_target(inner)?;
            return self.state.write(target.address, value, target.size);
        }
        match lhs.as_ident() {
            Some(id) => {
                let ident = self.ident(id)?;
                self.state.set_var_value(ident, value)
            }
            None => Err(EmulationError::UnsupportedAssignment(format!(
                "{} = {}",
                self.routine.render_expr(lhs),
                self.routine.render_expr(rhs)
            ))),
        }
    }

    /// Execute a call.
    ///
    /// A statically resolved callee goes through the simulator chain and
    /// its result lands in the return register. A computed target is
    /// evaluated into the next-handler register instead: such calls leave
    /// the routine for good.
    pub fn call(&mut self, call: &CallExpr) -> EmulationResult<()> {
        match &call.callee {
            Some(callee) => {
                let site = CallSite::new(callee, &call.args);
                match self.simulate(&site)? {
                    Some(value) => {
                        self.state.set_register(regs::RAX, value as u64);
                        Ok(())
                    }
                    None => Err(EmulationError::UnresolvedCallTarget(
                        self.routine.render_call(call),
                    )),
                }
            }
            None => {
                let target = self.evaluate(&call.callsite)?;
                self.state.set_register(regs::NEXT_HANDLER, target as u64);
                Ok(())
            }
        }
    }

    /// Ask each simulator in turn; the first to answer wins.
    pub fn simulate(&mut self, site: &CallSite<'_>) -> EmulationResult<Option<i64>> {
        let simulators = self.simulators;
        for simulator in simulators {
            if let Some(value) = simulator.simulate(site, self)? {
                return Ok(Some(value));
            }
        }
        Ok(None)
    }

    fn ident(&self, id: IdentId) -> EmulationResult<&'a Identifier> {
        self.routine
            .get_ident(id)
            .ok_or_else(|| EmulationError::UnimplementedExpression(format!("<ident #{}>", id.0)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::PagedMemory;
    use crate::simulation::LibcSimulator;
    use decemu_ast::{RoutineBuilder, TypeDatabase};
    use std::sync::Arc;

    struct Fixture {
        routine: Routine,
        state: MachineState,
        simulators: Vec<Box<dyn CallSimulator>>,
        log: OutputLog,
    }

    impl Fixture {
        fn new(build: impl FnOnce(&mut RoutineBuilder)) -> Self {
            let mut b = RoutineBuilder::new("f", 0x401000);
            build(&mut b);
            let routine = b.finish(vec![]).unwrap();
            let mut state = MachineState::new(Arc::new(TypeDatabase::new()), PagedMemory::default());
            state.set_register(regs::RBP, 0x7fff_0000);
            state.allocate_stack_space().unwrap();
            state.allocate(0x60_0000, 0x1000).unwrap();
            Self {
                routine,
                state,
                simulators: vec![Box::new(LibcSimulator::new())],
                log: OutputLog::new(),
            }
        }

        fn eval(&mut self) -> Evaluator<'_> {
            Evaluator::new(&self.routine, &mut self.state, &self.simulators, &mut self.log)
        }

        fn id(&self, name: &str) -> Expr {
            Expr::ident(self.routine.find_ident(name).unwrap())
        }
    }

    fn bin(op: Operator, a: Expr, b: Expr) -> Expr {
        Expr::binary(op, a, b)
    }

    #[test]
    fn test_arithmetic_wraps() {
        let mut f = Fixture::new(|_| {});
        let mut ev = f.eval();
        assert_eq!(ev.evaluate(&bin(Operator::Add, Expr::int(i64::MAX), Expr::int(1))).unwrap(), i64::MIN);
        assert_eq!(ev.evaluate(&bin(Operator::Mul, Expr::int(-3), Expr::int(7))).unwrap(), -21);
        assert_eq!(ev.evaluate(&bin(Operator::Div, Expr::int(-7), Expr::int(2))).unwrap(), -3);
        assert_eq!(ev.evaluate(&bin(Operator::Rem, Expr::int(-7), Expr::int(2))).unwrap(), -1);
        assert_eq!(ev.evaluate(&Expr::unary(Operator::Not, Expr::int(0))).unwrap(), -1);
        assert!(matches!(
            ev.evaluate(&bin(Operator::Div, Expr::int(1), Expr::int(0))),
            Err(EmulationError::DivisionByZero(_))
        ));
    }

    #[test]
    fn test_shifts() {
        let mut f = Fixture::new(|_| {});
        let mut ev = f.eval();
        assert_eq!(ev.evaluate(&bin(Operator::Shr, Expr::int(-16), Expr::int(2))).unwrap(), -4);
        assert_eq!(
            ev.evaluate(&bin(Operator::UShr, Expr::int(-1), Expr::int(60))).unwrap(),
            0xF
        );
        assert_eq!(ev.evaluate(&bin(Operator::Shl, Expr::int(1), Expr::int(65))).unwrap(), 2);
    }

    #[test]
    fn test_comparisons_are_signed() {
        let mut f = Fixture::new(|_| {});
        let mut ev = f.eval();
        assert_eq!(ev.evaluate(&bin(Operator::Lt, Expr::int(-1), Expr::int(1))).unwrap(), 1);
        assert_eq!(ev.evaluate(&bin(Operator::Ge, Expr::int(-1), Expr::int(1))).unwrap(), 0);
        assert_eq!(ev.evaluate(&Expr::predicate(Expr::int(42))).unwrap(), 1);
        assert_eq!(ev.evaluate(&Expr::unary(Operator::LogNot, Expr::int(42))).unwrap(), 0);
    }

    #[test]
    fn test_short_circuit_skips_failing_operand() {
        let mut f = Fixture::new(|_| {});
        let mut ev = f.eval();
        let boom = bin(Operator::Div, Expr::int(1), Expr::int(0));
        assert_eq!(ev.evaluate(&bin(Operator::LogAnd, Expr::int(0), boom.clone())).unwrap(), 0);
        assert_eq!(ev.evaluate(&bin(Operator::LogOr, Expr::int(3), boom.clone())).unwrap(), 1);
        assert_eq!(ev.evaluate(&Expr::cond(Expr::int(1), Expr::int(5), boom)).unwrap(), 5);
    }

    #[test]
    fn test_cast_masks() {
        let mut f = Fixture::new(|_| {});
        let mut ev = f.eval();
        assert_eq!(ev.evaluate(&Expr::cast("unsigned char", Expr::int(0x1FF))).unwrap(), 0xFF);
        assert_eq!(ev.evaluate(&Expr::cast("int", Expr::int(-1))).unwrap(), 0xFFFF_FFFF);
        assert_eq!(ev.evaluate(&Expr::cast("long", Expr::int(-1))).unwrap(), -1);
        assert!(matches!(
            ev.evaluate(&Expr::cast("struct x", Expr::int(1))),
            Err(EmulationError::UnknownType(_))
        ));
    }

    #[test]
    fn test_deref_cast_sign_extends() {
        let mut f = Fixture::new(|b| {
            b.global("p", "char*", 0x60_0100);
        });
        f.state.write(0x60_0200, 0xFFFE, 2).unwrap();
        f.state.write(0x60_0100, 0x60_0200, 8).unwrap();
        let p = f.id("p");
        let mut ev = f.eval();

        assert_eq!(ev.evaluate(&Expr::deref(Expr::cast("short*", p.clone()))).unwrap(), -2);
        // Bare identifier: base type of `char*`, zero-extended.
        assert_eq!(ev.evaluate(&Expr::deref(p)).unwrap(), 0xFE);
    }

    #[test]
    fn test_deref_uses_base_pointer_of_arithmetic() {
        let mut f = Fixture::new(|b| {
            b.global("tab", "int*", 0x60_0000);
            b.global("i", "long", 0x60_0008);
        });
        f.state.write(0x60_0000, 0x60_0100, 8).unwrap();
        f.state.write(0x60_0008, 4, 8).unwrap();
        f.state.write(0x60_0104, 0xAABB_CCDD_1122_3344, 8).unwrap();
        let (tab, i) = (f.id("tab"), f.id("i"));
        let mut ev = f.eval();

        // The first identifier, `i`, is not a pointer: default pointer size.
        let e = Expr::deref(bin(Operator::Add, i.clone(), tab.clone()));
        assert_eq!(ev.evaluate(&e).unwrap(), 0xAABB_CCDD_1122_3344_u64 as i64);

        let e = Expr::deref(bin(Operator::Add, tab, i));
        assert_eq!(ev.evaluate(&e).unwrap(), 0x1122_3344);
    }

    #[test]
    fn test_deref_of_unmapped_is_zero() {
        let mut f = Fixture::new(|_| {});
        let mut ev = f.eval();
        assert_eq!(ev.evaluate(&Expr::deref(Expr::ptr(0xdead_0000))).unwrap(), 0);
        assert_eq!(ev.evaluate(&Expr::deref(Expr::int(0x60_0000))).unwrap(), 0);
    }

    #[test]
    fn test_ref_and_locals() {
        let mut f = Fixture::new(|b| {
            b.local("x", "int", -0x14);
            b.register("eax", "int", regs::RAX);
        });
        let (x, eax) = (f.id("x"), f.id("eax"));
        let mut ev = f.eval();

        assert_eq!(
            ev.evaluate(&Expr::addr_of(x.clone())).unwrap(),
            0x7fff_0000 - 0x14 + 8
        );
        assert!(matches!(
            ev.evaluate(&Expr::addr_of(Expr::int(1))),
            Err(EmulationError::UnimplementedExpression(_))
        ));
        assert!(matches!(
            ev.evaluate(&Expr::addr_of(eax.clone())),
            Err(EmulationError::UnsupportedIdentifierClass(_))
        ));

        // Unset register reads as 0.
        assert_eq!(ev.evaluate(&eax).unwrap(), 0);

        ev.assign(&x, &Expr::int(-5)).unwrap();
        assert_eq!(ev.evaluate(&x).unwrap(), 0xFFFF_FFFB);
        ev.assign(&eax, &Expr::int(0x1_0000_0002)).unwrap();
        assert_eq!(ev.state().register(regs::RAX), Some(2));
    }

    #[test]
    fn test_assign_through_pointer() {
        let mut f = Fixture::new(|b| {
            b.global("p", "short*", 0x60_0000);
            b.global("q", "char*", 0x60_0008);
        });
        f.state.write(0x60_0000, 0x60_0100, 8).unwrap();
        f.state.write(0x60_0008, 0x60_0200, 8).unwrap();
        f.state.write(0x60_0100, u64::MAX, 8).unwrap();
        let (p, q) = (f.id("p"), f.id("q"));
        let mut ev = f.eval();

        ev.assign(&Expr::deref(p), &Expr::int(0x12345)).unwrap();
        assert_eq!(ev.state().read(0x60_0100, 8).unwrap(), 0xFFFF_FFFF_FFFF_2345);

        ev.assign(&Expr::deref(Expr::cast("int*", q)), &Expr::int(-1)).unwrap();
        assert_eq!(ev.state().read(0x60_0200, 8).unwrap(), 0xFFFF_FFFF);

        assert!(matches!(
            ev.assign(&Expr::int(1), &Expr::int(2)),
            Err(EmulationError::UnsupportedAssignment(_))
        ));
    }

    #[test]
    fn test_unimplemented_operators() {
        let mut f = Fixture::new(|_| {});
        let mut ev = f.eval();
        assert!(matches!(
            ev.evaluate(&Expr::unary(Operator::SizeOf, Expr::int(1))),
            Err(EmulationError::UnimplementedOperator(_))
        ));
        assert!(matches!(
            ev.evaluate(&Expr::op(Operator::Custom("ROL".into()), vec![Expr::int(1)])),
            Err(EmulationError::UnimplementedOperator(_))
        ));
        assert!(matches!(
            ev.evaluate(&Expr::op(Operator::Add, vec![Expr::int(1)])),
            Err(EmulationError::UnimplementedExpression(_))
        ));
    }

    #[test]
    fn test_calls() {
        let mut f = Fixture::new(|_| {});
        let mut ev = f.eval();

        let time = CallExpr::direct("→time", None, vec![Expr::int(0)]);
        assert_eq!(ev.evaluate(&Expr::call(time)).unwrap(), 42);

        let unknown = CallExpr::direct("sub_401234", Some(0x401234), vec![]);
        ev.state_mut().set_register(regs::RAX, 7);
        assert!(matches!(
            ev.call(&unknown),
            Err(EmulationError::UnresolvedCallTarget(_))
        ));
        assert_eq!(ev.state().register(regs::RAX), Some(7));

        let indirect = CallExpr::indirect(Expr::ptr(0x4012A0), vec![]);
        ev.call(&indirect).unwrap();
        assert_eq!(ev.state().register(regs::NEXT_HANDLER), Some(0x4012A0));
    }
}
