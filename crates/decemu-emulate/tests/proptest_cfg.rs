//! Property-based tests for graph construction, memory and evaluation.
//!
//! These tests verify that:
//! - Loops always have a back edge from the end of their body
//! - An `if` with N arms and no `else` has N+1 edge slots
//! - Memory copies and sized writes behave like byte arrays
//! - Binary operators agree with wrapping 64-bit arithmetic

use proptest::prelude::*;
use std::sync::Arc;

use decemu_ast::{Expr, Operator, RoutineBuilder, TypeDatabase};
use decemu_emulate::{regs, Cfg, Evaluator, MachineState, OutputLog, PagedMemory};

fn state() -> MachineState {
    let mut state = MachineState::new(Arc::new(TypeDatabase::new()), PagedMemory::default());
    state.set_register(regs::RBP, 0x7fff_0000);
    state.allocate_stack_space().unwrap();
    state
}

fn arb_size() -> impl Strategy<Value = usize> {
    prop::sample::select(vec![1usize, 2, 4, 8])
}

fn arb_binary_op() -> impl Strategy<Value = Operator> {
    prop::sample::select(vec![
        Operator::Add,
        Operator::Sub,
        Operator::Mul,
        Operator::And,
        Operator::Or,
        Operator::Xor,
    ])
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn loop_body_ends_with_back_edge(body_len in 1usize..8) {
        let mut b = RoutineBuilder::new("f", 0);
        let x = b.local("x", "int", -4);
        let body: Vec<_> = (0..body_len)
            .map(|i| b.assign(Expr::ident(x), Expr::int(i as i64)))
            .collect();
        let last = *body.last().unwrap();
        let first = body[0];
        let lp = b.while_loop(Expr::ident(x), body);
        let after = b.ret(None);
        let routine = b.finish(vec![lp, after]).unwrap();
        let cfg = Cfg::build(&routine).unwrap();

        prop_assert_eq!(cfg.next(last), Some(lp));
        prop_assert_eq!(cfg.next(lp), Some(after));
        let body_block = cfg.next_true(lp).unwrap();
        prop_assert_eq!(cfg.next(body_block), Some(first));
    }

    #[test]
    fn if_has_one_slot_per_arm_plus_fallthrough(arms in 1usize..6, with_default in any::<bool>()) {
        let mut b = RoutineBuilder::new("f", 0);
        let x = b.local("x", "int", -4);
        let branches: Vec<_> = (0..arms)
            .map(|i| {
                let s = b.assign(Expr::ident(x), Expr::int(i as i64));
                (Expr::binary(Operator::Eq, Expr::ident(x), Expr::int(i as i64)), vec![s])
            })
            .collect();
        let default = with_default.then(|| vec![b.ret(None)]);
        let stm = b.if_else(branches, default);
        let routine = b.finish(vec![stm]).unwrap();
        let cfg = Cfg::build(&routine).unwrap();

        let succ = cfg.successors(stm).unwrap();
        let expected = arms + 1 + with_default as usize;
        prop_assert_eq!(succ.slot_count(), expected);
        prop_assert_eq!(succ.fallthrough, None);
    }

    #[test]
    fn copy_reproduces_bytes(
        bytes in prop::collection::vec(any::<u8>(), 1..512),
        src_off in 0u64..0x800,
        dst_off in 0u64..0x800,
    ) {
        let mut state = state();
        state.allocate(0x60_0000, 0x2000).unwrap();
        let src = 0x60_0000 + src_off;
        let dst = 0x60_1000 + dst_off;
        state.memory.write_bytes(src, &bytes).unwrap();

        state.copy(src, dst, bytes.len()).unwrap();

        let mut out = vec![0u8; bytes.len()];
        state.memory.read_bytes(dst, &mut out).unwrap();
        prop_assert_eq!(out, bytes);
    }

    #[test]
    fn sized_write_truncates(value in any::<u64>(), size in arb_size(), offset in 0u64..0xFF8) {
        let mut state = state();
        state.allocate(0x60_0000, 0x1000).unwrap();
        let address = 0x60_0000 + offset;
        state.write(address, value, size).unwrap();

        let mask = if size == 8 { u64::MAX } else { (1u64 << (size * 8)) - 1 };
        prop_assert_eq!(state.read(address, size).unwrap(), value & mask);
    }

    #[test]
    fn binary_ops_wrap(a in any::<i64>(), b in any::<i64>(), op in arb_binary_op()) {
        let routine = RoutineBuilder::new("f", 0).finish(vec![]).unwrap();
        let mut state = state();
        let mut log = OutputLog::new();
        let mut ev = Evaluator::new(&routine, &mut state, &[], &mut log);

        let expected = match &op {
            Operator::Add => a.wrapping_add(b),
            Operator::Sub => a.wrapping_sub(b),
            Operator::Mul => a.wrapping_mul(b),
            Operator::And => a & b,
            Operator::Or => a | b,
            _ => a ^ b,
        };
        let value = ev.evaluate(&Expr::binary(op, Expr::int(a), Expr::int(b))).unwrap();
        prop_assert_eq!(value, expected);
    }
}
