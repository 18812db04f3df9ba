//! Call simulation.
//!
//! Calls to statically resolved routines are not emulated. Instead, a chain
//! of [`CallSimulator`]s is consulted, most specific first, and the first
//! one that recognizes the callee produces the return value on the host.

use crate::eval::Evaluator;
use crate::log::OutputLog;
use crate::memory::Access;
use crate::{EmulationError, EmulationResult};
use decemu_ast::{Callee, Expr, Routine, StmtId};
use std::cell::Cell;
use std::fmt;

/// Maximum string length scanned by `strlen`.
const MAX_STRING_LEN: usize = 1 << 20;

/// Strip the decompiler's import marker and leading underscores.
///
/// `→__memcpy` and `_memcpy` both become `memcpy`.
pub fn normalize_name(name: &str) -> &str {
    name.trim_start_matches('→').trim_start_matches('_')
}

/// A resolved call as seen by a simulator.
#[derive(Debug, Clone, Copy)]
pub struct CallSite<'c> {
    /// Callee name as printed by the decompiler.
    pub raw_name: &'c str,
    /// Callee address, when known.
    pub address: Option<u64>,
    /// Unevaluated argument expressions.
    pub args: &'c [Expr],
}

impl<'c> CallSite<'c> {
    pub fn new(callee: &'c Callee, args: &'c [Expr]) -> Self {
        Self {
            raw_name: &callee.name,
            address: callee.address,
            args,
        }
    }

    /// Normalized callee name.
    pub fn name(&self) -> &'c str {
        normalize_name(self.raw_name)
    }

    /// The `n`-th argument expression.
    pub fn arg(&self, n: usize) -> EmulationResult<&'c Expr> {
        self.args.get(n).ok_or_else(|| {
            EmulationError::UnimplementedExpression(format!(
                "{}: missing argument {}",
                self.raw_name, n
            ))
        })
    }

    /// Evaluate the `n`-th argument.
    pub fn eval_arg(&self, ev: &mut Evaluator<'_>, n: usize) -> EmulationResult<i64> {
        ev.evaluate(self.arg(n)?)
    }
}

/// Host-side replacement for routines the emulator does not execute.
///
/// Simulators take `&self` because the evaluator they are handed may call
/// back into the chain; per-run state lives behind interior mutability.
pub trait CallSimulator: fmt::Debug {
    /// Short name used in logs.
    fn name(&self) -> &str;

    /// Called once per emulated routine, before its first statement.
    fn before_routine(&self, _routine: &Routine, _log: &mut OutputLog) {}

    /// Called before each statement is dispatched.
    fn before_statement(&self, _stmt: StmtId, _ev: &mut Evaluator<'_>) -> EmulationResult<()> {
        Ok(())
    }

    /// Simulate a call. `Ok(None)` passes the call down the chain.
    fn simulate(&self, site: &CallSite<'_>, ev: &mut Evaluator<'_>) -> EmulationResult<Option<i64>>;
}

/// Simulates the handful of libc routines handler code typically calls.
///
/// `time` and `srand` return fixed values so that runs are reproducible;
/// `rand` is a deterministic linear congruential generator.
#[derive(Debug)]
pub struct LibcSimulator {
    seed: Cell<u32>,
}

impl Default for LibcSimulator {
    fn default() -> Self {
        Self { seed: Cell::new(1) }
    }
}

impl LibcSimulator {
    pub fn new() -> Self {
        Self::default()
    }

    fn next_rand(&self) -> i64 {
        let next = self.seed.get().wrapping_mul(1_103_515_245).wrapping_add(12345);
        self.seed.set(next);
        ((next >> 16) & 0x7FFF) as i64
    }

    fn memcpy(site: &CallSite<'_>, ev: &mut Evaluator<'_>) -> EmulationResult<i64> {
        let dst = site.eval_arg(ev, 0)?;
        let src = site.eval_arg(ev, 1)?;
        let n = byte_count(dst, site.eval_arg(ev, 2)?)?;
        ev.state_mut().copy(src as u64, dst as u64, n)?;
        Ok(dst)
    }

    fn memset(site: &CallSite<'_>, ev: &mut Evaluator<'_>) -> EmulationResult<i64> {
        let dst = site.eval_arg(ev, 0)?;
        let c = site.eval_arg(ev, 1)? as u8;
        let n = byte_count(dst, site.eval_arg(ev, 2)?)?;
        let memory = &mut ev.state_mut().memory;
        memory.check_range(dst as u64, n, Access::WRITE)?;
        memory.write_bytes(dst as u64, &vec![c; n])?;
        Ok(dst)
    }

    fn strlen(site: &CallSite<'_>, ev: &mut Evaluator<'_>) -> EmulationResult<i64> {
        let s = site.eval_arg(ev, 0)? as u64;
        let state = ev.state();
        for len in 0..MAX_STRING_LEN {
            if state.read(s.wrapping_add(len as u64), 1)? == 0 {
                return Ok(len as i64);
            }
        }
        Err(EmulationError::MemoryAccessFault {
            address: s,
            size: MAX_STRING_LEN,
        })
    }
}

impl CallSimulator for LibcSimulator {
    fn name(&self) -> &str {
        "libc"
    }

    fn simulate(&self, site: &CallSite<'_>, ev: &mut Evaluator<'_>) -> EmulationResult<Option<i64>> {
        let value = match site.name() {
            "time" => 42,
            "srand" => {
                self.seed.set(site.eval_arg(ev, 0)? as u32);
                37
            }
            "rand" => self.next_rand(),
            "memcpy" => Self::memcpy(site, ev)?,
            "memset" => Self::memset(site, ev)?,
            "strlen" => Self::strlen(site, ev)?,
            _ => return Ok(None),
        };
        Ok(Some(value))
    }
}

/// A negative length faults at the destination instead of wrapping.
fn byte_count(dst: i64, n: i64) -> EmulationResult<usize> {
    usize::try_from(n).map_err(|_| EmulationError::MemoryAccessFault {
        address: dst as u64,
        size: n as usize,
    })
}
