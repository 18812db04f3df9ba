//! Simulator for a linked-list stack machine.
//!
//! Some virtualized programs keep their operand stack as a singly linked
//! list of heap chunks and manipulate it through a handful of small
//! routines. Simulating those routines on the host, and logging each
//! operation, turns a run of the handler chain into a readable listing of
//! the virtual machine's program.
//!
//! Chunk layout: the link to the previous head at +0 (8 bytes), the value
//! at +8 (4 bytes).

use crate::eval::Evaluator;
use crate::log::OutputLog;
use crate::simulation::{normalize_name, CallSimulator, CallSite};
use crate::{EmulationError, EmulationResult};
use decemu_ast::{Expr, ExprKind, Routine, StmtId, StmtKind};
use log::{debug, trace};
use std::cell::Cell;

/// Upper bound on list links followed before giving up on a corrupt list.
const MAX_LINKS: u64 = 1 << 20;

/// Handler names and allocator parameters.
#[derive(Debug, Clone)]
pub struct StackMachineLayout {
    /// `push(stack_ptr, value)`
    pub push: String,
    /// `pop(stack_ptr) -> value`
    pub pop: String,
    /// `get(stack_ptr, index) -> value`
    pub get: String,
    /// `set(stack_ptr, index, value) -> element`
    pub set: String,
    pub swap: String,
    /// First address handed out by the chunk allocator.
    pub chunk_base: u64,
    pub chunk_size: u64,
    /// First character returned by `getchar`.
    pub first_char: u8,
}

impl Default for StackMachineLayout {
    fn default() -> Self {
        Self {
            push: "sub_400AAE".into(),
            pop: "sub_4009D7".into(),
            get: "sub_400D08".into(),
            set: "sub_400D55".into(),
            swap: "sub_402AB2".into(),
            chunk_base: 0x100_0000,
            chunk_size: 16,
            first_char: b'a',
        }
    }
}

/// Simulates the stack-machine handlers and logs each operation.
///
/// After a pop, the next two-way `if` is logged as the test it performs;
/// after two pops, a push of a computed value is logged with its operator.
#[derive(Debug)]
pub struct StackMachineSimulator {
    layout: StackMachineLayout,
    next_chunk: Cell<u64>,
    pops: Cell<usize>,
    current_char: Cell<u8>,
}

impl Default for StackMachineSimulator {
    fn default() -> Self {
        Self::new(StackMachineLayout::default())
    }
}

impl StackMachineSimulator {
    pub fn new(layout: StackMachineLayout) -> Self {
        Self {
            next_chunk: Cell::new(layout.chunk_base),
            pops: Cell::new(0),
            current_char: Cell::new(layout.first_char),
            layout,
        }
    }

    pub fn layout(&self) -> &StackMachineLayout {
        &self.layout
    }

    /// Pops since the last logged test or operation.
    pub fn pending_pops(&self) -> usize {
        self.pops.get()
    }

    fn allocate_chunk(&self, ev: &mut Evaluator<'_>) -> EmulationResult<u64> {
        let chunk = self.next_chunk.get();
        self.next_chunk.set(chunk.wrapping_add(self.layout.chunk_size));
        ev.state_mut().allocate(chunk, self.layout.chunk_size)?;
        Ok(chunk)
    }

    fn push(&self, site: &CallSite<'_>, ev: &mut Evaluator<'_>) -> EmulationResult<i64> {
        let stack_ptr = site.eval_arg(ev, 0)? as u64;
        let value = site.eval_arg(ev, 1)?;
        let chunk = self.allocate_chunk(ev)?;

        let state = ev.state_mut();
        state.write(chunk.wrapping_add(8), value as u64, 4)?;
        let head = state.read(stack_ptr, 8)?;
        state.write(chunk, head, 8)?;
        state.write(stack_ptr, chunk, 8)?;

        ev.log().push_line(format!("S: PUSH {}", value));

        if self.pops.get() == 2 {
            if let Some((op, operands)) = site.arg(1)?.strip_casts().as_op() {
                ev.log()
                    .push_line(format!("  | operation: ({},#op={})", op.symbol(), operands.len()));
                self.pops.set(0);
            }
        }
        Ok(0)
    }

    fn pop(&self, site: &CallSite<'_>, ev: &mut Evaluator<'_>) -> EmulationResult<i64> {
        let stack_ptr = site.eval_arg(ev, 0)? as u64;
        let state = ev.state_mut();
        let head = state.read(stack_ptr, 8)?;
        let value = state.read(head.wrapping_add(8), 4)?;
        let next = state.read(head, 8)?;
        state.write(stack_ptr, next, 8)?;

        ev.log().push_line(format!("S: POP ({})", value));
        self.pops.set(self.pops.get() + 1);
        Ok(value as i64)
    }

    fn get(&self, site: &CallSite<'_>, ev: &mut Evaluator<'_>) -> EmulationResult<i64> {
        let stack_ptr = site.eval_arg(ev, 0)? as u64;
        let index = site.eval_arg(ev, 1)?;
        let element = element_from_end(ev, stack_ptr, index)?;
        let value = ev.state().read(element.wrapping_add(8), 4)?;

        ev.log().push_line(format!("S: GET index:{}", index));
        Ok(value as i64)
    }

    fn set(&self, site: &CallSite<'_>, ev: &mut Evaluator<'_>) -> EmulationResult<i64> {
        let stack_ptr = site.eval_arg(ev, 0)? as u64;
        let index = site.eval_arg(ev, 1)?;
        let value = site.eval_arg(ev, 2)?;
        let element = element_from_end(ev, stack_ptr, index)?;
        ev.state_mut().write(element.wrapping_add(8), value as u64, 4)?;

        ev.log()
            .push_line(format!("S: SET index:{} value:{}", index, value));
        Ok(element as i64)
    }

    /// Log the test performed by a two-way `if` following a pop.
    fn log_test(&self, predicate: &Expr, ev: &mut Evaluator<'_>) -> EmulationResult<()> {
        let predicate = match &predicate.kind {
            ExprKind::Predicate(inner) => inner,
            _ => predicate,
        };
        let Some((op, operands)) = predicate.as_op() else {
            debug!("stack machine: test on a non-operation, not logged");
            return Ok(());
        };

        let holds = ev.evaluate(predicate)? != 0;
        let op = if holds {
            op.symbol().to_string()
        } else {
            match op.negated() {
                Some(negated) => negated.symbol().to_string(),
                None => format!("!{}", op.symbol()),
            }
        };

        let line = match operands.get(1).map(|e| &e.kind) {
            Some(ExprKind::Int(cte)) => format!("S: TEST ({},cte={})", op, cte),
            _ => format!("S: TEST ({},#op={})", op, operands.len()),
        };
        ev.log().push_line(line);
        Ok(())
    }
}

/// Walk `len - 1 - index` links from `stack_ptr`, where `len` counts the
/// stack pointer cell itself. Index 0 is the oldest element.
fn element_from_end(ev: &Evaluator<'_>, stack_ptr: u64, index: i64) -> EmulationResult<u64> {
    let state = ev.state();
    let mut len = 0u64;
    let mut current = stack_ptr;
    while current != 0 {
        if len == MAX_LINKS {
            return Err(EmulationError::MemoryAccessFault {
                address: stack_ptr,
                size: 8,
            });
        }
        current = state.read(current, 8)?;
        len += 1;
    }

    let hops = (len as i64 - 1)
        .checked_sub(index)
        .filter(|hops| *hops >= 0)
        .ok_or_else(|| {
            EmulationError::UnimplementedExpression(format!(
                "stack index {} out of range ({} elements)",
                index,
                len.saturating_sub(1)
            ))
        })?;

    let mut element = stack_ptr;
    for _ in 0..hops {
        element = state.read(element, 8)?;
    }
    Ok(element)
}

impl CallSimulator for StackMachineSimulator {
    fn name(&self) -> &str {
        "stack-machine"
    }

    fn before_routine(&self, routine: &Routine, log: &mut OutputLog) {
        self.pops.set(0);
        if normalize_name(&routine.name) == self.layout.swap {
            log.push_line("S: SWAP");
        }
    }

    fn before_statement(&self, stmt: StmtId, ev: &mut Evaluator<'_>) -> EmulationResult<()> {
        if self.pops.get() == 0 {
            return Ok(());
        }
        let routine = ev.routine();
        if let StmtKind::If { branches, default } = &routine.stmt(stmt).kind {
            if branches.len() + default.is_some() as usize <= 2 {
                if let Some(first) = branches.first() {
                    self.log_test(&first.predicate, ev)?;
                }
                self.pops.set(0);
            }
        }
        Ok(())
    }

    fn simulate(&self, site: &CallSite<'_>, ev: &mut Evaluator<'_>) -> EmulationResult<Option<i64>> {
        let name = site.name();
        let value = if name == "getchar" {
            let c = self.current_char.get();
            self.current_char.set(c.wrapping_add(1));
            c as i64
        } else if name == "putchar" {
            trace!("putchar");
            0
        } else if name == self.layout.push {
            self.push(site, ev)?
        } else if name == self.layout.pop {
            self.pop(site, ev)?
        } else if name == self.layout.get {
            self.get(site, ev)?
        } else if name == self.layout.set {
            self.set(site, ev)?
        } else if name == self.layout.swap {
            ev.log().push_line("S: SWAP");
            0
        } else {
            return Ok(None);
        };
        Ok(Some(value))
    }
}
