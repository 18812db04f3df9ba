//! Control-flow graph over structured statements.
//!
//! Nodes are statements of one routine, keyed by [`StmtId`]. Every node has
//! a fallthrough successor (`None` leaves the routine) and, for `if` and
//! loop headers, conditional successors in source order. Conditional
//! successors are always blocks; a block's fallthrough is its first
//! statement.

use crate::{EmulationError, EmulationResult};
use decemu_ast::{Routine, StmtId, StmtKind};
use std::fmt;

/// Outgoing edges of one statement.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Successors {
    /// Fallthrough (or false) successor.
    pub fallthrough: Option<StmtId>,
    /// Conditional targets, in source order.
    pub conditional: Vec<StmtId>,
}

impl Successors {
    /// Number of edge slots: the fallthrough plus each conditional target.
    pub fn slot_count(&self) -> usize {
        1 + self.conditional.len()
    }

    /// Slot 0 is the fallthrough, slots >= 1 are conditional targets.
    pub fn get(&self, slot: usize) -> Option<StmtId> {
        match slot {
            0 => self.fallthrough,
            n => self.conditional.get(n - 1).copied(),
        }
    }
}

/// Innermost enclosing loop while descending into its body.
#[derive(Debug, Clone, Copy)]
struct LoopCtx {
    header: StmtId,
    exit: Option<StmtId>,
}

/// A control flow graph for a routine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cfg {
    entry: Option<StmtId>,
    edges: Vec<Successors>,
}

impl Cfg {
    /// Builds the graph in one pass over the routine's nested blocks.
    ///
    /// Fails with [`EmulationError::UnimplementedStatement`] on `switch`,
    /// and on an unlabeled `break`/`continue` outside any loop.
    pub fn build(routine: &Routine) -> EmulationResult<Self> {
        let mut cfg = Self {
            entry: routine.entry(),
            edges: vec![Successors::default(); routine.len()],
        };
        let body = routine.body();
        cfg.edges[body.index()].fallthrough = routine.entry();
        cfg.build_block(routine, body, None, None)?;
        Ok(cfg)
    }

    /// `follow` is where control goes after the block's last statement.
    fn build_block(
        &mut self,
        routine: &Routine,
        block: StmtId,
        follow: Option<StmtId>,
        innermost: Option<LoopCtx>,
    ) -> EmulationResult<()> {
        let stmts = match &routine.stmt(block).kind {
            StmtKind::Block { stmts } => stmts.as_slice(),
            _ => return Ok(()),
        };

        for (i, &id) in stmts.iter().enumerate() {
            let next = stmts.get(i + 1).copied().or(follow);
            let stmt = routine.stmt(id);

            let fallthrough = match &stmt.kind {
                StmtKind::Goto { label } => Some(*label),
                StmtKind::Return(_) | StmtKind::JumpFar { .. } => None,
                StmtKind::Break { label: Some(label) } | StmtKind::Continue { label: Some(label) } => {
                    Some(*label)
                }
                StmtKind::Break { label: None } => match innermost {
                    Some(ctx) => ctx.exit,
                    None => return Err(outside_loop(routine, id)),
                },
                StmtKind::Continue { label: None } => match innermost {
                    Some(ctx) => Some(ctx.header),
                    None => return Err(outside_loop(routine, id)),
                },
                StmtKind::Loop { body, .. } => {
                    self.enter_block(routine, *body, Some(id))?;
                    let ctx = LoopCtx {
                        header: id,
                        exit: next,
                    };
                    self.edges[id.index()].conditional.push(*body);
                    // Back edge: the body's last statement returns to the header.
                    self.build_block(routine, *body, Some(id), Some(ctx))?;
                    next
                }
                StmtKind::If { branches, default } => {
                    for block in branches.iter().map(|b| b.block).chain(*default) {
                        self.edges[id.index()].conditional.push(block);
                        self.enter_block(routine, block, next)?;
                        self.build_block(routine, block, next, innermost)?;
                    }
                    next
                }
                StmtKind::Block { stmts } => {
                    self.build_block(routine, id, next, innermost)?;
                    stmts.first().copied().or(next)
                }
                StmtKind::Switch { .. } => {
                    return Err(EmulationError::UnimplementedStatement(routine.render_stmt(id)))
                }
                StmtKind::Assign { .. }
                | StmtKind::Label { .. }
                | StmtKind::Call(_)
                | StmtKind::Decl { .. } => next,
            };
            self.edges[id.index()].fallthrough = fallthrough;
        }
        Ok(())
    }

    /// Sets a sub-block's own fallthrough: its first statement, or
    /// `if_empty` when it has none.
    fn enter_block(&mut self, routine: &Routine, block: StmtId, if_empty: Option<StmtId>) -> EmulationResult<()> {
        let first = match &routine.stmt(block).kind {
            StmtKind::Block { stmts } => stmts.first().copied(),
            _ => {
                return Err(EmulationError::UnimplementedStatement(
                    routine.render_stmt(block),
                ))
            }
        };
        self.edges[block.index()].fallthrough = first.or(if_empty);
        Ok(())
    }

    /// First statement of the routine body.
    pub fn entry(&self) -> Option<StmtId> {
        self.entry
    }

    /// Fallthrough successor.
    pub fn next(&self, id: StmtId) -> Option<StmtId> {
        self.edges.get(id.index()).and_then(|s| s.fallthrough)
    }

    /// Successor when the statement's (first) predicate holds.
    pub fn next_true(&self, id: StmtId) -> Option<StmtId> {
        self.nth_next(id, 0)
    }

    /// The `n`-th conditional successor (0-based).
    pub fn nth_next(&self, id: StmtId, n: usize) -> Option<StmtId> {
        self.edges
            .get(id.index())
            .and_then(|s| s.conditional.get(n).copied())
    }

    /// All outgoing edges of a statement.
    pub fn successors(&self, id: StmtId) -> Option<&Successors> {
        self.edges.get(id.index())
    }

    /// Number of nodes (statements of the routine).
    pub fn len(&self) -> usize {
        self.edges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }
}

fn outside_loop(routine: &Routine, id: StmtId) -> EmulationError {
    EmulationError::UnimplementedStatement(format!("{} (outside of a loop)", routine.render_stmt(id)))
}

impl fmt::Display for Cfg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.entry {
            Some(entry) => writeln!(f, "entry: #{}", entry.0)?,
            None => writeln!(f, "entry: <none>")?,
        }
        for (i, succ) in self.edges.iter().enumerate() {
            if succ.fallthrough.is_none() && succ.conditional.is_empty() {
                continue;
            }
            write!(f, "#{} -> ", i)?;
            match succ.fallthrough {
                Some(ft) => write!(f, "#{}", ft.0)?,
                None => write!(f, "exit")?,
            }
            if !succ.conditional.is_empty() {
                let targets: Vec<String> = succ.conditional.iter().map(|t| format!("#{}", t.0)).collect();
                write!(f, " | {}", targets.join(", "))?;
            }
            writeln!(f)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use decemu_ast::{Expr, Operator, RoutineBuilder};

    fn lt(a: Expr, b: i64) -> Expr {
        Expr::binary(Operator::Lt, a, Expr::int(b))
    }

    #[test]
    fn test_straight_line() {
        let mut b = RoutineBuilder::new("f", 0);
        let x = b.local("x", "int", -4);
        let a = b.assign(Expr::ident(x), Expr::int(0));
        let r = b.ret(Some(Expr::ident(x)));
        let routine = b.finish(vec![a, r]).unwrap();
        let cfg = Cfg::build(&routine).unwrap();

        assert_eq!(cfg.entry(), Some(a));
        assert_eq!(cfg.next(a), Some(r));
        assert_eq!(cfg.next(r), None);
    }

    #[test]
    fn test_empty_body() {
        let routine = RoutineBuilder::new("f", 0).finish(vec![]).unwrap();
        let cfg = Cfg::build(&routine).unwrap();
        assert_eq!(cfg.entry(), None);
    }

    #[test]
    fn test_loop_back_edge() {
        let mut b = RoutineBuilder::new("f", 0);
        let i = b.local("i", "int", -4);
        let inc = b.compound_assign(Operator::Add, Expr::ident(i), Expr::int(1));
        let lp = b.while_loop(lt(Expr::ident(i), 4), vec![inc]);
        let r = b.ret(None);
        let routine = b.finish(vec![lp, r]).unwrap();
        let cfg = Cfg::build(&routine).unwrap();

        let body = cfg.next_true(lp).unwrap();
        assert_eq!(cfg.next(body), Some(inc));
        assert_eq!(cfg.next(inc), Some(lp));
        assert_eq!(cfg.next(lp), Some(r));
    }

    #[test]
    fn test_empty_loop_body_spins_on_header() {
        let mut b = RoutineBuilder::new("f", 0);
        let lp = b.while_loop(Expr::int(0), vec![]);
        let routine = b.finish(vec![lp]).unwrap();
        let cfg = Cfg::build(&routine).unwrap();

        let body = cfg.next_true(lp).unwrap();
        assert_eq!(cfg.next(body), Some(lp));
        assert_eq!(cfg.next(lp), None);
    }

    #[test]
    fn test_if_successors() {
        let mut b = RoutineBuilder::new("f", 0);
        let x = b.local("x", "int", -4);
        let a1 = b.assign(Expr::ident(x), Expr::int(1));
        let a2 = b.assign(Expr::ident(x), Expr::int(2));
        let stm = b.if_else(
            vec![(lt(Expr::ident(x), 0), vec![a1]), (lt(Expr::ident(x), 9), vec![a2])],
            None,
        );
        let r = b.ret(None);
        let routine = b.finish(vec![stm, r]).unwrap();
        let cfg = Cfg::build(&routine).unwrap();

        assert_eq!(cfg.successors(stm).unwrap().slot_count(), 3);
        assert_eq!(cfg.next(stm), Some(r));
        let b0 = cfg.nth_next(stm, 0).unwrap();
        let b1 = cfg.nth_next(stm, 1).unwrap();
        assert_eq!(cfg.next(b0), Some(a1));
        assert_eq!(cfg.next(b1), Some(a2));
        assert_eq!(cfg.next(a1), Some(r));
        assert_eq!(cfg.next(a2), Some(r));
        assert_eq!(cfg.nth_next(stm, 2), None);
    }

    #[test]
    fn test_empty_if_branch_falls_through() {
        let mut b = RoutineBuilder::new("f", 0);
        let stm = b.if_then(Expr::int(1), vec![]);
        let r = b.ret(None);
        let routine = b.finish(vec![stm, r]).unwrap();
        let cfg = Cfg::build(&routine).unwrap();

        let block = cfg.next_true(stm).unwrap();
        assert_eq!(cfg.next(block), Some(r));
    }

    #[test]
    fn test_break_and_continue_resolve_to_innermost_loop() {
        let mut b = RoutineBuilder::new("f", 0);
        let i = b.local("i", "int", -4);
        let brk = b.brk();
        let cont = b.cont();
        let guard = b.if_else(
            vec![(lt(Expr::ident(i), 2), vec![brk])],
            Some(vec![cont]),
        );
        let inner = b.while_loop(Expr::int(1), vec![guard]);
        let after_inner = b.compound_assign(Operator::Add, Expr::ident(i), Expr::int(1));
        let outer = b.while_loop(lt(Expr::ident(i), 8), vec![inner, after_inner]);
        let r = b.ret(None);
        let routine = b.finish(vec![outer, r]).unwrap();
        let cfg = Cfg::build(&routine).unwrap();

        assert_eq!(cfg.next(inner), Some(after_inner));
        assert_eq!(cfg.next(brk), cfg.next(inner));
        assert_eq!(cfg.next(cont), Some(inner));
        assert_eq!(cfg.next(after_inner), Some(outer));
        assert_eq!(cfg.next(outer), Some(r));
    }

    #[test]
    fn test_labeled_jumps() {
        let mut b = RoutineBuilder::new("f", 0);
        let l = b.label("LABEL_0");
        let g = b.goto(l);
        let bl = b.brk_to(l);
        let lp = b.while_loop(Expr::int(1), vec![bl]);
        let routine = b.finish(vec![l, lp, g]).unwrap();
        let cfg = Cfg::build(&routine).unwrap();

        assert_eq!(cfg.next(g), Some(l));
        assert_eq!(cfg.next(bl), Some(l));
        assert_eq!(cfg.next(l), Some(lp));
    }

    #[test]
    fn test_nested_block() {
        let mut b = RoutineBuilder::new("f", 0);
        let r1 = b.label("A");
        let inner = b.block(vec![r1]);
        let empty = b.block(vec![]);
        let r = b.ret(None);
        let routine = b.finish(vec![inner, empty, r]).unwrap();
        let cfg = Cfg::build(&routine).unwrap();

        assert_eq!(cfg.next(inner), Some(r1));
        assert_eq!(cfg.next(r1), Some(empty));
        assert_eq!(cfg.next(empty), Some(r));
    }

    #[test]
    fn test_rejections() {
        let mut b = RoutineBuilder::new("f", 0);
        let brk = b.brk();
        let routine = b.finish(vec![brk]).unwrap();
        assert!(matches!(
            Cfg::build(&routine),
            Err(EmulationError::UnimplementedStatement(_))
        ));

        let mut b = RoutineBuilder::new("f", 0);
        let sw = b.switch(Expr::int(1), vec![(vec![1], vec![])], None);
        let routine = b.finish(vec![sw]).unwrap();
        assert!(matches!(
            Cfg::build(&routine),
            Err(EmulationError::UnimplementedStatement(_))
        ));
    }

    #[test]
    fn test_display_lists_edges() {
        let mut b = RoutineBuilder::new("f", 0);
        let stm = b.if_then(Expr::int(1), vec![]);
        let routine = b.finish(vec![stm]).unwrap();
        let cfg = Cfg::build(&routine).unwrap();
        let text = cfg.to_string();
        assert!(text.starts_with(&format!("entry: #{}", stm.0)));
        assert!(text.contains(&format!("#{} -> exit | #0", stm.0)));
    }
}
