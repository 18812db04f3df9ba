//! Emulator executor - walks a routine's control-flow graph.

use crate::cfg::Cfg;
use crate::eval::Evaluator;
use crate::log::{ExecutionTrace, OutputLog};
use crate::simulation::{CallSimulator, LibcSimulator};
use crate::state::regs;
use crate::{EmulationError, EmulationResult, MachineState};
use decemu_ast::{Routine, StmtId, StmtKind};
use log::debug;

/// Header line written to the output log before the statement trace.
pub const TRACE_HEADER: &str = "> emulator trace:";

/// Configuration for the emulator.
#[derive(Debug, Clone)]
pub struct EmulatorConfig {
    /// Maximum number of statements to execute per routine. Unbounded when
    /// `None`.
    pub max_steps: Option<usize>,
    /// Mirror every executed statement into the output log.
    pub log_trace: bool,
}

impl Default for EmulatorConfig {
    fn default() -> Self {
        Self {
            max_steps: None,
            log_trace: true,
        }
    }
}

/// The main emulator.
///
/// Holds the configuration and the call simulator chain. Machine state is
/// passed to each run, so one emulator can drive many states.
#[derive(Debug)]
pub struct Emulator {
    config: EmulatorConfig,
    /// Most specific first; the libc simulator is always last.
    simulators: Vec<Box<dyn CallSimulator>>,
}

impl Default for Emulator {
    fn default() -> Self {
        Self::new(EmulatorConfig::default())
    }
}

impl Emulator {
    /// Create an emulator whose only simulator is [`LibcSimulator`].
    pub fn new(config: EmulatorConfig) -> Self {
        Self {
            config,
            simulators: vec![Box::new(LibcSimulator::new())],
        }
    }

    /// Put `simulator` in front of the chain.
    pub fn with_simulator(mut self, simulator: impl CallSimulator + 'static) -> Self {
        self.simulators.insert(0, Box::new(simulator));
        self
    }

    pub fn config(&self) -> &EmulatorConfig {
        &self.config
    }

    /// Simulator names, in consultation order.
    pub fn simulator_names(&self) -> Vec<&str> {
        self.simulators.iter().map(|s| s.name()).collect()
    }

    /// Emulate `routine` from its first statement.
    pub fn emulate(
        &self,
        routine: &Routine,
        state: &mut MachineState,
        log: &mut OutputLog,
    ) -> EmulationResult<ExecutionTrace> {
        let cfg = self.prepare(routine, log)?;
        let entry = cfg.entry();
        self.run(routine, &cfg, entry, state, log)
    }

    /// Emulate `routine` starting at `entry`.
    pub fn emulate_from(
        &self,
        routine: &Routine,
        entry: StmtId,
        state: &mut MachineState,
        log: &mut OutputLog,
    ) -> EmulationResult<ExecutionTrace> {
        if !routine.contains(entry) {
            return Err(EmulationError::MissingEntryPoint(format!(
                "#{} in {}",
                entry.0, routine.name
            )));
        }
        let cfg = self.prepare(routine, log)?;
        self.run(routine, &cfg, Some(entry), state, log)
    }

    fn prepare(&self, routine: &Routine, log: &mut OutputLog) -> EmulationResult<Cfg> {
        for simulator in &self.simulators {
            simulator.before_routine(routine, log);
        }
        Cfg::build(routine)
    }

    fn run(
        &self,
        routine: &Routine,
        cfg: &Cfg,
        entry: Option<StmtId>,
        state: &mut MachineState,
        log: &mut OutputLog,
    ) -> EmulationResult<ExecutionTrace> {
        if self.config.log_trace {
            log.push_line(TRACE_HEADER);
        }

        let mut trace = ExecutionTrace::default();
        let mut ev = Evaluator::new(routine, state, &self.simulators, log);
        let mut current = entry;

        while let Some(id) = current {
            if let Some(max) = self.config.max_steps {
                if trace.statements.len() >= max {
                    return Err(EmulationError::StepLimitExceeded(max));
                }
            }

            let text = routine.render_stmt(id);
            debug!("{}: #{} {}", routine.name, id.0, text);
            if self.config.log_trace {
                ev.log().push_line(format!(" {}", text));
            }
            trace.statements.push(text);

            for simulator in &self.simulators {
                simulator.before_statement(id, &mut ev)?;
            }

            current = self.step(&mut ev, cfg, id, &mut trace)?;
        }

        trace.next_handler = ev.state().register(regs::NEXT_HANDLER);
        Ok(trace)
    }

    /// Execute one statement and return its successor.
    fn step(
        &self,
        ev: &mut Evaluator<'_>,
        cfg: &Cfg,
        id: StmtId,
        trace: &mut ExecutionTrace,
    ) -> EmulationResult<Option<StmtId>> {
        let routine = ev.routine();
        match &routine.stmt(id).kind {
            StmtKind::Goto { .. }
            | StmtKind::Label { .. }
            | StmtKind::Block { .. }
            | StmtKind::Decl { .. }
            | StmtKind::Break { .. }
            | StmtKind::Continue { .. }
            | StmtKind::Return(None) => Ok(cfg.next(id)),

            StmtKind::Return(Some(value)) => {
                let value = ev.evaluate(value)? as u64;
                ev.state_mut().set_register(regs::RAX, value);
                trace.return_value = Some(value);
                Ok(cfg.next(id))
            }

            StmtKind::Assign {
                compound: Some(_), ..
            } => Err(EmulationError::UnsupportedAssignment(routine.render_stmt(id))),

            StmtKind::Assign { lhs, rhs, .. } => {
                ev.assign(lhs, rhs)?;
                Ok(cfg.next(id))
            }

            StmtKind::If { branches, default } => {
                for (i, branch) in branches.iter().enumerate() {
                    if ev.evaluate(&branch.predicate)? != 0 {
                        return Ok(cfg.nth_next(id, i));
                    }
                }
                match default {
                    Some(_) => Ok(cfg.nth_next(id, branches.len())),
                    None => Ok(cfg.next(id)),
                }
            }

            StmtKind::Loop { predicate, .. } => {
                if ev.evaluate(predicate)? != 0 {
                    Ok(cfg.next_true(id))
                } else {
                    Ok(cfg.next(id))
                }
            }

            StmtKind::Call(call) => {
                ev.call(call)?;
                Ok(cfg.next(id))
            }

            StmtKind::JumpFar { target } => {
                let target = ev.evaluate(target)? as u64;
                ev.state_mut().set_register(regs::NEXT_HANDLER, target);
                Ok(cfg.next(id))
            }

            StmtKind::Switch { .. } => Err(EmulationError::UnimplementedStatement(routine.render_stmt(id))),
        }
    }
}
