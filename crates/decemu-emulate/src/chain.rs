//! Multi-round emulation of handler chains.
//!
//! Virtualized code is typically a set of small handlers, each ending with a
//! computed jump to the next one. A [`HandlerChain`] emulates one handler per
//! round and follows the next-handler register to the following one.

use crate::executor::Emulator;
use crate::log::{ExecutionTrace, OutputLog};
use crate::state::regs;
use crate::{EmulationError, EmulationResult, MachineState};
use decemu_ast::Routine;
use log::{info, warn};
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;

/// Looks up decompiled routines by entry address.
pub trait RoutineProvider {
    fn routine_at(&self, address: u64) -> Option<&Routine>;
}

impl RoutineProvider for HashMap<u64, Routine> {
    fn routine_at(&self, address: u64) -> Option<&Routine> {
        self.get(&address)
    }
}

impl RoutineProvider for BTreeMap<u64, Routine> {
    fn routine_at(&self, address: u64) -> Option<&Routine> {
        self.get(&address)
    }
}

impl RoutineProvider for [Routine] {
    fn routine_at(&self, address: u64) -> Option<&Routine> {
        self.iter().find(|r| r.address == address)
    }
}

/// Configuration for a chain run.
#[derive(Debug, Clone)]
pub struct ChainConfig {
    /// Follow the next-handler register after each round. When off, only
    /// the first routine is emulated.
    pub tracer_mode: bool,
    /// Stop after this many rounds.
    pub max_rounds: Option<usize>,
    /// Log sink, rewritten after every round that appended to the log.
    pub log_file: Option<PathBuf>,
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self {
            tracer_mode: true,
            max_rounds: None,
            log_file: None,
        }
    }
}

/// Why a chain run stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChainStop {
    /// A round ended without setting the next-handler register.
    NoNextHandler,
    /// Tracer mode is off.
    SingleRound,
    /// `max_rounds` rounds were run.
    MaxRounds,
    /// A round failed; see [`ChainReport::error`].
    Failed,
}

/// One emulated routine.
#[derive(Debug, Clone)]
pub struct RoundReport {
    pub address: u64,
    pub routine: String,
    pub trace: ExecutionTrace,
}

/// Result of a chain run.
#[derive(Debug, Clone)]
pub struct ChainReport {
    /// Completed rounds, in order.
    pub rounds: Vec<RoundReport>,
    pub stop: ChainStop,
    /// The error that ended the run, if any.
    pub error: Option<EmulationError>,
}

impl ChainReport {
    /// Addresses of the completed rounds.
    pub fn addresses(&self) -> Vec<u64> {
        self.rounds.iter().map(|r| r.address).collect()
    }

    /// The next handler the last round pointed at.
    pub fn last_next_handler(&self) -> Option<u64> {
        self.rounds.last().and_then(|r| r.trace.next_handler)
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// Emulates handlers one after the other.
#[derive(Debug)]
pub struct HandlerChain {
    emulator: Emulator,
    config: ChainConfig,
}

impl HandlerChain {
    pub fn new(emulator: Emulator, config: ChainConfig) -> Self {
        Self { emulator, config }
    }

    pub fn emulator(&self) -> &Emulator {
        &self.emulator
    }

    pub fn config(&self) -> &ChainConfig {
        &self.config
    }

    /// Run the chain starting at `first_address`.
    ///
    /// Machine state carries over from round to round. A failing round ends
    /// the run; the rounds completed before it are kept in the report.
    pub fn run<P>(
        &self,
        provider: &P,
        first_address: u64,
        state: &mut MachineState,
        log: &mut OutputLog,
    ) -> ChainReport
    where
        P: RoutineProvider + ?Sized,
    {
        let mut rounds = Vec::new();
        let mut address = first_address;

        loop {
            if let Some(max) = self.config.max_rounds {
                if rounds.len() >= max {
                    info!("stopping after {} rounds", max);
                    return report(rounds, ChainStop::MaxRounds, None);
                }
            }

            let round = match self.round(provider, address, state, log) {
                Ok(round) => round,
                Err(err) => {
                    warn!("round {} at {:#x} failed: {}", rounds.len(), address, err);
                    // Keep what the failed round logged.
                    if let Err(flush_err) = self.flush(log) {
                        warn!("{}", flush_err);
                    }
                    return report(rounds, ChainStop::Failed, Some(err));
                }
            };

            let next = round.trace.next_handler;
            rounds.push(round);

            if let Err(err) = self.flush(log) {
                return report(rounds, ChainStop::Failed, Some(err));
            }

            let Some(next) = next else {
                info!("no next handler after {:#x}", address);
                return report(rounds, ChainStop::NoNextHandler, None);
            };
            if !self.config.tracer_mode {
                return report(rounds, ChainStop::SingleRound, None);
            }
            address = next;
        }
    }

    fn round<P>(
        &self,
        provider: &P,
        address: u64,
        state: &mut MachineState,
        log: &mut OutputLog,
    ) -> EmulationResult<RoundReport>
    where
        P: RoutineProvider + ?Sized,
    {
        let routine = provider
            .routine_at(address)
            .ok_or_else(|| EmulationError::MissingEntryPoint(format!("no routine at {:#x}", address)))?;
        info!("emulating {} at {:#x}", routine.name, address);

        state.clear_register(regs::NEXT_HANDLER);
        let trace = self.emulator.emulate(routine, state, log)?;
        Ok(RoundReport {
            address,
            routine: routine.name.clone(),
            trace,
        })
    }

    fn flush(&self, log: &mut OutputLog) -> EmulationResult<()> {
        match &self.config.log_file {
            Some(path) => log
                .flush_to(path)
                .map(|_| ())
                .map_err(|e| EmulationError::LogSink(format!("{}: {}", path.display(), e))),
            None => Ok(()),
        }
    }
}

fn report(rounds: Vec<RoundReport>, stop: ChainStop, error: Option<EmulationError>) -> ChainReport {
    ChainReport { rounds, stop, error }
}
