#![no_main]

use std::sync::Arc;

use decemu_ast::{Routine, TypeDatabase};
use decemu_emulate::{regs, Cfg, Emulator, EmulatorConfig, MachineState, OutputLog, PagedMemory};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    // Only well-formed routines are interesting; the arena is validated on load.
    let Ok(routine) = serde_json::from_slice::<Routine>(data) else {
        return;
    };

    // Graph construction should never panic
    let Ok(cfg) = Cfg::build(&routine) else {
        return;
    };
    let _ = cfg.to_string();

    let mut state = MachineState::new(Arc::new(TypeDatabase::new()), PagedMemory::default());
    state.set_register(regs::RBP, 0x7fff_ffff_df90);
    let _ = state.allocate_stack_space();

    // Bounded run: errors are fine, panics and hangs are not
    let emulator = Emulator::new(EmulatorConfig {
        max_steps: Some(10_000),
        log_trace: true,
    });
    let _ = emulator.emulate(&routine, &mut state, &mut OutputLog::new());
});
