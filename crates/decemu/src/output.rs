//! Report printing.

use anyhow::Result;
use decemu_emulate::{ChainReport, OutputLog};
use serde::Serialize;

#[derive(Serialize)]
struct JsonRound<'a> {
    address: String,
    routine: &'a str,
    statements: &'a [String],
    return_value: Option<String>,
    next_handler: Option<String>,
}

#[derive(Serialize)]
struct JsonReport<'a> {
    rounds: Vec<JsonRound<'a>>,
    stop: String,
    error: Option<String>,
    log: &'a str,
}

fn hex(value: u64) -> String {
    format!("{:#x}", value)
}

pub fn print_json(report: &ChainReport, log: &OutputLog) -> Result<()> {
    let json = JsonReport {
        rounds: report
            .rounds
            .iter()
            .map(|round| JsonRound {
                address: hex(round.address),
                routine: &round.routine,
                statements: &round.trace.statements,
                return_value: round.trace.return_value.map(hex),
                next_handler: round.trace.next_handler.map(hex),
            })
            .collect(),
        stop: format!("{:?}", report.stop),
        error: report.error.as_ref().map(ToString::to_string),
        log: log.as_str(),
    };
    println!("{}", serde_json::to_string_pretty(&json)?);
    Ok(())
}

/// Print a summary of every round. The log is printed too unless it went
/// to a file.
pub fn print_text(report: &ChainReport, log: &OutputLog, log_in_file: bool) {
    println!("Emulation Results");
    println!("=================");
    println!("Rounds: {}", report.rounds.len());
    println!("Stop reason: {:?}", report.stop);
    for (i, round) in report.rounds.iter().enumerate() {
        let next = match round.trace.next_handler {
            Some(next) => format!(" -> {:#x}", next),
            None => String::new(),
        };
        println!(
            "  {}: {:#x}  {}  ({} statements){}",
            i,
            round.address,
            round.routine,
            round.trace.len(),
            next
        );
    }
    if let Some(err) = &report.error {
        println!("Error: {}", err);
    }
    if !log_in_file && !log.is_empty() {
        println!("\nLog:");
        print!("{}", log.as_str());
    }
}
