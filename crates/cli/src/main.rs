//! Command-line driver for the sniffer engine.
//!
//! This binary plays the role of "a higher-level dispatcher" mentioned by
//! the command surface's contract (§4.7): every line is first offered to
//! [`Engine::exec`], and only the handful of verbs the core leaves to the
//! embedder — the export/dump verbs, which take a filesystem path rather
//! than fitting the core's single-opaque-argument grammar — are handled
//! here, via `Engine`'s own `save_*`/`dump_*` methods.
//!
//! No real emulator is attached; `host` supplies a standalone flat-memory,
//! single-thread stand-in so a command script can be driven and inspected
//! end to end without one.

mod host;

use std::fs;
use std::io::{self, BufRead, Write};
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};

use sniffer_core::command::{parse_uint, Command};
use sniffer_core::common::error::SniffError;
use sniffer_core::config::EngineConfig;
use sniffer_core::engine::Engine;

use host::{FlatGuest, StubProcesses};

/// The sniffer engine, command-line edition.
#[derive(Parser, Debug)]
#[command(
    name = "sniff",
    author,
    version,
    about = "Memory-sniffing and execution-tracing engine CLI",
    long_about = "Drive the sniffer engine's command surface from a script file or an \
interactive session. No emulator is attached: guest memory is a flat, \
zero-initialized buffer and there is one fake process/thread, enough to \
exercise addsniffing/refreshsnapshot/keep*/addbp/addtrace*/savepc* end to \
end.\n\nExamples:\n  sniff run session.sniff\n  sniff run session.sniff --mem-size 0x10000\n  sniff repl"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Executes every line of a command script in order.
    Run {
        /// Path to a file of newline-separated command-surface lines.
        /// Blank lines and lines starting with `#` are ignored.
        script: String,

        /// Size, in bytes, of the standalone flat guest-memory buffer.
        #[arg(long, default_value = "0x100000", value_parser = parse_mem_size)]
        mem_size: u64,
    },

    /// Reads command-surface lines from stdin until EOF, one per line.
    Repl {
        /// Size, in bytes, of the standalone flat guest-memory buffer.
        #[arg(long, default_value = "0x100000", value_parser = parse_mem_size)]
        mem_size: u64,
    },
}

fn parse_mem_size(s: &str) -> Result<u64, String> {
    parse_uint(s).ok_or_else(|| format!("invalid size: {s:?}"))
}

type CliEngine = Engine<FlatGuest, StubProcesses>;

fn main() -> ExitCode {
    tracing_subscriber::fmt::init();
    let cli = Cli::parse();

    match cli.command {
        Commands::Run { script, mem_size } => run_script(&script, mem_size),
        Commands::Repl { mem_size } => run_repl(mem_size),
    }
}

fn new_engine(mem_size: u64) -> Arc<CliEngine> {
    let memory = FlatGuest::new(mem_size as usize);
    let processes = StubProcesses::new(4);
    Arc::new(Engine::initialize(memory, processes, EngineConfig::default()))
}

fn run_script(path: &str, mem_size: u64) -> ExitCode {
    let text = match fs::read_to_string(path) {
        Ok(t) => t,
        Err(e) => {
            eprintln!("error reading {path}: {e}");
            return ExitCode::FAILURE;
        }
    };

    let engine = new_engine(mem_size);
    let mut failed = false;
    for (lineno, line) in text.lines().enumerate() {
        if !run_line(&engine, line) {
            eprintln!("line {}: {}", lineno + 1, line.trim());
            failed = true;
        }
        engine.dispatcher().tick();
    }

    if failed { ExitCode::FAILURE } else { ExitCode::SUCCESS }
}

fn run_repl(mem_size: u64) -> ExitCode {
    let engine = new_engine(mem_size);
    let stdin = io::stdin();
    print!("sniff> ");
    let _ = io::stdout().flush();
    for line in stdin.lock().lines() {
        let Ok(line) = line else { break };
        run_line(&engine, &line);
        engine.dispatcher().tick();
        print!("sniff> ");
        let _ = io::stdout().flush();
    }
    println!();
    ExitCode::SUCCESS
}

/// Runs one line against the engine, trying the core's command surface
/// first and falling back to this binary's export/diagnostic verb table
/// when the core reports the verb unhandled. Returns `false` on any error
/// (printed to stderr by the caller).
fn run_line(engine: &Arc<CliEngine>, line: &str) -> bool {
    let trimmed = line.trim();
    if trimmed.is_empty() || trimmed.starts_with('#') {
        return true;
    }

    match engine.exec(trimmed) {
        Ok(()) => true,
        Err(SniffError::UnknownVerb(_)) => dispatch_cli_verb(engine, trimmed),
        Err(e) => {
            eprintln!("{e}");
            false
        }
    }
}

fn dispatch_cli_verb(engine: &Arc<CliEngine>, line: &str) -> bool {
    let Command { verb, arg } = Command::parse(line);
    let result = match verb.as_str() {
        "saveresult" => engine.save_result(&arg),
        "savehistory" => engine.save_history(&arg),
        "saverollback" => engine.save_rollback(&arg),
        "saveresultabs" => engine.save_cheat_vm(&arg, false),
        "saveresultrel" => engine.save_cheat_vm(&arg, true),
        "savepccount" => engine.save_pc_count(&arg),
        "savetracebuffer" => engine.save_trace_buffer(&arg),
        "dumpsession" => {
            println!("{}", engine.dump_sessions(&arg));
            return true;
        }
        "dumpreg" => {
            let Some(core_ix) = parse_uint(&arg).and_then(|v| usize::try_from(v).ok()) else {
                eprintln!("dumpreg: invalid core index {arg:?}");
                return false;
            };
            match engine.dump_reg(core_ix) {
                Some(text) => {
                    println!("{text}");
                    return true;
                }
                None => {
                    eprintln!("dumpreg: no current thread on core {core_ix}");
                    return false;
                }
            }
        }
        "listprocess" => {
            for pid in engine.list_process() {
                println!("{pid:#x}");
            }
            return true;
        }
        other => {
            eprintln!("unhandled verb `{other}`");
            return false;
        }
    };
    if let Err(e) = result {
        eprintln!("{e}");
        return false;
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_cli_verb_reports_error() {
        let engine = new_engine(0x1000);
        assert!(!run_line(&engine, "notaverb arg"));
    }

    #[test]
    fn core_verb_runs_via_run_line() {
        let engine = new_engine(0x1000);
        assert!(run_line(&engine, "setmemstep 4"));
    }

    #[test]
    fn blank_and_comment_lines_are_ignored() {
        let engine = new_engine(0x1000);
        assert!(run_line(&engine, ""));
        assert!(run_line(&engine, "   "));
        assert!(run_line(&engine, "# a comment"));
    }

    #[test]
    fn export_verb_routes_through_cli_fallback() {
        let engine = new_engine(0x1000);
        let dir = std::env::temp_dir();
        let path = dir.join(format!("sniff-cli-test-{}.txt", std::process::id()));
        let line = format!("saveresult {}", path.display());
        assert!(run_line(&engine, &line));
        assert!(path.exists());
        let _ = std::fs::remove_file(path);
    }
}
