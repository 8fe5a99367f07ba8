//! Live memory-sniffing and execution-tracing engine, embeddable in an
//! emulator host.
//!
//! This crate implements the engine described by the design's eleven
//! components:
//! 1. **Guest interfaces:** [`guest`] — the [`GuestMemory`](guest::GuestMemory),
//!    [`ArmInterface`](guest::ArmInterface), and
//!    [`ProcessRegistry`](guest::ProcessRegistry) traits the host implements.
//! 2. **Snapshot store:** [`snapshot`] — the result/history/rollback filter
//!    algebra over memory snapshots.
//! 3. **Breakpoints:** [`breakpoint`] — instruction-word patching and restore.
//! 4. **Watch/trace registry:** [`watch`] — watch-point sets, instruction-class
//!    log filters, and the supervisor-call trace filter.
//! 5. **PC counter:** [`pccount`] — the lossy, bucket-hashed instruction hit
//!    counter.
//! 6. **Trace buffer:** [`trace_buffer`] — the append-only execution trace.
//! 7. **Dispatcher:** [`dispatcher`] — the cross-thread work-queue rendezvous
//!    between guest CPU threads and the main thread.
//! 8. **Command surface:** [`command`] — verb/argument parsing, dispatched by
//!    [`engine::Engine::exec`].
//! 9. **Export writers:** [`export`] — cheat-VM opcode and human-readable dump
//!    formats.
//! 10. **Regions and sessions:** [`region`], [`session`].
//! 11. **The engine itself:** [`engine`] — wires every component above behind
//!     one [`Engine`](engine::Engine) type.

#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used))]

/// Common types shared across the crate: the guest address type and the
/// engine's error type.
pub mod common;
/// Engine configuration (PC-counter geometry, breakpoint/command/export
/// defaults).
pub mod config;

/// Breakpoint table: instruction-word patch/restore (C6).
pub mod breakpoint;
/// Command surface: verb/argument parsing (C10).
pub mod command;
/// Host/engine synchronization dispatcher (C3).
pub mod dispatcher;
/// The top-level engine: `Engine<M, P>` and its command-verb dispatch table.
pub mod engine;
/// Export writers: cheat-VM opcode formats and human-readable dumps (C11).
pub mod export;
/// External interfaces consumed from the host: guest memory and the
/// process/thread registry (C1, C2).
pub mod guest;
/// PC-count hit table (C8).
pub mod pccount;
/// Modify-record and memory-type types shared by the snapshot store and the
/// export writers.
pub mod record;
/// Memory region descriptors.
pub mod region;
/// IPC session registry, used to filter supervisor-call tracing.
pub mod session;
/// Snapshot store and filter algebra (C4, C5).
pub mod snapshot;
/// Execution trace buffer (C9).
pub mod trace_buffer;
/// Watch/trace registry and instruction-class log filters (C7).
pub mod watch;

/// The top-level engine type; construct with [`Engine::initialize`](engine::Engine::initialize).
pub use crate::engine::{Engine, MemScope, TraceScope, WatchCallback, WatchEvent};
/// Root configuration type for an [`Engine`].
pub use crate::config::EngineConfig;
