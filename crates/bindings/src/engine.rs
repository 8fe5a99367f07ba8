//! The engine Python binding (`PyEngine`).
//!
//! Exposes [`sniffer_core::engine::Engine`] to the embedded scripting
//! runtime: construction from a host memory/process-registry pair and an
//! optional config dict, the command surface (`exec`), the watch-event
//! callback channel, the per-instruction/svc hooks a host's CPU-core
//! thread calls, and the export/dump methods.

use std::sync::Arc;

use pyo3::exceptions::{PyRuntimeError, PyValueError};
use pyo3::prelude::*;

use sniffer_core::common::GuestAddr;
use sniffer_core::config::EngineConfig;
use sniffer_core::engine::{Engine, WatchEvent};
use sniffer_core::region::{MemoryRegionDescriptor, RegionKind};
use sniffer_core::session::SessionInfo;

use crate::conversion::py_dict_to_engine_config;
use crate::host::{PyGuestMemory, PyProcessRegistry};

type HostEngine = Engine<PyGuestMemory, PyProcessRegistry>;

fn sniff_err(e: sniffer_core::common::error::SniffError) -> PyErr {
    PyRuntimeError::new_err(e.to_string())
}

fn region_kind(name: &str) -> PyResult<RegionKind> {
    match name {
        "heap" => Ok(RegionKind::Heap),
        "alias" => Ok(RegionKind::Alias),
        "stack" => Ok(RegionKind::Stack),
        "kernel-map" => Ok(RegionKind::KernelMap),
        "code" => Ok(RegionKind::Code),
        "alias-code" => Ok(RegionKind::AliasCode),
        "addr-space" => Ok(RegionKind::AddrSpace),
        "module" => Ok(RegionKind::Module),
        other => Err(PyValueError::new_err(format!("unknown region kind: {other:?}"))),
    }
}

/// Python-exposed sniffer engine: wraps `Engine<PyGuestMemory, PyProcessRegistry>`
/// behind an `Arc`, since `observe_access` needs a `'static` handle back into
/// the engine for its dispatched scripted callback.
#[pyclass(name = "Engine")]
pub struct PyEngine {
    inner: Arc<HostEngine>,
}

#[pymethods]
impl PyEngine {
    /// `initialize(system)`: binds the engine to `memory`/`processes` (the
    /// host's guest-memory and process-registry objects), optionally
    /// configured by `config` (a dict matching `EngineConfig`'s JSON shape).
    #[new]
    #[pyo3(signature = (memory, processes, config=None))]
    fn new(py: Python<'_>, memory: Py<PyAny>, processes: Py<PyAny>, config: Option<&Bound<'_, PyAny>>) -> PyResult<Self> {
        let engine_config = match config {
            Some(dict) => py_dict_to_engine_config(py, dict)?,
            None => EngineConfig::default(),
        };
        let process_registry = PyProcessRegistry::new(py, processes)?;
        let guest_memory = PyGuestMemory::new(memory);
        let engine = HostEngine::initialize(guest_memory, process_registry, engine_config);
        Ok(Self { inner: Arc::new(engine) })
    }

    /// Executes one command line against the engine's state (§4.7/§6).
    ///
    /// # Errors
    ///
    /// Raises if the verb is unrecognized or its argument fails to parse.
    fn exec(&self, line: &str) -> PyResult<()> {
        self.inner.exec(line).map_err(sniff_err)
    }

    /// `addmodulememoryparameter`-style region registration.
    #[pyo3(signature = (name, build_id, base, addr, size, program_id, pid, kind))]
    #[allow(clippy::too_many_arguments)]
    fn add_region(&self, name: String, build_id: String, base: u64, addr: u64, size: u64, program_id: u64, pid: u64, kind: &str) -> PyResult<()> {
        let kind = region_kind(kind)?;
        self.inner.add_region(MemoryRegionDescriptor { name, build_id, base, addr, size, program_id, pid, kind });
        Ok(())
    }

    /// `clear_module_memory_parameters`.
    fn clear_regions(&self) {
        self.inner.clear_regions();
    }

    /// `clearbreakpoints`: restores every patched word and empties the table.
    fn clear_breakpoints(&self) {
        self.inner.clear_breakpoints();
    }

    /// Per-instruction hook: feeds the PC counter and the instruction-class
    /// log filter for one retired instruction.
    fn on_instruction_retired(&self, pid: u64, pc: u64, word: u32) {
        self.inner.on_instruction_retired(pid, pc, word);
    }

    /// Supervisor-call trace filter (`trace_svc`).
    fn trace_svc(&self, swi: u32, gpr: Vec<u64>) -> bool {
        self.inner.trace_svc(swi, &gpr)
    }

    /// §4.4's watch-match path for one guest memory access. `size` is
    /// `None` for a single-address match, `Some(len)` for a range match.
    /// Returns the matched kind's name (`"read"`, `"write"`, `"pointer"`,
    /// `"cstring"`), or `None` if nothing fired.
    #[pyo3(signature = (core_ix, pid, addr, size=None))]
    fn observe_access(&self, core_ix: usize, pid: u64, addr: u64, size: Option<u64>) -> Option<String> {
        self.inner.observe_access(core_ix, GuestAddr::new(pid, addr), size).map(|k| k.as_str().to_owned())
    }

    /// Registers (or clears, with `None`) the callback invoked for every
    /// watch-point match. The callback is invoked as
    /// `callback(kind, pid, addr, size, thread_handle)`.
    fn set_watch_callback(&self, callback: Option<Py<PyAny>>) {
        match callback {
            Some(cb) => self.inner.set_watch_callback(Some(Box::new(move |event: WatchEvent| {
                Python::with_gil(|py| {
                    let _ = cb.call1(py, (event.kind.as_str(), event.addr.pid, event.addr.addr, event.size, event.thread_handle));
                });
            }))),
            None => self.inner.set_watch_callback(None),
        }
    }

    /// Drains the dispatcher's sync queue (publishing fences), then its
    /// async queue. Call once per host main-loop iteration.
    fn tick(&self) {
        self.inner.dispatcher().tick();
    }

    /// Records or replaces a session descriptor (for `dumpsession`).
    fn insert_session(&self, id: u64, name: String, handle: u32) {
        self.inner.insert_session(SessionInfo { id, name, handle });
    }

    /// `dumpsession <filter>`.
    fn dump_sessions(&self, filter: &str) -> String {
        self.inner.dump_sessions(filter)
    }

    /// `listprocess`.
    fn list_process(&self) -> Vec<u64> {
        self.inner.list_process()
    }

    /// `dumpreg <core>`: a one-off register dump for the thread currently
    /// scheduled on `core_ix`.
    fn dump_reg(&self, core_ix: usize) -> Option<String> {
        self.inner.dump_reg(core_ix)
    }

    /// Current working snapshot's record count, for diagnostics.
    fn result_len(&self) -> usize {
        self.inner.result_len()
    }

    /// `saveresult`.
    fn save_result(&self, path: &str) -> PyResult<()> {
        self.inner.save_result(path).map_err(sniff_err)
    }

    /// `savehistory`.
    fn save_history(&self, path: &str) -> PyResult<()> {
        self.inner.save_history(path).map_err(sniff_err)
    }

    /// `saverollback`.
    fn save_rollback(&self, path: &str) -> PyResult<()> {
        self.inner.save_rollback(path).map_err(sniff_err)
    }

    /// `saveresultabs` (`relative=false`) / `saveresultrel` (`relative=true`).
    fn save_cheat_vm(&self, path: &str, relative: bool) -> PyResult<()> {
        self.inner.save_cheat_vm(path, relative).map_err(sniff_err)
    }

    /// `savepccount`.
    fn save_pc_count(&self, path: &str) -> PyResult<()> {
        self.inner.save_pc_count(path).map_err(sniff_err)
    }

    /// `savetracebuffer`.
    fn save_trace_buffer(&self, path: &str) -> PyResult<()> {
        self.inner.save_trace_buffer(path).map_err(sniff_err)
    }
}
