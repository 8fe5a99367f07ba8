//! Python-object adapters for the engine's two external collaborators (C1,
//! C2).
//!
//! The embedding scripting runtime hands the engine its guest-memory and
//! process-registry objects as plain Python objects implementing a small
//! duck-typed protocol; this module is the one place that crosses back into
//! the GIL to satisfy [`GuestMemory`]/[`ProcessRegistry`]/[`ArmInterface`].
//! Every call re-acquires the GIL rather than assuming one is already held,
//! since the engine may invoke these from a guest CPU-core thread.

use pyo3::prelude::*;
use sniffer_core::guest::{ArmInterface, BacktraceEntry, GuestMemory, ProcessRegistry, RegisterContext, ThreadInfo};

/// Wraps a Python guest-memory object so it can back an
/// [`Engine`](sniffer_core::engine::Engine).
///
/// Expected Python protocol: `is_valid(addr, len) -> bool`,
/// `read_u{8,16,32,64}(addr) -> Optional[int]`,
/// `write_u{8,16,32,64}(addr, value) -> bool`,
/// `read_pointer_silent(addr) -> Optional[int]`,
/// `invalidate_instruction_cache(addr, len) -> None`,
/// `mark_region_debug(addr, size, flag) -> None`.
pub struct PyGuestMemory {
    host: Py<PyAny>,
}

impl PyGuestMemory {
    /// Wraps `host`, a Python object implementing the guest-memory protocol.
    #[must_use]
    pub const fn new(host: Py<PyAny>) -> Self {
        Self { host }
    }
}

macro_rules! py_read {
    ($name:ident, $ty:ty) => {
        fn $name(&self, addr: u64) -> Option<$ty> {
            Python::with_gil(|py| {
                self.host
                    .call_method1(py, stringify!($name), (addr,))
                    .ok()
                    .and_then(|r| r.extract::<Option<$ty>>(py).ok())
                    .flatten()
            })
        }
    };
}

macro_rules! py_write {
    ($name:ident, $ty:ty) => {
        fn $name(&mut self, addr: u64, val: $ty) -> bool {
            Python::with_gil(|py| {
                self.host
                    .call_method1(py, stringify!($name), (addr, val))
                    .ok()
                    .and_then(|r| r.extract::<bool>(py).ok())
                    .unwrap_or(false)
            })
        }
    };
}

impl GuestMemory for PyGuestMemory {
    fn is_valid(&self, addr: u64, len: usize) -> bool {
        Python::with_gil(|py| {
            self.host
                .call_method1(py, "is_valid", (addr, len))
                .ok()
                .and_then(|r| r.extract::<bool>(py).ok())
                .unwrap_or(false)
        })
    }

    py_read!(read_u8, u8);
    py_read!(read_u16, u16);
    py_read!(read_u32, u32);
    py_read!(read_u64, u64);

    py_write!(write_u8, u8);
    py_write!(write_u16, u16);
    py_write!(write_u32, u32);
    py_write!(write_u64, u64);

    fn read_pointer_silent(&self, addr: u64) -> Option<u64> {
        Python::with_gil(|py| {
            self.host
                .call_method1(py, "read_pointer_silent", (addr,))
                .ok()
                .and_then(|r| r.extract::<Option<u64>>(py).ok())
                .flatten()
        })
    }

    fn invalidate_instruction_cache(&mut self, addr: u64, len: usize) {
        Python::with_gil(|py| {
            let _ = self.host.call_method1(py, "invalidate_instruction_cache", (addr, len));
        });
    }

    fn mark_region_debug(&mut self, addr: u64, size: usize, flag: bool) {
        Python::with_gil(|py| {
            let _ = self.host.call_method1(py, "mark_region_debug", (addr, size, flag));
        });
    }
}

/// Wraps a Python per-core CPU-control object (`arm.*` in §4.9).
///
/// Expected protocol: `is_aarch32() -> bool`, `context() -> dict` (keys
/// `gpr`, `vector`, `pc`, `sp`, `pstate`, `tls`, `tpidr_el0`; see
/// [`register_context_from_dict`]), `init_jit_once(begin, end)`,
/// `start_trace()`, `stop_trace()`, `start_pc_count()`, `stop_pc_count()`.
pub struct PyArmInterface {
    inner: Py<PyAny>,
}

impl PyArmInterface {
    fn call0(&mut self, method: &str) {
        Python::with_gil(|py| {
            let _ = self.inner.call_method0(py, method);
        });
    }
}

impl ArmInterface for PyArmInterface {
    fn is_aarch32(&self) -> bool {
        Python::with_gil(|py| {
            self.inner
                .call_method0(py, "is_aarch32")
                .ok()
                .and_then(|r| r.extract::<bool>(py).ok())
                .unwrap_or(false)
        })
    }

    fn context(&self) -> RegisterContext {
        Python::with_gil(|py| {
            self.inner
                .call_method0(py, "context")
                .ok()
                .and_then(|obj| register_context_from_dict(py, &obj).ok())
                .unwrap_or_default()
        })
    }

    fn init_jit_once(&mut self, region_begin: u64, region_end: u64) {
        Python::with_gil(|py| {
            let _ = self.inner.call_method1(py, "init_jit_once", (region_begin, region_end));
        });
    }

    fn start_trace(&mut self) {
        self.call0("start_trace");
    }

    fn stop_trace(&mut self) {
        self.call0("stop_trace");
    }

    fn start_pc_count(&mut self) {
        self.call0("start_pc_count");
    }

    fn stop_pc_count(&mut self) {
        self.call0("stop_pc_count");
    }
}

/// Parses a Python `context()` result into a [`RegisterContext`].
///
/// The dict's `gpr` entry must have exactly 29 elements and `vector`
/// exactly 32 `(hi, lo)` pairs; any other shape is rejected so a
/// malformed host object fails loudly at the Python/Rust boundary instead
/// of silently truncating register state.
fn register_context_from_dict(py: Python<'_>, obj: &Py<PyAny>) -> PyResult<RegisterContext> {
    let gpr_vec: Vec<u64> = obj.bind(py).get_item("gpr")?.extract()?;
    let mut gpr = [0u64; 29];
    if gpr_vec.len() == gpr.len() {
        gpr.copy_from_slice(&gpr_vec);
    }

    let vector_vec: Vec<(u64, u64)> = obj.bind(py).get_item("vector")?.extract()?;
    let mut vector = [(0u64, 0u64); 32];
    if vector_vec.len() == vector.len() {
        vector.copy_from_slice(&vector_vec);
    }

    let pc: u64 = obj.bind(py).get_item("pc")?.extract()?;
    let sp: u64 = obj.bind(py).get_item("sp")?.extract()?;
    let pstate: u64 = obj.bind(py).get_item("pstate")?.extract()?;
    let tls: u64 = obj.bind(py).get_item("tls")?.extract()?;
    let tpidr_el0: u64 = obj.bind(py).get_item("tpidr_el0")?.extract()?;

    Ok(RegisterContext {
        gpr,
        vector,
        pc,
        sp,
        pstate,
        tls,
        tpidr_el0,
    })
}

/// Wraps a Python process/thread-registry object (C2).
///
/// Expected protocol: `process_list() -> list[int]`, `is_alive(pid) ->
/// bool`, `physical_core_count() -> int`, `current_thread(core_ix) ->
/// Optional[tuple[int, int, int]]` (`handle, tid, pid`),
/// `get_arm_interface(core_ix) -> Optional[object]` (queried once per
/// core at construction, matching the "`process.get_arm_interface`"
/// external call cached the way `page_table.*` is cached once at
/// `initialize`), `backtrace(pid, tid) -> list[tuple]` (`module, address,
/// original_address, offset, symbol, Optional[host_pointer]`).
pub struct PyProcessRegistry {
    host: Py<PyAny>,
    arms: Vec<Option<PyArmInterface>>,
}

impl PyProcessRegistry {
    /// Constructs the adapter, caching one [`PyArmInterface`] per physical
    /// core up front so `arm_interface`/`arm_interface_mut` can hand back a
    /// plain reference rather than re-entering Python on every call.
    pub fn new(py: Python<'_>, host: Py<PyAny>) -> PyResult<Self> {
        let core_count: usize = host.call_method0(py, "physical_core_count")?.extract(py)?;
        let mut arms = Vec::with_capacity(core_count);
        for core_ix in 0..core_count {
            let obj = host.call_method1(py, "get_arm_interface", (core_ix,))?;
            if obj.is_none(py) {
                arms.push(None);
            } else {
                arms.push(Some(PyArmInterface { inner: obj }));
            }
        }
        Ok(Self { host, arms })
    }
}

impl ProcessRegistry for PyProcessRegistry {
    fn process_list(&self) -> Vec<u64> {
        Python::with_gil(|py| {
            self.host
                .call_method0(py, "process_list")
                .ok()
                .and_then(|r| r.extract::<Vec<u64>>(py).ok())
                .unwrap_or_default()
        })
    }

    fn is_alive(&self, pid: u64) -> bool {
        Python::with_gil(|py| {
            self.host
                .call_method1(py, "is_alive", (pid,))
                .ok()
                .and_then(|r| r.extract::<bool>(py).ok())
                .unwrap_or(false)
        })
    }

    fn physical_core_count(&self) -> usize {
        self.arms.len()
    }

    fn current_thread(&self, core_ix: usize) -> Option<ThreadInfo> {
        Python::with_gil(|py| {
            let res = self.host.call_method1(py, "current_thread", (core_ix,)).ok()?;
            if res.is_none(py) {
                return None;
            }
            let (handle, tid, pid): (u32, u64, u64) = res.extract(py).ok()?;
            Some(ThreadInfo { handle, tid, pid, core_ix })
        })
    }

    fn arm_interface(&self, core_ix: usize) -> Option<&dyn ArmInterface> {
        self.arms.get(core_ix)?.as_ref().map(|a| a as &dyn ArmInterface)
    }

    fn arm_interface_mut(&mut self, core_ix: usize) -> Option<&mut dyn ArmInterface> {
        self.arms.get_mut(core_ix)?.as_mut().map(|a| a as &mut dyn ArmInterface)
    }

    fn backtrace(&self, thread: ThreadInfo) -> Vec<BacktraceEntry> {
        Python::with_gil(|py| {
            let Ok(res) = self.host.call_method1(py, "backtrace", (thread.pid, thread.tid)) else {
                return Vec::new();
            };
            let Ok(frames) = res.extract::<Vec<(String, u64, u64, u64, String, Option<u64>)>>(py) else {
                return Vec::new();
            };
            frames
                .into_iter()
                .map(|(module, address, original_address, offset, symbol, host_pointer)| BacktraceEntry {
                    module,
                    address,
                    original_address,
                    offset,
                    symbol,
                    host_pointer,
                })
                .collect()
        })
    }
}
