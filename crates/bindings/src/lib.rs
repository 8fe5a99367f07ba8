//! Python bindings for the sniffer engine.
//!
//! This crate exposes [`sniffer_core::engine::Engine`] to the embedded
//! scripting runtime described by the engine's design as an external
//! collaborator: the core is generic over the host's guest-memory and
//! process-registry implementations, and this crate is one concrete way to
//! supply them — as plain Python objects implementing a small duck-typed
//! protocol (see [`host`]). It provides:
//! 1. **The engine:** [`engine::Engine`] (exposed to Python as `Engine`) for
//!    construction, the command surface, the watch-event callback channel,
//!    and export/dump methods.
//! 2. **Host adapters:** [`host::PyGuestMemory`], [`host::PyProcessRegistry`],
//!    [`host::PyArmInterface`] — the GIL-crossing trait implementations a
//!    script-supplied host object backs.
//! 3. **Configuration:** [`conversion::py_dict_to_engine_config`], dict→JSON→
//!    `EngineConfig`, mirroring the teacher's own config-from-dict convention.
//! 4. **Utilities:** [`utils::version`].

use pyo3::prelude::*;

/// Python dict to `EngineConfig` conversion.
pub mod conversion;
/// The engine binding (`Engine`, exposed to Python).
pub mod engine;
/// Python-object adapters for the engine's guest-memory and
/// process-registry collaborators.
pub mod host;
/// Utility functions (e.g., version).
pub mod utils;

/// Registers the sniffer engine's classes and functions onto the given
/// Python module.
///
/// # Errors
///
/// Returns a `PyErr` if registration fails.
pub fn register_sniffer_module(m: &Bound<'_, PyModule>) -> PyResult<()> {
    m.add_class::<engine::PyEngine>()?;
    m.add_function(wrap_pyfunction!(utils::version, m)?)?;
    Ok(())
}

#[pymodule]
fn sniffer(m: &Bound<'_, PyModule>) -> PyResult<()> {
    register_sniffer_module(m)?;
    Ok(())
}
