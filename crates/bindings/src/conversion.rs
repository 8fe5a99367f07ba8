//! Python↔Rust configuration conversion.
//!
//! Converts a Python dict into the engine's [`EngineConfig`] via JSON
//! serialization, so the same schema documented by `EngineConfig`'s own
//! doc-tests is what a script passes in.

use pyo3::prelude::*;
use sniffer_core::config::EngineConfig;

/// Converts a Python dict to an [`EngineConfig`].
///
/// The dict is serialized to JSON (via Python's own `json` module) and then
/// deserialized into `EngineConfig`; missing keys fall back to their
/// `#[serde(default)]` values, so a script only needs to set the fields it
/// cares about.
///
/// # Errors
///
/// Returns a `PyValueError` if the dict cannot be JSON-encoded or does not
/// match `EngineConfig`'s shape.
pub fn py_dict_to_engine_config(py: Python<'_>, dict: &Bound<'_, PyAny>) -> PyResult<EngineConfig> {
    let json = py.import("json")?;
    let dumps = json.getattr("dumps")?;
    let json_str: String = dumps.call1((dict,))?.extract()?;

    serde_json::from_str(&json_str)
        .map_err(|e| PyErr::new::<pyo3::exceptions::PyValueError, _>(format!("invalid engine configuration: {e}")))
}
