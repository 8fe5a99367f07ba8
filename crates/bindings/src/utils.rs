//! Utility functions exposed to the embedded scripting runtime.

use pyo3::prelude::*;

/// Returns the engine's version string, for scripting or diagnostics.
#[pyfunction]
pub fn version() -> String {
    env!("CARGO_PKG_VERSION").to_owned()
}
