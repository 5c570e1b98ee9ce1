//! Pluggable external solver backends.
//!
//! A backend receives the assembled CSR/MSR pattern and values and
//! takes over SpMV and solves for that matrix. Backends register a
//! factory under a name at startup; [`crate::matrix::Matrix::attach_backend`]
//! instantiates one per matrix. Nothing here links against a library:
//! a HYPRE or PETSc binding would live in its own crate and register
//! itself through [`register_backend`].

use std::collections::HashMap;

use once_cell::sync::Lazy;
use parking_lot::RwLock;

use crate::error::{LinOpError, Result};
use crate::matrix::structure::CsrPattern;
use crate::solve::{SolveParams, SolveStats};

/// One matrix's handle inside an external solver library.
pub trait ExternalBackend: Send {
    fn name(&self) -> &'static str;

    /// Transfer the frozen pattern; called once per matrix.
    fn set_pattern(&mut self, pattern: &CsrPattern) -> Result<()>;

    /// Transfer coefficient values. `da` is the dense diagonal (empty
    /// for CSR storage, where the diagonal sits inside `val`).
    fn set_values(&mut self, pattern: &CsrPattern, da: &[f64], val: &[f64]) -> Result<()>;

    /// `y ← α·A·x + β·y` over owned rows.
    fn spmv(&self, alpha: f64, x: &[f64], beta: f64, y: &mut [f64]) -> Result<()>;

    /// Solve `A·x = rhs` with the library's own iteration.
    fn solve(&mut self, rhs: &[f64], x: &mut [f64], params: &SolveParams) -> Result<SolveStats>;

    /// Drop value storage inside the library; the pattern survives.
    fn release_values(&mut self);
}

pub type BackendFactory = fn() -> Box<dyn ExternalBackend>;

static REGISTRY: Lazy<RwLock<HashMap<&'static str, BackendFactory>>> =
    Lazy::new(|| RwLock::new(HashMap::new()));

/// Register a backend factory under `name`; later registrations win.
pub fn register_backend(name: &'static str, factory: BackendFactory) {
    REGISTRY.write().insert(name, factory);
}

/// Instantiate a registered backend.
pub fn create_backend(name: &str) -> Result<Box<dyn ExternalBackend>> {
    let registry = REGISTRY.read();
    let factory = registry.get(name).ok_or_else(|| LinOpError::Backend {
        backend: name.to_owned(),
        detail: "no such backend registered".into(),
    })?;
    Ok(factory())
}
