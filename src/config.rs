//! Runtime options recognised by the core.
//!
//! Everything here is plain data: the outer driver deserialises a
//! [`CoreConfig`] (or builds one in code) and threads it through the
//! entry points that need it. No global state.

use serde::{Deserialize, Serialize};

/// How a face value is interpolated from the two adjacent cell values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FaceMean {
    /// `0.5 (c_i + c_j)`
    Arithmetic,
    /// `c_i c_j / (pnd c_i + (1 - pnd) c_j)`, weighted by the face
    /// interpolation factor.
    #[default]
    Harmonic,
}

/// Requested matrix storage variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatrixStorage {
    /// Let the core choose; mesh-aligned construction resolves to MSR.
    #[default]
    Auto,
    /// Edge-based storage sharing the mesh interior-face list.
    Native,
    /// Compressed sparse row, diagonal inside the row.
    Csr,
    /// CSR with the main diagonal stored separately.
    Msr,
    /// Hand the operator to a registered external backend.
    External,
}

/// Summation discipline for face-to-cell scatters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SumType {
    /// Thread-local partial sums, reduced at the end. Always available.
    Atomic,
    /// Direct scatter within conflict-free face colour groups.
    /// Requires a face colouring on the mesh.
    Coloured,
}

/// Which ghost neighbourhood a halo sync fills.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Neighbourhood {
    /// Face-adjacent ghosts only.
    #[default]
    Standard,
    /// Vertex-adjacent ghosts (superset of standard).
    Extended,
}

/// Options recognised by the core, with the documented defaults.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoreConfig {
    pub face_mean: FaceMean,
    pub matrix_storage: MatrixStorage,
    /// `None` lets each dispatch context pick from mesh capability
    /// (coloured when a face colouring exists, atomic otherwise).
    pub sum_type: Option<SumType>,
    pub halo_neighbourhood: Neighbourhood,
    /// Assemblers created from this config mirror (i, j) to (j, i).
    pub symmetric_hint: bool,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            face_mean: FaceMean::Harmonic,
            matrix_storage: MatrixStorage::Auto,
            sum_type: None,
            halo_neighbourhood: Neighbourhood::Standard,
            symmetric_hint: false,
        }
    }
}
