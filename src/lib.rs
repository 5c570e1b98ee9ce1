#![cfg_attr(docsrs, feature(doc_cfg))]
//! # fv-linop
//!
//! fv-linop is the sparse linear-operator core of an unstructured
//! finite-volume solver: matrix storage variants over a shared mesh
//! adjacency, distributed assembly with global numbering, SpMV kernels,
//! ghost-cell exchange with periodic transforms, and the face
//! diffusion-coefficient builders that feed the operator. It supports
//! both serial and MPI-based distributed workflows through pluggable
//! communication backends.
//!
//! ## Features
//! - Native (edge-based), CSR and MSR matrix storage behind one
//!   [`matrix::Matrix`] type, plus pluggable external solver backends
//! - Two-phase distributed assembler: register global ids, freeze the
//!   pattern, then accumulate values with off-rank routing
//! - Halo exchange with periodic vector/tensor rotation and standard or
//!   extended neighbourhoods
//! - Dispatch contexts choosing serial, thread-partial or coloured
//!   face scatters per call site
//! - Scalar and anisotropic-tensor face viscosity builders
//!
//! ## Usage
//! Add `fv-linop` as a dependency in your `Cargo.toml` and enable
//! features as needed:
//!
//! ```toml
//! [dependencies]
//! fv-linop = "0.3"
//! # Optional features:
//! # features = ["mpi-support"]
//! ```

pub mod bc;
pub mod comm;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod halo;
pub mod math;
pub mod matrix;
pub mod mesh;
pub mod solve;
pub mod viscosity;

pub use error::{LinOpError, Result};

/// A convenient prelude to import the most-used traits & types:
pub mod prelude {
    pub use crate::bc::BoundaryCoeffs;
    pub use crate::comm::{Communicator, NoComm, ReduceOp, ThreadComm, allreduce};
    #[cfg(feature = "mpi-support")]
    pub use crate::comm::MpiComm;
    pub use crate::config::{CoreConfig, FaceMean, MatrixStorage, Neighbourhood, SumType};
    pub use crate::dispatch::DispatchContext;
    pub use crate::error::{LinOpError, Result};
    pub use crate::halo::{Halo, HaloLists, PeriodicTransform, RecvSection, SendSection};
    pub use crate::matrix::{
        AssemblerValues, FillType, Matrix, MatrixAssembler, MatrixStructure, matrix_create,
    };
    pub use crate::mesh::{MeshAdjacency, MeshQuantities, Porosity};
    pub use crate::solve::{Precond, SolveParams, SolveStats, solve};
    pub use crate::viscosity::{
        face_anisotropic_viscosity_scalar, face_anisotropic_viscosity_vector, face_viscosity,
        face_viscosity_secondary,
    };
}
