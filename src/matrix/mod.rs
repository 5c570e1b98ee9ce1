//! Sparse linear operators over mesh-local unknowns.
//!
//! A [`Matrix`] pairs an `Arc`-shared [`MatrixStructure`] with one set
//! of coefficients. Coefficients are always supplied in mesh form (a
//! dense diagonal plus per-face extra-diagonal blocks) and scattered
//! into the storage variant's own layout; the assembler builds matrices
//! from arbitrary global (row, col, value) triples instead.
//!
//! `y ← α·A·x + β·y` runs over owned rows only; ghost values of `x` are
//! refreshed through the attached halo before the kernel runs.

pub mod assembler;
pub mod external;
mod kernels;
pub mod structure;

use std::sync::Arc;

use crate::comm::Communicator;
use crate::config::{CoreConfig, MatrixStorage};
use crate::dispatch::DispatchContext;
use crate::error::{LinOpError, Result};
use crate::halo::Halo;
use crate::mesh::MeshAdjacency;

pub use assembler::{AssemblerValues, MatrixAssembler};
pub use external::ExternalBackend;
pub use structure::{CsrPattern, MatrixStructure, StructureKind};

/// Coefficient block shape stored per matrix entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FillType {
    /// One value per entry.
    Scalar,
    /// One value per entry, extra-diagonal stored once per face.
    ScalarSym,
    /// 3×3 diagonal blocks (3 values).
    Block3Diag,
    /// 3×3 diagonal blocks, symmetric coefficients.
    Block3DiagSym,
    /// 6×6 diagonal blocks (6 values).
    Block6Diag,
    /// Full 3×3 blocks (9 values).
    Block3Dense,
}

impl FillType {
    /// Values stored per extra-diagonal entry (per direction).
    pub fn coeff_stride(self) -> usize {
        match self {
            FillType::Scalar | FillType::ScalarSym => 1,
            FillType::Block3Diag | FillType::Block3DiagSym => 3,
            FillType::Block6Diag => 6,
            FillType::Block3Dense => 9,
        }
    }

    /// Values stored per diagonal block.
    pub fn diag_stride(self) -> usize {
        self.coeff_stride()
    }

    /// Unknowns per row (arity of the multiplied vectors).
    pub fn vector_stride(self) -> usize {
        match self {
            FillType::Scalar | FillType::ScalarSym => 1,
            FillType::Block3Diag | FillType::Block3DiagSym | FillType::Block3Dense => 3,
            FillType::Block6Diag => 6,
        }
    }

    /// Whether the fill type itself implies symmetric coefficients.
    pub fn is_symmetric(self) -> bool {
        matches!(self, FillType::ScalarSym | FillType::Block3DiagSym)
    }

    pub fn name(self) -> &'static str {
        match self {
            FillType::Scalar => "scalar",
            FillType::ScalarSym => "scalar_sym",
            FillType::Block3Diag => "block3_diag",
            FillType::Block3DiagSym => "block3_diag_sym",
            FillType::Block6Diag => "block6_diag",
            FillType::Block3Dense => "block3_dense",
        }
    }
}

/// A sparse operator: shared structure plus one coefficient set.
pub struct Matrix {
    structure: Arc<MatrixStructure>,
    fill: FillType,
    /// Extra-diagonal blocks stored once per face (native only).
    symmetric: bool,
    da: Vec<f64>,
    xa: Vec<f64>,
    halo: Option<Arc<Halo>>,
    released: bool,
    backend: Option<Box<dyn ExternalBackend>>,
}

impl Matrix {
    /// New matrix with zeroed coefficients.
    pub fn new(
        structure: Arc<MatrixStructure>,
        fill: FillType,
        halo: Option<Arc<Halo>>,
    ) -> Result<Self> {
        if let Some(h) = &halo {
            let cols = h.n_local() + h.n_ghosts();
            if cols != structure.n_cols_ext() {
                return Err(LinOpError::SizeMismatch {
                    what: "halo ghost region",
                    expected: structure.n_cols_ext(),
                    found: cols,
                });
            }
        }
        let s = fill.coeff_stride();
        let ds = fill.diag_stride();
        let (da_len, xa_len) = match structure.kind() {
            StructureKind::Native { n_rows, n_edges, .. } => {
                // sized for the non-symmetric case; symmetric uses half
                (n_rows * ds, 2 * n_edges * s)
            }
            StructureKind::Csr(p) => (0, p.nnz() * s),
            StructureKind::Msr(p) => (p.n_rows * ds, p.nnz() * s),
        };
        Ok(Self {
            structure,
            fill,
            symmetric: fill.is_symmetric(),
            da: vec![0.0; da_len],
            xa: vec![0.0; xa_len],
            halo,
            released: false,
            backend: None,
        })
    }

    pub fn n_rows(&self) -> usize {
        self.structure.n_rows()
    }

    pub fn n_cols_ext(&self) -> usize {
        self.structure.n_cols_ext()
    }

    pub fn fill_type(&self) -> FillType {
        self.fill
    }

    pub fn storage_name(&self) -> &'static str {
        match &self.backend {
            Some(b) => b.name(),
            None => self.structure.storage_name(),
        }
    }

    pub fn structure(&self) -> &Arc<MatrixStructure> {
        &self.structure
    }

    pub fn halo(&self) -> Option<&Arc<Halo>> {
        self.halo.as_ref()
    }

    pub fn is_symmetric(&self) -> bool {
        self.symmetric
    }

    /// Set coefficients in mesh form: `da` is the dense diagonal
    /// (`n_rows·ds` values, `None` for zero), `xa` the per-face blocks
    /// in face order — one block per face when `symmetric`, the (i←j,
    /// j←i) pair otherwise. Requires a mesh-aligned structure.
    pub fn set_coefficients(
        &mut self,
        symmetric: bool,
        da: Option<&[f64]>,
        xa: &[f64],
    ) -> Result<()> {
        let s = self.fill.coeff_stride();
        let ds = self.fill.diag_stride();
        let n_rows = self.structure.n_rows();
        let n_edges = self
            .structure
            .edges()
            .map(|e| e.len())
            .ok_or(LinOpError::AssemblerPhase(
                "mesh-form coefficients need a mesh-aligned structure",
            ))?;
        let symmetric = symmetric || self.fill.is_symmetric();
        let xa_expected = if symmetric { n_edges * s } else { 2 * n_edges * s };
        if xa.len() != xa_expected {
            return Err(LinOpError::SizeMismatch {
                what: "xa",
                expected: xa_expected,
                found: xa.len(),
            });
        }
        if let Some(da) = da {
            if da.len() != n_rows * ds {
                return Err(LinOpError::SizeMismatch {
                    what: "da",
                    expected: n_rows * ds,
                    found: da.len(),
                });
            }
        }
        self.released = false;
        self.symmetric = symmetric;

        let structure = self.structure.clone();
        match structure.kind() {
            StructureKind::Native { .. } => {
                self.da.resize(n_rows * ds, 0.0);
                match da {
                    Some(da) => self.da.copy_from_slice(da),
                    None => self.da.fill(0.0),
                }
                self.xa.resize(xa.len(), 0.0);
                self.xa.copy_from_slice(xa);
            }
            StructureKind::Msr(pattern) => {
                self.da.resize(n_rows * ds, 0.0);
                match da {
                    Some(da) => self.da.copy_from_slice(da),
                    None => self.da.fill(0.0),
                }
                self.xa.resize(pattern.nnz() * s, 0.0);
                self.xa.fill(0.0);
                scatter_faces_into_pattern(pattern, &structure, symmetric, xa, s, &mut self.xa)?;
            }
            StructureKind::Csr(pattern) => {
                self.xa.resize(pattern.nnz() * s, 0.0);
                self.xa.fill(0.0);
                if let Some(da) = da {
                    for i in 0..n_rows {
                        let pos = pattern.lookup(i, i).ok_or(
                            LinOpError::InconsistentPattern {
                                row: i as u64,
                                col: i as u64,
                            },
                        )?;
                        // diag_stride == coeff_stride for every fill type
                        self.xa[pos * s..(pos + 1) * s].copy_from_slice(&da[i * ds..(i + 1) * ds]);
                    }
                }
                scatter_faces_into_pattern(pattern, &structure, symmetric, xa, s, &mut self.xa)?;
            }
        }
        if let Some(backend) = &mut self.backend {
            let pattern = structure.pattern()?;
            backend.set_values(pattern, &self.da, &self.xa)?;
        }
        Ok(())
    }

    /// Drop the coefficient arrays, keeping the shared structure. The
    /// matrix errors on use until coefficients are set again.
    pub fn release_coefficients(&mut self) {
        self.da = Vec::new();
        self.xa = Vec::new();
        self.released = true;
        if let Some(b) = &mut self.backend {
            b.release_values();
        }
    }

    /// Extract the per-unknown diagonal (`n_rows · vector_stride`
    /// values); dense blocks contribute their block diagonal.
    pub fn copy_diagonal(&self, out: &mut [f64]) -> Result<()> {
        if self.released {
            return Err(LinOpError::CoefficientsReleased);
        }
        let d = self.fill.vector_stride();
        let ds = self.fill.diag_stride();
        let n_rows = self.structure.n_rows();
        if out.len() < n_rows * d {
            return Err(LinOpError::SizeMismatch {
                what: "diagonal output",
                expected: n_rows * d,
                found: out.len(),
            });
        }
        let extract = |block: &[f64], out: &mut [f64]| match self.fill {
            FillType::Block3Dense => {
                out[0] = block[0];
                out[1] = block[4];
                out[2] = block[8];
            }
            _ => out.copy_from_slice(&block[..out.len()]),
        };
        match self.structure.kind() {
            StructureKind::Native { .. } | StructureKind::Msr(_) => {
                for i in 0..n_rows {
                    extract(&self.da[i * ds..(i + 1) * ds], &mut out[i * d..(i + 1) * d]);
                }
            }
            StructureKind::Csr(p) => {
                for i in 0..n_rows {
                    let blk = &mut out[i * d..(i + 1) * d];
                    match p.lookup(i, i) {
                        Some(pos) => extract(&self.xa[pos * ds..(pos + 1) * ds], blk),
                        None => blk.fill(0.0),
                    }
                }
            }
        }
        Ok(())
    }

    /// Dense diagonal blocks (native and MSR storage).
    pub fn diagonal(&self) -> Result<&[f64]> {
        if self.released {
            return Err(LinOpError::CoefficientsReleased);
        }
        match self.structure.kind() {
            StructureKind::Native { .. } | StructureKind::Msr(_) => Ok(&self.da),
            StructureKind::Csr(_) => Err(LinOpError::UnsupportedFillType {
                storage: "csr",
                fill: self.fill.name(),
                operation: "dense diagonal access",
            }),
        }
    }

    /// Hand pattern and values to a registered external backend; SpMV
    /// and solves dispatch there from now on. Needs CSR/MSR storage.
    pub fn attach_backend(&mut self, name: &str) -> Result<()> {
        let mut backend = external::create_backend(name)?;
        let pattern = self.structure.pattern()?;
        backend.set_pattern(pattern)?;
        if !self.released {
            backend.set_values(pattern, &self.da, &self.xa)?;
        }
        self.backend = Some(backend);
        Ok(())
    }

    pub fn backend_mut(&mut self) -> Option<&mut Box<dyn ExternalBackend>> {
        self.backend.as_mut()
    }

    /// `y ← α·A·x + β·y` over owned rows. Ghost values of `x` are
    /// refreshed first when a halo is attached; `exclude_diag` drops
    /// the diagonal contribution (smoother and gradient-clip paths).
    #[allow(clippy::too_many_arguments)]
    pub fn spmv<C: Communicator>(
        &self,
        ctx: &DispatchContext,
        comm: &C,
        alpha: f64,
        x: &mut [f64],
        beta: f64,
        y: &mut [f64],
        exclude_diag: bool,
    ) -> Result<()> {
        if self.released {
            return Err(LinOpError::CoefficientsReleased);
        }
        let d = self.fill.vector_stride();
        let n_rows = self.structure.n_rows();
        let n_cols_ext = self.structure.n_cols_ext();
        if x.len() < n_cols_ext * d {
            return Err(LinOpError::SizeMismatch {
                what: "spmv x",
                expected: n_cols_ext * d,
                found: x.len(),
            });
        }
        if y.len() < n_rows * d {
            return Err(LinOpError::SizeMismatch {
                what: "spmv y",
                expected: n_rows * d,
                found: y.len(),
            });
        }
        if let Some(halo) = &self.halo {
            halo.sync(comm, crate::config::Neighbourhood::Standard, x, d)?;
        }
        if let Some(backend) = &self.backend {
            if exclude_diag {
                return Err(LinOpError::UnsupportedFillType {
                    storage: backend.name(),
                    fill: self.fill.name(),
                    operation: "exclude-diagonal spmv",
                });
            }
            return backend.spmv(alpha, x, beta, y);
        }
        match self.structure.kind() {
            StructureKind::Native { .. } => {
                let edges = self.structure.edges().ok_or(LinOpError::AssemblerPhase(
                    "native structure without an edge list",
                ))?;
                kernels::mv_native(
                    ctx,
                    edges,
                    self.structure.colouring(),
                    self.fill,
                    self.symmetric,
                    &self.da,
                    &self.xa,
                    alpha,
                    beta,
                    x,
                    y,
                    n_rows,
                    n_cols_ext,
                    exclude_diag,
                )
            }
            StructureKind::Csr(p) => {
                kernels::mv_csr(ctx, p, self.fill, &self.xa, alpha, beta, x, y, exclude_diag);
                Ok(())
            }
            StructureKind::Msr(p) => {
                kernels::mv_msr(
                    ctx,
                    p,
                    self.fill,
                    &self.da,
                    &self.xa,
                    alpha,
                    beta,
                    x,
                    y,
                    exclude_diag,
                );
                Ok(())
            }
        }
    }

    /// `y ← A·x`.
    pub fn vector_multiply<C: Communicator>(
        &self,
        ctx: &DispatchContext,
        comm: &C,
        x: &mut [f64],
        y: &mut [f64],
    ) -> Result<()> {
        self.spmv(ctx, comm, 1.0, x, 0.0, y, false)
    }

    /// `y ← (A − diag(A))·x`.
    pub fn vector_multiply_exd<C: Communicator>(
        &self,
        ctx: &DispatchContext,
        comm: &C,
        x: &mut [f64],
        y: &mut [f64],
    ) -> Result<()> {
        self.spmv(ctx, comm, 1.0, x, 0.0, y, true)
    }

    pub(crate) fn values_mut(&mut self) -> (&mut Vec<f64>, &mut Vec<f64>) {
        (&mut self.da, &mut self.xa)
    }

    pub(crate) fn mark_filled(&mut self) {
        self.released = false;
    }
}

/// Scatter per-face blocks into a CSR/MSR value array.
fn scatter_faces_into_pattern(
    pattern: &CsrPattern,
    structure: &MatrixStructure,
    symmetric: bool,
    xa: &[f64],
    s: usize,
    val: &mut [f64],
) -> Result<()> {
    let edges = structure.edges().ok_or(LinOpError::AssemblerPhase(
        "mesh-form coefficients need a mesh-aligned structure",
    ))?;
    let n_rows = pattern.n_rows;
    for (f, pair) in edges.iter().enumerate() {
        let [i, j] = *pair;
        let (bi, bj) = if symmetric {
            let b = &xa[f * s..(f + 1) * s];
            (b, b)
        } else {
            (
                &xa[2 * f * s..(2 * f + 1) * s],
                &xa[(2 * f + 1) * s..(2 * f + 2) * s],
            )
        };
        let pos = pattern
            .lookup(i, j)
            .ok_or(LinOpError::InconsistentPattern {
                row: i as u64,
                col: j as u64,
            })?;
        for (k, v) in bi.iter().enumerate() {
            val[pos * s + k] += v;
        }
        if j < n_rows {
            let pos = pattern
                .lookup(j, i)
                .ok_or(LinOpError::InconsistentPattern {
                    row: j as u64,
                    col: i as u64,
                })?;
            for (k, v) in bj.iter().enumerate() {
                val[pos * s + k] += v;
            }
        }
    }
    Ok(())
}

/// Build a matrix for a mesh following the configured storage choice.
/// `Auto` resolves to MSR, the mesh-aligned default; `External`
/// prepares a CSR structure for a later [`Matrix::attach_backend`].
pub fn matrix_create(
    adj: &MeshAdjacency,
    cfg: &CoreConfig,
    fill: FillType,
    halo: Option<Arc<Halo>>,
) -> Result<Matrix> {
    let structure = match cfg.matrix_storage {
        MatrixStorage::Native => MatrixStructure::native_from_mesh(adj),
        MatrixStorage::Csr | MatrixStorage::External => MatrixStructure::csr_from_mesh(adj),
        MatrixStorage::Msr | MatrixStorage::Auto => MatrixStructure::msr_from_mesh(adj),
    };
    Matrix::new(structure, fill, halo)
}
