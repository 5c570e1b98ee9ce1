//! Sparse operator connectivity, shared between matrices.
//!
//! A [`MatrixStructure`] is immutable once built and reference-counted:
//! any number of matrices (same equation, successive time steps,
//! multigrid levels) hold an `Arc` to one structure. The native variant
//! references the mesh's interior-face list without copying.

use std::sync::Arc;

use crate::error::{LinOpError, Result};
use crate::mesh::{FaceColouring, MeshAdjacency};

/// Compressed sparse row pattern; `col_id` sorted within each row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CsrPattern {
    pub n_rows: usize,
    /// Column count including ghost columns.
    pub n_cols_ext: usize,
    /// Row index, length `n_rows + 1`.
    pub row_index: Vec<usize>,
    /// Column ids, length `row_index[n_rows]`.
    pub col_id: Vec<usize>,
    /// Whether diagonal entries are part of the pattern.
    pub have_diag: bool,
}

impl CsrPattern {
    /// Build from (row, col) pairs; duplicates collapse.
    pub fn from_entries(
        n_rows: usize,
        n_cols_ext: usize,
        mut entries: Vec<(usize, usize)>,
        have_diag: bool,
    ) -> Self {
        entries.sort_unstable();
        entries.dedup();

        let mut row_index = vec![0usize; n_rows + 1];
        for &(r, _) in &entries {
            row_index[r + 1] += 1;
        }
        for r in 0..n_rows {
            row_index[r + 1] += row_index[r];
        }
        let col_id = entries.into_iter().map(|(_, c)| c).collect();
        Self {
            n_rows,
            n_cols_ext,
            row_index,
            col_id,
            have_diag,
        }
    }

    pub fn nnz(&self) -> usize {
        self.col_id.len()
    }

    /// Column ids of row `i`.
    pub fn row(&self, i: usize) -> &[usize] {
        &self.col_id[self.row_index[i]..self.row_index[i + 1]]
    }

    /// Position of `(row, col)` in the value array, if present.
    pub fn lookup(&self, row: usize, col: usize) -> Option<usize> {
        let lo = self.row_index[row];
        let hi = self.row_index[row + 1];
        self.col_id[lo..hi]
            .binary_search(&col)
            .ok()
            .map(|k| lo + k)
    }
}

/// Storage-variant tag plus variant-specific connectivity.
#[derive(Debug, Clone)]
pub enum StructureKind {
    /// Off-diagonal pattern is exactly the mesh interior-face list.
    Native {
        n_rows: usize,
        n_cols_ext: usize,
        n_edges: usize,
    },
    /// Diagonal inside the rows.
    Csr(CsrPattern),
    /// Diagonal stored separately; pattern holds off-diagonal only.
    Msr(CsrPattern),
}

/// Shared connectivity of a sparse operator.
#[derive(Debug, Clone)]
pub struct MatrixStructure {
    kind: StructureKind,
    /// Mesh edge list, referenced (not copied) when the pattern is
    /// mesh-aligned; used to scatter per-face coefficients.
    edges: Option<Arc<[[usize; 2]]>>,
    colouring: Option<Arc<FaceColouring>>,
}

impl MatrixStructure {
    pub fn kind(&self) -> &StructureKind {
        &self.kind
    }

    pub fn storage_name(&self) -> &'static str {
        match self.kind {
            StructureKind::Native { .. } => "native",
            StructureKind::Csr(_) => "csr",
            StructureKind::Msr(_) => "msr",
        }
    }

    pub fn n_rows(&self) -> usize {
        match &self.kind {
            StructureKind::Native { n_rows, .. } => *n_rows,
            StructureKind::Csr(p) | StructureKind::Msr(p) => p.n_rows,
        }
    }

    pub fn n_cols_ext(&self) -> usize {
        match &self.kind {
            StructureKind::Native { n_cols_ext, .. } => *n_cols_ext,
            StructureKind::Csr(p) | StructureKind::Msr(p) => p.n_cols_ext,
        }
    }

    /// Off-diagonal entry count (per direction for native).
    pub fn n_extra_diag(&self) -> usize {
        match &self.kind {
            StructureKind::Native { n_edges, .. } => *n_edges,
            StructureKind::Csr(p) => p.nnz(),
            StructureKind::Msr(p) => p.nnz(),
        }
    }

    pub fn edges(&self) -> Option<&Arc<[[usize; 2]]>> {
        self.edges.as_ref()
    }

    pub fn colouring(&self) -> Option<&FaceColouring> {
        self.colouring.as_deref()
    }

    /// Native structure referencing the mesh interior-face list.
    pub fn native_from_mesh(adj: &MeshAdjacency) -> Arc<Self> {
        Arc::new(Self {
            kind: StructureKind::Native {
                n_rows: adj.n_cells,
                n_cols_ext: adj.n_cells_ext,
                n_edges: adj.n_i_faces(),
            },
            edges: Some(adj.i_face_cells.clone()),
            colouring: adj.face_colouring.clone(),
        })
    }

    /// CSR structure from the mesh cell→cell graph, diagonal included.
    pub fn csr_from_mesh(adj: &MeshAdjacency) -> Arc<Self> {
        let mut entries = Vec::with_capacity(adj.n_cells + 2 * adj.n_i_faces());
        for c in 0..adj.n_cells {
            entries.push((c, c));
        }
        push_face_entries(adj, &mut entries);
        let pattern = CsrPattern::from_entries(adj.n_cells, adj.n_cells_ext, entries, true);
        Arc::new(Self {
            kind: StructureKind::Csr(pattern),
            edges: Some(adj.i_face_cells.clone()),
            colouring: adj.face_colouring.clone(),
        })
    }

    /// MSR structure from the mesh cell→cell graph, diagonal separate.
    pub fn msr_from_mesh(adj: &MeshAdjacency) -> Arc<Self> {
        let mut entries = Vec::with_capacity(2 * adj.n_i_faces());
        push_face_entries(adj, &mut entries);
        let pattern = CsrPattern::from_entries(adj.n_cells, adj.n_cells_ext, entries, false);
        Arc::new(Self {
            kind: StructureKind::Msr(pattern),
            edges: Some(adj.i_face_cells.clone()),
            colouring: adj.face_colouring.clone(),
        })
    }

    /// Structure over an assembled CSR pattern (no mesh edge list).
    pub fn from_pattern(pattern: CsrPattern, msr: bool) -> Arc<Self> {
        let kind = if msr {
            StructureKind::Msr(pattern)
        } else {
            StructureKind::Csr(pattern)
        };
        Arc::new(Self {
            kind,
            edges: None,
            colouring: None,
        })
    }

    /// Pattern reference for CSR/MSR structures.
    pub fn pattern(&self) -> Result<&CsrPattern> {
        match &self.kind {
            StructureKind::Csr(p) | StructureKind::Msr(p) => Ok(p),
            StructureKind::Native { .. } => Err(LinOpError::UnsupportedFillType {
                storage: "native",
                fill: "-",
                operation: "pattern access",
            }),
        }
    }
}

fn push_face_entries(adj: &MeshAdjacency, entries: &mut Vec<(usize, usize)>) {
    for pair in adj.i_face_cells.iter() {
        entries.push((pair[0], pair[1]));
        if pair[1] < adj.n_cells {
            entries.push((pair[1], pair[0]));
        }
    }
}
