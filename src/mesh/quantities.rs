//! Metric mesh quantities consumed by the face-coefficient builders.
//!
//! All arrays are indexed by face or cell local id; ghost entries are
//! present for cell-based arrays so a halo sync can fill them.

use crate::error::{LinOpError, Result};
use crate::mesh::MeshAdjacency;

/// Sub-grid obstruction of cell volume, scalar or tensorial.
#[derive(Debug, Clone)]
pub enum Porosity {
    /// One factor per cell (owned + ghosts).
    Scalar(Vec<f64>),
    /// Scalar factor plus a symmetric tensor per cell.
    Tensor {
        cell: Vec<f64>,
        sym: Vec<[f64; 6]>,
    },
}

/// Metric data for the core: weights, distances, surfaces, normals.
#[derive(Debug, Clone)]
pub struct MeshQuantities {
    /// Face interpolation factor `pnd` per interior face, in (0, 1).
    pub weight: Vec<f64>,
    /// Distance between the two adjacent cell centres per interior face.
    pub i_dist: Vec<f64>,
    /// Cell-centre to face-centre distance per boundary face.
    pub b_dist: Vec<f64>,
    /// Interior face surface (area).
    pub i_face_surf: Vec<f64>,
    /// Boundary face surface.
    pub b_face_surf: Vec<f64>,
    /// Interior face area vector (normal scaled by surface).
    pub i_face_normal: Vec<[f64; 3]>,
    /// Boundary face area vector.
    pub b_face_normal: Vec<[f64; 3]>,
    /// Interior face centre of gravity.
    pub i_face_cog: Vec<[f64; 3]>,
    /// Boundary face centre of gravity.
    pub b_face_cog: Vec<[f64; 3]>,
    /// Cell centres (owned + ghosts).
    pub cell_cen: Vec<[f64; 3]>,
    /// Cell volumes (owned + ghosts).
    pub cell_vol: Vec<f64>,
    /// Fluid interior face surface when it differs from the geometric
    /// one (integral porous model); `None` otherwise.
    pub i_f_face_surf: Option<Vec<f64>>,
    /// Optional porosity field.
    pub porosity: Option<Porosity>,
    /// Cells flagged as solid/disabled; faces between two disabled
    /// cells get zero coefficients.
    pub c_disable_flag: Option<Vec<bool>>,
}

impl MeshQuantities {
    /// Validate array lengths against an adjacency.
    pub fn check(&self, adj: &MeshAdjacency) -> Result<()> {
        let checks: [(&'static str, usize, usize); 8] = [
            ("weight", self.weight.len(), adj.n_i_faces()),
            ("i_dist", self.i_dist.len(), adj.n_i_faces()),
            ("b_dist", self.b_dist.len(), adj.n_b_faces()),
            ("i_face_surf", self.i_face_surf.len(), adj.n_i_faces()),
            ("b_face_surf", self.b_face_surf.len(), adj.n_b_faces()),
            ("i_face_normal", self.i_face_normal.len(), adj.n_i_faces()),
            ("b_face_normal", self.b_face_normal.len(), adj.n_b_faces()),
            ("cell_cen", self.cell_cen.len(), adj.n_cells_ext),
        ];
        for (what, found, expected) in checks {
            if found != expected {
                return Err(LinOpError::SizeMismatch {
                    what,
                    expected,
                    found,
                });
            }
        }
        Ok(())
    }

    /// Uniform unit metrics for a 1-D line of `n` cells with unit
    /// spacing along x. Matches [`MeshAdjacency::line`].
    pub fn line(n: usize) -> Self {
        let n_i = n - 1;
        Self {
            weight: vec![0.5; n_i],
            i_dist: vec![1.0; n_i],
            b_dist: vec![0.5; 2],
            i_face_surf: vec![1.0; n_i],
            b_face_surf: vec![1.0; 2],
            i_face_normal: vec![[1.0, 0.0, 0.0]; n_i],
            b_face_normal: vec![[-1.0, 0.0, 0.0], [1.0, 0.0, 0.0]],
            i_face_cog: (0..n_i).map(|f| [f as f64 + 0.5, 0.0, 0.0]).collect(),
            b_face_cog: vec![[-0.5, 0.0, 0.0], [n as f64 - 0.5, 0.0, 0.0]],
            cell_cen: (0..n).map(|c| [c as f64, 0.0, 0.0]).collect(),
            cell_vol: vec![1.0; n],
            i_f_face_surf: None,
            porosity: None,
            c_disable_flag: None,
        }
    }
}
