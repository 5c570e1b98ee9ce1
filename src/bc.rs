//! Boundary-condition coefficient pairs.
//!
//! Each boundary face carries the affine relation `φ_face = a + b·φ_I`
//! between the face value and the adjacent cell value. With a face
//! exchange coefficient `h` (typically `K·S/d_b` from the viscosity
//! builders), the implicit diffusive closure is
//! `flux = h·(1 − b)·φ_I − h·a`, which folds into the diagonal and the
//! right-hand side.

use crate::error::{LinOpError, Result};
use crate::mesh::MeshAdjacency;

/// Per-boundary-face `(a, b)` pairs: `φ_face = a + b·φ_I`.
#[derive(Debug, Clone)]
pub struct BoundaryCoeffs {
    pub a: Vec<f64>,
    pub b: Vec<f64>,
}

impl BoundaryCoeffs {
    /// Homogeneous Neumann (zero-flux) on every face: `a = 0, b = 1`.
    pub fn homogeneous_neumann(n_b_faces: usize) -> Self {
        Self {
            a: vec![0.0; n_b_faces],
            b: vec![1.0; n_b_faces],
        }
    }

    /// Imposed face values: `a = value, b = 0`.
    pub fn dirichlet(values: &[f64]) -> Self {
        Self {
            a: values.to_vec(),
            b: vec![0.0; values.len()],
        }
    }

    /// Imposed face excess over the cell value: `a = jump, b = 1`.
    /// With exchange coefficient `h` the resulting flux is `−h·jump`.
    pub fn neumann(jumps: &[f64]) -> Self {
        Self {
            a: jumps.to_vec(),
            b: vec![1.0; jumps.len()],
        }
    }

    pub fn len(&self) -> usize {
        self.a.len()
    }

    pub fn is_empty(&self) -> bool {
        self.a.is_empty()
    }

    /// Fold the implicit closure into a diagonal and right-hand side:
    /// `da[I] += h·(1 − b)`, `rhs[I] += h·a` per boundary face, with
    /// `h = face_coeff[f]`.
    pub fn fold_into_system(
        &self,
        adj: &MeshAdjacency,
        face_coeff: &[f64],
        da: &mut [f64],
        rhs: &mut [f64],
    ) -> Result<()> {
        if self.len() != adj.n_b_faces() || face_coeff.len() != adj.n_b_faces() {
            return Err(LinOpError::SizeMismatch {
                what: "boundary coefficients",
                expected: adj.n_b_faces(),
                found: self.len().min(face_coeff.len()),
            });
        }
        for (f, &c) in adj.b_face_cells.iter().enumerate() {
            let h = face_coeff[f];
            da[c] += h * (1.0 - self.b[f]);
            rhs[c] += h * self.a[f];
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dirichlet_strengthens_diagonal() {
        let adj = MeshAdjacency::line(3);
        let bc = BoundaryCoeffs::dirichlet(&[10.0, 20.0]);
        let h = vec![2.0; 2];
        let mut da = vec![0.0; 3];
        let mut rhs = vec![0.0; 3];
        bc.fold_into_system(&adj, &h, &mut da, &mut rhs).unwrap();
        assert_eq!(da, vec![2.0, 0.0, 2.0]);
        assert_eq!(rhs, vec![20.0, 0.0, 40.0]);
    }

    #[test]
    fn homogeneous_neumann_is_inert() {
        let adj = MeshAdjacency::line(3);
        let bc = BoundaryCoeffs::homogeneous_neumann(2);
        let h = vec![2.0; 2];
        let mut da = vec![1.0; 3];
        let mut rhs = vec![0.0; 3];
        bc.fold_into_system(&adj, &h, &mut da, &mut rhs).unwrap();
        assert_eq!(da, vec![1.0; 3]);
        assert_eq!(rhs, vec![0.0; 3]);
    }

    #[test]
    fn length_mismatch_is_rejected() {
        let adj = MeshAdjacency::line(3);
        let bc = BoundaryCoeffs::dirichlet(&[1.0]);
        let mut da = vec![0.0; 3];
        let mut rhs = vec![0.0; 3];
        assert!(bc
            .fold_into_system(&adj, &[1.0, 1.0], &mut da, &mut rhs)
            .is_err());
    }
}
