//! Thin iterative solve driver.
//!
//! One algorithm, conjugate gradients with an optional Jacobi
//! preconditioner, enough to close the loop from assembled operator to
//! solution field. Matrices with an external backend attached delegate
//! the whole solve there. Dot products reduce across ranks, so every
//! rank must call collectively.

use log::{debug, warn};

use crate::comm::{Communicator, ReduceOp, allreduce};
use crate::dispatch::DispatchContext;
use crate::error::Result;
use crate::matrix::Matrix;

/// Preconditioner choice for [`solve`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Precond {
    None,
    #[default]
    Jacobi,
}

/// Convergence controls.
#[derive(Debug, Clone, Copy)]
pub struct SolveParams {
    /// Relative residual target `‖r‖ / ‖rhs‖`.
    pub tol: f64,
    pub max_iter: usize,
    pub precond: Precond,
}

impl Default for SolveParams {
    fn default() -> Self {
        Self {
            tol: 1e-8,
            max_iter: 1000,
            precond: Precond::Jacobi,
        }
    }
}

/// Outcome of a solve. Non-convergence is a status, not an error: the
/// caller decides whether a stalled solve aborts the run.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SolveStats {
    pub iterations: usize,
    pub residual: f64,
    pub converged: bool,
}

/// Rank-reduced dot product over owned unknowns.
fn dot<C: Communicator>(ctx: &DispatchContext, comm: &C, a: &[f64], b: &[f64]) -> Result<f64> {
    let n = a.len().min(b.len());
    let mut v = [ctx.reduce_sum(n, |i| a[i] * b[i])];
    allreduce(comm, ReduceOp::Sum, &mut v)?;
    Ok(v[0])
}

/// Solve `A·x = rhs` by preconditioned conjugate gradients.
///
/// `x` carries the initial guess and must include ghost space
/// (`n_cols_ext · vector_stride`); only the owned part is meaningful
/// on return. `rhs` covers owned rows.
pub fn solve<C: Communicator>(
    ctx: &DispatchContext,
    comm: &C,
    matrix: &mut Matrix,
    rhs: &[f64],
    x: &mut [f64],
    params: &SolveParams,
) -> Result<SolveStats> {
    if let Some(backend) = matrix.backend_mut() {
        return backend.solve(rhs, x, params);
    }

    let d = matrix.fill_type().vector_stride();
    let n = matrix.n_rows() * d;
    let n_ext = matrix.n_cols_ext() * d;

    let inv_diag: Option<Vec<f64>> = match params.precond {
        Precond::Jacobi => {
            let mut diag = vec![0.0; n];
            matrix.copy_diagonal(&mut diag)?;
            Some(
                diag.iter()
                    .map(|&v| if v != 0.0 { 1.0 / v } else { 1.0 })
                    .collect(),
            )
        }
        Precond::None => None,
    };
    let apply_precond = |ctx: &DispatchContext, src: &[f64], dst: &mut [f64]| match &inv_diag {
        Some(inv) => ctx.map_into(dst, |i| inv[i] * src[i]),
        None => dst.copy_from_slice(&src[..dst.len()]),
    };

    let rhs_norm = dot(ctx, comm, rhs, rhs)?.sqrt();
    let threshold = if rhs_norm > 0.0 {
        params.tol * rhs_norm
    } else {
        params.tol
    };

    // r = rhs - A x
    let mut r = vec![0.0; n];
    matrix.spmv(ctx, comm, -1.0, x, 0.0, &mut r, false)?;
    ctx.for_each_block(&mut r, 1, |i, v| v[0] += rhs[i]);

    let mut residual = dot(ctx, comm, &r, &r)?.sqrt();
    if residual <= threshold {
        return Ok(SolveStats {
            iterations: 0,
            residual,
            converged: true,
        });
    }

    let mut z = vec![0.0; n];
    apply_precond(ctx, &r, &mut z);
    let mut p = vec![0.0; n_ext];
    p[..n].copy_from_slice(&z);
    let mut q = vec![0.0; n];
    let mut rz = dot(ctx, comm, &r, &z)?;

    for it in 1..=params.max_iter {
        matrix.vector_multiply(ctx, comm, &mut p, &mut q)?;
        let pq = dot(ctx, comm, &p[..n], &q)?;
        if pq == 0.0 {
            // operator annihilated the search direction; stalled
            return Ok(SolveStats {
                iterations: it,
                residual,
                converged: false,
            });
        }
        let alpha = rz / pq;
        {
            let p_owned = &p[..n];
            ctx.for_each_block(x, 1, |i, v| {
                if i < n {
                    v[0] += alpha * p_owned[i];
                }
            });
        }
        ctx.for_each_block(&mut r, 1, |i, v| v[0] -= alpha * q[i]);

        residual = dot(ctx, comm, &r, &r)?.sqrt();
        if residual <= threshold {
            debug!("cg converged in {it} iterations, residual {residual:e}");
            return Ok(SolveStats {
                iterations: it,
                residual,
                converged: true,
            });
        }

        apply_precond(ctx, &r, &mut z);
        let rz_new = dot(ctx, comm, &r, &z)?;
        let beta = rz_new / rz;
        rz = rz_new;
        {
            let z_ref = &z;
            ctx.for_each_block(&mut p[..n], 1, |i, v| v[0] = z_ref[i] + beta * v[0]);
        }
    }

    warn!(
        "cg stopped at residual {residual:e} after {} iterations",
        params.max_iter
    );
    Ok(SolveStats {
        iterations: params.max_iter,
        residual,
        converged: false,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comm::NoComm;
    use crate::config::{CoreConfig, MatrixStorage};
    use crate::matrix::{matrix_create, FillType};
    use crate::mesh::MeshAdjacency;

    fn poisson_dirichlet(n: usize) -> Matrix {
        let adj = MeshAdjacency::line(n);
        let cfg = CoreConfig {
            matrix_storage: MatrixStorage::Msr,
            ..CoreConfig::default()
        };
        let mut m = matrix_create(&adj, &cfg, FillType::Scalar, None).unwrap();
        let da = vec![2.0; n];
        let xa = vec![-1.0; 2 * (n - 1)];
        m.set_coefficients(false, Some(&da), &xa).unwrap();
        m
    }

    #[test]
    fn cg_solves_poisson() {
        let n = 32;
        let mut m = poisson_dirichlet(n);
        let ctx = DispatchContext::serial();
        let rhs = vec![1.0; n];
        let mut x = vec![0.0; n];
        let stats = solve(&ctx, &NoComm, &mut m, &rhs, &mut x, &SolveParams::default()).unwrap();
        assert!(stats.converged, "residual {}", stats.residual);
        // verify A x = rhs
        let mut ax = vec![0.0; n];
        m.vector_multiply(&ctx, &NoComm, &mut x, &mut ax).unwrap();
        for (a, b) in ax.iter().zip(&rhs) {
            assert!((a - b).abs() < 1e-6);
        }
    }

    #[test]
    fn jacobi_and_plain_cg_agree() {
        let n = 16;
        let mut m = poisson_dirichlet(n);
        let ctx = DispatchContext::serial();
        let rhs: Vec<f64> = (0..n).map(|i| (i as f64 * 0.3).cos()).collect();
        let mut x_j = vec![0.0; n];
        let mut x_n = vec![0.0; n];
        let p_j = SolveParams {
            precond: Precond::Jacobi,
            ..SolveParams::default()
        };
        let p_n = SolveParams {
            precond: Precond::None,
            ..SolveParams::default()
        };
        assert!(solve(&ctx, &NoComm, &mut m, &rhs, &mut x_j, &p_j)
            .unwrap()
            .converged);
        assert!(solve(&ctx, &NoComm, &mut m, &rhs, &mut x_n, &p_n)
            .unwrap()
            .converged);
        for (a, b) in x_j.iter().zip(&x_n) {
            assert!((a - b).abs() < 1e-5);
        }
    }

    #[test]
    fn iteration_budget_reports_non_convergence() {
        let n = 64;
        let mut m = poisson_dirichlet(n);
        let ctx = DispatchContext::serial();
        let rhs = vec![1.0; n];
        let mut x = vec![0.0; n];
        let params = SolveParams {
            tol: 1e-14,
            max_iter: 2,
            precond: Precond::None,
        };
        let stats = solve(&ctx, &NoComm, &mut m, &rhs, &mut x, &params).unwrap();
        assert!(!stats.converged);
        assert_eq!(stats.iterations, 2);
        assert!(stats.residual > 0.0);
    }

    #[test]
    fn zero_rhs_converges_immediately() {
        let n = 8;
        let mut m = poisson_dirichlet(n);
        let ctx = DispatchContext::serial();
        let rhs = vec![0.0; n];
        let mut x = vec![0.0; n];
        let stats = solve(&ctx, &NoComm, &mut m, &rhs, &mut x, &SolveParams::default()).unwrap();
        assert!(stats.converged);
        assert_eq!(stats.iterations, 0);
    }
}
