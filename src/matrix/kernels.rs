//! Host SpMV kernels, one per storage variant, generic over fill type.
//!
//! All kernels compute `y ← α·A·x + β·y` over owned rows. The native
//! kernel scatters per-face contributions through the dispatch
//! context's summation policy; CSR and MSR gather row-wise and need no
//! conflict resolution.

use crate::dispatch::DispatchContext;
use crate::error::Result;
use crate::matrix::structure::CsrPattern;
use crate::matrix::FillType;
use crate::mesh::FaceColouring;

/// `acc += α · E · xb` for one off-diagonal block.
#[inline]
fn acc_offdiag(fill: FillType, alpha: f64, e: &[f64], xb: &[f64], acc: &mut [f64]) {
    match fill {
        FillType::Scalar | FillType::ScalarSym => {
            acc[0] += alpha * e[0] * xb[0];
        }
        FillType::Block3Diag | FillType::Block3DiagSym | FillType::Block6Diag => {
            for k in 0..acc.len() {
                acc[k] += alpha * e[k] * xb[k];
            }
        }
        FillType::Block3Dense => {
            for r in 0..3 {
                let mut s = 0.0;
                for c in 0..3 {
                    s += e[3 * r + c] * xb[c];
                }
                acc[r] += alpha * s;
            }
        }
    }
}

/// `yb ← β·yb + α · D · xb` for one diagonal block.
#[inline]
fn apply_diag(fill: FillType, alpha: f64, beta: f64, d: &[f64], xb: &[f64], yb: &mut [f64]) {
    match fill {
        FillType::Scalar | FillType::ScalarSym => {
            let base = if beta == 0.0 { 0.0 } else { beta * yb[0] };
            yb[0] = base + alpha * d[0] * xb[0];
        }
        FillType::Block3Diag | FillType::Block3DiagSym | FillType::Block6Diag => {
            for k in 0..yb.len() {
                let base = if beta == 0.0 { 0.0 } else { beta * yb[k] };
                yb[k] = base + alpha * d[k] * xb[k];
            }
        }
        FillType::Block3Dense => {
            for r in 0..3 {
                let base = if beta == 0.0 { 0.0 } else { beta * yb[r] };
                let mut s = 0.0;
                for c in 0..3 {
                    s += d[3 * r + c] * xb[c];
                }
                yb[r] = base + alpha * s;
            }
        }
    }
}

/// `yb ← β·yb` only.
#[inline]
fn scale(beta: f64, yb: &mut [f64]) {
    for v in yb.iter_mut() {
        *v = if beta == 0.0 { 0.0 } else { beta * *v };
    }
}

/// Native (edge-based) kernel. `xa` holds one block per face when
/// `sym`, two otherwise (block `2f` acts on row `i`, `2f+1` on row `j`).
/// Face contributions to ghost rows are accumulated in scratch space
/// and discarded; the owning rank computes them from its own face copy.
#[allow(clippy::too_many_arguments)]
pub(super) fn mv_native(
    ctx: &DispatchContext,
    edges: &[[usize; 2]],
    colouring: Option<&FaceColouring>,
    fill: FillType,
    sym: bool,
    da: &[f64],
    xa: &[f64],
    alpha: f64,
    beta: f64,
    x: &[f64],
    y: &mut [f64],
    n_rows: usize,
    n_cols_ext: usize,
    exclude_diag: bool,
) -> Result<()> {
    let d = fill.vector_stride();
    let s = fill.coeff_stride();
    let ds = fill.diag_stride();

    let mut scratch = vec![0.0f64; n_cols_ext * d];
    ctx.scatter_faces(edges, colouring, &mut scratch, d, |face, bi, bj| {
        let [i, j] = edges[face];
        let (ei, ej) = if sym {
            let e = &xa[face * s..(face + 1) * s];
            (e, e)
        } else {
            (
                &xa[2 * face * s..(2 * face + 1) * s],
                &xa[(2 * face + 1) * s..(2 * face + 2) * s],
            )
        };
        acc_offdiag(fill, alpha, ei, &x[j * d..(j + 1) * d], bi);
        acc_offdiag(fill, alpha, ej, &x[i * d..(i + 1) * d], bj);
    })?;

    ctx.for_each_block(&mut y[..n_rows * d], d, |i, yb| {
        if exclude_diag {
            scale(beta, yb);
        } else {
            apply_diag(
                fill,
                alpha,
                beta,
                &da[i * ds..(i + 1) * ds],
                &x[i * d..(i + 1) * d],
                yb,
            );
        }
        for (v, acc) in yb.iter_mut().zip(&scratch[i * d..(i + 1) * d]) {
            *v += acc;
        }
    });
    Ok(())
}

/// CSR kernel; the diagonal entry sits inside the row values.
#[allow(clippy::too_many_arguments)]
pub(super) fn mv_csr(
    ctx: &DispatchContext,
    pattern: &CsrPattern,
    fill: FillType,
    val: &[f64],
    alpha: f64,
    beta: f64,
    x: &[f64],
    y: &mut [f64],
    exclude_diag: bool,
) {
    let d = fill.vector_stride();
    let s = fill.coeff_stride();
    let n_rows = pattern.n_rows;
    let row_index = &pattern.row_index;
    let col_id = &pattern.col_id;

    ctx.for_each_block(&mut y[..n_rows * d], d, |i, yb| {
        let mut acc = [0.0f64; 6];
        let acc = &mut acc[..d];
        for k in row_index[i]..row_index[i + 1] {
            let col = col_id[k];
            if exclude_diag && col == i {
                continue;
            }
            let e = &val[k * s..(k + 1) * s];
            if col == i && fill != FillType::Block3Dense {
                // diagonal of a diagonal-block fill multiplies componentwise
                for c in 0..d {
                    acc[c] += e[c.min(s - 1)] * x[i * d + c];
                }
            } else if col == i {
                for r in 0..3 {
                    let mut t = 0.0;
                    for c in 0..3 {
                        t += e[3 * r + c] * x[i * 3 + c];
                    }
                    acc[r] += t;
                }
            } else {
                acc_offdiag(fill, 1.0, e, &x[col * d..(col + 1) * d], acc);
            }
        }
        for (c, v) in yb.iter_mut().enumerate() {
            let base = if beta == 0.0 { 0.0 } else { beta * *v };
            *v = base + alpha * acc[c];
        }
    });
}

/// MSR kernel; off-diagonal rows gathered as CSR, dense diagonal apart.
#[allow(clippy::too_many_arguments)]
pub(super) fn mv_msr(
    ctx: &DispatchContext,
    pattern: &CsrPattern,
    fill: FillType,
    da: &[f64],
    xa: &[f64],
    alpha: f64,
    beta: f64,
    x: &[f64],
    y: &mut [f64],
    exclude_diag: bool,
) {
    let d = fill.vector_stride();
    let s = fill.coeff_stride();
    let ds = fill.diag_stride();
    let n_rows = pattern.n_rows;
    let row_index = &pattern.row_index;
    let col_id = &pattern.col_id;

    ctx.for_each_block(&mut y[..n_rows * d], d, |i, yb| {
        if exclude_diag {
            scale(beta, yb);
        } else {
            apply_diag(
                fill,
                alpha,
                beta,
                &da[i * ds..(i + 1) * ds],
                &x[i * d..(i + 1) * d],
                yb,
            );
        }
        for k in row_index[i]..row_index[i + 1] {
            let col = col_id[k];
            let e = &xa[k * s..(k + 1) * s];
            acc_offdiag(fill, alpha, e, &x[col * d..(col + 1) * d], yb);
        }
    });
}
