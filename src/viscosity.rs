//! Face diffusion-coefficient builders.
//!
//! Every builder turns a per-cell diffusion property into per-face
//! stiffness coefficients `K·S/d` (a rate of flow), ready to feed the
//! operator's extra-diagonal terms. Interior loops run on `ctx` while
//! boundary loops run on `ctx_b`, so the two proceed as independent
//! streams.
//!
//! Cell arrays are halo-synced here; callers pass them sized
//! `n_cells_ext` with ghost entries left undefined.

use bytemuck::cast_slice_mut;
use log::{debug, warn};

use crate::comm::{Communicator, allreduce_counters};
use crate::config::FaceMean;
use crate::dispatch::DispatchContext;
use crate::error::{LinOpError, Result};
use crate::halo::Halo;
use crate::math;
use crate::mesh::{MeshAdjacency, MeshQuantities, Porosity};

/// Clip counts from the anisotropic-scalar builder, summed over ranks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ClipCounts {
    pub interior: u64,
    pub boundary: u64,
}

/// Offset distance clipping threshold, relative to `‖K·S‖·d`.
const CLIP_EPS: f64 = 0.1;

fn scalar_porosity(q: &MeshQuantities) -> Option<&[f64]> {
    match &q.porosity {
        Some(Porosity::Scalar(p)) => Some(p),
        Some(Porosity::Tensor { cell, .. }) => Some(cell),
        None => None,
    }
}

fn sync_cells<C: Communicator>(
    halo: Option<&Halo>,
    comm: &C,
    x: &mut [f64],
    arity: usize,
) -> Result<()> {
    if let Some(h) = halo {
        h.sync(comm, crate::config::Neighbourhood::Standard, x, arity)?;
    }
    Ok(())
}

/// Scalar-diffusivity face coefficients: `i_visc = mean(Ki, Kj)·S/d`
/// per interior face, `b_visc = S` (scaled by porosity) per boundary
/// face. The harmonic mean floors its denominator at `f64::MIN_POSITIVE`
/// so a zero-diffusivity cell yields a zero coefficient, not a NaN.
#[allow(clippy::too_many_arguments)]
pub fn face_viscosity<C: Communicator>(
    ctx: &DispatchContext,
    ctx_b: &DispatchContext,
    comm: &C,
    adj: &MeshAdjacency,
    q: &MeshQuantities,
    halo: Option<&Halo>,
    mean: FaceMean,
    c_visc: &mut [f64],
    i_visc: &mut [f64],
    b_visc: &mut [f64],
) -> Result<()> {
    check_face_outputs(adj, i_visc.len(), b_visc.len())?;
    sync_cells(halo, comm, c_visc, 1)?;

    let porosi = scalar_porosity(q);
    let c_visc = &*c_visc;
    let i_face_cells = &adj.i_face_cells;
    let surf = q.i_f_face_surf.as_deref().unwrap_or(&q.i_face_surf);
    let cell_visc = |c: usize| match porosi {
        Some(p) => c_visc[c] * p[c],
        None => c_visc[c],
    };

    match mean {
        FaceMean::Arithmetic => {
            ctx.map_into(i_visc, |f| {
                let [ii, jj] = i_face_cells[f];
                0.5 * (cell_visc(ii) + cell_visc(jj)) * surf[f] / q.i_dist[f]
            });
        }
        FaceMean::Harmonic => {
            ctx.map_into(i_visc, |f| {
                let [ii, jj] = i_face_cells[f];
                let (vi, vj) = (cell_visc(ii), cell_visc(jj));
                let pnd = q.weight[f];
                vi * vj / (pnd * vi + (1.0 - pnd) * vj).max(f64::MIN_POSITIVE) * surf[f]
                    / q.i_dist[f]
            });
        }
    }

    let b_face_cells = &adj.b_face_cells;
    ctx_b.map_into(b_visc, |f| match porosi {
        Some(p) => q.b_face_surf[f] * p[b_face_cells[f]],
        None => q.b_face_surf[f],
    });

    // Faces between two disabled cells carry no flux; zeroing the
    // coefficient lets multigrid treat those rows as penalised.
    if let Some(flag) = &q.c_disable_flag {
        ctx.for_each_block(i_visc, 1, |f, v| {
            let [ii, jj] = i_face_cells[f];
            if flag[ii] && flag[jj] {
                v[0] = 0.0;
            }
        });
    }
    Ok(())
}

/// Secondary-viscosity face values `κ − 2/3·μ`, combined from the
/// laminar, turbulent and volume contributions and averaged at faces.
/// Unlike [`face_viscosity`], no surface or distance factor is applied.
#[allow(clippy::too_many_arguments)]
pub fn face_viscosity_secondary<C: Communicator>(
    ctx: &DispatchContext,
    ctx_b: &DispatchContext,
    comm: &C,
    adj: &MeshAdjacency,
    q: &MeshQuantities,
    halo: Option<&Halo>,
    mean: FaceMean,
    laminar: &[f64],
    turbulent: Option<&[f64]>,
    volume_visc: Option<&[f64]>,
    secvif: &mut [f64],
    secvib: &mut [f64],
) -> Result<()> {
    check_face_outputs(adj, secvif.len(), secvib.len())?;
    let d2s3m = -2.0 / 3.0;

    let mut secvis = vec![0.0f64; adj.n_cells_ext];
    let porosi = scalar_porosity(q);
    ctx.for_each_block(&mut secvis[..adj.n_cells], 1, |c, v| {
        let mut s = d2s3m * laminar[c];
        if let Some(vv) = volume_visc {
            s += vv[c];
        }
        if let Some(t) = turbulent {
            s += d2s3m * t[c];
        }
        if let Some(p) = porosi {
            s *= p[c];
        }
        v[0] = s;
    });
    sync_cells(halo, comm, &mut secvis, 1)?;

    let i_face_cells = &adj.i_face_cells;
    let secvis = &secvis;
    match mean {
        FaceMean::Arithmetic => {
            ctx.map_into(secvif, |f| {
                let [ii, jj] = i_face_cells[f];
                0.5 * (secvis[ii] + secvis[jj])
            });
        }
        FaceMean::Harmonic => {
            ctx.map_into(secvif, |f| {
                let [ii, jj] = i_face_cells[f];
                let pnd = q.weight[f];
                secvis[ii] * secvis[jj] / (pnd * secvis[ii] + (1.0 - pnd) * secvis[jj])
            });
        }
    }

    let b_face_cells = &adj.b_face_cells;
    ctx_b.map_into(secvib, |f| secvis[b_face_cells[f]]);
    Ok(())
}

/// Porosity-combined cell tensors: the builders below work on
/// `porosity · K` when a porosity field is present.
fn poro_cell_tensors<'a, C: Communicator>(
    ctx: &DispatchContext,
    comm: &C,
    adj: &MeshAdjacency,
    q: &MeshQuantities,
    halo: Option<&Halo>,
    c_visc: &'a mut [[f64; 6]],
    scratch: &'a mut Vec<[f64; 6]>,
) -> Result<&'a [[f64; 6]]> {
    match &q.porosity {
        None => {
            if let Some(h) = halo {
                h.sync(
                    comm,
                    crate::config::Neighbourhood::Standard,
                    cast_slice_mut(c_visc),
                    6,
                )?;
            }
            Ok(c_visc)
        }
        Some(poro) => {
            scratch.resize(adj.n_cells_ext, [0.0; 6]);
            let src = &*c_visc;
            match poro {
                Porosity::Scalar(p) => {
                    ctx.map_into(&mut scratch[..adj.n_cells], |c| {
                        let mut t = src[c];
                        for v in &mut t {
                            *v *= p[c];
                        }
                        t
                    });
                }
                Porosity::Tensor { sym, .. } => {
                    ctx.map_into(&mut scratch[..adj.n_cells], |c| {
                        math::sym_33_product(&sym[c], &src[c])
                    });
                }
            }
            if let Some(h) = halo {
                h.sync(
                    comm,
                    crate::config::Neighbourhood::Standard,
                    cast_slice_mut(scratch.as_mut_slice()),
                    6,
                )?;
            }
            Ok(scratch)
        }
    }
}

/// Tensor face coefficients for a vector unknown: full 3×3 blocks
/// `mean(Ki, Kj)·S/d`, the harmonic mean being
/// `Ki·(pnd·Ki + (1−pnd)·Kj)⁻¹·Kj`.
#[allow(clippy::too_many_arguments)]
pub fn face_anisotropic_viscosity_vector<C: Communicator>(
    ctx: &DispatchContext,
    ctx_b: &DispatchContext,
    comm: &C,
    adj: &MeshAdjacency,
    q: &MeshQuantities,
    halo: Option<&Halo>,
    mean: FaceMean,
    c_visc: &mut [[f64; 6]],
    i_visc: &mut [[f64; 9]],
    b_visc: &mut [f64],
) -> Result<()> {
    check_face_outputs(adj, i_visc.len(), b_visc.len())?;
    let mut scratch = Vec::new();
    let k = poro_cell_tensors(ctx, comm, adj, q, halo, c_visc, &mut scratch)?;

    let i_face_cells = &adj.i_face_cells;
    let surf = q.i_f_face_surf.as_deref().unwrap_or(&q.i_face_surf);
    match mean {
        FaceMean::Arithmetic => {
            ctx.map_into(i_visc, |f| {
                let [ii, jj] = i_face_cells[f];
                let srfddi = surf[f] / q.i_dist[f];
                let mi = math::sym_33_to_full(&k[ii]);
                let mj = math::sym_33_to_full(&k[jj]);
                let mut out = [0.0; 9];
                for r in 0..3 {
                    for c in 0..3 {
                        out[3 * r + c] = 0.5 * (mi[r][c] + mj[r][c]) * srfddi;
                    }
                }
                out
            });
        }
        FaceMean::Harmonic => {
            ctx.map_into(i_visc, |f| {
                let [ii, jj] = i_face_cells[f];
                let pnd = q.weight[f];
                let mut s1 = [0.0; 6];
                for c in 0..6 {
                    s1[c] = pnd * k[ii][c] + (1.0 - pnd) * k[jj][c];
                }
                let s2 = math::sym_33_inv_cramer(&s1);
                let s1 = math::sym_33_product(&s2, &k[jj]);
                let s2 = math::sym_33_product(&k[ii], &s1);
                let srfddi = surf[f] / q.i_dist[f];
                let m = math::sym_33_to_full(&s2);
                let mut out = [0.0; 9];
                for r in 0..3 {
                    for c in 0..3 {
                        out[3 * r + c] = m[r][c] * srfddi;
                    }
                }
                out
            });
        }
    }

    let porosi = scalar_porosity(q);
    let b_face_cells = &adj.b_face_cells;
    ctx_b.map_into(b_visc, |f| match porosi {
        Some(p) => q.b_face_surf[f] * p[b_face_cells[f]],
        None => q.b_face_surf[f],
    });
    Ok(())
}

struct FaceWeight {
    w: [f64; 2],
    visc: f64,
    clips: u8,
    singular: bool,
}

/// Harmonic tensor-to-scalar face coefficients with non-orthogonality
/// offsets: per interior face the weights
/// `IF·Ki·S / ‖Ki·S‖²` and `FJ·Kj·S / ‖Kj·S‖²`, their inverse sum as
/// `i_visc`, and the analogous boundary weight. Offsets falling behind
/// the face are clipped to `0.1·‖K·S‖·d`; returns the rank-summed clip
/// counts. A face whose tensor flux normal vanishes (`‖K·S‖ = 0`) is
/// floored the same way, logged with its id, and counted; the builder
/// never fails on it.
#[allow(clippy::too_many_arguments)]
pub fn face_anisotropic_viscosity_scalar<C: Communicator>(
    ctx: &DispatchContext,
    ctx_b: &DispatchContext,
    comm: &C,
    adj: &MeshAdjacency,
    q: &MeshQuantities,
    halo: Option<&Halo>,
    c_visc: &mut [[f64; 6]],
    weighf: &mut [[f64; 2]],
    weighb: &mut [f64],
    i_visc: &mut [f64],
    b_visc: &mut [f64],
) -> Result<ClipCounts> {
    check_face_outputs(adj, i_visc.len(), b_visc.len())?;
    let mut scratch = Vec::new();
    let k = poro_cell_tensors(ctx, comm, adj, q, halo, c_visc, &mut scratch)?;

    let i_face_cells = &adj.i_face_cells;
    let mut faces: Vec<FaceWeight> = Vec::new();
    faces.resize_with(adj.n_i_faces(), || FaceWeight {
        w: [0.0; 2],
        visc: 0.0,
        clips: 0,
        singular: false,
    });
    ctx.map_into(&mut faces, |f| {
        let [ii, jj] = i_face_cells[f];
        let normal = &q.i_face_normal[f];
        let mut clips = 0u8;

        let kis = math::sym_33_3_product(&k[ii], normal);
        // zero flux normal: floor ‖K·S‖² so the clip below takes over
        let raw_i = math::square_norm_3(&kis);
        let viscis = raw_i.max(f64::MIN_POSITIVE);
        let fi = [
            q.i_face_cog[f][0] - q.cell_cen[ii][0],
            q.i_face_cog[f][1] - q.cell_cen[ii][1],
            q.i_face_cog[f][2] - q.cell_cen[ii][2],
        ];
        let fiki = math::sym_33_3_product(&k[ii], &fi);
        let mut fikis = math::dot_3(&fiki, normal);
        let distfi = (1.0 - q.weight[f]) * q.i_dist[f];
        let clip_i = CLIP_EPS * viscis.sqrt() * distfi;
        if fikis < clip_i || raw_i == 0.0 {
            fikis = clip_i;
            clips += 1;
        }

        let kjs = math::sym_33_3_product(&k[jj], normal);
        let raw_j = math::square_norm_3(&kjs);
        let viscjs = raw_j.max(f64::MIN_POSITIVE);
        let fj = [
            q.cell_cen[jj][0] - q.i_face_cog[f][0],
            q.cell_cen[jj][1] - q.i_face_cog[f][1],
            q.cell_cen[jj][2] - q.i_face_cog[f][2],
        ];
        let fjkj = math::sym_33_3_product(&k[jj], &fj);
        let mut fjkjs = math::dot_3(&fjkj, normal);
        let distfj = q.weight[f] * q.i_dist[f];
        let clip_j = CLIP_EPS * viscjs.sqrt() * distfj;
        if fjkjs < clip_j || raw_j == 0.0 {
            fjkjs = clip_j;
            clips += 1;
        }

        let w = [fikis / viscis, fjkjs / viscjs];
        FaceWeight {
            w,
            visc: 1.0 / (w[0] + w[1]),
            clips,
            singular: raw_i == 0.0 || raw_j == 0.0,
        }
    });

    let mut i_clips = 0u64;
    for (f, fw) in faces.iter().enumerate() {
        if fw.singular {
            warn!("interior face {f}: singular diffusion tensor (|K.S| = 0), offset floored");
        }
        weighf[f] = fw.w;
        i_visc[f] = fw.visc;
        i_clips += fw.clips as u64;
    }

    // Integral porous model: geometric and fluid sections differ.
    if let Some(fluid_surf) = &q.i_f_face_surf {
        ctx.for_each_block(i_visc, 1, |f, v| {
            v[0] *= fluid_surf[f] / q.i_face_surf[f];
        });
    }

    let b_face_cells = &adj.b_face_cells;
    let mut b_faces: Vec<(f64, u8, bool)> = vec![(0.0, 0, false); adj.n_b_faces()];
    ctx_b.map_into(&mut b_faces, |f| {
        let ii = b_face_cells[f];
        let normal = &q.b_face_normal[f];
        let kis = math::sym_33_3_product(&k[ii], normal);
        let raw = math::square_norm_3(&kis);
        let viscis = raw.max(f64::MIN_POSITIVE);
        let fi = [
            q.b_face_cog[f][0] - q.cell_cen[ii][0],
            q.b_face_cog[f][1] - q.cell_cen[ii][1],
            q.b_face_cog[f][2] - q.cell_cen[ii][2],
        ];
        let fiki = math::sym_33_3_product(&k[ii], &fi);
        let mut fikis = math::dot_3(&fiki, normal);
        let clip = CLIP_EPS * viscis.sqrt() * q.b_dist[f];
        let mut clips = 0u8;
        if fikis < clip || raw == 0.0 {
            fikis = clip;
            clips = 1;
        }
        (fikis / viscis, clips, raw == 0.0)
    });
    let mut b_clips = 0u64;
    for (f, &(w, c, singular)) in b_faces.iter().enumerate() {
        if singular {
            warn!("boundary face {f}: singular diffusion tensor (|K.S| = 0), offset floored");
        }
        weighb[f] = w;
        b_clips += c as u64;
    }

    let porosi = scalar_porosity(q);
    ctx_b.map_into(b_visc, |f| match porosi {
        Some(p) => q.b_face_surf[f] * p[b_face_cells[f]],
        None => q.b_face_surf[f],
    });

    let mut counts = [i_clips, b_clips];
    allreduce_counters(comm, &mut counts)?;
    if counts[0] + counts[1] > 0 {
        debug!(
            "face coefficients from tensor diffusivity: {} interior and {} boundary offset clippings",
            counts[0], counts[1]
        );
    }
    Ok(ClipCounts {
        interior: counts[0],
        boundary: counts[1],
    })
}

fn check_face_outputs(adj: &MeshAdjacency, n_i: usize, n_b: usize) -> Result<()> {
    if n_i != adj.n_i_faces() {
        return Err(LinOpError::SizeMismatch {
            what: "interior face output",
            expected: adj.n_i_faces(),
            found: n_i,
        });
    }
    if n_b != adj.n_b_faces() {
        return Err(LinOpError::SizeMismatch {
            what: "boundary face output",
            expected: adj.n_b_faces(),
            found: n_b,
        });
    }
    Ok(())
}
