//! Uniform parallel-for dispatch for cell, face and row loops.
//!
//! A [`DispatchContext`] decides per call whether a loop runs serial or
//! across host threads, and which summation discipline a face scatter
//! uses. Two contexts act as independent streams: the builders run
//! boundary-face loops on a second context while interior loops
//! proceed on the first. A device executor would register here behind
//! a feature flag without changing any call site.

use crate::config::SumType;
use crate::error::{LinOpError, Result};
use crate::mesh::FaceColouring;

#[cfg(feature = "rayon")]
use rayon::prelude::*;

/// Where kernels dispatched through a context execute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Placement {
    #[default]
    Host,
    /// Reserved for an accelerator executor; no built-in implementation.
    Device,
}

/// Per-call-site execution policy: placement, threading, scatter sum.
#[derive(Debug, Clone, Copy)]
pub struct DispatchContext {
    placement: Placement,
    sum_type: SumType,
    threaded: bool,
}

impl Default for DispatchContext {
    fn default() -> Self {
        Self::new()
    }
}

impl DispatchContext {
    /// Threaded host context; scatter policy resolved per mesh
    /// capability at the call site (coloured when a colouring exists).
    pub fn new() -> Self {
        Self {
            placement: Placement::Host,
            sum_type: SumType::Atomic,
            threaded: cfg!(feature = "rayon"),
        }
    }

    /// Strictly sequential context (reference results, small meshes).
    pub fn serial() -> Self {
        Self {
            placement: Placement::Host,
            sum_type: SumType::Atomic,
            threaded: false,
        }
    }

    pub fn with_sum_type(mut self, sum_type: SumType) -> Self {
        self.sum_type = sum_type;
        self
    }

    pub fn sum_type(&self) -> SumType {
        self.sum_type
    }

    pub fn use_device(&self) -> bool {
        self.placement == Placement::Device
    }

    pub fn is_threaded(&self) -> bool {
        self.threaded
    }

    /// Fill `out[i] = f(i)` for all `i`.
    pub fn map_into<T, F>(&self, out: &mut [T], f: F)
    where
        T: Send,
        F: Fn(usize) -> T + Sync,
    {
        #[cfg(feature = "rayon")]
        if self.threaded {
            out.par_iter_mut()
                .enumerate()
                .for_each(|(i, o)| *o = f(i));
            return;
        }
        for (i, o) in out.iter_mut().enumerate() {
            *o = f(i);
        }
    }

    /// Visit `out` in stride-sized blocks: `f(i, block_i)`.
    pub fn for_each_block<T, F>(&self, out: &mut [T], stride: usize, f: F)
    where
        T: Send,
        F: Fn(usize, &mut [T]) + Sync,
    {
        debug_assert_eq!(out.len() % stride.max(1), 0);
        #[cfg(feature = "rayon")]
        if self.threaded {
            out.par_chunks_mut(stride)
                .enumerate()
                .for_each(|(i, b)| f(i, b));
            return;
        }
        for (i, b) in out.chunks_mut(stride).enumerate() {
            f(i, b);
        }
    }

    /// Sum `f(i)` over `0..n` (clip counters, norms).
    pub fn reduce_sum<F>(&self, n: usize, f: F) -> f64
    where
        F: Fn(usize) -> f64 + Sync,
    {
        #[cfg(feature = "rayon")]
        if self.threaded {
            return (0..n).into_par_iter().map(&f).sum();
        }
        (0..n).map(f).sum()
    }

    /// Face-to-cell scatter: for each face `f` with cells `(i, j)`, the
    /// closure accumulates (`+=`) into the two stride-sized blocks for
    /// `i` and `j`. The context picks the conflict-resolution policy:
    ///
    /// * `Coloured` — direct writes, one colour group at a time
    ///   (requires `colouring`, rejected otherwise);
    /// * `Atomic` — thread-local partial sums reduced at the end, or a
    ///   plain loop when the context is serial.
    pub fn scatter_faces<F>(
        &self,
        edges: &[[usize; 2]],
        colouring: Option<&FaceColouring>,
        y: &mut [f64],
        stride: usize,
        f: F,
    ) -> Result<()>
    where
        F: Fn(usize, &mut [f64], &mut [f64]) + Sync,
    {
        if !self.threaded {
            scatter_serial(edges, y, stride, &f);
            return Ok(());
        }
        match self.sum_type {
            SumType::Coloured => {
                let col = colouring.ok_or(LinOpError::InvalidAdjacency(
                    "coloured scatter requested without a face colouring".into(),
                ))?;
                scatter_coloured(edges, col, y, stride, &f);
                Ok(())
            }
            SumType::Atomic => {
                scatter_partials(edges, y, stride, &f);
                Ok(())
            }
        }
    }
}

fn scatter_serial<F>(edges: &[[usize; 2]], y: &mut [f64], stride: usize, f: &F)
where
    F: Fn(usize, &mut [f64], &mut [f64]),
{
    let mut bi = [0.0f64; 9];
    let mut bj = [0.0f64; 9];
    for (face, pair) in edges.iter().enumerate() {
        bi[..stride].fill(0.0);
        bj[..stride].fill(0.0);
        f(face, &mut bi[..stride], &mut bj[..stride]);
        let oi = pair[0] * stride;
        let oj = pair[1] * stride;
        for k in 0..stride {
            y[oi + k] += bi[k];
            y[oj + k] += bj[k];
        }
    }
}

#[cfg(feature = "rayon")]
fn scatter_partials<F>(edges: &[[usize; 2]], y: &mut [f64], stride: usize, f: &F)
where
    F: Fn(usize, &mut [f64], &mut [f64]) + Sync,
{
    let len = y.len();
    let acc = (0..edges.len())
        .into_par_iter()
        .fold(
            || vec![0.0f64; len],
            |mut part, face| {
                let [i, j] = edges[face];
                // two non-overlapping blocks of the thread-local buffer
                let (lo, hi, first_is_i) = if i < j { (i, j, true) } else { (j, i, false) };
                let (head, tail) = part.split_at_mut(hi * stride);
                let bi = &mut head[lo * stride..lo * stride + stride];
                let bj = &mut tail[..stride];
                if first_is_i {
                    f(face, bi, bj);
                } else {
                    f(face, bj, bi);
                }
                part
            },
        )
        .reduce(
            || vec![0.0f64; len],
            |mut a, b| {
                for (x, v) in a.iter_mut().zip(b) {
                    *x += v;
                }
                a
            },
        );
    for (x, v) in y.iter_mut().zip(acc) {
        *x += v;
    }
}

#[cfg(not(feature = "rayon"))]
fn scatter_partials<F>(edges: &[[usize; 2]], y: &mut [f64], stride: usize, f: &F)
where
    F: Fn(usize, &mut [f64], &mut [f64]) + Sync,
{
    scatter_serial(edges, y, stride, f)
}

#[cfg(feature = "rayon")]
fn scatter_coloured<F>(
    edges: &[[usize; 2]],
    colouring: &FaceColouring,
    y: &mut [f64],
    stride: usize,
    f: &F,
) where
    F: Fn(usize, &mut [f64], &mut [f64]) + Sync,
{
    let shared = SharedSlice::new(y);
    for g in 0..colouring.n_groups() {
        colouring.group(g).par_iter().for_each(|&face| {
            let [i, j] = edges[face];
            // Sound: within one colour group no cell id repeats, so the
            // two blocks of every face in flight are disjoint.
            let bi = unsafe { shared.block_mut(i * stride, stride) };
            let bj = unsafe { shared.block_mut(j * stride, stride) };
            f(face, bi, bj);
        });
    }
}

#[cfg(not(feature = "rayon"))]
fn scatter_coloured<F>(
    edges: &[[usize; 2]],
    _colouring: &FaceColouring,
    y: &mut [f64],
    stride: usize,
    f: &F,
) where
    F: Fn(usize, &mut [f64], &mut [f64]) + Sync,
{
    scatter_serial(edges, y, stride, f)
}

/// Raw shared view of a mutable slice for colour-disjoint writes.
#[cfg(feature = "rayon")]
struct SharedSlice {
    ptr: *mut f64,
    len: usize,
}

#[cfg(feature = "rayon")]
unsafe impl Sync for SharedSlice {}

#[cfg(feature = "rayon")]
impl SharedSlice {
    fn new(s: &mut [f64]) -> Self {
        Self {
            ptr: s.as_mut_ptr(),
            len: s.len(),
        }
    }

    /// Caller guarantees blocks handed out concurrently are disjoint.
    #[allow(clippy::mut_from_ref)]
    unsafe fn block_mut(&self, offset: usize, len: usize) -> &mut [f64] {
        debug_assert!(offset + len <= self.len);
        unsafe { std::slice::from_raw_parts_mut(self.ptr.add(offset), len) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mesh::MeshAdjacency;

    fn run_scatter(ctx: &DispatchContext, adj: &MeshAdjacency) -> Vec<f64> {
        let mut y = vec![0.0; adj.n_cells_ext];
        ctx.scatter_faces(
            &adj.i_face_cells,
            adj.face_colouring.as_deref(),
            &mut y,
            1,
            |face, bi, bj| {
                bi[0] += (face + 1) as f64;
                bj[0] -= (face + 1) as f64;
            },
        )
        .unwrap();
        y
    }

    #[test]
    fn scatter_policies_agree() {
        let adj = MeshAdjacency::line(50);
        let serial = run_scatter(&DispatchContext::serial(), &adj);
        let atomic = run_scatter(&DispatchContext::new().with_sum_type(SumType::Atomic), &adj);
        let coloured = run_scatter(
            &DispatchContext::new().with_sum_type(SumType::Coloured),
            &adj,
        );
        assert_eq!(serial, atomic);
        assert_eq!(serial, coloured);
    }

    #[test]
    fn coloured_without_colouring_is_rejected() {
        let mut adj = MeshAdjacency::line(4);
        adj.face_colouring = None;
        let ctx = DispatchContext::new().with_sum_type(SumType::Coloured);
        let mut y = vec![0.0; adj.n_cells_ext];
        let r = ctx.scatter_faces(&adj.i_face_cells, None, &mut y, 1, |_, _, _| {});
        if ctx.is_threaded() {
            assert!(r.is_err());
        } else {
            assert!(r.is_ok());
        }
    }

    #[test]
    fn map_into_fills_every_index() {
        let ctx = DispatchContext::new();
        let mut out = vec![0.0; 100];
        ctx.map_into(&mut out, |i| i as f64 * 2.0);
        assert_eq!(out[0], 0.0);
        assert_eq!(out[99], 198.0);
    }

    #[test]
    fn reduce_sum_counts() {
        let ctx = DispatchContext::new();
        let s = ctx.reduce_sum(10, |i| if i % 2 == 0 { 1.0 } else { 0.0 });
        assert_eq!(s, 5.0);
    }
}
