//! Distributed matrix assembly from global (row, col, value) triples.
//!
//! Assembly runs in two phases. The structural phase
//! ([`MatrixAssembler`]) registers global entry ids, routes off-rank
//! rows to their owners, freezes a CSR/MSR pattern with ghost columns
//! appended after owned ones, and derives the halo that keeps ghost
//! column values current. The value phase ([`AssemblerValues`]) then
//! accumulates scalar or block coefficients into a matrix over that
//! pattern; values for unregistered entries are an error, never
//! silently created. Under the symmetric hint one triangle is enough:
//! both the pattern and the values of the mirror entry are filled in.
//!
//! A contribution whose row *and* column are both off-rank is computed
//! identically on the two ranks sharing the face, so each side sends
//! half of it.

use std::sync::Arc;

use bytemuck::{Pod, Zeroable, cast_slice};
use log::debug;

use crate::comm::{self, Communicator, ReduceOp, Wait, allreduce};
use crate::error::{LinOpError, Result};
use crate::halo::{Halo, HaloLists, RecvSection, SendSection};
use crate::matrix::structure::{CsrPattern, MatrixStructure};
use crate::matrix::{FillType, Matrix};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Pod, Zeroable)]
#[repr(C)]
struct IdPair {
    row: u64,
    col: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
#[repr(C)]
struct Triplet {
    row: u64,
    col: u64,
    /// Component within the entry's value block.
    comp: u64,
    val: f64,
}

/// Frozen outcome of the structural phase.
struct AssembledLayout {
    /// Global row range `[lo, hi)` per rank, ascending.
    ranges: Vec<[u64; 2]>,
    /// Sorted global ids of ghost columns.
    ghosts: Vec<u64>,
    structure: Arc<MatrixStructure>,
    halo: Option<Arc<Halo>>,
}

/// Structural phase of distributed assembly.
pub struct MatrixAssembler {
    l_range: [u64; 2],
    /// Build an MSR pattern (diagonal apart) instead of CSR.
    separate_diag: bool,
    /// Mirror every posted entry, pattern and values both.
    symmetric_hint: bool,
    entries: Vec<IdPair>,
    layout: Option<AssembledLayout>,
}

impl MatrixAssembler {
    /// `l_range` is this rank's half-open global row range. Every
    /// diagonal entry of the range is registered up front.
    pub fn new(l_range: [u64; 2], separate_diag: bool, symmetric_hint: bool) -> Self {
        let mut entries = Vec::new();
        if !separate_diag {
            for g in l_range[0]..l_range[1] {
                entries.push(IdPair { row: g, col: g });
            }
        }
        Self {
            l_range,
            separate_diag,
            symmetric_hint,
            entries,
            layout: None,
        }
    }

    pub fn n_rows(&self) -> usize {
        (self.l_range[1] - self.l_range[0]) as usize
    }

    pub fn row_range(&self) -> [u64; 2] {
        self.l_range
    }

    /// Register future entries by global ids; duplicates collapse at
    /// [`compute`](Self::compute).
    pub fn add_ids(&mut self, rows: &[u64], cols: &[u64]) {
        for (&r, &c) in rows.iter().zip(cols) {
            self.entries.push(IdPair { row: r, col: c });
            if self.symmetric_hint && r != c {
                self.entries.push(IdPair { row: c, col: r });
            }
        }
    }

    /// Freeze the pattern. Collective: routes off-rank rows to their
    /// owners and derives the ghost-column halo.
    pub fn compute<C: Communicator>(&mut self, comm: &C) -> Result<()> {
        let size = comm.size();
        let me = comm.rank();
        let ranges = gather_ranges(comm, self.l_range)?;
        let lo = self.l_range[0];
        let n_rows = self.n_rows();

        // Route entries whose row another rank owns.
        let mut outbox: Vec<Vec<IdPair>> = vec![Vec::new(); size];
        let mut local: Vec<IdPair> = Vec::new();
        for &e in &self.entries {
            let owner = owner_of(&ranges, e.row)?;
            if owner == me {
                local.push(e);
            } else {
                outbox[owner].push(e);
            }
        }
        for (_, received) in exchange_per_peer(comm, &outbox)? {
            local.extend(received);
        }

        // Ghost columns, sorted by global id, appended after owned rows.
        let mut ghosts: Vec<u64> = local
            .iter()
            .map(|e| e.col)
            .filter(|&c| c < self.l_range[0] || c >= self.l_range[1])
            .collect();
        ghosts.sort_unstable();
        ghosts.dedup();
        for &g in &ghosts {
            // every ghost column must have an owner
            owner_of(&ranges, g)?;
        }

        let mut pairs = Vec::with_capacity(local.len());
        for e in &local {
            if self.separate_diag && e.row == e.col {
                continue;
            }
            let r = (e.row - lo) as usize;
            let c = local_col(self.l_range, &ghosts, n_rows, e.col)
                .ok_or(LinOpError::UnownedGlobalId { id: e.col })?;
            pairs.push((r, c));
        }
        let n_cols_ext = n_rows + ghosts.len();
        let pattern = CsrPattern::from_entries(n_rows, n_cols_ext, pairs, !self.separate_diag);
        debug!(
            "assembled pattern: {} rows, {} ghosts, {} entries",
            n_rows,
            ghosts.len(),
            pattern.nnz()
        );
        let structure = MatrixStructure::from_pattern(pattern, self.separate_diag);

        // build_halo exchanges collectively, so every rank of a
        // multi-rank run enters it even with no ghosts of its own.
        let halo = if ghosts.is_empty() && size == 1 {
            None
        } else {
            Some(Arc::new(build_halo(
                comm, &ranges, self.l_range, n_rows, &ghosts,
            )?))
        };

        self.layout = Some(AssembledLayout {
            ranges,
            ghosts,
            structure,
            halo,
        });
        Ok(())
    }

    /// Matrix over the frozen pattern, zero-valued, scalar fill.
    pub fn create_matrix(&self) -> Result<Matrix> {
        self.create_matrix_with_fill(FillType::Scalar)
    }

    /// Matrix over the frozen pattern with block-sized values; the
    /// pattern stays one entry per (row, col), each entry holding the
    /// fill type's block.
    pub fn create_matrix_with_fill(&self, fill: FillType) -> Result<Matrix> {
        let layout = self.layout()?;
        Matrix::new(layout.structure.clone(), fill, layout.halo.clone())
    }

    /// Sorted global ids of the ghost columns (after `compute`).
    pub fn ghost_ids(&self) -> Result<&[u64]> {
        Ok(&self.layout()?.ghosts)
    }

    fn layout(&self) -> Result<&AssembledLayout> {
        self.layout
            .as_ref()
            .ok_or(LinOpError::AssemblerPhase("compute was not called"))
    }
}

/// Value phase: coefficient accumulation over a frozen pattern. The
/// matrix's fill type sets the block stride [`add_block`](Self::add_block)
/// expects.
pub struct AssemblerValues<'a> {
    assembler: &'a MatrixAssembler,
    matrix: &'a mut Matrix,
    outbox: Vec<Vec<Triplet>>,
    my_rank: usize,
}

impl<'a> AssemblerValues<'a> {
    /// Start a value pass; existing coefficients are zeroed.
    pub fn init(
        assembler: &'a MatrixAssembler,
        matrix: &'a mut Matrix,
        my_rank: usize,
    ) -> Result<Self> {
        let layout = assembler.layout()?;
        if !Arc::ptr_eq(matrix.structure(), &layout.structure) {
            return Err(LinOpError::AssemblerPhase(
                "matrix was not created by this assembler",
            ));
        }
        {
            let (da, xa) = matrix.values_mut();
            da.fill(0.0);
            xa.fill(0.0);
        }
        matrix.mark_filled();
        let n_ranks = layout.ranges.len();
        Ok(Self {
            assembler,
            matrix,
            outbox: vec![Vec::new(); n_ranks],
            my_rank,
        })
    }

    /// Accumulate `v` into global entry `(row, col)`; scalar fills
    /// only, block fills go through [`add_block`](Self::add_block).
    pub fn add(&mut self, row: u64, col: u64, v: f64) -> Result<()> {
        self.add_block(row, col, std::slice::from_ref(&v))
    }

    /// Accumulate one value block into global entry `(row, col)`.
    /// Under the symmetric hint the mirror entry receives the same
    /// block (transposed for dense blocks), so posting one triangle
    /// is enough.
    pub fn add_block(&mut self, row: u64, col: u64, vals: &[f64]) -> Result<()> {
        let fill = self.matrix.fill_type();
        let b = fill.coeff_stride();
        if vals.len() != b {
            return Err(LinOpError::SizeMismatch {
                what: "assembler value block",
                expected: b,
                found: vals.len(),
            });
        }
        for (k, &v) in vals.iter().enumerate() {
            self.post(row, col, k, v)?;
        }
        if self.assembler.symmetric_hint && row != col {
            for (k, &v) in vals.iter().enumerate() {
                let mk = if fill == FillType::Block3Dense {
                    (k % 3) * 3 + k / 3
                } else {
                    k
                };
                self.post(col, row, mk, v)?;
            }
        }
        Ok(())
    }

    /// Route one component to the row's owner.
    fn post(&mut self, row: u64, col: u64, comp: usize, v: f64) -> Result<()> {
        let layout = self.assembler.layout()?;
        let row_owner = owner_of(&layout.ranges, row)?;
        if row_owner == self.my_rank {
            return self.add_local(row, col, comp, v);
        }
        let col_owner = owner_of(&layout.ranges, col)?;
        // both ids off-rank: the mirrored face exists on the owner too
        let factor = if col_owner != self.my_rank { 0.5 } else { 1.0 };
        self.outbox[row_owner].push(Triplet {
            row,
            col,
            comp: comp as u64,
            val: v * factor,
        });
        Ok(())
    }

    fn add_local(&mut self, row: u64, col: u64, comp: usize, v: f64) -> Result<()> {
        let layout = self.assembler.layout()?;
        let range = self.assembler.l_range;
        let n_rows = self.assembler.n_rows();
        let b = self.matrix.fill_type().coeff_stride();
        let r = (row - range[0]) as usize;
        if self.assembler.separate_diag && row == col {
            let (da, _) = self.matrix.values_mut();
            da[r * b + comp] += v;
            return Ok(());
        }
        let c = local_col(range, &layout.ghosts, n_rows, col)
            .ok_or(LinOpError::InconsistentPattern { row, col })?;
        let pos = layout
            .structure
            .pattern()?
            .lookup(r, c)
            .ok_or(LinOpError::InconsistentPattern { row, col })?;
        let (_, xa) = self.matrix.values_mut();
        xa[pos * b + comp] += v;
        Ok(())
    }

    /// Flush off-rank contributions and close the value pass.
    /// Collective over all ranks of `comm`.
    pub fn finalize<C: Communicator>(mut self, comm: &C) -> Result<()> {
        let outbox = std::mem::take(&mut self.outbox);
        for (_, triplets) in exchange_per_peer(comm, &outbox)? {
            for t in triplets {
                self.add_local(t.row, t.col, t.comp as usize, t.val)?;
            }
        }
        Ok(())
    }
}

/// Map a global column id to a local one (owned, then sorted ghosts).
fn local_col(range: [u64; 2], ghosts: &[u64], n_rows: usize, g: u64) -> Option<usize> {
    if g >= range[0] && g < range[1] {
        return Some((g - range[0]) as usize);
    }
    ghosts.binary_search(&g).ok().map(|k| n_rows + k)
}

/// Rank owning global id `g`; ranges are ascending and disjoint.
fn owner_of(ranges: &[[u64; 2]], g: u64) -> Result<usize> {
    let r = ranges.partition_point(|range| range[1] <= g);
    if r < ranges.len() && g >= ranges[r][0] {
        Ok(r)
    } else {
        Err(LinOpError::UnownedGlobalId { id: g })
    }
}

/// All ranks' row ranges, in rank order.
fn gather_ranges<C: Communicator>(comm: &C, l_range: [u64; 2]) -> Result<Vec<[u64; 2]>> {
    let size = comm.size();
    if size == 1 {
        return Ok(vec![l_range]);
    }
    // Exact for ranges below 2^53 rows, far beyond any mesh here.
    let mut vals = vec![0.0f64; 2 * size];
    vals[2 * comm.rank()] = l_range[0] as f64;
    vals[2 * comm.rank() + 1] = l_range[1] as f64;
    allreduce(comm, ReduceOp::Sum, &mut vals)?;
    Ok(vals
        .chunks_exact(2)
        .map(|c| [c[0] as u64, c[1] as u64])
        .collect())
}

/// Two-phase all-to-all: counts first, then payloads. Returns one
/// `(peer, items)` entry per peer that sent anything.
fn exchange_per_peer<C: Communicator, T: Pod>(
    comm: &C,
    outbox: &[Vec<T>],
) -> Result<Vec<(usize, Vec<T>)>> {
    let size = comm.size();
    let me = comm.rank();
    if size == 1 {
        return Ok(Vec::new());
    }
    let tag_counts = comm::next_collective_tag();
    let tag_data = comm::next_collective_tag();

    let mut count_handles = Vec::with_capacity(size - 1);
    for peer in (0..size).filter(|&p| p != me) {
        let mut buf = vec![0u8; size_of::<u64>()];
        count_handles.push((peer, comm.irecv(peer, tag_counts, &mut buf)));
    }
    for peer in (0..size).filter(|&p| p != me) {
        let n = outbox[peer].len() as u64;
        comm.isend(peer, tag_counts, bytemuck::bytes_of(&n)).wait();
    }
    let mut incoming = Vec::with_capacity(size - 1);
    for (peer, h) in count_handles {
        let data = h.wait().ok_or_else(|| LinOpError::Communication {
            rank: peer,
            detail: "exchange count missing".into(),
        })?;
        let n: u64 = bytemuck::pod_read_unaligned(&data);
        incoming.push((peer, n as usize));
    }

    let mut data_handles = Vec::new();
    for &(peer, n) in &incoming {
        if n == 0 {
            continue;
        }
        let mut buf = vec![0u8; n * size_of::<T>()];
        data_handles.push((peer, comm.irecv(peer, tag_data, &mut buf)));
    }
    for peer in (0..size).filter(|&p| p != me) {
        if !outbox[peer].is_empty() {
            comm.isend(peer, tag_data, cast_slice(&outbox[peer])).wait();
        }
    }
    let mut result = Vec::with_capacity(data_handles.len());
    for (peer, h) in data_handles {
        let data = h.wait().ok_or_else(|| LinOpError::Communication {
            rank: peer,
            detail: "exchange payload missing".into(),
        })?;
        result.push((peer, bytemuck::pod_collect_to_vec(&data)));
    }
    Ok(result)
}

/// Halo keeping ghost column values current: one link per rank pair
/// and direction, ghost ids in sorted-global order on both sides.
fn build_halo<C: Communicator>(
    comm: &C,
    ranges: &[[u64; 2]],
    l_range: [u64; 2],
    n_rows: usize,
    ghosts: &[u64],
) -> Result<Halo> {
    let size = comm.size();

    // Tell every owner which of its rows we need.
    let mut requests: Vec<Vec<u64>> = vec![Vec::new(); size];
    for &g in ghosts {
        requests[owner_of(ranges, g)?].push(g);
    }
    let granted = exchange_per_peer(comm, &requests)?;

    let mut recv = Vec::new();
    for (peer, wanted) in requests.iter().enumerate() {
        if wanted.is_empty() {
            continue;
        }
        let ids = wanted
            .iter()
            .map(|g| {
                ghosts
                    .binary_search(g)
                    .map(|k| n_rows + k)
                    .map_err(|_| LinOpError::UnownedGlobalId { id: *g })
            })
            .collect::<Result<Vec<_>>>()?;
        recv.push(RecvSection {
            peer,
            channel: 0,
            ids,
        });
    }
    let mut send = Vec::new();
    for (peer, wanted) in granted {
        let ids = wanted
            .iter()
            .map(|&g| {
                if g >= l_range[0] && g < l_range[1] {
                    Ok((g - l_range[0]) as usize)
                } else {
                    Err(LinOpError::UnownedGlobalId { id: g })
                }
            })
            .collect::<Result<Vec<_>>>()?;
        send.push(SendSection {
            peer,
            channel: 0,
            transform: None,
            ids,
        });
    }
    Halo::new(
        n_rows,
        ghosts.len(),
        Vec::new(),
        HaloLists { send, recv },
        None,
    )
}
