//! Structural mesh data: face→cell pairs, cell→cell graph, colouring.
//!
//! Local cell ids number owned cells `[0, n_cells)` with ghosts
//! appended in `[n_cells, n_cells_ext)`. Interior faces store an
//! ordered cell pair whose first entry is always owned; boundary faces
//! store a single owned cell. All arrays are `Arc`-shared so matrix
//! structures can reference them without copying.

use std::sync::Arc;

use crate::error::{LinOpError, Result};

/// Conflict-free grouping of interior faces: within one group no cell
/// appears twice, so a face scatter may write without synchronisation.
#[derive(Debug, Clone)]
pub struct FaceColouring {
    /// Group `g` covers `faces[group_index[g]..group_index[g + 1]]`.
    pub group_index: Vec<usize>,
    /// Face ids, permuted by group.
    pub faces: Vec<usize>,
}

impl FaceColouring {
    pub fn n_groups(&self) -> usize {
        self.group_index.len() - 1
    }

    pub fn group(&self, g: usize) -> &[usize] {
        &self.faces[self.group_index[g]..self.group_index[g + 1]]
    }
}

/// Read-only structural mesh data shared with the operator core.
#[derive(Debug, Clone)]
pub struct MeshAdjacency {
    /// Owned cell count.
    pub n_cells: usize,
    /// Owned + ghost cell count.
    pub n_cells_ext: usize,
    /// Interior face cell pairs; `[f][0]` is always owned.
    pub i_face_cells: Arc<[[usize; 2]]>,
    /// Boundary face owned cell.
    pub b_face_cells: Arc<[usize]>,
    /// Cell→cell CSR index (owned cells only), derived from faces.
    pub cell_cells_idx: Arc<[usize]>,
    /// Cell→cell CSR neighbour list, ids in `[0, n_cells_ext)`.
    pub cell_cells: Arc<[usize]>,
    /// Optional conflict-free face grouping for threaded scatters.
    pub face_colouring: Option<Arc<FaceColouring>>,
    /// Optional global cell id per local cell (owned then ghosts).
    pub global_cell_ids: Option<Arc<[u64]>>,
}

impl MeshAdjacency {
    /// Build and validate an adjacency from raw face lists.
    ///
    /// Derives the cell→cell graph and a greedy face colouring.
    pub fn new(
        n_cells: usize,
        n_cells_ext: usize,
        i_face_cells: Vec<[usize; 2]>,
        b_face_cells: Vec<usize>,
        global_cell_ids: Option<Vec<u64>>,
    ) -> Result<Self> {
        if n_cells_ext < n_cells {
            return Err(LinOpError::InvalidAdjacency(format!(
                "n_cells_ext {n_cells_ext} < n_cells {n_cells}"
            )));
        }
        for (f, pair) in i_face_cells.iter().enumerate() {
            if pair[0] == pair[1] {
                return Err(LinOpError::InvalidAdjacency(format!(
                    "interior face {f} references cell {} twice",
                    pair[0]
                )));
            }
            if pair[0] >= n_cells {
                return Err(LinOpError::InvalidAdjacency(format!(
                    "interior face {f}: first cell {} is not owned",
                    pair[0]
                )));
            }
            if pair[1] >= n_cells_ext {
                return Err(LinOpError::InvalidAdjacency(format!(
                    "interior face {f}: cell {} out of range {n_cells_ext}",
                    pair[1]
                )));
            }
        }
        for (f, &c) in b_face_cells.iter().enumerate() {
            if c >= n_cells {
                return Err(LinOpError::InvalidAdjacency(format!(
                    "boundary face {f}: cell {c} is not owned"
                )));
            }
        }
        if let Some(ids) = &global_cell_ids {
            if ids.len() != n_cells_ext {
                return Err(LinOpError::SizeMismatch {
                    what: "global_cell_ids",
                    expected: n_cells_ext,
                    found: ids.len(),
                });
            }
        }

        let (cell_cells_idx, cell_cells) =
            cell_graph_from_faces(n_cells, &i_face_cells);
        let colouring = greedy_face_colouring(n_cells_ext, &i_face_cells);

        Ok(Self {
            n_cells,
            n_cells_ext,
            i_face_cells: i_face_cells.into(),
            b_face_cells: b_face_cells.into(),
            cell_cells_idx: cell_cells_idx.into(),
            cell_cells: cell_cells.into(),
            face_colouring: Some(Arc::new(colouring)),
            global_cell_ids: global_cell_ids.map(Into::into),
        })
    }

    pub fn n_i_faces(&self) -> usize {
        self.i_face_cells.len()
    }

    pub fn n_b_faces(&self) -> usize {
        self.b_face_cells.len()
    }

    pub fn n_ghosts(&self) -> usize {
        self.n_cells_ext - self.n_cells
    }

    /// Neighbours of owned cell `c` (owned and ghost ids).
    pub fn cell_neighbours(&self, c: usize) -> &[usize] {
        &self.cell_cells[self.cell_cells_idx[c]..self.cell_cells_idx[c + 1]]
    }

    /// 1-D line of `n` cells, faces between consecutive cells. Used by
    /// unit tests and the Poisson scenarios.
    pub fn line(n: usize) -> Self {
        let i_face_cells: Vec<[usize; 2]> = (0..n - 1).map(|i| [i, i + 1]).collect();
        // One boundary face at each end.
        let b_face_cells = vec![0, n - 1];
        let global: Vec<u64> = (0..n as u64).collect();
        Self::new(n, n, i_face_cells, b_face_cells, Some(global))
            .expect("line mesh is always valid")
    }

    /// One rank's slice of a periodic ring of `size * n_owned` cells:
    /// `n_owned` owned cells plus two ghosts (left/right neighbour).
    /// Ghost local ids are `n_owned` (left) and `n_owned + 1` (right).
    pub fn ring_rank(rank: usize, size: usize, n_owned: usize) -> Self {
        let n_global = (size * n_owned) as u64;
        let base = (rank * n_owned) as u64;
        let mut i_face_cells: Vec<[usize; 2]> =
            (0..n_owned - 1).map(|i| [i, i + 1]).collect();
        // faces to the ghost cells
        i_face_cells.push([0, n_owned]); // left ghost
        i_face_cells.push([n_owned - 1, n_owned + 1]); // right ghost
        let mut global: Vec<u64> = (0..n_owned as u64).map(|i| base + i).collect();
        global.push((base + n_global - 1) % n_global); // left ghost
        global.push((base + n_owned as u64) % n_global); // right ghost
        Self::new(n_owned, n_owned + 2, i_face_cells, vec![], Some(global))
            .expect("ring mesh is always valid")
    }
}

/// Derive the owned-cell→cell CSR graph from interior faces.
fn cell_graph_from_faces(
    n_cells: usize,
    i_face_cells: &[[usize; 2]],
) -> (Vec<usize>, Vec<usize>) {
    let mut deg = vec![0usize; n_cells];
    for pair in i_face_cells {
        deg[pair[0]] += 1;
        if pair[1] < n_cells {
            deg[pair[1]] += 1;
        }
    }
    let mut idx = vec![0usize; n_cells + 1];
    for c in 0..n_cells {
        idx[c + 1] = idx[c] + deg[c];
    }
    let mut list = vec![0usize; idx[n_cells]];
    let mut write = idx.clone();
    for pair in i_face_cells {
        list[write[pair[0]]] = pair[1];
        write[pair[0]] += 1;
        if pair[1] < n_cells {
            list[write[pair[1]]] = pair[0];
            write[pair[1]] += 1;
        }
    }
    for c in 0..n_cells {
        list[idx[c]..idx[c + 1]].sort_unstable();
    }
    (idx, list)
}

/// Greedy colouring: assign each face the first group in which neither
/// of its cells appears yet.
fn greedy_face_colouring(n_cells_ext: usize, i_face_cells: &[[usize; 2]]) -> FaceColouring {
    let n_faces = i_face_cells.len();
    let mut colour = vec![usize::MAX; n_faces];
    // cell_last[c] == g means cell c is already written in group g
    let mut cell_last = vec![usize::MAX; n_cells_ext];
    let mut n_groups = 0usize;

    // One pass per group keeps the bookkeeping to a single marker array.
    let mut remaining = n_faces;
    while remaining > 0 {
        let g = n_groups;
        n_groups += 1;
        for (f, pair) in i_face_cells.iter().enumerate() {
            if colour[f] != usize::MAX {
                continue;
            }
            if cell_last[pair[0]] != g && cell_last[pair[1]] != g {
                colour[f] = g;
                cell_last[pair[0]] = g;
                cell_last[pair[1]] = g;
                remaining -= 1;
            }
        }
    }

    let mut counts = vec![0usize; n_groups];
    for &c in &colour {
        counts[c] += 1;
    }
    let mut group_index = vec![0usize; n_groups + 1];
    for g in 0..n_groups {
        group_index[g + 1] = group_index[g] + counts[g];
    }
    let mut faces = vec![0usize; n_faces];
    let mut write = group_index.clone();
    for (f, &c) in colour.iter().enumerate() {
        faces[write[c]] = f;
        write[c] += 1;
    }
    FaceColouring { group_index, faces }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn line_mesh_counts() {
        let m = MeshAdjacency::line(5);
        assert_eq!(m.n_i_faces(), 4);
        assert_eq!(m.n_b_faces(), 2);
        assert_eq!(m.cell_neighbours(0), &[1]);
        assert_eq!(m.cell_neighbours(2), &[1, 3]);
    }

    #[test]
    fn rejects_degenerate_face() {
        let err = MeshAdjacency::new(2, 2, vec![[1, 1]], vec![], None).unwrap_err();
        assert!(matches!(err, LinOpError::InvalidAdjacency(_)));
    }

    #[test]
    fn rejects_ghost_as_first_cell() {
        let err = MeshAdjacency::new(2, 3, vec![[2, 0]], vec![], None).unwrap_err();
        assert!(matches!(err, LinOpError::InvalidAdjacency(_)));
    }

    #[test]
    fn colouring_groups_are_conflict_free() {
        let m = MeshAdjacency::line(20);
        let col = m.face_colouring.as_ref().unwrap();
        for g in 0..col.n_groups() {
            let mut seen = HashSet::new();
            for &f in col.group(g) {
                let [i, j] = m.i_face_cells[f];
                assert!(seen.insert(i), "cell {i} written twice in group {g}");
                assert!(seen.insert(j), "cell {j} written twice in group {g}");
            }
        }
        // every face coloured exactly once
        let total: usize = (0..col.n_groups()).map(|g| col.group(g).len()).sum();
        assert_eq!(total, m.n_i_faces());
    }

    #[test]
    fn ring_rank_ghost_globals() {
        let m = MeshAdjacency::ring_rank(0, 2, 10);
        let ids = m.global_cell_ids.as_ref().unwrap();
        assert_eq!(ids[10], 19); // left ghost wraps to last global cell
        assert_eq!(ids[11], 10); // right ghost is rank 1's first cell
        let m1 = MeshAdjacency::ring_rank(1, 2, 10);
        let ids1 = m1.global_cell_ids.as_ref().unwrap();
        assert_eq!(ids1[10], 9);
        assert_eq!(ids1[11], 0);
    }
}
