//! Ghost-cell exchange between ranks.
//!
//! A [`Halo`] stores pre-computed send and receive index lists per
//! neighbour, grouped by periodic transform. `sync` packs owned values
//! into one contiguous buffer per link, sends with non-blocking
//! point-to-point messages, and scatters received values into the
//! ghost region. The split [`Halo::start`] / [`PendingSync::wait`]
//! pair lets callers overlap local work with the exchange.
//!
//! Periodic images: the *sender* applies the transform rotation for
//! arity-3/6/9 arrays, so the receiver always does a plain copy.
//!
//! Within one rank, successive syncs on the same halo are ordered by a
//! per-halo sequence number folded into the message tag. Distinct
//! halos count from the same tag base, so two halos over the same
//! communicator must not have syncs in flight at the same time.

use std::sync::atomic::{AtomicU16, Ordering::Relaxed};

use bytemuck::{Pod, cast_slice};

use crate::comm::{Communicator, Wait};
use crate::config::Neighbourhood;
use crate::error::{LinOpError, Result};
use crate::math;

/// A periodic image transform; vectors and tensors crossing the
/// periodic boundary are rotated by `rotation`.
#[derive(Debug, Clone)]
pub struct PeriodicTransform {
    pub rotation: [[f64; 3]; 3],
}

/// Owned values this rank contributes to one link.
#[derive(Debug, Clone)]
pub struct SendSection {
    /// Receiving rank (may equal the local rank for periodic self-images).
    pub peer: usize,
    /// Link id agreed between the two ranks; distinguishes multiple
    /// links in the same direction between one pair of ranks. `< 16`.
    pub channel: u16,
    /// Index into the halo's transform list; `None` is the identity.
    pub transform: Option<usize>,
    /// Owned local ids to pack, in link order.
    pub ids: Vec<usize>,
}

/// Ghost positions this rank fills from one link.
#[derive(Debug, Clone)]
pub struct RecvSection {
    /// Sending rank.
    pub peer: usize,
    /// Must match the sender's `channel`.
    pub channel: u16,
    /// Ghost local ids (each `>= n_local`), in link order.
    pub ids: Vec<usize>,
}

/// One neighbourhood's worth of links.
#[derive(Debug, Clone, Default)]
pub struct HaloLists {
    pub send: Vec<SendSection>,
    pub recv: Vec<RecvSection>,
}

/// Pre-computed ghost exchange lists for one mesh.
#[derive(Debug)]
pub struct Halo {
    n_local: usize,
    n_ghosts: usize,
    transforms: Vec<PeriodicTransform>,
    standard: HaloLists,
    extended: HaloLists,
    seq: AtomicU16,
}

const HALO_TAG_BASE: u16 = 0x1000;
const CHANNELS_PER_SYNC: u16 = 16;

impl Halo {
    /// Build a halo; `extended` of `None` reuses the standard lists.
    pub fn new(
        n_local: usize,
        n_ghosts: usize,
        transforms: Vec<PeriodicTransform>,
        standard: HaloLists,
        extended: Option<HaloLists>,
    ) -> Result<Self> {
        let extended = extended.unwrap_or_else(|| standard.clone());
        for lists in [&standard, &extended] {
            for s in &lists.send {
                if s.channel >= CHANNELS_PER_SYNC {
                    return Err(LinOpError::InvalidAdjacency(format!(
                        "halo channel {} out of range",
                        s.channel
                    )));
                }
                if let Some(t) = s.transform {
                    if t >= transforms.len() {
                        return Err(LinOpError::InvalidAdjacency(format!(
                            "halo transform {t} undefined"
                        )));
                    }
                }
                if let Some(&id) = s.ids.iter().find(|&&id| id >= n_local) {
                    return Err(LinOpError::InvalidAdjacency(format!(
                        "halo send id {id} is not an owned cell"
                    )));
                }
            }
            for r in &lists.recv {
                if let Some(&id) = r
                    .ids
                    .iter()
                    .find(|&&id| id < n_local || id >= n_local + n_ghosts)
                {
                    return Err(LinOpError::InvalidAdjacency(format!(
                        "halo recv id {id} is not a ghost position"
                    )));
                }
            }
        }
        Ok(Self {
            n_local,
            n_ghosts,
            transforms,
            standard,
            extended,
            seq: AtomicU16::new(0),
        })
    }

    pub fn n_local(&self) -> usize {
        self.n_local
    }

    pub fn n_ghosts(&self) -> usize {
        self.n_ghosts
    }

    fn lists(&self, nb: Neighbourhood) -> &HaloLists {
        match nb {
            Neighbourhood::Standard => &self.standard,
            Neighbourhood::Extended => &self.extended,
        }
    }

    fn next_tag_base(&self) -> u16 {
        let s = self.seq.fetch_add(1, Relaxed);
        HALO_TAG_BASE + (s % 0x100) * CHANNELS_PER_SYNC
    }

    /// Synchronise ghost values of a floating-point array of arity
    /// `d ∈ {1, 3, 6, 9}`. Collective over all ranks of `comm`.
    pub fn sync<C: Communicator>(
        &self,
        comm: &C,
        nb: Neighbourhood,
        x: &mut [f64],
        arity: usize,
    ) -> Result<()> {
        let pending = self.start(comm, nb, x, arity)?;
        pending.wait(x)
    }

    /// Post sends and receives, returning a handle to wait on. Ghost
    /// values of `x` are undefined until [`PendingSync::wait`] returns.
    pub fn start<'h, C: Communicator>(
        &'h self,
        comm: &C,
        nb: Neighbourhood,
        x: &[f64],
        arity: usize,
    ) -> Result<PendingSync<'h, C>> {
        if !matches!(arity, 1 | 3 | 6 | 9) {
            return Err(LinOpError::SizeMismatch {
                what: "halo arity",
                expected: 1,
                found: arity,
            });
        }
        let needed = (self.n_local + self.n_ghosts) * arity;
        if x.len() < needed {
            return Err(LinOpError::SizeMismatch {
                what: "halo array",
                expected: needed,
                found: x.len(),
            });
        }
        let lists = self.lists(nb);
        let my_rank = comm.rank();
        let tag_base = self.next_tag_base();

        // Post receives first so no send can race an unposted buffer.
        let mut handles = Vec::with_capacity(lists.recv.len());
        for (idx, r) in lists.recv.iter().enumerate() {
            if r.peer == my_rank {
                handles.push((idx, None));
                continue;
            }
            let mut buf = vec![0u8; r.ids.len() * arity * size_of::<f64>()];
            let h = comm.irecv(r.peer, tag_base + r.channel, &mut buf);
            handles.push((idx, Some(h)));
        }

        let mut local = Vec::new();
        for s in &lists.send {
            let packed = self.pack(s, x, arity);
            if s.peer == my_rank {
                local.push((s.channel, packed));
            } else {
                comm.isend(s.peer, tag_base + s.channel, cast_slice(&packed))
                    .wait();
            }
        }

        Ok(PendingSync {
            halo: self,
            nb,
            arity,
            handles,
            local,
        })
    }

    /// Integer variant (global ids, flags). No transform rotation:
    /// periodic images replicate ids unchanged.
    pub fn sync_pod<C: Communicator, T: Pod + Send>(
        &self,
        comm: &C,
        nb: Neighbourhood,
        x: &mut [T],
    ) -> Result<()> {
        let needed = self.n_local + self.n_ghosts;
        if x.len() < needed {
            return Err(LinOpError::SizeMismatch {
                what: "halo array",
                expected: needed,
                found: x.len(),
            });
        }
        let lists = self.lists(nb);
        let my_rank = comm.rank();
        let tag_base = self.next_tag_base();

        let mut handles = Vec::with_capacity(lists.recv.len());
        for (idx, r) in lists.recv.iter().enumerate() {
            if r.peer == my_rank {
                handles.push((idx, None));
                continue;
            }
            let mut buf = vec![0u8; r.ids.len() * size_of::<T>()];
            let h = comm.irecv(r.peer, tag_base + r.channel, &mut buf);
            handles.push((idx, Some(h)));
        }
        let mut local: Vec<(u16, Vec<T>)> = Vec::new();
        for s in &lists.send {
            let packed: Vec<T> = s.ids.iter().map(|&id| x[id]).collect();
            if s.peer == my_rank {
                local.push((s.channel, packed));
            } else {
                comm.isend(s.peer, tag_base + s.channel, cast_slice(&packed))
                    .wait();
            }
        }
        for (idx, h) in handles {
            let r = &lists.recv[idx];
            let values: Vec<T> = match h {
                Some(h) => {
                    let data = h.wait().ok_or_else(|| LinOpError::Communication {
                        rank: r.peer,
                        detail: "halo message missing".into(),
                    })?;
                    bytemuck::pod_collect_to_vec(&data)
                }
                None => {
                    let pos = local
                        .iter()
                        .position(|(c, _)| *c == r.channel)
                        .ok_or_else(|| LinOpError::Communication {
                            rank: my_rank,
                            detail: format!("no local send for channel {}", r.channel),
                        })?;
                    local.swap_remove(pos).1
                }
            };
            for (&id, &v) in r.ids.iter().zip(&values) {
                x[id] = v;
            }
        }
        Ok(())
    }

    /// Pack one send section, applying the periodic rotation.
    fn pack(&self, s: &SendSection, x: &[f64], arity: usize) -> Vec<f64> {
        let mut buf = Vec::with_capacity(s.ids.len() * arity);
        match (s.transform, arity) {
            (None, _) | (Some(_), 1) => {
                for &id in &s.ids {
                    buf.extend_from_slice(&x[id * arity..(id + 1) * arity]);
                }
            }
            (Some(t), 3) => {
                let rot = &self.transforms[t].rotation;
                for &id in &s.ids {
                    let v: [f64; 3] = x[id * 3..id * 3 + 3].try_into().unwrap_or([0.0; 3]);
                    buf.extend_from_slice(&math::rotate_vector(rot, &v));
                }
            }
            (Some(t), 6) => {
                let rot = &self.transforms[t].rotation;
                for &id in &s.ids {
                    let v: [f64; 6] = x[id * 6..id * 6 + 6].try_into().unwrap_or([0.0; 6]);
                    buf.extend_from_slice(&math::rotate_sym_tensor(rot, &v));
                }
            }
            (Some(t), _) => {
                let rot = &self.transforms[t].rotation;
                for &id in &s.ids {
                    let v: [f64; 9] = x[id * 9..id * 9 + 9].try_into().unwrap_or([0.0; 9]);
                    buf.extend_from_slice(&math::rotate_tensor(rot, &v));
                }
            }
        }
        buf
    }

    /// Halo for one rank of a periodic ring partition, matching
    /// [`crate::mesh::MeshAdjacency::ring_rank`]: ghosts at local ids
    /// `n_owned` (west) and `n_owned + 1` (east).
    pub fn ring(rank: usize, size: usize, n_owned: usize) -> Self {
        let east = (rank + 1) % size;
        let west = (rank + size - 1) % size;
        let standard = HaloLists {
            send: vec![
                // eastbound link: my last cell becomes east peer's west ghost
                SendSection {
                    peer: east,
                    channel: 0,
                    transform: None,
                    ids: vec![n_owned - 1],
                },
                // westbound link: my first cell becomes west peer's east ghost
                SendSection {
                    peer: west,
                    channel: 1,
                    transform: None,
                    ids: vec![0],
                },
            ],
            recv: vec![
                RecvSection {
                    peer: west,
                    channel: 0,
                    ids: vec![n_owned],
                },
                RecvSection {
                    peer: east,
                    channel: 1,
                    ids: vec![n_owned + 1],
                },
            ],
        };
        Self::new(n_owned, 2, Vec::new(), standard, None).expect("ring halo is always valid")
    }
}

/// In-flight halo exchange; ghost values land on [`wait`](Self::wait).
pub struct PendingSync<'h, C: Communicator> {
    halo: &'h Halo,
    nb: Neighbourhood,
    arity: usize,
    handles: Vec<(usize, Option<C::RecvHandle>)>,
    local: Vec<(u16, Vec<f64>)>,
}

impl<C: Communicator> PendingSync<'_, C> {
    /// Block until every link has delivered, then scatter into ghosts.
    pub fn wait(mut self, x: &mut [f64]) -> Result<()> {
        let lists = self.halo.lists(self.nb);
        for (idx, h) in self.handles.drain(..) {
            let r = &lists.recv[idx];
            let values: Vec<f64> = match h {
                Some(h) => {
                    let data = h.wait().ok_or_else(|| LinOpError::Communication {
                        rank: r.peer,
                        detail: "halo message missing".into(),
                    })?;
                    bytemuck::pod_collect_to_vec(&data)
                }
                None => {
                    let pos = self
                        .local
                        .iter()
                        .position(|(c, _)| *c == r.channel)
                        .ok_or_else(|| LinOpError::Communication {
                            rank: r.peer,
                            detail: format!("no local send for channel {}", r.channel),
                        })?;
                    self.local.swap_remove(pos).1
                }
            };
            let d = self.arity;
            for (k, &id) in r.ids.iter().enumerate() {
                x[id * d..(id + 1) * d].copy_from_slice(&values[k * d..(k + 1) * d]);
            }
        }
        Ok(())
    }
}
