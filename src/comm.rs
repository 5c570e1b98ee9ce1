//! Thin façade over intra-process or inter-process message passing.
//!
//! Messages are *contiguous byte slices*; the halo and the assembler
//! pack their `f64`/id payloads with `bytemuck` before handing them
//! here. All handles are waitable but non-blocking — callers post
//! receives first, then sends, then `.wait()` before trusting a buffer.
//!
//! Rank collectives (sum / min / max / min-loc / max-loc) are built on
//! the same primitives: gather to rank 0, reduce, broadcast back.

use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use bytes::Bytes;
use dashmap::DashMap;
use once_cell::sync::Lazy;

use crate::error::{LinOpError, Result};

/// Non-blocking communication interface (minimal by design).
pub trait Communicator: Send + Sync + 'static {
    /// Handle returned by `isend`.
    type SendHandle: Wait;
    /// Handle returned by `irecv`.
    type RecvHandle: Wait;

    fn isend(&self, peer: usize, tag: u16, buf: &[u8]) -> Self::SendHandle;
    fn irecv(&self, peer: usize, tag: u16, buf: &mut [u8]) -> Self::RecvHandle;

    /// This process's rank in `[0, size)`.
    fn rank(&self) -> usize;
    /// Number of ranks in the communicator.
    fn size(&self) -> usize;
}

/// Anything that can be waited on.
pub trait Wait {
    /// Wait for completion and return the received data (if any).
    fn wait(self) -> Option<Vec<u8>>;
}

impl Wait for () {
    fn wait(self) -> Option<Vec<u8>> {
        None
    }
}

/// Compile-time no-op comm for single-rank runs and serial unit tests.
#[derive(Clone, Debug, Default)]
pub struct NoComm;

impl Communicator for NoComm {
    type SendHandle = ();
    type RecvHandle = ();

    fn isend(&self, _peer: usize, _tag: u16, _buf: &[u8]) {}
    fn irecv(&self, _peer: usize, _tag: u16, _buf: &mut [u8]) {}

    fn rank(&self) -> usize {
        0
    }
    fn size(&self) -> usize {
        1
    }
}

// --- ThreadComm: simulated ranks inside one process -------------------------

type Key = (usize, usize, u16); // (src, dst, tag)

static MAILBOX: Lazy<DashMap<Key, Bytes>> = Lazy::new(DashMap::new);

pub struct LocalHandle {
    buf: Arc<Mutex<Option<Vec<u8>>>>,
    handle: Option<JoinHandle<()>>,
}

impl Wait for LocalHandle {
    fn wait(mut self) -> Option<Vec<u8>> {
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
        let mut guard = self.buf.lock().unwrap();
        guard.take()
    }
}

/// In-process communicator: each simulated rank runs on its own thread
/// and exchanges byte payloads through a global mailbox. Used to test
/// multi-rank halo and assembler behaviour without an MPI launcher.
#[derive(Clone, Debug)]
pub struct ThreadComm {
    rank: usize,
    size: usize,
}

impl ThreadComm {
    pub fn new(rank: usize, size: usize) -> Self {
        Self { rank, size }
    }

    /// Drop any message left over from an aborted exchange. Tests call
    /// this between scenarios sharing the process-wide mailbox.
    pub fn clear_mailbox() {
        MAILBOX.clear();
    }
}

impl Communicator for ThreadComm {
    type SendHandle = ();
    type RecvHandle = LocalHandle;

    fn isend(&self, peer: usize, tag: u16, buf: &[u8]) {
        let key = (self.rank, peer, tag);
        MAILBOX.insert(key, Bytes::from(buf.to_vec()));
    }

    fn irecv(&self, peer: usize, tag: u16, buf: &mut [u8]) -> LocalHandle {
        let key = (peer, self.rank, tag);
        let buf_arc = Arc::new(Mutex::new(None));
        let buf_arc_clone = buf_arc.clone();
        let buf_len = buf.len();
        let handle = std::thread::spawn(move || {
            loop {
                if let Some(bytes) = MAILBOX.remove(&key).map(|(_, v)| v) {
                    let mut guard = buf_arc_clone.lock().unwrap();
                    *guard = Some(bytes[..buf_len].to_vec());
                    break;
                }
                std::thread::yield_now();
            }
        });
        LocalHandle {
            buf: buf_arc,
            handle: Some(handle),
        }
    }

    fn rank(&self) -> usize {
        self.rank
    }
    fn size(&self) -> usize {
        self.size
    }
}

// --- collectives ------------------------------------------------------------

/// Reduction operator for [`allreduce`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReduceOp {
    Sum,
    Min,
    Max,
}

thread_local! {
    static COLLECTIVE_SEQ: std::cell::Cell<u16> = const { std::cell::Cell::new(0) };
}

/// Tags above 0x4000 are reserved for collectives. Every rank counts
/// its own collective calls, so ranks issuing collectives in the same
/// order (the usual collective contract) agree on the tag without a
/// handshake; the counter is per thread because simulated ranks share
/// one process.
pub(crate) fn next_collective_tag() -> u16 {
    COLLECTIVE_SEQ.with(|c| {
        let s = c.get();
        c.set(s.wrapping_add(1));
        0x4000 | ((s % 0x1fff) * 2)
    })
}

/// Element-wise all-reduce of `vals` across all ranks. Collective: every
/// rank must call with the same `op` and length.
pub fn allreduce<C: Communicator>(comm: &C, op: ReduceOp, vals: &mut [f64]) -> Result<()> {
    let size = comm.size();
    if size == 1 {
        return Ok(());
    }
    let rank = comm.rank();
    let tag = next_collective_tag();
    let n_bytes = std::mem::size_of_val(vals);

    if rank == 0 {
        let mut bufs: Vec<(usize, LocalHandleLike<C>)> = Vec::with_capacity(size - 1);
        let mut recv: Vec<Vec<u8>> = (1..size).map(|_| vec![0u8; n_bytes]).collect();
        for (i, peer) in (1..size).enumerate() {
            let h = comm.irecv(peer, tag, &mut recv[i]);
            bufs.push((peer, h));
        }
        for (peer, h) in bufs {
            let data = h.wait().ok_or_else(|| LinOpError::Communication {
                rank: peer,
                detail: "reduce contribution missing".into(),
            })?;
            let contrib: Vec<f64> = bytemuck::pod_collect_to_vec(&data);
            for (v, c) in vals.iter_mut().zip(&contrib) {
                match op {
                    ReduceOp::Sum => *v += c,
                    ReduceOp::Min => *v = v.min(*c),
                    ReduceOp::Max => *v = v.max(*c),
                }
            }
        }
        for peer in 1..size {
            comm.isend(peer, tag + 1, bytemuck::cast_slice(vals)).wait();
        }
    } else {
        comm.isend(0, tag, bytemuck::cast_slice(vals)).wait();
        let mut buf = vec![0u8; n_bytes];
        let h = comm.irecv(0, tag + 1, &mut buf);
        let data = h.wait().ok_or_else(|| LinOpError::Communication {
            rank: 0,
            detail: "reduce result missing".into(),
        })?;
        let result: Vec<f64> = bytemuck::pod_collect_to_vec(&data);
        vals.copy_from_slice(&result);
    }
    Ok(())
}

type LocalHandleLike<C> = <C as Communicator>::RecvHandle;

/// All-reduce a slice of counters (clip counts, entry counts).
pub fn allreduce_counters<C: Communicator>(comm: &C, counts: &mut [u64]) -> Result<()> {
    let mut as_f64: Vec<f64> = counts.iter().map(|&c| c as f64).collect();
    allreduce(comm, ReduceOp::Sum, &mut as_f64)?;
    for (c, v) in counts.iter_mut().zip(&as_f64) {
        *c = *v as u64;
    }
    Ok(())
}

/// Value + owning global index, for min-loc / max-loc reductions.
#[derive(Debug, Clone, Copy, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
#[repr(C)]
pub struct Located {
    pub value: f64,
    pub index: u64,
}

/// All-reduce locating the global minimum (or maximum) of a value.
pub fn allreduce_loc<C: Communicator>(comm: &C, op: ReduceOp, v: &mut Located) -> Result<()> {
    debug_assert!(matches!(op, ReduceOp::Min | ReduceOp::Max));
    let size = comm.size();
    if size == 1 {
        return Ok(());
    }
    let rank = comm.rank();
    let tag = next_collective_tag();
    let n_bytes = std::mem::size_of::<Located>();

    if rank == 0 {
        for peer in 1..size {
            let mut buf = vec![0u8; n_bytes];
            let h = comm.irecv(peer, tag, &mut buf);
            let data = h.wait().ok_or_else(|| LinOpError::Communication {
                rank: peer,
                detail: "loc-reduce contribution missing".into(),
            })?;
            let other: Located = bytemuck::pod_read_unaligned(&data);
            let better = match op {
                ReduceOp::Min => other.value < v.value,
                _ => other.value > v.value,
            };
            if better {
                *v = other;
            }
        }
        for peer in 1..size {
            comm.isend(peer, tag + 1, bytemuck::bytes_of(v)).wait();
        }
    } else {
        comm.isend(0, tag, bytemuck::bytes_of(v)).wait();
        let mut buf = vec![0u8; n_bytes];
        let h = comm.irecv(0, tag + 1, &mut buf);
        let data = h.wait().ok_or_else(|| LinOpError::Communication {
            rank: 0,
            detail: "loc-reduce result missing".into(),
        })?;
        *v = bytemuck::pod_read_unaligned(&data);
    }
    Ok(())
}

// --- MPI backend (feature = "mpi-support") ----------------------------------

#[cfg(feature = "mpi-support")]
mod mpi_backend {
    use super::*;
    use mpi::topology::SimpleCommunicator;
    use mpi::traits::*;

    /// MPI-backed communicator. One instance per process; `Universe`
    /// lifetime is owned here so the world stays initialised.
    pub struct MpiComm {
        _universe: mpi::environment::Universe,
        world: SimpleCommunicator,
        rank: usize,
        size: usize,
    }

    impl MpiComm {
        pub fn new() -> Self {
            let universe = mpi::initialize().expect("MPI init");
            let world = universe.world();
            let rank = world.rank() as usize;
            let size = world.size() as usize;
            Self {
                _universe: universe,
                world,
                rank,
                size,
            }
        }
    }

    /// Blocking-completed handle: rsmpi request scopes do not outlive a
    /// call frame cleanly, so sends complete eagerly and receives carry
    /// their payload.
    pub struct MpiHandle(Option<Vec<u8>>);

    impl Wait for MpiHandle {
        fn wait(self) -> Option<Vec<u8>> {
            self.0
        }
    }

    impl Communicator for MpiComm {
        type SendHandle = MpiHandle;
        type RecvHandle = MpiHandle;

        fn isend(&self, peer: usize, tag: u16, buf: &[u8]) -> MpiHandle {
            self.world
                .process_at_rank(peer as i32)
                .send_with_tag(buf, tag as i32);
            MpiHandle(None)
        }

        fn irecv(&self, peer: usize, tag: u16, buf: &mut [u8]) -> MpiHandle {
            let (data, _status) = self
                .world
                .process_at_rank(peer as i32)
                .receive_vec_with_tag::<u8>(tag as i32);
            let n = buf.len().min(data.len());
            buf[..n].copy_from_slice(&data[..n]);
            MpiHandle(Some(data))
        }

        fn rank(&self) -> usize {
            self.rank
        }
        fn size(&self) -> usize {
            self.size
        }
    }
}

#[cfg(feature = "mpi-support")]
pub use mpi_backend::MpiComm;

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn thread_roundtrip_two_ranks() {
        let comm0 = ThreadComm::new(0, 2);
        let comm1 = ThreadComm::new(1, 2);

        let mut recv_buf = [0u8; 4];
        let recv_handle = comm1.irecv(0, 7, &mut recv_buf);
        comm0.isend(1, 7, &[1, 2, 3, 4]);

        let data = recv_handle.wait().expect("expected data from rank 0");
        recv_buf.copy_from_slice(&data);
        assert_eq!(&recv_buf, &[1, 2, 3, 4]);
    }

    #[test]
    #[serial]
    fn allreduce_sum_two_ranks() {
        ThreadComm::clear_mailbox();
        let handles: Vec<_> = (0..2)
            .map(|r| {
                std::thread::spawn(move || {
                    let comm = ThreadComm::new(r, 2);
                    let mut vals = vec![1.0 + r as f64, 10.0];
                    allreduce(&comm, ReduceOp::Sum, &mut vals).unwrap();
                    vals
                })
            })
            .collect();
        for h in handles {
            let vals = h.join().unwrap();
            assert_eq!(vals, vec![3.0, 20.0]);
        }
    }

    #[test]
    #[serial]
    fn allreduce_maxloc_two_ranks() {
        ThreadComm::clear_mailbox();
        let handles: Vec<_> = (0..2)
            .map(|r| {
                std::thread::spawn(move || {
                    let comm = ThreadComm::new(r, 2);
                    let mut v = Located {
                        value: if r == 1 { 5.0 } else { 2.0 },
                        index: 100 + r as u64,
                    };
                    allreduce_loc(&comm, ReduceOp::Max, &mut v).unwrap();
                    v
                })
            })
            .collect();
        for h in handles {
            let v = h.join().unwrap();
            assert_eq!(v.value, 5.0);
            assert_eq!(v.index, 101);
        }
    }

    #[test]
    fn nocomm_reduce_is_identity() {
        let mut vals = vec![4.0, -2.0];
        allreduce(&NoComm, ReduceOp::Min, &mut vals).unwrap();
        assert_eq!(vals, vec![4.0, -2.0]);
    }
}
