//! Read-only mesh collaborator: adjacency and metric quantities.
//!
//! The core never mutates the mesh; it reads face→cell pairs, the
//! cell→cell graph, face colour groups for conflict-free scatters and
//! the per-face metric data the coefficient builders consume.

pub mod adjacency;
pub mod quantities;

pub use adjacency::{FaceColouring, MeshAdjacency};
pub use quantities::{MeshQuantities, Porosity};
