//! # overgrid
//!
//! overgrid is a distributed library for overset grid assembly and
//! inter-grid data exchange on structured Cartesian-topology grids
//! partitioned across message-passing processes. Given logically
//! rectangular grids that geometrically overlap, it discovers which donor
//! cell contains each receiver point, builds donor/receiver connectivity
//! tables with interpolation stencils, and transfers field values through
//! a staged collect/send/receive/disperse pipeline whose communication
//! plan persists across exchanges.
//!
//! ## Features
//! - Distributed bounding-box hash for partitioned spatial search
//! - Overlap detection with per-pair tolerance and geometry-type-aware
//!   point-in-cell tests (closed-form and Newton inversion)
//! - Donor/receiver connectivity tables with a scoped edit/restore
//!   protocol and event flags
//! - Halo-aware collect kernels, non-blocking per-peer transfer plans,
//!   and overwrite/append disperse
//! - Pluggable communication backends: serial, in-process mailbox
//!   (thread-per-rank testing), and MPI behind the `mpi-support` feature
//!
//! ## Usage
//! Add `overgrid` as a dependency and enable features as needed:
//!
//! ```toml
//! [dependencies]
//! overgrid = "0.3"
//! # features = ["mpi-support"]
//! ```
//!
//! A typical session creates a [`domain::Context`], a [`domain::Domain`]
//! over a communicator, grids with geometry and state, then runs an
//! [`assembler::Assembler`] and drives exchanges through an
//! [`exchange::Exchanger`].

pub mod assembler;
pub mod comm;
pub mod connectivity;
pub mod core;
pub mod domain;
pub mod error;
pub mod exchange;
pub mod geometry;
pub mod grid;
pub mod hash;
pub mod overlap;
pub mod partition;
pub mod state;

/// A convenient prelude importing the most-used types.
pub mod prelude {
    pub use crate::assembler::{Assembler, AssemblerOptions};
    pub use crate::comm::request::{wait_all, wait_any, Request};
    pub use crate::comm::{Communicator, LocalComm, LocalUniverse, NoComm, Wait};
    #[cfg(feature = "mpi-support")]
    pub use crate::comm::MpiComm;
    pub use crate::connectivity::{ConnectivityM, ConnectivityN};
    pub use crate::core::{
        BBox, Cart, Field, IntTuple, Layout, Range, RangeIndexer, RealTuple, MAX_DIMS,
    };
    pub use crate::domain::{Context, Domain, LogFlags};
    pub use crate::error::OvergridError;
    pub use crate::exchange::{CollectOp, DataType, DisperseOp, Exchanger};
    pub use crate::geometry::{GeometryParams, GeometryType};
    pub use crate::grid::{Grid, GridId, GridParams};
    pub use crate::hash::BoundingBoxHash;
    pub use crate::state::StateFlags;
}
