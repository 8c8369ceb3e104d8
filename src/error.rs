//! OvergridError: unified error type for overgrid public APIs.
//!
//! Recoverable failures (transport problems, stale exchange slots, unknown
//! ids) surface through this enum. Precondition violations — editing
//! conflicts, malformed ranges, mismatched collective arguments — are
//! debug-asserted instead and are undefined behavior in release builds.

use crate::domain::ComponentId;
use crate::exchange::DataType;
use crate::grid::GridId;
use thiserror::Error;

/// Unified error type for overgrid operations.
#[derive(Debug, Error)]
pub enum OvergridError {
    /// Context creation failed (maps the OK | MEMORY | MPI taxonomy of the
    /// embedding layer onto a message).
    #[error("failed to create context: {0}")]
    ContextCreation(String),
    /// A communication operation with a peer did not complete.
    #[error("communication error with rank {neighbor}: {detail}")]
    CommError { neighbor: usize, detail: String },
    /// A peer delivered a payload of unexpected size.
    #[error("buffer size mismatch from rank {neighbor}: expected {expected} bytes, got {got}")]
    BufferSizeMismatch {
        neighbor: usize,
        expected: usize,
        got: usize,
    },
    /// Grid id is not registered in the domain.
    #[error("unknown grid {0}")]
    UnknownGrid(GridId),
    /// Grid id registered twice.
    #[error("grid {0} already exists")]
    DuplicateGrid(GridId),
    /// Operation requires the grid to be resident on this rank.
    #[error("grid {0} is not local to this rank")]
    GridNotLocal(GridId),
    /// Component id is not registered in the domain.
    #[error("unknown component {0}")]
    UnknownComponent(ComponentId),
    /// Component id registered twice.
    #[error("component {0} already exists")]
    DuplicateComponent(ComponentId),
    /// No connectivity tables exist for the grid pair.
    #[error("no connectivity for grid pair ({m}, {n})")]
    UnknownConnectivity { m: GridId, n: GridId },
    /// No geometry has been created for the grid.
    #[error("no geometry for grid {0}")]
    MissingGeometry(GridId),
    /// No state has been created for the grid.
    #[error("no state for grid {0}")]
    MissingState(GridId),
    /// The exchanger slot does not exist.
    #[error("no exchange slot ({m}, {n}, {slot})")]
    UnknownSlot { m: GridId, n: GridId, slot: i32 },
    /// The exchanger slot exists but was created for a different value type.
    #[error("exchange slot ({m}, {n}, {slot}) carries {expected:?}, executed with {got:?}")]
    SlotTypeMismatch {
        m: GridId,
        n: GridId,
        slot: i32,
        expected: DataType,
        got: DataType,
    },
    /// The connectivity tables changed after the slot was created.
    #[error("exchange slot ({m}, {n}, {slot}) is stale: connectivity was edited after creation")]
    StaleSlot { m: GridId, n: GridId, slot: i32 },
    /// A value buffer does not match the plan's element count.
    #[error("value count mismatch: expected {expected}, got {got}")]
    ValueCountMismatch { expected: usize, got: usize },
    /// A field buffer does not cover the range the handle was created with.
    #[error("field buffer of {got} values does not cover its declared range of {expected}")]
    FieldSizeMismatch { expected: usize, got: usize },
}
