//! Distributed elementwise matrix addition across shared-memory worker processes.
//!
//! Two N×N integer matrices, known only to a coordinator process, are summed
//! by a fixed-size group of N workers, one matrix row per worker. The group
//! communicates through MPI-style collective operations (broadcast, scatter,
//! gather) built on POSIX shared memory, so everything runs on a single
//! machine with no external launcher.
//!
//! # Features
//!
//! - **Process Group**: Spawn and coordinate a fixed number of worker processes
//! - **Collective Operations**: Broadcast, scatter, and gather data across ranks
//! - **Row-Parallel Addition**: Distribute rows, add locally, collect the sum
//! - **Phase Timing**: Separate communication and computation intervals
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use matadd::{rowadd, Distribution, Group, RunConfig};
//!
//! let config = RunConfig::default();
//!
//! // Rank 0 creates the group and spawns the other ranks; every spawned
//! // process re-enters main and joins here.
//! let group = Group::init(config.matrix_size as i32).unwrap();
//!
//! // Collective: the coordinator gets the result, the other ranks None.
//! if let Some(report) = rowadd::run(&group, &config, Distribution::Scatter).unwrap() {
//!     assert_eq!(report.c.size(), config.matrix_size);
//! }
//!
//! group.shutdown();
//! ```
//!
//! # Architecture
//!
//! The group requires exactly one worker per matrix row; the precondition is
//! verified independently on every rank before any communication, and a
//! mismatch aborts the whole group. Distribution is strategy-selectable:
//! either replicate the full matrices and let each rank slice out its own
//! row, or partition into rows and send each rank only what it owns. The two
//! strategies are observationally equivalent. The gather places each rank's
//! result row at the index equal to that rank, so the output order never
//! depends on scheduling.
//!
//! # Error Handling
//!
//! All fallible operations return a `Result` with the [`Error`] enum. The one
//! domain error is [`Error::GroupSizeMismatch`]; the remaining variants are
//! operational failures of the transport layer.

use thiserror::Error;

pub mod comm;
pub mod matrix;
pub mod rowadd;

pub use comm::Group;
pub use matrix::{Elem, Matrix};
pub use rowadd::{Distribution, RunConfig, RunReport, Timings};

#[derive(Error, Debug)]
pub enum Error {
    /// A rank outside `[0, size)` was passed to a communication call.
    #[error("Invalid rank: {0}")]
    InvalidRank(i32),
    /// The group does not have exactly one worker per matrix row. Fatal:
    /// row ownership is rank-indexed, so the run is aborted, not retried.
    #[error("Group size mismatch: {actual} workers for a {required}x{required} matrix")]
    GroupSizeMismatch { actual: i32, required: usize },
    #[error("Communication error: {0}")]
    Communication(String),
    #[error("Initialization error: {0}")]
    Init(String),
    #[error("Serialization error: {0}")]
    Serialization(String),
    #[error("Shared memory error: {0}")]
    SharedMemory(String),
    #[error("Process error: {0}")]
    Process(String),
}

pub type Result<T> = std::result::Result<T, Error>;
