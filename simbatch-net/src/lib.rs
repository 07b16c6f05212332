//! This library runs batches of experiments over the network.
//!
//! Two constructs are provided: the [`Manager`], which takes a job set and
//! runs every job either locally or on remote workers, and the
//! [`SimulatorWorker`], which serves jobs for a manager.
//!
//! Manager and workers talk over plain blocking TCP sockets. Each job uses
//! its own connection: the manager sends one request holding the whole
//! experiment, the worker answers with one reply and closes the connection.
//! Messages are bincode encoded and length-prefixed, see [`frame`].
//!
//! # Example
//!
//! ```ignore
//! use simbatch_core::{ConditionReplay, JobSet};
//! use simbatch_net::{Endpoint, Manager, RunFlags, RunMode};
//!
//! let jobs = JobSet::from_args(&["a.exp", "b.exp"], &std::env::current_dir()?, None)?;
//! let manager = Manager::new(ConditionReplay::with_search_dirs(vec![]))
//!     .with_endpoints(vec![Endpoint::new("node1", 48620)]);
//! let report = manager.run(&jobs, RunMode::Manager, &RunFlags::default())?;
//! assert_eq!(report.len(), jobs.len());
//! ```

#[macro_use]
extern crate serde;
#[macro_use]
extern crate log;

pub use error::{Error, Result};
pub use manager::{
    Endpoint, ExecutionReport, Failure, FailureKind, JobOutcome, Manager, ReportBuilder, RunFlags,
    RunMode,
};
pub use simulator::{SimulatorWorker, DEFAULT_BACKLOG, DEFAULT_PORT};
pub use transport::{ErrorCode, Socket};

pub mod error;
pub mod frame;
pub mod manager;
pub mod msg;
pub mod simulator;
pub mod transport;
