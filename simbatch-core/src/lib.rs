//! This library implements the building blocks of batch experiment runs.
//!
//! An experiment file describes a single simulation run: its duration,
//! seed, experimental conditions and output views. Files given on the
//! command line are resolved into a [`JobSet`], which is then executed by
//! whatever implements the [`Simulator`] capability, locally or on remote
//! workers (see `simbatch-net`).
//!
//! # Values
//!
//! Conditions, results and observations are all expressed as [`Value`]s, a
//! closed set of tagged variants that can be rendered as text, written to
//! output files and stored in experiment files as xml.
//!
//! # Output plugins
//!
//! Output views are handled by plugins loaded at runtime from shared
//! libraries. See the [`plugin`] module for how plugins are resolved and
//! how to write one.

#[macro_use]
extern crate serde;
#[macro_use]
extern crate log;

// reexports
pub use error::{Error, Result};
pub use experiment::{Combination, Condition, Experiment, View};
pub use job::{resolve_job, Job, JobSet, JobState, Package};
pub use plugin::{DynamicLibraries, ModuleProvider, PluginHandle, PluginLoader};
pub use sim::{run_isolated, ConditionReplay, Simulator};
pub use stream::{OutputPlugin, OutputStream, SharedPlugin};
pub use value::{Matrix, Table, Value, ValueKind};

pub mod error;
pub mod experiment;
pub mod job;
pub mod plugin;
pub mod sim;
pub mod stream;
pub mod util;
pub mod value;
pub mod xml;
