//! Simulation capability.
//!
//! The kernel advancing model state lives outside of this crate. Everything
//! here only needs something that turns an experiment into a result value,
//! which is what [`Simulator`] describes.

use std::collections::BTreeMap;
use std::panic::{self, AssertUnwindSafe};

use crate::error::{Error, Result};
use crate::experiment::Experiment;
use crate::plugin::{DynamicLibraries, ModuleProvider, PluginLoader};
use crate::stream::OutputStream;
use crate::util;
use crate::value::Value;

/// Runs a single experiment to completion.
pub trait Simulator: Send + Sync {
    fn run_experiment(&self, experiment: &Experiment) -> Result<Value>;
}

impl<F> Simulator for F
where
    F: Fn(&Experiment) -> Result<Value> + Send + Sync,
{
    fn run_experiment(&self, experiment: &Experiment) -> Result<Value> {
        self(experiment)
    }
}

/// Runs the experiment, turning a panic of the simulator into a
/// simulation error so that the calling job fails on its own.
pub fn run_isolated<S>(simulator: &S, experiment: &Experiment) -> Result<Value>
where
    S: Simulator + ?Sized,
{
    panic::catch_unwind(AssertUnwindSafe(|| simulator.run_experiment(experiment))).unwrap_or_else(
        |payload| {
            Err(Error::Simulation(format!(
                "simulation of '{}' panicked: {}",
                experiment.name,
                util::panic_message(payload.as_ref())
            )))
        },
    )
}

/// Simulator that replays the experimental conditions through the output
/// views, without any model dynamics.
///
/// Every condition port becomes an observable named `condition.port`,
/// observed at time zero and at the end of the experiment. The result is a
/// map holding the run parameters, the conditions and what each view's
/// plugin returned when closed.
pub struct ConditionReplay<P: ModuleProvider = DynamicLibraries> {
    loader: PluginLoader<P>,
}

impl<P: ModuleProvider> ConditionReplay<P> {
    pub fn new(loader: PluginLoader<P>) -> Self {
        ConditionReplay { loader }
    }

    pub fn loader(&self) -> &PluginLoader<P> {
        &self.loader
    }

    fn replay(&self, experiment: &Experiment) -> Result<(Value, Value)> {
        let mut streams = Vec::new();
        let mut stream_errors = BTreeMap::new();
        for view in &experiment.views {
            match OutputStream::open(&self.loader, view) {
                Ok(stream) => streams.push(stream),
                Err(e) => {
                    // only this view is lost, the run goes on
                    error!("{}: output stream '{}': {}", experiment.name, view.name, e);
                    stream_errors.insert(view.name.clone(), Value::String(e.to_string()));
                }
            }
        }

        let observables = experiment
            .conditions
            .iter()
            .flat_map(|(condition, ports)| {
                ports
                    .iter()
                    .map(move |(port, value)| (format!("{}.{}", condition, port), value))
            })
            .collect::<Vec<_>>();

        for stream in &mut streams {
            for (name, _) in &observables {
                stream.on_new_observable(name, 0.)?;
            }
            for time in &[0., experiment.duration] {
                for (name, value) in &observables {
                    stream.on_value(name, *time, value)?;
                }
            }
        }

        let mut views = BTreeMap::new();
        for view in &experiment.views {
            views.insert(view.name.clone(), Value::Null);
        }
        for mut stream in streams {
            let output = stream.close(experiment.duration)?;
            views.insert(stream.view().name.clone(), output.unwrap_or(Value::Null));
        }
        Ok((Value::Map(views), Value::Map(stream_errors)))
    }
}

impl ConditionReplay<DynamicLibraries> {
    /// Replay resolving plugins as shared libraries from `search_dirs`.
    pub fn with_search_dirs(search_dirs: Vec<std::path::PathBuf>) -> Self {
        ConditionReplay::new(PluginLoader::new(search_dirs))
    }
}

impl<P: ModuleProvider> Simulator for ConditionReplay<P> {
    fn run_experiment(&self, experiment: &Experiment) -> Result<Value> {
        experiment.validate()?;
        debug!("replaying experiment '{}'", experiment.name);
        let (views, stream_errors) = self.replay(experiment)?;

        let conditions = experiment
            .conditions
            .iter()
            .map(|(name, ports)| (name.clone(), Value::Map(ports.clone())))
            .collect::<BTreeMap<_, _>>();

        let mut result = BTreeMap::new();
        result.insert("name".to_string(), Value::from(experiment.name.as_str()));
        result.insert("duration".to_string(), Value::Double(experiment.duration));
        result.insert("seed".to_string(), Value::Integer(experiment.seed as i64));
        result.insert("conditions".to_string(), Value::Map(conditions));
        result.insert("views".to_string(), views);
        if stream_errors.as_map().map(|m| !m.is_empty()).unwrap_or(false) {
            result.insert("stream_errors".to_string(), stream_errors);
        }
        Ok(Value::Map(result))
    }
}
