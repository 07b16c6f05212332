//! Output streams forwarding observations to output plugins.

use std::sync::{Arc, Mutex, MutexGuard};

use crate::error::{Error, Result};
use crate::experiment::View;
use crate::plugin::{ModuleProvider, PluginHandle, PluginLoader};
use crate::value::Value;

/// Observer receiving the observations of a single view.
///
/// Plugins are built by the factory a module exports, see
/// [`declare_output_plugin!`](crate::declare_output_plugin).
pub trait OutputPlugin: Send {
    /// Called once when the stream opens, before any observation.
    fn on_parameter(&mut self, _view: &str, _location: &str) -> Result<()> {
        Ok(())
    }

    fn on_new_observable(&mut self, _view: &str, _port: &str, _time: f64) -> Result<()> {
        Ok(())
    }

    fn on_value(&mut self, view: &str, port: &str, time: f64, value: &Value) -> Result<()>;

    /// Ends the observation. The returned value, if any, is the content
    /// gathered by the plugin.
    fn close(&mut self, time: f64) -> Result<Option<Value>>;
}

/// Plugin instance shared between the stream and any consumer of it.
pub type SharedPlugin = Arc<Mutex<Box<dyn OutputPlugin>>>;

/// Stream of observations for one view of an experiment.
pub struct OutputStream {
    view: View,
    handle: Option<PluginHandle>,
}

impl OutputStream {
    /// Creates a stream whose plugin is not resolved yet.
    pub fn new(view: View) -> Self {
        OutputStream { view, handle: None }
    }

    /// Creates a stream and resolves its plugin right away.
    pub fn open<P: ModuleProvider>(loader: &PluginLoader<P>, view: &View) -> Result<Self> {
        let mut stream = OutputStream::new(view.clone());
        stream.initialize(loader)?;
        Ok(stream)
    }

    /// Resolves the plugin named by the view, passing the view location as
    /// the constructor argument.
    pub fn initialize<P: ModuleProvider>(&mut self, loader: &PluginLoader<P>) -> Result<()> {
        let handle = loader.load(&self.view.plugin, &self.view.location)?;
        self.handle = Some(handle);
        let (name, location) = (self.view.name.clone(), self.view.location.clone());
        self.lock()?.on_parameter(&name, &location)
    }

    pub fn view(&self) -> &View {
        &self.view
    }

    pub fn is_initialized(&self) -> bool {
        self.handle.is_some()
    }

    /// Hands out the shared plugin instance.
    pub fn plugin(&self) -> Result<SharedPlugin> {
        Ok(self.handle()?.plugin())
    }

    pub fn handle(&self) -> Result<&PluginHandle> {
        self.handle.as_ref().ok_or_else(|| {
            Error::InternalError(format!(
                "output plugin of view '{}' is not initialized",
                self.view.name
            ))
        })
    }

    pub fn on_new_observable(&mut self, port: &str, time: f64) -> Result<()> {
        let view = self.view.name.clone();
        self.lock()?.on_new_observable(&view, port, time)
    }

    pub fn on_value(&mut self, port: &str, time: f64, value: &Value) -> Result<()> {
        trace!("{}: {} at {} = {}", self.view.name, port, time, value);
        let view = self.view.name.clone();
        self.lock()?.on_value(&view, port, time, value)
    }

    pub fn close(&mut self, time: f64) -> Result<Option<Value>> {
        self.lock()?.close(time)
    }

    fn lock(&self) -> Result<MutexGuard<'_, Box<dyn OutputPlugin>>> {
        self.handle()?
            .plugin
            .lock()
            .map_err(|_| Error::InternalError("output plugin lock poisoned".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uninitialized_stream_refuses_access() {
        let mut stream = OutputStream::new(View {
            name: "v".to_string(),
            plugin: "p".to_string(),
            location: String::new(),
        });
        assert!(!stream.is_initialized());
        assert!(matches!(stream.plugin(), Err(Error::InternalError(_))));
        assert!(stream.on_value("x", 0., &Value::Null).is_err());
    }
}
