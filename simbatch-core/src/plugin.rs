//! Output plugin loading.
//!
//! Plugins are dynamic modules exporting a single factory function named
//! [`FACTORY_SYMBOL`]. A plugin is resolved by name over an ordered list of
//! search directories: the first directory holding a module that opens
//! wins, and the reasons every earlier directory failed are kept so that a
//! total failure names each directory tried.
//!
//! Once loaded, a module stays resident until the process exits. Later
//! loads of the same name reuse it and only construct a new instance.
//!
//! # Writing a plugin
//!
//! ```ignore
//! use simbatch_core::{declare_output_plugin, OutputPlugin, Result, Value};
//!
//! struct Counter(usize);
//!
//! impl OutputPlugin for Counter {
//!     fn on_value(&mut self, _: &str, _: &str, _: f64, _: &Value) -> Result<()> {
//!         self.0 += 1;
//!         Ok(())
//!     }
//!     fn close(&mut self, _: f64) -> Result<Option<Value>> {
//!         Ok(Some(Value::Integer(self.0 as i64)))
//!     }
//! }
//!
//! fn new_counter(_location: &str) -> Option<Counter> {
//!     Some(Counter(0))
//! }
//!
//! declare_output_plugin!(new_counter);
//! ```
//!
//! The module has to be built as a `cdylib` with the same compiler as the
//! host, since plugin instances cross the boundary as Rust trait objects.

use std::any::Any;
use std::env::consts::{DLL_PREFIX, DLL_SUFFIX};
use std::path::{Path, PathBuf};
use std::panic;
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};

use fnv::FnvHashMap;
use libloading::{Library, Symbol};

use crate::error::{Error, Result};
use crate::stream::{OutputPlugin, SharedPlugin};
use crate::util;

/// Name of the factory function every plugin module exports.
pub const FACTORY_SYMBOL: &str = "make_output_plugin";

/// Signature of the exported factory. Returning `None` means the instance
/// could not be constructed from the given argument.
pub type PluginFactory = fn(&str) -> Option<Box<dyn OutputPlugin>>;

/// Exports the plugin factory from a plugin crate.
///
/// Takes a constructor `fn(&str) -> Option<T>` where `T` implements
/// [`OutputPlugin`].
#[macro_export]
macro_rules! declare_output_plugin {
    ($constructor:path) => {
        #[no_mangle]
        pub fn make_output_plugin(
            location: &str,
        ) -> Option<Box<dyn $crate::stream::OutputPlugin>> {
            $constructor(location).map(|p| Box::new(p) as Box<dyn $crate::stream::OutputPlugin>)
        }
    };
}

/// Opens modules and finds their exports.
pub trait ModuleProvider: Send + Sync {
    type Module: Send + Sync + 'static;

    /// Builds the platform specific path of module `name` inside `dir`.
    fn module_path(&self, dir: &Path, name: &str) -> PathBuf;

    /// Opens the module, returning the platform error message on failure.
    fn open(&self, path: &Path) -> std::result::Result<Self::Module, String>;

    /// Looks up the factory export, `None` if the module doesn't have it.
    fn factory(&self, module: &Self::Module, symbol: &str) -> Option<PluginFactory>;
}

/// Shared libraries opened through the platform dynamic loader.
#[derive(Debug, Clone, Copy, Default)]
pub struct DynamicLibraries;

impl ModuleProvider for DynamicLibraries {
    type Module = Library;

    fn module_path(&self, dir: &Path, name: &str) -> PathBuf {
        dir.join(format!("{}{}{}", DLL_PREFIX, name, DLL_SUFFIX))
    }

    fn open(&self, path: &Path) -> std::result::Result<Library, String> {
        Library::new(path).map_err(|e| e.to_string())
    }

    fn factory(&self, module: &Library, symbol: &str) -> Option<PluginFactory> {
        let symbol: Symbol<PluginFactory> = unsafe { module.get(symbol.as_bytes()) }.ok()?;
        // the module is resident so the pointer outlives the symbol guard
        Some(*symbol)
    }
}

/// Module kept loaded together with the path it was opened from.
struct Resident<M> {
    module: Arc<M>,
    path: PathBuf,
}

/// Modules kept loaded for the rest of the process, keyed by plugin name.
pub struct ResidentModules<M> {
    modules: Mutex<FnvHashMap<String, Resident<M>>>,
}

impl<M> Default for ResidentModules<M> {
    fn default() -> Self {
        ResidentModules {
            modules: Mutex::new(FnvHashMap::default()),
        }
    }
}

impl<M> ResidentModules<M> {
    /// Entries are only ever inserted whole, so a poisoned lock still
    /// guards a consistent map.
    fn lock(&self) -> MutexGuard<'_, FnvHashMap<String, Resident<M>>> {
        self.modules.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.lock().contains_key(name)
    }

    /// Path the resident module of plugin `name` was opened from.
    pub fn path(&self, name: &str) -> Option<PathBuf> {
        self.lock().get(name).map(|r| r.path.clone())
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Process-wide registry of shared libraries loaded as plugins.
fn resident_libraries() -> Arc<ResidentModules<Library>> {
    static RESIDENT: OnceLock<Arc<ResidentModules<Library>>> = OnceLock::new();
    RESIDENT.get_or_init(|| Arc::new(ResidentModules::default())).clone()
}

/// Loaded module together with the instance its factory produced.
pub struct PluginHandle {
    name: String,
    path: PathBuf,
    // declared before `module` so the instance drops first
    pub(crate) plugin: SharedPlugin,
    module: Arc<dyn Any + Send + Sync>,
}

impl PluginHandle {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Path of the module the instance was built from.
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn plugin(&self) -> SharedPlugin {
        self.plugin.clone()
    }

    pub fn module(&self) -> Arc<dyn Any + Send + Sync> {
        self.module.clone()
    }
}

impl std::fmt::Debug for PluginHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginHandle")
            .field("name", &self.name)
            .field("path", &self.path)
            .finish()
    }
}

/// Resolves output plugins by name over an ordered list of directories.
pub struct PluginLoader<P: ModuleProvider = DynamicLibraries> {
    provider: P,
    search_dirs: Vec<PathBuf>,
    resident: Arc<ResidentModules<P::Module>>,
}

impl PluginLoader<DynamicLibraries> {
    /// Creates a loader for shared libraries backed by the process-wide
    /// registry of resident modules.
    pub fn new(search_dirs: Vec<PathBuf>) -> Self {
        PluginLoader {
            provider: DynamicLibraries,
            search_dirs,
            resident: resident_libraries(),
        }
    }
}

impl<P: ModuleProvider> PluginLoader<P> {
    /// Creates a loader with its own registry of resident modules.
    pub fn with_provider(provider: P, search_dirs: Vec<PathBuf>) -> Self {
        PluginLoader {
            provider,
            search_dirs,
            resident: Arc::new(ResidentModules::default()),
        }
    }

    pub fn search_dirs(&self) -> &[PathBuf] {
        &self.search_dirs
    }

    pub fn resident(&self) -> &ResidentModules<P::Module> {
        &self.resident
    }

    /// Loads plugin `name` and constructs an instance with `argument`.
    ///
    /// The registry lock is held for the whole first load, so concurrent
    /// first loads of one name open the module only once.
    pub fn load(&self, name: &str, argument: &str) -> Result<PluginHandle> {
        let mut modules = self.resident.lock();

        if let Some(resident) = modules.get(name) {
            let plugin = self.construct(name, resident.module.as_ref(), argument, "")?;
            return Ok(PluginHandle {
                name: name.to_string(),
                path: resident.path.clone(),
                plugin,
                module: resident.module.clone(),
            });
        }

        let mut diagnostics = String::new();
        for dir in &self.search_dirs {
            let path = self.provider.module_path(dir, name);
            let module = match self.provider.open(&path) {
                Ok(m) => m,
                Err(msg) => {
                    debug!("plugin '{}' not loaded from {}: {}", name, dir.display(), msg);
                    diagnostics.push_str(&format!("\n[{}]: {}", dir.display(), msg));
                    continue;
                }
            };

            let plugin = self.construct(name, &module, argument, &diagnostics)?;
            let module = Arc::new(module);
            modules.insert(
                name.to_string(),
                Resident {
                    module: module.clone(),
                    path: path.clone(),
                },
            );
            info!("loaded output plugin '{}' from {}", name, path.display());
            return Ok(PluginHandle {
                name: name.to_string(),
                path,
                plugin,
                module,
            });
        }

        Err(Error::PluginResolution(format!(
            "Error opening output plugin '{}' in:{}",
            name, diagnostics
        )))
    }

    fn construct(
        &self,
        name: &str,
        module: &P::Module,
        argument: &str,
        diagnostics: &str,
    ) -> Result<SharedPlugin> {
        let factory = self
            .provider
            .factory(module, FACTORY_SYMBOL)
            .ok_or_else(|| Error::PluginExportNotFound {
                plugin: name.to_string(),
                symbol: FACTORY_SYMBOL.to_string(),
                diagnostics: diagnostics.to_string(),
            })?;
        let instance = match panic::catch_unwind(|| factory(argument)) {
            Ok(instance) => instance,
            Err(payload) => {
                error!("factory of plugin '{}' panicked", name);
                return Err(Error::PluginConstruction {
                    plugin: name.to_string(),
                    symbol: FACTORY_SYMBOL.to_string(),
                    diagnostics: format!(
                        "{}\n[panic]: {}",
                        diagnostics,
                        util::panic_message(payload.as_ref())
                    ),
                });
            }
        };
        let instance = instance.ok_or_else(|| Error::PluginConstruction {
            plugin: name.to_string(),
            symbol: FACTORY_SYMBOL.to_string(),
            diagnostics: diagnostics.to_string(),
        })?;
        Ok(Arc::new(Mutex::new(instance)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Value;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Tagged(&'static str);

    impl OutputPlugin for Tagged {
        fn on_value(&mut self, _: &str, _: &str, _: f64, _: &Value) -> Result<()> {
            Ok(())
        }
        fn close(&mut self, _: f64) -> Result<Option<Value>> {
            Ok(Some(Value::from(self.0)))
        }
    }

    fn d2_factory(_: &str) -> Option<Box<dyn OutputPlugin>> {
        Some(Box::new(Tagged("d2")))
    }

    fn d3_factory(_: &str) -> Option<Box<dyn OutputPlugin>> {
        Some(Box::new(Tagged("d3")))
    }

    fn refusing_factory(_: &str) -> Option<Box<dyn OutputPlugin>> {
        None
    }

    fn panicking_factory(_: &str) -> Option<Box<dyn OutputPlugin>> {
        panic!("bad location")
    }

    #[derive(Clone, Copy)]
    enum Fake {
        Exports(PluginFactory),
        NoExport,
    }

    /// Serves modules from an in-memory table of directories.
    #[derive(Default)]
    struct FakeProvider {
        dirs: FnvHashMap<PathBuf, Fake>,
        opens: AtomicUsize,
    }

    impl FakeProvider {
        fn with(mut self, dir: &str, module: Fake) -> Self {
            self.dirs.insert(PathBuf::from(dir), module);
            self
        }
    }

    impl ModuleProvider for FakeProvider {
        type Module = Fake;

        fn module_path(&self, dir: &Path, name: &str) -> PathBuf {
            dir.join(format!("{}.fake", name))
        }

        fn open(&self, path: &Path) -> std::result::Result<Fake, String> {
            self.opens.fetch_add(1, Ordering::SeqCst);
            path.parent()
                .and_then(|dir| self.dirs.get(dir))
                .copied()
                .ok_or_else(|| format!("{}: cannot open shared object file", path.display()))
        }

        fn factory(&self, module: &Fake, _symbol: &str) -> Option<PluginFactory> {
            match module {
                Fake::Exports(f) => Some(*f),
                Fake::NoExport => None,
            }
        }
    }

    fn dirs() -> Vec<PathBuf> {
        vec!["/d1".into(), "/d2".into(), "/d3".into()]
    }

    fn close_tag(handle: &PluginHandle) -> Value {
        handle.plugin().lock().unwrap().close(0.).unwrap().unwrap()
    }

    #[test]
    fn first_loadable_directory_wins() {
        let provider = FakeProvider::default()
            .with("/d2", Fake::Exports(d2_factory))
            .with("/d3", Fake::Exports(d3_factory));
        let loader = PluginLoader::with_provider(provider, dirs());

        let handle = loader.load("text", "out").unwrap();
        assert_eq!(handle.path(), Path::new("/d2/text.fake"));
        assert_eq!(close_tag(&handle), Value::from("d2"));
        assert!(loader.resident().contains("text"));
    }

    #[test]
    fn total_failure_names_every_directory_in_order() {
        let loader = PluginLoader::with_provider(FakeProvider::default(), dirs());

        let err = loader.load("text", "out").unwrap_err();
        assert!(err.is_plugin_error());
        let msg = err.to_string();
        assert!(msg.starts_with("Error opening output plugin 'text' in:"));
        let d1 = msg.find("\n[/d1]: /d1/text.fake").unwrap();
        let d2 = msg.find("\n[/d2]: /d2/text.fake").unwrap();
        let d3 = msg.find("\n[/d3]: /d3/text.fake").unwrap();
        assert!(d1 < d2 && d2 < d3);
        assert!(loader.resident().is_empty());
    }

    #[test]
    fn missing_export_is_reported() {
        let provider = FakeProvider::default()
            .with("/d2", Fake::NoExport)
            .with("/d3", Fake::Exports(d3_factory));
        let loader = PluginLoader::with_provider(provider, dirs());

        match loader.load("text", "out").unwrap_err() {
            Error::PluginExportNotFound {
                plugin,
                symbol,
                diagnostics,
            } => {
                assert_eq!(plugin, "text");
                assert_eq!(symbol, FACTORY_SYMBOL);
                assert!(diagnostics.contains("[/d1]"));
            }
            e => panic!("unexpected error: {}", e),
        }
        assert!(!loader.resident().contains("text"));
    }

    #[test]
    fn refused_construction_is_reported() {
        let provider = FakeProvider::default().with("/d1", Fake::Exports(refusing_factory));
        let loader = PluginLoader::with_provider(provider, dirs());

        let err = loader.load("text", "out").unwrap_err();
        assert!(matches!(err, Error::PluginConstruction { .. }));
        assert!(err.to_string().contains("instance construction failed"));
    }

    #[test]
    fn resident_module_is_reused() {
        let provider = FakeProvider::default().with("/d2", Fake::Exports(d2_factory));
        let loader = Arc::new(PluginLoader::with_provider(provider, dirs()));

        let threads = (0..4)
            .map(|_| {
                let loader = loader.clone();
                std::thread::spawn(move || loader.load("text", "out").map(|h| h.path().to_owned()))
            })
            .collect::<Vec<_>>();
        for thread in threads {
            assert_eq!(thread.join().unwrap().unwrap(), PathBuf::from("/d2/text.fake"));
        }
        // one failed attempt in /d1, one successful open in /d2
        assert_eq!(loader.provider.opens.load(Ordering::SeqCst), 2);
        assert_eq!(loader.resident().len(), 1);
    }

    #[test]
    fn shared_library_search_reports_directory() {
        let dir = tempfile::tempdir().unwrap();
        let loader = PluginLoader::new(vec![dir.path().to_path_buf()]);
        let err = loader.load("simbatch_missing_plugin", "").unwrap_err();
        assert!(err
            .to_string()
            .contains(&format!("[{}]: ", dir.path().display())));
    }

    #[test]
    fn panicking_factory_keeps_the_registry_usable() {
        let provider = FakeProvider::default()
            .with("/d1", Fake::Exports(panicking_factory))
            .with("/d2", Fake::Exports(d2_factory));
        let loader = PluginLoader::with_provider(provider, vec!["/d1".into()]);

        let err = loader.load("text", "out").unwrap_err();
        assert!(matches!(err, Error::PluginConstruction { .. }));
        assert!(err.to_string().contains("[panic]: bad location"));
        assert!(!loader.resident().contains("text"));

        let other = PluginLoader {
            provider: FakeProvider::default().with("/d2", Fake::Exports(d2_factory)),
            search_dirs: vec!["/d2".into()],
            resident: loader.resident.clone(),
        };
        assert_eq!(close_tag(&other.load("other", "out").unwrap()), Value::from("d2"));
    }

    #[test]
    fn resident_module_keeps_its_path_across_loaders() {
        let first = PluginLoader::with_provider(
            FakeProvider::default().with("/d2", Fake::Exports(d2_factory)),
            dirs(),
        );
        first.load("text", "out").unwrap();

        // shares the registry but could not open the module itself
        let second = PluginLoader {
            provider: FakeProvider::default(),
            search_dirs: dirs(),
            resident: first.resident.clone(),
        };
        let handle = second.load("text", "out").unwrap();
        assert_eq!(handle.path(), Path::new("/d2/text.fake"));
        assert_eq!(second.provider.opens.load(Ordering::SeqCst), 0);
        assert_eq!(
            first.resident().path("text"),
            Some(PathBuf::from("/d2/text.fake"))
        );
    }
}
