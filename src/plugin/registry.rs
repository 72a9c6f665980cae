use super::{PluginKind, Target, Transport};
use crate::error::{Error, Result};
use crate::ssh::{self, SshSettings};
use log::{debug, warn};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

/// Creates a transport from the part of the target spec after the plugin
/// name. Returns `None` when the plugin rejects it.
pub type InitFn = Arc<dyn Fn(&str) -> Option<Box<dyn Transport>> + Send + Sync>;

/// Produces a plugin module, or `None` if the plugin cannot be loaded.
pub type LoaderFn = Arc<dyn Fn() -> Option<PluginModule> + Send + Sync>;

/// Capability table exported by a plugin.
#[derive(Clone)]
pub struct PluginOps {
    pub name: String,
    pub init: Option<InitFn>,
}

impl PluginOps {
    pub fn new<S, F>(name: S, init: F) -> Self
    where
        S: Into<String>,
        F: Fn(&str) -> Option<Box<dyn Transport>> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            init: Some(Arc::new(init)),
        }
    }
}

impl fmt::Debug for PluginOps {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginOps")
            .field("name", &self.name)
            .field("init", &self.init.is_some())
            .finish()
    }
}

/// A loaded plugin. A module without a capability table is loadable but
/// unusable.
#[derive(Debug, Clone, Default)]
pub struct PluginModule {
    pub ops: Option<PluginOps>,
}

impl PluginModule {
    pub fn new(ops: PluginOps) -> Self {
        Self { ops: Some(ops) }
    }
}

/// Resolves target specs to targets.
///
/// Each plugin is loaded at most once per registry; a failed load is
/// retried on the next request.
pub struct PluginRegistry {
    loaders: HashMap<PluginKind, LoaderFn>,
    loaded: Mutex<HashMap<PluginKind, Arc<PluginModule>>>,
}

impl PluginRegistry {
    /// A registry with no loaders at all.
    pub fn empty() -> Self {
        Self {
            loaders: HashMap::new(),
            loaded: Mutex::new(HashMap::new()),
        }
    }

    /// A registry with the built-in SSH transport.
    pub fn builtin() -> Self {
        Self::builtin_with(SshSettings::default())
    }

    /// A registry with the built-in SSH transport using `settings`.
    pub fn builtin_with(settings: SshSettings) -> Self {
        let mut registry = Self::empty();
        registry.register(PluginKind::Ssh, move || Some(ssh::plugin_module(settings.clone())));
        registry
    }

    /// Installs (or replaces) the loader for `kind`.
    pub fn register<F>(&mut self, kind: PluginKind, loader: F)
    where
        F: Fn() -> Option<PluginModule> + Send + Sync + 'static,
    {
        self.loaders.insert(kind, Arc::new(loader));
        self.loaded
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&kind);
    }

    /// Returns the module for `kind`, loading it on first use.
    pub fn load(&self, kind: PluginKind) -> Result<Arc<PluginModule>> {
        let mut loaded = self.loaded.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(module) = loaded.get(&kind) {
            return Ok(Arc::clone(module));
        }

        let Some(loader) = self.loaders.get(&kind) else {
            debug!("No loader registered for plugin {}", kind);
            return Err(Error::UnknownPlugin);
        };

        match loader() {
            Some(module) => {
                debug!("Loaded plugin {}", kind);
                let module = Arc::new(module);
                loaded.insert(kind, Arc::clone(&module));
                Ok(module)
            }
            None => {
                warn!("Unable to load plugin {}", kind);
                Err(Error::UnknownPlugin)
            }
        }
    }

    /// Creates a target from a spec of the form `<plugin>:<rest>`.
    pub fn target_new(&self, spec: &str) -> Result<Target> {
        let (name, rest) = spec.split_once(':').unwrap_or((spec, ""));
        if name.is_empty() {
            return Err(Error::InvalidTargetSpec);
        }

        let kind = PluginKind::from_name(name).ok_or_else(|| {
            debug!("Unknown plugin name '{}'", name);
            Error::UnknownPlugin
        })?;
        if rest.is_empty() {
            debug!("Target spec '{}' has no plugin arguments", spec);
            return Err(Error::UnknownPlugin);
        }

        let module = self.load(kind)?;
        let init = module
            .ops
            .as_ref()
            .and_then(|ops| ops.init.as_ref())
            .ok_or(Error::IncompatiblePlugin)?;

        let transport = init(rest).ok_or_else(|| {
            debug!("Plugin {} rejected target '{}'", kind, rest);
            Error::UnknownPlugin
        })?;
        Ok(Target::new(kind, transport))
    }
}

impl Default for PluginRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

impl fmt::Debug for PluginRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginRegistry")
            .field("plugins", &self.loaders.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}
