//! Object-path discovery.
//!
//! Actors spawn after map transitions, so a symbolic class name does not map
//! to a stable object path. The resolver probes a fixed candidate list via
//! `describe` and tags the outcome: a live instance, the class-default
//! object (introspection only), or nothing at all.

use std::fmt;
use std::sync::Arc;
use tracing::{debug, instrument};

use crate::errors::AutomationError;
use crate::transport::RemoteEngine;

/// Marker the engine uses for class-default (non-instance) objects.
const CLASS_DEFAULT_MARKER: &str = "Default__";

/// Maps probed besides the configured one; actors are commonly left in
/// these during project bring-up.
const FALLBACK_MAPS: [&str; 3] = ["FroggerMap", "TestMap", "DefaultMap"];

/// Opaque identifier of a remote object.
///
/// Live instances look like
/// `/Game/Maps/Map.Map:PersistentLevel.Class_0`; class-default fallbacks
/// look like `/Script/Module.Default__Class`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RemoteObjectPath(String);

impl RemoteObjectPath {
    pub fn new(path: impl Into<String>) -> Self {
        Self(path.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Class-default objects can be described but never mutated.
    pub fn is_class_default(&self) -> bool {
        self.0.contains(CLASS_DEFAULT_MARKER)
    }
}

impl fmt::Display for RemoteObjectPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RemoteObjectPath {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// Outcome of resolving a symbolic class name.
#[derive(Debug, Clone, PartialEq)]
pub enum ResolvedObject {
    /// A spawned instance; safe for any operation.
    Live(RemoteObjectPath),
    /// Only the class-default object answered. Usable for introspection,
    /// never for behavior-mutating calls.
    DefaultOnly(RemoteObjectPath),
    /// Nothing answered, not even the class default.
    NotFound,
}

impl ResolvedObject {
    pub fn path(&self) -> Option<&RemoteObjectPath> {
        match self {
            ResolvedObject::Live(p) | ResolvedObject::DefaultOnly(p) => Some(p),
            ResolvedObject::NotFound => None,
        }
    }

    pub fn is_live(&self) -> bool {
        matches!(self, ResolvedObject::Live(_))
    }

    /// Path usable for read-only introspection, if any.
    pub fn introspection_path(&self, what: &str) -> Result<&RemoteObjectPath, AutomationError> {
        self.path()
            .ok_or_else(|| AutomationError::StaleReference(format!("{what} was not found")))
    }

    /// Path usable for behavior-mutating calls. Fails fast on anything but a
    /// live instance, modeling actors that have not yet spawned.
    pub fn live_path(&self, what: &str) -> Result<&RemoteObjectPath, AutomationError> {
        match self {
            ResolvedObject::Live(p) => Ok(p),
            ResolvedObject::DefaultOnly(p) => Err(AutomationError::StaleReference(format!(
                "{what} resolved to class default {p}; mutating calls require a live instance"
            ))),
            ResolvedObject::NotFound => {
                Err(AutomationError::StaleReference(format!("{what} was not found")))
            }
        }
    }
}

/// Probes candidate object paths for a class until one answers `describe`.
pub struct ObjectResolver {
    engine: Arc<dyn RemoteEngine>,
    map_name: String,
    module_name: String,
}

impl ObjectResolver {
    pub fn new(engine: Arc<dyn RemoteEngine>, map_name: &str, module_name: &str) -> Self {
        Self {
            engine,
            map_name: map_name.to_string(),
            module_name: module_name.to_string(),
        }
    }

    /// Candidate live paths for a class, most likely first, ending with the
    /// class-default fallback.
    pub fn candidates(&self, class_name: &str) -> Vec<RemoteObjectPath> {
        let mut maps: Vec<&str> = vec![self.map_name.as_str()];
        for m in FALLBACK_MAPS {
            if m != self.map_name {
                maps.push(m);
            }
        }
        let mut out = Vec::with_capacity(maps.len() * 3 + 1);
        for map in maps {
            let prefix = format!("/Game/Maps/{map}.{map}:PersistentLevel");
            out.push(RemoteObjectPath::new(format!("{prefix}.{class_name}_0")));
            out.push(RemoteObjectPath::new(format!("{prefix}.{class_name}_C_0")));
            out.push(RemoteObjectPath::new(format!("{prefix}.{class_name}_1")));
        }
        out.push(self.class_default_path(class_name));
        out
    }

    pub fn class_default_path(&self, class_name: &str) -> RemoteObjectPath {
        RemoteObjectPath::new(format!(
            "/Script/{}.{CLASS_DEFAULT_MARKER}{class_name}",
            self.module_name
        ))
    }

    /// Resolve a class name to a concrete object path.
    ///
    /// `describe` failures on individual candidates mean "keep probing";
    /// only connectivity failures abort, since nothing else would answer
    /// either.
    #[instrument(level = "debug", skip(self))]
    pub fn resolve(&self, class_name: &str) -> Result<ResolvedObject, AutomationError> {
        for path in self.candidates(class_name) {
            match self.engine.describe_object(path.as_str()) {
                Ok(desc) if !desc.is_null() => {
                    debug!(%path, "describe answered");
                    if path.is_class_default() {
                        return Ok(ResolvedObject::DefaultOnly(path));
                    }
                    return Ok(ResolvedObject::Live(path));
                }
                Ok(_) => continue,
                Err(e) if e.is_connectivity() => return Err(e),
                Err(_) => continue,
            }
        }
        Ok(ResolvedObject::NotFound)
    }
}
