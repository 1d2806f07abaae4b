//! Storage key derivation.
//!
//! Keys are path-like: `/<prefix>` addresses a collection root and
//! `/<prefix>[/<namespace>]/<name>` addresses a single object.

use serde::{Deserialize, Serialize};

use crate::{StoreError, StoreResult};

/// Request scope: the namespace a call operates in, if any.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RequestScope {
    pub namespace: Option<String>,
}

impl RequestScope {
    /// Cluster-wide scope (also "all namespaces" for list/watch).
    pub fn cluster() -> Self { Self { namespace: None } }

    pub fn namespaced(ns: impl Into<String>) -> Self { Self { namespace: Some(ns.into()) } }

    /// Namespace, treating the empty string as absent.
    pub fn namespace(&self) -> Option<&str> {
        self.namespace.as_deref().filter(|ns| !ns.is_empty())
    }
}

/// Key scheme for one resource kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyScheme {
    prefix: String,
    namespaced: bool,
}

impl KeyScheme {
    pub fn new(prefix: &str, namespaced: bool) -> Self {
        let trimmed = prefix.trim_matches('/');
        Self { prefix: format!("/{}", trimmed), namespaced }
    }

    pub fn cluster(prefix: &str) -> Self { Self::new(prefix, false) }
    pub fn namespaced(prefix: &str) -> Self { Self::new(prefix, true) }

    pub fn prefix(&self) -> &str { &self.prefix }
    pub fn is_namespaced(&self) -> bool { self.namespaced }

    /// Collection root. For namespaced kinds a scope namespace narrows the root; without
    /// one the root spans all namespaces.
    pub fn root_key(&self, scope: &RequestScope) -> String {
        match (self.namespaced, scope.namespace()) {
            (true, Some(ns)) => format!("{}/{}", self.prefix, ns),
            _ => self.prefix.clone(),
        }
    }

    /// Key of a single object.
    pub fn instance_key(&self, scope: &RequestScope, name: &str) -> StoreResult<String> {
        if name.is_empty() {
            return Err(StoreError::InvalidKey("name parameter required".to_string()));
        }
        validate_path_segment(name).map_err(|msg| StoreError::InvalidKey(format!("name {:?} {}", name, msg)))?;
        if !self.namespaced {
            return Ok(format!("{}/{}", self.prefix, name));
        }
        let ns = scope.namespace().ok_or(StoreError::MissingNamespace)?;
        validate_path_segment(ns).map_err(|msg| StoreError::InvalidKey(format!("namespace {:?} {}", ns, msg)))?;
        Ok(format!("{}/{}/{}", self.prefix, ns, name))
    }
}

/// Rejects segments that would escape or split a path.
pub fn validate_path_segment(segment: &str) -> Result<(), &'static str> {
    match segment {
        "." | ".." => Err("may not be '.' or '..'"),
        s if s.contains('/') => Err("may not contain '/'"),
        s if s.contains('%') => Err("may not contain '%'"),
        _ => Ok(()),
    }
}
